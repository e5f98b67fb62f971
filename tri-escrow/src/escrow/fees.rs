//! Fee and minimum-amount arithmetic.
//!
//! The protocol fee is 1% of the nominal amount, floor-divided, and is only
//! charged when the seller is paid. Refunds and cancellations are free.

use alloy_primitives::U256;

use super::types::EscrowState;
use crate::error::EscrowError;

/// `fee = amount / FEE_DIVISOR`.
pub const FEE_DIVISOR: u64 = 100;

/// Fewest token decimals accepted.
pub const MIN_TOKEN_DECIMALS: u8 = 6;

/// Most token decimals accepted.
pub const MAX_TOKEN_DECIMALS: u8 = 18;

/// 1% of `amount`, truncated.
#[must_use]
pub fn protocol_fee(amount: U256) -> U256 {
    amount / U256::from(FEE_DIVISOR)
}

/// The fee owed when an escrow settles in `state`.
#[must_use]
pub fn settlement_fee(state: EscrowState, amount: U256) -> U256 {
    match state {
        EscrowState::Complete => protocol_fee(amount),
        _ => U256::ZERO,
    }
}

/// Smallest amount whose fee cannot truncate to zero: `100 * 10^(decimals - 2)`.
///
/// # Errors
///
/// Returns [`EscrowError::UnsupportedDecimals`] outside `[6, 18]`.
pub fn minimum_amount(decimals: u8) -> Result<U256, EscrowError> {
    if !(MIN_TOKEN_DECIMALS..=MAX_TOKEN_DECIMALS).contains(&decimals) {
        return Err(EscrowError::UnsupportedDecimals(decimals));
    }
    Ok(U256::from(FEE_DIVISOR) * U256::from(10u64).pow(U256::from(decimals - 2)))
}

/// Checks `amount` against [`minimum_amount`].
///
/// # Errors
///
/// [`EscrowError::UnsupportedDecimals`] or [`EscrowError::AmountTooSmall`].
pub fn check_amount(amount: U256, decimals: u8) -> Result<(), EscrowError> {
    let minimum = minimum_amount(decimals)?;
    if amount < minimum {
        return Err(EscrowError::AmountTooSmall { amount, minimum });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_truncates() {
        assert_eq!(protocol_fee(U256::from(1_000_099u64)), U256::from(10_000u64));
        assert_eq!(protocol_fee(U256::from(10_000_000u64)), U256::from(100_000u64));
        assert_eq!(protocol_fee(U256::from(99u64)), U256::ZERO);
    }

    #[test]
    fn refunds_and_cancels_are_free() {
        let amount = U256::from(10_000_000u64);
        assert_eq!(settlement_fee(EscrowState::Refunded, amount), U256::ZERO);
        assert_eq!(settlement_fee(EscrowState::Canceled, amount), U256::ZERO);
        assert_eq!(settlement_fee(EscrowState::Complete, amount), U256::from(100_000u64));
    }

    #[test]
    fn minimum_scales_with_decimals() {
        assert_eq!(minimum_amount(6).unwrap(), U256::from(1_000_000u64));
        assert_eq!(
            minimum_amount(18).unwrap(),
            U256::from(1_000_000_000_000_000_000u128)
        );
    }

    #[test]
    fn fee_at_minimum_is_positive() {
        for decimals in MIN_TOKEN_DECIMALS..=MAX_TOKEN_DECIMALS {
            let minimum = minimum_amount(decimals).unwrap();
            assert!(protocol_fee(minimum) > U256::ZERO, "decimals {decimals}");
        }
    }

    #[test]
    fn rejects_unsupported_decimals() {
        assert_eq!(minimum_amount(5), Err(EscrowError::UnsupportedDecimals(5)));
        assert_eq!(minimum_amount(19), Err(EscrowError::UnsupportedDecimals(19)));
    }

    #[test]
    fn rejects_amount_below_minimum() {
        assert!(check_amount(U256::from(1_000_000u64), 6).is_ok());
        assert!(matches!(
            check_amount(U256::from(999_999u64), 6),
            Err(EscrowError::AmountTooSmall { .. })
        ));
    }
}
