//! Error types for the relay service.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tri_escrow::{ErrorKind, EscrowError};

/// Errors returned by relay endpoints.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The ledger rejected the call.
    #[error(transparent)]
    Escrow(#[from] EscrowError),

    /// A request body omitted a field the call needs.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// No such direct call.
    #[error("unknown call `{0}`")]
    UnknownCall(String),
}

impl RelayError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Escrow(EscrowError::EscrowNotFound(_) | EscrowError::WalletNotFound(_))
            | Self::UnknownCall(_) => StatusCode::NOT_FOUND,
            Self::MissingField(_) => StatusCode::BAD_REQUEST,
            Self::Escrow(err) => match err.kind() {
                ErrorKind::Validation | ErrorKind::Signature => StatusCode::BAD_REQUEST,
                ErrorKind::Authorization => StatusCode::FORBIDDEN,
                ErrorKind::Temporal | ErrorKind::State => StatusCode::CONFLICT,
                ErrorKind::Token => StatusCode::UNPROCESSABLE_ENTITY,
            },
        }
    }

    const fn kind(&self) -> &'static str {
        match self {
            Self::Escrow(err) => err.kind().as_str(),
            Self::MissingField(_) | Self::UnknownCall(_) => "validation",
        }
    }

    const fn code(&self) -> &'static str {
        match self {
            Self::Escrow(err) => err.code(),
            Self::MissingField(_) => "MissingField",
            Self::UnknownCall(_) => "UnknownCall",
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::debug!(%status, code = self.code(), "request rejected: {self}");
        let body = serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "code": self.code(),
        });
        (status, axum::Json(body)).into_response()
    }
}
