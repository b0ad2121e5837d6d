// Mapping of crate errors onto HTTP responses

use crate::error::KeeperError;
use crate::http::protocol::ErrorBody;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// A `KeeperError` on its way out of a handler
#[derive(Debug)]
pub struct ApiError(pub KeeperError);

impl From<KeeperError> for ApiError {
    fn from(err: KeeperError) -> Self {
        Self(err)
    }
}

impl ApiError {
    /// - Configuration and bad input: 400
    /// - Already running or busy: 409
    /// - Upstream AI or interpreter failures: 502
    /// - Launch and everything else: 500
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            err if err.is_configuration() => StatusCode::BAD_REQUEST,
            KeeperError::MissingField(_) | KeeperError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            KeeperError::AlreadyRunning(_) | KeeperError::Busy(_) => StatusCode::CONFLICT,
            KeeperError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "Request failed: {}", self.0);
        } else {
            tracing::warn!(status = status.as_u16(), "Request rejected: {}", self.0);
        }

        let body = ErrorBody {
            success: false,
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LaunchError, LaunchErrorKind};

    fn status(err: KeeperError) -> StatusCode {
        ApiError(err).status_code()
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            status(KeeperError::ConfigValidationError("port".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(LaunchError::new(LaunchErrorKind::InvalidInterpreter, "x").into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(KeeperError::MissingField("image".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status(KeeperError::AlreadyRunning(8888)), StatusCode::CONFLICT);
        assert_eq!(status(KeeperError::Busy("stop".into())), StatusCode::CONFLICT);
        assert_eq!(
            status(LaunchError::new(LaunchErrorKind::EarlyCrash, "x").into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status(KeeperError::ExternalService("down".into())),
            StatusCode::BAD_GATEWAY
        );
    }
}
