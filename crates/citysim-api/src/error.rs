use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use citysim_core::error::CitysimError;
use serde::Serialize;

/// Unified API error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            details: None,
        }
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: message.into(),
            details: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<CitysimError> for ApiError {
    fn from(err: CitysimError) -> Self {
        if err.is_not_found() {
            return Self::not_found("Resource not found").with_details(err.to_string());
        }

        match &err {
            CitysimError::UnknownAnalysisType { .. }
            | CitysimError::InvalidParameter { .. }
            | CitysimError::UnknownGeometryType { .. }
            | CitysimError::DefaultConfigurationRequired { .. }
            | CitysimError::ResultNameMismatch { .. } => {
                Self::bad_request("Invalid request").with_details(err.to_string())
            }
            CitysimError::UnsupportedFormat { .. } | CitysimError::UnsupportedOperation { .. } => {
                Self::unprocessable("Unsupported operation").with_details(err.to_string())
            }
            _ => {
                tracing::error!(error = %err, "Request failed");
                Self::internal("Internal error").with_details(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let err: ApiError = CitysimError::RunNotFound { id: "r1".to_string() }.into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.details.as_deref(), Some("Analysis run not found: r1"));

        let err: ApiError = CitysimError::UnknownAnalysisType {
            name: "district-cooling".to_string(),
        }
        .into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err: ApiError = CitysimError::UnsupportedFormat {
            result: "wind-speed".to_string(),
            format: "geotiff".to_string(),
        }
        .into();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);

        let err: ApiError = CitysimError::Storage("pool closed".to_string()).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
