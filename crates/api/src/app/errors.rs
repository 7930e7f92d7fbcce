use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use songsmith_core::DomainError;
use songsmith_infra::ServiceError;

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    match err {
        ServiceError::Domain(e) => domain_error_to_response(e),
        ServiceError::InvalidPayload(msg) => {
            json_error(StatusCode::BAD_REQUEST, "invalid_payload", msg)
        }
        ServiceError::Gateway(e) => {
            error!(error = %e, "payment provider call failed");
            json_error(StatusCode::BAD_GATEWAY, "gateway_error", e.to_string())
        }
        ServiceError::Execution(e) => {
            error!(error = %e, "generation failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string())
        }
        ServiceError::Repository(e) => {
            error!(error = %e, "repository failure");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal server error",
            )
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        DomainError::Validation(_) | DomainError::InvalidId(_) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", message)
        }
        DomainError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", message),
        DomainError::Quota(_) => json_error(StatusCode::FORBIDDEN, "quota_exceeded", message),
        DomainError::Configuration(_) => {
            json_error(StatusCode::BAD_REQUEST, "not_configured", message)
        }
        DomainError::Authenticity(_) => {
            json_error(StatusCode::BAD_REQUEST, "invalid_signature", message)
        }
        DomainError::Conflict(_) => json_error(StatusCode::BAD_REQUEST, "conflict", message),
        DomainError::Internal(_) => {
            error!(error = %message, "internal error");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_classes_map_to_statuses() {
        let cases = [
            (DomainError::validation("x"), StatusCode::BAD_REQUEST),
            (DomainError::not_found(), StatusCode::NOT_FOUND),
            (DomainError::quota("x"), StatusCode::FORBIDDEN),
            (DomainError::configuration("x"), StatusCode::BAD_REQUEST),
            (DomainError::authenticity("x"), StatusCode::BAD_REQUEST),
            (DomainError::conflict("x"), StatusCode::BAD_REQUEST),
            (DomainError::internal("x"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(domain_error_to_response(err).status(), status);
        }
    }

    #[test]
    fn invalid_payload_is_bad_request() {
        let res = service_error_to_response(ServiceError::InvalidPayload("eof".to_string()));
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
