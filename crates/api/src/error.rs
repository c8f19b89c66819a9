use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::errors::{AccountError, RecommendationError, StoreError, TokenError};
use serde::Serialize;
use shared::jwt::JwtError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Token has expired")]
    TokenExpired,

    #[error("Wrong token kind: {0}")]
    InvalidTokenKind(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg.clone()),
            ApiError::TokenExpired => (
                StatusCode::UNAUTHORIZED,
                "token_expired",
                "Token has expired".into(),
            ),
            ApiError::InvalidTokenKind(msg) => {
                (StatusCode::UNAUTHORIZED, "invalid_token_kind", msg.clone())
            }
            ApiError::InvalidToken(msg) => (StatusCode::UNAUTHORIZED, "invalid_token", msg.clone()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.clone()),
            ApiError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many requests. Please try again later.".into(),
            ),
            ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "An internal error occurred".into(),
            ),
            ApiError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                msg.clone(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(msg) = &self {
            tracing::error!("Internal error: {}", msg);
        }

        let (status, code, message) = self.parts();
        let body = ErrorBody {
            code: code.into(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            StoreError::NotFound(msg) => ApiError::NotFound(msg),
            StoreError::Backend(msg) => ApiError::Internal(format!("Store error: {}", msg)),
        }
    }
}

impl From<JwtError> for ApiError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::ExpiredSignature => ApiError::TokenExpired,
            e @ JwtError::InvalidTokenKind { .. } => ApiError::InvalidTokenKind(e.to_string()),
            JwtError::Decode(msg) => ApiError::InvalidToken(msg),
            e @ JwtError::InvalidExpiry => ApiError::Validation(e.to_string()),
            e => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Jwt(e) => e.into(),
            TokenError::Store(e) => e.into(),
            e @ TokenError::MissingUser(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match err {
            e @ AccountError::DuplicateEmail(_) => ApiError::Conflict(e.to_string()),
            e @ AccountError::AlreadyActive => ApiError::Conflict(e.to_string()),
            e @ AccountError::InvalidCredentials => ApiError::Unauthorized(e.to_string()),
            e @ (AccountError::InvalidVerificationCode
            | AccountError::InvalidAffiliation(_)
            | AccountError::InvalidEmail(_)
            | AccountError::WeakPassword(_)
            | AccountError::InvalidName(_)
            | AccountError::InvalidNotification(_)) => ApiError::Validation(e.to_string()),
            e @ (AccountError::AdminPermission
            | AccountError::HostPermission
            | AccountError::AccountDisabled
            | AccountError::ActivationRequired) => ApiError::Forbidden(e.to_string()),
            e @ (AccountError::ReferralNotFound | AccountError::HostRequestNotFound) => {
                ApiError::NotFound(e.to_string())
            }
            e @ AccountError::MissingUser(_) => ApiError::Internal(e.to_string()),
            AccountError::Token(e) => e.into(),
            AccountError::Password(e) => ApiError::Internal(e.to_string()),
            AccountError::Store(e) => e.into(),
        }
    }
}

impl From<RecommendationError> for ApiError {
    fn from(err: RecommendationError) -> Self {
        match err {
            e @ RecommendationError::MissingEvent(_) => ApiError::NotFound(e.to_string()),
            e @ (RecommendationError::InvalidAcceptanceProbability(_)
            | RecommendationError::InvalidEvent(_)) => ApiError::Validation(e.to_string()),
            RecommendationError::Account(e) => e.into(),
            RecommendationError::Store(e) => e.into(),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let messages: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| match &e.message {
                    Some(m) => format!("{}: {}", field, m),
                    None => format!("{}: {}", field, e.code),
                })
            })
            .collect();

        let message = if messages.len() == 1 {
            messages[0].clone()
        } else {
            format!("{} validation errors: {}", messages.len(), messages.join("; "))
        };

        ApiError::Validation(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::jwt::TokenKind;
    use uuid::Uuid;
    use validator::Validate;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_error_body_has_code_and_message() {
        let response = ApiError::NotFound("Event missing".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let json = body_json(response).await;
        assert_eq!(json["code"], "not_found");
        assert_eq!(json["message"], "Event missing");
    }

    #[tokio::test]
    async fn test_internal_error_is_redacted() {
        let err: ApiError = StoreError::Backend("connection refused on 10.0.0.3".into()).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body_json(response).await;
        assert_eq!(json["code"], "internal_error");
        assert!(!json["message"].as_str().unwrap().contains("10.0.0.3"));
    }

    #[tokio::test]
    async fn test_token_failures_have_distinct_codes() {
        let cases = [
            (ApiError::from(JwtError::ExpiredSignature), "token_expired"),
            (
                ApiError::from(JwtError::InvalidTokenKind {
                    expected: TokenKind::Access,
                    found: Some(TokenKind::Refresh),
                }),
                "invalid_token_kind",
            ),
            (
                ApiError::from(JwtError::Decode("bad signature".into())),
                "invalid_token",
            ),
        ];

        for (err, code) in cases {
            let response = err.into_response();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(body_json(response).await["code"], code);
        }
    }

    #[test]
    fn test_account_error_statuses() {
        let cases = [
            (
                AccountError::DuplicateEmail("a@pitt.edu".into()),
                StatusCode::CONFLICT,
            ),
            (AccountError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (AccountError::InvalidAffiliation(99), StatusCode::BAD_REQUEST),
            (
                AccountError::WeakPassword("too short".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                AccountError::InvalidNotification("title and body are required".into()),
                StatusCode::BAD_REQUEST,
            ),
            (AccountError::AdminPermission, StatusCode::FORBIDDEN),
            (AccountError::HostPermission, StatusCode::FORBIDDEN),
            (AccountError::AccountDisabled, StatusCode::FORBIDDEN),
            (AccountError::ReferralNotFound, StatusCode::NOT_FOUND),
            (
                AccountError::MissingUser(Uuid::nil()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn test_recommendation_error_statuses() {
        assert_eq!(
            ApiError::from(RecommendationError::MissingEvent(Uuid::nil()))
                .into_response()
                .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(RecommendationError::InvalidAcceptanceProbability(1.5))
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(RecommendationError::Account(AccountError::HostPermission))
                .into_response()
                .status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_from_validation_errors() {
        #[derive(Validate)]
        struct Body {
            #[validate(length(min = 1, message = "must not be empty"))]
            title: String,
        }

        let errors = Body {
            title: String::new(),
        }
        .validate()
        .unwrap_err();

        match ApiError::from(errors) {
            ApiError::Validation(msg) => assert_eq!(msg, "title: must not be empty"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rate_limited_status() {
        let response = ApiError::RateLimited.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
