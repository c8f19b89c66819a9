//! Account entry points: signup, login and password reset.

use axum::{extract::State, http::StatusCode, Json};
use domain::models::{PrimaryAffiliation, User, PRIMARY_AFFILIATIONS};
use domain::services::{HostSignupRequest, SignupRequest};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;

/// Request body for user signup.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SignupBody {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,

    #[validate(length(max = 100, message = "Name must be at most 100 characters"))]
    pub name: Option<String>,

    /// Email of an existing user vouching for this signup.
    #[validate(email(message = "Invalid referral email format"))]
    pub referral: Option<String>,
}

/// Request body for host signup.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct HostSignupBody {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,

    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,

    pub primary_affiliation: i32,

    /// Public directory listing proving the affiliation.
    #[validate(length(min = 1, message = "Directory link is required"))]
    pub directory: String,

    #[validate(length(max = 1000, message = "Reason must be at most 1000 characters"))]
    pub reason: Option<String>,
}

/// Response body for both signup flavours.
///
/// The verification code itself only ever travels by email.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupResponse {
    pub user: User,
    pub verification_sent: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginBody {
    #[validate(length(min = 1, message = "Email is required"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Token pair returned by login.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokensResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Response body for login. Inactive users receive tokens too so they can
/// call the verification endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user: User,
    pub tokens: TokensResponse,
    pub verification_sent: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ForgotPasswordBody {
    #[validate(length(min = 1, message = "Email is required"))]
    pub email: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordBody {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,

    #[validate(length(min = 1, message = "New password is required"))]
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// POST /api/v1/signup
pub async fn signup(
    State(state): State<AppState>,
    Json(body): Json<SignupBody>,
) -> Result<(StatusCode, Json<SignupResponse>), ApiError> {
    body.validate()?;

    let outcome = state
        .accounts
        .signup(SignupRequest {
            email: body.email,
            password: body.password,
            name: body.name,
            referrer_email: body.referral,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            verification_sent: outcome.verification_code.is_some(),
            user: outcome.user,
        }),
    ))
}

/// POST /api/v1/signup/host
pub async fn host_signup(
    State(state): State<AppState>,
    Json(body): Json<HostSignupBody>,
) -> Result<(StatusCode, Json<SignupResponse>), ApiError> {
    body.validate()?;

    let outcome = state
        .accounts
        .host_signup(HostSignupRequest {
            email: body.email,
            password: body.password,
            name: body.name,
            primary_affiliation: body.primary_affiliation,
            directory: body.directory,
            reason: body.reason,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            verification_sent: outcome.verification_code.is_some(),
            user: outcome.user,
        }),
    ))
}

/// GET /api/v1/affiliations
pub async fn affiliations() -> Json<Vec<PrimaryAffiliation>> {
    Json(PRIMARY_AFFILIATIONS.to_vec())
}

/// POST /api/v1/login
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginBody>,
) -> Result<Json<LoginResponse>, ApiError> {
    body.validate()?;

    let outcome = state.accounts.login(&body.email, &body.password).await?;
    let access_token = state.tokens.access_token_for_user(&outcome.user, None)?;
    let refresh_token = state.tokens.refresh_token_for_user(&outcome.user)?;

    Ok(Json(LoginResponse {
        tokens: TokensResponse {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: state.tokens.settings().access_ttl.num_seconds(),
        },
        verification_sent: outcome.verification_sent,
        user: outcome.user,
    }))
}

/// POST /api/v1/password/forgot
///
/// Always answers 202 so the endpoint cannot be used to discover accounts.
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(body): Json<ForgotPasswordBody>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    body.validate()?;

    state.accounts.request_password_reset(&body.email).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "If an account exists for that email, a reset link has been sent".to_string(),
        }),
    ))
}

/// POST /api/v1/password/reset
pub async fn reset_password(
    State(state): State<AppState>,
    Json(body): Json<ResetPasswordBody>,
) -> Result<StatusCode, ApiError> {
    body.validate()?;

    state
        .accounts
        .reset_password(&body.token, &body.new_password)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signup_body_deserialization() {
        let json = r#"{"email":"abc12@pitt.edu","password":"panthers-4-ever","referral":"ref1@pitt.edu"}"#;
        let body: SignupBody = serde_json::from_str(json).unwrap();
        assert_eq!(body.referral.as_deref(), Some("ref1@pitt.edu"));
        assert!(body.name.is_none());
        assert!(body.validate().is_ok());
    }

    #[test]
    fn test_signup_body_rejects_malformed_email() {
        let body = SignupBody {
            email: "not-an-email".to_string(),
            password: "panthers-4-ever".to_string(),
            name: None,
            referral: None,
        };
        assert!(body.validate().is_err());
    }

    #[test]
    fn test_host_signup_body_camel_case() {
        let json = r#"{
            "email": "host1@pitt.edu",
            "password": "panthers-4-ever",
            "name": "Host",
            "primaryAffiliation": 2,
            "directory": "https://find.pitt.edu/host1"
        }"#;
        let body: HostSignupBody = serde_json::from_str(json).unwrap();
        assert_eq!(body.primary_affiliation, 2);
        assert!(body.validate().is_ok());
    }

    #[test]
    fn test_tokens_response_serialization() {
        let tokens = TokensResponse {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            token_type: "Bearer".to_string(),
            expires_in: 7200,
        };
        let json = serde_json::to_value(&tokens).unwrap();
        assert_eq!(json["accessToken"], "a");
        assert_eq!(json["refreshToken"], "r");
        assert_eq!(json["expiresIn"], 7200);
    }

    #[tokio::test]
    async fn test_affiliations_lists_reference_data() {
        let Json(list) = affiliations().await;
        assert_eq!(list.len(), PRIMARY_AFFILIATIONS.len());
        assert!(list.iter().any(|a| a.name == "Sodexo Dining Services"));
    }
}
