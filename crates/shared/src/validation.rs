//! Common validation utilities.

use validator::ValidationError;

/// Institutional domain accepted when none is configured.
pub const DEFAULT_EMAIL_DOMAIN: &str = "pitt.edu";

/// Minimum password length in characters.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Maximum display name length in characters.
pub const MAX_NAME_LEN: usize = 100;

fn error(code: &'static str, message: String) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

/// Validates that `email` is a plain address under `domain`.
///
/// The domain match is case-insensitive. The local part must be non-empty and
/// free of whitespace; subdomains of `domain` are not accepted.
pub fn validate_institutional_email(email: &str, domain: &str) -> Result<(), ValidationError> {
    let Some((local, host)) = email.rsplit_once('@') else {
        return Err(error("email_format", "Email must contain '@'".to_string()));
    };

    if local.is_empty() || local.contains('@') || email.chars().any(char::is_whitespace) {
        return Err(error("email_format", "Email address is malformed".to_string()));
    }

    if !host.eq_ignore_ascii_case(domain) {
        return Err(error(
            "email_domain",
            format!("Email must be an @{} address", domain),
        ));
    }

    Ok(())
}

/// `validator` custom hook using the default institutional domain.
pub fn validate_default_email(email: &str) -> Result<(), ValidationError> {
    validate_institutional_email(email, DEFAULT_EMAIL_DOMAIN)
}

/// Validates minimum password strength.
pub fn validate_password_strength(password: &str) -> Result<(), ValidationError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(error(
            "password_length",
            format!("Password must be at least {} characters", MIN_PASSWORD_LEN),
        ));
    }
    if password.trim().is_empty() {
        return Err(error(
            "password_blank",
            "Password must not be blank".to_string(),
        ));
    }
    Ok(())
}

/// Validates an optional display name.
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(error("name_blank", "Name must not be blank".to_string()));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(error(
            "name_length",
            format!("Name must be at most {} characters", MAX_NAME_LEN),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_institutional_email() {
        assert!(validate_institutional_email("abc12@pitt.edu", "pitt.edu").is_ok());
        assert!(validate_institutional_email("abc12@PITT.EDU", "pitt.edu").is_ok());
        assert!(validate_institutional_email("abc12@gmail.com", "pitt.edu").is_err());
        assert!(validate_institutional_email("abc12@cs.pitt.edu", "pitt.edu").is_err());
        assert!(validate_institutional_email("@pitt.edu", "pitt.edu").is_err());
        assert!(validate_institutional_email("abc12", "pitt.edu").is_err());
        assert!(validate_institutional_email("a b@pitt.edu", "pitt.edu").is_err());
    }

    #[test]
    fn test_validate_institutional_email_error_code() {
        let err = validate_institutional_email("abc@cmu.edu", "pitt.edu").unwrap_err();
        assert_eq!(err.code, "email_domain");
        assert_eq!(
            err.message.unwrap().to_string(),
            "Email must be an @pitt.edu address"
        );
    }

    #[test]
    fn test_validate_default_email() {
        assert!(validate_default_email("someone@pitt.edu").is_ok());
        assert!(validate_default_email("someone@example.com").is_err());
    }

    #[test]
    fn test_validate_password_strength() {
        assert!(validate_password_strength("longenough").is_ok());
        assert!(validate_password_strength("short").is_err());
        assert!(validate_password_strength("        ").is_err());
    }

    #[test]
    fn test_validate_display_name() {
        assert!(validate_display_name("Panther Pete").is_ok());
        assert!(validate_display_name("   ").is_err());
        assert!(validate_display_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }
}
