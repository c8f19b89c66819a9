//! Kind-tagged JWT utilities using HS256.
//!
//! Every token carries its kind in the JOSE header (`kid`), which can be read
//! without verifying the signature. The signing key is derived per kind:
//!
//! | kind    | key                              |
//! |---------|----------------------------------|
//! | access  | service secret                   |
//! | refresh | service secret + password hash   |
//! | reset   | password hash                    |
//!
//! Decoding always checks the kind tag before attempting verification, so a
//! token of one kind can never be accepted where another is expected.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{
    decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Default token issuer.
pub const DEFAULT_ISSUER: &str = "PittGrub";

/// Default leeway in seconds for clock skew tolerance.
pub const DEFAULT_LEEWAY_SECS: u64 = 30;

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Error type for JWT operations.
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Expected {expected} token, found {}", found.map(|k| k.as_str()).unwrap_or("untagged"))]
    InvalidTokenKind {
        expected: TokenKind,
        found: Option<TokenKind>,
    },

    #[error("Token has expired")]
    ExpiredSignature,

    #[error("Failed to decode token: {0}")]
    Decode(String),

    #[error("Failed to encode token: {0}")]
    Encoding(String),

    #[error("A credential is required to derive the {0} token key")]
    MissingCredential(TokenKind),

    #[error("Token expiry must be in the future")]
    InvalidExpiry,

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Kind of token, written to the header before signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
    Reset,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
            TokenKind::Reset => "reset",
        }
    }

    /// Whether the key for this kind is derived from the owner's password hash.
    pub fn needs_credential(&self) -> bool {
        !matches!(self, TokenKind::Access)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access" => Ok(TokenKind::Access),
            "refresh" => Ok(TokenKind::Refresh),
            "reset" => Ok(TokenKind::Reset),
            _ => Err(()),
        }
    }
}

/// Token claims shared by all kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Owner (user ID)
    pub own: Uuid,
    /// Comma-joined role names
    pub roles: String,
    /// Issuer
    pub iss: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp), absent on refresh tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl Claims {
    /// Splits the embedded role claim.
    pub fn role_names(&self) -> impl Iterator<Item = &str> {
        self.roles.split(',').map(str::trim).filter(|r| !r.is_empty())
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role_names().any(|r| r == role)
    }
}

/// Derives the HMAC key for a token kind.
///
/// `password_hash` is the owner's current stored hash and is required for
/// refresh and reset tokens. Changing the password changes the key, which
/// silently invalidates every outstanding refresh and reset token.
pub fn derive_signing_key(
    kind: TokenKind,
    service_secret: &str,
    password_hash: Option<&str>,
) -> Result<Vec<u8>, JwtError> {
    match (kind, password_hash) {
        (TokenKind::Access, _) => Ok(service_secret.as_bytes().to_vec()),
        (TokenKind::Refresh, Some(hash)) => {
            let mut key = Vec::with_capacity(service_secret.len() + hash.len());
            key.extend_from_slice(service_secret.as_bytes());
            key.extend_from_slice(hash.as_bytes());
            Ok(key)
        }
        (TokenKind::Reset, Some(hash)) => Ok(hash.as_bytes().to_vec()),
        (kind, None) => Err(JwtError::MissingCredential(kind)),
    }
}

/// Encoder/decoder for kind-tagged tokens.
#[derive(Clone)]
pub struct TokenCodec {
    secret: String,
    issuer: String,
    leeway_secs: u64,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("issuer", &self.issuer)
            .field("leeway_secs", &self.leeway_secs)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl TokenCodec {
    /// Creates a codec with the default leeway.
    pub fn new(secret: &str, issuer: &str) -> Result<Self, JwtError> {
        Self::with_leeway(secret, issuer, DEFAULT_LEEWAY_SECS)
    }

    pub fn with_leeway(secret: &str, issuer: &str, leeway_secs: u64) -> Result<Self, JwtError> {
        if secret.is_empty() {
            return Err(JwtError::InvalidKey("service secret must not be empty".into()));
        }
        Ok(Self {
            secret: secret.to_string(),
            issuer: issuer.to_string(),
            leeway_secs,
        })
    }

    /// Codec with zero leeway for tests.
    pub fn new_for_testing(secret: &str) -> Self {
        Self {
            secret: secret.to_string(),
            issuer: DEFAULT_ISSUER.to_string(),
            leeway_secs: 0,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Signs `claims` as a token of `kind`.
    pub fn encode(
        &self,
        kind: TokenKind,
        claims: &Claims,
        password_hash: Option<&str>,
    ) -> Result<String, JwtError> {
        let key = derive_signing_key(kind, &self.secret, password_hash)?;

        let mut header = Header::new(ALGORITHM);
        header.kid = Some(kind.as_str().to_string());

        encode(&header, claims, &EncodingKey::from_secret(&key))
            .map_err(|e| JwtError::Encoding(e.to_string()))
    }

    /// Reads the kind tag without verifying the signature.
    ///
    /// Returns `Ok(None)` for a well-formed token with a missing or unknown tag.
    pub fn peek_kind(&self, token: &str) -> Result<Option<TokenKind>, JwtError> {
        let header = decode_header(token).map_err(|e| JwtError::Decode(e.to_string()))?;
        Ok(header.kid.and_then(|kid| kid.parse().ok()))
    }

    /// Reads the owner claim without verifying the signature.
    ///
    /// Only used to find whose password hash seeds the verification key.
    pub fn peek_owner(&self, token: &str) -> Result<Uuid, JwtError> {
        let mut validation = Validation::new(ALGORITHM);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.required_spec_claims = HashSet::new();

        decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
            .map(|data| data.claims.own)
            .map_err(|e| JwtError::Decode(e.to_string()))
    }

    /// Verifies a token of the `expected` kind and returns its claims.
    ///
    /// The kind tag is checked first; a token of any other kind fails with
    /// [`JwtError::InvalidTokenKind`] before a key is ever derived.
    pub fn decode(
        &self,
        expected: TokenKind,
        token: &str,
        password_hash: Option<&str>,
        verify_exp: bool,
    ) -> Result<Claims, JwtError> {
        let found = self.peek_kind(token)?;
        if found != Some(expected) {
            return Err(JwtError::InvalidTokenKind { expected, found });
        }

        let key = derive_signing_key(expected, &self.secret, password_hash)?;

        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = self.leeway_secs;
        validation.validate_exp = verify_exp && expected != TokenKind::Refresh;
        validation.set_issuer(&[self.issuer.as_str()]);
        if validation.validate_exp {
            validation.set_required_spec_claims(&["exp", "iss"]);
        } else {
            validation.set_required_spec_claims(&["iss"]);
        }

        let data = decode::<Claims>(token, &DecodingKey::from_secret(&key), &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => JwtError::ExpiredSignature,
                _ => JwtError::Decode(e.to_string()),
            })?;

        Ok(data.claims)
    }
}
