use std::sync::RwLock;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde_json::Value;

use super::AuthError;

/// Realm role granting access to every project.
pub const SUPERADMIN_ROLE: &str = "superadmin";

/// Identity carried by a validated token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub subject: String,
    pub preferred_username: Option<String>,
    /// Numeric id of the user on the forge, when the identity provider links one.
    pub forge_id: Option<String>,
    pub realm_roles: Vec<String>,
}

impl Claims {
    #[must_use]
    pub fn is_superadmin(&self) -> bool {
        self.realm_roles.iter().any(|r| r == SUPERADMIN_ROLE)
    }

    /// Preferred username, falling back to the subject.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.preferred_username.as_deref().unwrap_or(&self.subject)
    }

    pub fn from_value(claims: &Value) -> Result<Self, AuthError> {
        let subject = claim_string(claims, "sub")
            .ok_or_else(|| AuthError::InvalidToken("missing sub claim".to_string()))?;

        let forge_id = match claims.get("gh_id") {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        let realm_roles = claims
            .get("realm_access")
            .and_then(|v| v.get("roles"))
            .map(claim_string_vec)
            .unwrap_or_default();

        Ok(Self {
            subject,
            preferred_username: claim_string(claims, "preferred_username"),
            forge_id,
            realm_roles,
        })
    }
}

fn claim_string(claims: &Value, claim: &str) -> Option<String> {
    claims
        .get(claim)
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn claim_string_vec(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.to_string())
            .collect(),
        _ => Vec::new(),
    }
}

/// Turns a bearer string into claims. Never touches the store.
pub trait TokenValidator: Send + Sync {
    fn parse_and_validate(&self, token: &str) -> Result<Claims, AuthError>;
}

/// Signing material accepted by [`JwtValidator`].
#[derive(Clone)]
pub enum SigningKeys {
    /// HS256 shared secret.
    Shared(Vec<u8>),
    /// Public keys published by the identity provider, selected by `kid`.
    Jwks(JwkSet),
}

pub struct JwtValidator {
    issuer: String,
    audience: Option<String>,
    leeway: u64,
    keys: RwLock<SigningKeys>,
}

impl JwtValidator {
    pub fn new(issuer: impl Into<String>, audience: Option<String>, keys: SigningKeys) -> Self {
        Self {
            issuer: issuer.into(),
            audience,
            leeway: 0,
            keys: RwLock::new(keys),
        }
    }

    #[must_use]
    pub fn with_leeway(mut self, secs: u64) -> Self {
        self.leeway = secs;
        self
    }

    /// Replace the signing material; tokens are checked against the new keys
    /// from the next call on.
    pub fn rotate(&self, keys: SigningKeys) {
        *self.keys.write().unwrap_or_else(|e| e.into_inner()) = keys;
    }

    fn decoding_key(&self, header: &jsonwebtoken::Header) -> Result<DecodingKey, AuthError> {
        let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
        match &*keys {
            SigningKeys::Shared(secret) => {
                if header.alg != Algorithm::HS256 {
                    return Err(AuthError::InvalidToken(
                        "unsupported JWT alg (expected HS256)".to_string(),
                    ));
                }
                Ok(DecodingKey::from_secret(secret))
            }
            SigningKeys::Jwks(set) => {
                if matches!(
                    header.alg,
                    Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
                ) {
                    return Err(AuthError::InvalidToken(
                        "symmetric JWT alg not accepted".to_string(),
                    ));
                }
                let kid = header
                    .kid
                    .as_deref()
                    .ok_or_else(|| AuthError::InvalidToken("JWT header missing kid".to_string()))?;
                let jwk = set.find(kid).ok_or(AuthError::UnknownKey)?;
                DecodingKey::from_jwk(jwk)
                    .map_err(|e| AuthError::InvalidToken(format!("unusable JWK: {e}")))
            }
        }
    }
}

impl TokenValidator for JwtValidator {
    fn parse_and_validate(&self, token: &str) -> Result<Claims, AuthError> {
        let header =
            decode_header(token).map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let key = self.decoding_key(&header)?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        match &self.audience {
            Some(audience) => validation.set_audience(std::slice::from_ref(audience)),
            None => validation.validate_aud = false,
        }
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.leeway = self.leeway;

        let decoded = decode::<Value>(token, &key, &validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::InvalidToken(e.to_string()),
        })?;

        Claims::from_value(&decoded.claims)
    }
}
