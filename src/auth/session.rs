use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Account, Role};
use crate::utils::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// Signs and checks HS256 session tokens.
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SessionKeys {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn issue(&self, account: &Account) -> AppResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: account.id,
            role: account.role,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AppError::InternalServerError(format!("Failed to sign session: {}", e)))
    }

    pub fn decode(&self, token: &str) -> AppResult<Claims> {
        let validation = Validation::new(Algorithm::HS256);

        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AppError::SessionExpired,
                _ => AppError::Unauthorized("Invalid session token".to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account::new("Ada".into(), "ada@example.com".into(), "hash".into(), Role::Organizer)
    }

    #[test]
    fn test_issue_then_decode() {
        let keys = SessionKeys::new("secret", Duration::days(7));
        let account = account();
        let token = keys.issue(&account).unwrap();

        let claims = keys.decode(&token).unwrap();
        assert_eq!(claims.sub, account.id);
        assert_eq!(claims.role, Role::Organizer);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_expired_token_is_session_expired() {
        // Past the default validation leeway.
        let keys = SessionKeys::new("secret", Duration::minutes(-5));
        let token = keys.issue(&account()).unwrap();

        assert!(matches!(keys.decode(&token), Err(AppError::SessionExpired)));
    }

    #[test]
    fn test_foreign_signature_is_unauthorized() {
        let token = SessionKeys::new("one", Duration::days(1)).issue(&account()).unwrap();
        let other = SessionKeys::new("two", Duration::days(1));

        assert!(matches!(other.decode(&token), Err(AppError::Unauthorized(_))));
        assert!(matches!(other.decode("garbage"), Err(AppError::Unauthorized(_))));
    }
}
