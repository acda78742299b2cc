//! JWT Token Handler
//! Mission: generate and validate JWT tokens carrying Principal-resolvable claims

use crate::auth::models::{Claims, User};
use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use tracing::debug;

pub struct JwtHandler {
    secret: String,
    expiration_hours: i64,
}

impl JwtHandler {
    pub fn new(secret: String, expiration_hours: i64) -> Self {
        Self { secret, expiration_hours }
    }

    pub fn generate_token(&self, user: &User) -> Result<(String, usize)> {
        let now = Utc::now();
        let expiration = now
            .checked_add_signed(chrono::Duration::hours(self.expiration_hours))
            .context("invalid timestamp")?
            .timestamp() as usize;

        let expires_in = (self.expiration_hours * 3600) as usize;

        let claims = Claims {
            sub: user.id.to_string(),
            username: user.username.clone(),
            role: user.role,
            tenant: user.tenant.clone(),
            exp: expiration,
        };

        debug!(username = %user.username, tenant = %user.tenant, "generating JWT");

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .context("failed to generate JWT")?;

        Ok((token, expires_in))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .context("invalid or expired token")?;

        Ok(decoded.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::Role;
    use uuid::Uuid;

    fn test_user(role: Role) -> User {
        User {
            id: Uuid::new_v4(),
            username: "testuser".to_string(),
            password_hash: "hash".to_string(),
            role,
            tenant: "t1".to_string(),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn generated_token_validates_with_matching_claims() {
        let handler = JwtHandler::new("test-secret-key-12345".to_string(), 24);
        let user = test_user(Role::Merchant);

        let (token, expires_in) = handler.generate_token(&user).unwrap();
        assert!(!token.is_empty());
        assert_eq!(expires_in, 24 * 3600);

        let claims = handler.validate_token(&token).unwrap();
        assert_eq!(claims.username, user.username);
        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.role, user.role);
        assert_eq!(claims.tenant, user.tenant);
    }

    #[test]
    fn garbage_token_rejected() {
        let handler = JwtHandler::new("test-secret-key-12345".to_string(), 24);
        let result = handler.validate_token("invalid.token.here");
        assert!(result.is_err());
    }

    #[test]
    fn token_signed_with_different_secret_is_rejected() {
        let handler1 = JwtHandler::new("secret1".to_string(), 24);
        let handler2 = JwtHandler::new("secret2".to_string(), 24);
        let user = test_user(Role::FinanceAdmin);

        let (token, _) = handler1.generate_token(&user).unwrap();
        let result = handler2.validate_token(&token);
        assert!(result.is_err());
    }
}
