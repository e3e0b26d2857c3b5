use crate::auth::{AuthTokenProvider, JwtConfig};
use crate::domain::{DomainError, DomainResult};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    /// User ID as a decimal string.
    pub sub: String,
    pub username: String,
    pub exp: usize,
    pub iat: usize,
}

/// HMAC-signed JWT implementation of AuthTokenProvider
pub struct JwtAuthTokenProvider {
    config: JwtConfig,
}

impl JwtAuthTokenProvider {
    pub fn new(config: JwtConfig) -> Self {
        Self { config }
    }
}

impl AuthTokenProvider for JwtAuthTokenProvider {
    fn generate_token(&self, user_id: i64, username: &str) -> DomainResult<String> {
        let now = chrono::Utc::now();
        let exp = now + chrono::Duration::hours(self.config.expiration_hours as i64);

        let claims = JwtClaims {
            sub: user_id.to_string(),
            username: username.to_string(),
            exp: exp.timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.secret.as_bytes()),
        )
        .map_err(|e| DomainError::RepositoryError(anyhow::anyhow!("JWT encoding error: {}", e)))
    }

    fn validate_token(&self, token: &str) -> DomainResult<i64> {
        let token_data = decode::<JwtClaims>(
            token,
            &DecodingKey::from_secret(self.config.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| DomainError::InvalidToken(e.to_string()))?;

        token_data
            .claims
            .sub
            .parse()
            .map_err(|_| DomainError::InvalidToken("subject is not a user id".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> JwtConfig {
        JwtConfig::new("test-secret-key".to_string(), 24)
    }

    #[test]
    fn test_validate_token_success() {
        let provider = JwtAuthTokenProvider::new(test_config());
        let token = provider.generate_token(42, "admin").unwrap();

        let user_id = provider.validate_token(&token);
        assert_eq!(user_id.unwrap(), 42);
    }

    #[test]
    fn test_validate_token_invalid() {
        let provider = JwtAuthTokenProvider::new(test_config());
        let result = provider.validate_token("invalid-token");
        assert!(matches!(result, Err(DomainError::InvalidToken(_))));
    }

    #[test]
    fn test_validate_token_wrong_secret() {
        let provider1 = JwtAuthTokenProvider::new(test_config());
        let provider2 =
            JwtAuthTokenProvider::new(JwtConfig::new("different-secret".to_string(), 24));

        let token = provider1.generate_token(42, "admin").unwrap();
        let result = provider2.validate_token(&token);
        assert!(matches!(result, Err(DomainError::InvalidToken(_))));
    }

    #[test]
    fn test_validate_token_non_numeric_subject() {
        let config = test_config();
        let now = chrono::Utc::now().timestamp() as usize;
        let claims = JwtClaims {
            sub: "not-a-number".to_string(),
            username: "admin".to_string(),
            exp: now + 3600,
            iat: now,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.secret.as_bytes()),
        )
        .unwrap();

        let provider = JwtAuthTokenProvider::new(config);
        let result = provider.validate_token(&token);
        assert!(matches!(result, Err(DomainError::InvalidToken(_))));
    }
}
