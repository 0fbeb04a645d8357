use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{Duration, Utc};

use creatorpay_common::{AppError, JwtConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub username: String,
    pub email: String,
    pub roles: Vec<String>,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
}

impl Claims {
    pub fn new(
        user_id: Uuid,
        username: String,
        email: String,
        roles: Vec<String>,
        config: &JwtConfig,
    ) -> Self {
        let now = Utc::now();
        let exp = now + Duration::hours(config.expiration_hours as i64);

        Self {
            sub: user_id.to_string(),
            username,
            email,
            roles,
            exp: exp.timestamp(),
            iat: now.timestamp(),
            iss: config.issuer.clone(),
        }
    }

    pub fn user_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub)
            .map_err(|e| AppError::Authentication(format!("Invalid user ID in token: {}", e)))
    }

    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == "admin")
    }
}

#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_ref()),
            decoding_key: DecodingKey::from_secret(secret.as_ref()),
            validation,
        }
    }

    pub fn generate_token(&self, claims: &Claims) -> Result<String, AppError> {
        encode(&Header::default(), claims, &self.encoding_key)
            .map_err(|e| AppError::Authentication(format!("Failed to generate token: {}", e)))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, AppError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AppError::Authentication(format!("Invalid token: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret".to_string(),
            expiration_hours: 1,
            issuer: "creatorpay".to_string(),
        }
    }

    #[test]
    fn token_round_trip() {
        let service = JwtService::new("test-secret");
        let user_id = Uuid::new_v4();
        let claims = Claims::new(
            user_id,
            "ada".to_string(),
            "ada@example.com".to_string(),
            vec!["creator".to_string()],
            &config(),
        );

        let token = service.generate_token(&claims).unwrap();
        let decoded = service.validate_token(&token).unwrap();

        assert_eq!(decoded.user_id().unwrap(), user_id);
        assert!(!decoded.is_admin());
    }

    #[test]
    fn admin_role_is_recognized() {
        let claims = Claims::new(
            Uuid::new_v4(),
            "ops".to_string(),
            "ops@example.com".to_string(),
            vec!["creator".to_string(), "admin".to_string()],
            &config(),
        );
        assert!(claims.is_admin());
    }

    #[test]
    fn tampered_token_is_rejected() {
        let service = JwtService::new("test-secret");
        let other = JwtService::new("other-secret");
        let claims = Claims::new(
            Uuid::new_v4(),
            "ada".to_string(),
            "ada@example.com".to_string(),
            vec![],
            &config(),
        );

        let token = other.generate_token(&claims).unwrap();
        assert!(service.validate_token(&token).is_err());
    }
}
