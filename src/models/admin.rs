//! Administrator token claims

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Roles allowed to run the borrow desk
const DESK_ROLES: [&str; 2] = ["admin", "superadmin"];

/// JWT claims of an administrator session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminClaims {
    pub sub: String,
    pub admin_id: i32,
    pub role: String,
    pub exp: i64,
}

impl AdminClaims {
    /// Create a JWT token
    pub fn create_token(&self, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{encode, EncodingKey, Header};
        encode(
            &Header::default(),
            self,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
    }

    /// Parse JWT token
    pub fn from_token(token: &str, secret: &str) -> Result<Self, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{decode, DecodingKey, Validation};
        let token_data = decode::<Self>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(token_data.claims)
    }

    pub fn require_desk(&self) -> Result<(), AppError> {
        if DESK_ROLES.contains(&self.role.as_str()) {
            Ok(())
        } else {
            Err(AppError::Authorization(format!(
                "Role '{}' cannot process borrow requests",
                self.role
            )))
        }
    }
}
