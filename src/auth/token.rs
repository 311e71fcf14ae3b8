use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use super::{AuthError, PrincipalId};

/// Claims the relay cares about. `exp` is checked by the validator itself.
#[derive(Debug, Deserialize)]
struct Claims {
    id: String,
}

/// Checks HS256 bearer tokens against the shared secret.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // no grace period past `exp`
        validation.leeway = 0;

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, raw_token: Option<&str>) -> Result<PrincipalId, AuthError> {
        let token = match raw_token {
            Some(token) if !token.is_empty() => token,
            _ => return Err(AuthError::MissingToken),
        };

        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|err| {
            tracing::debug!(error = %err, "token rejected");
            AuthError::InvalidToken
        })?;

        if data.claims.id.is_empty() {
            return Err(AuthError::InvalidToken);
        }

        Ok(data.claims.id)
    }
}
