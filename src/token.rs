//! Manage json web tokens.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServerError};

const DEFAULT_AUDIENCE: &str = "portal";
pub const ACCESS_LIFETIME: u64 = 60 * 5; // 5 minutes.
pub const REFRESH_LIFETIME: u64 = 60 * 60 * 24; // 1 day.

/// What a token may be used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Pieces of information asserted on a JWT.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub token_type: TokenType,
    /// Recipients that the JWT is intended for.
    pub aud: String,
    /// Identifies the expiration time on or after which the JWT must not be
    /// accepted for processing, in seconds.
    pub exp: u64,
    /// Identifies the time at which the JWT was issued.
    pub iat: u64,
    /// Identifies the organization that issued the JWT.
    pub iss: String,
    /// User ID.
    pub sub: String,
    /// Unique token identifier.
    pub jti: String,
}

/// A freshly issued access and refresh token.
#[derive(Debug, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct TokenPair {
    pub refresh: String,
    pub access: String,
}

/// Manage JWT tokens.
#[derive(Clone)]
pub struct TokenManager {
    algorithm: Algorithm,
    public_key: DecodingKey,
    private_key: EncodingKey,
    name: String,
    audience: String,
    access_lifetime: u64,
    refresh_lifetime: u64,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("algorithm", &self.algorithm)
            .field("name", &self.name)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Create a [`TokenManager`] signing with HMAC-SHA256.
    pub fn from_secret(name: &str, secret: &str) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            public_key: DecodingKey::from_secret(secret.as_bytes()),
            private_key: EncodingKey::from_secret(secret.as_bytes()),
            name: name.to_owned(),
            audience: DEFAULT_AUDIENCE.to_owned(),
            access_lifetime: ACCESS_LIFETIME,
            refresh_lifetime: REFRESH_LIFETIME,
        }
    }

    /// Create a [`TokenManager`] signing with an ECDSA P-384 key pair.
    pub fn from_ec_pem(
        name: &str,
        public_key_pem: &str,
        private_key_pem: &str,
    ) -> std::result::Result<Self, jsonwebtoken::errors::Error> {
        Ok(Self {
            algorithm: Algorithm::ES384,
            public_key: DecodingKey::from_ec_pem(public_key_pem.as_bytes())?,
            private_key: EncodingKey::from_ec_pem(private_key_pem.as_bytes())?,
            name: name.to_owned(),
            audience: DEFAULT_AUDIENCE.to_owned(),
            access_lifetime: ACCESS_LIFETIME,
            refresh_lifetime: REFRESH_LIFETIME,
        })
    }

    /// Set `audience` field on JWT.
    pub fn audience(&mut self, audience: &str) {
        self.audience = audience.to_owned();
    }

    /// Override token lifetimes, in seconds.
    pub fn lifetimes(&mut self, access: Option<u64>, refresh: Option<u64>) {
        if let Some(access) = access {
            self.access_lifetime = access;
        }
        if let Some(refresh) = refresh {
            self.refresh_lifetime = refresh;
        }
    }

    /// Access token lifetime, in seconds.
    pub fn access_lifetime(&self) -> u64 {
        self.access_lifetime
    }

    /// Create a new signed token.
    pub fn create(&self, user_id: i64, token_type: TokenType) -> Result<String> {
        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| ServerError::internal("system clock before epoch", err))?
            .as_secs();
        let lifetime = match token_type {
            TokenType::Access => self.access_lifetime,
            TokenType::Refresh => self.refresh_lifetime,
        };

        let mut jti = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut jti);

        let claims = Claims {
            token_type,
            aud: self.audience.clone(),
            exp: time + lifetime,
            iat: time,
            iss: self.name.clone(),
            sub: user_id.to_string(),
            jti: hex::encode(jti),
        };

        self.sign(&claims)
    }

    /// Create both tokens for a user.
    pub fn pair(&self, user_id: i64) -> Result<TokenPair> {
        Ok(TokenPair {
            refresh: self.create(user_id, TokenType::Refresh)?,
            access: self.create(user_id, TokenType::Access)?,
        })
    }

    fn sign(&self, claims: &Claims) -> Result<String> {
        encode(&Header::new(self.algorithm), claims, &self.private_key)
            .map_err(|err| ServerError::internal("cannot sign token", err))
    }

    /// Decode a token and check its signature, lifetime and type.
    pub fn decode(&self, token: &str, expected: TokenType) -> Result<Claims> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.set_audience(&[&self.audience]);
        validation.set_issuer(&[&self.name]);

        let claims = decode::<Claims>(token, &self.public_key, &validation)
            .map_err(|err| {
                tracing::debug!(error = %err, "token rejected");
                ServerError::InvalidToken
            })?
            .claims;

        if claims.token_type != expected {
            return Err(ServerError::InvalidToken);
        }

        Ok(claims)
    }

    /// Decode a token and return the user it was issued to.
    pub fn subject(&self, token: &str, expected: TokenType) -> Result<i64> {
        self.decode(token, expected)?
            .sub
            .parse()
            .map_err(|_| ServerError::InvalidToken)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub const SECRET: &str = "test-secret-never-use-in-production";

    pub fn manager() -> TokenManager {
        TokenManager::from_secret("http://localhost/", SECRET)
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    #[test]
    fn test_pair() {
        let tokens = manager();
        let pair = tokens.pair(42).unwrap();

        let access = tokens.decode(&pair.access, TokenType::Access).unwrap();
        assert_eq!(access.sub, "42");
        assert_eq!(access.exp, access.iat + ACCESS_LIFETIME);

        let refresh = tokens.decode(&pair.refresh, TokenType::Refresh).unwrap();
        assert_eq!(refresh.sub, "42");
        assert_eq!(refresh.exp, refresh.iat + REFRESH_LIFETIME);
        assert_ne!(access.jti, refresh.jti);
    }

    #[test]
    fn test_wrong_type() {
        let tokens = manager();
        let pair = tokens.pair(1).unwrap();

        assert!(matches!(
            tokens.decode(&pair.access, TokenType::Refresh),
            Err(ServerError::InvalidToken)
        ));
        assert!(matches!(
            tokens.decode(&pair.refresh, TokenType::Access),
            Err(ServerError::InvalidToken)
        ));
    }

    #[test]
    fn test_expired() {
        let tokens = manager();
        let claims = Claims {
            token_type: TokenType::Refresh,
            aud: DEFAULT_AUDIENCE.to_owned(),
            exp: now() - 10,
            iat: now() - 100,
            iss: "http://localhost/".to_owned(),
            sub: "1".to_owned(),
            jti: "expired".to_owned(),
        };
        let token = tokens.sign(&claims).unwrap();

        assert!(matches!(
            tokens.decode(&token, TokenType::Refresh),
            Err(ServerError::InvalidToken)
        ));
    }

    #[test]
    fn test_tampered() {
        let tokens = manager();
        let token = tokens.create(1, TokenType::Access).unwrap();

        let mut parts: Vec<String> = token.split('.').map(String::from).collect();
        let forged = Claims {
            sub: "2".to_owned(),
            ..tokens.decode(&token, TokenType::Access).unwrap()
        };
        parts[1] = token_payload(&forged);
        let tampered = parts.join(".");

        assert!(matches!(
            tokens.subject(&tampered, TokenType::Access),
            Err(ServerError::InvalidToken)
        ));

        let other = TokenManager::from_secret("http://localhost/", "another-secret");
        assert!(matches!(
            other.decode(&token, TokenType::Access),
            Err(ServerError::InvalidToken)
        ));
    }

    fn token_payload(claims: &Claims) -> String {
        // Re-sign with a different key and keep only the payload segment.
        let foreign = TokenManager::from_secret("http://localhost/", "foreign");
        let token = foreign.sign(claims).unwrap();
        token.split('.').nth(1).unwrap().to_owned()
    }

    #[test]
    fn test_lifetimes() {
        let mut tokens = manager();
        tokens.lifetimes(Some(30), None);
        let token = tokens.create(7, TokenType::Access).unwrap();
        let claims = tokens.decode(&token, TokenType::Access).unwrap();
        assert_eq!(claims.exp - claims.iat, 30);
        assert_eq!(tokens.access_lifetime(), 30);
    }
}
