//! Identity tokens for the save server.
//!
//! Every request carries a bearer token naming the calling user. Tokens are
//! signed with HMAC-SHA256 and expire after a configurable lifetime.
//!
//! ## Token Format
//!
//! - 8 bytes: user_id (big-endian)
//! - 8 bytes: issue time (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 signature
//!
//! Total: 48 bytes, hex-encoded for transport.

use crate::error::{ServerError, ServerResult};
use hmac::{Hmac, Mac};
use savesync_core::{unix_millis, Clock, SystemClock, UserId};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

type HmacSha256 = Hmac<Sha256>;

/// Length of a raw token in bytes.
pub const TOKEN_LEN: usize = 48;

const PAYLOAD_LEN: usize = 16;

/// Prefix of the `Authorization` header value.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Resolves the user behind a request credential.
pub trait Identity: Send + Sync {
    /// Returns the user named by `credential`.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` if the credential is missing, malformed, forged
    /// or expired.
    fn current_user_id(&self, credential: &str) -> ServerResult<UserId>;
}

/// Authentication configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: crate::config::DEFAULT_TOKEN_EXPIRY,
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"<redacted>")
            .field("token_expiry", &self.token_expiry)
            .finish()
    }
}

/// Issues and checks identity tokens.
#[derive(Clone, Debug)]
pub struct TokenValidator {
    config: AuthConfig,
    clock: Arc<dyn Clock>,
}

impl TokenValidator {
    /// Creates a validator using the system clock.
    pub fn new(config: AuthConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a validator with an explicit clock.
    pub fn with_clock(config: AuthConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    /// Creates a token for `user` issued now.
    pub fn create_token(&self, user: UserId) -> ServerResult<Vec<u8>> {
        self.create_token_at(user, self.clock.now())
    }

    /// Creates a token for `user` issued at `issued_at`.
    pub fn create_token_at(&self, user: UserId, issued_at: SystemTime) -> ServerResult<Vec<u8>> {
        let mut token = Vec::with_capacity(TOKEN_LEN);
        token.extend_from_slice(&user.as_u64().to_be_bytes());
        token.extend_from_slice(&unix_millis(issued_at).to_be_bytes());

        let signature = self.mac(&token)?.finalize().into_bytes();
        token.extend_from_slice(&signature);
        Ok(token)
    }

    /// Validates a raw token and returns its user.
    pub fn validate_token(&self, token: &[u8]) -> ServerResult<UserId> {
        if token.len() != TOKEN_LEN {
            return Err(ServerError::Unauthorized("invalid token length".into()));
        }
        let (payload, signature) = token.split_at(PAYLOAD_LEN);
        let (user_bytes, issued_bytes) = payload.split_at(8);

        self.mac(payload)?
            .verify_slice(signature)
            .map_err(|_| ServerError::Unauthorized("invalid signature".into()))?;

        let issued_at = u64::from_be_bytes(read_u64(issued_bytes)?);
        let expiry_millis = u64::try_from(self.config.token_expiry.as_millis()).unwrap_or(u64::MAX);
        if unix_millis(self.clock.now()) > issued_at.saturating_add(expiry_millis) {
            return Err(ServerError::Unauthorized("token expired".into()));
        }

        Ok(UserId(u64::from_be_bytes(read_u64(user_bytes)?)))
    }

    fn mac(&self, data: &[u8]) -> ServerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("hmac key: {e}")))?;
        mac.update(data);
        Ok(mac)
    }
}

impl Identity for TokenValidator {
    fn current_user_id(&self, credential: &str) -> ServerResult<UserId> {
        let credential = credential.trim();
        let encoded = credential.strip_prefix(BEARER_PREFIX).unwrap_or(credential);
        if encoded.is_empty() {
            return Err(ServerError::Unauthorized("missing credential".into()));
        }
        self.validate_token(&decode_token(encoded)?)
    }
}

fn read_u64(bytes: &[u8]) -> ServerResult<[u8; 8]> {
    bytes
        .try_into()
        .map_err(|_| ServerError::Unauthorized("malformed token".into()))
}

/// Hex-encodes a raw token for transport.
pub fn encode_token(token: &[u8]) -> String {
    token.iter().map(|b| format!("{b:02x}")).collect()
}

/// Decodes a hex-encoded token.
///
/// # Errors
///
/// Returns `Unauthorized` if the value isn't valid hex.
pub fn decode_token(encoded: &str) -> ServerResult<Vec<u8>> {
    let malformed = || ServerError::Unauthorized("malformed token".into());
    if encoded.len() % 2 != 0 || !encoded.is_ascii() {
        return Err(malformed());
    }
    (0..encoded.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&encoded[i..i + 2], 16).map_err(|_| malformed()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use savesync_core::ManualClock;

    fn validator() -> TokenValidator {
        TokenValidator::new(AuthConfig::new(b"test-secret-key-32-bytes-long!!".to_vec()))
    }

    #[test]
    fn create_and_validate_token() {
        let validator = validator();
        let token = validator.create_token(UserId(42)).unwrap();
        assert_eq!(token.len(), TOKEN_LEN);
        assert_eq!(validator.validate_token(&token).unwrap(), UserId(42));
    }

    #[test]
    fn reject_tampered_token() {
        let validator = validator();
        let mut token = validator.create_token(UserId(1)).unwrap();
        token[20] ^= 0xFF;
        assert!(validator.validate_token(&token).is_err());
    }

    #[test]
    fn reject_swapped_user() {
        let validator = validator();
        let mut token = validator.create_token(UserId(1)).unwrap();
        token[7] = 2;
        assert!(validator.validate_token(&token).is_err());
    }

    #[test]
    fn reject_other_secret() {
        let token = validator().create_token(UserId(1)).unwrap();
        let other = TokenValidator::new(AuthConfig::new(b"another-secret".to_vec()));
        assert!(other.validate_token(&token).is_err());
    }

    #[test]
    fn reject_expired_token() {
        let clock = Arc::new(ManualClock::default());
        let validator = TokenValidator::with_clock(
            AuthConfig::new(b"secret".to_vec()).with_expiry(Duration::from_secs(60)),
            clock.clone(),
        );
        let token = validator.create_token(UserId(1)).unwrap();

        clock.advance(Duration::from_secs(60));
        assert!(validator.validate_token(&token).is_ok());
        clock.advance(Duration::from_millis(1));
        assert!(matches!(
            validator.validate_token(&token),
            Err(ServerError::Unauthorized(_))
        ));
    }

    #[test]
    fn reject_wrong_length() {
        assert!(validator().validate_token(&[0u8; 47]).is_err());
    }

    #[test]
    fn identity_accepts_bearer_header() {
        let validator = validator();
        let token = encode_token(&validator.create_token(UserId(9)).unwrap());

        assert_eq!(validator.current_user_id(&token).unwrap(), UserId(9));
        let header = format!("{BEARER_PREFIX}{token}");
        assert_eq!(validator.current_user_id(&header).unwrap(), UserId(9));
        assert!(validator.current_user_id("").is_err());
        assert!(validator.current_user_id("Bearer zz").is_err());
    }

    #[test]
    fn hex_encoding() {
        assert_eq!(encode_token(&[0x00, 0xab, 0xff]), "00abff");
        assert_eq!(decode_token("00ABff").unwrap(), vec![0x00, 0xab, 0xff]);
        assert!(decode_token("abc").is_err());
        assert!(decode_token("é1").is_err());
    }
}
