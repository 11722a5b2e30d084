//! JSON request and response bodies.
//!
//! Upload and download bodies are raw bytes. Their metadata travels in
//! headers: the declared hash in [`HASH_HEADER`] and the lease token in
//! [`UPLOAD_KEY_HEADER`].

use savesync_core::{unix_millis, Game, Lease};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Header carrying the declared SHA-512 of an upload.
pub const HASH_HEADER: &str = "X-Game-Save-Hash";

/// Header carrying the lease token of an upload or download.
pub const UPLOAD_KEY_HEADER: &str = "X-Upload-Key";

/// Header carrying the identity token.
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Body of a game creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateGameRequest {
    /// Display name.
    pub name: String,
}

/// Body of a lease request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRequest {
    /// Game to lease.
    pub game_id: u64,
}

/// A granted lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseGrant {
    /// Token to send in [`UPLOAD_KEY_HEADER`].
    pub upload_token: String,
    /// Expiry in Unix milliseconds.
    pub expire: u64,
}

impl From<&Lease> for LeaseGrant {
    fn from(lease: &Lease) -> Self {
        Self {
            upload_token: lease.token.as_str().to_string(),
            expire: unix_millis(lease.expires_at),
        }
    }
}

/// Result of a committed upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    /// Human readable outcome.
    pub message: String,
    /// Revision created by the upload.
    pub revision: u64,
    /// Hash of the committed save.
    pub hash: String,
    /// Commit time in Unix milliseconds.
    pub timestamp: u64,
}

/// Public view of a game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameInfo {
    /// Game ID.
    pub id: u64,
    /// Display name.
    pub name: String,
    /// Current revision.
    pub rev: u64,
    /// Hash of the current save.
    pub hash: Option<String>,
    /// Time of the last commit in Unix milliseconds.
    pub last_update: Option<u64>,
    /// Whether a save can be downloaded.
    pub available: bool,
}

impl From<&Game> for GameInfo {
    fn from(game: &Game) -> Self {
        Self {
            id: game.id.as_u64(),
            name: game.name.clone(),
            rev: game.record.revision.0,
            hash: game
                .record
                .content_hash
                .as_ref()
                .map(|h| h.as_str().to_string()),
            last_update: game.record.last_update.map(unix_millis),
            available: game.record.available,
        }
    }
}

/// Newly registered account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Assigned user ID.
    pub user_id: u64,
    /// Hex-encoded identity token.
    pub token: String,
}

/// Body of a token check request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCheck {
    /// Hex-encoded identity token, with or without the `Bearer ` prefix.
    pub token: String,
}

/// Outcome of a token check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenValidation {
    /// Whether the token is genuine and unexpired.
    pub valid: bool,
}

/// Public facts about the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInformation {
    /// Whether new accounts may be registered.
    pub allow_register: bool,
    /// Server version.
    pub version: String,
    /// Operating system the server runs on.
    pub os: String,
    /// CPU architecture the server runs on.
    pub arch: String,
}

impl SystemInformation {
    /// Describes this build running with the given registration setting.
    pub fn current(allow_register: bool) -> Self {
        Self {
            allow_register,
            version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

/// Generic success body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessMessage {
    /// Human readable outcome.
    pub message: String,
    /// Time of the response in Unix milliseconds.
    pub timestamp: u64,
    /// HTTP status.
    pub status: u16,
}

impl SuccessMessage {
    /// Creates a 200 response body.
    pub fn ok(message: impl Into<String>, at: SystemTime) -> Self {
        Self {
            message: message.into(),
            timestamp: unix_millis(at),
            status: 200,
        }
    }
}

/// Body of an error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error description.
    pub message: String,
    /// HTTP status.
    pub status: u16,
}

impl From<&crate::error::ServerError> for ErrorBody {
    fn from(err: &crate::error::ServerError) -> Self {
        let message = if err.is_server_error() {
            "internal server error".to_string()
        } else {
            err.to_string()
        };
        Self {
            message,
            status: err.status_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;
    use savesync_core::{GameId, LeaseToken, RevisionRecord, UserId};
    use savesync_storage::{hash_bytes, StorageKey};
    use serde_json::{json, Value};
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn lease_grant_json() {
        let issued_at = UNIX_EPOCH + Duration::from_secs(10);
        let lease = Lease {
            game_id: GameId(1),
            token: LeaseToken::generate(),
            issued_at,
            expires_at: issued_at + Duration::from_secs(300),
        };
        let grant = LeaseGrant::from(&lease);
        let value: Value = serde_json::to_value(&grant).unwrap();
        assert_eq!(value["expire"], json!(310_000));
        assert_eq!(value["upload_token"], json!(lease.token.as_str()));
    }

    #[test]
    fn game_info_before_first_upload() {
        let game = Game {
            id: GameId(4),
            owner: UserId(1),
            name: "Celeste".into(),
            storage_key: StorageKey::new("k.bin").unwrap(),
            record: RevisionRecord::empty(GameId(4)),
        };
        let value = serde_json::to_value(GameInfo::from(&game)).unwrap();
        assert_eq!(
            value,
            json!({
                "id": 4,
                "name": "Celeste",
                "rev": 0,
                "hash": null,
                "last_update": null,
                "available": false,
            })
        );
    }

    #[test]
    fn game_info_after_commit() {
        let hash = hash_bytes(b"save");
        let at = UNIX_EPOCH + Duration::from_millis(1234);
        let game = Game {
            id: GameId(4),
            owner: UserId(1),
            name: "Celeste".into(),
            storage_key: StorageKey::new("k.bin").unwrap(),
            record: RevisionRecord::empty(GameId(4)).advanced(hash.clone(), at),
        };
        let info = GameInfo::from(&game);
        assert_eq!(info.rev, 1);
        assert_eq!(info.hash.as_deref(), Some(hash.as_str()));
        assert_eq!(info.last_update, Some(1234));
        assert!(info.available);
    }

    #[test]
    fn lease_request_parses() {
        let request: LeaseRequest = serde_json::from_str(r#"{"game_id": 12}"#).unwrap();
        assert_eq!(request.game_id, 12);
    }

    #[test]
    fn token_check_bodies() {
        let check: TokenCheck = serde_json::from_str(r#"{"token": "00ff"}"#).unwrap();
        assert_eq!(check.token, "00ff");
        let value = serde_json::to_value(TokenValidation { valid: false }).unwrap();
        assert_eq!(value, json!({ "valid": false }));
    }

    #[test]
    fn system_information_reports_build() {
        let info = SystemInformation::current(true);
        assert!(info.allow_register);
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
        assert!(!info.os.is_empty());
    }

    #[test]
    fn error_body_hides_internal_details() {
        let body = ErrorBody::from(&ServerError::Internal("disk /srv full".into()));
        assert_eq!(body.status, 500);
        assert!(!body.message.contains("/srv"));

        let body = ErrorBody::from(&ServerError::Conflict("game:1 is leased".into()));
        assert_eq!(body.status, 409);
        assert!(body.message.contains("game:1"));
    }
}
