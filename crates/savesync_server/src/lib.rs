//! # SaveSync Server
//!
//! Request layer of the SaveSync save server.
//!
//! This crate provides:
//! - Identity tokens (HMAC-SHA256, hex encoded)
//! - Request handlers for games, leases, uploads and downloads
//! - JSON request and response bodies
//! - The periodic lease reaper
//!
//! # Protocol
//!
//! 1. Client registers (if enabled) and keeps the returned identity token
//! 2. Client creates a game, then asks for a lease on it
//! 3. Client uploads the save with the lease token in `X-Upload-Key` and the
//!    SHA-512 of the bytes in `X-Game-Save-Hash`
//! 4. Other devices lease the game and download the latest revision
//!
//! ```rust,no_run
//! use savesync_core::MemoryLedger;
//! use savesync_server::{SaveSyncServer, ServerConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> savesync_server::ServerResult<()> {
//! let config = ServerConfig::default().with_auth(b"a-long-random-secret".to_vec());
//! let server = SaveSyncServer::new(config, Arc::new(MemoryLedger::new()))?;
//! server.start()?;
//! // ... serve requests ...
//! server.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod protocol;
mod reaper;
mod server;

pub use auth::{
    decode_token, encode_token, AuthConfig, Identity, TokenValidator, BEARER_PREFIX, TOKEN_LEN,
};
pub use config::{ServerConfig, DEFAULT_TOKEN_EXPIRY};
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use protocol::{
    CreateGameRequest, ErrorBody, GameInfo, LeaseGrant, LeaseRequest, Registration,
    SuccessMessage, SystemInformation, TokenCheck, TokenValidation, UploadReceipt,
    AUTHORIZATION_HEADER, HASH_HEADER, UPLOAD_KEY_HEADER,
};
pub use reaper::{LeaseReaper, ReaperHandle};
pub use server::SaveSyncServer;
