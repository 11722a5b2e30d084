//! Main save server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::protocol::{
    CreateGameRequest, ErrorBody, GameInfo, LeaseGrant, LeaseRequest, Registration,
    SuccessMessage, SystemInformation, TokenCheck, TokenValidation, UploadReceipt,
};
use crate::reaper::{LeaseReaper, ReaperHandle};
use parking_lot::Mutex;
use savesync_core::{Clock, GameDirectory, LeaseRegistry, SaveDownload, SystemClock};
use serde::Serialize;
use std::io::Read;
use std::sync::Arc;

/// The save server.
///
/// Owns the request handlers and the lease reaper. Transport code (HTTP
/// routing, header extraction) calls the `handle_*` methods and renders
/// their results with [`SaveSyncServer::respond`].
///
/// # Example
///
/// ```
/// use savesync_core::{CoreConfig, MemoryLedger};
/// use savesync_server::{SaveSyncServer, ServerConfig};
/// use std::sync::Arc;
///
/// let dir = tempfile::tempdir().unwrap();
/// let config = ServerConfig::default()
///     .with_auth(b"change-me".to_vec())
///     .with_core(CoreConfig::new(dir.path().join("cache"), dir.path().join("storage")));
/// let server = SaveSyncServer::new(config, Arc::new(MemoryLedger::new())).unwrap();
/// assert_eq!(server.live_leases(), 0);
/// ```
pub struct SaveSyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
    reaper: Mutex<Option<ReaperHandle>>,
}

impl SaveSyncServer {
    /// Creates a server using the system clock.
    pub fn new<D>(config: ServerConfig, directory: Arc<D>) -> ServerResult<Self>
    where
        D: GameDirectory + 'static,
    {
        Self::with_clock(config, directory, Arc::new(SystemClock))
    }

    /// Creates a server with an explicit clock.
    pub fn with_clock<D>(
        config: ServerConfig,
        directory: Arc<D>,
        clock: Arc<dyn Clock>,
    ) -> ServerResult<Self>
    where
        D: GameDirectory + 'static,
    {
        let context = Arc::new(HandlerContext::new(config, directory, clock)?);
        let handler = RequestHandler::new(Arc::clone(&context));
        tracing::info!(
            bind_addr = %context.config.bind_addr,
            storage_root = %context.config.core.storage_root.display(),
            "save server initialized"
        );

        Ok(Self {
            handler,
            context,
            reaper: Mutex::new(None),
        })
    }

    /// Starts the lease reaper. Must be called from within a tokio runtime.
    pub fn start(&self) -> ServerResult<()> {
        let mut reaper = self.reaper.lock();
        if reaper.is_some() {
            return Err(ServerError::InvalidRequest("server already started".into()));
        }
        *reaper = Some(LeaseReaper::start(
            Arc::clone(self.registry()),
            self.context.config.core.reap_interval,
        )?);
        Ok(())
    }

    /// Stops the lease reaper and waits for it to exit.
    pub async fn shutdown(&self) -> ServerResult<()> {
        let reaper = self.reaper.lock().take();
        if let Some(reaper) = reaper {
            reaper.stop().await?;
        }
        tracing::info!("save server stopped");
        Ok(())
    }

    /// Returns true while the reaper runs.
    pub fn is_running(&self) -> bool {
        self.reaper.lock().as_ref().is_some_and(ReaperHandle::is_running)
    }

    /// Handles an account registration.
    pub fn handle_register(&self) -> ServerResult<Registration> {
        self.handler.handle_register()
    }

    /// Handles a token check.
    pub fn handle_check_token(&self, request: &TokenCheck) -> TokenValidation {
        self.handler.handle_check_token(request)
    }

    /// Handles a system information request.
    pub fn handle_system_information(&self) -> SystemInformation {
        self.handler.handle_system_information()
    }

    /// Handles a game creation.
    pub fn handle_create_game(
        &self,
        credential: Option<&str>,
        request: CreateGameRequest,
    ) -> ServerResult<GameInfo> {
        self.handler.handle_create_game(credential, request)
    }

    /// Handles a game lookup.
    pub fn handle_game_info(
        &self,
        credential: Option<&str>,
        game_id: u64,
    ) -> ServerResult<GameInfo> {
        self.handler.handle_game_info(credential, game_id)
    }

    /// Handles a game listing.
    pub fn handle_list_games(&self, credential: Option<&str>) -> ServerResult<Vec<GameInfo>> {
        self.handler.handle_list_games(credential)
    }

    /// Handles a lease request.
    pub fn handle_lease(
        &self,
        credential: Option<&str>,
        request: LeaseRequest,
    ) -> ServerResult<LeaseGrant> {
        self.handler.handle_lease(credential, request)
    }

    /// Handles an upload.
    pub fn handle_upload<R: Read>(
        &self,
        credential: Option<&str>,
        upload_key: Option<&str>,
        declared_hash: Option<&str>,
        body: &mut R,
    ) -> ServerResult<UploadReceipt> {
        self.handler
            .handle_upload(credential, upload_key, declared_hash, body)
    }

    /// Handles a download.
    pub fn handle_download(
        &self,
        credential: Option<&str>,
        upload_key: Option<&str>,
    ) -> ServerResult<SaveDownload> {
        self.handler.handle_download(credential, upload_key)
    }

    /// Handles a game deletion.
    pub fn handle_delete_game(
        &self,
        credential: Option<&str>,
        game_id: u64,
    ) -> ServerResult<SuccessMessage> {
        self.handler.handle_delete_game(credential, game_id)
    }

    /// Handles an account data removal.
    pub fn handle_remove_account(&self, credential: Option<&str>) -> ServerResult<SuccessMessage> {
        self.handler.handle_remove_account(credential)
    }

    /// Renders a handler result as an HTTP status and JSON body.
    pub fn respond<T: Serialize>(result: &ServerResult<T>) -> (u16, String) {
        let rendered = match result {
            Ok(value) => serde_json::to_string(value).map(|body| (200, body)),
            Err(err) => {
                serde_json::to_string(&ErrorBody::from(err)).map(|body| (err.status_code(), body))
            }
        };
        rendered.unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to encode response");
            (500, r#"{"message":"internal server error","status":500}"#.to_string())
        })
    }

    /// Returns the lease registry.
    pub fn registry(&self) -> &Arc<LeaseRegistry> {
        self.context.coordinator.registry()
    }

    /// Returns the number of live leases.
    pub fn live_leases(&self) -> usize {
        self.registry().live_count()
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Returns the identity token validator.
    pub fn tokens(&self) -> &crate::auth::TokenValidator {
        self.context.tokens()
    }
}
