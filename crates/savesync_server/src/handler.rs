//! Request handlers for save endpoints.

use crate::auth::{encode_token, AuthConfig, Identity, TokenValidator};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::protocol::{
    CreateGameRequest, GameInfo, LeaseGrant, LeaseRequest, Registration, SuccessMessage,
    SystemInformation, TokenCheck, TokenValidation, UploadReceipt,
};
use savesync_core::{
    unix_millis, Clock, CoreError, Game, GameDirectory, GameId, Ledger, SaveCoordinator,
    SaveDownload, UserId,
};
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared state of all request handlers.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Upload coordinator.
    pub coordinator: SaveCoordinator,
    /// Game rows.
    pub directory: Arc<dyn GameDirectory>,
    tokens: TokenValidator,
    clock: Arc<dyn Clock>,
    next_user: AtomicU64,
}

impl HandlerContext {
    /// Opens the storage roots and creates a handler context.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` if no token secret is configured
    /// - `Internal` if the storage roots cannot be opened
    pub fn new<D>(
        config: ServerConfig,
        directory: Arc<D>,
        clock: Arc<dyn Clock>,
    ) -> ServerResult<Self>
    where
        D: GameDirectory + 'static,
    {
        // An empty HMAC key would let anyone mint identity tokens.
        if config.auth_secret.is_empty() {
            return Err(ServerError::InvalidRequest(
                "token secret must not be empty".into(),
            ));
        }
        let coordinator = SaveCoordinator::open_with_clock(
            config.core.clone(),
            Arc::clone(&directory) as Arc<dyn Ledger>,
            Arc::clone(&clock),
        )?;
        let tokens = TokenValidator::with_clock(
            AuthConfig::new(config.auth_secret.clone()).with_expiry(config.token_expiry),
            Arc::clone(&clock),
        );

        Ok(Self {
            config,
            coordinator,
            directory,
            tokens,
            clock,
            next_user: AtomicU64::new(1),
        })
    }

    /// Returns the identity token validator.
    pub fn tokens(&self) -> &TokenValidator {
        &self.tokens
    }
}

/// Handler for save requests.
///
/// `credential` arguments carry the `Authorization` header value, `None`
/// when the header is absent.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Registers a new account and returns its identity token.
    pub fn handle_register(&self) -> ServerResult<Registration> {
        if !self.context.config.allow_register {
            return Err(ServerError::Forbidden("registration is disabled".into()));
        }
        let user = UserId(self.context.next_user.fetch_add(1, Ordering::SeqCst));
        let token = self.context.tokens.create_token(user)?;
        tracing::info!(user_id = %user, "account registered");
        Ok(Registration {
            user_id: user.as_u64(),
            token: encode_token(&token),
        })
    }

    /// Reports whether an identity token is genuine and unexpired.
    ///
    /// A bad token is a normal answer here, not an error.
    pub fn handle_check_token(&self, request: &TokenCheck) -> TokenValidation {
        let valid = self.context.tokens.current_user_id(&request.token).is_ok();
        TokenValidation { valid }
    }

    /// Returns public facts about the server.
    pub fn handle_system_information(&self) -> SystemInformation {
        SystemInformation::current(self.context.config.allow_register)
    }

    /// Creates an empty save slot.
    pub fn handle_create_game(
        &self,
        credential: Option<&str>,
        request: CreateGameRequest,
    ) -> ServerResult<GameInfo> {
        let user = self.authenticate(credential)?;
        let name = request.name.trim();
        if name.is_empty() {
            return Err(ServerError::InvalidRequest("game name is empty".into()));
        }
        let game = self
            .context
            .directory
            .create_game(user, name)
            .map_err(|e| report(e.into()))?;
        tracing::debug!(user_id = %user, game_id = %game.id, "game created");
        Ok(GameInfo::from(&game))
    }

    /// Returns one game of the caller.
    pub fn handle_game_info(
        &self,
        credential: Option<&str>,
        game_id: u64,
    ) -> ServerResult<GameInfo> {
        let user = self.authenticate(credential)?;
        self.game(user, GameId(game_id)).map(|g| GameInfo::from(&g))
    }

    /// Lists the caller's games.
    pub fn handle_list_games(&self, credential: Option<&str>) -> ServerResult<Vec<GameInfo>> {
        let user = self.authenticate(credential)?;
        let games = self
            .context
            .directory
            .games_by_owner(user)
            .map_err(|e| report(e.into()))?;
        Ok(games.iter().map(GameInfo::from).collect())
    }

    /// Grants an upload or download lease.
    pub fn handle_lease(
        &self,
        credential: Option<&str>,
        request: LeaseRequest,
    ) -> ServerResult<LeaseGrant> {
        let user = self.authenticate(credential)?;
        let lease = self
            .context
            .coordinator
            .request_lease(user, GameId(request.game_id))?;
        Ok(LeaseGrant::from(&lease))
    }

    /// Receives a save upload.
    ///
    /// `upload_key` and `declared_hash` are the values of the upload key and
    /// hash headers.
    pub fn handle_upload<R: Read>(
        &self,
        credential: Option<&str>,
        upload_key: Option<&str>,
        declared_hash: Option<&str>,
        body: &mut R,
    ) -> ServerResult<UploadReceipt> {
        let user = self.authenticate(credential)?;
        let upload_key =
            upload_key.ok_or_else(|| ServerError::Unauthorized("missing upload key".into()))?;
        let declared_hash = declared_hash
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| ServerError::InvalidRequest("missing save hash".into()))?;

        let receipt = self
            .context
            .coordinator
            .begin_upload(user, upload_key, body, declared_hash)?;
        let record = receipt.record;
        Ok(UploadReceipt {
            message: "save uploaded".into(),
            revision: record.revision.0,
            hash: record
                .content_hash
                .map(|h| h.as_str().to_string())
                .unwrap_or_default(),
            timestamp: unix_millis(record.last_update.unwrap_or_else(|| self.context.clock.now())),
        })
    }

    /// Opens the current save for streaming.
    pub fn handle_download(
        &self,
        credential: Option<&str>,
        upload_key: Option<&str>,
    ) -> ServerResult<SaveDownload> {
        let user = self.authenticate(credential)?;
        let upload_key =
            upload_key.ok_or_else(|| ServerError::Unauthorized("missing upload key".into()))?;
        Ok(self.context.coordinator.download(user, upload_key)?)
    }

    /// Deletes a game and its files.
    pub fn handle_delete_game(
        &self,
        credential: Option<&str>,
        game_id: u64,
    ) -> ServerResult<SuccessMessage> {
        let user = self.authenticate(credential)?;
        self.remove_game(user, GameId(game_id))?;
        Ok(SuccessMessage::ok("game removed", self.context.clock.now()))
    }

    /// Deletes every game and file of the caller.
    pub fn handle_remove_account(&self, credential: Option<&str>) -> ServerResult<SuccessMessage> {
        let user = self.authenticate(credential)?;
        let games = self
            .context
            .directory
            .games_by_owner(user)
            .map_err(|e| report(e.into()))?;
        for game in &games {
            self.remove_game(user, game.id)?;
        }
        self.context.coordinator.purge_owner(user)?;
        tracing::info!(user_id = %user, games = games.len(), "account data removed");
        Ok(SuccessMessage::ok("account data removed", self.context.clock.now()))
    }

    fn authenticate(&self, credential: Option<&str>) -> ServerResult<UserId> {
        let credential =
            credential.ok_or_else(|| ServerError::Unauthorized("missing credential".into()))?;
        self.context.tokens.current_user_id(credential).map_err(|e| {
            tracing::debug!(error = %e, "rejected credential");
            e
        })
    }

    fn game(&self, user: UserId, game_id: GameId) -> ServerResult<Game> {
        self.context
            .directory
            .game_by_owner(user, game_id)
            .map_err(ServerError::from)
    }

    fn remove_game(&self, user: UserId, game_id: GameId) -> ServerResult<Game> {
        let directory = Arc::clone(&self.context.directory);
        let game = self.context.coordinator.remove_save(user, game_id, |game| {
            directory
                .remove_game(game.owner, game.id)
                .map(|_| ())
                .map_err(|e| CoreError::from_ledger(e, game.owner, game.id))
        })?;
        Ok(game)
    }
}

/// Logs a handler-level failure at a level matching its kind.
fn report(err: ServerError) -> ServerError {
    if err.is_server_error() {
        tracing::error!(error = %err, "request failed");
    } else {
        tracing::debug!(error = %err, "request refused");
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_TOKEN_EXPIRY;
    use savesync_core::{CoreConfig, ManualClock, MemoryLedger};
    use savesync_storage::hash_bytes;
    use std::io::Cursor;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    struct Harness {
        _dir: TempDir,
        clock: Arc<ManualClock>,
        handler: RequestHandler,
    }

    fn create_handler(config: impl FnOnce(ServerConfig) -> ServerConfig) -> Harness {
        let dir = tempdir().unwrap();
        let config = config(
            ServerConfig::default()
                .with_auth(b"handler-secret".to_vec())
                .with_register(true)
                .with_core(CoreConfig::new(dir.path().join("cache"), dir.path().join("storage"))),
        );
        let clock = Arc::new(ManualClock::default());
        let context =
            HandlerContext::new(config, Arc::new(MemoryLedger::new()), clock.clone()).unwrap();
        Harness {
            _dir: dir,
            clock,
            handler: RequestHandler::new(Arc::new(context)),
        }
    }

    fn register(handler: &RequestHandler) -> String {
        handler.handle_register().unwrap().token
    }

    fn create_game(handler: &RequestHandler, token: &str) -> GameInfo {
        handler
            .handle_create_game(Some(token), CreateGameRequest { name: "Hades".into() })
            .unwrap()
    }

    #[test]
    fn register_disabled() {
        let h = create_handler(|c| c.with_register(false));
        assert!(matches!(h.handler.handle_register(), Err(ServerError::Forbidden(_))));
    }

    #[test]
    fn empty_secret_is_refused() {
        let dir = tempdir().unwrap();
        let config = ServerConfig::default()
            .with_core(CoreConfig::new(dir.path().join("cache"), dir.path().join("storage")));
        let result = HandlerContext::new(
            config,
            Arc::new(MemoryLedger::new()),
            Arc::new(ManualClock::default()),
        );
        assert!(matches!(result, Err(ServerError::InvalidRequest(_))));
    }

    #[test]
    fn check_token_reports_validity() {
        let h = create_handler(|c| c);
        let token = register(&h.handler);

        let check = |token: &str| {
            h.handler
                .handle_check_token(&TokenCheck { token: token.into() })
                .valid
        };
        assert!(check(&token));
        assert!(check(&format!("Bearer {token}")));
        assert!(!check("00ff"));
        assert!(!check(""));

        h.clock.advance(DEFAULT_TOKEN_EXPIRY + Duration::from_secs(1));
        assert!(!check(&token));
    }

    #[test]
    fn system_information_reflects_config() {
        let h = create_handler(|c| c.with_register(false));
        assert!(!h.handler.handle_system_information().allow_register);
        let h = create_handler(|c| c);
        assert!(h.handler.handle_system_information().allow_register);
    }

    #[test]
    fn register_assigns_distinct_users() {
        let h = create_handler(|c| c);
        let a = h.handler.handle_register().unwrap();
        let b = h.handler.handle_register().unwrap();
        assert_ne!(a.user_id, b.user_id);
    }

    #[test]
    fn missing_credential_is_unauthorized() {
        let h = create_handler(|c| c);
        let err = h.handler.handle_list_games(None).unwrap_err();
        assert_eq!(err.status_code(), 401);
        let err = h.handler.handle_list_games(Some("Bearer 0011")).unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[test]
    fn create_and_list_games() {
        let h = create_handler(|c| c);
        let token = register(&h.handler);
        let game = create_game(&h.handler, &token);
        assert_eq!(game.rev, 0);
        assert!(!game.available);

        let games = h.handler.handle_list_games(Some(token.as_str())).unwrap();
        assert_eq!(games, vec![game.clone()]);
        assert_eq!(h.handler.handle_game_info(Some(token.as_str()), game.id).unwrap(), game);

        let blank = h
            .handler
            .handle_create_game(Some(token.as_str()), CreateGameRequest { name: "  ".into() });
        assert_eq!(blank.unwrap_err().status_code(), 400);
    }

    #[test]
    fn games_of_other_users_are_not_found() {
        let h = create_handler(|c| c);
        let alice = register(&h.handler);
        let bob = register(&h.handler);
        let game = create_game(&h.handler, &alice);

        let err = h.handler.handle_game_info(Some(bob.as_str()), game.id).unwrap_err();
        assert_eq!(err.status_code(), 404);
        let err = h
            .handler
            .handle_lease(Some(bob.as_str()), LeaseRequest { game_id: game.id })
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn upload_then_download() {
        let h = create_handler(|c| c);
        let token = register(&h.handler);
        let game = create_game(&h.handler, &token);
        let data = b"hades save".to_vec();
        let hash = hash_bytes(&data);

        let grant = h
            .handler
            .handle_lease(Some(token.as_str()), LeaseRequest { game_id: game.id })
            .unwrap();
        let receipt = h
            .handler
            .handle_upload(
                Some(token.as_str()),
                Some(grant.upload_token.as_str()),
                Some(hash.as_str().to_uppercase().as_str()),
                &mut Cursor::new(data.clone()),
            )
            .unwrap();
        assert_eq!(receipt.revision, 1);
        assert_eq!(receipt.hash, hash.as_str());
        assert_eq!(receipt.timestamp, unix_millis(h.clock.now()));

        let grant = h
            .handler
            .handle_lease(Some(token.as_str()), LeaseRequest { game_id: game.id })
            .unwrap();
        let mut download = h
            .handler
            .handle_download(Some(token.as_str()), Some(grant.upload_token.as_str()))
            .unwrap();
        let mut received = Vec::new();
        download.read_to_end(&mut received).unwrap();
        assert_eq!(received, data);
    }

    #[test]
    fn upload_without_hash_is_bad_request() {
        let h = create_handler(|c| c);
        let token = register(&h.handler);
        let game = create_game(&h.handler, &token);
        let grant = h
            .handler
            .handle_lease(Some(token.as_str()), LeaseRequest { game_id: game.id })
            .unwrap();

        let err = h
            .handler
            .handle_upload(
                Some(token.as_str()),
                Some(grant.upload_token.as_str()),
                None,
                &mut Cursor::new(b"x"),
            )
            .unwrap_err();
        assert_eq!(err.status_code(), 400);

        let err = h
            .handler
            .handle_upload(Some(token.as_str()), None, Some("abc"), &mut Cursor::new(b"x"))
            .unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[test]
    fn lease_conflict_and_expiry() {
        let h = create_handler(|c| c);
        let token = register(&h.handler);
        let game = create_game(&h.handler, &token);
        let request = LeaseRequest { game_id: game.id };

        h.handler.handle_lease(Some(token.as_str()), request).unwrap();
        let err = h.handler.handle_lease(Some(token.as_str()), request).unwrap_err();
        assert_eq!(err.status_code(), 409);

        h.clock.advance(Duration::from_secs(300));
        assert!(h.handler.handle_lease(Some(token.as_str()), request).is_ok());
    }

    #[test]
    fn delete_game_and_account() {
        let h = create_handler(|c| c);
        let token = register(&h.handler);
        let first = create_game(&h.handler, &token);
        create_game(&h.handler, &token);

        h.handler.handle_delete_game(Some(token.as_str()), first.id).unwrap();
        assert_eq!(h.handler.handle_list_games(Some(token.as_str())).unwrap().len(), 1);
        let err = h.handler.handle_delete_game(Some(token.as_str()), first.id).unwrap_err();
        assert_eq!(err.status_code(), 404);

        let message = h.handler.handle_remove_account(Some(token.as_str())).unwrap();
        assert_eq!(message.status, 200);
        assert!(h.handler.handle_list_games(Some(token.as_str())).unwrap().is_empty());
    }
}
