//! Session management with refresh-on-401 using FSM-based state management.
//!
//! `SessionManager` owns the session phase, the current user, and the refresh
//! single-flight. Consumers read [`SessionSnapshot`]s through a watch channel
//! and never touch storage or the HTTP layer directly.
//!
//! Every session clear (logout, failed refresh, dispose) bumps a generation
//! counter. Async operations capture the generation when they start and only
//! write tokens, replace the user, or move the FSM while it is unchanged, under
//! the same lock the clear takes. A clear therefore wins every race.

use crate::api_client::{endpoints, ApiClient, ApiFailure, RequestPolicy, ResponseInterceptor};
use crate::auth_fsm::{SessionMachine, SessionMachineInput, SessionPhase};
use crate::models::{
    LoginRequest, PasswordChange, ProfileUpdate, RefreshRequest, RegisterResponse, TokenResponse,
    User,
};
use crate::password_policy::{PasswordPolicy, RegistrationForm};
use crate::route_guard::{GuardOptions, RouteGuard};
use crate::{AuthError, AuthResult, FieldError};
use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, MutexGuard};
use pga_core::Config;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use token_store::{TokenPair, TokenStore};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Read-only view of the session for consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub user: Option<User>,
    pub is_loading: bool,
}

impl SessionSnapshot {
    fn from_state(state: &SessionState) -> Self {
        let phase = SessionPhase::from(state.fsm.state());
        Self {
            phase,
            user: state.user.clone(),
            is_loading: phase.is_loading(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

/// Result of one refresh exchange, shared by every caller that joined it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshOutcome {
    Refreshed,
    Expired,
    NoCredentials,
    Superseded,
}

type RefreshFlight = Shared<BoxFuture<'static, RefreshOutcome>>;

struct SessionState {
    fsm: SessionMachine,
    user: Option<User>,
    generation: u64,
    disposed: bool,
}

/// Session manager for authentication state with FSM-based state tracking.
pub struct SessionManager {
    api: Arc<ApiClient>,
    tokens: Arc<TokenStore>,
    password_policy: PasswordPolicy,
    state: Mutex<SessionState>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    /// In-flight refresh and the generation that started it.
    refresh_flight: Mutex<Option<(u64, RefreshFlight)>>,
    initialized: AtomicBool,
    self_ref: Weak<SessionManager>,
}

impl SessionManager {
    /// Create a session manager over an existing client and token store.
    ///
    /// The manager installs itself as the client's `401` handler.
    pub fn new(api: Arc<ApiClient>, tokens: Arc<TokenStore>) -> Arc<Self> {
        Self::with_password_policy(api, tokens, PasswordPolicy::default())
    }

    /// Create a session manager with custom password rules.
    pub fn with_password_policy(
        api: Arc<ApiClient>,
        tokens: Arc<TokenStore>,
        password_policy: PasswordPolicy,
    ) -> Arc<Self> {
        let state = SessionState {
            fsm: SessionMachine::new(),
            user: None,
            generation: 0,
            disposed: false,
        };
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::from_state(&state));

        let manager = Arc::new_cyclic(|self_ref| Self {
            api,
            tokens,
            password_policy,
            state: Mutex::new(state),
            snapshot_tx,
            refresh_flight: Mutex::new(None),
            initialized: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        });

        let weak: Weak<SessionManager> = Arc::downgrade(&manager);
        let interceptor: Weak<dyn ResponseInterceptor> = weak;
        manager.api.set_response_interceptor(interceptor);

        manager
    }

    /// Build the client from configuration and create a manager over it.
    pub fn connect(config: &Config, tokens: Arc<TokenStore>) -> AuthResult<Arc<Self>> {
        let api = Arc::new(ApiClient::new(config, tokens.clone())?);
        Ok(Self::new(api, tokens))
    }

    /// Shared client for other authenticated calls.
    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    /// Token store backing this session.
    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// Watch session changes. The receiver starts at the current snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Route guard for `requested_path` fed by this session.
    pub fn route_guard(&self, options: GuardOptions, requested_path: &str) -> RouteGuard {
        RouteGuard::new(self.subscribe(), options, requested_path)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.snapshot_tx.borrow().phase
    }

    pub fn current_user(&self) -> Option<User> {
        self.snapshot_tx.borrow().user.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.snapshot_tx.borrow().is_loading
    }

    fn publish(&self, state: &SessionState) {
        self.snapshot_tx
            .send_replace(SessionSnapshot::from_state(state));
    }

    fn consume(&self, state: &mut SessionState, input: &SessionMachineInput) -> AuthResult<SessionPhase> {
        let old_phase = SessionPhase::from(state.fsm.state());

        state.fsm.consume(input).map_err(|_| {
            AuthError::InvalidStateTransition(format!(
                "Cannot apply {:?} in state {:?}",
                input, old_phase
            ))
        })?;

        let new_phase = SessionPhase::from(state.fsm.state());
        if old_phase != new_phase {
            debug!(
                old_phase = %old_phase,
                new_phase = %new_phase,
                "Session phase transition"
            );
        }
        self.publish(state);

        Ok(new_phase)
    }

    /// Current generation, or `Disposed`.
    fn generation(&self) -> AuthResult<u64> {
        let state = self.state.lock();
        if state.disposed {
            return Err(AuthError::Disposed);
        }
        Ok(state.generation)
    }

    /// Lock the state if no clear happened since `generation` was captured.
    fn lock_current(&self, generation: u64) -> AuthResult<MutexGuard<'_, SessionState>> {
        let state = self.state.lock();
        if state.disposed {
            return Err(AuthError::Disposed);
        }
        if state.generation != generation {
            return Err(AuthError::Superseded);
        }
        Ok(state)
    }

    fn transition_if_current(&self, generation: u64, input: &SessionMachineInput) -> AuthResult<SessionPhase> {
        let mut state = self.lock_current(generation)?;
        self.consume(&mut state, input)
    }

    fn store_tokens_if_current(&self, generation: u64, pair: &TokenPair) -> AuthResult<()> {
        let _state = self.lock_current(generation)?;
        self.tokens.set_pair(pair)?;
        Ok(())
    }

    fn apply_user_if_current(&self, generation: u64, user: User) -> AuthResult<User> {
        let mut state = self.lock_current(generation)?;
        state.user = Some(user.clone());
        self.consume(&mut state, &SessionMachineInput::UserFetched)?;
        Ok(user)
    }

    /// Drop tokens and user, bump the generation, and land in `Anonymous`.
    fn clear_locked(&self, state: &mut SessionState, reason: &str) {
        state.generation += 1;
        // Callers already attached keep their handle and see `Superseded`
        self.refresh_flight.lock().take();
        if let Err(e) = self.tokens.clear() {
            warn!(error = %e, "Failed to delete stored credentials");
        }
        state.user = None;
        if let Err(e) = self.consume(state, &SessionMachineInput::SessionCleared) {
            warn!(error = %e, "Unexpected state while clearing session");
        }
        info!(reason, "Session cleared");
    }

    fn clear_session(&self, reason: &str) {
        let mut state = self.state.lock();
        self.clear_locked(&mut state, reason);
    }

    /// Clear only if nothing else cleared since `generation`.
    fn clear_session_if_current(&self, generation: u64, reason: &str) -> bool {
        let mut state = self.state.lock();
        if state.disposed || state.generation != generation {
            return false;
        }
        self.clear_locked(&mut state, reason);
        true
    }

    /// Resolve the startup state from stored credentials.
    ///
    /// Runs once; later calls return the current phase. Always leaves
    /// `Initializing`, whatever the outcome.
    pub async fn initialize(&self) -> AuthResult<SessionPhase> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(self.phase());
        }
        let generation = self.generation()?;

        let result = self.validate_stored_session(generation).await;

        {
            let mut state = self.state.lock();
            if !state.disposed && SessionPhase::from(state.fsm.state()) == SessionPhase::Initializing {
                self.consume(&mut state, &SessionMachineInput::NoStoredSession)?;
            }
        }

        result.map(|_| self.phase())
    }

    async fn validate_stored_session(&self, generation: u64) -> AuthResult<()> {
        if !self.tokens.has_session()? {
            info!("No stored session found on startup");
            return Ok(());
        }

        match self.fetch_user(generation).await {
            Ok(user) => info!(username = %user.username, "Restored stored session"),
            Err(e) => warn!(error = %e, "Stored session was not accepted"),
        }
        Ok(())
    }

    /// Exchange credentials for a token pair and load the user.
    ///
    /// A rejected login leaves any existing session untouched.
    pub async fn login(&self, username: &str, password: &str) -> AuthResult<User> {
        let generation = self.generation()?;
        self.transition_if_current(generation, &SessionMachineInput::LoginAttempt)?;

        let result = self.authenticate(generation, username, password).await;
        match &result {
            Ok(user) => info!(username = %user.username, "Logged in"),
            Err(e) => {
                warn!(username, error = %e, "Login failed");
                let _ = self.transition_if_current(generation, &SessionMachineInput::LoginFailed);
            }
        }
        result
    }

    async fn authenticate(&self, generation: u64, username: &str, password: &str) -> AuthResult<User> {
        let body = serde_json::to_value(LoginRequest { username, password })?;
        let response = self
            .api
            .send(Method::POST, endpoints::LOGIN, Some(body), RequestPolicy::ANONYMOUS)
            .await?;

        if !response.status().is_success() {
            let failure = ApiClient::read_failure(response).await;
            return Err(match failure.status {
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    AuthError::InvalidCredentials(failure.message)
                }
                _ => failure.into_error(),
            });
        }

        let tokens: TokenResponse = ApiClient::decode(response).await?;
        self.store_tokens_if_current(generation, &tokens.into_pair())?;
        self.fetch_user(generation).await
    }

    /// Create an account, then sign in as it.
    ///
    /// Password rules are checked locally first. If the server does not hand
    /// back a token pair, this logs in with the submitted credentials.
    pub async fn register(&self, form: &RegistrationForm) -> AuthResult<User> {
        form.validate(&self.password_policy)
            .map_err(AuthError::PasswordPolicy)?;

        let generation = self.generation()?;
        self.transition_if_current(generation, &SessionMachineInput::RegisterAttempt)?;

        let result = self.register_account(generation, form).await;
        match &result {
            Ok(user) => info!(username = %user.username, "Registered"),
            Err(e) => {
                warn!(username = %form.username, error = %e, "Registration failed");
                let _ = self.transition_if_current(generation, &SessionMachineInput::RegisterFailed);
            }
        }
        result
    }

    async fn register_account(&self, generation: u64, form: &RegistrationForm) -> AuthResult<User> {
        let body = serde_json::to_value(form)?;
        let response = self
            .api
            .send(Method::POST, endpoints::REGISTER, Some(body), RequestPolicy::ANONYMOUS)
            .await?;

        if !response.status().is_success() {
            return Err(registration_error(ApiClient::read_failure(response).await));
        }

        let registered: RegisterResponse = ApiClient::decode(response).await?;
        match registered.token_pair() {
            Some(pair) => {
                self.store_tokens_if_current(generation, &pair)?;
                self.fetch_user(generation).await
            }
            None => {
                debug!(username = %form.username, "No tokens in registration reply, logging in");
                self.authenticate(generation, &form.username, &form.password)
                    .await
            }
        }
    }

    /// Load the current user, refreshing once on failure.
    ///
    /// If the retry fails too, the session is cleared.
    pub async fn fetch_current_user(&self) -> AuthResult<User> {
        let generation = self.generation()?;
        self.fetch_user(generation).await
    }

    async fn fetch_user(&self, generation: u64) -> AuthResult<User> {
        let user = match self.api.get_json::<User>(endpoints::ME).await {
            Ok(user) => user,
            Err(first) => {
                debug!(error = %first, "Current user fetch failed, refreshing once");
                if let Err(e) = self.refresh_for(generation, None).await {
                    self.clear_session_if_current(generation, "user fetch failed");
                    return Err(match e {
                        AuthError::NotLoggedIn => first,
                        other => other,
                    });
                }
                match self.api.get_json::<User>(endpoints::ME).await {
                    Ok(user) => user,
                    Err(e) => {
                        self.clear_session_if_current(generation, "user fetch failed after refresh");
                        return Err(e);
                    }
                }
            }
        };

        self.apply_user_if_current(generation, user)
    }

    /// Exchange the refresh token for a new pair.
    ///
    /// Fails without a network call when no refresh token is stored.
    /// Concurrent callers share one in-flight exchange. Any failure of the
    /// exchange clears the session.
    pub async fn refresh(&self) -> AuthResult<()> {
        let generation = self.generation()?;
        self.refresh_for(generation, None).await
    }

    /// Refresh on behalf of `generation`. With `rejected_token`, the exchange
    /// is skipped if the stored access token already moved past it.
    async fn refresh_for(&self, generation: u64, rejected_token: Option<&str>) -> AuthResult<()> {
        if self.tokens.refresh_token()?.is_none() {
            return Err(AuthError::NotLoggedIn);
        }

        let Some(flight) = self.join_refresh(generation, rejected_token)? else {
            debug!("Credentials rotated before refresh started, replaying");
            return Ok(());
        };
        match flight.await {
            RefreshOutcome::Refreshed => Ok(()),
            RefreshOutcome::Expired => Err(AuthError::SessionExpired),
            RefreshOutcome::NoCredentials => Err(AuthError::NotLoggedIn),
            RefreshOutcome::Superseded => Err(AuthError::Superseded),
        }
    }

    /// Attach to this generation's in-flight refresh, or start one.
    ///
    /// Returns `None` when `rejected_token` is no longer the stored access
    /// token, meaning another exchange already finished.
    fn join_refresh(
        &self,
        generation: u64,
        rejected_token: Option<&str>,
    ) -> AuthResult<Option<RefreshFlight>> {
        let mut slot = self.refresh_flight.lock();
        if let Some((flight_generation, flight)) = slot.as_ref() {
            if *flight_generation == generation {
                debug!("Joining in-flight token refresh");
                return Ok(Some(flight.clone()));
            }
        }

        if let Some(rejected) = rejected_token {
            match self.tokens.access_token()? {
                None => return Err(AuthError::NotLoggedIn),
                Some(current) if current != rejected => return Ok(None),
                Some(_) => {}
            }
        }

        let manager = self.self_ref.upgrade().ok_or(AuthError::Disposed)?;
        let task = tokio::spawn(async move {
            let outcome = manager.exchange_refresh_token(generation).await;
            let mut slot = manager.refresh_flight.lock();
            if matches!(slot.as_ref(), Some((g, _)) if *g == generation) {
                *slot = None;
            }
            outcome
        });

        let flight = async move { task.await.unwrap_or(RefreshOutcome::Expired) }
            .boxed()
            .shared();
        *slot = Some((generation, flight.clone()));
        Ok(Some(flight))
    }

    async fn exchange_refresh_token(&self, generation: u64) -> RefreshOutcome {
        let current = self.lock_current(generation).is_ok();
        if !current {
            return RefreshOutcome::Superseded;
        }
        let refresh_token = match self.tokens.refresh_token() {
            Ok(Some(token)) => token,
            Ok(None) => return RefreshOutcome::NoCredentials,
            Err(e) => {
                warn!(error = %e, "Could not read refresh token");
                return RefreshOutcome::NoCredentials;
            }
        };

        debug!("Refreshing access token");
        let result: AuthResult<TokenResponse> = self
            .api
            .send_json(
                Method::POST,
                endpoints::REFRESH,
                Some(&RefreshRequest {
                    refresh_token: &refresh_token,
                }),
                RequestPolicy::ANONYMOUS,
            )
            .await;

        match result {
            Ok(tokens) => match self.store_tokens_if_current(generation, &tokens.into_pair()) {
                Ok(()) => {
                    info!("Access token refreshed");
                    RefreshOutcome::Refreshed
                }
                Err(AuthError::Superseded | AuthError::Disposed) => {
                    debug!("Discarding refreshed tokens for a cleared session");
                    RefreshOutcome::Superseded
                }
                Err(e) => {
                    warn!(error = %e, "Failed to store refreshed tokens");
                    self.clear_session_if_current(generation, "refreshed tokens not stored");
                    RefreshOutcome::Expired
                }
            },
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                if self.clear_session_if_current(generation, "refresh failed") {
                    RefreshOutcome::Expired
                } else {
                    RefreshOutcome::Superseded
                }
            }
        }
    }

    /// Sign out. Never fails.
    ///
    /// Local state is cleared first; the server is then notified with the
    /// captured token and any failure there is ignored.
    pub async fn logout(&self) {
        let token = match self.tokens.access_token() {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Could not read access token for logout");
                None
            }
        };

        self.clear_session("logout");

        let Some(token) = token else {
            return;
        };

        let request = match self
            .api
            .request(Method::POST, endpoints::LOGOUT)
            .bearer_auth(&token)
            .build()
        {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "Could not build logout request");
                return;
            }
        };

        match self.api.execute(request, RequestPolicy::ANONYMOUS).await {
            Ok(response) if response.status().is_success() => debug!("Server logout acknowledged"),
            Ok(response) => debug!(status = %response.status(), "Server logout rejected, ignoring"),
            Err(e) => debug!(error = %e, "Server logout failed, ignoring"),
        }
    }

    /// Tear down: stop applying results of in-flight operations.
    ///
    /// Stored credentials are kept for the next process.
    pub fn dispose(&self) {
        {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.generation += 1;
        }
        self.refresh_flight.lock().take();
        self.api.clear_response_interceptor();
        debug!("Session manager disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    /// Update the signed-in user's email or display name.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> AuthResult<User> {
        let generation = self.generation()?;
        if !self.phase().has_session() {
            return Err(AuthError::NotLoggedIn);
        }
        if update.is_empty() {
            return Err(AuthError::Validation(vec![FieldError::new(
                None,
                "nothing to update",
            )]));
        }

        let user: User = self.api.put_json(endpoints::ME, update).await?;
        let user = self.apply_user_if_current(generation, user)?;
        info!(username = %user.username, "Profile updated");
        Ok(user)
    }

    /// Change the signed-in user's password.
    pub async fn change_password(&self, change: &PasswordChange) -> AuthResult<()> {
        self.generation()?;
        if !self.phase().has_session() {
            return Err(AuthError::NotLoggedIn);
        }
        self.password_policy
            .check(&change.new_password, &change.confirm_password)
            .map_err(AuthError::PasswordPolicy)?;

        let response = self
            .api
            .post_json::<_, serde_json::Value>(endpoints::CHANGE_PASSWORD, change)
            .await;

        match response {
            Ok(_) => {
                info!("Password changed");
                Ok(())
            }
            Err(AuthError::Api { status: 400, message }) => Err(AuthError::Validation(vec![
                FieldError::new(Some("current_password"), message),
            ])),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ResponseInterceptor for SessionManager {
    async fn on_unauthorized(&self, rejected_token: Option<&str>) -> bool {
        let Ok(generation) = self.generation() else {
            return false;
        };
        let stored = match self.tokens.access_token() {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Could not read access token after 401");
                return false;
            }
        };

        match (stored.as_deref(), rejected_token) {
            (None, _) => return false,
            (Some(current), Some(sent)) if current != sent => {
                debug!("Credentials changed since the request was sent, replaying");
                return true;
            }
            (Some(_), None) => return true,
            _ => {}
        }

        match self.refresh_for(generation, rejected_token).await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Refresh after 401 did not succeed");
                false
            }
        }
    }
}

/// Map a failed registration reply into the error taxonomy.
fn registration_error(failure: ApiFailure) -> AuthError {
    let duplicate = {
        let message = failure.message.to_ascii_lowercase();
        message.contains("already registered") || message.contains("already exists")
    };

    match failure.status {
        StatusCode::CONFLICT => AuthError::Conflict(failure.message),
        StatusCode::BAD_REQUEST if duplicate => AuthError::Conflict(failure.message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            if failure.fields.is_empty() {
                AuthError::Validation(vec![FieldError::new(None, failure.message)])
            } else {
                AuthError::Validation(failure.fields)
            }
        }
        _ => failure.into_error(),
    }
}
