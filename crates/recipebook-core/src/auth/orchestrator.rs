//! Auth orchestration: the intent-driven controller behind signup, login,
//! auto-login and logout.
//!
//! `AuthOrchestrator` owns the session store, the expiry timer and the
//! navigator, and processes one message at a time on its own task. Network
//! calls run on spawned tasks and report back on an internal channel, so a
//! logout can be handled while a login is still in flight.
//!
//! Every signup, login and logout bumps a generation counter. A provider reply
//! tagged with an older generation is discarded, which keeps a late response
//! from resurrecting a session that has since been cleared or superseded.
//! Expiry timers are tagged the same way with the epoch they were armed
//! under, so a timer that fired for a replaced session cannot end its
//! successor.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::api::{IdentityProvider, ProviderAuthResponse, ProviderError, UNKNOWN_ERROR_MESSAGE};
use crate::routes::{NavTarget, Navigator};

use super::{AuthGuard, ExpiryScheduler, SessionRecord, SessionStore};

/// Capacity of the outcome broadcast channel
const EVENT_BUFFER_SIZE: usize = 32;

/// Requests the orchestrator reacts to.
#[derive(Clone, PartialEq, Eq)]
pub enum Intent {
    SignupRequested { email: String, password: String },
    LoginRequested { email: String, password: String },
    AuthSucceeded(SessionRecord),
    AuthFailed { message: String },
    LogoutRequested,
    /// The expiry timer armed under `epoch` fired
    TokenExpired { epoch: u64 },
    AutoLoginRequested,
    NoOp,
}

// Manual impl keeps passwords out of logs
impl std::fmt::Debug for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Intent::SignupRequested { email, .. } => {
                f.debug_struct("SignupRequested").field("email", email).finish_non_exhaustive()
            }
            Intent::LoginRequested { email, .. } => {
                f.debug_struct("LoginRequested").field("email", email).finish_non_exhaustive()
            }
            Intent::AuthSucceeded(record) => {
                f.debug_tuple("AuthSucceeded").field(&record.email).finish()
            }
            Intent::AuthFailed { message } => {
                f.debug_struct("AuthFailed").field("message", message).finish()
            }
            Intent::LogoutRequested => f.write_str("LogoutRequested"),
            Intent::TokenExpired { epoch } => {
                f.debug_struct("TokenExpired").field("epoch", epoch).finish()
            }
            Intent::AutoLoginRequested => f.write_str("AutoLoginRequested"),
            Intent::NoOp => f.write_str("NoOp"),
        }
    }
}

/// Outcomes published to UI observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    Authenticated(SessionRecord),
    Failed(String),
    LoggedOut,
    /// The session changed but could not be written to or removed from storage
    PersistFailed(String),
    /// An intent completed without changing the session
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthRequest {
    SignUp,
    SignIn,
}

/// A finished provider call, tagged with the generation that issued it.
struct GatewayReply {
    generation: u64,
    outcome: Result<ProviderAuthResponse, ProviderError>,
}

/// Cloneable handle for dispatching intents and observing the session.
#[derive(Clone)]
pub struct AuthHandle {
    intents: mpsc::UnboundedSender<Intent>,
    events: broadcast::Sender<AuthEvent>,
    session: watch::Receiver<Option<SessionRecord>>,
}

impl AuthHandle {
    pub fn dispatch(&self, intent: Intent) -> Result<()> {
        self.intents
            .send(intent)
            .map_err(|_| anyhow::anyhow!("Auth orchestrator is not running"))
    }

    pub fn signup(&self, email: impl Into<String>, password: impl Into<String>) -> Result<()> {
        self.dispatch(Intent::SignupRequested {
            email: email.into(),
            password: password.into(),
        })
    }

    pub fn login(&self, email: impl Into<String>, password: impl Into<String>) -> Result<()> {
        self.dispatch(Intent::LoginRequested {
            email: email.into(),
            password: password.into(),
        })
    }

    pub fn logout(&self) -> Result<()> {
        self.dispatch(Intent::LogoutRequested)
    }

    pub fn auto_login(&self) -> Result<()> {
        self.dispatch(Intent::AutoLoginRequested)
    }

    /// Subscribe to outcomes published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    pub fn session(&self) -> watch::Receiver<Option<SessionRecord>> {
        self.session.clone()
    }

    pub fn guard(&self) -> AuthGuard {
        AuthGuard::new(self.session.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.borrow().is_some()
    }
}

pub struct AuthOrchestrator<P, T, N> {
    provider: Arc<P>,
    store: SessionStore,
    timer: T,
    navigator: N,
    intents: mpsc::UnboundedReceiver<Intent>,
    /// Used by the expiry callback; weak so dropped handles stop the loop
    intents_tx: mpsc::WeakUnboundedSender<Intent>,
    replies: mpsc::UnboundedReceiver<GatewayReply>,
    replies_tx: mpsc::UnboundedSender<GatewayReply>,
    events: broadcast::Sender<AuthEvent>,
    generation: u64,
    /// Bumped whenever the expiry timer is armed or cancelled
    expiry_epoch: u64,
    clock: fn() -> DateTime<Utc>,
}

impl<P, T, N> AuthOrchestrator<P, T, N>
where
    P: IdentityProvider + 'static,
    T: ExpiryScheduler,
    N: Navigator,
{
    pub fn new(provider: P, store: SessionStore, timer: T, navigator: N) -> (Self, AuthHandle) {
        let (intents_tx, intents) = mpsc::unbounded_channel();
        let (replies_tx, replies) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);

        let handle = AuthHandle {
            intents: intents_tx.clone(),
            events: events.clone(),
            session: store.subscribe(),
        };

        let orchestrator = Self {
            provider: Arc::new(provider),
            store,
            timer,
            navigator,
            intents,
            intents_tx: intents_tx.downgrade(),
            replies,
            replies_tx,
            events,
            generation: 0,
            expiry_epoch: 0,
            clock: Utc::now,
        };

        (orchestrator, handle)
    }

    /// Replace the wall clock used for expiry computations
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Process intents and provider replies until every `AuthHandle` is dropped.
    pub async fn run(mut self) {
        debug!("Auth orchestrator started");
        loop {
            tokio::select! {
                intent = self.intents.recv() => match intent {
                    Some(intent) => self.dispatch(intent),
                    None => break,
                },
                Some(reply) = self.replies.recv() => {
                    if let Some(next) = self.handle_reply(reply) {
                        self.dispatch(next);
                    }
                }
            }
        }
        self.cancel_expiry();
        debug!("Auth orchestrator stopped");
    }

    /// Handle an intent and every follow-up intent it emits.
    pub fn dispatch(&mut self, intent: Intent) {
        let mut next = Some(intent);
        while let Some(intent) = next.take() {
            next = self.handle(intent);
        }
    }

    /// Handle a single intent, returning the intent it emits, if any.
    pub fn handle(&mut self, intent: Intent) -> Option<Intent> {
        debug!(?intent, "Handling intent");
        match intent {
            Intent::SignupRequested { email, password } => {
                self.start_request(AuthRequest::SignUp, email, password);
                None
            }
            Intent::LoginRequested { email, password } => {
                self.start_request(AuthRequest::SignIn, email, password);
                None
            }
            Intent::AuthSucceeded(record) => {
                info!(email = %record.email, "Authenticated");
                self.navigator.navigate(NavTarget::Home);
                self.publish(AuthEvent::Authenticated(record));
                None
            }
            Intent::AuthFailed { message } => {
                self.publish(AuthEvent::Failed(message));
                None
            }
            Intent::LogoutRequested => {
                self.logout();
                None
            }
            Intent::TokenExpired { epoch } => {
                if epoch == self.expiry_epoch {
                    info!("Session token expired");
                    self.logout();
                } else {
                    debug!(epoch, current = self.expiry_epoch, "Ignoring stale expiry");
                }
                None
            }
            Intent::AutoLoginRequested => Some(self.auto_login()),
            Intent::NoOp => {
                self.publish(AuthEvent::Unchanged);
                None
            }
        }
    }

    fn start_request(&mut self, request: AuthRequest, email: String, password: String) {
        self.generation += 1;
        let generation = self.generation;
        debug!(generation, ?request, email = %email, "Starting provider request");

        let provider = Arc::clone(&self.provider);
        let replies = self.replies_tx.clone();
        tokio::spawn(async move {
            let outcome = match request {
                AuthRequest::SignUp => provider.sign_up(&email, &password).await,
                AuthRequest::SignIn => provider.sign_in(&email, &password).await,
            };
            // The receiver lives as long as the orchestrator
            let _ = replies.send(GatewayReply { generation, outcome });
        });
    }

    fn handle_reply(&mut self, reply: GatewayReply) -> Option<Intent> {
        if reply.generation != self.generation {
            debug!(
                generation = reply.generation,
                current = self.generation,
                "Discarding stale provider reply"
            );
            return None;
        }

        match reply.outcome {
            Ok(response) => Some(self.authenticate(response)),
            Err(e) => {
                warn!(error = %e, code = ?e.code(), "Authentication failed");
                Some(Intent::AuthFailed {
                    message: e.user_message().to_string(),
                })
            }
        }
    }

    fn authenticate(&mut self, response: ProviderAuthResponse) -> Intent {
        let now = (self.clock)();
        let lifetime = Duration::try_seconds(response.expires_in_secs)
            .filter(|lifetime| now.checked_add_signed(*lifetime).is_some());
        let Some(lifetime) = lifetime else {
            warn!(expires_in = response.expires_in_secs, "Token lifetime out of range");
            return Intent::AuthFailed {
                message: UNKNOWN_ERROR_MESSAGE.to_string(),
            };
        };
        self.schedule_expiry(lifetime);

        let record = SessionRecord::issued(
            response.email,
            response.user_id,
            response.token,
            lifetime,
            now,
        );
        if let Err(e) = self.store.save(record.clone()) {
            warn!(error = %e, "Failed to persist session");
            self.publish(AuthEvent::PersistFailed(format!(
                "The session could not be saved: {:#}",
                e
            )));
        }

        Intent::AuthSucceeded(record)
    }

    fn logout(&mut self) {
        // Replies still in flight belong to the old session
        self.generation += 1;
        self.cancel_expiry();
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to remove persisted session");
            // Sign out of this process anyway; the blob may restore it next start
            self.store.discard();
            self.publish(AuthEvent::PersistFailed(format!(
                "The saved session could not be removed: {:#}",
                e
            )));
        }
        info!("Logged out");
        self.navigator.navigate(NavTarget::Auth);
        self.publish(AuthEvent::LoggedOut);
    }

    fn auto_login(&mut self) -> Intent {
        let record = match self.store.load() {
            Some(record) if !record.token.is_empty() => record,
            _ => {
                debug!("No persisted session to restore");
                return Intent::NoOp;
            }
        };

        let remaining = record.time_until_expiry((self.clock)());
        if remaining <= Duration::zero() {
            debug!(email = %record.email, "Restored session has already expired");
        }
        self.schedule_expiry(remaining);
        self.store.restore(record.clone());

        Intent::AuthSucceeded(record)
    }

    fn schedule_expiry(&mut self, after: Duration) {
        self.expiry_epoch += 1;
        let epoch = self.expiry_epoch;
        let intents = self.intents_tx.clone();
        self.timer.schedule(
            after,
            Box::new(move || {
                if let Some(intents) = intents.upgrade() {
                    let _ = intents.send(Intent::TokenExpired { epoch });
                }
            }),
        );
    }

    fn cancel_expiry(&mut self) {
        self.expiry_epoch += 1;
        self.timer.cancel();
    }

    fn publish(&self, event: AuthEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::TimeZone;
    use futures::future::{BoxFuture, FutureExt};

    use crate::api::UNKNOWN_ERROR_MESSAGE;
    use crate::auth::{ExpiryCallback, ExpiryTimer, SESSION_KEY};
    use crate::storage::{BlobStore, MemoryBlobStore};

    // -------------------------------------------------------------------------
    // Fakes
    // -------------------------------------------------------------------------

    fn fixed_now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    /// Provider answering every call from a fixed script
    struct ScriptedProvider {
        outcome: fn() -> Result<ProviderAuthResponse, ProviderError>,
        calls: Arc<Mutex<Vec<(AuthRequest, String)>>>,
    }

    impl ScriptedProvider {
        fn new(outcome: fn() -> Result<ProviderAuthResponse, ProviderError>) -> Self {
            Self {
                outcome,
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl IdentityProvider for ScriptedProvider {
        fn sign_up<'a>(
            &'a self,
            email: &'a str,
            _password: &'a str,
        ) -> BoxFuture<'a, Result<ProviderAuthResponse, ProviderError>> {
            self.calls.lock().unwrap().push((AuthRequest::SignUp, email.to_string()));
            let outcome = (self.outcome)();
            async move { outcome }.boxed()
        }

        fn sign_in<'a>(
            &'a self,
            email: &'a str,
            _password: &'a str,
        ) -> BoxFuture<'a, Result<ProviderAuthResponse, ProviderError>> {
            self.calls.lock().unwrap().push((AuthRequest::SignIn, email.to_string()));
            let outcome = (self.outcome)();
            async move { outcome }.boxed()
        }
    }

    fn ok_response() -> Result<ProviderAuthResponse, ProviderError> {
        Ok(ProviderAuthResponse {
            email: "cook@example.com".to_string(),
            user_id: "u-42".to_string(),
            token: "tok".to_string(),
            refresh_token: "refresh".to_string(),
            expires_in_secs: 3600,
            registered: Some(true),
        })
    }

    fn email_exists() -> Result<ProviderAuthResponse, ProviderError> {
        Err(ProviderError::Rejected {
            code: "EMAIL_EXISTS".to_string(),
        })
    }

    fn malformed() -> Result<ProviderAuthResponse, ProviderError> {
        Err(ProviderError::InvalidResponse("missing idToken".to_string()))
    }

    fn endless_lifetime() -> Result<ProviderAuthResponse, ProviderError> {
        ok_response().map(|response| ProviderAuthResponse {
            expires_in_secs: 99_999_999_999_999,
            ..response
        })
    }

    /// Blob store whose removals always fail
    struct StickyBlobs(MemoryBlobStore);

    impl BlobStore for StickyBlobs {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.0.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            self.0.set(key, value)
        }

        fn remove(&self, _key: &str) -> Result<()> {
            Err(anyhow::anyhow!("read-only storage"))
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum TimerCall {
        Schedule(Duration),
        Cancel,
    }

    /// Timer recording calls and holding the last callback for manual firing
    #[derive(Clone, Default)]
    struct RecordingTimer {
        calls: Arc<Mutex<Vec<TimerCall>>>,
        callback: Arc<Mutex<Option<ExpiryCallback>>>,
    }

    impl RecordingTimer {
        fn calls(&self) -> Vec<TimerCall> {
            self.calls.lock().unwrap().clone()
        }

        fn fire(&self) {
            let callback = self.callback.lock().unwrap().take().expect("timer armed");
            callback();
        }
    }

    impl ExpiryScheduler for RecordingTimer {
        fn schedule(&mut self, after: Duration, on_expire: ExpiryCallback) {
            self.calls.lock().unwrap().push(TimerCall::Schedule(after));
            *self.callback.lock().unwrap() = Some(on_expire);
        }

        fn cancel(&mut self) {
            self.calls.lock().unwrap().push(TimerCall::Cancel);
            self.callback.lock().unwrap().take();
        }
    }

    #[derive(Clone, Default)]
    struct RecordingNavigator {
        targets: Arc<Mutex<Vec<NavTarget>>>,
    }

    impl RecordingNavigator {
        fn targets(&self) -> Vec<NavTarget> {
            self.targets.lock().unwrap().clone()
        }
    }

    impl Navigator for RecordingNavigator {
        fn navigate(&mut self, target: NavTarget) {
            self.targets.lock().unwrap().push(target);
        }
    }

    struct Harness {
        orchestrator: AuthOrchestrator<ScriptedProvider, RecordingTimer, RecordingNavigator>,
        handle: AuthHandle,
        blobs: Arc<MemoryBlobStore>,
        timer: RecordingTimer,
        navigator: RecordingNavigator,
        calls: Arc<Mutex<Vec<(AuthRequest, String)>>>,
    }

    fn harness(outcome: fn() -> Result<ProviderAuthResponse, ProviderError>) -> Harness {
        let blobs = Arc::new(MemoryBlobStore::new());
        let provider = ScriptedProvider::new(outcome);
        let calls = provider.calls.clone();
        let timer = RecordingTimer::default();
        let navigator = RecordingNavigator::default();
        let (orchestrator, handle) = AuthOrchestrator::new(
            provider,
            SessionStore::new(blobs.clone()),
            timer.clone(),
            navigator.clone(),
        );
        Harness {
            orchestrator: orchestrator.with_clock(fixed_now),
            handle,
            blobs,
            timer,
            navigator,
            calls,
        }
    }

    impl Harness {
        /// Wait for the pending provider call and handle its reply
        async fn settle(&mut self) -> Option<Intent> {
            let reply = self.orchestrator.replies.recv().await.expect("provider reply");
            self.orchestrator.handle_reply(reply)
        }

        fn write_blob(&self, json: &str) {
            self.blobs.set(SESSION_KEY, json).unwrap();
        }
    }

    // -------------------------------------------------------------------------
    // Signup / Login
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_login_success_schedules_saves_and_emits() {
        let mut h = harness(ok_response);

        let emitted = h.orchestrator.handle(Intent::LoginRequested {
            email: "cook@example.com".to_string(),
            password: "secret".to_string(),
        });
        assert_eq!(emitted, None);

        let expected = SessionRecord::issued(
            "cook@example.com",
            "u-42",
            "tok",
            Duration::seconds(3600),
            fixed_now(),
        );
        let emitted = h.settle().await;
        assert_eq!(emitted, Some(Intent::AuthSucceeded(expected.clone())));

        assert_eq!(
            *h.calls.lock().unwrap(),
            vec![(AuthRequest::SignIn, "cook@example.com".to_string())]
        );
        assert_eq!(h.timer.calls(), vec![TimerCall::Schedule(Duration::seconds(3600))]);
        assert_eq!(h.orchestrator.store.current(), Some(expected.clone()));
        assert_eq!(h.orchestrator.store.load(), Some(expected));
        assert!(h.handle.is_authenticated());
    }

    #[tokio::test]
    async fn test_signup_uses_sign_up_endpoint() {
        let mut h = harness(ok_response);

        h.orchestrator.handle(Intent::SignupRequested {
            email: "new@example.com".to_string(),
            password: "secret".to_string(),
        });
        let emitted = h.settle().await;

        assert!(matches!(emitted, Some(Intent::AuthSucceeded(_))));
        assert_eq!(
            *h.calls.lock().unwrap(),
            vec![(AuthRequest::SignUp, "new@example.com".to_string())]
        );
        assert_eq!(h.timer.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_provider_error_maps_to_message() {
        let mut h = harness(email_exists);

        h.orchestrator.handle(Intent::SignupRequested {
            email: "taken@example.com".to_string(),
            password: "secret".to_string(),
        });
        let emitted = h.settle().await;

        assert_eq!(
            emitted,
            Some(Intent::AuthFailed {
                message: "The email address is already in use by another account.".to_string()
            })
        );
        assert!(h.timer.calls().is_empty());
        assert_eq!(h.orchestrator.store.current(), None);
        assert_eq!(h.blobs.get(SESSION_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_malformed_response_maps_to_unknown_error() {
        let mut h = harness(malformed);

        h.orchestrator.handle(Intent::LoginRequested {
            email: "cook@example.com".to_string(),
            password: "secret".to_string(),
        });
        let emitted = h.settle().await;

        assert_eq!(
            emitted,
            Some(Intent::AuthFailed {
                message: UNKNOWN_ERROR_MESSAGE.to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_out_of_range_lifetime_fails_without_session() {
        let mut h = harness(endless_lifetime);

        h.orchestrator.handle(Intent::LoginRequested {
            email: "cook@example.com".to_string(),
            password: "secret".to_string(),
        });
        let emitted = h.settle().await;

        assert_eq!(
            emitted,
            Some(Intent::AuthFailed {
                message: UNKNOWN_ERROR_MESSAGE.to_string()
            })
        );
        assert!(h.timer.calls().is_empty());
        assert_eq!(h.orchestrator.store.current(), None);
        assert_eq!(h.blobs.get(SESSION_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_run_loop_survives_out_of_range_lifetime() {
        let h = harness(endless_lifetime);
        let handle = h.handle.clone();
        let mut events = handle.subscribe();
        tokio::spawn(h.orchestrator.run());

        handle.login("cook@example.com", "secret").unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            AuthEvent::Failed(UNKNOWN_ERROR_MESSAGE.to_string())
        );

        handle.logout().unwrap();
        assert_eq!(events.recv().await.unwrap(), AuthEvent::LoggedOut);
    }

    #[tokio::test]
    async fn test_failure_is_not_fatal() {
        let mut h = harness(email_exists);
        let mut events = h.handle.subscribe();

        h.orchestrator.handle(Intent::LoginRequested {
            email: "a@b.c".to_string(),
            password: "x".to_string(),
        });
        let failed = h.settle().await.expect("failure intent");
        h.orchestrator.dispatch(failed);
        assert!(matches!(events.try_recv(), Ok(AuthEvent::Failed(_))));

        // Still accepting intents
        h.orchestrator.dispatch(Intent::LogoutRequested);
        assert_eq!(events.try_recv(), Ok(AuthEvent::LoggedOut));
    }

    // -------------------------------------------------------------------------
    // AuthSucceeded / Logout
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_auth_succeeded_navigates_home_without_store_change() {
        let mut h = harness(ok_response);
        let mut events = h.handle.subscribe();
        let record = SessionRecord::issued("a@b.c", "u", "t", Duration::seconds(60), fixed_now());

        assert_eq!(h.orchestrator.handle(Intent::AuthSucceeded(record.clone())), None);

        assert_eq!(h.navigator.targets(), vec![NavTarget::Home]);
        assert_eq!(events.try_recv(), Ok(AuthEvent::Authenticated(record)));
        assert_eq!(h.orchestrator.store.current(), None);
        assert_eq!(h.blobs.get(SESSION_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_logout_cancels_clears_and_navigates() {
        let mut h = harness(ok_response);

        h.orchestrator.handle(Intent::LoginRequested {
            email: "cook@example.com".to_string(),
            password: "secret".to_string(),
        });
        let emitted = h.settle().await.expect("success intent");
        h.orchestrator.dispatch(emitted);
        assert!(h.blobs.get(SESSION_KEY).unwrap().is_some());

        h.orchestrator.dispatch(Intent::LogoutRequested);

        assert_eq!(
            h.timer.calls(),
            vec![TimerCall::Schedule(Duration::seconds(3600)), TimerCall::Cancel]
        );
        assert_eq!(h.orchestrator.store.current(), None);
        assert_eq!(h.blobs.get(SESSION_KEY).unwrap(), None);
        assert_eq!(h.navigator.targets(), vec![NavTarget::Home, NavTarget::Auth]);
        assert!(!h.handle.is_authenticated());
    }

    #[tokio::test]
    async fn test_logout_reports_unremovable_blob() {
        let blobs = StickyBlobs(MemoryBlobStore::new());
        blobs.set(SESSION_KEY, "{}").unwrap();
        let (mut orchestrator, handle) = AuthOrchestrator::new(
            ScriptedProvider::new(ok_response),
            SessionStore::new(blobs),
            RecordingTimer::default(),
            RecordingNavigator::default(),
        );
        let mut events = handle.subscribe();
        orchestrator.store.restore(SessionRecord::issued(
            "a@b.c",
            "u",
            "t",
            Duration::seconds(60),
            fixed_now(),
        ));

        orchestrator.dispatch(Intent::LogoutRequested);

        match events.try_recv() {
            Ok(AuthEvent::PersistFailed(message)) => {
                assert!(message.contains("read-only storage"), "{}", message)
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(events.try_recv(), Ok(AuthEvent::LoggedOut));
        assert!(!handle.is_authenticated());
    }

    #[tokio::test]
    async fn test_logout_without_session() {
        let mut h = harness(ok_response);

        h.orchestrator.dispatch(Intent::LogoutRequested);

        assert_eq!(h.timer.calls(), vec![TimerCall::Cancel]);
        assert_eq!(h.navigator.targets(), vec![NavTarget::Auth]);
    }

    #[tokio::test]
    async fn test_late_reply_after_logout_is_discarded() {
        let mut h = harness(ok_response);

        h.orchestrator.handle(Intent::LoginRequested {
            email: "cook@example.com".to_string(),
            password: "secret".to_string(),
        });
        h.orchestrator.dispatch(Intent::LogoutRequested);

        assert_eq!(h.settle().await, None);
        assert_eq!(h.orchestrator.store.current(), None);
        assert_eq!(h.blobs.get(SESSION_KEY).unwrap(), None);
        assert_eq!(h.timer.calls(), vec![TimerCall::Cancel]);
    }

    #[tokio::test]
    async fn test_newer_login_supersedes_older() {
        let mut h = harness(ok_response);

        h.orchestrator.handle(Intent::LoginRequested {
            email: "first@example.com".to_string(),
            password: "secret".to_string(),
        });
        h.orchestrator.handle(Intent::LoginRequested {
            email: "second@example.com".to_string(),
            password: "secret".to_string(),
        });

        let mut outcomes = vec![h.settle().await, h.settle().await];
        outcomes.retain(Option::is_some);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(h.timer.calls().len(), 1);
    }

    // -------------------------------------------------------------------------
    // Auto-login
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_auto_login_without_blob_is_noop() {
        let mut h = harness(ok_response);
        let session = h.handle.session();

        assert_eq!(h.orchestrator.handle(Intent::AutoLoginRequested), Some(Intent::NoOp));

        assert!(h.timer.calls().is_empty());
        assert!(!session.has_changed().unwrap());
        assert_eq!(h.orchestrator.store.current(), None);
    }

    #[tokio::test]
    async fn test_auto_login_with_empty_token_is_noop() {
        let mut h = harness(ok_response);
        h.write_blob(
            r#"{"email":"a@b.c","id":"u","_token":"","_tokenExpirationDate":"2023-11-14T23:13:20.000Z"}"#,
        );

        assert_eq!(h.orchestrator.handle(Intent::AutoLoginRequested), Some(Intent::NoOp));
        assert!(h.timer.calls().is_empty());
        assert_eq!(h.orchestrator.store.current(), None);
    }

    #[tokio::test]
    async fn test_auto_login_with_malformed_blob_is_noop() {
        let mut h = harness(ok_response);
        h.write_blob("{\"email\":");

        assert_eq!(h.orchestrator.handle(Intent::AutoLoginRequested), Some(Intent::NoOp));
    }

    #[tokio::test]
    async fn test_auto_login_restores_and_schedules_remaining() {
        let mut h = harness(ok_response);
        // Expires one hour after fixed_now()
        h.write_blob(
            r#"{"email":"cook@example.com","id":"u-42","_token":"tok","_tokenExpirationDate":"2023-11-14T23:13:20.000Z"}"#,
        );

        let emitted = h.orchestrator.handle(Intent::AutoLoginRequested);

        let restored = SessionRecord {
            email: "cook@example.com".to_string(),
            user_id: "u-42".to_string(),
            token: "tok".to_string(),
            token_expires_at: fixed_now() + Duration::seconds(3600),
        };
        assert_eq!(emitted, Some(Intent::AuthSucceeded(restored.clone())));
        assert_eq!(h.timer.calls(), vec![TimerCall::Schedule(Duration::seconds(3600))]);
        assert_eq!(h.orchestrator.store.current(), Some(restored));
    }

    #[tokio::test]
    async fn test_auto_login_with_expired_session_still_schedules() {
        let mut h = harness(ok_response);
        // Expired ten minutes before fixed_now()
        h.write_blob(
            r#"{"email":"cook@example.com","id":"u-42","_token":"tok","_tokenExpirationDate":"2023-11-14T22:03:20.000Z"}"#,
        );

        let emitted = h.orchestrator.handle(Intent::AutoLoginRequested);

        assert!(matches!(emitted, Some(Intent::AuthSucceeded(_))));
        assert_eq!(h.timer.calls(), vec![TimerCall::Schedule(Duration::seconds(-600))]);
    }

    #[tokio::test]
    async fn test_dispatch_follows_emitted_intents() {
        let mut h = harness(ok_response);
        let mut events = h.handle.subscribe();

        h.orchestrator.dispatch(Intent::AutoLoginRequested);
        assert_eq!(events.try_recv(), Ok(AuthEvent::Unchanged));
        assert!(h.navigator.targets().is_empty());

        h.write_blob(
            r#"{"email":"cook@example.com","id":"u-42","_token":"tok","_tokenExpirationDate":"2023-11-14T23:13:20.000Z"}"#,
        );
        h.orchestrator.dispatch(Intent::AutoLoginRequested);
        assert!(matches!(events.try_recv(), Ok(AuthEvent::Authenticated(_))));
        assert_eq!(h.navigator.targets(), vec![NavTarget::Home]);
    }

    // -------------------------------------------------------------------------
    // Expiry wiring and the run loop
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_expiry_callback_dispatches_logout() {
        let mut h = harness(ok_response);
        h.write_blob(
            r#"{"email":"cook@example.com","id":"u-42","_token":"tok","_tokenExpirationDate":"2023-11-14T23:13:20.000Z"}"#,
        );
        h.orchestrator.dispatch(Intent::AutoLoginRequested);

        h.timer.fire();

        let intent = h.orchestrator.intents.recv().await.expect("queued intent");
        assert!(matches!(intent, Intent::TokenExpired { .. }));

        h.orchestrator.dispatch(intent);
        assert_eq!(h.orchestrator.store.current(), None);
        assert_eq!(h.blobs.get(SESSION_KEY).unwrap(), None);
        assert_eq!(h.navigator.targets(), vec![NavTarget::Home, NavTarget::Auth]);
    }

    #[tokio::test]
    async fn test_expiry_of_replaced_session_is_ignored() {
        let mut h = harness(ok_response);
        h.write_blob(
            r#"{"email":"old@example.com","id":"u-1","_token":"old","_tokenExpirationDate":"2023-11-14T23:13:20.000Z"}"#,
        );
        h.orchestrator.dispatch(Intent::AutoLoginRequested);

        // The old timer fires while a newer login is in flight
        h.orchestrator.handle(Intent::LoginRequested {
            email: "cook@example.com".to_string(),
            password: "secret".to_string(),
        });
        h.timer.fire();
        let expired = h.orchestrator.intents.recv().await.expect("queued intent");

        // The newer login's reply is handled first
        let succeeded = h.settle().await.expect("success intent");
        h.orchestrator.dispatch(succeeded);
        h.orchestrator.dispatch(expired);

        let current = h.orchestrator.store.current().expect("session kept");
        assert_eq!(current.email, "cook@example.com");
        assert!(h.blobs.get(SESSION_KEY).unwrap().is_some());
        assert_eq!(h.navigator.targets(), vec![NavTarget::Home, NavTarget::Home]);
    }

    #[tokio::test]
    async fn test_expiry_after_logout_is_ignored() {
        let mut h = harness(ok_response);
        let mut events = h.handle.subscribe();
        h.write_blob(
            r#"{"email":"cook@example.com","id":"u-42","_token":"tok","_tokenExpirationDate":"2023-11-14T23:13:20.000Z"}"#,
        );
        h.orchestrator.dispatch(Intent::AutoLoginRequested);
        h.timer.fire();
        let expired = h.orchestrator.intents.recv().await.expect("queued intent");

        h.orchestrator.dispatch(Intent::LogoutRequested);
        h.orchestrator.dispatch(expired);

        assert!(matches!(events.try_recv(), Ok(AuthEvent::Authenticated(_))));
        assert_eq!(events.try_recv(), Ok(AuthEvent::LoggedOut));
        assert!(events.try_recv().is_err());
        assert_eq!(h.navigator.targets(), vec![NavTarget::Home, NavTarget::Auth]);
    }

    #[tokio::test]
    async fn test_run_loop_login_then_logout() {
        let h = harness(ok_response);
        let handle = h.handle.clone();
        let mut events = handle.subscribe();
        let task = tokio::spawn(h.orchestrator.run());

        handle.login("cook@example.com", "secret").unwrap();
        match events.recv().await.unwrap() {
            AuthEvent::Authenticated(record) => assert_eq!(record.email, "cook@example.com"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(handle.guard().can_enter());

        handle.logout().unwrap();
        assert_eq!(events.recv().await.unwrap(), AuthEvent::LoggedOut);
        assert!(!handle.guard().can_enter());
        assert_eq!(h.navigator.targets(), vec![NavTarget::Home, NavTarget::Auth]);

        drop(handle);
        drop(h.handle);
        // Loop ends once every handle is gone
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_expiry_logs_out() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let navigator = RecordingNavigator::default();
        let (orchestrator, handle) = AuthOrchestrator::new(
            ScriptedProvider::new(ok_response),
            SessionStore::new(blobs.clone()),
            ExpiryTimer::new(),
            navigator.clone(),
        );
        let mut events = handle.subscribe();
        tokio::spawn(orchestrator.run());

        handle.login("cook@example.com", "secret").unwrap();
        assert!(matches!(events.recv().await.unwrap(), AuthEvent::Authenticated(_)));

        tokio::time::advance(std::time::Duration::from_secs(3600)).await;
        assert_eq!(events.recv().await.unwrap(), AuthEvent::LoggedOut);
        assert!(!handle.is_authenticated());
        assert_eq!(blobs.get(SESSION_KEY).unwrap(), None);
        assert_eq!(navigator.targets(), vec![NavTarget::Home, NavTarget::Auth]);
    }

    #[tokio::test]
    async fn test_dispatch_fails_once_stopped() {
        let h = harness(ok_response);
        let handle = h.handle.clone();
        drop(h);
        assert!(handle.logout().is_err());
    }
}
