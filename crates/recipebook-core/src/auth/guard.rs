use tokio::sync::watch;

use super::SessionRecord;

/// Allows entry to protected views while a session is present.
///
/// Expiry is not checked here; the expiry timer logs the session out.
#[derive(Clone)]
pub struct AuthGuard {
    session: watch::Receiver<Option<SessionRecord>>,
}

impl AuthGuard {
    pub fn new(session: watch::Receiver<Option<SessionRecord>>) -> Self {
        Self { session }
    }

    pub fn can_enter(&self) -> bool {
        self.session.borrow().is_some()
    }
}
