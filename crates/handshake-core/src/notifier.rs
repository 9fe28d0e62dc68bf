use std::{fmt, time::Duration};

use tracing::debug;

use crate::types::CompletedSession;

/// Caller-supplied hook run once a handshake reaches `Done`.
pub type CompletionHook = Box<dyn FnOnce(CompletedSession) + Send + 'static>;

/// Hands control back to the caller after a successful handshake.
///
/// The hook is taken before the grace pause, so it runs at most once even if
/// `complete` is called again or its future is dropped mid-pause.
pub struct CompletionNotifier {
    grace: Duration,
    hook: Option<CompletionHook>,
}

impl CompletionNotifier {
    pub fn new(grace: Duration, hook: impl FnOnce(CompletedSession) + Send + 'static) -> Self {
        Self {
            grace,
            hook: Some(Box::new(hook)),
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn has_fired(&self) -> bool {
        self.hook.is_none()
    }

    /// Wait out the grace interval, then run the hook.
    ///
    /// Returns `false` when the hook was already consumed.
    pub async fn complete(&mut self, session: CompletedSession) -> bool {
        let Some(hook) = self.hook.take() else {
            return false;
        };
        if !self.grace.is_zero() {
            tokio::time::sleep(self.grace).await;
        }
        debug!(phone_number = %session.phone_number, "running completion hook");
        hook(session);
        true
    }
}

impl fmt::Debug for CompletionNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionNotifier")
            .field("grace", &self.grace)
            .field("has_fired", &self.has_fired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use tokio::time::Instant;

    use super::*;

    fn completed() -> CompletedSession {
        CompletedSession {
            phone_number: "+551199999999".into(),
            message: "Sessão criada".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_grace_interval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(None));
        let calls_hook = Arc::clone(&calls);
        let seen_hook = Arc::clone(&seen);
        let mut notifier = CompletionNotifier::new(Duration::from_millis(2_000), move |session| {
            calls_hook.fetch_add(1, Ordering::SeqCst);
            *seen_hook.lock().expect("lock") = Some(session);
        });

        let started = Instant::now();
        assert!(notifier.complete(completed()).await);
        assert!(started.elapsed() >= Duration::from_millis(2_000));
        assert!(!notifier.complete(completed()).await);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(seen.lock().expect("lock").clone(), Some(completed()));
        assert!(notifier.has_fired());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_completion_mid_grace_skips_hook() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_hook = Arc::clone(&calls);
        let mut notifier = CompletionNotifier::new(Duration::from_millis(2_000), move |_| {
            calls_hook.fetch_add(1, Ordering::SeqCst);
        });

        let outcome = tokio::time::timeout(
            Duration::from_millis(500),
            notifier.complete(completed()),
        )
        .await;
        assert!(outcome.is_err());
        assert!(notifier.has_fired());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!notifier.complete(completed()).await);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
