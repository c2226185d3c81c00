//! The single active polling session.
//!
//! Every session gets a fresh generation number. Async work captures the
//! generation it was started under and checks [`SessionRegistry::live`]
//! under the lock before touching shared state, so work from a replaced or
//! stopped session can never publish.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::state::Job;

pub(crate) struct ActiveSession {
    pub(crate) generation: u64,
    pub(crate) job: Option<Job>,
    pub(crate) merge_outputs: bool,
    pub(crate) cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    timer_active: bool,
}

#[derive(Default)]
pub(crate) struct SessionRegistry {
    current: Option<ActiveSession>,
    last_generation: u64,
}

impl SessionRegistry {
    /// Stops any current session and opens a new one.
    pub(crate) fn begin(&mut self, merge_outputs: bool) -> (u64, CancellationToken) {
        self.stop();
        self.last_generation += 1;
        let cancel = CancellationToken::new();
        self.current = Some(ActiveSession {
            generation: self.last_generation,
            job: None,
            merge_outputs,
            cancel: cancel.clone(),
            handle: None,
            timer_active: false,
        });
        (self.last_generation, cancel)
    }

    pub(crate) fn live(&self, generation: u64) -> Option<&ActiveSession> {
        self.current
            .as_ref()
            .filter(|session| session.generation == generation)
    }

    pub(crate) fn live_mut(&mut self, generation: u64) -> Option<&mut ActiveSession> {
        self.current
            .as_mut()
            .filter(|session| session.generation == generation)
    }

    /// Hands the status task to the session. A stale handle is aborted.
    pub(crate) fn attach_timer(&mut self, generation: u64, handle: JoinHandle<()>) -> bool {
        match self.live_mut(generation) {
            Some(session) => {
                session.handle = Some(handle);
                session.timer_active = true;
                true
            }
            None => {
                handle.abort();
                false
            }
        }
    }

    /// Records that the status timer will not tick again. The task itself
    /// keeps running for result reconciliation.
    pub(crate) fn stop_timer(&mut self, generation: u64) {
        if let Some(session) = self.live_mut(generation) {
            session.timer_active = false;
        }
    }

    /// Cancels and aborts the current session, if any.
    pub(crate) fn stop(&mut self) -> bool {
        match self.current.take() {
            Some(session) => {
                session.cancel.cancel();
                if let Some(handle) = session.handle {
                    handle.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Closes a session from inside its own task once it has settled.
    pub(crate) fn finish(&mut self, generation: u64) {
        if self.live(generation).is_some() {
            if let Some(session) = self.current.take() {
                session.cancel.cancel();
            }
        }
    }

    pub(crate) fn timer_alive(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|session| session.timer_active)
    }

    pub(crate) fn current_job_id(&self) -> Option<String> {
        self.current
            .as_ref()
            .and_then(|session| session.job.as_ref())
            .map(|job| job.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::JobStatus;

    #[tokio::test]
    async fn begin_replaces_previous_session() {
        let mut sessions = SessionRegistry::default();
        let (first, first_cancel) = sessions.begin(false);
        let handle = tokio::spawn(std::future::pending::<()>());
        assert!(sessions.attach_timer(first, handle));
        assert!(sessions.timer_alive());

        let (second, _) = sessions.begin(true);

        assert!(first_cancel.is_cancelled());
        assert!(second > first);
        assert!(sessions.live(first).is_none());
        assert!(sessions.live(second).is_some_and(|s| s.merge_outputs));
        assert!(!sessions.timer_alive());
    }

    #[tokio::test]
    async fn stale_timer_is_aborted_on_attach() {
        let mut sessions = SessionRegistry::default();
        let (first, _) = sessions.begin(false);
        sessions.begin(false);

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await
        });
        assert!(!sessions.attach_timer(first, handle));
        // The sender is dropped only when the aborted task is torn down.
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn finish_ignores_other_generations() {
        let mut sessions = SessionRegistry::default();
        let (first, _) = sessions.begin(false);
        let (second, cancel) = sessions.begin(false);
        sessions.live_mut(second).unwrap().job = Some(Job::new("job-b", JobStatus::Queued));

        sessions.finish(first);
        assert_eq!(sessions.current_job_id().as_deref(), Some("job-b"));

        sessions.finish(second);
        assert!(cancel.is_cancelled());
        assert!(sessions.current_job_id().is_none());
        assert!(!sessions.stop());
    }
}
