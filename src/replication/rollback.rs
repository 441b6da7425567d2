//! Rollback helper
//!
//! Brute-force abort victims are rolled back on a dedicated thread so the
//! lock manager, which picks the victim, never blocks on the rollback.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use super::errors::{ReplicationError, ReplicationResult};
use super::session::{QueryState, Session};

/// Host hook that rolls back a victim's transaction in the storage engine.
pub trait TransactionAborter: Send + Sync {
    fn abort_transaction(&self, victim: &Session);
}

/// Aborter for hosts without transactional storage.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAborter;

impl TransactionAborter for NoopAborter {
    fn abort_transaction(&self, victim: &Session) {
        debug!(session = %victim.id(), "nothing to roll back");
    }
}

enum Job {
    RollBack(Arc<Session>),
    Stop,
}

/// Queue and thread rolling back brute-force abort victims.
///
/// The queue outlives the thread: victims scheduled while the thread is not
/// running wait for the next `start`. The caller never runs a rollback.
pub struct RollbackHelper {
    aborter: Arc<dyn TransactionAborter>,
    queue: Mutex<Sender<Job>>,
    receiver: Mutex<Option<Receiver<Job>>>,
    worker: Mutex<Option<JoinHandle<Receiver<Job>>>>,
}

impl RollbackHelper {
    pub fn new(aborter: Arc<dyn TransactionAborter>) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            aborter,
            queue: Mutex::new(sender),
            receiver: Mutex::new(Some(receiver)),
            worker: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Spawn the helper thread. Starting a running helper does nothing.
    pub fn start(&self) -> ReplicationResult<()> {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.is_some() {
            return Ok(());
        }
        let receiver = match self.receiver.lock().unwrap_or_else(|e| e.into_inner()).take() {
            Some(receiver) => receiver,
            None => return Ok(()),
        };

        let aborter = Arc::clone(&self.aborter);
        let handle = thread::Builder::new()
            .name("rollbacker".into())
            .spawn(move || {
                while let Ok(Job::RollBack(victim)) = receiver.recv() {
                    roll_back(aborter.as_ref(), &victim);
                }
                debug!("rollback helper exiting");
                receiver
            })
            .map_err(|e| {
                ReplicationError::invalid_state(format!("cannot spawn rollback helper: {}", e))
            })?;

        *worker = Some(handle);
        info!("rollback helper started");
        Ok(())
    }

    /// Queue a victim for rollback. Never blocks.
    pub fn schedule(&self, victim: Arc<Session>) {
        let queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = queue.send(Job::RollBack(victim)) {
            if let Job::RollBack(victim) = e.0 {
                warn!(session = %victim.id(), "rollback queue closed, victim not rolled back");
            }
        }
    }

    /// Roll back everything queued so far and join the thread.
    pub fn stop(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let worker = match worker {
            Some(worker) => worker,
            None => return,
        };

        let _ = self
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .send(Job::Stop);
        match worker.join() {
            Ok(receiver) => {
                *self.receiver.lock().unwrap_or_else(|e| e.into_inner()) = Some(receiver);
            }
            Err(_) => {
                warn!("rollback helper panicked, queued victims lost");
                let (sender, receiver) = mpsc::channel();
                *self.queue.lock().unwrap_or_else(|e| e.into_inner()) = sender;
                *self.receiver.lock().unwrap_or_else(|e| e.into_inner()) = Some(receiver);
            }
        }
        info!("rollback helper stopped");
    }
}

fn roll_back(aborter: &dyn TransactionAborter, victim: &Session) {
    aborter.abort_transaction(victim);
    victim.with_context(|ctx| {
        if ctx.query_state == QueryState::Aborting {
            ctx.query_state = QueryState::Aborted;
        }
    });
    debug!(session = %victim.id(), "victim rolled back");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::SessionRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingAborter(AtomicUsize);

    impl TransactionAborter for CountingAborter {
        fn abort_transaction(&self, _victim: &Session) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn victim(registry: &SessionRegistry) -> Arc<Session> {
        let session = registry.open_client(true, false);
        session.with_context(|ctx| {
            ctx.query_state = QueryState::Aborting;
            ctx.bf_aborted = true;
        });
        session
    }

    #[test]
    fn test_queued_until_started() {
        let aborter = Arc::new(CountingAborter::default());
        let helper = RollbackHelper::new(aborter.clone());
        let registry = SessionRegistry::new();
        let session = victim(&registry);

        helper.schedule(Arc::clone(&session));
        assert_eq!(aborter.0.load(Ordering::SeqCst), 0);
        assert_eq!(session.context().query_state, QueryState::Aborting);

        helper.start().unwrap();
        helper.stop();
        assert_eq!(aborter.0.load(Ordering::SeqCst), 1);
        assert_eq!(session.context().query_state, QueryState::Aborted);
    }

    #[test]
    fn test_restart_after_stop() {
        let aborter = Arc::new(CountingAborter::default());
        let helper = RollbackHelper::new(aborter.clone());
        let registry = SessionRegistry::new();
        helper.start().unwrap();
        helper.stop();

        helper.schedule(victim(&registry));
        assert_eq!(aborter.0.load(Ordering::SeqCst), 0);

        helper.start().unwrap();
        helper.stop();
        assert_eq!(aborter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_thread_drains_on_stop() {
        let aborter = Arc::new(CountingAborter::default());
        let helper = RollbackHelper::new(aborter.clone());
        helper.start().unwrap();
        assert!(helper.is_running());

        let registry = SessionRegistry::new();
        let sessions: Vec<_> = (0..4).map(|_| victim(&registry)).collect();
        for session in &sessions {
            helper.schedule(Arc::clone(session));
        }
        helper.stop();

        assert!(!helper.is_running());
        assert_eq!(aborter.0.load(Ordering::SeqCst), 4);
        for session in &sessions {
            assert_eq!(session.context().query_state, QueryState::Aborted);
            assert!(session.take_abort_error().is_some());
        }
    }
}
