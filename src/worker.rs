use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    display::{DisplayEnumerator, ModeController},
    error, info,
    process::PresenceDetector,
    session::SessionController,
    DEBUG_NAME,
};

/// Cooperative stop signal. `wait` doubles as the worker's interruptible sleep.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner()) = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleeps up to `timeout`; returns true as soon as cancellation is requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut cancelled = lock.lock().unwrap_or_else(|e| e.into_inner());

        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            cancelled = match cvar.wait_timeout(cancelled, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }

        *cancelled
    }
}

/// The single background thread that owns the session controller. All display
/// and process calls happen here, one at a time.
pub struct SessionWorker {
    handle: JoinHandle<()>,
    cancel: CancelToken,
    restore_requested: Arc<AtomicBool>,
}

impl SessionWorker {
    pub fn spawn<E, C, P>(
        mut controller: SessionController<E, C, P>,
        poll_interval: Duration,
    ) -> io::Result<Self>
    where
        E: DisplayEnumerator + Send + 'static,
        C: ModeController<Mode = E::Mode> + Send + 'static,
        P: PresenceDetector + Send + 'static,
    {
        let cancel = controller.cancel_token().clone();
        let restore_requested = Arc::new(AtomicBool::new(false));

        let loop_cancel = cancel.clone();
        let loop_restore = restore_requested.clone();
        let handle = thread::Builder::new()
            .name("session-worker".to_string())
            .spawn(move || {
                info!(
                    "[{}][WORKER] Polling every {}ms",
                    DEBUG_NAME,
                    poll_interval.as_millis()
                );

                loop {
                    if loop_cancel.is_cancelled() {
                        break;
                    }
                    if loop_restore.swap(false, Ordering::SeqCst) {
                        controller.restore_now();
                    }
                    controller.poll_once();
                    if loop_cancel.wait(poll_interval) {
                        break;
                    }
                }

                info!("[{}][WORKER] Stop requested; draining to a safe state", DEBUG_NAME);
                controller.shutdown();
            })?;

        Ok(Self {
            handle,
            cancel,
            restore_requested,
        })
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Asks the worker to bring every display back on its next wakeup.
    pub fn request_restore(&self) {
        self.restore_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signals the worker and waits for its shutdown restore to finish.
    pub fn stop(self) {
        self.cancel.cancel();
        if self.handle.join().is_err() {
            error!("[{}][WORKER] Session worker panicked during shutdown", DEBUG_NAME);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::Receiver;

    use super::*;
    use crate::{
        display::fake::FakeDesktop,
        process::{TargetHandle, TargetSpec},
        session::SessionSettings,
        status::{StatusBus, StatusCategory, StatusEvent},
    };

    const SECOND: &str = r"\\.\DISPLAY2";

    fn wait_for(events: &Receiver<StatusEvent>, category: StatusCategory, display: Option<&str>) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while let Some(left) = deadline.checked_duration_since(Instant::now()) {
            match events.recv_timeout(left) {
                Ok(e) if e.category == category && e.display.as_deref() == display => return true,
                Ok(_) => continue,
                Err(_) => return false,
            }
        }
        false
    }

    fn spawn(desktop: &FakeDesktop, running: Arc<AtomicBool>) -> (SessionWorker, Receiver<StatusEvent>) {
        let status = StatusBus::new();
        let events = status.subscribe();
        let mut controller = SessionController::new(
            desktop.clone(),
            desktop.clone(),
            move |_: &TargetSpec| running.load(Ordering::SeqCst),
            TargetHandle::new(Some("game.exe")),
            SessionSettings {
                retry_delay: Duration::ZERO,
                ..SessionSettings::default()
            },
            status,
        );
        controller.capture_baseline().unwrap();
        let worker = SessionWorker::spawn(controller, Duration::from_millis(10)).unwrap();
        (worker, events)
    }

    #[test]
    fn wait_returns_early_once_cancelled() {
        let token = CancelToken::new();
        assert!(!token.wait(Duration::from_millis(5)));

        let remote = token.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });

        let started = Instant::now();
        assert!(token.wait(Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(token.is_cancelled());
        t.join().unwrap();
    }

    #[test]
    fn stop_while_disabled_restores_before_exit() {
        let desktop = FakeDesktop::dual();
        let running = Arc::new(AtomicBool::new(true));
        let (worker, events) = spawn(&desktop, running);

        assert!(wait_for(&events, StatusCategory::Disabled, Some(SECOND)));
        assert!(!desktop.monitor(SECOND).active);

        worker.stop();
        assert!(desktop.monitor(SECOND).active);
        assert!(events.try_iter().any(|e| e.category == StatusCategory::Restored));
    }

    #[test]
    fn worker_follows_process_lifecycle() {
        let desktop = FakeDesktop::dual();
        let running = Arc::new(AtomicBool::new(false));
        let (worker, events) = spawn(&desktop, running.clone());

        running.store(true, Ordering::SeqCst);
        assert!(wait_for(&events, StatusCategory::Disabled, Some(SECOND)));

        running.store(false, Ordering::SeqCst);
        assert!(wait_for(&events, StatusCategory::Restored, Some(SECOND)));
        assert!(desktop.monitor(SECOND).active);

        worker.stop();
        assert!(worker_stopped_cleanly(&desktop));
    }

    #[test]
    fn restore_request_is_served_by_the_worker() {
        let desktop = FakeDesktop::dual();
        let running = Arc::new(AtomicBool::new(true));
        let (worker, events) = spawn(&desktop, running);

        assert!(wait_for(&events, StatusCategory::Disabled, Some(SECOND)));
        worker.request_restore();
        assert!(wait_for(&events, StatusCategory::Restored, Some(SECOND)));
        assert!(!worker.is_finished());

        worker.stop();
    }

    fn worker_stopped_cleanly(desktop: &FakeDesktop) -> bool {
        desktop.state().monitors.iter().all(|m| m.active)
    }
}
