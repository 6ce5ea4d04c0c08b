//! Engine lifecycle
//!
//! Idempotent start/stop around the capture worker. The host owns exactly one
//! engine; any number of control threads may call start/stop and the calls
//! serialize on the worker slot. Stop is cooperative and bounded: the stop
//! flag is raised, the driver handle is shut down to unblock the in-flight
//! recv, and the worker is joined unconditionally.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use super::driver::{DivertDriver, DivertHandle, DivertShutdown};
use super::session::SessionTracker;
use super::worker;

/// State shared with the worker: the stop flag (lock-free) and the single
/// mutex over handle + session set.
pub(crate) struct EngineShared {
    pub(crate) stop: AtomicBool,
    pub(crate) state: Mutex<DivertState>,
}

pub(crate) struct DivertState {
    pub(crate) handle: DivertHandle,
    pub(crate) sessions: SessionTracker,
}

/// Decoy-injection engine bound to one packet-diversion driver.
pub struct PhantomEngine {
    driver: Arc<dyn DivertDriver>,
    shared: Arc<EngineShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PhantomEngine {
    /// Create an engine over the given driver. Tests inject the stub here;
    /// production uses [`PhantomEngine::windivert`].
    pub fn new(driver: Arc<dyn DivertDriver>) -> Self {
        Self {
            driver,
            shared: Arc::new(EngineShared {
                stop: AtomicBool::new(true),
                state: Mutex::new(DivertState {
                    handle: DivertHandle::INVALID,
                    sessions: SessionTracker::default(),
                }),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Engine backed by the real WinDivert driver.
    #[cfg(windows)]
    pub fn windivert() -> Self {
        Self::new(Arc::new(super::driver::WinDivertDriver::new()))
    }

    /// Start injecting decoys for flows to `server_ip:server_port`.
    ///
    /// Any previous worker is drained first, so calling start while active is
    /// a clean restart. Returns false on empty IP, zero port, or when the
    /// driver binding cannot be loaded.
    pub fn start(&self, server_ip: &str, server_port: u16) -> bool {
        if server_ip.is_empty() || server_port == 0 {
            log::warn!("Rejecting start with empty IP or zero port");
            return false;
        }

        let mut worker_slot = self.worker.lock();
        self.stop_locked(&mut worker_slot);

        if let Err(e) = self.driver.ensure_loaded() {
            log::error!("Driver binding failed: {}", e);
            return false;
        }

        self.shared.stop.store(false, Ordering::SeqCst);

        log::info!(
            "Starting phantom injector for {}:{}",
            server_ip,
            server_port
        );
        let driver = Arc::clone(&self.driver);
        let shared = Arc::clone(&self.shared);
        let ip = server_ip.to_string();
        *worker_slot = Some(std::thread::spawn(move || {
            worker::run(driver, shared, ip, server_port);
        }));
        true
    }

    /// Stop the worker and release the driver handle. Safe to call at any
    /// time, from any thread, repeatedly; a no-op when nothing runs.
    pub fn stop(&self) {
        let mut worker_slot = self.worker.lock();
        self.stop_locked(&mut worker_slot);
    }

    fn stop_locked(&self, worker_slot: &mut Option<JoinHandle<()>>) {
        self.shared.stop.store(true, Ordering::SeqCst);

        // Snapshot the handle, then shut it down outside the state mutex to
        // unblock the worker's recv; the atomic alone cannot do that.
        let handle = self.shared.state.lock().handle;
        if handle.is_valid() {
            if let Err(e) = self.driver.shutdown(handle, DivertShutdown::Both) {
                log::warn!("shutdown failed: {}", e);
            }
        }

        if let Some(worker) = worker_slot.take() {
            let _ = worker.join();
        }

        let mut state = self.shared.state.lock();
        if state.handle.is_valid() {
            // Worker normally closes its own handle; this covers an exit path
            // that did not reach teardown.
            if let Err(e) = self.driver.close(state.handle) {
                log::warn!("close failed: {}", e);
            }
        }
        state.handle = DivertHandle::INVALID;
        state.sessions.clear();
    }

    /// Whether a worker is active (spawned and not asked to stop).
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some() && !self.shared.stop.load(Ordering::SeqCst)
    }

    /// Number of live tracked flows.
    pub fn active_sessions(&self) -> usize {
        self.shared.state.lock().sessions.len()
    }

    /// Whether a diversion handle is currently open.
    pub fn has_driver_handle(&self) -> bool {
        self.shared.state.lock().handle.is_valid()
    }
}

impl Drop for PhantomEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injector::driver::stub::StubDriver;
    use std::time::{Duration, Instant};

    fn engine_with_stub() -> (PhantomEngine, StubDriver) {
        let stub = StubDriver::new();
        (PhantomEngine::new(Arc::new(stub.clone())), stub)
    }

    fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn rejects_empty_ip_and_zero_port() {
        let (engine, stub) = engine_with_stub();
        assert!(!engine.start("", 443));
        assert!(!engine.start("10.0.0.1", 0));
        assert_eq!(stub.open_count(), 0);
    }

    #[test]
    fn start_opens_with_endpoint_filter() {
        let (engine, stub) = engine_with_stub();
        assert!(engine.start("10.0.0.1", 443));
        assert!(wait_until(Duration::from_secs(2), || stub.open_count() == 1));

        let open = &stub.opens()[0];
        assert_eq!(
            open.filter,
            "outbound and ip and tcp and tcp.DstPort == 443 and ip.DstAddr == 10.0.0.1"
        );
        assert_eq!(open.priority, 0);
        assert_eq!(open.flags, crate::injector::driver::DIVERT_FLAG_FRAGMENTS);
        engine.stop();
    }

    #[test]
    fn restart_drains_previous_worker() {
        let (engine, stub) = engine_with_stub();
        assert!(engine.start("10.0.0.1", 443));
        assert!(wait_until(Duration::from_secs(2), || stub.open_count() == 1));
        assert!(engine.start("10.0.0.2", 8443));
        assert!(wait_until(Duration::from_secs(2), || stub.open_count() == 2));

        // First handle was closed before the second opened.
        assert_eq!(stub.live_handle_count(), 1);
        engine.stop();
        assert_eq!(stub.live_handle_count(), 0);
    }

    #[test]
    fn open_failure_leaves_engine_stopped() {
        let (engine, stub) = engine_with_stub();
        stub.set_fail_open(true);
        // ensure_loaded succeeds, so start itself returns true; the worker
        // then observes the open failure and exits cleanly.
        assert!(engine.start("10.0.0.1", 443));
        assert!(wait_until(Duration::from_secs(2), || !engine.is_running()));
        engine.stop();
        assert!(!engine.has_driver_handle());
        assert_eq!(engine.active_sessions(), 0);
    }
}
