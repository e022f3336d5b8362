//! Queue session lifecycle
//!
//! A [`QueueSession`] owns one [`PacketQueue`] and walks it through
//! `Unbound -> Bound -> QueueCreated -> Looping -> StopRequested -> Stopped
//! -> Destroyed`. Operations called out of order fail with
//! [`PlatformError::InvalidState`].

use crate::error::{PlatformError, Result};
use crate::traits::{AddressFamily, PacketQueue, QueueMessage, QueueParams};
use crate::verdict::PendingVerdict;
use nfmangle_core::config::QueueConfig;
use nfmangle_core::{Engine, RawPacket};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, trace, warn};

/// Receive failures in a row after which a worker gives up
const MAX_CONSECUTIVE_ERRORS: u32 = 16;

/// Lifecycle state of a [`QueueSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Nothing registered with the kernel
    Unbound,
    /// Protocol family bound
    Bound,
    /// Queue attached and configured
    QueueCreated,
    /// Workers receiving packets
    Looping,
    /// Stop requested, workers finishing their current packet
    StopRequested,
    /// All workers finished, every verdict issued
    Stopped,
    /// Queue detached and handle released
    Destroyed,
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unbound => "Unbound",
            Self::Bound => "Bound",
            Self::QueueCreated => "QueueCreated",
            Self::Looping => "Looping",
            Self::StopRequested => "StopRequested",
            Self::Stopped => "Stopped",
            Self::Destroyed => "Destroyed",
        };
        f.write_str(name)
    }
}

/// Session parameters, owned by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Protocol family to bind
    pub family: AddressFamily,
    /// Queue number the firewall rule targets
    pub queue_num: u16,
    /// Copy parameters
    pub params: QueueParams,
    /// Worker threads
    pub workers: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            family: AddressFamily::Inet,
            queue_num: 0,
            params: QueueParams::default(),
            workers: 1,
        }
    }
}

impl From<&QueueConfig> for SessionConfig {
    fn from(config: &QueueConfig) -> Self {
        Self {
            family: AddressFamily::Inet,
            queue_num: config.num,
            params: QueueParams::from(config),
            workers: config.workers.max(1),
        }
    }
}

/// Snapshot of session counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    /// Messages received from the queue
    pub messages_received: u64,
    /// Verdicts delivered
    pub verdicts_issued: u64,
    /// Verdicts the queue refused
    pub verdict_failures: u64,
    /// Failed receive calls
    pub receive_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    messages_received: AtomicU64,
    verdicts_issued: AtomicU64,
    verdict_failures: AtomicU64,
    receive_errors: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> SessionStats {
        SessionStats {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            verdicts_issued: self.verdicts_issued.load(Ordering::Relaxed),
            verdict_failures: self.verdict_failures.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
        }
    }
}

/// State shared with [`StopHandle`]s
struct Shared {
    state: Mutex<QueueState>,
    stop: AtomicBool,
    in_flight: AtomicUsize,
}

/// Requests a running session to stop
///
/// Cheap to clone and safe to call from a signal handler thread.
#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    /// Ask the workers to stop after their current packet
    ///
    /// Returns `true` for the first request; later calls do nothing.
    pub fn request_stop(&self) -> bool {
        if self.shared.stop.swap(true, Ordering::SeqCst) {
            return false;
        }
        let mut state = self.shared.state.lock();
        if *state == QueueState::Looping {
            *state = QueueState::StopRequested;
        }
        info!(state = %*state, "Stop requested");
        true
    }

    /// Whether a stop was requested
    pub fn is_stop_requested(&self) -> bool {
        self.shared.stop.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopHandle")
            .field("stop_requested", &self.is_stop_requested())
            .finish()
    }
}

/// Marks one packet as in flight until dropped
struct InFlight<'a> {
    shared: &'a Shared,
}

impl<'a> InFlight<'a> {
    fn enter(shared: &'a Shared) -> Self {
        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        Self { shared }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One queue binding driven through its lifecycle
pub struct QueueSession<Q: PacketQueue> {
    queue: Q,
    config: SessionConfig,
    shared: Arc<Shared>,
    counters: Counters,
}

impl<Q: PacketQueue> QueueSession<Q> {
    /// Wrap an opened queue; nothing is registered yet
    pub fn new(queue: Q, config: SessionConfig) -> Self {
        Self {
            queue,
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::Unbound),
                stop: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
            }),
            counters: Counters::default(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> QueueState {
        *self.shared.state.lock()
    }

    /// Session parameters
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The underlying queue
    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Handle for requesting a stop from another thread
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Counter snapshot
    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot()
    }

    /// Packets received but still waiting for their verdict
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Reset and bind the protocol family
    pub fn bind(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        expect_state(*state, QueueState::Unbound, "bind")?;

        let family = self.config.family;
        self.queue.unbind(family)?;
        self.queue.bind(family)?;

        *state = QueueState::Bound;
        info!(%family, state = %*state, "Protocol family bound");
        Ok(())
    }

    /// Attach to the configured queue number
    pub fn create_queue(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        expect_state(*state, QueueState::Bound, "create queue")?;

        self.queue
            .create_queue(self.config.queue_num, &self.config.params)?;

        *state = QueueState::QueueCreated;
        info!(queue = self.config.queue_num, state = %*state, "Queue created");
        Ok(())
    }

    /// [`bind`](Self::bind) then [`create_queue`](Self::create_queue)
    pub fn open(&self) -> Result<()> {
        self.bind()?;
        self.create_queue()
    }

    /// Receive packets and issue verdicts until a stop is requested
    ///
    /// Blocks the calling thread. Workers only check for a stop between
    /// packets, so joining them is what drains the session: once every
    /// worker has returned, every received packet has had its verdict and
    /// the session is `Stopped`. A worker that keeps failing to receive
    /// stops the whole session and its error is returned.
    pub fn run(&self, engine: &Engine) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            expect_state(*state, QueueState::QueueCreated, "run")?;
            *state = if self.shared.stop.load(Ordering::SeqCst) {
                QueueState::StopRequested
            } else {
                QueueState::Looping
            };
            info!(
                queue = self.config.queue_num,
                workers = self.config.workers,
                state = %*state,
                "Processing packets"
            );
        }

        let workers = self.config.workers.max(1);
        let mut first_error = None;

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for index in 0..workers {
                let spawned = thread::Builder::new()
                    .name(format!("nfmangle-worker-{index}"))
                    .spawn_scoped(scope, move || self.worker(index, engine));
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        error!(worker = index, error = %e, "Failed to spawn worker");
                        self.stop_handle().request_stop();
                        first_error.get_or_insert(PlatformError::Io(e));
                        break;
                    }
                }
            }

            for (index, handle) in handles.into_iter().enumerate() {
                let result = handle.join().unwrap_or_else(|_| {
                    Err(PlatformError::Receive(format!("worker {index} panicked")))
                });
                if let Err(e) = result {
                    first_error.get_or_insert(e);
                }
            }
        });

        let mut state = self.shared.state.lock();
        *state = QueueState::Stopped;
        let stats = self.stats();
        info!(
            state = %*state,
            received = stats.messages_received,
            issued = stats.verdicts_issued,
            failed = stats.verdict_failures,
            "Packet processing stopped"
        );
        drop(state);

        first_error.map_or(Ok(()), Err)
    }

    /// Detach from the queue and release the handle
    ///
    /// Both steps are attempted; the first failure is returned after the
    /// session reached `Destroyed`.
    pub fn shutdown(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        match *state {
            QueueState::Looping | QueueState::StopRequested | QueueState::Destroyed => {
                return Err(PlatformError::invalid_state("shut down", *state));
            }
            QueueState::Unbound
            | QueueState::Bound
            | QueueState::QueueCreated
            | QueueState::Stopped => {}
        }

        let mut first_error = None;
        if matches!(*state, QueueState::QueueCreated | QueueState::Stopped) {
            if let Err(e) = self.queue.destroy_queue() {
                warn!(error = %e, "Failed to destroy queue");
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.queue.close() {
            warn!(error = %e, "Failed to close queue handle");
            first_error.get_or_insert(e);
        }

        *state = QueueState::Destroyed;
        info!(state = %*state, "Queue session closed");
        first_error.map_or(Ok(()), Err)
    }

    fn worker(&self, index: usize, engine: &Engine) -> Result<()> {
        debug!(worker = index, "Worker started");
        let mut consecutive_errors = 0;

        while !self.shared.stop.load(Ordering::Acquire) {
            match self.queue.recv() {
                Ok(Some(message)) => {
                    consecutive_errors = 0;
                    self.handle(message, engine);
                }
                Ok(None) => {}
                Err(e) => {
                    self.counters.receive_errors.fetch_add(1, Ordering::Relaxed);
                    consecutive_errors += 1;
                    warn!(worker = index, error = %e, "Receive failed");
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        error!(worker = index, "Too many receive failures, stopping");
                        self.stop_handle().request_stop();
                        return Err(e);
                    }
                }
            }
        }

        debug!(worker = index, "Worker finished");
        Ok(())
    }

    fn handle(&self, message: QueueMessage, engine: &Engine) {
        let _in_flight = InFlight::enter(&self.shared);
        self.counters
            .messages_received
            .fetch_add(1, Ordering::Relaxed);

        let QueueMessage {
            id,
            hw_protocol,
            hook,
            mark,
            payload,
        } = message;
        trace!(
            id,
            hw_protocol = format_args!("{hw_protocol:#06x}"),
            hook,
            mark,
            len = payload.len(),
            "Packet received"
        );
        let pending = PendingVerdict::new(&self.queue, id, payload.clone());
        let verdict = engine.process(&RawPacket::new(id, payload));

        match pending.issue(verdict) {
            Ok(()) => {
                self.counters.verdicts_issued.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters
                    .verdict_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(id, error = %e, "Verdict delivery failed");
            }
        }
    }
}

impl<Q: PacketQueue> fmt::Debug for QueueSession<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueSession")
            .field("state", &self.state())
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn expect_state(current: QueueState, expected: QueueState, operation: &'static str) -> Result<()> {
    if current == expected {
        Ok(())
    } else {
        Err(PlatformError::invalid_state(operation, current))
    }
}
