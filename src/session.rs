// src/session.rs
//
// Background compression requests over one source image, where a newer
// request supersedes every older one.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};

use crate::controller::{CompressionConfig, CompressionController, CompressionOutcome};
use crate::error::CompressionError;
use crate::matrix::MatrixBuffer;

/// Shared flag a running request polls between channels and phases.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// What a request reports back to its submitter.
#[derive(Debug, Clone)]
pub enum Delivery {
    /// Every channel succeeded and the result is now the session's latest.
    Completed(Arc<CompressionOutcome>),
    /// At least one channel failed. Not published.
    Partial(Arc<CompressionOutcome>),
    /// The request was rejected as a whole.
    Failed(CompressionError),
    /// A newer request exists; `generation` is the newest one at the time
    /// this request gave up.
    Superseded { generation: u64 },
}

/// Handle to one submitted request.
#[derive(Debug)]
pub struct RequestTicket {
    generation: u64,
    receiver: mpsc::Receiver<Delivery>,
}

impl RequestTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Blocks until the request reports.
    pub fn wait(self) -> Delivery {
        self.receiver
            .recv()
            .unwrap_or(Delivery::Failed(CompressionError::Cancelled))
    }

    /// Returns the delivery if the request has already reported.
    pub fn try_wait(&self) -> Option<Delivery> {
        match self.receiver.try_recv() {
            Ok(delivery) => Some(delivery),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => Some(Delivery::Failed(CompressionError::Cancelled)),
        }
    }
}

#[derive(Debug)]
struct Published {
    generation: u64,
    outcome: Arc<CompressionOutcome>,
}

/// Runs compression requests for a fixed set of source planes on the rayon
/// pool.
///
/// Each `submit` gets a new generation number and cancels the request in
/// flight. A result is published to [`latest`](Self::latest) only if it is
/// complete and still the newest generation when it finishes, so the
/// published result never goes backwards and a failed request leaves the
/// previous one in place.
pub struct CompressionSession {
    source: Arc<Vec<MatrixBuffer>>,
    controller: Arc<CompressionController>,
    newest_generation: Arc<AtomicU64>,
    in_flight: Mutex<Option<CancellationToken>>,
    latest: Arc<Mutex<Option<Published>>>,
}

impl CompressionSession {
    pub fn new(source: Vec<MatrixBuffer>, config: CompressionConfig) -> Self {
        Self {
            source: Arc::new(source),
            controller: Arc::new(CompressionController::new(config)),
            newest_generation: Arc::new(AtomicU64::new(0)),
            in_flight: Mutex::new(None),
            latest: Arc::new(Mutex::new(None)),
        }
    }

    pub fn source(&self) -> &[MatrixBuffer] {
        &self.source
    }

    pub fn controller(&self) -> &CompressionController {
        &self.controller
    }

    /// Starts a rank-`k` request in the background and supersedes any
    /// earlier one.
    pub fn submit(&self, k: i64) -> RequestTicket {
        let generation = self.newest_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        if let Some(previous) = lock(&self.in_flight).replace(token.clone()) {
            previous.cancel();
        }
        debug!("Submitting request generation {} at rank {}", generation, k);

        let (sender, receiver) = mpsc::channel();
        let source = Arc::clone(&self.source);
        let controller = Arc::clone(&self.controller);
        let newest_generation = Arc::clone(&self.newest_generation);
        let latest = Arc::clone(&self.latest);
        rayon::spawn(move || {
            let delivery = run_request(&controller, &source, k, generation, &token, &newest_generation, &latest);
            // The submitter may have dropped its ticket.
            let _ = sender.send(delivery);
        });

        RequestTicket { generation, receiver }
    }

    /// Cancels the request in flight, if any. Unless it has already
    /// published, its ticket reports `Superseded`.
    pub fn cancel(&self) {
        if let Some(token) = lock(&self.in_flight).take() {
            token.cancel();
        }
    }

    /// Most recent complete result.
    pub fn latest(&self) -> Option<Arc<CompressionOutcome>> {
        lock(&self.latest).as_ref().map(|p| Arc::clone(&p.outcome))
    }

    /// Generation of [`latest`](Self::latest).
    pub fn latest_generation(&self) -> Option<u64> {
        lock(&self.latest).as_ref().map(|p| p.generation)
    }
}

fn run_request(
    controller: &CompressionController,
    source: &[MatrixBuffer],
    k: i64,
    generation: u64,
    token: &CancellationToken,
    newest_generation: &AtomicU64,
    latest: &Mutex<Option<Published>>,
) -> Delivery {
    let outcome = match controller.compress_cancellable(source, k, token) {
        Ok(Some(outcome)) => Arc::new(outcome),
        Ok(None) => {
            return Delivery::Superseded {
                generation: newest_generation.load(Ordering::SeqCst),
            }
        }
        Err(e) => {
            warn!("Request generation {} rejected: {}", generation, e);
            return Delivery::Failed(e);
        }
    };
    if !outcome.is_complete() {
        warn!(
            "Request generation {} had failed channels {:?}; keeping previous result",
            generation,
            outcome.failed_channels()
        );
        return Delivery::Partial(outcome);
    }

    publish(outcome, generation, token, newest_generation, latest)
}

/// Stores a complete outcome as the session's latest result unless the
/// request was cancelled or a newer generation exists.
fn publish(
    outcome: Arc<CompressionOutcome>,
    generation: u64,
    token: &CancellationToken,
    newest_generation: &AtomicU64,
    latest: &Mutex<Option<Published>>,
) -> Delivery {
    // Checked under the lock so an older request can never overwrite a newer one.
    let mut slot = lock(latest);
    let newest = newest_generation.load(Ordering::SeqCst);
    if token.is_cancelled() || newest != generation {
        debug!(
            "Request generation {} finished after cancellation (newest {}); discarding",
            generation, newest
        );
        return Delivery::Superseded { generation: newest };
    }
    *slot = Some(Published {
        generation,
        outcome: Arc::clone(&outcome),
    });
    info!("Published request generation {} at rank {}", generation, outcome.effective_rank);
    Delivery::Completed(outcome)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
