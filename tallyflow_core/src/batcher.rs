//! Micro-batcher - groups admitted votes into batches.
//!
//! # Architecture
//!
//! ```text
//! producers ──► add(event) ──► buffer ──┬── size reached ──► flush(Size)
//!                                       └── flush timer ───► flush(Timer)
//!
//! flush: [lock] swap buffer -> Batch, reschedule timer [unlock]
//!        send(batch) with timeout ──► Ok: delivered
//!                                 └─► Err: RetryStore::persist(batch)
//! ```
//!
//! The network send always happens after the swap lock is released, so
//! producers never wait on the sink.

use crate::error::PipelineError;
use crate::metrics::{FlushReason, PipelineStats};
use crate::retry_store::{send_with_timeout, RetryStore};
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tallyflow_env::{Batch, ElectionContext, NodeId, VoteEvent, VoteSink};
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Configuration for the micro-batcher.
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Maximum events per batch before a forced flush
    pub max_batch_size: usize,
    
    /// Maximum time a buffered event waits for a flush
    pub flush_interval: Duration,
    
    /// Upper bound on one send to the sink
    pub send_timeout: Duration,
    
    /// Source node stamped on every batch
    pub source_node_id: NodeId,
}

impl From<&crate::config::PipelineConfig> for BatcherConfig {
    fn from(config: &crate::config::PipelineConfig) -> Self {
        Self {
            max_batch_size: config.max_batch_size.max(1),
            flush_interval: config.flush_interval,
            send_timeout: config.send_timeout,
            source_node_id: config.source_node_id.clone(),
        }
    }
}

/// What a flush did with the buffer.
#[derive(Debug)]
pub enum FlushOutcome {
    /// Buffer was empty; only the timer was rescheduled
    Empty,
    /// The sink acknowledged the batch
    Delivered { batch_id: String, events: usize },
    /// Delivery failed and the batch is now in the retry log
    Persisted { batch_id: String, events: usize, cause: PipelineError },
}

struct BatcherState {
    buffer: Vec<VoteEvent>,
    deadline: Instant,
}

/// Concurrency-safe vote accumulator.
pub struct MicroBatcher<S: VoteSink + ?Sized> {
    config: BatcherConfig,
    state: Mutex<BatcherState>,
    sink: Arc<S>,
    retry: Arc<RetryStore>,
    stats: Arc<PipelineStats>,
    rescheduled: Notify,
    stop: watch::Sender<bool>,
}

impl<S: VoteSink + ?Sized> MicroBatcher<S> {
    pub fn new(
        config: BatcherConfig,
        sink: Arc<S>,
        retry: Arc<RetryStore>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let deadline = Instant::now() + config.flush_interval;
        let (stop, _) = watch::channel(false);
        Self {
            config,
            state: Mutex::new(BatcherState {
                buffer: Vec::new(),
                deadline,
            }),
            sink,
            retry,
            stats,
            rescheduled: Notify::new(),
            stop,
        }
    }
    
    /// Number of events waiting for the next flush.
    pub fn buffered(&self) -> usize {
        self.lock_state().buffer.len()
    }
    
    /// Appends one event. Flushes immediately when the buffer is full.
    pub async fn add(&self, event: VoteEvent) -> Result<Option<FlushOutcome>, PipelineError> {
        let full = {
            let mut state = self.lock_state();
            state.buffer.push(event);
            state.buffer.len() >= self.config.max_batch_size
        };
        
        if full {
            self.flush(FlushReason::Size).await.map(Some)
        } else {
            Ok(None)
        }
    }
    
    /// Swaps out the buffer and delivers it.
    ///
    /// # Errors
    /// Only `PersistenceFailure`: the batch could neither be delivered nor
    /// written to the retry log.
    pub async fn flush(&self, reason: FlushReason) -> Result<FlushOutcome, PipelineError> {
        let batch = {
            let mut state = self.lock_state();
            state.deadline = Instant::now() + self.config.flush_interval;
            if state.buffer.is_empty() {
                None
            } else {
                let events = mem::take(&mut state.buffer);
                Some(Batch::new(self.config.source_node_id.clone(), events))
            }
        };
        self.rescheduled.notify_one();
        
        let Some(batch) = batch else {
            return Ok(FlushOutcome::Empty);
        };
        
        self.stats.record_flush(reason);
        let batch_id = batch.batch_id.clone();
        let events = batch.len();
        debug!("Flushing batch {} ({} events, reason: {})", batch_id, events, reason.as_str());
        
        match send_with_timeout(self.sink.as_ref(), &batch, self.config.send_timeout).await {
            Ok(()) => {
                self.stats.record_delivery(events);
                Ok(FlushOutcome::Delivered { batch_id, events })
            }
            Err(e) => {
                let cause = PipelineError::from_transport(&batch_id, e);
                warn!("Delivery to {} failed, persisting for retry: {}", self.sink.name(), cause);
                self.retry.persist(batch).await?;
                Ok(FlushOutcome::Persisted { batch_id, events, cause })
            }
        }
    }
    
    /// Cancels the flush timer and flushes whatever remains.
    ///
    /// A failed final delivery is persisted like any other.
    pub async fn shutdown(&self) -> Result<FlushOutcome, PipelineError> {
        let _ = self.stop.send(true);
        self.flush(FlushReason::Shutdown).await
    }
    
    fn lock_state(&self) -> MutexGuard<'_, BatcherState> {
        // The state is a plain buffer; a panicked holder cannot leave it torn
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
    
    fn deadline(&self) -> Instant {
        self.lock_state().deadline
    }
}

impl<S: VoteSink + ?Sized> MicroBatcher<S> {
    /// Starts the flush timer on the context's executor.
    ///
    /// The timer fires `flush_interval` after the most recent flush of any
    /// kind and stops at `shutdown`.
    pub fn start_timer<Ctx: ElectionContext>(self: &Arc<Self>, ctx: &Ctx) {
        let batcher = Arc::clone(self);
        let mut stop = self.stop.subscribe();
        
        ctx.spawn("flush-timer", async move {
            loop {
                if *stop.borrow() {
                    break;
                }
                let deadline = batcher.deadline();
                
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {
                        if batcher.deadline() > Instant::now() {
                            // A size flush moved the deadline while we slept
                            continue;
                        }
                        if let Err(e) = batcher.flush(FlushReason::Timer).await {
                            warn!("Timer flush failed: {}", e);
                        }
                    }
                    _ = batcher.rescheduled.notified() => {}
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Flush timer stopped");
        });
    }
    
    /// True once `shutdown` has been called.
    pub fn is_shut_down(&self) -> bool {
        *self.stop.borrow()
    }
    
    /// Shared counters.
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }
}
