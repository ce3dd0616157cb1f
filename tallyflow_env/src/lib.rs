//! TallyFlow Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the TallyFlow engines
//! to run in both **Production** (tokio + HTTP) and **Simulation** (seeded, in-memory)
//! environments.
//!
//! # Core Concept
//!
//! Every source of non-determinism the election engines touch is intercepted:
//! - Time (`now()`, `system_time()`, `sleep()`)
//! - Transport (`VoteSink::send()`, `Aggregator::submit()`)
//! - Randomness (`derive_rng()`)
//!
//! By deriving all entropy from a single 64-bit seed, any simulated election
//! becomes reproducible via its seed number.
//!
//! # Example
//!
//! ```ignore
//! use tallyflow_env::{ElectionContext, VoteSink};
//!
//! async fn drain<Ctx: ElectionContext, S: VoteSink>(ctx: &Ctx, sink: &S, batch: Batch) {
//!     while sink.send(&batch).await.is_err() {
//!         ctx.sleep(Duration::from_secs(1)).await;
//!     }
//! }
//! ```

mod context;
mod transport;
mod types;
mod error;
mod tokio_impl;
mod http_impl;

pub use context::ElectionContext;
pub use transport::{Aggregator, FaultController, VoteSink};
pub use types::{
    AggregationAck, AggregationSubmission, Batch, NodeId, VoteEvent, VOTE_VALUE,
};
pub use error::TransportError;
pub use tokio_impl::TokioContext;
pub use http_impl::{HttpAggregator, HttpSink};
