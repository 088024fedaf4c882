//! Traffic Simulation Environment Abstraction Layer
//!
//! This crate provides the seams that let the orchestrator and workers run
//! against either **Production** backends (tokio clock, local filesystem
//! store, an external queue service) or the **Simulation** backends in
//! `traffic_sim` (virtual clock, in-memory broker).
//!
//! # Core Concept: Processes Share Nothing
//!
//! Every cross-process interaction goes through one of two collaborators:
//! - A [`MessageChannel`]: named at-least-once queues, delete-to-ack
//! - A [`BlobStore`]: bulk payloads referenced by a [`BlobRef`]
//!
//! Time and entropy come from a [`TrafficContext`], so a seeded run is
//! reproducible end to end.
//!
//! # Example
//!
//! ```ignore
//! use traffic_env::{MessageChannel, OutgoingMessage, TrafficContext};
//!
//! async fn pump<Ctx: TrafficContext, Ch: MessageChannel>(ctx: &Ctx, ch: &Ch) {
//!     loop {
//!         for msg in ch.receive("ticks", 10, Duration::from_secs(1)).await? {
//!             handle(&msg.payload);
//!             ch.delete("ticks", &msg.handle).await?;
//!         }
//!         ctx.sleep(Duration::from_millis(100)).await;
//!     }
//! }
//! ```

mod blob;
mod channel;
mod context;
mod error;
mod local_store;
mod tokio_impl;
mod types;

pub use blob::{validate_blob_name, BlobStore};
pub use channel::{BatchReport, ChunkFailure, MessageChannel, DEFAULT_MAX_BATCH_SIZE};
pub use context::{mix_seed, TrafficContext};
pub use error::EnvError;
pub use local_store::LocalBlobStore;
pub use tokio_impl::TokioContext;
pub use types::{BlobRef, MessageId, OutgoingMessage, ReceiptHandle, ReceivedMessage};
