//! Core of a naming-based publish/subscribe synchronization protocol: IBLT-backed set
//! reconciliation, a Bloom-filter subscription layer, and the full-sync / partial-sync
//! engines built on top of them.
//!
//! The transport that carries named requests and responses, and the scheduler that defers
//! tasks, are abstracted behind [`transport::Transport`] and [`scheduler::Scheduler`] so
//! this crate never touches sockets directly.

pub mod bloom;
pub mod bounded;
pub mod config;
pub mod error;
pub mod full;
pub mod hash;
pub mod iblt;
pub mod jitter;
pub mod name;
pub mod partial;
pub mod pending;
pub mod scheduler;
pub mod state;
pub mod transport;
pub mod wire;

pub use config::{FullSyncConfig, PartialSyncConsumerConfig, PartialSyncProducerConfig};
pub use error::{NamesyncError, Result};
pub use full::FullSyncEngine;
pub use name::Name;
pub use partial::{PartialSyncConsumer, PartialSyncProducer};
pub use state::MissingData;
