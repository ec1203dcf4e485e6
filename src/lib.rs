//! # nzb-engine
//!
//! NZB-based Usenet download engine: queue, article scheduler, PAR2
//! repair, and queue-script coordination behind one embeddable handle.
//!
//! ## Design Philosophy
//!
//! - **Highly configurable** - almost every behavior can be customized
//! - **Library-first** - no CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use nzb_engine::{Engine, EngineConfig, run_with_shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::default();
//!     let engine = Engine::new(config).await?;
//!
//!     // Subscribe to events
//!     let mut events = engine.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     // Run until a termination signal arrives
//!     run_with_shutdown(engine).await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Article Scheduler (C4): selects the next (file, article, connection) triple to dispatch
pub mod scheduler;
/// Configuration types
pub mod config;
/// Streaming yEnc/UU article decoder with CRC verification
pub mod decoder;
/// Engine context & wiring (C9): owns C2-C8, drives the event bus, exposes the public API
pub mod engine;
/// Error types
pub mod error;
/// Typed queue model: NzbInfo/FileInfo/ArticleInfo/HistoryInfo/NewsServer and their ids
pub mod model;
/// NZB manifest ingestion (C10): parses NZB XML into the queue model
pub mod nzb_parse;
/// PAR Coordinator (C6): drives PAR2 verify/repair and requests more volumes on a block deficit
pub mod par;
/// PAR2 parity handling
pub mod parity;
/// Atomic snapshot persistence (C8): versioned, line-oriented on-disk queue state
pub mod persistence;
/// The download queue lock and its edit vocabulary
pub mod queue;
/// Queue-Script Coordinator (C7): serialized, event-coalescing execution of operator scripts
pub mod queue_script;
/// Retry logic with exponential backoff
pub mod retry;
/// RPC frame contract (C11): typed encode/decode plus an in-process dispatcher
pub mod rpc;
/// Per-server connection accounting, level/group fallback, quarantine backoff
pub mod server_pool;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;
/// Article downloader worker (C5): fetch + decode one article per connection
pub mod worker;

// Re-export commonly used types
pub use config::{CategoryConfig, EngineConfig, FileCollisionAction, RetryConfig, ServerConfig};
pub use engine::{run_with_shutdown, Engine};
pub use error::{Error, IsRetryable, Result};
pub use parity::{
    CliParityHandler, NoOpParityHandler, ParityCapabilities, ParityHandler, RepairResult,
    VerifyResult,
};
pub use queue::{DownloadQueue, EditAction, EditError};
pub use types::Event;
