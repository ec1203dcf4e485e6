//! PAR2 verification/repair (§4.6), behind a trait so `par/mod.rs` doesn't
//! care whether a real `par2` binary is available.
//!
//! [`CliParityHandler`] shells out to `par2cmdline`; [`NoOpParityHandler`]
//! answers `Error::NotSupported` when `engine.rs` couldn't find a binary
//! on `PATH`, letting a PAR2-less setup still finish a download as
//! [`ParStatus::Skipped`](crate::model::ParStatus::Skipped) instead of
//! failing outright.

mod cli;
mod noop;
mod parser;
mod traits;

pub use cli::CliParityHandler;
pub use noop::NoOpParityHandler;
pub use traits::{ParityCapabilities, ParityHandler, RepairResult, VerifyResult};
