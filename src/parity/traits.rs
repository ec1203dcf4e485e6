//! PAR2 handler trait and result types (§4.6 "PAR2 verification/repair").
//!
//! [`ParCoordinator::run`](crate::par::ParCoordinator::run) drives this
//! trait with a single `par2_file` path per NZB — the base `.par2` file
//! found in the NZB's destination directory — and never touches the
//! volume/source files directly; PAR2 tooling locates those itself by
//! scanning the same directory.

use async_trait::async_trait;
use std::path::Path;

/// Outcome of verifying one NZB's PAR2 set.
#[must_use]
#[derive(Debug, Clone)]
pub struct VerifyResult {
    /// `true` when every source file matched its PAR2 checksum.
    pub is_complete: bool,
    pub damaged_blocks: u32,
    pub recovery_blocks_available: u32,
    /// `true` when `recovery_blocks_available` covers `damaged_blocks`.
    /// `ParCoordinator::run` only reads this when `is_complete` is false.
    pub repairable: bool,
    pub damaged_files: Vec<String>,
    pub missing_files: Vec<String>,
}

/// Outcome of repairing one NZB's PAR2 set.
#[must_use]
#[derive(Debug, Clone)]
pub struct RepairResult {
    pub success: bool,
    pub repaired_files: Vec<String>,
    pub failed_files: Vec<String>,
    pub error: Option<String>,
}

/// What an implementation can do, surfaced to callers deciding whether to
/// even attempt a stage (not currently consulted by `ParCoordinator`,
/// which instead reacts to `Error::NotSupported` from a no-op handler —
/// kept as the honest capability query other callers, e.g. the RPC
/// surface, would need before this trait gained a third implementation).
#[derive(Debug, Clone, Copy)]
pub struct ParityCapabilities {
    pub can_verify: bool,
    pub can_repair: bool,
}

/// One PAR2 collection, one `.par2` file, one call. Implementations never
/// see the rest of an NZB's files or articles — `par/mod.rs` owns finding
/// the base file, copying in dupe sources, and deciding what to do with
/// the result.
#[async_trait]
pub trait ParityHandler: Send + Sync {
    /// Check `par2_file`'s collection against the files already sitting
    /// next to it on disk.
    ///
    /// # Errors
    ///
    /// `Error::NotSupported` if this handler has no working PAR2 backend
    /// (§4.6 graceful degradation); anything else is a real failure to
    /// run verification at all, not a verification result.
    async fn verify(&self, par2_file: &Path) -> crate::Result<VerifyResult>;

    /// Attempt to reconstruct damaged/missing source files from recovery
    /// blocks in `par2_file`'s collection. Only worth calling when a
    /// prior `verify` reported `repairable`.
    ///
    /// # Errors
    ///
    /// Same contract as [`verify`](Self::verify).
    async fn repair(&self, par2_file: &Path) -> crate::Result<RepairResult>;

    fn capabilities(&self) -> ParityCapabilities;

    /// Identifies the implementation in logs (`"cli-par2"`, `"noop"`).
    fn name(&self) -> &'static str;
}
