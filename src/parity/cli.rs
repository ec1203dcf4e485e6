//! PAR2 handler backed by the external `par2` binary (`par2cmdline`).

use super::parser::{ExitStatus, parse_par2_repair_output, parse_par2_verify_output};
use super::traits::{ParityCapabilities, ParityHandler, RepairResult, VerifyResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Shells out to `par2 v`/`par2 r` on whatever path it was built with.
/// `verify`/`repair` each run a single `par2` invocation to completion —
/// there is no incremental progress to report mid-command, which is why
/// `should_cancel_repair` in `par/mod.rs` has nothing to poll.
pub struct CliParityHandler {
    binary_path: PathBuf,
}

impl CliParityHandler {
    /// Use an explicit binary path, e.g. from a configured `par2_path`.
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Discover `par2` on `PATH`. `engine.rs` calls this at startup and
    /// falls back to [`NoOpParityHandler`](super::noop::NoOpParityHandler)
    /// if it returns `None`, so a missing binary degrades gracefully
    /// instead of failing engine construction.
    pub fn from_path() -> Option<Self> {
        which::which("par2").ok().map(Self::new)
    }
}

#[async_trait]
impl ParityHandler for CliParityHandler {
    async fn verify(&self, par2_file: &Path) -> crate::Result<VerifyResult> {
        let output = Command::new(&self.binary_path)
            .arg("v")
            .arg(par2_file)
            .output()
            .await
            .map_err(|e| crate::Error::Fatal(format!("failed to execute par2 v {}: {e}", par2_file.display())))?;

        parse_par2_verify_output(&output.stdout, &output.stderr, ExitStatus::from(output.status.success()))
    }

    async fn repair(&self, par2_file: &Path) -> crate::Result<RepairResult> {
        let output = Command::new(&self.binary_path)
            .arg("r")
            .arg(par2_file)
            .output()
            .await
            .map_err(|e| crate::Error::Fatal(format!("failed to execute par2 r {}: {e}", par2_file.display())))?;

        parse_par2_repair_output(&output.stdout, &output.stderr, ExitStatus::from(output.status.success()))
    }

    fn capabilities(&self) -> ParityCapabilities {
        ParityCapabilities {
            can_verify: true,
            can_repair: true,
        }
    }

    fn name(&self) -> &'static str {
        "cli-par2"
    }
}
