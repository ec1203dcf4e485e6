//! Stub handler for when no `par2` binary is configured or found in PATH.

use super::traits::{ParityCapabilities, ParityHandler, RepairResult, VerifyResult};
use async_trait::async_trait;
use std::path::Path;

/// `engine.rs` falls back to this when [`CliParityHandler::from_path`]
/// finds nothing, so PAR2-less setups can still complete a download;
/// `ParCoordinator::run` treats its `Error::NotSupported` as
/// [`ParStatus::Skipped`](crate::model::ParStatus::Skipped), not a failure.
///
/// [`CliParityHandler::from_path`]: super::cli::CliParityHandler::from_path
pub struct NoOpParityHandler;

#[async_trait]
impl ParityHandler for NoOpParityHandler {
    async fn verify(&self, _par2_file: &Path) -> crate::Result<VerifyResult> {
        Err(crate::Error::NotSupported(
            "PAR2 verification requires external par2 binary. \
             Configure par2_path in config or ensure par2 is in PATH."
                .into(),
        ))
    }

    async fn repair(&self, _par2_file: &Path) -> crate::Result<RepairResult> {
        Err(crate::Error::NotSupported(
            "PAR2 repair requires external par2 binary. \
             Configure par2_path in config or ensure par2 is in PATH."
                .into(),
        ))
    }

    fn capabilities(&self) -> ParityCapabilities {
        ParityCapabilities {
            can_verify: false,
            can_repair: false,
        }
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn verify_and_repair_both_report_not_supported() {
        let handler = NoOpParityHandler;
        assert!(matches!(
            handler.verify(Path::new("test.par2")).await,
            Err(crate::Error::NotSupported(_))
        ));
        assert!(matches!(
            handler.repair(Path::new("test.par2")).await,
            Err(crate::Error::NotSupported(_))
        ));
    }

    #[tokio::test]
    async fn capabilities_report_nothing_supported() {
        let handler = NoOpParityHandler;
        let caps = handler.capabilities();
        assert!(!caps.can_verify);
        assert!(!caps.can_repair);
        assert_eq!(handler.name(), "noop");
    }
}
