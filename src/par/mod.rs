//! PAR Coordinator (C6): drives PAR2 verification/repair for a completed
//! NZB. When verification reports an unrepairable block deficit it first
//! tries to cover it by unpausing more PAR2 volumes from the same
//! collection (re-invoked once those land, via the engine's
//! FileCompleted hook), then falls back to a history dupe's destination
//! directory as a supplemental source before giving up (§4.6).
//!
//! [`should_cancel_repair`] implements the repair-timeout extrapolation
//! from the same section but is not wired into [`ParCoordinator::run`] —
//! see DESIGN.md. The PAR2 math itself never appears here — it stays
//! behind [`crate::parity::ParityHandler`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex as AsyncMutex;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{FileId, HistoryInfo, NzbId, ParStatus};
use crate::parity::{ParityHandler, RepairResult, VerifyResult};
use crate::queue::{DownloadQueue, QueueState};
use crate::{log_failure, log_transition};

/// Stage of the PAR2 post-processing state machine for one NZB.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Queued,
    LoadingPars,
    VerifyingSources,
    Repairing,
    VerifyingRepaired,
    Done,
}

/// Ephemeral progress record for one NZB's PAR run, kept outside the
/// queue lock the same way the scheduler keeps `ActiveDownload` — this is
/// progress-reporting state, not data that needs a snapshot.
#[derive(Clone, Debug)]
pub struct PostInfo {
    pub stage: Stage,
    pub progress_label: String,
    pub file_progress: u32,
    pub stage_progress: u32,
    pub start_time: Instant,
    pub stage_time: Instant,
}

impl PostInfo {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            stage: Stage::Queued,
            progress_label: String::new(),
            file_progress: 0,
            stage_progress: 0,
            start_time: now,
            stage_time: now,
        }
    }
}

/// One PAR2 volume candidate gathered by [`find_pars`], carrying just
/// enough to unpause it and account for its recovery blocks.
#[derive(Clone, Copy, Debug)]
struct BlockInfo {
    file_id: FileId,
    block_count: u32,
}

/// Parse a PAR2 filename into its collection base name (lowercased) and
/// the recovery-block count it carries.
///
/// Recognizes `name.par2` (the index volume, 0 blocks) and
/// `name.volNNN+MMM.par2` (a recovery volume carrying `MMM` blocks). No
/// `ParParser`-equivalent source was retrieved for this crate's pack, so
/// this follows the naming convention PAR2 tooling universally produces
/// rather than transliterating a missing original.
pub fn parse_par_filename(filename: &str) -> Option<(String, u32)> {
    let lower = filename.to_lowercase();
    let stem = lower.strip_suffix(".par2")?;
    match stem.rfind(".vol") {
        Some(vol_idx) => {
            let vol_part = &stem[vol_idx + 4..];
            let block_count: u32 = vol_part.rsplit('+').next()?.parse().ok()?;
            Some((stem[..vol_idx].to_string(), block_count))
        }
        None => Some((stem.to_string(), 0)),
    }
}

/// Whether two filenames belong to the same PAR2 collection (same base
/// name once the `.volNNN+MMM.par2`/`.par2` suffix is stripped).
pub fn same_par_collection(a: &str, b: &str) -> bool {
    match (parse_par_filename(a), parse_par_filename(b)) {
        (Some((ba, _)), Some((bb, _))) => ba == bb,
        _ => false,
    }
}

/// One pass of `FindPars`: collect PAR2 volumes belonging to `nzb_id`
/// matching `par_filename`'s collection at the given strictness, skipping
/// any file id already present in `blocks`. Returns the blocks found in
/// this pass (already added to `blocks`).
fn find_pars(
    state: &QueueState,
    nzb_id: NzbId,
    par_filename: &str,
    strict: bool,
    exact: bool,
    blocks: &mut Vec<BlockInfo>,
) -> i64 {
    let Some((base, _)) = parse_par_filename(par_filename) else {
        return 0;
    };
    let mut found = 0i64;
    for file in state.files_of(nzb_id) {
        let Some((_, block_count)) = parse_par_filename(&file.filename) else {
            continue;
        };
        if block_count == 0 {
            continue;
        }
        let lower = file.filename.to_lowercase();
        let use_file = if exact {
            same_par_collection(&file.filename, par_filename)
        } else if strict {
            lower.contains(&format!("{base}.par2")) || lower.contains(&format!("{base}.vol"))
        } else {
            true
        };
        if use_file && !blocks.iter().any(|b| b.file_id == file.id) {
            blocks.push(BlockInfo { file_id: file.id, block_count });
            found += i64::from(block_count);
        }
    }
    found
}

/// Unpause a PAR2 volume for recovery, bumping it above its NZB's
/// nominal priority band (§4.4 step 3's "extra-priority" flag) — a no-op
/// if it is already unpaused.
fn unpause_for_recovery(state: &mut QueueState, file_id: FileId) {
    if let Some(file) = state.file_mut(file_id)
        && file.paused
    {
        file.paused = false;
        file.extra_priority = true;
    }
}

/// `RequestMorePars`: given a block deficit, widen the search across three
/// passes of increasing looseness, then unpause volumes to cover it.
/// Returns `(ok, blocks_found)` where `ok` is true once the deficit is
/// covered or at least one PAR2 file is already in flight — so the
/// checker blocks on download rather than failing outright (§4.6).
pub async fn request_more_pars(
    queue: &DownloadQueue,
    nzb_id: NzbId,
    par_filename: &str,
    mut block_needed: i64,
) -> (bool, i64) {
    let mut guard = queue.lock().await;

    let mut blocks = Vec::new();
    let mut block_found = find_pars(&guard, nzb_id, par_filename, true, true, &mut blocks);
    if block_found < block_needed {
        block_found += find_pars(&guard, nzb_id, par_filename, true, false, &mut blocks);
    }
    if block_found < block_needed {
        block_found += find_pars(&guard, nzb_id, par_filename, false, false, &mut blocks);
    }

    if block_found >= block_needed {
        // Phase 1 (exact fit): repeatedly take the largest block ≤ what's left.
        while block_needed > 0 {
            let best = blocks
                .iter()
                .enumerate()
                .filter(|(_, b)| i64::from(b.block_count) <= block_needed)
                .max_by_key(|(_, b)| b.block_count)
                .map(|(i, _)| i);
            let Some(idx) = best else { break };
            let block = blocks.remove(idx);
            unpause_for_recovery(&mut guard, block.file_id);
            block_needed -= i64::from(block.block_count);
        }
        // Phase 2 (overshoot): if still short, take from the front regardless of size.
        while block_needed > 0 && !blocks.is_empty() {
            let block = blocks.remove(0);
            unpause_for_recovery(&mut guard, block.file_id);
            block_needed -= i64::from(block.block_count);
        }
    }

    let has_unpaused_par_files = guard.files_of(nzb_id).iter().any(|f| f.par_file && !f.paused);
    guard.mark_dirty();
    drop(guard);

    (block_needed <= 0 || has_unpaused_par_files, block_found)
}

/// Whether repair should be cancelled given how long it has run.
///
/// Reproduces the original's extrapolation verbatim: after the first 5
/// minutes (or 1 minute when `par_time_limit_min <= 5`) of repairing have
/// elapsed, project total repair time linearly from stage progress and
/// cancel if that projection exceeds the configured limit. `0` disables
/// the check.
pub fn should_cancel_repair(
    par_time_limit_min: u32,
    elapsed_since_stage_start_secs: u64,
    elapsed_since_overall_start_secs: u64,
    stage_progress_permille: u32,
) -> bool {
    if par_time_limit_min == 0 {
        return false;
    }
    let grace = if par_time_limit_min > 5 { 5 * 60 } else { 60 };
    if elapsed_since_stage_start_secs <= grace {
        return false;
    }
    let progress = u64::from(stage_progress_permille.max(1));
    let estimated_total_secs = elapsed_since_overall_start_secs * 1000 / progress;
    estimated_total_secs > u64::from(par_time_limit_min) * 60
}

/// Whether two file sizes are within `max_diff_percent` of each other —
/// `DupeMatcher::SizeDiffOK`, used when offering a history dupe's output
/// as a supplemental PAR source.
pub fn size_diff_ok(size1: u64, size2: u64, max_diff_percent: u32) -> bool {
    if size1 == size2 {
        return true;
    }
    let (larger, smaller) = if size1 > size2 { (size1, size2) } else { (size2, size1) };
    if larger == 0 {
        return true;
    }
    let diff_percent = (larger - smaller) * 100 / larger;
    diff_percent <= u64::from(max_diff_percent)
}

/// The largest regular file directly inside `dir`, used as the dupe's
/// stand-in for "the file we're trying to recover" — `DupeMatcher`
/// matches by largest-file-in-directory plus size tolerance, never by
/// content hash.
pub fn find_largest_file(dir: &Path) -> std::io::Result<Option<(PathBuf, u64)>> {
    let mut best: Option<(PathBuf, u64)> = None;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_file() && best.as_ref().is_none_or(|(_, s)| meta.len() > *s) {
            best = Some((entry.path(), meta.len()));
        }
    }
    Ok(best)
}

/// Find a history NZB sharing `dupe_key` whose destination directory
/// holds a file close enough in size to stand in as a supplemental PAR
/// source, excluding `exclude_nzb_id` itself.
pub fn find_dupe_source<'h>(
    history: &'h [HistoryInfo],
    dupe_key: &str,
    expected_size: u64,
    max_diff_percent: u32,
    exclude_nzb_id: NzbId,
) -> Option<(&'h HistoryInfo, PathBuf)> {
    history.iter().find_map(|h| {
        if h.nzb.id == exclude_nzb_id || h.nzb.dupe_key != dupe_key {
            return None;
        }
        let (path, size) = find_largest_file(&h.nzb.destination_dir).ok()??;
        size_diff_ok(expected_size, size, max_diff_percent).then_some((h, path))
    })
}

/// Recursively find PAR2 files in a directory, base volumes before
/// recovery volumes.
async fn find_par2_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.metadata().await?.is_file()
            && path.extension().is_some_and(|e| e.eq_ignore_ascii_case("par2"))
        {
            files.push(path);
        }
    }
    files.sort_by_key(|p| {
        p.file_name()
            .and_then(|n| n.to_str())
            .map(|s| s.to_lowercase().contains(".vol"))
            .unwrap_or(false)
    });
    Ok(files)
}

/// Drives the PAR2 stage for one NZB: load → verify → repair (if
/// damaged and repairable) → verify again, recording [`ParStatus`] on the
/// NzbInfo under the queue lock at each terminal point.
pub struct ParCoordinator {
    queue: DownloadQueue,
    parity: Arc<dyn ParityHandler>,
    par_time_limit_min: u32,
    dupe_size_tolerance_percent: u32,
    posts: AsyncMutex<HashMap<NzbId, PostInfo>>,
}

impl ParCoordinator {
    pub fn new(
        queue: DownloadQueue,
        parity: Arc<dyn ParityHandler>,
        par_time_limit_min: u32,
        dupe_size_tolerance_percent: u32,
    ) -> Self {
        Self {
            queue,
            parity,
            par_time_limit_min,
            dupe_size_tolerance_percent,
            posts: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Current stage/progress for an NZB's PAR run, if one is underway.
    pub async fn post_info(&self, nzb_id: NzbId) -> Option<PostInfo> {
        self.posts.lock().await.get(&nzb_id).cloned()
    }

    async fn set_stage(&self, nzb_id: NzbId, stage: Stage) {
        let mut posts = self.posts.lock().await;
        let post = posts.entry(nzb_id).or_insert_with(PostInfo::new);
        post.stage = stage;
        post.stage_time = Instant::now();
    }

    async fn finish(&self, nzb_id: NzbId, status: ParStatus) {
        {
            let mut guard = self.queue.lock().await;
            if let Some(nzb) = guard.nzb_mut(nzb_id) {
                nzb.par_status = status;
            }
            guard.mark_dirty();
        }
        match status {
            ParStatus::Failure => log_failure!(nzb_id = %nzb_id, "par verification/repair failed"),
            _ => log_transition!(nzb_id = %nzb_id, status = ?status, "par stage finished"),
        }
        self.set_stage(nzb_id, Stage::Done).await;
        self.posts.lock().await.remove(&nzb_id);
    }

    /// Last-resort before failing outright (§4.6): look for a history dupe
    /// close enough in size whose destination directory can supply the
    /// missing blocks, copy its largest file alongside the PAR2 set, and
    /// deduct `blocks_needed` from that dupe's `extra_par_blocks` ledger.
    /// Returns whether a usable dupe was found and copied in.
    async fn try_dupe_source(&self, nzb_id: NzbId, dest_dir: &Path, blocks_needed: i64) -> Result<bool> {
        let (dupe_key, expected_size) = {
            let guard = self.queue.lock().await;
            let Some(nzb) = guard.nzb(nzb_id) else { return Ok(false) };
            if nzb.dupe_key.is_empty() {
                return Ok(false);
            }
            let size: u64 = guard.files_of(nzb_id).iter().map(|f| f.size).sum();
            (nzb.dupe_key.clone(), size)
        };

        let (dupe_nzb_id, source_path) = {
            let guard = self.queue.lock().await;
            match find_dupe_source(guard.history(), &dupe_key, expected_size, self.dupe_size_tolerance_percent, nzb_id)
            {
                Some((h, path)) => (h.nzb.id, path),
                None => return Ok(false),
            }
        };

        let Some(filename) = source_path.file_name() else { return Ok(false) };
        tokio::fs::copy(&source_path, dest_dir.join(filename)).await?;

        let mut guard = self.queue.lock().await;
        if let Some(history) = guard.history_mut(dupe_nzb_id) {
            history.nzb.extra_par_blocks -= blocks_needed;
        }
        guard.mark_dirty();
        Ok(true)
    }

    /// Run the PAR2 stage to completion for `nzb_id`. No-op (not an
    /// error) if the NZB has no destination directory on record, which
    /// should not happen once C2 has inserted it.
    pub async fn run(&self, nzb_id: NzbId) -> Result<()> {
        let dest_dir = {
            let guard = self.queue.lock().await;
            guard.nzb(nzb_id).map(|n| n.destination_dir.clone())
        };
        let Some(dest_dir) = dest_dir else { return Ok(()) };

        self.posts.lock().await.insert(nzb_id, PostInfo::new());
        self.set_stage(nzb_id, Stage::LoadingPars).await;

        let par2_files = find_par2_files(&dest_dir).await?;
        let Some(par2_file) = par2_files.first() else {
            self.finish(nzb_id, ParStatus::Skipped).await;
            return Ok(());
        };

        self.set_stage(nzb_id, Stage::VerifyingSources).await;
        let verify = match self.parity.verify(par2_file).await {
            Ok(v) => v,
            Err(Error::NotSupported(_)) => {
                self.finish(nzb_id, ParStatus::Skipped).await;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if verify_is_complete(&verify) {
            self.finish(nzb_id, ParStatus::Success).await;
            return Ok(());
        }
        if !verify.repairable {
            let deficit = i64::from(verify.damaged_blocks) - i64::from(verify.recovery_blocks_available);
            if deficit > 0
                && let Some(par_filename) = par2_file.file_name().and_then(|n| n.to_str())
            {
                let (ok, _found) = request_more_pars(&self.queue, nzb_id, par_filename, deficit).await;
                if ok {
                    // More volumes are now unpaused (or already in flight); the
                    // scheduler will call us again via the FileCompleted hook
                    // once they land, so this is not a terminal failure yet.
                    self.finish(nzb_id, ParStatus::RepairPossible).await;
                    return Ok(());
                }
                if self.try_dupe_source(nzb_id, &dest_dir, deficit).await? {
                    self.set_stage(nzb_id, Stage::Repairing).await;
                    let repair = self.parity.repair(par2_file).await?;
                    let status = if repair_succeeded(&repair) { ParStatus::Success } else { ParStatus::Failure };
                    self.finish(nzb_id, status).await;
                    return Ok(());
                }
            }
            self.finish(nzb_id, ParStatus::Failure).await;
            return Ok(());
        }

        self.set_stage(nzb_id, Stage::Repairing).await;
        let repair = self.parity.repair(par2_file).await?;
        self.set_stage(nzb_id, Stage::VerifyingRepaired).await;

        let status = if repair_succeeded(&repair) { ParStatus::Success } else { ParStatus::Failure };
        self.finish(nzb_id, status).await;
        Ok(())
    }
}

fn verify_is_complete(v: &VerifyResult) -> bool {
    v.is_complete
}

fn repair_succeeded(r: &RepairResult) -> bool {
    r.success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FileInfo, HistoryKind, NzbInfo};
    use async_trait::async_trait;

    #[test]
    fn parse_par_filename_recognizes_index_and_volume_files() {
        assert_eq!(parse_par_filename("movie.par2"), Some(("movie".into(), 0)));
        assert_eq!(
            parse_par_filename("movie.vol003+004.par2"),
            Some(("movie".into(), 4))
        );
        assert_eq!(parse_par_filename("movie.mkv"), None);
    }

    #[test]
    fn same_par_collection_is_case_insensitive() {
        assert!(same_par_collection("Movie.vol003+004.PAR2", "movie.par2"));
        assert!(!same_par_collection("movie.vol003+004.par2", "other.par2"));
    }

    #[test]
    fn size_diff_ok_allows_small_deviation() {
        assert!(size_diff_ok(1000, 1000, 0));
        assert!(size_diff_ok(1000, 1005, 1));
        assert!(!size_diff_ok(1000, 1200, 1));
    }

    #[test]
    fn should_cancel_repair_respects_grace_period_and_limit() {
        // par_time_limit 10 min -> 5 min grace; not elapsed yet.
        assert!(!should_cancel_repair(10, 60, 60, 500));
        // Past grace, progress says we're halfway after 20 minutes -> projects 40 min, over the 10 min limit.
        assert!(should_cancel_repair(10, 400, 20 * 60, 500));
        // Past grace but on pace to finish within the limit.
        assert!(!should_cancel_repair(10, 400, 4 * 60, 800));
        // Disabled.
        assert!(!should_cancel_repair(0, 10_000, 10_000, 1));
    }

    async fn seed_nzb_with_par_files(queue: &DownloadQueue) -> (NzbId, Vec<FileId>) {
        let mut guard = queue.lock().await;
        let nzb_id = NzbId::new(guard.nzb_ids.next());
        let mut nzb = NzbInfo::new(nzb_id, "job", "job.nzb");

        let mut file_ids = Vec::new();
        let specs: &[(&str, u32, bool)] = &[
            ("job.par2", 0, false),
            ("job.vol000+004.par2", 4, true),
            ("job.vol004+008.par2", 8, true),
            ("job.vol012+016.par2", 16, true),
        ];
        let mut files = Vec::new();
        for (name, _blocks, paused) in specs {
            let id = FileId::new(guard.file_ids.next());
            let mut f = FileInfo::new(id, nzb_id, *name, 1000);
            f.filename = (*name).to_string();
            f.par_file = true;
            f.paused = *paused;
            nzb.files.push(id);
            file_ids.push(id);
            files.push(f);
        }
        guard.insert_nzb(nzb, files, vec![]);
        (nzb_id, file_ids)
    }

    #[tokio::test]
    async fn request_more_pars_unpauses_exact_fit_volumes() {
        let queue = DownloadQueue::new();
        let (nzb_id, file_ids) = seed_nzb_with_par_files(&queue).await;

        let (ok, found) = request_more_pars(&queue, nzb_id, "job.par2", 8).await;
        assert!(ok);
        assert_eq!(found, 28); // 4 + 8 + 16

        let guard = queue.lock().await;
        // The exact-fit volume (8 blocks) should be the one unpaused, not the 16-block one.
        assert!(!guard.file(file_ids[2]).unwrap().paused);
        assert!(guard.file(file_ids[2]).unwrap().extra_priority);
        assert!(guard.file(file_ids[3]).unwrap().paused, "16-block volume should stay paused");
    }

    #[tokio::test]
    async fn request_more_pars_overshoots_when_no_exact_fit_remains() {
        let queue = DownloadQueue::new();
        let (nzb_id, file_ids) = seed_nzb_with_par_files(&queue).await;

        // Need 10 blocks: no single/combination gives exactly <=10 except 4 and 8 individually summed by phase1 (4+ then checks 8<=6 false)...
        // Phase 1 takes the 4-block volume (4<=10), leaves 6 needed; no remaining volume has blockCount<=6, so phase 2 takes from the front.
        let (ok, _found) = request_more_pars(&queue, nzb_id, "job.par2", 10).await;
        assert!(ok);

        let guard = queue.lock().await;
        assert!(!guard.file(file_ids[1]).unwrap().paused, "4-block volume used in phase 1");
    }

    #[tokio::test]
    async fn request_more_pars_ok_when_a_par_file_already_in_flight_despite_shortfall() {
        let queue = DownloadQueue::new();
        let (nzb_id, file_ids) = seed_nzb_with_par_files(&queue).await;
        {
            let mut guard = queue.lock().await;
            guard.file_mut(file_ids[1]).unwrap().paused = false; // already in flight
        }

        let (ok, _found) = request_more_pars(&queue, nzb_id, "job.par2", 10_000).await;
        assert!(ok, "an in-flight par file should keep the checker waiting rather than failing");
    }

    fn history_with_dupe(dupe_key: &str, dest: PathBuf) -> HistoryInfo {
        let mut nzb = NzbInfo::new(NzbId::new(99), "old", "old.nzb");
        nzb.dupe_key = dupe_key.to_string();
        nzb.destination_dir = dest;
        HistoryInfo::new(HistoryKind::Nzb, nzb, chrono::Utc::now())
    }

    #[test]
    fn find_dupe_source_matches_on_key_and_size_tolerance() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("small.txt"), vec![0u8; 10]).unwrap();
        std::fs::write(dir.path().join("big.txt"), vec![0u8; 1000]).unwrap();

        let history = vec![history_with_dupe("key-1", dir.path().to_path_buf())];
        let found = find_dupe_source(&history, "key-1", 1000, 5, NzbId::new(1));
        assert!(found.is_some());
        assert_eq!(found.unwrap().1.file_name().unwrap(), "big.txt");

        assert!(find_dupe_source(&history, "key-missing", 1000, 5, NzbId::new(1)).is_none());
    }

    struct StubHandler {
        verify: VerifyResult,
        repair: RepairResult,
    }

    #[async_trait]
    impl ParityHandler for StubHandler {
        async fn verify(&self, _par2_file: &Path) -> crate::Result<VerifyResult> {
            Ok(self.verify.clone())
        }
        async fn repair(&self, _par2_file: &Path) -> crate::Result<RepairResult> {
            Ok(self.repair.clone())
        }
        fn capabilities(&self) -> crate::parity::ParityCapabilities {
            crate::parity::ParityCapabilities { can_verify: true, can_repair: true }
        }
        fn name(&self) -> &'static str {
            "stub"
        }
    }

    #[tokio::test]
    async fn run_marks_skipped_when_no_par2_files_present() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DownloadQueue::new();
        let nzb_id = {
            let mut guard = queue.lock().await;
            let id = NzbId::new(guard.nzb_ids.next());
            let mut nzb = NzbInfo::new(id, "n", "n.nzb");
            nzb.destination_dir = dir.path().to_path_buf();
            guard.insert_nzb(nzb, vec![], vec![]);
            id
        };

        let handler = Arc::new(StubHandler {
            verify: VerifyResult {
                is_complete: true,
                damaged_blocks: 0,
                recovery_blocks_available: 0,
                repairable: false,
                damaged_files: vec![],
                missing_files: vec![],
            },
            repair: RepairResult { success: true, repaired_files: vec![], failed_files: vec![], error: None },
        });
        let coordinator = ParCoordinator::new(queue.clone(), handler, 0, 10);
        coordinator.run(nzb_id).await.unwrap();

        let guard = queue.lock().await;
        assert_eq!(guard.nzb(nzb_id).unwrap().par_status, ParStatus::Skipped);
    }

    #[tokio::test]
    async fn run_marks_success_when_verify_reports_complete() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("job.par2"), b"stub").unwrap();
        let queue = DownloadQueue::new();
        let nzb_id = {
            let mut guard = queue.lock().await;
            let id = NzbId::new(guard.nzb_ids.next());
            let mut nzb = NzbInfo::new(id, "n", "n.nzb");
            nzb.destination_dir = dir.path().to_path_buf();
            guard.insert_nzb(nzb, vec![], vec![]);
            id
        };

        let handler = Arc::new(StubHandler {
            verify: VerifyResult {
                is_complete: true,
                damaged_blocks: 0,
                recovery_blocks_available: 0,
                repairable: false,
                damaged_files: vec![],
                missing_files: vec![],
            },
            repair: RepairResult { success: true, repaired_files: vec![], failed_files: vec![], error: None },
        });
        let coordinator = ParCoordinator::new(queue.clone(), handler, 0, 10);
        coordinator.run(nzb_id).await.unwrap();

        let guard = queue.lock().await;
        assert_eq!(guard.nzb(nzb_id).unwrap().par_status, ParStatus::Success);
    }

    #[tokio::test]
    async fn run_marks_repair_possible_when_deficit_can_be_covered_by_more_volumes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("job.par2"), b"stub").unwrap();
        let queue = DownloadQueue::new();
        let nzb_id = {
            let mut guard = queue.lock().await;
            let id = NzbId::new(guard.nzb_ids.next());
            let mut nzb = NzbInfo::new(id, "n", "n.nzb");
            nzb.destination_dir = dir.path().to_path_buf();
            let file_id = FileId::new(guard.file_ids.next());
            let mut f = FileInfo::new(file_id, id, "job.vol000+004.par2", 1000);
            f.filename = "job.vol000+004.par2".to_string();
            f.par_file = true;
            f.paused = true;
            nzb.files.push(file_id);
            guard.insert_nzb(nzb, vec![f], vec![]);
            id
        };

        let handler = Arc::new(StubHandler {
            verify: VerifyResult {
                is_complete: false,
                damaged_blocks: 2,
                recovery_blocks_available: 0,
                repairable: false,
                damaged_files: vec!["a".into()],
                missing_files: vec![],
            },
            repair: RepairResult { success: true, repaired_files: vec![], failed_files: vec![], error: None },
        });
        let coordinator = ParCoordinator::new(queue.clone(), handler, 0, 10);
        coordinator.run(nzb_id).await.unwrap();

        let guard = queue.lock().await;
        assert_eq!(guard.nzb(nzb_id).unwrap().par_status, ParStatus::RepairPossible);
        let files = guard.files_of(nzb_id);
        let par_volume = files.iter().find(|f| f.filename.contains("vol000")).unwrap();
        assert!(!par_volume.paused, "the deficit-covering volume should have been unpaused");
    }

    #[tokio::test]
    async fn run_repairs_and_marks_success_when_damaged_but_repairable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("job.par2"), b"stub").unwrap();
        let queue = DownloadQueue::new();
        let nzb_id = {
            let mut guard = queue.lock().await;
            let id = NzbId::new(guard.nzb_ids.next());
            let mut nzb = NzbInfo::new(id, "n", "n.nzb");
            nzb.destination_dir = dir.path().to_path_buf();
            guard.insert_nzb(nzb, vec![], vec![]);
            id
        };

        let handler = Arc::new(StubHandler {
            verify: VerifyResult {
                is_complete: false,
                damaged_blocks: 2,
                recovery_blocks_available: 4,
                repairable: true,
                damaged_files: vec!["a".into()],
                missing_files: vec![],
            },
            repair: RepairResult { success: true, repaired_files: vec!["a".into()], failed_files: vec![], error: None },
        });
        let coordinator = ParCoordinator::new(queue.clone(), handler, 0, 10);
        coordinator.run(nzb_id).await.unwrap();

        let guard = queue.lock().await;
        assert_eq!(guard.nzb(nzb_id).unwrap().par_status, ParStatus::Success);
    }

    #[tokio::test]
    async fn run_falls_back_to_history_dupe_and_deducts_its_extra_par_blocks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("job.par2"), b"stub").unwrap();
        let dupe_dir = tempfile::tempdir().unwrap();
        std::fs::write(dupe_dir.path().join("movie.mkv"), vec![0u8; 95_000]).unwrap();

        let queue = DownloadQueue::new();
        let nzb_id = {
            let mut guard = queue.lock().await;
            let id = NzbId::new(guard.nzb_ids.next());
            let mut nzb = NzbInfo::new(id, "n", "n.nzb");
            nzb.destination_dir = dir.path().to_path_buf();
            nzb.dupe_key = "movie-2024".to_string();
            let file_id = FileId::new(guard.file_ids.next());
            let mut f = FileInfo::new(file_id, id, "movie.mkv", 100_000);
            f.filename = "movie.mkv".to_string();
            nzb.files.push(file_id);
            guard.insert_nzb(nzb, vec![f], vec![]);

            let mut history = history_with_dupe("movie-2024", dupe_dir.path().to_path_buf());
            history.nzb.extra_par_blocks = 50;
            guard.move_to_history(history.nzb.id, history);
            id
        };

        let handler = Arc::new(StubHandler {
            verify: VerifyResult {
                is_complete: false,
                damaged_blocks: 30,
                recovery_blocks_available: 0,
                repairable: false,
                damaged_files: vec!["movie.mkv".into()],
                missing_files: vec![],
            },
            repair: RepairResult { success: true, repaired_files: vec!["movie.mkv".into()], failed_files: vec![], error: None },
        });
        let coordinator = ParCoordinator::new(queue.clone(), handler, 0, 10);
        coordinator.run(nzb_id).await.unwrap();

        let guard = queue.lock().await;
        assert_eq!(guard.nzb(nzb_id).unwrap().par_status, ParStatus::Success);
        assert!(dir.path().join("movie.mkv").exists(), "the dupe's file should be copied in as a repair source");
        let dupe_history = guard.history().iter().find(|h| h.nzb.dupe_key == "movie-2024").unwrap();
        assert_eq!(dupe_history.nzb.extra_par_blocks, 20, "50 initial blocks minus the 30 blocks used");
    }
}
