//! [`NzbInfo`] and the lifecycle status enums attached to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::ids::{FileId, NzbId};
use super::CompletedFile;

/// Terminal disposition of an NZB leaving the active queue.
///
/// Once set to anything other than `None` this must never revert — the
/// setter on [`NzbInfo`] enforces that rather than leaving it to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteStatus {
    /// Still active, not scheduled for removal.
    None,
    /// Operator explicitly deleted the NZB.
    Manual,
    /// Download health dropped below the configured threshold.
    Health,
    /// Removed as a duplicate per the dupe-matching policy.
    Dupe,
    /// A queue-script marked the NZB bad.
    Bad,
    /// A queue-script marked the NZB good (used to override automatic dupe handling).
    Good,
    /// Removed after its content was copied elsewhere.
    Copy,
    /// Removed by a feed/scan rule.
    Scan,
}

impl DeleteStatus {
    /// `true` once the NZB is scheduled to leave the active queue.
    pub fn is_terminal(self) -> bool {
        !matches!(self, DeleteStatus::None)
    }
}

/// Status of a URL-sourced NZB fetch (URL NZBs are out of this crate's
/// scope to fetch, but the status vocabulary is still part of the model).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum UrlStatus {
    #[default]
    None,
    Unknown,
    Success,
    Failure,
    Skipped,
    ScanFailure,
}

/// Outcome of the PAR2 stage for this NZB.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ParStatus {
    #[default]
    None,
    Skipped,
    Success,
    RepairPossible,
    Failure,
}

/// Outcome of the unpack stage for this NZB.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum UnpackStatus {
    #[default]
    None,
    Skipped,
    Success,
    Failure,
}

/// Operator/script-applied mark. A `Bad` mark is sticky: once set it is
/// never cleared automatically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MarkStatus {
    #[default]
    None,
    Bad,
    Good,
}

/// Duplicate-matching mode for a dupe key, mirrored in `NZBNA_DUPEMODE`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DupeMode {
    #[default]
    Score,
    All,
    Force,
}

impl DupeMode {
    /// Spelling used in the `NZBNA_DUPEMODE` environment variable (§4.7).
    pub fn env_name(self) -> &'static str {
        match self {
            DupeMode::Score => "SCORE",
            DupeMode::All => "ALL",
            DupeMode::Force => "FORCE",
        }
    }
}

/// Insertion-ordered NZB parameter table (`name` -> `value`).
///
/// A plain `Vec` rather than a hash map: the original's `NzbParameterList`
/// preserves insertion order (scripts may rely on seeing their own
/// parameters in the order a prior script wrote them), and NZB parameter
/// counts are always small.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NzbParameters(Vec<(String, String)>);

impl NzbParameters {
    /// Look up a parameter value by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set a parameter, overwriting any existing value but preserving its
    /// original position, or appending if the name is new.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(entry) = self.0.iter_mut().find(|(k, _)| *k == name) {
            entry.1 = value;
        } else {
            self.0.push((name, value));
        }
    }

    /// Iterate parameters in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// One NZB manifest and its queue-level bookkeeping.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NzbInfo {
    pub id: NzbId,
    pub name: String,
    pub source_filename: String,
    pub destination_dir: PathBuf,
    pub category: Option<String>,
    pub priority: i32,
    pub dupe_key: String,
    pub dupe_mode: DupeMode,
    pub dupe_score: i32,
    pub paused: bool,
    delete_status: DeleteStatus,
    pub url_status: UrlStatus,
    pub par_status: ParStatus,
    pub unpack_status: UnpackStatus,
    mark_status: MarkStatus,
    pub parameters: NzbParameters,
    pub files: Vec<FileId>,
    pub completed_files: Vec<CompletedFile>,
    pub messages: Vec<String>,
    pub download_sec: u64,
    pub par_sec: u64,
    pub repair_sec: u64,
    /// Surplus parity blocks beyond what this NZB needed for its own
    /// repair, shareable with history dupes (§4.6 dupe-source selection).
    pub extra_par_blocks: i64,
    /// Sum of every attached `FileInfo.size`, fixed at insert time. The
    /// denominator for the NZB-wide health ratio.
    pub total_bytes: u64,
    /// Running sum of successfully downloaded article bytes across every
    /// file of this NZB, updated alongside each `FileInfo.successful_bytes`.
    /// The numerator for the NZB-wide health ratio (§4.4 "Retry policy").
    pub successful_bytes: u64,
    /// Last time a `FILE_DOWNLOADED` queue-script fired for this NZB,
    /// used for the `eventInterval` debounce in C7.
    pub queue_script_time: Option<DateTime<Utc>>,
}

impl NzbInfo {
    /// Construct a freshly parsed NZB with no files attached yet.
    pub fn new(id: NzbId, name: impl Into<String>, source_filename: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            source_filename: source_filename.into(),
            destination_dir: PathBuf::new(),
            category: None,
            priority: 0,
            dupe_key: String::new(),
            dupe_mode: DupeMode::default(),
            dupe_score: 0,
            paused: false,
            delete_status: DeleteStatus::None,
            url_status: UrlStatus::default(),
            par_status: ParStatus::default(),
            unpack_status: UnpackStatus::default(),
            mark_status: MarkStatus::default(),
            parameters: NzbParameters::default(),
            files: Vec::new(),
            completed_files: Vec::new(),
            messages: Vec::new(),
            download_sec: 0,
            par_sec: 0,
            repair_sec: 0,
            extra_par_blocks: 0,
            total_bytes: 0,
            successful_bytes: 0,
            queue_script_time: None,
        }
    }

    /// Current delete status.
    pub fn delete_status(&self) -> DeleteStatus {
        self.delete_status
    }

    /// Move this NZB toward a terminal delete status.
    ///
    /// No-op (not an error) if the status is already terminal, matching
    /// "deleteStatus once set to a non-none terminal value may not revert".
    /// Returns whether the status actually changed.
    pub fn set_delete_status(&mut self, status: DeleteStatus) -> bool {
        if self.delete_status.is_terminal() {
            return false;
        }
        self.delete_status = status;
        true
    }

    /// Current mark status.
    pub fn mark_status(&self) -> MarkStatus {
        self.mark_status
    }

    /// Apply a mark. A `Bad` mark is sticky and cannot be cleared by a
    /// later `Good`/`None` mark.
    pub fn set_mark_status(&mut self, status: MarkStatus) -> bool {
        if self.mark_status == MarkStatus::Bad {
            return false;
        }
        self.mark_status = status;
        true
    }
}
