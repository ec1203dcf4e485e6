//! [`FileInfo`] — one binary file inside an NZB — and its completion record.

use serde::{Deserialize, Serialize};

use super::ids::{ArticleId, FileId, NzbId};

/// One binary file described by an NZB (one `<file>` element, many articles).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: FileId,
    /// Non-owning back-reference, resolved through the queue lock.
    pub nzb_id: NzbId,
    pub subject: String,
    pub filename: String,
    /// Whether `filename` came from a reliably parsed subject, or is a
    /// best-effort guess pending confirmation from the first article body.
    pub filename_confirmed: bool,
    pub size: u64,
    pub successful_bytes: u64,
    pub missed_bytes: u64,
    pub failed_bytes: u64,
    pub paused: bool,
    pub par_file: bool,
    /// Bumps this file above its NZB's nominal priority band (set by the
    /// PAR coordinator when unpausing a file for recovery, §4.6).
    pub extra_priority: bool,
    pub articles: Vec<ArticleId>,
    pub groups: Vec<String>,
}

impl FileInfo {
    pub fn new(id: FileId, nzb_id: NzbId, subject: impl Into<String>, size: u64) -> Self {
        Self {
            id,
            nzb_id,
            subject: subject.into(),
            filename: String::new(),
            filename_confirmed: false,
            size,
            successful_bytes: 0,
            missed_bytes: 0,
            failed_bytes: 0,
            paused: false,
            par_file: false,
            extra_priority: false,
            articles: Vec::new(),
            groups: Vec::new(),
        }
    }

    /// Invariant from §8: the three byte counters never exceed the
    /// declared size.
    pub fn byte_counters_within_size(&self) -> bool {
        self.successful_bytes
            .saturating_add(self.missed_bytes)
            .saturating_add(self.failed_bytes)
            <= self.size
    }
}

/// Outcome of assembling a [`FileInfo`]'s articles into the final file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletedFileStatus {
    /// Every article finished.
    Success,
    /// Some but not all articles finished.
    Partial,
    /// No article finished.
    Failure,
}

/// Record written once a [`FileInfo`] is fully assembled (or given up on).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompletedFile {
    pub filename: String,
    pub crc: Option<u32>,
    pub status: CompletedFileStatus,
    /// Set when this record exists to support later partial recovery.
    pub source_file_id: Option<FileId>,
}
