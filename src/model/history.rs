//! [`HistoryInfo`] — the terminal record an [`crate::model::NzbInfo`] becomes
//! once it leaves the active queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::NzbInfo;

/// What kind of item produced this history entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryKind {
    /// A regular NZB download.
    Nzb,
    /// A URL-sourced NZB (fetch itself is out of this crate's scope).
    Url,
    /// A dupe-detected entry kept only for dupe-matching bookkeeping.
    Dupe,
}

/// A retired [`NzbInfo`], owned exclusively by the history list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryInfo {
    pub kind: HistoryKind,
    pub timestamp: DateTime<Utc>,
    pub nzb: NzbInfo,
}

impl HistoryInfo {
    pub fn new(kind: HistoryKind, nzb: NzbInfo, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            timestamp,
            nzb,
        }
    }
}
