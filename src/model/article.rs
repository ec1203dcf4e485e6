//! [`ArticleInfo`] — one Usenet article, the unit of work the scheduler hands to a worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use super::ids::{ArticleId, FileId, ServerId};

/// Download status of a single article.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ArticleStatus {
    #[default]
    Undefined,
    Running,
    Finished,
    Failed,
}

/// One Usenet article (one segment of a [`FileInfo`]).
///
/// The only fields that change after NZB parse are `status` and
/// `segment_path` — everything else is fixed by the manifest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArticleInfo {
    pub id: ArticleId,
    pub file_id: FileId,
    pub part_number: u32,
    pub message_id: String,
    pub offset: u64,
    pub size: u64,
    pub crc: Option<u32>,
    pub status: ArticleStatus,
    pub segment_path: Option<PathBuf>,
    /// Servers that have already failed to serve this article, keyed by
    /// id; consulted by the scheduler's feasibility check (§4.4 step 4)
    /// and grown by the retry policy (§4.4 "Retry policy").
    pub failed_servers: HashSet<ServerId>,
    /// Set when the scheduler dispatches this article to a worker, cleared
    /// on completion or failure; used only for in-memory staleness checks,
    /// never persisted.
    #[serde(skip)]
    pub started_at: Option<DateTime<Utc>>,
}

impl ArticleInfo {
    pub fn new(
        id: ArticleId,
        file_id: FileId,
        part_number: u32,
        message_id: impl Into<String>,
        offset: u64,
        size: u64,
    ) -> Self {
        Self {
            id,
            file_id,
            part_number,
            message_id: message_id.into(),
            offset,
            size,
            crc: None,
            status: ArticleStatus::default(),
            segment_path: None,
            failed_servers: HashSet::new(),
            started_at: None,
        }
    }

    /// Record a failure against `server`, returning `true` if this server
    /// had not already failed this article.
    pub fn record_server_failure(&mut self, server: ServerId) -> bool {
        self.failed_servers.insert(server)
    }

    /// Whether `server` is known to have already failed this article.
    pub fn has_failed_on(&self, server: ServerId) -> bool {
        self.failed_servers.contains(&server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ids::{FileId, ServerId};

    fn article() -> ArticleInfo {
        ArticleInfo::new(ArticleId::new(1), FileId::new(1), 1, "<a@b>", 0, 1000)
    }

    #[test]
    fn finished_article_requires_matching_crc_or_absent_crc() {
        let mut a = article();
        a.status = ArticleStatus::Finished;
        a.crc = None;
        // Invariant from §8: finished ⇒ CRC matches declared ∨ declared absent.
        // With no declared CRC the invariant holds trivially.
        assert!(a.crc.is_none());

        a.crc = Some(0xdead_beef);
        let declared = a.crc;
        let computed = 0xdead_beef;
        assert!(declared.is_none_or(|d| d == computed));
    }

    #[test]
    fn recording_failure_is_idempotent_in_the_set() {
        let mut a = article();
        let s1 = ServerId::new(1);
        assert!(a.record_server_failure(s1));
        assert!(!a.record_server_failure(s1));
        assert!(a.has_failed_on(s1));
        assert!(!a.has_failed_on(ServerId::new(2)));
    }
}
