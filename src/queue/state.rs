//! The arena behind the queue lock: all live [`NzbInfo`]/[`FileInfo`]/
//! [`ArticleInfo`] plus the history list, keyed by id per the Design
//! Notes' "store in arenas keyed by id; children resolve through the
//! queue lock" strategy.

use std::collections::HashMap;

use crate::model::{
    ArticleId, ArticleInfo, FileId, FileInfo, HistoryInfo, IdAllocator, NzbId, NzbInfo, ServerId,
};

/// Everything the queue lock protects.
#[derive(Default, Debug)]
pub struct QueueState {
    pub(crate) nzbs: HashMap<NzbId, NzbInfo>,
    pub(crate) files: HashMap<FileId, FileInfo>,
    pub(crate) articles: HashMap<ArticleId, ArticleInfo>,
    /// Declared order of active NZBs — the scheduler walks this order.
    pub(crate) order: Vec<NzbId>,
    pub(crate) history: Vec<HistoryInfo>,
    pub(crate) nzb_ids: IdAllocator,
    pub(crate) file_ids: IdAllocator,
    pub(crate) article_ids: IdAllocator,
    /// Process-wide download pause (§4.4 step 1).
    pub(crate) download_paused: bool,
    /// Process-wide post-processing pause (§4.6 "pausePostProcess").
    pub(crate) post_process_paused: bool,
    /// Round-robin fairness cursor, advanced after every dispatch (DESIGN.md
    /// Open Question 3).
    pub(crate) last_dispatched: Option<NzbId>,
}

impl QueueState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly parsed NZB (and its files/articles, already built
    /// with ids from this state's allocators) at the back of the queue.
    pub fn insert_nzb(&mut self, mut nzb: NzbInfo, files: Vec<FileInfo>, articles: Vec<ArticleInfo>) {
        nzb.total_bytes = files.iter().map(|f| f.size).sum();
        self.order.push(nzb.id);
        self.nzbs.insert(nzb.id, nzb);
        for f in files {
            self.files.insert(f.id, f);
        }
        for a in articles {
            self.articles.insert(a.id, a);
        }
    }

    pub fn nzb(&self, id: NzbId) -> Option<&NzbInfo> {
        self.nzbs.get(&id)
    }

    pub fn nzb_mut(&mut self, id: NzbId) -> Option<&mut NzbInfo> {
        self.nzbs.get_mut(&id)
    }

    pub fn file(&self, id: FileId) -> Option<&FileInfo> {
        self.files.get(&id)
    }

    pub fn file_mut(&mut self, id: FileId) -> Option<&mut FileInfo> {
        self.files.get_mut(&id)
    }

    pub fn article(&self, id: ArticleId) -> Option<&ArticleInfo> {
        self.articles.get(&id)
    }

    pub fn article_mut(&mut self, id: ArticleId) -> Option<&mut ArticleInfo> {
        self.articles.get_mut(&id)
    }

    /// Active NZBs in declared (scheduler walk) order.
    pub fn active_nzbs_in_order(&self) -> impl Iterator<Item = &NzbInfo> {
        self.order.iter().filter_map(move |id| self.nzbs.get(id))
    }

    /// Files belonging to an NZB, in declared order.
    pub fn files_of(&self, nzb_id: NzbId) -> Vec<&FileInfo> {
        match self.nzb(nzb_id) {
            Some(nzb) => nzb.files.iter().filter_map(|id| self.files.get(id)).collect(),
            None => Vec::new(),
        }
    }

    /// Articles belonging to a file, in declared (part) order.
    pub fn articles_of(&self, file_id: FileId) -> Vec<&ArticleInfo> {
        match self.file(file_id) {
            Some(file) => file
                .articles
                .iter()
                .filter_map(|id| self.articles.get(id))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Move an NZB from the active queue into history. No-op if the NZB
    /// id is not currently active.
    pub fn move_to_history(&mut self, id: NzbId, history: HistoryInfo) {
        self.order.retain(|nid| *nid != id);
        if let Some(nzb) = self.nzbs.remove(&id) {
            for fid in &nzb.files {
                if let Some(file) = self.files.remove(fid) {
                    for aid in &file.articles {
                        self.articles.remove(aid);
                    }
                }
            }
        }
        self.history.push(history);
    }

    pub fn history(&self) -> &[HistoryInfo] {
        &self.history
    }

    /// Mutable access to a history entry by its NZB id, for deducting
    /// `extra_par_blocks` after it is used as a dupe-source PAR supplement.
    pub fn history_mut(&mut self, id: NzbId) -> Option<&mut HistoryInfo> {
        self.history.iter_mut().find(|h| h.nzb.id == id)
    }

    /// Find an NZB's id by scanning both the active queue and history,
    /// used by the queue-script coordinator (`FindNzbInfo` in the
    /// original) which must still reach a recently retired NZB.
    pub fn find_nzb_anywhere(&self, id: NzbId) -> Option<&NzbInfo> {
        self.nzb(id).or_else(|| {
            self.history
                .iter()
                .find(|h| h.nzb.id == id)
                .map(|h| &h.nzb)
        })
    }

    /// Remove every per-server failure record for `server`, used when a
    /// server's config generation changes and cached failures should not
    /// survive a reconfiguration (§4.4 "serverConfigGeneration").
    pub fn clear_failures_for_server(&mut self, server: ServerId) {
        for article in self.articles.values_mut() {
            article.failed_servers.remove(&server);
        }
    }
}
