//! Article Scheduler (C4) — "the heart". Selects the next
//! (FileInfo, ArticleInfo, connection) triple to dispatch and folds
//! worker outcomes back into queue state (§4.4).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{Mutex, Notify};

use crate::model::{
    ArticleId, ArticleStatus, CompletedFile, CompletedFileStatus, DeleteStatus, FileId, FileInfo,
    NzbId, ServerId,
};
use crate::queue::{DownloadQueue, QueueState};
use crate::server_pool::{Outcome as ServerOutcome, Reservation, ServerPool};
use crate::{log_failure, log_transition};

/// One live worker's bookkeeping, kept outside the queue lock so a worker
/// failing or hanging never blocks other queue mutations.
#[derive(Clone, Debug)]
struct ActiveDownload {
    file_id: FileId,
    nzb_id: NzbId,
    server_id: ServerId,
    level: i32,
    #[allow(dead_code)]
    started_at: Instant,
}

/// A selected unit of work, handed to a worker (C5) to execute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dispatch {
    pub article_id: ArticleId,
    pub file_id: FileId,
    pub nzb_id: NzbId,
    pub reservation: Reservation,
}

/// Something downstream consumers (PAR coordinator, queue-script
/// coordinator, persistence) need to react to. Returned rather than
/// pushed onto a broadcast channel, since C9's wiring of those consumers
/// does not exist yet.
#[derive(Clone, Debug)]
pub enum SchedulerEvent {
    FileCompleted {
        nzb_id: NzbId,
        file_id: FileId,
        completed: CompletedFile,
    },
    NzbCompleted {
        nzb_id: NzbId,
    },
    NzbHealthFailed {
        nzb_id: NzbId,
    },
}

/// The scheduler: owns no queue state itself, just the handle, the server
/// pool, and the set of downloads currently in flight.
pub struct Scheduler {
    queue: DownloadQueue,
    servers: Arc<ServerPool>,
    notify: Arc<Notify>,
    health_threshold: f64,
    active: Mutex<HashMap<ArticleId, ActiveDownload>>,
}

impl Scheduler {
    pub fn new(queue: DownloadQueue, servers: Arc<ServerPool>, health_threshold: f64) -> Self {
        Self {
            queue,
            servers,
            notify: Arc::new(Notify::new()),
            health_threshold,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Wake one waiter of [`Self::wait_for_wakeup`] — called on a
    /// connection release, a queue edit, or a new NZB insert (§4.4
    /// Ambient/supplemental).
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    pub async fn wait_for_wakeup(&self) {
        self.notify.notified().await;
    }

    /// Run the five-step selection algorithm once under the queue lock.
    /// Returns `None` if nothing is eligible or no server can currently
    /// serve the chosen article — the caller should leave its idle
    /// connection idle and wait for the next wakeup.
    pub async fn select_next(&self) -> Option<Dispatch> {
        let mut guard = self.queue.lock().await;

        if guard.download_paused {
            return None;
        }

        let eligible: Vec<NzbId> = guard
            .active_nzbs_in_order()
            .filter(|nzb| !nzb.paused && nzb.delete_status() == DeleteStatus::None)
            .filter(|nzb| Self::first_selectable_article(&guard, nzb.id).is_some())
            .map(|nzb| nzb.id)
            .collect();
        if eligible.is_empty() {
            return None;
        }

        let max_priority = eligible
            .iter()
            .filter_map(|id| guard.nzb(*id))
            .map(|n| n.priority)
            .max()?;
        let band: Vec<NzbId> = eligible
            .into_iter()
            .filter(|id| guard.nzb(*id).map(|n| n.priority) == Some(max_priority))
            .collect();
        let nzb_id = Self::round_robin_pick(&band, guard.last_dispatched);

        let (file_id, article_id) = Self::first_selectable_article(&guard, nzb_id)?;
        let failed_servers = guard.article(article_id)?.failed_servers.clone();

        let reservation = self
            .servers
            .levels()
            .into_iter()
            .find_map(|level| self.servers.try_reserve_at_level_excluding(level, &failed_servers))?;

        if let Some(article) = guard.article_mut(article_id) {
            article.status = ArticleStatus::Running;
            article.started_at = Some(Utc::now());
        }
        guard.last_dispatched = Some(nzb_id);
        drop(guard);

        self.active.lock().await.insert(
            article_id,
            ActiveDownload {
                file_id,
                nzb_id,
                server_id: reservation.server_id,
                level: reservation.level,
                started_at: Instant::now(),
            },
        );

        Some(Dispatch {
            article_id,
            file_id,
            nzb_id,
            reservation,
        })
    }

    /// Fold a worker's outcome for `article_id` back into queue state,
    /// release the server reservation, and return any events a consumer
    /// should react to (file/NZB completion, health failure).
    pub async fn record_outcome(&self, article_id: ArticleId, outcome: ServerOutcome) -> Vec<SchedulerEvent> {
        let Some(active) = self.active.lock().await.remove(&article_id) else {
            return Vec::new();
        };
        self.servers.release(
            Reservation {
                server_id: active.server_id,
                level: active.level,
            },
            outcome,
        );

        let mut guard = self.queue.lock().await;
        let mut dirty = false;

        match outcome {
            ServerOutcome::Success => {
                let Some(article_size) = guard.article(article_id).map(|a| a.size) else {
                    return Vec::new();
                };
                if let Some(article) = guard.article_mut(article_id) {
                    article.status = ArticleStatus::Finished;
                    article.started_at = None;
                }
                if let Some(file) = guard.file_mut(active.file_id) {
                    file.successful_bytes = file.successful_bytes.saturating_add(article_size);
                }
                if let Some(nzb) = guard.nzb_mut(active.nzb_id) {
                    nzb.successful_bytes = nzb.successful_bytes.saturating_add(article_size);
                }
            }
            ServerOutcome::Retry | ServerOutcome::HardFail => {
                let exhausted = {
                    let Some(article) = guard.article_mut(article_id) else {
                        return Vec::new();
                    };
                    article.record_server_failure(active.server_id);
                    article.started_at = None;
                    let exhausted = self.servers.all_servers_exhausted(&article.failed_servers);
                    article.status = if exhausted {
                        ArticleStatus::Failed
                    } else {
                        ArticleStatus::Undefined
                    };
                    exhausted
                };
                if exhausted {
                    log_failure!(
                        article_id = %article_id,
                        nzb_id = %active.nzb_id,
                        "article failed on every server/level combination"
                    );
                    let article_size = guard.article(article_id).map(|a| a.size).unwrap_or(0);
                    if let Some(file) = guard.file_mut(active.file_id) {
                        file.missed_bytes = file.missed_bytes.saturating_add(article_size);
                    }
                }
            }
        }

        let mut events = Vec::new();

        if Self::file_is_terminal(&guard, active.file_id) {
            if let Some(event) = self.finish_file(&mut guard, active.nzb_id, active.file_id) {
                dirty = true;
                log_transition!(file_id = %active.file_id, nzb_id = %active.nzb_id, "file completed");
                let health_failed = self.check_health(&mut guard, active.nzb_id);
                events.push(event);
                if health_failed {
                    log_failure!(nzb_id = %active.nzb_id, "nzb fell below health threshold");
                    events.push(SchedulerEvent::NzbHealthFailed { nzb_id: active.nzb_id });
                }
            }
        }

        if Self::nzb_is_terminal(&guard, active.nzb_id) {
            log_transition!(nzb_id = %active.nzb_id, "nzb fully downloaded");
            events.push(SchedulerEvent::NzbCompleted { nzb_id: active.nzb_id });
            dirty = true;
        }

        if dirty {
            guard.mark_dirty();
        }

        self.wake();
        events
    }

    fn first_selectable_article(state: &QueueState, nzb_id: NzbId) -> Option<(FileId, ArticleId)> {
        let files = state.files_of(nzb_id);
        let candidates: Vec<&FileInfo> = files
            .into_iter()
            .filter(|f| !f.paused)
            .filter(|f| {
                state
                    .articles_of(f.id)
                    .iter()
                    .any(|a| a.status == ArticleStatus::Undefined)
            })
            .collect();
        // "Extra-priority" bumps a file above its NZB's nominal band: prefer
        // an extra-priority candidate over the first-by-declared-order one.
        let file = candidates
            .iter()
            .find(|f| f.extra_priority)
            .or_else(|| candidates.first())?;
        let article = state
            .articles_of(file.id)
            .into_iter()
            .find(|a| a.status == ArticleStatus::Undefined)?;
        Some((file.id, article.id))
    }

    fn round_robin_pick(band: &[NzbId], last: Option<NzbId>) -> NzbId {
        if let Some(last_id) = last {
            if let Some(pos) = band.iter().position(|id| *id == last_id) {
                return band[(pos + 1) % band.len()];
            }
        }
        band[0]
    }

    fn file_is_terminal(state: &QueueState, file_id: FileId) -> bool {
        let articles = state.articles_of(file_id);
        !articles.is_empty()
            && articles
                .iter()
                .all(|a| matches!(a.status, ArticleStatus::Finished | ArticleStatus::Failed))
    }

    /// Assemble a [`CompletedFile`] for a file whose articles are all
    /// terminal, recording it on the NZB. Returns `None` if this file was
    /// already recorded (idempotent against duplicate outcome delivery).
    fn finish_file(&self, guard: &mut QueueState, nzb_id: NzbId, file_id: FileId) -> Option<SchedulerEvent> {
        let already_recorded = guard
            .nzb(nzb_id)
            .map(|n| n.completed_files.iter().any(|c| c.source_file_id == Some(file_id)))
            .unwrap_or(true);
        if already_recorded {
            return None;
        }

        let articles = guard.articles_of(file_id);
        let finished = articles.iter().filter(|a| a.status == ArticleStatus::Finished).count();
        let status = if finished == articles.len() {
            CompletedFileStatus::Success
        } else if finished == 0 {
            CompletedFileStatus::Failure
        } else {
            CompletedFileStatus::Partial
        };
        let crc = match (status, articles.as_slice()) {
            (CompletedFileStatus::Success, [single]) => single.crc,
            _ => None,
        };
        let filename = guard.file(file_id)?.filename.clone();
        let completed = CompletedFile {
            filename,
            crc,
            status,
            source_file_id: Some(file_id),
        };

        let nzb = guard.nzb_mut(nzb_id)?;
        nzb.completed_files.push(completed.clone());

        Some(SchedulerEvent::FileCompleted {
            nzb_id,
            file_id,
            completed,
        })
    }

    /// Health threshold check (§4.4 "Retry policy"): the ratio is NZB-wide,
    /// not per file, so a single bad file in a multi-file NZB can't trip it
    /// on its own and a single good file can't mask the rest being
    /// unhealthy. Returns `true` if this call changed the delete status (so
    /// the caller emits exactly one failure event).
    fn check_health(&self, guard: &mut QueueState, nzb_id: NzbId) -> bool {
        let Some(nzb) = guard.nzb(nzb_id) else {
            return false;
        };
        if nzb.total_bytes == 0 {
            return false;
        }
        let health = nzb.successful_bytes as f64 / nzb.total_bytes as f64;
        if health >= self.health_threshold {
            return false;
        }
        guard
            .nzb_mut(nzb_id)
            .map(|n| n.set_delete_status(DeleteStatus::Health))
            .unwrap_or(false)
    }

    fn nzb_is_terminal(state: &QueueState, nzb_id: NzbId) -> bool {
        match state.nzb(nzb_id) {
            Some(nzb) => !nzb.files.is_empty() && nzb.completed_files.len() >= nzb.files.len(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArticleInfo, FileInfo, NewsServer, NzbInfo};

    fn server(id: i64, level: i32, group: i32, max_connections: u32) -> NewsServer {
        NewsServer {
            id: ServerId::new(id),
            level,
            group,
            host: "news.example.com".into(),
            port: 119,
            tls: false,
            username: None,
            password: None,
            max_connections,
            active: true,
            optional: false,
        }
    }

    fn pool(servers: Vec<NewsServer>) -> Arc<ServerPool> {
        Arc::new(ServerPool::new_for_test(servers))
    }

    /// Build a single-file NZB with `n` articles, inserted into `queue`,
    /// returning (nzb_id, file_id, article_ids).
    async fn seed_single_file_nzb(
        queue: &DownloadQueue,
        priority: i32,
        article_sizes: &[u64],
    ) -> (NzbId, FileId, Vec<ArticleId>) {
        let mut guard = queue.lock().await;
        let nzb_id = NzbId::new(guard.nzb_ids.next());
        let mut nzb = NzbInfo::new(nzb_id, "n", "n.nzb");
        nzb.priority = priority;

        let file_id = FileId::new(guard.file_ids.next());
        let mut file = FileInfo::new(file_id, nzb_id, "subj", article_sizes.iter().sum());
        file.filename = "file.bin".into();

        let mut article_ids = Vec::new();
        let mut articles = Vec::new();
        for (i, size) in article_sizes.iter().enumerate() {
            let aid = ArticleId::new(guard.article_ids.next());
            let article = ArticleInfo::new(aid, file_id, i as u32 + 1, format!("<{i}@x>"), 0, *size);
            file.articles.push(aid);
            article_ids.push(aid);
            articles.push(article);
        }
        nzb.files.push(file_id);
        guard.insert_nzb(nzb, vec![file], articles);
        drop(guard);
        (nzb_id, file_id, article_ids)
    }

    #[tokio::test]
    async fn select_next_returns_none_when_queue_empty() {
        let queue = DownloadQueue::new();
        let servers = pool(vec![server(1, 0, 0, 1)]);
        let scheduler = Scheduler::new(queue, servers, 0.9);
        assert!(scheduler.select_next().await.is_none());
    }

    #[tokio::test]
    async fn select_next_dispatches_the_first_undefined_article() {
        let queue = DownloadQueue::new();
        let (nzb_id, file_id, article_ids) = seed_single_file_nzb(&queue, 0, &[1000]).await;
        let servers = pool(vec![server(1, 0, 0, 1)]);
        let scheduler = Scheduler::new(queue.clone(), servers, 0.9);

        let dispatch = scheduler.select_next().await.expect("should dispatch");
        assert_eq!(dispatch.nzb_id, nzb_id);
        assert_eq!(dispatch.file_id, file_id);
        assert_eq!(dispatch.article_id, article_ids[0]);

        let guard = queue.lock().await;
        assert_eq!(guard.article(article_ids[0]).unwrap().status, ArticleStatus::Running);
    }

    #[tokio::test]
    async fn download_paused_suppresses_all_dispatch() {
        let queue = DownloadQueue::new();
        seed_single_file_nzb(&queue, 0, &[1000]).await;
        {
            let mut guard = queue.lock().await;
            guard.download_paused = true;
        }
        let servers = pool(vec![server(1, 0, 0, 1)]);
        let scheduler = Scheduler::new(queue, servers, 0.9);
        assert!(scheduler.select_next().await.is_none());
    }

    #[tokio::test]
    async fn higher_priority_nzb_is_preferred() {
        let queue = DownloadQueue::new();
        let (low_id, ..) = seed_single_file_nzb(&queue, 0, &[1000]).await;
        let (high_id, ..) = seed_single_file_nzb(&queue, 5, &[1000]).await;
        let servers = pool(vec![server(1, 0, 0, 1)]);
        let scheduler = Scheduler::new(queue, servers, 0.9);

        let dispatch = scheduler.select_next().await.unwrap();
        assert_eq!(dispatch.nzb_id, high_id);
        assert_ne!(dispatch.nzb_id, low_id);
    }

    #[tokio::test]
    async fn equal_priority_nzbs_round_robin_across_dispatches() {
        let queue = DownloadQueue::new();
        // Two undefined articles per NZB so both stay eligible after the
        // first dispatch, isolating the fairness cursor from exhaustion.
        let (a, ..) = seed_single_file_nzb(&queue, 0, &[500, 500]).await;
        let (b, ..) = seed_single_file_nzb(&queue, 0, &[500, 500]).await;
        let servers = pool(vec![server(1, 0, 0, 2)]);
        let scheduler = Scheduler::new(queue, servers, 0.9);

        let first = scheduler.select_next().await.unwrap().nzb_id;
        let second = scheduler.select_next().await.unwrap().nzb_id;
        assert_ne!(first, second, "round robin should alternate between equal-priority NZBs");
        assert_eq!([first, second].iter().collect::<HashSet<_>>(), [&a, &b].into_iter().collect());
    }

    #[tokio::test]
    async fn extra_priority_file_is_preferred_within_its_nzb() {
        let queue = DownloadQueue::new();
        let mut guard = queue.lock().await;
        let nzb_id = NzbId::new(guard.nzb_ids.next());
        let mut nzb = NzbInfo::new(nzb_id, "n", "n.nzb");

        let normal_file_id = FileId::new(guard.file_ids.next());
        let mut normal_file = FileInfo::new(normal_file_id, nzb_id, "normal", 100);
        let normal_article_id = ArticleId::new(guard.article_ids.next());
        normal_file.articles.push(normal_article_id);

        let par_file_id = FileId::new(guard.file_ids.next());
        let mut par_file = FileInfo::new(par_file_id, nzb_id, "par", 100);
        par_file.extra_priority = true;
        let par_article_id = ArticleId::new(guard.article_ids.next());
        par_file.articles.push(par_article_id);

        nzb.files.push(normal_file_id);
        nzb.files.push(par_file_id);
        guard.insert_nzb(
            nzb,
            vec![normal_file, par_file],
            vec![
                ArticleInfo::new(normal_article_id, normal_file_id, 1, "<a@x>", 0, 100),
                ArticleInfo::new(par_article_id, par_file_id, 1, "<b@x>", 0, 100),
            ],
        );
        drop(guard);

        let servers = pool(vec![server(1, 0, 0, 1)]);
        let scheduler = Scheduler::new(queue, servers, 0.9);
        let dispatch = scheduler.select_next().await.unwrap();
        assert_eq!(dispatch.file_id, par_file_id, "extra-priority file should win over declared order");
    }

    #[tokio::test]
    async fn feasibility_check_skips_a_server_already_failed_for_this_article() {
        let queue = DownloadQueue::new();
        let (_, _, article_ids) = seed_single_file_nzb(&queue, 0, &[1000]).await;
        {
            let mut guard = queue.lock().await;
            guard
                .article_mut(article_ids[0])
                .unwrap()
                .record_server_failure(ServerId::new(1));
        }
        let servers = pool(vec![server(1, 0, 0, 1), server(2, 0, 1, 1)]);
        let scheduler = Scheduler::new(queue, servers, 0.9);
        let dispatch = scheduler.select_next().await.unwrap();
        assert_eq!(dispatch.reservation.server_id, ServerId::new(2));
    }

    #[tokio::test]
    async fn success_outcome_finishes_article_and_completes_single_article_file() {
        let queue = DownloadQueue::new();
        let (nzb_id, file_id, article_ids) = seed_single_file_nzb(&queue, 0, &[1000]).await;
        let servers = pool(vec![server(1, 0, 0, 1)]);
        let scheduler = Scheduler::new(queue.clone(), servers, 0.9);

        let dispatch = scheduler.select_next().await.unwrap();
        let events = scheduler.record_outcome(dispatch.article_id, ServerOutcome::Success).await;

        let guard = queue.lock().await;
        assert_eq!(guard.article(article_ids[0]).unwrap().status, ArticleStatus::Finished);
        assert_eq!(guard.file(file_id).unwrap().successful_bytes, 1000);
        assert!(events.iter().any(|e| matches!(e, SchedulerEvent::FileCompleted { .. })));
        assert!(events.iter().any(|e| matches!(e, SchedulerEvent::NzbCompleted { nzb_id: n } if *n == nzb_id)));
    }

    #[tokio::test]
    async fn exhausting_every_level_fails_the_article_and_counts_missed_bytes() {
        let queue = DownloadQueue::new();
        let (_, file_id, article_ids) = seed_single_file_nzb(&queue, 0, &[1000]).await;
        let servers = pool(vec![server(1, 0, 0, 1)]);
        let scheduler = Scheduler::new(queue.clone(), servers, 0.9);

        let dispatch = scheduler.select_next().await.unwrap();
        let events = scheduler.record_outcome(dispatch.article_id, ServerOutcome::HardFail).await;

        let guard = queue.lock().await;
        assert_eq!(guard.article(article_ids[0]).unwrap().status, ArticleStatus::Failed);
        assert_eq!(guard.file(file_id).unwrap().missed_bytes, 1000);
        assert!(events.iter().any(|e| matches!(e, SchedulerEvent::FileCompleted { .. })));
    }

    #[tokio::test]
    async fn retry_outcome_with_remaining_servers_returns_article_to_undefined() {
        let queue = DownloadQueue::new();
        let (_, _, article_ids) = seed_single_file_nzb(&queue, 0, &[1000]).await;
        let servers = pool(vec![server(1, 0, 0, 1), server(2, 1, 0, 1)]);
        let scheduler = Scheduler::new(queue.clone(), servers, 0.9);

        let dispatch = scheduler.select_next().await.unwrap();
        scheduler.record_outcome(dispatch.article_id, ServerOutcome::Retry).await;

        let guard = queue.lock().await;
        assert_eq!(guard.article(article_ids[0]).unwrap().status, ArticleStatus::Undefined);
        assert!(!guard.article(article_ids[0]).unwrap().failed_servers.is_empty());
    }

    #[tokio::test]
    async fn health_below_threshold_marks_nzb_for_removal() {
        let queue = DownloadQueue::new();
        let (nzb_id, _, article_ids) = seed_single_file_nzb(&queue, 0, &[1000]).await;
        let servers = pool(vec![server(1, 0, 0, 1)]);
        // Impossible-to-meet threshold so any outcome short of full success fails it.
        let scheduler = Scheduler::new(queue.clone(), servers, 1.0);

        let dispatch = scheduler.select_next().await.unwrap();
        assert_eq!(dispatch.article_id, article_ids[0]);
        let events = scheduler.record_outcome(dispatch.article_id, ServerOutcome::HardFail).await;

        assert!(events.iter().any(|e| matches!(e, SchedulerEvent::NzbHealthFailed { nzb_id: n } if *n == nzb_id)));
        let guard = queue.lock().await;
        assert_eq!(guard.nzb(nzb_id).unwrap().delete_status(), DeleteStatus::Health);
    }

    /// Build a two-file NZB, one file per element of `files_article_sizes`,
    /// inserted into `queue`, returning (nzb_id, [file_ids], [[article_ids]]).
    async fn seed_two_file_nzb(
        queue: &DownloadQueue,
        files_article_sizes: [&[u64]; 2],
    ) -> (NzbId, [FileId; 2], [Vec<ArticleId>; 2]) {
        let mut guard = queue.lock().await;
        let nzb_id = NzbId::new(guard.nzb_ids.next());
        let mut nzb = NzbInfo::new(nzb_id, "n", "n.nzb");

        let mut file_ids = Vec::new();
        let mut all_files = Vec::new();
        let mut all_articles = Vec::new();
        let mut per_file_article_ids = Vec::new();
        for (idx, sizes) in files_article_sizes.iter().enumerate() {
            let file_id = FileId::new(guard.file_ids.next());
            let mut file = FileInfo::new(file_id, nzb_id, "subj", sizes.iter().sum());
            file.filename = format!("file{idx}.bin");
            let mut article_ids = Vec::new();
            for (i, size) in sizes.iter().enumerate() {
                let aid = ArticleId::new(guard.article_ids.next());
                let article = ArticleInfo::new(aid, file_id, i as u32 + 1, format!("<{idx}-{i}@x>"), 0, *size);
                file.articles.push(aid);
                article_ids.push(aid);
                all_articles.push(article);
            }
            nzb.files.push(file_id);
            file_ids.push(file_id);
            per_file_article_ids.push(article_ids);
            all_files.push(file);
        }
        guard.insert_nzb(nzb, all_files, all_articles);
        drop(guard);
        (
            nzb_id,
            [file_ids[0], file_ids[1]],
            [per_file_article_ids.remove(0), per_file_article_ids.remove(0)],
        )
    }

    #[tokio::test]
    async fn a_fully_failed_file_does_not_delete_an_otherwise_healthy_multi_file_nzb() {
        let queue = DownloadQueue::new();
        let (nzb_id, _, [first_articles, second_articles]) =
            seed_two_file_nzb(&queue, [&[900], &[100]]).await;
        let servers = pool(vec![server(1, 0, 0, 2)]);
        // 900/1000 = 0.9, clears a 0.8 threshold even though file two is a total loss.
        let scheduler = Scheduler::new(queue.clone(), servers, 0.8);

        let d1 = scheduler.select_next().await.unwrap();
        assert_eq!(d1.article_id, first_articles[0]);
        let events = scheduler.record_outcome(d1.article_id, ServerOutcome::Success).await;
        assert!(!events.iter().any(|e| matches!(e, SchedulerEvent::NzbHealthFailed { .. })));

        let d2 = scheduler.select_next().await.unwrap();
        assert_eq!(d2.article_id, second_articles[0]);
        let events = scheduler.record_outcome(d2.article_id, ServerOutcome::HardFail).await;

        assert!(!events.iter().any(|e| matches!(e, SchedulerEvent::NzbHealthFailed { .. })));
        let guard = queue.lock().await;
        assert_eq!(guard.nzb(nzb_id).unwrap().delete_status(), DeleteStatus::None);
    }

    #[tokio::test]
    async fn paused_nzb_is_never_selected() {
        let queue = DownloadQueue::new();
        let (nzb_id, ..) = seed_single_file_nzb(&queue, 0, &[1000]).await;
        {
            let mut guard = queue.lock().await;
            guard.nzb_mut(nzb_id).unwrap().paused = true;
        }
        let servers = pool(vec![server(1, 0, 0, 1)]);
        let scheduler = Scheduler::new(queue, servers, 0.9);
        assert!(scheduler.select_next().await.is_none());
    }

    #[tokio::test]
    async fn ten_articles_complete_on_level_zero_capacity_alone() {
        let queue = DownloadQueue::new();
        let (_, file_id, article_ids) = seed_single_file_nzb(&queue, 0, &[100; 10]).await;
        let servers = pool(vec![
            server(1, 0, 0, 2),
            server(2, 0, 0, 2),
            server(3, 1, 0, 1),
        ]);
        let scheduler = Scheduler::new(queue.clone(), servers, 0.9);

        for _ in 0..article_ids.len() {
            let dispatch = scheduler.select_next().await.expect("an article should still be selectable");
            assert_eq!(dispatch.reservation.level, 0, "level 0 has spare capacity for every one of these dispatches");
            scheduler.record_outcome(dispatch.article_id, ServerOutcome::Success).await;
        }

        let guard = queue.lock().await;
        assert_eq!(guard.file(file_id).unwrap().successful_bytes, 1000);
        assert!(guard.article(article_ids[0]).unwrap().status == ArticleStatus::Finished);
    }

    #[tokio::test]
    async fn article_failing_on_every_level_zero_server_escalates_to_level_one() {
        let queue = DownloadQueue::new();
        let (_, file_id, article_ids) = seed_single_file_nzb(&queue, 0, &[100; 4]).await;
        let servers = pool(vec![
            server(1, 0, 0, 1),
            server(2, 0, 0, 1),
            server(3, 1, 0, 1),
        ]);
        let scheduler = Scheduler::new(queue.clone(), servers, 0.9);

        let article_two = article_ids[1];
        let mut article_two_used_level_one = false;
        for _ in 0..20 {
            let Some(dispatch) = scheduler.select_next().await else { break };
            let is_article_two = dispatch.article_id == article_two;
            let outcome = if is_article_two && dispatch.reservation.level == 0 {
                ServerOutcome::HardFail
            } else {
                ServerOutcome::Success
            };
            if is_article_two && outcome == ServerOutcome::Success {
                article_two_used_level_one = true;
            }
            scheduler.record_outcome(dispatch.article_id, outcome).await;
        }

        assert!(article_two_used_level_one, "article two should have escalated to the level-1 server");
        let guard = queue.lock().await;
        assert!(article_ids.iter().all(|id| guard.article(*id).unwrap().status == ArticleStatus::Finished));
        assert_eq!(guard.file(file_id).unwrap().successful_bytes, 400);
    }
}
