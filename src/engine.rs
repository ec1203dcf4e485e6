//! Engine context & wiring (C9): owns C2-C8, drives the event bus, exposes
//! the public API and signal-driven shutdown.
//!
//! The process-wide handle: a `Clone`-of-`Arc`-fields struct, constructed
//! once and cloned freely, with background tasks spawned from `run`.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::scheduler::{Dispatch, Scheduler, SchedulerEvent};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::model::{ArticleStatus, DeleteStatus, NzbId, ParStatus};
use crate::{log_failure, log_transition};
use crate::par::ParCoordinator;
use crate::parity::{CliParityHandler, NoOpParityHandler, ParityHandler};
use crate::persistence;
use crate::queue::{DownloadQueue, EditAction, EditError};
use crate::queue_script::{QueueEvent, QueueScriptCoordinator};
use crate::server_pool::{Outcome as ServerOutcome, ServerPool};
use crate::types::Event;
use crate::worker::{self, ArticleTask, AssembledSegment};

/// The engine: a cloneable handle over every C2-C8 component plus the
/// event bus. All fields are `Arc`-backed (or `Arc`-wrapped already, in
/// `DownloadQueue`'s case), so cloning is cheap and shares state.
#[derive(Clone)]
pub struct Engine {
    queue: DownloadQueue,
    servers: Arc<ServerPool>,
    scheduler: Arc<Scheduler>,
    par: Arc<ParCoordinator>,
    queue_scripts: Arc<QueueScriptCoordinator>,
    config: Arc<EngineConfig>,
    events: broadcast::Sender<Event>,
    shutdown: CancellationToken,
}

impl Engine {
    /// Build the engine from configuration: ensures working directories
    /// exist, restores the persisted queue snapshot (§4.8 startup
    /// recovery), opens one NNTP connection pool per configured server,
    /// and wires C4/C6/C7 against the restored queue.
    pub async fn new(config: EngineConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.default_destination_dir)
            .await
            .map_err(|e| Error::from_io(config.default_destination_dir.clone(), e))?;
        tokio::fs::create_dir_all(&config.temp_dir)
            .await
            .map_err(|e| Error::from_io(config.temp_dir.clone(), e))?;

        let state = persistence::load_snapshot(&config.state_path).await?;
        let queue = DownloadQueue::from_state(state);

        let mut entries = Vec::with_capacity(config.servers.len());
        for (idx, server_config) in config.servers.iter().enumerate() {
            let info = crate::model::NewsServer {
                id: crate::model::ServerId::new(idx as i64 + 1),
                level: server_config.level,
                group: server_config.group,
                host: server_config.host.clone(),
                port: server_config.port,
                tls: server_config.tls,
                username: server_config.username.clone(),
                password: server_config.password.clone(),
                max_connections: server_config.connections,
                active: server_config.active,
                optional: server_config.optional,
            };
            let pool = nntp_rs::NntpPool::new(server_config.clone().into(), server_config.connections)
                .await
                .map_err(|e| Error::Protocol(format!("failed to build NNTP pool for {}: {e}", server_config.host)))?;
            entries.push((info, pool));
        }
        let servers = Arc::new(ServerPool::with_timing(
            entries,
            config.retry.initial_delay,
            config.retry.max_delay,
            std::time::Duration::from_secs(10),
        ));

        let scheduler = Arc::new(Scheduler::new(queue.clone(), servers.clone(), config.health_threshold));

        let parity: Arc<dyn ParityHandler> = CliParityHandler::from_path()
            .map(|h| Arc::new(h) as Arc<dyn ParityHandler>)
            .unwrap_or_else(|| Arc::new(NoOpParityHandler));
        let par = Arc::new(ParCoordinator::new(
            queue.clone(),
            parity,
            config.par_time_limit_min,
            config.dupe_size_tolerance_percent,
        ));

        let queue_scripts = Arc::new(QueueScriptCoordinator::new(queue.clone(), config.queue_scripts.clone()));

        let (events, _rx) = broadcast::channel(1024);

        Ok(Self {
            queue,
            servers,
            scheduler,
            par,
            queue_scripts,
            config: Arc::new(config),
            events,
            shutdown: CancellationToken::new(),
        })
    }

    /// Subscribe to the event bus. Every event is broadcast post-commit,
    /// in commit order (§5 "Ordering guarantees").
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Parse and insert an NZB manifest, firing `NzbAdded` to the
    /// queue-script coordinator and waking the scheduler.
    pub async fn add_nzb(&self, xml: &[u8], name: impl Into<String>, source_filename: impl Into<String>) -> Result<NzbId> {
        let parsed = crate::nzb_parse::parse_nzb(xml)?;
        let name = name.into();
        let source_filename = source_filename.into();

        let nzb_id = {
            let mut guard = self.queue.lock().await;
            let id = crate::nzb_parse::ingest(&mut guard, parsed, name, source_filename);
            if let Some(nzb) = guard.nzb_mut(id) {
                nzb.destination_dir = self.destination_for(nzb.category.as_deref());
            }
            guard.mark_dirty();
            id
        };

        self.queue_scripts.enqueue(nzb_id, QueueEvent::NzbAdded).await;
        self.scheduler.wake();
        Ok(nzb_id)
    }

    /// Apply a single queue edit (§4.2). All mutations funnel through
    /// this, matching C11's "all mutations return a single boolean
    /// status" contract.
    pub async fn edit_queue(&self, id: NzbId, action: EditAction) -> std::result::Result<(), EditError> {
        let deleting = matches!(action, EditAction::Delete { .. });
        self.queue.apply_edit(id, action).await?;
        if deleting {
            self.queue_scripts.enqueue(id, QueueEvent::NzbDeleted).await;
            let _ = self.events.send(Event::NzbDeleted { nzb_id: id });
        }
        self.scheduler.wake();
        Ok(())
    }

    /// Pause/resume downloading globally (C11 `pauseUnpause` target
    /// `download`).
    pub async fn set_download_paused(&self, paused: bool) {
        let mut guard = self.queue.lock().await;
        guard.download_paused = paused;
        guard.mark_dirty();
        drop(guard);
        if !paused {
            self.scheduler.wake();
        }
    }

    /// Pause/resume post-processing globally (C11 `pauseUnpause` target
    /// `postProcess`).
    pub async fn set_post_process_paused(&self, paused: bool) {
        let mut guard = self.queue.lock().await;
        guard.post_process_paused = paused;
        guard.mark_dirty();
    }

    fn destination_for(&self, category: Option<&str>) -> PathBuf {
        category
            .and_then(|name| self.config.categories.iter().find(|c| c.name == name))
            .map(|c| c.destination.clone())
            .unwrap_or_else(|| self.config.default_destination_dir.clone())
    }

    fn segments_dir(&self, nzb_id: NzbId) -> PathBuf {
        self.config.temp_dir.join(nzb_id.get().to_string())
    }

    /// Spawn the engine's background loops: dispatch (C4<->C5), persistence
    /// (C8), and the queue-script poller (C7). Returns once all loops have
    /// observed the shutdown signal.
    pub async fn run(&self) -> Result<()> {
        let dispatch = {
            let engine = self.clone();
            tokio::spawn(async move { engine.drive_dispatch().await })
        };
        let persist = {
            let engine = self.clone();
            tokio::spawn(async move { engine.drive_persistence().await })
        };
        let scripts = {
            let engine = self.clone();
            tokio::spawn(async move { engine.drive_queue_scripts().await })
        };

        let _ = tokio::join!(dispatch, persist, scripts);
        Ok(())
    }

    /// Signal every background loop to stop and wait for in-flight
    /// articles to finish, then write a final snapshot.
    pub async fn shutdown(&self) -> Result<()> {
        log_transition!("initiating graceful shutdown");
        self.shutdown.cancel();
        let guard = self.queue.lock().await;
        persistence::write_snapshot(&self.config.state_path, &guard).await?;
        log_transition!("final snapshot written");
        Ok(())
    }

    async fn drive_dispatch(&self) {
        loop {
            if self.shutdown.is_cancelled() {
                return;
            }
            match self.scheduler.select_next().await {
                Some(dispatch) => {
                    let engine = self.clone();
                    tokio::spawn(async move { engine.execute_dispatch(dispatch).await });
                }
                None => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return,
                        _ = self.scheduler.wait_for_wakeup() => {}
                    }
                }
            }
        }
    }

    async fn execute_dispatch(&self, dispatch: Dispatch) {
        let _ = self.events.send(Event::ArticleStarted {
            nzb_id: dispatch.nzb_id,
            article_id: dispatch.article_id,
        });

        let Some(pool) = self.servers.pool_for(dispatch.reservation.server_id) else {
            let events = self.scheduler.record_outcome(dispatch.article_id, ServerOutcome::HardFail).await;
            self.handle_scheduler_events(events).await;
            return;
        };

        let task = {
            let guard = self.queue.lock().await;
            let Some(article) = guard.article(dispatch.article_id) else { return };
            ArticleTask {
                article_id: dispatch.article_id,
                file_id: dispatch.file_id,
                part_number: article.part_number,
                message_id: article.message_id.clone(),
            }
        };

        let segments_dir = self.segments_dir(dispatch.nzb_id);
        if let Err(e) = tokio::fs::create_dir_all(&segments_dir).await {
            log_failure!(error = %e, nzb_id = dispatch.nzb_id.get(), "failed to create segments directory");
        }

        let outcome = worker::download_article(pool, &task, &segments_dir).await;

        if outcome.disk_full {
            log_failure!(nzb_id = dispatch.nzb_id.get(), "disk full writing segment, pausing downloads");
            self.set_download_paused(true).await;
        }

        {
            let mut guard = self.queue.lock().await;
            if let Some(article) = guard.article_mut(dispatch.article_id) {
                if outcome.segment_path.is_some() {
                    article.segment_path = outcome.segment_path.clone();
                }
                if outcome.crc.is_some() {
                    article.crc = outcome.crc;
                }
            }
        }

        let events = self.scheduler.record_outcome(dispatch.article_id, outcome.outcome).await;

        let article_failed = {
            let guard = self.queue.lock().await;
            guard
                .article(dispatch.article_id)
                .map(|a| a.status == ArticleStatus::Failed)
                .unwrap_or(false)
        };
        let _ = self.events.send(if article_failed {
            Event::ArticleFailed { nzb_id: dispatch.nzb_id, article_id: dispatch.article_id }
        } else {
            Event::ArticleFinished { nzb_id: dispatch.nzb_id, article_id: dispatch.article_id }
        });

        self.handle_scheduler_events(events).await;
    }

    async fn handle_scheduler_events(&self, events: Vec<SchedulerEvent>) {
        for event in events {
            match event {
                SchedulerEvent::FileCompleted { nzb_id, file_id, completed } => {
                    self.assemble_completed_file(nzb_id, file_id).await;
                    let _ = self.events.send(Event::FileCompleted { nzb_id, file_id, completed });
                    self.queue_scripts.enqueue(nzb_id, QueueEvent::FileDownloaded).await;

                    let resume_par = {
                        let guard = self.queue.lock().await;
                        let is_par_file = guard.file(file_id).map(|f| f.par_file).unwrap_or(false);
                        let awaiting_repair =
                            guard.nzb(nzb_id).map(|n| n.par_status == ParStatus::RepairPossible).unwrap_or(false);
                        is_par_file && awaiting_repair
                    };
                    if resume_par {
                        let engine = self.clone();
                        tokio::spawn(async move { engine.run_post_processing(nzb_id).await });
                    }
                }
                SchedulerEvent::NzbCompleted { nzb_id } => {
                    let _ = self.events.send(Event::NzbDownloaded { nzb_id });
                    self.queue_scripts.enqueue(nzb_id, QueueEvent::NzbDownloaded).await;
                    let engine = self.clone();
                    tokio::spawn(async move { engine.run_post_processing(nzb_id).await });
                }
                SchedulerEvent::NzbHealthFailed { nzb_id } => {
                    let _ = self.events.send(Event::NzbHealthFailed { nzb_id });
                    let _ = self.queue.apply_edit(nzb_id, EditAction::Delete { status: DeleteStatus::Health }).await;
                    self.queue_scripts.enqueue(nzb_id, QueueEvent::NzbDeleted).await;
                }
            }
        }
    }

    async fn assemble_completed_file(&self, nzb_id: NzbId, file_id: crate::model::FileId) {
        let (segments, destination) = {
            let guard = self.queue.lock().await;
            let Some(file) = guard.file(file_id) else { return };
            let Some(nzb) = guard.nzb(nzb_id) else { return };
            let segments: Vec<AssembledSegment> = guard
                .articles_of(file_id)
                .into_iter()
                .map(|a| AssembledSegment { part_number: a.part_number, segment_path: a.segment_path.clone() })
                .collect();
            let destination = match crate::utils::get_unique_path(&nzb.destination_dir.join(&file.filename), self.config.file_collision) {
                Ok(path) => path,
                Err(e) => {
                    log_failure!(error = %e, "could not resolve a unique output path");
                    return;
                }
            };
            (segments, destination)
        };

        if let Some(parent) = destination.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                log_failure!(error = %e, "failed to create destination directory");
                return;
            }
        }

        let outcome = tokio::task::spawn_blocking(move || worker::assemble_file(segments, &destination)).await;
        match outcome {
            Ok(Ok(_crc)) => {}
            Ok(Err(e @ Error::DiskFull { .. })) => {
                log_failure!(error = %e, "disk full assembling completed file, pausing downloads");
                self.set_download_paused(true).await;
            }
            Ok(Err(e)) => log_failure!(error = %e, "failed to assemble completed file"),
            Err(e) => log_failure!(error = %e, "assembly task panicked"),
        }
    }

    async fn run_post_processing(&self, nzb_id: NzbId) {
        let post_process_paused = self.queue.lock().await.post_process_paused;
        if post_process_paused {
            return;
        }
        if let Err(e) = self.par.run(nzb_id).await {
            log_failure!(error = %e, nzb_id = nzb_id.get(), "PAR coordinator failed");
        }
    }

    async fn drive_persistence(&self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = self.queue.wait_for_save_request() => {}
            }
            let guard = self.queue.lock().await;
            // write_snapshot logs its own failure (with the path), nothing to add here.
            let _ = persistence::write_snapshot(&self.config.state_path, &guard).await;
        }
    }

    async fn drive_queue_scripts(&self) {
        let interval = std::time::Duration::from_secs(
            self.config.queue_scripts.event_interval_secs.max(1) as u64,
        );
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    self.queue_scripts.check_queue().await;
                }
            }
        }
    }

    /// Access to the shared queue handle, for read-only status queries
    /// (C11 `list`).
    pub fn queue(&self) -> &DownloadQueue {
        &self.queue
    }

    /// The set of news-server hostnames currently configured, for status
    /// reporting.
    pub fn server_hosts(&self) -> HashSet<String> {
        self.config.servers.iter().map(|s| s.host.clone()).collect()
    }
}

/// Run the engine until a termination signal arrives, then shut down
/// gracefully.
pub async fn run_with_shutdown(engine: Engine) -> Result<()> {
    let running = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run().await })
    };
    wait_for_signal().await;
    engine.shutdown().await?;
    let _ = running.await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                _ = sigint.recv() => tracing::info!("received SIGINT"),
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
            } else {
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
            } else {
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
