//! Queue-Script Coordinator (C7): serialized, event-precedence-coalescing
//! execution of operator-configured scripts against queue items, with a
//! line-oriented command channel for scripts to talk back (§4.7).
//!
//! Events coalesce by precedence before a script runs, and each invocation
//! is a `tokio::process::Command` under a timeout with a line-oriented
//! stdout channel for status back-talk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncBufReadExt;
use tokio::sync::Mutex;

use crate::log_failure;
use crate::model::{DeleteStatus, MarkStatus, NzbId, NzbParameters};
use crate::queue::DownloadQueue;

/// A queue-script lifecycle event. Ordered low -> high: on dequeue the
/// coordinator picks the pending item with the highest event value, so a
/// later, more significant event for an NZB preempts an earlier one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QueueEvent {
    FileDownloaded,
    UrlCompleted,
    NzbAdded,
    NzbDownloaded,
    NzbDeleted,
}

impl QueueEvent {
    /// Spelling used in `NZBNA_EVENT` and in a script's `queue_events` filter.
    pub fn env_name(self) -> &'static str {
        match self {
            QueueEvent::FileDownloaded => "FILE_DOWNLOADED",
            QueueEvent::UrlCompleted => "URL_COMPLETED",
            QueueEvent::NzbAdded => "NZB_ADDED",
            QueueEvent::NzbDownloaded => "NZB_DOWNLOADED",
            QueueEvent::NzbDeleted => "NZB_DELETED",
        }
    }
}

/// One configured queue script: selected per-NZB by name, either
/// operator-wide or via an NZB parameter, and can fire many times across an
/// NZB's lifetime rather than once at the end.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScriptDef {
    pub name: String,
    pub path: PathBuf,
    /// `None` means the script runs for every [`QueueEvent`].
    pub queue_events: Option<Vec<QueueEvent>>,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// One pending (nzb, script, event) unit of work.
#[derive(Clone, Debug)]
struct QueueItem {
    nzb_id: NzbId,
    script_name: String,
    script_path: PathBuf,
    timeout: Duration,
    event: QueueEvent,
}

/// Coordinator configuration: which scripts are queue scripts, the
/// operator-wide enabled-by-name list, and the `FILE_DOWNLOADED` debounce.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QueueScriptConfig {
    #[serde(default)]
    pub scripts: Vec<ScriptDef>,
    /// Script names enabled for every NZB, independent of NZB parameters
    /// (the original's global `QueueScript` option).
    #[serde(default)]
    pub global_queue_script_names: Vec<String>,
    /// `>=1` minimum seconds between `FILE_DOWNLOADED` events per NZB, `0`
    /// unlimited, `-1` suppressed entirely.
    #[serde(default)]
    pub event_interval_secs: i32,
}

/// Drives the queue-script lifecycle: callers report events via
/// [`enqueue`](Self::enqueue), then repeatedly call
/// [`check_queue`](Self::check_queue) to dequeue and run the
/// highest-precedence pending item, one script at a time.
pub struct QueueScriptCoordinator {
    queue: DownloadQueue,
    config: QueueScriptConfig,
    pending: Mutex<Vec<QueueItem>>,
    run_lock: Mutex<()>,
}

impl QueueScriptCoordinator {
    pub fn new(queue: DownloadQueue, config: QueueScriptConfig) -> Self {
        Self {
            queue,
            config,
            pending: Mutex::new(Vec::new()),
            run_lock: Mutex::new(()),
        }
    }

    /// Report a lifecycle event for `nzb_id`, queuing a run for every
    /// configured script that applies. No-op if no scripts are configured
    /// as queue scripts at all.
    pub async fn enqueue(&self, nzb_id: NzbId, event: QueueEvent) {
        if self.config.scripts.is_empty() {
            return;
        }

        let parameters = {
            let mut guard = self.queue.lock().await;
            let Some(nzb) = guard.nzb_mut(nzb_id) else {
                return;
            };

            if event == QueueEvent::FileDownloaded {
                if self.config.event_interval_secs == -1 {
                    return;
                }
                if self.config.event_interval_secs > 0 {
                    if let Some(last) = nzb.queue_script_time {
                        let elapsed = (chrono::Utc::now() - last).num_seconds();
                        if elapsed >= 0 && elapsed < i64::from(self.config.event_interval_secs) {
                            return;
                        }
                    }
                }
                nzb.queue_script_time = Some(chrono::Utc::now());
            }

            let parameters = nzb.parameters.clone();
            guard.mark_dirty();
            parameters
        };

        let mut pending = self.pending.lock().await;

        if event == QueueEvent::NzbDownloaded {
            pending.retain(|item| item.nzb_id != nzb_id);
        }

        for script in &self.config.scripts {
            if !self.script_applies(script, &parameters, event) {
                continue;
            }
            if event == QueueEvent::FileDownloaded
                && pending
                    .iter()
                    .any(|i| i.nzb_id == nzb_id && i.script_name == script.name)
            {
                continue;
            }
            pending.push(QueueItem {
                nzb_id,
                script_name: script.name.clone(),
                script_path: script.path.clone(),
                timeout: script.timeout,
                event,
            });
        }
    }

    /// Whether `script` should run for `event` given the operator's
    /// selection rules: enabled either by the operator-wide name list or by
    /// an NZB parameter `<name>:` set to yes/on/1, and the event passes the
    /// script's own filter (if it declares one).
    fn script_applies(
        &self,
        script: &ScriptDef,
        parameters: &NzbParameters,
        event: QueueEvent,
    ) -> bool {
        let in_global_list = self
            .config
            .global_queue_script_names
            .iter()
            .any(|n| n.eq_ignore_ascii_case(&script.name));

        let in_nzb_params = parameters.iter().any(|(key, value)| {
            !key.is_empty()
                && !key.starts_with('*')
                && key.ends_with(':')
                && matches!(value.to_ascii_lowercase().as_str(), "yes" | "on" | "1")
                && key[..key.len() - 1].eq_ignore_ascii_case(&script.name)
        });

        if !(in_global_list || in_nzb_params) {
            return false;
        }

        script
            .queue_events
            .as_ref()
            .is_none_or(|events| events.contains(&event))
    }

    /// Prune stale pending items, then dequeue and run the one with the
    /// highest event precedence. No-op if nothing is pending. A queue item
    /// is stale and dropped without running when its NZB has vanished,
    /// reached a terminal delete status other than via the `NZB_DELETED`
    /// event itself, or been marked bad.
    pub async fn check_queue(&self) {
        let item = {
            let guard = self.queue.lock().await;
            let mut pending = self.pending.lock().await;

            pending.retain(|item| match guard.find_nzb_anywhere(item.nzb_id) {
                None => false,
                Some(nzb) => {
                    let stale_delete =
                        nzb.delete_status().is_terminal() && item.event != QueueEvent::NzbDeleted;
                    !stale_delete && nzb.mark_status() != MarkStatus::Bad
                }
            });

            pending
                .iter()
                .enumerate()
                .max_by_key(|(_, i)| i.event)
                .map(|(idx, _)| idx)
                .map(|idx| pending.remove(idx))
        };

        if let Some(item) = item {
            self.run_script(item).await;
        }
    }

    /// Build the `NZBNA_*`/`NZBPR_*` environment table for one script run.
    /// Returns `None` if the NZB vanished between dequeue and run.
    async fn build_env(&self, item: &QueueItem) -> Option<HashMap<String, String>> {
        let guard = self.queue.lock().await;
        let nzb = guard.find_nzb_anywhere(item.nzb_id)?;

        let mut env = HashMap::new();
        env.insert("NZBNA_NZBNAME".to_string(), nzb.name.clone());
        env.insert("NZBNA_NZBID".to_string(), item.nzb_id.to_string());
        env.insert("NZBNA_FILENAME".to_string(), nzb.source_filename.clone());
        env.insert(
            "NZBNA_DIRECTORY".to_string(),
            nzb.destination_dir.display().to_string(),
        );
        env.insert(
            "NZBNA_CATEGORY".to_string(),
            nzb.category.clone().unwrap_or_default(),
        );
        env.insert("NZBNA_PRIORITY".to_string(), nzb.priority.to_string());
        env.insert("NZBNA_DUPEKEY".to_string(), nzb.dupe_key.clone());
        env.insert("NZBNA_DUPESCORE".to_string(), nzb.dupe_score.to_string());
        env.insert(
            "NZBNA_DUPEMODE".to_string(),
            nzb.dupe_mode.env_name().to_string(),
        );
        env.insert("NZBNA_EVENT".to_string(), item.event.env_name().to_string());
        env.insert(
            "NZBNA_DELETESTATUS".to_string(),
            format!("{:?}", nzb.delete_status()),
        );
        env.insert(
            "NZBNA_URLSTATUS".to_string(),
            format!("{:?}", nzb.url_status),
        );
        for (key, value) in nzb.parameters.iter() {
            env.insert(format!("NZBPR_{}", key.trim_end_matches(':')), value.to_string());
        }
        Some(env)
    }

    /// Run one script to completion, serialized against every other
    /// script run via `run_lock`. Scans stdout for `[NZB] ` commands as it
    /// streams rather than buffering full output.
    async fn run_script(&self, item: QueueItem) {
        let _run_guard = self.run_lock.lock().await;

        let Some(env) = self.build_env(&item).await else {
            return;
        };

        let mut child = match tokio::process::Command::new(&item.script_path)
            .envs(&env)
            .stdout(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                log_failure!(script = %item.script_name, error = %e, "failed to start queue script");
                return;
            }
        };

        let stdout = child.stdout.take();
        let nzb_id = item.nzb_id;
        let run = async {
            let mut mark_bad = false;
            if let Some(stdout) = stdout {
                let mut lines = tokio::io::BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if self.handle_command_line(nzb_id, &line).await {
                        mark_bad = true;
                    }
                }
            }
            (child.wait().await, mark_bad)
        };

        match tokio::time::timeout(item.timeout, run).await {
            Ok((Ok(status), mark_bad)) => {
                if mark_bad {
                    self.apply_mark_bad(nzb_id).await;
                }
                if !status.success() {
                    log_failure!(
                        script = %item.script_name,
                        code = ?status.code(),
                        "queue script exited non-zero"
                    );
                }
            }
            Ok((Err(e), _)) => {
                log_failure!(script = %item.script_name, error = %e, "failed to wait on queue script");
            }
            Err(_) => {
                log_failure!(
                    script = %item.script_name,
                    timeout = ?item.timeout,
                    "queue script timed out"
                );
            }
        }
    }

    /// Parse one line of a script's stdout for a `[NZB] ` command. Returns
    /// `true` if the line was `MARK=BAD` (the caller defers the actual
    /// delete-status change until the script exits). Any other `[NZB] ...`
    /// text is logged as invalid but never aborts the script.
    async fn handle_command_line(&self, nzb_id: NzbId, line: &str) -> bool {
        let Some(rest) = line.strip_prefix("[NZB] ") else {
            return false;
        };

        if let Some(kv) = rest.strip_prefix("NZBPR_") {
            match kv.split_once('=') {
                Some((name, value)) => {
                    let mut guard = self.queue.lock().await;
                    if let Some(nzb) = guard.nzb_mut(nzb_id) {
                        nzb.parameters.set(name, value);
                    }
                    guard.mark_dirty();
                }
                None => log_failure!(command = %rest, "invalid queue script command"),
            }
            false
        } else if rest == "MARK=BAD" {
            let mut guard = self.queue.lock().await;
            if let Some(nzb) = guard.nzb_mut(nzb_id) {
                nzb.set_mark_status(MarkStatus::Bad);
            }
            guard.mark_dirty();
            true
        } else {
            log_failure!(command = %rest, "invalid queue script command");
            false
        }
    }

    async fn apply_mark_bad(&self, nzb_id: NzbId) {
        let mut guard = self.queue.lock().await;
        if let Some(nzb) = guard.nzb_mut(nzb_id) {
            nzb.set_delete_status(DeleteStatus::Bad);
        }
        guard.mark_dirty();
    }
}
