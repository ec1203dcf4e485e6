//! Atomic snapshot persistence (C8): serializes the download queue graph
//! to a single versioned, line-oriented text file and restores it on
//! startup (§4.8, §6 "Persistent state layout").
//!
//! Format: first line is an ASCII decimal format version; second line is
//! the two global pause flags; every line after that is one record, kind
//! tagged by its first field and delimited by the ASCII unit separator
//! (`\u{1f}`) rather than a byte format, matching §6's "line-oriented
//! textual format with fields separated by the unit separator". Parent
//! linkage is the parent's id repeated as a field on the child record, per
//! the arena-by-id model in [`crate::queue::QueueState`]. Kind tags: `N`
//! NzbInfo, `F` FileInfo, `A` ArticleInfo, `C` CompletedFile, `H`
//! HistoryInfo, `P` NzbParameter.
//!
//! The write path follows the atomic-write convention used throughout this
//! crate (`worker.rs`'s segment/assembly writes): build the whole buffer in
//! memory, write it to a sibling `.tmp` path, `sync_all`,
//! then `rename` over the real path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::log_failure;
use crate::model::{
    ArticleId, ArticleInfo, ArticleStatus, CompletedFile, CompletedFileStatus, DeleteStatus,
    DupeMode, FileId, FileInfo, HistoryInfo, HistoryKind, MarkStatus, NzbId, NzbInfo, ParStatus,
    UnpackStatus, UrlStatus,
};
use crate::queue::QueueState;

const FORMAT_VERSION: u32 = 1;
const FS: char = '\u{1f}';

fn esc(s: &str) -> String {
    s.replace(['\u{1f}', '\n', '\r'], " ")
}

fn join(fields: &[String]) -> String {
    fields.join(&FS.to_string())
}

fn opt_num<T: ToString>(v: Option<T>) -> String {
    v.map(|n| n.to_string()).unwrap_or_default()
}

fn opt_str(v: &Option<String>) -> String {
    v.clone().unwrap_or_default()
}

fn bool_flag(b: bool) -> &'static str {
    if b { "1" } else { "0" }
}

fn parse_bool(s: &str) -> bool {
    s == "1"
}

/// Serialize the whole queue graph into the on-disk text format.
pub fn serialize_state(state: &QueueState) -> String {
    let mut out = String::new();
    out.push_str(&FORMAT_VERSION.to_string());
    out.push('\n');
    out.push_str(&join(&[
        bool_flag(state.download_paused).to_string(),
        bool_flag(state.post_process_paused).to_string(),
    ]));
    out.push('\n');

    for &nzb_id in &state.order {
        let Some(nzb) = state.nzbs.get(&nzb_id) else { continue };
        write_nzb_record(&mut out, nzb, false);
        write_params_and_completed(&mut out, nzb);
    }
    for history in &state.history {
        write_nzb_record(&mut out, &history.nzb, true);
        write_params_and_completed(&mut out, &history.nzb);
        out.push_str(&join(&[
            "H".to_string(),
            history.nzb.id.to_string(),
            history_kind_tag(history.kind).to_string(),
            history.timestamp.to_rfc3339(),
        ]));
        out.push('\n');
    }

    for file in state.files.values() {
        write_file_record(&mut out, file);
    }
    for article in state.articles.values() {
        write_article_record(&mut out, article);
    }

    out
}

fn write_nzb_record(out: &mut String, nzb: &NzbInfo, in_history: bool) {
    out.push_str(&join(&[
        "N".to_string(),
        nzb.id.to_string(),
        bool_flag(in_history).to_string(),
        esc(&nzb.name),
        esc(&nzb.source_filename),
        esc(&nzb.destination_dir.display().to_string()),
        esc(&opt_str(&nzb.category)),
        nzb.priority.to_string(),
        esc(&nzb.dupe_key),
        dupe_mode_tag(nzb.dupe_mode).to_string(),
        nzb.dupe_score.to_string(),
        bool_flag(nzb.paused).to_string(),
        delete_status_tag(nzb.delete_status()).to_string(),
        url_status_tag(nzb.url_status).to_string(),
        par_status_tag(nzb.par_status).to_string(),
        unpack_status_tag(nzb.unpack_status).to_string(),
        mark_status_tag(nzb.mark_status()).to_string(),
        nzb.download_sec.to_string(),
        nzb.par_sec.to_string(),
        nzb.repair_sec.to_string(),
        nzb.extra_par_blocks.to_string(),
        nzb.queue_script_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
        nzb.files.iter().map(|f| f.to_string()).collect::<Vec<_>>().join(","),
        nzb.total_bytes.to_string(),
        nzb.successful_bytes.to_string(),
    ]));
    out.push('\n');
}

fn write_params_and_completed(out: &mut String, nzb: &NzbInfo) {
    for (name, value) in nzb.parameters.iter() {
        out.push_str(&join(&[
            "P".to_string(),
            nzb.id.to_string(),
            esc(name),
            esc(value),
        ]));
        out.push('\n');
    }
    for completed in &nzb.completed_files {
        out.push_str(&join(&[
            "C".to_string(),
            nzb.id.to_string(),
            esc(&completed.filename),
            opt_num(completed.crc),
            completed_file_status_tag(completed.status).to_string(),
            opt_num(completed.source_file_id.map(|id| id.get())),
        ]));
        out.push('\n');
    }
}

fn write_file_record(out: &mut String, file: &FileInfo) {
    out.push_str(&join(&[
        "F".to_string(),
        file.id.to_string(),
        file.nzb_id.to_string(),
        esc(&file.subject),
        esc(&file.filename),
        bool_flag(file.filename_confirmed).to_string(),
        file.size.to_string(),
        file.successful_bytes.to_string(),
        file.missed_bytes.to_string(),
        file.failed_bytes.to_string(),
        bool_flag(file.paused).to_string(),
        bool_flag(file.par_file).to_string(),
        bool_flag(file.extra_priority).to_string(),
        file.groups.iter().map(|g| esc(g)).collect::<Vec<_>>().join(","),
    ]));
    out.push('\n');
}

fn write_article_record(out: &mut String, article: &ArticleInfo) {
    out.push_str(&join(&[
        "A".to_string(),
        article.id.to_string(),
        article.file_id.to_string(),
        article.part_number.to_string(),
        esc(&article.message_id),
        article.offset.to_string(),
        article.size.to_string(),
        opt_num(article.crc),
        article_status_tag(article.status).to_string(),
        article
            .segment_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
    ]));
    out.push('\n');
}

/// Parse a previously serialized snapshot back into a [`QueueState`].
/// Returns a fresh, empty state if `text` is empty (first run).
pub fn deserialize_state(text: &str) -> Result<QueueState> {
    let mut lines = text.lines();
    let Some(version_line) = lines.next() else {
        return Ok(QueueState::new());
    };
    let version: u32 = version_line.trim().parse().map_err(|_| Error::Config {
        message: format!("unreadable snapshot format version: {version_line:?}"),
        key: Some("persistence.format_version".to_string()),
    })?;
    if version != FORMAT_VERSION {
        return Err(Error::Config {
            message: format!("unsupported snapshot format version {version}"),
            key: Some("persistence.format_version".to_string()),
        });
    }

    let mut state = QueueState::new();
    if let Some(flags_line) = lines.next() {
        let fields: Vec<&str> = flags_line.split(FS).collect();
        state.download_paused = fields.first().is_some_and(|f| parse_bool(f));
        state.post_process_paused = fields.get(1).is_some_and(|f| parse_bool(f));
    }

    let mut active_order: Vec<NzbId> = Vec::new();
    let mut history_entries: Vec<(NzbId, HistoryKind, DateTime<Utc>)> = Vec::new();
    let mut nzb_children: HashMap<NzbId, (Vec<(String, String)>, Vec<CompletedFile>)> =
        HashMap::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(FS).collect();
        match fields.first().copied() {
            Some("N") => {
                let (id, nzb, in_history) = parse_nzb_record(&fields)?;
                nzb_children.entry(id).or_default();
                if in_history {
                    // timestamp/kind filled in by the matching H record.
                    state.history.push(HistoryInfo::new(HistoryKind::Nzb, nzb, Utc::now()));
                } else {
                    active_order.push(id);
                    state.nzbs.insert(id, nzb);
                }
                state.nzb_ids.observe(id.get());
            }
            Some("P") => {
                let nzb_id = parse_id::<NzbId>(&fields, 1)?;
                let name = fields.get(2).copied().unwrap_or_default().to_string();
                let value = fields.get(3).copied().unwrap_or_default().to_string();
                nzb_children.entry(nzb_id).or_default().0.push((name, value));
            }
            Some("C") => {
                let nzb_id = parse_id::<NzbId>(&fields, 1)?;
                let completed = parse_completed_record(&fields)?;
                nzb_children.entry(nzb_id).or_default().1.push(completed);
            }
            Some("H") => {
                let nzb_id = parse_id::<NzbId>(&fields, 1)?;
                let kind = history_kind_from_tag(fields.get(2).copied().unwrap_or_default());
                let timestamp = fields
                    .get(3)
                    .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(Utc::now);
                history_entries.push((nzb_id, kind, timestamp));
            }
            Some("F") => {
                let file = parse_file_record(&fields)?;
                state.file_ids.observe(file.id.get());
                state.files.insert(file.id, file);
            }
            Some("A") => {
                let article = parse_article_record(&fields)?;
                state.article_ids.observe(article.id.get());
                state.articles.insert(article.id, article);
            }
            _ => {
                return Err(Error::Config {
                    message: format!("unrecognized snapshot record: {line:?}"),
                    key: Some("persistence.record".to_string()),
                });
            }
        }
    }

    for (nzb_id, (params, completed)) in nzb_children {
        if let Some(nzb) = state.nzbs.get_mut(&nzb_id) {
            for (name, value) in params {
                nzb.parameters.set(name, value);
            }
            nzb.completed_files = completed;
        } else if let Some(history) = state.history.iter_mut().find(|h| h.nzb.id == nzb_id) {
            for (name, value) in params {
                history.nzb.parameters.set(name, value);
            }
            history.nzb.completed_files = completed;
        }
    }

    for (nzb_id, kind, timestamp) in history_entries {
        if let Some(history) = state.history.iter_mut().find(|h| h.nzb.id == nzb_id) {
            history.kind = kind;
            history.timestamp = timestamp;
        }
    }

    state.order = active_order;
    Ok(state)
}

fn parse_id<T: From<i64>>(fields: &[&str], idx: usize) -> Result<T> {
    let raw = fields.get(idx).copied().unwrap_or_default();
    raw.parse::<i64>()
        .map(T::from)
        .map_err(|_| Error::Config {
            message: format!("invalid id field {raw:?}"),
            key: Some("persistence.id".to_string()),
        })
}

fn parse_nzb_record(fields: &[&str]) -> Result<(NzbId, NzbInfo, bool)> {
    let id = parse_id::<NzbId>(fields, 1)?;
    let in_history = fields.get(2).copied().unwrap_or_default() == "1";
    let name = fields.get(3).copied().unwrap_or_default().to_string();
    let source_filename = fields.get(4).copied().unwrap_or_default().to_string();
    let mut nzb = NzbInfo::new(id, name, source_filename);
    nzb.destination_dir = PathBuf::from(fields.get(5).copied().unwrap_or_default());
    let category = fields.get(6).copied().unwrap_or_default();
    nzb.category = (!category.is_empty()).then(|| category.to_string());
    nzb.priority = fields.get(7).and_then(|f| f.parse().ok()).unwrap_or(0);
    nzb.dupe_key = fields.get(8).copied().unwrap_or_default().to_string();
    nzb.dupe_mode = dupe_mode_from_tag(fields.get(9).copied().unwrap_or_default());
    nzb.dupe_score = fields.get(10).and_then(|f| f.parse().ok()).unwrap_or(0);
    nzb.paused = fields.get(11).is_some_and(|f| parse_bool(f));
    nzb.set_delete_status(delete_status_from_tag(fields.get(12).copied().unwrap_or_default()));
    nzb.url_status = url_status_from_tag(fields.get(13).copied().unwrap_or_default());
    nzb.par_status = par_status_from_tag(fields.get(14).copied().unwrap_or_default());
    nzb.unpack_status = unpack_status_from_tag(fields.get(15).copied().unwrap_or_default());
    nzb.set_mark_status(mark_status_from_tag(fields.get(16).copied().unwrap_or_default()));
    nzb.download_sec = fields.get(17).and_then(|f| f.parse().ok()).unwrap_or(0);
    nzb.par_sec = fields.get(18).and_then(|f| f.parse().ok()).unwrap_or(0);
    nzb.repair_sec = fields.get(19).and_then(|f| f.parse().ok()).unwrap_or(0);
    nzb.extra_par_blocks = fields.get(20).and_then(|f| f.parse().ok()).unwrap_or(0);
    nzb.queue_script_time = fields
        .get(21)
        .filter(|f| !f.is_empty())
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc));
    nzb.files = fields
        .get(22)
        .map(|f| {
            f.split(',')
                .filter(|s| !s.is_empty())
                .filter_map(|s| s.parse::<i64>().ok())
                .map(FileId::new)
                .collect()
        })
        .unwrap_or_default();
    nzb.total_bytes = fields.get(23).and_then(|f| f.parse().ok()).unwrap_or(0);
    nzb.successful_bytes = fields.get(24).and_then(|f| f.parse().ok()).unwrap_or(0);
    Ok((id, nzb, in_history))
}

fn parse_completed_record(fields: &[&str]) -> Result<CompletedFile> {
    Ok(CompletedFile {
        filename: fields.get(2).copied().unwrap_or_default().to_string(),
        crc: fields.get(3).and_then(|f| f.parse().ok()),
        status: completed_file_status_from_tag(fields.get(4).copied().unwrap_or_default()),
        source_file_id: fields.get(5).and_then(|f| f.parse::<i64>().ok()).map(FileId::new),
    })
}

fn parse_file_record(fields: &[&str]) -> Result<FileInfo> {
    let id = parse_id::<FileId>(fields, 1)?;
    let nzb_id = parse_id::<NzbId>(fields, 2)?;
    let subject = fields.get(3).copied().unwrap_or_default().to_string();
    let size = fields.get(6).and_then(|f| f.parse().ok()).unwrap_or(0);
    let mut file = FileInfo::new(id, nzb_id, subject, size);
    file.filename = fields.get(4).copied().unwrap_or_default().to_string();
    file.filename_confirmed = fields.get(5).is_some_and(|f| parse_bool(f));
    file.successful_bytes = fields.get(7).and_then(|f| f.parse().ok()).unwrap_or(0);
    file.missed_bytes = fields.get(8).and_then(|f| f.parse().ok()).unwrap_or(0);
    file.failed_bytes = fields.get(9).and_then(|f| f.parse().ok()).unwrap_or(0);
    file.paused = fields.get(10).is_some_and(|f| parse_bool(f));
    file.par_file = fields.get(11).is_some_and(|f| parse_bool(f));
    file.extra_priority = fields.get(12).is_some_and(|f| parse_bool(f));
    file.groups = fields
        .get(13)
        .map(|f| f.split(',').filter(|s| !s.is_empty()).map(String::from).collect())
        .unwrap_or_default();
    Ok(file)
}

fn parse_article_record(fields: &[&str]) -> Result<ArticleInfo> {
    let id = parse_id::<ArticleId>(fields, 1)?;
    let file_id = parse_id::<FileId>(fields, 2)?;
    let part_number = fields.get(3).and_then(|f| f.parse().ok()).unwrap_or(0);
    let message_id = fields.get(4).copied().unwrap_or_default().to_string();
    let offset = fields.get(5).and_then(|f| f.parse().ok()).unwrap_or(0);
    let size = fields.get(6).and_then(|f| f.parse().ok()).unwrap_or(0);
    let mut article = ArticleInfo::new(id, file_id, part_number, message_id, offset, size);
    article.crc = fields.get(7).and_then(|f| f.parse().ok());
    article.status = article_status_from_tag(fields.get(8).copied().unwrap_or_default());
    let segment_path = fields.get(9).copied().unwrap_or_default();
    article.segment_path = (!segment_path.is_empty()).then(|| PathBuf::from(segment_path));
    Ok(article)
}

fn dupe_mode_tag(m: DupeMode) -> &'static str {
    match m {
        DupeMode::Score => "score",
        DupeMode::All => "all",
        DupeMode::Force => "force",
    }
}
fn dupe_mode_from_tag(s: &str) -> DupeMode {
    match s {
        "all" => DupeMode::All,
        "force" => DupeMode::Force,
        _ => DupeMode::Score,
    }
}

fn delete_status_tag(s: DeleteStatus) -> &'static str {
    match s {
        DeleteStatus::None => "none",
        DeleteStatus::Manual => "manual",
        DeleteStatus::Health => "health",
        DeleteStatus::Dupe => "dupe",
        DeleteStatus::Bad => "bad",
        DeleteStatus::Good => "good",
        DeleteStatus::Copy => "copy",
        DeleteStatus::Scan => "scan",
    }
}
fn delete_status_from_tag(s: &str) -> DeleteStatus {
    match s {
        "manual" => DeleteStatus::Manual,
        "health" => DeleteStatus::Health,
        "dupe" => DeleteStatus::Dupe,
        "bad" => DeleteStatus::Bad,
        "good" => DeleteStatus::Good,
        "copy" => DeleteStatus::Copy,
        "scan" => DeleteStatus::Scan,
        _ => DeleteStatus::None,
    }
}

fn url_status_tag(s: UrlStatus) -> &'static str {
    match s {
        UrlStatus::None => "none",
        UrlStatus::Unknown => "unknown",
        UrlStatus::Success => "success",
        UrlStatus::Failure => "failure",
        UrlStatus::Skipped => "skipped",
        UrlStatus::ScanFailure => "scan-failure",
    }
}
fn url_status_from_tag(s: &str) -> UrlStatus {
    match s {
        "unknown" => UrlStatus::Unknown,
        "success" => UrlStatus::Success,
        "failure" => UrlStatus::Failure,
        "skipped" => UrlStatus::Skipped,
        "scan-failure" => UrlStatus::ScanFailure,
        _ => UrlStatus::None,
    }
}

fn par_status_tag(s: ParStatus) -> &'static str {
    match s {
        ParStatus::None => "none",
        ParStatus::Skipped => "skipped",
        ParStatus::Success => "success",
        ParStatus::RepairPossible => "repair-possible",
        ParStatus::Failure => "failure",
    }
}
fn par_status_from_tag(s: &str) -> ParStatus {
    match s {
        "skipped" => ParStatus::Skipped,
        "success" => ParStatus::Success,
        "repair-possible" => ParStatus::RepairPossible,
        "failure" => ParStatus::Failure,
        _ => ParStatus::None,
    }
}

fn unpack_status_tag(s: UnpackStatus) -> &'static str {
    match s {
        UnpackStatus::None => "none",
        UnpackStatus::Skipped => "skipped",
        UnpackStatus::Success => "success",
        UnpackStatus::Failure => "failure",
    }
}
fn unpack_status_from_tag(s: &str) -> UnpackStatus {
    match s {
        "skipped" => UnpackStatus::Skipped,
        "success" => UnpackStatus::Success,
        "failure" => UnpackStatus::Failure,
        _ => UnpackStatus::None,
    }
}

fn mark_status_tag(s: MarkStatus) -> &'static str {
    match s {
        MarkStatus::None => "none",
        MarkStatus::Bad => "bad",
        MarkStatus::Good => "good",
    }
}
fn mark_status_from_tag(s: &str) -> MarkStatus {
    match s {
        "bad" => MarkStatus::Bad,
        "good" => MarkStatus::Good,
        _ => MarkStatus::None,
    }
}

fn completed_file_status_tag(s: CompletedFileStatus) -> &'static str {
    match s {
        CompletedFileStatus::Success => "success",
        CompletedFileStatus::Partial => "partial",
        CompletedFileStatus::Failure => "failure",
    }
}
fn completed_file_status_from_tag(s: &str) -> CompletedFileStatus {
    match s {
        "partial" => CompletedFileStatus::Partial,
        _ if s == "failure" => CompletedFileStatus::Failure,
        _ => CompletedFileStatus::Success,
    }
}

fn article_status_tag(s: ArticleStatus) -> &'static str {
    match s {
        ArticleStatus::Undefined => "undefined",
        ArticleStatus::Running => "running",
        ArticleStatus::Finished => "finished",
        ArticleStatus::Failed => "failed",
    }
}
fn article_status_from_tag(s: &str) -> ArticleStatus {
    match s {
        "running" => ArticleStatus::Running,
        "finished" => ArticleStatus::Finished,
        "failed" => ArticleStatus::Failed,
        _ => ArticleStatus::Undefined,
    }
}

fn history_kind_tag(k: HistoryKind) -> &'static str {
    match k {
        HistoryKind::Nzb => "nzb",
        HistoryKind::Url => "url",
        HistoryKind::Dupe => "dupe",
    }
}
fn history_kind_from_tag(s: &str) -> HistoryKind {
    match s {
        "url" => HistoryKind::Url,
        "dupe" => HistoryKind::Dupe,
        _ => HistoryKind::Nzb,
    }
}

/// Write a snapshot of `state` to `path`, atomically: serialize to memory,
/// write to a sibling `.tmp` path, `sync_all`, then rename into place.
pub async fn write_snapshot(path: &Path, state: &QueueState) -> Result<()> {
    let buf = serialize_state(state);
    let tmp_path = path.with_extension("tmp");
    let write_result: std::io::Result<()> = async {
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        tokio::io::AsyncWriteExt::write_all(&mut file, buf.as_bytes()).await?;
        file.sync_all().await?;
        Ok(())
    }
    .await;
    if let Err(e) = write_result {
        log_failure!(error = %e, path = %path.display(), "failed to write queue snapshot");
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(Error::from_io(tmp_path, e));
    }
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::from_io(path, e))
}

/// Load a snapshot from `path`. Tolerant of a missing file (first run),
/// returning a fresh empty state.
pub async fn load_snapshot(path: &Path) -> Result<QueueState> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => deserialize_state(&text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(QueueState::new()),
        Err(e) => Err(Error::from_io(path, e)),
    }
}
