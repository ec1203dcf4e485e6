//! Article Downloader Worker (C5): a single-shot operation bound to one
//! (article, connection) pair (§4.5).
//!
//! A worker only touches its connection and the filesystem — it never
//! takes the queue lock. The caller (the engine loop wiring C4 and C5
//! together) is responsible for feeding the returned outcome into
//! [`crate::scheduler::Scheduler::record_outcome`], which is
//! where article/file status actually mutates under the lock (§4.5
//! "Ordering").

use std::path::{Path, PathBuf};

use crate::decoder::{Decoder, Format, Status, UDecoder, YDecoder, detect_format};
use crate::error::Error;
use crate::log_failure;
use crate::model::{ArticleId, FileId};
use crate::server_pool::Outcome as ServerOutcome;

/// Everything a worker needs to know about the article it was handed,
/// read out of the queue once under the lock before dispatch.
#[derive(Clone, Debug)]
pub struct ArticleTask {
    pub article_id: ArticleId,
    pub file_id: FileId,
    pub part_number: u32,
    pub message_id: String,
}

/// What happened attempting to fetch and decode one article.
#[derive(Debug)]
pub struct WorkerOutcome {
    pub outcome: ServerOutcome,
    /// Path of the renamed-into-place segment file, set whenever the
    /// decoder produced any output — even on a CRC/size mismatch, so the
    /// bytes remain available for PAR recovery (§7 "CRC mismatch fails
    /// the article but its partial bytes are retained").
    pub segment_path: Option<PathBuf>,
    pub crc: Option<u32>,
    pub detail: String,
    /// Set when the failure was a disk-full condition on the write/rename
    /// of the segment file (§7: "fatal to the current file and, if
    /// space-related, pause downloads globally"). The caller is
    /// responsible for acting on this; a worker never pauses anything
    /// itself.
    pub disk_full: bool,
}

impl WorkerOutcome {
    fn retry(detail: impl Into<String>) -> Self {
        Self {
            outcome: ServerOutcome::Retry,
            segment_path: None,
            crc: None,
            detail: detail.into(),
            disk_full: false,
        }
    }

    fn hard_fail(detail: impl Into<String>) -> Self {
        Self {
            outcome: ServerOutcome::HardFail,
            segment_path: None,
            crc: None,
            detail: detail.into(),
            disk_full: false,
        }
    }

    /// Classify a write/rename failure on `path` via [`Error::from_io`] and
    /// produce the matching hard-fail outcome, flagging `disk_full` when
    /// the underlying error was `ENOSPC`/`StorageFull`.
    fn from_disk_error(path: &Path, source: std::io::Error) -> Self {
        let disk_full = matches!(source.kind(), std::io::ErrorKind::StorageFull);
        let err = Error::from_io(path, source);
        Self {
            outcome: ServerOutcome::HardFail,
            segment_path: None,
            crc: None,
            detail: err.to_string(),
            disk_full,
        }
    }
}

/// Check whether an NNTP error indicates a missing/expired article (vs a
/// connection/protocol failure) — the distinction between "try another
/// server" (recorded as a per-server failure, §4.4) and "retry the same
/// connection" that the scheduler's retry policy needs.
fn is_missing_article_error(err: &nntp_rs::NntpError) -> bool {
    match err {
        nntp_rs::NntpError::NoSuchArticle(_) => true,
        nntp_rs::NntpError::Protocol { code, .. } if *code == 430 => true,
        other => {
            let msg = other.to_string();
            msg.contains("No such article") || msg.contains("no such article")
        }
    }
}

/// Fetch and decode one article over `pool`, storing the decoded segment
/// under `segments_dir` on success (or partial success, for recovery).
pub async fn download_article(
    pool: &nntp_rs::NntpPool,
    task: &ArticleTask,
    segments_dir: &Path,
) -> WorkerOutcome {
    let message_id = if task.message_id.starts_with('<') {
        task.message_id.clone()
    } else {
        format!("<{}>", task.message_id)
    };

    let mut conn = match pool.get().await {
        Ok(conn) => conn,
        Err(e) => return WorkerOutcome::retry(format!("no connection available: {e}")),
    };

    let responses = match conn.fetch_articles_pipelined(&[message_id.as_str()], 1).await {
        Ok(r) => r,
        Err(e) => {
            return if is_missing_article_error(&e) {
                WorkerOutcome::retry(e.to_string())
            } else {
                WorkerOutcome::hard_fail(e.to_string())
            };
        }
    };
    drop(conn);

    let Some(response) = responses.into_iter().next() else {
        return WorkerOutcome::retry("empty response for article");
    };

    let segment_path = segments_dir.join(format!("{}.{:05}.segment", task.file_id.get(), task.part_number));
    let tmp_path = segments_dir.join(format!("{}.{:05}.segment.tmp", task.file_id.get(), task.part_number));

    tokio::task::spawn_blocking(move || decode_and_store(&response.data, &tmp_path, &segment_path))
        .await
        .unwrap_or_else(|e| WorkerOutcome::hard_fail(format!("decode task panicked: {e}")))
}

/// CPU-bound decode step, run on a blocking thread so tokio workers stay
/// free to drive other connections.
fn decode_and_store(data: &[u8], tmp_path: &Path, segment_path: &Path) -> WorkerOutcome {
    let mut decoder: Box<dyn Decoder> = match detect_format(data) {
        Format::Yenc => Box::new(YDecoder::new()),
        Format::Uu => Box::new(UDecoder::new()),
        Format::Unknown => return WorkerOutcome::hard_fail("no binary data recognized in article body"),
    };
    decoder.decode_buffer(data);
    let status = decoder.check();
    let output = decoder.output();

    if output.is_empty() {
        return match status {
            Status::Ok => WorkerOutcome::hard_fail("decoder reported ok with empty output"),
            _ => WorkerOutcome::hard_fail("no binary data recognized in article body"),
        };
    }

    let crc = Some(decoder.calculated_crc());
    if let Err(e) = std::fs::write(tmp_path, output) {
        return WorkerOutcome::from_disk_error(tmp_path, e);
    }
    if let Err(e) = std::fs::rename(tmp_path, segment_path) {
        let _ = std::fs::remove_file(tmp_path);
        return WorkerOutcome::from_disk_error(segment_path, e);
    }

    let stored = Some(segment_path.to_path_buf());
    match status {
        Status::Ok => WorkerOutcome {
            outcome: ServerOutcome::Success,
            segment_path: stored,
            crc,
            detail: "ok".into(),
            disk_full: false,
        },
        Status::Incomplete => WorkerOutcome {
            outcome: ServerOutcome::Retry,
            segment_path: stored,
            crc,
            detail: "article truncated before =yend/end".into(),
            disk_full: false,
        },
        Status::CrcMismatch => {
            log_failure!(crc = ?crc, "decoded segment failed CRC verification");
            WorkerOutcome {
                outcome: ServerOutcome::HardFail,
                segment_path: stored,
                crc,
                detail: "CRC mismatch".into(),
                disk_full: false,
            }
        }
        Status::SizeMismatch => {
            log_failure!("decoded size did not match declared size");
            WorkerOutcome {
                outcome: ServerOutcome::HardFail,
                segment_path: stored,
                crc,
                detail: "decoded size did not match declared size".into(),
                disk_full: false,
            }
        }
        Status::NoBinaryData => WorkerOutcome::hard_fail("no binary data recognized in article body"),
        Status::UnknownError => WorkerOutcome {
            outcome: ServerOutcome::HardFail,
            segment_path: stored,
            crc,
            detail: "unknown decoder error".into(),
            disk_full: false,
        },
    }
}

/// One article's contribution to a completed file, read out of the queue
/// under the lock before assembly is handed off to a blocking thread.
#[derive(Clone, Debug)]
pub struct AssembledSegment {
    pub part_number: u32,
    pub segment_path: Option<PathBuf>,
}

/// Assemble a FileInfo's segment files into the final output file (§4.4
/// "File completion"). Segments missing a path (the article never
/// finished) are skipped, leaving a gap — the caller has already recorded
/// this as a `Partial`/`Failure` [`crate::model::CompletedFileStatus`].
///
/// Returns the whole-file CRC32 computed over the assembled bytes, or
/// `None` if no segment contributed any data.
pub fn assemble_file(mut segments: Vec<AssembledSegment>, destination: &Path) -> crate::error::Result<Option<u32>> {
    segments.sort_by_key(|s| s.part_number);

    let tmp_path = destination.with_extension("assembling.tmp");
    let mut hasher = crc32fast::Hasher::new();
    let mut wrote_any = false;
    {
        let mut out = std::fs::File::create(&tmp_path).map_err(|e| Error::from_io(&tmp_path, e))?;
        for segment in &segments {
            let Some(path) = &segment.segment_path else {
                continue;
            };
            let data = std::fs::read(path).map_err(|e| Error::from_io(path, e))?;
            hasher.update(&data);
            std::io::Write::write_all(&mut out, &data).map_err(|e| Error::from_io(&tmp_path, e))?;
            wrote_any = true;
        }
    }
    if let Err(e) = std::fs::rename(&tmp_path, destination) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(Error::from_io(destination, e));
    }

    Ok(wrote_any.then(|| hasher.finalize()))
}
