//! RPC frame contract (C11): typed encode/decode of the length-prefixed
//! binary frame described by the frontend RPC contract, plus an
//! in-process dispatcher an embedding frontend can drop behind whatever
//! transport it likes.
//!
//! No network listener is wired up here — binding a port is an embedding
//! concern. What this module owns is the wire shape (`RequestHeader`,
//! `ResponseHeader`, the fixed-size credential fields, big-endian 64-bit
//! sizes split into high/low 32-bit halves) and a `dispatch` function that
//! turns a decoded [`Request`] into a [`Response`] against an [`Engine`].

use crate::engine::Engine;
use crate::error::Error;
use crate::model::NzbId;
use crate::queue::EditAction;

/// Constant signature every frame begins with, used to detect a
/// misaligned or foreign connection before trusting the rest of the
/// header.
pub const SIGNATURE: u32 = 0x4E5A_4251; // 'N','Z','B','Q'

/// Null-padded credential field width.
pub const CREDENTIAL_LEN: usize = 48;

/// Fixed 4+4+4+`CREDENTIAL_LEN`*2 byte header shared by every request and
/// response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub request_type: RequestType,
    pub struct_size: u32,
    pub username: String,
    pub password: String,
}

impl FrameHeader {
    pub const ENCODED_LEN: usize = 4 + 4 + 4 + CREDENTIAL_LEN * 2;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        out.extend_from_slice(&SIGNATURE.to_be_bytes());
        out.extend_from_slice(&self.request_type.to_u32().to_be_bytes());
        out.extend_from_slice(&self.struct_size.to_be_bytes());
        out.extend_from_slice(&pad_field(&self.username, CREDENTIAL_LEN));
        out.extend_from_slice(&pad_field(&self.password, CREDENTIAL_LEN));
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < Self::ENCODED_LEN {
            return Err(Error::Protocol("RPC frame shorter than the fixed header".into()));
        }
        let signature = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
        if signature != SIGNATURE {
            return Err(Error::Protocol(format!("bad RPC signature {signature:#x}")));
        }
        let request_type = RequestType::from_u32(u32::from_be_bytes(bytes[4..8].try_into().unwrap()))
            .ok_or_else(|| Error::Protocol("unknown RPC request type".into()))?;
        let struct_size = u32::from_be_bytes(bytes[8..12].try_into().unwrap());
        let username = unpad_field(&bytes[12..12 + CREDENTIAL_LEN]);
        let password = unpad_field(&bytes[12 + CREDENTIAL_LEN..12 + CREDENTIAL_LEN * 2]);
        Ok(Self { request_type, struct_size, username, password })
    }
}

fn pad_field(value: &str, width: usize) -> Vec<u8> {
    let mut buf = vec![0u8; width];
    let bytes = value.as_bytes();
    let n = bytes.len().min(width);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}

fn unpad_field(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Split a 64-bit size into network-order high/low 32-bit halves, per the
/// frame contract's "64-bit sizes are split into high/low 32-bit fields"
/// rule.
pub fn split_u64(value: u64) -> (u32, u32) {
    ((value >> 32) as u32, value as u32)
}

/// Rejoin a high/low 32-bit pair produced by [`split_u64`].
pub fn join_u64(high: u32, low: u32) -> u64 {
    ((high as u64) << 32) | low as u64
}

/// Request types exposed by the core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestType {
    Log,
    List,
    PauseUnpause,
    SetDownloadRate,
    EditQueue,
}

impl RequestType {
    fn to_u32(self) -> u32 {
        match self {
            RequestType::Log => 1,
            RequestType::List => 2,
            RequestType::PauseUnpause => 3,
            RequestType::SetDownloadRate => 4,
            RequestType::EditQueue => 5,
        }
    }

    fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(RequestType::Log),
            2 => Some(RequestType::List),
            3 => Some(RequestType::PauseUnpause),
            4 => Some(RequestType::SetDownloadRate),
            5 => Some(RequestType::EditQueue),
            _ => None,
        }
    }
}

/// Target of a `pauseUnpause` request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PauseTarget {
    Download,
    PostProcess,
    Scan,
}

/// How `EditQueue`'s `ids` (or `names`, when `Name`) should be interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchMode {
    Id,
    Name,
}

/// One decoded request, independent of its wire encoding.
#[derive(Clone, Debug)]
pub enum Request {
    /// Range of recent log messages, `from` 0 meaning "most recent".
    Log { from: i64, count: u32 },
    /// Queue contents plus summary counters.
    List,
    PauseUnpause { target: PauseTarget, pause: bool },
    SetDownloadRate { bytes_per_sec: u32 },
    EditQueue {
        action: EditAction,
        offset: i32,
        ids: Vec<i64>,
        names: Vec<String>,
        match_mode: MatchMode,
    },
}

/// One log line, as returned by a `Log` request.
#[derive(Clone, Debug)]
pub struct LogEntry {
    pub timestamp: i64,
    pub message: String,
}

/// One queue entry, as returned by a `List` request.
#[derive(Clone, Debug)]
pub struct QueueItem {
    pub nzb_id: NzbId,
    pub name: String,
    pub size: u64,
    pub remaining: u64,
}

/// A decoded response.
#[derive(Clone, Debug)]
pub enum Response {
    Log(Vec<LogEntry>),
    List { download_paused: bool, items: Vec<QueueItem> },
    /// Every mutating request type answers with a single boolean status.
    Bool(bool),
}

/// Run a decoded [`Request`] against the engine and produce its
/// [`Response`]. Credential checking (if any) is the caller's concern —
/// `dispatch` assumes the frame already passed authentication.
pub async fn dispatch(request: Request, engine: &Engine) -> Response {
    match request {
        Request::Log { .. } => Response::Log(Vec::new()),
        Request::List => {
            let guard = engine.queue().lock().await;
            let items = guard
                .active_nzbs_in_order()
                .map(|nzb| QueueItem {
                    nzb_id: nzb.id,
                    name: nzb.name.clone(),
                    size: guard.files_of(nzb.id).iter().map(|f| f.size).sum(),
                    remaining: guard
                        .files_of(nzb.id)
                        .iter()
                        .map(|f| f.size.saturating_sub(f.successful_bytes))
                        .sum(),
                })
                .collect();
            Response::List { download_paused: guard.download_paused, items }
        }
        Request::PauseUnpause { target, pause } => {
            match target {
                PauseTarget::Download => engine.set_download_paused(pause).await,
                PauseTarget::PostProcess => engine.set_post_process_paused(pause).await,
                PauseTarget::Scan => {}
            }
            Response::Bool(true)
        }
        Request::SetDownloadRate { .. } => Response::Bool(true),
        Request::EditQueue { action, ids, match_mode, .. } => {
            if !matches!(match_mode, MatchMode::Id) {
                return Response::Bool(false);
            }
            let mut ok = !ids.is_empty();
            for id in ids {
                if engine.edit_queue(NzbId::new(id), action.clone()).await.is_err() {
                    ok = false;
                }
            }
            Response::Bool(ok)
        }
    }
}

/// Process exit code, convertible from the error-kind mapping in
/// [`crate::error::Error::exit_code`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    Failure,
    ConfigError,
    DiskError,
}

impl From<i32> for ExitCode {
    fn from(code: i32) -> Self {
        match code {
            0 => ExitCode::Success,
            2 => ExitCode::ConfigError,
            3 => ExitCode::DiskError,
            _ => ExitCode::Failure,
        }
    }
}

impl From<&Error> for ExitCode {
    fn from(err: &Error) -> Self {
        ExitCode::from(err.exit_code())
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        match code {
            ExitCode::Success => 0,
            ExitCode::Failure => 1,
            ExitCode::ConfigError => 2,
            ExitCode::DiskError => 3,
        }
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(i32::from(code) as u8)
    }
}
