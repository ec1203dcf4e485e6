//! Typed queue model (§3): [`NzbInfo`]/[`FileInfo`]/[`ArticleInfo`]/
//! [`HistoryInfo`]/[`NewsServer`], plus the ids that link them.
//!
//! Back-references (child -> parent) are ids, not owning pointers — the
//! arena lives in [`crate::queue::QueueState`] and every resolution goes
//! through the queue lock, per the Design Notes' replacement for the
//! original's raw back-pointers.

mod article;
mod file;
mod history;
mod ids;
mod nzb;
mod server;

pub use article::{ArticleInfo, ArticleStatus};
pub use file::{CompletedFile, CompletedFileStatus, FileInfo};
pub use history::{HistoryInfo, HistoryKind};
pub use ids::{ArticleId, FileId, IdAllocator, NzbId, ServerId};
pub use nzb::{
    DeleteStatus, DupeMode, MarkStatus, NzbInfo, NzbParameters, ParStatus, UnpackStatus, UrlStatus,
};
pub use server::NewsServer;
