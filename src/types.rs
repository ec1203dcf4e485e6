//! The engine's event bus payload (§3 `Event`, §9 "Observers").
//!
//! Every lifecycle transition C2-C7 cares about is folded into one tagged
//! enum and broadcast post-commit by [`crate::engine::Engine`], keeping the
//! crate's core vocabulary in one small, densely-derived module.

use serde::{Deserialize, Serialize};

use crate::model::{ArticleId, CompletedFile, FileId, NzbId};
use crate::par::Stage as ParStage;
use crate::queue_script::QueueEvent;

/// One state transition the engine wants observers to know about.
///
/// Dispatched post-commit (after the queue lock that produced it has been
/// released), per §5 "Ordering guarantees": observers see events in commit
/// order, never interleaved with the mutation itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Event {
    /// An article was handed to a worker.
    ArticleStarted { nzb_id: NzbId, article_id: ArticleId },
    /// An article finished successfully.
    ArticleFinished { nzb_id: NzbId, article_id: ArticleId },
    /// An article exhausted every server/level and was marked failed.
    ArticleFailed { nzb_id: NzbId, article_id: ArticleId },
    /// A file's articles all reached a terminal status and were assembled.
    FileCompleted {
        nzb_id: NzbId,
        file_id: FileId,
        completed: CompletedFile,
    },
    /// Every file in an NZB is terminal; it has moved to post-processing.
    NzbDownloaded { nzb_id: NzbId },
    /// An NZB left the active queue (operator delete, health failure, dupe, mark-bad).
    NzbDeleted { nzb_id: NzbId },
    /// The NZB's download health fell below the configured threshold.
    NzbHealthFailed { nzb_id: NzbId },
    /// The PAR coordinator entered a new stage for this NZB.
    ParStageChanged { nzb_id: NzbId, stage: ParStage },
    /// A queue script started running.
    ScriptStarted {
        nzb_id: NzbId,
        script_name: String,
        event: QueueEvent,
    },
    /// A queue script finished, successfully or not.
    ScriptFinished {
        nzb_id: NzbId,
        script_name: String,
        exit_success: bool,
    },
    /// A script (or an edit) changed an NZB parameter.
    NzbParamChanged {
        nzb_id: NzbId,
        name: String,
        value: String,
    },
}
