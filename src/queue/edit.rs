//! The stable edit-action vocabulary (§4.2) applied to [`QueueState`].
//!
//! Every action here is atomic: for a single-id action this is automatic
//! (one state mutation under the lock); for a list action
//! ([`DownloadQueue::edit_list`]) we validate every target before
//! mutating any of them, so the whole batch either applies or none of it
//! does.

use chrono::Utc;

use crate::model::{DeleteStatus, HistoryInfo, HistoryKind, MarkStatus, NzbId};

use super::state::QueueState;

/// One of the operator-facing edit actions from §4.2.
#[derive(Clone, Debug)]
pub enum EditAction {
    /// Remove the NZB, recording `status` in its history entry.
    Delete { status: DeleteStatus },
    Pause,
    Resume,
    PriorityUp,
    PriorityDown,
    PriorityTop,
    PriorityBottom,
    /// Move the NZB by `offset` positions in the declared queue order
    /// (negative moves earlier).
    Move { offset: i32 },
    Rename { name: String },
    SetCategory { category: Option<String> },
    SetParameter { name: String, value: String },
    /// Pause every currently-unpaused PAR2 file belonging to the NZB,
    /// the inverse of the PAR coordinator's on-demand unpausing.
    PauseExtraPars,
    MarkBad,
    MarkGood,
}

/// Outcome of validating (but not yet applying) an edit against current state.
#[derive(Debug, PartialEq, Eq)]
pub enum EditError {
    NotFound(NzbId),
}

impl QueueState {
    /// Apply a single edit action, atomically. Returns an error without
    /// mutating anything if the target does not exist.
    pub fn apply_edit(&mut self, id: NzbId, action: &EditAction) -> Result<(), EditError> {
        self.validate_edit(id, action)?;
        self.apply_edit_unchecked(id, action);
        Ok(())
    }

    /// Apply the same action to a list of NZBs atomically: if any target
    /// is missing, none of the edits are applied.
    pub fn apply_edit_list(
        &mut self,
        ids: &[NzbId],
        action: &EditAction,
    ) -> Result<(), EditError> {
        for &id in ids {
            self.validate_edit(id, action)?;
        }
        for &id in ids {
            self.apply_edit_unchecked(id, action);
        }
        Ok(())
    }

    fn validate_edit(&self, id: NzbId, _action: &EditAction) -> Result<(), EditError> {
        if self.nzb(id).is_some() {
            Ok(())
        } else {
            Err(EditError::NotFound(id))
        }
    }

    fn apply_edit_unchecked(&mut self, id: NzbId, action: &EditAction) {
        match action {
            EditAction::Delete { status } => {
                if let Some(nzb) = self.nzb_mut(id) {
                    nzb.set_delete_status(*status);
                }
                if let Some(nzb) = self.nzbs.get(&id).cloned() {
                    self.move_to_history(id, HistoryInfo::new(HistoryKind::Nzb, nzb, Utc::now()));
                }
            }
            EditAction::Pause => {
                if let Some(nzb) = self.nzb_mut(id) {
                    // Idempotent: applying pause twice is equivalent to once (§8 law).
                    nzb.paused = true;
                }
            }
            EditAction::Resume => {
                if let Some(nzb) = self.nzb_mut(id) {
                    nzb.paused = false;
                }
            }
            EditAction::PriorityUp => {
                if let Some(nzb) = self.nzb_mut(id) {
                    nzb.priority += 1;
                }
            }
            EditAction::PriorityDown => {
                if let Some(nzb) = self.nzb_mut(id) {
                    nzb.priority -= 1;
                }
            }
            EditAction::PriorityTop => {
                if let Some(max) = self.nzbs.values().map(|n| n.priority).max() {
                    if let Some(nzb) = self.nzb_mut(id) {
                        nzb.priority = max + 1;
                    }
                }
            }
            EditAction::PriorityBottom => {
                if let Some(min) = self.nzbs.values().map(|n| n.priority).min() {
                    if let Some(nzb) = self.nzb_mut(id) {
                        nzb.priority = min - 1;
                    }
                }
            }
            EditAction::Move { offset } => {
                self.move_in_order(id, *offset);
            }
            EditAction::Rename { name } => {
                if let Some(nzb) = self.nzb_mut(id) {
                    nzb.name = name.clone();
                }
            }
            EditAction::SetCategory { category } => {
                if let Some(nzb) = self.nzb_mut(id) {
                    nzb.category = category.clone();
                }
            }
            EditAction::SetParameter { name, value } => {
                if let Some(nzb) = self.nzb_mut(id) {
                    nzb.parameters.set(name.clone(), value.clone());
                }
            }
            EditAction::PauseExtraPars => {
                let file_ids: Vec<_> = self.nzb(id).map(|n| n.files.clone()).unwrap_or_default();
                for fid in file_ids {
                    if let Some(file) = self.file_mut(fid) {
                        if file.par_file {
                            file.paused = true;
                        }
                    }
                }
            }
            EditAction::MarkBad => {
                if let Some(nzb) = self.nzb_mut(id) {
                    nzb.set_mark_status(MarkStatus::Bad);
                    nzb.set_delete_status(DeleteStatus::Bad);
                }
            }
            EditAction::MarkGood => {
                if let Some(nzb) = self.nzb_mut(id) {
                    nzb.set_mark_status(MarkStatus::Good);
                }
            }
        }
    }

    fn move_in_order(&mut self, id: NzbId, offset: i32) {
        let Some(pos) = self.order.iter().position(|n| *n == id) else {
            return;
        };
        let new_pos = (pos as i64 + offset as i64).clamp(0, self.order.len() as i64 - 1) as usize;
        if new_pos != pos {
            let item = self.order.remove(pos);
            self.order.insert(new_pos, item);
        }
    }
}
