//! Incremental text patch application.
//!
//! The sharer computes patches with the diff-match-patch library and ships
//! them in its patch-text encoding; this module treats that encoding as
//! opaque and only decides whether applying it actually changed the stored
//! text. Patches are advisory: the apply step may fail per-hunk, and only a
//! real text delta is a broadcast trigger.

use diff_match_patch_rs::{DiffMatchPatch, Efficient, PatchInput};
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::SyncError;

/// An opaque, ordered set of text patch operations in diff-match-patch
/// patch-text encoding.
///
/// A `PatchSet` is applicable only to the cell text it was derived against;
/// it carries no base-version token. Ordering is the transport's per-connection
/// delivery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatchSet(String);

impl PatchSet {
    /// Wrap an already-encoded patch text.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// The raw patch-text encoding.
    pub fn as_text(&self) -> &str {
        &self.0
    }

    /// True when the set contains no patch operations.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compute the patch set that transforms `old` into `new`.
    ///
    /// This is the sharer-side half of the exchange; the server only ever
    /// applies.
    pub fn between(old: &str, new: &str) -> Result<Self, SyncError> {
        let dmp = DiffMatchPatch::new();
        let diffs = dmp
            .diff_main::<Efficient>(old, new)
            .map_err(|e| SyncError::Patch(format!("diff failed: {e:?}")))?;
        let patches = dmp
            .patch_make(PatchInput::new_diffs(&diffs))
            .map_err(|e| SyncError::Patch(format!("patch_make failed: {e:?}")))?;
        Ok(Self(dmp.patch_to_text(&patches)))
    }
}

/// Result of applying a patch set to one cell.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchOutcome {
    /// Whether the stored text actually changed.
    pub changed: bool,
    /// The cell text after application (the prior text when unchanged).
    pub text: String,
}

/// Apply a patch set to the text of the cell at `index`.
///
/// Empty patch sets short-circuit before the diff collaborator is invoked:
/// its apply step can return a modified string even for an empty input, and
/// a no-op must not reach the store. When the applied result equals the
/// stored text nothing is mutated and `changed` is false; only a real delta
/// updates the cell.
pub fn apply_text_patch(
    doc: &mut Document,
    index: usize,
    patch_set: &PatchSet,
) -> Result<PatchOutcome, SyncError> {
    let current = doc.cell(index)?.text.clone();

    if patch_set.is_empty() {
        return Ok(PatchOutcome {
            changed: false,
            text: current,
        });
    }

    let dmp = DiffMatchPatch::new();
    let patches = dmp
        .patch_from_text::<Efficient>(patch_set.as_text())
        .map_err(|e| SyncError::Patch(format!("undecodable patch set: {e:?}")))?;
    let (new_text, _applied) = dmp
        .patch_apply(&patches, &current)
        .map_err(|e| SyncError::Patch(format!("apply failed: {e:?}")))?;

    if new_text == current {
        return Ok(PatchOutcome {
            changed: false,
            text: current,
        });
    }

    doc.set_cell_text(index, new_text.clone())?;
    Ok(PatchOutcome {
        changed: true,
        text: new_text,
    })
}
