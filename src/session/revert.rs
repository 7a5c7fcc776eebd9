// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Two-phase revert
//!
//! Phase 1 only records what a rewind would remove and which workspace
//! snapshot to restore. Phase 2 applies the record at the start of the next
//! turn, under the session lock, and clears it.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Result, TandemError};
use crate::session::model::{
    PartKind, RevertRecord, SessionMessage, StepKind, ToolCallState,
};
use crate::session::store::{find_message, SessionStore};
use crate::tools::permission::is_file_change_tool;

/// Workspace snapshot boundary
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Capture the current workspace state and return its id
    async fn create_snapshot(&self, session_id: &str) -> Result<String>;

    /// Restore the workspace to a captured state
    async fn restore_snapshot(&self, session_id: &str, snapshot_id: &str) -> Result<()>;
}

/// Snapshot provider for hosts without workspace tracking
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSnapshotProvider;

#[async_trait]
impl SnapshotProvider for NoopSnapshotProvider {
    async fn create_snapshot(&self, _session_id: &str) -> Result<String> {
        Ok(format!("noop-{}", Uuid::now_v7()))
    }

    async fn restore_snapshot(&self, _session_id: &str, _snapshot_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Where history is cut
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cut {
    /// Index of the target message
    message_index: usize,
    /// First removed part inside the target message, when part-targeted
    part_index: Option<usize>,
}

impl Cut {
    fn locate(
        messages: &[SessionMessage],
        message_id: Uuid,
        part_id: Option<Uuid>,
    ) -> Option<Self> {
        let message_index = find_message(messages, message_id)?;
        let part_index = match part_id {
            Some(part_id) => Some(messages[message_index].part_index(part_id)?),
            None => None,
        };
        Some(Self {
            message_index,
            part_index,
        })
    }

    /// Whether the target message itself disappears
    fn removes_target_message(&self) -> bool {
        self.part_index.map(|index| index == 0).unwrap_or(true)
    }

    fn removed_message_count(&self, total: usize) -> usize {
        let after = total - self.message_index - 1;
        after + usize::from(self.removes_target_message())
    }

    /// Removed parts in history order
    fn removed_parts<'a>(
        &self,
        messages: &'a [SessionMessage],
    ) -> impl Iterator<Item = &'a PartKind> + 'a {
        let first = self.part_index.unwrap_or(0);
        let target = &messages[self.message_index];
        target.parts[first..]
            .iter()
            .chain(
                messages[self.message_index + 1..]
                    .iter()
                    .flat_map(|m| m.parts.iter()),
            )
            .map(|part| &part.kind)
    }

    /// Apply to a history
    fn apply(&self, mut messages: Vec<SessionMessage>) -> Vec<SessionMessage> {
        match self.part_index {
            Some(index) if index > 0 => {
                messages.truncate(self.message_index + 1);
                messages[self.message_index].parts.truncate(index);
            }
            _ => messages.truncate(self.message_index),
        }
        messages
    }
}

fn snapshot_of(kind: &PartKind) -> Option<&str> {
    match kind {
        PartKind::StepBoundary {
            kind: StepKind::Start,
            snapshot: Some(snapshot),
            ..
        } => Some(snapshot.as_str()),
        _ => None,
    }
}

/// Snapshot taken before the earliest removed step ran.
///
/// Falls back to the step the target part sits in when the removed region
/// starts mid-step.
fn restore_point(messages: &[SessionMessage], cut: &Cut) -> Option<String> {
    if let Some(found) = cut.removed_parts(messages).find_map(snapshot_of) {
        return Some(found.to_string());
    }
    let index = cut.part_index?;
    messages[cut.message_index].parts[..index]
        .iter()
        .rev()
        .find_map(|part| snapshot_of(&part.kind))
        .map(String::from)
}

/// Records and applies reverts for sessions
#[derive(Clone)]
pub struct RevertManager {
    store: Arc<dyn SessionStore>,
    snapshots: Arc<dyn SnapshotProvider>,
}

impl RevertManager {
    /// Create a manager over a store and a snapshot boundary
    pub fn new(store: Arc<dyn SessionStore>, snapshots: Arc<dyn SnapshotProvider>) -> Self {
        Self { store, snapshots }
    }

    /// Phase 1: record a revert to `message_id` (optionally from `part_id`)
    pub async fn revert(
        &self,
        session_id: &str,
        message_id: Uuid,
        part_id: Option<Uuid>,
    ) -> Result<RevertRecord> {
        if self.store.get_session(session_id).await?.is_none() {
            return Err(TandemError::NotFound(format!("session {}", session_id)));
        }
        let messages = self.store.messages(session_id).await?;
        let Some(cut) = Cut::locate(&messages, message_id, part_id) else {
            tracing::warn!(
                target: "tandem.session.revert",
                session_id,
                %message_id,
                part_id = ?part_id,
                "Revert target not found"
            );
            return Err(TandemError::RevertInconsistency(format!(
                "message {} not found in session {}",
                message_id, session_id
            )));
        };

        let file_changes = cut
            .removed_parts(&messages)
            .filter(|kind| match kind {
                PartKind::ToolCall(call) => {
                    call.state == ToolCallState::Completed && is_file_change_tool(&call.tool_name)
                }
                _ => false,
            })
            .count();

        let pre_revert_snapshot_id = self.snapshots.create_snapshot(session_id).await?;
        let record = RevertRecord {
            session_id: session_id.to_string(),
            target_message_id: message_id,
            target_part_id: part_id,
            timestamp: Utc::now(),
            pre_revert_snapshot_id,
            restore_snapshot_id: restore_point(&messages, &cut),
            reverted_message_count: cut.removed_message_count(messages.len()),
            reverted_file_change_count: file_changes,
        };

        let stored = record.clone();
        self.store
            .update_session(
                session_id,
                Box::new(move |session| session.pending_revert = Some(stored)),
            )
            .await?;

        tracing::info!(
            target: "tandem.session.revert",
            session_id,
            messages = record.reverted_message_count,
            file_changes = record.reverted_file_change_count,
            "Revert recorded"
        );
        Ok(record)
    }

    /// Drop a pending revert without applying it
    pub async fn unrevert(&self, session_id: &str) -> Result<Option<RevertRecord>> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| TandemError::NotFound(format!("session {}", session_id)))?;
        let Some(record) = session.pending_revert else {
            return Ok(None);
        };
        self.clear_record(session_id).await?;
        tracing::debug!(target: "tandem.session.revert", session_id, "Revert discarded");
        Ok(Some(record))
    }

    /// Phase 2: apply and clear a pending revert, if any
    pub async fn cleanup(&self, session_id: &str) -> Result<Option<RevertRecord>> {
        let Some(session) = self.store.get_session(session_id).await? else {
            return Ok(None);
        };
        let Some(record) = session.pending_revert else {
            return Ok(None);
        };

        let messages = self.store.messages(session_id).await?;
        let Some(cut) = Cut::locate(&messages, record.target_message_id, record.target_part_id)
        else {
            tracing::warn!(
                target: "tandem.session.revert",
                session_id,
                target = %record.target_message_id,
                "Revert target vanished before cleanup, discarding record"
            );
            self.clear_record(session_id).await?;
            return Ok(None);
        };

        if let Some(snapshot_id) = &record.restore_snapshot_id {
            self.snapshots
                .restore_snapshot(session_id, snapshot_id)
                .await?;
        }

        let before = messages.len();
        let kept = cut.apply(messages);
        let removed = before - kept.len();
        self.store.replace_messages(session_id, kept).await?;
        self.clear_record(session_id).await?;

        tracing::info!(
            target: "tandem.session.revert",
            session_id,
            removed,
            restored = record.restore_snapshot_id.is_some(),
            "Revert applied"
        );
        Ok(Some(record))
    }

    async fn clear_record(&self, session_id: &str) -> Result<()> {
        self.store
            .update_session(session_id, Box::new(|session| session.pending_revert = None))
            .await?;
        Ok(())
    }
}
