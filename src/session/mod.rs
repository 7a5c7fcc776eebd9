// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Session state: records, persistence, locking, compression and revert

pub mod compression;
pub mod lock;
pub mod model;
pub mod revert;
pub mod store;

pub use compression::{CompressionOutcome, CompressionPolicy, Summarizer, TranscriptSummarizer};
pub use lock::{Acquisition, QueueTicket, SessionLockGuard, SessionLocks};
pub use model::*;
pub use revert::{NoopSnapshotProvider, RevertManager, SnapshotProvider};
pub use store::{FileSessionStore, MemorySessionStore, SessionDocument, SessionStore, SessionUpdate};
