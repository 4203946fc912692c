//! Centralized scan state management
//!
//! One `ScanStateManager` is constructed at startup, owned by the
//! application state, and passed by reference to everything that needs
//! it. State is keyed by user id so concurrent scans for different users
//! never interfere; a single async mutex guards the whole map, which is
//! safe because transitions are O(1) and perform no I/O while holding it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Point-in-time scan status snapshot, as surfaced by the status endpoint
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanStatus {
    pub is_running: bool,
    pub current_location: Option<String>,
    pub files_scanned: i64,
    pub files_total: i64,
    pub current_file: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub errors: Vec<String>,
}

/// Progress fields mutated while a scan is running. `None` leaves the
/// field untouched; the nested options set a field to null.
#[derive(Debug, Default)]
pub struct ScanProgressUpdate {
    pub current_location: Option<Option<String>>,
    pub files_scanned: Option<i64>,
    pub files_total: Option<i64>,
    pub current_file: Option<Option<String>>,
}

#[derive(Debug, Default)]
struct UserScanState {
    status: ScanStatus,
    cancel_requested: bool,
}

/// Owns scan status and cancellation state for all users
#[derive(Debug, Default)]
pub struct ScanStateManager {
    inner: Mutex<HashMap<Uuid, UserScanState>>,
}

impl ScanStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy of the current scan status for a user
    pub async fn get_status(&self, user_id: Uuid) -> ScanStatus {
        let mut inner = self.inner.lock().await;
        inner.entry(user_id).or_default().status.clone()
    }

    /// Transition Idle -> Running, returning None if already running.
    /// Resets the cancellation flag, progress counters, and error log.
    pub async fn start_scan(&self, user_id: Uuid) -> Option<ScanStatus> {
        let mut inner = self.inner.lock().await;
        let state = inner.entry(user_id).or_default();

        if state.status.is_running {
            return None;
        }

        state.cancel_requested = false;
        state.status = ScanStatus {
            is_running: true,
            started_at: Some(Utc::now()),
            ..ScanStatus::default()
        };
        Some(state.status.clone())
    }

    /// Request cancellation of a running scan; None if nothing is running
    pub async fn cancel_scan(&self, user_id: Uuid) -> Option<ScanStatus> {
        let mut inner = self.inner.lock().await;
        let state = inner.entry(user_id).or_default();

        if !state.status.is_running {
            return None;
        }

        state.cancel_requested = true;
        Some(state.status.clone())
    }

    /// Poll whether cancellation has been requested
    pub async fn is_cancel_requested(&self, user_id: Uuid) -> bool {
        let mut inner = self.inner.lock().await;
        inner.entry(user_id).or_default().cancel_requested
    }

    /// Apply progress updates, returning the new status
    pub async fn update_status(&self, user_id: Uuid, update: ScanProgressUpdate) -> ScanStatus {
        let mut inner = self.inner.lock().await;
        let state = inner.entry(user_id).or_default();

        if let Some(location) = update.current_location {
            state.status.current_location = location;
        }
        if let Some(scanned) = update.files_scanned {
            state.status.files_scanned = scanned;
        }
        if let Some(total) = update.files_total {
            state.status.files_total = total;
        }
        if let Some(file) = update.current_file {
            state.status.current_file = file;
        }
        state.status.clone()
    }

    /// Append to the accumulating error log; never cleared until the next
    /// start_scan
    pub async fn append_error(&self, user_id: Uuid, error: impl Into<String>) -> ScanStatus {
        let mut inner = self.inner.lock().await;
        let state = inner.entry(user_id).or_default();
        state.status.errors.push(error.into());
        state.status.clone()
    }

    /// Transition Running -> Idle, keeping progress counters and errors
    /// for the final snapshot
    pub async fn finish_scan(&self, user_id: Uuid) -> ScanStatus {
        let mut inner = self.inner.lock().await;
        let state = inner.entry(user_id).or_default();

        state.cancel_requested = false;
        state.status.is_running = false;
        state.status.current_location = None;
        state.status.current_file = None;
        state.status.clone()
    }

    /// Reset a user's state entirely (test hook)
    pub async fn reset(&self, user_id: Uuid) {
        let mut inner = self.inner.lock().await;
        inner.remove(&user_id);
    }
}
