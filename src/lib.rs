//! CineAudit backend library
//!
//! Audits a personal media library for audio-track compliance: scans
//! configured locations, probes audio tracks with ffprobe, reconciles
//! files into a show/season catalog with Plex-assisted identity
//! resolution, and evaluates user-configured preference rules.

pub mod api;
pub mod config;
pub mod db;
pub mod services;

use std::sync::Arc;

use crate::config::Config;
use crate::db::Database;
use crate::services::ScanStateManager;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub scan_state: Arc<ScanStateManager>,
}
