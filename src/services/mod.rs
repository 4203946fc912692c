//! Core services: scanning, analysis, identity resolution, preferences

pub mod analyzer;
pub mod audio_fixer;
pub mod exporter;
pub mod identity_matcher;
pub mod path_inference;
pub mod plex;
pub mod preference_engine;
pub mod scan_state;
pub mod scanner;

pub use analyzer::{AudioAnalyzer, AudioInfo, AudioTrackInfo};
pub use audio_fixer::AudioFixer;
pub use identity_matcher::{IdentityMatcher, MatchedShow};
pub use plex::{CatalogProvider, CatalogShow, PlexClient};
pub use preference_engine::{AudioPreferences, Issue, IssueCode, PreferenceEngine, Severity};
pub use scan_state::{ScanProgressUpdate, ScanStateManager, ScanStatus};
pub use scanner::{DEFAULT_EXTENSIONS, MediaScanner, ScanRequest, ScannerOptions, run_scan};
