//! Application configuration management

use std::env;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind host
    pub host: String,

    /// Server port
    pub port: u16,

    /// SQLite database path
    pub database_path: String,

    /// JWT secret for token signing and verification
    pub jwt_secret: String,

    /// Access token lifetime in minutes
    pub access_token_minutes: i64,

    /// Media library root path (security boundary for scan locations)
    pub media_root: String,

    /// Plex Media Server base URL, e.g. http://plex.local:32400
    pub plex_server_url: Option<String>,

    /// Client identifier sent to plex.tv during token verification
    pub plex_client_identifier: String,

    /// Path to the ffprobe executable
    pub ffprobe_path: String,

    /// Path to the mkvpropedit executable
    pub mkvpropedit_path: String,

    /// Allowed CORS origins
    pub cors_origins: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let database_path = env::var("DATABASE_PATH")
            .or_else(|_| env::var("DATABASE_URL"))
            .unwrap_or_else(|_| "./data/cineaudit.db".to_string());

        // JWT_SECRET must be set explicitly in production; generate a
        // process-local one for development so the server still boots.
        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            use std::collections::hash_map::DefaultHasher;
            use std::hash::{Hash, Hasher};
            let mut hasher = DefaultHasher::new();
            std::time::SystemTime::now().hash(&mut hasher);
            format!("dev-secret-{}", hasher.finish())
        });

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://localhost:5173".to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),

            port: env::var("PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .context("Invalid PORT")?,

            database_path,

            jwt_secret,

            access_token_minutes: env::var("ACCESS_TOKEN_MINUTES")
                .unwrap_or_else(|_| (60 * 24 * 7).to_string())
                .parse()
                .context("Invalid ACCESS_TOKEN_MINUTES")?,

            media_root: env::var("MEDIA_ROOT").unwrap_or_else(|_| "/media".to_string()),

            plex_server_url: env::var("PLEX_SERVER_URL").ok(),

            plex_client_identifier: env::var("PLEX_CLIENT_IDENTIFIER")
                .unwrap_or_else(|_| "cineaudit".to_string()),

            ffprobe_path: env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),

            mkvpropedit_path: env::var("MKVPROPEDIT_PATH")
                .unwrap_or_else(|_| "mkvpropedit".to_string()),

            cors_origins,
        })
    }
}
