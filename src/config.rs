use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::signing::{DEFAULT_URL_TTL, MAX_URL_TTL};

/// Service settings, read from flags or the environment.
#[derive(Debug, Clone, Args)]
pub struct ServiceConfig {
    /// Directory holding object storage buckets
    #[arg(long, env = "RETROSPACE_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// SQLite database file (defaults to <data-dir>/retrospace.db)
    #[arg(long, env = "RETROSPACE_DATABASE")]
    pub database: Option<PathBuf>,

    /// Secret used to sign storage URLs
    #[arg(long, env = "RETROSPACE_SIGNING_SECRET", hide_env_values = true)]
    pub signing_secret: Option<String>,

    /// Default lifetime of signed URLs, in seconds
    #[arg(long, env = "RETROSPACE_URL_TTL", default_value_t = DEFAULT_URL_TTL.as_secs())]
    pub url_ttl_secs: u64,

    /// Largest accepted upload, in megabytes
    #[arg(long, env = "RETROSPACE_MAX_UPLOAD_MB", default_value_t = 50)]
    pub max_upload_mb: usize,

    /// Base URL used when building signed URLs (defaults to http://localhost:<port>)
    #[arg(long, env = "RETROSPACE_PUBLIC_URL")]
    pub public_url: Option<String>,
}

impl ServiceConfig {
    /// Settings rooted at `data_dir` with everything else at its default.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            database: None,
            signing_secret: None,
            url_ttl_secs: DEFAULT_URL_TTL.as_secs(),
            max_upload_mb: 50,
            public_url: None,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.data_dir.join("retrospace.db"))
    }

    /// Default signed URL lifetime, capped at [`MAX_URL_TTL`].
    pub fn url_ttl(&self) -> Duration {
        Duration::from_secs(self.url_ttl_secs).min(MAX_URL_TTL)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    /// The configured secret, or a random one that only lives as long as the
    /// process (signed URLs then stop working across restarts).
    pub fn signing_secret(&self) -> String {
        match &self.signing_secret {
            Some(secret) if !secret.is_empty() => secret.clone(),
            _ => {
                tracing::warn!(
                    "No signing secret configured, using a random one; signed URLs will not survive a restart"
                );
                format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple())
            }
        }
    }

    pub fn public_url(&self, port: u16) -> String {
        self.public_url
            .clone()
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("http://localhost:{}", port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_derive_from_data_dir() {
        let config = ServiceConfig::new("/srv/music");
        assert_eq!(config.database_path(), PathBuf::from("/srv/music/retrospace.db"));
        assert_eq!(config.url_ttl(), Duration::from_secs(3600));
        assert_eq!(config.max_upload_bytes(), 50 * 1024 * 1024);
        assert_eq!(config.public_url(3000), "http://localhost:3000");
    }

    #[test]
    fn url_ttl_is_capped() {
        let mut config = ServiceConfig::new("data");
        config.url_ttl_secs = u64::MAX;
        assert_eq!(config.url_ttl(), MAX_URL_TTL);
    }

    #[test]
    fn public_url_drops_trailing_slash() {
        let mut config = ServiceConfig::new("data");
        config.public_url = Some("https://music.example.com/".to_string());
        assert_eq!(config.public_url(3000), "https://music.example.com");
    }
}
