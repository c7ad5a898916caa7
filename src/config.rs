#[cfg(test)]
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_GUTENBERG_URL: &str = "https://www.gutenberg.org/cache/epub/1513/pg1513.txt";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_USER_AGENT: &str = "play-geo/0.1 (contact: you@example.com)";

/// Placeholder contact that Nominatim's usage policy does not accept.
const PLACEHOLDER_CONTACT: &str = "you@example.com";

/// Everything one pipeline run needs, validated before any work starts.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub play_id: String,
    pub title: String,
    pub gutenberg_url: String,
    /// Local play text; skips the download when set.
    pub play_file: Option<PathBuf>,
    pub extractions: PathBuf,
    pub model: String,
    pub user_agent: String,
    pub nominatim_email: Option<String>,
    pub output_dir: PathBuf,
    pub data_dir: PathBuf,
    /// Courtesy delay after each geocoder request.
    pub pause: Duration,
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        let has_email = self
            .nominatim_email
            .as_deref()
            .is_some_and(|e| !e.trim().is_empty());
        if self.user_agent.contains(PLACEHOLDER_CONTACT) && !has_email {
            return Err(Error::Config(
                "set a real --user-agent and/or NOMINATIM_EMAIL for Nominatim requests".into(),
            ));
        }
        if self.play_id.trim().is_empty() {
            return Err(Error::Config("--play-id must not be empty".into()));
        }
        Ok(())
    }

    /// Local copy of the downloaded play.
    pub fn cached_play_path(&self) -> PathBuf {
        self.data_dir.join("plays").join(format!("{}.txt", self.play_id))
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join("geocode_cache.json")
    }

    pub fn output_path(&self, suffix: &str) -> PathBuf {
        self.output_dir.join(format!("{}_{suffix}", self.play_id))
    }
}

#[cfg(test)]
pub(crate) fn test_config(dir: &Path) -> RunConfig {
    RunConfig {
        play_id: "romeo_juliet".into(),
        title: "Romeo and Juliet".into(),
        gutenberg_url: "https://example.org/romeo.txt".into(),
        play_file: None,
        extractions: dir.join("extractions.json"),
        model: DEFAULT_MODEL.into(),
        user_agent: "play-geo/0.1 (test@example.com)".into(),
        nominatim_email: Some("test@example.com".into()),
        output_dir: dir.join("outputs"),
        data_dir: dir.join("data"),
        pause: Duration::ZERO,
    }
}
