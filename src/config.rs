use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, ScrapeError};

const DEFAULT_CONFIG_FILE: &str = "config.toml";

// ============================================================================
// CONFIG SECTIONS
// ============================================================================

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Where the wiki lives and how we identify ourselves to it
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// API endpoint, `{game}` is replaced with the wiki's game path
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Public page URL, `{game}` and `{page}` are substituted
    #[serde(default = "default_page_url")]
    pub page_url: String,

    /// Sent on every request; the remote service rejects anonymous clients
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_standard_interval")]
    pub standard_interval_ms: u64,

    /// Page parses are the most expensive call the API offers
    #[serde(default = "default_intensive_interval")]
    pub intensive_interval_ms: u64,

    #[serde(default = "default_bulk_query_interval")]
    pub bulk_query_interval_ms: u64,

    /// Retries after a throttling response before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Retry n waits `base_backoff_ms * 2^n`
    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Pause between sub-resource fetches (team pages, player batches, subpages)
    #[serde(default = "default_item_spacing")]
    pub item_spacing_ms: u64,

    /// Most items the category fallback will return
    #[serde(default = "default_fallback_cap")]
    pub fallback_cap: usize,

    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Participants whose team pages get fetched for rosters
    #[serde(default = "default_max_team_details")]
    pub max_team_details: usize,

    /// Roster players without a structured row whose pages get parsed
    #[serde(default = "default_max_player_details")]
    pub max_player_details: usize,

    /// Token overlap a search hit needs before the resolver accepts it
    #[serde(default = "default_min_title_similarity")]
    pub min_title_similarity: f64,

    /// Upper bound on a whole tournament fetch, unbounded when absent
    #[serde(default)]
    pub aggregate_deadline_secs: Option<u64>,
}

fn default_api_url() -> String {
    "https://liquipedia.net/{game}/api.php".to_string()
}

fn default_page_url() -> String {
    "https://liquipedia.net/{game}/{page}".to_string()
}

/// Product token plus a placeholder; deployments set their own contact
/// address in `source.user_agent`
fn default_user_agent() -> String {
    format!(
        "esports_wiki_scraper/{} (set source.user_agent to your contact address)",
        env!("CARGO_PKG_VERSION")
    )
}

fn default_standard_interval() -> u64 {
    2_000
}

fn default_intensive_interval() -> u64 {
    30_000
}

fn default_bulk_query_interval() -> u64 {
    5_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_backoff() -> u64 {
    2_000
}

fn default_request_timeout() -> u64 {
    20
}

fn default_item_spacing() -> u64 {
    3_000
}

fn default_fallback_cap() -> usize {
    20
}

fn default_limit() -> usize {
    50
}

fn default_max_team_details() -> usize {
    16
}

fn default_max_player_details() -> usize {
    10
}

fn default_min_title_similarity() -> f64 {
    0.6
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            page_url: default_page_url(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            standard_interval_ms: default_standard_interval(),
            intensive_interval_ms: default_intensive_interval(),
            bulk_query_interval_ms: default_bulk_query_interval(),
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            item_spacing_ms: default_item_spacing(),
            fallback_cap: default_fallback_cap(),
            default_limit: default_limit(),
            max_team_details: default_max_team_details(),
            max_player_details: default_max_player_details(),
            min_title_similarity: default_min_title_similarity(),
            aggregate_deadline_secs: None,
        }
    }
}

// ============================================================================
// LOADING
// ============================================================================

impl Config {
    /// Reads an explicit path, else `config.toml` when present, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_file(path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| ScrapeError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| ScrapeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.source.api_url.contains("{game}") {
            return Err(ScrapeError::Config("source.api_url must contain {game}".to_string()));
        }
        if self.source.user_agent.trim().is_empty() {
            return Err(ScrapeError::Config("source.user_agent must not be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&self.pipeline.min_title_similarity) {
            return Err(ScrapeError::Config(
                "pipeline.min_title_similarity must be between 0 and 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl RateLimitConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }
}

impl PipelineConfig {
    pub fn item_spacing(&self) -> Duration {
        Duration::from_millis(self.item_spacing_ms)
    }

    pub fn aggregate_deadline(&self) -> Option<Duration> {
        self.aggregate_deadline_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_remote_limits() {
        let config = Config::default();
        assert_eq!(config.rate_limits.max_retries, 3);
        assert_eq!(config.rate_limits.base_backoff(), Duration::from_secs(2));
        assert_eq!(config.rate_limits.request_timeout(), Duration::from_secs(20));
        assert_eq!(config.pipeline.fallback_cap, 20);
        assert!(config.pipeline.aggregate_deadline().is_none());
        assert_eq!(config.pipeline.max_player_details, 10);
    }

    #[test]
    fn test_default_user_agent_is_a_placeholder() {
        let agent = Config::default().source.user_agent;
        assert!(agent.starts_with("esports_wiki_scraper/"));
        assert!(agent.contains("source.user_agent"));
        assert!(!agent.contains("github.com"));

        let config = Config::from_toml(
            r#"
            [source]
            user_agent = "results-bot/1.0 (ops@example.org)"
            "#,
        )
        .unwrap();
        assert_eq!(config.source.user_agent, "results-bot/1.0 (ops@example.org)");
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
            [rate_limits]
            intensive_interval_ms = 1000

            [pipeline]
            item_spacing_ms = 0
            aggregate_deadline_secs = 600
            "#,
        )
        .unwrap();

        assert_eq!(config.rate_limits.intensive_interval_ms, 1000);
        assert_eq!(config.rate_limits.standard_interval_ms, 2000);
        assert_eq!(config.pipeline.item_spacing(), Duration::ZERO);
        assert_eq!(config.pipeline.aggregate_deadline(), Some(Duration::from_secs(600)));
        assert!(config.source.api_url.contains("{game}"));
    }

    #[test]
    fn test_rejects_api_url_without_game() {
        let err =
            Config::from_toml("[source]\napi_url = \"https://example.com/api.php\"").unwrap_err();
        assert!(err.to_string().contains("{game}"));
    }
}
