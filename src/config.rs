use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub exa: ExaConfig,
    #[serde(default)]
    pub domain_reputation: DomainReputationConfig,
    #[serde(default)]
    pub company_registry: CompanyRegistryConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_enable_mcp_agent")]
    pub enable_mcp_agent: bool,
    #[serde(default = "default_phone_region")]
    pub default_phone_region: String,
    #[serde(default = "default_hard_budget_ms")]
    pub hard_budget_ms: u64,
    #[serde(default = "default_soft_budget_ms")]
    pub soft_budget_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enable_mcp_agent: default_enable_mcp_agent(),
            default_phone_region: default_phone_region(),
            hard_budget_ms: default_hard_budget_ms(),
            soft_budget_ms: default_soft_budget_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExaConfig {
    #[serde(default = "default_exa_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default = "default_daily_budget_usd")]
    pub daily_budget_usd: f64,
    #[serde(default = "default_price_per_search_usd")]
    pub price_per_search_usd: f64,
}

impl Default for ExaConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_exa_api_key_env(),
            cache_ttl_secs: default_cache_ttl_secs(),
            max_results: default_max_results(),
            daily_budget_usd: default_daily_budget_usd(),
            price_per_search_usd: default_price_per_search_usd(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DomainReputationConfig {
    pub virustotal_api_key_env: Option<String>,
    pub safe_browsing_api_key_env: Option<String>,
    #[serde(default = "default_whois_timeout_ms")]
    pub whois_timeout_ms: u64,
    #[serde(default = "default_tls_timeout_ms")]
    pub tls_timeout_ms: u64,
    #[serde(default = "default_av_timeout_ms")]
    pub av_timeout_ms: u64,
    #[serde(default = "default_safe_browsing_timeout_ms")]
    pub safe_browsing_timeout_ms: u64,
    #[serde(default = "default_reputation_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for DomainReputationConfig {
    fn default() -> Self {
        Self {
            virustotal_api_key_env: None,
            safe_browsing_api_key_env: None,
            whois_timeout_ms: default_whois_timeout_ms(),
            tls_timeout_ms: default_tls_timeout_ms(),
            av_timeout_ms: default_av_timeout_ms(),
            safe_browsing_timeout_ms: default_safe_browsing_timeout_ms(),
            cache_ttl_secs: default_reputation_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompanyRegistryConfig {
    pub acra_api_key_env: Option<String>,
    pub companies_house_api_key_env: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: crate::llm::Provider,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_deadline_ms")]
    pub deadline_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_database_url_env")]
    pub database_url_env: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_url_env: default_database_url_env(),
            pool_size: default_pool_size(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_broker_url_env")]
    pub broker_url_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            broker_url_env: default_broker_url_env(),
            max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base_secs(),
        }
    }
}

// Defaults

fn default_enable_mcp_agent() -> bool {
    true
}
fn default_phone_region() -> String {
    "US".into()
}
fn default_hard_budget_ms() -> u64 {
    60_000
}
fn default_soft_budget_ms() -> u64 {
    55_000
}
fn default_exa_api_key_env() -> String {
    "EXA_API_KEY".into()
}
fn default_cache_ttl_secs() -> u64 {
    86_400
}
fn default_max_results() -> u32 {
    10
}
fn default_daily_budget_usd() -> f64 {
    10.0
}
fn default_price_per_search_usd() -> f64 {
    0.005
}
fn default_whois_timeout_ms() -> u64 {
    3_000
}
fn default_tls_timeout_ms() -> u64 {
    3_000
}
fn default_av_timeout_ms() -> u64 {
    5_000
}
fn default_safe_browsing_timeout_ms() -> u64 {
    5_000
}
fn default_reputation_cache_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}
fn default_model() -> String {
    "arcee-ai/trinity-large-preview:free".into()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.2
}
fn default_llm_deadline_ms() -> u64 {
    20_000
}
fn default_database_url_env() -> String {
    "DATABASE_URL".into()
}
fn default_pool_size() -> u32 {
    10
}
fn default_broker_url_env() -> String {
    "QUEUE_BROKER_URL".into()
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_secs() -> u64 {
    2
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read config {}: {e}", path.display())))?;
        toml::from_str(&content).map_err(|e| Error::config(format!("Failed to parse config: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        if self.llm.api_key_env.is_none() {
            return Err(Error::config(
                "llm.api_key_env not set — the reasoner and fast-path classifier need a key source",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml = r#"
            [llm]
            api_key_env = "OPENROUTER_API_KEY"
        "#;
        let cfg: Config = toml::from_str(toml).unwrap();
        assert_eq!(cfg.agent.default_phone_region, "US");
        assert_eq!(cfg.exa.max_results, 10);
        assert_eq!(cfg.persistence.pool_size, 10);
        assert_eq!(cfg.queue.max_retries, 3);
    }

    #[test]
    fn validate_rejects_missing_api_key_env() {
        let toml = r#"
            [llm]
            model = "some-model"
        "#;
        let cfg: Config = toml::from_str(toml).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_accepts_configured_api_key_env() {
        let toml = r#"
            [llm]
            api_key_env = "OPENROUTER_API_KEY"
        "#;
        let cfg: Config = toml::from_str(toml).unwrap();
        assert!(cfg.validate().is_ok());
    }
}
