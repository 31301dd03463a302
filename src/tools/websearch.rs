use crate::config::ExaConfig;
use crate::entities::TRUSTED_SEARCH_SOURCES;
use crate::error::{Error, Result};
use crate::http::HttpClient;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorRateLimiter};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub published_date: Option<String>,
    pub score: f64,
    pub domain: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub query_used: String,
    pub cached: bool,
}

impl SearchResponse {
    fn empty(query_used: String) -> Self {
        Self {
            results: Vec::new(),
            query_used,
            cached: false,
        }
    }
}

fn query_template(entity_type: &str, value: &str) -> String {
    match entity_type {
        "phone" => format!("\"{value}\" scam complaints OR fraud reports OR \"is this a scam\""),
        "url" => format!("\"{value}\" phishing OR scam warning OR \"is this site safe\""),
        "email" => format!("\"{value}\" spam OR scam reports OR fraudulent"),
        "bitcoin" => format!("\"{value}\" scam OR fraud OR stolen"),
        _ => format!("\"{value}\" scam OR suspicious OR fraud"),
    }
}

#[derive(Debug, Deserialize)]
struct ExaSearchResponse {
    #[serde(default)]
    results: Vec<ExaResult>,
}

#[derive(Debug, Deserialize)]
struct ExaResult {
    title: Option<String>,
    url: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "publishedDate")]
    published_date: Option<String>,
    #[serde(default)]
    score: Option<f64>,
}

struct CacheEntry {
    response: SearchResponse,
    expires_at: Instant,
}

/// Accumulated spend for one UTC calendar day.
#[derive(Default)]
struct DailyCounter {
    day: Option<NaiveDate>,
    total_cost_usd: f64,
    searches_by_type: std::collections::HashMap<String, u32>,
}

/// Evidence-gathering web search over a discussion-forum category, backed by
/// Exa. Caches per entity, rate-limits per second, and enforces a daily
/// dollar budget — all in-process singleton state, the same shape as the
/// cost-meter accumulation this crate's persistence layer checkpoints.
pub struct WebSearchTool {
    http: HttpClient,
    config: ExaConfig,
    cache: DashMap<String, CacheEntry>,
    daily: Mutex<DailyCounter>,
    limiter: Arc<GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl WebSearchTool {
    pub fn new(http: HttpClient, config: ExaConfig) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(5).expect("5 > 0"));
        Self {
            http,
            config,
            cache: DashMap::new(),
            daily: Mutex::new(DailyCounter::default()),
            limiter: Arc::new(GovernorRateLimiter::direct(quota)),
        }
    }

    pub async fn search(&self, entity_value: &str, entity_type: &str) -> SearchResponse {
        let query = query_template(entity_type, entity_value);
        let cache_key = format!("{entity_type}:{}", entity_value.to_lowercase());

        if let Some(entry) = self.cache.get(&cache_key) {
            if entry.expires_at > Instant::now() {
                let mut cached = entry.response.clone();
                cached.cached = true;
                return cached;
            }
        }

        if self.budget_exhausted() {
            warn!(entity_type, "web search daily budget exhausted, skipping");
            return SearchResponse::empty(query);
        }

        self.limiter.until_ready().await;

        let response = match self.call_exa(&query).await {
            Ok(resp) => resp,
            Err(e) => {
                debug!(error = %e, "web search call failed");
                return SearchResponse::empty(query);
            }
        };

        let processed = process_results(response, &query);
        self.charge(entity_type);
        self.cache.insert(
            cache_key,
            CacheEntry {
                response: processed.clone(),
                expires_at: Instant::now() + Duration::from_secs(self.config.cache_ttl_secs),
            },
        );
        processed
    }

    fn budget_exhausted(&self) -> bool {
        let mut daily = self.daily.lock();
        roll_day_if_needed(&mut daily);
        daily.total_cost_usd >= self.config.daily_budget_usd
    }

    fn charge(&self, entity_type: &str) {
        let mut daily = self.daily.lock();
        roll_day_if_needed(&mut daily);
        daily.total_cost_usd += self.config.price_per_search_usd;
        *daily
            .searches_by_type
            .entry(entity_type.to_string())
            .or_insert(0) += 1;
    }

    async fn call_exa(&self, query: &str) -> Result<ExaSearchResponse> {
        let api_key = std::env::var(&self.config.api_key_env)
            .map_err(|_| Error::config(format!("{} not set", self.config.api_key_env)))?;

        let start_published_date = (Utc::now() - ChronoDuration::days(90))
            .format("%Y-%m-%dT%H:%M:%S.000Z")
            .to_string();

        let body = json!({
            "query": query,
            "category": "discussion",
            "useAutoprompt": true,
            "numResults": self.config.max_results,
            "startPublishedDate": start_published_date,
            "contents": { "text": { "maxCharacters": 400 } },
        });

        let raw = self
            .http
            .post_json_raw(
                "https://api.exa.ai/search",
                &body.to_string(),
                &[("x-api-key", api_key.as_str())],
            )
            .await?;

        serde_json::from_str(&raw).map_err(|e| Error::parse(format!("Exa response parse: {e}")))
    }
}

fn roll_day_if_needed(daily: &mut DailyCounter) {
    let today = Utc::now().date_naive();
    if daily.day != Some(today) {
        daily.day = Some(today);
        daily.total_cost_usd = 0.0;
        daily.searches_by_type.clear();
    }
}

fn process_results(response: ExaSearchResponse, query: &str) -> SearchResponse {
    let mut by_domain: std::collections::HashMap<String, SearchResult> =
        std::collections::HashMap::new();

    for r in response.results {
        let domain = extract_registrable_domain(&r.url);
        let mut score = r.score.unwrap_or(0.0);
        if TRUSTED_SEARCH_SOURCES.contains(&domain.as_str()) {
            score = (score + 0.3).min(1.0);
        }
        let snippet = truncate_snippet(r.text.as_deref().unwrap_or(""));

        let candidate = SearchResult {
            title: r.title.unwrap_or_default(),
            url: r.url,
            snippet,
            published_date: r.published_date,
            score,
            domain: domain.clone(),
        };

        by_domain
            .entry(domain)
            .and_modify(|existing| {
                if candidate.score > existing.score {
                    *existing = candidate.clone();
                }
            })
            .or_insert(candidate);
    }

    let mut results: Vec<SearchResult> = by_domain.into_values().collect();
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    SearchResponse {
        results,
        query_used: query.to_string(),
        cached: false,
    }
}

fn truncate_snippet(text: &str) -> String {
    if text.chars().count() <= 200 {
        return text.to_string();
    }
    let truncated: String = text.chars().take(197).collect();
    format!("{truncated}...")
}

fn extract_registrable_domain(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_else(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_template_includes_value_for_phone() {
        let q = query_template("phone", "+15551234567");
        assert!(q.contains("+15551234567"));
        assert!(q.contains("scam"));
    }

    #[test]
    fn truncate_snippet_respects_limit() {
        let long = "a".repeat(300);
        let truncated = truncate_snippet(&long);
        assert_eq!(truncated.chars().count(), 200);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn truncate_snippet_leaves_short_text_untouched() {
        assert_eq!(truncate_snippet("short"), "short");
    }

    #[test]
    fn process_results_dedups_by_domain_keeping_highest_score() {
        let response = ExaSearchResponse {
            results: vec![
                ExaResult {
                    title: Some("low".into()),
                    url: "https://reddit.com/a".into(),
                    text: Some("low score post".into()),
                    published_date: None,
                    score: Some(0.2),
                },
                ExaResult {
                    title: Some("high".into()),
                    url: "https://reddit.com/b".into(),
                    text: Some("high score post".into()),
                    published_date: None,
                    score: Some(0.5),
                },
            ],
        };
        let processed = process_results(response, "q");
        assert_eq!(processed.results.len(), 1);
        assert_eq!(processed.results[0].title, "high");
    }

    #[test]
    fn process_results_boosts_trusted_domains() {
        let response = ExaSearchResponse {
            results: vec![ExaResult {
                title: Some("t".into()),
                url: "https://bbb.org/report".into(),
                text: Some("text".into()),
                published_date: None,
                score: Some(0.5),
            }],
        };
        let processed = process_results(response, "q");
        assert!((processed.results[0].score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn process_results_caps_boosted_score_at_one() {
        let response = ExaSearchResponse {
            results: vec![ExaResult {
                title: Some("t".into()),
                url: "https://ftc.gov/report".into(),
                text: Some("text".into()),
                published_date: None,
                score: Some(0.9),
            }],
        };
        let processed = process_results(response, "q");
        assert_eq!(processed.results[0].score, 1.0);
    }
}
