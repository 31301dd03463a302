use crate::config::DomainReputationConfig;
use crate::http::HttpClient;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

const AGE_MAX_POINTS: f64 = 30.0;
const SSL_MAX_POINTS: f64 = 30.0;
const AV_MAX_POINTS: f64 = 40.0;
const SAFE_BROWSING_MAX_POINTS: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChecksCompleted {
    pub domain_age: bool,
    pub ssl: bool,
    pub virustotal: bool,
    pub safe_browsing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainReputationResult {
    pub domain: String,
    pub age_days: Option<i64>,
    pub ssl_valid: Option<bool>,
    pub ssl_expiry_days: Option<i64>,
    pub self_signed: Option<bool>,
    pub virustotal_malicious: Option<u32>,
    pub virustotal_total: Option<u32>,
    pub safe_browsing_flagged: Option<bool>,
    pub risk_score: u32,
    pub risk_level: RiskLevel,
    pub checks_completed: ChecksCompleted,
    pub error_messages: HashMap<String, String>,
}

struct CacheEntry {
    result: DomainReputationResult,
    expires_at: Instant,
}

/// Concurrent four-check domain reputation lookup: WHOIS domain age, TLS
/// certificate validity, a third-party AV aggregator, and a safe-browsing
/// lookup. Every check degrades to "not completed" rather than failing the
/// whole result — a slow WHOIS server never blocks the other three.
pub struct DomainReputationTool {
    http: HttpClient,
    config: DomainReputationConfig,
    cache: Arc<DashMap<String, CacheEntry>>,
}

impl DomainReputationTool {
    pub fn new(http: HttpClient, config: DomainReputationConfig) -> Self {
        Self {
            http,
            config,
            cache: Arc::new(DashMap::new()),
        }
    }

    pub async fn check_domain(&self, url_or_domain: &str) -> DomainReputationResult {
        let domain = normalize_domain(url_or_domain);

        if let Some(entry) = self.cache.get(&domain) {
            if entry.expires_at > Instant::now() {
                return entry.result.clone();
            }
        }

        let mut error_messages = HashMap::new();

        let age_fut = timeout(
            Duration::from_millis(self.config.whois_timeout_ms),
            check_domain_age(domain.clone()),
        );
        let ssl_fut = timeout(
            Duration::from_millis(self.config.tls_timeout_ms),
            check_ssl(domain.clone()),
        );
        let av_fut = timeout(
            Duration::from_millis(self.config.av_timeout_ms),
            check_virustotal(&self.http, domain.clone(), self.config.virustotal_api_key_env.clone()),
        );
        let sb_fut = timeout(
            Duration::from_millis(self.config.safe_browsing_timeout_ms),
            check_safe_browsing(
                &self.http,
                domain.clone(),
                self.config.safe_browsing_api_key_env.clone(),
            ),
        );

        let (age_res, ssl_res, av_res, sb_res) = tokio::join!(age_fut, ssl_fut, av_fut, sb_fut);

        let mut checks_completed = ChecksCompleted::default();

        let age_days = match age_res {
            Ok(Ok(Some(days))) => {
                checks_completed.domain_age = true;
                Some(days)
            }
            Ok(Ok(None)) => None, // no api key / not applicable, not a failure
            Ok(Err(e)) => {
                error_messages.insert("domain_age".into(), e);
                None
            }
            Err(_) => {
                error_messages.insert("domain_age".into(), "timed out".into());
                None
            }
        };

        let (ssl_valid, ssl_expiry_days, self_signed) = match ssl_res {
            Ok(Ok(info)) => {
                checks_completed.ssl = true;
                (Some(info.valid), Some(info.expiry_days), Some(info.self_signed))
            }
            Ok(Err(e)) => {
                error_messages.insert("ssl".into(), e);
                (None, None, None)
            }
            Err(_) => {
                error_messages.insert("ssl".into(), "timed out".into());
                (None, None, None)
            }
        };

        let (virustotal_malicious, virustotal_total) = match av_res {
            Ok(Ok(Some((malicious, total)))) => {
                checks_completed.virustotal = true;
                (Some(malicious), Some(total))
            }
            Ok(Ok(None)) => (None, None),
            Ok(Err(e)) => {
                error_messages.insert("virustotal".into(), e);
                (None, None)
            }
            Err(_) => {
                error_messages.insert("virustotal".into(), "timed out".into());
                (None, None)
            }
        };

        let safe_browsing_flagged = match sb_res {
            Ok(Ok(Some(flagged))) => {
                checks_completed.safe_browsing = true;
                Some(flagged)
            }
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                error_messages.insert("safe_browsing".into(), e);
                None
            }
            Err(_) => {
                error_messages.insert("safe_browsing".into(), "timed out".into());
                None
            }
        };

        let (risk_score, risk_level) = score(
            age_days,
            ssl_valid,
            ssl_expiry_days,
            virustotal_malicious,
            virustotal_total,
            safe_browsing_flagged,
            &checks_completed,
        );

        let result = DomainReputationResult {
            domain: domain.clone(),
            age_days,
            ssl_valid,
            ssl_expiry_days,
            self_signed,
            virustotal_malicious,
            virustotal_total,
            safe_browsing_flagged,
            risk_score,
            risk_level,
            checks_completed,
            error_messages,
        };

        self.cache.insert(
            domain,
            CacheEntry {
                result: result.clone(),
                expires_at: Instant::now() + Duration::from_secs(self.config.cache_ttl_secs),
            },
        );

        result
    }
}

fn score(
    age_days: Option<i64>,
    ssl_valid: Option<bool>,
    ssl_expiry_days: Option<i64>,
    virustotal_malicious: Option<u32>,
    virustotal_total: Option<u32>,
    safe_browsing_flagged: Option<bool>,
    checks_completed: &ChecksCompleted,
) -> (u32, RiskLevel) {
    let mut raw = 0.0;
    let mut denom = 0.0;

    if checks_completed.domain_age {
        denom += AGE_MAX_POINTS;
        if let Some(days) = age_days {
            raw += match days {
                d if d < 7 => 30.0,
                d if d < 30 => 20.0,
                d if d < 90 => 10.0,
                _ => 0.0,
            };
        }
    }

    if checks_completed.ssl {
        denom += SSL_MAX_POINTS;
        if ssl_valid == Some(false) {
            raw += 20.0;
        } else if let Some(expiry) = ssl_expiry_days {
            if expiry <= 30 {
                raw += 10.0;
            }
        }
    }

    if checks_completed.virustotal {
        denom += AV_MAX_POINTS;
        if let (Some(malicious), Some(total)) = (virustotal_malicious, virustotal_total) {
            if total > 0 {
                raw += 40.0 * (malicious as f64 / total as f64);
            }
        }
    }

    if checks_completed.safe_browsing {
        denom += SAFE_BROWSING_MAX_POINTS;
        if safe_browsing_flagged == Some(true) {
            raw += 40.0;
        }
    }

    if denom == 0.0 {
        return (0, RiskLevel::Unknown);
    }

    let normalized = (raw * 100.0 / denom).clamp(0.0, 100.0);
    let level = if normalized >= 70.0 {
        RiskLevel::High
    } else if normalized >= 40.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };
    (normalized.round() as u32, level)
}

fn normalize_domain(input: &str) -> String {
    let with_scheme = if input.contains("://") {
        input.to_string()
    } else {
        format!("https://{input}")
    };
    url::Url::parse(&with_scheme)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| input.to_string())
        .trim_start_matches("www.")
        .to_lowercase()
}

const WHOIS_SERVERS: &[(&str, &str)] = &[
    ("com", "whois.verisign-grs.com"),
    ("net", "whois.verisign-grs.com"),
    ("org", "whois.pir.org"),
    ("io", "whois.nic.io"),
    ("co", "whois.nic.co"),
    ("info", "whois.afilias.net"),
    ("dev", "whois.nic.google"),
    ("app", "whois.nic.google"),
    ("xyz", "whois.nic.xyz"),
];

async fn check_domain_age(domain: String) -> Result<Option<i64>, String> {
    let tld = domain.rsplit('.').next().unwrap_or("");
    let server = WHOIS_SERVERS
        .iter()
        .find(|(t, _)| *t == tld)
        .map(|(_, s)| *s)
        .unwrap_or("whois.iana.org");

    let mut stream = TcpStream::connect((server, 43))
        .await
        .map_err(|e| format!("whois connect to {server}: {e}"))?;

    stream
        .write_all(format!("{domain}\r\n").as_bytes())
        .await
        .map_err(|e| format!("whois write: {e}"))?;

    let mut buf = Vec::new();
    stream
        .read_to_end(&mut buf)
        .await
        .map_err(|e| format!("whois read: {e}"))?;

    let text = String::from_utf8_lossy(&buf);
    let created = parse_whois_creation_date(&text);
    match created {
        Some(date) => {
            let age = (chrono::Utc::now().date_naive() - date).num_days();
            Ok(Some(age.max(0)))
        }
        None => {
            debug!(domain, "whois response had no recognizable creation date");
            Ok(None)
        }
    }
}

fn parse_whois_creation_date(text: &str) -> Option<chrono::NaiveDate> {
    const KEYS: &[&str] = &["Creation Date:", "created:", "Registered on:", "created-date:"];
    for line in text.lines() {
        for key in KEYS {
            if let Some(rest) = line
                .strip_prefix(key)
                .or_else(|| line.to_lowercase().starts_with(&key.to_lowercase()).then(|| &line[key.len()..]))
            {
                let value = rest.trim();
                if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(value) {
                    return Some(dt.date_naive());
                }
                if let Some(date_part) = value.split('T').next() {
                    if let Ok(d) = chrono::NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
                        return Some(d);
                    }
                }
            }
        }
    }
    None
}

struct SslInfo {
    valid: bool,
    expiry_days: i64,
    self_signed: bool,
}

async fn check_ssl(domain: String) -> Result<SslInfo, String> {
    let mut root_store = tokio_rustls::rustls::RootCertStore::empty();
    let native_certs = rustls_native_certs::load_native_certs();
    if !native_certs.errors.is_empty() {
        return Err(format!("loading root certs: {:?}", native_certs.errors));
    }
    for cert in native_certs.certs {
        let _ = root_store.add(cert);
    }

    let tls_config = tokio_rustls::rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_config));

    let tcp = TcpStream::connect((domain.as_str(), 443))
        .await
        .map_err(|e| format!("tcp connect: {e}"))?;

    let server_name = tokio_rustls::rustls::pki_types::ServerName::try_from(domain.clone())
        .map_err(|e| format!("invalid server name: {e}"))?;

    let tls_stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| format!("tls handshake: {e}"))?;

    let (_, session) = tls_stream.get_ref();
    let certs = session
        .peer_certificates()
        .ok_or_else(|| "no peer certificates presented".to_string())?;
    let leaf = certs.first().ok_or_else(|| "empty certificate chain".to_string())?;

    let (_, parsed) = x509_parser::parse_x509_certificate(leaf.as_ref())
        .map_err(|e| format!("certificate parse: {e}"))?;

    let not_after = parsed.validity().not_after;
    let expiry_days = (not_after.timestamp() - chrono::Utc::now().timestamp()) / 86_400;
    let self_signed = parsed.issuer() == parsed.subject();

    Ok(SslInfo {
        valid: expiry_days > 0,
        expiry_days,
        self_signed,
    })
}

#[derive(serde::Deserialize)]
struct VirusTotalResponse {
    data: Option<VirusTotalData>,
}

#[derive(serde::Deserialize)]
struct VirusTotalData {
    attributes: VirusTotalAttributes,
}

#[derive(serde::Deserialize)]
struct VirusTotalAttributes {
    last_analysis_stats: std::collections::HashMap<String, u32>,
}

async fn check_virustotal(
    http: &HttpClient,
    domain: String,
    api_key_env: Option<String>,
) -> Result<Option<(u32, u32)>, String> {
    let Some(env) = api_key_env else {
        return Ok(None);
    };
    let Ok(api_key) = std::env::var(&env) else {
        return Ok(None);
    };

    let url = format!("https://www.virustotal.com/api/v3/domains/{domain}");
    let resp: VirusTotalResponse = http
        .get_json_deadline(&url, &[("x-apikey", api_key.as_str())], Duration::from_secs(5))
        .await
        .map_err(|e| e.to_string())?;

    let Some(data) = resp.data else {
        return Ok(Some((0, 0)));
    };
    let stats = data.attributes.last_analysis_stats;
    let malicious = stats.get("malicious").copied().unwrap_or(0);
    let total: u32 = stats.values().sum();
    Ok(Some((malicious, total)))
}

#[derive(serde::Deserialize)]
struct SafeBrowsingResponse {
    #[serde(default)]
    matches: Vec<serde_json::Value>,
}

async fn check_safe_browsing(
    http: &HttpClient,
    domain: String,
    api_key_env: Option<String>,
) -> Result<Option<bool>, String> {
    let Some(env) = api_key_env else {
        return Ok(None);
    };
    let Ok(api_key) = std::env::var(&env) else {
        return Ok(None);
    };

    let body = serde_json::json!({
        "client": { "clientId": "scamwatch-agent", "clientVersion": "0.1.0" },
        "threatInfo": {
            "threatTypes": ["MALWARE", "SOCIAL_ENGINEERING", "UNWANTED_SOFTWARE"],
            "platformTypes": ["ANY_PLATFORM"],
            "threatEntryTypes": ["URL"],
            "threatEntries": [{ "url": format!("https://{domain}") }],
        },
    });

    let url = format!("https://safebrowsing.googleapis.com/v4/threatMatches:find?key={api_key}");
    let raw = http
        .post_json_raw(&url, &body.to_string(), &[])
        .await
        .map_err(|e| e.to_string())?;

    let parsed: SafeBrowsingResponse =
        serde_json::from_str(&raw).map_err(|e| format!("safe browsing parse: {e}"))?;
    Ok(Some(!parsed.matches.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_domain_strips_scheme_and_www() {
        assert_eq!(normalize_domain("https://www.Example.com/path"), "example.com");
        assert_eq!(normalize_domain("example.com"), "example.com");
    }

    #[test]
    fn score_is_unknown_when_no_checks_completed() {
        let (score, level) = score(None, None, None, None, None, None, &ChecksCompleted::default());
        assert_eq!(score, 0);
        assert_eq!(level, RiskLevel::Unknown);
    }

    #[test]
    fn score_is_high_for_young_domain_with_no_ssl() {
        let checks = ChecksCompleted {
            domain_age: true,
            ssl: true,
            virustotal: false,
            safe_browsing: false,
        };
        let (score, level) = score(Some(2), Some(false), None, None, None, None, &checks);
        // (30 + 20) / (30 + 30) * 100 = 83
        assert_eq!(score, 83);
        assert_eq!(level, RiskLevel::High);
    }

    #[test]
    fn score_is_low_for_old_domain_with_valid_ssl() {
        let checks = ChecksCompleted {
            domain_age: true,
            ssl: true,
            virustotal: true,
            safe_browsing: true,
        };
        let (score, level) = score(
            Some(3000),
            Some(true),
            Some(200),
            Some(0),
            Some(80),
            Some(false),
            &checks,
        );
        assert_eq!(score, 0);
        assert_eq!(level, RiskLevel::Low);
    }

    #[test]
    fn score_reflects_virustotal_ratio() {
        let checks = ChecksCompleted {
            domain_age: false,
            ssl: false,
            virustotal: true,
            safe_browsing: false,
        };
        let (score, _level) = score(None, None, None, Some(20), Some(80), None, &checks);
        // 40 * (20/80) = 10, denom = 40 -> 25
        assert_eq!(score, 25);
    }

    #[test]
    fn parse_whois_creation_date_handles_common_formats() {
        let text = "Domain Name: EXAMPLE.COM\nCreation Date: 2010-03-14T00:00:00Z\nRegistrar: Example";
        let date = parse_whois_creation_date(text).unwrap();
        assert_eq!(date.to_string(), "2010-03-14");
    }
}
