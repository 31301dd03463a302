mod reasoner;
pub mod routing;

pub use reasoner::{reason, ReasonResult};

use crate::config::{AgentConfig, CompanyRegistryConfig};
use crate::entities::{self, Company, ExtractOptions, ExtractedEntities};
use crate::error::Result;
use crate::llm::ModelRouter;
use crate::persistence::Persistence;
use crate::progress::{self, ProgressMessage, ProgressStep};
use crate::tools::{DomainReputationTool, ScamRegistry, WebSearchTool};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvidence {
    pub tool_name: String,
    pub entity_type: String,
    pub entity_value: String,
    pub payload: Value,
    pub success: bool,
    pub error_message: Option<String>,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub task_id: Uuid,
    pub session_id: Option<Uuid>,
    pub entities_found: ExtractedEntities,
    pub evidence: Vec<AgentEvidence>,
    pub risk_level: RiskLevel,
    pub confidence: u8,
    pub reasoning_text: String,
    pub reasoning_method: String,
    pub tools_used: Vec<String>,
    pub processing_time_ms: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Run a tool call that can fail and turn its outcome into `AgentEvidence`.
/// A `Err` never propagates past this point — it becomes `success: false`
/// evidence the reasoner treats as absent.
async fn run_fallible<T, F>(tool_name: &str, entity_type: &str, entity_value: &str, fut: F) -> AgentEvidence
where
    T: Serialize,
    F: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let outcome = fut.await;
    let execution_time_ms = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(payload) => AgentEvidence {
            tool_name: tool_name.into(),
            entity_type: entity_type.into(),
            entity_value: entity_value.into(),
            payload: serde_json::to_value(&payload).unwrap_or(Value::Null),
            success: true,
            error_message: None,
            execution_time_ms,
        },
        Err(e) => AgentEvidence {
            tool_name: tool_name.into(),
            entity_type: entity_type.into(),
            entity_value: entity_value.into(),
            payload: Value::Null,
            success: false,
            error_message: Some(e.to_string()),
            execution_time_ms,
        },
    }
}

/// Run a tool call that never fails (it already absorbs its own errors —
/// the web-search and phone-validator contracts both guarantee this).
async fn run_infallible<T, F>(tool_name: &str, entity_type: &str, entity_value: &str, fut: F) -> AgentEvidence
where
    T: Serialize,
    F: Future<Output = T>,
{
    let started = Instant::now();
    let payload = fut.await;
    AgentEvidence {
        tool_name: tool_name.into(),
        entity_type: entity_type.into(),
        entity_value: entity_value.into(),
        payload: serde_json::to_value(&payload).unwrap_or(Value::Null),
        success: true,
        error_message: None,
        execution_time_ms: started.elapsed().as_millis() as u64,
    }
}

/// Wires together every evidence tool plus the reasoner and runs the
/// execution pipeline for one task end to end. One instance per process;
/// all tool fields are process-wide singletons shared across concurrent
/// tasks.
pub struct Orchestrator {
    pub registry: ScamRegistry,
    pub web_search: WebSearchTool,
    pub domain_reputation: DomainReputationTool,
    pub model_router: ModelRouter,
    pub persistence: Persistence,
    pub agent_config: AgentConfig,
    pub company_registry_config: CompanyRegistryConfig,
}

impl Orchestrator {
    pub async fn execute(&self, task_id: Uuid, ocr_text: &str, session_id: Option<Uuid>) -> AgentResult {
        let started = Instant::now();
        let hard_budget = Duration::from_millis(self.agent_config.hard_budget_ms);

        match tokio::time::timeout(hard_budget, self.run_pipeline(task_id, ocr_text, session_id, started)).await {
            Ok(result) => result,
            Err(_) => {
                error!(%task_id, "task exceeded hard budget, emitting timeout verdict");
                progress::global().publish(
                    task_id,
                    ProgressMessage::new(ProgressStep::Failed, "Task exceeded its time budget", 0),
                );
                let result = AgentResult {
                    task_id,
                    session_id,
                    entities_found: ExtractedEntities::default(),
                    evidence: Vec::new(),
                    risk_level: RiskLevel::Low,
                    confidence: 0,
                    reasoning_text: "timeout".into(),
                    reasoning_method: "heuristic".into(),
                    tools_used: Vec::new(),
                    processing_time_ms: started.elapsed().as_millis() as u64,
                    created_at: chrono::Utc::now(),
                };
                let _ = self.persist(&result).await;
                result
            }
        }
    }

    async fn run_pipeline(&self, task_id: Uuid, ocr_text: &str, session_id: Option<Uuid>, started: Instant) -> AgentResult {
        let bus = progress::global();

        bus.publish(
            task_id,
            ProgressMessage::new(ProgressStep::EntityExtraction, "Extracting entities…", 10),
        );

        let opts = ExtractOptions {
            default_region: self.agent_config.default_phone_region.clone(),
            ..Default::default()
        };
        let entities = entities::extract(ocr_text, &opts);

        bus.publish(
            task_id,
            ProgressMessage::new(
                ProgressStep::EntityExtraction,
                format!(
                    "Found {} entities: {} phones, {} urls, {} emails, {} companies",
                    entities.total_count(),
                    entities.phones.len(),
                    entities.urls.len(),
                    entities.emails.len(),
                    entities.companies.len()
                ),
                20,
            ),
        );

        let mut evidence = Vec::new();

        if entities.has_entities() {
            bus.publish(
                task_id,
                ProgressMessage::new(ProgressStep::ToolExecution, "Running investigation tools…", 30),
            );
            evidence = self.fan_out(task_id, &entities).await;
        }

        bus.publish(
            task_id,
            ProgressMessage::new(ProgressStep::Reasoning, "Analyzing evidence…", 90),
        );

        let entity_counts = entity_counts(&entities);
        let reasoned = reason(&self.model_router, ocr_text, &entity_counts, &evidence, self.agent_config.hard_budget_ms.min(5_000)).await;

        let result = AgentResult {
            task_id,
            session_id,
            entities_found: entities,
            evidence,
            risk_level: reasoned.risk_level,
            confidence: reasoned.confidence,
            reasoning_text: reasoned.explanation,
            reasoning_method: reasoned.reasoning_method.to_string(),
            tools_used: reasoned.evidence_used,
            processing_time_ms: started.elapsed().as_millis() as u64,
            created_at: chrono::Utc::now(),
        };

        if let Err(e) = self.persist(&result).await {
            warn!(%task_id, error = %e, "failed to persist agent result");
        }

        bus.publish(
            task_id,
            ProgressMessage::new(ProgressStep::Completed, "Analysis complete!", 100),
        );

        result
    }

    async fn persist(&self, result: &AgentResult) -> Result<()> {
        self.persistence
            .insert_scan_result(
                result.task_id,
                result.session_id,
                &serde_json::to_value(&result.entities_found).unwrap_or(Value::Null),
                &serde_json::to_value(&result.evidence).unwrap_or(Value::Null),
                result.risk_level.as_str(),
                result.confidence as i32,
                &result.reasoning_text,
                &result.reasoning_method,
                result.processing_time_ms as i64,
            )
            .await
    }

    async fn fan_out(&self, task_id: Uuid, entities: &ExtractedEntities) -> Vec<AgentEvidence> {
        let bus = progress::global();
        let mut evidence = Vec::new();

        let total_entities = entities.total_count().max(1);
        let mut done = 0usize;

        for phone in &entities.phones {
            let value = phone.e164.clone().unwrap_or_else(|| phone.raw.clone());
            let region = self.agent_config.default_phone_region.clone();
            let (registry_ev, search_ev, validator_ev) = tokio::join!(
                run_fallible("scam_db", "phone", &value, self.registry.check_phone(&value)),
                run_infallible("exa_search", "phone", &value, self.web_search.search(&value, "phone")),
                run_infallible("phone_validator", "phone", &value, async {
                    crate::tools::validate_phone(&phone.raw, Some(&region))
                }),
            );
            evidence.push(registry_ev);
            evidence.push(search_ev);
            evidence.push(validator_ev);
            done += 1;
            bus.publish(
                task_id,
                ProgressMessage::new(ProgressStep::ToolExecution, format!("Checked phone {value}"), fan_out_percent(done, total_entities)),
            );
        }

        for url in &entities.urls {
            let (registry_ev, reputation_ev, search_ev) = tokio::join!(
                run_fallible("scam_db", "url", &url.normalized, self.registry.check_url(&url.domain)),
                run_infallible(
                    "domain_reputation",
                    "url",
                    &url.normalized,
                    self.domain_reputation.check_domain(&url.domain)
                ),
                run_infallible("exa_search", "url", &url.normalized, self.web_search.search(&url.domain, "url")),
            );
            evidence.push(registry_ev);
            evidence.push(reputation_ev);
            evidence.push(search_ev);
            done += 1;
            bus.publish(
                task_id,
                ProgressMessage::new(
                    ProgressStep::ToolExecution,
                    format!("Checked url {}", url.domain),
                    fan_out_percent(done, total_entities),
                ),
            );
        }

        for email in &entities.emails {
            let (registry_ev, search_ev) = tokio::join!(
                run_fallible("scam_db", "email", &email.normalized, self.registry.check_email(&email.normalized)),
                run_infallible(
                    "exa_search",
                    "email",
                    &email.normalized,
                    self.web_search.search(&email.normalized, "email")
                ),
            );
            evidence.push(registry_ev);
            evidence.push(search_ev);
            done += 1;
            bus.publish(
                task_id,
                ProgressMessage::new(
                    ProgressStep::ToolExecution,
                    format!("Checked email {}", email.normalized),
                    fan_out_percent(done, total_entities),
                ),
            );
        }

        for payment in &entities.payments {
            let kind = payment.kind.as_str();
            let (registry_ev, search_ev) = tokio::join!(
                run_fallible("scam_db", kind, &payment.value, self.registry.check_payment(&payment.value, kind)),
                run_infallible("exa_search", kind, &payment.value, self.web_search.search(&payment.value, kind)),
            );
            evidence.push(registry_ev);
            evidence.push(search_ev);
            done += 1;
            bus.publish(
                task_id,
                ProgressMessage::new(ProgressStep::ToolExecution, format!("Checked {kind} identifier"), fan_out_percent(done, total_entities)),
            );
        }

        for company in &entities.companies {
            let (lookup_ev, heuristics_ev, search_ev) = tokio::join!(
                run_infallible(
                    "company_registry",
                    "company",
                    &company.normalized,
                    self.company_registry_lookup(company)
                ),
                run_infallible("pattern_heuristics", "company", &company.normalized, async {
                    pattern_heuristics(company)
                }),
                run_infallible(
                    "exa_search",
                    "company",
                    &company.normalized,
                    self.web_search.search(&company.normalized, "company")
                ),
            );
            evidence.push(lookup_ev);
            evidence.push(heuristics_ev);
            evidence.push(search_ev);
            done += 1;
            bus.publish(
                task_id,
                ProgressMessage::new(
                    ProgressStep::CompanyVerification,
                    format!("Checked company {}", company.normalized),
                    fan_out_percent(done, total_entities),
                ),
            );
        }

        evidence
    }

    /// Company registry lookups are scoped per jurisdiction; absent
    /// configuration marks the sub-result unsuccessful without failing the
    /// entity (spec contract), it never bubbles an `Err`.
    async fn company_registry_lookup(&self, company: &Company) -> Value {
        let configured = match company.country_hint.as_deref() {
            Some("SG") => self.company_registry_config.acra_api_key_env.is_some(),
            Some("UK") | Some("GB") => self.company_registry_config.companies_house_api_key_env.is_some(),
            _ => false,
        };
        if !configured {
            return json!({ "success": false, "reason": "no company registry configured for this jurisdiction" });
        }
        json!({ "success": false, "reason": "company registry lookup not implemented" })
    }
}

fn pattern_heuristics(company: &Company) -> Value {
    json!({
        "is_department_variant": company.is_department_variant,
        "suspicious": company.is_department_variant,
    })
}

fn fan_out_percent(done: usize, total: usize) -> u8 {
    (30.0 + (done as f64 / total as f64) * 50.0).round() as u8
}

fn entity_counts(entities: &ExtractedEntities) -> Vec<(String, usize)> {
    [
        ("phone", entities.phones.len()),
        ("url", entities.urls.len()),
        ("email", entities.emails.len()),
        ("payment", entities.payments.len()),
        ("amount", entities.amounts.len()),
        ("company", entities.companies.len()),
    ]
    .into_iter()
    .filter(|(_, n)| *n > 0)
    .map(|(k, n)| (k.to_string(), n))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Phone, PhoneType};

    #[test]
    fn risk_level_as_str_matches_wire_format() {
        assert_eq!(RiskLevel::High.as_str(), "high");
        assert_eq!(RiskLevel::Medium.as_str(), "medium");
        assert_eq!(RiskLevel::Low.as_str(), "low");
    }

    #[test]
    fn entity_counts_skips_empty_variants() {
        let mut entities = ExtractedEntities::default();
        entities.phones.push(Phone {
            raw: "+15551234567".into(),
            e164: Some("+15551234567".into()),
            country: None,
            region: None,
            phone_type: PhoneType::Mobile,
            carrier: None,
            valid: true,
            suspicious: false,
            suspicious_reason: None,
        });
        let counts = entity_counts(&entities);
        assert_eq!(counts, vec![("phone".to_string(), 1)]);
    }

    #[test]
    fn fan_out_percent_scales_from_30_to_80() {
        assert_eq!(fan_out_percent(0, 4), 30);
        assert_eq!(fan_out_percent(4, 4), 80);
        assert_eq!(fan_out_percent(2, 4), 55);
    }
}
