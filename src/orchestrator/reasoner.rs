use super::{AgentEvidence, RiskLevel};
use crate::llm::{extract_json, ModelRouter, TaskKind};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

const SYSTEM_PREAMBLE: &str = "You are a scam-detection reasoning engine. You are given OCR'd text, \
the entities found within it, and evidence gathered by independent investigation tools. Weigh \
evidence by reliability, highest to lowest: registry-verified reports, AV-aggregator and domain-reputation \
signals, web-search user complaints, offline pattern indicators. Respond with strict JSON only, no \
prose before or after: {\"risk_level\": \"low\"|\"medium\"|\"high\", \"confidence\": 0-100, \"explanation\": \
\"a sentence citing the evidence that drove the verdict, at least 10 characters\"}.";

const OCR_TEXT_CHARS: usize = 500;
const MAX_SAMPLE_PER_VARIANT: usize = 3;

pub struct ReasonResult {
    pub risk_level: RiskLevel,
    pub confidence: u8,
    pub explanation: String,
    pub reasoning_method: &'static str,
    pub evidence_used: Vec<String>,
}

#[derive(Deserialize)]
struct LlmVerdict {
    risk_level: String,
    confidence: f64,
    explanation: String,
}

/// Mode A (LLM) tried first; Mode B (deterministic heuristic) is the
/// fallback when the LLM path is unavailable, slow, or returns something
/// that doesn't validate even after one retry.
pub async fn reason(
    router: &ModelRouter,
    ocr_text: &str,
    entity_counts: &[(String, usize)],
    evidence: &[AgentEvidence],
    deadline_ms: u64,
) -> ReasonResult {
    match reason_llm(router, ocr_text, entity_counts, evidence, deadline_ms).await {
        Some(result) => result,
        None => reason_heuristic(evidence),
    }
}

async fn reason_llm(
    router: &ModelRouter,
    ocr_text: &str,
    entity_counts: &[(String, usize)],
    evidence: &[AgentEvidence],
    deadline_ms: u64,
) -> Option<ReasonResult> {
    let client = router.client_for(TaskKind::Reasoning);
    let prompt = build_prompt(ocr_text, entity_counts, evidence);
    let deadline = Duration::from_millis(deadline_ms);
    let evidence_used: Vec<String> = evidence
        .iter()
        .filter(|e| e.success)
        .map(|e| e.tool_name.clone())
        .collect();

    for attempt in 0..2 {
        let call = timeout(deadline, client.complete(SYSTEM_PREAMBLE, &prompt)).await;
        let text = match call {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(attempt, error = %e, "reasoner LLM call failed");
                continue;
            }
            Err(_) => {
                warn!(attempt, "reasoner LLM call exceeded its deadline");
                return None;
            }
        };

        let json_str = extract_json(&text);
        match serde_json::from_str::<LlmVerdict>(json_str)
            .ok()
            .and_then(validate_verdict)
        {
            Some((risk_level, confidence, explanation)) => {
                return Some(ReasonResult {
                    risk_level,
                    confidence,
                    explanation,
                    reasoning_method: "llm",
                    evidence_used,
                });
            }
            None => {
                debug!(attempt, raw = %text, "reasoner response failed validation, retrying");
            }
        }
    }

    None
}

fn validate_verdict(v: LlmVerdict) -> Option<(RiskLevel, u8, String)> {
    let risk_level = match v.risk_level.to_lowercase().as_str() {
        "low" => RiskLevel::Low,
        "medium" => RiskLevel::Medium,
        "high" => RiskLevel::High,
        _ => return None,
    };
    if v.explanation.trim().chars().count() < 10 {
        return None;
    }
    let confidence = v.confidence.clamp(0.0, 100.0).round() as u8;
    Some((risk_level, confidence, v.explanation))
}

fn build_prompt(ocr_text: &str, entity_counts: &[(String, usize)], evidence: &[AgentEvidence]) -> String {
    let truncated: String = ocr_text.chars().take(OCR_TEXT_CHARS).collect();

    let counts_line = entity_counts
        .iter()
        .map(|(kind, n)| format!("{n} {kind}(s)"))
        .collect::<Vec<_>>()
        .join(", ");

    let mut by_tool: std::collections::HashMap<&str, Vec<&AgentEvidence>> = std::collections::HashMap::new();
    for e in evidence {
        by_tool.entry(e.tool_name.as_str()).or_default().push(e);
    }

    let mut evidence_lines = Vec::new();
    for entries in by_tool.values() {
        for (i, e) in entries.iter().enumerate() {
            if i >= MAX_SAMPLE_PER_VARIANT {
                evidence_lines.push(format!("…and {} more {} results", entries.len() - MAX_SAMPLE_PER_VARIANT, e.tool_name));
                break;
            }
            evidence_lines.push(format_evidence_line(e));
        }
    }

    format!(
        "OCR text (truncated): {truncated}\n\nEntities found: {counts_line}\n\nEvidence:\n{}",
        evidence_lines.join("\n")
    )
}

fn format_evidence_line(e: &AgentEvidence) -> String {
    if !e.success {
        return format!("{}: failed ({})", e.tool_name, e.error_message.as_deref().unwrap_or("unknown error"));
    }
    match e.tool_name.as_str() {
        "scam_db" => {
            let verified = e.payload.get("verified").and_then(|v| v.as_bool()).unwrap_or(false);
            let reports = e.payload.get("report_count").and_then(|v| v.as_i64()).unwrap_or(0);
            format!("scam_db: verified={verified}, reports={reports}")
        }
        "exa_search" => {
            let results = e.payload.get("results").and_then(|v| v.as_array());
            let count = results.map(|r| r.len()).unwrap_or(0);
            let top = results
                .and_then(|r| r.first())
                .and_then(|r| r.get("domain"))
                .and_then(|d| d.as_str())
                .unwrap_or("none");
            format!("exa_search: {count} results, top: {top}")
        }
        "domain_reputation" => {
            let risk = e.payload.get("risk_level").and_then(|v| v.as_str()).unwrap_or("unknown");
            let age = e
                .payload
                .get("age_days")
                .and_then(|v| v.as_i64())
                .map(|d| d.to_string())
                .unwrap_or_else(|| "unknown".into());
            format!("domain_reputation: risk={risk}, age_days={age}")
        }
        "phone_validator" => {
            let suspicious = e.payload.get("suspicious").and_then(|v| v.as_bool()).unwrap_or(false);
            if suspicious {
                let reason = e.payload.get("suspicious_reason").and_then(|v| v.as_str()).unwrap_or("unspecified");
                format!("phone_validator: suspicious, reason=\"{reason}\"")
            } else {
                "phone_validator: not suspicious".to_string()
            }
        }
        other => format!("{other}: {}", e.payload),
    }
}

/// Starting score 0; only `success=true` evidence counts. Capped at 100.
fn reason_heuristic(evidence: &[AgentEvidence]) -> ReasonResult {
    let mut score: f64 = 0.0;
    let mut satisfied: Vec<String> = Vec::new();

    let registry_found = evidence
        .iter()
        .any(|e| e.success && e.tool_name == "scam_db" && e.payload.get("found").and_then(|v| v.as_bool()) == Some(true));
    let registry_verified = evidence
        .iter()
        .any(|e| e.success && e.tool_name == "scam_db" && e.payload.get("verified").and_then(|v| v.as_bool()) == Some(true));
    if registry_found {
        if registry_verified {
            score += 50.0;
            satisfied.push("a verified registry match was found".into());
        } else {
            score += 40.0;
            satisfied.push("an unverified registry match was found".into());
        }
    }

    let domain_high_risk = evidence.iter().any(|e| {
        e.success
            && e.tool_name == "domain_reputation"
            && e.payload.get("risk_level").and_then(|v| v.as_str()) == Some("high")
    });
    if domain_high_risk {
        score += 30.0;
        satisfied.push("domain reputation risk is high".into());
    }

    let phone_suspicious = evidence.iter().any(|e| {
        e.success && e.tool_name == "phone_validator" && e.payload.get("suspicious").and_then(|v| v.as_bool()) == Some(true)
    });
    if phone_suspicious {
        score += 25.0;
        satisfied.push("phone number matched a suspicious pattern".into());
    }

    let web_search_strong = evidence.iter().any(|e| {
        e.success
            && e.tool_name == "exa_search"
            && e.payload
                .get("results")
                .and_then(|v| v.as_array())
                .map(|results| {
                    results.len() >= 3
                        && results
                            .iter()
                            .any(|r| r.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0) >= 0.8)
                })
                .unwrap_or(false)
    });
    if web_search_strong {
        score += 20.0;
        satisfied.push("multiple trusted-source search results corroborate the report".into());
    }

    let domain_young = evidence.iter().any(|e| {
        e.success
            && e.tool_name == "domain_reputation"
            && e.payload.get("age_days").and_then(|v| v.as_i64()).map(|d| d < 30).unwrap_or(false)
    });
    if domain_young {
        score += 10.0;
        satisfied.push("domain is less than 30 days old".into());
    }

    let score = score.min(100.0);
    let risk_level = if score >= 70.0 {
        RiskLevel::High
    } else if score >= 40.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    let explanation = if satisfied.is_empty() {
        "no heuristic signals were present in the collected evidence".to_string()
    } else {
        satisfied.join("; ")
    };

    ReasonResult {
        risk_level,
        confidence: score.round() as u8,
        explanation,
        reasoning_method: "heuristic",
        evidence_used: evidence.iter().filter(|e| e.success).map(|e| e.tool_name.clone()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn evidence(tool_name: &str, payload: serde_json::Value, success: bool) -> AgentEvidence {
        AgentEvidence {
            tool_name: tool_name.into(),
            entity_type: "url".into(),
            entity_value: "example.com".into(),
            payload,
            success,
            error_message: None,
            execution_time_ms: 10,
        }
    }

    #[test]
    fn heuristic_scores_verified_registry_hit_as_high() {
        let ev = vec![evidence("scam_db", json!({"found": true, "verified": true}), true)];
        let result = reason_heuristic(&ev);
        assert_eq!(result.risk_level, RiskLevel::High);
        assert_eq!(result.confidence, 50);
        assert_eq!(result.reasoning_method, "heuristic");
    }

    #[test]
    fn heuristic_combines_multiple_signals() {
        let ev = vec![
            evidence("scam_db", json!({"found": true, "verified": false}), true),
            evidence("domain_reputation", json!({"risk_level": "high", "age_days": 2}), true),
        ];
        let result = reason_heuristic(&ev);
        // 40 (unverified registry) + 30 (domain high) + 10 (young domain) = 80
        assert_eq!(result.confidence, 80);
        assert_eq!(result.risk_level, RiskLevel::High);
    }

    #[test]
    fn heuristic_ignores_failed_evidence() {
        let ev = vec![evidence("scam_db", json!({"found": true, "verified": true}), false)];
        let result = reason_heuristic(&ev);
        assert_eq!(result.confidence, 0);
        assert_eq!(result.risk_level, RiskLevel::Low);
    }

    #[test]
    fn heuristic_caps_at_100() {
        let ev = vec![
            evidence("scam_db", json!({"found": true, "verified": true}), true),
            evidence("domain_reputation", json!({"risk_level": "high", "age_days": 2}), true),
            evidence("phone_validator", json!({"suspicious": true}), true),
        ];
        let result = reason_heuristic(&ev);
        assert!(result.confidence <= 100);
    }

    #[test]
    fn validate_verdict_rejects_unknown_risk_level() {
        let v = LlmVerdict {
            risk_level: "critical".into(),
            confidence: 90.0,
            explanation: "this is a long enough explanation".into(),
        };
        assert!(validate_verdict(v).is_none());
    }

    #[test]
    fn validate_verdict_rejects_short_explanation() {
        let v = LlmVerdict {
            risk_level: "high".into(),
            confidence: 90.0,
            explanation: "short".into(),
        };
        assert!(validate_verdict(v).is_none());
    }

    #[test]
    fn validate_verdict_clamps_confidence() {
        let v = LlmVerdict {
            risk_level: "high".into(),
            confidence: 150.0,
            explanation: "confidence exceeds the valid range here".into(),
        };
        let (_, confidence, _) = validate_verdict(v).unwrap();
        assert_eq!(confidence, 100);
    }
}
