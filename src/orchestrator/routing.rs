use crate::entities::{self, ExtractOptions, ExtractedEntities};
use crate::llm::{extract_json, ModelRouter, TaskKind};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

const WORKER_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_millis(500);
const FAST_PATH_DEADLINE: Duration = Duration::from_secs(5);

/// Tracks how many agent-task slots are currently occupied. The ingress
/// checks this (with a bounded health-check timeout) before deciding to
/// enqueue rather than fast-path a request.
pub struct WorkerPool {
    capacity: usize,
    in_use: AtomicUsize,
}

pub struct WorkerGuard {
    pool: Arc<WorkerPool>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.pool.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            in_use: AtomicUsize::new(0),
        }
    }

    pub fn active(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Health check is modeled as a pure in-memory read bounded well under
    /// the spec's 500ms allowance; there's no remote worker fleet to probe.
    pub async fn is_available(&self) -> bool {
        tokio::time::timeout(WORKER_HEALTH_CHECK_TIMEOUT, async { self.active() < self.capacity })
            .await
            .unwrap_or(false)
    }

    /// Reserve a slot; released automatically when the guard drops.
    pub fn try_acquire(self: &Arc<Self>) -> Option<WorkerGuard> {
        loop {
            let current = self.in_use.load(Ordering::SeqCst);
            if current >= self.capacity {
                return None;
            }
            if self
                .in_use
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Some(WorkerGuard { pool: Arc::clone(self) });
            }
        }
    }
}

pub enum RouteDecision {
    Agent { task_id: Uuid, entities: ExtractedEntities },
    FastPath,
}

/// Sub-100ms entity pre-scan and enqueue-or-fast-path decision. The
/// extraction itself is pure CPU work (see the Entity Extractor), so the
/// only suspension point here is the worker health check.
pub async fn decide(text: &str, agent_enabled: bool, default_region: &str, workers: &WorkerPool) -> (RouteDecision, Duration) {
    let started = Instant::now();

    let opts = ExtractOptions {
        default_region: default_region.to_string(),
        ..Default::default()
    };
    let entities = entities::extract(text, &opts);
    let has_entities = entities.has_entities();

    let decision = if agent_enabled && has_entities && workers.is_available().await {
        RouteDecision::Agent {
            task_id: Uuid::new_v4(),
            entities,
        }
    } else {
        RouteDecision::FastPath
    };

    let elapsed = started.elapsed();
    match &decision {
        RouteDecision::Agent { task_id, entities } => {
            info!(
                decision = "agent",
                %task_id,
                entities_found = entities.total_count(),
                gate_latency_us = elapsed.as_micros(),
                "routing gate decision"
            );
        }
        RouteDecision::FastPath => {
            let reason = if !agent_enabled {
                "agent_disabled"
            } else if !has_entities {
                "no_entities"
            } else {
                "no_worker_available"
            };
            info!(decision = "fast_path", reason, gate_latency_us = elapsed.as_micros(), "routing gate decision");
        }
    }

    (decision, elapsed)
}

pub fn agent_response(task_id: Uuid, entities: &ExtractedEntities, ws_base_url: &str) -> Value {
    json!({
        "type": "agent",
        "task_id": task_id,
        "ws_url": format!("{ws_base_url}/ws/agent-progress/{task_id}"),
        "estimated_time": "5-30 seconds",
        "entities_found": entities.total_count(),
    })
}

#[derive(Deserialize)]
struct FastPathVerdict {
    risk_level: String,
    confidence: f64,
    category: String,
    explanation: String,
}

const FAST_PATH_SYSTEM: &str = "You are a scam-message triage classifier. Given a short message with no \
extractable entities (no phone numbers, URLs, emails, or payment details), classify it in one pass. \
Respond with strict JSON only: {\"risk_level\": \"low\"|\"medium\"|\"high\", \"confidence\": 0.0-1.0, \
\"category\": \"otp_phishing\"|\"payment_scam\"|\"impersonation\"|\"unknown\", \"explanation\": \"one sentence\"}.";

/// Single-LLM-call classification for text that didn't clear the agent
/// gate. Falls back to a conservative unknown/low verdict if the call
/// fails or the deadline trips — the fast path must never hang the
/// ingress response.
pub async fn fast_path_classify(router: &ModelRouter, text: &str) -> Value {
    let client = router.client_for(TaskKind::FastPathClassification);
    let call = tokio::time::timeout(FAST_PATH_DEADLINE, client.complete(FAST_PATH_SYSTEM, text)).await;

    let verdict = match call {
        Ok(Ok(raw)) => {
            let json_str = extract_json(&raw);
            serde_json::from_str::<FastPathVerdict>(json_str)
                .ok()
                .and_then(validate_fast_path)
        }
        Ok(Err(e)) => {
            warn!(error = %e, "fast-path classification call failed");
            None
        }
        Err(_) => {
            warn!("fast-path classification exceeded its deadline");
            None
        }
    };

    let result = verdict.unwrap_or_else(|| {
        json!({
            "risk_level": "low",
            "confidence": 0.0,
            "category": "unknown",
            "explanation": "no entities found and classification was unavailable",
        })
    });

    json!({ "type": "simple", "result": merge_timestamp(result) })
}

fn merge_timestamp(mut result: Value) -> Value {
    if let Some(obj) = result.as_object_mut() {
        obj.insert("ts".into(), json!(chrono::Utc::now().to_rfc3339()));
    }
    result
}

fn validate_fast_path(v: FastPathVerdict) -> Option<Value> {
    let risk_level = match v.risk_level.to_lowercase().as_str() {
        "low" | "medium" | "high" => v.risk_level.to_lowercase(),
        _ => return None,
    };
    let category = match v.category.to_lowercase().as_str() {
        "otp_phishing" | "payment_scam" | "impersonation" | "unknown" => v.category.to_lowercase(),
        _ => return None,
    };
    Some(json!({
        "risk_level": risk_level,
        "confidence": v.confidence.clamp(0.0, 1.0),
        "category": category,
        "explanation": v.explanation,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_pool_acquire_respects_capacity() {
        let pool = Arc::new(WorkerPool::new(1));
        let guard = pool.try_acquire();
        assert!(guard.is_some());
        assert!(pool.try_acquire().is_none());
        drop(guard);
        assert!(pool.try_acquire().is_some());
    }

    #[tokio::test]
    async fn decide_takes_fast_path_when_agent_disabled() {
        let workers = Arc::new(WorkerPool::new(4));
        let (decision, _) = decide("call me at +14155552671 now", false, "US", &workers).await;
        assert!(matches!(decision, RouteDecision::FastPath));
    }

    #[tokio::test]
    async fn decide_takes_fast_path_when_no_entities() {
        let workers = Arc::new(WorkerPool::new(4));
        let (decision, _) = decide("hi mom, dinner at 7?", true, "US", &workers).await;
        assert!(matches!(decision, RouteDecision::FastPath));
    }

    #[tokio::test]
    async fn decide_takes_agent_path_when_entities_and_capacity() {
        let workers = Arc::new(WorkerPool::new(4));
        let (decision, _) = decide("call me at +14155552671 now", true, "US", &workers).await;
        assert!(matches!(decision, RouteDecision::Agent { .. }));
    }

    #[tokio::test]
    async fn decide_falls_back_when_no_worker_capacity() {
        let workers = Arc::new(WorkerPool::new(1));
        let _guard = workers.try_acquire().unwrap();
        let (decision, _) = decide("call me at +14155552671 now", true, "US", &workers).await;
        assert!(matches!(decision, RouteDecision::FastPath));
    }

    #[test]
    fn agent_response_has_expected_shape() {
        let entities = ExtractedEntities::default();
        let task_id = Uuid::new_v4();
        let resp = agent_response(task_id, &entities, "ws://localhost:8080");
        assert_eq!(resp["type"], "agent");
        assert_eq!(resp["estimated_time"], "5-30 seconds");
        assert_eq!(resp["entities_found"], 0);
    }

    #[test]
    fn validate_fast_path_rejects_unknown_category() {
        let v = FastPathVerdict {
            risk_level: "low".into(),
            confidence: 0.5,
            category: "phishing".into(),
            explanation: "test".into(),
        };
        assert!(validate_fast_path(v).is_none());
    }

    #[test]
    fn validate_fast_path_clamps_confidence() {
        let v = FastPathVerdict {
            risk_level: "high".into(),
            confidence: 2.0,
            category: "payment_scam".into(),
            explanation: "test".into(),
        };
        let result = validate_fast_path(v).unwrap();
        assert_eq!(result["confidence"], 1.0);
    }
}
