use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScamLookupResult {
    pub found: bool,
    pub entity_type: String,
    pub entity_value: String,
    pub report_count: i32,
    pub risk_score: i32,
    pub evidence: Value,
    pub verified: bool,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_reported: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl ScamLookupResult {
    fn not_found(entity_type: &str, entity_value: &str) -> Self {
        Self {
            found: false,
            entity_type: entity_type.to_string(),
            entity_value: entity_value.to_string(),
            report_count: 0,
            risk_score: 0,
            evidence: Value::Array(vec![]),
            verified: false,
            first_seen: None,
            last_reported: None,
            notes: None,
        }
    }
}

/// Content-addressed registry of known-bad entities, backed by a unique
/// composite index on `(entity_type, entity_value)`. Read-heavy; writes
/// only go through `add_report`.
pub struct ScamRegistry {
    pool: PgPool,
}

impl ScamRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lookup(&self, entity_type: &str, entity_value: &str) -> Result<ScamLookupResult> {
        let row = sqlx::query_as::<_, RegistryRow>(
            r#"
            SELECT entity_type, entity_value, report_count, risk_score, evidence,
                   verified, first_seen, last_reported, notes
            FROM scam_reports WHERE entity_type = $1 AND entity_value = $2
            "#,
        )
        .bind(entity_type)
        .bind(entity_value)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::persistence(format!("registry lookup: {e}")))?;

        Ok(match row {
            Some(r) => ScamLookupResult {
                found: true,
                entity_type: r.entity_type,
                entity_value: r.entity_value,
                report_count: r.report_count,
                risk_score: r.risk_score,
                evidence: r.evidence,
                verified: r.verified,
                first_seen: Some(r.first_seen),
                last_reported: Some(r.last_reported),
                notes: r.notes,
            },
            None => ScamLookupResult::not_found(entity_type, entity_value),
        })
    }

    pub async fn check_phone(&self, e164: &str) -> Result<ScamLookupResult> {
        self.lookup("phone", e164).await
    }

    pub async fn check_url(&self, registrable_domain: &str) -> Result<ScamLookupResult> {
        self.lookup("url", registrable_domain).await
    }

    pub async fn check_email(&self, normalized_email: &str) -> Result<ScamLookupResult> {
        self.lookup("email", normalized_email).await
    }

    pub async fn check_payment(&self, value: &str, kind: &str) -> Result<ScamLookupResult> {
        let entity_type = if kind == "bitcoin" { "bitcoin" } else { "payment" };
        self.lookup(entity_type, value).await
    }

    /// Single query returning an aligned result vector in input order;
    /// duplicate inputs share a result.
    pub async fn check_bulk(
        &self,
        entities: &[(String, String)],
    ) -> Result<Vec<ScamLookupResult>> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }

        let types: Vec<String> = entities.iter().map(|(t, _)| t.clone()).collect();
        let values: Vec<String> = entities.iter().map(|(_, v)| v.clone()).collect();

        let rows = sqlx::query_as::<_, RegistryRow>(
            r#"
            SELECT entity_type, entity_value, report_count, risk_score, evidence,
                   verified, first_seen, last_reported, notes
            FROM scam_reports
            WHERE (entity_type, entity_value) IN (
                SELECT * FROM UNNEST($1::text[], $2::text[])
            )
            "#,
        )
        .bind(&types)
        .bind(&values)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::persistence(format!("registry bulk lookup: {e}")))?;

        Ok(entities
            .iter()
            .map(|(entity_type, entity_value)| {
                rows.iter()
                    .find(|r| &r.entity_type == entity_type && &r.entity_value == entity_value)
                    .map(|r| ScamLookupResult {
                        found: true,
                        entity_type: r.entity_type.clone(),
                        entity_value: r.entity_value.clone(),
                        report_count: r.report_count,
                        risk_score: r.risk_score,
                        evidence: r.evidence.clone(),
                        verified: r.verified,
                        first_seen: Some(r.first_seen),
                        last_reported: Some(r.last_reported),
                        notes: r.notes.clone(),
                    })
                    .unwrap_or_else(|| ScamLookupResult::not_found(entity_type, entity_value))
            })
            .collect())
    }

    /// Upsert by `(entity_type, entity_value)`: insert with `report_count=1`
    /// if absent; otherwise increment, append evidence, and bump
    /// `last_reported`. `risk_score` is recomputed from the post-upsert
    /// row in a second statement so concurrent `add_report` calls racing on
    /// `report_count` still each see a consistent count before scoring —
    /// the increment itself is race-free (`report_count = report_count + 1`
    /// inside `ON CONFLICT`).
    pub async fn add_report(
        &self,
        entity_type: &str,
        entity_value: &str,
        evidence: Value,
        notes: Option<&str>,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::persistence(format!("begin add_report tx: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO scam_reports (entity_type, entity_value, report_count, evidence, notes)
            VALUES ($1, $2, 1, jsonb_build_array($3::jsonb), $4)
            ON CONFLICT (entity_type, entity_value) DO UPDATE SET
                report_count = scam_reports.report_count + 1,
                evidence = scam_reports.evidence || jsonb_build_array($3::jsonb),
                last_reported = now(),
                notes = COALESCE($4, scam_reports.notes),
                updated_at = now()
            "#,
        )
        .bind(entity_type)
        .bind(entity_value)
        .bind(&evidence)
        .bind(notes)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::persistence(format!("registry add_report upsert: {e}")))?;

        let row: (i32, bool, DateTime<Utc>) = sqlx::query_as(
            "SELECT report_count, verified, last_reported FROM scam_reports WHERE entity_type = $1 AND entity_value = $2",
        )
        .bind(entity_type)
        .bind(entity_value)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| Error::persistence(format!("registry add_report reread: {e}")))?;

        let days_since = (Utc::now() - row.2).num_days();
        let score = risk_score(row.0, row.1, days_since);

        sqlx::query("UPDATE scam_reports SET risk_score = $1 WHERE entity_type = $2 AND entity_value = $3")
            .bind(score)
            .bind(entity_type)
            .bind(entity_value)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::persistence(format!("registry add_report rescore: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| Error::persistence(format!("commit add_report tx: {e}")))?;

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct RegistryRow {
    entity_type: String,
    entity_value: String,
    report_count: i32,
    risk_score: i32,
    evidence: Value,
    verified: bool,
    first_seen: DateTime<Utc>,
    last_reported: DateTime<Utc>,
    notes: Option<String>,
}

/// `risk_score = clamp(30 + 10·log2(report_count) + (verified ? 20 : 0) +
/// recency_bonus + source_weights, 0, 100)`. `source_weights` is left at 0
/// here — no per-source weighting table is specified, so only the named
/// terms contribute; callers that know a stronger source signal can pass a
/// pre-computed `risk_score` override through `notes`/evidence instead.
pub fn risk_score(report_count: i32, verified: bool, days_since_last_report: i64) -> i32 {
    let base = 30.0;
    let report_term = 10.0 * (report_count.max(1) as f64).log2();
    let verified_term = if verified { 20.0 } else { 0.0 };
    let recency_bonus = if days_since_last_report <= 30 {
        15.0
    } else if days_since_last_report >= 365 {
        0.0
    } else {
        15.0 * (1.0 - (days_since_last_report - 30) as f64 / (365 - 30) as f64)
    };
    let raw = base + report_term + verified_term + recency_bonus;
    raw.clamp(0.0, 100.0).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_score_is_bounded() {
        let s = risk_score(1, false, 0);
        assert!((0..=100).contains(&s));
    }

    #[test]
    fn verified_and_recent_raises_score() {
        let unverified = risk_score(5, false, 400);
        let verified_recent = risk_score(5, true, 0);
        assert!(verified_recent > unverified);
    }

    #[test]
    fn recency_bonus_decays_to_zero() {
        let recent = risk_score(1, false, 5);
        let old = risk_score(1, false, 360);
        assert!(recent > old);
    }

    #[test]
    fn high_report_count_never_exceeds_cap() {
        let s = risk_score(1_000_000, true, 0);
        assert_eq!(s, 100);
    }
}
