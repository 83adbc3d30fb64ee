//! Postgres-backed [`TenderStore`]. Idempotency rests on the schema's unique indexes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tender_core::{
    AgentRunLog, Evaluation, Jurisdiction, Label, NewDecision, NewEvaluation, NewRawCapture,
    NewRunLog, NewSource, RawCapture, Source, SourceHealth, Tender, TenderDraft,
    UnknownVariant,
};
use tracing::debug;

use crate::store::{
    DigestCandidate, DigestStats, InsertOutcome, SourceQuery, StoreError, TenderPage,
    TenderQuery, TenderStore, UpsertOutcome,
};

const SOURCE_COLUMNS: &str = r#"
    source_id, name, organisation, jurisdiction, owner_type, source_type, access, priority,
    status, feed_url, base_url, hub_url, field_map, category_tags_default, parsing_notes,
    last_checked_at, last_status, last_status_detail, discovered_from, discovered_at, created_at
"#;

const TENDER_COLUMNS: &str = r#"
    t.id, t.source_id, t.raw_capture_id, t.jurisdiction, t.owner_type, t.source_url,
    t.mapping_version, t.tender_ref, t.reference_is_synthetic, t.title, t.description_snippet,
    t.agency, t.category_tags, t.raw_category, t.publish_date, t.publish_date_estimated,
    t.closing_date, t.status, t.budget_min, t.budget_max, t.currency, t.budget_source,
    t.is_canonical, t.canonical_id, t.evaluation_status, t.label, t.first_seen_at,
    t.last_seen_at, t.updated_at
"#;

const TENDER_FILTER: &str = r#"
     WHERE ($1::text IS NULL OR t.jurisdiction = $1)
       AND ($2::text IS NULL OR t.label = $2)
       AND ($3::text IS NULL OR t.status = $3)
       AND ($4::text IS NULL OR t.title ILIKE $4 OR t.tender_ref ILIKE $4 OR t.agency ILIKE $4)
"#;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn parse_col<T>(row: &PgRow, column: &str) -> Result<T, StoreError>
where
    T: FromStr<Err = UnknownVariant>,
{
    let raw: String = row.try_get(column)?;
    Ok(raw.parse::<T>()?)
}

fn parse_opt_col<T>(row: &PgRow, column: &str) -> Result<Option<T>, StoreError>
where
    T: FromStr<Err = UnknownVariant>,
{
    let raw: Option<String> = row.try_get(column)?;
    Ok(raw.map(|v| v.parse::<T>()).transpose()?)
}

fn source_from_row(row: &PgRow) -> Result<Source, StoreError> {
    let field_map: serde_json::Value = row.try_get("field_map")?;
    let field_map: BTreeMap<String, String> = serde_json::from_value(field_map)?;
    let jurisdiction: String = row.try_get("jurisdiction")?;
    Ok(Source {
        source_id: row.try_get("source_id")?,
        name: row.try_get("name")?,
        organisation: row.try_get("organisation")?,
        jurisdiction: Jurisdiction::from(jurisdiction),
        owner_type: row.try_get("owner_type")?,
        kind: parse_col(row, "source_type")?,
        access: row.try_get("access")?,
        priority: row.try_get("priority")?,
        status: parse_col(row, "status")?,
        feed_url: row.try_get("feed_url")?,
        base_url: row.try_get("base_url")?,
        hub_url: row.try_get("hub_url")?,
        field_map,
        category_tags_default: row.try_get("category_tags_default")?,
        parsing_notes: row.try_get("parsing_notes")?,
        last_checked_at: row.try_get("last_checked_at")?,
        last_status: parse_opt_col(row, "last_status")?,
        last_status_detail: row.try_get("last_status_detail")?,
        discovered_from: row.try_get("discovered_from")?,
        discovered_at: row.try_get("discovered_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn tender_from_row(row: &PgRow) -> Result<Tender, StoreError> {
    let jurisdiction: String = row.try_get("jurisdiction")?;
    Ok(Tender {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        raw_capture_id: row.try_get("raw_capture_id")?,
        jurisdiction: Jurisdiction::from(jurisdiction),
        owner_type: row.try_get("owner_type")?,
        source_url: row.try_get("source_url")?,
        mapping_version: row.try_get("mapping_version")?,
        tender_ref: row.try_get("tender_ref")?,
        reference_is_synthetic: row.try_get("reference_is_synthetic")?,
        title: row.try_get("title")?,
        description_snippet: row.try_get("description_snippet")?,
        agency: row.try_get("agency")?,
        category_tags: row.try_get("category_tags")?,
        raw_category: row.try_get("raw_category")?,
        publish_date: row.try_get("publish_date")?,
        publish_date_estimated: row.try_get("publish_date_estimated")?,
        closing_date: row.try_get("closing_date")?,
        status: parse_col(row, "status")?,
        budget_min: row.try_get("budget_min")?,
        budget_max: row.try_get("budget_max")?,
        currency: row.try_get("currency")?,
        budget_source: parse_col(row, "budget_source")?,
        is_canonical: row.try_get("is_canonical")?,
        canonical_id: row.try_get("canonical_id")?,
        evaluation_status: parse_col(row, "evaluation_status")?,
        label: parse_col(row, "label")?,
        first_seen_at: row.try_get("first_seen_at")?,
        last_seen_at: row.try_get("last_seen_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn capture_from_row(row: &PgRow) -> Result<RawCapture, StoreError> {
    let pre: serde_json::Value = row.try_get("pre_extracted")?;
    Ok(RawCapture {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        format: parse_col(row, "raw_format")?,
        payload: row.try_get("raw_payload")?,
        pre: serde_json::from_value(pre)?,
        item_url: row.try_get("item_url")?,
        guid: row.try_get("item_guid")?,
        captured_at: row.try_get("captured_at")?,
        normalized: row.try_get("normalised")?,
        tender_id: row.try_get("tender_id")?,
    })
}

fn evaluation_from_row(row: &PgRow) -> Result<Evaluation, StoreError> {
    let signals: serde_json::Value = row.try_get("signals_used")?;
    let weights: serde_json::Value = row.try_get("weights_used")?;
    Ok(Evaluation {
        id: row.try_get("id")?,
        is_latest: row.try_get("is_latest")?,
        body: NewEvaluation {
            tender_id: row.try_get("tender_id")?,
            tender_ref: row.try_get("tender_ref")?,
            capability_fit: row.try_get("capability_fit")?,
            business_potential: row.try_get("business_potential")?,
            overall: row.try_get("overall_score")?,
            label: parse_col(row, "label")?,
            rationale: row.try_get("rationale")?,
            signals: serde_json::from_value(signals)?,
            weights: serde_json::from_value(weights)?,
            profile_version: row.try_get("profile_version")?,
            profile_snapshot: row.try_get("profile_snapshot")?,
            model_used: row.try_get("model_used")?,
            evaluated_at: row.try_get("evaluated_at")?,
        },
    })
}

fn run_log_from_row(row: &PgRow) -> Result<AgentRunLog, StoreError> {
    Ok(AgentRunLog {
        id: row.try_get("id")?,
        body: NewRunLog {
            run_id: row.try_get("run_id")?,
            agent_name: row.try_get("agent_name")?,
            status: parse_col(row, "status")?,
            items_processed: row.try_get("items_processed")?,
            new_items: row.try_get("new_items")?,
            detail: row.try_get("detail")?,
            error_detail: row.try_get("error_detail")?,
            metadata: row.try_get("metadata")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        },
    })
}

impl PgStore {
    async fn sources_where(&self, predicate: &str) -> Result<Vec<Source>, StoreError> {
        let sql = format!(
            "SELECT {SOURCE_COLUMNS} FROM tender_sources WHERE {predicate} ORDER BY priority, source_id"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(source_from_row).collect()
    }
}

#[async_trait]
impl TenderStore for PgStore {
    async fn count_sources(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tender_sources")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn insert_source(
        &self,
        source: &NewSource,
        created_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let field_map = serde_json::to_value(&source.field_map)?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO tender_sources (
                source_id, name, organisation, jurisdiction, owner_type, source_type, access,
                priority, status, feed_url, base_url, hub_url, field_map, category_tags_default,
                parsing_notes, discovered_from, discovered_at, created_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&source.source_id)
        .bind(&source.name)
        .bind(&source.organisation)
        .bind(source.jurisdiction.code())
        .bind(&source.owner_type)
        .bind(source.kind.as_str())
        .bind(&source.access)
        .bind(source.priority)
        .bind(source.status.as_str())
        .bind(&source.feed_url)
        .bind(&source.base_url)
        .bind(&source.hub_url)
        .bind(field_map)
        .bind(&source.category_tags_default)
        .bind(&source.parsing_notes)
        .bind(&source.discovered_from)
        .bind(source.discovered_at)
        .bind(created_at)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted > 0)
    }

    async fn list_sources(&self, query: &SourceQuery) -> Result<Vec<Source>, StoreError> {
        let sql = format!(
            r#"
            SELECT {SOURCE_COLUMNS}
              FROM tender_sources
             WHERE ($1::text IS NULL OR jurisdiction = $1)
               AND ($2::text IS NULL OR status = $2)
             ORDER BY priority, source_id
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(query.jurisdiction.as_ref().map(|j| j.code().to_string()))
            .bind(query.status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(source_from_row).collect()
    }

    async fn ingestible_sources(&self) -> Result<Vec<Source>, StoreError> {
        self.sources_where(
            "status IN ('active', 'pending_validation') \
             AND source_type IN ('rss_xml', 'api_xml', 'html_list')",
        )
        .await
    }

    async fn hub_sources(&self) -> Result<Vec<Source>, StoreError> {
        self.sources_where("source_type = 'html_hub' AND status <> 'disabled'")
            .await
    }

    async fn source_url_known(&self, url: &str) -> Result<bool, StoreError> {
        let known: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM tender_sources
                 WHERE feed_url = $1 OR base_url = $1 OR hub_url = $1
            )
            "#,
        )
        .bind(url)
        .fetch_one(&self.pool)
        .await?;
        Ok(known)
    }

    async fn record_source_health(
        &self,
        source_id: &str,
        health: &SourceHealth,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE tender_sources
               SET last_status = $2, last_status_detail = $3, last_checked_at = $4
             WHERE source_id = $1
            "#,
        )
        .bind(source_id)
        .bind(health.status.as_str())
        .bind(&health.detail)
        .bind(health.checked_at)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "source",
                id: source_id.to_string(),
            });
        }
        Ok(())
    }

    async fn known_guids(&self, source_id: &str) -> Result<HashSet<String>, StoreError> {
        let guids: Vec<String> =
            sqlx::query_scalar(
                "SELECT item_guid FROM raw_tender_captures WHERE source_id = $1 AND normalised",
            )
            .bind(source_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(guids.into_iter().collect())
    }

    async fn pending_captures(&self, source_id: &str) -> Result<Vec<RawCapture>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, source_id, raw_format, raw_payload, pre_extracted, item_url, item_guid,
                   captured_at, normalised, tender_id
              FROM raw_tender_captures
             WHERE source_id = $1 AND NOT normalised
             ORDER BY captured_at, id
            "#,
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(capture_from_row).collect()
    }

    async fn insert_raw_capture(
        &self,
        capture: &NewRawCapture,
    ) -> Result<InsertOutcome, StoreError> {
        let pre = serde_json::to_value(&capture.pre)?;
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO raw_tender_captures
                (source_id, raw_format, raw_payload, pre_extracted, item_url, item_guid, captured_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (source_id, item_guid) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&capture.source_id)
        .bind(capture.format.as_str())
        .bind(&capture.payload)
        .bind(pre)
        .bind(&capture.item_url)
        .bind(&capture.guid)
        .bind(capture.captured_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match id {
            Some(id) => InsertOutcome::Inserted(id),
            None => {
                debug!(source_id = %capture.source_id, guid = %capture.guid, "capture already stored");
                InsertOutcome::Duplicate
            }
        })
    }

    async fn mark_capture_normalized(
        &self,
        capture_id: i64,
        tender_id: Option<i64>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE raw_tender_captures SET normalised = TRUE, tender_id = $2 WHERE id = $1")
            .bind(capture_id)
            .bind(tender_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_tender(
        &self,
        draft: &TenderDraft,
        seen_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO tenders (
                source_id, raw_capture_id, jurisdiction, owner_type, source_url, mapping_version,
                tender_ref, reference_is_synthetic, title, description_snippet, agency,
                category_tags, raw_category, publish_date, publish_date_estimated, closing_date,
                status, budget_min, budget_max, currency, budget_source,
                first_seen_at, last_seen_at, updated_at
            ) VALUES (
                $1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,
                $22,$22,$22
            )
            ON CONFLICT (tender_ref, jurisdiction) WHERE is_canonical DO UPDATE SET
                title               = EXCLUDED.title,
                closing_date        = EXCLUDED.closing_date,
                status              = EXCLUDED.status,
                category_tags       = EXCLUDED.category_tags,
                description_snippet = COALESCE(EXCLUDED.description_snippet, tenders.description_snippet),
                agency              = COALESCE(EXCLUDED.agency, tenders.agency),
                source_url          = COALESCE(EXCLUDED.source_url, tenders.source_url),
                last_seen_at        = GREATEST(tenders.last_seen_at, EXCLUDED.last_seen_at),
                updated_at          = EXCLUDED.updated_at
            RETURNING id, (xmax = 0) AS inserted
            "#,
        )
        .bind(&draft.source_id)
        .bind(draft.raw_capture_id)
        .bind(draft.jurisdiction.code())
        .bind(&draft.owner_type)
        .bind(&draft.source_url)
        .bind(&draft.mapping_version)
        .bind(&draft.tender_ref)
        .bind(draft.reference_is_synthetic)
        .bind(&draft.title)
        .bind(&draft.description_snippet)
        .bind(&draft.agency)
        .bind(&draft.category_tags)
        .bind(&draft.raw_category)
        .bind(draft.publish_date)
        .bind(draft.publish_date_estimated)
        .bind(draft.closing_date)
        .bind(draft.status.as_str())
        .bind(draft.budget_min)
        .bind(draft.budget_max)
        .bind(&draft.currency)
        .bind(draft.budget_source.as_str())
        .bind(seen_at)
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.try_get("id")?;
        let inserted: bool = row.try_get("inserted")?;
        Ok(if inserted {
            UpsertOutcome::Inserted(id)
        } else {
            UpsertOutcome::Refreshed(id)
        })
    }

    async fn get_tender(&self, tender_id: i64) -> Result<Option<Tender>, StoreError> {
        let sql = format!("SELECT {TENDER_COLUMNS} FROM tenders t WHERE t.id = $1");
        let row = sqlx::query(&sql)
            .bind(tender_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(tender_from_row).transpose()
    }

    async fn query_tenders(&self, query: &TenderQuery) -> Result<TenderPage, StoreError> {
        let jurisdiction = query.jurisdiction.as_ref().map(|j| j.code().to_string());
        let label = query.label.map(|l| l.as_str());
        let status = query.status.map(|s| s.as_str());
        let search = query.search_term().map(|term| format!("%{term}%"));

        let count_sql = format!("SELECT COUNT(*) FROM tenders t {TENDER_FILTER}");
        let total: i64 = sqlx::query_scalar(&count_sql)
            .bind(&jurisdiction)
            .bind(label)
            .bind(status)
            .bind(&search)
            .fetch_one(&self.pool)
            .await?;

        let page_sql = format!(
            r#"
            SELECT {TENDER_COLUMNS}
              FROM tenders t
            {TENDER_FILTER}
             ORDER BY t.publish_date DESC NULLS LAST, t.first_seen_at DESC, t.id DESC
             LIMIT $5 OFFSET $6
            "#
        );
        let rows = sqlx::query(&page_sql)
            .bind(&jurisdiction)
            .bind(label)
            .bind(status)
            .bind(&search)
            .bind(query.limit.max(0))
            .bind(query.offset.max(0))
            .fetch_all(&self.pool)
            .await?;
        let tenders = rows.iter().map(tender_from_row).collect::<Result<_, _>>()?;
        Ok(TenderPage { tenders, total })
    }

    async fn pending_tenders(&self, limit: i64) -> Result<Vec<Tender>, StoreError> {
        let sql = format!(
            r#"
            SELECT {TENDER_COLUMNS}
              FROM tenders t
             WHERE t.is_canonical AND t.evaluation_status = 'pending'
             ORDER BY t.first_seen_at DESC, t.id DESC
             LIMIT $1
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(tender_from_row).collect()
    }

    async fn tracked_agencies(&self) -> Result<Vec<String>, StoreError> {
        let agencies: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT t.agency
              FROM tender_decisions d
              JOIN tenders t ON t.id = d.tender_id
             WHERE d.decision = 'track' AND t.agency IS NOT NULL
             ORDER BY t.agency
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(agencies)
    }

    async fn record_evaluation(&self, evaluation: &NewEvaluation) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE tenders
               SET label = $2, evaluation_status = 'scored', updated_at = $3
             WHERE id = $1
            "#,
        )
        .bind(evaluation.tender_id)
        .bind(evaluation.label.as_str())
        .bind(evaluation.evaluated_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "tender",
                id: evaluation.tender_id.to_string(),
            });
        }

        sqlx::query(
            "UPDATE tender_evaluations SET is_latest = FALSE WHERE tender_id = $1 AND is_latest",
        )
        .bind(evaluation.tender_id)
        .execute(&mut *tx)
        .await?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO tender_evaluations (
                tender_id, tender_ref, capability_fit, business_potential, overall_score,
                is_latest, label, rationale, signals_used, weights_used, profile_version,
                profile_snapshot, model_used, evaluated_at
            ) VALUES ($1,$2,$3,$4,$5,TRUE,$6,$7,$8,$9,$10,$11,$12,$13)
            RETURNING id
            "#,
        )
        .bind(evaluation.tender_id)
        .bind(&evaluation.tender_ref)
        .bind(evaluation.capability_fit)
        .bind(evaluation.business_potential)
        .bind(evaluation.overall)
        .bind(evaluation.label.as_str())
        .bind(&evaluation.rationale)
        .bind(serde_json::to_value(evaluation.signals)?)
        .bind(serde_json::to_value(evaluation.weights)?)
        .bind(&evaluation.profile_version)
        .bind(&evaluation.profile_snapshot)
        .bind(&evaluation.model_used)
        .bind(evaluation.evaluated_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    async fn evaluations_for(&self, tender_id: i64) -> Result<Vec<Evaluation>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM tender_evaluations WHERE tender_id = $1 ORDER BY evaluated_at DESC, id DESC",
        )
        .bind(tender_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(evaluation_from_row).collect()
    }

    async fn insert_decision(&self, decision: &NewDecision) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO tender_decisions (tender_id, decision, notes, assignee, pipeline_stage, decided_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(decision.tender_id)
        .bind(decision.decision.as_str())
        .bind(&decision.notes)
        .bind(&decision.assignee)
        .bind(&decision.pipeline_stage)
        .bind(decision.decided_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn set_tender_label(&self, tender_id: i64, label: Label) -> Result<(), StoreError> {
        let updated = sqlx::query("UPDATE tenders SET label = $2, updated_at = NOW() WHERE id = $1")
            .bind(tender_id)
            .bind(label.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "tender",
                id: tender_id.to_string(),
            });
        }
        Ok(())
    }

    async fn digest_stats(&self, today: NaiveDate) -> Result<DigestStats, StoreError> {
        let horizon = today + Duration::days(7);
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM tenders WHERE (first_seen_at AT TIME ZONE 'UTC')::date = $1) AS new_today,
                (SELECT COUNT(*) FROM tenders
                  WHERE label = 'priority' AND closing_date >= $1) AS open_priority,
                (SELECT COUNT(*) FROM tenders WHERE closing_date BETWEEN $1 AND $2) AS closing_soon,
                (SELECT COUNT(*) FROM tender_sources
                  WHERE status = 'active' AND last_status = 'ok') AS sources_ok,
                (SELECT COUNT(*) FROM tender_sources WHERE status = 'active') AS sources_active
            "#,
        )
        .bind(today)
        .bind(horizon)
        .fetch_one(&self.pool)
        .await?;
        Ok(DigestStats {
            new_today: row.try_get("new_today")?,
            open_priority: row.try_get("open_priority")?,
            closing_soon: row.try_get("closing_soon")?,
            sources_ok: row.try_get("sources_ok")?,
            sources_active: row.try_get("sources_active")?,
        })
    }

    async fn digest_candidates(
        &self,
        today: NaiveDate,
        limit: i64,
    ) -> Result<Vec<DigestCandidate>, StoreError> {
        let sql = format!(
            r#"
            SELECT {TENDER_COLUMNS}, s.name AS source_name
              FROM tenders t
              LEFT JOIN tender_sources s ON s.source_id = t.source_id
             WHERE t.closing_date >= $1 AND t.label <> 'ignore'
             ORDER BY
               CASE t.label WHEN 'priority' THEN 0 WHEN 'consider' THEN 1 WHEN 'partner_only' THEN 2 ELSE 3 END,
               t.closing_date ASC NULLS LAST,
               t.id
             LIMIT $2
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(today)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            candidates.push(DigestCandidate {
                tender: tender_from_row(row)?,
                source_name: row.try_get("source_name")?,
                latest: None,
            });
        }

        let ids: Vec<i64> = candidates.iter().map(|c| c.tender.id).collect();
        let latest_rows = sqlx::query(
            "SELECT * FROM tender_evaluations WHERE is_latest AND tender_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        let mut latest: HashMap<i64, Evaluation> = HashMap::new();
        for row in &latest_rows {
            let evaluation = evaluation_from_row(row)?;
            latest.insert(evaluation.body.tender_id, evaluation);
        }
        for candidate in &mut candidates {
            candidate.latest = latest.remove(&candidate.tender.id);
        }
        Ok(candidates)
    }

    async fn insert_run_log(&self, log: &NewRunLog) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO tender_agent_run_logs (
                run_id, agent_name, status, items_processed, new_items, duration_ms, detail,
                error_detail, metadata, started_at, finished_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
            RETURNING id
            "#,
        )
        .bind(log.run_id)
        .bind(&log.agent_name)
        .bind(log.status.as_str())
        .bind(log.items_processed)
        .bind(log.new_items)
        .bind(log.duration_ms())
        .bind(&log.detail)
        .bind(&log.error_detail)
        .bind(&log.metadata)
        .bind(log.started_at)
        .bind(log.finished_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn recent_run_logs(&self, limit: i64) -> Result<Vec<AgentRunLog>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM tender_agent_run_logs ORDER BY started_at DESC, id DESC LIMIT $1",
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(run_log_from_row).collect()
    }

    async fn last_run(&self, agent_name: &str) -> Result<Option<AgentRunLog>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM tender_agent_run_logs
             WHERE agent_name = $1
             ORDER BY started_at DESC, id DESC
             LIMIT 1
            "#,
        )
        .bind(agent_name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(run_log_from_row).transpose()
    }
}
