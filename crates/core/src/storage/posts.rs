use crate::domain::analysis::AnalysisResult;
use anyhow::Context;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub const STATUS_DRAFT: &str = "Draft";

#[derive(Debug, Clone)]
pub struct DraftPost {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Oldest drafts first, skipping blank content (those never reach the model).
pub async fn find_drafts_missing_analysis(
    pool: &sqlx::PgPool,
    limit: i64,
) -> anyhow::Result<Vec<DraftPost>> {
    anyhow::ensure!(limit >= 1, "limit must be >= 1 (got {limit})");

    let rows = sqlx::query_as::<_, (Uuid, Uuid, String, DateTime<Utc>)>(
        "SELECT id, user_id, content, created_at \
         FROM posts \
         WHERE status = $1 AND ai_analysis_json IS NULL AND btrim(content) <> '' \
         ORDER BY created_at ASC \
         LIMIT $2",
    )
    .bind(STATUS_DRAFT)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("select drafts missing analysis failed")?;

    Ok(rows
        .into_iter()
        .map(|(id, user_id, content, created_at)| DraftPost {
            id,
            user_id,
            content,
            created_at,
        })
        .collect())
}

// Only the analysis columns are written; linking a KOL or stock stays with the user.
const ATTACH_ANALYSIS_SQL: &str = "UPDATE posts \
     SET sentiment = $2, ai_analysis_json = $3 \
     WHERE id = $1 AND status = $4";

/// Stores the analysis on a draft. Returns false when the post is gone or no longer a draft.
pub async fn attach_analysis(
    pool: &sqlx::PgPool,
    post_id: Uuid,
    result: &AnalysisResult,
) -> anyhow::Result<bool> {
    let analysis_json =
        serde_json::to_value(result).context("failed to serialize AnalysisResult")?;

    let res = sqlx::query(ATTACH_ANALYSIS_SQL)
        .bind(post_id)
        .bind(result.sentiment.as_str())
        .bind(analysis_json)
        .bind(STATUS_DRAFT)
        .execute(pool)
        .await
        .context("update posts analysis failed")?;

    Ok(res.rows_affected() == 1)
}

pub async fn insert_draft(
    pool: &sqlx::PgPool,
    user_id: Uuid,
    content: &str,
    analysis: Option<&AnalysisResult>,
) -> anyhow::Result<Uuid> {
    anyhow::ensure!(!content.trim().is_empty(), "draft content must be non-empty");

    let analysis_json = analysis
        .map(serde_json::to_value)
        .transpose()
        .context("failed to serialize AnalysisResult")?;

    let post_id: Uuid = sqlx::query_scalar(
        "INSERT INTO posts (id, user_id, content, status, ai_analysis_json) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(content)
    .bind(STATUS_DRAFT)
    .bind(analysis_json)
    .fetch_one(pool)
    .await
    .context("insert posts draft failed")?;

    Ok(post_id)
}
