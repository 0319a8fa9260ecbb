use anyhow::Context;
use std::future::Future;
use uuid::Uuid;

use kolscope_core::analysis::Analyzer;
use kolscope_core::config::Settings;
use kolscope_core::domain::analysis::AnalysisResult;
use kolscope_core::llm::gemini::GeminiClient;
use kolscope_core::storage::posts::DraftPost;
use kolscope_core::storage::{lock, posts};

#[derive(Debug, Clone)]
pub struct BackfillOptions {
    pub limit: i64,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillSummary {
    pub candidates: usize,
    pub analyzed: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub async fn run(settings: &Settings, opts: BackfillOptions) -> anyhow::Result<BackfillSummary> {
    anyhow::ensure!(
        (1..=1000).contains(&opts.limit),
        "backfill limit must be 1..=1000 (got {})",
        opts.limit
    );

    let pool = super::connect(settings).await?;

    if opts.dry_run {
        let drafts = posts::find_drafts_missing_analysis(&pool, opts.limit).await?;
        for d in &drafts {
            tracing::info!(post_id = %d.id, user_id = %d.user_id, created_at = %d.created_at, "would analyze draft");
        }
        return Ok(BackfillSummary {
            candidates: drafts.len(),
            ..Default::default()
        });
    }

    // Fail on a missing key before taking the lock.
    let analyzer = Analyzer::new(GeminiClient::from_settings(settings)?);

    // Held for the whole run: the advisory lock belongs to this session.
    let mut lock_conn = pool
        .acquire()
        .await
        .context("failed to acquire connection for backfill lock")?;

    if !lock::try_acquire_backfill_lock(&mut lock_conn).await? {
        tracing::warn!("backfill lock not acquired; another run in progress");
        return Ok(BackfillSummary::default());
    }

    let res = match posts::find_drafts_missing_analysis(&pool, opts.limit).await {
        Ok(drafts) => Ok(analyze_drafts(drafts, &analyzer, |post_id, result| {
            let pool = pool.clone();
            async move { posts::attach_analysis(&pool, post_id, &result).await }
        })
        .await),
        Err(e) => Err(e),
    };

    if let Err(e) = lock::release_backfill_lock(&mut lock_conn).await {
        sentry_anyhow::capture_anyhow(&e);
        tracing::error!(error = %e, "failed to release backfill lock");
    }
    res
}

/// Analyzes each draft and hands the result to `persist`. A failure on one draft, in the model
/// or in storage, is counted and reported; the remaining drafts are still processed.
async fn analyze_drafts<F, Fut>(
    drafts: Vec<DraftPost>,
    analyzer: &Analyzer,
    mut persist: F,
) -> BackfillSummary
where
    F: FnMut(Uuid, AnalysisResult) -> Fut,
    Fut: Future<Output = anyhow::Result<bool>>,
{
    let mut summary = BackfillSummary {
        candidates: drafts.len(),
        ..Default::default()
    };

    for draft in drafts {
        let result = match analyzer.analyze_text(&draft.content).await {
            Ok(result) => result,
            Err(err) => {
                summary.failed += 1;
                sentry::capture_error(&err);
                tracing::error!(post_id = %draft.id, error = %err, kind = err.code(), "draft analysis failed");
                continue;
            }
        };

        let sentiment = result.sentiment;
        match persist(draft.id, result).await {
            Ok(true) => {
                summary.analyzed += 1;
                tracing::info!(post_id = %draft.id, %sentiment, "draft analyzed");
            }
            Ok(false) => {
                summary.skipped += 1;
                tracing::warn!(post_id = %draft.id, "draft changed during backfill; result discarded");
            }
            Err(err) => {
                summary.failed += 1;
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(post_id = %draft.id, error = %err, "failed to store draft analysis");
            }
        }
    }

    summary
}
