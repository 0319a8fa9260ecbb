use anyhow::Context;
use sqlx::PgConnection;

// Advisory locks are scoped to the Postgres session, so acquire and release must run on the same
// connection. Guards against two backfill runs analyzing the same drafts concurrently.
const BACKFILL_LOCK_KEY: i64 = 0x4B4F_4C53_434F; // "KOLSCO"

pub async fn try_acquire_backfill_lock(conn: &mut PgConnection) -> anyhow::Result<bool> {
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(BACKFILL_LOCK_KEY)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("failed to acquire advisory lock (key={BACKFILL_LOCK_KEY})"))?;
    Ok(acquired.0)
}

pub async fn release_backfill_lock(conn: &mut PgConnection) -> anyhow::Result<()> {
    let released: (bool,) = sqlx::query_as("SELECT pg_advisory_unlock($1)")
        .persistent(false)
        .bind(BACKFILL_LOCK_KEY)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("failed to release advisory lock (key={BACKFILL_LOCK_KEY})"))?;
    ensure_released(released.0)
}

fn ensure_released(released: bool) -> anyhow::Result<()> {
    anyhow::ensure!(
        released,
        "advisory lock (key={BACKFILL_LOCK_KEY}) was not held by this session"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlock_that_releases_nothing_is_an_error() {
        assert!(ensure_released(true).is_ok());

        let err = ensure_released(false).unwrap_err();
        assert!(err.to_string().contains("not held"));
    }
}
