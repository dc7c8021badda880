//! Dedup processor (C2): the per-event transactional protocol that turns
//! at-least-once delivery into exactly-once persistence.
//!
//! Runs the algorithm of spec.md §4.2 against whatever transaction the
//! caller opened (typically one per worker, one per event): attempt the
//! insert, let the unique index decide duplication, and keep the stats
//! singleton and the audit log consistent with whatever actually commits.
//! The processor does not itself decide to retry — that's the consumer's
//! call, and the consumer here makes none (§9, "No retry queue").

use event_schema::Event;
use serde_json::json;
use sqlx::postgres::Postgres;
use sqlx::Transaction;
use thiserror::Error;
use tracing::{info, warn};

use durable_store::{
    apply_stats_delta, begin, insert_audit_log, insert_processed_event, is_unique_violation,
    lock_stats, IsolationLevel,
};

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("timestamp parse error: {0}")]
    Timestamp(#[from] chrono::ParseError),
}

impl From<durable_store::StoreError> for DedupError {
    fn from(err: durable_store::StoreError) -> Self {
        match err {
            durable_store::StoreError::Sqlx(e) => DedupError::Database(e),
        }
    }
}

/// The classification a dedup attempt resolves to. Mirrors spec.md §4.2's
/// `outcome ∈ {processed, duplicate, error}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Processed,
    Duplicate,
    Error,
}

/// Run the dedup protocol for one event inside a transaction the caller
/// already opened with [`durable_store::begin`].
///
/// Returns `(ok, outcome)` per spec.md §4.2: `ok` is `true` for
/// `Processed`/`Duplicate` (the event was durably and correctly
/// classified) and `false` for `Error`.
///
/// On success the supplied transaction is consumed and committed inside
/// this call. On a unique-key violation the supplied transaction is rolled
/// back and a fresh transaction is opened (and committed) to record the
/// duplicate — the original transaction is poisoned by the constraint
/// violation and cannot be reused (§9). On any other failure the supplied
/// transaction is rolled back and a best-effort audit row is written in
/// its own transaction; a secondary failure there is swallowed.
pub async fn process(
    pool: &sqlx::PgPool,
    mut tx: Transaction<'static, Postgres>,
    event: &Event,
    isolation: IsolationLevel,
) -> (bool, Outcome) {
    let timestamp = match event.parsed_timestamp() {
        Ok(ts) => ts,
        Err(e) => {
            let _ = tx.rollback().await;
            record_error(pool, isolation, event, &e.to_string()).await;
            return (false, Outcome::Error);
        }
    };

    match insert_processed_event(
        &mut tx,
        &event.topic,
        &event.event_id,
        timestamp,
        &event.source,
        &event.payload,
    )
    .await
    {
        Ok(_row) => match finish_processed(&mut tx, event).await {
            Ok(()) => match tx.commit().await {
                Ok(()) => {
                    info!(event = %event, "event processed");
                    (true, Outcome::Processed)
                }
                Err(e) => {
                    record_error(pool, isolation, event, &e.to_string()).await;
                    (false, Outcome::Error)
                }
            },
            Err(e) => {
                let _ = tx.rollback().await;
                record_error(pool, isolation, event, &e.to_string()).await;
                (false, Outcome::Error)
            }
        },
        Err(e) if is_unique_violation(&e) => {
            let _ = tx.rollback().await;
            match record_duplicate(pool, isolation, event).await {
                Ok(()) => {
                    info!(event = %event, "duplicate detected (idempotent)");
                    (true, Outcome::Duplicate)
                }
                Err(e2) => {
                    warn!(event = %event, error = %e2, "failed to record duplicate outcome");
                    (false, Outcome::Error)
                }
            }
        }
        Err(e) => {
            let _ = tx.rollback().await;
            record_error(pool, isolation, event, &e.to_string()).await;
            (false, Outcome::Error)
        }
    }
}

/// Step 3: lock the stats singleton, bump `received`/`unique_processed`,
/// append the `processed` audit row. Committed by the caller.
async fn finish_processed(
    tx: &mut Transaction<'_, Postgres>,
    event: &Event,
) -> Result<(), sqlx::Error> {
    lock_stats(tx).await?;
    apply_stats_delta(tx, 1, 1, 0, 0).await?;
    insert_audit_log(
        tx,
        &event.topic,
        &event.event_id,
        "processed",
        Some(&json!({ "source": event.source })),
    )
    .await?;
    Ok(())
}

/// Step 4: in a fresh transaction, lock the stats singleton, bump
/// `received`/`duplicate_dropped`, append the `duplicate` audit row,
/// commit. The original transaction cannot be reused after the
/// constraint violation that led here.
async fn record_duplicate(
    pool: &sqlx::PgPool,
    isolation: IsolationLevel,
    event: &Event,
) -> Result<(), DedupError> {
    let mut tx = begin(pool, isolation).await?;
    lock_stats(&mut tx).await?;
    apply_stats_delta(&mut tx, 1, 0, 1, 0).await?;
    insert_audit_log(
        &mut tx,
        &event.topic,
        &event.event_id,
        "duplicate",
        Some(&json!({ "reason": "unique_constraint_violation" })),
    )
    .await?;
    tx.commit().await?;
    Ok(())
}

/// Step 5: best-effort — in a fresh transaction, bump `received`/`errored`
/// and append the `error` audit row with the failure cause. Any secondary
/// failure here is logged and swallowed; it must never mask the original
/// error outcome.
async fn record_error(pool: &sqlx::PgPool, isolation: IsolationLevel, event: &Event, cause: &str) {
    let attempt = async {
        let mut tx = begin(pool, isolation).await?;
        apply_stats_delta(&mut tx, 1, 0, 0, 1).await?;
        insert_audit_log(
            &mut tx,
            &event.topic,
            &event.event_id,
            "error",
            Some(&json!({ "error": cause })),
        )
        .await?;
        tx.commit().await?;
        Ok::<(), DedupError>(())
    };

    if let Err(e) = attempt.await {
        warn!(
            event = %event,
            cause = %cause,
            secondary_error = %e,
            "failed to write error audit row, swallowing"
        );
    }
}

/// Helper used by tests and by `ingest-consumer` to open a correctly
/// isolated transaction for one dedup attempt.
pub async fn begin_for_event(
    pool: &sqlx::PgPool,
    isolation: IsolationLevel,
) -> Result<Transaction<'static, Postgres>, DedupError> {
    Ok(begin(pool, isolation).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_equality() {
        assert_eq!(Outcome::Processed, Outcome::Processed);
        assert_ne!(Outcome::Processed, Outcome::Duplicate);
    }
}
