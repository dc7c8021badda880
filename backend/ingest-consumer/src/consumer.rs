use std::sync::Arc;

use futures::StreamExt;
use sqlx::PgPool;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use dedup_processor::begin_for_event;
use durable_store::IsolationLevel;
use event_bus::Subscriber;
use event_schema::ValidationError;

/// The consumer lifecycle, `Init -> Subscribed -> Running -> Draining ->
/// Stopped`. Transitions happen only on the task running [`Consumer::run`];
/// each one is logged at the point it happens rather than tracked in a
/// separately-queryable handle, since nothing outside this binary observes
/// consumer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    Subscribed,
    Running,
    Draining,
    Stopped,
}

/// Subscribes to the bus, fans each message out to a bounded pool of
/// `num_workers` concurrent dedup attempts, and drains in-flight work
/// before returning once a shutdown signal fires.
pub struct Consumer {
    pool: PgPool,
    isolation: IsolationLevel,
    num_workers: usize,
}

impl Consumer {
    pub fn new(pool: PgPool, isolation: IsolationLevel, num_workers: usize) -> Self {
        Self {
            pool,
            isolation,
            num_workers,
        }
    }

    /// Runs until `shutdown` resolves, then drains every in-flight worker
    /// before returning. Dispatch stops accepting new messages the moment
    /// `Draining` is entered; messages already off the bus but not yet
    /// dispatched are dropped (ShutdownInProgress, spec.md §7.5).
    pub async fn run(
        &self,
        redis_url: &str,
        channel: &str,
        shutdown: impl std::future::Future<Output = ()>,
    ) -> anyhow::Result<()> {
        let mut state = State::Init;

        let subscriber = Subscriber::subscribe(redis_url, channel).await?;
        state = State::Subscribed;
        debug!(?state, "bus subscription established");

        let semaphore = Arc::new(Semaphore::new(self.num_workers));
        let mut workers: JoinSet<()> = JoinSet::new();
        let mut messages = Box::pin(subscriber.into_message_stream());

        state = State::Running;
        info!(?state, workers = self.num_workers, "consumer running");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    state = State::Draining;
                    info!(?state, "shutdown signal received, draining in-flight workers");
                    break;
                }
                // Reap finished workers as they complete, not only while
                // draining — otherwise a long-running consumer accumulates
                // completed JoinHandles for the life of the process.
                _ = workers.join_next(), if !workers.is_empty() => {}
                maybe_msg = messages.next() => {
                    match maybe_msg {
                        Some(raw) => {
                            // Acquire the permit here, in the receive loop,
                            // so dispatch itself blocks once W workers are
                            // in flight — this is the backpressure point
                            // spec.md §4.4/§5 requires, not just a cap on
                            // concurrency inside the spawned task.
                            match semaphore.clone().acquire_owned().await {
                                Ok(permit) => self.dispatch(raw, permit, &mut workers),
                                Err(_) => {}
                            }
                        }
                        None => {
                            state = State::Draining;
                            warn!(?state, "bus connection closed, draining and stopping");
                            break;
                        }
                    }
                }
            }
        }

        while workers.join_next().await.is_some() {}
        state = State::Stopped;
        info!(?state, "consumer stopped");
        Ok(())
    }

    fn dispatch(
        &self,
        raw: String,
        permit: tokio::sync::OwnedSemaphorePermit,
        workers: &mut JoinSet<()>,
    ) {
        let pool = self.pool.clone();
        let isolation = self.isolation;

        workers.spawn(async move {
            let _permit = permit;
            process_message(&pool, isolation, &raw).await;
        });
    }
}

/// Validate, then run the dedup protocol. A validation failure is dropped
/// here: logged, no audit row, no counter mutation (I5).
async fn process_message(pool: &PgPool, isolation: IsolationLevel, raw: &str) {
    let event = match event_schema::parse(raw.as_bytes()) {
        Ok(event) => event,
        Err(ValidationError::MalformedJson(e)) => {
            error!(error = %e, "invalid JSON on bus, dropping");
            return;
        }
        Err(e) => {
            error!(error = %e, "invalid event schema, dropping");
            return;
        }
    };

    let tx = match begin_for_event(pool, isolation).await {
        Ok(tx) => tx,
        Err(e) => {
            error!(error = %e, "failed to open transaction for event, dropping");
            return;
        }
    };

    let (ok, outcome) = dedup_processor::process(pool, tx, &event, isolation).await;
    if !ok {
        warn!(event = %event, ?outcome, "event ended in error outcome");
    } else {
        debug!(event = %event, ?outcome, "event handled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_variants_are_distinct() {
        assert_ne!(State::Init, State::Running);
        assert_eq!(State::Draining, State::Draining);
    }
}
