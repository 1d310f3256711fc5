//! Periodic retention sweeps.
//!
//! Both sweeps delete strictly by age, so they can run while the pipeline
//! reads the same tables.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::DatabaseError;
use crate::store::Database;

/// How often each sweep runs. The first pass happens immediately.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

/// Delete chat log messages older than `days`.
pub async fn purge_history(db: &dyn Database, days: i64) -> Result<u64, DatabaseError> {
    let cutoff = Utc::now() - chrono::Duration::days(days);
    let removed = db.purge_messages_before(cutoff).await?;
    info!(removed, days, "History purge complete");
    Ok(removed)
}

/// Delete conversation turns older than `days`.
pub async fn sweep_context(db: &dyn Database, days: i64) -> Result<u64, DatabaseError> {
    let cutoff = Utc::now() - chrono::Duration::days(days);
    let removed = db.purge_context_before(cutoff).await?;
    info!(removed, days, "Context sweep complete");
    Ok(removed)
}

pub fn spawn_history_purge(
    db: Arc<dyn Database>,
    days: i64,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            if let Err(e) = purge_history(db.as_ref(), days).await {
                warn!(error = %e, "History purge failed");
            }
        }
    })
}

pub fn spawn_context_sweep(
    db: Arc<dyn Database>,
    days: i64,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            if let Err(e) = sweep_context(db.as_ref(), days).await {
                warn!(error = %e, "Context sweep failed");
            }
        }
    })
}
