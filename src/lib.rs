//! Trip and order lifecycle engine with effective-timeline reporting.
//!
//! The crate is invoked as library functions by a surrounding transport
//! layer; it owns the status-event ledger, the lifecycle orchestrator
//! with its transactional cascades, the timeline reconstruction used for
//! billing, and the payable report aggregation. Authentication, HTTP,
//! and file handling live outside -- callers supply an actor id and an
//! organization id with every call.

use std::sync::Arc;

use crate::notification::Notifier;
use crate::warehouse::WarehouseClient;

pub mod advance;
pub mod catalog;
pub mod env;
pub mod error;
pub mod ids;
pub mod notification;
pub mod order;
pub mod order_group;
pub mod orchestrator;
pub mod organization;
pub mod party;
pub mod reporter;
pub mod status;
pub mod status_event;
pub mod timeline;
pub mod trip;
pub mod warehouse;

#[cfg(test)]
pub mod test_utils;

pub use error::{ReportError, TransitionError, ValidationError};
pub use orchestrator::Orchestrator;
pub use reporter::{PayableRole, PayableRow, ReportPeriod, payable_report};
pub use timeline::{DatePolicy, EffectiveWindow, effective_window};

/// Connect the database, apply migrations, and wire the orchestrator
/// with the supplied collaborators.
pub async fn connect(
    env: &env::Env,
    notifier: Arc<dyn Notifier>,
    warehouse: Arc<dyn WarehouseClient>,
) -> anyhow::Result<Orchestrator> {
    let pool = env.get_sqlite_pool().await?;
    sqlx::migrate!().run(&pool).await?;

    Ok(Orchestrator::new(pool, notifier, warehouse)
        .with_limits(env.code_generation_attempts, env.outbox_batch_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{RecordingNotifier, StubWarehouse};
    use clap::Parser;

    #[tokio::test]
    async fn connect_applies_migrations_and_wires_the_orchestrator() {
        let env = env::Env::try_parse_from(["test", "--db", ":memory:"]).unwrap();
        let orchestrator = connect(
            &env,
            Arc::new(RecordingNotifier::default()),
            StubWarehouse::accepting(),
        )
        .await
        .unwrap();

        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'status_events'",
        )
        .fetch_one(orchestrator.pool())
        .await
        .unwrap();
        assert_eq!(tables, 1);
    }
}
