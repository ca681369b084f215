use std::sync::Arc;

use signoff_core::approvals::ports::AdapterRegistry;
use signoff_core::approvals::{ApprovalEngine, MatrixStore};
use signoff_core::audit::TracingAuditSink;
use signoff_core::config::AppConfig;
use signoff_db::{
    connect_with_settings, migrations, DbPool, SqlDocumentStatusAdapter, SqlMatrixRepository,
    SqlQueueRepository, SqlRoleDirectory,
};
use thiserror::Error;
use tracing::info;

use crate::api::ApiState;
use crate::notifications::TracingNotificationSink;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: ApiState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let state = wire(&config, db_pool.clone());
    Ok(Application { config, db_pool, state })
}

/// Build the engine and matrix store over the SQL ports.
pub fn wire(config: &AppConfig, db_pool: DbPool) -> ApiState {
    let policy = config.approvals.policy();
    let matrix_repository = Arc::new(SqlMatrixRepository::new(db_pool.clone()));
    let roles = Arc::new(SqlRoleDirectory::new(db_pool.clone()));
    let audit = Arc::new(TracingAuditSink);

    let adapters =
        AdapterRegistry::new().register_all(Arc::new(SqlDocumentStatusAdapter::new(db_pool.clone())));
    let engine = ApprovalEngine::new(
        matrix_repository.clone(),
        Arc::new(SqlQueueRepository::new(db_pool)),
        roles.clone(),
        Arc::new(TracingNotificationSink),
    )
    .with_adapters(adapters)
    .with_audit_sink(audit.clone())
    .with_policy(policy.clone());

    let matrix = MatrixStore::new(matrix_repository, roles)
        .with_audit_sink(audit)
        .with_max_approval_level(policy.max_approval_level);

    ApiState { engine: Arc::new(engine), matrix: Arc::new(matrix) }
}
