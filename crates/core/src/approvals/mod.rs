pub mod dashboard;
pub mod engine;
pub mod matrix;
pub mod memory;
pub mod ports;
pub mod resolver;

pub use dashboard::{DashboardStats, LevelStatus, Page, PendingQuery, StatusSummary};
pub use engine::{ActionOutcome, ApprovalEngine, ApprovalPolicy, SubmitOutcome};
pub use matrix::{MatrixStore, MAX_APPROVAL_LEVEL};
pub use ports::{
    AdapterError, AdapterRegistry, ApprovalNotification, ApprovalResolution, DocumentAdapter,
    MatrixRepository, NotificationError, NotificationSink, QueueRepository, RepositoryError,
    RoleDirectory,
};
pub use resolver::{resolve, Resolution, ResolutionWarning};
