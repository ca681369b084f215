pub mod approvals;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;

pub use approvals::{
    ActionOutcome, AdapterRegistry, ApprovalEngine, ApprovalPolicy, DocumentAdapter, MatrixStore,
    NotificationSink, SubmitOutcome,
};
pub use domain::document::{DocumentId, DocumentSubmission, DocumentType};
pub use domain::matrix::{ApprovalMatrixRule, RuleId};
pub use domain::queue::{ApprovalAction, ApprovalQueueEntry, ApprovalRequest, DocumentStatus, EntryId};
pub use domain::tenant::{Actor, CompanyId, RoleId, UserId};
pub use errors::{ApprovalError, InterfaceError};
