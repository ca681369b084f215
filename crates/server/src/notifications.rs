use async_trait::async_trait;
use signoff_core::approvals::ports::{ApprovalNotification, NotificationError, NotificationSink};
use tracing::info;

/// Emits approval notifications as structured log events. Delivery to mail
/// or chat is left to whatever tails the `notifications` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn notify(&self, notification: ApprovalNotification) -> Result<(), NotificationError> {
        let payload = serde_json::to_string(&notification)
            .map_err(|error| NotificationError(format!("serialize notification: {error}")))?;

        match &notification {
            ApprovalNotification::ActionRequired {
                company_id,
                document_id,
                entry_id,
                approval_level,
                recipients,
                ..
            } => info!(
                target: "notifications",
                event_name = "approvals.notification.action_required",
                company_id = %company_id.0,
                document_id = %document_id.0,
                entry_id = %entry_id.0,
                approval_level = *approval_level,
                recipient_count = recipients.len(),
                payload = %payload,
                "approval action required"
            ),
            ApprovalNotification::Resolved { company_id, document_id, final_status, .. } => info!(
                target: "notifications",
                event_name = "approvals.notification.resolved",
                company_id = %company_id.0,
                document_id = %document_id.0,
                final_status = final_status.as_str(),
                payload = %payload,
                "approval resolved"
            ),
        }
        Ok(())
    }
}
