//! Status notifications to receiving organisations.
//!
//! A notification tells a receiver that a Task on our document server changed; the receiver
//! then reads the Task through its own capability. Delivery is best effort: a failed
//! notification is logged and never undoes the change it announces.

use crate::constants::{NOTIFICATION_ENDPOINT_TYPE, RECEIVER_SERVICE_NAME, SENDER_HEADER};
use crate::error::{RemoteError, TransferError, TransferResult};
use crate::ports::OrganizationRegistry;
use chrono::NaiveDate;
use fhir::NegotiationStatus;
use reqwest::blocking::Client;
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferNotification {
    pub sender_did: String,
    /// Owner of the Task, i.e. the receiving organisation.
    pub receiver_did: String,
    pub task_id: String,
    pub status: NegotiationStatus,
    pub transfer_date: Option<NaiveDate>,
}

/// Body of `POST {notification endpoint}`.
#[derive(Debug, Serialize)]
struct NotifyBody<'a> {
    task_owner_did: &'a str,
    task_id: &'a str,
    status: NegotiationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    transfer_date: Option<NaiveDate>,
}

impl TransferNotification {
    fn body(&self) -> NotifyBody<'_> {
        NotifyBody {
            task_owner_did: &self.receiver_did,
            task_id: &self.task_id,
            status: self.status,
            transfer_date: self.transfer_date,
        }
    }
}

pub trait TransferNotifier: Send + Sync {
    fn notify(&self, notification: &TransferNotification) -> TransferResult<()>;
}

/// Posts notifications to the endpoint the receiver registered for its eOverdracht service.
pub struct HttpTransferNotifier {
    http: Client,
    organizations: Arc<dyn OrganizationRegistry>,
}

impl HttpTransferNotifier {
    pub fn new(http: Client, organizations: Arc<dyn OrganizationRegistry>) -> Self {
        Self {
            http,
            organizations,
        }
    }
}

impl TransferNotifier for HttpTransferNotifier {
    fn notify(&self, notification: &TransferNotification) -> TransferResult<()> {
        let receiver = &notification.receiver_did;
        let endpoint = self
            .organizations
            .compound_service_endpoint(receiver, RECEIVER_SERVICE_NAME, NOTIFICATION_ENDPOINT_TYPE)
            .map_err(|err| {
                TransferError::node(format!("resolving notification endpoint of {receiver}"), err)
            })?;

        let context = || format!("notifying {receiver} of task {}", notification.task_id);
        let response = self
            .http
            .post(&endpoint)
            .header(SENDER_HEADER, &notification.sender_did)
            .json(&notification.body())
            .send()
            .map_err(|err| TransferError::remote(context(), RemoteError::Transport(err)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(TransferError::remote(
                context(),
                RemoteError::Status {
                    path: endpoint,
                    status: status.as_u16(),
                    body,
                },
            ));
        }
        Ok(())
    }
}

/// Deliver `notification`, logging a failure instead of returning it.
pub(crate) fn notify_best_effort(notifier: &dyn TransferNotifier, notification: &TransferNotification) {
    match notifier.notify(notification) {
        Ok(()) => tracing::info!(
            "notified {} that task {} is {}",
            notification.receiver_did,
            notification.task_id,
            notification.status
        ),
        Err(err) => tracing::warn!(
            "could not notify {} about task {}: {}",
            notification.receiver_did,
            notification.task_id,
            err
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeNode;
    use serde_json::json;

    fn notification() -> TransferNotification {
        TransferNotification {
            sender_did: "did:nuts:sender".into(),
            receiver_did: "did:nuts:receiver".into(),
            task_id: "t1".into(),
            status: NegotiationStatus::OnHold,
            transfer_date: NaiveDate::from_ymd_opt(2026, 12, 1),
        }
    }

    #[test]
    fn body_addresses_the_task_owner() {
        let body = serde_json::to_value(notification().body()).unwrap();
        assert_eq!(
            body,
            json!({
                "task_owner_did": "did:nuts:receiver",
                "task_id": "t1",
                "status": "on-hold",
                "transfer_date": "2026-12-01"
            })
        );

        let undated = TransferNotification {
            transfer_date: None,
            ..notification()
        };
        let body = serde_json::to_value(undated.body()).unwrap();
        assert!(body.get("transfer_date").is_none());
    }

    #[test]
    fn unregistered_receivers_cannot_be_notified() {
        let notifier = HttpTransferNotifier::new(Client::new(), Arc::new(FakeNode::default()));
        assert!(matches!(
            notifier.notify(&notification()),
            Err(TransferError::Node { .. })
        ));
    }
}
