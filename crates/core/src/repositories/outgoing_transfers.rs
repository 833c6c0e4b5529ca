//! Sender-side transfers and their negotiations.
//!
//! A transfer is the sending organisation's intent to move a patient. It is offered to one or
//! more receiving organisations, each offer tracked as a negotiation with its own Task. The
//! transfer and all of its negotiations live in one file:
//!
//! ```text
//! <data_dir>/outgoing_transfers/<s1>/<s2>/<id>/outgoing.yaml
//! ```

use super::{parse_yaml, write_atomically};
use crate::config::CoreConfig;
use crate::constants::OUTGOING_TRANSFER_FILENAME;
use crate::error::RepositoryError;
use chrono::{DateTime, NaiveDate, Utc};
use eoverdracht_uuid::RecordId;
use fhir::{CarePlan, NegotiationStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

/// Lifecycle of a transfer as a whole.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// No organisation has been asked yet.
    Created,
    /// At least one negotiation was started.
    Requested,
    /// One accepting organisation was given the transfer.
    Assigned,
    Completed,
    Cancelled,
}

impl TransferStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Created => "created",
            TransferStatus::Requested => "requested",
            TransferStatus::Assigned => "assigned",
            TransferStatus::Completed => "completed",
            TransferStatus::Cancelled => "cancelled",
        }
    }

    /// Whether new negotiations can still be started.
    pub fn is_open(self) -> bool {
        matches!(self, TransferStatus::Created | TransferStatus::Requested)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One offer of a transfer to a receiving organisation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutgoingNegotiation {
    pub id: RecordId,
    /// Task on the local document server tracking this negotiation.
    pub task_id: String,
    pub organization_did: String,
    pub transfer_date: NaiveDate,
    pub status: NegotiationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutgoingTransfer {
    pub id: RecordId,
    pub customer_id: String,
    pub transfer_date: NaiveDate,
    #[serde(default)]
    pub care_plan: CarePlan,
    /// The only patient detail shared before assignment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    pub status: TransferStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_negotiation: Option<RecordId>,
    #[serde(default)]
    pub negotiations: Vec<OutgoingNegotiation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutgoingTransfer {
    pub fn negotiation(&self, id: &RecordId) -> Option<&OutgoingNegotiation> {
        self.negotiations.iter().find(|negotiation| negotiation.id == *id)
    }

    pub fn negotiation_mut(&mut self, id: &RecordId) -> Option<&mut OutgoingNegotiation> {
        self.negotiations
            .iter_mut()
            .find(|negotiation| negotiation.id == *id)
    }
}

pub trait OutgoingTransferRepository: Send + Sync {
    fn create(
        &self,
        customer_id: &str,
        transfer_date: NaiveDate,
        care_plan: CarePlan,
        postal_code: Option<String>,
    ) -> Result<OutgoingTransfer, RepositoryError>;

    fn find_by_id(
        &self,
        customer_id: &str,
        id: &RecordId,
    ) -> Result<Option<OutgoingTransfer>, RepositoryError>;

    /// Replace the stored transfer with `transfer`. Last writer wins.
    fn save(&self, transfer: &OutgoingTransfer) -> Result<(), RepositoryError>;
}

/// [`OutgoingTransferRepository`] over the local filesystem.
#[derive(Clone, Debug)]
pub struct FileOutgoingTransferRepository {
    root: PathBuf,
}

impl FileOutgoingTransferRepository {
    pub fn new(cfg: Arc<CoreConfig>) -> Self {
        Self::with_root(cfg.outgoing_transfers_dir())
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn record_path(&self, id: &RecordId) -> PathBuf {
        id.sharded_dir(&self.root).join(OUTGOING_TRANSFER_FILENAME)
    }
}

impl OutgoingTransferRepository for FileOutgoingTransferRepository {
    fn create(
        &self,
        customer_id: &str,
        transfer_date: NaiveDate,
        care_plan: CarePlan,
        postal_code: Option<String>,
    ) -> Result<OutgoingTransfer, RepositoryError> {
        let now = Utc::now();
        let transfer = OutgoingTransfer {
            id: RecordId::new(),
            customer_id: customer_id.to_owned(),
            transfer_date,
            care_plan,
            postal_code,
            status: TransferStatus::Created,
            assigned_negotiation: None,
            negotiations: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.save(&transfer)?;
        tracing::debug!("created outgoing transfer {} for {}", transfer.id, customer_id);
        Ok(transfer)
    }

    fn find_by_id(
        &self,
        customer_id: &str,
        id: &RecordId,
    ) -> Result<Option<OutgoingTransfer>, RepositoryError> {
        let path = self.record_path(id);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(RepositoryError::Read { path, source }),
        };
        let transfer: OutgoingTransfer = parse_yaml(&path, &contents)?;
        if transfer.id != *id {
            return Err(RepositoryError::InvalidRecord {
                path,
                message: format!("record holds transfer {}", transfer.id),
            });
        }
        Ok(Some(transfer).filter(|transfer| transfer.customer_id == customer_id))
    }

    fn save(&self, transfer: &OutgoingTransfer) -> Result<(), RepositoryError> {
        let rendered =
            serde_yaml::to_string(transfer).map_err(RepositoryError::YamlSerialization)?;
        write_atomically(&self.record_path(&transfer.id), &rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 12, 1).unwrap()
    }

    #[test]
    fn stores_transfers_with_their_negotiations() {
        let dir = TempDir::new().expect("tempdir");
        let repo = FileOutgoingTransferRepository::with_root(dir.path());

        let mut transfer = repo
            .create("c1", date(), CarePlan::default(), Some("7511 JE".into()))
            .unwrap();
        assert_eq!(transfer.status, TransferStatus::Created);

        let negotiation = OutgoingNegotiation {
            id: RecordId::new(),
            task_id: "t1".into(),
            organization_did: "did:nuts:receiver".into(),
            transfer_date: date(),
            status: NegotiationStatus::Requested,
            created_at: transfer.created_at,
            updated_at: transfer.created_at,
        };
        transfer.negotiations.push(negotiation.clone());
        transfer.status = TransferStatus::Requested;
        repo.save(&transfer).unwrap();

        let found = repo.find_by_id("c1", &transfer.id).unwrap().expect("transfer");
        assert_eq!(found, transfer);
        assert_eq!(found.negotiation(&negotiation.id), Some(&negotiation));
        assert!(repo.find_by_id("c2", &transfer.id).unwrap().is_none());
        assert!(repo.find_by_id("c1", &RecordId::new()).unwrap().is_none());
    }

    #[test]
    fn rejects_records_with_unknown_keys() {
        let dir = TempDir::new().expect("tempdir");
        let repo = FileOutgoingTransferRepository::with_root(dir.path());
        let transfer = repo.create("c1", date(), CarePlan::default(), None).unwrap();

        let path = transfer.id.sharded_dir(dir.path()).join(OUTGOING_TRANSFER_FILENAME);
        let mut contents = fs::read_to_string(&path).unwrap();
        contents.push_str("dossier: d-1\n");
        fs::write(&path, contents).unwrap();

        match repo.find_by_id("c1", &transfer.id) {
            Err(RepositoryError::InvalidRecord { message, .. }) => {
                assert!(message.contains("dossier"), "{message}");
            }
            other => panic!("expected InvalidRecord, got {other:?}"),
        }
    }

    #[test]
    fn only_created_and_requested_transfers_are_open() {
        assert!(TransferStatus::Created.is_open());
        assert!(TransferStatus::Requested.is_open());
        assert!(!TransferStatus::Assigned.is_open());
        assert!(!TransferStatus::Cancelled.is_open());
        assert_eq!(TransferStatus::Completed.to_string(), "completed");
    }
}
