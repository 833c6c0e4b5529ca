//! Receiver-side negotiation records.
//!
//! Each record lives at:
//!
//! ```text
//! <data_dir>/incoming_transfers/<s1>/<s2>/<id>/transfer.yaml
//! ```
//!
//! where `id` is derived from (customer id, task id), so re-delivered notifications for the same
//! Task always address the same file. Writes are last-writer-wins.

use crate::config::CoreConfig;
use crate::constants::INCOMING_TRANSFER_FILENAME;
use super::{parse_yaml, write_atomically};
use crate::error::RepositoryError;
use chrono::{DateTime, NaiveDate, Utc};
use eoverdracht_uuid::RecordId;
use fhir::NegotiationStatus;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A negotiation about a Task owned by another organisation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IncomingTransfer {
    pub id: RecordId,
    pub task_id: String,
    pub customer_id: String,
    /// DID of the organisation that owns the Task.
    pub sender_did: String,
    pub status: NegotiationStatus,
    /// Transfer date proposed by the sender, once it has announced one.
    pub transfer_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IncomingTransfer {
    /// The record id for a task negotiated on behalf of a customer.
    pub fn id_for(customer_id: &str, task_id: &str) -> RecordId {
        RecordId::derive(&[customer_id, task_id])
    }
}

pub trait IncomingTransferRepository: Send + Sync {
    fn find_by_task_id(
        &self,
        customer_id: &str,
        task_id: &str,
    ) -> Result<Option<IncomingTransfer>, RepositoryError>;

    /// Create the record, or overwrite the status of an existing one.
    ///
    /// A `transfer_date` of `None` keeps the date already recorded.
    fn create_or_update(
        &self,
        status: NegotiationStatus,
        customer_id: &str,
        sender_did: &str,
        task_id: &str,
        transfer_date: Option<NaiveDate>,
    ) -> Result<IncomingTransfer, RepositoryError>;

    fn find_by_id(
        &self,
        customer_id: &str,
        id: &RecordId,
    ) -> Result<Option<IncomingTransfer>, RepositoryError>;
}

/// On-disk shape of a record.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TransferFile {
    id: String,
    task_id: String,
    customer_id: String,
    sender_did: String,
    status: NegotiationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transfer_date: Option<NaiveDate>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TransferFile {
    fn parse(path: &Path, contents: &str) -> Result<IncomingTransfer, RepositoryError> {
        let invalid = |message: String| RepositoryError::InvalidRecord {
            path: path.to_path_buf(),
            message,
        };

        let file: TransferFile = parse_yaml(path, contents)?;

        let id = RecordId::parse(&file.id).map_err(|err| invalid(err.to_string()))?;
        Ok(IncomingTransfer {
            id,
            task_id: file.task_id,
            customer_id: file.customer_id,
            sender_did: file.sender_did,
            status: file.status,
            transfer_date: file.transfer_date,
            created_at: file.created_at,
            updated_at: file.updated_at,
        })
    }

    fn render(transfer: &IncomingTransfer) -> Result<String, RepositoryError> {
        let file = TransferFile {
            id: transfer.id.to_string(),
            task_id: transfer.task_id.clone(),
            customer_id: transfer.customer_id.clone(),
            sender_did: transfer.sender_did.clone(),
            status: transfer.status,
            transfer_date: transfer.transfer_date,
            created_at: transfer.created_at,
            updated_at: transfer.updated_at,
        };
        serde_yaml::to_string(&file).map_err(RepositoryError::YamlSerialization)
    }
}

/// [`IncomingTransferRepository`] over the local filesystem.
#[derive(Clone, Debug)]
pub struct FileIncomingTransferRepository {
    root: PathBuf,
}

impl FileIncomingTransferRepository {
    pub fn new(cfg: Arc<CoreConfig>) -> Self {
        Self::with_root(cfg.incoming_transfers_dir())
    }

    /// Store records directly under `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn record_path(&self, id: &RecordId) -> PathBuf {
        id.sharded_dir(&self.root).join(INCOMING_TRANSFER_FILENAME)
    }

    fn load(&self, id: &RecordId) -> Result<Option<IncomingTransfer>, RepositoryError> {
        let path = self.record_path(id);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(RepositoryError::Read { path, source }),
        };
        TransferFile::parse(&path, &contents).map(Some)
    }

    fn store(&self, transfer: &IncomingTransfer) -> Result<(), RepositoryError> {
        write_atomically(&self.record_path(&transfer.id), &TransferFile::render(transfer)?)
    }
}

impl IncomingTransferRepository for FileIncomingTransferRepository {
    fn find_by_task_id(
        &self,
        customer_id: &str,
        task_id: &str,
    ) -> Result<Option<IncomingTransfer>, RepositoryError> {
        self.load(&IncomingTransfer::id_for(customer_id, task_id))
    }

    fn create_or_update(
        &self,
        status: NegotiationStatus,
        customer_id: &str,
        sender_did: &str,
        task_id: &str,
        transfer_date: Option<NaiveDate>,
    ) -> Result<IncomingTransfer, RepositoryError> {
        let id = IncomingTransfer::id_for(customer_id, task_id);
        let now = Utc::now();
        let transfer = match self.load(&id)? {
            Some(existing) => IncomingTransfer {
                status,
                sender_did: sender_did.to_owned(),
                transfer_date: transfer_date.or(existing.transfer_date),
                updated_at: now,
                ..existing
            },
            None => IncomingTransfer {
                id,
                task_id: task_id.to_owned(),
                customer_id: customer_id.to_owned(),
                sender_did: sender_did.to_owned(),
                status,
                transfer_date,
                created_at: now,
                updated_at: now,
            },
        };

        self.store(&transfer)?;
        tracing::debug!(
            "stored incoming transfer {} for task {} ({})",
            transfer.id,
            task_id,
            status
        );
        Ok(transfer)
    }

    fn find_by_id(
        &self,
        customer_id: &str,
        id: &RecordId,
    ) -> Result<Option<IncomingTransfer>, RepositoryError> {
        // Records of other tenants are invisible.
        Ok(self
            .load(id)?
            .filter(|transfer| transfer.customer_id == customer_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn repository() -> (TempDir, FileIncomingTransferRepository) {
        let dir = TempDir::new().expect("tempdir");
        let repo = FileIncomingTransferRepository::with_root(dir.path());
        (dir, repo)
    }

    #[test]
    fn creates_then_updates_the_same_record() {
        let (_dir, repo) = repository();

        let created = repo
            .create_or_update(NegotiationStatus::Requested, "c1", "did:nuts:sender", "t1", None)
            .unwrap();
        let updated = repo
            .create_or_update(NegotiationStatus::Accepted, "c1", "did:nuts:sender", "t1", None)
            .unwrap();

        assert_eq!(created.id, updated.id);
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.status, NegotiationStatus::Accepted);

        let found = repo.find_by_task_id("c1", "t1").unwrap().expect("record");
        assert_eq!(found, updated);
        assert!(repo.find_by_task_id("c2", "t1").unwrap().is_none());
    }

    #[test]
    fn keeps_the_transfer_date_until_a_new_one_is_announced() {
        let (_dir, repo) = repository();
        let first = NaiveDate::from_ymd_opt(2026, 11, 2);
        let moved = NaiveDate::from_ymd_opt(2026, 11, 9);

        repo.create_or_update(NegotiationStatus::Requested, "c1", "did:nuts:sender", "t1", first)
            .unwrap();
        let kept = repo
            .create_or_update(NegotiationStatus::OnHold, "c1", "did:nuts:sender", "t1", None)
            .unwrap();
        assert_eq!(kept.transfer_date, first);

        repo.create_or_update(NegotiationStatus::Requested, "c1", "did:nuts:sender", "t1", moved)
            .unwrap();
        let found = repo.find_by_task_id("c1", "t1").unwrap().expect("record");
        assert_eq!(found.transfer_date, moved);
    }

    #[test]
    fn ids_are_deterministic_and_tenant_scoped() {
        let (dir, repo) = repository();
        let transfer = repo
            .create_or_update(NegotiationStatus::Requested, "c1", "did:nuts:sender", "t1", None)
            .unwrap();

        assert_eq!(transfer.id, IncomingTransfer::id_for("c1", "t1"));
        assert_ne!(transfer.id, IncomingTransfer::id_for("c2", "t1"));
        assert!(transfer
            .id
            .sharded_dir(dir.path())
            .join(INCOMING_TRANSFER_FILENAME)
            .is_file());

        assert!(repo.find_by_id("c1", &transfer.id).unwrap().is_some());
        assert!(repo.find_by_id("c2", &transfer.id).unwrap().is_none());
    }

    #[test]
    fn rejects_records_with_unknown_keys() {
        let (dir, repo) = repository();
        let transfer = repo
            .create_or_update(NegotiationStatus::Requested, "c1", "did:nuts:sender", "t1", None)
            .unwrap();
        let path = transfer.id.sharded_dir(dir.path()).join(INCOMING_TRANSFER_FILENAME);
        let mut contents = fs::read_to_string(&path).unwrap();
        contents.push_str("priority: high\n");
        fs::write(&path, contents).unwrap();

        match repo.find_by_task_id("c1", "t1") {
            Err(RepositoryError::InvalidRecord { message, .. }) => {
                assert!(message.contains("priority"), "{message}");
            }
            other => panic!("expected InvalidRecord, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_status_values() {
        let (dir, repo) = repository();
        let transfer = repo
            .create_or_update(NegotiationStatus::Requested, "c1", "did:nuts:sender", "t1", None)
            .unwrap();
        let path = transfer.id.sharded_dir(dir.path()).join(INCOMING_TRANSFER_FILENAME);
        let contents = fs::read_to_string(&path)
            .unwrap()
            .replace("status: requested", "status: draft");
        fs::write(&path, contents).unwrap();

        match repo.find_by_task_id("c1", "t1") {
            Err(RepositoryError::InvalidRecord { message, .. }) => {
                assert!(message.contains("status"), "{message}");
            }
            other => panic!("expected InvalidRecord, got {other:?}"),
        }
    }
}
