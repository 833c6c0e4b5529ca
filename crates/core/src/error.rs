use crate::authorization::AccessDenied;
use crate::repositories::TransferStatus;
use crate::transition::InvalidTransition;
use fhir::{FhirError, NegotiationStatus};
use std::path::PathBuf;

/// Errors raised by transfer negotiation operations.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    /// A required section, reference or resource was missing or of the wrong type.
    #[error("malformed document at {path}: {source}")]
    MalformedDocument {
        path: String,
        #[source]
        source: FhirError,
    },

    #[error("{context}: {source}")]
    Remote {
        context: String,
        #[source]
        source: RemoteError,
    },

    #[error("access denied: {0}")]
    AccessDenied(#[from] AccessDenied),

    /// The remote Task was updated but the local record could not be brought in line.
    ///
    /// Replaying must only repeat the local write.
    #[error(
        "task {task_id} is '{remote_status}' remotely but the local record was not updated: {source}"
    )]
    ReconciliationGap {
        task_id: String,
        remote_status: NegotiationStatus,
        #[source]
        source: Box<TransferError>,
    },

    /// The status change was persisted but the handoff could not be materialised locally.
    #[error("completing transfer of task {task_id} failed: {source}")]
    Completion {
        task_id: String,
        #[source]
        source: Box<TransferError>,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("{context}: {source}")]
    Node {
        context: String,
        #[source]
        source: NodeError,
    },

    #[error("unknown customer '{0}'")]
    UnknownCustomer(String),

    #[error("customer '{0}' has no DID")]
    CustomerWithoutDid(String),

    #[error("unknown transfer '{0}'")]
    UnknownTransfer(String),

    #[error("unknown negotiation '{0}'")]
    UnknownNegotiation(String),

    /// The transfer no longer accepts this change.
    #[error("transfer {transfer_id} is {status}")]
    TransferClosed {
        transfer_id: String,
        status: TransferStatus,
    },

    /// The receiving organisation has not accepted the proposal.
    #[error("task {task_id} is '{status}', not accepted")]
    ProposalNotAccepted {
        task_id: String,
        status: NegotiationStatus,
    },

    #[error("task {task_id} was not requested by {did}")]
    NotRequester { task_id: String, did: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl TransferError {
    pub(crate) fn malformed(path: impl Into<String>, source: FhirError) -> Self {
        TransferError::MalformedDocument {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn remote(context: impl Into<String>, source: RemoteError) -> Self {
        TransferError::Remote {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn node(context: impl Into<String>, source: NodeError) -> Self {
        TransferError::Node {
            context: context.into(),
            source,
        }
    }
}

pub type TransferResult<T> = std::result::Result<T, TransferError>;

/// Errors raised by a remote or local document server.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("{path} returned HTTP {status}: {body}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },

    #[error("invalid response body from {path}: {message}")]
    InvalidBody { path: String, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Errors raised by the identity node collaborators.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors raised by repository implementations.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("failed to read {path}: {source}", path = path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}", path = path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize YAML: {0}")]
    YamlSerialization(serde_yaml::Error),

    #[error("invalid record {path}: {message}", path = path.display())]
    InvalidRecord { path: PathBuf, message: String },

    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
