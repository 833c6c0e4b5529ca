//! Persistence ports and their file-backed implementations.
//!
//! - [`IncomingTransferRepository`]: receiver-side negotiation records, one YAML file per
//!   (customer, task) in a sharded directory tree.
//! - [`OutgoingTransferRepository`]: sender-side transfers with their negotiations, one YAML
//!   file per transfer.
//! - [`CustomerRepository`]: the local tenants, read from a JSON directory file.

pub mod customers;
pub mod incoming_transfers;
pub mod outgoing_transfers;

pub use customers::{CustomerRepository, JsonFileCustomerRepository};
pub use incoming_transfers::{
    FileIncomingTransferRepository, IncomingTransfer, IncomingTransferRepository,
};
pub use outgoing_transfers::{
    FileOutgoingTransferRepository, OutgoingNegotiation, OutgoingTransfer,
    OutgoingTransferRepository, TransferStatus,
};

use crate::error::RepositoryError;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

/// Decode a YAML record, naming the offending key on schema errors.
pub(crate) fn parse_yaml<T: DeserializeOwned>(
    path: &Path,
    contents: &str,
) -> Result<T, RepositoryError> {
    let de = serde_yaml::Deserializer::from_str(contents);
    serde_path_to_error::deserialize(de).map_err(|err| {
        let location = err.path().to_string();
        let location = if location.is_empty() || location == "." {
            "<root>".to_owned()
        } else {
            location
        };
        RepositoryError::InvalidRecord {
            path: path.to_path_buf(),
            message: format!("schema mismatch at {location}: {}", err.into_inner()),
        }
    })
}

/// Write `contents` to a staging file next to `path`, then move it into place.
pub(crate) fn write_atomically(path: &Path, contents: &str) -> Result<(), RepositoryError> {
    let write_err = |source: std::io::Error| RepositoryError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(write_err)?;
    }
    let staging = path.with_extension("yaml.tmp");
    fs::write(&staging, contents).map_err(write_err)?;
    fs::rename(&staging, path).map_err(write_err)
}
