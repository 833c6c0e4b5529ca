//! The local customer directory.

use crate::error::RepositoryError;
use crate::ports::Customer;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

pub trait CustomerRepository: Send + Sync {
    fn find_by_id(&self, id: &str) -> Result<Option<Customer>, RepositoryError>;

    fn find_by_did(&self, did: &str) -> Result<Option<Customer>, RepositoryError>;

    fn all(&self) -> Result<Vec<Customer>, RepositoryError>;
}

/// Customers loaded once from a JSON array.
#[derive(Clone, Debug, Default)]
pub struct JsonFileCustomerRepository {
    customers: Vec<Customer>,
}

impl JsonFileCustomerRepository {
    /// Load the directory at `path`. A missing file yields an empty directory.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Read`] if the file cannot be read, and
    /// [`RepositoryError::InvalidRecord`] if it is not a JSON array of customers or lists the
    /// same id twice.
    pub fn open(path: &Path) -> Result<Self, RepositoryError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::warn!("customer file {} not found, starting without customers", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(RepositoryError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let mut de = serde_json::Deserializer::from_str(&contents);
        let customers: Vec<Customer> =
            serde_path_to_error::deserialize(&mut de).map_err(|err| {
                RepositoryError::InvalidRecord {
                    path: path.to_path_buf(),
                    message: format!("schema mismatch at {}: {}", err.path(), err.inner()),
                }
            })?;

        let repo = Self::from_customers(customers).map_err(|id| RepositoryError::InvalidRecord {
            path: path.to_path_buf(),
            message: format!("duplicate customer id '{id}'"),
        })?;
        tracing::info!("loaded {} customers from {}", repo.customers.len(), path.display());
        Ok(repo)
    }

    /// Build a directory from customers in memory, failing with the first duplicated id.
    pub fn from_customers(customers: Vec<Customer>) -> Result<Self, String> {
        for (index, customer) in customers.iter().enumerate() {
            if customers[..index].iter().any(|other| other.id == customer.id) {
                return Err(customer.id.clone());
            }
        }
        Ok(Self { customers })
    }
}

impl CustomerRepository for JsonFileCustomerRepository {
    fn find_by_id(&self, id: &str) -> Result<Option<Customer>, RepositoryError> {
        Ok(self.customers.iter().find(|c| c.id == id).cloned())
    }

    fn find_by_did(&self, did: &str) -> Result<Option<Customer>, RepositoryError> {
        Ok(self
            .customers
            .iter()
            .find(|c| c.did.as_deref() == Some(did))
            .cloned())
    }

    fn all(&self) -> Result<Vec<Customer>, RepositoryError> {
        Ok(self.customers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn loads_and_finds_customers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("customers.json");
        fs::write(
            &path,
            r#"[
                {"id": "1", "name": "Verpleeghuis De Nootjes", "did": "did:nuts:nootjes", "city": "Enschede", "active": true},
                {"id": "2", "name": "Thuiszorg Zonnebloem"}
            ]"#,
        )
        .unwrap();

        let repo = JsonFileCustomerRepository::open(&path).unwrap();
        assert_eq!(repo.all().unwrap().len(), 2);
        assert_eq!(
            repo.find_by_did("did:nuts:nootjes").unwrap().map(|c| c.id),
            Some("1".to_owned())
        );
        let without_did = repo.find_by_id("2").unwrap().unwrap();
        assert!(without_did.did.is_none());
        assert!(!without_did.active);
        assert!(repo.find_by_id("3").unwrap().is_none());
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let repo = JsonFileCustomerRepository::open(&dir.path().join("absent.json")).unwrap();
        assert!(repo.all().unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_and_duplicate_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("customers.json");

        fs::write(&path, r#"[{"id": "1"}]"#).unwrap();
        match JsonFileCustomerRepository::open(&path) {
            Err(RepositoryError::InvalidRecord { message, .. }) => {
                assert!(message.contains("name"), "{message}");
            }
            other => panic!("expected InvalidRecord, got {other:?}"),
        }

        fs::write(&path, r#"[{"id": "1", "name": "a"}, {"id": "1", "name": "b"}]"#).unwrap();
        assert!(matches!(
            JsonFileCustomerRepository::open(&path),
            Err(RepositoryError::InvalidRecord { .. })
        ));
    }
}
