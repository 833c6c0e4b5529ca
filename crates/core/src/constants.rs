//! Constants used throughout the eOverdracht core crate.
//!
//! Service names and endpoint types are part of the network agreement between organisations
//! and must match exactly.

/// Service under which a sending organisation exposes its transfer documents.
pub const SENDER_SERVICE_NAME: &str = "eOverdracht-sender";

/// Service under which a receiving organisation accepts transfer notifications.
pub const RECEIVER_SERVICE_NAME: &str = "eOverdracht-receiver";

/// Endpoint type of the document server within a compound service.
pub const FHIR_ENDPOINT_TYPE: &str = "fhir";

/// Endpoint type of the notification receiver within a compound service.
pub const NOTIFICATION_ENDPOINT_TYPE: &str = "notification";

/// Header naming the organisation that sends a notification.
pub const SENDER_HEADER: &str = "X-Sender";

/// Credential type granting access to specific resources.
pub const AUTHORIZATION_CREDENTIAL_TYPE: &str = "NutsAuthorizationCredential";

/// Credential type carrying an organisation's name and city.
pub const ORGANIZATION_CREDENTIAL_TYPE: &str = "NutsOrganizationCredential";

/// Default directory for negotiation data when no explicit directory is configured.
pub const DEFAULT_DATA_DIR: &str = "eoverdracht_data";

/// Directory name for receiver-side negotiation records.
pub const INCOMING_TRANSFERS_DIR_NAME: &str = "incoming_transfers";

/// Filename of a negotiation record inside its sharded directory.
pub const INCOMING_TRANSFER_FILENAME: &str = "transfer.yaml";

/// Directory name for sender-side transfers and their negotiations.
pub const OUTGOING_TRANSFERS_DIR_NAME: &str = "outgoing_transfers";

/// Filename of an outgoing transfer inside its sharded directory.
pub const OUTGOING_TRANSFER_FILENAME: &str = "outgoing.yaml";

/// Default customers file, relative to the data directory.
pub const DEFAULT_CUSTOMERS_FILENAME: &str = "customers.json";

/// Path under which the local document server is exposed to other organisations.
pub const DEFAULT_FHIR_PROXY_PATH: &str = "/fhir";

/// Request timeout for outbound HTTP calls, in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
