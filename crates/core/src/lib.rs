//! # eOverdracht Core
//!
//! Transfer negotiation between care organisations that exchange nursing handoffs as FHIR
//! documents over the Nuts network.
//!
//! This crate contains the negotiation logic and its collaborators:
//! - the allowed status transitions of a transfer Task
//! - assembly of advance notices and nursing handoffs from a remote document server
//! - receiver-side negotiation records with sharded YAML storage
//! - capability requests and access checks against the identity node
//! - sender-side transfers: publication of proposals, negotiation and assignment
//! - best-effort status notifications to receiving organisations
//!
//! **No API concerns**: HTTP servers and request handling belong in `api-rest`.

pub mod assembler;
pub mod authorization;
pub mod config;
pub mod constants;
pub mod error;
pub mod negotiation;
pub mod notification;
pub mod nuts;
pub mod ports;
pub mod proposal;
pub mod remote;
pub mod repositories;
pub mod transition;

#[cfg(test)]
mod testing;

pub use assembler::{assemble_advance_notice, assemble_nursing_handoff};
pub use authorization::{
    credential_allows, AccessDenied, AuthorizationCredential, AuthorizationGateway, FhirRoute,
    MismatchReason, Operation,
};
pub use config::CoreConfig;
pub use error::{NodeError, RemoteError, RepositoryError, TransferError, TransferResult};
pub use negotiation::{TransferRequest, TransferService};
pub use notification::{HttpTransferNotifier, TransferNotification, TransferNotifier};
pub use nuts::NutsNodeClient;
pub use ports::{
    AccessTokenService, CredentialRegistry, Customer, IntrospectedToken, Organization,
    OrganizationRegistry,
};
pub use proposal::{ListedNegotiation, ProposalService, PublishedProposal};
pub use remote::{
    DocumentClient, DocumentClientFactory, HttpClientFactory, HttpDocumentClient, HttpTenantStore,
    InMemoryDocumentServer, InMemoryTenantStore, RemoteCapability, TenantStore,
};
pub use repositories::{
    CustomerRepository, FileIncomingTransferRepository, FileOutgoingTransferRepository,
    IncomingTransfer, IncomingTransferRepository, JsonFileCustomerRepository, OutgoingNegotiation,
    OutgoingTransfer, OutgoingTransferRepository, TransferStatus,
};
pub use transition::{validate_transition, InvalidTransition};
