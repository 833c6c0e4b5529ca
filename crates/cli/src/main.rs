use clap::{Parser, Subcommand};
use eoverdracht_core::constants::DEFAULT_FHIR_PROXY_PATH;
use eoverdracht_core::transition::ALLOWED_TRANSITIONS;
use eoverdracht_core::{
    assemble_advance_notice, assemble_nursing_handoff, credential_allows, validate_transition,
    CustomerRepository, FhirRoute, FileIncomingTransferRepository, FileOutgoingTransferRepository,
    InMemoryDocumentServer, IncomingTransferRepository, JsonFileCustomerRepository,
    OutgoingTransferRepository,
};
use eoverdracht_uuid::RecordId;
use fhir::{NegotiationStatus, Resource, ResourceRef, ResourceType, TransferProperties};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "eoverdracht")]
#[command(about = "eOverdracht transfer negotiation diagnostics")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the allowed status transitions
    Transitions,
    /// Check whether a status change is allowed
    CheckTransition {
        /// Current status (e.g. requested)
        from: String,
        /// New status (e.g. accepted)
        to: String,
    },
    /// Check a request against an authorization credential
    VerifyAccess {
        /// Verifiable credential as JSON
        credential: PathBuf,
        /// HTTP method of the request
        method: String,
        /// Request path, including the proxy base (e.g. /fhir/Task/1)
        path: String,
        /// Proxy base path
        #[arg(long, default_value = DEFAULT_FHIR_PROXY_PATH)]
        base: String,
        /// Treat the token as carrying a user session
        #[arg(long)]
        user: bool,
    },
    /// Assemble a transfer document from a directory of FHIR JSON resources
    Assemble {
        /// Directory with one resource per .json file
        dir: PathBuf,
        /// Composition id
        composition_id: String,
        /// Assemble as nursing handoff (subject required)
        #[arg(long)]
        handoff: bool,
    },
    /// List customers from a customers file
    Customers {
        /// Customers JSON file
        file: PathBuf,
    },
    /// Show a stored negotiation record
    ShowTransfer {
        /// Directory holding the incoming transfer records
        dir: PathBuf,
        /// Customer id
        customer_id: String,
        /// Task id
        task_id: String,
    },
    /// Show a stored sender-side transfer with its negotiations
    ShowOutgoing {
        /// Directory holding the outgoing transfer records
        dir: PathBuf,
        /// Customer id
        customer_id: String,
        /// Transfer id
        transfer_id: String,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Transitions) => {
            for (from, to) in ALLOWED_TRANSITIONS {
                println!("{from} -> {to}");
            }
        }
        Some(Commands::CheckTransition { from, to }) => match check_transition(&from, &to) {
            Ok(()) => println!("{from} -> {to} is allowed"),
            Err(e) => eprintln!("Error: {}", e),
        },
        Some(Commands::VerifyAccess {
            credential,
            method,
            path,
            base,
            user,
        }) => match verify_access(&credential, &method, &path, &base, user) {
            Ok(()) => println!("granted: {method} {path}"),
            Err(e) => eprintln!("denied: {}", e),
        },
        Some(Commands::Assemble {
            dir,
            composition_id,
            handoff,
        }) => match assemble(&dir, &composition_id, handoff) {
            Ok(properties) => println!("{}", serde_json::to_string_pretty(&properties)?),
            Err(e) => eprintln!("Error assembling Composition/{}: {}", composition_id, e),
        },
        Some(Commands::Customers { file }) => {
            let customers = JsonFileCustomerRepository::open(&file)?.all()?;
            if customers.is_empty() {
                println!("No customers found.");
            }
            for customer in customers {
                println!(
                    "ID: {}, Name: {}, DID: {}",
                    customer.id,
                    customer.name,
                    customer.did.as_deref().unwrap_or("-")
                );
            }
        }
        Some(Commands::ShowTransfer {
            dir,
            customer_id,
            task_id,
        }) => {
            let repository = FileIncomingTransferRepository::with_root(dir);
            match repository.find_by_task_id(&customer_id, &task_id)? {
                Some(transfer) => println!("{}", serde_json::to_string_pretty(&transfer)?),
                None => println!("No negotiation for task {task_id} of customer {customer_id}."),
            }
        }
        Some(Commands::ShowOutgoing {
            dir,
            customer_id,
            transfer_id,
        }) => {
            let id = RecordId::parse(&transfer_id)?;
            let repository = FileOutgoingTransferRepository::with_root(dir);
            match repository.find_by_id(&customer_id, &id)? {
                Some(transfer) => println!("{}", serde_json::to_string_pretty(&transfer)?),
                None => println!("No transfer {transfer_id} for customer {customer_id}."),
            }
        }
        None => {
            println!("Use 'eoverdracht --help' for commands");
        }
    }

    Ok(())
}

fn check_transition(from: &str, to: &str) -> Result<(), Box<dyn Error>> {
    let from: NegotiationStatus = from.parse()?;
    let to: NegotiationStatus = to.parse()?;
    if from == to {
        return Err(format!("{from} is unchanged").into());
    }
    validate_transition(from, to)?;
    Ok(())
}

fn verify_access(
    credential: &Path,
    method: &str,
    path: &str,
    base: &str,
    user: bool,
) -> Result<(), Box<dyn Error>> {
    let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(credential)?)?;
    let route = FhirRoute::parse(method, path, base)?;
    credential_allows(raw, &route, user)
        .map_err(|reason| format!("credential {reason}").into())
}

/// Load every `.json` file in `dir` as a resource and assemble the composition from them.
fn assemble(
    dir: &Path,
    composition_id: &str,
    handoff: bool,
) -> Result<TransferProperties, Box<dyn Error>> {
    let server = InMemoryDocumentServer::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let value = serde_json::from_str(&fs::read_to_string(&path)?)?;
        server.insert(&Resource::from_json(value)?)?;
    }

    let reference = ResourceRef::new(ResourceType::Composition, composition_id);
    let properties = if handoff {
        assemble_nursing_handoff(&server, &reference)?.to_transfer_properties()?
    } else {
        assemble_advance_notice(&server, &reference)?.to_transfer_properties()?
    };
    Ok(properties)
}
