//! Subcommand implementations

use crate::exit;
use crate::message::SpooledMessage;
use crate::transport::{Relay, SmtpRelay};
use crate::StoreAction;
use anyhow::{Context, Result};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use subroute_common::config::{Config, StoreBackend};
use subroute_core::{format_reject_reason, local_part, Disposition, ParsedDestination, Router};
use subroute_storage::{create_store, DatabasePool, EntryRepository};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

/// Route one message and report its disposition as an exit code
pub async fn deliver(
    config: &Config,
    sender: String,
    recipient: String,
    input: Option<PathBuf>,
) -> Result<u8> {
    let raw = match input {
        Some(path) => tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut raw = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut raw)
                .await
                .context("Failed to read standard input")?;
            raw
        }
    };

    let store = create_store(&config.store).await?;
    let router = Router::new(config.routing.clone(), store)?;
    let relay: Arc<dyn Relay> = Arc::new(SmtpRelay::from_config(&config.transport)?);
    let message = SpooledMessage::new(sender, recipient, raw, relay);

    match router.route(&message).await? {
        Disposition::Rejected { reason } => {
            let reason = message.rejection().unwrap_or(reason);
            warn!(reason = %reason, "Message rejected");
            eprintln!("{}", reason);
            Ok(exit::NOUSER)
        }
        Disposition::Accepted { destinations } | Disposition::RejectForwarded { destinations } => {
            info!(destinations = ?destinations, "Message delivered");
            Ok(exit::OK)
        }
    }
}

/// Print the routing decision for `recipient` without forwarding
pub async fn check(config: &Config, recipient: &str) -> Result<u8> {
    let store = create_store(&config.store).await?;
    let router = Router::new(config.routing.clone(), store)?;

    let address = router.resolve(recipient).await?;
    let user = address.identity.user.as_str();
    let destination = router.parse(address.destination(), user);
    let reject_treatment = router.parse(address.reject_treatment(), user);

    let report = json!({
        "recipient": recipient,
        "user": user,
        "subaddress": address.identity.subaddress,
        "user_allowed": address.user_is_allowed(),
        "subaddress_allowed": address.subaddress_is_allowed(),
        "allowed": address.is_allowed(),
        "destination": describe(address.destination(), &destination),
        "reject_treatment": describe(address.reject_treatment(), &reject_treatment),
        "reject_reason": format_reject_reason(address.reject_reason(), local_part(recipient)),
    });

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(exit::OK)
}

fn describe(spec: &str, parsed: &ParsedDestination) -> serde_json::Value {
    let primaries: Vec<&[String]> = parsed.primaries.iter().map(|p| p.backups()).collect();

    json!({
        "spec": spec,
        "primaries": primaries,
        "invalid": parsed.invalid,
        "duplicate": parsed.duplicate,
    })
}

/// Administer the SQLite store
pub async fn store(config: &Config, action: StoreAction) -> Result<u8> {
    if config.store.backend != StoreBackend::Sqlite {
        return Err(subroute_common::Error::Config(
            "store commands need store.backend = \"sqlite\"".to_string(),
        )
        .into());
    }

    let db = DatabasePool::open(&config.store.path).await?;
    db.migrate().await?;
    let repository = EntryRepository::new(db);

    match action {
        StoreAction::Get { key } => match repository.find(&key).await? {
            Some(entry) => println!("{}", entry.value),
            None => {
                eprintln!("No entry for '{}'", key);
                return Ok(exit::FAILURE);
            }
        },
        StoreAction::Set { key, value } => repository.set(&key, &value).await?,
        StoreAction::Delete { key } => {
            if !repository.delete(&key).await? {
                eprintln!("No entry for '{}'", key);
                return Ok(exit::FAILURE);
            }
        }
        StoreAction::List => {
            for entry in repository.list().await? {
                println!("{}\t{}", entry.key, entry.value);
            }
        }
        StoreAction::Import { file } => {
            let json = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let count = repository.import(&json).await?;
            println!("Imported {} entries", count);
        }
    }

    Ok(exit::OK)
}
