//! Failover and compound forwarding
//!
//! A primary destination is a failover chain: its backups are tried one after
//! another until one accepts the message. A compound destination runs all of
//! its primaries concurrently and aggregates their results.

use crate::destination::PrimaryDestination;
use crate::format::Formats;
use crate::message::{ForwardHeaders, InboundMessage};
use futures::future::join_all;
use tracing::{debug, info, warn};

/// One failed delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    /// Position of the backup within its primary destination
    pub index: usize,
    pub address: String,
    pub message: String,
    pub recoverable: bool,
}

/// Result of forwarding to one primary destination
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrimaryDestinationResult {
    pub was_successful: bool,
    /// Any failed attempt was recoverable
    pub had_recoverable_error: bool,
    pub successful_destination: Option<String>,
    pub errors: Vec<ErrorRecord>,
}

/// Aggregated result of forwarding to a compound destination
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompoundResult {
    pub was_successful: bool,
    /// Any primary that did not succeed had a recoverable error
    pub had_recoverable_error: bool,
    pub successful_destinations: Vec<String>,
    pub errors: Vec<ErrorRecord>,
}

/// Outcome of a compound forward as seen by the disposition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Delivered to at least one primary, no recoverable failure elsewhere
    Delivered(Vec<String>),
    /// A primary failed recoverably; the message must be retried
    RetryableFailure(Vec<ErrorRecord>),
    /// Nothing delivered and nothing worth retrying
    TerminalFailure(Vec<ErrorRecord>),
}

impl CompoundResult {
    /// Aggregate per-primary results.
    ///
    /// A recoverable failure in any unsuccessful primary marks the whole
    /// result unsuccessful, even when another primary already delivered.
    pub fn aggregate(results: Vec<PrimaryDestinationResult>) -> Self {
        let mut compound = CompoundResult::default();

        for result in results {
            match result.successful_destination {
                Some(destination) if result.was_successful => {
                    compound.successful_destinations.push(destination)
                }
                _ => compound.had_recoverable_error |= result.had_recoverable_error,
            }
            compound.errors.extend(result.errors);
        }

        compound.was_successful =
            !compound.had_recoverable_error && !compound.successful_destinations.is_empty();
        compound
    }

    pub fn into_outcome(self) -> ForwardOutcome {
        if self.had_recoverable_error {
            ForwardOutcome::RetryableFailure(self.errors)
        } else if self.was_successful {
            ForwardOutcome::Delivered(self.successful_destinations)
        } else {
            ForwardOutcome::TerminalFailure(self.errors)
        }
    }
}

/// Forwards one message to parsed destinations
pub struct Forwarder<'a> {
    message: &'a dyn InboundMessage,
    formats: &'a Formats,
}

impl<'a> Forwarder<'a> {
    pub fn new(message: &'a dyn InboundMessage, formats: &'a Formats) -> Self {
        Self { message, formats }
    }

    /// Try each backup in order until one succeeds
    pub async fn forward_primary(
        &self,
        primary: &PrimaryDestination,
        headers: &ForwardHeaders,
    ) -> PrimaryDestinationResult {
        let mut result = PrimaryDestinationResult::default();

        for (index, address) in primary.backups().iter().enumerate() {
            debug!(index, address = %address, "Attempting delivery");

            match self.message.forward(address, headers).await {
                Ok(()) => {
                    info!(index, address = %address, "Delivered to backup destination");
                    result.was_successful = true;
                    result.successful_destination = Some(address.clone());
                    return result;
                }
                Err(e) => {
                    let recoverable = self.formats.is_recoverable(&e.message);
                    warn!(
                        index,
                        address = %address,
                        recoverable,
                        error = %e,
                        "Delivery to backup destination failed"
                    );

                    result.had_recoverable_error |= recoverable;
                    result.errors.push(ErrorRecord {
                        index,
                        address: address.clone(),
                        message: e.message,
                        recoverable,
                    });
                }
            }
        }

        result
    }

    /// Forward to every primary concurrently and aggregate the results
    pub async fn forward_compound(
        &self,
        primaries: &[PrimaryDestination],
        headers: &ForwardHeaders,
    ) -> CompoundResult {
        let results = join_all(
            primaries
                .iter()
                .map(|primary| self.forward_primary(primary, headers)),
        )
        .await;

        let compound = CompoundResult::aggregate(results);

        if compound.was_successful {
            info!(
                delivered = ?compound.successful_destinations,
                failures = compound.errors.len(),
                "Compound destination delivered"
            );
        } else {
            warn!(
                delivered = ?compound.successful_destinations,
                recoverable = compound.had_recoverable_error,
                failures = compound.errors.len(),
                "Compound destination not delivered"
            );
        }

        compound
    }
}
