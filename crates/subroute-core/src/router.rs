//! Disposition of one inbound message
//!
//! ```text
//! allowed? ──yes──> accept (PASS) ──delivered──> Accepted
//!    │                  │
//!    no             not delivered
//!    │                  │
//!    └──────> reject-forward (FAIL) ──delivered──> RejectForwarded
//!                       │
//!                 not delivered
//!                       │
//!                       └──> direct reject ──> Rejected
//! ```
//!
//! A recoverable delivery failure in either forwarding stage aborts the
//! disposition with [`RoutingError::Retryable`].

use crate::address::{local_part, AddressIdentity};
use crate::destination::{parse_destination, ParsedDestination};
use crate::error::{RoutingError, Stage};
use crate::format::{Formats, Verdict};
use crate::forward::{ForwardOutcome, Forwarder};
use crate::message::InboundMessage;
use crate::resolver::{AddressConfig, ConfigResolver};
use std::sync::Arc;
use subroute_common::config::RoutingConfig;
use subroute_storage::KvStore;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

/// Final disposition of a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Forwarded to the destination
    Accepted { destinations: Vec<String> },
    /// Forwarded to the reject treatment
    RejectForwarded { destinations: Vec<String> },
    /// Refused with a literal reason
    Rejected { reason: String },
}

/// Routes inbound messages according to one configuration
pub struct Router {
    routing: RoutingConfig,
    formats: Formats,
    store: Arc<dyn KvStore>,
}

impl Router {
    /// Create a router, compiling the format-level settings
    pub fn new(routing: RoutingConfig, store: Arc<dyn KvStore>) -> Result<Self, RoutingError> {
        let formats = Formats::compile(&routing)?;
        Ok(Self {
            routing,
            formats,
            store,
        })
    }

    pub fn formats(&self) -> &Formats {
        &self.formats
    }

    /// Resolve the address configuration for `recipient`
    pub async fn resolve(&self, recipient: &str) -> Result<AddressConfig, RoutingError> {
        let identity = AddressIdentity::from_local_part(
            local_part(recipient),
            &self.formats.local_part_separator,
        );

        ConfigResolver::new(&self.routing, self.store.as_ref())
            .resolve(identity, &self.formats)
            .await
    }

    /// Parse a destination specification on behalf of `user`
    pub fn parse(&self, spec: &str, user: &str) -> ParsedDestination {
        parse_destination(spec, user, &self.formats)
    }

    /// Decide and carry out the disposition of `message`.
    ///
    /// Exactly one of forwarding or [`InboundMessage::reject`] takes effect
    /// unless an error is returned.
    pub async fn route(&self, message: &dyn InboundMessage) -> Result<Disposition, RoutingError> {
        let span = info_span!(
            "route",
            invocation = %Uuid::now_v7(),
            recipient = %message.recipient(),
            sender = %message.sender(),
        );

        self.dispose(message).instrument(span).await
    }

    async fn dispose(&self, message: &dyn InboundMessage) -> Result<Disposition, RoutingError> {
        debug!(
            message_id = message.header("Message-ID").as_deref().unwrap_or("-"),
            size = message.raw_size(),
            "Routing message"
        );

        let config = self.resolve(message.recipient()).await?;

        if config.is_allowed() {
            if let Some(destinations) = self
                .attempt(message, &config, Stage::Accept, config.destination())
                .await?
            {
                info!(destinations = ?destinations, "Message accepted");
                return Ok(Disposition::Accepted { destinations });
            }
        } else {
            info!(
                user_allowed = config.user_is_allowed(),
                subaddress_allowed = config.subaddress_is_allowed(),
                "Recipient not allowed"
            );
        }

        if let Some(destinations) = self
            .attempt(message, &config, Stage::RejectForward, config.reject_treatment())
            .await?
        {
            info!(destinations = ?destinations, "Message reject-forwarded");
            return Ok(Disposition::RejectForwarded { destinations });
        }

        let reason = format_reject_reason(config.reject_reason(), local_part(message.recipient()));
        info!(reason = %reason, "Rejecting message");
        message.reject(&reason);

        Ok(Disposition::Rejected { reason })
    }

    /// Forward to `spec`; `None` when nothing was delivered
    async fn attempt(
        &self,
        message: &dyn InboundMessage,
        config: &AddressConfig,
        stage: Stage,
        spec: &str,
    ) -> Result<Option<Vec<String>>, RoutingError> {
        let parsed = self.parse(spec, &config.identity.user);
        parsed.log_problems(stage);

        if parsed.is_empty() {
            debug!(%stage, "No valid destination");
            return Ok(None);
        }

        let verdict = match stage {
            Stage::Accept => Verdict::Pass,
            Stage::RejectForward => Verdict::Fail,
        };

        let result = Forwarder::new(message, &self.formats)
            .forward_compound(&parsed.primaries, &self.formats.headers(verdict))
            .await;

        match result.into_outcome() {
            ForwardOutcome::Delivered(destinations) => Ok(Some(destinations)),
            ForwardOutcome::RetryableFailure(errors) => {
                Err(RoutingError::Retryable { stage, errors })
            }
            ForwardOutcome::TerminalFailure(_) => Ok(None),
        }
    }
}

/// Prefix a reason starting with punctuation with the original local part.
///
/// `": no such user"` for `Bob+News` becomes `"Bob+News: no such user"`.
pub fn format_reject_reason(reason: &str, local_part: &str) -> String {
    match reason.chars().next() {
        Some(c) if !c.is_alphanumeric() => format!("{}{}", local_part, reason),
        _ => reason.to_string(),
    }
}
