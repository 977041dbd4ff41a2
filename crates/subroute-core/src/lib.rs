//! subroute Core - Destination resolution and failover forwarding
//!
//! This crate decides, for one inbound message, whether and where to forward
//! it: it resolves layered address configuration, parses compound
//! destinations, forwards with per-destination failover, and falls back to a
//! reject-forward or a direct reject.

pub mod address;
pub mod destination;
pub mod error;
pub mod format;
pub mod forward;
pub mod message;
pub mod resolver;
pub mod router;

#[cfg(test)]
pub(crate) mod testing;

pub use address::{local_part, AddressIdentity};
pub use destination::{parse_destination, ParsedDestination, PrimaryDestination};
pub use error::{RoutingError, Stage};
pub use format::{Formats, Verdict};
pub use forward::{CompoundResult, ErrorRecord, ForwardOutcome, Forwarder, PrimaryDestinationResult};
pub use message::{ForwardError, ForwardHeaders, InboundMessage};
pub use resolver::{AddressConfig, ConfigResolver, SubaddressRule, UserOverride};
pub use router::{format_reject_reason, Disposition, Router};
