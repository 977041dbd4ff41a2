//! Compound destination parsing and validation
//!
//! A destination specification lists primary destinations separated by the
//! primary separator; each primary lists backup addresses separated by the
//! backup separator, tried in order. With the default separators
//! `"a@x.com:b@x.com,c@y.com"` has two primaries, the first with a backup.

use crate::error::Stage;
use crate::format::Formats;
use std::collections::HashSet;
use tracing::warn;

/// One routing target: backup addresses attempted in order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrimaryDestination {
    backups: Vec<String>,
}

impl PrimaryDestination {
    pub fn new(backups: Vec<String>) -> Self {
        Self { backups }
    }

    /// Backup addresses, in failover order
    pub fn backups(&self) -> &[String] {
        &self.backups
    }
}

/// Result of parsing a destination specification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDestination {
    /// Primaries with at least one valid, first-seen backup
    pub primaries: Vec<PrimaryDestination>,
    /// Every kept address
    pub valid: Vec<String>,
    /// Non-empty candidates failing address validation
    pub invalid: Vec<String>,
    /// Valid candidates already seen earlier in the specification
    pub duplicate: Vec<String>,
}

impl ParsedDestination {
    /// Whether no primary destination survived
    pub fn is_empty(&self) -> bool {
        self.primaries.is_empty()
    }

    /// Warn about dropped candidates
    pub fn log_problems(&self, stage: Stage) {
        if !self.invalid.is_empty() {
            warn!(%stage, invalid = ?self.invalid, "Dropped invalid destinations");
        }
        if !self.duplicate.is_empty() {
            warn!(%stage, duplicate = ?self.duplicate, "Dropped duplicate destinations");
        }
    }
}

/// Parse and validate a destination specification.
///
/// Candidates starting with the local part separator or `@` are shorthand
/// and get `user` prepended (`"+spam"` becomes `"alice+spam"`, `"@example.net"`
/// becomes `"alice@example.net"`). An address is kept only at its first
/// occurrence anywhere in the specification. Primaries left without backups
/// are dropped.
pub fn parse_destination(spec: &str, user: &str, formats: &Formats) -> ParsedDestination {
    let mut parsed = ParsedDestination::default();
    let mut seen = HashSet::new();

    for primary_spec in spec.split(formats.primary_separator.as_str()) {
        let mut backups = Vec::new();

        for candidate in primary_spec.split(formats.backup_separator.as_str()) {
            let candidate = candidate.trim();
            if candidate.is_empty() {
                continue;
            }

            let address = if candidate.starts_with(formats.local_part_separator.as_str())
                || candidate.starts_with('@')
            {
                format!("{}{}", user, candidate)
            } else {
                candidate.to_string()
            };

            if !formats.is_valid_email(&address) {
                parsed.invalid.push(address);
            } else if !seen.insert(address.clone()) {
                parsed.duplicate.push(address);
            } else {
                parsed.valid.push(address.clone());
                backups.push(address);
            }
        }

        if !backups.is_empty() {
            parsed.primaries.push(PrimaryDestination::new(backups));
        }
    }

    parsed
}
