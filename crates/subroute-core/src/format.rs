//! Compiled format-level routing settings

use crate::error::RoutingError;
use crate::message::ForwardHeaders;
use regex::Regex;
use subroute_common::config::RoutingConfig;

/// Which header value a forwarded copy carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Accepted and forwarded to the destination
    Pass,
    /// Refused and forwarded to the reject treatment
    Fail,
}

/// Separators, patterns and header settings, compiled once per message
#[derive(Debug, Clone)]
pub struct Formats {
    pub primary_separator: String,
    pub backup_separator: String,
    pub local_part_separator: String,
    pub reject_separator: String,
    pub header_name: String,
    pub header_pass_value: String,
    pub header_fail_value: String,
    email: Regex,
    recoverable_error: Regex,
}

impl Formats {
    /// Compile the format-level fields of `config`.
    ///
    /// Invalid separators, patterns that fail to compile, and a header name
    /// that does not match the header name pattern are setup errors.
    pub fn compile(config: &RoutingConfig) -> Result<Self, RoutingError> {
        config
            .validate()
            .map_err(|e| RoutingError::Setup(e.to_string()))?;

        let email = compile_pattern("email_pattern", &config.email_pattern)?;
        let header_name = compile_pattern("header_name_pattern", &config.header_name_pattern)?;
        let recoverable_error =
            compile_pattern("recoverable_error_pattern", &config.recoverable_error_pattern)?;

        if !header_name.is_match(&config.header_name) {
            return Err(RoutingError::Setup(format!(
                "header_name '{}' does not match '{}'",
                config.header_name, config.header_name_pattern
            )));
        }

        Ok(Self {
            primary_separator: config.primary_separator.clone(),
            backup_separator: config.backup_separator.clone(),
            local_part_separator: config.local_part_separator.clone(),
            reject_separator: config.reject_separator.clone(),
            header_name: config.header_name.clone(),
            header_pass_value: config.header_pass_value.clone(),
            header_fail_value: config.header_fail_value.clone(),
            email,
            recoverable_error,
        })
    }

    /// Whether `address` is a syntactically valid destination
    pub fn is_valid_email(&self, address: &str) -> bool {
        self.email.is_match(address)
    }

    /// Whether a delivery error message asks for a retry
    pub fn is_recoverable(&self, message: &str) -> bool {
        self.recoverable_error.is_match(message)
    }

    /// Headers added to a copy forwarded with `verdict`
    pub fn headers(&self, verdict: Verdict) -> ForwardHeaders {
        let value = match verdict {
            Verdict::Pass => &self.header_pass_value,
            Verdict::Fail => &self.header_fail_value,
        };

        ForwardHeaders::from([(self.header_name.clone(), value.clone())])
    }
}

fn compile_pattern(name: &str, pattern: &str) -> Result<Regex, RoutingError> {
    Regex::new(pattern)
        .map_err(|e| RoutingError::Setup(format!("{} '{}' is invalid: {}", name, pattern, e)))
}
