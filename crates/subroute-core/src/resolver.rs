//! Address-level configuration resolution
//!
//! Each of the four address-level fields resolves through a fixed precedence
//! chain, highest first:
//!
//! 1. the stored per-user entry (`{user}` / `{user}+`), when stored user
//!    configuration is enabled
//! 2. the stored global entry (`@USERS`, `@SUBADDRESSES`, `@DESTINATION`,
//!    `@REJECT_TREATMENT`), when stored address configuration is enabled
//! 3. the environment
//! 4. the hard default

use crate::address::AddressIdentity;
use crate::error::RoutingError;
use crate::format::Formats;
use subroute_common::config::{
    RoutingConfig, DEFAULT_DESTINATION, DEFAULT_REJECT_TREATMENT, DEFAULT_SUBADDRESSES,
    DEFAULT_USERS,
};
use subroute_storage::KvStore;
use tracing::debug;

/// Store key for the global allowed users
pub const USERS_KEY: &str = "@USERS";

/// Store key for the global allowed subaddresses
pub const SUBADDRESSES_KEY: &str = "@SUBADDRESSES";

/// Store key for the global destination
pub const DESTINATION_KEY: &str = "@DESTINATION";

/// Store key for the global reject treatment
pub const REJECT_TREATMENT_KEY: &str = "@REJECT_TREATMENT";

/// Wildcard matching every user or subaddress
const WILDCARD: &str = "*";

/// Parsed per-user entry `"{destination};{reject treatment}"`.
///
/// A segment that is empty after trimming defers to the global layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserOverride {
    pub destination: Option<String>,
    pub reject_treatment: Option<String>,
}

impl UserOverride {
    /// Parse a stored per-user value, splitting on the first `reject_separator`
    pub fn parse(value: &str, reject_separator: &str) -> Self {
        let (destination, reject_treatment) = match value.split_once(reject_separator) {
            Some((destination, reject_treatment)) => (destination, Some(reject_treatment)),
            None => (value, None),
        };

        Self {
            destination: non_empty(destination),
            reject_treatment: reject_treatment.and_then(non_empty),
        }
    }
}

fn non_empty(segment: &str) -> Option<String> {
    let segment = segment.trim();
    (!segment.is_empty()).then(|| segment.to_string())
}

/// Allowed subaddresses, optionally requiring one to be present
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubaddressRule {
    /// A recipient without subaddress is refused
    pub required: bool,
    /// Comma-separated allowed subaddresses, or `*`
    pub allowed: String,
}

impl SubaddressRule {
    /// Parse a subaddress list; a leading `separator` makes a subaddress mandatory
    pub fn parse(value: &str, separator: &str) -> Self {
        match value.strip_prefix(separator) {
            Some(allowed) => Self {
                required: true,
                allowed: allowed.to_string(),
            },
            None => Self {
                required: false,
                allowed: value.to_string(),
            },
        }
    }

    /// Whether `subaddress` (empty when absent) is allowed
    pub fn allows(&self, subaddress: &str) -> bool {
        if subaddress.is_empty() {
            return !self.required;
        }

        self.allowed.trim() == WILDCARD || list_contains(&self.allowed, subaddress)
    }
}

fn list_contains(list: &str, item: &str) -> bool {
    list.split(',')
        .map(str::trim)
        .any(|entry| !entry.is_empty() && entry.eq_ignore_ascii_case(item))
}

/// Address-level configuration resolved for one recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressConfig {
    pub identity: AddressIdentity,
    /// Global allowed users
    pub allowed_users: String,
    /// Subaddress rule from the per-user entry, else the global one
    pub subaddresses: SubaddressRule,
    /// Global destination
    pub global_destination: String,
    /// Global reject treatment
    pub global_reject_treatment: String,
    /// Reject treatment exactly as set in the environment
    pub env_reject_treatment: Option<String>,
    /// Per-user entry; `None` when absent or not looked up
    pub user_override: Option<UserOverride>,
}

impl AddressConfig {
    /// Resolved destination specification
    pub fn destination(&self) -> &str {
        self.user_override
            .as_ref()
            .and_then(|o| o.destination.as_deref())
            .unwrap_or(&self.global_destination)
    }

    /// Resolved reject treatment
    pub fn reject_treatment(&self) -> &str {
        self.user_override
            .as_ref()
            .and_then(|o| o.reject_treatment.as_deref())
            .unwrap_or(&self.global_reject_treatment)
    }

    /// A stored per-user entry exists, the user is listed, or all users are allowed
    pub fn user_is_allowed(&self) -> bool {
        self.user_override.is_some()
            || self.allowed_users.trim() == WILDCARD
            || list_contains(&self.allowed_users, &self.identity.user)
    }

    /// Whether the recipient's subaddress (or its absence) is allowed
    pub fn subaddress_is_allowed(&self) -> bool {
        self.subaddresses.allows(&self.identity.subaddress)
    }

    /// Whether the message may be forwarded to the destination
    pub fn is_allowed(&self) -> bool {
        self.user_is_allowed() && self.subaddress_is_allowed()
    }

    /// Literal reason for a direct reject.
    ///
    /// Falls back from the per-user reject treatment to the global one, the
    /// raw environment value and the hard default, skipping any candidate
    /// containing `@` since that is a forwarding address.
    pub fn reject_reason(&self) -> &str {
        let user = self
            .user_override
            .as_ref()
            .and_then(|o| o.reject_treatment.as_deref());

        [
            user,
            Some(self.global_reject_treatment.as_str()),
            self.env_reject_treatment.as_deref(),
        ]
        .into_iter()
        .flatten()
        .find(|candidate| !candidate.contains('@'))
        .unwrap_or(DEFAULT_REJECT_TREATMENT)
    }
}

/// Resolves [`AddressConfig`] from the store and the environment
pub struct ConfigResolver<'a> {
    routing: &'a RoutingConfig,
    store: &'a dyn KvStore,
}

impl<'a> ConfigResolver<'a> {
    pub fn new(routing: &'a RoutingConfig, store: &'a dyn KvStore) -> Self {
        Self { routing, store }
    }

    /// Resolve the configuration for `identity`
    pub async fn resolve(
        &self,
        identity: AddressIdentity,
        formats: &Formats,
    ) -> Result<AddressConfig, RoutingError> {
        let (stored_users, stored_subaddresses, stored_destination, stored_reject) =
            futures::try_join!(
                self.stored_global(USERS_KEY),
                self.stored_global(SUBADDRESSES_KEY),
                self.stored_global(DESTINATION_KEY),
                self.stored_global(REJECT_TREATMENT_KEY),
            )?;

        let (user_entry, user_subaddresses) = futures::try_join!(
            self.stored_user(identity.user.clone()),
            self.stored_user(format!("{}+", identity.user)),
        )?;

        let routing = self.routing;
        let global_subaddresses = layered(
            stored_subaddresses,
            &routing.subaddresses,
            DEFAULT_SUBADDRESSES,
        );
        let subaddresses = SubaddressRule::parse(
            user_subaddresses.as_deref().unwrap_or(&global_subaddresses),
            &formats.local_part_separator,
        );

        let config = AddressConfig {
            allowed_users: layered(stored_users, &routing.users, DEFAULT_USERS),
            subaddresses,
            global_destination: layered(
                stored_destination,
                &routing.destination,
                DEFAULT_DESTINATION,
            ),
            global_reject_treatment: layered(
                stored_reject,
                &routing.reject_treatment,
                DEFAULT_REJECT_TREATMENT,
            ),
            env_reject_treatment: routing.reject_treatment.clone(),
            user_override: user_entry
                .map(|value| UserOverride::parse(&value, &formats.reject_separator)),
            identity,
        };

        debug!(
            user = %config.identity.user,
            subaddress = %config.identity.subaddress,
            user_entry = config.user_override.is_some(),
            destination = %config.destination(),
            reject_treatment = %config.reject_treatment(),
            "Resolved address configuration"
        );

        Ok(config)
    }

    async fn stored_global(&self, key: &str) -> Result<Option<String>, RoutingError> {
        if !self.routing.use_stored_address_config {
            return Ok(None);
        }
        Ok(self.store.get(key).await?)
    }

    async fn stored_user(&self, key: String) -> Result<Option<String>, RoutingError> {
        if !self.routing.use_stored_user_config {
            return Ok(None);
        }
        Ok(self.store.get(&key).await?)
    }
}

fn layered(stored: Option<String>, env: &Option<String>, default: &str) -> String {
    stored
        .or_else(|| env.clone())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use subroute_storage::MemoryStore;

    fn stored_routing() -> RoutingConfig {
        RoutingConfig {
            use_stored_address_config: true,
            use_stored_user_config: true,
            ..RoutingConfig::default()
        }
    }

    async fn resolve(routing: &RoutingConfig, store: &MemoryStore, local_part: &str) -> AddressConfig {
        let formats = Formats::compile(routing).unwrap();
        let identity = AddressIdentity::from_local_part(local_part, &formats.local_part_separator);
        ConfigResolver::new(routing, store)
            .resolve(identity, &formats)
            .await
            .unwrap()
    }

    #[test]
    fn test_user_override_parse() {
        assert_eq!(
            UserOverride::parse(" a@x.com ; : go away ", ";"),
            UserOverride {
                destination: Some("a@x.com".to_string()),
                reject_treatment: Some(": go away".to_string()),
            }
        );
        assert_eq!(
            UserOverride::parse("a@x.com", ";"),
            UserOverride {
                destination: Some("a@x.com".to_string()),
                reject_treatment: None,
            }
        );
        assert_eq!(UserOverride::parse(" ; ", ";"), UserOverride::default());
        assert_eq!(UserOverride::parse("", ";"), UserOverride::default());
    }

    #[test]
    fn test_subaddress_rule() {
        let optional = SubaddressRule::parse("news, Shop", "+");
        assert!(!optional.required);
        assert!(optional.allows(""));
        assert!(optional.allows("shop"));
        assert!(!optional.allows("bank"));

        let required = SubaddressRule::parse("+*", "+");
        assert!(required.required);
        assert!(!required.allows(""));
        assert!(required.allows("anything"));

        let none = SubaddressRule::parse("", "+");
        assert!(none.allows(""));
        assert!(!none.allows("news"));
    }

    #[tokio::test]
    async fn test_defaults() {
        let routing = RoutingConfig::default();
        let config = resolve(&routing, &MemoryStore::new(), "alice+news").await;

        assert_eq!(config.allowed_users, "");
        assert!(!config.user_is_allowed());
        assert!(config.subaddress_is_allowed());
        assert_eq!(config.destination(), "");
        assert_eq!(config.reject_treatment(), "Address does not exist");
        assert_eq!(config.reject_reason(), "Address does not exist");
    }

    #[tokio::test]
    async fn test_environment_over_default() {
        let routing = RoutingConfig {
            users: Some("Alice, bob".to_string()),
            destination: Some("alice@email.com".to_string()),
            ..RoutingConfig::default()
        };
        let config = resolve(&routing, &MemoryStore::new(), "ALICE").await;

        assert!(config.user_is_allowed());
        assert_eq!(config.destination(), "alice@email.com");
    }

    #[tokio::test]
    async fn test_stored_global_over_environment() {
        let routing = RoutingConfig {
            users: Some("alice".to_string()),
            destination: Some("env@email.com".to_string()),
            ..stored_routing()
        };
        let store: MemoryStore = [("@USERS", "*"), ("@DESTINATION", "stored@email.com")]
            .into_iter()
            .collect();

        let config = resolve(&routing, &store, "carol").await;
        assert!(config.user_is_allowed());
        assert_eq!(config.destination(), "stored@email.com");
    }

    #[tokio::test]
    async fn test_stored_globals_ignored_when_disabled() {
        let routing = RoutingConfig {
            destination: Some("env@email.com".to_string()),
            ..RoutingConfig::default()
        };
        let store: MemoryStore = [("@DESTINATION", "stored@email.com"), ("alice", "a@x.com")]
            .into_iter()
            .collect();

        let config = resolve(&routing, &store, "alice").await;
        assert_eq!(config.destination(), "env@email.com");
        assert_eq!(config.user_override, None);
        assert!(!config.user_is_allowed());
    }

    #[tokio::test]
    async fn test_user_entry_overrides_and_defers() {
        let routing = RoutingConfig {
            destination: Some("global@email.com".to_string()),
            reject_treatment: Some("global-reject@email.com".to_string()),
            ..stored_routing()
        };
        let store: MemoryStore = [
            ("alice", "alice@private.net;: not here"),
            ("bob", " ; bob-rejects@email.com"),
            ("carol", ""),
        ]
        .into_iter()
        .collect();

        let alice = resolve(&routing, &store, "alice").await;
        assert_eq!(alice.destination(), "alice@private.net");
        assert_eq!(alice.reject_treatment(), ": not here");

        let bob = resolve(&routing, &store, "bob").await;
        assert_eq!(bob.destination(), "global@email.com");
        assert_eq!(bob.reject_treatment(), "bob-rejects@email.com");

        // Present but empty: allowed, everything deferred to the global layer
        let carol = resolve(&routing, &store, "carol").await;
        assert!(carol.user_is_allowed());
        assert_eq!(carol.destination(), "global@email.com");
        assert_eq!(carol.reject_treatment(), "global-reject@email.com");

        let dave = resolve(&routing, &store, "dave").await;
        assert!(!dave.user_is_allowed());
        assert_eq!(dave.user_override, None);
    }

    #[tokio::test]
    async fn test_user_subaddress_override() {
        let routing = RoutingConfig {
            subaddresses: Some("*".to_string()),
            ..stored_routing()
        };
        let store: MemoryStore = [("alice", ""), ("alice+", "+shop,bank")].into_iter().collect();

        assert!(!resolve(&routing, &store, "alice").await.subaddress_is_allowed());
        assert!(resolve(&routing, &store, "alice+Shop").await.subaddress_is_allowed());
        assert!(!resolve(&routing, &store, "alice+news").await.subaddress_is_allowed());

        // Global rule still applies to users without an override
        assert!(resolve(&routing, &store, "bob+news").await.subaddress_is_allowed());
    }

    #[tokio::test]
    async fn test_reject_reason_skips_addresses() {
        let routing = RoutingConfig {
            reject_treatment: Some("env-reject@email.com".to_string()),
            ..stored_routing()
        };
        let store: MemoryStore = [
            ("@REJECT_TREATMENT", "stored-reject@email.com"),
            ("alice", ";alice-rejects@email.com"),
        ]
        .into_iter()
        .collect();

        let config = resolve(&routing, &store, "alice").await;
        assert_eq!(config.reject_reason(), "Address does not exist");

        let routing = RoutingConfig {
            reject_treatment: Some(": No such user".to_string()),
            ..stored_routing()
        };
        let config = resolve(&routing, &store, "alice").await;
        assert_eq!(config.reject_reason(), ": No such user");

        let store: MemoryStore = [("alice", ";Go away")].into_iter().collect();
        let config = resolve(&routing, &store, "alice").await;
        assert_eq!(config.reject_reason(), "Go away");
    }

    #[tokio::test]
    async fn test_gates_are_independent() {
        let store: MemoryStore = [
            ("@DESTINATION", "stored@email.com"),
            ("alice", "alice@private.net"),
            ("alice+", "+shop"),
        ]
        .into_iter()
        .collect();

        let globals_only = RoutingConfig {
            use_stored_address_config: true,
            use_stored_user_config: false,
            ..RoutingConfig::default()
        };
        let config = resolve(&globals_only, &store, "alice").await;
        assert_eq!(config.user_override, None);
        assert!(!config.user_is_allowed());
        assert!(config.subaddress_is_allowed());
        assert_eq!(config.destination(), "stored@email.com");

        let users_only = RoutingConfig {
            destination: Some("env@email.com".to_string()),
            use_stored_address_config: false,
            use_stored_user_config: true,
            ..RoutingConfig::default()
        };
        let config = resolve(&users_only, &store, "bob").await;
        assert_eq!(config.destination(), "env@email.com");
        let config = resolve(&users_only, &store, "alice").await;
        assert!(config.user_is_allowed());
        assert!(!config.subaddress_is_allowed());
        assert_eq!(config.destination(), "alice@private.net");
    }
}
