//! Recipient address identity

/// User and subaddress of a recipient local part, both lower-cased
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddressIdentity {
    pub user: String,
    pub subaddress: String,
}

impl AddressIdentity {
    /// Split a local part on the first occurrence of `separator`.
    ///
    /// `subaddress` is empty when the separator does not occur.
    pub fn from_local_part(local_part: &str, separator: &str) -> Self {
        let lower = local_part.to_lowercase();

        match lower.split_once(separator) {
            Some((user, subaddress)) => Self {
                user: user.to_string(),
                subaddress: subaddress.to_string(),
            },
            None => Self {
                user: lower,
                subaddress: String::new(),
            },
        }
    }

    /// Whether a (non-empty) subaddress is present
    pub fn has_subaddress(&self) -> bool {
        !self.subaddress.is_empty()
    }
}

/// Local part of an address: everything before the last `@`
pub fn local_part(address: &str) -> &str {
    address
        .rsplit_once('@')
        .map(|(local, _)| local)
        .unwrap_or(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_on_first_separator() {
        let identity = AddressIdentity::from_local_part("user1+suba+b", "+");
        assert_eq!(identity.user, "user1");
        assert_eq!(identity.subaddress, "suba+b");
        assert!(identity.has_subaddress());
    }

    #[test]
    fn test_no_separator() {
        let identity = AddressIdentity::from_local_part("User1", "+");
        assert_eq!(identity.user, "user1");
        assert_eq!(identity.subaddress, "");
        assert!(!identity.has_subaddress());
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(
            AddressIdentity::from_local_part("USER1+SUBA", "+"),
            AddressIdentity::from_local_part("user1+suba", "+")
        );
    }

    #[test]
    fn test_multi_character_separator() {
        let identity = AddressIdentity::from_local_part("alice--news--daily", "--");
        assert_eq!(identity.user, "alice");
        assert_eq!(identity.subaddress, "news--daily");
    }

    #[test]
    fn test_trailing_separator_has_empty_subaddress() {
        let identity = AddressIdentity::from_local_part("bob+", "+");
        assert_eq!(identity.user, "bob");
        assert!(!identity.has_subaddress());
    }

    #[test]
    fn test_local_part() {
        assert_eq!(local_part("user1+subB@domain.com"), "user1+subB");
        assert_eq!(local_part("\"a@b\"@domain.com"), "\"a@b\"");
        assert_eq!(local_part("postmaster"), "postmaster");
    }
}
