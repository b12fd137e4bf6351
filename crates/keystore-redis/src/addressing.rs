/// Prefix used when none (or an empty one) is configured.
pub const DEFAULT_KEY_PREFIX: &str = "hermes-key-store";

/// Store key for a slot: `{prefix:slot}`.
///
/// The braces are the cluster hash-tag marker read by cluster-aware clients.
/// Every key the backend touches must come from here or from [`scan_pattern`].
pub fn store_key(prefix: &str, slot: &str) -> String {
    format!("{{{prefix}:{slot}}}")
}

/// `SCAN MATCH` pattern selecting every store key under `prefix`.
pub fn scan_pattern(prefix: &str) -> String {
    format!("{{{prefix}:*")
}

/// Namespace anchoring all slots of one backend instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    prefix: String,
}

impl Namespace {
    /// An empty prefix selects [`DEFAULT_KEY_PREFIX`].
    pub fn new(prefix: impl AsRef<str>) -> Self {
        let prefix = prefix.as_ref();
        if prefix.is_empty() {
            return Self::default();
        }
        Self {
            prefix: prefix.to_string(),
        }
    }

    pub fn from_option(prefix: Option<&str>) -> Self {
        prefix.map(Self::new).unwrap_or_default()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn store_key(&self, slot: &str) -> String {
        store_key(&self.prefix, slot)
    }

    pub fn scan_pattern(&self) -> String {
        scan_pattern(&self.prefix)
    }

    /// `prefix:slot`, used in log lines.
    pub(crate) fn describe(&self, slot: &str) -> String {
        format!("{}:{slot}", self.prefix)
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn wraps_prefix_and_slot_in_hash_tag() {
        assert_eq!(store_key("ns1", "A"), "{ns1:A}");
        assert_eq!(scan_pattern("ns1"), "{ns1:*");
    }

    #[test]
    fn empty_or_missing_prefix_falls_back_to_default() {
        assert_eq!(Namespace::new("").prefix(), DEFAULT_KEY_PREFIX);
        assert_eq!(Namespace::from_option(None).prefix(), DEFAULT_KEY_PREFIX);
        assert_eq!(Namespace::from_option(Some("")).prefix(), DEFAULT_KEY_PREFIX);
        assert_eq!(Namespace::from_option(Some("tenant")).prefix(), "tenant");
    }

    #[test]
    fn namespace_and_free_functions_agree() {
        let ns = Namespace::new("tenant-7");
        assert_eq!(ns.store_key("slot"), store_key("tenant-7", "slot"));
        assert_eq!(ns.scan_pattern(), scan_pattern("tenant-7"));
    }

    proptest! {
        #[test]
        fn distinct_slots_map_to_distinct_keys(
            prefix in "[a-z0-9-]{1,16}",
            a in "[A-Za-z0-9-]{0,36}",
            b in "[A-Za-z0-9-]{0,36}",
        ) {
            prop_assume!(a != b);
            prop_assert_ne!(store_key(&prefix, &a), store_key(&prefix, &b));
        }

        #[test]
        fn scan_pattern_prefixes_every_store_key(
            prefix in "[a-z0-9-]{1,16}",
            slot in "[A-Za-z0-9-]{0,36}",
        ) {
            let pattern = scan_pattern(&prefix);
            let literal = pattern.trim_end_matches('*');
            prop_assert!(store_key(&prefix, &slot).starts_with(literal));
        }
    }
}
