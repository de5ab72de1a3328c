use std::collections::HashSet;

/// Second-level TLD suffixes (`co.uk`, `com.cn`, ...) under which the
/// registrable root keeps three labels instead of two.
///
/// The set is closed but loadable: deployments can extend or replace the
/// built-in list without touching the extraction logic.
#[derive(Debug, Clone)]
pub struct SecondLevelTlds(HashSet<String>);

const DEFAULT_SECOND_LEVEL_TLDS: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "me.uk", "net.uk",
    "com.cn", "net.cn", "org.cn", "gov.cn",
    "co.jp", "ne.jp", "or.jp", "ac.jp",
    "com.au", "net.au", "org.au",
    "co.nz", "net.nz", "org.nz",
    "com.br", "net.br", "org.br",
    "com.mx", "co.kr", "or.kr",
    "com.tw", "com.hk", "com.sg",
    "co.in", "net.in", "org.in",
    "co.za", "com.tr", "com.ar",
];

impl SecondLevelTlds {
    /// The built-in suffix list.
    #[must_use]
    pub fn default_set() -> Self {
        Self(
            DEFAULT_SECOND_LEVEL_TLDS
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
        )
    }

    /// Build a set from arbitrary suffixes, lowercased.
    pub fn from_suffixes<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            suffixes
                .into_iter()
                .map(|s| s.as_ref().to_lowercase())
                .collect(),
        )
    }

    /// Whether `suffix` (e.g. `co.uk`) is in the set.
    #[must_use]
    pub fn contains(&self, suffix: &str) -> bool {
        self.0.contains(suffix)
    }
}

impl Default for SecondLevelTlds {
    fn default() -> Self {
        Self::default_set()
    }
}

/// Reduce a full domain to its registrable root.
///
/// Splits on `.`: when the last two labels form a known second-level TLD
/// the root keeps three labels, otherwise two. Idempotent: applying it to
/// its own output returns the same value.
#[must_use]
pub fn extract_root_domain(domain: &str, tlds: &SecondLevelTlds) -> String {
    let domain = domain.trim().to_lowercase();
    let labels: Vec<&str> = domain.split('.').collect();

    if labels.len() >= 3 {
        let last_two = format!("{}.{}", labels[labels.len() - 2], labels[labels.len() - 1]);
        if tlds.contains(&last_two) {
            return labels[labels.len() - 3..].join(".");
        }
    }
    if labels.len() >= 2 {
        return labels[labels.len() - 2..].join(".");
    }
    domain
}

/// Extract the root registrable domain of a sender address.
///
/// Returns `None` for malformed input: no `@`, an empty local part or
/// domain part, a domain without a dot, or embedded whitespace.
#[must_use]
pub fn extract_domain(sender: &str, tlds: &SecondLevelTlds) -> Option<String> {
    let sender = sender.trim().to_lowercase();
    if sender.chars().any(char::is_whitespace) {
        return None;
    }

    let (local, domain) = sender.split_once('@')?;
    if local.is_empty() || domain.is_empty() || !domain.contains('.') {
        return None;
    }
    // A second '@' makes the address ambiguous.
    if domain.contains('@') {
        return None;
    }

    Some(extract_root_domain(domain, tlds))
}
