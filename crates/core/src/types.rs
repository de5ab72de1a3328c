use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! newtype_uuid {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            #[must_use]
            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Return the inner UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }

            /// Parse from the canonical hyphenated form.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

newtype_uuid!(RuleId, "Unique identifier of a filter rule.");
newtype_uuid!(MerchantId, "Unique identifier of a merchant.");
newtype_uuid!(CampaignId, "Unique identifier of a campaign.");
newtype_uuid!(MonitorRuleId, "Unique identifier of a monitoring rule.");
newtype_uuid!(RatioMonitorId, "Unique identifier of a ratio monitor.");
newtype_uuid!(AlertId, "Unique identifier of an alert row.");
newtype_uuid!(ProjectId, "Unique identifier of an analysis project.");
newtype_uuid!(TaskId, "Unique identifier of an async task envelope.");

/// The reserved worker name that matches every worker.
pub const GLOBAL_WORKER: &str = "global";

/// A worker scope: either the reserved `"global"` wildcard or the name of a
/// specific edge worker.
///
/// Data, rules, scheduling, and cleanup are all scoped by worker identity;
/// a `global` scope applies regardless of which worker submitted the event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerScope(String);

impl WorkerScope {
    /// The `"global"` wildcard scope.
    #[must_use]
    pub fn global() -> Self {
        Self(GLOBAL_WORKER.to_owned())
    }

    /// Create a scope from a worker name. An empty name collapses to the
    /// global scope.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        if name.is_empty() {
            Self::global()
        } else {
            Self(name)
        }
    }

    /// Return the inner name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the reserved wildcard scope.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.0 == GLOBAL_WORKER
    }

    /// Whether a rule carrying this scope applies to an event submitted by
    /// `worker`. The wildcard applies to every worker; otherwise the names
    /// must match exactly.
    #[must_use]
    pub fn applies_to(&self, worker: &str) -> bool {
        self.is_global() || self.0 == worker
    }
}

impl Default for WorkerScope {
    fn default() -> Self {
        Self::global()
    }
}

impl fmt::Display for WorkerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerScope {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for WorkerScope {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<Option<String>> for WorkerScope {
    fn from(s: Option<String>) -> Self {
        s.map_or_else(Self::global, Self::new)
    }
}
