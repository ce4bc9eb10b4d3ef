//! Wire-level data model shared by the registry and its clients.
//!
//! A [`Registration`] describes one live instance. A [`Patch`] is a delta
//! over the set of live instances, never a full snapshot: the registry
//! sends dependents only the entries whose service name they require.

use crate::types::ServiceName;
use serde::{Deserialize, Deserializer, Serialize};

/// One live service instance.
///
/// `service_url` is the key for add, remove and lookup. The JSON shape is
/// `{serviceName, serviceUrl, heartBeatURL, requiredServices, serviceUpdateURL}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Logical service identity.
    #[serde(rename = "serviceName")]
    pub service_name: ServiceName,

    /// Base address of the instance.
    #[serde(rename = "serviceUrl")]
    pub service_url: String,

    /// Address probed by the heartbeat monitor.
    #[serde(rename = "heartBeatURL")]
    pub heartbeat_url: String,

    /// Services this instance depends on, in declaration order.
    #[serde(
        rename = "requiredServices",
        default,
        deserialize_with = "null_as_empty"
    )]
    pub required_services: Vec<ServiceName>,

    /// Address that receives patches.
    #[serde(rename = "serviceUpdateURL")]
    pub service_update_url: String,
}

impl Registration {
    /// Returns the patch entry announcing this instance.
    pub fn entry(&self) -> PatchEntry {
        PatchEntry::new(self.service_name.clone(), self.service_url.clone())
    }

    /// Returns true if this instance declared a dependency on `name`.
    pub fn requires(&self, name: &ServiceName) -> bool {
        self.required_services.contains(name)
    }
}

/// Presence of one instance in a service group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatchEntry {
    pub name: ServiceName,
    pub url: String,
}

impl PatchEntry {
    pub fn new(name: impl Into<ServiceName>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Delta over provider membership. Either list may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub added: Vec<PatchEntry>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub removed: Vec<PatchEntry>,
}

impl Patch {
    /// A patch announcing a single new instance.
    pub fn added(entry: PatchEntry) -> Self {
        Self {
            added: vec![entry],
            removed: Vec::new(),
        }
    }

    /// A patch announcing a single departed instance.
    pub fn removed(entry: PatchEntry) -> Self {
        Self {
            added: Vec::new(),
            removed: vec![entry],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Keeps only the entries whose name is in `names`.
    ///
    /// Returns `None` when no entry survives, so callers can skip dispatch.
    pub fn restricted_to(&self, names: &[ServiceName]) -> Option<Patch> {
        let keep = |entry: &&PatchEntry| names.contains(&entry.name);
        let sub = Patch {
            added: self.added.iter().filter(keep).cloned().collect(),
            removed: self.removed.iter().filter(keep).cloned().collect(),
        };
        (!sub.is_empty()).then_some(sub)
    }
}

// Lenient peers encode empty lists as `null`.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
