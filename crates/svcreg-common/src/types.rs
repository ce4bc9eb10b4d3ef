//! Core domain types used throughout svcreg.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical name of a service group.
///
/// Not unique per instance: several instances may register under the same
/// name, and dependents declare requirements by name.
///
/// # Example
/// ```
/// use svcreg_common::ServiceName;
///
/// let name = ServiceName::from("LogService");
/// assert_eq!(name.as_str(), "LogService");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceName(String);

impl ServiceName {
    /// Creates a new ServiceName from a string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ServiceName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ServiceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
