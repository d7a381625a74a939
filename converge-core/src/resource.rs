//! Resource - Durable records of provisioned resources

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Internal identifier chosen by the caller
///
/// Unique within one engine instance and stable across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the id is empty or whitespace only
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier assigned by the remote provider on creation
///
/// Opaque to the engine. The only thing the engine checks is that a freshly
/// returned identifier is not blank.
pub trait ProviderId:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn is_blank(&self) -> bool;
}

impl ProviderId for String {
    fn is_blank(&self) -> bool {
        self.trim().is_empty()
    }
}

/// Composite identifier (e.g., several ARNs created by one call)
impl ProviderId for Vec<String> {
    fn is_blank(&self) -> bool {
        self.is_empty() || self.iter().any(|part| part.trim().is_empty())
    }
}

/// Last-known state of a provisioned resource
///
/// This is the unit persisted under its internal id in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource<I, O, P> {
    pub id: ResourceId,
    /// Identifier assigned by the provider (e.g., vpc-xxx)
    pub provider_id: P,
    /// Last applied desired configuration
    pub input: I,
    /// Last observed remote representation
    pub output: O,
    #[serde(default)]
    pub depends_on: Vec<ResourceId>,
}

impl<I, O, P> Resource<I, O, P>
where
    I: Serialize + DeserializeOwned,
    O: Serialize + DeserializeOwned,
    P: Serialize + DeserializeOwned,
{
    pub fn new(id: ResourceId, provider_id: P, input: I, output: O) -> Self {
        Self {
            id,
            provider_id,
            input,
            output,
            depends_on: Vec::new(),
        }
    }

    pub fn with_depends_on(mut self, depends_on: Vec<ResourceId>) -> Self {
        self.depends_on = depends_on;
        self
    }

    /// Serialize the record into the bytes kept by the store
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Rebuild a record from bytes produced by [`Resource::to_json`]
    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
