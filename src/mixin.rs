//! Capability composition over prototypes.
//!
//! Applying a [`Capability`] derives a new prototype that records the tag.
//! "Already has X" is answered from that registry along the chain, so
//! applying a capability twice is a no-op.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::proto::Proto;

struct CapabilityInner {
    name: String,
    requires: Vec<Capability>,
}

/// A named capability tag. Identity is the allocation, not the name.
#[derive(Clone)]
pub struct Capability(Arc<CapabilityInner>);

impl Capability {
    pub fn new(name: impl Into<String>) -> Self {
        Self::requiring(name, [])
    }

    /// A capability that may only be applied on top of `requires`.
    pub fn requiring(name: impl Into<String>, requires: impl IntoIterator<Item = Capability>) -> Self {
        Self(Arc::new(CapabilityInner {
            name: name.into(),
            requires: requires.into_iter().collect(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn requires(&self) -> &[Capability] {
        &self.0.requires
    }
}

impl PartialEq for Capability {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Capability {}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capability({})", self.0.name)
    }
}

impl Proto {
    pub fn has_capability(&self, capability: &Capability) -> bool {
        self.chain()
            .any(|p| p.0.capabilities.iter().any(|c| c == capability))
    }

    /// Every capability applied along the chain, nearest first.
    pub fn capabilities(&self) -> Vec<Capability> {
        self.chain()
            .flat_map(|p| p.0.capabilities.iter().cloned())
            .collect()
    }

    /// Derive a prototype carrying `capability`. Returns `self` unchanged
    /// when the capability is already present.
    pub fn with_capability(&self, capability: &Capability) -> Result<Proto> {
        if self.has_capability(capability) {
            return Ok(self.clone());
        }
        if let Some(missing) = capability
            .requires()
            .iter()
            .find(|req| !self.has_capability(req))
        {
            return Err(Error::invalid_argument(format!(
                "capability \"{}\" requires \"{}\" on \"{}\"",
                capability.name(),
                missing.name(),
                self.name()
            )));
        }
        tracing::trace!(proto = self.name(), capability = capability.name(), "applying capability");
        Ok(self.derive(
            format!("{}+{}", self.name(), capability.name()),
            vec![capability.clone()],
        ))
    }
}

/// Apply `capabilities` to `base` in order.
pub fn compose(base: &Proto, capabilities: &[Capability]) -> Result<Proto> {
    capabilities
        .iter()
        .try_fold(base.clone(), |proto, cap| proto.with_capability(cap))
}
