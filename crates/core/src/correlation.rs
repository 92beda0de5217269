//! Correlation ids and the composite-id scheme used for fan-out requests.
//!
//! A composite id joins a parent id and one or more discriminators with a
//! single fixed delimiter: `row0007:subjective:bullets`. No component may be
//! empty or contain the delimiter, so splitting always recovers exactly the
//! components that were joined.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PipelineError;

/// Separator between the components of a composite id.
pub const DELIMITER: char = ':';

/// Caller-assigned token that travels with a request and comes back verbatim
/// with its response.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build a composite id from a parent and its discriminators.
    pub fn compose<S: AsRef<str>>(
        parent: &str,
        discriminators: &[S],
    ) -> Result<Self, PipelineError> {
        if discriminators.is_empty() {
            return Err(PipelineError::Validation(format!(
                "composite id for '{parent}' needs at least one discriminator"
            )));
        }
        check_component(parent)?;
        let mut id = parent.to_string();
        for disc in discriminators {
            check_component(disc.as_ref())?;
            id.push(DELIMITER);
            id.push_str(disc.as_ref());
        }
        Ok(Self(id))
    }

    /// Split a composite id into its parent and exactly `discriminators`
    /// trailing components.
    pub fn decompose(&self, discriminators: usize) -> Result<CompositeId, PipelineError> {
        let parts: Vec<&str> = self.0.split(DELIMITER).collect();
        if parts.len() != discriminators + 1 || parts.iter().any(|p| p.is_empty()) {
            return Err(PipelineError::Validation(format!(
                "'{}' is not a composite id with {} discriminator(s)",
                self.0, discriminators
            )));
        }
        Ok(CompositeId {
            parent: parts[0].to_string(),
            discriminators: parts[1..].iter().map(|p| p.to_string()).collect(),
        })
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for CorrelationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A decomposed composite id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeId {
    pub parent: String,
    pub discriminators: Vec<String>,
}

impl CompositeId {
    pub fn encode(&self) -> Result<CorrelationId, PipelineError> {
        CorrelationId::compose(&self.parent, &self.discriminators)
    }
}

fn check_component(component: &str) -> Result<(), PipelineError> {
    if component.is_empty() {
        return Err(PipelineError::Validation(
            "composite id components must not be empty".to_string(),
        ));
    }
    if component.contains(DELIMITER) {
        return Err(PipelineError::Validation(format!(
            "composite id component '{component}' contains the delimiter '{DELIMITER}'"
        )));
    }
    Ok(())
}
