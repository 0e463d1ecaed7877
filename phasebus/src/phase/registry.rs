//! Phase registry and its builder.

use super::names;
use crate::errors::BuildError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A named position in a registry's total order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Phase {
    name: String,
    position: usize,
}

impl Phase {
    /// Returns the phase name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the zero-based position in the registry.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }
}

/// An immutable, ordered list of phases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseRegistry {
    name: String,
    phases: Vec<Phase>,
    index: HashMap<String, usize>,
}

impl PhaseRegistry {
    /// Starts building a registry.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> PhaseRegistryBuilder {
        PhaseRegistryBuilder::new(name)
    }

    /// Builds a registry from a list of phase names.
    ///
    /// # Errors
    ///
    /// Returns an error if the list is empty or repeats a name.
    pub fn from_names<I, S>(name: impl Into<String>, phases: I) -> Result<Self, BuildError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::builder(name).phases(phases).build()
    }

    /// The standard inbound registry.
    #[must_use]
    pub fn inbound() -> Self {
        Self::standard("inbound", names::INBOUND)
    }

    /// The standard outbound registry.
    #[must_use]
    pub fn outbound() -> Self {
        Self::standard("outbound", names::OUTBOUND)
    }

    fn standard(name: &str, phases: &[&str]) -> Self {
        let phases: Vec<Phase> = phases
            .iter()
            .enumerate()
            .map(|(position, name)| Phase {
                name: (*name).to_string(),
                position,
            })
            .collect();
        let index = phases
            .iter()
            .map(|p| (p.name.clone(), p.position))
            .collect();
        Self {
            name: name.to_string(),
            phases,
            index,
        }
    }

    /// Returns the registry name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the position of a phase, if registered.
    #[must_use]
    pub fn position(&self, phase: &str) -> Option<usize> {
        self.index.get(phase).copied()
    }

    /// Returns the phase at a position.
    #[must_use]
    pub fn get(&self, position: usize) -> Option<&Phase> {
        self.phases.get(position)
    }

    /// Returns true if the phase is registered.
    #[must_use]
    pub fn contains(&self, phase: &str) -> bool {
        self.index.contains_key(phase)
    }

    /// Returns all phases in order.
    #[must_use]
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Returns the number of phases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    /// Returns true if the registry has no phases.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }
}

/// Builder that validates phase names before freezing a registry.
#[derive(Debug, Clone)]
pub struct PhaseRegistryBuilder {
    name: String,
    phases: Vec<String>,
}

impl PhaseRegistryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phases: Vec::new(),
        }
    }

    /// Appends a phase.
    #[must_use]
    pub fn phase(mut self, phase: impl Into<String>) -> Self {
        self.phases.push(phase.into());
        self
    }

    /// Appends several phases in order.
    #[must_use]
    pub fn phases<I, S>(mut self, phases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.phases.extend(phases.into_iter().map(Into::into));
        self
    }

    /// Inserts a phase directly after an existing one, or appends it when the
    /// anchor is missing.
    #[must_use]
    pub fn phase_after(mut self, phase: impl Into<String>, anchor: &str) -> Self {
        let phase = phase.into();
        match self.phases.iter().position(|p| p == anchor) {
            Some(pos) => self.phases.insert(pos + 1, phase),
            None => self.phases.push(phase),
        }
        self
    }

    /// Freezes the registry.
    ///
    /// # Errors
    ///
    /// Returns `EmptyRegistry` or `DuplicatePhase`.
    pub fn build(self) -> Result<PhaseRegistry, BuildError> {
        if self.phases.is_empty() {
            return Err(BuildError::EmptyRegistry { registry: self.name });
        }

        let mut index = HashMap::with_capacity(self.phases.len());
        let mut phases = Vec::with_capacity(self.phases.len());
        for (position, name) in self.phases.into_iter().enumerate() {
            if index.insert(name.clone(), position).is_some() {
                return Err(BuildError::DuplicatePhase {
                    registry: self.name,
                    phase: name,
                });
            }
            phases.push(Phase { name, position });
        }

        Ok(PhaseRegistry {
            name: self.name,
            phases,
            index,
        })
    }
}
