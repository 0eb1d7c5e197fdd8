//! The set of resolution type names known to this node.
//!
//! Built once at startup and passed by value to whatever needs it; there is
//! no process-wide registration and no late additions, so every node that
//! starts with the same configuration derives the same `resolution_types`
//! rows. A name registered in a later release is picked up by the next
//! schema initialization.

use tessera_types::{uuid_v5, ResolutionId};

#[derive(Clone, Debug, Default)]
pub struct ResolutionRegistry {
    // First-seen order, duplicates dropped.
    names: Vec<String>,
}

impl ResolutionRegistry {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = Self { names: Vec::new() };
        for name in names {
            let name = name.into();
            if !registry.contains(&name) {
                registry.names.push(name);
            }
        }
        registry
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// The id a registered name maps to in `resolution_types`.
    pub fn type_id(name: &str) -> ResolutionId {
        uuid_v5(name.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_first_seen_order_and_dedups() {
        let registry = ResolutionRegistry::new(["transfer", "deposit", "transfer", "slash"]);
        let names: Vec<_> = registry.names().collect();
        assert_eq!(names, vec!["transfer", "deposit", "slash"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn type_ids_are_stable() {
        assert_eq!(
            ResolutionRegistry::type_id("deposit"),
            uuid_v5(b"deposit"),
        );
    }
}
