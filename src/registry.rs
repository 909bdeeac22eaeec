use std::sync::{Arc, LazyLock};

use crate::hasher::{Djb, Fnv1a, Foldhash, OneAtATime, Xxh3};
use crate::{Error, KeyFunction, KeyFunctionId, Result};

/// Catalog of key function families addressable by [`KeyFunctionId`].
///
/// The registry is immutable once shared: clones share the same family
/// instances and can be handed to builders on other threads. Identifiers are
/// enumerated in registration order.
#[derive(Debug, Clone)]
pub struct KeyFunctionRegistry {
    families: Vec<(KeyFunctionId, Arc<dyn KeyFunction>)>,
}

static GLOBAL: LazyLock<KeyFunctionRegistry> = LazyLock::new(KeyFunctionRegistry::default);

impl Default for KeyFunctionRegistry {
    /// Registry holding every built-in family.
    fn default() -> Self {
        Self::empty()
            .with(KeyFunctionId::DJB, Djb)
            .with(KeyFunctionId::FNV1A, Fnv1a)
            .with(KeyFunctionId::OAT, OneAtATime)
            .with(KeyFunctionId::XXH3, Xxh3)
            .with(KeyFunctionId::FOLDHASH, Foldhash)
    }
}

impl KeyFunctionRegistry {
    /// Creates a registry with no families.
    pub fn empty() -> Self {
        Self {
            families: Vec::new(),
        }
    }

    /// Process-wide registry of the built-in families.
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Adds `family` under `id`, replacing any family already registered
    /// with that identifier while keeping its position.
    pub fn register(&mut self, id: KeyFunctionId, family: impl KeyFunction + 'static) -> &mut Self {
        let family: Arc<dyn KeyFunction> = Arc::new(family);
        match self.families.iter_mut().find(|(existing, _)| *existing == id) {
            Some(slot) => slot.1 = family,
            None => self.families.push((id, family)),
        }
        self
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with(mut self, id: KeyFunctionId, family: impl KeyFunction + 'static) -> Self {
        self.register(id, family);
        self
    }

    /// Looks up the family registered under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownIdentifier`] if `id` is not registered.
    pub fn get(&self, id: &KeyFunctionId) -> Result<Arc<dyn KeyFunction>> {
        self.families
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, family)| family.clone())
            .ok_or(Error::UnknownIdentifier(*id))
    }

    pub fn contains(&self, id: &KeyFunctionId) -> bool {
        self.families.iter().any(|(existing, _)| existing == id)
    }

    /// Name of the family registered under `id`.
    pub fn name(&self, id: &KeyFunctionId) -> Option<&str> {
        self.families
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, family)| family.name())
    }

    /// All registered identifiers, in registration order.
    pub fn identifiers(&self) -> impl Iterator<Item = KeyFunctionId> + '_ {
        self.families.iter().map(|(id, _)| *id)
    }

    pub fn len(&self) -> usize {
        self.families.len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Constant(u64);

    impl KeyFunction for Constant {
        fn name(&self) -> &str {
            "constant"
        }

        fn hash(&self, _key: &[u8], _seed: u64) -> u64 {
            self.0
        }
    }

    #[test]
    fn test_builtin_registry() {
        let registry = KeyFunctionRegistry::global();
        let ids = registry.identifiers().collect::<Vec<_>>();
        assert_eq!(
            ids,
            vec![
                KeyFunctionId::DJB,
                KeyFunctionId::FNV1A,
                KeyFunctionId::OAT,
                KeyFunctionId::XXH3,
                KeyFunctionId::FOLDHASH,
            ]
        );
        assert_eq!(registry.len(), 5);
        assert_eq!(registry.name(&KeyFunctionId::DJB), Some("djb"));
        assert_eq!(registry.name(&KeyFunctionId::FOLDHASH), Some("foldhash"));
        assert_eq!(registry.get(&KeyFunctionId::XXH3).unwrap().name(), "xxh3");
    }

    #[test]
    fn test_unknown_identifier() {
        let unknown: KeyFunctionId = "00000000-0000-0000-0000-000000000001".parse().unwrap();
        let registry = KeyFunctionRegistry::default();
        assert!(!registry.contains(&unknown));
        assert_eq!(registry.name(&unknown), None);
        match registry.get(&unknown) {
            Err(Error::UnknownIdentifier(id)) => assert_eq!(id, unknown),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(KeyFunctionRegistry::empty().get(&KeyFunctionId::DJB).is_err());
    }

    #[test]
    fn test_register_replaces_in_place() {
        let custom: KeyFunctionId = "00000000-0000-0000-0000-0000000000aa".parse().unwrap();
        let mut registry = KeyFunctionRegistry::default();
        registry.register(custom, Constant(1));
        registry.register(KeyFunctionId::DJB, Constant(2));

        let ids = registry.identifiers().collect::<Vec<_>>();
        assert_eq!(ids.len(), 6);
        assert_eq!(ids[0], KeyFunctionId::DJB);
        assert_eq!(ids[5], custom);
        assert_eq!(registry.name(&KeyFunctionId::DJB), Some("constant"));
        assert_eq!(registry.get(&KeyFunctionId::DJB).unwrap().hash(b"x", 0), 2);

        // the shared global registry is untouched
        assert_eq!(KeyFunctionRegistry::global().name(&KeyFunctionId::DJB), Some("djb"));
    }
}
