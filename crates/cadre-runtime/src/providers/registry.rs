//! Ordered registry of live capabilities.
//!
//! Registration order is significant: it is the fallback traversal order
//! and the fan-out tie-break. The registry is read-only while an
//! execution is in flight; callers mutate it only between executions.

use std::fmt;
use std::sync::Arc;

use super::ProviderCapability;

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    entries: Vec<(String, Arc<dyn ProviderCapability>)>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a capability.
    ///
    /// Re-registering an existing id replaces the capability but keeps its
    /// original position.
    pub fn register(&mut self, capability: Arc<dyn ProviderCapability>) {
        let id = capability.id().to_string();
        match self.entries.iter_mut().find(|(existing, _)| *existing == id) {
            Some(entry) => {
                tracing::info!(provider = %id, "Replacing registered provider");
                entry.1 = capability;
            }
            None => {
                tracing::info!(provider = %id, position = self.entries.len(), "Registered provider");
                self.entries.push((id, capability));
            }
        }
    }

    /// Builder form of [`ProviderRegistry::register`].
    pub fn with(mut self, capability: Arc<dyn ProviderCapability>) -> Self {
        self.register(capability);
        self
    }

    /// Remove a capability. Later entries shift up one position.
    pub fn remove(&mut self, id: &str) -> Option<Arc<dyn ProviderCapability>> {
        let index = self.entries.iter().position(|(existing, _)| existing == id)?;
        Some(self.entries.remove(index).1)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn ProviderCapability>> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, capability)| capability)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Ids in registration order.
    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|(id, _)| id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Capabilities in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn ProviderCapability>)> {
        self.entries.iter().map(|(id, c)| (id.as_str(), c))
    }

    /// `[preferred]` followed by every other id in registration order.
    ///
    /// `preferred` comes first even when it is not registered.
    pub fn fallback_order<'a>(&'a self, preferred: &'a str) -> Vec<&'a str> {
        std::iter::once(preferred)
            .chain(
                self.entries
                    .iter()
                    .map(|(id, _)| id.as_str())
                    .filter(|id| *id != preferred),
            )
            .collect()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;

    fn registry(ids: &[&str]) -> ProviderRegistry {
        ids.iter().fold(ProviderRegistry::new(), |reg, id| {
            reg.with(Arc::new(ScriptedProvider::ok(id, "x")))
        })
    }

    #[test]
    fn test_registration_order_is_kept() {
        let reg = registry(&["a", "b", "c"]);
        assert_eq!(reg.ids(), vec!["a", "b", "c"]);
        assert_eq!(reg.len(), 3);
        assert!(reg.contains("b"));
        assert!(!reg.contains("z"));
    }

    #[test]
    fn test_reregister_keeps_position() {
        let mut reg = registry(&["a", "b", "c"]);
        reg.register(Arc::new(ScriptedProvider::failing("b", "replaced")));
        assert_eq!(reg.ids(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_remove_shifts_later_entries() {
        let mut reg = registry(&["a", "b", "c"]);
        assert!(reg.remove("a").is_some());
        assert!(reg.remove("a").is_none());
        assert_eq!(reg.ids(), vec!["b", "c"]);
    }

    #[test]
    fn test_fallback_order() {
        let reg = registry(&["a", "b", "c"]);
        assert_eq!(reg.fallback_order("b"), vec!["b", "a", "c"]);
        assert_eq!(reg.fallback_order("a"), vec!["a", "b", "c"]);
        assert_eq!(reg.fallback_order("zz"), vec!["zz", "a", "b", "c"]);
    }

    proptest::proptest! {
        /// Preferred first, then every other id exactly once in registration order.
        #[test]
        fn prop_fallback_order_is_preferred_then_registration(
            ids in proptest::collection::btree_set("[a-e]{1,3}", 1..8),
            pick in 0usize..16,
        ) {
            let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
            let reg = registry(&ids);
            let preferred = ids[pick % ids.len()];

            let order = reg.fallback_order(preferred);
            proptest::prop_assert_eq!(order.len(), ids.len());
            proptest::prop_assert_eq!(order[0], preferred);
            let rest: Vec<&str> = ids.iter().copied().filter(|id| *id != preferred).collect();
            proptest::prop_assert_eq!(&order[1..], rest.as_slice());
        }
    }
}
