//! Name → session map behind the operator API.

use super::session::{Session, SessionInfo};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<BTreeMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<Session>) {
        self.sessions
            .write()
            .insert(session.name().to_string(), session);
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Session>> {
        self.sessions.write().remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sessions.read().contains_key(name)
    }

    pub fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Sorted by name.
    pub fn list(&self) -> Vec<SessionInfo> {
        self.all().iter().map(|s| s.info()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

/// `Robot-` followed by 8 hex digits.
pub fn generate_name() -> String {
    format!("Robot-{:08x}", rand::random::<u32>())
}

/// A generated name not yet used in `registry`.
pub fn unique_name(registry: &SessionRegistry) -> String {
    loop {
        let name = generate_name();
        if !registry.contains(&name) {
            return name;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StationConfig;
    use crate::station::link::MockLink;
    use crate::world::WorldStore;
    use std::sync::atomic::AtomicBool;

    fn session(name: &str) -> Arc<Session> {
        Session::new(
            name,
            Box::new(MockLink::new()),
            Arc::new(WorldStore::new()),
            Arc::new(StationConfig::default()),
            Arc::new(AtomicBool::new(true)),
        )
    }

    #[test]
    fn test_generated_name_format() {
        let name = generate_name();
        assert!(name.starts_with("Robot-"));
        let suffix = &name["Robot-".len()..];
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_registry_lifecycle() {
        let registry = SessionRegistry::new();
        registry.insert(session("Robot-bbbbbbbb"));
        registry.insert(session("Robot-aaaaaaaa"));
        assert_eq!(registry.len(), 2);

        let names: Vec<String> = registry.list().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["Robot-aaaaaaaa", "Robot-bbbbbbbb"]);

        assert!(registry.get("Robot-aaaaaaaa").is_some());
        assert!(registry.remove("Robot-aaaaaaaa").is_some());
        assert!(registry.get("Robot-aaaaaaaa").is_none());
        assert!(!registry.is_empty());
    }
}
