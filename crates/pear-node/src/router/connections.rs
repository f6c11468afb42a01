//! One router binding per remote key.

use std::sync::Arc;

use dashmap::DashMap;

use super::Router;

struct Binding {
    router: Arc<Router>,
    connections: usize,
}

/// Tracks live connections by remote key.
///
/// The first connection from a key creates its binding; later ones reuse
/// it. The binding goes away with the last connection.
#[derive(Default)]
pub struct ConnectionRegistry {
    bindings: DashMap<[u8; 32], Binding>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Router bound to `key`, created with `make` if this is its first connection.
    pub fn acquire<F>(&self, key: [u8; 32], make: F) -> Arc<Router>
    where
        F: FnOnce() -> Router,
    {
        let mut binding = self.bindings.entry(key).or_insert_with(|| Binding {
            router: Arc::new(make()),
            connections: 0,
        });
        binding.connections += 1;
        Arc::clone(&binding.router)
    }

    /// Records that one connection from `key` closed.
    pub fn release(&self, key: &[u8; 32]) {
        let removed = self
            .bindings
            .remove_if_mut(key, |_, binding| {
                binding.connections = binding.connections.saturating_sub(1);
                binding.connections == 0
            })
            .is_some();
        if removed {
            tracing::debug!(peer = %hex::encode(&key[..8]), "peer binding dropped");
        }
    }

    /// Live connections from `key`.
    pub fn connections(&self, key: &[u8; 32]) -> usize {
        self.bindings.get(key).map(|b| b.connections).unwrap_or(0)
    }

    /// Number of distinct connected keys.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry").field("peers", &self.bindings.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::context::AppContext;
    use crate::home::AppHome;
    use pear_p2p::NodeKeypair;

    #[test]
    fn test_binding_shared_until_last_connection_closes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(
            AppContext::new(AppHome::new(dir.path()), Config::default(), NodeKeypair::generate()).unwrap(),
        );
        let registry = ConnectionRegistry::new();
        let key = [9u8; 32];

        let first = registry.acquire(key, || Router::new(Arc::clone(&ctx)));
        let second = registry.acquire(key, || panic!("binding must be reused"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.connections(&key), 2);

        registry.release(&key);
        assert_eq!(registry.len(), 1);
        registry.release(&key);
        assert!(registry.is_empty());
        registry.release(&key);
        assert_eq!(registry.connections(&key), 0);
    }
}
