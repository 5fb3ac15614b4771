//! Registry of in-flight scan tasks
//!
//! Tracks one cancellation token per active channel scan so a scan can
//! be stopped from outside the task running it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Clone, Default)]
pub struct ScanRegistry {
    active: Arc<RwLock<HashMap<i64, CancellationToken>>>,
}

impl ScanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel scan. Returns `None` when one is already
    /// running for the channel.
    pub fn register(&self, channel_id: i64) -> Option<CancellationToken> {
        let mut active = self.active.write();
        if active.contains_key(&channel_id) {
            return None;
        }
        let token = CancellationToken::new();
        active.insert(channel_id, token.clone());
        Some(token)
    }

    /// Cancel a running scan. Returns whether one was active.
    pub fn cancel(&self, channel_id: i64) -> bool {
        let active = self.active.read();
        match active.get(&channel_id) {
            Some(token) => {
                token.cancel();
                info!(channel_id = channel_id, "Scan cancellation requested");
                true
            }
            None => false,
        }
    }

    pub fn unregister(&self, channel_id: i64) {
        self.active.write().remove(&channel_id);
    }

    pub fn is_active(&self, channel_id: i64) -> bool {
        self.active.read().contains_key(&channel_id)
    }

    pub fn active_channels(&self) -> Vec<i64> {
        self.active.read().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_register_rejected() {
        let registry = ScanRegistry::new();
        assert!(registry.register(-1001).is_some());
        assert!(registry.register(-1001).is_none());
        registry.unregister(-1001);
        assert!(registry.register(-1001).is_some());
    }

    #[test]
    fn test_cancel_fires_token() {
        let registry = ScanRegistry::new();
        let token = registry.register(-1001).unwrap();
        assert!(!token.is_cancelled());
        assert!(registry.cancel(-1001));
        assert!(token.is_cancelled());
        assert!(!registry.cancel(-2002));
    }
}
