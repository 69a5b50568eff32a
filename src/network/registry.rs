//! Current-session-for-character registry.
//!
//! Guarantees at most one open trade per character: both participants
//! map to the same shared session handle, and the mappings are removed
//! in the same step the handler closes the session.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::trade::session::{CharacterId, TradeSession};

/// Shared handle to one session. All mutations serialize through the
/// mutex, which stands in for the single game-logic thread of the
/// surrounding server.
pub type SessionHandle = Arc<Mutex<TradeSession>>;

/// Errors opening a trade.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A character cannot trade with itself.
    #[error("cannot open a trade with oneself")]
    SelfTrade,

    /// One of the characters is already in an open trade.
    #[error("character {} is already trading", .0.short_hex())]
    AlreadyTrading(CharacterId),
}

/// Maps characters to their one open trade session.
pub struct TradeRegistry {
    by_character: RwLock<BTreeMap<CharacterId, SessionHandle>>,
    slots_per_side: usize,
}

impl TradeRegistry {
    /// Create an empty registry. `slots_per_side` fixes the table size
    /// of every session it opens.
    pub fn new(slots_per_side: usize) -> Self {
        Self {
            by_character: RwLock::new(BTreeMap::new()),
            slots_per_side,
        }
    }

    /// Open a session between two characters and register it as the
    /// current session for both. Fails without side effects if either
    /// is already trading.
    pub async fn open(
        &self,
        source: CharacterId,
        target: CharacterId,
    ) -> Result<SessionHandle, RegistryError> {
        if source == target {
            return Err(RegistryError::SelfTrade);
        }

        let mut map = self.by_character.write().await;
        for who in [source, target] {
            if map.contains_key(&who) {
                return Err(RegistryError::AlreadyTrading(who));
            }
        }

        let id = *uuid::Uuid::new_v4().as_bytes();
        let handle = Arc::new(Mutex::new(TradeSession::new(
            id,
            source,
            target,
            self.slots_per_side,
        )));
        map.insert(source, handle.clone());
        map.insert(target, handle.clone());
        Ok(handle)
    }

    /// The character's current session, if any.
    pub async fn session_for(&self, who: CharacterId) -> Option<SessionHandle> {
        self.by_character.read().await.get(&who).cloned()
    }

    /// Drop the mapping for both participants of a closed session.
    pub async fn release(&self, participants: [CharacterId; 2]) {
        let mut map = self.by_character.write().await;
        for who in participants {
            map.remove(&who);
        }
    }

    /// Number of characters currently mapped to a session.
    pub async fn characters_trading(&self) -> usize {
        self.by_character.read().await.len()
    }

    /// Drop mappings whose session has already closed. Safety net for
    /// paths that closed a session without releasing it.
    ///
    /// The map lock is never held while waiting on a session mutex:
    /// the close paths hold the session mutex while calling
    /// [`release`](Self::release), so blocking here would deadlock
    /// against them. A session busy right now is swept on the next
    /// pass instead.
    pub async fn cleanup(&self) {
        let snapshot: Vec<(CharacterId, SessionHandle)> = {
            let map = self.by_character.read().await;
            map.iter().map(|(who, handle)| (*who, handle.clone())).collect()
        };

        let mut stale = Vec::new();
        for (who, handle) in snapshot {
            if let Ok(session) = handle.try_lock() {
                if session.is_closed() {
                    stale.push(who);
                }
            }
        }
        if stale.is_empty() {
            return;
        }

        let mut map = self.by_character.write().await;
        for who in stale {
            map.remove(&who);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: CharacterId = CharacterId([1; 16]);
    const B: CharacterId = CharacterId([2; 16]);
    const C: CharacterId = CharacterId([3; 16]);

    #[tokio::test]
    async fn test_open_registers_both_sides() {
        let registry = TradeRegistry::new(8);
        let handle = registry.open(A, B).await.unwrap();

        let a_session = registry.session_for(A).await.unwrap();
        let b_session = registry.session_for(B).await.unwrap();
        assert!(Arc::ptr_eq(&handle, &a_session));
        assert!(Arc::ptr_eq(&handle, &b_session));
        assert!(registry.session_for(C).await.is_none());
        assert_eq!(registry.characters_trading().await, 2);
    }

    #[tokio::test]
    async fn test_one_trade_per_character() {
        let registry = TradeRegistry::new(8);
        registry.open(A, B).await.unwrap();

        assert_eq!(
            registry.open(A, C).await.unwrap_err(),
            RegistryError::AlreadyTrading(A)
        );
        assert_eq!(
            registry.open(C, B).await.unwrap_err(),
            RegistryError::AlreadyTrading(B)
        );
        // The failed opens left no mapping behind for C.
        assert!(registry.session_for(C).await.is_none());
    }

    #[tokio::test]
    async fn test_self_trade_rejected() {
        let registry = TradeRegistry::new(8);
        assert_eq!(registry.open(A, A).await.unwrap_err(), RegistryError::SelfTrade);
    }

    #[tokio::test]
    async fn test_release_clears_both() {
        let registry = TradeRegistry::new(8);
        registry.open(A, B).await.unwrap();
        registry.release([A, B]).await;

        assert!(registry.session_for(A).await.is_none());
        assert!(registry.session_for(B).await.is_none());
        assert_eq!(registry.characters_trading().await, 0);

        // Both characters are free to trade again.
        registry.open(A, C).await.unwrap();
    }

    #[tokio::test]
    async fn test_release_completes_while_sweep_is_running() {
        use std::time::Duration;

        // The close paths release while still holding the session
        // mutex; a concurrent sweep must not block them.
        let registry = Arc::new(TradeRegistry::new(8));
        let handle = registry.open(A, B).await.unwrap();
        let guard = handle.lock().await;

        let sweep = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.cleanup().await })
        };
        tokio::task::yield_now().await;

        tokio::time::timeout(Duration::from_secs(2), registry.release([A, B]))
            .await
            .expect("release blocked behind the sweep");
        drop(guard);
        sweep.await.unwrap();

        assert!(registry.session_for(A).await.is_none());
    }

    #[tokio::test]
    async fn test_cleanup_skips_busy_sessions_until_next_pass() {
        let registry = TradeRegistry::new(8);
        let handle = registry.open(A, B).await.unwrap();
        handle.lock().await.cancel(None);

        let guard = handle.lock().await;
        registry.cleanup().await;
        assert!(registry.session_for(A).await.is_some());
        drop(guard);

        registry.cleanup().await;
        assert!(registry.session_for(A).await.is_none());
    }

    #[tokio::test]
    async fn test_cleanup_drops_closed_sessions() {
        let registry = TradeRegistry::new(8);
        let handle = registry.open(A, B).await.unwrap();
        registry.open(C, CharacterId([4; 16])).await.unwrap();

        handle.lock().await.cancel(None);
        registry.cleanup().await;

        assert!(registry.session_for(A).await.is_none());
        assert!(registry.session_for(B).await.is_none());
        assert!(registry.session_for(C).await.is_some());
    }
}
