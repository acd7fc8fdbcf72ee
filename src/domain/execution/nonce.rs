//! Per-identity sequence numbers for submissions

use std::collections::HashMap;

use tokio::sync::Mutex;

/// Hands out strictly increasing nonces per signing identity.
/// Allocation for all identities goes through one async mutex.
#[derive(Default)]
pub struct NonceAllocator {
    next: Mutex<HashMap<String, u64>>,
}

impl NonceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an identity at `nonce` unless it already moved past it
    pub async fn seed(&self, identity: &str, nonce: u64) {
        let mut next = self.next.lock().await;
        let entry = next.entry(identity.to_string()).or_insert(nonce);
        *entry = (*entry).max(nonce);
    }

    pub async fn allocate(&self, identity: &str) -> u64 {
        let mut next = self.next.lock().await;
        let entry = next.entry(identity.to_string()).or_insert(0);
        let nonce = *entry;
        *entry += 1;
        nonce
    }

    /// Hand back a nonce that never reached the chain. Only the most recent
    /// allocation can be returned; anything older would leave a gap.
    pub async fn release(&self, identity: &str, nonce: u64) -> bool {
        let mut next = self.next.lock().await;
        match next.get_mut(identity) {
            Some(entry) if *entry == nonce + 1 => {
                *entry = nonce;
                true
            }
            _ => false,
        }
    }

    pub async fn peek(&self, identity: &str) -> u64 {
        self.next.lock().await.get(identity).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_concurrent_allocation_never_repeats() {
        let allocator = Arc::new(NonceAllocator::new());
        allocator.seed("searcher", 40).await;

        let mut handles = Vec::new();
        for _ in 0..32 {
            let allocator = Arc::clone(&allocator);
            handles.push(tokio::spawn(async move { allocator.allocate("searcher").await }));
        }
        let mut nonces = Vec::new();
        for handle in handles {
            nonces.push(handle.await.unwrap());
        }
        nonces.sort();
        assert_eq!(nonces, (40..72).collect::<Vec<_>>());
        assert_eq!(allocator.peek("searcher").await, 72);
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let allocator = NonceAllocator::new();
        assert_eq!(allocator.allocate("a").await, 0);
        assert_eq!(allocator.allocate("a").await, 1);
        assert_eq!(allocator.allocate("b").await, 0);
        // seeding never moves an identity backwards
        allocator.seed("a", 0).await;
        assert_eq!(allocator.allocate("a").await, 2);
    }

    #[tokio::test]
    async fn test_release_returns_only_the_latest_nonce() {
        let allocator = NonceAllocator::new();
        let first = allocator.allocate("searcher").await;
        let second = allocator.allocate("searcher").await;

        assert!(!allocator.release("searcher", first).await);
        assert!(allocator.release("searcher", second).await);
        assert_eq!(allocator.peek("searcher").await, second);
        assert_eq!(allocator.allocate("searcher").await, second);
        assert!(!allocator.release("unknown", 0).await);
    }
}
