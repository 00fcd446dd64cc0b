use tokio::sync::Mutex;

use super::{Store, StoreError, StoreState};

/// In-process store. State is lost when the value is dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with `state`.
    #[must_use]
    pub fn with_state(state: StoreState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

impl Store for MemoryStore {
    async fn read<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&StoreState) -> R + Send,
        R: Send,
    {
        let guard = self.state.lock().await;
        f(&guard)
    }

    async fn transact<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut StoreState) -> Result<R, E> + Send,
        R: Send,
        E: From<StoreError> + Send,
    {
        let mut guard = self.state.lock().await;
        let mut draft = guard.clone();
        let out = f(&mut draft)?;
        *guard = draft;
        Ok(out)
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::entry;
    use alloy_primitives::Address;

    #[tokio::test]
    async fn test_failed_transaction_leaves_state_untouched() {
        let store = MemoryStore::new();
        let payee = Address::repeat_byte(0x01);

        let result: Result<(), StoreError> = store
            .transact(|state| {
                state.append_ledger(payee, entry("p1"));
                Err(StoreError::Io(std::io::Error::other("boom")))
            })
            .await;
        assert!(result.is_err());

        let (len, next) = store
            .read(|state| (state.ledger(&payee).len(), state.next_seq))
            .await;
        assert_eq!(len, 0);
        assert_eq!(next, 1);
    }

    #[tokio::test]
    async fn test_successful_transaction_commits() {
        let store = MemoryStore::new();
        let payee = Address::repeat_byte(0x02);
        let seq = store
            .transact(|state| Ok::<_, StoreError>(state.append_ledger(payee, entry("p1"))))
            .await
            .unwrap();
        assert_eq!(seq, 1);
        let len = store.read(|state| state.ledger(&payee).len()).await;
        assert_eq!(len, 1);
    }
}
