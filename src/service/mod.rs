use log::{debug, warn};
use parking_lot::RwLock;

use crate::{
    sale::{SaleEngine, SaleError},
    store::{SaleStore, StoreError},
};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Sale(#[from] SaleError),
    #[error("state not persisted: {0}")]
    Store(#[from] StoreError),
    #[error("{0} is a read and cannot be executed as a write")]
    ReadOnly(&'static str),
}

/// Single-writer front of a [`SaleEngine`].
///
/// Mutations run one at a time against a staged copy of the engine. The copy
/// is persisted (when a store is attached) and only then becomes the
/// committed state, so neither a rejected call nor a failed write leaves a
/// trace. Reads share the lock and see the last committed state.
pub struct SaleService {
    engine: RwLock<SaleEngine>,
    store: Option<SaleStore>,
}

impl SaleService {
    pub fn in_memory(engine: SaleEngine) -> Self {
        Self {
            engine: RwLock::new(engine),
            store: None,
        }
    }

    pub fn with_store(engine: SaleEngine, store: SaleStore) -> Self {
        Self {
            engine: RwLock::new(engine),
            store: Some(store),
        }
    }

    /// Loads the engine from `store`, or starts from `fresh` and writes it
    /// out when the state file does not exist yet.
    pub fn open(store: SaleStore, fresh: impl FnOnce() -> SaleEngine) -> Result<Self, StoreError> {
        let engine = if store.exists() {
            store.load()?
        } else {
            let engine = fresh();
            store.save(&engine)?;
            engine
        };
        Ok(Self::with_store(engine, store))
    }

    pub fn read<R>(&self, f: impl FnOnce(&SaleEngine) -> R) -> R {
        f(&self.engine.read())
    }

    pub fn execute<R, E>(
        &self,
        f: impl FnOnce(&mut SaleEngine) -> Result<R, E>,
    ) -> Result<R, ServiceError>
    where
        E: Into<ServiceError>,
    {
        let mut committed = self.engine.write();
        let mut staged = committed.clone();
        let out = match f(&mut staged) {
            Ok(out) => out,
            Err(err) => {
                let err = err.into();
                debug!("call rejected: {err}");
                return Err(err);
            }
        };
        if let Some(store) = &self.store {
            if let Err(err) = store.save(&staged) {
                warn!("rolling back call, {err}");
                return Err(err.into());
            }
        }
        *committed = staged;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, sync::Arc, thread};

    use super::*;
    use crate::{address::Address, config::SaleConfig};

    const FUND: Address = Address::new([0xf0; 20]);

    #[test]
    fn rejected_call_leaves_state_and_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = SaleStore::new(dir.path().join("gro.state.json"));
        let service = SaleService::open(store.clone(), || SaleEngine::new(&SaleConfig::new(FUND))).unwrap();
        let before = fs::read(store.path()).unwrap();

        let err = service
            .execute(|e| e.allocate_presale_tokens(&Address::new([4; 20]), FUND, "0x", 100, "0x-"))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Sale(SaleError::Unauthorized { .. })));
        assert_eq!(service.read(|e| e.total_supply()), 0);
        assert_eq!(fs::read(store.path()).unwrap(), before);
    }

    #[test]
    fn committed_calls_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = SaleStore::new(dir.path().join("gro.state.json"));
        let service = SaleService::open(store.clone(), || SaleEngine::new(&SaleConfig::new(FUND))).unwrap();
        service.execute(|e| e.update_price(&FUND, 3)).unwrap();
        drop(service);

        let reopened = SaleService::open(store, || unreachable!("state exists")).unwrap();
        assert_eq!(reopened.read(|e| e.current_price()), 3);
    }

    #[test]
    fn concurrent_buys_keep_supply_consistent() {
        let service = Arc::new(SaleService::in_memory(SaleEngine::new(&SaleConfig::new(FUND))));
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let service = Arc::clone(&service);
                thread::spawn(move || {
                    for _ in 0..10 {
                        service
                            .execute(|e| e.buy(&Address::new([i + 1; 20]), 100_000_000_000_000_000))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        service.read(|e| {
            assert_eq!(e.total_supply(), 80 * 1_000 * crate::amount::TOKEN_SCALE);
            assert_eq!(e.native_balance_of(&FUND), 80 * 100_000_000_000_000_000);
            e.ledger().check_invariants().unwrap();
        });
    }
}
