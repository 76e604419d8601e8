//! Sheet definition cache and per-sheet write serialization

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::db::{sheets, Sheet};
use crate::{Error, Result};

/// Lazily populated cache of sheet definitions.
///
/// Owned by the service; entries are filled on first lookup and dropped
/// when a sheet is edited or deleted. A miss only caches what it loaded if
/// no invalidation happened since the load started.
#[derive(Debug, Default)]
pub struct SheetRegistry {
    sheets: RwLock<HashMap<Uuid, Sheet>>,
    /// Bumped by every `invalidate`, under the write lock
    generation: AtomicU64,
}

impl SheetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached sheet, loading it from the store on a miss
    pub async fn get(&self, pool: &SqlitePool, sheet_id: Uuid) -> Result<Sheet> {
        if let Some(sheet) = self.sheets.read().await.get(&sheet_id) {
            return Ok(sheet.clone());
        }

        let observed = self.generation();
        let sheet = sheets::get_sheet(pool, sheet_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Sheet {} not found", sheet_id)))?;

        self.cache_if_current(sheet.clone(), observed).await;
        Ok(sheet)
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Cache a definition loaded while the generation was `observed`.
    /// Returns false (and caches nothing) if an invalidation raced the load.
    async fn cache_if_current(&self, sheet: Sheet, observed: u64) -> bool {
        let mut cached = self.sheets.write().await;
        if self.generation() != observed {
            debug!("Sheet {} changed while loading, not cached", sheet.id);
            return false;
        }
        debug!("Cached sheet {}", sheet.id);
        cached.insert(sheet.id, sheet);
        true
    }

    /// Store a definition just written
    pub async fn insert(&self, sheet: Sheet) {
        self.sheets.write().await.insert(sheet.id, sheet);
    }

    pub async fn invalidate(&self, sheet_id: Uuid) {
        let mut cached = self.sheets.write().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        cached.remove(&sheet_id);
    }

    pub async fn len(&self) -> usize {
        self.sheets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sheets.read().await.is_empty()
    }
}

/// One async mutex per sheet; held across read-match-write sequences
#[derive(Debug, Default)]
pub struct SheetLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl SheetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `sheet_id`
    pub async fn lock(&self, sheet_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(sheet_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Drop the lock entry of a deleted (or never existing) sheet
    pub async fn forget(&self, sheet_id: Uuid) {
        self.locks.lock().await.remove(&sheet_id);
    }

    /// Number of sheets with a lock entry
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.locks.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;
    use std::time::Duration;

    #[tokio::test]
    async fn test_registry_caches_until_invalidated() {
        let pool = init_memory_database().await.unwrap();
        let sheet = sheets::create_sheet(&pool, "Band", &["A".to_string()]).await.unwrap();
        let registry = SheetRegistry::new();

        assert_eq!(registry.get(&pool, sheet.id).await.unwrap().name, "Band");
        assert_eq!(registry.len().await, 1);

        // Stale until invalidated
        sheets::update_sheet(&pool, sheet.id, "Jazz Band", &[]).await.unwrap();
        assert_eq!(registry.get(&pool, sheet.id).await.unwrap().name, "Band");

        registry.invalidate(sheet.id).await;
        assert_eq!(registry.get(&pool, sheet.id).await.unwrap().name, "Jazz Band");
    }

    #[tokio::test]
    async fn test_load_racing_an_invalidation_is_not_cached() {
        let pool = init_memory_database().await.unwrap();
        let sheet = sheets::create_sheet(&pool, "Band", &["A".to_string()]).await.unwrap();
        let registry = SheetRegistry::new();

        // A lookup misses and reads the pre-edit definition...
        let observed = registry.generation();
        let stale = sheets::get_sheet(&pool, sheet.id).await.unwrap().unwrap();

        // ...while an edit commits and invalidates
        sheets::update_sheet(&pool, sheet.id, "Band", &["A".to_string(), "B".to_string()])
            .await
            .unwrap();
        registry.invalidate(sheet.id).await;

        assert!(!registry.cache_if_current(stale, observed).await);
        assert!(registry.is_empty().await);
        assert_eq!(registry.get(&pool, sheet.id).await.unwrap().columns, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_registry_missing_sheet() {
        let pool = init_memory_database().await.unwrap();
        let registry = SheetRegistry::new();
        let err = registry.get(&pool, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_same_sheet_is_serialized() {
        let locks = Arc::new(SheetLocks::new());
        let sheet_id = Uuid::new_v4();

        let guard = locks.lock(sheet_id).await;
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(sheet_id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // Other sheets are independent
        let _other = locks.lock(Uuid::new_v4()).await;

        drop(guard);
        contender.await.unwrap();
    }
}
