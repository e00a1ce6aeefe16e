//! Named registry of long-lived statements.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace};

use crate::error::{DbResult, LockError};
use crate::sync::db::SynchronizedDb;
use crate::sync::statement::SynchronizedStatement;

/// Keeps frequently used statements compiled and findable by name, so call
/// sites pay for SQL preparation once instead of per use.
pub struct StatementCache {
    db: SynchronizedDb,
    statements: Mutex<HashMap<String, Arc<SynchronizedStatement>>>,
}

impl StatementCache {
    pub fn new(db: &SynchronizedDb) -> Self {
        StatementCache {
            db: db.clone(),
            statements: Mutex::new(HashMap::new()),
        }
    }

    fn registry(
        &self,
    ) -> DbResult<MutexGuard<'_, HashMap<String, Arc<SynchronizedStatement>>>> {
        self.statements.lock().map_err(|_| LockError::Poisoned.into())
    }

    /// Compile `sql` and register it under `name`, closing any statement it
    /// displaces.
    pub fn add(&self, name: &str, sql: &str) -> DbResult<Arc<SynchronizedStatement>> {
        let stmt = Arc::new(self.db.compile(sql)?);
        let displaced = self
            .registry()?
            .insert(name.to_owned(), Arc::clone(&stmt));
        if let Some(old) = displaced {
            debug!(name, "replacing cached statement");
            old.close();
        }
        Ok(stmt)
    }

    pub fn get(&self, name: &str) -> Option<Arc<SynchronizedStatement>> {
        self.statements
            .lock()
            .ok()
            .and_then(|map| map.get(name).cloned())
    }

    /// Fetch by name, compiling and caching on a miss.
    pub fn get_or_compile(
        &self,
        name: &str,
        sql: impl FnOnce() -> String,
    ) -> DbResult<Arc<SynchronizedStatement>> {
        if let Some(found) = self.get(name) {
            return Ok(found);
        }
        self.add(name, &sql())
    }

    pub fn len(&self) -> usize {
        self.statements.lock().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> Vec<String> {
        self.statements
            .lock()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Close every statement, swallowing failures, and empty the registry.
    pub fn close_all(&self) {
        let drained: Vec<(String, Arc<SynchronizedStatement>)> = match self.statements.lock() {
            Ok(mut map) => map.drain().collect(),
            Err(_) => return,
        };
        for (name, stmt) in drained {
            trace!(name = %name, "closing cached statement");
            stmt.close();
        }
    }
}

impl Drop for StatementCache {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> (SynchronizedDb, StatementCache) {
        let db = SynchronizedDb::open_in_memory().unwrap();
        db.exec("CREATE TABLE t (v text)").unwrap();
        let cache = StatementCache::new(&db);
        (db, cache)
    }

    #[test]
    fn add_get_and_names() {
        let (_db, cache) = cache();
        assert!(cache.is_empty());
        cache.add("count", "SELECT COUNT(*) FROM t").unwrap();
        assert_eq!(cache.len(), 1);
        let found = cache.get("count").unwrap();
        assert_eq!(found.count([]).unwrap(), 0);
        assert!(cache.get("missing").is_none());
        assert_eq!(cache.names(), vec!["count".to_string()]);
    }

    #[test]
    fn add_replaces_and_closes_displaced() {
        let (_db, cache) = cache();
        let old = cache.add("q", "SELECT COUNT(*) FROM t").unwrap();
        let new = cache.add("q", "SELECT COUNT(v) FROM t").unwrap();
        assert!(old.is_closed());
        assert!(!new.is_closed());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("q").unwrap().sql(), "SELECT COUNT(v) FROM t");
    }

    #[test]
    fn get_or_compile_compiles_once() {
        let (_db, cache) = cache();
        let first = cache
            .get_or_compile("c", || "SELECT COUNT(*) FROM t".to_string())
            .unwrap();
        let second = cache
            .get_or_compile("c", || unreachable!("should hit the cache"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn close_all_closes_and_clears() {
        let (_db, cache) = cache();
        let a = cache.add("a", "SELECT COUNT(*) FROM t").unwrap();
        let b = cache.add("b", "SELECT v FROM t").unwrap();
        cache.close_all();
        assert!(cache.is_empty());
        assert!(a.is_closed());
        assert!(b.is_closed());
        // Idempotent.
        cache.close_all();
    }
}
