// Copyright (C) 2020-2026  The Blockhouse Technology Limited (TBTL).
//
// This program is free software: you can redistribute it and/or modify it
// under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// This program is distributed in the hope that it will be useful, but
// WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public
// License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Named asynchronous locks shared by all handles of the same document.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, Weak},
};

use futures::lock::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A held lock from the [`LockTable`].  The lock is released on drop.
pub(crate) type NamedGuard = OwnedMutexGuard<()>;

/// A table of asynchronous mutexes addressed by name.
///
/// Entries are dropped once nobody holds or waits for the corresponding lock.
#[derive(Default)]
pub(crate) struct LockTable {
    locks: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl LockTable {
    /// Lock serializing all metadata read-modify-write cycles of a document.
    pub(crate) async fn lock_metadata(&self, document_id: &str) -> NamedGuard {
        self.mutex(format!("metadata/{document_id}"))
            .lock_owned()
            .await
    }

    /// Lock serializing all mutations of a single credential.
    pub(crate) async fn lock_credential(&self, document_id: &str, alias: &str) -> NamedGuard {
        self.mutex(format!("credential/{document_id}/{alias}"))
            .lock_owned()
            .await
    }

    fn mutex(&self, name: String) -> Arc<AsyncMutex<()>> {
        // the map is always left consistent, so a poisoned lock is safe to reuse
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| lock.strong_count() > 0);

        if let Some(mutex) = locks.get(&name).and_then(Weak::upgrade) {
            return mutex;
        }

        let mutex = Arc::new(AsyncMutex::new(()));
        locks.insert(name, Arc::downgrade(&mutex));
        mutex
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_name_is_exclusive() {
        let table = LockTable::default();

        let guard = table.lock_metadata("doc").await;
        assert!(table.mutex("metadata/doc".to_owned()).try_lock().is_none());
        drop(guard);
        assert!(table.mutex("metadata/doc".to_owned()).try_lock().is_some());
    }

    #[tokio::test]
    async fn different_names_do_not_block() {
        let table = LockTable::default();

        let _metadata = table.lock_metadata("doc").await;
        let _first = table.lock_credential("doc", "first").await;

        let second =
            tokio::time::timeout(Duration::from_secs(1), table.lock_credential("doc", "second"))
                .await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn unused_entries_are_dropped() {
        let table = LockTable::default();

        drop(table.lock_credential("doc", "alias").await);
        let _other = table.lock_metadata("other").await;

        let locks = table.locks.lock().unwrap();
        assert_eq!(locks.len(), 1);
        assert!(locks.contains_key("metadata/other"));
    }
}
