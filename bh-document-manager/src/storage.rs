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

//! This module defines the interface of the document store, and provides an in-memory
//! implementation of it.
//!
//! A [`DocumentStore`] is always bound to a single document manager identifier.  Document
//! identifiers are only unique within that namespace, and a store never exposes documents of
//! other managers even when the underlying backend is shared.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use futures::{future::BoxFuture, FutureExt as _};

/// Error type returned by [`DocumentStore`] implementations.
#[derive(strum_macros::Display, Debug, PartialEq, Clone)]
pub enum StorageError {
    /// The document record does not exist.
    #[strum(to_string = "Document `{0}` not found")]
    DocumentNotFound(String),

    /// A document record with the same identifier already exists.
    #[strum(to_string = "Document `{0}` already exists")]
    DocumentAlreadyExists(String),

    /// The storage backend failed.
    #[strum(to_string = "Storage backend failure")]
    Backend,
}

impl bherror::BhError for StorageError {}

/// Result type used by the [`DocumentStore`] interface.
pub type StorageResult<T> = bherror::Result<T, StorageError>;

/// Persistent storage of document records and their opaque blobs.
///
/// Each document record holds a set of blobs addressed by a string key.  The store does not
/// interpret the blobs in any way.
pub trait DocumentStore: Send + Sync {
    /// The identifier of the document manager this store is bound to.
    fn manager_id(&self) -> &str;

    /// Create an empty document record.
    ///
    /// Fails with [`StorageError::DocumentAlreadyExists`] if the identifier is taken.
    fn create_document<'a>(&'a self, document_id: &'a str) -> BoxFuture<'a, StorageResult<()>>;

    /// Whether the document record exists.
    fn contains_document<'a>(&'a self, document_id: &'a str)
        -> BoxFuture<'a, StorageResult<bool>>;

    /// Identifiers of all the document records.
    fn list_documents(&self) -> BoxFuture<'_, StorageResult<Vec<String>>>;

    /// Delete the document record together with all of its blobs.
    ///
    /// Returns `false` if the record didn't exist.
    fn delete_document<'a>(&'a self, document_id: &'a str) -> BoxFuture<'a, StorageResult<bool>>;

    /// Read the blob stored under `key`.
    fn get<'a>(
        &'a self,
        document_id: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, StorageResult<Option<Vec<u8>>>>;

    /// Store the blob under `key`, replacing the previous value.
    ///
    /// Fails with [`StorageError::DocumentNotFound`] if the document record doesn't exist.
    fn put<'a>(
        &'a self,
        document_id: &'a str,
        key: &'a str,
        value: Vec<u8>,
    ) -> BoxFuture<'a, StorageResult<()>>;

    /// Remove the blob stored under `key`, returning whether it existed.
    fn remove<'a>(&'a self, document_id: &'a str, key: &'a str)
        -> BoxFuture<'a, StorageResult<bool>>;

    /// Keys of all the blobs of the document.
    fn keys<'a>(&'a self, document_id: &'a str) -> BoxFuture<'a, StorageResult<Vec<String>>>;
}

type Documents = BTreeMap<String, BTreeMap<String, Vec<u8>>>;
type Records = HashMap<String, Documents>;

static NO_DOCUMENTS: Documents = BTreeMap::new();

/// In-memory storage backend which can be shared by multiple document managers.
///
/// Use [`InMemoryStorage::scoped`] to obtain a [`DocumentStore`] bound to a manager.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    // manager id -> document id -> key -> blob
    records: Arc<Mutex<Records>>,
}

impl InMemoryStorage {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a [`DocumentStore`] view of this backend bound to `manager_id`.
    pub fn scoped(&self, manager_id: impl Into<String>) -> ScopedInMemoryStore {
        ScopedInMemoryStore {
            manager_id: manager_id.into(),
            storage: self.clone(),
        }
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Records>> {
        // `PoisonError` holds the guard, so it can't be used as the error source
        self.records
            .lock()
            .map_err(|_| bherror::Error::root(StorageError::Backend).ctx("lock poisoned"))
    }
}

/// A [`DocumentStore`] over [`InMemoryStorage`] bound to a single manager identifier.
#[derive(Clone)]
pub struct ScopedInMemoryStore {
    manager_id: String,
    storage: InMemoryStorage,
}

impl ScopedInMemoryStore {
    fn read_documents<T>(
        &self,
        f: impl FnOnce(&Documents) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let records = self.storage.lock()?;
        f(records.get(&self.manager_id).unwrap_or(&NO_DOCUMENTS))
    }

    /// The namespace of the manager is only created along with its first document.
    fn update_documents<T>(
        &self,
        f: impl FnOnce(Option<&mut Documents>) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut records = self.storage.lock()?;
        f(records.get_mut(&self.manager_id))
    }
}

fn document_not_found(document_id: &str) -> bherror::Error<StorageError> {
    bherror::Error::root(StorageError::DocumentNotFound(document_id.to_owned()))
}

impl DocumentStore for ScopedInMemoryStore {
    fn manager_id(&self) -> &str {
        &self.manager_id
    }

    fn create_document<'a>(&'a self, document_id: &'a str) -> BoxFuture<'a, StorageResult<()>> {
        let result = self.storage.lock().and_then(|mut records| {
            let documents = records.entry(self.manager_id.clone()).or_default();
            if documents.contains_key(document_id) {
                return Err(bherror::Error::root(StorageError::DocumentAlreadyExists(
                    document_id.to_owned(),
                )));
            }
            documents.insert(document_id.to_owned(), BTreeMap::new());
            Ok(())
        });
        futures::future::ready(result).boxed()
    }

    fn contains_document<'a>(
        &'a self,
        document_id: &'a str,
    ) -> BoxFuture<'a, StorageResult<bool>> {
        let result = self.read_documents(|documents| Ok(documents.contains_key(document_id)));
        futures::future::ready(result).boxed()
    }

    fn list_documents(&self) -> BoxFuture<'_, StorageResult<Vec<String>>> {
        let result = self.read_documents(|documents| Ok(documents.keys().cloned().collect()));
        futures::future::ready(result).boxed()
    }

    fn delete_document<'a>(&'a self, document_id: &'a str) -> BoxFuture<'a, StorageResult<bool>> {
        let result = self.update_documents(|documents| {
            Ok(documents.is_some_and(|documents| documents.remove(document_id).is_some()))
        });
        futures::future::ready(result).boxed()
    }

    fn get<'a>(
        &'a self,
        document_id: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, StorageResult<Option<Vec<u8>>>> {
        let result = self.read_documents(|documents| {
            Ok(documents
                .get(document_id)
                .and_then(|blobs| blobs.get(key))
                .cloned())
        });
        futures::future::ready(result).boxed()
    }

    fn put<'a>(
        &'a self,
        document_id: &'a str,
        key: &'a str,
        value: Vec<u8>,
    ) -> BoxFuture<'a, StorageResult<()>> {
        let result = self.update_documents(|documents| {
            let blobs = documents
                .and_then(|documents| documents.get_mut(document_id))
                .ok_or_else(|| document_not_found(document_id))?;
            blobs.insert(key.to_owned(), value);
            Ok(())
        });
        futures::future::ready(result).boxed()
    }

    fn remove<'a>(
        &'a self,
        document_id: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, StorageResult<bool>> {
        let result = self.update_documents(|documents| {
            Ok(documents
                .and_then(|documents| documents.get_mut(document_id))
                .is_some_and(|blobs| blobs.remove(key).is_some()))
        });
        futures::future::ready(result).boxed()
    }

    fn keys<'a>(&'a self, document_id: &'a str) -> BoxFuture<'a, StorageResult<Vec<String>>> {
        let result = self.read_documents(|documents| {
            let blobs = documents
                .get(document_id)
                .ok_or_else(|| document_not_found(document_id))?;
            Ok(blobs.keys().cloned().collect())
        });
        futures::future::ready(result).boxed()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn blobs_are_scoped_to_documents() {
        let store = InMemoryStorage::new().scoped("manager");

        store.create_document("doc-1").await.unwrap();
        store.create_document("doc-2").await.unwrap();
        store.put("doc-1", "metadata", vec![1]).await.unwrap();
        store.put("doc-1", "credential/a", vec![2]).await.unwrap();

        assert_eq!(store.get("doc-1", "metadata").await.unwrap(), Some(vec![1]));
        assert_eq!(store.get("doc-2", "metadata").await.unwrap(), None);
        assert_eq!(
            store.keys("doc-1").await.unwrap(),
            ["credential/a", "metadata"]
        );
        assert!(store.remove("doc-1", "credential/a").await.unwrap());
        assert!(!store.remove("doc-1", "credential/a").await.unwrap());
    }

    #[tokio::test]
    async fn creating_an_existing_document_fails() {
        let store = InMemoryStorage::new().scoped("manager");

        store.create_document("doc").await.unwrap();
        let err = store.create_document("doc").await.unwrap_err();

        assert_matches!(err.error, StorageError::DocumentAlreadyExists(id) if id == "doc");
    }

    #[tokio::test]
    async fn put_requires_the_document_record() {
        let store = InMemoryStorage::new().scoped("manager");

        let err = store.put("missing", "metadata", vec![]).await.unwrap_err();

        assert_matches!(err.error, StorageError::DocumentNotFound(id) if id == "missing");
    }

    #[tokio::test]
    async fn delete_removes_all_blobs() {
        let store = InMemoryStorage::new().scoped("manager");

        store.create_document("doc").await.unwrap();
        store.put("doc", "metadata", vec![1]).await.unwrap();

        assert!(store.delete_document("doc").await.unwrap());
        assert!(!store.delete_document("doc").await.unwrap());
        assert!(!store.contains_document("doc").await.unwrap());
        assert_eq!(store.get("doc", "metadata").await.unwrap(), None);
    }

    #[tokio::test]
    async fn managers_sharing_a_backend_are_isolated() {
        let storage = InMemoryStorage::new();
        let first = storage.scoped("first");
        let second = storage.scoped("second");

        first.create_document("doc").await.unwrap();
        first.put("doc", "metadata", vec![1]).await.unwrap();

        assert_eq!(first.list_documents().await.unwrap(), ["doc"]);
        assert!(second.list_documents().await.unwrap().is_empty());
        assert_eq!(second.get("doc", "metadata").await.unwrap(), None);

        // the same identifier is free in another namespace
        second.create_document("doc").await.unwrap();
        assert_eq!(second.get("doc", "metadata").await.unwrap(), None);
    }

    #[tokio::test]
    async fn reads_leave_no_trace_in_the_backend() {
        let storage = InMemoryStorage::new();
        let store = storage.scoped("reader");

        assert!(!store.contains_document("doc").await.unwrap());
        assert!(store.list_documents().await.unwrap().is_empty());
        assert_eq!(store.get("doc", "metadata").await.unwrap(), None);
        assert_matches!(
            store.keys("doc").await.unwrap_err().error,
            StorageError::DocumentNotFound(_)
        );
        assert!(!store.remove("doc", "metadata").await.unwrap());
        assert!(!store.delete_document("doc").await.unwrap());
        assert!(store.put("doc", "metadata", vec![1]).await.is_err());

        assert!(storage.records.lock().unwrap().is_empty());

        store.create_document("doc").await.unwrap();
        assert_eq!(storage.records.lock().unwrap().len(), 1);
    }
}
