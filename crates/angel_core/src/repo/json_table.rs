//! Shared plumbing for JSON-document repositories.
//!
//! A document is a JSON array of records. It is loaded into [`Rows`], an
//! id-indexed view that keeps document order, mutated in memory, and written
//! back whole under the document lock.

use crate::repo::RepoResult;
use crate::store::{FileStore, Outcome};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::marker::PhantomData;

/// A record persisted as one element of a JSON document.
pub(crate) trait Record: Serialize + DeserializeOwned + Clone {
    type Id: Clone + Eq + Hash + Display;

    /// Document name under the data directory.
    const DOCUMENT: &'static str;

    fn record_id(&self) -> Self::Id;
    fn assign_id(&mut self, id: Self::Id);
}

/// Document rows with an id index for O(1) lookup.
pub(crate) struct Rows<T: Record> {
    items: Vec<T>,
    index: HashMap<T::Id, usize>,
}

impl<T: Record> Rows<T> {
    fn from_vec(items: Vec<T>) -> Self {
        let mut rows = Self {
            items,
            index: HashMap::new(),
        };
        rows.reindex();
        rows
    }

    // First occurrence wins when a hand-edited document repeats an id.
    fn reindex(&mut self) {
        self.index.clear();
        for (position, item) in self.items.iter().enumerate() {
            self.index.entry(item.record_id()).or_insert(position);
        }
    }

    pub fn get(&self, id: &T::Id) -> Option<&T> {
        self.index.get(id).map(|position| &self.items[*position])
    }

    pub fn get_mut(&mut self, id: &T::Id) -> Option<&mut T> {
        match self.index.get(id) {
            Some(position) => self.items.get_mut(*position),
            None => None,
        }
    }

    pub fn contains(&self, id: &T::Id) -> bool {
        self.index.contains_key(id)
    }

    pub fn push(&mut self, item: T) {
        self.index.entry(item.record_id()).or_insert(self.items.len());
        self.items.push(item);
    }

    /// Removes every row carrying `id`; returns whether any was removed.
    pub fn remove(&mut self, id: &T::Id) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.record_id() != *id);
        let removed = self.items.len() != before;
        if removed {
            self.reindex();
        }
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

impl<T: Record<Id = i64>> Rows<T> {
    pub fn max_id(&self) -> i64 {
        self.items
            .iter()
            .map(Record::record_id)
            .max()
            .unwrap_or(0)
    }
}

/// Typed access to one JSON document.
pub(crate) struct JsonTable<T> {
    store: FileStore,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> JsonTable<T> {
    pub fn new(store: FileStore) -> Self {
        Self {
            store,
            _record: PhantomData,
        }
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    /// Loads all rows in document order.
    pub fn all(&self) -> RepoResult<Vec<T>> {
        Ok(self.store.read::<Vec<T>>(T::DOCUMENT)?)
    }

    pub fn find(&self, id: &T::Id) -> RepoResult<Option<T>> {
        let rows = Rows::from_vec(self.all()?);
        Ok(rows.get(id).cloned())
    }

    /// Runs `mutate` under the document lock; writes back on `Changed`.
    pub fn mutate<R>(
        &self,
        mutate: impl FnOnce(&mut Rows<T>) -> RepoResult<Outcome<R>>,
    ) -> RepoResult<R> {
        self.store.update(T::DOCUMENT, |document: &mut Vec<T>| {
            let mut rows = Rows::from_vec(std::mem::take(document));
            let outcome = mutate(&mut rows);
            *document = rows.into_vec();
            outcome
        })
    }

    /// Applies `edit` to the row with `id`; `Ok(false)` when absent.
    ///
    /// An error from `edit` aborts the write.
    pub fn modify(
        &self,
        id: &T::Id,
        edit: impl FnOnce(&mut T) -> RepoResult<()>,
    ) -> RepoResult<bool> {
        self.mutate(|rows| {
            let Some(row) = rows.get_mut(id) else {
                return Ok(Outcome::Unchanged(false));
            };
            let mut candidate = row.clone();
            edit(&mut candidate)?;
            *row = candidate;
            Ok(Outcome::Changed(true))
        })
    }

    /// Hard-removes the row with `id`.
    pub fn remove(&self, id: &T::Id) -> RepoResult<bool> {
        self.mutate(|rows| {
            if rows.remove(id) {
                Ok(Outcome::Changed(true))
            } else {
                Ok(Outcome::Unchanged(false))
            }
        })
    }
}

impl<T: Record<Id = i64>> JsonTable<T> {
    /// Appends `record` with a freshly allocated id and returns that id.
    pub fn insert_with_next_id(&self, mut record: T) -> RepoResult<i64> {
        self.mutate(|rows| {
            let id = self.store.next_sequence(T::DOCUMENT, rows.max_id())?;
            record.assign_id(id);
            rows.push(record);
            Ok(Outcome::Changed(id))
        })
    }
}
