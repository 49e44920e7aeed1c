// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use bytes::Bytes;

use crate::{DurableStore, Result};

/// A view of a store restricted to keys that start with a fixed prefix.
///
/// Keys passed in are prefixed before reaching the inner store and stripped again on the way
/// out. [`read_all`][DurableStore::read_all] only returns keys inside the namespace.
#[derive(Debug, Clone)]
pub struct Namespaced<S> {
    inner: S,
    prefix: String,
}

impl<S> Namespaced<S> {
    /// Creates a view of `inner` under `prefix`.
    pub fn new(inner: S, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    /// Returns the namespace prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the wrapped store.
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn full_key(&self, key: &str) -> String {
        let mut full = String::with_capacity(self.prefix.len() + key.len());
        full.push_str(&self.prefix);
        full.push_str(key);
        full
    }
}

impl<S: DurableStore> DurableStore for Namespaced<S> {
    async fn read_all(&self) -> Result<Vec<(String, Bytes)>> {
        let all = self.inner.read_all().await?;
        Ok(all
            .into_iter()
            .filter_map(|(key, value)| key.strip_prefix(&self.prefix).map(|key| (key.to_owned(), value)))
            .collect())
    }

    async fn read(&self, key: &str) -> Result<Option<Bytes>> {
        self.inner.read(&self.full_key(key)).await
    }

    async fn write(&self, key: &str, value: Bytes) -> Result<()> {
        self.inner.write(&self.full_key(key), value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(&self.full_key(key)).await
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;
    use crate::MemoryStore;

    #[test]
    fn namespaces_do_not_see_each_other() {
        block_on(async {
            let store = MemoryStore::new();
            let cache = Namespaced::new(store.clone(), "cache/");
            let queue = Namespaced::new(store.clone(), "queue/");

            cache.write("x", Bytes::from_static(b"c")).await.unwrap();
            queue.write("x", Bytes::from_static(b"q")).await.unwrap();

            assert_eq!(cache.read("x").await.unwrap(), Some(Bytes::from_static(b"c")));
            assert_eq!(queue.read_all().await.unwrap(), vec![("x".to_owned(), Bytes::from_static(b"q"))]);
            assert_eq!(store.len(), 2);

            cache.delete("x").await.unwrap();
            assert_eq!(store.keys(), vec!["queue/x".to_owned()]);
            assert_eq!(queue.prefix(), "queue/");
        });
    }
}
