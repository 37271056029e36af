//! Composable staged pipeline over a dynamically produced collection.
//!
//! A [`Pipeline`] starts from an asynchronous zero-argument source and queues
//! transformation stages; nothing runs until a terminal operation
//! ([`Pipeline::apply`] or [`Pipeline::list`]) drives it. Every stage is a
//! barrier: all elements of one stage are finished before the next stage
//! starts, so there is no streaming overlap between stages. Within a stage
//! elements are processed concurrently (async stages fan out on the runtime,
//! CPU-bound stages on the blocking pool) and the relative input order of
//! surviving elements is preserved.
//!
//! An error returned by any stage function aborts the whole run. Per-element
//! tolerance (a dead page, an unparsable offer) is expressed by returning
//! `None` from the stage function instead.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use std::time::Instant;

use futures::future::{try_join_all, BoxFuture};
use tokio::task;
use tracing::debug;

use crate::Result;

/// Which occurrence survives when [`Pipeline::distinct_keep`] collapses
/// elements sharing a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keep {
    First,
    Last,
}

pub struct Pipeline<T> {
    items: BoxFuture<'static, Result<Vec<T>>>,
}

impl<T: Send + 'static> Pipeline<T> {
    pub fn new<F, Fut>(source: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<T>>> + Send + 'static,
    {
        Self {
            items: Box::pin(async move { source().await }),
        }
    }

    /// CPU-bound transform applied to every element on the blocking pool.
    pub fn map<U, F>(self, mapper: F) -> Pipeline<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let items = self.items;
        let mapper = Arc::new(mapper);
        Pipeline {
            items: Box::pin(async move {
                let input = items.await?;
                let started = Instant::now();
                let handles: Vec<_> = input
                    .into_iter()
                    .map(|item| {
                        let mapper = mapper.clone();
                        task::spawn_blocking(move || mapper(item))
                    })
                    .collect();
                let mut output = Vec::with_capacity(handles.len());
                for handle in handles {
                    output.push(handle.await?);
                }
                debug!(stage = "map", items = output.len(), elapsed = ?started.elapsed());
                Ok(output)
            }),
        }
    }

    /// Fused asynchronous map + filter: elements mapped to `None` are
    /// dropped, errors abort the run.
    pub fn reform<U, F, Fut>(self, mapper: F) -> Pipeline<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<U>>> + Send + 'static,
    {
        let items = self.items;
        Pipeline {
            items: Box::pin(async move {
                let input = items.await?;
                let started = Instant::now();
                let arrived = input.len();
                let gathered = try_join_all(input.into_iter().map(|item| mapper(item))).await?;
                let output: Vec<U> = gathered.into_iter().flatten().collect();
                debug!(
                    stage = "reform",
                    items = output.len(),
                    dropped = arrived - output.len(),
                    elapsed = ?started.elapsed(),
                );
                Ok(output)
            }),
        }
    }

    /// CPU-bound map + filter: the transformed element survives only when it
    /// is present and passes the predicate. Dispatched like [`Pipeline::map`].
    pub fn sieve<U, F, P>(self, mapper: F, predicate: P) -> Pipeline<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Option<U> + Send + Sync + 'static,
        P: Fn(&U) -> bool + Send + Sync + 'static,
    {
        let items = self.items;
        let mapper = Arc::new(mapper);
        let predicate = Arc::new(predicate);
        Pipeline {
            items: Box::pin(async move {
                let input = items.await?;
                let started = Instant::now();
                let handles: Vec<_> = input
                    .into_iter()
                    .map(|item| {
                        let mapper = mapper.clone();
                        let predicate = predicate.clone();
                        task::spawn_blocking(move || {
                            mapper(item).filter(|mapped| predicate(mapped))
                        })
                    })
                    .collect();
                let mut output = Vec::new();
                for handle in handles {
                    if let Some(mapped) = handle.await? {
                        output.push(mapped);
                    }
                }
                debug!(stage = "sieve", items = output.len(), elapsed = ?started.elapsed());
                Ok(output)
            }),
        }
    }

    /// Concatenates sub-collections, keeping element order within each
    /// sub-collection and the order across source elements.
    pub fn flatten<U>(self) -> Pipeline<U>
    where
        T: IntoIterator<Item = U>,
        U: Send + 'static,
    {
        let items = self.items;
        Pipeline {
            items: Box::pin(async move {
                let input = items.await?;
                Ok(input.into_iter().flatten().collect())
            }),
        }
    }

    /// One element per key; the last occurrence wins, sitting at the first
    /// occurrence's position. See [`Pipeline::distinct_keep`] for first-wins.
    pub fn distinct<K, F>(self, key: F) -> Self
    where
        K: Eq + Hash + Send + 'static,
        F: Fn(&T) -> K + Send + 'static,
    {
        self.distinct_keep(key, Keep::Last)
    }

    pub fn distinct_keep<K, F>(self, key: F, keep: Keep) -> Self
    where
        K: Eq + Hash + Send + 'static,
        F: Fn(&T) -> K + Send + 'static,
    {
        let items = self.items;
        Pipeline {
            items: Box::pin(async move {
                let input = items.await?;
                let mut positions: HashMap<K, usize> = HashMap::new();
                let mut slots: Vec<T> = Vec::new();
                for item in input {
                    match positions.entry(key(&item)) {
                        Entry::Occupied(seen) => {
                            if keep == Keep::Last {
                                slots[*seen.get()] = item;
                            }
                        }
                        Entry::Vacant(empty) => {
                            empty.insert(slots.len());
                            slots.push(item);
                        }
                    }
                }
                Ok(slots)
            }),
        }
    }

    /// Replays all queued stages, then concurrently feeds every surviving
    /// element to the consumer, returning the consumer outputs.
    pub async fn apply<R, C, Fut>(self, consumer: C) -> Result<Vec<R>>
    where
        R: Send + 'static,
        C: Fn(T) -> Fut,
        Fut: Future<Output = Result<R>> + Send,
    {
        let input = self.items.await?;
        try_join_all(input.into_iter().map(|item| consumer(item))).await
    }

    /// Terminal materialization with an identity consumer.
    pub async fn list(self) -> Result<Vec<T>> {
        self.items.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FlatmineError;

    async fn words() -> Result<Vec<String>> {
        Ok(vec![
            "  Titiyo  ".to_string(),
            "  Eminem ".to_string(),
            " Madonna".to_string(),
        ])
    }

    #[tokio::test]
    async fn source_materializes() {
        let out = Pipeline::new(|| async { Ok(vec![23, 3, 7, 0, 10, -18]) })
            .list()
            .await
            .unwrap();
        assert_eq!(out, vec![23, 3, 7, 0, 10, -18]);

        let empty: Vec<i32> = Pipeline::new(|| async { Ok(Vec::new()) })
            .list()
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn map_fans_out_and_preserves_order() {
        let out = Pipeline::new(words)
            .map(|word| word.trim().to_string())
            .list()
            .await
            .unwrap();
        assert_eq!(out, vec!["Titiyo", "Eminem", "Madonna"]);
    }

    #[tokio::test]
    async fn reform_drops_absent_results() {
        let out = Pipeline::new(|| async { Ok(vec![1u32, 2, 3, 4]) })
            .reform(|n| async move { Ok((n % 2 == 0).then_some(n * 10)) })
            .list()
            .await
            .unwrap();
        assert_eq!(out, vec![20, 40]);
    }

    #[tokio::test]
    async fn flatten_then_sieve_fuses_transform_and_filter() {
        let out = Pipeline::new(|| async { Ok(vec![vec![1, 2], vec![3]]) })
            .flatten()
            .sieve(|n: i32| Some(n * 2), |doubled| *doubled > 2)
            .list()
            .await
            .unwrap();
        assert_eq!(out, vec![4, 6]);
    }

    #[tokio::test]
    async fn sieve_absence_drops_before_predicate() {
        let out = Pipeline::new(|| async { Ok(vec![1, 2, 3]) })
            .sieve(|n: i32| (n != 2).then_some(n), |_| true)
            .list()
            .await
            .unwrap();
        assert_eq!(out, vec![1, 3]);
    }

    #[tokio::test]
    async fn distinct_keeps_last_occurrence_at_first_position() {
        let out = Pipeline::new(|| async {
            Ok(vec![("a", 1), ("b", 2), ("a", 3), ("c", 4), ("b", 5)])
        })
        .distinct(|pair| pair.0)
        .list()
        .await
        .unwrap();
        assert_eq!(out, vec![("a", 3), ("b", 5), ("c", 4)]);
    }

    #[tokio::test]
    async fn distinct_keep_first_is_available() {
        let out = Pipeline::new(|| async {
            Ok(vec![("a", 1), ("b", 2), ("a", 3)])
        })
        .distinct_keep(|pair| pair.0, Keep::First)
        .list()
        .await
        .unwrap();
        assert_eq!(out, vec![("a", 1), ("b", 2)]);
    }

    #[tokio::test]
    async fn apply_returns_consumer_outputs() {
        let out = Pipeline::new(|| async { Ok(vec![1, 2, 3]) })
            .apply(|n| async move { Ok(n + 100) })
            .await
            .unwrap();
        assert_eq!(out, vec![101, 102, 103]);
    }

    #[tokio::test]
    async fn stage_error_aborts_the_run() {
        let result = Pipeline::new(|| async { Ok(vec![1, 2, 3]) })
            .reform(|n: i32| async move {
                if n == 2 {
                    Err(FlatmineError::Rates("boom".to_string()))
                } else {
                    Ok(Some(n))
                }
            })
            .list()
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn stages_run_in_registration_order() {
        let out = Pipeline::new(|| async { Ok(vec![vec![1, 1, 2], vec![2, 3]]) })
            .flatten()
            .distinct(|n: &i32| *n)
            .map(|n| n * 10)
            .list()
            .await
            .unwrap();
        assert_eq!(out, vec![10, 20, 30]);
    }
}
