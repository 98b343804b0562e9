//! Folding many outcomes into one.

use std::{future::Future, sync::Arc};

use async_stream::stream;
use futures::{
    stream::{FuturesUnordered, StreamExt},
    Stream,
};
use tokio::sync::Semaphore;

use crate::{chunk::Chunk, source::ByteSource, ByteSourceError, Result};

/// Passes items through until the first failure, which is emitted as the
/// last item. The sequence then completes normally.
pub fn until_first_failure<S, T>(items: S) -> impl Stream<Item = Result<T>>
where
    S: Stream<Item = Result<T>>,
{
    stream! {
        let mut items = Box::pin(items);
        while let Some(item) = items.next().await {
            let failed = item.is_err();
            yield item;
            if failed {
                break;
            }
        }
    }
}

impl ByteSource {
    /// The chunks of this source as outcomes, ending after the first failure.
    pub fn outcomes(&self) -> impl Stream<Item = Result<Chunk>> + Send {
        until_first_failure(self.bytes())
    }
}

/// All values, or the first failure in iteration order.
pub fn combine<T, I>(results: I) -> Result<Vec<T>>
where
    I: IntoIterator<Item = Result<T>>,
{
    results.into_iter().collect()
}

pub fn successes<T, I>(results: I) -> Vec<T>
where
    I: IntoIterator<Item = Result<T>>,
{
    results.into_iter().filter_map(|r| r.ok()).collect()
}

pub fn failures<T, I>(results: I) -> Vec<ByteSourceError>
where
    I: IntoIterator<Item = Result<T>>,
{
    results.into_iter().filter_map(|r| r.err()).collect()
}

/// Runs the operations one after another. The first failure is returned
/// and the remaining operations are never started.
pub async fn execute_sequentially<T, F, Fut, I>(operations: I) -> Result<Vec<T>>
where
    I: IntoIterator<Item = F>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut values = Vec::new();
    for (index, operation) in operations.into_iter().enumerate() {
        match operation().await {
            Ok(value) => values.push(value),
            Err(err) => {
                log::debug!("outcome: operation {} failed: {}", index, err);
                return Err(err);
            }
        }
    }
    Ok(values)
}

/// Runs the operations with at most `max_concurrency` of them in flight.
///
/// Every operation runs to completion. Values come back in input order;
/// on failure the first failing operation in input order is reported.
pub async fn combine_concurrently<T, F, Fut, I>(
    operations: I,
    max_concurrency: usize,
) -> Result<Vec<T>>
where
    I: IntoIterator<Item = F>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if max_concurrency < 1 {
        return Err(ByteSourceError::InvalidArgument(
            "max concurrency must be at least 1".to_owned(),
        ));
    }

    let semaphore = Arc::new(Semaphore::new(max_concurrency));
    let mut tasks = FuturesUnordered::new();
    for (index, operation) in operations.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        tasks.push(async move {
            let result = match semaphore.acquire().await {
                Ok(_permit) => operation().await,
                Err(err) => Err(ByteSourceError::other(err)),
            };
            (index, result)
        });
    }

    let mut results: Vec<Option<Result<T>>> =
        std::iter::repeat_with(|| None).take(tasks.len()).collect();
    while let Some((index, result)) = tasks.next().await {
        results[index] = Some(result);
    }

    combine(results.into_iter().flatten())
}
