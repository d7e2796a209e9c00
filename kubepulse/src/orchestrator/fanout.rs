use std::{future::Future, sync::Arc};

use tokio::{sync::Semaphore, task::JoinSet};

use crate::error::{Error, Result};

/// Runs `unit` once per item with at most `max_concurrent` units in flight
/// (values below 1 count as 1). Results come back in input order.
pub async fn fan_out<T, R, F, Fut>(items: Vec<T>, max_concurrent: usize, unit: F) -> Result<Vec<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
{
    let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(items.len()).collect();
    let mut set = JoinSet::new();

    for (idx, item) in items.into_iter().enumerate() {
        let permits = permits.clone();
        let work = unit(item);
        set.spawn(async move {
            let _permit = permits
                .acquire()
                .await
                .map_err(|e| Error::sync(format!("fan-out semaphore closed: {e}")))?;
            Ok::<_, Error>((idx, work.await))
        });
    }

    while let Some(joined) = set.join_next().await {
        let (idx, value) = joined.map_err(|e| Error::sync(format!("fan-out unit failed: {e}")))??;
        slots[idx] = Some(value);
    }

    Ok(slots.into_iter().flatten().collect())
}
