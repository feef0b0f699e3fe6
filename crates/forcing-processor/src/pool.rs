//! Fan-out of partitioned work onto tokio tasks.

use std::future::Future;
use std::ops::Range;
use std::sync::Arc;

use forcing_common::{ForcingError, ForcingResult};
use tracing::{debug, error};

use crate::partition::Partition;

/// One worker's share of a stage.
#[derive(Debug)]
pub struct WorkItem<C> {
    /// Worker position in the partition
    pub worker: usize,
    /// Item range owned by this worker
    pub slice: Range<usize>,
    /// Read-only state shared by every worker of the stage
    pub context: Arc<C>,
}

/// Run `job` once per partition range and collect results in worker order.
///
/// Every task is spawned before any is awaited. The first failure aborts the
/// tasks still running and becomes the stage result.
pub async fn run_pool<C, T, F, Fut>(
    stage: &str,
    partition: &Partition,
    context: Arc<C>,
    job: F,
) -> ForcingResult<Vec<T>>
where
    C: Send + Sync + 'static,
    T: Send + 'static,
    F: Fn(WorkItem<C>) -> Fut,
    Fut: Future<Output = ForcingResult<T>> + Send + 'static,
{
    let mut handles = Vec::with_capacity(partition.n_workers());
    for (worker, slice) in partition.ranges().iter().enumerate() {
        debug!(stage = stage, worker = worker, items = slice.len(), "Starting worker");
        handles.push(tokio::spawn(job(WorkItem {
            worker,
            slice: slice.clone(),
            context: context.clone(),
        })));
    }

    let mut results = Vec::with_capacity(handles.len());
    let mut pending = handles.into_iter().enumerate();
    while let Some((worker, handle)) = pending.next() {
        let outcome = match handle.await {
            Ok(result) => result,
            Err(e) => Err(ForcingError::Worker(format!(
                "{} worker {} did not finish: {}",
                stage, worker, e
            ))),
        };
        match outcome {
            Ok(value) => results.push(value),
            Err(e) => {
                error!(stage = stage, worker = worker, error = %e, "Worker failed, aborting stage");
                for (_, rest) in pending {
                    rest.abort();
                }
                return Err(e);
            }
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_in_worker_order() {
        let partition = Partition::from_sizes(&[3, 1, 2]);
        let data: Arc<Vec<u32>> = Arc::new((0..6).collect());

        let sums = run_pool("sum", &partition, data, |item| async move {
            // later workers finish first
            tokio::time::sleep(Duration::from_millis(10 * (3 - item.worker as u64))).await;
            Ok::<_, ForcingError>(item.context[item.slice].iter().sum::<u32>())
        })
        .await
        .unwrap();

        assert_eq!(sums, vec![3, 3, 9]);
    }

    #[tokio::test]
    async fn test_first_error_fails_stage() {
        let partition = Partition::from_sizes(&[1, 1, 1]);
        let result: ForcingResult<Vec<usize>> =
            run_pool("fail", &partition, Arc::new(()), |item| async move {
                if item.worker == 1 {
                    Err(ForcingError::InvalidData("bad file".into()))
                } else {
                    Ok(item.worker)
                }
            })
            .await;
        assert!(matches!(result, Err(ForcingError::InvalidData(_))));
    }

    #[tokio::test]
    async fn test_panic_becomes_worker_error() {
        let partition = Partition::from_sizes(&[1]);
        let result: ForcingResult<Vec<()>> =
            run_pool("panic", &partition, Arc::new(true), |item| async move {
                if *item.context {
                    panic!("boom");
                }
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ForcingError::Worker(_))));
    }

    #[tokio::test]
    async fn test_empty_partition() {
        let result: Vec<()> = run_pool("none", &Partition::default(), Arc::new(()), |_item| async {
            Ok::<_, ForcingError>(())
        })
        .await
        .unwrap();
        assert!(result.is_empty());
    }
}
