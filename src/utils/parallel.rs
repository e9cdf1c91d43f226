use log::{debug, error};
use rayon::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParallelError {
    #[error("Thread error: {0}")]
    ThreadError(String),

    #[error("Invalid thread count: {0}")]
    InvalidThreadCount(usize),
}

impl ParallelError {
    pub fn kind(&self) -> &'static str {
        "ParallelError"
    }
}

/// A finished task together with the item it was run on.
pub struct TaskOutcome<T, U, E> {
    pub item: T,
    pub result: Result<U, E>,
}

/// Run one task per item on a bounded pool of `threads` workers.
///
/// Items must not share output resources. A failing task does not stop the
/// others; every outcome is returned, in input order.
pub fn run_independent<T, U, E, F>(
    items: Vec<T>,
    threads: usize,
    task: F,
) -> Result<Vec<TaskOutcome<T, U, E>>, ParallelError>
where
    T: Send,
    U: Send,
    E: Send + std::fmt::Display,
    F: Fn(&T) -> Result<U, E> + Send + Sync,
{
    if threads == 0 {
        return Err(ParallelError::InvalidThreadCount(0));
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| ParallelError::ThreadError(format!("Failed to build thread pool: {}", e)))?;

    debug!("Running {} tasks on {} threads", items.len(), threads);

    let outcomes: Vec<TaskOutcome<T, U, E>> = pool.install(|| {
        items
            .into_par_iter()
            .map(|item| {
                let result = task(&item);
                if let Err(e) = &result {
                    error!("Task failed: {}", e);
                }
                TaskOutcome { item, result }
            })
            .collect()
    });

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_failures_do_not_abort_other_tasks() {
        let ran = AtomicUsize::new(0);
        let outcomes = run_independent((0..10).collect(), 3, |&i: &i32| {
            ran.fetch_add(1, Ordering::SeqCst);
            if i == 4 {
                Err(format!("task {} failed", i))
            } else {
                Ok(i * 2)
            }
        })
        .unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 10);
        assert_eq!(outcomes.len(), 10);
        let items: Vec<i32> = outcomes.iter().map(|o| o.item).collect();
        assert_eq!(items, (0..10).collect::<Vec<_>>());
        assert_eq!(outcomes.iter().filter(|o| o.result.is_err()).count(), 1);
        assert_eq!(outcomes[3].result.as_ref().unwrap(), &6);
    }

    #[test]
    fn test_zero_threads_rejected() {
        let result = run_independent(vec![1], 0, |_: &i32| Ok::<_, String>(()));
        assert!(matches!(result, Err(ParallelError::InvalidThreadCount(0))));
    }
}
