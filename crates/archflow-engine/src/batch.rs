use std::sync::mpsc;
use std::thread;

use archflow_contracts::JobError;

/// Settled results of N independent jobs, kept in completion order.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome<T> {
    pub succeeded: Vec<T>,
    pub failures: Vec<(usize, JobError)>,
}

impl<T> Default for BatchOutcome<T> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<T> BatchOutcome<T> {
    /// The error that settled last.
    pub fn last_failure(&self) -> Option<&JobError> {
        self.failures.last().map(|(_, err)| err)
    }

    pub fn is_partial(&self) -> bool {
        !self.succeeded.is_empty() && !self.failures.is_empty()
    }

    /// Partial success is success. With nothing succeeded the last failure
    /// becomes the error.
    pub fn into_result(self) -> Result<Vec<T>, JobError> {
        if !self.succeeded.is_empty() {
            return Ok(self.succeeded);
        }
        Err(self
            .failures
            .into_iter()
            .last()
            .map(|(_, err)| err)
            .unwrap_or(JobError::NoImageData))
    }
}

/// Runs `task(0..count)` on scoped threads and waits for all of them.
/// `on_result` sees each success as it settles, before the barrier.
pub fn run_concurrently<T, F, C>(count: usize, task: F, mut on_result: C) -> BatchOutcome<T>
where
    T: Send,
    F: Fn(usize) -> Result<T, JobError> + Sync,
    C: FnMut(usize, &T),
{
    let mut outcome = BatchOutcome::default();
    if count == 0 {
        return outcome;
    }

    thread::scope(|scope| {
        let (tx, rx) = mpsc::channel::<(usize, Result<T, JobError>)>();
        for index in 0..count {
            let tx = tx.clone();
            let task = &task;
            scope.spawn(move || {
                let _ = tx.send((index, task(index)));
            });
        }
        drop(tx);

        for (index, result) in rx {
            match result {
                Ok(value) => {
                    on_result(index, &value);
                    outcome.succeeded.push(value);
                }
                Err(err) => outcome.failures.push((index, err)),
            }
        }
    });
    outcome
}
