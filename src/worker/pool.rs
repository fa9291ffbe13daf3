//! Worker pool — owns the execution units, their lifecycles, and
//! cancellation. One unit runs per configured parallelism slot per worker,
//! each independently cancellable; a panic in one unit never takes down
//! the pool or its siblings.

use std::collections::HashMap;

use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::store::model::Worker;
use crate::worker::unit::{ExecutionUnit, UnitDeps};

struct WorkerUnits {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Owns and supervises all execution units.
pub struct WorkerPool {
    deps: UnitDeps,
    root: CancellationToken,
    units: Mutex<HashMap<i64, WorkerUnits>>,
}

impl WorkerPool {
    pub fn new(deps: UnitDeps) -> Self {
        Self {
            deps,
            root: CancellationToken::new(),
            units: Mutex::new(HashMap::new()),
        }
    }

    /// Launch units for every worker in the list.
    pub async fn start_all(&self, workers: Vec<Worker>) {
        for worker in workers {
            self.start_worker(worker).await;
        }
    }

    /// Read all configured workers from the store and start them.
    pub async fn load_workers(&self) -> Result<usize> {
        let workers = self.deps.db.list_workers().await?;
        let count = workers.len();
        self.start_all(workers).await;
        Ok(count)
    }

    /// Launch one unit per parallelism slot for a worker.
    pub async fn start_worker(&self, worker: Worker) {
        let cancel = self.root.child_token();
        let slots = worker.max_parallel.max(1) as usize;
        let mut handles = Vec::with_capacity(slots);

        for slot in 0..slots {
            let unit = ExecutionUnit::new(worker.clone(), slot, self.deps.clone());
            let unit_cancel = cancel.clone();
            let worker_id = worker.id;

            handles.push(tokio::spawn(async move {
                let run = std::panic::AssertUnwindSafe(unit.run(unit_cancel)).catch_unwind();
                if let Err(panic) = run.await {
                    error!(
                        worker_id,
                        slot,
                        panic = %panic_message(&panic),
                        "Execution unit panicked"
                    );
                }
            }));
        }

        info!(worker_id = worker.id, slots, "Worker units started");
        self.units
            .lock()
            .await
            .insert(worker.id, WorkerUnits { cancel, handles });
    }

    /// Signal cancellation to every unit and wait for all of them to exit,
    /// bounded by the shutdown grace period. Units still running after the
    /// grace are aborted.
    pub async fn stop_all(&self) {
        self.root.cancel();

        let drained: Vec<WorkerUnits> = {
            let mut units = self.units.lock().await;
            units.drain().map(|(_, u)| u).collect()
        };
        let mut handles: Vec<JoinHandle<()>> =
            drained.into_iter().flat_map(|u| u.handles).collect();
        if handles.is_empty() {
            return;
        }

        let grace = self.deps.config.shutdown_grace;
        if tokio::time::timeout(grace, join_all(handles.iter_mut()))
            .await
            .is_err()
        {
            warn!("Shutdown grace elapsed; aborting remaining units");
            for handle in &handles {
                handle.abort();
            }
        }
        info!("Worker pool stopped");
    }

    /// Cancel and relaunch only one worker's units, re-reading its
    /// configuration from the store. Other workers are untouched.
    pub async fn restart_worker(&self, worker_id: i64) -> Result<()> {
        let existing = self.units.lock().await.remove(&worker_id);
        if let Some(units) = existing {
            units.cancel.cancel();
            let mut handles = units.handles;
            let grace = self.deps.config.shutdown_grace;
            if tokio::time::timeout(grace, join_all(handles.iter_mut()))
                .await
                .is_err()
            {
                warn!(worker_id, "Restart grace elapsed; aborting old units");
                for handle in &handles {
                    handle.abort();
                }
            }
        }

        let worker = self.deps.db.get_worker(worker_id).await?;
        self.start_worker(worker).await;
        Ok(())
    }

    /// Total number of live execution units (for status reporting).
    pub async fn unit_count(&self) -> usize {
        self.units
            .lock()
            .await
            .values()
            .map(|u| u.handles.iter().filter(|h| !h.is_finished()).count())
            .sum()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_extracts_str_payloads() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("kaboom"));
        assert_eq!(panic_message(boxed.as_ref()), "kaboom");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(17_u32);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
