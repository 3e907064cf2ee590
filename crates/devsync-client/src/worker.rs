//! Action workers.
//!
//! Long-running device actions (reboot, firmware flashing, custom bundle
//! actions) never run on the dispatch path. Each action category gets one
//! single-consumer worker that executes jobs strictly one at a time, so at
//! most one action of a given category is in flight per session.

use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A queued action body.
pub type BoxedAction = Pin<Box<dyn Future<Output = ()> + Send>>;

/// An item on an action worker's queue.
pub enum ActionJob {
    /// Execute a job to completion before taking the next one.
    Run(BoxedAction),
    /// Stop the worker; jobs queued behind this are not executed.
    Shutdown,
}

impl std::fmt::Debug for ActionJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionJob::Run(_) => f.write_str("ActionJob::Run"),
            ActionJob::Shutdown => f.write_str("ActionJob::Shutdown"),
        }
    }
}

/// Single-consumer worker for one action category.
pub struct ActionWorker;

impl ActionWorker {
    /// Spawn the worker task.
    pub fn spawn(
        category: &'static str,
        mut queue: mpsc::UnboundedReceiver<ActionJob>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(job) = queue.recv().await {
                match job {
                    ActionJob::Shutdown => {
                        tracing::debug!(category, "action worker stopping");
                        break;
                    }
                    ActionJob::Run(action) => action.await,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn jobs_run_in_order_one_at_a_time() {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = ActionWorker::spawn("device", rx);
        let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3u32 {
            let sink = Arc::clone(&order);
            tx.send(ActionJob::Run(Box::pin(async move {
                tokio::task::yield_now().await;
                sink.lock().unwrap().push(i);
            })))
            .unwrap();
        }
        tx.send(ActionJob::Shutdown).unwrap();

        worker.await.unwrap();
        assert_eq!(order.lock().unwrap().as_slice(), [0, 1, 2]);
    }

    #[tokio::test]
    async fn no_jobs_run_after_shutdown() {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = ActionWorker::spawn("firmware", rx);
        let ran = Arc::new(Mutex::new(false));

        tx.send(ActionJob::Shutdown).unwrap();
        let sink = Arc::clone(&ran);
        tx.send(ActionJob::Run(Box::pin(async move {
            *sink.lock().unwrap() = true;
        })))
        .unwrap();
        drop(tx);

        worker.await.unwrap();
        assert!(!*ran.lock().unwrap());
    }
}
