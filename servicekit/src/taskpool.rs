use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A fixed set of long-running worker tasks sharing one stop token.
///
/// Workers are expected to watch [`WorkerPool::stop_token`] and return once it
/// is cancelled. [`WorkerPool::shutdown`] cancels the token and waits, bounded,
/// for every worker to finish.
pub struct WorkerPool {
    stop_token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    active: Arc<AtomicUsize>,
}

/// Decrements the active counter when a worker future ends or unwinds.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    pub fn new(stop_token: CancellationToken) -> WorkerPool {
        WorkerPool {
            stop_token,
            handles: Vec::new(),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop_token.clone()
    }

    pub fn spawn<F>(&mut self, func: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard(self.active.clone());

        self.handles.push(tokio::spawn(async move {
            let _guard = guard;
            func.await;
        }));
    }

    /// Number of workers spawned so far.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Number of workers that have not returned yet.
    pub fn active_workers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Signals every worker to stop and waits up to `timeout` for them.
    ///
    /// Returns `false` when the timeout elapsed first. Workers still running at
    /// that point are detached, not aborted.
    pub async fn shutdown(&mut self, timeout: Duration) -> bool {
        self.stop_token.cancel();
        let handles = std::mem::take(&mut self.handles);

        match tokio::time::timeout(timeout, join_all(handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        log::error!("Worker task ended abnormally: {e}");
                    }
                }
                true
            }
            Err(_) => false,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop_token.cancel();
    }
}
