//! Bounded worker pool for match tasks.
//! N named OS threads pull boxed jobs from one unbounded crossbeam queue, so
//! submission never blocks the async caller. Each worker reports its exit on
//! a second channel; shutdown joins the workers that reported and detaches
//! the rest once the grace period runs out.

use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel as cb;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Sends the worker id when the worker thread unwinds or returns.
struct ExitNotice {
    id: usize,
    tx: cb::Sender<usize>,
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        let _ = self.tx.send(self.id);
    }
}

pub struct WorkerPool {
    job_tx: Mutex<Option<cb::Sender<Job>>>,
    handles: Mutex<Vec<(usize, JoinHandle<()>)>>,
    exit_rx: cb::Receiver<usize>,
    size: usize,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one).
    pub fn new(size: usize) -> std::io::Result<Self> {
        let size = size.max(1);
        let (job_tx, job_rx) = cb::unbounded::<Job>();
        let (exit_tx, exit_rx) = cb::unbounded::<usize>();

        let mut handles = Vec::with_capacity(size);
        for id in 0..size {
            let rx = job_rx.clone();
            let notice = ExitNotice {
                id,
                tx: exit_tx.clone(),
            };
            let handle = std::thread::Builder::new()
                .name(format!("match-worker-{id}"))
                .spawn(move || worker_loop(rx, notice))?;
            handles.push((id, handle));
        }
        info!(workers = size, "worker pool started");

        Ok(Self {
            job_tx: Mutex::new(Some(job_tx)),
            handles: Mutex::new(handles),
            exit_rx,
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue a job. Returns false once the pool is closed.
    pub fn submit(&self, job: Job) -> bool {
        match self.job_tx.lock().as_ref() {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.job_tx.lock().is_none()
    }

    /// Stop accepting jobs. Workers exit after the queue drains.
    pub fn close(&self) {
        if self.job_tx.lock().take().is_some() {
            debug!("worker pool closed");
        }
    }

    /// Join workers as they exit, up to `grace`. Returns how many are still
    /// running.
    pub fn wait_for_exit(&self, grace: Duration) -> usize {
        let deadline = Instant::now() + grace;
        loop {
            if self.handles.lock().is_empty() {
                return 0;
            }
            match self.exit_rx.recv_deadline(deadline) {
                Ok(id) => {
                    let handle = {
                        let mut handles = self.handles.lock();
                        handles
                            .iter()
                            .position(|(h_id, _)| *h_id == id)
                            .map(|idx| handles.swap_remove(idx).1)
                    };
                    if let Some(handle) = handle {
                        if handle.join().is_err() {
                            warn!(worker = id, "worker thread panicked");
                        }
                    }
                }
                Err(_) => return self.handles.lock().len(),
            }
        }
    }

    /// Close, wait `grace`, run `on_stall` if any worker is still busy, wait
    /// again, then detach whatever remains.
    pub fn shutdown(&self, grace: Duration, on_stall: impl FnOnce()) {
        self.close();
        if self.wait_for_exit(grace) == 0 {
            info!("worker pool shut down");
            return;
        }
        on_stall();
        let remaining = self.wait_for_exit(grace);
        if remaining == 0 {
            info!("worker pool shut down after cancelling in-flight tasks");
            return;
        }
        for (id, _handle) in self.handles.lock().drain(..) {
            warn!(worker = id, "worker did not exit within grace period, detaching");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(rx: cb::Receiver<Job>, notice: ExitNotice) {
    let id = notice.id;
    debug!(worker = id, "worker started");
    while let Ok(job) = rx.recv() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            error!(worker = id, panic = %panic_message(payload.as_ref()), "job panicked");
        }
    }
    debug!(worker = id, "job queue closed, worker exiting");
    drop(notice);
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_jobs_run() {
        let pool = WorkerPool::new(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = cb::unbounded();
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            let done_tx = done_tx.clone();
            assert!(pool.submit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = done_tx.send(());
            })));
        }
        for _ in 0..8 {
            done_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_panic_keeps_worker_alive() {
        let pool = WorkerPool::new(1).unwrap();
        let (done_tx, done_rx) = cb::unbounded();
        pool.submit(Box::new(|| panic!("boom")));
        pool.submit(Box::new(move || {
            let _ = done_tx.send(42);
        }));
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(2)).unwrap(), 42);
    }

    #[test]
    fn test_submit_after_close_rejected() {
        let pool = WorkerPool::new(1).unwrap();
        pool.close();
        assert!(pool.is_closed());
        assert!(!pool.submit(Box::new(|| {})));
        assert_eq!(pool.wait_for_exit(Duration::from_secs(2)), 0);
    }

    #[test]
    fn test_shutdown_detaches_stuck_worker() {
        let pool = WorkerPool::new(1).unwrap();
        let (release_tx, release_rx) = cb::unbounded::<()>();
        pool.submit(Box::new(move || {
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        }));

        let stalled = Arc::new(AtomicUsize::new(0));
        let stalled_flag = Arc::clone(&stalled);
        let started = Instant::now();
        pool.shutdown(Duration::from_millis(50), || {
            stalled_flag.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(stalled.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(2));
        let _ = release_tx.send(());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("bad cost");
        assert_eq!(panic_message(payload.as_ref()), "bad cost");
    }
}
