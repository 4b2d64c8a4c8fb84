//! Executor back-ends the pipeline dispatches kernels to.
//!
//! The CPU back-end wraps a rayon worker pool; kernels running there are
//! free to use nested data parallelism. The accelerator back-end emulates
//! one or more in-order command queues: each queue is a dedicated thread
//! executing its kernels in submission order, asynchronously to the
//! submitter. Cross-queue ordering is the pipeline's job.

use crate::errors::*;
use log::debug;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

/// A ready-to-run kernel instance.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Outstanding-job accounting shared by the back-ends.
#[derive(Default)]
struct Inflight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Inflight {
    fn launch(&self) {
        *self.count.lock().unwrap() += 1;
    }

    fn done(&self) {
        let mut c = self.count.lock().unwrap();
        *c -= 1;
        if *c == 0 {
            self.idle.notify_all();
        }
    }

    fn wait(&self) {
        let mut c = self.count.lock().unwrap();
        while *c > 0 {
            c = self.idle.wait(c).unwrap();
        }
    }
}

pub trait Executor: Send + Sync {
    /// Schedules a ready task; `lane` selects a command queue where the
    /// back-end has more than one.
    fn enqueue(&self, lane: usize, job: Job);

    /// Blocks until every enqueued job has finished.
    fn wait_idle(&self);

    /// Memory placement hint: `lane` will touch roughly `bytes` soon.
    /// Advisory only.
    fn accessed_by(&self, _lane: usize, _bytes: usize) {}

    /// Advisory transfer-ahead hint.
    fn prefetch(&self, _lane: usize, _bytes: usize) {}
}

/// Worker-pool back-end for regions pinned to the host.
pub struct CpuExecutor {
    pool: rayon::ThreadPool,
    inflight: Arc<Inflight>,
}

impl CpuExecutor {
    pub fn new(threads: Option<usize>) -> Result<CpuExecutor> {
        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(t) = threads {
            builder = builder.num_threads(t);
        }
        let pool = builder
            .build()
            .chain_err(|| "unable to build the CPU worker pool")?;

        Ok(CpuExecutor {
            pool,
            inflight: Arc::new(Inflight::default()),
        })
    }
}

impl Executor for CpuExecutor {
    fn enqueue(&self, _lane: usize, job: Job) {
        let inflight = self.inflight.clone();
        inflight.launch();
        self.pool.spawn(move || {
            job();
            inflight.done();
        });
    }

    fn wait_idle(&self) {
        self.inflight.wait();
    }
}

/// Emulated accelerator back-end with in-order command queues.
pub struct DeviceExecutor {
    queues: Vec<mpsc::Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
    inflight: Arc<Inflight>,
}

impl DeviceExecutor {
    pub fn new(n_queues: usize) -> Result<DeviceExecutor> {
        let n = n_queues.max(1);
        let mut queues = Vec::with_capacity(n);
        let mut workers = Vec::with_capacity(n);

        for q in 0..n {
            let (tx, rx) = mpsc::channel::<Job>();
            let handle = thread::Builder::new()
                .name(format!("device-queue-{}", q))
                .spawn(move || {
                    for job in rx {
                        job();
                    }
                })
                .chain_err(|| "unable to spawn a device queue thread")?;
            queues.push(tx);
            workers.push(handle);
        }

        Ok(DeviceExecutor {
            queues,
            workers,
            inflight: Arc::new(Inflight::default()),
        })
    }

    pub fn n_queues(&self) -> usize {
        self.queues.len()
    }
}

impl Executor for DeviceExecutor {
    fn enqueue(&self, lane: usize, job: Job) {
        let inflight = self.inflight.clone();
        inflight.launch();
        let wrapped: Job = Box::new(move || {
            job();
            inflight.done();
        });
        self.queues[lane % self.queues.len()]
            .send(wrapped)
            .expect("device queue terminated with jobs outstanding");
    }

    fn wait_idle(&self) {
        self.inflight.wait();
    }

    fn prefetch(&self, lane: usize, bytes: usize) {
        debug!("device queue {}: prefetch hint for {} bytes", lane, bytes);
    }
}

impl Drop for DeviceExecutor {
    fn drop(&mut self) {
        self.inflight.wait();
        self.queues.clear();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn cpu_executor_runs_everything() {
        let exec = CpuExecutor::new(Some(2)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..64 {
            let c = counter.clone();
            exec.enqueue(0, Box::new(move || {
                c.fetch_add(1, Ordering::Relaxed);
            }));
        }
        exec.wait_idle();
        assert_eq!(counter.load(Ordering::Relaxed), 64);
    }

    #[test]
    fn device_queue_preserves_submission_order() {
        let exec = DeviceExecutor::new(1).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..32 {
            let log = log.clone();
            exec.enqueue(0, Box::new(move || {
                log.lock().unwrap().push(i);
            }));
        }
        exec.wait_idle();

        let log = log.lock().unwrap();
        assert_eq!(*log, (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn device_lanes_map_onto_queues() {
        let exec = DeviceExecutor::new(2).unwrap();
        assert_eq!(exec.n_queues(), 2);

        let counter = Arc::new(AtomicUsize::new(0));
        for lane in 0..8 {
            let c = counter.clone();
            exec.enqueue(lane, Box::new(move || {
                c.fetch_add(1, Ordering::Relaxed);
            }));
        }
        exec.wait_idle();
        assert_eq!(counter.load(Ordering::Relaxed), 8);
    }
}
