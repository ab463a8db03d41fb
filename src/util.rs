use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::thread;

use http::uri::Authority;
use parking_lot::{Condvar, Mutex};

use crate::Error;

pub(crate) fn log_data(data: &[u8]) {
    if !log_enabled!(log::Level::Trace) {
        return;
    }

    for line in data.chunks(32) {
        trace!("{:?}", Printable(line));
    }
}

struct Printable<'a>(&'a [u8]);

impl fmt::Debug for Printable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"")?;
        for b in self.0 {
            if b.is_ascii_graphic() || *b == b' ' {
                write!(f, "{}", *b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        write!(f, "\"")
    }
}

pub(crate) trait AuthorityExt {
    fn userinfo(&self) -> Option<&str>;
    fn username(&self) -> Option<&str>;
    fn password(&self) -> Option<&str>;
}

// http::uri::Authority does not expose userinfo, so we split it out ourselves.
impl AuthorityExt for Authority {
    fn userinfo(&self) -> Option<&str> {
        let s = self.as_str();
        s.rfind('@').map(|i| &s[..i])
    }

    fn username(&self) -> Option<&str> {
        self.userinfo()
            .map(|a| a.split_once(':').map(|s| s.0).unwrap_or(a))
    }

    fn password(&self) -> Option<&str> {
        self.userinfo()
            .and_then(|a| a.split_once(':').map(|s| s.1))
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A dedicated thread running submitted jobs one at a time, in order.
///
/// Handles are cheap to clone. The thread lives until `shutdown()` or
/// `shutdown_with()` is called on any handle.
#[derive(Clone)]
pub(crate) struct Worker {
    inner: Arc<WorkerInner>,
}

struct WorkerInner {
    name: String,
    queue: Mutex<WorkerQueue>,
    cond: Condvar,
}

struct WorkerQueue {
    jobs: VecDeque<Job>,
    state: WorkerState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Running,
    // Run what is queued, accept nothing new.
    Draining,
    Stopped,
}

impl Worker {
    pub fn spawn(name: &str) -> Result<Worker, Error> {
        let inner = Arc::new(WorkerInner {
            name: name.to_string(),
            queue: Mutex::new(WorkerQueue {
                jobs: VecDeque::new(),
                state: WorkerState::Running,
            }),
            cond: Condvar::new(),
        });

        let run = inner.clone();
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run.run())
            .map_err(|e| Error::Transport(format!("failed to spawn {}: {}", name, e)))?;

        Ok(Worker { inner })
    }

    /// Queue a job. Returns `false` if the worker no longer accepts jobs.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.inner.queue.lock();
        if queue.state != WorkerState::Running {
            debug!("{}: job rejected, worker {:?}", self.inner.name, queue.state);
            return false;
        }
        queue.jobs.push_back(Box::new(job));
        self.inner.cond.notify_one();
        true
    }

    /// Stop accepting jobs. Already queued jobs still run.
    pub fn shutdown(&self) {
        let mut queue = self.inner.queue.lock();
        if queue.state == WorkerState::Running {
            queue.state = WorkerState::Draining;
            self.inner.cond.notify_one();
        }
    }

    /// Discard the queued jobs, run `last`, then stop.
    ///
    /// A job that is currently running is not interrupted.
    pub fn shutdown_with<F>(&self, last: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let dropped = {
            let mut queue = self.inner.queue.lock();
            if queue.state == WorkerState::Stopped {
                return;
            }
            let dropped = std::mem::take(&mut queue.jobs);
            queue.jobs.push_back(Box::new(last));
            queue.state = WorkerState::Draining;
            self.inner.cond.notify_one();
            dropped
        };
        // Jobs may own resources whose drop wants locks; release them outside ours.
        drop(dropped);
    }
}

impl WorkerInner {
    fn run(&self) {
        trace!("{}: started", self.name);
        loop {
            let job = {
                let mut queue = self.queue.lock();
                loop {
                    if queue.state == WorkerState::Stopped {
                        break None;
                    }
                    if let Some(job) = queue.jobs.pop_front() {
                        break Some(job);
                    }
                    if queue.state == WorkerState::Draining {
                        queue.state = WorkerState::Stopped;
                        break None;
                    }
                    self.cond.wait(&mut queue);
                }
            };

            match job {
                Some(job) => job(),
                None => break,
            }
        }
        trace!("{}: stopped", self.name);
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.inner.name)
            .finish()
    }
}
