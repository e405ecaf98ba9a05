//! Single-flight slots and the worker thread behind each of them.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};
use parking_lot::{Condvar, Mutex};

use crate::errors::{AutoLabelError, Result};

/// At most one holder at a time; contenders are turned away, never queued.
#[derive(Clone)]
pub struct Slot {
    state: Arc<SlotState>,
}

struct SlotState {
    busy: Mutex<bool>,
    condition: Condvar,
}

/// Held for the duration of one operation; frees the slot on drop.
pub struct SlotGuard {
    state: Arc<SlotState>,
}

impl Slot {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SlotState {
                busy: Mutex::new(false),
                condition: Condvar::new(),
            }),
        }
    }

    /// Check-and-set under the lock; `None` while another operation runs.
    pub fn try_acquire(&self) -> Option<SlotGuard> {
        let mut busy = self.state.busy.lock();
        if *busy {
            return None;
        }
        *busy = true;
        Some(SlotGuard {
            state: Arc::clone(&self.state),
        })
    }

    pub fn is_busy(&self) -> bool {
        *self.state.busy.lock()
    }

    /// Block until the current holder, if any, is done.
    pub fn wait_idle(&self) {
        let mut busy = self.state.busy.lock();
        self.state.condition.wait_while(&mut busy, |b| *b);
    }
}

impl Default for Slot {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotGuard {
    fn release(&self) {
        let mut busy = self.state.busy.lock();
        *busy = false;
        self.state.condition.notify_all();
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.release();
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A slot paired with one long-lived worker thread.
///
/// Jobs receive the slot guard so they can free the slot before publishing
/// their completion events.
pub struct SlotWorker {
    name: &'static str,
    slot: Slot,
    sender: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl SlotWorker {
    pub fn spawn(name: &'static str) -> Result<Self> {
        let (sender, receiver) = unbounded::<Job>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for job in receiver {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        tracing::error!("Job on {} worker panicked", name);
                    }
                }
            })
            .map_err(|e| AutoLabelError::FileSystem {
                path: name.into(),
                operation: "spawn worker thread".to_string(),
                source: e,
            })?;

        Ok(Self {
            name,
            slot: Slot::new(),
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    pub fn try_acquire(&self) -> Option<SlotGuard> {
        self.slot.try_acquire()
    }

    pub fn is_busy(&self) -> bool {
        self.slot.is_busy()
    }

    pub fn wait_idle(&self) {
        self.slot.wait_idle();
    }

    /// Run `job` on the worker. The guard is dropped with the job if the
    /// worker is gone.
    pub fn dispatch<F>(&self, guard: SlotGuard, job: F) -> Result<()>
    where
        F: FnOnce(SlotGuard) + Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or_else(|| {
            AutoLabelError::config(format!("{} worker has shut down", self.name))
        })?;
        sender
            .send(Box::new(move || job(guard)))
            .map_err(|_| AutoLabelError::config(format!("{} worker has shut down", self.name)))
    }
}

impl Drop for SlotWorker {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
