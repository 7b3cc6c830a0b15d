//! Cooperative pause/resume of background workers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Control {
    paused: bool,
    shutdown: bool,
    /// Workers currently inside a step
    busy: usize,
    /// Workers parked without work at the current epoch
    idle: usize,
    workers: usize,
    epoch: u64,
}

impl Control {
    fn advance(&mut self) {
        self.epoch += 1;
        self.idle = 0;
    }
}

/// Gate between the control thread and a pool of workers
///
/// Workers run their work in steps obtained from [`begin_step`]. While the
/// controller is paused no step starts, and [`cancel`] blocks until every
/// running step has finished. A worker that finds nothing to do passes the
/// step's epoch back on its next call and sleeps until the epoch advances.
///
/// [`begin_step`]: ConcurrencyController::begin_step
/// [`cancel`]: ConcurrencyController::cancel
#[derive(Debug)]
pub struct ConcurrencyController {
    control: Mutex<Control>,
    changed: Condvar,
    cancel: AtomicBool,
}

impl ConcurrencyController {
    /// A paused controller expecting `workers` workers
    pub fn new(workers: usize) -> Self {
        Self {
            control: Mutex::new(Control { paused: true, workers, ..Default::default() }),
            changed: Condvar::new(),
            cancel: AtomicBool::new(true),
        }
    }

    /// Set by [`ConcurrencyController::cancel`]; workers poll it mid-step
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Stop new steps and wait for running ones to finish
    ///
    /// No timeout: a worker stuck inside a step blocks the caller.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
        let mut control = self.lock();
        control.paused = true;
        while control.busy > 0 {
            control = self.changed.wait(control).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Clear the cancel flag and wake every worker
    pub fn resume(&self) {
        let mut control = self.lock();
        self.cancel.store(false, Ordering::Release);
        control.paused = false;
        control.advance();
        self.changed.notify_all();
    }

    /// Wake idle workers without pausing, after new work may have appeared
    pub fn notify_work(&self) {
        let mut control = self.lock();
        control.advance();
        self.changed.notify_all();
    }

    /// Make every worker's next [`ConcurrencyController::begin_step`] return `None`
    pub fn shutdown(&self) {
        self.cancel.store(true, Ordering::Release);
        let mut control = self.lock();
        control.shutdown = true;
        self.changed.notify_all();
    }

    /// Block until a step may run, or return `None` on shutdown
    ///
    /// `idle_epoch` is the epoch of the caller's last step if that step
    /// found no work.
    pub fn begin_step(&self, idle_epoch: Option<u64>) -> Option<WorkStep<'_>> {
        let mut control = self.lock();
        let mut parked = false;
        loop {
            if control.shutdown {
                return None;
            }
            if !control.paused {
                if idle_epoch != Some(control.epoch) {
                    control.busy += 1;
                    return Some(WorkStep { controller: self, epoch: control.epoch });
                }
                if !parked {
                    parked = true;
                    control.idle += 1;
                    self.changed.notify_all();
                }
            }
            control = self.changed.wait(control).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Workers currently inside a step
    pub fn active_workers(&self) -> usize {
        self.lock().busy
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Wait until no step is running and every worker is parked or paused
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut control = self.lock();
        loop {
            if control.busy == 0 && (control.paused || control.idle >= control.workers) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            control = self
                .changed
                .wait_timeout(control, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn end_step(&self) {
        let mut control = self.lock();
        control.busy -= 1;
        self.changed.notify_all();
    }
}

/// One running unit of worker activity; finishing it is signalled on drop
#[derive(Debug)]
pub struct WorkStep<'a> {
    controller: &'a ConcurrencyController,
    epoch: u64,
}

impl WorkStep<'_> {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl Drop for WorkStep<'_> {
    fn drop(&mut self) {
        self.controller.end_step();
    }
}
