/*
 * multi.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Ferrocurl, an HTTP(S) transfer library.
 *
 * Ferrocurl is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Ferrocurl is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Ferrocurl.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Multi-transfer scheduler: runs many handles cooperatively on one current-thread runtime.
//!
//! Every in-flight transfer is a future owning its handle. `perform` polls the futures whose
//! sockets or timers have signalled readiness, without blocking; `wait` blocks until one of
//! them does. At most `max_connecting` transfers are connecting at once; the rest queue in
//! registration order and start as slots free up.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::{poll_fn, Future};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Wake, Waker};
use std::time::Duration;

use crate::config::MultiConfig;
use crate::error::{Error, Result};
use crate::handle::{Phase, Progress, TransferHandle, TransferState};
use crate::pool::ConnectionPool;
use crate::share::Share;

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies a handle registered with a [`Multi`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(pub u64);

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies a [`Multi`]; a registered handle records the one it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchedulerId(pub(crate) u64);

/// A transfer that reached a terminal state.
#[derive(Debug)]
pub struct Completion {
    pub id: TransferId,
    pub result: Result<()>,
}

type TransferFuture = Pin<Box<dyn Future<Output = (TransferHandle, Result<()>)> + Send>>;

/// Per-transfer waker: records readiness and forwards it to whoever is blocked in `wait`.
struct TransferWaker {
    woken: AtomicBool,
    parent: Mutex<Option<Waker>>,
}

impl TransferWaker {
    fn new() -> Self {
        Self {
            woken: AtomicBool::new(true),
            parent: Mutex::new(None),
        }
    }

    fn set_parent(&self, waker: &Waker) {
        if let Ok(mut parent) = self.parent.lock() {
            match parent.as_ref() {
                Some(w) if w.will_wake(waker) => {}
                _ => *parent = Some(waker.clone()),
            }
        }
    }
}

impl Wake for TransferWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.woken.store(true, Ordering::Release);
        if let Ok(parent) = self.parent.lock() {
            if let Some(w) = parent.as_ref() {
                w.wake_by_ref();
            }
        }
    }
}

struct Running {
    id: TransferId,
    progress: Arc<Progress>,
    waker: Arc<TransferWaker>,
    future: TransferFuture,
}

enum Slot {
    Queued(TransferHandle),
    Running(Arc<Progress>),
    Done(TransferHandle),
}

pub struct Multi {
    id: SchedulerId,
    config: MultiConfig,
    share: Share,
    next_transfer: u64,
    slots: HashMap<TransferId, Slot>,
    queue: VecDeque<TransferId>,
    running: Vec<Running>,
    completions: VecDeque<Completion>,
}

impl fmt::Debug for Multi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multi")
            .field("id", &self.id)
            .field("queued", &self.queue.len())
            .field("running", &self.running.len())
            .field("completions", &self.completions.len())
            .finish()
    }
}

impl Multi {
    pub fn new() -> Result<Multi> {
        Multi::with_config(MultiConfig::default())
    }

    pub fn with_config(config: MultiConfig) -> Result<Multi> {
        let share = Share::new(config.pool)?;
        Ok(Multi::with_share(config, share))
    }

    /// Run transfers on an existing runtime, pool and connector.
    pub fn with_share(config: MultiConfig, share: Share) -> Multi {
        Multi {
            id: SchedulerId(NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed)),
            config,
            share,
            next_transfer: 1,
            slots: HashMap::new(),
            queue: VecDeque::new(),
            running: Vec::new(),
            completions: VecDeque::new(),
        }
    }

    pub fn id(&self) -> SchedulerId {
        self.id
    }

    /// The pool shared by every transfer of this scheduler.
    pub fn pool(&self) -> &ConnectionPool {
        self.share.pool()
    }

    /// Register a handle. It stays Idle until a connecting slot is free.
    pub fn add(&mut self, mut handle: TransferHandle) -> TransferId {
        let id = TransferId(self.next_transfer);
        self.next_transfer += 1;
        handle.scheduler = Some(self.id);
        self.slots.insert(id, Slot::Queued(handle));
        self.queue.push_back(id);
        tracing::debug!("transfer {} queued", id);
        id
    }

    /// Take a handle back. Fails with `TransferBusy` while its transfer is in flight.
    pub fn remove(&mut self, id: TransferId) -> Result<TransferHandle> {
        let mut handle = match self.slots.remove(&id) {
            Some(Slot::Queued(h)) => {
                self.queue.retain(|q| *q != id);
                h
            }
            Some(Slot::Done(h)) => {
                self.completions.retain(|c| c.id != id);
                h
            }
            Some(running @ Slot::Running(_)) => {
                self.slots.insert(id, running);
                return Err(Error::TransferBusy(id.0));
            }
            None => return Err(Error::UnknownTransfer(id.0)),
        };
        handle.scheduler = None;
        Ok(handle)
    }

    /// Cancel a transfer. A queued one fails at once; a running one fails at its next
    /// state transition or read, on the next `perform`.
    pub fn cancel(&mut self, id: TransferId) -> Result<()> {
        match self.slots.get_mut(&id) {
            Some(Slot::Queued(handle)) => {
                handle.fail_unstarted(&Error::Cancelled);
                self.queue.retain(|q| *q != id);
                if let Some(Slot::Queued(handle)) = self.slots.remove(&id) {
                    self.slots.insert(id, Slot::Done(handle));
                }
                self.completions.push_back(Completion {
                    id,
                    result: Err(Error::Cancelled),
                });
                Ok(())
            }
            Some(Slot::Running(progress)) => {
                progress.cancel();
                if let Some(r) = self.running.iter().find(|r| r.id == id) {
                    r.waker.wake_by_ref();
                }
                Ok(())
            }
            Some(Slot::Done(_)) => Ok(()),
            None => Err(Error::UnknownTransfer(id.0)),
        }
    }

    pub fn state(&self, id: TransferId) -> Result<TransferState> {
        match self.slots.get(&id) {
            Some(Slot::Queued(h)) | Some(Slot::Done(h)) => Ok(h.state()),
            Some(Slot::Running(progress)) => Ok(progress.state()),
            None => Err(Error::UnknownTransfer(id.0)),
        }
    }

    /// Finished handle, for reading its info before `remove`.
    pub fn handle(&self, id: TransferId) -> Option<&TransferHandle> {
        match self.slots.get(&id) {
            Some(Slot::Queued(h)) | Some(Slot::Done(h)) => Some(h),
            _ => None,
        }
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn running(&self) -> usize {
        self.running.len()
    }

    /// Transfers not yet finished.
    pub fn pending(&self) -> usize {
        self.queue.len() + self.running.len()
    }

    /// Next completion message, in completion order.
    pub fn info_read(&mut self) -> Option<Completion> {
        self.completions.pop_front()
    }

    fn connecting(&self) -> usize {
        self.running
            .iter()
            .filter(|r| r.progress.phase() <= Phase::Connecting)
            .count()
    }

    /// Start queued transfers while connecting slots are free. Returns whether any started.
    fn start_queued(&mut self) -> bool {
        let mut started = false;
        while self.connecting() < self.config.max_connecting {
            let Some(id) = self.queue.pop_front() else {
                break;
            };
            let Some(Slot::Queued(mut handle)) = self.slots.remove(&id) else {
                continue;
            };
            let progress = handle.progress.clone();
            let share = self.share.clone();
            let future: TransferFuture = Box::pin(async move {
                let result = handle.run(&share).await;
                (handle, result)
            });
            self.slots.insert(id, Slot::Running(progress.clone()));
            self.running.push(Running {
                id,
                progress,
                waker: Arc::new(TransferWaker::new()),
                future,
            });
            tracing::debug!("transfer {} started", id);
            started = true;
        }
        started
    }

    /// Poll every woken transfer once. Returns how many finished.
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> usize {
        let mut finished = 0;
        let mut i = 0;
        while i < self.running.len() {
            let r = &mut self.running[i];
            r.waker.set_parent(cx.waker());
            if !r.waker.woken.swap(false, Ordering::AcqRel) {
                i += 1;
                continue;
            }
            let waker = Waker::from(r.waker.clone());
            let mut tcx = Context::from_waker(&waker);
            match r.future.as_mut().poll(&mut tcx) {
                Poll::Pending => i += 1,
                Poll::Ready((handle, result)) => {
                    let id = self.running.swap_remove(i).id;
                    match &result {
                        Ok(()) => tracing::debug!("transfer {} complete", id),
                        Err(e) => tracing::debug!("transfer {} failed: {}", id, e),
                    }
                    self.slots.insert(id, Slot::Done(handle));
                    self.completions.push_back(Completion { id, result });
                    finished += 1;
                }
            }
        }
        finished
    }

    /// Poll, and keep starting queued transfers as slots free, until nothing more can run now.
    fn step(&mut self, cx: &mut Context<'_>) -> usize {
        let mut finished = 0;
        loop {
            self.start_queued();
            finished += self.poll_ready(cx);
            let can_start = !self.queue.is_empty() && self.connecting() < self.config.max_connecting;
            if !can_start {
                return finished;
            }
        }
    }

    /// Advance every transfer that can make progress without blocking. Returns the number of
    /// transfers that reached a terminal state in this call.
    pub fn perform(&mut self) -> Result<usize> {
        let share = self.share.clone();
        let finished = share.block_on(async {
            tokio::task::yield_now().await;
            poll_fn(|cx| Poll::Ready(self.step(cx))).await
        });
        Ok(finished)
    }

    /// Block until some transfer is ready to make progress, or `timeout` elapses. Returns
    /// whether anything is ready.
    pub fn wait(&mut self, timeout: Duration) -> Result<bool> {
        if self.running.is_empty() {
            return Ok(!self.queue.is_empty());
        }
        let running = &self.running;
        let ready = self.share.block_on(async {
            let any_woken = poll_fn(|cx| {
                let mut ready = false;
                for r in running {
                    r.waker.set_parent(cx.waker());
                    ready |= r.waker.woken.load(Ordering::Acquire);
                }
                if ready {
                    Poll::Ready(())
                } else {
                    Poll::Pending
                }
            });
            tokio::time::timeout(timeout, any_woken).await.is_ok()
        });
        Ok(ready)
    }

    /// Drive every registered transfer to a terminal state.
    pub fn run(&mut self) -> Result<()> {
        while self.pending() > 0 {
            self.perform()?;
            if self.pending() > 0 {
                self.wait(Duration::from_secs(1))?;
            }
        }
        Ok(())
    }
}
