/*
 * handle.rs
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

//! Transfer handles: one option registry, the state of the current or last execution, and the
//! info record it produced.
//!
//! A handle runs either synchronously (`perform`, which blocks the calling thread on the
//! handle's own runtime) or inside a [`Multi`](crate::multi::Multi), which owns it while the
//! transfer is in flight.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::config::EngineDefaults;
use crate::engine::Engine;
use crate::error::{Error, ErrorKind, Result};
use crate::info::{self, InfoId, InfoValue, TransferInfo};
use crate::multi::SchedulerId;
use crate::options::{OptionId, OptionRegistry, OptionValue, TransferCallback, UserData};
use crate::pool::PoolConfig;
use crate::share::Share;

/// Where a transfer is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    Idle,
    Connecting,
    SendingRequest,
    ReceivingHeaders,
    ReceivingBody,
    Complete,
    Failed(ErrorKind),
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferState::Complete | TransferState::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub(crate) enum Phase {
    Idle = 0,
    Connecting = 1,
    SendingRequest = 2,
    ReceivingHeaders = 3,
    ReceivingBody = 4,
    Complete = 5,
    Failed = 6,
}

impl Phase {
    fn from_u8(v: u8) -> Phase {
        match v {
            1 => Phase::Connecting,
            2 => Phase::SendingRequest,
            3 => Phase::ReceivingHeaders,
            4 => Phase::ReceivingBody,
            5 => Phase::Complete,
            6 => Phase::Failed,
            _ => Phase::Idle,
        }
    }
}

/// State shared between a handle, its engine and any scheduler or cancel token watching it.
#[derive(Debug)]
pub(crate) struct Progress {
    cancelled: AtomicBool,
    phase: AtomicU8,
    failure: Mutex<Option<ErrorKind>>,
    notify: Notify,
}

impl Progress {
    fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            phase: AtomicU8::new(Phase::Idle as u8),
            failure: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub(crate) fn state(&self) -> TransferState {
        match self.phase() {
            Phase::Idle => TransferState::Idle,
            Phase::Connecting => TransferState::Connecting,
            Phase::SendingRequest => TransferState::SendingRequest,
            Phase::ReceivingHeaders => TransferState::ReceivingHeaders,
            Phase::ReceivingBody => TransferState::ReceivingBody,
            Phase::Complete => TransferState::Complete,
            Phase::Failed => {
                let kind = self.failure.lock().ok().and_then(|f| *f);
                TransferState::Failed(kind.unwrap_or(ErrorKind::Cancelled))
            }
        }
    }

    /// Fails with `Cancelled` when cancellation has been requested.
    pub(crate) fn check(&self) -> Result<()> {
        if self.cancelled.load(Ordering::Acquire) {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Move to a non-terminal phase. Every transition is a cancellation point.
    pub(crate) fn enter(&self, phase: Phase) -> Result<()> {
        self.check()?;
        let previous = Phase::from_u8(self.phase.swap(phase as u8, Ordering::AcqRel));
        if previous != phase {
            tracing::debug!("transfer {:?} -> {:?}", previous, phase);
        }
        Ok(())
    }

    fn finish(&self, failure: Option<ErrorKind>) {
        if let Ok(mut f) = self.failure.lock() {
            *f = failure;
        }
        let phase = if failure.is_some() { Phase::Failed } else { Phase::Complete };
        self.phase.store(phase as u8, Ordering::Release);
        // A request that was not acted on stays pending for the next execution.
        if failure == Some(ErrorKind::Cancelled) {
            self.cancelled.store(false, Ordering::Release);
        }
    }

    fn reset(&self) {
        if let Ok(mut f) = self.failure.lock() {
            *f = None;
        }
        self.phase.store(Phase::Idle as u8, Ordering::Release);
        self.cancelled.store(false, Ordering::Release);
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Resolves once cancellation is requested.
    async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.cancelled.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }
}

/// Requests cancellation of a handle's current or next execution from anywhere, including
/// from inside its own callbacks or another thread.
#[derive(Debug, Clone)]
pub struct CancelToken(Arc<Progress>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::Acquire)
    }

    /// Current state of the handle this token belongs to.
    pub fn state(&self) -> TransferState {
        self.0.state()
    }
}

/// One configurable, re-executable transfer.
#[derive(Debug)]
pub struct TransferHandle {
    options: OptionRegistry,
    info: Option<TransferInfo>,
    error_message: Option<String>,
    defaults: EngineDefaults,
    pub(crate) progress: Arc<Progress>,
    pub(crate) scheduler: Option<SchedulerId>,
    share: Option<Share>,
}

impl Default for TransferHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferHandle {
    pub fn new() -> Self {
        Self {
            options: OptionRegistry::new(),
            info: None,
            error_message: None,
            defaults: EngineDefaults::default(),
            progress: Arc::new(Progress::new()),
            scheduler: None,
            share: None,
        }
    }

    /// A handle that performs on an existing runtime and pool.
    pub fn with_share(share: Share) -> Self {
        let mut handle = Self::new();
        handle.share = Some(share);
        handle
    }

    pub fn set_defaults(&mut self, defaults: EngineDefaults) {
        self.defaults = defaults;
    }

    pub fn defaults(&self) -> &EngineDefaults {
        &self.defaults
    }

    pub fn set_option(&mut self, id: OptionId, value: OptionValue) -> Result<()> {
        self.options.set(id, value)
    }

    pub fn set_option_raw(&mut self, raw: u32, value: OptionValue) -> Result<()> {
        self.options.set_raw(raw, value)
    }

    pub fn options(&self) -> &OptionRegistry {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut OptionRegistry {
        &mut self.options
    }

    pub fn set_url(&mut self, url: &str) -> Result<()> {
        self.set_option(OptionId::Url, OptionValue::Str(url.to_string()))
    }

    pub fn set_method(&mut self, method: &str) -> Result<()> {
        self.set_option(OptionId::Method, OptionValue::Str(method.to_string()))
    }

    pub fn set_headers<I, S>(&mut self, lines: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines = lines.into_iter().map(Into::into).collect();
        self.set_option(OptionId::Headers, OptionValue::List(lines))
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.set_option(OptionId::TimeoutMs, OptionValue::Long(timeout.as_millis() as i64))
    }

    pub fn set_follow_redirects(&mut self, follow: bool) -> Result<()> {
        self.set_option(OptionId::FollowRedirects, OptionValue::Long(follow as i64))
    }

    /// -1 for unlimited.
    pub fn set_max_redirects(&mut self, max: i64) -> Result<()> {
        self.set_option(OptionId::MaxRedirects, OptionValue::Long(max))
    }

    pub fn set_tls_verify(&mut self, verify: bool) -> Result<()> {
        self.set_option(OptionId::TlsVerify, OptionValue::Long(verify as i64))
    }

    pub fn set_post_fields(&mut self, body: impl Into<Vec<u8>>) -> Result<()> {
        self.set_option(OptionId::PostFields, OptionValue::Blob(body.into()))
    }

    pub fn set_unix_socket_path(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into().to_string_lossy().into_owned();
        self.set_option(OptionId::UnixSocketPath, OptionValue::Str(path))
    }

    pub fn set_write_callback<F>(&mut self, f: F) -> Result<()>
    where
        F: FnMut(&[u8], Option<&UserData>) -> usize + Send + 'static,
    {
        self.set_option(OptionId::WriteCallback, OptionValue::Callback(TransferCallback::new(f)))
    }

    pub fn set_header_callback<F>(&mut self, f: F) -> Result<()>
    where
        F: FnMut(&[u8], Option<&UserData>) -> usize + Send + 'static,
    {
        self.set_option(OptionId::HeaderCallback, OptionValue::Callback(TransferCallback::new(f)))
    }

    pub fn set_user_data(&mut self, data: UserData) -> Result<()> {
        self.set_option(OptionId::UserData, OptionValue::Pointer(data))
    }

    /// Forget all options and the last execution. Pool and runtime are kept.
    pub fn reset(&mut self) {
        self.options.clear();
        self.info = None;
        self.error_message = None;
        self.progress.reset();
    }

    pub fn state(&self) -> TransferState {
        self.progress.state()
    }

    pub fn cancel_token(&self) -> CancelToken {
        CancelToken(self.progress.clone())
    }

    pub fn cancel(&self) {
        self.progress.cancel();
    }

    /// The scheduler this handle is registered with, if any.
    pub fn scheduler(&self) -> Option<SchedulerId> {
        self.scheduler
    }

    /// Message of the error that ended the last execution.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Record of the last execution; `None` before the first.
    pub fn info(&self) -> Option<&TransferInfo> {
        self.info.as_ref()
    }

    pub fn get_info(&self, id: InfoId) -> Result<InfoValue> {
        info::lookup(self.info.as_ref(), id)
    }

    pub fn get_info_raw(&self, raw: u32) -> Result<InfoValue> {
        self.get_info(InfoId::from_raw(raw)?)
    }

    pub fn info_long(&self, id: InfoId) -> Result<i64> {
        info::lookup_long(self.info.as_ref(), id)
    }

    pub fn info_int64(&self, id: InfoId) -> Result<i64> {
        info::lookup_int64(self.info.as_ref(), id)
    }

    pub fn info_double(&self, id: InfoId) -> Result<f64> {
        info::lookup_double(self.info.as_ref(), id)
    }

    pub fn info_str(&self, id: InfoId) -> Result<String> {
        info::lookup_str(self.info.as_ref(), id)
    }

    pub fn info_list(&self, id: InfoId) -> Result<Vec<String>> {
        info::lookup_list(self.info.as_ref(), id)
    }

    /// Execute the transfer, blocking the calling thread until it completes or fails.
    ///
    /// Panics when called from inside a tokio runtime.
    pub fn perform(&mut self) -> Result<()> {
        let share = match &self.share {
            Some(share) => share.clone(),
            None => {
                let share = Share::new(PoolConfig::default())?;
                self.share = Some(share.clone());
                share
            }
        };
        share.block_on(self.run(&share))
    }

    /// One execution on `share`. TransferInfo is replaced, never accumulated.
    pub(crate) async fn run(&mut self, share: &Share) -> Result<()> {
        let started = Instant::now();
        let url = self.options.string(OptionId::Url).unwrap_or_default().to_string();
        self.error_message = None;
        if let Ok(mut f) = self.progress.failure.lock() {
            *f = None;
        }
        let timeout = self
            .options
            .long(OptionId::TimeoutMs)
            .filter(|ms| *ms > 0)
            .map(|ms| Duration::from_millis(ms as u64));

        let result = {
            let user_data = self.options.user_data();
            let mut engine = Engine {
                options: &mut self.options,
                info: self.info.insert(TransferInfo::new(&url)),
                progress: &self.progress,
                share,
                defaults: &self.defaults,
                user_data,
                started,
            };
            let work = async {
                match timeout {
                    Some(d) => tokio::time::timeout(d, engine.execute())
                        .await
                        .unwrap_or_else(|_| Err(Error::TimedOut(d))),
                    None => engine.execute().await,
                }
            };
            tokio::select! {
                biased;
                _ = self.progress.cancelled() => Err(Error::Cancelled),
                r = work => r,
            }
        };

        if let Some(info) = self.info.as_mut() {
            info.total_time = started.elapsed();
        }
        match &result {
            Ok(()) => tracing::debug!("transfer of {} complete", url),
            Err(e) => {
                tracing::debug!("transfer of {} failed: {}", url, e);
                self.error_message = Some(e.to_string());
            }
        }
        self.progress.finish(result.as_ref().err().map(Error::kind));
        result
    }

    /// End a transfer that never started, e.g. cancelled while queued.
    pub(crate) fn fail_unstarted(&mut self, error: &Error) {
        self.info = None;
        self.error_message = Some(error.to_string());
        self.progress.finish(Some(error.kind()));
    }
}
