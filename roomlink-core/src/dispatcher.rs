//! Callback dispatch
//!
//! Native events arrive on engine threads. They are never handled there:
//! [`CallbackBinding::deliver`] posts them onto the [`CallbackThread`] the
//! binding captured, where they run in FIFO order. Once a binding is unbound
//! (entity release), queued and future deliveries are dropped.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::error::{LifecycleError, LifecycleResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Stop,
}

struct HandleInner {
    name: String,
    thread_id: ThreadId,
    sender: mpsc::UnboundedSender<Message>,
}

/// Posting side of a callback thread. Cheap to clone; posting never blocks.
#[derive(Clone)]
pub struct CallbackHandle {
    inner: Arc<HandleInner>,
}

impl CallbackHandle {
    /// Queue a job. Returns `false` once the thread has stopped.
    pub fn post<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.sender.send(Message::Run(Box::new(job))).is_ok()
    }

    /// Whether the caller is running on this callback thread
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.inner.thread_id
    }

    pub fn thread_id(&self) -> ThreadId {
        self.inner.thread_id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Block until every job posted before this call has run.
    ///
    /// Returns `false` on timeout or if the thread has stopped. Returns `true`
    /// immediately when called from the callback thread itself.
    pub fn barrier(&self, timeout: Duration) -> bool {
        if self.is_current() {
            return true;
        }
        let (tx, rx) = std::sync::mpsc::channel();
        if !self.post(move || {
            let _ = tx.send(());
        }) {
            return false;
        }
        rx.recv_timeout(timeout).is_ok()
    }
}

impl fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackHandle")
            .field("name", &self.inner.name)
            .field("thread_id", &self.inner.thread_id)
            .finish()
    }
}

/// A dedicated thread that runs posted callbacks one at a time
pub struct CallbackThread {
    handle: CallbackHandle,
    join: Option<JoinHandle<()>>,
}

impl CallbackThread {
    pub fn spawn(name: impl Into<String>) -> LifecycleResult<Self> {
        let name = name.into();
        let (sender, mut receiver) = mpsc::unbounded_channel::<Message>();
        let thread_name = name.clone();

        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                debug!(thread = %thread_name, "Callback thread started");
                while let Some(message) = receiver.blocking_recv() {
                    match message {
                        Message::Run(job) => {
                            // Listener panics stay contained to one delivery
                            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                                error!(thread = %thread_name, "Callback panicked");
                            }
                        }
                        Message::Stop => break,
                    }
                }
                debug!(thread = %thread_name, "Callback thread stopped");
            })
            .map_err(|e| LifecycleError::Dispatcher(format!("failed to spawn {}: {}", name, e)))?;

        let thread_id = join.thread().id();
        Ok(Self {
            handle: CallbackHandle {
                inner: Arc::new(HandleInner {
                    name,
                    thread_id,
                    sender,
                }),
            },
            join: Some(join),
        })
    }

    pub fn handle(&self) -> CallbackHandle {
        self.handle.clone()
    }

    /// Stop after the jobs already queued have run, then join
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.handle.inner.sender.send(Message::Stop);
        if let Some(join) = self.join.take() {
            if self.handle.is_current() {
                return;
            }
            if join.join().is_err() {
                error!(thread = %self.handle.name(), "Callback thread terminated abnormally");
            }
        }
    }
}

impl Drop for CallbackThread {
    fn drop(&mut self) {
        self.stop();
    }
}

struct BindingInner<L: ?Sized> {
    label: String,
    target: CallbackHandle,
    listener: Mutex<Option<Arc<L>>>,
    // Held while a delivery runs on the target thread; unbind from any other
    // thread waits on it.
    gate: Mutex<()>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Ties one listener to one callback thread
pub struct CallbackBinding<L: ?Sized + Send + Sync + 'static> {
    inner: Arc<BindingInner<L>>,
}

impl<L: ?Sized + Send + Sync + 'static> Clone for CallbackBinding<L> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<L: ?Sized + Send + Sync + 'static> CallbackBinding<L> {
    pub fn bind(label: impl Into<String>, target: CallbackHandle, listener: Arc<L>) -> Self {
        let label = label.into();
        trace!(binding = %label, thread = %target.name(), "Callback binding created");
        Self {
            inner: Arc::new(BindingInner {
                label,
                target,
                listener: Mutex::new(Some(listener)),
                gate: Mutex::new(()),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Post `f` to run against the listener on the bound thread.
    ///
    /// Never blocks. Returns `false` when the delivery was dropped immediately;
    /// a delivery accepted here can still be dropped if the binding is unbound
    /// before it runs. Whatever `f` returns is dropped after the gate is
    /// released, still on the bound thread.
    pub fn deliver<F, R>(&self, f: F) -> bool
    where
        F: FnOnce(&L) -> R + Send + 'static,
    {
        if !self.is_bound() {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(binding = %self.inner.label, "Delivery dropped after unbind");
            return false;
        }

        let inner = self.inner.clone();
        let posted = self.inner.target.post(move || {
            let gate = inner.gate.lock();
            let listener = inner.listener.lock().clone();
            match listener {
                Some(listener) => {
                    inner.delivered.fetch_add(1, Ordering::Relaxed);
                    let after_gate = f(&*listener);
                    drop(gate);
                    drop(after_gate);
                }
                None => {
                    inner.dropped.fetch_add(1, Ordering::Relaxed);
                    trace!(binding = %inner.label, "Queued delivery dropped after unbind");
                }
            }
        });

        if !posted {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(binding = %self.inner.label, "Callback thread gone; delivery dropped");
        }
        posted
    }

    /// Stop all deliveries. Returns `true` on the first call.
    ///
    /// Off the bound thread this waits for an in-flight delivery to finish, so
    /// a listener never sees its arguments torn down mid-callback.
    pub fn unbind(&self) -> bool {
        let _gate = if self.inner.target.is_current() {
            None
        } else {
            Some(self.inner.gate.lock())
        };
        let was_bound = self.inner.listener.lock().take().is_some();
        if was_bound {
            trace!(binding = %self.inner.label, "Callback binding torn down");
        }
        was_bound
    }

    pub fn is_bound(&self) -> bool {
        self.inner.listener.lock().is_some()
    }

    pub fn target(&self) -> &CallbackHandle {
        &self.inner.target
    }

    pub fn delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}
