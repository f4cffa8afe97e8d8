// Library for non-blocking TCP connection management in reactor-pattern network services.
//
// SPDX-License-Identifier: Apache-2.0
//
// Written in 2021-2025 by
//     Dr. Maxim Orlovsky <orlovsky@ubideco.org>
//     Alexis Sellier <alexis@cloudhead.io>
//
// Copyright 2022-2025 UBIDECO Labs, InDCS, Lugano, Switzerland. All Rights reserved.
// Copyright 2021-2023 Alexis Sellier <alexis@cloudhead.io>. All Rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use this file except
// in compliance with the License. You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under the License
// is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express
// or implied. See the License for the specific language governing permissions and limitations under
// the License.

//! OS thread handle with a deterministic startup barrier.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel as chan;

static THREADS_CREATED: AtomicUsize = AtomicUsize::new(0);

/// Handle over a single OS thread whose identity is known to the creator before
/// [`Thread::start`] returns.
///
/// Plain [`thread::spawn`] leaves a window where the creator holds a [`JoinHandle`] to a thread
/// which has not begun executing; a thread-pool which records worker identities right after
/// spawning would read garbage in that window. `start` closes it with a handshake: it blocks
/// until the spawned thread has recorded its own identity, then returns while the user function
/// keeps running concurrently.
pub struct Thread {
    name: String,
    func: Option<Box<dyn FnOnce() + Send + 'static>>,
    handle: Option<JoinHandle<()>>,
    id: Option<ThreadId>,
    started: bool,
    joined: bool,
}

impl Thread {
    /// Creates a handle with a synthesized diagnostic name (`Thread-<N>`, with `N` drawn from a
    /// process-wide counter).
    pub fn new(func: impl FnOnce() + Send + 'static) -> Self {
        let num = THREADS_CREATED.fetch_add(1, Ordering::SeqCst) + 1;
        Self::with(func, format!("Thread-{num}"))
    }

    /// Creates a handle carrying the given name.
    pub fn named(func: impl FnOnce() + Send + 'static, name: impl ToString) -> Self {
        Self::with(func, name.to_string())
    }

    fn with(func: impl FnOnce() + Send + 'static, name: String) -> Self {
        Thread {
            name,
            func: Some(Box::new(func)),
            handle: None,
            id: None,
            started: false,
            joined: false,
        }
    }

    /// Spawns the OS thread executing the stored function.
    ///
    /// Blocks until the spawned thread has recorded its own identity; after this call [`Thread::id`]
    /// is guaranteed to return it. The user function executes concurrently with the return.
    ///
    /// # Error
    ///
    /// Errors with a system/OS error if it was impossible to spawn a thread.
    pub fn start(&mut self) -> io::Result<()> {
        debug_assert!(!self.started, "thread started twice");
        let func = self.func.take().expect("thread started twice");

        let (id_send, id_recv) = chan::bounded::<ThreadId>(1);
        let handle = thread::Builder::new().name(self.name.clone()).spawn(move || {
            id_send.send(thread::current().id()).expect("thread handshake channel is broken");
            func();
        })?;

        // The receive happens-after the send in the child, so the identity read below can't
        // observe the unset sentinel
        let id = id_recv.recv().expect("thread handshake channel is broken");
        self.id = Some(id);
        self.handle = Some(handle);
        self.started = true;

        #[cfg(feature = "log")]
        log::debug!(target: "conduit-thread", "Started thread {} ({:?})", self.name, id);

        Ok(())
    }

    /// Blocks until the spawned thread terminates.
    pub fn join(&mut self) -> thread::Result<()> {
        debug_assert!(self.started, "joining a thread which was never started");
        let handle = self.handle.take().expect("thread joined twice");
        self.joined = true;
        handle.join()
    }

    pub fn name(&self) -> &str { &self.name }

    /// Identity of the spawned thread; `None` until [`Thread::start`] has returned.
    pub fn id(&self) -> Option<ThreadId> { self.id }

    pub fn started(&self) -> bool { self.started }

    pub fn joined(&self) -> bool { self.joined }
}

impl Drop for Thread {
    fn drop(&mut self) {
        // A started but unjoined thread is detached rather than aborted or waited for; the caller
        // owns the consequence of abandoning its work mid-flight
        if self.started && !self.joined {
            #[cfg(feature = "log")]
            log::warn!(target: "conduit-thread", "Detaching unjoined thread {}", self.name);

            drop(self.handle.take());
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn identity_known_after_start() {
        let (tx, rx) = mpsc::channel();
        let mut thread = Thread::new(move || {
            tx.send(thread::current().id()).unwrap();
        });
        assert!(thread.id().is_none());

        thread.start().unwrap();
        let id = thread.id().expect("identity must be available once start returns");
        assert_eq!(id, rx.recv().unwrap());
        thread.join().unwrap();
    }

    #[test]
    fn join_observes_side_effects() {
        let flag = Arc::new(AtomicBool::new(false));
        let seen = flag.clone();
        let mut thread = Thread::named(move || seen.store(true, Ordering::SeqCst), "worker");
        assert_eq!(thread.name(), "worker");

        thread.start().unwrap();
        thread.join().unwrap();
        assert!(thread.joined());
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn default_names_are_distinct() {
        let first = Thread::new(|| {});
        let second = Thread::new(|| {});
        assert!(first.name().starts_with("Thread-"));
        assert!(second.name().starts_with("Thread-"));
        assert_ne!(first.name(), second.name());
    }

    // The sharp edge by design: dropping a started handle silently abandons the live thread.
    // Callers relying on shutdown ordering must join explicitly.
    #[test]
    fn unjoined_thread_is_detached_on_drop() {
        let (release, blocked) = mpsc::channel::<()>();
        let mut thread = Thread::new(move || {
            blocked.recv().ok();
        });
        thread.start().unwrap();

        drop(thread); // must not block or panic while the thread is still running
        release.send(()).unwrap();
    }
}
