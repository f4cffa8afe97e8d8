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

//! Readiness vocabulary and the surface consumed from the external event loop.

use std::fmt::{self, Display, Formatter};
use std::ops;
use std::os::unix::io::RawFd;

/// Information about a single I/O readiness notification.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Io {
    Read,
    Write,
}

/// Set of I/O readiness interests for a file descriptor.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub struct IoType {
    /// Specifies whether I/O source has data to read.
    pub read: bool,
    /// Specifies whether I/O source is ready for write operations.
    pub write: bool,
}

impl IoType {
    pub fn none() -> Self {
        Self {
            read: false,
            write: false,
        }
    }

    pub fn read_only() -> Self {
        Self {
            read: true,
            write: false,
        }
    }

    pub fn write_only() -> Self {
        Self {
            read: false,
            write: true,
        }
    }

    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
        }
    }

    pub fn is_none(self) -> bool { !self.read && !self.write }
    pub fn is_read_only(self) -> bool { self.read && !self.write }
    pub fn is_write_only(self) -> bool { !self.read && self.write }
    pub fn is_read_write(self) -> bool { self.read && self.write }
}

impl ops::Not for IoType {
    type Output = Self;

    fn not(self) -> Self::Output {
        Self {
            read: !self.read,
            write: !self.write,
        }
    }
}

impl Iterator for IoType {
    type Item = Io;

    fn next(&mut self) -> Option<Self::Item> {
        if self.write {
            self.write = false;
            Some(Io::Write)
        } else if self.read {
            self.read = false;
            Some(Io::Read)
        } else {
            None
        }
    }
}

impl Display for IoType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("none")
        } else if self.is_read_write() {
            f.write_str("read-write")
        } else if self.read {
            f.write_str("read")
        } else if self.write {
            f.write_str("write")
        } else {
            unreachable!()
        }
    }
}

/// Unit of cross-thread scheduling: a closure executed serially on the loop's own thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Capabilities a [`crate::Connection`] consumes from the event loop owning it.
///
/// One loop runs per OS thread and owns a disjoint subset of connections; everything a connection
/// does happens serially on its loop's thread. Implementations must deliver
/// [`EventLoop::run_in_loop`] tasks on that thread in submission order.
pub trait EventLoop: Send + Sync + 'static {
    /// Registers or updates readiness interest for a descriptor.
    ///
    /// Watching with [`IoType::none`] keeps the registration alive with no interest.
    fn watch(&self, fd: RawFd, interest: IoType);

    /// Drops the registration of a descriptor.
    fn unwatch(&self, fd: RawFd);

    /// Enqueues a task to execute serially on the loop's own thread at its next iteration.
    fn run_in_loop(&self, task: Task);

    /// Whether the calling thread is the loop's own thread.
    fn in_loop_thread(&self) -> bool;
}
