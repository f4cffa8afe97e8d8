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

#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    unused_imports,
    dead_code,
    //missing_docs
)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Connection engine for reactor-pattern TCP services: the machinery sitting between an event
//! loop which delivers readiness notifications and application callbacks which consume bytes.
//!
//! The crate provides the three tightly coupled pieces every such server needs:
//!
//! - [`Buffer`], an elastic byte buffer with separate read/write cursors and a cheap-prepend
//!   region, absorbing partial reads and writes without copying more than necessary;
//! - [`Connection`], the per-socket state machine safely sequencing asynchronous read, write,
//!   half-close and teardown events while the object is still referenced from pending callbacks;
//! - [`Thread`], an OS thread handle whose startup barrier guarantees the spawned thread identity
//!   is known before `start` returns.
//!
//! The event loop itself is deliberately not part of the crate: connections consume it through
//! the [`EventLoop`] trait (readiness registration plus cross-thread task scheduling), and the
//! socket syscall surface through the [`Socket`] trait, with [`TcpSocket`] as the production
//! implementation. Each loop runs on its own thread and owns a disjoint set of connections;
//! everything a connection does happens serially on its loop's thread, and operations invoked
//! from elsewhere marshal themselves there.

#[macro_use]
extern crate amplify;

mod buffer;
mod connection;
mod dispatch;
mod socket;
mod thread;
mod timestamp;

pub use buffer::Buffer;
pub use connection::{
    CloseCallback, Connection, ConnectionCallback, HighWaterMarkCallback, MessageCallback, State,
    WriteCompleteCallback,
};
pub use dispatch::{EventLoop, Io, IoType, Task};
pub use socket::{IoStatus, Socket, TcpSocket};
pub use thread::Thread;
pub use timestamp::Timestamp;
