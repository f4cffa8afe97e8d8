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

//! Per-connection state machine driven by readiness notifications from an event loop.

#![allow(unused_variables)] // because we need them for feature-gated logger

use std::io;
use std::net::SocketAddr;
#[cfg(test)]
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::dispatch::{EventLoop, Io, IoType};
use crate::socket::{IoStatus, Socket};
use crate::{Buffer, Timestamp};

/// Default cap on bytes buffered for sending before the high-water-mark callback warns the
/// application to slow down.
const HIGH_WATER_MARK: usize = 64 * 1024 * 1024;

/// Lifecycle of a [`Connection`].
///
/// Each connection instance passes through these states strictly forward and at most once; only
/// the defined transition operations may change it.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display)]
#[repr(u8)]
pub enum State {
    #[display("disconnected")]
    Disconnected = 0,
    #[display("connecting")]
    Connecting = 1,
    #[display("connected")]
    Connected = 2,
    #[display("disconnecting")]
    Disconnecting = 3,
}

impl State {
    fn from_raw(raw: u8) -> State {
        match raw {
            0 => State::Disconnected,
            1 => State::Connecting,
            2 => State::Connected,
            3 => State::Disconnecting,
            _ => unreachable!("invalid connection state"),
        }
    }
}

/// Invoked when the connection becomes live and once more when it is torn down; the two are told
/// apart with [`Connection::connected`].
pub type ConnectionCallback<S, L> = Box<dyn Fn(&Arc<Connection<S, L>>) + Send + Sync>;

/// Invoked with the input buffer and receive time once bytes have arrived. The callback drains
/// whatever it consumes via [`Buffer::retrieve`]; unconsumed bytes stay readable for the next
/// delivery.
pub type MessageCallback<S, L> =
    Box<dyn Fn(&Arc<Connection<S, L>>, &mut Buffer, Timestamp) + Send + Sync>;

/// Invoked once all queued output has reached the socket.
pub type WriteCompleteCallback<S, L> = Box<dyn Fn(&Arc<Connection<S, L>>) + Send + Sync>;

/// Invoked with the buffered byte count when queued output first exceeds the high-water mark.
pub type HighWaterMarkCallback<S, L> = Box<dyn Fn(&Arc<Connection<S, L>>, usize) + Send + Sync>;

/// Invoked at the end of the close sequence so the owning server can drop the connection from its
/// registry.
pub type CloseCallback<S, L> = Box<dyn Fn(&Arc<Connection<S, L>>) + Send + Sync>;

/// One accepted TCP connection: a socket, its input and output [`Buffer`]s and the state machine
/// sequencing read, write, half-close and teardown events.
///
/// A connection is owned by exactly one event loop and all of its mutating operations must run on
/// that loop's thread; [`Connection::send`] and [`Connection::shutdown`] marshal themselves there
/// when called from elsewhere. The object is shared between the loop's registry and pending
/// callback invocations as an [`Arc`] produced by [`Connection::into_shared`], and is destroyed
/// when the last clone drops.
pub struct Connection<S: Socket, L: EventLoop> {
    name: String,
    loop_handle: Arc<L>,
    socket: S,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    state: AtomicU8,
    closed: AtomicBool,
    interest: Mutex<IoType>,
    input: Mutex<Buffer>,
    output: Mutex<Buffer>,
    high_water_mark: usize,
    last_error: Mutex<Option<io::Error>>,
    weak_self: Weak<Connection<S, L>>,
    on_connection: Option<ConnectionCallback<S, L>>,
    on_message: Option<MessageCallback<S, L>>,
    on_write_complete: Option<WriteCompleteCallback<S, L>>,
    on_high_water_mark: Option<HighWaterMarkCallback<S, L>>,
    on_close: Option<CloseCallback<S, L>>,
}

impl<S: Socket, L: EventLoop> Connection<S, L> {
    /// Creates a connection in `connecting` state over an already-accepted socket.
    ///
    /// Callbacks are installed next, then the connection is moved into shared ownership with
    /// [`Connection::into_shared`] and activated with [`Connection::connect_established`].
    pub fn new(
        loop_handle: Arc<L>,
        name: String,
        socket: S,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
    ) -> Self {
        #[cfg(feature = "log")]
        log::debug!(target: "conduit-conn", "Creating connection {name} between {local_addr} and {peer_addr}");

        Connection {
            name,
            loop_handle,
            socket,
            local_addr,
            peer_addr,
            state: AtomicU8::new(State::Connecting as u8),
            closed: AtomicBool::new(false),
            interest: Mutex::new(IoType::none()),
            input: Mutex::new(Buffer::default()),
            output: Mutex::new(Buffer::default()),
            high_water_mark: HIGH_WATER_MARK,
            last_error: Mutex::new(None),
            weak_self: Weak::new(),
            on_connection: None,
            on_message: None,
            on_write_complete: None,
            on_high_water_mark: None,
            on_close: None,
        }
    }

    pub fn set_connection_callback(&mut self, cb: impl Fn(&Arc<Self>) + Send + Sync + 'static) {
        self.on_connection = Some(Box::new(cb));
    }

    pub fn set_message_callback(
        &mut self,
        cb: impl Fn(&Arc<Self>, &mut Buffer, Timestamp) + Send + Sync + 'static,
    ) {
        self.on_message = Some(Box::new(cb));
    }

    pub fn set_write_complete_callback(&mut self, cb: impl Fn(&Arc<Self>) + Send + Sync + 'static) {
        self.on_write_complete = Some(Box::new(cb));
    }

    /// Installs the backpressure callback together with the buffered-byte threshold above which it
    /// fires.
    pub fn set_high_water_mark_callback(
        &mut self,
        cb: impl Fn(&Arc<Self>, usize) + Send + Sync + 'static,
        mark: usize,
    ) {
        self.on_high_water_mark = Some(Box::new(cb));
        self.high_water_mark = mark;
    }

    pub fn set_close_callback(&mut self, cb: impl Fn(&Arc<Self>) + Send + Sync + 'static) {
        self.on_close = Some(Box::new(cb));
    }

    /// Moves the connection into shared ownership.
    ///
    /// The loop's registry and every pending callback invocation hold clones of the returned
    /// [`Arc`]; the connection is destroyed once the last clone drops. All callbacks must be
    /// installed beforehand.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new_cyclic(|weak| Connection {
            weak_self: weak.clone(),
            ..self
        })
    }

    fn shared(&self) -> Arc<Self> {
        self.weak_self.upgrade().expect("connection used before being moved into shared ownership")
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn local_addr(&self) -> SocketAddr { self.local_addr }
    pub fn peer_addr(&self) -> SocketAddr { self.peer_addr }
    pub fn loop_handle(&self) -> &Arc<L> { &self.loop_handle }

    pub fn state(&self) -> State { State::from_raw(self.state.load(Ordering::Acquire)) }
    pub fn connected(&self) -> bool { self.state() == State::Connected }

    /// Takes the last I/O error recorded on the connection, if any.
    ///
    /// Failures never reach application callbacks directly; a faulted connection goes through the
    /// ordinary close notifications and the error stays retrievable here.
    pub fn last_error(&self) -> Option<io::Error> {
        self.last_error.lock().expect("lock poisoned").take()
    }

    /// Activates the connection: registers read interest with the owning loop and signals the
    /// connection callback. Called exactly once, on the loop's thread, right after construction.
    pub fn connect_established(&self) {
        debug_assert!(self.loop_handle.in_loop_thread(), "connection mutated outside its loop");
        debug_assert_eq!(self.state(), State::Connecting, "connection activated twice");
        self.state.store(State::Connected as u8, Ordering::Release);
        {
            let mut interest = self.interest.lock().expect("lock poisoned");
            interest.read = true;
            self.loop_handle.watch(self.socket.as_raw_fd(), *interest);
        }

        #[cfg(feature = "log")]
        log::debug!(
            target: "conduit-conn",
            "Connection {} established between {} and {}",
            self.name, self.local_addr, self.peer_addr
        );

        let conn = self.shared();
        if let Some(cb) = &self.on_connection {
            cb(&conn)
        }
    }

    /// Entry point for the dispatcher: drives one step of the state machine for a single readiness
    /// notification observed at `time`.
    pub fn handle_io(&self, io: Io, time: Timestamp) {
        debug_assert!(self.loop_handle.in_loop_thread(), "connection polled outside its loop");
        match io {
            Io::Read => self.handle_read(time),
            Io::Write => self.handle_write(),
        }
    }

    fn handle_read(&self, time: Timestamp) {
        let mut input = self.input.lock().expect("lock poisoned");
        match self.socket.read_buf(&mut input) {
            IoStatus::Success(len) => {
                #[cfg(feature = "log")]
                log::trace!(target: "conduit-conn", "Read {len} bytes from connection {}", self.name);

                let conn = self.shared();
                if let Some(cb) = &self.on_message {
                    cb(&conn, &mut input, time)
                }
            }
            IoStatus::WouldBlock => {}
            IoStatus::Shutdown => {
                drop(input);
                self.handle_close();
            }
            IoStatus::Err(err) => {
                drop(input);
                self.handle_error(err);
            }
        }
    }

    fn handle_write(&self) {
        let writing = self.interest.lock().expect("lock poisoned").write;
        if !writing {
            #[cfg(feature = "log")]
            log::trace!(target: "conduit-conn", "Connection {} is down, no more writing", self.name);
            return;
        }

        let mut output = self.output.lock().expect("lock poisoned");
        match self.socket.write(output.peek()) {
            IoStatus::Success(len) => {
                output.retrieve(len);
                if output.readable_bytes() == 0 {
                    {
                        let mut interest = self.interest.lock().expect("lock poisoned");
                        interest.write = false;
                        self.loop_handle.watch(self.socket.as_raw_fd(), *interest);
                    }
                    self.queue_write_complete();
                    if self.state() == State::Disconnecting {
                        drop(output);
                        self.shutdown_in_loop();
                    }
                }
            }
            // A write never observes an orderly shutdown; both mean no progress this attempt
            IoStatus::WouldBlock | IoStatus::Shutdown => {}
            IoStatus::Err(err) => {
                drop(output);
                self.handle_error(err);
            }
        }
    }

    /// Sends `data` to the peer, buffering whatever the socket does not accept at once.
    ///
    /// Callable from any thread: off the owning loop the data is copied and the operation marshals
    /// itself there. A send against a connection which is no longer `connected` is silently
    /// dropped, since teardown may already be in flight due to a race between application intent
    /// and peer-initiated close.
    pub fn send(&self, data: &[u8]) {
        if self.state() != State::Connected {
            return;
        }
        if self.loop_handle.in_loop_thread() {
            self.send_in_loop(data);
        } else {
            let conn = self.shared();
            let data = data.to_vec();
            self.loop_handle.run_in_loop(Box::new(move || conn.send_in_loop(&data)));
        }
    }

    fn send_in_loop(&self, data: &[u8]) {
        debug_assert!(self.loop_handle.in_loop_thread(), "connection mutated outside its loop");
        if self.state() != State::Connected {
            #[cfg(feature = "log")]
            log::warn!(
                target: "conduit-conn",
                "Discarding {} bytes sent to connection {} which is {}",
                data.len(), self.name, self.state()
            );
            return;
        }

        let mut output = self.output.lock().expect("lock poisoned");
        let writing = self.interest.lock().expect("lock poisoned").write;

        // Nothing queued and nothing in flight: try to write directly, bypassing the buffer
        let mut written = 0usize;
        if !writing && output.readable_bytes() == 0 {
            match self.socket.write(data) {
                IoStatus::Success(len) => {
                    written = len;
                    if written == data.len() {
                        self.queue_write_complete();
                    }
                }
                IoStatus::WouldBlock | IoStatus::Shutdown => {}
                IoStatus::Err(err) => {
                    drop(output);
                    self.handle_error(err);
                    return;
                }
            }
        }

        let remaining = &data[written..];
        if remaining.is_empty() {
            return;
        }

        let buffered = output.readable_bytes();
        output.append(remaining);
        let now_buffered = output.readable_bytes();
        // Fire once per threshold crossing, not once per send while above it
        if now_buffered >= self.high_water_mark
            && buffered < self.high_water_mark
            && self.on_high_water_mark.is_some()
        {
            let conn = self.shared();
            self.loop_handle.run_in_loop(Box::new(move || {
                if let Some(cb) = &conn.on_high_water_mark {
                    cb(&conn, now_buffered)
                }
            }));
        }

        let mut interest = self.interest.lock().expect("lock poisoned");
        if !interest.write {
            interest.write = true;
            self.loop_handle.watch(self.socket.as_raw_fd(), *interest);
        }
    }

    fn queue_write_complete(&self) {
        if self.on_write_complete.is_none() {
            return;
        }
        let conn = self.shared();
        self.loop_handle.run_in_loop(Box::new(move || {
            if let Some(cb) = &conn.on_write_complete {
                cb(&conn)
            }
        }));
    }

    /// Initiates a half-close: the connection stops sending once all queued output is flushed,
    /// while reads continue until the peer closes in turn.
    ///
    /// Only meaningful on a `connected` connection; otherwise a no-op.
    pub fn shutdown(&self) {
        if self
            .state
            .compare_exchange(
                State::Connected as u8,
                State::Disconnecting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }
        if self.loop_handle.in_loop_thread() {
            self.shutdown_in_loop();
        } else {
            let conn = self.shared();
            self.loop_handle.run_in_loop(Box::new(move || conn.shutdown_in_loop()));
        }
    }

    fn shutdown_in_loop(&self) {
        debug_assert!(self.loop_handle.in_loop_thread(), "connection mutated outside its loop");
        let writing = self.interest.lock().expect("lock poisoned").write;
        // With output still in flight the half-close is deferred until handle_write drains it
        if !writing {
            #[cfg(feature = "log")]
            log::debug!(target: "conduit-conn", "Shutting down write side of connection {}", self.name);

            if let Err(err) = self.socket.shutdown_write() {
                #[cfg(feature = "log")]
                log::error!(target: "conduit-conn", "Failed to shut down connection {}: {err}", self.name);
            }
        }
    }

    /// Close sequence, executed at most once: state change, unregistration of all readiness
    /// interest, teardown signal on the connection callback, then the close notification which
    /// lets the server drop its registry reference. After this ordering the application can't
    /// observe further I/O events on a connection it was told is closing.
    fn handle_close(&self) {
        debug_assert!(self.loop_handle.in_loop_thread(), "connection mutated outside its loop");
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        #[cfg(feature = "log")]
        log::debug!(target: "conduit-conn", "Closing connection {} in state {}", self.name, self.state());

        self.state.store(State::Disconnected as u8, Ordering::Release);
        {
            let mut interest = self.interest.lock().expect("lock poisoned");
            *interest = IoType::none();
            self.loop_handle.watch(self.socket.as_raw_fd(), *interest);
        }

        let conn = self.shared();
        if let Some(cb) = &self.on_connection {
            cb(&conn)
        }
        if let Some(cb) = &self.on_close {
            cb(&conn)
        }
    }

    fn handle_error(&self, err: io::Error) {
        #[cfg(feature = "log")]
        log::error!(target: "conduit-conn", "Connection {} failed: {err}", self.name);

        *self.last_error.lock().expect("lock poisoned") = Some(err);
        self.handle_close();
    }

    /// Final teardown hook invoked by the owning server once the close sequence has completed;
    /// releases the descriptor registration. If the close path never ran (server-initiated
    /// destruction of a live connection) the teardown notifications are performed here.
    pub fn connect_destroyed(&self) {
        debug_assert!(self.loop_handle.in_loop_thread(), "connection mutated outside its loop");
        if self.state() == State::Connected && !self.closed.swap(true, Ordering::AcqRel) {
            self.state.store(State::Disconnected as u8, Ordering::Release);
            {
                let mut interest = self.interest.lock().expect("lock poisoned");
                *interest = IoType::none();
                self.loop_handle.watch(self.socket.as_raw_fd(), *interest);
            }
            let conn = self.shared();
            if let Some(cb) = &self.on_connection {
                cb(&conn)
            }
        }
        self.loop_handle.unwatch(self.socket.as_raw_fd());

        #[cfg(feature = "log")]
        log::debug!(target: "conduit-conn", "Connection {} destroyed", self.name);
    }
}
