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

//! Socket capability consumed by [`crate::Connection`].

use std::io::{self, ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};

use crate::Buffer;

/// Outcome of a single non-blocking I/O attempt.
#[derive(Debug)]
pub enum IoStatus {
    /// The attempt has transferred the given number of bytes.
    Success(usize),
    /// No progress was possible without blocking; not an error, the attempt is simply repeated on
    /// the next readiness notification.
    WouldBlock,
    /// The peer has performed an orderly shutdown (zero-length read).
    Shutdown,
    /// OS-level failure.
    Err(io::Error),
}

/// One connected socket, exclusively owned by a single [`crate::Connection`].
///
/// All operations are single non-blocking syscall attempts; none of them may block the calling
/// thread.
pub trait Socket: AsRawFd + Send + Sync + 'static {
    /// Performs one scatter read into the elastic buffer.
    fn read_buf(&self, buf: &mut Buffer) -> IoStatus;

    /// Performs one non-blocking write attempt. Never reports [`IoStatus::Shutdown`].
    fn write(&self, data: &[u8]) -> IoStatus;

    /// Shuts down the write direction of the connection, letting the peer finish sending.
    fn shutdown_write(&self) -> io::Result<()>;
}

/// Production [`Socket`] over a [`TcpStream`] switched into non-blocking mode.
pub struct TcpSocket {
    stream: TcpStream,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl TcpSocket {
    /// Wraps a connected stream, putting it into non-blocking mode.
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        Ok(TcpSocket {
            stream,
            local_addr,
            peer_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr { self.local_addr }
    pub fn peer_addr(&self) -> SocketAddr { self.peer_addr }
}

impl AsRawFd for TcpSocket {
    fn as_raw_fd(&self) -> RawFd { self.stream.as_raw_fd() }
}

impl Socket for TcpSocket {
    fn read_buf(&self, buf: &mut Buffer) -> IoStatus {
        match buf.read_fd(self.stream.as_raw_fd()) {
            Ok(0) => IoStatus::Shutdown,
            Ok(len) => IoStatus::Success(len),
            Err(err) if err.kind() == ErrorKind::WouldBlock => IoStatus::WouldBlock,
            Err(err) => IoStatus::Err(err),
        }
    }

    fn write(&self, data: &[u8]) -> IoStatus {
        if data.is_empty() {
            return IoStatus::Success(0);
        }
        match (&self.stream).write(data) {
            Ok(0) => IoStatus::WouldBlock,
            Ok(len) => IoStatus::Success(len),
            Err(err) if err.kind() == ErrorKind::WriteZero => IoStatus::WouldBlock,
            Err(err) if err.kind() == ErrorKind::WouldBlock => IoStatus::WouldBlock,
            Err(err) => IoStatus::Err(err),
        }
    }

    fn shutdown_write(&self) -> io::Result<()> { self.stream.shutdown(Shutdown::Write) }
}
