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

//! Elastic byte buffer absorbing partial reads and writes.

use std::io;
use std::os::unix::io::RawFd;

/// Growable byte container with separate read and write cursors and a reserved prefix for cheap
/// header prepending.
///
/// The layout is always
///
/// ```text
/// +-------------------+------------------+------------------+
/// | prependable bytes |  readable bytes  |  writable bytes  |
/// +-------------------+------------------+------------------+
/// 0       <=       reader      <=      writer     <=     capacity
/// ```
///
/// Data is appended at the write cursor and consumed from the read cursor. Consumed space is
/// recycled either wholesale (once the buffer fully drains both cursors snap back to the reserved
/// prefix) or by compacting the readable span down when an append would not otherwise fit.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Buffer {
    storage: Vec<u8>,
    reader: usize,
    writer: usize,
}

impl Default for Buffer {
    fn default() -> Self { Buffer::with_capacity(Self::INITIAL_SIZE) }
}

impl Buffer {
    /// Reserved prefix kept empty in front of the readable data so that small headers can be added
    /// with [`Buffer::prepend`] without reallocation or shifting.
    pub const CHEAP_PREPEND: usize = 8;

    /// Default capacity of the data section of a new buffer.
    pub const INITIAL_SIZE: usize = 1024;

    /// Size of the on-stack extension used by [`Buffer::read_fd`].
    const EXTEND_SIZE: usize = 65536;

    /// Creates an empty buffer able to absorb `initial` bytes of data past the reserved prefix
    /// before it has to grow.
    pub fn with_capacity(initial: usize) -> Self {
        Buffer {
            storage: vec![0; Self::CHEAP_PREPEND + initial],
            reader: Self::CHEAP_PREPEND,
            writer: Self::CHEAP_PREPEND,
        }
    }

    /// Number of unread bytes between the two cursors.
    pub fn readable_bytes(&self) -> usize { self.writer - self.reader }

    /// Free trailing capacity which can be appended to without growing.
    pub fn writable_bytes(&self) -> usize { self.storage.len() - self.writer }

    /// Free leading capacity in front of the read cursor.
    pub fn prependable_bytes(&self) -> usize { self.reader }

    /// Total size of the backing storage.
    pub fn capacity(&self) -> usize { self.storage.len() }

    /// Views the readable span without consuming it.
    pub fn peek(&self) -> &[u8] { &self.storage[self.reader..self.writer] }

    /// Advances the read cursor past `len` consumed bytes.
    ///
    /// Consuming everything readable (or more) resets both cursors back to the reserved prefix,
    /// recycling the whole span without reallocation.
    pub fn retrieve(&mut self, len: usize) {
        if len < self.readable_bytes() {
            self.reader += len;
        } else {
            self.retrieve_all();
        }
    }

    /// Marks all readable data as consumed, recycling the storage.
    pub fn retrieve_all(&mut self) {
        self.reader = Self::CHEAP_PREPEND;
        self.writer = Self::CHEAP_PREPEND;
    }

    /// Copies out up to `len` readable bytes and consumes them.
    pub fn retrieve_as_bytes(&mut self, len: usize) -> Vec<u8> {
        let len = len.min(self.readable_bytes());
        let data = self.peek()[..len].to_vec();
        self.retrieve(len);
        data
    }

    /// Copies out the whole readable span and consumes it.
    pub fn retrieve_all_as_bytes(&mut self) -> Vec<u8> { self.retrieve_as_bytes(self.readable_bytes()) }

    /// Appends `data` at the write cursor, growing or compacting the storage when the trailing
    /// capacity does not suffice.
    pub fn append(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.ensure_writable(data.len());
        self.storage[self.writer..self.writer + data.len()].copy_from_slice(data);
        self.writer += data.len();
    }

    /// Writes `data` immediately in front of the read cursor.
    ///
    /// The reserved prefix exists for this: a framing header can be added after the payload length
    /// is known, without shifting the payload. `data` must fit in [`Buffer::prependable_bytes`].
    pub fn prepend(&mut self, data: &[u8]) {
        debug_assert!(data.len() <= self.prependable_bytes(), "prepend exceeds the reserved prefix");
        self.reader -= data.len();
        self.storage[self.reader..self.reader + data.len()].copy_from_slice(data);
    }

    /// Makes sure at least `len` bytes can be appended without another allocation.
    ///
    /// When the free space at both ends taken together still fits `len` plus the reserved prefix,
    /// the readable span is compacted down to the prefix instead of growing the storage, trading a
    /// memmove for a heap allocation.
    pub fn ensure_writable(&mut self, len: usize) {
        if self.writable_bytes() >= len {
            return;
        }
        if self.writable_bytes() + self.prependable_bytes() < len + Self::CHEAP_PREPEND {
            self.storage.resize(self.writer + len, 0);
        } else {
            let readable = self.readable_bytes();
            self.storage.copy_within(self.reader..self.writer, Self::CHEAP_PREPEND);
            self.reader = Self::CHEAP_PREPEND;
            self.writer = self.reader + readable;
        }
    }

    /// Performs a single scatter read from `fd` into the buffer.
    ///
    /// The syscall targets both the writable tail and a 64KiB on-stack extension, so a read larger
    /// than the current capacity does not require a pre-sized allocation; whatever lands in the
    /// extension is appended afterwards, growing the storage. Returns the number of bytes read;
    /// zero means the peer has performed an orderly shutdown.
    pub fn read_fd(&mut self, fd: RawFd) -> io::Result<usize> {
        let mut extend = [0u8; Self::EXTEND_SIZE];
        let writable = self.writable_bytes();
        let iov = [
            libc::iovec {
                iov_base: unsafe { self.storage.as_mut_ptr().add(self.writer) } as *mut libc::c_void,
                iov_len: writable,
            },
            libc::iovec {
                iov_base: extend.as_mut_ptr() as *mut libc::c_void,
                iov_len: Self::EXTEND_SIZE,
            },
        ];
        let iovcnt = if writable < Self::EXTEND_SIZE { 2 } else { 1 };
        let read = unsafe { libc::readv(fd, iov.as_ptr(), iovcnt) };
        if read < 0 {
            return Err(io::Error::last_os_error());
        }
        let read = read as usize;
        if read <= writable {
            self.writer += read;
        } else {
            self.writer = self.storage.len();
            self.append(&extend[..read - writable]);
        }
        Ok(read)
    }

    /// Performs a single plain write of the readable span to `fd`.
    ///
    /// The read cursor is not moved: the caller must [`Buffer::retrieve`] the amount actually
    /// written.
    pub fn write_fd(&self, fd: RawFd) -> io::Result<usize> {
        let written = unsafe {
            libc::write(
                fd,
                self.storage.as_ptr().add(self.reader) as *const libc::c_void,
                self.readable_bytes(),
            )
        };
        if written < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(written as usize)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    use super::*;

    fn check_invariants(buf: &Buffer) {
        assert!(buf.prependable_bytes() >= Buffer::CHEAP_PREPEND);
        assert!(buf.prependable_bytes() + buf.readable_bytes() + buf.writable_bytes() == buf.capacity());
    }

    #[test]
    fn starts_empty() {
        let buf = Buffer::default();
        assert_eq!(buf.readable_bytes(), 0);
        assert_eq!(buf.writable_bytes(), Buffer::INITIAL_SIZE);
        assert_eq!(buf.prependable_bytes(), Buffer::CHEAP_PREPEND);
        check_invariants(&buf);
    }

    #[test]
    fn round_trip() {
        let mut buf = Buffer::default();
        buf.append(b"hello, elastic world");
        assert_eq!(buf.readable_bytes(), 20);
        assert_eq!(buf.retrieve_all_as_bytes(), b"hello, elastic world");
        assert_eq!(buf.readable_bytes(), 0);
        check_invariants(&buf);
    }

    #[test]
    fn partial_retrieve_keeps_remainder() {
        let mut buf = Buffer::default();
        buf.append(b"0123456789");
        buf.retrieve(4);
        assert_eq!(buf.peek(), b"456789");
        assert_eq!(buf.prependable_bytes(), Buffer::CHEAP_PREPEND + 4);
        assert_eq!(buf.retrieve_as_bytes(2), b"45");
        assert_eq!(buf.peek(), b"6789");
        check_invariants(&buf);
    }

    #[test]
    fn bookkeeping_matches_appended_minus_retrieved() {
        let mut buf = Buffer::with_capacity(32);
        let mut balance = 0usize;
        for (append, retrieve) in [(10, 3), (40, 20), (5, 0), (0, 25), (100, 107)] {
            buf.append(&vec![0xA5; append]);
            balance += append;
            let consumed = retrieve.min(buf.readable_bytes());
            buf.retrieve(retrieve);
            balance -= consumed;
            assert_eq!(buf.readable_bytes(), balance);
            check_invariants(&buf);
        }
    }

    #[test]
    fn drain_to_empty_recycles() {
        let mut buf = Buffer::default();
        buf.append(b"short lived");
        buf.retrieve(buf.readable_bytes());
        assert_eq!(buf.readable_bytes(), 0);
        assert_eq!(buf.prependable_bytes(), Buffer::CHEAP_PREPEND);
        assert_eq!(buf.writable_bytes(), buf.capacity() - Buffer::CHEAP_PREPEND);
    }

    #[test]
    fn over_retrieve_resets() {
        let mut buf = Buffer::default();
        buf.append(b"abc");
        buf.retrieve(100);
        assert_eq!(buf.readable_bytes(), 0);
        assert_eq!(buf.prependable_bytes(), Buffer::CHEAP_PREPEND);
    }

    #[test]
    fn compaction_avoids_growth() {
        let mut buf = Buffer::with_capacity(16);
        let capacity = buf.capacity();
        buf.append(b"0123456789");
        buf.retrieve(6);
        // 6 bytes of tail slack plus 14 of head slack fit another 10 bytes without reallocating
        buf.append(b"abcdefghij");
        assert_eq!(buf.capacity(), capacity);
        assert_eq!(buf.peek(), b"6789abcdefghij");
        check_invariants(&buf);
    }

    #[test]
    fn growth_when_slack_insufficient() {
        let mut buf = Buffer::with_capacity(16);
        buf.append(&[0x42; 30]);
        assert_eq!(buf.capacity(), Buffer::CHEAP_PREPEND + 30);
        assert_eq!(buf.readable_bytes(), 30);
        assert_eq!(buf.writable_bytes(), 0);
        check_invariants(&buf);
    }

    #[test]
    fn prepend_uses_reserved_prefix() {
        let mut buf = Buffer::default();
        let capacity = buf.capacity();
        buf.append(b"payload");
        buf.prepend(&7u16.to_be_bytes());
        assert_eq!(buf.capacity(), capacity);
        assert_eq!(buf.prependable_bytes(), Buffer::CHEAP_PREPEND - 2);
        assert_eq!(buf.retrieve_all_as_bytes(), b"\x00\x07payload");
    }

    #[test]
    fn zero_length_operations_are_noops() {
        let mut buf = Buffer::default();
        buf.append(b"");
        assert_eq!(buf.readable_bytes(), 0);
        buf.append(b"data");
        buf.retrieve(0);
        assert_eq!(buf.peek(), b"data");
    }

    #[test]
    fn scatter_read_grows_past_capacity() {
        let (mut remote, local) = UnixStream::pair().unwrap();
        let payload = (0..10_000u32).map(|i| (i % 251) as u8).collect::<Vec<_>>();
        remote.write_all(&payload).unwrap();
        drop(remote);

        let mut buf = Buffer::with_capacity(16);
        loop {
            let read = buf.read_fd(local.as_raw_fd()).unwrap();
            if read == 0 {
                break;
            }
            check_invariants(&buf);
        }
        assert_eq!(buf.readable_bytes(), payload.len());
        assert_eq!(buf.retrieve_all_as_bytes(), payload);
    }

    #[test]
    fn write_fd_round_trip() {
        let (local, mut remote) = UnixStream::pair().unwrap();
        let mut buf = Buffer::default();
        buf.append(b"roundtrip payload");

        let written = buf.write_fd(local.as_raw_fd()).unwrap();
        assert_eq!(written, 17);
        buf.retrieve(written);
        assert_eq!(buf.readable_bytes(), 0);

        let mut got = vec![0u8; written];
        remote.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"roundtrip payload");
    }

    #[test]
    fn read_from_invalid_descriptor_fails() {
        let mut buf = Buffer::default();
        assert!(buf.read_fd(-1).is_err());
    }
}
