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

use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::time::{Duration, SystemTime};

/// Microsecond-precision UNIX timestamp marking the moment a readiness event was observed.
///
/// Passed to the message callback with every delivery of received bytes.
///
/// ```
/// # use std::time::Duration;
/// use conduit::Timestamp;
///
/// let received = Timestamp::now();
/// let deadline = received + Duration::from_millis(250);
/// assert_eq!((deadline - received).into_micros(), 250_000);
/// ```
#[derive(Wrapper, WrapperMut, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, From)]
#[wrapper(Display, LowerHex, UpperHex, Octal, Add, Sub)]
#[wrapper_mut(AddAssign, SubAssign)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates timestamp matching the current moment.
    pub fn now() -> Self {
        let duration =
            SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).expect("system time");
        Self(duration.as_micros() as u64)
    }

    /// Converts into number of microseconds since UNIX epoch.
    pub fn into_micros(self) -> u64 { self.0 }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Self::Output { Timestamp(self.0 + rhs.as_micros() as u64) }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Duration) -> Self::Output { Timestamp(self.0 - rhs.as_micros() as u64) }
}

impl AddAssign<Duration> for Timestamp {
    fn add_assign(&mut self, rhs: Duration) { self.0 += rhs.as_micros() as u64 }
}

impl SubAssign<Duration> for Timestamp {
    fn sub_assign(&mut self, rhs: Duration) { self.0 -= rhs.as_micros() as u64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_arithmetics() {
        let now = Timestamp::now();
        assert!(now.into_micros() > 0);

        let mut later = now;
        later += Duration::from_secs(1);
        assert_eq!((later - now).into_micros(), 1_000_000);
        assert_eq!(later - Duration::from_secs(1), now);
    }
}
