// Copyright 2026 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

use std::time::{Duration, Instant};

/// Schedules the periodic active step of a gossip variant.
///
/// The variants are driven by the caller's clock: every call to `parse_data` passes the current
/// instant and the ticker decides whether the active step is due.
#[derive(Debug, Default, Clone)]
pub(crate) struct Ticker {
    next_fire_time: Option<Instant>,
}

impl Ticker {
    pub(crate) fn new() -> Self {
        Ticker::default()
    }

    /// Returns `true` if a tick is due at `now`, and schedules the next one `period` later.
    ///
    /// The first poll always fires. A ticker that fell behind by more than one period skips the
    /// missed ticks.
    pub(crate) fn poll(&mut self, now: Instant, period: Duration) -> bool {
        match self.next_fire_time {
            Some(next) if now < next => false,
            Some(next) => {
                let following = next + period;
                self.next_fire_time = Some(if following > now {
                    following
                } else {
                    now + period
                });
                true
            }
            None => {
                self.next_fire_time = Some(now + period);
                true
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn next_fire_time(&self) -> Option<Instant> {
        self.next_fire_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_per_period() {
        let start = Instant::now();
        let period = Duration::from_secs(2);
        let mut ticker = Ticker::new();

        assert!(ticker.poll(start, period));
        assert!(!ticker.poll(start + Duration::from_secs(1), period));
        assert!(ticker.poll(start + Duration::from_secs(2), period));
        assert_eq!(ticker.next_fire_time(), Some(start + Duration::from_secs(4)));
    }

    #[test]
    fn skips_missed_ticks() {
        let start = Instant::now();
        let period = Duration::from_secs(1);
        let mut ticker = Ticker::new();
        ticker.poll(start, period);

        let late = start + Duration::from_secs(10);
        assert!(ticker.poll(late, period));
        assert!(!ticker.poll(late, period));
        assert_eq!(ticker.next_fire_time(), Some(late + period));
    }
}
