//! Chronologically sortable push keys.
//!
//! Layout: 8 characters of millisecond timestamp followed by 12 random
//! characters, all drawn from a 64-symbol alphabet that is sorted in ASCII
//! order. Keys from one generator sort in creation order.

use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::item::Key;

const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

const TIME_CHARS: usize = 8;
const RANDOM_CHARS: usize = 12;

/// Generates strictly increasing push keys.
#[derive(Debug, Default)]
pub struct PushIdGenerator {
    last_time: Option<u64>,
    last_random: [u8; RANDOM_CHARS],
}

impl PushIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next key stamped with the current wall clock.
    pub fn next_key(&mut self) -> Key {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.next_key_at(now)
    }

    /// Next key stamped with `now_ms`.
    ///
    /// A clock that stands still or runs backwards reuses the last stamp and
    /// increments the random suffix instead.
    pub fn next_key_at(&mut self, now_ms: u64) -> Key {
        let mut time = match self.last_time {
            Some(last) if now_ms <= last => {
                if Self::increment(&mut self.last_random) {
                    last
                } else {
                    // suffix overflowed
                    self.last_random = Self::fresh_random();
                    last + 1
                }
            }
            _ => {
                self.last_random = Self::fresh_random();
                now_ms
            }
        };
        self.last_time = Some(time);

        let mut out = [0u8; TIME_CHARS + RANDOM_CHARS];
        for slot in out[..TIME_CHARS].iter_mut().rev() {
            *slot = PUSH_CHARS[(time % 64) as usize];
            time /= 64;
        }
        for (slot, digit) in out[TIME_CHARS..].iter_mut().zip(self.last_random.iter()) {
            *slot = PUSH_CHARS[*digit as usize];
        }

        Key::new(out.iter().map(|&b| b as char).collect::<String>())
    }

    fn fresh_random() -> [u8; RANDOM_CHARS] {
        let bytes = Uuid::new_v4().into_bytes();
        let mut digits = [0u8; RANDOM_CHARS];
        for (digit, byte) in digits.iter_mut().zip(bytes.iter()) {
            *digit = byte % 64;
        }
        digits
    }

    /// Base-64 increment. Returns `false` on overflow.
    fn increment(digits: &mut [u8; RANDOM_CHARS]) -> bool {
        for digit in digits.iter_mut().rev() {
            if *digit == 63 {
                *digit = 0;
            } else {
                *digit += 1;
                return true;
            }
        }
        false
    }
}
