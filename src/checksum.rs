//! Rolling checksum used as the weak hash of signature blocks.
//!
//! An Adler-32 variant that can slide its window by one byte in O(1),
//! which is what lets the delta job test every byte offset of the new file
//! against the basis blocks.

/// Rolling checksum over a fixed-size window.
///
/// Two components are kept modulo 65521:
/// - `a`: sum of all bytes in the window
/// - `b`: weighted sum where byte `i` of an `n`-byte window counts `n - i` times
///
/// The digest packs both as `(b << 16) | a`.
///
/// # Example
///
/// ```rust
/// use deltastream::RollingChecksum;
///
/// let mut rolling = RollingChecksum::new(b"hello");
/// rolling.roll(b'h', b'!');
/// assert_eq!(rolling.digest(), RollingChecksum::new(b"ello!").digest());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RollingChecksum {
    a: u32,
    b: u32,
    count: usize,
}

impl RollingChecksum {
    /// Largest prime below 2^16.
    const MOD: u32 = 65521;

    /// Compute the checksum of an initial window.
    #[must_use]
    pub fn new(data: &[u8]) -> Self {
        let len = data.len() as u64;
        let mut a: u64 = 0;
        let mut b: u64 = 0;

        for (i, &byte) in data.iter().enumerate() {
            a += u64::from(byte);
            b += (len - i as u64) * u64::from(byte);
            // Keep the accumulators small for windows of any size.
            if i % 4096 == 4095 {
                a %= u64::from(Self::MOD);
                b %= u64::from(Self::MOD);
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        let (a, b) = (
            (a % u64::from(Self::MOD)) as u32,
            (b % u64::from(Self::MOD)) as u32,
        );
        Self {
            a,
            b,
            count: data.len(),
        }
    }

    /// Slide the window: drop `old_byte` from the front, append `new_byte`.
    #[inline]
    pub fn roll(&mut self, old_byte: u8, new_byte: u8) {
        let m = u64::from(Self::MOD);
        let old = u64::from(old_byte);
        let new = u64::from(new_byte);

        let a = (u64::from(self.a) + m - old + new) % m;
        let weighted_old = (self.count as u64 % m) * old % m;
        let b = (u64::from(self.b) + m - weighted_old + a) % m;

        #[allow(clippy::cast_possible_truncation)]
        let (a, b) = (a as u32, b as u32);
        self.a = a;
        self.b = b;
    }

    /// Combined 32-bit digest.
    #[inline]
    #[must_use]
    pub const fn digest(&self) -> u32 {
        (self.b << 16) | self.a
    }

    /// Window size in bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    /// Whether the window is empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }
}
