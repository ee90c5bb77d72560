// SPDX-License-Identifier: MPL-2.0

//! Rational time bases and timestamp rescaling

use std::fmt;

/// A time base: one tick lasts `num / den` seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

impl Rational {
    /// Microsecond ticks, used for capture timestamps
    pub const MICROS: Rational = Rational::new(1, 1_000_000);
    /// 90 kHz ticks, used by MPEG containers and RTP
    pub const MPEG: Rational = Rational::new(1, 90_000);
    /// Nanosecond ticks, used by GStreamer clock times
    pub const NANOS: Rational = Rational::new(1, 1_000_000_000);

    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    /// Time base of one frame at `fps_num / fps_den` frames per second
    pub const fn frame_period(fps_num: u32, fps_den: u32) -> Self {
        Self {
            num: fps_den as i64,
            den: fps_num as i64,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    /// Convert `value` expressed in `from` ticks into `to` ticks.
    ///
    /// Rounds to the nearest tick, halfway cases away from zero.
    pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
        let numerator = value as i128 * from.num as i128 * to.den as i128;
        let denominator = from.den as i128 * to.num as i128;
        if denominator == 0 {
            return 0;
        }

        let (numerator, denominator) = if denominator < 0 {
            (-numerator, -denominator)
        } else {
            (numerator, denominator)
        };

        let half = denominator / 2;
        let rounded = if numerator >= 0 {
            (numerator + half) / denominator
        } else {
            -((-numerator + half) / denominator)
        };

        rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    /// Length of `value` ticks as a duration (negative values clamp to zero)
    pub fn to_duration(&self, value: i64) -> std::time::Duration {
        let micros = Self::rescale(value, *self, Self::MICROS).max(0);
        std::time::Duration::from_micros(micros as u64)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_micros_to_frame_ticks() {
        let tb = Rational::frame_period(30, 1);
        // 33_333us per frame rounds back to whole frame indices
        for k in 0..120 {
            assert_eq!(Rational::rescale(k * 33_333, Rational::MICROS, tb), k);
        }
    }

    #[test]
    fn test_frame_ticks_to_mpeg() {
        let tb = Rational::frame_period(30, 1);
        assert_eq!(Rational::rescale(1, tb, Rational::MPEG), 3000);
        assert_eq!(Rational::rescale(30, tb, Rational::MPEG), 90_000);
    }

    #[test]
    fn test_rounding_is_symmetric() {
        let from = Rational::new(1, 2);
        let to = Rational::new(1, 1);
        assert_eq!(Rational::rescale(1, from, to), 1);
        assert_eq!(Rational::rescale(-1, from, to), -1);
        assert_eq!(Rational::rescale(0, from, to), 0);
    }

    #[test]
    fn test_to_duration() {
        let d = Rational::MPEG.to_duration(90_000);
        assert_eq!(d, std::time::Duration::from_secs(1));
        assert_eq!(Rational::MPEG.to_duration(-5), std::time::Duration::ZERO);
    }
}
