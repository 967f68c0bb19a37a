/*!
    Rational number type for frame rates and time bases.
*/

use std::fmt;

/**
    A rational number represented as a numerator and denominator.

    Used for declared frame rates (e.g., 30000/1001 for 29.97 fps) and
    time bases (e.g., 1/1000000 for microsecond timestamps).
*/
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    /**
        Create a new rational number.

        # Panics

        Panics if `den` is zero.
    */
    #[inline]
    pub const fn new(num: i32, den: i32) -> Self {
        assert!(den != 0, "denominator cannot be zero");
        Self { num, den }
    }

    /**
        Create a new rational number, returning `None` if `den` is zero.

        Capture sources report whatever the sender declared, so values
        coming from the wire go through this instead of [`Rational::new`].
    */
    #[inline]
    pub const fn checked(num: i32, den: i32) -> Option<Self> {
        if den == 0 {
            None
        } else {
            Some(Self { num, den })
        }
    }

    /**
        Returns true if both numerator and denominator are strictly positive.

        Only positive rationals are usable as frame rates.
    */
    #[inline]
    pub const fn is_positive(self) -> bool {
        self.num > 0 && self.den > 0
    }

    /**
        Convert to f64.
    */
    #[inline]
    pub fn to_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /**
        Invert the rational (swap numerator and denominator).

        # Panics

        Panics if numerator is zero.
    */
    #[inline]
    pub const fn invert(self) -> Self {
        assert!(self.num != 0, "cannot invert zero");
        Self {
            num: self.den,
            den: self.num,
        }
    }

    /**
        Number of `ticks_per_second` ticks covered by one period of this rate.

        For a frame rate of 30000/1001 and microsecond ticks this is the
        nominal frame duration, `1_000_000 * 1001 / 30000`, truncated.
        Returns `None` unless the rate is positive.
    */
    #[inline]
    pub fn period_ticks(self, ticks_per_second: i64) -> Option<i64> {
        if !self.is_positive() {
            return None;
        }
        Some(ticks_per_second * self.den as i64 / self.num as i64)
    }
}

impl fmt::Debug for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl From<(i32, i32)> for Rational {
    fn from((num, den): (i32, i32)) -> Self {
        Self::new(num, den)
    }
}

impl From<i32> for Rational {
    fn from(num: i32) -> Self {
        Self::new(num, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rational() {
        let r = Rational::new(30000, 1001);
        assert_eq!(r.num, 30000);
        assert_eq!(r.den, 1001);
    }

    #[test]
    #[should_panic(expected = "denominator cannot be zero")]
    fn zero_denominator_panics() {
        Rational::new(1, 0);
    }

    #[test]
    fn checked_rejects_zero_denominator() {
        assert_eq!(Rational::checked(25, 0), None);
        assert_eq!(Rational::checked(25, 1), Some(Rational::new(25, 1)));
    }

    #[test]
    fn positivity() {
        assert!(Rational::new(30, 1).is_positive());
        assert!(!Rational::new(0, 1).is_positive());
        assert!(!Rational::new(-30, 1).is_positive());
        assert!(!Rational::new(30, -1).is_positive());
    }

    #[test]
    fn to_f64_conversion() {
        assert_eq!(Rational::new(1, 2).to_f64(), 0.5);
        assert_eq!(Rational::new(30000, 1001).to_f64(), 30000.0 / 1001.0);
    }

    #[test]
    fn invert() {
        let inv = Rational::new(1, 1_000_000).invert();
        assert_eq!(inv.num, 1_000_000);
        assert_eq!(inv.den, 1);
    }

    #[test]
    #[should_panic(expected = "cannot invert zero")]
    fn invert_zero_panics() {
        Rational::new(0, 1).invert();
    }

    #[test]
    fn period_ticks_ntsc() {
        let rate = Rational::new(30000, 1001);
        assert_eq!(rate.period_ticks(1_000_000), Some(33366));
    }

    #[test]
    fn period_ticks_integer_rate() {
        assert_eq!(Rational::new(25, 1).period_ticks(1_000_000), Some(40_000));
        assert_eq!(Rational::new(0, 1).period_ticks(1_000_000), None);
    }

    #[test]
    fn from_tuple() {
        let r: Rational = (60000, 1001).into();
        assert_eq!(r, Rational::new(60000, 1001));
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", Rational::new(30000, 1001)), "30000/1001");
    }
}
