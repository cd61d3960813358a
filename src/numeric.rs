use std::cmp::Ordering;
use std::f64::consts::LOG10_2;
use std::fmt;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign};

const BASE: f64 = 18446744073709551616.0; // 2^64
const INV_BASE: f64 = 1.0 / BASE;

// Sentinel exponent for the zero state; far below anything reachable by
// products of f64-representable probabilities.
const ZERO_EXPONENT: i32 = -1_000_000;

/// Nonnegative floating-point value with an enormous dynamic range, stored as
/// `value * BASE^exponent` with `value` normalized into `[1, BASE)`.
///
/// Probabilities at a site are products of hundreds of small per-read factors;
/// a plain f64 underflows long before the population dynamic program can
/// combine them. Every operation returns a new normalized value.
#[derive(Debug, Clone, Copy)]
pub struct WideDouble {
    value: f64,
    exponent: i32,
}

impl WideDouble {
    pub const ZERO: WideDouble = WideDouble {
        value: 0.0,
        exponent: ZERO_EXPONENT,
    };

    pub const ONE: WideDouble = WideDouble {
        value: 1.0,
        exponent: 0,
    };

    pub fn from_f64(n: f64) -> Self {
        debug_assert!(n >= 0.0 && n.is_finite(), "invalid WideDouble source {n}");
        if n == 0.0 {
            return Self::ZERO;
        }
        let mut value = n;
        let mut exponent = 0;
        while value < 1.0 {
            exponent -= 1;
            value *= BASE;
        }
        while value >= BASE {
            exponent += 1;
            value *= INV_BASE;
        }
        Self { value, exponent }
    }

    pub fn is_zero(self) -> bool {
        self.value == 0.0
    }

    /// Converts back to a plain f64. Returns 0 when the value is too small or
    /// too large for a double; silent precision loss is the intended policy.
    pub fn to_f64(self) -> f64 {
        if self.is_zero() {
            return 0.0;
        }
        // Negative exponents go through INV_BASE so the scale factor decays
        // toward zero instead of BASE.powi overflowing to infinity first.
        let n = if self.exponent < 0 {
            self.value * INV_BASE.powi(-self.exponent)
        } else {
            self.value * BASE.powi(self.exponent)
        };
        if n.is_finite() { n } else { 0.0 }
    }

    /// Phred scale: `-10 * log10(self)`, computed from the mantissa and
    /// exponent so values far below f64 range still produce a finite score.
    pub fn phred(self) -> f64 {
        if self.is_zero() {
            return f64::INFINITY;
        }
        -10.0 * (self.value.log10() + self.exponent as f64 * 64.0 * LOG10_2)
    }
}

impl From<f64> for WideDouble {
    fn from(n: f64) -> Self {
        Self::from_f64(n)
    }
}

impl fmt::Display for WideDouble {
    /// Decimal rendering for diagnostics, e.g. `3.2e-4811`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "0");
        }
        let logged = self.value.log10() + LOG10_2 * 64.0 * self.exponent as f64;
        let exp10 = logged.floor();
        let mantissa = 10f64.powf(logged - exp10);
        if exp10.abs() <= 5.0 {
            write!(f, "{}", mantissa * 10f64.powf(exp10))
        } else {
            write!(f, "{}e{}", mantissa, exp10 as i64)
        }
    }
}

impl PartialEq for WideDouble {
    fn eq(&self, other: &Self) -> bool {
        self.exponent == other.exponent && self.value == other.value
    }
}

impl PartialOrd for WideDouble {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.exponent.cmp(&other.exponent) {
            Ordering::Equal => self.value.partial_cmp(&other.value),
            ord => Some(ord),
        }
    }
}

impl Mul for WideDouble {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        if self.is_zero() || rhs.is_zero() {
            return Self::ZERO;
        }
        let mut exponent = self.exponent + rhs.exponent;
        let mut value = self.value * rhs.value;
        if value >= BASE {
            exponent += 1;
            value *= INV_BASE;
        }
        Self { value, exponent }
    }
}

impl Mul<f64> for WideDouble {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        self * Self::from_f64(rhs)
    }
}

impl Div for WideDouble {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        debug_assert!(!rhs.is_zero(), "division by the WideDouble zero state");
        if self.is_zero() {
            return Self::ZERO;
        }
        let mut exponent = self.exponent - rhs.exponent;
        let mut value = self.value / rhs.value;
        if value < 1.0 {
            exponent -= 1;
            value *= BASE;
        }
        Self { value, exponent }
    }
}

impl Add for WideDouble {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        // When exponents differ by more than one, the smaller operand sits
        // below machine precision relative to the larger; the dominant operand
        // is returned verbatim. Intentional approximation.
        if self.exponent > rhs.exponent + 1 {
            return self;
        }
        if rhs.exponent > self.exponent + 1 {
            return rhs;
        }
        let (mut value, mut exponent) = if self.exponent == rhs.exponent {
            (self.value + rhs.value, self.exponent)
        } else if self.exponent == rhs.exponent + 1 {
            (self.value + rhs.value * INV_BASE, self.exponent)
        } else {
            (self.value * INV_BASE + rhs.value, rhs.exponent)
        };
        if value >= BASE {
            exponent += 1;
            value *= INV_BASE;
        }
        Self { value, exponent }
    }
}

impl MulAssign for WideDouble {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl MulAssign<f64> for WideDouble {
    fn mul_assign(&mut self, rhs: f64) {
        *self = *self * rhs;
    }
}

impl DivAssign for WideDouble {
    fn div_assign(&mut self, rhs: Self) {
        *self = *self / rhs;
    }
}

impl AddAssign for WideDouble {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}
