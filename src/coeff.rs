//! Numeric coefficients for symbolic expressions.
//!
//! Coefficients are exact rationals whenever possible, falling back to
//! floating-point (real or complex) for non-integral float inputs, overflow
//! and transcendental results.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};


/// Greatest common divisor using Euclidean algorithm
///
/// Computed on magnitudes so `i64::MIN` is accepted. The only results that
/// do not fit back into `i64` (both arguments multiples of 2^63) return 1,
/// leaving the pair unreduced.
fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.unsigned_abs(), b.unsigned_abs());
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    i64::try_from(a).unwrap_or(1)
}

/// Exact integer k-th root of a non-negative integer, if one exists.
fn int_root(n: i64, k: u32) -> Option<i64> {
    if n < 0 {
        return None;
    }
    if n < 2 || k == 1 {
        return Some(n);
    }
    let guess = (n as f64).powf(1.0 / k as f64).round() as i64;
    (guess.saturating_sub(1)..=guess.saturating_add(1))
        .filter(|r| *r >= 0)
        .find(|r| r.checked_pow(k) == Some(n))
}

/// A coefficient in a symbolic expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Coefficient {
    /// Exact rational number (numerator, denominator)
    /// Invariant: denominator > 0, gcd(num, den) == 1
    Rational(i64, i64),
    /// Floating-point approximation
    Float(f64),
    /// Complex floating-point value with a non-zero imaginary part
    Complex(Complex64),
}

impl Coefficient {
    pub fn int(n: i64) -> Self {
        Coefficient::Rational(n, 1)
    }

    /// Create a rational coefficient, automatically reducing
    pub fn rational(num: i64, den: i64) -> Self {
        if den == 0 {
            return Coefficient::Float(match num.cmp(&0) {
                Ordering::Greater => f64::INFINITY,
                Ordering::Less => f64::NEG_INFINITY,
                Ordering::Equal => f64::NAN,
            });
        }

        let (num, den) = if den < 0 {
            match (num.checked_neg(), den.checked_neg()) {
                (Some(n), Some(d)) => (n, d),
                _ => return Coefficient::Float(num as f64 / den as f64),
            }
        } else {
            (num, den)
        };

        let g = gcd(num, den).max(1);
        Coefficient::Rational(num / g, den / g)
    }

    pub fn float(f: f64) -> Self {
        Coefficient::Float(f)
    }

    /// Complex values with a zero imaginary part collapse to `Float`.
    pub fn complex(c: Complex64) -> Self {
        if c.im == 0.0 {
            Coefficient::Float(c.re)
        } else {
            Coefficient::Complex(c)
        }
    }

    /// Integral finite floats become exact integers.
    pub fn from_f64_exact(f: f64) -> Self {
        if f.fract() == 0.0 && f.is_finite() && f.abs() < i64::MAX as f64 {
            Coefficient::int(f as i64)
        } else {
            Coefficient::Float(f)
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Coefficient::Rational(n, _) => *n == 0,
            Coefficient::Float(f) => *f == 0.0,
            Coefficient::Complex(c) => c.re == 0.0 && c.im == 0.0,
        }
    }

    pub fn is_one(&self) -> bool {
        match self {
            Coefficient::Rational(n, d) => *n == 1 && *d == 1,
            Coefficient::Float(f) => *f == 1.0,
            Coefficient::Complex(_) => false,
        }
    }

    pub fn is_negative(&self) -> bool {
        match self {
            Coefficient::Rational(n, _) => *n < 0,
            Coefficient::Float(f) => *f < 0.0,
            Coefficient::Complex(_) => false,
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, Coefficient::Rational(..))
    }

    /// Returns the value as an integer when it is exactly integral.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Coefficient::Rational(n, 1) => Some(*n),
            Coefficient::Rational(..) => None,
            Coefficient::Float(f) if f.fract() == 0.0 && f.abs() < i32::MAX as f64 => {
                Some(*f as i64)
            }
            _ => None,
        }
    }

    /// Real part as f64
    pub fn to_f64(&self) -> f64 {
        match self {
            Coefficient::Rational(n, d) => *n as f64 / *d as f64,
            Coefficient::Float(f) => *f,
            Coefficient::Complex(c) => c.re,
        }
    }

    pub fn to_complex(&self) -> Complex64 {
        match self {
            Coefficient::Complex(c) => *c,
            other => Complex64::new(other.to_f64(), 0.0),
        }
    }

    /// Compute power with integer exponent
    pub fn pow_int(&self, exp: i32) -> Self {
        if exp == 0 {
            return Coefficient::int(1);
        }
        if exp == 1 {
            return self.clone();
        }
        if exp < 0 {
            let base = self.pow_int(exp.saturating_neg());
            return Coefficient::int(1) / base;
        }

        match self {
            Coefficient::Rational(n, d) => {
                let exp_u = exp as u32;
                if let (Some(new_n), Some(new_d)) = (n.checked_pow(exp_u), d.checked_pow(exp_u)) {
                    Coefficient::Rational(new_n, new_d)
                } else {
                    Coefficient::Float(self.to_f64().powi(exp))
                }
            }
            Coefficient::Float(f) => Coefficient::Float(f.powi(exp)),
            Coefficient::Complex(c) => Coefficient::complex(c.powi(exp)),
        }
    }

    /// Power with a coefficient exponent.
    ///
    /// Returns `None` when the result of an exact base and exact exponent is
    /// irrational (e.g. `2^(1/2)`), so the caller can keep it symbolic.
    pub fn pow_exact(&self, exp: &Coefficient) -> Option<Self> {
        if let Some(n) = exp.as_integer() {
            if n >= i32::MIN as i64 && n <= i32::MAX as i64 {
                return Some(self.pow_int(n as i32));
            }
        }

        match (self, exp) {
            (Coefficient::Rational(n, d), Coefficient::Rational(p, q)) => {
                let q = u32::try_from(*q).ok()?;
                let root_n = int_root(*n, q)?;
                let root_d = int_root(*d, q)?;
                let p = i32::try_from(*p).ok()?;
                Some(Coefficient::Rational(root_n, root_d).pow_int(p))
            }
            (base, exp) => {
                let b = base.to_complex();
                let e = exp.to_complex();
                if b.im == 0.0 && e.im == 0.0 && b.re >= 0.0 {
                    Some(Coefficient::Float(b.re.powf(e.re)))
                } else {
                    Some(Coefficient::complex(b.powc(e)))
                }
            }
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Coefficient::Complex(_) => 1,
            _ => 0,
        }
    }
}

impl PartialEq for Coefficient {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Coefficient {}

impl PartialOrd for Coefficient {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Total order by value; rationals compare exactly, everything else by
/// `(re, im)` with `f64::total_cmp`.
impl Ord for Coefficient {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Coefficient::Rational(n1, d1), Coefficient::Rational(n2, d2)) => {
                (*n1 as i128 * *d2 as i128).cmp(&(*n2 as i128 * *d1 as i128))
            }
            _ => {
                let a = self.to_complex();
                let b = other.to_complex();
                self.rank()
                    .cmp(&other.rank())
                    .then_with(|| a.re.total_cmp(&b.re))
                    .then_with(|| a.im.total_cmp(&b.im))
            }
        }
    }
}

impl Default for Coefficient {
    fn default() -> Self {
        Coefficient::int(0)
    }
}

impl From<i64> for Coefficient {
    fn from(n: i64) -> Self {
        Coefficient::int(n)
    }
}

impl From<i32> for Coefficient {
    fn from(n: i32) -> Self {
        Coefficient::int(n as i64)
    }
}

impl From<f64> for Coefficient {
    fn from(f: f64) -> Self {
        Coefficient::from_f64_exact(f)
    }
}

impl From<Complex64> for Coefficient {
    fn from(c: Complex64) -> Self {
        if c.im == 0.0 {
            Coefficient::from_f64_exact(c.re)
        } else {
            Coefficient::Complex(c)
        }
    }
}

impl Neg for Coefficient {
    type Output = Coefficient;

    fn neg(self) -> Self::Output {
        match self {
            Coefficient::Rational(n, d) => match n.checked_neg() {
                Some(n) => Coefficient::Rational(n, d),
                None => Coefficient::Float(-(n as f64) / d as f64),
            },
            Coefficient::Float(f) => Coefficient::Float(-f),
            Coefficient::Complex(c) => Coefficient::Complex(-c),
        }
    }
}

impl Add for Coefficient {
    type Output = Coefficient;

    fn add(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Coefficient::Rational(n1, d1), Coefficient::Rational(n2, d2)) => {
                // n1/d1 + n2/d2 = (n1*d2 + n2*d1) / (d1*d2)
                if let (Some(nd1), Some(nd2), Some(dd)) =
                    (n1.checked_mul(d2), n2.checked_mul(d1), d1.checked_mul(d2))
                {
                    if let Some(num) = nd1.checked_add(nd2) {
                        return Coefficient::rational(num, dd);
                    }
                }
                Coefficient::Float(n1 as f64 / d1 as f64 + n2 as f64 / d2 as f64)
            }
            (a @ Coefficient::Complex(_), b) | (a, b @ Coefficient::Complex(_)) => {
                Coefficient::complex(a.to_complex() + b.to_complex())
            }
            (a, b) => Coefficient::Float(a.to_f64() + b.to_f64()),
        }
    }
}

impl Sub for Coefficient {
    type Output = Coefficient;

    fn sub(self, rhs: Self) -> Self::Output {
        self + (-rhs)
    }
}

impl Mul for Coefficient {
    type Output = Coefficient;

    fn mul(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Coefficient::Rational(n1, d1), Coefficient::Rational(n2, d2)) => {
                // Cross-reduce before multiplying to minimize overflow
                let g1 = gcd(n1, d2).max(1);
                let g2 = gcd(n2, d1).max(1);
                let n1 = n1 / g1;
                let d2 = d2 / g1;
                let n2 = n2 / g2;
                let d1 = d1 / g2;

                if let (Some(num), Some(den)) = (n1.checked_mul(n2), d1.checked_mul(d2)) {
                    Coefficient::rational(num, den)
                } else {
                    Coefficient::Float(n1 as f64 * n2 as f64 / (d1 as f64 * d2 as f64))
                }
            }
            (a @ Coefficient::Complex(_), b) | (a, b @ Coefficient::Complex(_)) => {
                Coefficient::complex(a.to_complex() * b.to_complex())
            }
            (a, b) => Coefficient::Float(a.to_f64() * b.to_f64()),
        }
    }
}

impl Div for Coefficient {
    type Output = Coefficient;

    fn div(self, rhs: Self) -> Self::Output {
        match rhs {
            Coefficient::Rational(n, d) => self * Coefficient::rational(d, n),
            Coefficient::Float(f) => match self {
                Coefficient::Complex(c) => Coefficient::complex(c / f),
                other => Coefficient::Float(other.to_f64() / f),
            },
            Coefficient::Complex(c) => Coefficient::complex(self.to_complex() / c),
        }
    }
}

impl fmt::Display for Coefficient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coefficient::Rational(n, d) => {
                if *d == 1 {
                    write!(f, "{}", n)
                } else {
                    write!(f, "{}/{}", n, d)
                }
            }
            Coefficient::Float(v) => write!(f, "{}", v),
            Coefficient::Complex(c) => write!(f, "({}{:+}i)", c.re, c.im),
        }
    }
}
