//! The scalar type carried by every matrix entry, ray component and beam
//! parameter.
//!
//! A [`Scalar`] is one of:
//! - `Real`: a plain `f64`
//! - `Complex`: a `Complex64`, produced by mixing real and complex values or by
//!   leaving a real domain (e.g. `sqrt(-1)`)
//! - `Symbolic`: a canonical [`SymExpr`] over named free variables
//!
//! Arithmetic between two values of the same kind stays in that kind. Mixing a
//! numeric value with a symbolic one promotes the numeric operand to an exact
//! constant (integral floats become rationals), so `2.0 * x / 2` is exactly `x`.
//!
//! Implements the closed arithmetic traits and [`num_traits::Zero`]/[`One`] so
//! that `nalgebra` matrices and vectors of scalars multiply natively.

use crate::error::{ParaxialError, Result};
use crate::expr::{Func, SymExpr};
use crate::settings::{Settings, DEFAULT_TOLERANCE};
use log::{debug, trace};
use num_complex::Complex64;
use num_traits::{One, Zero};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::iter::{Product, Sum};
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_rules() {
        let r = Scalar::real(2.0);
        let c = Scalar::complex(0.0, 1.0);
        let s = Scalar::symbol("x");

        assert!(matches!(&r * &r, Scalar::Real(v) if v == 4.0));
        assert!(matches!(&r * &c, Scalar::Complex(_)));
        assert!(matches!(&r * &s, Scalar::Symbolic(_)));
        assert!(matches!(&c + &s, Scalar::Symbolic(_)));
    }

    #[test]
    fn exact_after_promotion() {
        let x = Scalar::symbol("x");
        let expr = (Scalar::real(2.0) * &x) / Scalar::real(2.0);
        assert_eq!(expr, x);
        assert_eq!((&x - &x), Scalar::zero());
    }

    #[test]
    fn coefficients_reaching_i64_min_combine() {
        let x = Scalar::symbol("x");
        let term = Scalar::real(-4611686018427387904.0) * &x;
        let sum = &term + &term;
        let value = sum
            .evaluate(&Bindings::new().with("x", 1.0))
            .unwrap()
            .to_f64()
            .unwrap();
        assert_eq!(value, -9223372036854775808.0);
    }

    #[test]
    fn mixed_equality_compares_after_promotion() {
        assert_eq!(Scalar::real(0.5), Scalar::rational(1, 2));
        assert_eq!(Scalar::real(3.0), Scalar::complex(3.0, 0.0));
        assert_ne!(Scalar::real(3.0), Scalar::symbol("x"));
    }

    #[test]
    fn real_domain_escapes_to_complex() {
        let root = Scalar::real(-4.0).sqrt();
        assert!(root.approx_eq(&Scalar::complex(0.0, 2.0), 1e-12));
        assert!(matches!(Scalar::real(0.5).asin(), Scalar::Real(_)));
        assert!(matches!(Scalar::real(2.0).asin(), Scalar::Complex(_)));
    }

    #[test]
    fn substitution_is_idempotent() {
        let expr = Scalar::symbol("a") * Scalar::symbol("b") + Scalar::real(1.0);
        let bindings = Bindings::new().with("a", 3.0).with("c", Scalar::symbol("d"));
        let once = expr.substitute(&bindings);
        assert_eq!(once.substitute(&bindings), once);
        assert_eq!(
            once.free_symbols().into_iter().collect::<Vec<_>>(),
            vec!["b".to_string()]
        );
    }

    #[test]
    fn unbound_symbols_are_reported() {
        let expr = Scalar::symbol("f") + Scalar::symbol("d");
        let err = expr.to_f64().unwrap_err();
        assert_eq!(
            err,
            ParaxialError::NotFullyDetermined(vec!["d".to_string(), "f".to_string()])
        );
        let value = expr
            .evaluate(&Bindings::new().with("f", 2.0).with("d", 0.25))
            .unwrap();
        assert!(value.approx_eq(&Scalar::real(2.25), 1e-15));
    }

    #[test]
    fn newton_solves_for_focal_length() {
        // 1/f - 1/50 = 0
        let f = Scalar::symbol("f");
        let expr = f.recip() - Scalar::rational(1, 50);
        let root = expr.solve("f", 40.0).unwrap();
        assert!((root - 50.0).abs() < 1e-9);
    }

    #[test]
    fn newton_reports_failure() {
        // x^2 + 1 has no real root
        let x = Scalar::symbol("x");
        let expr = x.powi(2) + Scalar::real(1.0);
        let settings = Settings {
            max_iterations: 10,
            ..Settings::default()
        };
        let err = expr
            .solve_for("x", 0.5, &Bindings::new(), &settings)
            .unwrap_err();
        assert!(matches!(err, ParaxialError::NoConvergence { iterations: 10, .. }));
    }

    #[test]
    fn derivative_of_numeric_is_zero() {
        assert!(Scalar::real(3.0).diff("x").is_zero());
        let x = Scalar::symbol("x");
        assert_eq!(x.powi(2).diff("x"), Scalar::real(2.0) * &x);
    }

    #[test]
    fn serde_shapes() {
        let parsed: Scalar = serde_json::from_str("12.5").unwrap();
        assert_eq!(parsed, Scalar::real(12.5));
        let parsed: Scalar = serde_json::from_str("\"f\"").unwrap();
        assert_eq!(parsed, Scalar::symbol("f"));
        let parsed: Scalar = serde_json::from_str("[1.0, -2.0]").unwrap();
        assert_eq!(parsed, Scalar::complex(1.0, -2.0));

        let symbolic = Scalar::symbol("f").recip();
        let text = serde_json::to_string(&symbolic).unwrap();
        let back: Scalar = serde_json::from_str(&text).unwrap();
        assert_eq!(back, symbolic);
    }
}

/// A real, complex or symbolic value.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Real(f64),
    Complex(Complex64),
    Symbolic(SymExpr),
}

/// Accepted serialized forms: a number, a `[re, im]` pair, a bare symbol name
/// or a serialized expression tree.
#[derive(Deserialize)]
#[serde(untagged)]
enum ScalarRepr {
    Real(f64),
    Complex(Complex64),
    Symbol(String),
    Expr(SymExpr),
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(match ScalarRepr::deserialize(deserializer)? {
            ScalarRepr::Real(v) => Scalar::Real(v),
            ScalarRepr::Complex(c) => Scalar::Complex(c),
            ScalarRepr::Symbol(name) => Scalar::symbol(name),
            ScalarRepr::Expr(expr) => Scalar::Symbolic(expr),
        })
    }
}

impl Scalar {
    pub fn real(value: f64) -> Self {
        Scalar::Real(value)
    }

    pub fn complex(re: f64, im: f64) -> Self {
        Scalar::Complex(Complex64::new(re, im))
    }

    /// Exact rational constant.
    pub fn rational(num: i64, den: i64) -> Self {
        Scalar::Symbolic(SymExpr::rational(num, den))
    }

    /// Exact integer constant.
    pub fn integer(n: i64) -> Self {
        Scalar::Symbolic(SymExpr::int(n))
    }

    /// A named free variable.
    pub fn symbol(name: impl Into<String>) -> Self {
        Scalar::Symbolic(SymExpr::var(name))
    }

    /// The imaginary unit.
    pub fn i() -> Self {
        Scalar::complex(0.0, 1.0)
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self, Scalar::Symbolic(_))
    }

    pub fn as_expr(&self) -> Option<&SymExpr> {
        match self {
            Scalar::Symbolic(e) => Some(e),
            _ => None,
        }
    }

    /// The value as a symbolic expression; numbers become constants.
    pub fn to_expr(&self) -> SymExpr {
        match self {
            Scalar::Real(v) => SymExpr::float(*v),
            Scalar::Complex(c) => SymExpr::complex(*c),
            Scalar::Symbolic(e) => e.clone(),
        }
    }

    pub fn free_symbols(&self) -> BTreeSet<String> {
        match self {
            Scalar::Symbolic(e) => e.free_symbols(),
            _ => BTreeSet::new(),
        }
    }

    /// Replace bound free variables. Symbolic values stay symbolic even when
    /// every variable is bound; use [`Scalar::to_numeric`] to collapse them.
    pub fn substitute(&self, bindings: &Bindings) -> Scalar {
        match self {
            Scalar::Symbolic(e) if !bindings.is_empty() => {
                Scalar::Symbolic(e.substitute(&bindings.to_exprs()))
            }
            _ => self.clone(),
        }
    }

    /// Collapse to `Real` or `Complex`.
    pub fn to_numeric(&self) -> Result<Scalar> {
        match self {
            Scalar::Symbolic(e) => {
                let value = e.eval()?;
                Ok(if value.im == 0.0 {
                    Scalar::Real(value.re)
                } else {
                    Scalar::Complex(value)
                })
            }
            _ => Ok(self.clone()),
        }
    }

    /// Substitute then collapse to a number.
    pub fn evaluate(&self, bindings: &Bindings) -> Result<Scalar> {
        self.substitute(bindings).to_numeric()
    }

    pub fn to_complex(&self) -> Result<Complex64> {
        match self {
            Scalar::Real(v) => Ok(Complex64::new(*v, 0.0)),
            Scalar::Complex(c) => Ok(*c),
            Scalar::Symbolic(e) => e.eval(),
        }
    }

    /// Real value; fails when a significant imaginary part remains.
    pub fn to_f64(&self) -> Result<f64> {
        let value = self.to_complex()?;
        if value.im.abs() > DEFAULT_TOLERANCE * value.re.abs().max(1.0) {
            return Err(ParaxialError::InvalidParameter(format!(
                "expected a real value, found {}",
                value
            )));
        }
        Ok(value.re)
    }

    /// Relative-or-absolute numeric comparison, `|a - b| <= tol * max(1, |a|, |b|)`.
    ///
    /// Values with free symbols fall back to exact structural equality.
    pub fn approx_eq(&self, other: &Scalar, tol: f64) -> bool {
        match (self.to_complex(), other.to_complex()) {
            (Ok(a), Ok(b)) => {
                let scale = 1.0_f64.max(a.norm()).max(b.norm());
                (a - b).norm() <= tol * scale
            }
            _ => self == other,
        }
    }

    /// Partial derivative with respect to `var`.
    pub fn diff(&self, var: &str) -> Scalar {
        match self {
            Scalar::Symbolic(e) => Scalar::Symbolic(e.diff(var)),
            _ => Scalar::Real(0.0),
        }
    }

    fn apply(&self, f: Func) -> Scalar {
        match self {
            Scalar::Real(x) => {
                let z = f.apply(Complex64::new(*x, 0.0));
                if z.im == 0.0 {
                    Scalar::Real(z.re)
                } else {
                    Scalar::Complex(z)
                }
            }
            Scalar::Complex(c) => Scalar::Complex(f.apply(*c)),
            Scalar::Symbolic(e) => Scalar::Symbolic(SymExpr::func(f, e.clone())),
        }
    }

    pub fn sin(&self) -> Scalar {
        self.apply(Func::Sin)
    }

    pub fn cos(&self) -> Scalar {
        self.apply(Func::Cos)
    }

    pub fn tan(&self) -> Scalar {
        self.apply(Func::Tan)
    }

    pub fn asin(&self) -> Scalar {
        self.apply(Func::Asin)
    }

    pub fn acos(&self) -> Scalar {
        self.apply(Func::Acos)
    }

    pub fn atan(&self) -> Scalar {
        self.apply(Func::Atan)
    }

    pub fn exp(&self) -> Scalar {
        self.apply(Func::Exp)
    }

    pub fn ln(&self) -> Scalar {
        self.apply(Func::Ln)
    }

    pub fn sqrt(&self) -> Scalar {
        match self {
            Scalar::Real(x) if *x >= 0.0 => Scalar::Real(x.sqrt()),
            Scalar::Real(x) => Scalar::Complex(Complex64::new(0.0, (-x).sqrt())),
            Scalar::Complex(c) => Scalar::Complex(c.sqrt()),
            Scalar::Symbolic(e) => Scalar::Symbolic(e.sqrt()),
        }
    }

    pub fn powi(&self, n: i32) -> Scalar {
        match self {
            Scalar::Real(x) => Scalar::Real(x.powi(n)),
            Scalar::Complex(c) => Scalar::Complex(c.powi(n)),
            Scalar::Symbolic(e) => Scalar::Symbolic(SymExpr::pow(e.clone(), SymExpr::int(n as i64))),
        }
    }

    pub fn pow(&self, exp: &Scalar) -> Scalar {
        match (self, exp) {
            (Scalar::Real(b), Scalar::Real(e)) if *b >= 0.0 || e.fract() == 0.0 => {
                Scalar::Real(b.powf(*e))
            }
            (Scalar::Symbolic(_), _) | (_, Scalar::Symbolic(_)) => {
                Scalar::Symbolic(SymExpr::pow(self.to_expr(), exp.to_expr()))
            }
            _ => {
                let b = self.to_complex().unwrap_or_default();
                let e = exp.to_complex().unwrap_or_default();
                Scalar::Complex(b.powc(e))
            }
        }
    }

    pub fn recip(&self) -> Scalar {
        match self {
            Scalar::Real(x) => Scalar::Real(x.recip()),
            Scalar::Complex(c) => Scalar::Complex(c.inv()),
            Scalar::Symbolic(e) => Scalar::Symbolic(e.recip()),
        }
    }

    /// Absolute value (modulus for complex values).
    pub fn abs(&self) -> Scalar {
        match self {
            Scalar::Real(x) => Scalar::Real(x.abs()),
            Scalar::Complex(c) => Scalar::Real(c.norm()),
            Scalar::Symbolic(e) => {
                let sq = SymExpr::pow(e.clone(), SymExpr::int(2));
                Scalar::Symbolic(sq.sqrt())
            }
        }
    }

    /// Solve `self = 0` for `var` with default settings and no extra bindings.
    pub fn solve(&self, var: &str, guess: f64) -> Result<f64> {
        self.solve_for(var, guess, &Bindings::new(), &Settings::default())
    }

    /// Newton iteration on `self = 0` for the real root of `var` nearest
    /// `guess`, using the symbolic derivative.
    ///
    /// All other free symbols must be bound by `bindings`.
    pub fn solve_for(
        &self,
        var: &str,
        guess: f64,
        bindings: &Bindings,
        settings: &Settings,
    ) -> Result<f64> {
        let f = self.substitute(bindings);
        let unknowns: Vec<String> = f
            .free_symbols()
            .into_iter()
            .filter(|name| name != var)
            .collect();
        if !unknowns.is_empty() {
            return Err(ParaxialError::NotFullyDetermined(unknowns));
        }

        let df = f.diff(var);
        let mut x = guess;
        let mut residual = f64::INFINITY;

        for iteration in 0..settings.max_iterations {
            let at = Bindings::new().with(var, x);
            let value = f.evaluate(&at)?.to_f64()?;
            residual = value.abs();
            trace!(
                "newton iteration {}: {} = {}, residual {:.3e}",
                iteration,
                var,
                x,
                residual
            );
            if residual <= settings.solver_tolerance {
                debug!("solved {} = {} after {} iterations", var, x, iteration);
                return Ok(x);
            }

            let slope = df.evaluate(&at)?.to_f64()?;
            if slope == 0.0 || !slope.is_finite() {
                break;
            }
            let step = value / slope;
            x -= step;
            if !x.is_finite() {
                break;
            }
            if step.abs() <= settings.solver_tolerance * x.abs().max(1.0) {
                debug!("solved {} = {} after {} iterations", var, x, iteration + 1);
                return Ok(x);
            }
        }

        Err(ParaxialError::NoConvergence {
            iterations: settings.max_iterations,
            residual,
        })
    }
}

fn binary(
    lhs: &Scalar,
    rhs: &Scalar,
    real: fn(f64, f64) -> f64,
    complex: fn(Complex64, Complex64) -> Complex64,
    symbolic: fn(SymExpr, SymExpr) -> SymExpr,
) -> Scalar {
    match (lhs, rhs) {
        (Scalar::Real(a), Scalar::Real(b)) => Scalar::Real(real(*a, *b)),
        (Scalar::Symbolic(_), _) | (_, Scalar::Symbolic(_)) => {
            Scalar::Symbolic(symbolic(lhs.to_expr(), rhs.to_expr()))
        }
        (Scalar::Complex(a), Scalar::Complex(b)) => Scalar::Complex(complex(*a, *b)),
        (Scalar::Complex(a), Scalar::Real(b)) => Scalar::Complex(complex(*a, Complex64::new(*b, 0.0))),
        (Scalar::Real(a), Scalar::Complex(b)) => Scalar::Complex(complex(Complex64::new(*a, 0.0), *b)),
    }
}

fn add_scalars(lhs: &Scalar, rhs: &Scalar) -> Scalar {
    binary(lhs, rhs, |a, b| a + b, |a, b| a + b, |a, b| SymExpr::add(vec![a, b]))
}

fn sub_scalars(lhs: &Scalar, rhs: &Scalar) -> Scalar {
    binary(lhs, rhs, |a, b| a - b, |a, b| a - b, |a, b| SymExpr::add(vec![a, b.neg()]))
}

fn mul_scalars(lhs: &Scalar, rhs: &Scalar) -> Scalar {
    binary(lhs, rhs, |a, b| a * b, |a, b| a * b, |a, b| SymExpr::mul(vec![a, b]))
}

fn div_scalars(lhs: &Scalar, rhs: &Scalar) -> Scalar {
    binary(lhs, rhs, |a, b| a / b, |a, b| a / b, |a, b| SymExpr::mul(vec![a, b.recip()]))
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $assign_trait:ident, $assign_method:ident, $func:ident) => {
        impl $trait<&Scalar> for &Scalar {
            type Output = Scalar;
            fn $method(self, rhs: &Scalar) -> Scalar {
                $func(self, rhs)
            }
        }

        impl $trait<Scalar> for Scalar {
            type Output = Scalar;
            fn $method(self, rhs: Scalar) -> Scalar {
                $func(&self, &rhs)
            }
        }

        impl $trait<&Scalar> for Scalar {
            type Output = Scalar;
            fn $method(self, rhs: &Scalar) -> Scalar {
                $func(&self, rhs)
            }
        }

        impl $trait<Scalar> for &Scalar {
            type Output = Scalar;
            fn $method(self, rhs: Scalar) -> Scalar {
                $func(self, &rhs)
            }
        }

        impl $trait<f64> for Scalar {
            type Output = Scalar;
            fn $method(self, rhs: f64) -> Scalar {
                $func(&self, &Scalar::Real(rhs))
            }
        }

        impl $trait<f64> for &Scalar {
            type Output = Scalar;
            fn $method(self, rhs: f64) -> Scalar {
                $func(self, &Scalar::Real(rhs))
            }
        }

        impl $trait<Scalar> for f64 {
            type Output = Scalar;
            fn $method(self, rhs: Scalar) -> Scalar {
                $func(&Scalar::Real(self), &rhs)
            }
        }

        impl $trait<&Scalar> for f64 {
            type Output = Scalar;
            fn $method(self, rhs: &Scalar) -> Scalar {
                $func(&Scalar::Real(self), rhs)
            }
        }

        impl $assign_trait<Scalar> for Scalar {
            fn $assign_method(&mut self, rhs: Scalar) {
                *self = $func(self, &rhs);
            }
        }

        impl $assign_trait<&Scalar> for Scalar {
            fn $assign_method(&mut self, rhs: &Scalar) {
                *self = $func(self, rhs);
            }
        }
    };
}

impl_binary_op!(Add, add, AddAssign, add_assign, add_scalars);
impl_binary_op!(Sub, sub, SubAssign, sub_assign, sub_scalars);
impl_binary_op!(Mul, mul, MulAssign, mul_assign, mul_scalars);
impl_binary_op!(Div, div, DivAssign, div_assign, div_scalars);

impl Neg for Scalar {
    type Output = Scalar;

    fn neg(self) -> Scalar {
        -&self
    }
}

impl Neg for &Scalar {
    type Output = Scalar;

    fn neg(self) -> Scalar {
        match self {
            Scalar::Real(x) => Scalar::Real(-x),
            Scalar::Complex(c) => Scalar::Complex(-c),
            Scalar::Symbolic(e) => Scalar::Symbolic(e.neg()),
        }
    }
}

impl Zero for Scalar {
    fn zero() -> Self {
        Scalar::Real(0.0)
    }

    fn is_zero(&self) -> bool {
        match self {
            Scalar::Real(x) => *x == 0.0,
            Scalar::Complex(c) => c.is_zero(),
            Scalar::Symbolic(e) => e.is_zero(),
        }
    }
}

impl One for Scalar {
    fn one() -> Self {
        Scalar::Real(1.0)
    }
}

impl Sum for Scalar {
    fn sum<I: Iterator<Item = Scalar>>(iter: I) -> Self {
        iter.fold(Scalar::zero(), |acc, x| acc + x)
    }
}

impl Product for Scalar {
    fn product<I: Iterator<Item = Scalar>>(iter: I) -> Self {
        iter.fold(Scalar::one(), |acc, x| acc * x)
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scalar::Real(a), Scalar::Real(b)) => a == b,
            (Scalar::Symbolic(_), _) | (_, Scalar::Symbolic(_)) => self.to_expr() == other.to_expr(),
            _ => self.to_complex().ok() == other.to_complex().ok(),
        }
    }
}

impl Default for Scalar {
    fn default() -> Self {
        Scalar::zero()
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Real(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Real(value as f64)
    }
}

impl From<Complex64> for Scalar {
    fn from(value: Complex64) -> Self {
        Scalar::Complex(value)
    }
}

impl From<SymExpr> for Scalar {
    fn from(value: SymExpr) -> Self {
        Scalar::Symbolic(value)
    }
}

impl From<&Scalar> for Scalar {
    fn from(value: &Scalar) -> Self {
        value.clone()
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Real(x) => write!(f, "{}", x),
            Scalar::Complex(c) => write!(f, "{}", c),
            Scalar::Symbolic(e) => write!(f, "{}", e),
        }
    }
}

/// Named values for free variables, applied with [`Scalar::substitute`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bindings(BTreeMap<String, Scalar>);

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Bindings::insert`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Scalar>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Scalar> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Scalar)> {
        self.0.iter()
    }

    fn to_exprs(&self) -> BTreeMap<String, SymExpr> {
        self.0
            .iter()
            .map(|(name, value)| (name.clone(), value.to_expr()))
            .collect()
    }
}

impl<K: Into<String>, V: Into<Scalar>> FromIterator<(K, V)> for Bindings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Bindings(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}
