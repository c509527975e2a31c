//! Canonical symbolic expressions.
//!
//! Every constructor returns an expression in canonical form:
//! - nested sums and products are flattened
//! - numeric constants are merged into a single leading coefficient
//! - like terms (`x + x = 2*x`) and like factors (`x * x^-1 = 1`) are collected
//! - products are distributed over sums, and small positive integer powers
//!   of sums are expanded
//! - terms and factors are kept in a total order
//!
//! Because of this, two expressions built from the same rational-function
//! algebra in different orders compare structurally equal, which is what
//! exact symbolic equality means throughout the crate.

use crate::coeff::Coefficient;
use crate::error::{ParaxialError, Result};
use crate::settings::MAX_POWER_EXPANSION;
use itertools::Itertools;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;


/// Elementary functions available in expressions.
///
/// Square roots are represented as powers with exponent `1/2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Func {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Exp,
    Ln,
}

impl Func {
    pub fn name(&self) -> &'static str {
        match self {
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Tan => "tan",
            Func::Asin => "asin",
            Func::Acos => "acos",
            Func::Atan => "atan",
            Func::Exp => "exp",
            Func::Ln => "ln",
        }
    }

    /// Evaluates the function, staying on the real axis when the argument
    /// is real and inside the real domain.
    pub fn apply(&self, z: Complex64) -> Complex64 {
        if z.im == 0.0 {
            let x = z.re;
            let real = match self {
                Func::Sin => Some(x.sin()),
                Func::Cos => Some(x.cos()),
                Func::Tan => Some(x.tan()),
                Func::Asin if x.abs() <= 1.0 => Some(x.asin()),
                Func::Acos if x.abs() <= 1.0 => Some(x.acos()),
                Func::Atan => Some(x.atan()),
                Func::Exp => Some(x.exp()),
                Func::Ln if x > 0.0 => Some(x.ln()),
                _ => None,
            };
            if let Some(v) = real {
                return Complex64::new(v, 0.0);
            }
        }

        match self {
            Func::Sin => z.sin(),
            Func::Cos => z.cos(),
            Func::Tan => z.tan(),
            Func::Asin => z.asin(),
            Func::Acos => z.acos(),
            Func::Atan => z.atan(),
            Func::Exp => z.exp(),
            Func::Ln => z.ln(),
        }
    }

    /// Exact values at 0 and 1.
    fn exact_at(&self, c: &Coefficient) -> Option<Coefficient> {
        if c.is_zero() {
            match self {
                Func::Sin | Func::Tan | Func::Asin | Func::Atan => Some(Coefficient::int(0)),
                Func::Cos | Func::Exp => Some(Coefficient::int(1)),
                Func::Acos | Func::Ln => None,
            }
        } else if c.is_one() {
            match self {
                Func::Ln | Func::Acos => Some(Coefficient::int(0)),
                _ => None,
            }
        } else {
            None
        }
    }
}

/// Node of a symbolic expression tree.
///
/// Variant order defines the canonical ordering of terms and factors.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SymExprKind {
    Num(Coefficient),
    Var(String),
    Func(Func, SymExpr),
    Pow(SymExpr, SymExpr),
    Mul(Vec<SymExpr>),
    Add(Vec<SymExpr>),
}

/// An immutable, canonical symbolic expression. Nodes are shared.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymExpr {
    kind: Arc<SymExprKind>,
}

impl SymExpr {
    fn from_kind(kind: SymExprKind) -> Self {
        SymExpr {
            kind: Arc::new(kind),
        }
    }

    pub fn kind(&self) -> &SymExprKind {
        &self.kind
    }

    pub fn num(c: Coefficient) -> Self {
        Self::from_kind(SymExprKind::Num(c))
    }

    pub fn int(n: i64) -> Self {
        Self::num(Coefficient::int(n))
    }

    pub fn rational(num: i64, den: i64) -> Self {
        Self::num(Coefficient::rational(num, den))
    }

    pub fn float(f: f64) -> Self {
        Self::num(Coefficient::from_f64_exact(f))
    }

    pub fn complex(c: Complex64) -> Self {
        Self::num(Coefficient::from(c))
    }

    pub fn var(name: impl Into<String>) -> Self {
        Self::from_kind(SymExprKind::Var(name.into()))
    }

    pub fn imaginary_unit() -> Self {
        Self::num(Coefficient::complex(Complex64::new(0.0, 1.0)))
    }

    pub fn as_coeff(&self) -> Option<&Coefficient> {
        match self.kind() {
            SymExprKind::Num(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.as_coeff().is_some_and(Coefficient::is_zero)
    }

    pub fn is_one(&self) -> bool {
        self.as_coeff().is_some_and(Coefficient::is_one)
    }

    pub fn free_symbols(&self) -> BTreeSet<String> {
        let mut symbols = BTreeSet::new();
        self.collect_symbols(&mut symbols);
        symbols
    }

    fn collect_symbols(&self, symbols: &mut BTreeSet<String>) {
        match self.kind() {
            SymExprKind::Num(_) => {}
            SymExprKind::Var(name) => {
                symbols.insert(name.clone());
            }
            SymExprKind::Func(_, arg) => arg.collect_symbols(symbols),
            SymExprKind::Pow(base, exp) => {
                base.collect_symbols(symbols);
                exp.collect_symbols(symbols);
            }
            SymExprKind::Mul(items) | SymExprKind::Add(items) => {
                items.iter().for_each(|item| item.collect_symbols(symbols))
            }
        }
    }

    pub fn depends_on(&self, var: &str) -> bool {
        match self.kind() {
            SymExprKind::Num(_) => false,
            SymExprKind::Var(name) => name == var,
            SymExprKind::Func(_, arg) => arg.depends_on(var),
            SymExprKind::Pow(base, exp) => base.depends_on(var) || exp.depends_on(var),
            SymExprKind::Mul(items) | SymExprKind::Add(items) => {
                items.iter().any(|item| item.depends_on(var))
            }
        }
    }

    /// Canonical sum.
    pub fn add(terms: Vec<SymExpr>) -> SymExpr {
        let mut constant = Coefficient::int(0);
        let mut groups: BTreeMap<SymExpr, Coefficient> = BTreeMap::new();
        let mut pending = terms;

        while let Some(term) = pending.pop() {
            match term.kind() {
                SymExprKind::Num(c) => constant = constant + c.clone(),
                SymExprKind::Add(inner) => pending.extend(inner.iter().cloned()),
                _ => {
                    let (c, base) = term.split_coeff();
                    let entry = groups.entry(base).or_default();
                    *entry = entry.clone() + c;
                }
            }
        }

        let mut result = Vec::with_capacity(groups.len() + 1);
        if !constant.is_zero() {
            result.push(SymExpr::num(constant));
        }
        result.extend(
            groups
                .into_iter()
                .filter(|(_, c)| !c.is_zero())
                .map(|(base, c)| SymExpr::scaled(c, base)),
        );

        match result.len() {
            0 => SymExpr::int(0),
            1 => result.swap_remove(0),
            _ => SymExpr::from_kind(SymExprKind::Add(result)),
        }
    }

    /// Canonical product, distributed over any sums among the factors.
    pub fn mul(factors: Vec<SymExpr>) -> SymExpr {
        let mut coeff = Coefficient::int(1);
        let mut powers: BTreeMap<SymExpr, SymExpr> = BTreeMap::new();
        let mut pending = factors;

        while let Some(factor) = pending.pop() {
            match factor.kind() {
                SymExprKind::Num(c) => coeff = coeff * c.clone(),
                SymExprKind::Mul(inner) => pending.extend(inner.iter().cloned()),
                _ => {
                    let (base, exp) = factor.split_power();
                    let total = match powers.remove(&base) {
                        Some(prev) => SymExpr::add(vec![prev, exp]),
                        None => exp,
                    };
                    powers.insert(base, total);
                }
            }
        }

        if coeff.is_zero() {
            return SymExpr::int(0);
        }

        let mut plain = Vec::with_capacity(powers.len());
        let mut sums = Vec::new();
        let mut needs_merge = false;
        for (base, exp) in powers {
            let p = SymExpr::pow(base, exp);
            match p.kind() {
                SymExprKind::Num(c) => coeff = coeff * c.clone(),
                SymExprKind::Add(_) => sums.push(p),
                SymExprKind::Mul(_) => {
                    needs_merge = true;
                    plain.push(p);
                }
                _ => plain.push(p),
            }
        }

        // a power of a product turned back into a product; fold it in again
        if needs_merge {
            plain.push(SymExpr::num(coeff));
            plain.extend(sums);
            return SymExpr::mul(plain);
        }

        if coeff.is_zero() {
            return SymExpr::int(0);
        }

        plain.sort();
        let monomial = SymExpr::monomial(coeff, plain);
        if sums.is_empty() {
            return monomial;
        }

        let mut expanded = vec![monomial];
        for sum in &sums {
            let SymExprKind::Add(terms) = sum.kind() else {
                continue;
            };
            expanded = expanded
                .iter()
                .flat_map(|a| {
                    terms
                        .iter()
                        .map(move |t| SymExpr::mul(vec![a.clone(), t.clone()]))
                })
                .collect();
        }
        SymExpr::add(expanded)
    }

    /// Canonical power.
    pub fn pow(base: SymExpr, exp: SymExpr) -> SymExpr {
        if exp.is_zero() {
            return SymExpr::int(1);
        }
        if exp.is_one() {
            return base;
        }
        if let (Some(b), Some(e)) = (base.as_coeff(), exp.as_coeff()) {
            return match b.pow_exact(e) {
                Some(c) => SymExpr::num(c),
                None => SymExpr::from_kind(SymExprKind::Pow(base.clone(), exp.clone())),
            };
        }
        if base.is_one() {
            return SymExpr::int(1);
        }

        let integer = exp.as_coeff().and_then(Coefficient::as_integer);
        match (base.kind(), integer) {
            // (b^e)^n = b^(e*n) holds for integer n
            (SymExprKind::Pow(inner_base, inner_exp), Some(_)) => SymExpr::pow(
                inner_base.clone(),
                SymExpr::mul(vec![inner_exp.clone(), exp]),
            ),
            (SymExprKind::Mul(factors), Some(_)) => SymExpr::mul(
                factors
                    .iter()
                    .map(|f| SymExpr::pow(f.clone(), exp.clone()))
                    .collect(),
            ),
            (SymExprKind::Add(_), Some(n)) if n > 0 && n <= MAX_POWER_EXPANSION => {
                SymExpr::mul(vec![base.clone(); n as usize])
            }
            _ => SymExpr::from_kind(SymExprKind::Pow(base.clone(), exp)),
        }
    }

    /// Function application; folds floating-point arguments and exact
    /// special values, keeps exact arguments symbolic.
    pub fn func(f: Func, arg: SymExpr) -> SymExpr {
        if let Some(c) = arg.as_coeff() {
            if let Some(exact) = f.exact_at(c) {
                return SymExpr::num(exact);
            }
            if !c.is_exact() {
                return SymExpr::num(Coefficient::from(f.apply(c.to_complex())));
            }
        }
        SymExpr::from_kind(SymExprKind::Func(f, arg))
    }

    pub fn neg(&self) -> SymExpr {
        SymExpr::mul(vec![SymExpr::int(-1), self.clone()])
    }

    pub fn recip(&self) -> SymExpr {
        SymExpr::pow(self.clone(), SymExpr::int(-1))
    }

    pub fn sqrt(&self) -> SymExpr {
        SymExpr::pow(self.clone(), SymExpr::rational(1, 2))
    }

    fn scaled(coeff: Coefficient, base: SymExpr) -> SymExpr {
        if coeff.is_zero() {
            return SymExpr::int(0);
        }
        if coeff.is_one() {
            return base;
        }
        match base.kind() {
            SymExprKind::Num(c) => SymExpr::num(coeff * c.clone()),
            SymExprKind::Mul(factors) => {
                let mut items = Vec::with_capacity(factors.len() + 1);
                items.push(SymExpr::num(coeff));
                items.extend(factors.iter().cloned());
                SymExpr::from_kind(SymExprKind::Mul(items))
            }
            _ => SymExpr::from_kind(SymExprKind::Mul(vec![SymExpr::num(coeff), base])),
        }
    }

    fn monomial(coeff: Coefficient, mut factors: Vec<SymExpr>) -> SymExpr {
        if factors.is_empty() {
            return SymExpr::num(coeff);
        }
        if coeff.is_one() {
            if factors.len() == 1 {
                return factors.swap_remove(0);
            }
        } else {
            factors.insert(0, SymExpr::num(coeff));
        }
        SymExpr::from_kind(SymExprKind::Mul(factors))
    }

    /// Split a term into its numeric coefficient and the remaining monomial.
    fn split_coeff(&self) -> (Coefficient, SymExpr) {
        match self.kind() {
            SymExprKind::Num(c) => (c.clone(), SymExpr::int(1)),
            SymExprKind::Mul(factors) => match factors.first().map(SymExpr::kind) {
                Some(SymExprKind::Num(c)) => {
                    let rest = &factors[1..];
                    let base = if rest.len() == 1 {
                        rest[0].clone()
                    } else {
                        SymExpr::from_kind(SymExprKind::Mul(rest.to_vec()))
                    };
                    (c.clone(), base)
                }
                _ => (Coefficient::int(1), self.clone()),
            },
            _ => (Coefficient::int(1), self.clone()),
        }
    }

    fn split_power(&self) -> (SymExpr, SymExpr) {
        match self.kind() {
            SymExprKind::Pow(base, exp) => (base.clone(), exp.clone()),
            _ => (self.clone(), SymExpr::int(1)),
        }
    }

    /// Replace free variables with the bound expressions and re-canonicalize.
    pub fn substitute(&self, bindings: &BTreeMap<String, SymExpr>) -> SymExpr {
        match self.kind() {
            SymExprKind::Num(_) => self.clone(),
            SymExprKind::Var(name) => bindings.get(name).cloned().unwrap_or_else(|| self.clone()),
            SymExprKind::Func(f, arg) => SymExpr::func(*f, arg.substitute(bindings)),
            SymExprKind::Pow(base, exp) => {
                SymExpr::pow(base.substitute(bindings), exp.substitute(bindings))
            }
            SymExprKind::Mul(factors) => {
                SymExpr::mul(factors.iter().map(|f| f.substitute(bindings)).collect())
            }
            SymExprKind::Add(terms) => {
                SymExpr::add(terms.iter().map(|t| t.substitute(bindings)).collect())
            }
        }
    }

    /// Partial derivative with respect to `var`.
    pub fn diff(&self, var: &str) -> SymExpr {
        match self.kind() {
            SymExprKind::Num(_) => SymExpr::int(0),
            SymExprKind::Var(name) => SymExpr::int(if name == var { 1 } else { 0 }),
            SymExprKind::Add(terms) => SymExpr::add(terms.iter().map(|t| t.diff(var)).collect()),
            SymExprKind::Mul(factors) => SymExpr::add(
                (0..factors.len())
                    .map(|i| {
                        let mut parts = factors.clone();
                        parts[i] = factors[i].diff(var);
                        SymExpr::mul(parts)
                    })
                    .collect(),
            ),
            SymExprKind::Pow(base, exp) => {
                if !exp.depends_on(var) {
                    // e * b^(e-1) * b'
                    SymExpr::mul(vec![
                        exp.clone(),
                        SymExpr::pow(base.clone(), SymExpr::add(vec![exp.clone(), SymExpr::int(-1)])),
                        base.diff(var),
                    ])
                } else {
                    // b^e * (e' ln b + e b' / b)
                    SymExpr::mul(vec![
                        self.clone(),
                        SymExpr::add(vec![
                            SymExpr::mul(vec![exp.diff(var), SymExpr::func(Func::Ln, base.clone())]),
                            SymExpr::mul(vec![exp.clone(), base.diff(var), base.recip()]),
                        ]),
                    ])
                }
            }
            SymExprKind::Func(f, arg) => {
                let inner = arg.diff(var);
                if inner.is_zero() {
                    return SymExpr::int(0);
                }
                let a = arg.clone();
                let outer = match f {
                    Func::Sin => SymExpr::func(Func::Cos, a),
                    Func::Cos => SymExpr::func(Func::Sin, a).neg(),
                    Func::Tan => SymExpr::add(vec![
                        SymExpr::int(1),
                        SymExpr::pow(SymExpr::func(Func::Tan, a), SymExpr::int(2)),
                    ]),
                    Func::Asin => SymExpr::pow(
                        SymExpr::add(vec![SymExpr::int(1), SymExpr::pow(a, SymExpr::int(2)).neg()]),
                        SymExpr::rational(-1, 2),
                    ),
                    Func::Acos => SymExpr::pow(
                        SymExpr::add(vec![SymExpr::int(1), SymExpr::pow(a, SymExpr::int(2)).neg()]),
                        SymExpr::rational(-1, 2),
                    )
                    .neg(),
                    Func::Atan => SymExpr::add(vec![SymExpr::int(1), SymExpr::pow(a, SymExpr::int(2))])
                        .recip(),
                    Func::Exp => self.clone(),
                    Func::Ln => a.recip(),
                };
                SymExpr::mul(vec![outer, inner])
            }
        }
    }

    /// Numeric value of a constant expression.
    pub fn eval(&self) -> Result<Complex64> {
        let free = self.free_symbols();
        if !free.is_empty() {
            return Err(ParaxialError::NotFullyDetermined(free.into_iter().collect()));
        }
        Ok(self.eval_unchecked())
    }

    fn eval_unchecked(&self) -> Complex64 {
        match self.kind() {
            SymExprKind::Num(c) => c.to_complex(),
            SymExprKind::Var(_) => Complex64::new(f64::NAN, 0.0),
            SymExprKind::Func(f, arg) => f.apply(arg.eval_unchecked()),
            SymExprKind::Pow(base, exp) => {
                let b = base.eval_unchecked();
                if let Some(n) = exp.as_coeff().and_then(Coefficient::as_integer) {
                    if let Ok(n) = i32::try_from(n) {
                        return b.powi(n);
                    }
                }
                let e = exp.eval_unchecked();
                if b.im == 0.0 && e.im == 0.0 && b.re >= 0.0 {
                    Complex64::new(b.re.powf(e.re), 0.0)
                } else {
                    b.powc(e)
                }
            }
            SymExprKind::Mul(factors) => factors.iter().map(Self::eval_unchecked).product(),
            SymExprKind::Add(terms) => terms.iter().map(Self::eval_unchecked).sum(),
        }
    }

    fn wrapped(&self) -> String {
        match self.kind() {
            SymExprKind::Add(_) | SymExprKind::Mul(_) | SymExprKind::Pow(..) => format!("({})", self),
            SymExprKind::Num(c) if !c.is_exact() || c.is_negative() => format!("({})", self),
            SymExprKind::Num(Coefficient::Rational(_, d)) if *d != 1 => format!("({})", self),
            _ => self.to_string(),
        }
    }
}

impl fmt::Display for SymExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            SymExprKind::Num(c) => write!(f, "{}", c),
            SymExprKind::Var(name) => write!(f, "{}", name),
            SymExprKind::Func(func, arg) => write!(f, "{}({})", func.name(), arg),
            SymExprKind::Pow(base, exp) => write!(f, "{}^{}", base.wrapped(), exp.wrapped()),
            SymExprKind::Mul(factors) => {
                let text = factors
                    .iter()
                    .map(|factor| match factor.kind() {
                        SymExprKind::Pow(..) => factor.to_string(),
                        _ => factor.wrapped(),
                    })
                    .join("*");
                write!(f, "{}", text)
            }
            SymExprKind::Add(terms) => write!(f, "{}", terms.iter().join(" + ")),
        }
    }
}
