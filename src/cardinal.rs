//! First-order imaging properties and resonator stability.
//!
//! All quantities derive from the composed matrix `[[A, B], [C, D]]` of a
//! system between media `n1` (input) and `n2` (output). Positions use an
//! inward convention:
//! - front-side points are measured from the input plane, positive downstream
//! - back-side points are measured from the output plane, positive upstream
//!
//! so a principal plane inside a thick lens has positive offsets from both
//! sides. Symbolic systems produce symbolic results.

use crate::beam::GaussianBeam;
use crate::element::Plane;
use crate::error::{ParaxialError, Result};
use crate::scalar::Scalar;
use crate::settings::Settings;
use crate::system::System;
use log::debug;
use num_complex::Complex64;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};
use std::fmt;


/// Cardinal quantities of a focal system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardinalPoints {
    /// `−1/C`, the image-side focal length.
    pub effective_focal_length: Scalar,
    /// `−(n1/n2)/C`, the object-side focal length.
    pub front_focal_length: Scalar,
    /// Front focal point, `D/C` from the input plane.
    pub front_focal_point: Scalar,
    /// Back focal point, `A/C` from the output plane.
    pub back_focal_point: Scalar,
    /// Distance from the front focal point to the input plane, `−D/C`.
    pub front_focal_distance: Scalar,
    /// Distance from the output plane to the back focal point, `−A/C`.
    pub back_focal_distance: Scalar,
    /// `(D − n1/n2)/C` from the input plane.
    pub front_principal_plane: Scalar,
    /// `(A − 1)/C` from the output plane.
    pub back_principal_plane: Scalar,
    /// `(D − 1)/C` from the input plane.
    pub front_nodal_point: Scalar,
    /// `(A − n1/n2)/C` from the output plane.
    pub back_nodal_point: Scalar,
    /// `A`, the transverse magnification between conjugate planes.
    pub magnification: Scalar,
    /// `D`
    pub angular_magnification: Scalar,
}

impl fmt::Display for CardinalPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "EFL: {}", self.effective_focal_length)?;
        writeln!(f, "FFL: {}", self.front_focal_length)?;
        writeln!(
            f,
            "F: {} (front), {} (back)",
            self.front_focal_point, self.back_focal_point
        )?;
        writeln!(
            f,
            "P: {} (front), {} (back)",
            self.front_principal_plane, self.back_principal_plane
        )?;
        write!(
            f,
            "N: {} (front), {} (back)",
            self.front_nodal_point, self.back_nodal_point
        )
    }
}

/// Cardinal points of a planar system with default settings.
pub fn cardinal_points(system: &System) -> Result<CardinalPoints> {
    cardinal_points_with(system, &Settings::default())
}

pub fn cardinal_points_with(system: &System, settings: &Settings) -> Result<CardinalPoints> {
    require_planar(system)?;
    cardinal_points_in(system, Plane::Tangential, settings)
}

/// Cardinal points in one plane of a possibly astigmatic system.
///
/// **Context**: `C = 0` means the system has no focal power (afocal); this
/// is reported as [`ParaxialError::SingularSystem`], never defaulted to
/// infinity. A numeric `C` counts as zero when it is below
/// `settings.singular_threshold` times the magnitude of the products it was
/// summed from (see [`System::magnitude`]), so the test does not depend on
/// the length unit.
pub fn cardinal_points_in(
    system: &System,
    plane: Plane,
    settings: &Settings,
) -> Result<CardinalPoints> {
    let (a, _b, c, d) = system.compose().abcd(plane);

    if has_no_power(system, plane, &c, settings) {
        return Err(ParaxialError::SingularSystem(format!(
            "C = {}: the system has no focal power",
            c
        )));
    }

    let ratio = system.input_index() / system.output_index();
    let inv_c = c.recip();
    let one = Scalar::one();

    let points = CardinalPoints {
        effective_focal_length: -&inv_c,
        front_focal_length: -(&ratio * &inv_c),
        front_focal_point: &d * &inv_c,
        back_focal_point: &a * &inv_c,
        front_focal_distance: -(&d * &inv_c),
        back_focal_distance: -(&a * &inv_c),
        front_principal_plane: (&d - &ratio) * &inv_c,
        back_principal_plane: (&a - &one) * &inv_c,
        front_nodal_point: (&d - &one) * &inv_c,
        back_nodal_point: (&a - &ratio) * &inv_c,
        magnification: a,
        angular_magnification: d,
    };
    debug!("cardinal points: EFL = {}", points.effective_focal_length);
    Ok(points)
}

/// Transverse magnification `A`; defined for afocal systems too.
pub fn magnification(system: &System, plane: Plane) -> Scalar {
    system.compose().abcd(plane).0
}

/// Angular magnification `D`.
pub fn angular_magnification(system: &System, plane: Plane) -> Scalar {
    system.compose().abcd(plane).3
}

/// Exactly zero, or lost in the rounding of the terms that cancelled.
fn has_no_power(system: &System, plane: Plane, c: &Scalar, settings: &Settings) -> bool {
    let value = match c.to_complex() {
        Ok(v) => v.norm(),
        Err(_) => return c.is_zero(),
    };
    let scale = system.magnitude(plane).map_or(0.0, |m| m[(1, 0)]);
    value == 0.0 || value <= settings.singular_threshold * scale
}

fn require_planar(system: &System) -> Result<()> {
    match system.dimension() {
        2 => Ok(()),
        dimension => Err(ParaxialError::DimensionMismatch {
            expected: 2,
            found: dimension,
        }),
    }
}

/// Geometric stability of a resonator round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stability {
    /// `|m| < 1`
    Stable,
    /// `|m| = 1` within tolerance
    MarginalBoundary,
    /// `|m| > 1`
    Unstable,
}

impl Stability {
    /// Classify the half trace `m = (A + D)/2`.
    pub fn classify(m: f64, tolerance: f64) -> Stability {
        let distance = m.abs() - 1.0;
        if distance.abs() <= tolerance {
            Stability::MarginalBoundary
        } else if distance < 0.0 {
            Stability::Stable
        } else {
            Stability::Unstable
        }
    }

    pub fn is_stable(&self) -> bool {
        matches!(self, Stability::Stable)
    }
}

impl fmt::Display for Stability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Stability::Stable => "stable",
            Stability::MarginalBoundary => "marginal boundary",
            Stability::Unstable => "unstable",
        };
        write!(f, "{}", text)
    }
}

/// `m = (A + D)/2` of one plane, symbolic if the system is.
pub fn stability_parameter(system: &System, plane: Plane) -> Scalar {
    let (a, _, _, d) = system.compose().abcd(plane);
    (a + d) / 2.0
}

/// Stability of a planar round-trip system with default settings.
pub fn stability(round_trip: &System) -> Result<Stability> {
    stability_with(round_trip, &Settings::default())
}

pub fn stability_with(round_trip: &System, settings: &Settings) -> Result<Stability> {
    require_planar(round_trip)?;
    stability_in(round_trip, Plane::Tangential, settings)
}

/// Stability of one plane; every matrix entry must be numeric.
pub fn stability_in(round_trip: &System, plane: Plane, settings: &Settings) -> Result<Stability> {
    let m = stability_parameter(round_trip, plane).to_f64()?;
    let stability = Stability::classify(m, settings.stability_tolerance);
    debug!("round trip m = {}: {}", m, stability);
    Ok(stability)
}

/// The self-consistent beam of a stable resonator, at the reference plane
/// where the round trip starts.
///
/// **How it Works**
///
/// Solves `q = (A·q + B)/(C·q + D)`, i.e. `C·q² + (D − A)·q − B = 0`, and
/// keeps the root with a positive imaginary part. The roots are complex only
/// when the cavity is stable.
pub fn cavity_eigenmode(round_trip: &System, wavelength: impl Into<Scalar>) -> Result<GaussianBeam> {
    cavity_eigenmode_in(round_trip, wavelength, Plane::Tangential, &Settings::default())
}

pub fn cavity_eigenmode_in(
    round_trip: &System,
    wavelength: impl Into<Scalar>,
    plane: Plane,
    settings: &Settings,
) -> Result<GaussianBeam> {
    let stability = stability_in(round_trip, plane, settings)?;
    if !stability.is_stable() {
        return Err(ParaxialError::InvalidBeamParameter(format!(
            "a {} resonator has no Gaussian eigenmode",
            stability
        )));
    }

    let (a, b, c, d) = round_trip.compose().abcd(plane);
    if has_no_power(round_trip, plane, &c, settings) {
        return Err(ParaxialError::SingularSystem(
            "round trip has no focal power".to_string(),
        ));
    }
    let [a, b, c, d] = [a, b, c, d].map(|x| x.to_f64());
    let (a, b, c, d) = (a?, b?, c?, d?);

    let det = a * d - b * c;
    let discriminant = 4.0 * det - (a + d).powi(2);
    let q = Complex64::new((a - d) / (2.0 * c), discriminant.sqrt() / (2.0 * c.abs()));
    debug!("cavity eigenmode q = {}", q);

    GaussianBeam::from_q(q, wavelength, round_trip.input_index())
}
