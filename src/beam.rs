//! Gaussian beam propagation with the complex beam parameter.
//!
//! The beam parameter `q = z + i·z_R` is physical (not reduced): `z` is the
//! distance from the waist as measured in the current medium and `z_R` is the
//! Rayleigh range there. It satisfies
//!
//! `1/q = 1/R − i·λ/(π·w²)`
//!
//! with `λ` the wavelength in the current medium (`λ₀/n`). Because element
//! matrices use physical angles, `q` propagates with the plain bilinear map
//! `q' = (A·q + B)/(C·q + D)`, including across index changes.
//!
//! [`GaussianBeam`] bundles `q` with the vacuum wavelength and the medium
//! index, and tracks the medium as it propagates.

use crate::element::{ensure_nonzero, ensure_positive, Plane, TransferMatrix};
use crate::error::{ParaxialError, Result};
use crate::scalar::Scalar;
use crate::settings::DEFAULT_TOLERANCE;
use crate::system::System;
use log::{debug, warn};
use num_complex::Complex64;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Element;

    const WAVELENGTH: f64 = 532e-9;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1e-12)
    }

    #[test]
    fn metrics_at_the_waist() {
        let q = Scalar::complex(0.0, 1e-3);
        let metrics = derive_beam_metrics(&q, &Scalar::real(WAVELENGTH)).unwrap();
        assert!(metrics.radius_of_curvature.is_infinite());
        assert!(close(metrics.width, metrics.waist));
        assert!(close(metrics.divergence, metrics.waist / 1e-3));
        assert_eq!(metrics.waist_distance, 0.0);
    }

    #[test]
    fn rejects_unphysical_q() {
        for q in [Scalar::complex(1.0, 0.0), Scalar::complex(1.0, -1e-3), Scalar::real(2.0)] {
            assert!(matches!(
                derive_beam_metrics(&q, &Scalar::real(WAVELENGTH)),
                Err(ParaxialError::InvalidBeamParameter(_))
            ));
        }
    }

    #[test]
    fn rejects_non_positive_wavelength() {
        let system = System::new().append(Element::gap(1.0).unwrap());
        let q = Scalar::complex(0.0, 1.0);
        assert!(matches!(
            propagate_beam(&system, &q, &Scalar::real(0.0)),
            Err(ParaxialError::InvalidParameter(_))
        ));
        assert!(matches!(
            derive_beam_metrics(&q, &Scalar::real(-1.0)),
            Err(ParaxialError::InvalidParameter(_))
        ));
        // symbolic wavelengths pass through
        assert!(propagate_beam(&system, &q, &Scalar::symbol("lambda")).is_ok());
    }

    #[test]
    fn free_space_shifts_z() {
        let system = System::new().append(Element::gap(0.1).unwrap());
        let q = Scalar::complex(10e-3, 1e-3);
        let out = propagate_beam(&system, &q, &Scalar::real(WAVELENGTH)).unwrap();
        assert!(out.approx_eq(&Scalar::complex(0.11, 1e-3), 1e-12));
    }

    #[test]
    fn waist_width_constructor() {
        let beam = GaussianBeam::from_width_z(1e-3, 0.0, 500e-9, 1.0, 1).unwrap();
        let metrics = beam.metrics().unwrap();
        assert!(close(metrics.waist, 1e-3));
        assert!((metrics.divergence - 0.159_154_9e-3).abs() < 1e-9);
        assert!(metrics.radius_of_curvature.is_infinite());
    }

    #[test]
    fn radius_and_width_round_trip() {
        let beam = GaussianBeam::from_radius_width(100e-3, 1e-3, WAVELENGTH, 1.5).unwrap();
        let metrics = beam.metrics().unwrap();
        assert!(close(metrics.radius_of_curvature, 100e-3));
        assert!(close(metrics.width, 1e-3));

        let flat = GaussianBeam::from_radius_width(0.0, 1e-3, WAVELENGTH, 1.0).unwrap();
        assert!(flat.metrics().unwrap().radius_of_curvature.is_infinite());
    }

    #[test]
    fn zero_width_or_range_rejected() {
        assert!(GaussianBeam::from_z_zr(1.0, 0.0, WAVELENGTH, 1.0).is_err());
        assert!(GaussianBeam::from_radius_width(1.0, 0.0, WAVELENGTH, 1.0).is_err());
        assert!(GaussianBeam::from_waist(0.0, 0.0, WAVELENGTH, 1.0).is_err());
    }

    #[test]
    fn astigmatic_systems_need_a_plane() {
        let system = System::new().append(Element::tilted_mirror(-1.0, 0.3).unwrap());
        let q = Scalar::complex(0.0, 1.0);
        assert!(matches!(
            propagate_beam(&system, &q, &Scalar::real(WAVELENGTH)),
            Err(ParaxialError::DimensionMismatch { .. })
        ));
        assert!(propagate_beam_in(&system, &q, &Scalar::real(WAVELENGTH), Plane::Sagittal).is_ok());
    }
}

/// Real-valued beam properties at a reference plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeamMetrics {
    /// Waist radius `w₀ = sqrt(λ·z_R/π)`.
    pub waist: f64,
    /// Beam radius at the reference plane.
    pub width: f64,
    /// Far-field half-angle `w₀/z_R`.
    pub divergence: f64,
    /// `Im(q)`.
    pub rayleigh_range: f64,
    /// Wavefront radius `|q|²/Re(q)`, infinite at the waist.
    pub radius_of_curvature: f64,
    /// `Re(q)`: distance from the waist, positive past it.
    pub waist_distance: f64,
}

/// Apply `q' = (A·q + B)/(C·q + D)` with the composed matrix of a planar
/// system.
pub fn propagate_beam(system: &System, q: &Scalar, wavelength: &Scalar) -> Result<Scalar> {
    let dimension = system.dimension();
    if dimension != 2 {
        return Err(ParaxialError::DimensionMismatch {
            expected: dimension,
            found: 2,
        });
    }
    propagate_beam_in(system, q, wavelength, Plane::Tangential)
}

/// [`propagate_beam`] through one plane of a possibly astigmatic system.
pub fn propagate_beam_in(
    system: &System,
    q: &Scalar,
    wavelength: &Scalar,
    plane: Plane,
) -> Result<Scalar> {
    ensure_positive(wavelength, "wavelength")?;
    Ok(transform(system.compose(), q, plane))
}

fn transform(matrix: &TransferMatrix, q: &Scalar, plane: Plane) -> Scalar {
    let (a, b, c, d) = matrix.abcd(plane);
    (a * q + b) / (c * q + d)
}

/// Beam metrics from a numeric `q` and the wavelength in the current medium.
pub fn derive_beam_metrics(q: &Scalar, wavelength: &Scalar) -> Result<BeamMetrics> {
    ensure_positive(wavelength, "wavelength")?;
    let lambda = wavelength.to_f64()?;
    let q: Complex64 = q.to_complex()?;

    let rayleigh_range = q.im;
    if !(rayleigh_range > 0.0) || !rayleigh_range.is_finite() {
        return Err(ParaxialError::InvalidBeamParameter(format!(
            "Im(q) must be positive, got q = {}",
            q
        )));
    }

    let modulus_sq = q.norm_sqr();
    let waist = (lambda * rayleigh_range / PI).sqrt();
    let radius_of_curvature = if q.re == 0.0 {
        f64::INFINITY
    } else {
        modulus_sq / q.re
    };

    Ok(BeamMetrics {
        waist,
        width: (lambda * modulus_sq / (PI * rayleigh_range)).sqrt(),
        divergence: waist / rayleigh_range,
        rayleigh_range,
        radius_of_curvature,
        waist_distance: q.re,
    })
}

/// A Gaussian beam in a medium.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianBeam {
    /// Physical beam parameter `z + i·z_R`.
    pub q: Scalar,
    /// Vacuum wavelength.
    pub wavelength: Scalar,
    /// Refractive index of the current medium.
    pub index: Scalar,
}

impl GaussianBeam {
    pub fn from_q(
        q: impl Into<Scalar>,
        wavelength: impl Into<Scalar>,
        index: impl Into<Scalar>,
    ) -> Result<GaussianBeam> {
        let beam = GaussianBeam {
            q: q.into(),
            wavelength: wavelength.into(),
            index: index.into(),
        };
        ensure_positive(&beam.wavelength, "wavelength")?;
        ensure_nonzero(&beam.index, "refractive index")?;
        if let Ok(q) = beam.q.to_complex() {
            if !(q.im > 0.0) {
                return Err(ParaxialError::InvalidBeamParameter(format!(
                    "Im(q) must be positive, got q = {}",
                    q
                )));
            }
        }
        Ok(beam)
    }

    /// `q = z + i·z_R`.
    pub fn from_z_zr(
        z: impl Into<Scalar>,
        zr: impl Into<Scalar>,
        wavelength: impl Into<Scalar>,
        index: impl Into<Scalar>,
    ) -> Result<GaussianBeam> {
        let (z, zr): (Scalar, Scalar) = (z.into(), zr.into());
        ensure_nonzero(&zr, "Rayleigh range")?;
        Self::from_q(z + zr * Scalar::i(), wavelength, index)
    }

    /// Waist radius `w0` located a distance `z` upstream of the reference
    /// plane.
    pub fn from_waist(
        w0: impl Into<Scalar>,
        z: impl Into<Scalar>,
        wavelength: impl Into<Scalar>,
        index: impl Into<Scalar>,
    ) -> Result<GaussianBeam> {
        let (w0, wavelength, index) = (w0.into(), wavelength.into(), index.into());
        ensure_nonzero(&w0, "waist")?;
        ensure_nonzero(&index, "refractive index")?;
        let zr = PI * w0.powi(2) / (&wavelength / &index);
        Self::from_z_zr(z, zr, wavelength, index)
    }

    /// From the wavefront radius and beam width, `1/q = 1/R − i·λ/(π·w²)`.
    /// A zero or infinite radius means a flat wavefront.
    pub fn from_radius_width(
        radius: impl Into<Scalar>,
        width: impl Into<Scalar>,
        wavelength: impl Into<Scalar>,
        index: impl Into<Scalar>,
    ) -> Result<GaussianBeam> {
        let (radius, width, wavelength, index) =
            (radius.into(), width.into(), wavelength.into(), index.into());
        ensure_nonzero(&width, "beam width")?;
        ensure_nonzero(&index, "refractive index")?;
        let curvature = if is_flat_radius(&radius) {
            Scalar::zero()
        } else {
            radius.recip()
        };
        let lambda = &wavelength / &index;
        let inv_q = curvature - Scalar::i() * lambda / (PI * width.powi(2));
        Self::from_q(inv_q.recip(), wavelength, index)
    }

    /// From the wavefront radius and the distance from the waist,
    /// `R = z + z_R²/z`.
    pub fn from_radius_z(
        radius: impl Into<Scalar>,
        z: impl Into<Scalar>,
        wavelength: impl Into<Scalar>,
        index: impl Into<Scalar>,
    ) -> Result<GaussianBeam> {
        let (radius, z) = (radius.into(), z.into());
        ensure_nonzero(&radius, "radius of curvature")?;
        let zr_sq = &z * (&radius - &z);
        let zr = real_root(&zr_sq, "R and z do not describe a Gaussian beam")?;
        Self::from_z_zr(z, zr, wavelength, index)
    }

    /// From the wavefront radius and the Rayleigh range. `sign` picks the
    /// root of `z² − R·z + z_R² = 0`: positive for the far side (larger `|z|`).
    pub fn from_radius_zr(
        radius: impl Into<Scalar>,
        zr: impl Into<Scalar>,
        wavelength: impl Into<Scalar>,
        index: impl Into<Scalar>,
        sign: i32,
    ) -> Result<GaussianBeam> {
        let (radius, zr) = (radius.into(), zr.into());
        let discriminant = radius.powi(2) - zr.powi(2) * 4.0;
        let root = real_root(&discriminant, "R and z_R do not describe a Gaussian beam")?;
        let z = (&radius + root * sign_of(sign)) / 2.0;
        Self::from_z_zr(z, zr, wavelength, index)
    }

    /// From the beam width and the distance from the waist. `sign` picks the
    /// root of `z_R² − (π·w²/λ)·z_R + z² = 0`: positive for the larger
    /// Rayleigh range, i.e. the smaller divergence.
    pub fn from_width_z(
        width: impl Into<Scalar>,
        z: impl Into<Scalar>,
        wavelength: impl Into<Scalar>,
        index: impl Into<Scalar>,
        sign: i32,
    ) -> Result<GaussianBeam> {
        let (width, z, wavelength, index) =
            (width.into(), z.into(), wavelength.into(), index.into());
        ensure_nonzero(&width, "beam width")?;
        ensure_nonzero(&index, "refractive index")?;
        let a = PI * width.powi(2) / (&wavelength / &index);
        let discriminant = a.powi(2) - z.powi(2) * 4.0;
        let root = real_root(&discriminant, "w and z do not describe a Gaussian beam")?;
        let zr = (a + root * sign_of(sign)) / 2.0;
        Self::from_z_zr(z, zr, wavelength, index)
    }

    /// From the beam width and the Rayleigh range; `sign` selects the side of
    /// the waist.
    pub fn from_width_zr(
        width: impl Into<Scalar>,
        zr: impl Into<Scalar>,
        wavelength: impl Into<Scalar>,
        index: impl Into<Scalar>,
        sign: i32,
    ) -> Result<GaussianBeam> {
        let (width, zr, wavelength, index) =
            (width.into(), zr.into(), wavelength.into(), index.into());
        ensure_nonzero(&width, "beam width")?;
        ensure_nonzero(&zr, "Rayleigh range")?;
        ensure_nonzero(&index, "refractive index")?;
        let a = PI * width.powi(2) / (&wavelength / &index);
        let z_sq = &zr * (a - &zr);
        let z = real_root(&z_sq, "w and z_R do not describe a Gaussian beam")? * sign_of(sign);
        Self::from_z_zr(z, zr, wavelength, index)
    }

    /// Wavelength in the current medium.
    pub fn medium_wavelength(&self) -> Scalar {
        &self.wavelength / &self.index
    }

    /// Propagate through a planar system, ending in its output medium.
    pub fn propagate(&self, system: &System) -> Result<GaussianBeam> {
        let n_in = system.input_index();
        if !n_in.approx_eq(&self.index, DEFAULT_TOLERANCE) {
            warn!(
                "beam in medium {} enters a system starting in medium {}",
                self.index, n_in
            );
        }
        let q = propagate_beam(system, &self.q, &self.wavelength)?;
        debug!("propagated beam q = {} -> {}", self.q, q);
        Ok(GaussianBeam {
            q,
            wavelength: self.wavelength.clone(),
            index: system.output_index(),
        })
    }

    pub fn metrics(&self) -> Result<BeamMetrics> {
        derive_beam_metrics(&self.q, &self.medium_wavelength())
    }
}

impl fmt::Display for GaussianBeam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "q = {} (λ₀ = {}, n = {})",
            self.q, self.wavelength, self.index
        )
    }
}

fn sign_of(sign: i32) -> f64 {
    if sign >= 0 {
        1.0
    } else {
        -1.0
    }
}

fn is_flat_radius(radius: &Scalar) -> bool {
    match radius.to_complex() {
        Ok(r) => r.norm() == 0.0 || !r.norm().is_finite(),
        Err(_) => radius.is_zero(),
    }
}

/// Square root of a quantity that has to be non-negative; symbolic values are
/// taken as given.
fn real_root(value: &Scalar, message: &str) -> Result<Scalar> {
    if let Ok(v) = value.to_complex() {
        if v.im != 0.0 || v.re < 0.0 {
            return Err(ParaxialError::InvalidBeamParameter(message.to_string()));
        }
    }
    Ok(value.sqrt())
}
