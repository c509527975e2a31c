//! Ray states and their propagation through systems.
//!
//! A planar ray is the column vector `(height, angle)`; an astigmatic ray is
//! `(y_t, u_t, y_s, u_s)`, tangential components first. Propagation is the
//! matrix-vector product with the composed system matrix:
//! - [`propagate`] maps a single ray
//! - [`propagate_all`] lazily maps a bundle, in input order
//! - [`trace`] records the ray at every reference plane of the system
//!
//! The ray's dimension must match the system's; a planar ray is never
//! silently promoted to an astigmatic one. Misaligned elements add their
//! offset to the tangential components after the matrix product.

use crate::element::{Plane, TransferMatrix};
use crate::error::{ParaxialError, Result};
use crate::scalar::{Bindings, Scalar};
use crate::system::System;
use log::trace;
use nalgebra::{Vector2, Vector4};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Element;

    fn lens_then_gap() -> System {
        System::new()
            .append(Element::thin_lens(100.0).unwrap())
            .append(Element::gap(50.0).unwrap())
    }

    #[test]
    fn ray_through_lens_and_gap() {
        let states = trace(&lens_then_gap(), &RayState::new(5.0, 0.0)).unwrap();
        assert_eq!(states.len(), 3);
        assert!(states[1].approx_eq(&RayState::new(5.0, -0.05), 1e-9));
        assert!(states[2].approx_eq(&RayState::new(2.5, -0.05), 1e-9));
    }

    #[test]
    fn bundle_is_lazy_and_restartable() {
        let system = lens_then_gap();
        let rays = fan(-1.0, 1.0, 5, 0.0);
        let outputs = propagate_all(&system, &rays);
        assert_eq!(outputs.len(), 5);

        let first: Vec<RayState> = outputs.clone().collect::<Result<_>>().unwrap();
        let second: Vec<RayState> = outputs.collect::<Result<_>>().unwrap();
        assert_eq!(first, second);
        // heights halve at the output, order preserved
        assert!(first[0].height().approx_eq(&Scalar::real(-0.5), 1e-12));
        assert!(first[4].height().approx_eq(&Scalar::real(0.5), 1e-12));
    }

    #[test]
    fn dimension_mismatch() {
        let planar_ray = RayState::new(1.0, 0.0);
        let astigmatic = System::new().append(Element::tilted_mirror(-50.0, 0.2).unwrap());
        assert_eq!(
            propagate(&astigmatic, &planar_ray).unwrap_err(),
            ParaxialError::DimensionMismatch {
                expected: 4,
                found: 2
            }
        );

        let astigmatic_ray = RayState::astigmatic(1.0, 0.0, 1.0, 0.0);
        assert!(matches!(
            propagate(&lens_then_gap(), &astigmatic_ray),
            Err(ParaxialError::DimensionMismatch {
                expected: 2,
                found: 4
            })
        ));
    }

    #[test]
    fn astigmatic_ray_splits_per_plane() {
        let angle = 0.5;
        let system = System::new()
            .append(Element::tilted_mirror(-100.0, angle).unwrap())
            .append(Element::gap(10.0).unwrap());
        let out = propagate(&system, &RayState::astigmatic(1.0, 0.0, 1.0, 0.0)).unwrap();
        let t = out.plane(Plane::Tangential);
        let s = out.plane(Plane::Sagittal);
        let expected_t = -0.02 / f64::cos(angle);
        let expected_s = -0.02 * f64::cos(angle);
        assert!(t.angle().approx_eq(&Scalar::real(expected_t), 1e-12));
        assert!(s.angle().approx_eq(&Scalar::real(expected_s), 1e-12));
    }

    #[test]
    fn misaligned_lens_trace_matches_propagation() {
        let system = System::new()
            .append(Element::thin_lens(100.0).unwrap().misaligned(2.0, 0.0))
            .append(Element::gap(50.0).unwrap());
        let ray = RayState::new(5.0, 0.0);
        let states = trace(&system, &ray).unwrap();
        // the lens bends the ray towards its own axis at y = 2
        assert!(states[1].approx_eq(&RayState::new(5.0, -0.03), 1e-12));
        assert!(states[2].approx_eq(&RayState::new(3.5, -0.03), 1e-12));
        assert!(propagate(&system, &ray)
            .unwrap()
            .approx_eq(&states[2], 1e-12));
    }

    #[test]
    fn misalignment_shifts_tangential_plane_only() {
        let system = System::new()
            .append(Element::tilted_mirror(-100.0, 0.3).unwrap().misaligned(1.0, 0.0));
        let aligned = System::new().append(Element::tilted_mirror(-100.0, 0.3).unwrap());
        let ray = RayState::astigmatic(0.0, 0.0, 0.0, 0.0);
        let out = propagate(&system, &ray).unwrap();
        assert!(!out.plane(Plane::Tangential).approx_eq(&RayState::new(0.0, 0.0), 1e-12));
        assert!(out
            .plane(Plane::Sagittal)
            .approx_eq(&propagate(&aligned, &ray).unwrap().plane(Plane::Sagittal), 0.0));
    }

    #[test]
    fn symbolic_ray_binds_late() {
        let system = System::new()
            .append(Element::thin_lens(Scalar::symbol("f")).unwrap())
            .append(Element::gap(Scalar::symbol("d")).unwrap());
        let ray = RayState::new(Scalar::symbol("h"), 0.0);
        let bindings = Bindings::new().with("f", 100.0).with("d", 50.0).with("h", 5.0);
        let out = propagate_with(&system, &ray, &bindings).unwrap();
        assert!(out.approx_eq(&RayState::new(2.5, -0.05), 1e-12));
    }
}

/// A ray at a reference plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RayState {
    Planar(Vector2<Scalar>),
    Astigmatic(Vector4<Scalar>),
}

impl RayState {
    pub fn new(height: impl Into<Scalar>, angle: impl Into<Scalar>) -> RayState {
        RayState::Planar(Vector2::new(height.into(), angle.into()))
    }

    pub fn astigmatic(
        y_t: impl Into<Scalar>,
        u_t: impl Into<Scalar>,
        y_s: impl Into<Scalar>,
        u_s: impl Into<Scalar>,
    ) -> RayState {
        RayState::Astigmatic(Vector4::new(y_t.into(), u_t.into(), y_s.into(), u_s.into()))
    }

    pub fn dimension(&self) -> usize {
        match self {
            RayState::Planar(_) => 2,
            RayState::Astigmatic(_) => 4,
        }
    }

    /// Height, tangential for astigmatic rays.
    pub fn height(&self) -> &Scalar {
        match self {
            RayState::Planar(v) => &v[0],
            RayState::Astigmatic(v) => &v[0],
        }
    }

    /// Angle, tangential for astigmatic rays.
    pub fn angle(&self) -> &Scalar {
        match self {
            RayState::Planar(v) => &v[1],
            RayState::Astigmatic(v) => &v[1],
        }
    }

    /// The planar ray in one plane.
    pub fn plane(&self, plane: Plane) -> RayState {
        match (self, plane) {
            (RayState::Planar(_), _) => self.clone(),
            (RayState::Astigmatic(v), Plane::Tangential) => RayState::new(v[0].clone(), v[1].clone()),
            (RayState::Astigmatic(v), Plane::Sagittal) => RayState::new(v[2].clone(), v[3].clone()),
        }
    }

    /// The same ray travelling backwards: every angle changes sign.
    pub fn flipped(&self) -> RayState {
        match self {
            RayState::Planar(v) => RayState::Planar(Vector2::new(v[0].clone(), -&v[1])),
            RayState::Astigmatic(v) => RayState::Astigmatic(Vector4::new(
                v[0].clone(),
                -&v[1],
                v[2].clone(),
                -&v[3],
            )),
        }
    }

    pub fn substitute(&self, bindings: &Bindings) -> RayState {
        match self {
            RayState::Planar(v) => RayState::Planar(v.map(|x| x.substitute(bindings))),
            RayState::Astigmatic(v) => RayState::Astigmatic(v.map(|x| x.substitute(bindings))),
        }
    }

    pub fn approx_eq(&self, other: &RayState, tol: f64) -> bool {
        match (self, other) {
            (RayState::Planar(a), RayState::Planar(b)) => {
                a.iter().zip(b.iter()).all(|(x, y)| x.approx_eq(y, tol))
            }
            (RayState::Astigmatic(a), RayState::Astigmatic(b)) => {
                a.iter().zip(b.iter()).all(|(x, y)| x.approx_eq(y, tol))
            }
            _ => false,
        }
    }

    /// `matrix · self`, promoting a planar matrix to act on both planes of
    /// an astigmatic ray.
    fn transformed(&self, matrix: &TransferMatrix) -> Result<RayState> {
        match (matrix, self) {
            (TransferMatrix::Planar(m), RayState::Planar(v)) => Ok(RayState::Planar(m * v)),
            (TransferMatrix::Astigmatic(m), RayState::Astigmatic(v)) => {
                Ok(RayState::Astigmatic(m * v))
            }
            (TransferMatrix::Planar(_), RayState::Astigmatic(v)) => {
                Ok(RayState::Astigmatic(matrix.to_astigmatic() * v))
            }
            (TransferMatrix::Astigmatic(_), RayState::Planar(_)) => {
                Err(ParaxialError::DimensionMismatch {
                    expected: 4,
                    found: 2,
                })
            }
        }
    }

    fn shifted(mut self, offset: Option<&Vector2<Scalar>>) -> RayState {
        if let Some(e) = offset {
            match &mut self {
                RayState::Planar(v) => {
                    v[0] += &e[0];
                    v[1] += &e[1];
                }
                RayState::Astigmatic(v) => {
                    v[0] += &e[0];
                    v[1] += &e[1];
                }
            }
        }
        self
    }
}

impl fmt::Display for RayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RayState::Planar(v) => write!(f, "(y = {}, u = {})", v[0], v[1]),
            RayState::Astigmatic(v) => write!(
                f,
                "(y_t = {}, u_t = {}, y_s = {}, u_s = {})",
                v[0], v[1], v[2], v[3]
            ),
        }
    }
}

fn check_dimension(system: &System, ray: &RayState) -> Result<()> {
    let expected = system.dimension();
    let found = ray.dimension();
    if expected != found {
        return Err(ParaxialError::DimensionMismatch { expected, found });
    }
    Ok(())
}

/// The ray after the whole system.
pub fn propagate(system: &System, ray: &RayState) -> Result<RayState> {
    check_dimension(system, ray)?;
    Ok(ray.transformed(system.compose())?.shifted(system.offset()))
}

/// Bind parameters in both the system and the ray, then propagate.
pub fn propagate_with(system: &System, ray: &RayState, bindings: &Bindings) -> Result<RayState> {
    propagate(&system.substitute(bindings)?, &ray.substitute(bindings))
}

/// Lazy propagation of a bundle of rays through one system.
///
/// Cloning restarts the mapping from the first remaining ray.
#[derive(Debug, Clone)]
pub struct Propagation<'a> {
    system: &'a System,
    rays: std::slice::Iter<'a, RayState>,
}

impl Iterator for Propagation<'_> {
    type Item = Result<RayState>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rays.next().map(|ray| propagate(self.system, ray))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rays.size_hint()
    }
}

impl ExactSizeIterator for Propagation<'_> {}

/// Map every ray of `rays` through `system`, one output per input in input
/// order. Nothing is computed until the iterator is consumed.
pub fn propagate_all<'a>(system: &'a System, rays: &'a [RayState]) -> Propagation<'a> {
    Propagation {
        system,
        rays: rays.iter(),
    }
}

/// The ray at every reference plane: the input followed by the state after
/// each element.
pub fn trace(system: &System, ray: &RayState) -> Result<Vec<RayState>> {
    check_dimension(system, ray)?;
    let mut states = Vec::with_capacity(system.len() + 1);
    states.push(ray.clone());
    for (i, element) in system.iter().enumerate() {
        let next = states[i]
            .transformed(element.matrix())?
            .shifted(element.offset());
        trace!("after element {} ({}): {}", i, element.kind().name(), next);
        states.push(next);
    }
    Ok(states)
}

/// Planar rays with `count` heights evenly spaced over `[h_min, h_max]`, all
/// at the same angle.
pub fn fan(h_min: f64, h_max: f64, count: usize, angle: impl Into<Scalar>) -> Vec<RayState> {
    let angle = angle.into();
    Array1::linspace(h_min, h_max, count)
        .iter()
        .map(|h| RayState::new(*h, angle.clone()))
        .collect()
}
