//! Paraxial optics with ray-transfer (ABCD) matrices.
//!
//! Optical systems are built from [`element::Element`]s (gaps, lenses,
//! refracting interfaces, mirrors, graded-index ducts and gratings) and
//! composed into a [`system::System`]. Every matrix entry is a
//! [`scalar::Scalar`], which may hold a plain number or an exact symbolic
//! expression, so a system can carry free parameters that are bound later,
//! differentiated or solved for. Elements can be displaced or tilted off the
//! axis, which offsets the rays they map.
//!
//! A composed system can then be used to
//! - propagate rays ([`ray`])
//! - propagate Gaussian beams ([`beam`])
//! - find focal lengths, principal planes and resonator stability ([`cardinal`])
//!
//! # Conventions
//!
//! Rays are `(height, angle)` with physical angles, so an element between
//! media `n1` and `n2` has determinant `n1/n2`. Radii are positive when the
//! centre of curvature lies downstream. Mirrors are unfolded: a mirror with
//! radius `R` has `C = 2/R`, so a concave mirror facing the light has `R < 0`.
//!
//! ```ignore
//! use paraxial::prelude::*;
//!
//! let system = System::new()
//!     .append(Element::thin_lens(Scalar::symbol("f"))?)
//!     .append(Element::gap(50.0)?);
//! let bound = system.substitute(&Bindings::new().with("f", 100.0))?;
//! let out = propagate(&bound, &RayState::new(5.0, 0.0))?;
//! ```

pub mod beam;
pub mod cardinal;
pub mod coeff;
pub mod element;
pub mod error;
pub mod expr;
pub mod materials;
pub mod ray;
pub mod scalar;
pub mod settings;
pub mod system;

pub use error::{ParaxialError, Result};

/// The types and functions needed for most calculations.
pub mod prelude {
    pub use crate::beam::{derive_beam_metrics, propagate_beam, BeamMetrics, GaussianBeam};
    pub use crate::cardinal::{
        cardinal_points, cavity_eigenmode, magnification, stability, CardinalPoints, Stability,
    };
    pub use crate::element::{Element, ElementKind, Misalignment, Plane, Radius, TransferMatrix};
    pub use crate::error::{ParaxialError, Result};
    pub use crate::materials::Material;
    pub use crate::ray::{propagate, propagate_all, trace, RayState};
    pub use crate::scalar::{Bindings, Scalar};
    pub use crate::settings::Settings;
    pub use crate::system::System;
}
