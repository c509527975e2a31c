//! Optical elements as ray-transfer matrices.
//!
//! An [`Element`] pairs a [`TransferMatrix`] with the [`ElementKind`] it was
//! built from and the refractive indices of the media on either side.
//!
//! Conventions:
//! - rays are `(height, angle)` with physical (not reduced) angles, so the
//!   determinant of an element is `n_in / n_out`
//! - a radius is positive when the centre of curvature lies downstream of the
//!   surface (convex towards the incoming light)
//! - mirrors are unfolded: the reflected ray continues in the propagation
//!   direction and a concave mirror (`R < 0`) focuses like a positive lens
//! - tilted optics are 4×4 block-diagonal matrices, tangential block first
//!
//! Flat optics are modelled with [`Radius::Flat`], which contributes a
//! curvature of exactly zero instead of dividing by an infinite radius.
//!
//! An element may also be displaced or tilted off the optical axis
//! ([`Misalignment`]). This adds a constant offset to the rays it maps and
//! leaves its matrix untouched.

use crate::error::{ParaxialError, Result};
use crate::scalar::{Bindings, Scalar};
use crate::settings::DEFAULT_TOLERANCE;
use log::warn;
use nalgebra::{Matrix2, Matrix4, Vector2};
use num_traits::{One, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

#[cfg(test)]
mod tests {
    use super::*;

    fn abcd(element: &Element) -> (f64, f64, f64, f64) {
        let m = element.matrix().plane(Plane::Tangential);
        let v = |r: usize, c: usize| m[(r, c)].to_f64().unwrap();
        (v(0, 0), v(0, 1), v(1, 0), v(1, 1))
    }

    #[test]
    fn gap_matrix() {
        let gap = Element::gap(50.0).unwrap();
        assert_eq!(abcd(&gap), (1.0, 50.0, 0.0, 1.0));
        assert!(gap.determinant().approx_eq(&Scalar::one(), 1e-15));
    }

    #[test]
    fn thin_lens_matrix() {
        let lens = Element::thin_lens(100.0).unwrap();
        assert_eq!(abcd(&lens), (1.0, 0.0, -0.01, 1.0));
    }

    #[test]
    fn zero_focal_length_is_rejected() {
        assert!(matches!(
            Element::thin_lens(0.0),
            Err(ParaxialError::InvalidParameter(_))
        ));
        assert!(matches!(
            Element::thin_lens(Scalar::integer(0)),
            Err(ParaxialError::InvalidParameter(_))
        ));
        assert!(Element::thin_lens(Scalar::symbol("f")).is_ok());
    }

    #[test]
    fn flat_optics_have_zero_power() {
        let mirror = Element::flat_mirror().unwrap();
        assert!(mirror.matrix().plane(Plane::Tangential)[(1, 0)].is_zero());

        let window = Element::flat_interface(1.0, 1.5).unwrap();
        let (a, b, c, d) = abcd(&window);
        assert_eq!((a, b, c), (1.0, 0.0, 0.0));
        assert!((d - 1.0 / 1.5).abs() < 1e-15);

        assert_eq!(Radius::from(f64::INFINITY), Radius::Flat);
    }

    #[test]
    fn symbol_named_flat_stays_free() {
        let mirror = Element::mirror(Scalar::symbol("flat")).unwrap();
        assert!(mirror.free_symbols().contains("flat"));
        assert_eq!(
            Radius::from(Scalar::symbol("flat")),
            Radius::Finite(Scalar::symbol("flat"))
        );

        // the keyword is only recognised when reading a description
        let kind: ElementKind = toml::from_str("kind = \"mirror\"\nradius = \"flat\"").unwrap();
        let mirror = Element::from_kind(kind).unwrap();
        assert!(mirror.free_symbols().is_empty());
        assert!(mirror.matrix().plane(Plane::Tangential)[(1, 0)].is_zero());
    }

    #[test]
    fn interface_determinant_is_index_ratio() {
        let surface = Element::interface(25.0, 1.0, 1.5).unwrap();
        let det = surface.determinant().to_f64().unwrap();
        assert!((det - 1.0 / 1.5).abs() < 1e-15);

        // converging surface has negative C
        assert!(abcd(&surface).2 < 0.0);
    }

    #[test]
    fn concave_mirror_focuses() {
        let mirror = Element::mirror(-200.0).unwrap();
        let (_, _, c, _) = abcd(&mirror);
        assert!((c - -0.01).abs() < 1e-15);
    }

    #[test]
    fn symbolic_interface_determinant() {
        let n1 = Scalar::symbol("n1");
        let n2 = Scalar::symbol("n2");
        let surface =
            Element::interface(Radius::Finite(Scalar::symbol("R")), n1.clone(), n2.clone()).unwrap();
        assert_eq!(surface.determinant(), &n1 / &n2);
    }

    #[test]
    fn tilted_mirror_planes() {
        let angle = std::f64::consts::FRAC_PI_4;
        let mirror = Element::tilted_mirror(-100.0, angle).unwrap();
        assert_eq!(mirror.dimension(), 4);
        let t = mirror.matrix().plane(Plane::Tangential);
        let s = mirror.matrix().plane(Plane::Sagittal);
        let ct = t[(1, 0)].to_f64().unwrap();
        let cs = s[(1, 0)].to_f64().unwrap();
        assert!((ct - -0.02 / angle.cos()).abs() < 1e-12);
        assert!((cs - -0.02 * angle.cos()).abs() < 1e-12);
    }

    #[test]
    fn tilted_interface_matches_normal_incidence() {
        let tilted = Element::tilted_interface(30.0, 1.0, 1.5, 0.0).unwrap();
        let normal = Element::interface(30.0, 1.0, 1.5).unwrap();
        for plane in [Plane::Tangential, Plane::Sagittal] {
            let a = TransferMatrix::Planar(tilted.matrix().plane(plane));
            assert!(a.approx_eq(normal.matrix(), 1e-12));
        }
    }

    #[test]
    fn total_internal_reflection_is_rejected() {
        let result = Element::tilted_interface(Radius::Flat, 1.5, 1.0, 1.2);
        assert!(matches!(result, Err(ParaxialError::InvalidParameter(_))));
    }

    #[test]
    fn zeroth_order_grating_acts_as_mirror() {
        // order 0 at normal incidence reflects like a plain mirror
        let grating = Element::grating(-100.0, 0, 1e-6, 532e-9, 0.0, 1).unwrap();
        let mirror = Element::mirror(-100.0).unwrap();
        let t = TransferMatrix::Planar(grating.matrix().plane(Plane::Tangential));
        assert!(t.approx_eq(mirror.matrix(), 1e-12));
        assert!(grating.determinant().approx_eq(&Scalar::one(), 1e-12));
    }

    #[test]
    fn evanescent_grating_order_is_rejected() {
        let result = Element::grating(Radius::Flat, 3, 1e-6, 532e-9, 0.0, 1);
        assert!(matches!(result, Err(ParaxialError::InvalidParameter(_))));
    }

    #[test]
    fn duct_is_lossless() {
        let duct = Element::duct(10.0, 1.5, 0.01).unwrap();
        assert!(duct.determinant().approx_eq(&Scalar::one(), 1e-12));
        assert!(Element::duct(10.0, 1.5, -0.01).is_err());
    }

    #[test]
    fn reversed_interface_swaps_media() {
        let surface = Element::interface(25.0, 1.0, 1.5).unwrap();
        let back = surface.reversed();
        let expected = Element::interface(-25.0, 1.5, 1.0).unwrap();
        assert!(back.matrix().approx_eq(expected.matrix(), 1e-12));
        assert_eq!(back.kind(), expected.kind());
        assert_eq!(back.reversed().kind(), surface.kind());
    }

    #[test]
    fn custom_elements_keep_user_matrix() {
        let element = Element::custom(2.0, 0.0, 0.0, 0.5, 1.0, 1.0).unwrap();
        assert_eq!(abcd(&element), (2.0, 0.0, 0.0, 0.5));
        assert!(Element::custom(1.0, 0.0, 0.0, 1.0, 0.0, 1.0).is_err());
    }

    #[test]
    fn kinds_deserialize_from_toml() {
        let kind: ElementKind = toml::from_str(
            r#"
            kind = "interface"
            radius = "flat"
            n1 = 1.0
            n2 = 1.5
            "#,
        )
        .unwrap();
        let element = Element::from_kind(kind).unwrap();
        assert!(element.output_index().approx_eq(&Scalar::real(1.5), 0.0));

        let kind: ElementKind = toml::from_str("kind = \"thin_lens\"\nfocal_length = \"f\"").unwrap();
        assert_eq!(
            kind,
            ElementKind::ThinLens {
                focal_length: Scalar::symbol("f"),
                index: Scalar::one(),
            }
        );
    }

    #[test]
    fn displaced_lens_deflects_axial_ray() {
        let lens = Element::thin_lens(100.0).unwrap().misaligned(2.0, 0.0);
        let offset = lens.offset().unwrap();
        assert!(offset[0].approx_eq(&Scalar::zero(), 1e-15));
        assert!(offset[1].approx_eq(&Scalar::real(0.02), 1e-15));
        assert!(lens.matrix().approx_eq(Element::thin_lens(100.0).unwrap().matrix(), 1e-15));
    }

    #[test]
    fn tilted_gap_has_no_offset() {
        let gap = Element::gap(10.0).unwrap().misaligned(1.0, 0.1);
        let offset = gap.offset().unwrap();
        assert!(offset.iter().all(|x| x.approx_eq(&Scalar::zero(), 1e-15)));
    }

    #[test]
    fn misalignment_survives_substitution_and_toml() {
        let lens = Element::thin_lens(Scalar::symbol("f"))
            .unwrap()
            .misaligned(Scalar::symbol("dy"), 0.0);
        assert!(lens.free_symbols().contains("dy"));

        let bound = lens
            .substitute(&Bindings::new().with("f", 50.0).with("dy", 1.0))
            .unwrap();
        assert!(bound.offset().unwrap()[1].approx_eq(&Scalar::real(0.02), 1e-15));

        let description: ElementDescription = toml::from_str(
            r#"
            kind = "thin_lens"
            focal_length = 50.0
            misalignment = { displacement = 1.0 }
            "#,
        )
        .unwrap();
        let element = Element::try_from(description.clone()).unwrap();
        let (read, bound) = (element.offset().unwrap(), bound.offset().unwrap());
        assert!(read.iter().zip(bound.iter()).all(|(x, y)| x.approx_eq(y, 1e-15)));
        assert_eq!(element.description(), description);
    }

    #[test]
    fn substitution_rebuilds_element() {
        let lens = Element::thin_lens(Scalar::symbol("f")).unwrap();
        let bound = lens.substitute(&Bindings::new().with("f", 50.0)).unwrap();
        assert_eq!(abcd(&bound), (1.0, 0.0, -0.02, 1.0));
        assert!(lens.substitute(&Bindings::new().with("f", 0.0)).is_err());
    }
}

/// Radius of curvature of a surface.
#[derive(Debug, Clone, PartialEq)]
pub enum Radius {
    /// Plane surface, zero curvature.
    Flat,
    Finite(Scalar),
}

impl Radius {
    /// `1/R`, exactly zero for a flat surface.
    pub fn curvature(&self) -> Scalar {
        match self {
            Radius::Flat => Scalar::zero(),
            Radius::Finite(r) => r.recip(),
        }
    }

    pub fn negated(&self) -> Radius {
        match self {
            Radius::Flat => Radius::Flat,
            Radius::Finite(r) => Radius::Finite(-r),
        }
    }

    pub fn is_flat(&self) -> bool {
        matches!(self, Radius::Flat)
    }

    pub fn substitute(&self, bindings: &Bindings) -> Radius {
        match self {
            Radius::Flat => Radius::Flat,
            Radius::Finite(r) => Radius::Finite(r.substitute(bindings)),
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Radius::Flat => Ok(()),
            Radius::Finite(r) => ensure_nonzero(r, "radius of curvature (use Radius::Flat for a plane surface)"),
        }
    }
}

/// An infinite real radius is flat; every other value, including any
/// symbol, stays finite.
impl From<Scalar> for Radius {
    fn from(value: Scalar) -> Self {
        match value {
            Scalar::Real(v) if v.is_infinite() => Radius::Flat,
            value => Radius::Finite(value),
        }
    }
}

impl From<f64> for Radius {
    fn from(value: f64) -> Self {
        Radius::from(Scalar::Real(value))
    }
}

impl Serialize for Radius {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Radius::Flat => serializer.serialize_str("flat"),
            Radius::Finite(r) => r.serialize(serializer),
        }
    }
}

/// Accepts a number, a symbol name or the keyword `"flat"`.
impl<'de> Deserialize<'de> for Radius {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Scalar::deserialize(deserializer)?;
        if value == Scalar::symbol("flat") {
            return Ok(Radius::Flat);
        }
        Ok(Radius::from(value))
    }
}

/// Transverse plane of an astigmatic system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plane {
    Tangential,
    Sagittal,
}

impl Plane {
    fn offset(&self) -> usize {
        match self {
            Plane::Tangential => 0,
            Plane::Sagittal => 2,
        }
    }
}

fn unit_index() -> Scalar {
    Scalar::one()
}

fn default_grating_sign() -> i32 {
    1
}

/// The physical description an element is built from.
///
/// Serialized with a `kind` tag, e.g.
/// `{ kind = "gap", distance = 50.0 }`; refractive indices default to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ElementKind {
    Gap {
        distance: Scalar,
        #[serde(default = "unit_index")]
        index: Scalar,
    },
    ThinLens {
        focal_length: Scalar,
        #[serde(default = "unit_index")]
        index: Scalar,
    },
    ThickLens {
        r1: Radius,
        r2: Radius,
        thickness: Scalar,
        n_glass: Scalar,
        #[serde(default = "unit_index")]
        n_ambient: Scalar,
    },
    Interface {
        radius: Radius,
        n1: Scalar,
        n2: Scalar,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        aoi: Option<Scalar>,
    },
    Mirror {
        radius: Radius,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        aoi: Option<Scalar>,
        #[serde(default = "unit_index")]
        index: Scalar,
    },
    /// Graded-index medium with `n(y) = n0 - n2 * y^2 / 2`.
    Duct {
        length: Scalar,
        n0: Scalar,
        n2: Scalar,
    },
    /// Reflective grating with lines along the sagittal direction.
    Grating {
        radius: Radius,
        order: i32,
        period: Scalar,
        wavelength: Scalar,
        #[serde(default)]
        aoi: Scalar,
        #[serde(default = "default_grating_sign")]
        sign: i32,
    },
    Custom {
        a: Scalar,
        b: Scalar,
        c: Scalar,
        d: Scalar,
        #[serde(default = "unit_index")]
        n1: Scalar,
        #[serde(default = "unit_index")]
        n2: Scalar,
    },
    /// Another element traversed backwards.
    Reversed { of: Box<ElementKind> },
}

impl ElementKind {
    pub fn name(&self) -> &'static str {
        match self {
            ElementKind::Gap { .. } => "gap",
            ElementKind::ThinLens { .. } => "thin lens",
            ElementKind::ThickLens { .. } => "thick lens",
            ElementKind::Interface { aoi: None, .. } => "interface",
            ElementKind::Interface { .. } => "tilted interface",
            ElementKind::Mirror { aoi: None, .. } => "mirror",
            ElementKind::Mirror { .. } => "tilted mirror",
            ElementKind::Duct { .. } => "duct",
            ElementKind::Grating { .. } => "grating",
            ElementKind::Custom { .. } => "custom",
            ElementKind::Reversed { .. } => "reversed",
        }
    }

    pub fn substitute(&self, bindings: &Bindings) -> ElementKind {
        let sub = |s: &Scalar| s.substitute(bindings);
        match self {
            ElementKind::Gap { distance, index } => ElementKind::Gap {
                distance: sub(distance),
                index: sub(index),
            },
            ElementKind::ThinLens {
                focal_length,
                index,
            } => ElementKind::ThinLens {
                focal_length: sub(focal_length),
                index: sub(index),
            },
            ElementKind::ThickLens {
                r1,
                r2,
                thickness,
                n_glass,
                n_ambient,
            } => ElementKind::ThickLens {
                r1: r1.substitute(bindings),
                r2: r2.substitute(bindings),
                thickness: sub(thickness),
                n_glass: sub(n_glass),
                n_ambient: sub(n_ambient),
            },
            ElementKind::Interface { radius, n1, n2, aoi } => ElementKind::Interface {
                radius: radius.substitute(bindings),
                n1: sub(n1),
                n2: sub(n2),
                aoi: aoi.as_ref().map(sub),
            },
            ElementKind::Mirror { radius, aoi, index } => ElementKind::Mirror {
                radius: radius.substitute(bindings),
                aoi: aoi.as_ref().map(sub),
                index: sub(index),
            },
            ElementKind::Duct { length, n0, n2 } => ElementKind::Duct {
                length: sub(length),
                n0: sub(n0),
                n2: sub(n2),
            },
            ElementKind::Grating {
                radius,
                order,
                period,
                wavelength,
                aoi,
                sign,
            } => ElementKind::Grating {
                radius: radius.substitute(bindings),
                order: *order,
                period: sub(period),
                wavelength: sub(wavelength),
                aoi: sub(aoi),
                sign: *sign,
            },
            ElementKind::Custom { a, b, c, d, n1, n2 } => ElementKind::Custom {
                a: sub(a),
                b: sub(b),
                c: sub(c),
                d: sub(d),
                n1: sub(n1),
                n2: sub(n2),
            },
            ElementKind::Reversed { of } => ElementKind::Reversed {
                of: Box::new(of.substitute(bindings)),
            },
        }
    }

    /// Axial extent of the element, zero for thin elements.
    pub fn length(&self) -> Scalar {
        match self {
            ElementKind::Gap { distance, .. } => distance.clone(),
            ElementKind::ThickLens { thickness, .. } => thickness.clone(),
            ElementKind::Duct { length, .. } => length.clone(),
            ElementKind::Reversed { of } => of.length(),
            _ => Scalar::zero(),
        }
    }

    /// The description of the same element traversed backwards.
    ///
    /// Symmetric elements are their own reverse; a normal-incidence interface
    /// swaps its media and flips its radius. Everything else is wrapped.
    pub fn reversed(&self) -> ElementKind {
        match self {
            ElementKind::Gap { .. }
            | ElementKind::ThinLens { .. }
            | ElementKind::Duct { .. }
            | ElementKind::Mirror { aoi: None, .. } => self.clone(),
            ElementKind::Interface {
                radius,
                n1,
                n2,
                aoi: None,
            } => ElementKind::Interface {
                radius: radius.negated(),
                n1: n2.clone(),
                n2: n1.clone(),
                aoi: None,
            },
            ElementKind::ThickLens {
                r1,
                r2,
                thickness,
                n_glass,
                n_ambient,
            } => ElementKind::ThickLens {
                r1: r2.negated(),
                r2: r1.negated(),
                thickness: thickness.clone(),
                n_glass: n_glass.clone(),
                n_ambient: n_ambient.clone(),
            },
            ElementKind::Reversed { of } => (**of).clone(),
            _ => ElementKind::Reversed {
                of: Box::new(self.clone()),
            },
        }
    }
}

/// A 2×2 transfer matrix, or a 4×4 block-diagonal one whose upper-left block
/// acts on the tangential plane and lower-right block on the sagittal plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransferMatrix {
    Planar(Matrix2<Scalar>),
    Astigmatic(Matrix4<Scalar>),
}

fn det2(m: &Matrix2<Scalar>) -> Scalar {
    &m[(0, 0)] * &m[(1, 1)] - &m[(0, 1)] * &m[(1, 0)]
}

fn block_diagonal(t: &Matrix2<Scalar>, s: &Matrix2<Scalar>) -> Matrix4<Scalar> {
    let mut m = Matrix4::zeros();
    for r in 0..2 {
        for c in 0..2 {
            m[(r, c)] = t[(r, c)].clone();
            m[(r + 2, c + 2)] = s[(r, c)].clone();
        }
    }
    m
}

/// `(n_out / n_in) * [[D, B], [C, A]]`
fn reverse_block(m: &Matrix2<Scalar>, factor: &Scalar) -> Matrix2<Scalar> {
    Matrix2::new(
        factor * &m[(1, 1)],
        factor * &m[(0, 1)],
        factor * &m[(1, 0)],
        factor * &m[(0, 0)],
    )
}

impl TransferMatrix {
    pub fn identity(dimension: usize) -> TransferMatrix {
        if dimension == 4 {
            TransferMatrix::Astigmatic(Matrix4::identity())
        } else {
            TransferMatrix::Planar(Matrix2::identity())
        }
    }

    pub fn from_abcd(a: Scalar, b: Scalar, c: Scalar, d: Scalar) -> TransferMatrix {
        TransferMatrix::Planar(Matrix2::new(a, b, c, d))
    }

    pub fn from_planes(tangential: Matrix2<Scalar>, sagittal: Matrix2<Scalar>) -> TransferMatrix {
        TransferMatrix::Astigmatic(block_diagonal(&tangential, &sagittal))
    }

    pub fn dimension(&self) -> usize {
        match self {
            TransferMatrix::Planar(_) => 2,
            TransferMatrix::Astigmatic(_) => 4,
        }
    }

    /// The 4×4 form; a planar matrix acts identically on both planes.
    pub fn to_astigmatic(&self) -> Matrix4<Scalar> {
        match self {
            TransferMatrix::Planar(m) => block_diagonal(m, m),
            TransferMatrix::Astigmatic(m) => m.clone(),
        }
    }

    /// The 2×2 block for one plane. Planar matrices return themselves.
    pub fn plane(&self, plane: Plane) -> Matrix2<Scalar> {
        match self {
            TransferMatrix::Planar(m) => m.clone(),
            TransferMatrix::Astigmatic(m) => {
                let o = plane.offset();
                Matrix2::new(
                    m[(o, o)].clone(),
                    m[(o, o + 1)].clone(),
                    m[(o + 1, o)].clone(),
                    m[(o + 1, o + 1)].clone(),
                )
            }
        }
    }

    /// `(A, B, C, D)` of one plane.
    pub fn abcd(&self, plane: Plane) -> (Scalar, Scalar, Scalar, Scalar) {
        let m = self.plane(plane);
        (
            m[(0, 0)].clone(),
            m[(0, 1)].clone(),
            m[(1, 0)].clone(),
            m[(1, 1)].clone(),
        )
    }

    /// Applies `next` after `self`, i.e. returns `next · self`.
    pub fn then(&self, next: &TransferMatrix) -> TransferMatrix {
        match (self, next) {
            (TransferMatrix::Planar(first), TransferMatrix::Planar(second)) => {
                TransferMatrix::Planar(second * first)
            }
            _ => TransferMatrix::Astigmatic(next.to_astigmatic() * self.to_astigmatic()),
        }
    }

    /// Product of the block determinants.
    pub fn determinant(&self) -> Scalar {
        match self {
            TransferMatrix::Planar(m) => det2(m),
            TransferMatrix::Astigmatic(_) => {
                det2(&self.plane(Plane::Tangential)) * det2(&self.plane(Plane::Sagittal))
            }
        }
    }

    /// Matrix for propagation in the opposite direction, given the media the
    /// forward matrix connects.
    pub fn reversed(&self, n_in: &Scalar, n_out: &Scalar) -> TransferMatrix {
        let factor = n_out / n_in;
        match self {
            TransferMatrix::Planar(m) => TransferMatrix::Planar(reverse_block(m, &factor)),
            TransferMatrix::Astigmatic(_) => TransferMatrix::from_planes(
                reverse_block(&self.plane(Plane::Tangential), &factor),
                reverse_block(&self.plane(Plane::Sagittal), &factor),
            ),
        }
    }

    pub fn substitute(&self, bindings: &Bindings) -> TransferMatrix {
        match self {
            TransferMatrix::Planar(m) => TransferMatrix::Planar(m.map(|x| x.substitute(bindings))),
            TransferMatrix::Astigmatic(m) => {
                TransferMatrix::Astigmatic(m.map(|x| x.substitute(bindings)))
            }
        }
    }

    /// Every entry collapsed to a number.
    pub fn to_numeric(&self) -> Result<TransferMatrix> {
        Ok(match self {
            TransferMatrix::Planar(m) => TransferMatrix::Planar(Matrix2::from_iterator(
                m.iter().map(Scalar::to_numeric).collect::<Result<Vec<_>>>()?,
            )),
            TransferMatrix::Astigmatic(m) => TransferMatrix::Astigmatic(Matrix4::from_iterator(
                m.iter().map(Scalar::to_numeric).collect::<Result<Vec<_>>>()?,
            )),
        })
    }

    pub fn free_symbols(&self) -> BTreeSet<String> {
        let entries: Vec<&Scalar> = match self {
            TransferMatrix::Planar(m) => m.iter().collect(),
            TransferMatrix::Astigmatic(m) => m.iter().collect(),
        };
        entries.into_iter().flat_map(Scalar::free_symbols).collect()
    }

    /// Entry-wise [`Scalar::approx_eq`]. Matrices of different dimension
    /// never compare equal.
    pub fn approx_eq(&self, other: &TransferMatrix, tol: f64) -> bool {
        match (self, other) {
            (TransferMatrix::Planar(a), TransferMatrix::Planar(b)) => {
                a.iter().zip(b.iter()).all(|(x, y)| x.approx_eq(y, tol))
            }
            (TransferMatrix::Astigmatic(a), TransferMatrix::Astigmatic(b)) => {
                a.iter().zip(b.iter()).all(|(x, y)| x.approx_eq(y, tol))
            }
            _ => false,
        }
    }
}

impl fmt::Display for TransferMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.dimension();
        let m = self.to_astigmatic();
        for r in 0..n {
            let row: Vec<String> = (0..n).map(|c| m[(r, c)].to_string()).collect();
            writeln!(f, "[{}]", row.join(", "))?;
        }
        Ok(())
    }
}

pub(crate) fn ensure_nonzero(value: &Scalar, what: &str) -> Result<()> {
    let zero = match value.to_complex() {
        Ok(v) => v.norm() == 0.0,
        Err(_) => value.is_zero(),
    };
    if zero {
        return Err(ParaxialError::InvalidParameter(format!(
            "{} must be non-zero",
            what
        )));
    }
    Ok(())
}

/// Numeric values must be finite, real and strictly positive; values with
/// free symbols are accepted as given.
pub(crate) fn ensure_positive(value: &Scalar, what: &str) -> Result<()> {
    match value.to_f64() {
        Ok(v) if v > 0.0 && v.is_finite() => Ok(()),
        Err(ParaxialError::NotFullyDetermined(_)) => Ok(()),
        _ => Err(ParaxialError::InvalidParameter(format!(
            "{} must be positive, got {}",
            what, value
        ))),
    }
}

/// Cosine of the refracted or diffracted angle from its sine.
fn cosine_from_sine(sine: &Scalar, what: &str) -> Result<Scalar> {
    let cosine = (Scalar::one() - sine.powi(2)).sqrt();
    if let Ok(v) = cosine.to_complex() {
        if v.im != 0.0 || v.re == 0.0 {
            return Err(ParaxialError::InvalidParameter(format!(
                "{}: no propagating ray (sin = {})",
                what, sine
            )));
        }
    }
    Ok(cosine)
}

/// Displacement and tilt of an element's axis in the tangential plane,
/// both taken at its input reference plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Misalignment {
    #[serde(default)]
    pub displacement: Scalar,
    /// Radians.
    #[serde(default)]
    pub tilt: Scalar,
}

impl Misalignment {
    pub fn new(displacement: impl Into<Scalar>, tilt: impl Into<Scalar>) -> Misalignment {
        Misalignment {
            displacement: displacement.into(),
            tilt: tilt.into(),
        }
    }

    /// `(E, F) = (I − M)·(Δ, θ) + (L·θ, 0)` for the block `M` of an element
    /// of axial length `L`.
    fn offset(&self, m: &Matrix2<Scalar>, length: &Scalar) -> Vector2<Scalar> {
        let one = Scalar::one();
        let (a, b, c, d) = (&m[(0, 0)], &m[(0, 1)], &m[(1, 0)], &m[(1, 1)]);
        Vector2::new(
            (&one - a) * &self.displacement + (length - b) * &self.tilt,
            -(c * &self.displacement) + (&one - d) * &self.tilt,
        )
    }

    /// The same axis seen from the output plane looking back.
    fn reversed(&self, length: &Scalar) -> Misalignment {
        Misalignment {
            displacement: &self.displacement + &self.tilt * length,
            tilt: -&self.tilt,
        }
    }

    pub fn substitute(&self, bindings: &Bindings) -> Misalignment {
        Misalignment {
            displacement: self.displacement.substitute(bindings),
            tilt: self.tilt.substitute(bindings),
        }
    }
}

/// Serialized form of an [`Element`]: the `kind` table, optionally with a
/// `misalignment = { displacement = .., tilt = .. }` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementDescription {
    #[serde(flatten)]
    pub kind: ElementKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub misalignment: Option<Misalignment>,
}

/// A single optical element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ElementDescription", into = "ElementDescription")]
pub struct Element {
    kind: ElementKind,
    matrix: TransferMatrix,
    n_in: Scalar,
    n_out: Scalar,
    misalignment: Option<Misalignment>,
    /// Tangential `(E, F)` of the misalignment.
    offset: Option<Vector2<Scalar>>,
}

impl TryFrom<ElementDescription> for Element {
    type Error = ParaxialError;

    fn try_from(description: ElementDescription) -> Result<Self> {
        Ok(Element::from_kind(description.kind)?.with_misalignment(description.misalignment))
    }
}

impl From<Element> for ElementDescription {
    fn from(element: Element) -> Self {
        ElementDescription {
            kind: element.kind,
            misalignment: element.misalignment,
        }
    }
}

impl Element {
    /// Free-space propagation over `distance` in a medium of index 1.
    pub fn gap(distance: impl Into<Scalar>) -> Result<Element> {
        Self::gap_in(distance, Scalar::one())
    }

    /// Free-space propagation over `distance` in a medium of index `n`.
    pub fn gap_in(distance: impl Into<Scalar>, n: impl Into<Scalar>) -> Result<Element> {
        Self::from_kind(ElementKind::Gap {
            distance: distance.into(),
            index: n.into(),
        })
    }

    pub fn thin_lens(focal_length: impl Into<Scalar>) -> Result<Element> {
        Self::thin_lens_in(focal_length, Scalar::one())
    }

    pub fn thin_lens_in(focal_length: impl Into<Scalar>, n: impl Into<Scalar>) -> Result<Element> {
        Self::from_kind(ElementKind::ThinLens {
            focal_length: focal_length.into(),
            index: n.into(),
        })
    }

    /// Refraction at a spherical surface from index `n1` into `n2`.
    pub fn interface(
        radius: impl Into<Radius>,
        n1: impl Into<Scalar>,
        n2: impl Into<Scalar>,
    ) -> Result<Element> {
        Self::from_kind(ElementKind::Interface {
            radius: radius.into(),
            n1: n1.into(),
            n2: n2.into(),
            aoi: None,
        })
    }

    pub fn flat_interface(n1: impl Into<Scalar>, n2: impl Into<Scalar>) -> Result<Element> {
        Self::interface(Radius::Flat, n1, n2)
    }

    /// Refraction at a surface hit at angle of incidence `aoi` (radians).
    pub fn tilted_interface(
        radius: impl Into<Radius>,
        n1: impl Into<Scalar>,
        n2: impl Into<Scalar>,
        aoi: impl Into<Scalar>,
    ) -> Result<Element> {
        Self::from_kind(ElementKind::Interface {
            radius: radius.into(),
            n1: n1.into(),
            n2: n2.into(),
            aoi: Some(aoi.into()),
        })
    }

    pub fn mirror(radius: impl Into<Radius>) -> Result<Element> {
        Self::mirror_in(radius, Scalar::one())
    }

    /// Mirror immersed in a medium of index `n`.
    pub fn mirror_in(radius: impl Into<Radius>, n: impl Into<Scalar>) -> Result<Element> {
        Self::from_kind(ElementKind::Mirror {
            radius: radius.into(),
            aoi: None,
            index: n.into(),
        })
    }

    pub fn flat_mirror() -> Result<Element> {
        Self::mirror(Radius::Flat)
    }

    /// Mirror hit at angle of incidence `aoi` (radians); the effective
    /// radius is `R·cos θ` tangentially and `R/cos θ` sagittally.
    pub fn tilted_mirror(radius: impl Into<Radius>, aoi: impl Into<Scalar>) -> Result<Element> {
        Self::from_kind(ElementKind::Mirror {
            radius: radius.into(),
            aoi: Some(aoi.into()),
            index: Scalar::one(),
        })
    }

    /// Two spherical surfaces separated by `thickness` of glass.
    pub fn thick_lens(
        r1: impl Into<Radius>,
        r2: impl Into<Radius>,
        thickness: impl Into<Scalar>,
        n_glass: impl Into<Scalar>,
        n_ambient: impl Into<Scalar>,
    ) -> Result<Element> {
        Self::from_kind(ElementKind::ThickLens {
            r1: r1.into(),
            r2: r2.into(),
            thickness: thickness.into(),
            n_glass: n_glass.into(),
            n_ambient: n_ambient.into(),
        })
    }

    /// Graded-index segment with `n(y) = n0 - n2·y²/2`, e.g. a GRIN fibre or a
    /// thermal lens.
    pub fn duct(
        length: impl Into<Scalar>,
        n0: impl Into<Scalar>,
        n2: impl Into<Scalar>,
    ) -> Result<Element> {
        Self::from_kind(ElementKind::Duct {
            length: length.into(),
            n0: n0.into(),
            n2: n2.into(),
        })
    }

    /// Reflective diffraction grating.
    ///
    /// The diffracted angle satisfies `sin θ₂ = m·λ/d + sign·sin θ₁`; `sign`
    /// selects between the two common grating-equation conventions.
    pub fn grating(
        radius: impl Into<Radius>,
        order: i32,
        period: impl Into<Scalar>,
        wavelength: impl Into<Scalar>,
        aoi: impl Into<Scalar>,
        sign: i32,
    ) -> Result<Element> {
        Self::from_kind(ElementKind::Grating {
            radius: radius.into(),
            order,
            period: period.into(),
            wavelength: wavelength.into(),
            aoi: aoi.into(),
            sign,
        })
    }

    /// A user supplied matrix between media `n1` and `n2`.
    pub fn custom(
        a: impl Into<Scalar>,
        b: impl Into<Scalar>,
        c: impl Into<Scalar>,
        d: impl Into<Scalar>,
        n1: impl Into<Scalar>,
        n2: impl Into<Scalar>,
    ) -> Result<Element> {
        Self::from_kind(ElementKind::Custom {
            a: a.into(),
            b: b.into(),
            c: c.into(),
            d: d.into(),
            n1: n1.into(),
            n2: n2.into(),
        })
    }

    /// Validate the parameters of `kind` and build its matrix.
    pub fn from_kind(kind: ElementKind) -> Result<Element> {
        let (matrix, n_in, n_out) = match &kind {
            ElementKind::Gap { distance, index } => {
                ensure_nonzero(index, "refractive index")?;
                let m = TransferMatrix::from_abcd(
                    Scalar::one(),
                    distance.clone(),
                    Scalar::zero(),
                    Scalar::one(),
                );
                (m, index.clone(), index.clone())
            }
            ElementKind::ThinLens {
                focal_length,
                index,
            } => {
                ensure_nonzero(focal_length, "focal length")?;
                ensure_nonzero(index, "refractive index")?;
                let m = TransferMatrix::from_abcd(
                    Scalar::one(),
                    Scalar::zero(),
                    -focal_length.recip(),
                    Scalar::one(),
                );
                (m, index.clone(), index.clone())
            }
            ElementKind::ThickLens {
                r1,
                r2,
                thickness,
                n_glass,
                n_ambient,
            } => {
                let front = Self::interface(r1.clone(), n_ambient.clone(), n_glass.clone())?;
                let body = Self::gap_in(thickness.clone(), n_glass.clone())?;
                let back = Self::interface(r2.clone(), n_glass.clone(), n_ambient.clone())?;
                let m = front.matrix.then(&body.matrix).then(&back.matrix);
                (m, n_ambient.clone(), n_ambient.clone())
            }
            ElementKind::Interface {
                radius,
                n1,
                n2,
                aoi: None,
            } => {
                radius.validate()?;
                ensure_nonzero(n1, "refractive index n1")?;
                ensure_nonzero(n2, "refractive index n2")?;
                let m = TransferMatrix::from_abcd(
                    Scalar::one(),
                    Scalar::zero(),
                    (n1 - n2) * radius.curvature() / n2,
                    n1 / n2,
                );
                (m, n1.clone(), n2.clone())
            }
            ElementKind::Interface {
                radius,
                n1,
                n2,
                aoi: Some(aoi),
            } => {
                radius.validate()?;
                ensure_nonzero(n1, "refractive index n1")?;
                ensure_nonzero(n2, "refractive index n2")?;
                let c1 = aoi.cos();
                ensure_nonzero(&c1, "cosine of the angle of incidence")?;
                let ratio = n1 / n2;
                let c2 = cosine_from_sine(&(&ratio * aoi.sin()), "total internal reflection")?;
                let dn = n1 * &c1 - n2 * &c2;
                let curvature = radius.curvature();

                let tangential = Matrix2::new(
                    &c2 / &c1,
                    Scalar::zero(),
                    &dn * &curvature / (&c1 * &c2 * n2),
                    &c1 / &c2 * &ratio,
                );
                let sagittal = Matrix2::new(
                    Scalar::one(),
                    Scalar::zero(),
                    &dn * &curvature / n2,
                    ratio,
                );
                (
                    TransferMatrix::from_planes(tangential, sagittal),
                    n1.clone(),
                    n2.clone(),
                )
            }
            ElementKind::Mirror {
                radius,
                aoi: None,
                index,
            } => {
                radius.validate()?;
                ensure_nonzero(index, "refractive index")?;
                let m = TransferMatrix::from_abcd(
                    Scalar::one(),
                    Scalar::zero(),
                    radius.curvature() * 2.0,
                    Scalar::one(),
                );
                (m, index.clone(), index.clone())
            }
            ElementKind::Mirror {
                radius,
                aoi: Some(aoi),
                index,
            } => {
                radius.validate()?;
                ensure_nonzero(index, "refractive index")?;
                let cosine = aoi.cos();
                ensure_nonzero(&cosine, "cosine of the angle of incidence")?;
                let power = radius.curvature() * 2.0;
                let tangential = Matrix2::new(
                    Scalar::one(),
                    Scalar::zero(),
                    &power / &cosine,
                    Scalar::one(),
                );
                let sagittal =
                    Matrix2::new(Scalar::one(), Scalar::zero(), &power * &cosine, Scalar::one());
                (
                    TransferMatrix::from_planes(tangential, sagittal),
                    index.clone(),
                    index.clone(),
                )
            }
            ElementKind::Duct { length, n0, n2 } => {
                ensure_positive(n0, "axial index n0")?;
                ensure_positive(n2, "index gradient n2")?;
                let g = (n2 / n0).sqrt();
                let phase = &g * length;
                let (sin, cos) = (phase.sin(), phase.cos());
                let m = TransferMatrix::from_abcd(cos.clone(), &sin / &g, -(&g * &sin), cos);
                (m, n0.clone(), n0.clone())
            }
            ElementKind::Grating {
                radius,
                order,
                period,
                wavelength,
                aoi,
                sign,
            } => {
                radius.validate()?;
                ensure_positive(period, "grating period")?;
                ensure_positive(wavelength, "wavelength")?;
                let sign = if *sign >= 0 { 1.0 } else { -1.0 };
                let c1 = aoi.cos();
                ensure_nonzero(&c1, "cosine of the angle of incidence")?;
                let diffracted = Scalar::from(*order) * wavelength / period + aoi.sin() * sign;
                let c2 = cosine_from_sine(&diffracted, "evanescent diffraction order")?;
                let curvature = radius.curvature();
                let sum = &c1 + &c2;

                let tangential = Matrix2::new(
                    &c2 / &c1,
                    Scalar::zero(),
                    &sum * &curvature / (&c1 * &c2),
                    &c1 / &c2,
                );
                let sagittal =
                    Matrix2::new(Scalar::one(), Scalar::zero(), sum * curvature, Scalar::one());
                (
                    TransferMatrix::from_planes(tangential, sagittal),
                    Scalar::one(),
                    Scalar::one(),
                )
            }
            ElementKind::Custom { a, b, c, d, n1, n2 } => {
                ensure_nonzero(n1, "refractive index n1")?;
                ensure_nonzero(n2, "refractive index n2")?;
                let m = TransferMatrix::from_abcd(a.clone(), b.clone(), c.clone(), d.clone());
                let expected = n1 / n2;
                let det = m.determinant();
                if let (Ok(found), Ok(expected)) = (det.to_complex(), expected.to_complex()) {
                    if (found - expected).norm() > DEFAULT_TOLERANCE * expected.norm().max(1.0) {
                        warn!(
                            "custom element determinant {} differs from index ratio {}",
                            found, expected
                        );
                    }
                }
                (m, n1.clone(), n2.clone())
            }
            ElementKind::Reversed { of } => {
                let forward = Self::from_kind((**of).clone())?;
                (
                    forward.matrix.reversed(&forward.n_in, &forward.n_out),
                    forward.n_out,
                    forward.n_in,
                )
            }
        };

        Ok(Element {
            kind,
            matrix,
            n_in,
            n_out,
            misalignment: None,
            offset: None,
        })
    }

    /// The element with its axis displaced by `displacement` and tilted by
    /// `tilt` in the tangential plane.
    ///
    /// Every ray leaving the element picks up the offset
    /// `E = (1 − A)·Δ + (L − B)·θ`, `F = −C·Δ + (1 − D)·θ`, where `L` is the
    /// element's axial length. The matrix is unchanged, so cardinal points
    /// and Gaussian beam parameters ignore misalignment.
    pub fn misaligned(self, displacement: impl Into<Scalar>, tilt: impl Into<Scalar>) -> Element {
        self.with_misalignment(Some(Misalignment::new(displacement, tilt)))
    }

    fn with_misalignment(mut self, misalignment: Option<Misalignment>) -> Element {
        self.offset = misalignment
            .as_ref()
            .map(|m| m.offset(&self.matrix.plane(Plane::Tangential), &self.kind.length()));
        self.misalignment = misalignment;
        self
    }

    pub fn misalignment(&self) -> Option<&Misalignment> {
        self.misalignment.as_ref()
    }

    /// Tangential `(E, F)` added to every ray after the matrix, if misaligned.
    pub fn offset(&self) -> Option<&Vector2<Scalar>> {
        self.offset.as_ref()
    }

    /// The serializable description this element was built from.
    pub fn description(&self) -> ElementDescription {
        ElementDescription {
            kind: self.kind.clone(),
            misalignment: self.misalignment.clone(),
        }
    }

    pub fn kind(&self) -> &ElementKind {
        &self.kind
    }

    pub fn matrix(&self) -> &TransferMatrix {
        &self.matrix
    }

    pub fn input_index(&self) -> &Scalar {
        &self.n_in
    }

    pub fn output_index(&self) -> &Scalar {
        &self.n_out
    }

    pub fn dimension(&self) -> usize {
        self.matrix.dimension()
    }

    /// Equals `n_in / n_out` per plane.
    pub fn determinant(&self) -> Scalar {
        self.matrix.determinant()
    }

    pub fn free_symbols(&self) -> BTreeSet<String> {
        let mut symbols = self.matrix.free_symbols();
        if let Some(offset) = &self.offset {
            symbols.extend(offset.iter().flat_map(Scalar::free_symbols));
        }
        symbols
    }

    /// Rebuild the element with parameters bound, validating the bound values.
    pub fn substitute(&self, bindings: &Bindings) -> Result<Element> {
        let element = Self::from_kind(self.kind.substitute(bindings))?;
        let misalignment = self.misalignment.as_ref().map(|m| m.substitute(bindings));
        Ok(element.with_misalignment(misalignment))
    }

    /// The element traversed in the opposite direction.
    pub fn reversed(&self) -> Element {
        let length = self.kind.length();
        let element = Element {
            kind: self.kind.reversed(),
            matrix: self.matrix.reversed(&self.n_in, &self.n_out),
            n_in: self.n_out.clone(),
            n_out: self.n_in.clone(),
            misalignment: None,
            offset: None,
        };
        element.with_misalignment(self.misalignment.as_ref().map(|m| m.reversed(&length)))
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} -> {})", self.kind.name(), self.n_in, self.n_out)
    }
}
