//! Ordered sequences of elements.
//!
//! A [`System`] lists its elements in propagation order. The composed
//! transfer matrix is `M = Mₙ···M₂M₁`: the last element traversed is the
//! leftmost factor. It is computed lazily by an explicit left fold and cached
//! per instance; systems are immutable, so the cache never goes stale. The
//! combined offset of misaligned elements is folded and cached the same way.

use crate::element::{Element, ElementDescription, Plane, TransferMatrix};
use crate::error::{ParaxialError, Result};
use crate::scalar::{Bindings, Scalar};
use crate::settings::DEFAULT_TOLERANCE;
use log::{debug, trace, warn};
use nalgebra::{Matrix2, Vector2};
use num_traits::One;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

#[cfg(test)]
mod tests {
    use super::*;

    fn lens_then_gap() -> System {
        System::new()
            .append(Element::thin_lens(100.0).unwrap())
            .append(Element::gap(50.0).unwrap())
    }

    #[test]
    fn composition_order() {
        // lens then gap: [[1, d], [0, 1]] · [[1, 0], [-1/f, 1]]
        let (a, b, c, d) = lens_then_gap().compose().abcd(Plane::Tangential);
        assert!(a.approx_eq(&Scalar::real(0.5), 1e-12));
        assert!(b.approx_eq(&Scalar::real(50.0), 1e-12));
        assert!(c.approx_eq(&Scalar::real(-0.01), 1e-12));
        assert!(d.approx_eq(&Scalar::real(1.0), 1e-12));

        // gap then lens puts the distance in D instead
        let swapped = System::new()
            .append(Element::gap(50.0).unwrap())
            .append(Element::thin_lens(100.0).unwrap());
        let (a, _, _, d) = swapped.compose().abcd(Plane::Tangential);
        assert!(a.approx_eq(&Scalar::real(1.0), 1e-12));
        assert!(d.approx_eq(&Scalar::real(0.5), 1e-12));
    }

    #[test]
    fn append_leaves_receiver_unchanged() {
        let base = System::new().append(Element::gap(1.0).unwrap());
        let longer = base.append(Element::gap(2.0).unwrap());
        assert_eq!(base.len(), 1);
        assert_eq!(longer.len(), 2);
    }

    #[test]
    fn empty_system_is_identity() {
        let system = System::new();
        assert_eq!(*system.compose(), TransferMatrix::identity(2));
        assert!(system.input_index().is_one());
    }

    #[test]
    fn sub_system_bounds() {
        let system = lens_then_gap();
        assert_eq!(system.sub_system(1, 2).unwrap().len(), 1);
        assert!(system.sub_system(2, 2).unwrap().is_empty());
        assert_eq!(
            system.sub_system(1, 3).unwrap_err(),
            ParaxialError::IndexOutOfRange {
                start: 1,
                end: 3,
                len: 2
            }
        );
        assert!(system.sub_system(2, 1).is_err());
    }

    #[test]
    fn planar_elements_promote_in_astigmatic_system() {
        let system = System::new()
            .append(Element::gap(10.0).unwrap())
            .append(Element::tilted_mirror(-100.0, 0.3).unwrap());
        assert_eq!(system.dimension(), 4);
        let composed = system.compose();
        let (_, b_t, _, _) = composed.abcd(Plane::Tangential);
        let (_, b_s, _, _) = composed.abcd(Plane::Sagittal);
        assert!(b_t.approx_eq(&Scalar::real(10.0), 1e-12));
        assert!(b_s.approx_eq(&Scalar::real(10.0), 1e-12));
    }

    #[test]
    fn magnitude_bounds_composed_entries() {
        let f = 0.025;
        let relay = System::new()
            .append(Element::thin_lens(f).unwrap())
            .append(Element::gap(2.0 * f).unwrap())
            .append(Element::thin_lens(f).unwrap());
        let m = relay.magnitude(Plane::Tangential).unwrap();
        assert!((m[(1, 0)] - 4.0 / f).abs() < 1e-9);
        assert!((m[(0, 0)] - 3.0).abs() < 1e-12);

        let symbolic = System::new().append(Element::gap(Scalar::symbol("d")).unwrap());
        assert!(symbolic.magnitude(Plane::Tangential).is_none());
        assert_eq!(System::new().magnitude(Plane::Sagittal), Some(Matrix2::identity()));
    }

    #[test]
    fn offsets_compose_through_later_elements() {
        // a lens displaced by 1 mm, then 50 mm of free space
        let system = System::new()
            .append(Element::thin_lens(100.0).unwrap().misaligned(1.0, 0.0))
            .append(Element::gap(50.0).unwrap());
        let offset = system.offset().unwrap();
        assert!(offset[0].approx_eq(&Scalar::real(0.5), 1e-12));
        assert!(offset[1].approx_eq(&Scalar::real(0.01), 1e-12));

        assert!(lens_then_gap().offset().is_none());
        assert!(system.reversed().offset().is_some());
    }

    #[test]
    fn multi_medium_determinant() {
        let system = System::new()
            .append(Element::interface(20.0, 1.0, 1.5).unwrap())
            .append(Element::gap_in(3.0, 1.5).unwrap())
            .append(Element::interface(-20.0, 1.5, 1.33).unwrap());
        let det = system.determinant().to_f64().unwrap();
        assert!((det - 1.0 / 1.33).abs() < 1e-12);
        assert!(system.output_index().approx_eq(&Scalar::real(1.33), 0.0));
    }

    #[test]
    fn reads_toml_description() {
        let system = System::from_toml_str(
            r#"
            [[element]]
            kind = "thin_lens"
            focal_length = 100.0

            [[element]]
            kind = "gap"
            distance = "d"
            "#,
        )
        .unwrap();
        assert_eq!(system.len(), 2);
        assert_eq!(
            system.free_symbols().into_iter().collect::<Vec<_>>(),
            vec!["d".to_string()]
        );

        let text = system.to_toml_string().unwrap();
        assert_eq!(System::from_toml_str(&text).unwrap(), system);

        assert!(matches!(
            System::from_toml_str("[[element]]\nkind = \"thin_lens\"\nfocal_length = 0.0"),
            Err(ParaxialError::InvalidParameter(_))
        ));
        assert!(matches!(
            System::from_toml_str("[[element]]\nkind = \"warp_drive\""),
            Err(ParaxialError::Parse(_))
        ));
    }

    #[test]
    fn toml_keeps_misalignment() {
        let system = System::new()
            .append(Element::thin_lens(100.0).unwrap().misaligned(0.5, 0.002))
            .append(Element::gap(20.0).unwrap());
        let text = system.to_toml_string().unwrap();
        let restored = System::from_toml_str(&text).unwrap();
        assert_eq!(restored, system);
        assert!(restored.elements()[0].misalignment().is_some());
    }
}

/// An ordered, immutable sequence of elements.
#[derive(Debug, Clone, Default)]
pub struct System {
    elements: Vec<Element>,
    composed: OnceLock<TransferMatrix>,
    offset: OnceLock<Option<Vector2<Scalar>>>,
}

/// Serialized form: a list of `[[element]]` tables.
#[derive(Debug, Serialize, Deserialize)]
struct SystemDescription {
    #[serde(default, rename = "element")]
    elements: Vec<ElementDescription>,
}

impl System {
    pub fn new() -> System {
        System::default()
    }

    /// Build a system from elements in propagation order.
    pub fn from_elements(elements: Vec<Element>) -> System {
        for (i, pair) in elements.windows(2).enumerate() {
            check_media(&pair[0], &pair[1], i + 1);
        }
        System::unchecked(elements)
    }

    fn unchecked(elements: Vec<Element>) -> System {
        System {
            elements,
            composed: OnceLock::new(),
            offset: OnceLock::new(),
        }
    }

    /// Parse a TOML list of `[[element]]` tables, each tagged with `kind`.
    pub fn from_toml_str(text: &str) -> Result<System> {
        let description: SystemDescription =
            toml::from_str(text).map_err(|e| ParaxialError::Parse(e.to_string()))?;
        let elements = description
            .elements
            .into_iter()
            .map(Element::try_from)
            .collect::<Result<Vec<_>>>()?;
        debug!("parsed system of {} elements", elements.len());
        Ok(System::from_elements(elements))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        let description = SystemDescription {
            elements: self.elements.iter().map(Element::description).collect(),
        };
        toml::to_string(&description).map_err(|e| ParaxialError::Parse(e.to_string()))
    }

    /// A new system with `element` appended; the receiver is unchanged.
    pub fn append(&self, element: Element) -> System {
        if let Some(last) = self.elements.last() {
            check_media(last, &element, self.elements.len());
        }
        let mut elements = self.elements.clone();
        elements.push(element);
        System::unchecked(elements)
    }

    /// A new system traversing `self` then `other`.
    pub fn concat(&self, other: &System) -> System {
        if let (Some(last), Some(first)) = (self.elements.last(), other.elements.first()) {
            check_media(last, first, self.elements.len());
        }
        let mut elements = self.elements.clone();
        elements.extend(other.elements.iter().cloned());
        System::unchecked(elements)
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Element> {
        self.elements.iter()
    }

    /// 4 when any element is astigmatic, 2 otherwise.
    pub fn dimension(&self) -> usize {
        self.elements
            .iter()
            .map(Element::dimension)
            .max()
            .unwrap_or(2)
    }

    /// The composed transfer matrix `Mₙ···M₂M₁`.
    ///
    /// **How it Works**
    ///
    /// Folds from the identity with `acc ← Mᵢ · acc`, so each element
    /// left-multiplies everything traversed before it. Planar elements inside
    /// an astigmatic system act identically on both planes.
    pub fn compose(&self) -> &TransferMatrix {
        self.composed.get_or_init(|| {
            let dimension = self.dimension();
            let composed = self.elements.iter().enumerate().fold(
                TransferMatrix::identity(dimension),
                |acc, (i, element)| {
                    trace!("composing element {}: {}", i, element);
                    acc.then(element.matrix())
                },
            );
            debug!(
                "composed {} elements into a {}x{} transfer matrix",
                self.elements.len(),
                dimension,
                dimension
            );
            composed
        })
    }

    /// Tangential offset `(E, F)` added to a ray after the composed matrix;
    /// `None` when every element is aligned.
    ///
    /// Folded with the matrices: each element maps the offset carried so far
    /// and adds its own, `e ← Mᵢ·e + eᵢ`.
    pub fn offset(&self) -> Option<&Vector2<Scalar>> {
        self.offset
            .get_or_init(|| {
                self.elements
                    .iter()
                    .fold(None, |acc: Option<Vector2<Scalar>>, element| {
                        let carried = acc.map(|e| element.matrix().plane(Plane::Tangential) * e);
                        match (carried, element.offset()) {
                            (Some(e), Some(own)) => Some(e + own),
                            (Some(e), None) => Some(e),
                            (None, own) => own.cloned(),
                        }
                    })
            })
            .as_ref()
    }

    /// Entry-wise magnitude of one plane, `|Mₙ|···|M₁|` with `|·|` taken per
    /// entry; `None` while any entry has free symbols.
    ///
    /// Each entry bounds the sum of absolute products that the matching entry
    /// of [`System::compose`] is built from, which sets the scale for telling
    /// a cancelled entry apart from rounding noise.
    pub fn magnitude(&self, plane: Plane) -> Option<Matrix2<f64>> {
        self.elements
            .iter()
            .try_fold(Matrix2::<f64>::identity(), |acc, element| {
                let m = element.matrix().plane(plane);
                let mut abs = Matrix2::<f64>::zeros();
                for (dst, x) in abs.iter_mut().zip(m.iter()) {
                    *dst = x.to_complex().ok()?.norm();
                }
                Some(abs * acc)
            })
    }

    /// Determinant of the composed matrix, `n_in / n_out` per plane.
    pub fn determinant(&self) -> Scalar {
        self.compose().determinant()
    }

    /// Index of the medium before the first element (1 for an empty system).
    pub fn input_index(&self) -> Scalar {
        self.elements
            .first()
            .map(|e| e.input_index().clone())
            .unwrap_or_else(Scalar::one)
    }

    /// Index of the medium after the last element (1 for an empty system).
    pub fn output_index(&self) -> Scalar {
        self.elements
            .last()
            .map(|e| e.output_index().clone())
            .unwrap_or_else(Scalar::one)
    }

    /// Elements `start..end`.
    pub fn sub_system(&self, start: usize, end: usize) -> Result<System> {
        if start > end || end > self.elements.len() {
            return Err(ParaxialError::IndexOutOfRange {
                start,
                end,
                len: self.elements.len(),
            });
        }
        Ok(System::from_elements(self.elements[start..end].to_vec()))
    }

    /// The system traversed backwards: element order reversed and every
    /// element replaced by its reversed-propagation equivalent.
    pub fn reversed(&self) -> System {
        System::unchecked(self.elements.iter().rev().map(Element::reversed).collect())
    }

    /// Rebuild every element with `bindings` applied.
    pub fn substitute(&self, bindings: &Bindings) -> Result<System> {
        let elements = self
            .elements
            .iter()
            .map(|e| e.substitute(bindings))
            .collect::<Result<Vec<_>>>()?;
        Ok(System::unchecked(elements))
    }

    pub fn free_symbols(&self) -> BTreeSet<String> {
        self.elements.iter().flat_map(Element::free_symbols).collect()
    }
}

/// Warn when consecutive elements disagree about the medium between them.
fn check_media(previous: &Element, next: &Element, position: usize) {
    let out = previous.output_index();
    let inp = next.input_index();
    if !out.approx_eq(inp, DEFAULT_TOLERANCE) {
        warn!(
            "element {} ({}) starts in medium {} but the previous element ends in {}",
            position,
            next.kind().name(),
            inp,
            out
        );
    }
}

impl PartialEq for System {
    fn eq(&self, other: &Self) -> bool {
        self.elements == other.elements
    }
}

impl FromIterator<Element> for System {
    fn from_iter<I: IntoIterator<Item = Element>>(iter: I) -> Self {
        System::from_elements(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a System {
    type Item = &'a Element;
    type IntoIter = std::slice::Iter<'a, Element>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}

impl fmt::Display for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, element) in self.elements.iter().enumerate() {
            writeln!(f, "{:>3}: {}", i, element)?;
        }
        Ok(())
    }
}
