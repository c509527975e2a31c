//! Elements assembled from several surfaces.

use paraxial::cardinal::cardinal_points;
use paraxial::element::{Element, Plane, Radius};
use paraxial::scalar::Scalar;
use paraxial::system::System;

fn value(s: &Scalar) -> f64 {
    s.to_f64().unwrap()
}

#[test]
fn thick_lens_in_air() {
    let lens = Element::thick_lens(25e-3, -30e-3, 2e-3, 1.5, 1.0).unwrap();
    let points = cardinal_points(&System::new().append(lens)).unwrap();

    // same medium on both sides
    assert!(points
        .front_focal_length
        .approx_eq(&points.effective_focal_length, 1e-12));

    // principal planes are not superimposed
    let p1 = value(&points.front_principal_plane);
    let p2 = value(&points.back_principal_plane);
    assert!((p1 - p2).abs() > 1e-6);

    let f1 = value(&points.front_focal_point);
    let f2 = value(&points.back_focal_point);
    assert!((f1 - f2).abs() > 1e-6);

    let n1 = value(&points.front_nodal_point);
    let n2 = value(&points.back_nodal_point);
    assert!((n1 - n2).abs() > 1e-6);

    // in a single medium the nodal points coincide with the principal planes
    assert!((n1 - p1).abs() < 1e-12);
    assert!((n2 - p2).abs() < 1e-12);
}

#[test]
fn thick_lens_principal_planes_lie_inside() {
    let lens = Element::thick_lens(25e-3, -30e-3, 2e-3, 1.5, 1.0).unwrap();
    let points = cardinal_points(&System::new().append(lens)).unwrap();
    let p1 = value(&points.front_principal_plane);
    let p2 = value(&points.back_principal_plane);
    assert!(p1 > 0.0 && p1 < 2e-3);
    assert!(p2 > 0.0 && p2 < 2e-3);
}

#[test]
fn lensmaker_equation() {
    let thin = Element::thin_lens(10e-3).unwrap();
    let thick = Element::thick_lens(10e-3, -10e-3, 0.0, 1.5, 1.0).unwrap();
    assert!(thin.matrix().approx_eq(thick.matrix(), 1e-12));
}

#[test]
fn symmetric_biconvex_focal_length() {
    // 1/f = (n - 1)(1/R1 - 1/R2 + (n - 1) t / (n R1 R2))
    let (r, t, n) = (50.0, 5.0, 1.5168);
    let lens = Element::thick_lens(r, -r, t, n, 1.0).unwrap();
    let power = (n - 1.0) * (2.0 / r - (n - 1.0) * t / (n * r * r));
    let points = cardinal_points(&System::new().append(lens)).unwrap();
    assert!((value(&points.effective_focal_length) - 1.0 / power).abs() < 1e-9);
}

#[test]
fn plano_convex_orientation() {
    // the principal plane sits on the curved side
    let curved_first = Element::thick_lens(50.0, Radius::Flat, 5.0, 1.5, 1.0).unwrap();
    let flat_first = Element::thick_lens(Radius::Flat, -50.0, 5.0, 1.5, 1.0).unwrap();
    let a = cardinal_points(&System::new().append(curved_first)).unwrap();
    let b = cardinal_points(&System::new().append(flat_first)).unwrap();

    assert!(a
        .effective_focal_length
        .approx_eq(&b.effective_focal_length, 1e-12));
    assert!(value(&a.front_principal_plane).abs() < 1e-12);
    assert!(value(&b.back_principal_plane).abs() < 1e-12);
}

#[test]
fn tilted_mirror_is_astigmatic() {
    let angle = 0.4_f64;
    let mirror = Element::tilted_mirror(-200.0, angle).unwrap();
    let (_, _, c_t, _) = mirror.matrix().abcd(Plane::Tangential);
    let (_, _, c_s, _) = mirror.matrix().abcd(Plane::Sagittal);
    assert!(c_t.approx_eq(&Scalar::real(-0.01 / angle.cos()), 1e-12));
    assert!(c_s.approx_eq(&Scalar::real(-0.01 * angle.cos()), 1e-12));
}

#[test]
fn normal_incidence_interface_matches_planar_one() {
    let tilted = Element::tilted_interface(40.0, 1.0, 1.5, 0.0).unwrap();
    let planar = Element::interface(40.0, 1.0, 1.5).unwrap();
    for plane in [Plane::Tangential, Plane::Sagittal] {
        let (a1, b1, c1, d1) = tilted.matrix().abcd(plane);
        let (a2, b2, c2, d2) = planar.matrix().abcd(plane);
        assert!(a1.approx_eq(&a2, 1e-12));
        assert!(b1.approx_eq(&b2, 1e-12));
        assert!(c1.approx_eq(&c2, 1e-12));
        assert!(d1.approx_eq(&d2, 1e-12));
    }
}
