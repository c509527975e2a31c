use paraxial::beam::{propagate_beam, GaussianBeam};
use paraxial::element::Element;
use paraxial::scalar::Scalar;
use paraxial::system::System;

const WAVELENGTH: f64 = 500e-9;

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs())
}

fn random_index() -> f64 {
    1.0 + rand::random::<f64>() * 3.0
}

#[test]
fn constructors_agree_with_their_inputs() {
    let n = 1.5;
    let beam = GaussianBeam::from_q(Scalar::complex(10e-3, 1e-3), WAVELENGTH, n).unwrap();
    let m = beam.metrics().unwrap();
    assert!(approx(m.waist_distance, 10e-3));
    assert!(approx(m.rayleigh_range, 1e-3));

    let m = GaussianBeam::from_radius_width(100e-3, 1e-3, WAVELENGTH, n)
        .unwrap()
        .metrics()
        .unwrap();
    assert!(approx(m.radius_of_curvature, 100e-3));
    assert!(approx(m.width, 1e-3));

    let m = GaussianBeam::from_radius_z(100e-3, 10e-3, WAVELENGTH, n)
        .unwrap()
        .metrics()
        .unwrap();
    assert!(approx(m.radius_of_curvature, 100e-3));
    assert!(approx(m.waist_distance, 10e-3));

    for sign in [1, -1] {
        let m = GaussianBeam::from_radius_zr(100e-3, 1e-3, WAVELENGTH, n, sign)
            .unwrap()
            .metrics()
            .unwrap();
        assert!(approx(m.radius_of_curvature, 100e-3));
        assert!(approx(m.rayleigh_range, 1e-3));
    }

    let m = GaussianBeam::from_width_z(1e-3, 10e-3, WAVELENGTH, n, 1)
        .unwrap()
        .metrics()
        .unwrap();
    assert!(approx(m.width, 1e-3));
    assert!(approx(m.waist_distance, 10e-3));

    let m = GaussianBeam::from_width_zr(1e-3, 1e-3, WAVELENGTH, n, 1)
        .unwrap()
        .metrics()
        .unwrap();
    assert!(approx(m.width, 1e-3));
    assert!(approx(m.rayleigh_range, 1e-3));
}

#[test]
fn equal_inputs_give_equal_beams() {
    let a = GaussianBeam::from_radius_width(100e-3, 1e-3, WAVELENGTH, 1.0).unwrap();
    let b = GaussianBeam::from_radius_width(100e-3, 1e-3, WAVELENGTH, 1.0).unwrap();
    assert_eq!(a, b);
}

#[test]
fn flat_interface() {
    let (n1, n2) = (random_index(), random_index());
    let before = GaussianBeam::from_z_zr(10e-3, 1e-3, WAVELENGTH, n1).unwrap();
    let glass = System::new().append(Element::flat_interface(n1, n2).unwrap());
    let after = before.propagate(&glass).unwrap();

    assert!(after.index.approx_eq(&Scalar::real(n2), 0.0));
    assert_eq!(after.wavelength, before.wavelength);

    let (m1, m2) = (before.metrics().unwrap(), after.metrics().unwrap());
    let ratio = n2 / n1;
    assert!(approx(m2.radius_of_curvature, ratio * m1.radius_of_curvature));
    assert!(approx(m2.width, m1.width));
    assert!(approx(m2.waist_distance, ratio * m1.waist_distance));
    assert!(approx(m2.rayleigh_range, ratio * m1.rayleigh_range));
    assert!(approx(m2.waist, m1.waist));
    assert!(approx(m2.divergence, m1.divergence / ratio));
}

#[test]
fn free_space() {
    let n = random_index();
    let length = 100e-3;
    let before = GaussianBeam::from_z_zr(10e-3, 1e-3, WAVELENGTH, n).unwrap();
    let after = before
        .propagate(&System::new().append(Element::gap_in(length, n).unwrap()))
        .unwrap();

    let (m1, m2) = (before.metrics().unwrap(), after.metrics().unwrap());
    assert!(approx(m2.waist_distance, m1.waist_distance + length));
    assert!(approx(m2.rayleigh_range, m1.rayleigh_range));
    assert!(approx(m2.waist, m1.waist));
    assert!(approx(m2.divergence, m1.divergence));
}

#[test]
fn propagation_to_focus_in_air() {
    let before = GaussianBeam::from_z_zr(-10e-3, 1e-3, WAVELENGTH, 1.0).unwrap();
    let after = before
        .propagate(&System::new().append(Element::gap(10e-3).unwrap()))
        .unwrap();

    let (m1, m2) = (before.metrics().unwrap(), after.metrics().unwrap());
    assert!(m2.radius_of_curvature.abs() >= 1e9);
    assert!(approx(m2.width, m1.waist));
    assert!(m2.waist_distance.abs() < 1e-15);
    assert!(approx(m2.rayleigh_range, m1.rayleigh_range));
}

#[test]
fn propagation_to_focus_in_glass() {
    // the waist 10 mm away in air lies 15 mm inside the glass
    let n2 = 1.5;
    let before = GaussianBeam::from_z_zr(-10e-3, 1e-3, WAVELENGTH, 1.0).unwrap();
    let system = System::new()
        .append(Element::flat_interface(1.0, n2).unwrap())
        .append(Element::gap_in(15e-3, n2).unwrap());
    let after = before.propagate(&system).unwrap();

    let (m1, m2) = (before.metrics().unwrap(), after.metrics().unwrap());
    assert!(m2.waist_distance.abs() < 1e-15);
    assert!((m2.width - m1.waist).abs() < 1e-9 * m1.waist);
    assert!((m2.rayleigh_range - n2 * m1.rayleigh_range).abs() < 1e-12);
}

#[test]
fn refraction_at_curved_interface() {
    let n = random_index();
    let radius = 100e-3;
    let before = GaussianBeam::from_z_zr(10e-3, 1e-3, WAVELENGTH, 1.0).unwrap();
    let after = before
        .propagate(&System::new().append(Element::interface(radius, 1.0, n).unwrap()))
        .unwrap();

    let (m1, m2) = (before.metrics().unwrap(), after.metrics().unwrap());
    let expected = 1.0 / m1.radius_of_curvature - (n - 1.0) / radius;
    assert!(approx(n / m2.radius_of_curvature, expected));
    assert!(approx(m2.width, m1.width));
}

#[test]
fn starting_inside_a_material() {
    let n2 = random_index();
    let air = GaussianBeam::from_z_zr(10e-3, 1e-3, WAVELENGTH, 1.0).unwrap();
    let glass = GaussianBeam::from_z_zr(10e-3, 1e-3, WAVELENGTH, n2).unwrap();

    let (m1, m2) = (air.metrics().unwrap(), glass.metrics().unwrap());
    assert!(approx(m2.radius_of_curvature, m1.radius_of_curvature));
    assert!(approx(m2.waist_distance, m1.waist_distance));
    assert!(approx(m2.rayleigh_range, m1.rayleigh_range));
    assert!(approx(m2.waist, m1.waist / n2.sqrt()));
}

#[test]
fn symbolic_distance_binds_after_propagation() {
    let system = System::new().append(Element::gap(Scalar::symbol("L")).unwrap());
    let q = propagate_beam(&system, &Scalar::complex(-10e-3, 1e-3), &Scalar::real(WAVELENGTH))
        .unwrap();
    assert!(q.is_symbolic());

    let bound = q
        .evaluate(&paraxial::scalar::Bindings::new().with("L", 10e-3))
        .unwrap();
    assert!(bound.approx_eq(&Scalar::complex(0.0, 1e-3), 1e-15));
}
