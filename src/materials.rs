//! Refractive indices of common optical media.
//!
//! Wavelengths are vacuum wavelengths in micrometres, temperatures in °C and
//! pressures in Pa. Solid materials report their index relative to the
//! surrounding air at the same temperature and pressure, which is what a
//! lens design in air needs. NOA61 is the exception: it is an adhesive used
//! between glass surfaces, so its index is absolute.

use crate::error::{ParaxialError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Standard atmospheric pressure in Pa.
pub const STANDARD_PRESSURE: f64 = 101_325.0;


/// A material with a known dispersion formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Material {
    Air,
    /// Schott N-BK7, 0.365 to 1.06 µm.
    NBk7,
    /// Schott N-SF5, 0.405 to 2.326 µm.
    NSf5,
    /// Corning HPFS 7980 fused silica, 0.185 to 1.129 µm.
    Fs7980,
    /// Norland Optical Adhesive 61, at 25 °C only.
    Noa61,
    /// Zinc selenide.
    ZnSe,
    /// Magnesium fluoride.
    MgF2,
    /// Titanium dioxide.
    TiO2,
}

impl Material {
    pub const ALL: [Material; 8] = [
        Material::Air,
        Material::NBk7,
        Material::NSf5,
        Material::Fs7980,
        Material::Noa61,
        Material::ZnSe,
        Material::MgF2,
        Material::TiO2,
    ];

    /// Temperature at which the material's formula is referenced, in °C.
    pub fn reference_temperature(&self) -> f64 {
        match self {
            Material::Air | Material::NBk7 | Material::NSf5 | Material::ZnSe => 20.0,
            Material::Fs7980 => 22.0,
            Material::Noa61 | Material::MgF2 | Material::TiO2 => 25.0,
        }
    }

    /// Index at the reference temperature and standard pressure.
    pub fn index(&self, wavelength: f64) -> Result<f64> {
        self.index_at(wavelength, self.reference_temperature(), STANDARD_PRESSURE)
    }

    /// Index at the given temperature and air pressure.
    pub fn index_at(&self, wavelength: f64, temperature: f64, pressure: f64) -> Result<f64> {
        if !(wavelength > 0.0) {
            return Err(ParaxialError::InvalidParameter(format!(
                "wavelength must be positive, got {} µm",
                wavelength
            )));
        }
        let l = wavelength;
        let (t, p) = (temperature, pressure);
        let absolute = match self {
            Material::Air => return Ok(air(l, t, p)),
            Material::Noa61 => return Ok(noa61(l)),
            Material::NBk7 => schott(l, t, &NBK7),
            Material::NSf5 => schott(l, t, &NSF5),
            Material::Fs7980 => fs7980(l, t),
            Material::ZnSe => znse(l, t),
            Material::MgF2 => mgf2(l),
            Material::TiO2 => tio2(l),
        };
        Ok(absolute / air(l, t, p))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Material::Air => "air",
            Material::NBk7 => "N-BK7",
            Material::NSf5 => "N-SF5",
            Material::Fs7980 => "HPFS 7980",
            Material::Noa61 => "NOA61",
            Material::ZnSe => "ZnSe",
            Material::MgF2 => "MgF2",
            Material::TiO2 => "TiO2",
        }
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Material {
    type Err = ParaxialError;

    fn from_str(s: &str) -> Result<Self> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "air" => Ok(Material::Air),
            "nbk7" | "bk7" => Ok(Material::NBk7),
            "nsf5" | "sf5" => Ok(Material::NSf5),
            "fs7980" | "hpfs7980" | "fusedsilica" => Ok(Material::Fs7980),
            "noa61" => Ok(Material::Noa61),
            "znse" => Ok(Material::ZnSe),
            "mgf2" => Ok(Material::MgF2),
            "tio2" => Ok(Material::TiO2),
            _ => Err(ParaxialError::Parse(format!("unknown material '{}'", s))),
        }
    }
}

/// Schwertz and Burge formula for dry air.
fn air(l: f64, t: f64, p: f64) -> f64 {
    let inv2 = 1.0 / (l * l);
    let ns = (8342.54 + 2_406_147.0 / (130.0 - inv2) + 15998.0 / (38.9 - inv2)) * 1e-8;
    1.0 + p * ns / 96095.43 * (1.0 + 1e-8 * (0.601 - 9.72e-3 * t) * p) / (1.0 + 3.661e-3 * t)
}

/// Sellmeier and thermal coefficients in the Schott catalogue form.
struct SchottGlass {
    b: [f64; 3],
    c: [f64; 3],
    d: [f64; 3],
    e: [f64; 2],
    lambda_tk: f64,
}

const NBK7: SchottGlass = SchottGlass {
    b: [1.03961212, 0.231792344, 1.01046945],
    c: [0.00600069867, 0.0200179144, 103.560653],
    d: [1.86e-6, 1.31e-8, -1.37e-11],
    e: [4.34e-7, 6.27e-10],
    lambda_tk: 0.17,
};

const NSF5: SchottGlass = SchottGlass {
    b: [1.52481889, 0.187085527, 1.427290150],
    c: [0.01125475600, 0.0588995392, 129.1416750],
    d: [-2.51e-7, 1.07e-8, -2.40e-11],
    e: [7.85e-7, 1.15e-9],
    lambda_tk: 0.278,
};

fn schott(l: f64, t: f64, glass: &SchottGlass) -> f64 {
    let l2 = l * l;
    let n = (1.0
        + glass
            .b
            .iter()
            .zip(glass.c.iter())
            .map(|(b, c)| b * l2 / (l2 - c))
            .sum::<f64>())
    .sqrt();

    let dt = t - 20.0;
    let [d0, d1, d2] = glass.d;
    let [e0, e1] = glass.e;
    let dn = (n * n - 1.0) / (2.0 * n)
        * (d0 * dt
            + d1 * dt.powi(2)
            + d2 * dt.powi(3)
            + (e0 * dt + e1 * dt.powi(2)) / (l2 - glass.lambda_tk.powi(2)));
    n + dn
}

fn fs7980(l: f64, t: f64) -> f64 {
    const A: [f64; 8] = [
        2.104025406,
        -1.456000330e-4,
        -9.049135390e-3,
        8.801830992e-3,
        8.435237228e-5,
        1.681656789e-6,
        -1.675425449e-8,
        8.326602461e-10,
    ];
    const C: [f64; 4] = [9.390590, 0.235290, -1.318560e-3, 3.028870e-4];

    let l2 = l * l;
    let n = (A[0]
        + A[1] * l2 * l2
        + A[2] * l2
        + A[3] * l2.powi(-1)
        + A[4] * l2.powi(-2)
        + A[5] * l2.powi(-3)
        + A[6] * l2.powi(-4)
        + A[7] * l2.powi(-5))
    .sqrt();

    let dt = t - 22.0;
    n + (C[0] + C[1] / l2 + C[2] / l2.powi(2) + C[3] / l2.powi(3)) * dt * 1e-6
}

fn noa61(l: f64) -> f64 {
    let nm = l * 1e3;
    1.5375 + 8290.45 / nm.powi(2) - 2.11046e8 / nm.powi(4)
}

/// Fitted to the index directly, not its square.
fn znse(l: f64, t: f64) -> f64 {
    const A: f64 = 2.4111569588609116;
    const B: f64 = 0.5947997628556585;
    const C: f64 = -0.28953183849065445;
    const D: f64 = 1204.4848710547462;
    const E: f64 = 45.91079400183925;
    // measured at 10.6 µm, larger at shorter wavelengths
    const DN_DT: f64 = 61e-6;

    let l2 = l * l;
    A + B * l2 / (l2 - C * C) + D / (l2 - E * E) + DN_DT * (t - 20.0)
}

fn mgf2(l: f64) -> f64 {
    const A: f64 = 1.417742829917271;
    const B: f64 = 1.1505948761303543e-2;
    const C: f64 = -3.4962526545629879e-1;
    const D: f64 = -8.0656421284475994e-3;
    const E: f64 = 9.5656756857168387e-2;
    A + B / (C - l) + D / (E - l)
}

fn tio2(l: f64) -> f64 {
    const A: f64 = 1.9226445269428725;
    const B: f64 = 2.0802606609567842e-2;
    const C: f64 = 1.2005327946672779e-1;
    const D: f64 = -3.0426606351792251e-1;
    let l2 = l * l;
    A + B / l2 + C * l2 / (l2 - D * D)
}
