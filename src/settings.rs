use anyhow::{ensure, Context, Result};
use config::{Config, Environment, File};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::PathBuf;

/// Relative tolerance for numeric comparisons of matrix entries and results.
pub const DEFAULT_TOLERANCE: f64 = 1e-9;
/// Size of a numeric `C` entry, relative to the magnitude of the terms it is
/// summed from, below which a system is treated as afocal.
pub const SINGULAR_THRESHOLD: f64 = 1e-12;
/// Half-width of the band around `|m| = 1` classified as a marginal resonator.
pub const STABILITY_TOLERANCE: f64 = 1e-12;
/// Maximum number of Newton iterations in the scalar solver.
pub const MAX_ITERATIONS: usize = 100;
/// Residual or step size at which the Newton solver stops.
pub const SOLVER_TOLERANCE: f64 = 1e-12;
/// Largest integer power of a sum that is expanded into a polynomial.
pub const MAX_POWER_EXPANSION: i64 = 16;
/// Prefix of environment variables overriding configuration values.
pub const ENV_PREFIX: &str = "PARAXIAL";


/// Numeric tolerances used by the analysis routines.
///
/// Every field falls back to its constant default when absent from the
/// configuration sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Relative `|C|` below which a system is considered afocal.
    pub singular_threshold: f64,
    /// Tolerance band for marginal stability.
    pub stability_tolerance: f64,
    /// Newton iteration limit.
    pub max_iterations: usize,
    /// Newton convergence tolerance.
    pub solver_tolerance: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            singular_threshold: SINGULAR_THRESHOLD,
            stability_tolerance: STABILITY_TOLERANCE,
            max_iterations: MAX_ITERATIONS,
            solver_tolerance: SOLVER_TOLERANCE,
        }
    }
}

impl Settings {
    /// Parse settings from a TOML document, then validate.
    pub fn from_toml_str(text: &str) -> Result<Settings> {
        let settings: Settings = toml::from_str(text).context("invalid settings document")?;
        validate_config(&settings)?;
        Ok(settings)
    }
}

/// Load `config/default.toml` from the project root.
pub fn load_default_config() -> Result<Settings> {
    let root = retrieve_project_root()?;
    let default_config_file = root.join("config/default.toml");

    let settings = Config::builder()
        .add_source(File::from(default_config_file.clone()).required(true))
        .build()
        .with_context(|| format!("error loading configuration {:?}", default_config_file))?;

    let config: Settings = settings
        .try_deserialize()
        .context("error deserializing configuration")?;

    validate_config(&config)?;
    debug!("loaded default configuration: {}", config);

    Ok(config)
}

/// Load `config/default.toml`, layered with `config/local.toml` when it exists
/// and with `PARAXIAL_*` environment variables.
pub fn load_config() -> Result<Settings> {
    let root = retrieve_project_root()?;

    let default_config_file = root.join("config/default.toml");
    let local_config = root.join("config/local.toml");

    let mut builder =
        Config::builder().add_source(File::from(default_config_file.clone()).required(true));
    if local_config.exists() {
        info!("using local configuration: {:?}", local_config);
        builder = builder.add_source(File::from(local_config).required(true));
    } else {
        debug!("using default configuration: {:?}", default_config_file);
    }

    let settings = builder
        .add_source(Environment::with_prefix(ENV_PREFIX))
        .build()
        .context("error loading configuration")?;

    let config: Settings = settings
        .try_deserialize()
        .context("error deserializing configuration")?;

    validate_config(&config)?;
    debug!("loaded configuration: {}", config);

    Ok(config)
}

/// Retrieve the project root directory.
/// This function tries to find the project root directory in different ways:
/// 1. If the CARGO_MANIFEST_DIR environment variable is set, use it.
/// 2. If the PARAXIAL_ROOT_DIR environment variable is set, use it.
/// 3. If the "config" subdirectory is found in the executable directory or any of its parents, use it.
fn retrieve_project_root() -> Result<PathBuf> {
    if let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR") {
        return Ok(PathBuf::from(manifest_dir));
    }
    if let Ok(path) = env::var("PARAXIAL_ROOT_DIR") {
        return Ok(PathBuf::from(path));
    }

    let exe_path = env::current_exe().context("failed to get current executable path")?;
    exe_path
        .ancestors()
        .skip(1)
        .find(|dir| dir.join("config").is_dir())
        .map(PathBuf::from)
        .context("could not find project root directory")
}

pub fn validate_config(config: &Settings) -> Result<()> {
    ensure!(
        config.singular_threshold >= 0.0,
        "singular threshold must not be negative"
    );
    ensure!(
        config.stability_tolerance >= 0.0,
        "stability tolerance must not be negative"
    );
    ensure!(config.max_iterations > 0, "max iterations must be at least 1");
    ensure!(
        config.solver_tolerance > 0.0,
        "solver tolerance must be greater than 0"
    );
    Ok(())
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "singular_threshold={:.1e}, stability_tolerance={:.1e}, max_iterations={}, solver_tolerance={:.1e}",
            self.singular_threshold,
            self.stability_tolerance,
            self.max_iterations,
            self.solver_tolerance
        )
    }
}
