use crate::estimate::Estimator;
use crate::logging::LoggingConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub numerics: NumericsConfig,
    pub approximation: ApproximationConfig,
    pub bounds: BoundsConfig,
    pub batch: BatchConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumericsConfig {
    /// Determinant magnitude below which inversion fails
    pub singular_tolerance: f64,
    /// Relative singular value cutoff for least-squares fits
    pub rank_tolerance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApproximationConfig {
    pub degree: usize,
    /// Sample grid over the tile's pixel extent
    pub grid_nx: usize,
    pub grid_ny: usize,
    /// Collapse affine-only chains to an affine fit instead of a polynomial
    pub prefer_affine: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundsConfig {
    pub samples_per_edge: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Worker threads, 0 lets rayon decide
    pub threads: usize,
    /// Fail the run, without writing output, when any tile fails
    pub fail_fast: bool,
}

impl Default for NumericsConfig {
    fn default() -> Self {
        Self {
            singular_tolerance: crate::transform::DEFAULT_SINGULAR_TOLERANCE,
            rank_tolerance: crate::estimate::DEFAULT_RANK_TOLERANCE,
        }
    }
}

impl Default for ApproximationConfig {
    fn default() -> Self {
        Self {
            degree: 3,
            grid_nx: 16,
            grid_ny: 16,
            prefer_affine: true,
        }
    }
}

impl Default for BoundsConfig {
    fn default() -> Self {
        Self {
            samples_per_edge: 16,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            fail_fast: false,
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        if content.trim_start().starts_with('{') {
            serde_json::from_str(&content).context("parsing JSON config")
        } else {
            toml::from_str(&content).context("parsing TOML config")
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P, format: ConfigFormat) -> Result<()> {
        let content = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
        };

        fs::write(path.as_ref(), content)
            .with_context(|| format!("writing config file {}", path.as_ref().display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !(self.numerics.singular_tolerance > 0.0) {
            errors.push("numerics.singular_tolerance must be positive".to_string());
        }

        if !(self.numerics.rank_tolerance > 0.0 && self.numerics.rank_tolerance < 1.0) {
            errors.push("numerics.rank_tolerance must be in (0, 1)".to_string());
        }

        let samples = self.approximation.grid_nx.max(2) * self.approximation.grid_ny.max(2);
        let required = crate::transform::polynomial::coefficient_count(self.approximation.degree);
        if samples < required {
            errors.push(format!(
                "approximation grid {}x{} has {} samples, degree {} needs {}",
                self.approximation.grid_nx,
                self.approximation.grid_ny,
                samples,
                self.approximation.degree,
                required
            ));
        }

        if self.bounds.samples_per_edge < 2 {
            errors.push("bounds.samples_per_edge must be at least 2".to_string());
        }

        if let Err(e) = self.logging.validate() {
            errors.push(format!("logging: {}", e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn estimator(&self) -> Estimator {
        Estimator::new(self.numerics.rank_tolerance)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ConfigFormat {
    Json,
    Toml,
}

pub fn load_config_or_default(config_path: Option<&str>) -> Config {
    match config_path {
        Some(path) => match Config::load_from_file(path) {
            Ok(config) => {
                if let Err(errors) = config.validate() {
                    eprintln!("Configuration validation errors:");
                    for error in errors {
                        eprintln!("  - {}", error);
                    }
                    eprintln!("Using default configuration instead.");
                    Config::default()
                } else {
                    config
                }
            }
            Err(e) => {
                eprintln!("Failed to load config from '{}': {:#}", path, e);
                eprintln!("Using default configuration.");
                Config::default()
            }
        },
        None => Config::default(),
    }
}
