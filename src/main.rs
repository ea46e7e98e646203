use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use rayon::prelude::*;
use render_transform::config::{load_config_or_default, Config};
use render_transform::logging::{self, LoggingConfig, TileContext};
use render_transform::transform::map_points_with_tolerance;
use render_transform::*;
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "render-tform")]
#[command(about = "Map, resolve, fit and approximate render tile transforms")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Map points through a transform list
    Apply {
        /// Transform or transform list JSON
        #[arg(short, long, conflicts_with = "tiles")]
        transforms: Option<PathBuf>,

        /// Shared transform table JSON (id -> transform)
        #[arg(long, requires = "transforms")]
        table: Option<PathBuf>,

        /// Resolved tiles JSON; use together with --tile
        #[arg(long, requires = "tile")]
        tiles: Option<PathBuf>,

        /// Tile id inside --tiles
        #[arg(long)]
        tile: Option<String>,

        /// Points JSON, an array of [x, y] pairs
        #[arg(short, long)]
        points: PathBuf,

        /// Map world coordinates back to local ones
        #[arg(long)]
        inverse: bool,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fit a transform to point matches
    Estimate {
        /// Point matches JSON: {"p": [[x..],[y..]], "q": [[x..],[y..]], "w": [..]}
        #[arg(short, long)]
        matches: PathBuf,

        #[arg(long, value_enum, default_value = "affine")]
        model: ModelArg,

        /// Polynomial degree, or the dimension of a nonlinear model
        #[arg(short, long, default_value = "2")]
        degree: usize,

        /// Fit a thin-plate spline without its affine part
        #[arg(long)]
        no_affine: bool,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Inline every reference of every tile
    Resolve {
        /// Resolved tiles JSON
        tiles: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write a batch report here
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Replace each tile's chain by a single fitted transform
    Approximate {
        /// Resolved tiles JSON
        tiles: PathBuf,

        /// Polynomial degree (defaults to the configured one)
        #[arg(short, long)]
        degree: Option<usize>,

        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Recompute minX/minY/maxX/maxY of every tile
    Bounds {
        /// Resolved tiles JSON
        tiles: PathBuf,

        /// Outline samples per tile edge (defaults to the configured one)
        #[arg(short, long)]
        samples: Option<usize>,

        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long)]
        report: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModelArg {
    Translation,
    Rigid,
    Similarity,
    Affine,
    Polynomial,
    Nonlinear,
    Tps,
}

impl ModelArg {
    fn kind(self, degree: usize, no_affine: bool) -> ModelKind {
        match self {
            ModelArg::Translation => ModelKind::Translation,
            ModelArg::Rigid => ModelKind::Rigid,
            ModelArg::Similarity => ModelKind::Similarity,
            ModelArg::Affine => ModelKind::Affine,
            ModelArg::Polynomial => ModelKind::Polynomial { degree },
            ModelArg::Nonlinear => ModelKind::NonLinear { dimension: degree },
            ModelArg::Tps => ModelKind::ThinPlateSpline { affine: !no_affine },
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config_or_default(cli.config.as_deref());

    let logging_config = match cli.verbose {
        0 => config.logging.clone(),
        1 => LoggingConfig::with_level("info"),
        2 => LoggingConfig::with_level("debug"),
        _ => LoggingConfig::with_level("trace"),
    };
    let _guard = logging::init_logging(&logging_config)?;

    match cli.command {
        Commands::Apply { transforms, table, tiles, tile, points, inverse, output } => {
            handle_apply(&config, transforms, table, tiles, tile, points, inverse, output)?;
        }
        Commands::Estimate { matches, model, degree, no_affine, output } => {
            handle_estimate(&config, matches, model.kind(degree, no_affine), output)?;
        }
        Commands::Resolve { tiles, output, report } => {
            handle_resolve(&config, tiles, output, report)?;
        }
        Commands::Approximate { tiles, degree, output, report } => {
            handle_approximate(&config, tiles, degree, output, report)?;
        }
        Commands::Bounds { tiles, samples, output, report } => {
            handle_bounds(&config, tiles, samples, output, report)?;
        }
    }

    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => fs::write(path, json).with_context(|| format!("writing {}", path.display())),
        None => {
            println!("{}", json);
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_apply(
    config: &Config,
    transforms: Option<PathBuf>,
    table: Option<PathBuf>,
    tiles: Option<PathBuf>,
    tile: Option<String>,
    points: PathBuf,
    inverse: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let (list, table) = match (transforms, tiles, tile) {
        (Some(path), _, _) => {
            let list = match read_json::<Transform>(&path)? {
                Transform::List(list) => list,
                single => TransformList::new(vec![single]),
            };
            let table = match table {
                Some(path) => read_json::<ReferenceTable>(&path)?,
                None => ReferenceTable::new(),
            };
            (list, table)
        }
        (None, Some(path), Some(tile_id)) => {
            let resolved: ResolvedTiles = read_json(&path)?;
            let tile = resolved
                .tile(&tile_id)
                .with_context(|| format!("tile '{}' not found in {}", tile_id, path.display()))?;
            (tile.transforms.clone(), resolved.transform_id_to_spec_map.clone())
        }
        _ => bail!("either --transforms or --tiles with --tile is required"),
    };

    let points: Vec<Point> = read_json(&points)?;
    let chain = resolve(&list, &table).context("resolving transform list")?;
    let direction = if inverse { Direction::Inverse } else { Direction::Forward };
    let span = logging::ChainSpan::new("apply", chain.len());
    let mapped = map_points_with_tolerance(&chain, &points, direction, config.numerics.singular_tolerance)
        .inspect_err(|e| span.record_failure(e))
        .context("mapping points")?;
    span.record_mapped(mapped.len());

    write_json(&mapped, output.as_deref())
}

#[derive(Serialize)]
struct FitOutput {
    transform: Transform,
    residuals: Residuals,
}

fn handle_estimate(config: &Config, matches: PathBuf, kind: ModelKind, output: Option<PathBuf>) -> Result<()> {
    let matches: PointMatches = read_json(&matches)?;
    let fit = config
        .estimator()
        .estimate(kind, &matches)
        .with_context(|| format!("estimating {} model from {} matches", kind.name(), matches.len()))?;

    tracing::info!(
        model = kind.name(),
        rms = fit.residuals.rms,
        max = fit.residuals.max,
        "Estimated transform"
    );
    write_json(
        &FitOutput {
            transform: fit.model.into(),
            residuals: fit.residuals,
        },
        output.as_deref(),
    )
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TileFailure {
    tile_id: String,
    error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchReport {
    operation: &'static str,
    generated_at: DateTime<Utc>,
    tile_count: usize,
    failures: Vec<TileFailure>,
}

/// Run `op` on every tile in parallel, each under its own correlation id.
fn process_tiles<F>(resolved: &mut ResolvedTiles, config: &Config, operation: &'static str, op: F) -> Result<BatchReport>
where
    F: Fn(&ReferenceTable, &mut TileSpec) -> render_transform::Result<()> + Sync,
{
    let table = &resolved.transform_id_to_spec_map;
    let tiles = &mut resolved.tile_id_to_spec_map;
    let tile_count = tiles.len();
    let op = &op;

    let mut run = move || -> Vec<TileFailure> {
        tiles
            .par_iter_mut()
            .filter_map(|(tile_id, tile)| {
                logging::new_correlation_id();
                logging::set_tile_context(TileContext {
                    tile_id: tile_id.clone(),
                    z: Some(tile.z),
                });
                let span = render_transform::correlation_span!(
                    tracing::Level::DEBUG,
                    "tile",
                    tile_id = %tile_id,
                    operation
                );
                let result = span.in_scope(|| op(table, tile));
                if let Err(ref e) = result {
                    tracing::warn!(tile_id = %tile_id, error = %e, "Tile {} failed", operation);
                }
                logging::clear_tile_context();
                logging::clear_correlation_id();
                result.err().map(|e| TileFailure {
                    tile_id: tile_id.clone(),
                    error: e.to_string(),
                })
            })
            .collect()
    };

    let failures = if config.batch.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.batch.threads)
            .build()
            .context("building worker pool")?
            .install(run)
    } else {
        run()
    };

    tracing::info!(operation, tiles = tile_count, failed = failures.len(), "Batch finished");
    if config.batch.fail_fast {
        if let Some(first) = failures.first() {
            bail!("{} failed for tile '{}': {}", operation, first.tile_id, first.error);
        }
    }

    Ok(BatchReport {
        operation,
        generated_at: Utc::now(),
        tile_count,
        failures,
    })
}

fn finish_batch(resolved: &ResolvedTiles, report: &BatchReport, output: Option<PathBuf>, report_path: Option<PathBuf>) -> Result<()> {
    write_json(resolved, output.as_deref())?;
    if let Some(path) = report_path {
        write_json(report, Some(&path))?;
    }
    if !report.failures.is_empty() {
        eprintln!(
            "{}: {} of {} tiles failed",
            report.operation,
            report.failures.len(),
            report.tile_count
        );
    }
    Ok(())
}

fn handle_resolve(config: &Config, tiles: PathBuf, output: Option<PathBuf>, report: Option<PathBuf>) -> Result<()> {
    let mut resolved: ResolvedTiles = read_json(&tiles)?;
    let batch = process_tiles(&mut resolved, config, "resolve", |table, tile| {
        let inlined = tile.resolve(table)?.to_list();
        tile.transforms = inlined;
        Ok(())
    })?;
    finish_batch(&resolved, &batch, output, report)
}

fn handle_approximate(
    config: &Config,
    tiles: PathBuf,
    degree: Option<usize>,
    output: Option<PathBuf>,
    report: Option<PathBuf>,
) -> Result<()> {
    let mut resolved: ResolvedTiles = read_json(&tiles)?;
    let degree = degree.unwrap_or(config.approximation.degree);
    let estimator = config.estimator();
    let approximation = &config.approximation;

    let batch = process_tiles(&mut resolved, config, "approximate", |table, tile| {
        let domain = regular_grid(&tile.local_bounds(), approximation.grid_nx, approximation.grid_ny);
        let fit = {
            let chain = tile.resolve(table)?;
            if approximation.prefer_affine {
                estimator.collapse(&chain, &domain, degree)?
            } else {
                estimator
                    .approximate_as_polynomial(&chain, &domain, degree)?
                    .map(LeafModel::Polynomial)
            }
        };
        tracing::info!(
            tile_id = %tile.tile_id,
            model = %fit.model.describe(),
            rms = fit.residuals.rms,
            max = fit.residuals.max,
            "Approximated tile chain"
        );
        tile.transforms = TransformList::new(vec![fit.model.into()]);
        Ok(())
    })?;
    finish_batch(&resolved, &batch, output, report)
}

fn handle_bounds(
    config: &Config,
    tiles: PathBuf,
    samples: Option<usize>,
    output: Option<PathBuf>,
    report: Option<PathBuf>,
) -> Result<()> {
    let mut resolved: ResolvedTiles = read_json(&tiles)?;
    let samples = samples.unwrap_or(config.bounds.samples_per_edge);

    let batch = process_tiles(&mut resolved, config, "bounds", |table, tile| {
        let span = logging::ChainSpan::new("bounds", tile.transforms.len());
        let bounds = tile.update_bounds(table, samples)?;
        span.record_bounds(&bounds);
        Ok(())
    })?;
    finish_batch(&resolved, &batch, output, report)
}
