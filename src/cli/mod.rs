//! Command-line parsing for the field fitter.
//!
//! The goal of this module is to keep **argument parsing** and **command
//! dispatch** separate from the modeling/math code. Seeds that have real
//! structure (cartesian terms, external sources) come from a small JSON
//! session file; everything scalar is a flag.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Deserialize;

use crate::domain::{
    CartSeed, FitSessionConfig, LossKind, ModelVersion, SolverMethod, SourceBounds, SourceSeed,
    StoreConfig,
};
use crate::error::AppError;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "bfit", version, about = "Adaptive magnetic-field harmonic fitter")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit a field model to a scan with iterative refinement.
    Fit(FitArgs),
    /// Re-evaluate a previously saved registry without fitting.
    Recreate(FitArgs),
    /// Print a previously saved registry.
    Show(ShowArgs),
    /// Generate a synthetic scan CSV for demos and testing.
    Sample(SampleArgs),
}

/// Common options for fitting and recreation.
#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Scan CSV with X,Y or R,Phi positions plus Z and Br,Bz,Bphi.
    #[arg(long)]
    pub scan: PathBuf,

    /// Calculated-reference CSV (required by versions 1000, 1005, 1006).
    #[arg(long)]
    pub calc: Option<PathBuf>,

    /// Model version.
    #[arg(long, value_enum, default_value_t = ModelVersion::V1004)]
    pub version: ModelVersion,

    /// JSON session file with structured seeds (cartesian terms, sources,
    /// bounds).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Helical pitch of coil 1.
    #[arg(long, default_value_t = 2.0)]
    pub pitch1: f64,

    /// Helical angular orders for coil 1.
    #[arg(long, default_value_t = 0)]
    pub ms_h1: usize,

    /// Helical axial modes for coil 1.
    #[arg(long, default_value_t = 0)]
    pub ns_h1: usize,

    /// Helical pitch of coil 2.
    #[arg(long, default_value_t = 3.0)]
    pub pitch2: f64,

    /// Helical angular orders for coil 2.
    #[arg(long, default_value_t = 0)]
    pub ms_h2: usize,

    /// Helical axial modes for coil 2.
    #[arg(long, default_value_t = 0)]
    pub ns_h2: usize,

    /// Axial length scale of cylindrical expansion 1.
    #[arg(long, default_value_t = 10.0)]
    pub length1: f64,

    /// Cylindrical angular orders for expansion 1.
    #[arg(long, default_value_t = 0)]
    pub ms_c1: usize,

    /// Cylindrical axial modes for expansion 1.
    #[arg(long, default_value_t = 0)]
    pub ns_c1: usize,

    /// Axial length scale of cylindrical expansion 2.
    #[arg(long, default_value_t = 12.0)]
    pub length2: f64,

    /// Cylindrical angular orders for expansion 2.
    #[arg(long, default_value_t = 0)]
    pub ms_c2: usize,

    /// Cylindrical axial modes for expansion 2.
    #[arg(long, default_value_t = 0)]
    pub ns_c2: usize,

    /// Maximum angular order for non-axisymmetric cylindrical terms
    /// (negative = unlimited).
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    pub ms_asym_max: i64,

    /// Uniform noise sigma; residuals are weighted by its inverse.
    #[arg(long)]
    pub noise: Option<f64>,

    /// Solver algorithm.
    #[arg(long, value_enum, default_value_t = SolverMethod::Leastsq)]
    pub method: SolverMethod,

    /// Robust loss (least_squares method only).
    #[arg(long, value_enum, default_value_t = LossKind::Linear)]
    pub loss: LossKind,

    /// Relative cost-decrease tolerance (least_squares method only).
    #[arg(long, default_value_t = 1e-8)]
    pub ftol: f64,

    /// Gradient tolerance (least_squares method only).
    #[arg(long, default_value_t = 1e-8)]
    pub gtol: f64,

    /// Derive cartesian Bx_fit/By_fit columns after the fit.
    #[arg(long)]
    pub cartesian: bool,

    /// Run exactly one fit round instead of the refinement loop.
    #[arg(long = "single-shot")]
    pub single_shot: bool,

    /// Attach per-sample prediction uncertainty columns after the fit.
    #[arg(long = "save-unc")]
    pub save_unc: bool,

    /// Start from a previously saved registry.
    #[arg(long = "use-existing")]
    pub use_existing: bool,

    /// Skip saving the fitted registry and correlation artifact.
    #[arg(long = "no-save")]
    pub no_save: bool,

    /// Output directory for saved artifacts.
    #[arg(long, default_value = "out")]
    pub dir: PathBuf,

    /// Base name for saved artifacts.
    #[arg(long, default_value = "field")]
    pub name: String,

    /// Base name to load a saved registry from (defaults to --name).
    #[arg(long = "load-name")]
    pub load_name: Option<String>,

    /// Export the merged scan table to this CSV.
    #[arg(long)]
    pub export: Option<PathBuf>,
}

/// Options for `bfit show`.
#[derive(Debug, Parser, Clone)]
pub struct ShowArgs {
    /// Base name of the saved registry.
    #[arg(long, default_value = "field")]
    pub name: String,

    /// Directory the registry was saved in.
    #[arg(long, default_value = "out")]
    pub dir: PathBuf,
}

/// Options for `bfit sample`.
#[derive(Debug, Parser, Clone)]
pub struct SampleArgs {
    /// Output CSV path.
    #[arg(long)]
    pub out: PathBuf,

    /// Axial grid points.
    #[arg(long, default_value_t = 50)]
    pub n_z: usize,

    /// Azimuthal grid points.
    #[arg(long, default_value_t = 8)]
    pub n_phi: usize,

    /// Grid radius.
    #[arg(long, default_value_t = 0.3)]
    pub radius: f64,

    /// Lower end of the axial range.
    #[arg(long, default_value_t = -2.0, allow_hyphen_values = true)]
    pub z_min: f64,

    /// Upper end of the axial range.
    #[arg(long, default_value_t = 2.0)]
    pub z_max: f64,

    /// Gaussian noise sigma added to every component.
    #[arg(long, default_value_t = 1e-4)]
    pub noise: f64,

    /// RNG seed.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

/// Structured seeds from the JSON session file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionFile {
    #[serde(default)]
    pub ks: Vec<CartSeed>,
    #[serde(default)]
    pub sources: Vec<SourceSeed>,
    #[serde(default)]
    pub source_bounds: Option<SourceBounds>,
    #[serde(default)]
    pub ab_lim: Option<f64>,
    #[serde(default)]
    pub k_lim: Option<f64>,
    #[serde(default)]
    pub z0: Option<f64>,
}

/// Load the JSON session file.
pub fn load_session_file(path: &std::path::Path) -> Result<SessionFile, AppError> {
    let file = std::fs::File::open(path).map_err(|e| {
        AppError::new(2, format!("Failed to open session JSON '{}': {e}", path.display()))
    })?;
    serde_json::from_reader(file)
        .map_err(|e| AppError::new(2, format!("Invalid session JSON: {e}")))
}

/// Resolve CLI flags plus the optional session file into a session config.
pub fn fit_session_config(args: &FitArgs) -> Result<FitSessionConfig, AppError> {
    let session = match &args.config {
        Some(path) => load_session_file(path)?,
        None => SessionFile::default(),
    };

    if let Some(noise) = args.noise {
        if !(noise.is_finite() && noise > 0.0) {
            return Err(AppError::new(2, "Noise sigma must be positive."));
        }
    }
    for seed in &session.ks {
        if seed.index == 0 || seed.index > 10 {
            return Err(AppError::new(
                2,
                format!("Cartesian seed index must be in 1..=10 (got {}).", seed.index),
            ));
        }
    }

    Ok(FitSessionConfig {
        version: args.version,
        pitch1: args.pitch1,
        ms_h1: args.ms_h1,
        ns_h1: args.ns_h1,
        pitch2: args.pitch2,
        ms_h2: args.ms_h2,
        ns_h2: args.ns_h2,
        length1: args.length1,
        ms_c1: args.ms_c1,
        ns_c1: args.ns_c1,
        length2: args.length2,
        ms_c2: args.ms_c2,
        ns_c2: args.ns_c2,
        ms_asym_max: args.ms_asym_max,
        ab_lim: session.ab_lim,
        k_lim: session.k_lim,
        ks: session.ks,
        sources: session.sources,
        source_bounds: session.source_bounds.unwrap_or_default(),
        z0: session.z0,
        noise: args.noise,
        method: args.method,
        loss: args.loss,
        ftol: args.ftol,
        gtol: args.gtol,
        cartesian: args.cartesian,
        save_unc: args.save_unc,
        single_shot: args.single_shot,
    })
}

/// Resolve persistence flags for a fit or recreation run.
pub fn store_config(args: &FitArgs, recreate: bool) -> StoreConfig {
    StoreConfig {
        use_existing: args.use_existing || recreate,
        recreate,
        save: !args.no_save && !recreate,
        load_name: args.load_name.clone().unwrap_or_else(|| args.name.clone()),
        save_name: args.name.clone(),
        dir: args.dir.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn fit_args_parse_with_defaults() {
        let cli = Cli::parse_from(["bfit", "fit", "--scan", "scan.csv"]);
        let Command::Fit(args) = cli.command else {
            panic!("expected fit subcommand");
        };
        assert_eq!(args.version, ModelVersion::V1004);
        assert_eq!(args.method, SolverMethod::Leastsq);
        assert_eq!(args.ms_asym_max, -1);

        let config = fit_session_config(&args).unwrap();
        assert!(config.ks.is_empty());
        assert!(config.noise.is_none());
    }

    #[test]
    fn version_flag_accepts_numeric_names() {
        let cli = Cli::parse_from(["bfit", "fit", "--scan", "s.csv", "--version", "1006"]);
        let Command::Fit(args) = cli.command else {
            panic!("expected fit subcommand");
        };
        assert_eq!(args.version, ModelVersion::V1006);
    }

    #[test]
    fn bad_cart_seed_index_is_rejected() {
        let cli = Cli::parse_from(["bfit", "fit", "--scan", "s.csv"]);
        let Command::Fit(mut args) = cli.command else {
            panic!("expected fit subcommand");
        };
        let path = std::env::temp_dir().join(format!("bfit-session-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"ks": [{"index": 11, "value": 0.0}]}"#).unwrap();
        args.config = Some(path.clone());
        let err = fit_session_config(&args).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn recreate_store_config_loads_and_never_saves() {
        let cli = Cli::parse_from(["bfit", "recreate", "--scan", "s.csv", "--name", "run7"]);
        let Command::Recreate(args) = cli.command else {
            panic!("expected recreate subcommand");
        };
        let store = store_config(&args, true);
        assert!(store.use_existing);
        assert!(store.recreate);
        assert!(!store.save);
        assert_eq!(store.load_name, "run7");
    }
}
