//! The shared fit-session pipeline.
//!
//! One place owns the workflow used by both `bfit fit` and `bfit recreate`:
//! ingest -> version policy -> registry (fresh or loaded) -> space build ->
//! refinement (or a single recreation round) -> derived columns ->
//! persistence. The command handlers only add presentation.

use std::path::Path;

use crate::domain::{FitSessionConfig, StoreConfig};
use crate::error::AppError;
use crate::fit::analyze::{correlation_artifact, merge_fit_columns, prediction_uncertainty};
use crate::fit::refine::{refine, RefineSummary};
use crate::fit::round::{run_round, FitOutput};
use crate::fit::space::build_space;
use crate::io::ingest::{load_calc_data, load_scan, IngestedScan};
use crate::io::store::ParamStore;
use crate::model::eval::SolenoidHarmonics;
use crate::model::version::VersionSpec;
use crate::params::Registry;

/// All computed outputs of one session.
pub struct SessionOutput {
    /// The ingested scan with whatever derived columns the session attached.
    pub scan: IngestedScan,
    pub registry: Registry,
    pub output: FitOutput,
    /// Present for refinement sessions; recreation and single-shot runs
    /// execute one round and carry no summary.
    pub summary: Option<RefineSummary>,
}

/// Execute a full fit or recreation session.
pub fn run_session(
    scan_path: &Path,
    calc_path: Option<&Path>,
    config: &FitSessionConfig,
    store_cfg: &StoreConfig,
) -> Result<SessionOutput, AppError> {
    let mut scan = load_scan(scan_path)?;
    let calc = match calc_path {
        Some(path) => Some(load_calc_data(path)?),
        None => None,
    };

    let spec = VersionSpec::lookup(config.version);
    let model = SolenoidHarmonics::new(spec, &scan.table, calc)?;

    let store = ParamStore::new(&store_cfg.dir);
    let mut registry = if store_cfg.use_existing {
        let (registry, saved_version) = store.load_registry(&store_cfg.load_name)?;
        if saved_version != config.version.id() {
            eprintln!(
                "Warning: saved registry was fitted with version {saved_version}, running version {}.",
                config.version.id()
            );
        }
        registry
    } else {
        Registry::new()
    };

    build_space(&mut registry, config, &spec, store_cfg.recreate)?;

    let (output, summary) = if store_cfg.recreate {
        let output = run_round(&mut registry, &model, &scan.table, config, true)?;
        (output, None)
    } else if config.single_shot {
        let output = run_round(&mut registry, &model, &scan.table, config, false)?;
        (output, None)
    } else {
        let (output, summary) = refine(&mut registry, &model, &scan.table, config)?;
        (output, Some(summary))
    };

    merge_fit_columns(&mut scan.table, &output, config.cartesian)?;
    if config.save_unc {
        scan.table.unc = prediction_uncertainty(&model, &output)?;
    }

    if store_cfg.save {
        store.save_registry(&store_cfg.save_name, &registry, config.version.id())?;
        store.store_correlation_outcome(&store_cfg.save_name, correlation_artifact(&output))?;
    }

    Ok(SessionOutput {
        scan,
        registry,
        output,
        summary,
    })
}
