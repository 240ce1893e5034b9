//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - runs the fit/recreation pipeline
//! - prints reports
//! - writes optional exports

use clap::Parser;

use crate::cli::{fit_session_config, store_config, Cli, Command, FitArgs, SampleArgs, ShowArgs};
use crate::error::AppError;

pub mod pipeline;

/// Entry point for the `bfit` binary.
pub fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    match cli.command {
        Command::Fit(args) => handle_session(args, false),
        Command::Recreate(args) => handle_session(args, true),
        Command::Show(args) => handle_show(args),
        Command::Sample(args) => handle_sample(args),
    }
}

fn handle_session(args: FitArgs, recreate: bool) -> Result<(), AppError> {
    let config = fit_session_config(&args)?;
    let store_cfg = store_config(&args, recreate);

    let run = pipeline::run_session(&args.scan, args.calc.as_deref(), &config, &store_cfg)?;

    println!("{}", crate::report::format_session_summary(&run.scan, &config));
    let row_report = crate::report::format_row_errors(&run.scan.row_errors, run.scan.rows_read);
    if !row_report.is_empty() {
        print!("{row_report}");
    }
    println!("{}", crate::report::format_fit_report(&run.output));
    if let Some(ref summary) = run.summary {
        println!("{}", crate::report::format_refine_summary(summary));
    }

    if let Some(ref path) = args.export {
        crate::io::export::write_scan_csv(path, &run.scan.table)?;
        println!("Exported merged table to {}", path.display());
    }
    if store_cfg.save {
        println!(
            "Saved registry to {}",
            crate::io::store::ParamStore::new(&store_cfg.dir)
                .registry_path(&store_cfg.save_name)
                .display()
        );
    }
    Ok(())
}

fn handle_show(args: ShowArgs) -> Result<(), AppError> {
    let store = crate::io::store::ParamStore::new(&args.dir);
    let (registry, version) = store.load_registry(&args.name)?;
    println!("Registry '{}' (version {version})\n", args.name);
    println!("{}", crate::report::format_registry(&registry));
    Ok(())
}

fn handle_sample(args: SampleArgs) -> Result<(), AppError> {
    let spec = crate::data::SyntheticSpec {
        n_z: args.n_z,
        n_phi: args.n_phi,
        radius: args.radius,
        z_min: args.z_min,
        z_max: args.z_max,
        noise: args.noise,
        seed: args.seed,
    };
    let scan = crate::data::generate_scan(&spec, &crate::data::demo_truth())?;
    crate::io::export::write_scan_csv(&args.out, &scan.table)?;
    println!(
        "Wrote {} synthetic samples to {}",
        scan.table.len(),
        args.out.display()
    );
    Ok(())
}
