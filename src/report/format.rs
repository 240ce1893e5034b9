//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the fit/refinement code stays clean and testable
//! - output changes are localized

use crate::domain::{FitSessionConfig, SolverMethod};
use crate::fit::refine::RefineSummary;
use crate::fit::round::FitOutput;
use crate::io::ingest::{IngestedScan, RowError};
use crate::params::Registry;

/// Format the session header: scan stats plus the resolved configuration.
pub fn format_session_summary(scan: &IngestedScan, config: &FitSessionConfig) -> String {
    let mut out = String::new();

    out.push_str("=== bfit - Magnetic Field Harmonic Fit ===\n");
    out.push_str(&format!("Version: {}\n", config.version.id()));
    out.push_str(&format!(
        "Method: {} | loss: {:?}\n",
        method_name(config.method),
        config.loss
    ));
    out.push_str(&format!(
        "Scan: n={} | z=[{:.3}, {:.3}] | r_max={:.3}\n",
        scan.stats.n_samples, scan.stats.z_min, scan.stats.z_max, scan.stats.r_max
    ));
    out.push_str(&format!(
        "Orders: hel {}x{} / {}x{} | cyl {}x{} / {}x{} | asym limit {}\n",
        config.ms_h1,
        config.ns_h1,
        config.ms_h2,
        config.ns_h2,
        config.ms_c1,
        config.ns_c1,
        config.ms_c2,
        config.ns_c2,
        if config.ms_asym_max < 0 {
            "none".to_string()
        } else {
            config.ms_asym_max.to_string()
        },
    ));
    if let Some(noise) = config.noise {
        out.push_str(&format!("Noise sigma: {noise:.3e}\n"));
    }
    out
}

/// Format skipped-row diagnostics from ingest.
pub fn format_row_errors(errors: &[RowError], rows_read: usize) -> String {
    if errors.is_empty() {
        return String::new();
    }
    let mut out = format!("Skipped {} of {} rows:\n", errors.len(), rows_read);
    for e in errors.iter().take(10) {
        out.push_str(&format!("  line {}: {}\n", e.line, e.message));
    }
    if errors.len() > 10 {
        out.push_str(&format!("  ... and {} more\n", errors.len() - 10));
    }
    out
}

/// Format the outcome of one fit (or recreation) round.
pub fn format_fit_report(output: &FitOutput) -> String {
    let mut out = String::new();
    out.push_str("\nFit result:\n");
    out.push_str(&format!(
        "  chi-square: {:.6e} | reduced: {:.6e}\n",
        output.chisqr, output.redchi
    ));
    out.push_str(&format!(
        "  evaluations: {} | elapsed: {:.2}s\n",
        output.n_evals, output.elapsed
    ));
    let frozen = output.params.len() - output.var_names.len();
    out.push_str(&format!(
        "  free coefficients: {} | frozen: {frozen}\n",
        output.var_names.len()
    ));

    if !output.var_names.is_empty() {
        out.push_str("\n  name          value           stderr\n");
        for key in &output.var_names {
            let Some(rec) = output.params.get(key) else { continue };
            let stderr = match rec.stderr {
                Some(s) => format!("{s:.6e}"),
                None => "--".to_string(),
            };
            out.push_str(&format!(
                "  {:<12}  {:>14.6e}  {}\n",
                truncate(&key.name(), 12),
                rec.value,
                stderr
            ));
        }
    }
    out
}

/// Format the refinement loop summary.
pub fn format_refine_summary(summary: &RefineSummary) -> String {
    let mut out = String::new();
    out.push_str("\nRefinement:\n");
    out.push_str(&format!("  rounds: {}\n", summary.rounds));
    out.push_str(&format!("  pruned: {}\n", summary.pruned_total));
    if summary.reverted {
        out.push_str("  last round regressed; best state restored\n");
    }
    out.push_str(&format!("  final reduced chi-square: {:.6e}\n", summary.redchi));
    out
}

/// Format a full registry listing (for `bfit show`).
pub fn format_registry(registry: &Registry) -> String {
    let mut out = String::new();
    out.push_str(&format!("{} coefficients ({} free)\n\n", registry.len(), registry.n_free()));
    out.push_str("name          state  value           stderr\n");
    for (key, rec) in registry.iter() {
        let state = if rec.vary { "free " } else { "fixed" };
        let stderr = match rec.stderr {
            Some(s) => format!("{s:.6e}"),
            None => "--".to_string(),
        };
        out.push_str(&format!(
            "{:<12}  {state}  {:>14.6e}  {}\n",
            truncate(&key.name(), 12),
            rec.value,
            stderr
        ));
    }
    out
}

fn method_name(method: SolverMethod) -> &'static str {
    match method {
        SolverMethod::Leastsq => "leastsq",
        SolverMethod::LeastSquares => "least_squares",
        SolverMethod::Brute => "brute",
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}..", &s[..max.saturating_sub(2)])
    }
}
