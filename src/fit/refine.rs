//! Iterative refinement: fit, prune, refit, roll back.
//!
//! The controller repeats fit rounds while they improve the reduced
//! chi-square, pruning every free coefficient the solver could not assign a
//! standard error (value pinned to zero, frozen for good). Before pruning it
//! snapshots the round's registry as the best-known state. The first round
//! that fails to improve triggers a rollback to that snapshot plus one final
//! reconciling round, so the returned output always describes the registry
//! the session ends with.

use crate::domain::{FitSessionConfig, ScanTable};
use crate::error::AppError;
use crate::fit::round::{run_round, FitOutput};
use crate::model::eval::FieldModel;
use crate::params::Registry;

/// What the refinement loop did, for reporting.
#[derive(Debug, Clone)]
pub struct RefineSummary {
    /// Fit rounds executed, the final reconciling round included.
    pub rounds: usize,
    /// Coefficients pruned across all rounds.
    pub pruned_total: usize,
    /// The last exploratory round regressed and the best state was restored.
    pub reverted: bool,
    /// Reduced chi-square of the state the session ends with.
    pub redchi: f64,
}

/// Run the refinement loop to convergence.
///
/// On return the registry holds the best-known state and the output describes
/// it. Pruning is monotonic: a coefficient frozen here is never re-freed, not
/// even by a later space rebuild.
pub fn refine(
    registry: &mut Registry,
    model: &dyn FieldModel,
    table: &ScanTable,
    config: &FitSessionConfig,
) -> Result<(FitOutput, RefineSummary), AppError> {
    let mut best_redchi = f64::INFINITY;
    let mut best_registry = registry.clone();
    let mut best_output: Option<FitOutput> = None;
    let mut rounds = 0usize;
    let mut pruned_total = 0usize;

    loop {
        let output = run_round(registry, model, table, config, false)?;
        rounds += 1;

        if output.redchi < best_redchi {
            best_redchi = output.redchi;
            best_registry = registry.clone();
            best_output = Some(output);

            let pruned = prune_unresolved(registry);
            pruned_total += pruned;
            if pruned == 0 {
                break;
            }
        } else {
            // Regression: restore the best-known state and reconcile with one
            // final round so output and registry agree.
            *registry = best_registry;
            let final_output = run_round(registry, model, table, config, false)?;
            rounds += 1;
            let redchi = final_output.redchi;
            return Ok((
                final_output,
                RefineSummary {
                    rounds,
                    pruned_total,
                    reverted: true,
                    redchi,
                },
            ));
        }
    }

    // The loop only breaks right after storing an accepted output.
    let output = best_output
        .ok_or_else(|| AppError::new(4, "Refinement ended without a completed round."))?;
    Ok((
        output,
        RefineSummary {
            rounds,
            pruned_total,
            reverted: false,
            redchi: best_redchi,
        },
    ))
}

/// Freeze every free coefficient without a resolved standard error.
fn prune_unresolved(registry: &mut Registry) -> usize {
    let keys = registry.free_keys();
    let mut pruned = 0;
    for key in &keys {
        if let Some(rec) = registry.get_mut(key) {
            if rec.vary && rec.stderr.is_none() {
                rec.value = 0.0;
                rec.vary = false;
                pruned += 1;
            }
        }
    }
    pruned
}
