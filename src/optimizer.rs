// src/optimizer.rs

//! Preconditioned L-BFGS iteration over the unmixing matrix.

use crate::config::IcaConfig;
use crate::density::ComponentSignStats;
use crate::error::Result;
use crate::lbfgs::CurvaturePairHistory;
use crate::line_search::{LineSearch, LineSearchOutcome};
use crate::math::{frobenius_inner, orthogonality_error};
use crate::objective::{Gradient, Objective};
use crate::preconditioner::BlockPreconditioner;
use ndarray::{Array1, Array2};
use std::fmt;
use std::time::Instant;

/// Failed iterations in a row after which the run is abandoned.
const MAX_CONSECUTIVE_FAILURES: usize = 2;

/// Initial step of the steepest-descent retry.
const RETRY_STEP: f64 = 0.5;

/// Lifecycle of one optimization run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptimizerState {
    Initializing,
    Iterating,
    Converged,
    Diverged,
    BudgetExhausted,
}

/// Why a run stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminationReason {
    /// The projected gradient fell below the tolerance.
    Converged,
    /// `max_iter` or the wall-clock budget ran out first.
    BudgetExhausted,
    /// No acceptable step could be found twice in a row, or the iterate
    /// became degenerate.
    Diverged,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TerminationReason::Converged => "converged",
            TerminationReason::BudgetExhausted => "budget exhausted",
            TerminationReason::Diverged => "diverged",
        };
        f.write_str(name)
    }
}

/// Progress of a run.
#[derive(Clone, Debug)]
pub struct ConvergenceState {
    pub iteration: usize,
    /// Max-abs entry of the last projected gradient.
    pub gradient_norm: f64,
    pub loss: f64,
    pub state: OptimizerState,
}

impl Default for ConvergenceState {
    fn default() -> Self {
        Self {
            iteration: 0,
            gradient_norm: f64::INFINITY,
            loss: f64::INFINITY,
            state: OptimizerState::Initializing,
        }
    }
}

impl ConvergenceState {
    fn termination(&self) -> TerminationReason {
        match self.state {
            OptimizerState::Converged => TerminationReason::Converged,
            OptimizerState::Diverged => TerminationReason::Diverged,
            _ => TerminationReason::BudgetExhausted,
        }
    }
}

/// What happened to the step of an iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepEvent {
    /// The quasi-Newton step was accepted.
    Accepted,
    /// The quasi-Newton step failed; the steepest-descent retry was accepted.
    Recovered,
    /// Extended-model signs flipped; the step was taken on the new loss.
    SignsChanged,
    /// Both searches failed; the iterate is unchanged.
    Rejected,
}

/// One entry of the run trace.
#[derive(Clone, Debug)]
pub struct IterationRecord {
    pub iteration: usize,
    /// Loss after the step.
    pub loss: f64,
    /// Gradient norm at the start of the iteration.
    pub gradient_norm: f64,
    /// Accepted step length, 0 for rejected iterations.
    pub step_size: f64,
    /// `‖W·Wᵀ − I‖_max` after the step.
    pub orthogonality_error: f64,
    pub event: StepEvent,
}

/// Everything a run produces.
#[derive(Clone, Debug)]
pub struct OptimizerOutcome {
    pub unmixing: Array2<f64>,
    pub sources: Array2<f64>,
    pub termination: TerminationReason,
    pub n_iter: usize,
    /// Loss at the initial point and after every accepted step.
    pub loss_history: Vec<f64>,
    pub trace: Vec<IterationRecord>,
    pub final_loss: f64,
    pub gradient_norm: f64,
    /// Final component signs, extended model only.
    pub signs: Option<Array1<f64>>,
}

struct Evaluation {
    gradient: Gradient,
    loss: f64,
    signs_changed: bool,
}

/// State of the run after an iteration whose searches both failed.
///
/// `failures` counts consecutive failed iterations including this one. Below
/// `√tol` there is no representable decrease left and the run has converged.
fn after_rejected_iteration(gradient_norm: f64, tol: f64, failures: usize) -> OptimizerState {
    if gradient_norm < tol.sqrt() {
        OptimizerState::Converged
    } else if failures >= MAX_CONSECUTIVE_FAILURES {
        OptimizerState::Diverged
    } else {
        OptimizerState::Iterating
    }
}

/// Runs one optimization from a given starting matrix.
///
/// All run state (curvature memory, sign statistics, trace) lives on the
/// stack of [`LimitedMemoryOptimizer::run`], so one optimizer can serve
/// several concurrent runs.
pub struct LimitedMemoryOptimizer<'a> {
    config: &'a IcaConfig,
}

impl<'a> LimitedMemoryOptimizer<'a> {
    pub fn new(config: &'a IcaConfig) -> Self {
        Self { config }
    }

    fn objective(&self) -> Objective<'a> {
        Objective::new(
            &self.config.nonlinearity,
            self.config.ortho,
            self.config.density.is_extended(),
        )
    }

    /// Density statistics, sign refresh, loss (when stale) and gradient at `w`.
    fn evaluate(
        &self,
        objective: &Objective<'_>,
        y: &Array2<f64>,
        w: &Array2<f64>,
        sign_stats: &mut ComponentSignStats,
        state: &ConvergenceState,
        loss: f64,
    ) -> Result<Evaluation> {
        let stats = objective.score_stats(y)?;
        let signs_changed = sign_stats.refresh(
            state.iteration,
            state.gradient_norm,
            &stats.score_der_mean,
            &stats.second_moment,
            &stats.score_moment(),
        );

        let loss = if signs_changed || state.iteration == 0 {
            objective.loss(y, w, sign_stats.signs())?
        } else {
            loss
        };

        let gradient = objective.gradient(y, stats, sign_stats.signs())?;
        Ok(Evaluation {
            gradient,
            loss,
            signs_changed,
        })
    }

    /// Search along `direction`, then once along `−G` from `RETRY_STEP`.
    ///
    /// Returns the accepted step with `Accepted` or `Recovered`, or `None` when
    /// both searches failed.
    #[allow(clippy::too_many_arguments)]
    fn search_with_retry(
        &self,
        search: &LineSearch,
        objective: &Objective<'_>,
        x: &Array2<f64>,
        w: &Array2<f64>,
        signs: &Array1<f64>,
        grad: &Gradient,
        direction: &Array2<f64>,
        loss: f64,
    ) -> Result<Option<(LineSearchOutcome, StepEvent)>> {
        let slope = frobenius_inner(&grad.projected, direction);
        match search.search(objective, x, w, signs, direction, loss, slope, 1.0) {
            Ok(outcome) => return Ok(Some((outcome, StepEvent::Accepted))),
            Err(e) if e.is_recoverable() => {
                log::debug!("[lbfgs-ica] {e}; retrying along the gradient");
            }
            Err(e) => return Err(e),
        }

        let fallback = -&grad.projected;
        let fallback_slope = frobenius_inner(&grad.projected, &fallback);
        match search.search(objective, x, w, signs, &fallback, loss, fallback_slope, RETRY_STEP) {
            Ok(outcome) => Ok(Some((outcome, StepEvent::Recovered))),
            Err(e) if e.is_recoverable() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Optimize starting from `w_init` on whitened data `x`.
    ///
    /// Degenerate iterates end the run as `Diverged` with the last good
    /// matrix; only non-recoverable errors are returned.
    pub fn run(&self, x: &Array2<f64>, w_init: Array2<f64>) -> Result<OptimizerOutcome> {
        let config = self.config;
        let n = x.nrows();
        let ortho = config.ortho;
        let extended = config.density.is_extended();
        let level = if config.verbose {
            log::Level::Info
        } else {
            log::Level::Debug
        };

        let objective = self.objective();
        let search = LineSearch::new(config.ls_tries);
        let mut history = CurvaturePairHistory::new(config.memory, n);
        let mut sign_stats = if extended {
            ComponentSignStats::new(n, config.sign_refresh, config.sign_freeze_tol)
        } else {
            ComponentSignStats::fixed(n)
        };

        let mut w = w_init;
        let mut y = w.dot(x);
        let mut state = ConvergenceState::default();
        let mut loss_history = Vec::new();
        let mut trace = Vec::new();
        let mut g_old: Option<Array2<f64>> = None;
        let mut last_step: Option<Array2<f64>> = None;
        let mut failures = 0;
        let started = Instant::now();

        state.state = OptimizerState::Iterating;
        loop {
            let evaluation =
                match self.evaluate(&objective, &y, &w, &mut sign_stats, &state, state.loss) {
                    Ok(evaluation) => evaluation,
                    Err(e) if e.is_recoverable() => {
                        log::warn!(
                            "[lbfgs-ica] iterate became degenerate at iteration {}: {}",
                            state.iteration,
                            e
                        );
                        state.state = OptimizerState::Diverged;
                        break;
                    }
                    Err(e) => return Err(e),
                };
            let Evaluation {
                gradient: grad,
                loss,
                signs_changed,
            } = evaluation;

            if state.iteration == 0 {
                loss_history.push(loss);
            }
            if signs_changed {
                log::debug!(
                    "[lbfgs-ica] component signs changed at iteration {}: {:?}",
                    state.iteration,
                    sign_stats.signs().to_vec()
                );
                history.clear();
                g_old = None;
                last_step = None;
            }
            state.loss = loss;
            state.gradient_norm = grad.norm;

            if grad.norm < config.tol {
                state.state = OptimizerState::Converged;
                break;
            }

            if state.iteration >= config.max_iter {
                state.state = OptimizerState::BudgetExhausted;
                break;
            }
            if let Some(limit) = config.timeout {
                if started.elapsed() >= limit {
                    log::warn!(
                        "[lbfgs-ica] timeout of {:?} reached after {} iterations",
                        limit,
                        state.iteration
                    );
                    state.state = OptimizerState::BudgetExhausted;
                    break;
                }
            }

            if let (Some(g_prev), Some(step)) = (g_old.as_ref(), last_step.as_ref()) {
                let grad_diff = &grad.projected - g_prev;
                if !history.push(step, &grad_diff) {
                    log::trace!(
                        "[lbfgs-ica] skipped curvature pair at iteration {}",
                        state.iteration
                    );
                }
            }

            let preconditioner = if ortho {
                BlockPreconditioner::orthogonal(&grad.curvature, config.lambda_min)
            } else {
                BlockPreconditioner::general(&grad.curvature, config.hessian, config.lambda_min)
            };
            if preconditioner.regularized_blocks() > 0 {
                log::trace!(
                    "[lbfgs-ica] regularized {} Hessian blocks",
                    preconditioner.regularized_blocks()
                );
            }

            let mut direction = history.direction(&grad.projected, &preconditioner, ortho);
            if !(frobenius_inner(&grad.projected, &direction) < 0.0) {
                log::debug!(
                    "[lbfgs-ica] L-BFGS direction is not a descent direction at iteration {}; \
                     using the preconditioned gradient",
                    state.iteration
                );
                history.clear();
                direction = -preconditioner.apply(&grad.projected);
            }

            let accepted = self.search_with_retry(
                &search,
                &objective,
                x,
                &w,
                sign_stats.signs(),
                &grad,
                &direction,
                loss,
            )?;
            let accepted = accepted.map(|(outcome, event)| match event {
                StepEvent::Accepted if signs_changed => (outcome, StepEvent::SignsChanged),
                _ => (outcome, event),
            });
            if !matches!(accepted, Some((_, StepEvent::Accepted | StepEvent::SignsChanged))) {
                history.clear();
            }

            state.iteration += 1;
            match accepted {
                Some((outcome, event)) => {
                    log::trace!(
                        "[lbfgs-ica] step {:.3e} accepted after {} trials",
                        outcome.alpha,
                        outcome.tries
                    );
                    failures = 0;
                    w = outcome.w;
                    y = outcome.y;
                    state.loss = outcome.loss;
                    loss_history.push(outcome.loss);
                    trace.push(IterationRecord {
                        iteration: state.iteration,
                        loss: outcome.loss,
                        gradient_norm: grad.norm,
                        step_size: outcome.alpha,
                        orthogonality_error: orthogonality_error(&w),
                        event,
                    });
                    last_step = Some(outcome.step);
                    g_old = Some(grad.projected);
                }
                None => {
                    trace.push(IterationRecord {
                        iteration: state.iteration,
                        loss,
                        gradient_norm: grad.norm,
                        step_size: 0.0,
                        orthogonality_error: orthogonality_error(&w),
                        event: StepEvent::Rejected,
                    });
                    last_step = None;
                    g_old = None;

                    failures += 1;
                    state.state = after_rejected_iteration(grad.norm, config.tol, failures);
                    match state.state {
                        OptimizerState::Converged => {
                            log::debug!(
                                "[lbfgs-ica] no representable decrease left at gradient norm \
                                 {:.3e}; treating as converged",
                                grad.norm
                            );
                            break;
                        }
                        OptimizerState::Diverged => {
                            log::warn!(
                                "[lbfgs-ica] line search failed in {} consecutive iterations \
                                 (gradient norm {:.3e}); returning the last accepted iterate",
                                failures,
                                grad.norm
                            );
                            break;
                        }
                        _ => {}
                    }
                }
            }

            log::log!(
                level,
                "[lbfgs-ica] iteration {}, gradient norm = {:.4e}, loss = {:.4e}",
                state.iteration,
                state.gradient_norm,
                state.loss
            );
        }

        let termination = state.termination();
        if extended {
            log::debug!(
                "[lbfgs-ica] final kurtosis proxy {:?} (signs frozen: {})",
                sign_stats.kurtosis().to_vec(),
                sign_stats.is_frozen()
            );
        }
        if termination == TerminationReason::BudgetExhausted {
            log::warn!(
                "[lbfgs-ica] stopped after {} iterations without converging (gradient norm {:.3e})",
                state.iteration,
                state.gradient_norm
            );
        }

        Ok(OptimizerOutcome {
            unmixing: w,
            sources: y,
            termination,
            n_iter: state.iteration,
            loss_history,
            trace,
            final_loss: state.loss,
            gradient_norm: state.gradient_norm,
            signs: extended.then(|| sign_stats.signs().clone()),
        })
    }
}
