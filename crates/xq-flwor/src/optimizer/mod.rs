//! Rewrite engine: structural passes over FLWOR pipelines, run to a fixpoint.
//!
//! Every round re-derives variable types, then walks the query bottom-up.
//! Each pipeline is rewritten one step at a time: the first enabled pass that
//! changes something wins, facts are recomputed and the passes start over. A
//! round without any change ends optimization; `max_iterations` bounds both
//! the number of rounds and the steps per pipeline and round.
//!
//! A pipeline whose invariants do not hold after rewriting is restored to its
//! state before the round (and trips a debug assertion).
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::analyze::{PipelineFacts, analyze};
use crate::ir::typing::infer_var_types;
use crate::ir::{Expr, Pipeline, Query, VarTable, validate_pipeline};
use crate::runtime::Error;

mod eliminate;
mod inline;
mod motion;
mod predicate;
mod simplify;

/// Individual rewrites, in the order they are tried on a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Pass {
    /// Constant folding of expressions with literal operands.
    Simplify,
    /// Dead and empty clause elimination.
    Eliminate,
    /// `for` over exactly one item becomes a binding; a `typeswitch` over one
    /// item of known type is resolved.
    Preevaluate,
    /// Substitution and removal of `let` clauses.
    InlineLet,
    /// Splicing of nested pipelines into the enclosing one.
    Flatten,
    /// `let`/`where` hoisting and `let` sinking.
    Motion,
    /// Adjacent `where` clauses become one conjunction.
    MergeWheres,
    /// `where` right after a `for` becomes a filter on its source.
    WhereToPredicate,
    /// Leading `where` becomes a conditional around the pipeline.
    WhereToIf,
    /// `for $x in E return $x` becomes `E`.
    InlineFor,
    /// `for` whose variable is unused becomes a replicated return.
    Replicate,
}

impl Pass {
    pub const ALL: [Pass; 11] = [
        Pass::Simplify,
        Pass::Eliminate,
        Pass::Preevaluate,
        Pass::InlineLet,
        Pass::Flatten,
        Pass::Motion,
        Pass::MergeWheres,
        Pass::WhereToPredicate,
        Pass::WhereToIf,
        Pass::InlineFor,
        Pass::Replicate,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Pass::Simplify => "simplify",
            Pass::Eliminate => "eliminate",
            Pass::Preevaluate => "preevaluate",
            Pass::InlineLet => "inline-let",
            Pass::Flatten => "flatten",
            Pass::Motion => "motion",
            Pass::MergeWheres => "merge-wheres",
            Pass::WhereToPredicate => "where-to-predicate",
            Pass::WhereToIf => "where-to-if",
            Pass::InlineFor => "inline-for",
            Pass::Replicate => "replicate",
        }
    }
}

impl core::fmt::Display for Pass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizerConfig {
    pub max_iterations: usize,
    disabled: SmallVec<[Pass; 4]>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_iterations: 32, disabled: SmallVec::new() }
    }
}

impl OptimizerConfig {
    pub fn builder() -> OptimizerConfigBuilder {
        OptimizerConfigBuilder::default()
    }

    pub fn is_enabled(&self, pass: Pass) -> bool {
        !self.disabled.contains(&pass)
    }
}

#[derive(Debug, Clone, Default)]
pub struct OptimizerConfigBuilder {
    config: OptimizerConfig,
}

impl OptimizerConfigBuilder {
    #[must_use]
    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.config.max_iterations = n.max(1);
        self
    }

    #[must_use]
    pub fn without_pass(mut self, pass: Pass) -> Self {
        if !self.config.disabled.contains(&pass) {
            self.config.disabled.push(pass);
        }
        self
    }

    /// Enable exactly the given passes.
    #[must_use]
    pub fn only_passes(mut self, passes: &[Pass]) -> Self {
        self.config.disabled = Pass::ALL.into_iter().filter(|p| !passes.contains(p)).collect();
        self
    }

    pub fn build(self) -> OptimizerConfig {
        self.config
    }
}

/// What an optimizer run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizeReport {
    pub rounds: usize,
    /// Every applied rewrite, in order.
    pub applied: Vec<Pass>,
    /// The round cap was reached while rewrites were still being applied.
    pub hit_cap: bool,
}

impl OptimizeReport {
    pub fn rewrites(&self) -> usize {
        self.applied.len()
    }

    pub fn count(&self, pass: Pass) -> usize {
        self.applied.iter().filter(|p| **p == pass).count()
    }
}

/// Outcome of one rewrite attempt on a pipeline.
pub(crate) enum Step {
    Unchanged,
    Changed,
    /// The whole pipeline expression is replaced.
    Replace(Expr),
}

impl Step {
    fn is_unchanged(&self) -> bool {
        matches!(self, Step::Unchanged)
    }
}

type PassFn = fn(&mut Pipeline, &PipelineFacts, &mut VarTable) -> Step;

const PIPELINE_PASSES: [(Pass, PassFn); 10] = [
    (Pass::Eliminate, eliminate::eliminate),
    (Pass::Preevaluate, eliminate::preevaluate),
    (Pass::InlineLet, inline::inline_lets),
    (Pass::Flatten, inline::flatten),
    (Pass::Motion, motion::motion),
    (Pass::MergeWheres, predicate::merge_wheres),
    (Pass::WhereToPredicate, predicate::where_to_predicate),
    (Pass::WhereToIf, predicate::where_to_if),
    (Pass::InlineFor, inline::inline_for),
    (Pass::Replicate, inline::replicate),
];

#[derive(Debug, Clone, Default)]
pub struct Optimizer {
    config: OptimizerConfig,
}

impl Optimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Rewrite `query` in place until no pass applies or the cap is reached.
    pub fn optimize(&self, query: &mut Query) -> OptimizeReport {
        let mut report = OptimizeReport::default();
        for round in 0..self.config.max_iterations {
            infer_var_types(query);
            let Query { vars, body } = query;
            let mut rw = Rewriter { config: &self.config, vars, applied: Vec::new() };
            let changed = rw.expr(body);
            report.rounds = round + 1;
            trace!(round, rewrites = rw.applied.len(), "optimizer round finished");
            report.applied.append(&mut rw.applied);
            if !changed {
                return report;
            }
        }
        report.hit_cap = true;
        debug!(rounds = report.rounds, "optimizer stopped at the iteration cap");
        report
    }
}

/// Optimize with the default configuration.
pub fn optimize(query: &mut Query) -> OptimizeReport {
    Optimizer::default().optimize(query)
}

struct Rewriter<'q> {
    config: &'q OptimizerConfig,
    vars: &'q mut VarTable,
    applied: Vec<Pass>,
}

/// Validate every pipeline in `e`, nested ones included.
fn validate_all(e: &Expr) -> Result<(), Error> {
    let mut result = Ok(());
    e.walk(&mut |x| {
        if let Expr::Flwor(p) = x
            && result.is_ok()
        {
            result = validate_pipeline(p);
        }
    });
    result
}

impl Rewriter<'_> {
    /// Rewrite `e` bottom-up; returns whether anything changed.
    fn expr(&mut self, e: &mut Expr) -> bool {
        let mut changed = false;
        for child in e.children_mut() {
            changed |= self.expr(child);
        }
        if self.config.is_enabled(Pass::Simplify) && simplify::fold(e, self.vars) {
            self.applied.push(Pass::Simplify);
            changed = true;
        }
        if self.config.is_enabled(Pass::Preevaluate) && eliminate::preevaluate_typeswitch(e, self.vars) {
            self.applied.push(Pass::Preevaluate);
            changed = true;
        }
        if matches!(e, Expr::Flwor(_)) {
            changed |= self.pipeline(e);
        }
        changed
    }

    fn pipeline(&mut self, e: &mut Expr) -> bool {
        if let Err(err) = validate_all(e) {
            warn!(%err, "pipeline violates its invariants; left unoptimized");
            return false;
        }
        let snapshot = e.clone();
        let logged = self.applied.len();
        let mut changed = false;
        for _ in 0..self.config.max_iterations {
            let Expr::Flwor(p) = e else {
                break;
            };
            match self.step(p) {
                Step::Unchanged => break,
                Step::Changed => changed = true,
                Step::Replace(new) => {
                    *e = new;
                    changed = true;
                }
            }
        }
        if changed && let Err(err) = validate_all(e) {
            debug_assert!(false, "rewrite broke pipeline invariants: {err}");
            warn!(%err, "rewrite broke pipeline invariants; restored");
            *e = snapshot;
            self.applied.truncate(logged);
            return false;
        }
        changed
    }

    fn step(&mut self, p: &mut Pipeline) -> Step {
        let facts = analyze(p);
        if facts.any_updating() {
            // updating pipelines only lose literally true filters
            let step = eliminate::drop_true_wheres(p);
            if !step.is_unchanged() {
                self.applied.push(Pass::Eliminate);
            }
            return step;
        }
        for (pass, run) in PIPELINE_PASSES {
            if !self.config.is_enabled(pass) {
                continue;
            }
            let step = run(p, &facts, self.vars);
            if !step.is_unchanged() {
                self.applied.push(pass);
                return step;
            }
        }
        Step::Unchanged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_disables_passes() {
        let cfg = OptimizerConfig::builder().with_max_iterations(4).without_pass(Pass::Motion).build();
        assert_eq!(cfg.max_iterations, 4);
        assert!(!cfg.is_enabled(Pass::Motion));
        assert!(cfg.is_enabled(Pass::Eliminate));
        let only = OptimizerConfig::builder().only_passes(&[Pass::Eliminate]).build();
        assert!(only.is_enabled(Pass::Eliminate));
        assert!(!only.is_enabled(Pass::Simplify));
    }
}
