//! Per-clause dependency facts.
//!
//! Pure function of the pipeline; the optimizer recomputes it after every
//! structural change instead of patching it.
use std::collections::BTreeSet;

use smallvec::SmallVec;

use crate::ir::{Clause, ClauseKind, Expr, Pipeline, VarId, VarUse};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClauseFacts {
    pub kind: ClauseKind,
    pub reads: BTreeSet<VarId>,
    pub writes: SmallVec<[VarId; 4]>,
    pub deterministic: bool,
    pub constructs: bool,
    pub updating: bool,
    /// Binds a positional variable.
    pub positional: bool,
    /// For a `Let`: the variable is referenced at most once downstream, with
    /// no clause or expression in between that changes how often it is evaluated.
    pub single_use: bool,
}

impl ClauseFacts {
    /// Deterministic, non-constructing, non-updating: may be moved or dropped.
    ///
    /// Such a clause can still raise a dynamic error, and moving or dropping it
    /// may decide whether that error is raised.
    pub fn is_movable(&self) -> bool {
        self.deterministic && !self.constructs && !self.updating
    }

    fn of_exprs<'a>(kind: ClauseKind, exprs: impl IntoIterator<Item = &'a Expr>) -> Self {
        let exprs = exprs.into_iter().collect::<Vec<_>>();
        ClauseFacts {
            kind,
            reads: BTreeSet::new(),
            writes: SmallVec::new(),
            deterministic: exprs.iter().all(|e| e.is_deterministic()),
            constructs: exprs.iter().any(|e| e.constructs()),
            updating: exprs.iter().any(|e| e.is_updating()),
            positional: false,
            single_use: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineFacts {
    pub clauses: Vec<ClauseFacts>,
    /// Facts of the return expression (kind `Return`, no writes).
    pub ret: ClauseFacts,
}

impl PipelineFacts {
    pub fn any_updating(&self) -> bool {
        self.ret.updating || self.clauses.iter().any(|c| c.updating)
    }

    pub fn all_deterministic(&self) -> bool {
        self.ret.deterministic && self.clauses.iter().all(|c| c.deterministic)
    }

    /// Index of the clause introducing `var`, if it belongs to this pipeline.
    pub fn writer_of(&self, var: VarId) -> Option<usize> {
        self.clauses.iter().position(|c| c.writes.contains(&var))
    }

    /// Smallest index a clause at `i` reading `reads` may be hoisted to:
    /// just after its last in-pipeline dependency and after the last barrier.
    pub fn hoist_floor(&self, reads: &BTreeSet<VarId>, i: usize) -> usize {
        let dep = reads.iter().filter_map(|v| self.writer_of(*v)).filter(|w| *w < i).max().map_or(0, |w| w + 1);
        let barrier = self.clauses[..i]
            .iter()
            .rposition(|c| matches!(c.kind, ClauseKind::Group | ClauseKind::OrderBy))
            .map_or(0, |b| b + 1);
        dep.max(barrier)
    }
}

/// Downstream references of a `Let` variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LetUse {
    pub uses: VarUse,
    /// Clause index of the (last) reference; `clauses.len()` is the return.
    pub site: Option<usize>,
    pub single_use: bool,
}

pub fn let_use(p: &Pipeline, i: usize, var: VarId) -> LetUse {
    let mut uses = VarUse::default();
    let mut site = None;
    let mut boundary_crossed = false;
    let mut single = true;
    for (j, c) in p.clauses.iter().enumerate().skip(i + 1) {
        let u = c.var_use(var);
        if u.count > 0 || u.pinned {
            site = Some(j);
            single &= !boundary_crossed;
        }
        uses = uses.merge(u);
        boundary_crossed |= c.is_generator() || c.is_barrier();
    }
    let r = p.ret.var_use(var);
    if r.count > 0 {
        site = Some(p.clauses.len());
        single &= !boundary_crossed;
    }
    uses = uses.merge(r);
    let single_use = single && uses.count <= 1 && !uses.in_loop && !uses.pinned;
    LetUse { uses, site, single_use }
}

/// Compute facts for every clause of `p` and for its return expression.
pub fn analyze(p: &Pipeline) -> PipelineFacts {
    let clauses = p
        .clauses
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let mut f = ClauseFacts::of_exprs(c.kind(), c.exprs());
            f.reads = c.reads();
            f.writes = c.writes();
            f.positional = match c {
                Clause::For(fc) => fc.pos.is_some(),
                Clause::Window(w) => w.start.vars.pos.is_some() || w.end.as_ref().is_some_and(|e| e.vars.pos.is_some()),
                _ => false,
            };
            if let Clause::Let(l) = c {
                f.single_use = let_use(p, i, l.var).single_use;
            }
            f
        })
        .collect();
    let mut ret = ClauseFacts::of_exprs(ClauseKind::Return, std::iter::once(&p.ret));
    ret.reads = p.ret.free_vars();
    PipelineFacts { clauses, ret }
}
