//! Tree walks over expressions: variable references, substitution and the
//! purity facts the optimizer relies on.
use std::collections::BTreeSet;

use super::{Clause, Expr, Pipeline, VarId};

/// How a variable is referenced inside an expression or clause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VarUse {
    pub count: usize,
    /// Some reference is evaluated repeatedly per evaluation of the enclosing
    /// expression (a predicate, a window condition, a loop body).
    pub in_loop: bool,
    /// Referenced in a position that cannot hold an expression (a group rebind).
    pub pinned: bool,
}

impl VarUse {
    pub fn merge(self, other: VarUse) -> VarUse {
        VarUse {
            count: self.count + other.count,
            in_loop: self.in_loop || other.in_loop,
            pinned: self.pinned || other.pinned,
        }
    }

    pub fn is_unused(&self) -> bool {
        self.count == 0 && !self.pinned
    }
}

impl Expr {
    /// Direct sub-expressions, including every expression of a nested pipeline.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Literal(_) | Expr::VarRef(_) | Expr::ContextItem | Expr::Position | Expr::Last => vec![],
            Expr::Sequence(items) => items.iter().collect(),
            Expr::Range { start: a, end: b }
            | Expr::Arith { left: a, right: b, .. }
            | Expr::Compare { left: a, right: b, .. }
            | Expr::And(a, b)
            | Expr::Or(a, b)
            | Expr::Replicate { expr: a, source: b } => vec![&**a, &**b],
            Expr::Not(e) | Expr::Element { content: e, .. } | Expr::Cast { expr: e, .. } | Expr::TypeCheck { expr: e, .. } => {
                vec![&**e]
            }
            Expr::If { cond, then_expr, else_expr } => vec![&**cond, &**then_expr, &**else_expr],
            Expr::Filter { input, predicates } => std::iter::once(&**input).chain(predicates.iter()).collect(),
            Expr::Select { input, predicate, .. } => vec![&**input, &**predicate],
            Expr::Call { args, .. } => args.iter().collect(),
            Expr::TypeSwitch { operand, cases, default } => std::iter::once(&**operand)
                .chain(cases.iter().map(|c| &c.body))
                .chain(std::iter::once(&default.body))
                .collect(),
            Expr::Flwor(p) => p.exprs().collect(),
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Expr::Literal(_) | Expr::VarRef(_) | Expr::ContextItem | Expr::Position | Expr::Last => vec![],
            Expr::Sequence(items) => items.iter_mut().collect(),
            Expr::Range { start: a, end: b }
            | Expr::Arith { left: a, right: b, .. }
            | Expr::Compare { left: a, right: b, .. }
            | Expr::And(a, b)
            | Expr::Or(a, b)
            | Expr::Replicate { expr: a, source: b } => vec![&mut **a, &mut **b],
            Expr::Not(e) | Expr::Element { content: e, .. } | Expr::Cast { expr: e, .. } | Expr::TypeCheck { expr: e, .. } => {
                vec![&mut **e]
            }
            Expr::If { cond, then_expr, else_expr } => vec![&mut **cond, &mut **then_expr, &mut **else_expr],
            Expr::Filter { input, predicates } => std::iter::once(&mut **input).chain(predicates.iter_mut()).collect(),
            Expr::Select { input, predicate, .. } => vec![&mut **input, &mut **predicate],
            Expr::Call { args, .. } => args.iter_mut().collect(),
            Expr::TypeSwitch { operand, cases, default } => std::iter::once(&mut **operand)
                .chain(cases.iter_mut().map(|c| &mut c.body))
                .chain(std::iter::once(&mut default.body))
                .collect(),
            Expr::Flwor(p) => {
                let Pipeline { clauses, ret } = &mut **p;
                clauses.iter_mut().flat_map(Clause::exprs_mut).chain(std::iter::once(ret)).collect()
            }
        }
    }

    /// Pre-order walk over this expression and all descendants.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        f(self);
        for c in self.children() {
            c.walk(f);
        }
    }

    pub fn any(&self, pred: &dyn Fn(&Expr) -> bool) -> bool {
        pred(self) || self.children().into_iter().any(|c| c.any(pred))
    }

    /// Variables bound inside this expression (nested clauses, `Select` and case binders).
    pub fn bound_vars(&self) -> BTreeSet<VarId> {
        let mut out = BTreeSet::new();
        self.walk(&mut |e| match e {
            Expr::Select { item, pos, .. } => {
                out.insert(*item);
                out.extend(*pos);
            }
            Expr::TypeSwitch { cases, default, .. } => {
                out.extend(cases.iter().chain(std::iter::once(&**default)).filter_map(|c| c.var));
            }
            Expr::Flwor(p) => {
                for c in &p.clauses {
                    out.extend(c.writes());
                }
            }
            _ => {}
        });
        out
    }

    /// Variables referenced but not bound inside this expression.
    pub fn free_vars(&self) -> BTreeSet<VarId> {
        let mut refs = BTreeSet::new();
        self.walk(&mut |e| match e {
            Expr::VarRef(v) => {
                refs.insert(*v);
            }
            Expr::Flwor(p) => {
                for c in &p.clauses {
                    if let Clause::Group(g) = c {
                        refs.extend(g.rebinds.iter().map(|(pre, _)| *pre));
                    }
                }
            }
            _ => {}
        });
        let bound = self.bound_vars();
        refs.retain(|v| !bound.contains(v));
        refs
    }

    pub fn references(&self, var: VarId) -> bool {
        self.any(&|e| matches!(e, Expr::VarRef(v) if *v == var))
    }

    /// Count references to `var` and note whether any is evaluated repeatedly.
    pub fn var_use(&self, var: VarId) -> VarUse {
        let mut u = VarUse::default();
        self.collect_use(var, false, &mut u);
        u
    }

    fn collect_use(&self, var: VarId, repeated: bool, u: &mut VarUse) {
        match self {
            Expr::VarRef(v) if *v == var => {
                u.count += 1;
                u.in_loop |= repeated;
            }
            Expr::Filter { input, predicates } => {
                input.collect_use(var, repeated, u);
                for p in predicates {
                    p.collect_use(var, true, u);
                }
            }
            Expr::Select { input, predicate, .. } => {
                input.collect_use(var, repeated, u);
                predicate.collect_use(var, true, u);
            }
            // the replicated expression runs once per source item, possibly never
            Expr::Replicate { expr, source } => {
                source.collect_use(var, repeated, u);
                expr.collect_use(var, true, u);
            }
            Expr::Flwor(p) => {
                let mut looping = repeated;
                for c in &p.clauses {
                    let cu = clause_use(c, var, looping);
                    *u = u.merge(cu);
                    looping |= c.is_generator() || c.is_barrier();
                }
                p.ret.collect_use(var, looping, u);
            }
            _ => {
                for c in self.children() {
                    c.collect_use(var, repeated, u);
                }
            }
        }
    }

    /// Replace every reference to `var` by a copy of `with`.
    pub fn substitute(&mut self, var: VarId, with: &Expr) {
        if matches!(self, Expr::VarRef(v) if *v == var) {
            *self = with.clone();
            return;
        }
        for c in self.children_mut() {
            c.substitute(var, with);
        }
    }

    fn any_call(&self, pred: &dyn Fn(&crate::runtime::FunctionFlags) -> bool) -> bool {
        self.any(&|e| matches!(e, Expr::Call { func, .. } if pred(&func.flags)))
    }

    /// Same bindings always give the same result with no visible effect.
    pub fn is_deterministic(&self) -> bool {
        !self.any_call(&|f| !f.deterministic)
    }

    /// Builds new nodes (an element constructor or a constructing call).
    pub fn constructs(&self) -> bool {
        self.any(&|e| matches!(e, Expr::Element { .. }))
            || self.any_call(&|f| f.constructs)
    }

    pub fn is_updating(&self) -> bool {
        self.any_call(&|f| f.updating)
    }

    /// Reads the context item, position or size of the surrounding focus.
    pub fn uses_focus(&self) -> bool {
        match self {
            Expr::ContextItem | Expr::Position | Expr::Last => true,
            // predicates run under the filter's own focus
            Expr::Filter { input, .. } => input.uses_focus(),
            _ => self.children().into_iter().any(Expr::uses_focus),
        }
    }

    /// Deterministic, non-constructing and non-updating.
    pub fn is_pure(&self) -> bool {
        self.is_deterministic() && !self.constructs() && !self.is_updating()
    }
}

/// References to `var` within one clause.
fn clause_use(clause: &Clause, var: VarId, repeated: bool) -> VarUse {
    let mut u = VarUse::default();
    match clause {
        Clause::Window(w) => {
            w.source.collect_use(var, repeated, &mut u);
            w.start.predicate.collect_use(var, true, &mut u);
            if let Some(end) = &w.end {
                end.predicate.collect_use(var, true, &mut u);
            }
        }
        Clause::Group(g) => {
            for s in &g.specs {
                s.key.collect_use(var, repeated, &mut u);
            }
            u.pinned |= g.rebinds.iter().any(|(pre, _)| *pre == var);
        }
        _ => {
            for e in clause.exprs() {
                e.collect_use(var, repeated, &mut u);
            }
        }
    }
    u
}

impl Clause {
    /// Variables this clause reads from upstream (or from an outer scope).
    pub fn reads(&self) -> BTreeSet<VarId> {
        let mut out: BTreeSet<VarId> = self.exprs().into_iter().flat_map(Expr::free_vars).collect();
        if let Clause::Group(g) = self {
            out.extend(g.rebinds.iter().map(|(pre, _)| *pre));
        }
        // window conditions read the clause's own boundary variables
        for w in self.writes() {
            out.remove(&w);
        }
        out
    }

    /// References to `var` in this clause's expressions and rebinds.
    pub fn var_use(&self, var: VarId) -> VarUse {
        clause_use(self, var, false)
    }

    pub fn substitute(&mut self, var: VarId, with: &Expr) {
        for e in self.exprs_mut() {
            e.substitute(var, with);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{FlworBuilder, QueryBuilder, filter, gt, int, range, var};

    #[test]
    fn predicate_reference_counts_as_loop() {
        let mut qb = QueryBuilder::new();
        let x = qb.var("x");
        let e = filter(range(int(1), int(3)), vec![gt(var(x), int(1))]);
        let u = e.var_use(x);
        assert_eq!(u.count, 1);
        assert!(u.in_loop);
    }

    #[test]
    fn nested_pipeline_binders_are_not_free() {
        let mut qb = QueryBuilder::new();
        let (i, outer) = (qb.var("i"), qb.var("o"));
        let e = FlworBuilder::new().for_(i, range(int(1), var(outer))).return_(var(i));
        assert_eq!(e.free_vars().into_iter().collect::<Vec<_>>(), vec![outer]);
        let u = e.var_use(outer);
        assert!(!u.in_loop);
        assert_eq!(e.var_use(i).count, 1);
    }

    #[test]
    fn replicated_reference_counts_as_loop() {
        let mut qb = QueryBuilder::new();
        let (x, n) = (qb.var("x"), qb.var("n"));
        let e = Expr::Replicate { expr: Box::new(var(x)), source: Box::new(range(int(1), var(n))) };
        let u = e.var_use(x);
        assert_eq!(u.count, 1);
        assert!(u.in_loop);
        assert!(!e.var_use(n).in_loop);
    }
}
