//! Inlining: `let` substitution, nested pipeline splicing and the rewrites of
//! a trailing `for`.
use tracing::debug;

use super::Step;
use crate::analyze::{PipelineFacts, let_use};
use crate::ir::{Clause, Expr, ForClause, LetClause, Pipeline, VarTable};
use crate::types::SeqType;

/// Substitute or drop one `let`.
///
/// Literals and variable references are substituted everywhere; other pure
/// expressions only into their single use. Unused pure bindings are removed.
pub(super) fn inline_lets(p: &mut Pipeline, facts: &PipelineFacts, vars: &mut VarTable) -> Step {
    for i in 0..p.clauses.len() {
        let Clause::Let(l) = &p.clauses[i] else {
            continue;
        };
        let usage = let_use(p, i, l.var);
        if usage.uses.pinned {
            continue;
        }
        let pure = facts.clauses[i].is_movable();
        if usage.uses.is_unused() {
            if pure {
                debug!(pass = "inline-let", var = vars.name(l.var), "unused binding removed");
                p.clauses.remove(i);
                return Step::Changed;
            }
            continue;
        }
        let trivial = matches!(l.expr, Expr::Literal(_) | Expr::VarRef(_));
        if !trivial && !(usage.single_use && pure && !l.expr.uses_focus()) {
            continue;
        }
        let LetClause { var, expr } = l.clone();
        let with = expr.checked(vars.declared(var));
        p.clauses.remove(i);
        for c in &mut p.clauses[i..] {
            c.substitute(var, &with);
        }
        p.ret.substitute(var, &with);
        debug!(pass = "inline-let", var = vars.name(var), uses = usage.uses.count, "binding inlined");
        return Step::Changed;
    }
    Step::Unchanged
}

/// Splice nested pipelines without barriers into this one: a `for` source
/// upstream of the `for`, a return expression at the end.
pub(super) fn flatten(p: &mut Pipeline, _facts: &PipelineFacts, vars: &mut VarTable) -> Step {
    for i in 0..p.clauses.len() {
        let Clause::For(f) = &p.clauses[i] else {
            continue;
        };
        let Expr::Flwor(inner) = &f.source else {
            continue;
        };
        if f.pos.is_some() || inner.has_barrier() {
            continue;
        }
        let var = f.var;
        let Pipeline { clauses, ret } = (**inner).clone();
        let n = clauses.len();
        let spliced = clauses.into_iter().chain(std::iter::once(Clause::For(ForClause { var, pos: None, source: ret })));
        p.clauses.splice(i..=i, spliced);
        debug!(pass = "flatten", clause = "for", var = vars.name(var), inner = n, "nested source spliced");
        return Step::Changed;
    }
    if let Expr::Flwor(inner) = &mut p.ret
        && !inner.has_barrier()
    {
        let Pipeline { clauses, ret } = std::mem::replace(&mut **inner, Pipeline { clauses: Vec::new(), ret: Expr::empty() });
        debug!(pass = "flatten", clause = "return", inner = clauses.len(), "nested return spliced");
        p.clauses.extend(clauses);
        p.ret = ret;
        return Step::Changed;
    }
    Step::Unchanged
}

/// `for $x in E return $x` as the last clause becomes `return E`.
pub(super) fn inline_for(p: &mut Pipeline, _facts: &PipelineFacts, vars: &mut VarTable) -> Step {
    let Some(Clause::For(f)) = p.clauses.last() else {
        return Step::Unchanged;
    };
    if f.pos.is_some() || !matches!(p.ret, Expr::VarRef(v) if v == f.var) {
        return Step::Unchanged;
    }
    // a declared item type still applies to every item of the source
    let check = match vars.declared(f.var) {
        None => None,
        Some(ty) => match ty.item_type() {
            Some(item) => Some(SeqType::star(item.clone())),
            None => return Step::Unchanged,
        },
    };
    let var = f.var;
    let source = f.source.clone();
    p.clauses.pop();
    p.ret = source.checked(check.as_ref());
    debug!(pass = "inline-for", var = vars.name(var), "identity loop replaced by its source");
    Step::Changed
}

/// `for $r in E return R` as the last clause, with `$r` unused and `R` pure,
/// becomes `R` replicated once per item of `E`.
pub(super) fn replicate(p: &mut Pipeline, facts: &PipelineFacts, vars: &mut VarTable) -> Step {
    let Some(Clause::For(f)) = p.clauses.last() else {
        return Step::Unchanged;
    };
    if f.pos.is_some() || vars.declared(f.var).is_some() || p.ret.references(f.var) || !facts.ret.is_movable() {
        return Step::Unchanged;
    }
    let (var, source) = (f.var, f.source.clone());
    p.clauses.pop();
    let expr = std::mem::replace(&mut p.ret, Expr::empty());
    p.ret = Expr::Replicate { expr: Box::new(expr), source: Box::new(source) };
    debug!(pass = "replicate", var = vars.name(var), "loop variable unused; return replicated");
    Step::Changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::analyze;
    use crate::build::{FlworBuilder, QueryBuilder, add, int, range, string, var};

    #[test]
    fn let_used_inside_loop_stays_unless_trivial() {
        let mut qb = QueryBuilder::new();
        let (x, i) = (qb.var("x"), qb.var("i"));
        let mut pipe = FlworBuilder::new()
            .let_(x, add(var(i), int(1)))
            .for_(qb.var("j"), range(int(1), int(3)))
            .build(var(x));
        let mut vars = qb.finish(crate::build::empty()).vars;
        let facts = analyze(&pipe);
        assert!(matches!(inline_lets(&mut pipe, &facts, &mut vars), Step::Unchanged));
        assert_eq!(pipe.clauses.len(), 2);
    }

    #[test]
    fn typed_literal_let_keeps_its_check() {
        let mut qb = QueryBuilder::new();
        let x = qb.typed_var("x", SeqType::atomic(crate::types::AtomicType::Integer));
        let j = qb.var("j");
        let mut pipe = FlworBuilder::new().let_(x, string("a")).for_(j, range(int(1), int(2))).build(var(x));
        let mut vars = qb.finish(crate::build::empty()).vars;
        let facts = analyze(&pipe);
        assert!(matches!(inline_lets(&mut pipe, &facts, &mut vars), Step::Changed));
        assert!(matches!(pipe.ret, Expr::TypeCheck { .. }));
    }
}
