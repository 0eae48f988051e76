//! Rewrites of `where` clauses into other filtering forms.
use tracing::debug;

use super::Step;
use crate::analyze::PipelineFacts;
use crate::ir::{Clause, Expr, Pipeline, VarId, VarTable};

/// Adjacent `where` clauses become one left-to-right conjunction.
pub(super) fn merge_wheres(p: &mut Pipeline, _facts: &PipelineFacts, _vars: &mut VarTable) -> Step {
    for i in 1..p.clauses.len() {
        let (head, tail) = p.clauses.split_at_mut(i);
        if let (Some(Clause::Where(a)), Some(Clause::Where(b))) = (head.last_mut(), tail.first_mut()) {
            let right = std::mem::replace(b, Expr::empty());
            let left = std::mem::replace(a, Expr::empty());
            *a = Expr::And(Box::new(left), Box::new(right));
            p.clauses.remove(i);
            debug!(pass = "merge-wheres", at = i - 1, "adjacent filters merged");
            return Step::Changed;
        }
    }
    Step::Unchanged
}

/// Referenced by any clause after `i` or by the return expression.
fn observed_after(p: &Pipeline, i: usize, var: VarId) -> bool {
    p.clauses[i + 1..].iter().any(|c| {
        let u = c.var_use(var);
        u.count > 0 || u.pinned
    }) || p.ret.references(var)
}

/// `for $x at $p in E where W($x, $p)` becomes `for $x in E[W]`, with the
/// filter binding fresh variables. Positions seen by `W` are positions in `E`,
/// so `$p` must not be observed anywhere else.
pub(super) fn where_to_predicate(p: &mut Pipeline, facts: &PipelineFacts, vars: &mut VarTable) -> Step {
    for i in 1..p.clauses.len() {
        let (Clause::For(f), Clause::Where(pred)) = (&p.clauses[i - 1], &p.clauses[i]) else {
            continue;
        };
        let wf = &facts.clauses[i];
        if !wf.is_movable() || pred.uses_focus() {
            continue;
        }
        let reads_pos = f.pos.is_some_and(|q| wf.reads.contains(&q));
        if !wf.reads.contains(&f.var) && !reads_pos {
            continue;
        }
        if f.pos.is_some_and(|q| observed_after(p, i, q)) {
            continue;
        }
        let (var, pos) = (f.var, f.pos);
        let input = f.source.clone();
        let mut predicate = pred.clone();
        let item = vars.fresh_like(var);
        predicate.substitute(var, &Expr::VarRef(item));
        let sel_pos = match pos {
            Some(q) if reads_pos => {
                let fresh = vars.fresh_like(q);
                predicate.substitute(q, &Expr::VarRef(fresh));
                Some(fresh)
            }
            _ => None,
        };
        p.clauses.remove(i);
        if let Clause::For(f) = &mut p.clauses[i - 1] {
            f.source = Expr::Select { input: Box::new(input), item, pos: sel_pos, predicate: Box::new(predicate) };
            if reads_pos {
                f.pos = None;
            }
        }
        debug!(pass = "where-to-predicate", var = vars.name(var), positional = reads_pos, "filter moved into for source");
        return Step::Changed;
    }
    Step::Unchanged
}

/// A leading `where` guards the rest of the pipeline with a conditional.
pub(super) fn where_to_if(p: &mut Pipeline, _facts: &PipelineFacts, _vars: &mut VarTable) -> Step {
    if !matches!(p.clauses.first(), Some(Clause::Where(_))) {
        return Step::Unchanged;
    }
    let rest = p.clauses.split_off(1);
    let Some(Clause::Where(cond)) = p.clauses.pop() else {
        return Step::Unchanged;
    };
    let ret = std::mem::replace(&mut p.ret, Expr::empty());
    debug!(pass = "where-to-if", remaining = rest.len(), "leading filter turned into conditional");
    Step::Replace(Expr::If {
        cond: Box::new(cond),
        then_expr: Box::new(Expr::Flwor(Box::new(Pipeline { clauses: rest, ret }))),
        else_expr: Box::new(Expr::empty()),
    })
}
