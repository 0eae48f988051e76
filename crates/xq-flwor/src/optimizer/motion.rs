//! Clause motion.
//!
//! `where` clauses move up to just after the last clause they depend on, but
//! never past another `where`; `let` clauses move up in front of the first
//! generator they do not depend on, and sink below an independent `where`.
//! Nothing crosses a barrier or a non-deterministic clause, and only pure
//! clauses move. A conjunctive `where` whose conjuncts could go to different
//! places is split first; conjuncts keep their left-to-right order.
//!
//! A pure `let` may still raise a dynamic error. A `where` hoisted above it
//! filters tuples before the binding is computed, so an error the binding
//! would raise for a filtered tuple is never raised.
use std::collections::BTreeSet;

use tracing::debug;

use super::Step;
use crate::analyze::PipelineFacts;
use crate::ir::{Clause, ClauseKind, Expr, Pipeline, VarId, VarTable};

/// Lowest index a clause at `i` reading `reads` may move to.
fn floor(facts: &PipelineFacts, reads: &BTreeSet<VarId>, i: usize) -> usize {
    let fence = facts.clauses[..i].iter().rposition(|c| !c.deterministic).map_or(0, |j| j + 1);
    facts.hoist_floor(reads, i).max(fence)
}

fn where_target(facts: &PipelineFacts, reads: &BTreeSet<VarId>, i: usize) -> usize {
    let after_where = facts.clauses[..i].iter().rposition(|c| c.kind == ClauseKind::Where).map_or(0, |j| j + 1);
    floor(facts, reads, i).max(after_where)
}

fn conjuncts(e: &Expr, out: &mut Vec<Expr>) {
    match e {
        Expr::And(a, b) => {
            conjuncts(a, out);
            conjuncts(b, out);
        }
        _ => out.push(e.clone()),
    }
}

/// Groups of adjacent conjuncts sharing a target, when the first group can
/// move and there is more than one group.
fn split(facts: &PipelineFacts, i: usize, pred: &Expr) -> Option<Vec<Expr>> {
    let mut parts = Vec::new();
    conjuncts(pred, &mut parts);
    if parts.len() < 2 {
        return None;
    }
    let mut groups: Vec<(usize, Expr)> = Vec::new();
    for part in parts {
        let last = groups.last().map_or(0, |(t, _)| *t);
        let target = where_target(facts, &part.free_vars(), i).max(last);
        match groups.last_mut() {
            Some((t, e)) if *t == target => {
                let left = std::mem::replace(e, Expr::empty());
                *e = Expr::And(Box::new(left), Box::new(part));
            }
            _ => groups.push((target, part)),
        }
    }
    (groups.len() > 1 && groups[0].0 < i).then(|| groups.into_iter().map(|(_, e)| e).collect())
}

fn move_clause(p: &mut Pipeline, from: usize, to: usize) {
    let c = p.clauses.remove(from);
    p.clauses.insert(to, c);
}

pub(super) fn motion(p: &mut Pipeline, facts: &PipelineFacts, vars: &mut VarTable) -> Step {
    for i in 0..p.clauses.len() {
        let f = &facts.clauses[i];
        if !f.is_movable() {
            continue;
        }
        match &p.clauses[i] {
            Clause::Where(pred) => {
                if let Some(parts) = split(facts, i, pred) {
                    debug!(pass = "motion", clause = "where", at = i, parts = parts.len(), "conjunction split");
                    p.clauses.splice(i..=i, parts.into_iter().map(Clause::Where));
                    return Step::Changed;
                }
                let to = where_target(facts, &f.reads, i);
                if to < i {
                    move_clause(p, i, to);
                    debug!(pass = "motion", clause = "where", from = i, to, "filter hoisted");
                    return Step::Changed;
                }
            }
            Clause::Let(l) => {
                let lo = floor(facts, &f.reads, i);
                if let Some(to) = (lo..i).find(|j| p.clauses[*j].is_generator()) {
                    let var = l.var;
                    move_clause(p, i, to);
                    debug!(pass = "motion", clause = "let", var = vars.name(var), from = i, to, "binding hoisted");
                    return Step::Changed;
                }
            }
            _ => {}
        }
    }
    for i in 1..p.clauses.len() {
        let (Clause::Let(l), Clause::Where(_)) = (&p.clauses[i - 1], &p.clauses[i]) else {
            continue;
        };
        let (lf, wf) = (&facts.clauses[i - 1], &facts.clauses[i]);
        if lf.is_movable() && !wf.updating && !wf.reads.contains(&l.var) {
            let var = l.var;
            p.clauses.swap(i - 1, i);
            debug!(pass = "motion", clause = "let", var = vars.name(var), "binding sunk below filter");
            return Step::Changed;
        }
    }
    Step::Unchanged
}
