//! Constant folding on single expression nodes; children are folded first by
//! the caller.
use tracing::debug;

use crate::ir::typing::static_type;
use crate::ir::{Expr, VarTable};
use crate::runtime::DynamicContext;
use crate::types::{AtomicType, ItemType};

fn take(e: &mut Expr) -> Expr {
    std::mem::replace(e, Expr::empty())
}

/// Statically a single boolean, so it can stand in for its own EBV.
fn is_boolean(e: &Expr, vars: &VarTable) -> bool {
    let ty = static_type(e, vars);
    ty.is_exactly_one() && ty.item_type() == Some(&ItemType::Atomic(AtomicType::Boolean))
}

fn fold_sequence(items: &mut Vec<Expr>) -> Option<Expr> {
    let nested = items.iter().any(|e| matches!(e, Expr::Sequence(_)) || e.is_empty_literal());
    let literal = items.iter().all(|e| matches!(e, Expr::Literal(_)));
    if !nested && !literal && items.len() > 1 {
        return None;
    }
    let mut out = Vec::with_capacity(items.len());
    for e in items.drain(..) {
        match e {
            Expr::Sequence(inner) => out.extend(inner),
            e if e.is_empty_literal() => {}
            e => out.push(e),
        }
    }
    if out.iter().all(|e| matches!(e, Expr::Literal(_))) {
        let values = out.into_iter().flat_map(|e| match e {
            Expr::Literal(v) => v,
            _ => Vec::new(),
        });
        return Some(Expr::Literal(values.collect()));
    }
    if out.len() == 1 {
        return out.pop();
    }
    Some(Expr::Sequence(out))
}

/// Evaluate a closed operator or pure call over literal operands; errors are
/// left for run time.
fn constant(e: &Expr, vars: &VarTable) -> Option<Expr> {
    let closed = match e {
        Expr::Arith { .. } | Expr::Compare { .. } | Expr::Cast { .. } => true,
        Expr::Call { func, .. } => func.flags.deterministic && !func.flags.constructs && !func.flags.updating,
        _ => false,
    };
    if !closed || !e.children().iter().all(|c| matches!(c, Expr::Literal(_))) {
        return None;
    }
    e.evaluate(vars, &DynamicContext::default()).ok().map(Expr::Literal)
}

/// Fold `e` in place; returns whether it changed.
pub(super) fn fold(e: &mut Expr, vars: &VarTable) -> bool {
    let folded = match e {
        Expr::Sequence(items) => fold_sequence(items),
        Expr::And(a, b) => match (a.literal_ebv(), b.literal_ebv()) {
            (Some(false), _) => Some(Expr::boolean(false)),
            (Some(true), Some(r)) => Some(Expr::boolean(r)),
            (Some(true), None) if is_boolean(b, vars) => Some(take(b)),
            _ => None,
        },
        Expr::Or(a, b) => match (a.literal_ebv(), b.literal_ebv()) {
            (Some(true), _) => Some(Expr::boolean(true)),
            (Some(false), Some(r)) => Some(Expr::boolean(r)),
            (Some(false), None) if is_boolean(b, vars) => Some(take(b)),
            _ => None,
        },
        Expr::Not(x) => x.literal_ebv().map(|v| Expr::boolean(!v)),
        Expr::If { cond, then_expr, else_expr } => match cond.literal_ebv() {
            Some(true) => Some(take(then_expr)),
            Some(false) => Some(take(else_expr)),
            None => None,
        },
        Expr::TypeCheck { expr, ty } => match expr.as_literal() {
            Some(v) if ty.matches(v) => Some(take(expr)),
            _ => None,
        },
        _ => constant(e, vars),
    };
    match folded {
        Some(new) => {
            *e = new;
            debug!(pass = "simplify", "expression folded");
            true
        }
        None => false,
    }
}
