//! Dead and empty clause elimination, single-item pre-evaluation of `for`
//! clauses and `typeswitch` expressions.
use tracing::debug;

use super::Step;
use crate::analyze::PipelineFacts;
use crate::ir::typing::static_type;
use crate::ir::{Clause, Expr, LetClause, Pipeline, TypeCase, VarId, VarTable};
use crate::types::{ItemType, SeqType};
use crate::xdm::{XdmAtomicValue, XdmItem};

/// Drop the first `where` whose predicate is literally true.
pub(super) fn drop_true_wheres(p: &mut Pipeline) -> Step {
    let Some(i) = p.clauses.iter().position(|c| matches!(c, Clause::Where(w) if w.literal_ebv() == Some(true))) else {
        return Step::Unchanged;
    };
    p.clauses.remove(i);
    debug!(pass = "eliminate", clause = "where", at = i, "dropped statically true filter");
    Step::Changed
}

pub(super) fn eliminate(p: &mut Pipeline, facts: &PipelineFacts, vars: &mut VarTable) -> Step {
    let vars: &VarTable = vars;
    if p.clauses.is_empty() {
        debug!(pass = "eliminate", "pipeline without clauses replaced by its return expression");
        return Step::Replace(std::mem::replace(&mut p.ret, Expr::empty()));
    }
    let step = drop_true_wheres(p);
    if !step.is_unchanged() {
        return step;
    }
    if facts.any_updating() || !facts.all_deterministic() {
        return Step::Unchanged;
    }
    let dead = p.clauses.iter().position(|c| match c {
        Clause::Where(w) => w.literal_ebv() == Some(false),
        Clause::For(f) => static_type(&f.source, vars).is_empty(),
        Clause::Window(w) => static_type(&w.source, vars).is_empty(),
        _ => false,
    });
    if let Some(i) = dead {
        debug!(pass = "eliminate", clause = p.clauses[i].kind().keyword(), at = i, "pipeline can never produce a tuple");
        return Step::Replace(Expr::empty());
    }
    if static_type(&p.ret, vars).is_empty() {
        debug!(pass = "eliminate", clause = "return", "return expression is always empty");
        return Step::Replace(Expr::empty());
    }
    Step::Unchanged
}

/// `var` appears in a place substitution cannot reach (a group rebind).
fn pinned_after(p: &Pipeline, i: usize, var: VarId) -> bool {
    p.clauses[i + 1..].iter().any(|c| c.var_use(var).pinned)
}

fn substitute_from(p: &mut Pipeline, from: usize, var: VarId, with: &Expr) {
    for c in &mut p.clauses[from..] {
        c.substitute(var, with);
    }
    p.ret.substitute(var, with);
}

/// `for` over a single literal item is removed and the item substituted; a
/// `for` over a source that is statically exactly one item becomes a `let`.
pub(super) fn preevaluate(p: &mut Pipeline, _facts: &PipelineFacts, vars: &mut VarTable) -> Step {
    let first_pos = Expr::Literal(vec![XdmItem::Atomic(XdmAtomicValue::Integer(1))]);
    for i in 0..p.clauses.len() {
        let Clause::For(f) = &p.clauses[i] else {
            continue;
        };
        if f.pos.is_some_and(|q| pinned_after(p, i, q)) {
            continue;
        }
        let (var, pos) = (f.var, f.pos);
        if let Expr::Literal(items) = &f.source
            && items.len() == 1
        {
            if pinned_after(p, i, var) {
                continue;
            }
            let value = f.source.clone().checked(vars.declared(var));
            p.clauses.remove(i);
            substitute_from(p, i, var, &value);
            if let Some(q) = pos {
                substitute_from(p, i, q, &first_pos);
            }
            debug!(pass = "preevaluate", clause = "for", var = vars.name(var), "single item substituted");
            return Step::Changed;
        }
        let ty = static_type(&f.source, vars);
        if !ty.is_exactly_one() {
            continue;
        }
        let expr = match &f.source {
            Expr::TypeCheck { ty: checked, .. } if checked.is_exactly_one() => f.source.clone(),
            source => Expr::TypeCheck {
                expr: Box::new(source.clone()),
                ty: SeqType::one(ty.item_type().cloned().unwrap_or(ItemType::AnyItem)),
            },
        };
        p.clauses[i] = Clause::Let(LetClause { var, expr });
        if let Some(q) = pos {
            substitute_from(p, i + 1, q, &first_pos);
        }
        debug!(pass = "preevaluate", clause = "for", var = vars.name(var), "single-item for turned into let");
        return Step::Changed;
    }
    Step::Unchanged
}

/// Whether a case of type `case` matches an operand of static type `operand`
/// (exactly one item): always, never, or only known at run time.
fn case_verdict(case: &SeqType, operand: &SeqType, literal: Option<&[XdmItem]>) -> Option<bool> {
    if let Some(items) = literal {
        return Some(case.matches(items));
    }
    let (SeqType::Typed { item: want, occ }, Some(have)) = (case, operand.item_type()) else {
        return Some(false);
    };
    if !occ.allows(1) {
        return Some(false);
    }
    if have.is_subtype_of(want) {
        Some(true)
    } else if want.is_subtype_of(have) {
        None
    } else {
        // item types form a tree: unrelated types share no instance
        Some(false)
    }
}

/// Resolve a `typeswitch` over an operand that is statically exactly one item.
///
/// Cases that can never match are dropped. When the first remaining case always
/// matches, the expression becomes `let $v := operand return body` for that
/// case; an always-matching case behind undecided ones becomes the default.
pub(super) fn preevaluate_typeswitch(e: &mut Expr, vars: &mut VarTable) -> bool {
    let Expr::TypeSwitch { operand, cases, default } = e else {
        return false;
    };
    let ty = static_type(operand, vars);
    if !ty.is_exactly_one() {
        return false;
    }
    let literal = operand.as_literal().map(Vec::as_slice);
    let before = cases.len();
    let mut kept: Vec<TypeCase> = Vec::with_capacity(before);
    let mut taken = None;
    for case in std::mem::take(cases) {
        match case.ty.as_ref().map_or(Some(true), |t| case_verdict(t, &ty, literal)) {
            Some(false) => {}
            Some(true) => {
                taken = Some(case);
                break;
            }
            None => kept.push(case),
        }
    }
    match taken {
        Some(case) if !kept.is_empty() => {
            **default = TypeCase { ty: None, ..case };
            *cases = kept;
            debug!(pass = "preevaluate", cases = cases.len(), "typeswitch narrowed to undecided cases");
            true
        }
        None if !kept.is_empty() => {
            let changed = kept.len() < before;
            *cases = kept;
            if changed {
                debug!(pass = "preevaluate", cases = cases.len(), "unmatchable typeswitch cases dropped");
            }
            changed
        }
        taken => {
            let TypeCase { var, body, .. } = match taken {
                Some(case) => case,
                None => std::mem::replace(&mut **default, TypeCase { var: None, ty: None, body: Expr::empty() }),
            };
            let var = var.unwrap_or_else(|| vars.new_var("typeswitch", None));
            let value = std::mem::replace(&mut **operand, Expr::empty());
            debug!(pass = "preevaluate", var = vars.name(var), "typeswitch resolved statically");
            *e = Expr::Flwor(Box::new(Pipeline { clauses: vec![Clause::Let(LetClause { var, expr: value })], ret: body }));
            true
        }
    }
}
