//! Static types of expressions and of the variables their binders introduce.
//!
//! Only as precise as the optimizer needs: cardinality bounds and a coarse
//! item type. Unknown always widens to `item()*`.
use super::{Clause, CompareKind, Expr, Pipeline, Query, VarTable};
use crate::types::{AtomicType, ItemType, Occurrence, SeqType};
use crate::xdm::XdmItem;

fn literal_type(items: &[XdmItem]) -> SeqType {
    let mut iter = items.iter();
    let Some(first) = iter.next() else {
        return SeqType::EmptySequence;
    };
    let item = iter.fold(ItemType::of_item(first), |acc, i| acc.union(&ItemType::of_item(i)));
    SeqType::with_bounds(Some(item), items.len(), Some(items.len()))
}

fn many_of(ty: &SeqType) -> SeqType {
    SeqType::with_bounds(ty.item_type().cloned(), 0, if ty.is_empty() { Some(0) } else { None })
}

/// Static type of `expr` given the types recorded in `vars`.
pub fn static_type(expr: &Expr, vars: &VarTable) -> SeqType {
    match expr {
        Expr::Literal(items) => literal_type(items),
        Expr::VarRef(v) => {
            let var = vars.get(*v);
            var.declared.clone().or_else(|| var.inferred.clone()).unwrap_or_else(SeqType::any)
        }
        Expr::ContextItem => SeqType::one(ItemType::AnyItem),
        Expr::Position | Expr::Last => SeqType::atomic(AtomicType::Integer),
        Expr::Sequence(items) => items
            .iter()
            .fold(SeqType::EmptySequence, |acc, e| acc.concat(&static_type(e, vars))),
        Expr::Range { .. } => SeqType::star(ItemType::Atomic(AtomicType::Integer)),
        Expr::Arith { left, right, .. } => {
            let (l, r) = (static_type(left, vars), static_type(right, vars));
            if l.is_empty() || r.is_empty() {
                SeqType::EmptySequence
            } else if l.min() >= 1 && r.min() >= 1 {
                SeqType::atomic(AtomicType::Numeric)
            } else {
                SeqType::optional(ItemType::Atomic(AtomicType::Numeric))
            }
        }
        Expr::Compare { kind: CompareKind::General, .. } | Expr::And(..) | Expr::Or(..) | Expr::Not(_) => {
            SeqType::atomic(AtomicType::Boolean)
        }
        Expr::Compare { kind: CompareKind::Value, left, right, .. } => {
            let (l, r) = (static_type(left, vars), static_type(right, vars));
            if l.min() >= 1 && r.min() >= 1 {
                SeqType::atomic(AtomicType::Boolean)
            } else {
                SeqType::optional(ItemType::Atomic(AtomicType::Boolean))
            }
        }
        Expr::If { then_expr, else_expr, .. } => static_type(then_expr, vars).choice(&static_type(else_expr, vars)),
        Expr::Filter { input, .. } | Expr::Select { input, .. } => {
            let t = static_type(input, vars);
            SeqType::with_bounds(t.item_type().cloned(), 0, t.max())
        }
        Expr::Call { func, .. } => func.result.clone().unwrap_or_else(SeqType::any),
        Expr::Element { name, .. } => SeqType::one(ItemType::Element(Some(name.to_string()))),
        Expr::Cast { expr, target } => {
            let t = static_type(expr, vars);
            let occ = if t.min() >= 1 { Occurrence::One } else { Occurrence::ZeroOrOne };
            SeqType::Typed { item: ItemType::Atomic(*target), occ }
        }
        Expr::TypeCheck { ty, .. } => ty.clone(),
        Expr::Replicate { expr, .. } => many_of(&static_type(expr, vars)),
        Expr::TypeSwitch { cases, default, .. } => cases
            .iter()
            .fold(static_type(&default.body, vars), |acc, c| acc.choice(&static_type(&c.body, vars))),
        Expr::Flwor(p) => pipeline_type(p, vars),
    }
}

fn pipeline_type(p: &Pipeline, vars: &VarTable) -> SeqType {
    let ret = static_type(&p.ret, vars);
    if p.clauses.iter().any(|c| c.is_generator() || matches!(c, Clause::Where(_) | Clause::Group(_))) {
        many_of(&ret)
    } else {
        ret
    }
}

/// Item-level type of one member of `source`.
fn item_of(source: &SeqType) -> SeqType {
    SeqType::one(source.item_type().cloned().unwrap_or(ItemType::AnyItem))
}

/// Record static types for every variable bound in the query.
pub fn infer_var_types(query: &mut Query) {
    let Query { vars, body } = query;
    infer_expr(body, vars);
}

fn infer_expr(expr: &Expr, vars: &mut VarTable) {
    match expr {
        Expr::Select { input, item, pos, predicate } => {
            infer_expr(input, vars);
            let t = static_type(input, vars);
            vars.set_inferred(*item, item_of(&t));
            if let Some(p) = pos {
                vars.set_inferred(*p, SeqType::atomic(AtomicType::Integer));
            }
            infer_expr(predicate, vars);
        }
        Expr::TypeSwitch { operand, cases, default } => {
            infer_expr(operand, vars);
            let t = static_type(operand, vars);
            for case in cases.iter().chain(std::iter::once(&**default)) {
                if let Some(v) = case.var {
                    vars.set_inferred(v, case.ty.clone().unwrap_or_else(|| t.clone()));
                }
                infer_expr(&case.body, vars);
            }
        }
        Expr::Flwor(p) => {
            for c in &p.clauses {
                for e in c.exprs() {
                    infer_expr(e, vars);
                }
                infer_clause(c, vars);
            }
            infer_expr(&p.ret, vars);
        }
        _ => {
            for c in expr.children() {
                infer_expr(c, vars);
            }
        }
    }
}

fn infer_clause(c: &Clause, vars: &mut VarTable) {
    let int_one = || SeqType::atomic(AtomicType::Integer);
    match c {
        Clause::For(f) => {
            let t = item_of(&static_type(&f.source, vars));
            vars.set_inferred(f.var, t);
            if let Some(p) = f.pos {
                vars.set_inferred(p, int_one());
            }
        }
        Clause::Let(l) => {
            let t = static_type(&l.expr, vars);
            vars.set_inferred(l.var, t);
        }
        Clause::Window(w) => {
            let src = static_type(&w.source, vars);
            let item = src.item_type().cloned().unwrap_or(ItemType::AnyItem);
            vars.set_inferred(w.var, SeqType::plus(item.clone()));
            for cond in std::iter::once(&w.start).chain(w.end.iter()) {
                if let Some(v) = cond.vars.item {
                    vars.set_inferred(v, SeqType::one(item.clone()));
                }
                if let Some(v) = cond.vars.pos {
                    vars.set_inferred(v, int_one());
                }
                for v in [cond.vars.prev, cond.vars.next].into_iter().flatten() {
                    vars.set_inferred(v, SeqType::optional(item.clone()));
                }
            }
        }
        Clause::Group(g) => {
            for s in &g.specs {
                vars.set_inferred(s.var, SeqType::optional(ItemType::Atomic(AtomicType::AnyAtomic)));
            }
            for (pre, post) in &g.rebinds {
                let t = static_type(&Expr::VarRef(*pre), vars);
                vars.set_inferred(*post, many_of(&t));
            }
        }
        Clause::Where(_) | Clause::OrderBy(_) => {}
    }
}
