//! Lazy evaluation of queries.
//!
//! Expressions compile into pull cursors ([`SequenceCursor`]); pipelines into a
//! chain of tuple cursors, one per clause, topped by a cursor that streams the
//! return expression for every tuple. Nothing is computed before the first
//! pull, and an error surfaces from the pull that hit it.
use core::fmt;
use std::rc::Rc;

use crate::ir::{CompareKind, Expr, Query, VarId, VarTable, validate_pipeline};
use crate::runtime::{CallCtx, DynamicContext, Error, ErrorCode};
use crate::simple_node::{elem, text};
use crate::types::{AtomicType, cast};
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence, atomize_optional, ebv};

mod clauses;
pub(crate) mod comparison;
mod cursors;
pub(crate) mod numeric;
mod window;

use comparison::{general_compare, value_compare};
use numeric::{arithmetic, classify};

/// Forward-only source of items.
pub trait SequenceCursor {
    fn next_item(&mut self) -> Option<Result<XdmItem, Error>>;

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, None)
    }
}

/// Lazy result of [`evaluate_stream`].
///
/// Yields `Ok` items until the result is exhausted or the first error, after
/// which it only returns `None`.
pub struct ItemStream<'a> {
    cursor: Box<dyn SequenceCursor + 'a>,
    finished: bool,
}

impl<'a> ItemStream<'a> {
    pub(crate) fn new(cursor: Box<dyn SequenceCursor + 'a>) -> Self {
        Self { cursor, finished: false }
    }

    pub fn from_vec(items: XdmSequence) -> ItemStream<'static> {
        ItemStream::new(Box::new(cursors::VecCursor::new(items)))
    }

    /// Collect all remaining items, stopping at the first error.
    pub fn materialize(self) -> Result<XdmSequence, Error> {
        self.collect()
    }
}

impl Iterator for ItemStream<'_> {
    type Item = Result<XdmItem, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let next = self.cursor.next_item();
        if !matches!(next, Some(Ok(_))) {
            self.finished = true;
        }
        next
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.finished { (0, Some(0)) } else { self.cursor.size_hint() }
    }
}

impl fmt::Debug for ItemStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemStream").field("finished", &self.finished).finish_non_exhaustive()
    }
}

/// Evaluates a query against a dynamic context and collects the result.
///
/// Equivalent to `evaluate_stream(query, ctx)?.materialize()`.
///
/// # Errors
///
/// Returns an error if:
/// - a pipeline of the query violates its structural invariants
/// - evaluation raises a dynamic or type error
/// - the evaluation is cancelled via the context's cancel flag
pub fn evaluate(query: &Query, ctx: &DynamicContext) -> Result<XdmSequence, Error> {
    evaluate_stream(query, ctx)?.materialize()
}

/// Evaluates a query and returns a **lazy** item stream.
///
/// The stream borrows the query; clause cursors are built on the first pull
/// and each pull does only the work needed for the next item:
///
/// - `for`, `let`, `where` and sliding/tumbling windows stream tuple by tuple
///   (windows buffer the source items of the windows still open)
/// - `group by` and `order by` consume their whole input on the first pull
/// - filters referencing `last()` materialize their input
///
/// Dropping the stream releases every cursor.
///
/// # Errors
///
/// Returns a static-analysis error if a pipeline violates its structural
/// invariants. Dynamic errors are reported by the stream.
pub fn evaluate_stream<'a>(query: &'a Query, ctx: &'a DynamicContext) -> Result<ItemStream<'a>, Error> {
    for p in query.pipelines() {
        validate_pipeline(p)?;
    }
    let ev = Evaluator { ctx, vars: &query.vars };
    let env = Env::root(query.vars.len(), ctx);
    Ok(ItemStream::new(ev.stream(&query.body, &env)))
}

impl Expr {
    /// Evaluate this expression on its own, with no variables bound.
    ///
    /// # Errors
    ///
    /// Any dynamic error of the expression; a reference to an unbound
    /// variable is a static-analysis error.
    pub fn evaluate(&self, vars: &VarTable, ctx: &DynamicContext) -> Result<XdmSequence, Error> {
        let ev = Evaluator { ctx, vars };
        ev.eval(self, &Env::root(vars.len(), ctx))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Focus {
    pub item: XdmItem,
    pub position: usize,
    /// Unknown while streaming; `last()` forces materialization.
    pub size: Option<usize>,
}

/// Variable bindings of one tuple plus the current focus.
#[derive(Debug, Clone)]
pub(crate) struct Env {
    slots: Vec<Option<Rc<XdmSequence>>>,
    pub focus: Option<Focus>,
}

impl Env {
    fn root(vars: usize, ctx: &DynamicContext) -> Self {
        let focus = ctx.context_item.clone().map(|item| Focus { item, position: 1, size: Some(1) });
        Env { slots: vec![None; vars], focus }
    }

    pub fn get(&self, var: VarId) -> Option<&Rc<XdmSequence>> {
        self.slots.get(var.index()).and_then(Option::as_ref)
    }

    fn set(&mut self, var: VarId, value: Rc<XdmSequence>) {
        let i = var.index();
        if i >= self.slots.len() {
            self.slots.resize(i + 1, None);
        }
        self.slots[i] = Some(value);
    }
}

#[derive(Clone, Copy)]
pub(crate) struct Evaluator<'a> {
    pub ctx: &'a DynamicContext,
    pub vars: &'a VarTable,
}

impl<'a> Evaluator<'a> {
    /// Bind `var` in `env`, checking its declared type.
    pub fn bind(&self, env: &mut Env, var: VarId, value: XdmSequence) -> Result<(), Error> {
        if let Some(ty) = self.vars.declared(var) {
            ty.check(&value, &format!("${}", self.vars.name(var)))?;
        }
        env.set(var, Rc::new(value));
        Ok(())
    }

    pub fn ebv(&self, expr: &'a Expr, env: &Env) -> Result<bool, Error> {
        ebv(&self.eval(expr, env)?)
    }

    /// A numeric singleton selects by position, anything else is read as a boolean.
    #[allow(clippy::cast_precision_loss)]
    pub fn predicate_holds(&self, predicate: &'a Expr, env: &Env, position: usize) -> Result<bool, Error> {
        let v = self.eval(predicate, env)?;
        if let [XdmItem::Atomic(a)] = v.as_slice()
            && let Some(n) = classify(a)
        {
            return Ok(n.to_f64() == position as f64);
        }
        ebv(&v)
    }

    fn unbound(&self, var: VarId) -> Error {
        Error::static_analysis(format!("variable ${} is not bound", self.vars.name(var)))
    }

    fn focus<'e>(env: &'e Env, what: &str) -> Result<&'e Focus, Error> {
        env.focus
            .as_ref()
            .ok_or_else(|| Error::from_code(ErrorCode::XPDY0002, format!("{what} is undefined: no context item")))
    }

    /// Evaluate `expr` to a materialized sequence.
    #[allow(clippy::cast_possible_wrap, clippy::too_many_lines)]
    pub fn eval(&self, expr: &'a Expr, env: &Env) -> Result<XdmSequence, Error> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::VarRef(v) => env.get(*v).map(|s| (**s).clone()).ok_or_else(|| self.unbound(*v)),
            Expr::ContextItem => Ok(vec![Self::focus(env, "context item")?.item.clone()]),
            Expr::Position => {
                let f = Self::focus(env, "position()")?;
                Ok(vec![XdmItem::Atomic(XdmAtomicValue::Integer(f.position as i64))])
            }
            Expr::Last => {
                let size = Self::focus(env, "last()")?
                    .size
                    .ok_or_else(|| Error::from_code(ErrorCode::XPDY0002, "last() is undefined here"))?;
                Ok(vec![XdmItem::Atomic(XdmAtomicValue::Integer(size as i64))])
            }
            Expr::Sequence(_) | Expr::Range { .. } | Expr::Select { .. } | Expr::Replicate { .. } | Expr::Flwor(_) => {
                self.collect(expr, env)
            }
            Expr::Arith { op, left, right } => {
                let (l, r) = (self.eval(left, env)?, self.eval(right, env)?);
                let (Some(a), Some(b)) = (atomize_optional(&l, op.symbol())?, atomize_optional(&r, op.symbol())?)
                else {
                    return Ok(Vec::new());
                };
                Ok(vec![XdmItem::Atomic(arithmetic(*op, &a, &b)?)])
            }
            Expr::Compare { op, kind, left, right } => {
                let (l, r) = (self.eval(left, env)?, self.eval(right, env)?);
                let result = match kind {
                    CompareKind::Value => value_compare(*op, &l, &r)?,
                    CompareKind::General => Some(general_compare(*op, &l, &r)?),
                };
                Ok(result.map(|b| XdmItem::Atomic(XdmAtomicValue::Boolean(b))).into_iter().collect())
            }
            Expr::And(a, b) => Ok(boolean(self.ebv(a, env)? && self.ebv(b, env)?)),
            Expr::Or(a, b) => Ok(boolean(self.ebv(a, env)? || self.ebv(b, env)?)),
            Expr::Not(e) => Ok(boolean(!self.ebv(e, env)?)),
            Expr::If { cond, then_expr, else_expr } => {
                if self.ebv(cond, env)? {
                    self.eval(then_expr, env)
                } else {
                    self.eval(else_expr, env)
                }
            }
            Expr::Filter { input, predicates } => {
                let mut items = self.eval(input, env)?;
                let mut scratch = env.clone();
                for p in predicates {
                    let size = items.len();
                    let mut kept = Vec::with_capacity(size);
                    for (i, item) in items.into_iter().enumerate() {
                        scratch.focus = Some(Focus { item: item.clone(), position: i + 1, size: Some(size) });
                        if self.predicate_holds(p, &scratch, i + 1)? {
                            kept.push(item);
                        }
                    }
                    items = kept;
                }
                Ok(items)
            }
            Expr::Call { func, args } => {
                let args = args.iter().map(|a| self.eval(a, env)).collect::<Result<Vec<_>, _>>()?;
                func.invoke(&CallCtx { dyn_ctx: self.ctx }, &args)
            }
            Expr::Element { name, content } => Ok(vec![construct(name, self.eval(content, env)?)]),
            Expr::Cast { expr, target } => {
                let v = self.eval(expr, env)?;
                match atomize_optional(&v, "cast as")? {
                    None => Ok(Vec::new()),
                    Some(a) => Ok(vec![XdmItem::Atomic(cast(&a, *target)?)]),
                }
            }
            Expr::TypeCheck { expr, ty } => {
                let v = self.eval(expr, env)?;
                ty.check(&v, "treat as")?;
                Ok(v)
            }
            Expr::TypeSwitch { operand, cases, default } => {
                let value = self.eval(operand, env)?;
                let case = cases
                    .iter()
                    .find(|c| c.ty.as_ref().is_none_or(|ty| ty.matches(&value)))
                    .unwrap_or(&**default);
                match case.var {
                    Some(v) => {
                        let mut scoped = env.clone();
                        self.bind(&mut scoped, v, value)?;
                        self.eval(&case.body, &scoped)
                    }
                    None => self.eval(&case.body, env),
                }
            }
        }
    }

    fn collect(&self, expr: &'a Expr, env: &Env) -> Result<XdmSequence, Error> {
        let mut cursor = self.stream(expr, env);
        let mut out = Vec::new();
        while let Some(item) = cursor.next_item() {
            out.push(item?);
        }
        Ok(out)
    }

    /// Cursor over the items of `expr`; the cursor owns a copy of `env`.
    pub fn stream(&self, expr: &'a Expr, env: &Env) -> Box<dyn SequenceCursor + 'a> {
        use cursors::{ConcatCursor, DeferredCursor, FilterCursor, IfCursor, RangeCursor, ReplicateCursor, SelectCursor};
        match expr {
            Expr::Literal(v) => Box::new(cursors::VecCursor::new(v.clone())),
            Expr::Flwor(p) => Box::new(clauses::PipelineCursor::new(*self, p, env.clone())),
            Expr::Sequence(parts) => Box::new(ConcatCursor::new(*self, parts, env.clone())),
            Expr::Range { start, end } => Box::new(RangeCursor::new(*self, start, end, env.clone())),
            Expr::If { cond, then_expr, else_expr } => {
                Box::new(IfCursor::new(*self, cond, then_expr, else_expr, env.clone()))
            }
            Expr::Select { input, item, pos, predicate } => {
                Box::new(SelectCursor::new(*self, self.stream(input, env), *item, *pos, predicate, env.clone()))
            }
            Expr::Replicate { expr, source } => {
                Box::new(ReplicateCursor::new(*self, expr, self.stream(source, env), env.clone()))
            }
            Expr::Filter { input, predicates } if !predicates.iter().any(|p| p.any(&|e| matches!(e, Expr::Last))) => {
                predicates.iter().fold(self.stream(input, env), |inner, p| {
                    Box::new(FilterCursor::new(*self, inner, p, env.clone())) as Box<dyn SequenceCursor + 'a>
                })
            }
            _ => Box::new(DeferredCursor::new(*self, expr, env.clone())),
        }
    }
}

fn boolean(b: bool) -> XdmSequence {
    vec![XdmItem::Atomic(XdmAtomicValue::Boolean(b))]
}

/// Build an element from evaluated content: nodes are copied, adjacent atomic
/// values are joined with single spaces into one text node.
fn construct(name: &str, content: XdmSequence) -> XdmItem {
    let mut builder = elem(name);
    let mut pending: Option<String> = None;
    for item in content {
        match item {
            XdmItem::Atomic(a) => {
                let s = a.string_value();
                pending = Some(match pending {
                    Some(mut p) => {
                        p.push(' ');
                        p.push_str(&s);
                        p
                    }
                    None => s,
                });
            }
            XdmItem::Node(n) => {
                if let Some(t) = pending.take() {
                    builder = builder.child(text(&t));
                }
                builder = builder.child(n.deep_copy());
            }
        }
    }
    if let Some(t) = pending {
        builder = builder.child(text(&t));
    }
    XdmItem::Node(builder.build())
}

/// Integer operand of a range bound; untyped values are cast.
fn range_bound(seq: &[XdmItem]) -> Result<Option<i64>, Error> {
    match atomize_optional(seq, "to")? {
        None => Ok(None),
        Some(XdmAtomicValue::Integer(i)) => Ok(Some(i)),
        Some(v @ XdmAtomicValue::UntypedAtomic(_)) => match cast(&v, AtomicType::Integer)? {
            XdmAtomicValue::Integer(i) => Ok(Some(i)),
            _ => Err(Error::from_code(ErrorCode::XPTY0004, "range bound is not an integer")),
        },
        Some(v) => Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("range bound must be xs:integer, got {}", v.atomic_type().name()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{QueryBuilder, elem_ctor, filter, int, last, position, range, seq, string};
    use crate::runtime::DynamicContextBuilder;

    fn ints(v: &[i64]) -> XdmSequence {
        v.iter().map(|i| XdmItem::from(*i)).collect()
    }

    #[test]
    fn filter_by_position_and_last() {
        let qb = QueryBuilder::new();
        let q = qb.finish(filter(range(int(1), int(5)), vec![int(2)]));
        assert_eq!(evaluate(&q, &DynamicContext::default()).unwrap(), ints(&[2]));

        let qb = QueryBuilder::new();
        let q = qb.finish(filter(range(int(1), int(5)), vec![crate::build::eq(position(), last())]));
        assert_eq!(evaluate(&q, &DynamicContext::default()).unwrap(), ints(&[5]));
    }

    #[test]
    fn element_content_joins_atomics() {
        let qb = QueryBuilder::new();
        let q = qb.finish(elem_ctor("e", seq(vec![int(1), string("a"), int(2)])));
        let out = evaluate(&q, &DynamicContext::default()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].string_value(), "1 a 2");
    }

    #[test]
    fn context_item_requires_focus() {
        let qb = QueryBuilder::new();
        let q = qb.finish(crate::build::context_item());
        let err = evaluate(&q, &DynamicContext::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::XPDY0002);
        let ctx = DynamicContextBuilder::new().with_context_item(7i64).build();
        assert_eq!(evaluate(&q, &ctx).unwrap(), ints(&[7]));
    }

    #[test]
    fn stream_stops_after_error() {
        let qb = QueryBuilder::new();
        let bad = crate::build::div(int(1), int(0));
        let q = qb.finish(seq(vec![int(1), bad, int(3)]));
        let ctx = DynamicContext::default();
        let mut s = evaluate_stream(&q, &ctx).unwrap();
        assert!(matches!(s.next(), Some(Ok(_))));
        assert!(matches!(s.next(), Some(Err(_))));
        assert!(s.next().is_none());
    }
}
