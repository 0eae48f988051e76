//! Tuple cursors: one per clause, chained from the pipeline start.
//!
//! A tuple cursor writes its own bindings into the shared [`Env`] on every
//! successful `advance`; upstream bindings stay in place until upstream
//! advances. `group by` and `order by` drain upstream on the first call and
//! replay snapshots afterwards.

use core::cmp::Ordering;
use std::collections::HashMap;

use smallvec::SmallVec;
use tracing::trace;

use super::comparison::{order_atomic, order_key};
use super::window::WindowCursor;
use super::{Env, Evaluator, SequenceCursor};
use crate::ir::{Clause, Expr, ForClause, GroupClause, LetClause, OrderByClause, Pipeline};
use crate::runtime::Error;
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence, atomize_optional};

pub(super) trait TupleCursor {
    /// Move to the next tuple. Returns `false` once exhausted.
    fn advance(&mut self, env: &mut Env) -> Result<bool, Error>;
}

/// The single empty tuple every pipeline starts from.
#[derive(Default)]
struct StartCursor {
    done: bool,
}

impl TupleCursor for StartCursor {
    fn advance(&mut self, _env: &mut Env) -> Result<bool, Error> {
        Ok(!std::mem::replace(&mut self.done, true))
    }
}

struct ForCursor<'a> {
    ev: Evaluator<'a>,
    upstream: Box<dyn TupleCursor + 'a>,
    clause: &'a ForClause,
    items: Option<Box<dyn SequenceCursor + 'a>>,
    position: i64,
}

impl TupleCursor for ForCursor<'_> {
    fn advance(&mut self, env: &mut Env) -> Result<bool, Error> {
        loop {
            if let Some(item) = self.items.as_mut().and_then(|c| c.next_item()) {
                let item = item?;
                self.position += 1;
                self.ev.bind(env, self.clause.var, vec![item])?;
                if let Some(pos) = self.clause.pos {
                    self.ev.bind(env, pos, vec![XdmItem::Atomic(XdmAtomicValue::Integer(self.position))])?;
                }
                return Ok(true);
            }
            if !self.upstream.advance(env)? {
                self.items = None;
                return Ok(false);
            }
            self.items = Some(self.ev.stream(&self.clause.source, env));
            self.position = 0;
        }
    }
}

struct LetCursor<'a> {
    ev: Evaluator<'a>,
    upstream: Box<dyn TupleCursor + 'a>,
    clause: &'a LetClause,
}

impl TupleCursor for LetCursor<'_> {
    fn advance(&mut self, env: &mut Env) -> Result<bool, Error> {
        if !self.upstream.advance(env)? {
            return Ok(false);
        }
        let value = self.ev.eval(&self.clause.expr, env)?;
        self.ev.bind(env, self.clause.var, value)?;
        Ok(true)
    }
}

struct WhereCursor<'a> {
    ev: Evaluator<'a>,
    upstream: Box<dyn TupleCursor + 'a>,
    predicate: &'a Expr,
}

impl TupleCursor for WhereCursor<'_> {
    fn advance(&mut self, env: &mut Env) -> Result<bool, Error> {
        while self.upstream.advance(env)? {
            if self.ev.ebv(self.predicate, env)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Hashable form of a grouping key: equal keys compare equal as values
/// (`1 = 1.0`, NaN equals NaN, untyped compares as string).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GroupKey {
    Empty,
    Bool(bool),
    Int(i64),
    Float(u64),
    NaN,
    Str(String),
    DateTime(i64, u32),
}

impl GroupKey {
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn of(value: Option<&XdmAtomicValue>) -> Self {
        let float = |d: f64| {
            if d.is_nan() {
                GroupKey::NaN
            } else if d.fract() == 0.0 && d >= i64::MIN as f64 && d < i64::MAX as f64 {
                GroupKey::Int(d as i64)
            } else {
                GroupKey::Float(d.to_bits())
            }
        };
        match value {
            None => GroupKey::Empty,
            Some(XdmAtomicValue::Boolean(b)) => GroupKey::Bool(*b),
            // beyond 2^53 an integer equals the double it rounds to
            Some(XdmAtomicValue::Integer(i)) if i.unsigned_abs() > 1 << 53 => float(*i as f64),
            Some(XdmAtomicValue::Integer(i)) => GroupKey::Int(*i),
            Some(XdmAtomicValue::Decimal(d) | XdmAtomicValue::Double(d)) => float(*d),
            Some(XdmAtomicValue::String(s) | XdmAtomicValue::UntypedAtomic(s)) => GroupKey::Str(s.clone()),
            Some(XdmAtomicValue::DateTime(dt)) => GroupKey::DateTime(dt.timestamp(), dt.timestamp_subsec_nanos()),
        }
    }
}

struct Group {
    keys: Vec<Option<XdmAtomicValue>>,
    /// Concatenated values of each rebound variable, in rebind order.
    members: Vec<XdmSequence>,
}

struct GroupCursor<'a> {
    ev: Evaluator<'a>,
    upstream: Box<dyn TupleCursor + 'a>,
    clause: &'a GroupClause,
    groups: Option<std::vec::IntoIter<Group>>,
}

impl GroupCursor<'_> {
    fn drain(&mut self, env: &mut Env) -> Result<Vec<Group>, Error> {
        let mut groups: Vec<Group> = Vec::new();
        let mut index: HashMap<SmallVec<[GroupKey; 2]>, usize> = HashMap::new();
        while self.upstream.advance(env)? {
            let mut keys = Vec::with_capacity(self.clause.specs.len());
            let mut hashed = SmallVec::new();
            for spec in &self.clause.specs {
                let key = match atomize_optional(&self.ev.eval(&spec.key, env)?, "group by key")? {
                    Some(XdmAtomicValue::UntypedAtomic(s)) => Some(XdmAtomicValue::String(s)),
                    other => other,
                };
                hashed.push(GroupKey::of(key.as_ref()));
                keys.push(key);
            }
            let width = self.clause.rebinds.len();
            let idx = *index.entry(hashed).or_insert_with(|| {
                groups.push(Group { keys, members: vec![Vec::new(); width] });
                groups.len() - 1
            });
            for (slot, (pre, _)) in groups[idx].members.iter_mut().zip(&self.clause.rebinds) {
                if let Some(value) = env.get(*pre) {
                    slot.extend(value.iter().cloned());
                }
            }
        }
        trace!(groups = groups.len(), "group by materialized");
        Ok(groups)
    }
}

impl TupleCursor for GroupCursor<'_> {
    fn advance(&mut self, env: &mut Env) -> Result<bool, Error> {
        if self.groups.is_none() {
            let groups = self.drain(env)?;
            self.groups = Some(groups.into_iter());
        }
        let Some(group) = self.groups.as_mut().and_then(Iterator::next) else {
            return Ok(false);
        };
        for (spec, key) in self.clause.specs.iter().zip(group.keys) {
            self.ev.bind(env, spec.var, key.map(XdmItem::Atomic).into_iter().collect())?;
        }
        for ((_, post), value) in self.clause.rebinds.iter().zip(group.members) {
            self.ev.bind(env, *post, value)?;
        }
        Ok(true)
    }
}

struct OrderByCursor<'a> {
    ev: Evaluator<'a>,
    upstream: Box<dyn TupleCursor + 'a>,
    clause: &'a OrderByClause,
    sorted: Option<std::vec::IntoIter<Env>>,
}

impl OrderByCursor<'_> {
    fn drain(&mut self, env: &mut Env) -> Result<Vec<Env>, Error> {
        let mut rows = Vec::new();
        while self.upstream.advance(env)? {
            let keys = self
                .clause
                .keys
                .iter()
                .map(|spec| order_key(&self.ev.eval(&spec.key, env)?))
                .collect::<Result<Vec<_>, _>>()?;
            rows.push((keys, env.clone()));
        }
        let mut failure = None;
        let compare = |a: &[Option<XdmAtomicValue>], b: &[Option<XdmAtomicValue>]| -> Result<Ordering, Error> {
            for ((x, y), spec) in a.iter().zip(b).zip(&self.clause.keys) {
                match order_atomic(x.as_ref(), y.as_ref(), spec)? {
                    Ordering::Equal => {}
                    other => return Ok(other),
                }
            }
            Ok(Ordering::Equal)
        };
        // sort_by is stable; ties keep input order
        rows.sort_by(|(a, _), (b, _)| {
            if failure.is_some() {
                return Ordering::Equal;
            }
            compare(a, b).unwrap_or_else(|e| {
                failure = Some(e);
                Ordering::Equal
            })
        });
        if let Some(e) = failure {
            return Err(e);
        }
        trace!(tuples = rows.len(), "order by materialized");
        Ok(rows.into_iter().map(|(_, env)| env).collect())
    }
}

impl TupleCursor for OrderByCursor<'_> {
    fn advance(&mut self, env: &mut Env) -> Result<bool, Error> {
        if self.sorted.is_none() {
            let rows = self.drain(env)?;
            self.sorted = Some(rows.into_iter());
        }
        match self.sorted.as_mut().and_then(Iterator::next) {
            Some(snapshot) => {
                *env = snapshot;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn compile<'a>(ev: Evaluator<'a>, pipeline: &'a Pipeline) -> Box<dyn TupleCursor + 'a> {
    trace!(clauses = pipeline.clauses.len(), "pipeline cursor initialized");
    let mut cursor: Box<dyn TupleCursor + 'a> = Box::new(StartCursor::default());
    for clause in &pipeline.clauses {
        let upstream = cursor;
        cursor = match clause {
            Clause::For(f) => Box::new(ForCursor { ev, upstream, clause: f, items: None, position: 0 }),
            Clause::Let(l) => Box::new(LetCursor { ev, upstream, clause: l }),
            Clause::Where(p) => Box::new(WhereCursor { ev, upstream, predicate: p }),
            Clause::Group(g) => Box::new(GroupCursor { ev, upstream, clause: g, groups: None }),
            Clause::OrderBy(o) => Box::new(OrderByCursor { ev, upstream, clause: o, sorted: None }),
            Clause::Window(w) => Box::new(WindowCursor::new(ev, upstream, w)),
        };
    }
    cursor
}

/// Streams the return expression once per tuple of the clause chain.
pub(super) struct PipelineCursor<'a> {
    ev: Evaluator<'a>,
    pipeline: &'a Pipeline,
    env: Env,
    tuples: Option<Box<dyn TupleCursor + 'a>>,
    current: Option<Box<dyn SequenceCursor + 'a>>,
    done: bool,
}

impl<'a> PipelineCursor<'a> {
    pub(super) fn new(ev: Evaluator<'a>, pipeline: &'a Pipeline, env: Env) -> Self {
        Self { ev, pipeline, env, tuples: None, current: None, done: false }
    }

    fn fail(&mut self, e: Error) -> Option<Result<XdmItem, Error>> {
        self.done = true;
        self.tuples = None;
        self.current = None;
        Some(Err(e))
    }
}

impl SequenceCursor for PipelineCursor<'_> {
    fn next_item(&mut self) -> Option<Result<XdmItem, Error>> {
        if self.done {
            return None;
        }
        if let Err(e) = self.ev.ctx.check_cancelled() {
            return self.fail(e);
        }
        loop {
            match self.current.as_mut().and_then(|c| c.next_item()) {
                Some(Ok(item)) => return Some(Ok(item)),
                Some(Err(e)) => return self.fail(e),
                None => {}
            }
            let (ev, pipeline) = (self.ev, self.pipeline);
            let tuples = self.tuples.get_or_insert_with(|| compile(ev, pipeline));
            match tuples.advance(&mut self.env) {
                Ok(true) => self.current = Some(ev.stream(&pipeline.ret, &self.env)),
                Ok(false) => {
                    self.done = true;
                    self.tuples = None;
                    self.current = None;
                    return None;
                }
                Err(e) => return self.fail(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{FlworBuilder, QueryBuilder, asc, dbl, desc, int, range, seq, string, var};
    use crate::runtime::{DynamicContext, ErrorCode};
    use crate::{evaluate, evaluate_stream};

    #[test]
    fn group_key_normalizes_numerics() {
        assert_eq!(GroupKey::of(Some(&XdmAtomicValue::Integer(1))), GroupKey::of(Some(&XdmAtomicValue::Double(1.0))));
        assert_eq!(GroupKey::of(Some(&XdmAtomicValue::Double(f64::NAN))), GroupKey::NaN);
        assert_ne!(GroupKey::of(Some(&XdmAtomicValue::String("1".into()))), GroupKey::Int(1));
        assert_eq!(GroupKey::of(Some(&XdmAtomicValue::Double(-0.0))), GroupKey::Int(0));
    }

    #[test]
    fn large_integer_key_matches_its_double() {
        let big = (1i64 << 53) + 1;
        let key = GroupKey::of(Some(&XdmAtomicValue::Integer(big)));
        assert_eq!(key, GroupKey::of(Some(&XdmAtomicValue::Double(9_007_199_254_740_992.0))));
        assert_eq!(key, GroupKey::of(Some(&XdmAtomicValue::Integer(1i64 << 53))));
        assert_eq!(
            GroupKey::of(Some(&XdmAtomicValue::Integer(i64::MIN))),
            GroupKey::of(Some(&XdmAtomicValue::Double(-9.223_372_036_854_776e18)))
        );
        assert_ne!(key, GroupKey::of(Some(&XdmAtomicValue::Integer(1i64 << 52))));
    }

    #[test]
    fn order_by_is_stable_and_descending() {
        let mut qb = QueryBuilder::new();
        let (x, i) = (qb.var("x"), qb.var("i"));
        // pairs (key, tag); equal keys keep input order
        let body = FlworBuilder::new()
            .for_at(x, i, seq(vec![int(2), int(1), int(2), int(3)]))
            .order_by(vec![desc(var(x))])
            .return_(var(i));
        let q = qb.finish(body);
        let out = evaluate(&q, &DynamicContext::default()).unwrap();
        let tags: Vec<_> = out.iter().map(XdmItem::string_value).collect();
        assert_eq!(tags, ["4", "1", "3", "2"]);
    }

    #[test]
    fn order_by_mixed_types_is_an_error() {
        let mut qb = QueryBuilder::new();
        let x = qb.var("x");
        let body = FlworBuilder::new()
            .for_(x, seq(vec![int(1), string("a")]))
            .order_by(vec![asc(var(x))])
            .return_(var(x));
        let q = qb.finish(body);
        let err = evaluate(&q, &DynamicContext::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::XPTY0004);
    }

    #[test]
    fn nan_groups_together() {
        let mut qb = QueryBuilder::new();
        let (x, k, xs) = (qb.var("x"), qb.var("k"), qb.var("xs"));
        let body = FlworBuilder::new()
            .for_(x, seq(vec![dbl(f64::NAN), int(1), dbl(f64::NAN)]))
            .group_by(vec![(k, var(x))], vec![(x, xs)])
            .return_(var(k));
        let q = qb.finish(body);
        let out = evaluate(&q, &DynamicContext::default()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], XdmItem::from(1i64));
    }

    #[test]
    fn cancelled_pipeline_reports_error() {
        let mut qb = QueryBuilder::new();
        let i = qb.var("i");
        let q = qb.finish(FlworBuilder::new().for_(i, range(int(1), int(1_000_000))).return_(var(i)));
        let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ctx = crate::runtime::DynamicContextBuilder::new().with_cancel_flag(flag.clone()).build();
        let mut stream = evaluate_stream(&q, &ctx).unwrap();
        assert!(matches!(stream.next(), Some(Ok(_))));
        flag.store(true, std::sync::atomic::Ordering::Relaxed);
        let err = stream.next().and_then(Result::err).unwrap();
        assert_eq!(err.code, ErrorCode::FLWR0002);
        assert!(stream.next().is_none());
    }
}
