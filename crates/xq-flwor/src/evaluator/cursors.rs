//! Item cursors for streaming expression evaluation.

use super::{Env, Evaluator, Focus, SequenceCursor, range_bound};
use crate::ir::{Expr, VarId};
use crate::runtime::Error;
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence};

pub(super) struct VecCursor {
    items: std::vec::IntoIter<XdmItem>,
}

impl VecCursor {
    pub(super) fn new(items: XdmSequence) -> Self {
        Self { items: items.into_iter() }
    }
}

impl SequenceCursor for VecCursor {
    fn next_item(&mut self) -> Option<Result<XdmItem, Error>> {
        self.items.next().map(Ok)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.items.size_hint()
    }
}

/// Evaluates its expression eagerly, but only on the first pull.
pub(super) struct DeferredCursor<'a> {
    ev: Evaluator<'a>,
    expr: &'a Expr,
    env: Option<Env>,
    items: std::vec::IntoIter<XdmItem>,
}

impl<'a> DeferredCursor<'a> {
    pub(super) fn new(ev: Evaluator<'a>, expr: &'a Expr, env: Env) -> Self {
        Self { ev, expr, env: Some(env), items: Vec::new().into_iter() }
    }
}

impl SequenceCursor for DeferredCursor<'_> {
    fn next_item(&mut self) -> Option<Result<XdmItem, Error>> {
        if let Some(env) = self.env.take() {
            match self.ev.eval(self.expr, &env) {
                Ok(v) => self.items = v.into_iter(),
                Err(e) => return Some(Err(e)),
            }
        }
        self.items.next().map(Ok)
    }
}

/// `(e1, e2, ...)`: each operand is opened once the previous one is exhausted.
pub(super) struct ConcatCursor<'a> {
    ev: Evaluator<'a>,
    parts: std::slice::Iter<'a, Expr>,
    env: Env,
    current: Option<Box<dyn SequenceCursor + 'a>>,
}

impl<'a> ConcatCursor<'a> {
    pub(super) fn new(ev: Evaluator<'a>, parts: &'a [Expr], env: Env) -> Self {
        Self { ev, parts: parts.iter(), env, current: None }
    }
}

impl SequenceCursor for ConcatCursor<'_> {
    fn next_item(&mut self) -> Option<Result<XdmItem, Error>> {
        loop {
            if let Some(item) = self.current.as_mut().and_then(|c| c.next_item()) {
                return Some(item);
            }
            let part = self.parts.next()?;
            self.current = Some(self.ev.stream(part, &self.env));
        }
    }
}

enum RangeState<'a> {
    Pending(&'a Expr, &'a Expr, Env),
    Running { next: i64, end: i64 },
    Done,
}

/// `start to end`, counting up without materializing.
pub(super) struct RangeCursor<'a> {
    ev: Evaluator<'a>,
    state: RangeState<'a>,
}

impl<'a> RangeCursor<'a> {
    pub(super) fn new(ev: Evaluator<'a>, start: &'a Expr, end: &'a Expr, env: Env) -> Self {
        Self { ev, state: RangeState::Pending(start, end, env) }
    }

    fn open(&self, start: &'a Expr, end: &'a Expr, env: &Env) -> Result<RangeState<'a>, Error> {
        // bounds are evaluated once, in order
        let lo = range_bound(&self.ev.eval(start, env)?)?;
        let hi = range_bound(&self.ev.eval(end, env)?)?;
        Ok(match (lo, hi) {
            (Some(next), Some(end)) if next <= end => RangeState::Running { next, end },
            _ => RangeState::Done,
        })
    }
}

impl SequenceCursor for RangeCursor<'_> {
    fn next_item(&mut self) -> Option<Result<XdmItem, Error>> {
        if let RangeState::Pending(start, end, env) = &self.state {
            let opened = self.open(*start, *end, env);
            match opened {
                Ok(state) => self.state = state,
                Err(e) => {
                    self.state = RangeState::Done;
                    return Some(Err(e));
                }
            }
        }
        match self.state {
            RangeState::Running { next, end } => {
                self.state = match next.checked_add(1) {
                    Some(n) if n <= end => RangeState::Running { next: n, end },
                    _ => RangeState::Done,
                };
                Some(Ok(XdmItem::Atomic(XdmAtomicValue::Integer(next))))
            }
            _ => None,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.state {
            RangeState::Running { next, end } => {
                let n = usize::try_from(end.abs_diff(next)).map_or(usize::MAX, |n| n.saturating_add(1));
                (n, Some(n))
            }
            RangeState::Pending(..) => (0, None),
            RangeState::Done => (0, Some(0)),
        }
    }
}

/// One predicate of `input[p]`, applied while streaming.
pub(super) struct FilterCursor<'a> {
    ev: Evaluator<'a>,
    input: Box<dyn SequenceCursor + 'a>,
    predicate: &'a Expr,
    env: Env,
    position: usize,
}

impl<'a> FilterCursor<'a> {
    pub(super) fn new(ev: Evaluator<'a>, input: Box<dyn SequenceCursor + 'a>, predicate: &'a Expr, env: Env) -> Self {
        Self { ev, input, predicate, env, position: 0 }
    }
}

impl SequenceCursor for FilterCursor<'_> {
    fn next_item(&mut self) -> Option<Result<XdmItem, Error>> {
        loop {
            let item = match self.input.next_item()? {
                Ok(item) => item,
                Err(e) => return Some(Err(e)),
            };
            self.position += 1;
            self.env.focus = Some(Focus { item: item.clone(), position: self.position, size: None });
            match self.ev.predicate_holds(self.predicate, &self.env, self.position) {
                Ok(true) => return Some(Ok(item)),
                Ok(false) => {}
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Items of `input` satisfying a predicate over bound item/position variables.
pub(super) struct SelectCursor<'a> {
    ev: Evaluator<'a>,
    input: Box<dyn SequenceCursor + 'a>,
    item: VarId,
    pos: Option<VarId>,
    predicate: &'a Expr,
    env: Env,
    position: i64,
}

impl<'a> SelectCursor<'a> {
    pub(super) fn new(
        ev: Evaluator<'a>,
        input: Box<dyn SequenceCursor + 'a>,
        item: VarId,
        pos: Option<VarId>,
        predicate: &'a Expr,
        env: Env,
    ) -> Self {
        Self { ev, input, item, pos, predicate, env, position: 0 }
    }

    fn test(&mut self, item: &XdmItem) -> Result<bool, Error> {
        self.position += 1;
        self.ev.bind(&mut self.env, self.item, vec![item.clone()])?;
        if let Some(pos) = self.pos {
            self.ev.bind(&mut self.env, pos, vec![XdmItem::Atomic(XdmAtomicValue::Integer(self.position))])?;
        }
        self.ev.ebv(self.predicate, &self.env)
    }
}

impl SequenceCursor for SelectCursor<'_> {
    fn next_item(&mut self) -> Option<Result<XdmItem, Error>> {
        loop {
            let item = match self.input.next_item()? {
                Ok(item) => item,
                Err(e) => return Some(Err(e)),
            };
            match self.test(&item) {
                Ok(true) => return Some(Ok(item)),
                Ok(false) => {}
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// `expr` once per item of `source`, interleaved with the pulls on `source`.
pub(super) struct ReplicateCursor<'a> {
    ev: Evaluator<'a>,
    expr: &'a Expr,
    source: Box<dyn SequenceCursor + 'a>,
    env: Env,
    current: Option<Box<dyn SequenceCursor + 'a>>,
}

impl<'a> ReplicateCursor<'a> {
    pub(super) fn new(ev: Evaluator<'a>, expr: &'a Expr, source: Box<dyn SequenceCursor + 'a>, env: Env) -> Self {
        Self { ev, expr, source, env, current: None }
    }
}

impl SequenceCursor for ReplicateCursor<'_> {
    fn next_item(&mut self) -> Option<Result<XdmItem, Error>> {
        loop {
            if let Some(item) = self.current.as_mut().and_then(|c| c.next_item()) {
                return Some(item);
            }
            if let Err(e) = self.source.next_item()? {
                return Some(Err(e));
            }
            self.current = Some(self.ev.stream(self.expr, &self.env));
        }
    }
}

/// Conditional whose branch is opened on the first pull.
pub(super) struct IfCursor<'a> {
    ev: Evaluator<'a>,
    branches: Option<(&'a Expr, &'a Expr, &'a Expr)>,
    env: Env,
    current: Option<Box<dyn SequenceCursor + 'a>>,
}

impl<'a> IfCursor<'a> {
    pub(super) fn new(ev: Evaluator<'a>, cond: &'a Expr, then_expr: &'a Expr, else_expr: &'a Expr, env: Env) -> Self {
        Self { ev, branches: Some((cond, then_expr, else_expr)), env, current: None }
    }
}

impl SequenceCursor for IfCursor<'_> {
    fn next_item(&mut self) -> Option<Result<XdmItem, Error>> {
        if let Some((cond, then_expr, else_expr)) = self.branches.take() {
            match self.ev.ebv(cond, &self.env) {
                Ok(true) => self.current = Some(self.ev.stream(then_expr, &self.env)),
                Ok(false) => self.current = Some(self.ev.stream(else_expr, &self.env)),
                Err(e) => return Some(Err(e)),
            }
        }
        self.current.as_mut()?.next_item()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{QueryBuilder, int, range};
    use crate::runtime::DynamicContext;

    #[test]
    fn range_is_lazy_and_sized() {
        let qb = QueryBuilder::new();
        let q = qb.finish(range(int(3), int(6)));
        let ctx = DynamicContext::default();
        let mut s = crate::evaluate_stream(&q, &ctx).unwrap();
        assert!(matches!(s.next(), Some(Ok(XdmItem::Atomic(XdmAtomicValue::Integer(3))))));
        assert_eq!(s.size_hint(), (3, Some(3)));
        assert_eq!(s.count(), 3);
    }

    #[test]
    fn empty_range_when_bounds_are_reversed() {
        let qb = QueryBuilder::new();
        let q = qb.finish(range(int(5), int(1)));
        assert!(crate::evaluate(&q, &DynamicContext::default()).unwrap().is_empty());
    }

    #[test]
    fn range_ending_at_max_does_not_overflow() {
        let qb = QueryBuilder::new();
        let q = qb.finish(range(int(i64::MAX - 1), int(i64::MAX)));
        assert_eq!(crate::evaluate(&q, &DynamicContext::default()).unwrap().len(), 2);
    }
}
