//! Sliding and tumbling windows.
//!
//! The source of each input tuple is pulled lazily into a [`WindowBuffer`];
//! items before the earliest window that can still open are released.

use std::collections::VecDeque;

use super::clauses::TupleCursor;
use super::{Env, Evaluator, SequenceCursor};
use crate::ir::{WindowClause, WindowCondition, WindowKind, WindowVars};
use crate::runtime::Error;
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence};

/// Random access over a cursor, addressed by absolute 0-based index.
struct WindowBuffer<'a> {
    source: Box<dyn SequenceCursor + 'a>,
    items: VecDeque<XdmItem>,
    /// Absolute index of `items[0]`.
    offset: usize,
    exhausted: bool,
}

impl<'a> WindowBuffer<'a> {
    fn new(source: Box<dyn SequenceCursor + 'a>) -> Self {
        Self { source, items: VecDeque::new(), offset: 0, exhausted: false }
    }

    fn get(&mut self, i: usize) -> Result<Option<XdmItem>, Error> {
        while !self.exhausted && self.offset + self.items.len() <= i {
            match self.source.next_item() {
                Some(item) => self.items.push_back(item?),
                None => self.exhausted = true,
            }
        }
        Ok(i.checked_sub(self.offset).and_then(|k| self.items.get(k)).cloned())
    }

    /// Items `start..=end`; both must have been pulled already.
    fn slice(&self, start: usize, end: usize) -> XdmSequence {
        self.items.range(start - self.offset..=end - self.offset).cloned().collect()
    }

    fn release(&mut self, before: usize) {
        while self.offset < before && self.items.pop_front().is_some() {
            self.offset += 1;
        }
    }
}

struct WindowState<'a> {
    buffer: WindowBuffer<'a>,
    next_start: usize,
    /// Start found while closing a tumbling window that has no end condition.
    pending_start: Option<usize>,
}

pub(super) struct WindowCursor<'a> {
    ev: Evaluator<'a>,
    upstream: Box<dyn TupleCursor + 'a>,
    clause: &'a WindowClause,
    state: Option<WindowState<'a>>,
}

impl<'a> WindowCursor<'a> {
    pub(super) fn new(ev: Evaluator<'a>, upstream: Box<dyn TupleCursor + 'a>, clause: &'a WindowClause) -> Self {
        Self { ev, upstream, clause, state: None }
    }
}

fn one(item: Option<XdmItem>) -> XdmSequence {
    item.into_iter().collect()
}

#[allow(clippy::cast_possible_wrap)]
fn bind_vars(
    ev: Evaluator<'_>,
    vars: &WindowVars,
    buf: &mut WindowBuffer<'_>,
    i: usize,
    env: &mut Env,
) -> Result<(), Error> {
    if let Some(v) = vars.item {
        ev.bind(env, v, one(buf.get(i)?))?;
    }
    if let Some(v) = vars.pos {
        ev.bind(env, v, vec![XdmItem::Atomic(XdmAtomicValue::Integer(i as i64 + 1))])?;
    }
    if let Some(v) = vars.prev {
        let prev = match i.checked_sub(1) {
            Some(p) => buf.get(p)?,
            None => None,
        };
        ev.bind(env, v, one(prev))?;
    }
    if let Some(v) = vars.next {
        ev.bind(env, v, one(buf.get(i + 1)?))?;
    }
    Ok(())
}

fn holds<'a>(
    ev: Evaluator<'a>,
    cond: &'a WindowCondition,
    buf: &mut WindowBuffer<'_>,
    i: usize,
    env: &mut Env,
) -> Result<bool, Error> {
    bind_vars(ev, &cond.vars, buf, i, env)?;
    ev.ebv(&cond.predicate, env)
}

/// First index at or after `from` where `cond` holds.
fn scan<'a>(
    ev: Evaluator<'a>,
    cond: &'a WindowCondition,
    buf: &mut WindowBuffer<'_>,
    from: usize,
    env: &mut Env,
) -> Result<Result<usize, usize>, Error> {
    let mut i = from;
    loop {
        if buf.get(i)?.is_none() {
            // Err: exhausted, carrying the number of source items
            return Ok(Err(i));
        }
        if holds(ev, cond, buf, i, env)? {
            return Ok(Ok(i));
        }
        i += 1;
    }
}

/// Next `(start, end)` window of the current source, if any.
fn next_window<'a>(
    ev: Evaluator<'a>,
    clause: &'a WindowClause,
    st: &mut WindowState<'_>,
    env: &mut Env,
) -> Result<Option<(usize, usize)>, Error> {
    loop {
        st.buffer.release(st.next_start.saturating_sub(1));
        let start = match st.pending_start.take() {
            Some(s) => s,
            None => match scan(ev, &clause.start, &mut st.buffer, st.next_start, env)? {
                Ok(s) => s,
                Err(_) => return Ok(None),
            },
        };
        // the end condition may read the start variables
        bind_vars(ev, &clause.start.vars, &mut st.buffer, start, env)?;
        let end = match &clause.end {
            Some(cond) => match scan(ev, cond, &mut st.buffer, start, env)? {
                Ok(e) => Some(e),
                Err(len) if !clause.only_end => Some(len - 1),
                Err(_) => None,
            },
            // a tumbling window without end condition closes before the next start
            None => match scan(ev, &clause.start, &mut st.buffer, start + 1, env)? {
                Ok(next) => {
                    st.pending_start = Some(next);
                    Some(next - 1)
                }
                Err(len) => Some(len - 1),
            },
        };
        match (end, clause.kind) {
            (Some(e), WindowKind::Tumbling) => {
                st.next_start = e + 1;
                return Ok(Some((start, e)));
            }
            (Some(e), WindowKind::Sliding) => {
                st.next_start = start + 1;
                return Ok(Some((start, e)));
            }
            // an unclosed tumbling window would have reached the end of the input
            (None, WindowKind::Tumbling) => return Ok(None),
            (None, WindowKind::Sliding) => st.next_start = start + 1,
        }
    }
}

impl TupleCursor for WindowCursor<'_> {
    fn advance(&mut self, env: &mut Env) -> Result<bool, Error> {
        let (ev, clause) = (self.ev, self.clause);
        loop {
            if let Some(st) = self.state.as_mut() {
                if let Some((s, e)) = next_window(ev, clause, st, env)? {
                    bind_vars(ev, &clause.start.vars, &mut st.buffer, s, env)?;
                    if let Some(end) = &clause.end {
                        bind_vars(ev, &end.vars, &mut st.buffer, e, env)?;
                    }
                    ev.bind(env, clause.var, st.buffer.slice(s, e))?;
                    return Ok(true);
                }
                self.state = None;
            }
            if !self.upstream.advance(env)? {
                return Ok(false);
            }
            let source = ev.stream(&clause.source, env);
            self.state = Some(WindowState { buffer: WindowBuffer::new(source), next_start: 0, pending_start: None });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{FlworBuilder, QueryBuilder, int, range, var, window_cond};
    use crate::runtime::DynamicContext;

    fn windows(out: &XdmSequence) -> Vec<String> {
        out.iter().map(XdmItem::string_value).collect()
    }

    #[test]
    fn buffer_releases_consumed_prefix() {
        let items: XdmSequence = (1..=5i64).map(XdmItem::from).collect();
        let mut buf = WindowBuffer::new(Box::new(super::super::cursors::VecCursor::new(items)));
        assert_eq!(buf.get(2).unwrap(), Some(XdmItem::from(3i64)));
        buf.release(2);
        assert_eq!(buf.offset, 2);
        assert_eq!(buf.get(1).unwrap(), None);
        assert!(buf.get(3).unwrap().is_some());
        assert_eq!(buf.slice(2, 3), vec![XdmItem::from(3i64), XdmItem::from(4i64)]);
        assert_eq!(buf.get(5).unwrap(), None);
    }

    #[test]
    fn tumbling_without_end_partitions_at_starts() {
        let mut qb = QueryBuilder::new();
        let (w, s) = (qb.var("w"), qb.var("s"));
        let odd = crate::build::eq(crate::build::modulo(var(s), int(2)), int(1));
        let start = window_cond(WindowVars { item: Some(s), ..WindowVars::default() }, odd);
        let body = FlworBuilder::new()
            .tumbling_window(w, range(int(1), int(5)), start, None, false)
            .return_(crate::build::elem_ctor("w", var(w)));
        let q = qb.finish(body);
        let out = crate::evaluate(&q, &DynamicContext::default()).unwrap();
        assert_eq!(windows(&out), ["1 2", "3 4", "5"]);
    }
}
