use rstest::rstest;
use xq_flwor::build::{
    FlworBuilder, QueryBuilder, boolean, elem_ctor, gt, int, modulo, or, range, seq, sub, value_cmp, var, window_cond,
};
use xq_flwor::ir::{ComparisonOp, WindowVars};
use xq_flwor::{DynamicContext, Expr, Query, XdmItem, evaluate, evaluate_stream};

fn sums(out: &[XdmItem]) -> Vec<String> {
    out.iter().map(XdmItem::string_value).collect()
}

fn pos(p: xq_flwor::VarId) -> WindowVars {
    WindowVars { pos: Some(p), ..WindowVars::default() }
}

/// `for sliding window $w in 1 to 5 start at $s when true() end at $e when $e - $s eq 2 return sum($w)`
fn sliding_of_three(only_end: bool) -> Query {
    let mut qb = QueryBuilder::new();
    let (w, s, e) = (qb.var("w"), qb.pos_var("s"), qb.pos_var("e"));
    let total = qb.call("sum", vec![var(w)]).unwrap();
    let start = window_cond(pos(s), boolean(true));
    let end = window_cond(pos(e), value_cmp(ComparisonOp::Eq, sub(var(e), var(s)), int(2)));
    let body = FlworBuilder::new().sliding_window(w, range(int(1), int(5)), start, end, only_end).return_(total);
    qb.finish(body)
}

#[rstest]
#[case::all_windows(false, &["6", "9", "12", "9", "5"])]
#[case::only_end(true, &["6", "9", "12"])]
fn sliding_windows_overlap(#[case] only_end: bool, #[case] expected: &[&str]) {
    let q = sliding_of_three(only_end);
    assert_eq!(sums(&evaluate(&q, &DynamicContext::default()).unwrap()), expected);
}

#[rstest]
fn tumbling_window_closes_on_end_item() {
    // for tumbling window $w in 1 to 7 start when true() end $e when $e mod 3 eq 0 return sum($w)
    let mut qb = QueryBuilder::new();
    let (w, e) = (qb.var("w"), qb.var("e"));
    let total = qb.call("sum", vec![var(w)]).unwrap();
    let start = window_cond(WindowVars::default(), boolean(true));
    let end = window_cond(
        WindowVars { item: Some(e), ..WindowVars::default() },
        value_cmp(ComparisonOp::Eq, modulo(var(e), int(3)), int(0)),
    );
    let body = FlworBuilder::new().tumbling_window(w, range(int(1), int(7)), start, Some(end), false).return_(total);
    let q = qb.finish(body);
    assert_eq!(sums(&evaluate(&q, &DynamicContext::default()).unwrap()), ["6", "15", "7"]);
}

#[rstest]
fn first_window_of_huge_source_is_available_immediately() {
    let mut qb = QueryBuilder::new();
    let (w, s, e) = (qb.var("w"), qb.pos_var("s"), qb.pos_var("e"));
    let total = qb.call("sum", vec![var(w)]).unwrap();
    let start = window_cond(pos(s), boolean(true));
    let end = window_cond(pos(e), value_cmp(ComparisonOp::Eq, sub(var(e), var(s)), int(1)));
    let body = FlworBuilder::new()
        .tumbling_window(w, range(int(1), int(1_000_000_000)), start, Some(end), false)
        .return_(total);
    let q = qb.finish(body);
    let ctx = DynamicContext::default();
    let first: Vec<_> = evaluate_stream(&q, &ctx).unwrap().take(2).collect::<Result<_, _>>().unwrap();
    assert_eq!(sums(&first), ["3", "7"]);
}

#[rstest]
fn previous_item_starts_a_new_run() {
    // start $cur previous $prev when empty($prev) or $cur - $prev > 1
    let mut qb = QueryBuilder::new();
    let (w, cur, prev) = (qb.var("w"), qb.var("cur"), qb.var("prev"));
    let first = qb.call("empty", vec![var(prev)]).unwrap();
    let gap = gt(sub(var(cur), var(prev)), int(1));
    let start = window_cond(WindowVars { item: Some(cur), prev: Some(prev), ..WindowVars::default() }, or(first, gap));
    let source = seq(vec![int(1), int(2), int(5), int(6), int(9)]);
    let body = FlworBuilder::new().tumbling_window(w, source, start, None, false).return_(elem_ctor("run", var(w)));
    let q = qb.finish(body);
    assert_eq!(sums(&evaluate(&q, &DynamicContext::default()).unwrap()), ["1 2", "5 6", "9"]);
}

#[rstest]
fn next_item_is_empty_at_the_end() {
    // end $last next $next when empty($next)
    let mut qb = QueryBuilder::new();
    let (w, nxt) = (qb.var("w"), qb.var("next"));
    let total = qb.call("sum", vec![var(w)]).unwrap();
    let at_end = qb.call("empty", vec![var(nxt)]).unwrap();
    let start = window_cond(WindowVars::default(), boolean(true));
    let end = window_cond(WindowVars { next: Some(nxt), ..WindowVars::default() }, at_end);
    let body = FlworBuilder::new().tumbling_window(w, range(int(1), int(4)), start, Some(end), true).return_(total);
    let q = qb.finish(body);
    assert_eq!(sums(&evaluate(&q, &DynamicContext::default()).unwrap()), ["10"]);
}

#[rstest]
fn sliding_window_without_end_is_rejected() {
    let mut qb = QueryBuilder::new();
    let w = qb.var("w");
    let start = window_cond(WindowVars::default(), boolean(true));
    let mut clause = FlworBuilder::new().sliding_window(w, range(int(1), int(3)), start.clone(), start, false).build(var(w));
    let xq_flwor::Clause::Window(win) = &mut clause.clauses[0] else { unreachable!() };
    win.end = None;
    let q = qb.finish(Expr::Flwor(Box::new(clause)));
    let err = evaluate(&q, &DynamicContext::default()).unwrap_err();
    assert_eq!(err.kind, xq_flwor::ErrorKind::StaticAnalysis);
}
