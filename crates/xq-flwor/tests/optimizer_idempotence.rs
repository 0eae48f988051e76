use rstest::rstest;
use xq_flwor::build::{
    FlworBuilder, QueryBuilder, add, and, asc, boolean, desc, eq, gt, int, lt, modulo, mul, range, seq, string, var,
    window_cond,
};
use xq_flwor::ir::WindowVars;
use xq_flwor::{DynamicContext, Query, evaluate, optimize};

fn positional_filter() -> Query {
    let mut qb = QueryBuilder::new();
    let (a, p) = (qb.var("a"), qb.pos_var("p"));
    let body = FlworBuilder::new()
        .for_at(a, p, seq(vec![string("X"), string("Y")]))
        .where_(lt(var(p), int(2)))
        .return_(var(a));
    qb.finish(body)
}

fn split_conjunction() -> Query {
    let mut qb = QueryBuilder::new();
    let (i, j) = (qb.var("i"), qb.var("j"));
    let body = FlworBuilder::new()
        .for_(i, range(int(1), int(5)))
        .for_(j, range(int(1), int(5)))
        .where_(and(lt(var(i), int(3)), lt(var(j), int(3))))
        .return_(mul(var(i), var(j)));
    qb.finish(body)
}

fn grouped_and_ordered() -> Query {
    let mut qb = QueryBuilder::new();
    let (i, k, is, n) = (qb.var("i"), qb.var("k"), qb.var("is"), qb.var("n"));
    let count = qb.call("count", vec![var(is)]).unwrap();
    let body = FlworBuilder::new()
        .for_(i, range(int(1), int(9)))
        .where_(gt(var(i), int(2)))
        .group_by(vec![(k, modulo(var(i), int(3)))], vec![(i, is)])
        .let_(n, count)
        .order_by(vec![desc(var(n)), asc(var(k))])
        .return_(seq(vec![var(k), var(n)]));
    qb.finish(body)
}

fn sliding_windows() -> Query {
    let mut qb = QueryBuilder::new();
    let (w, s, e, x) = (qb.var("w"), qb.pos_var("s"), qb.pos_var("e"), qb.var("x"));
    let sum = qb.call("sum", vec![var(w)]).unwrap();
    let start = window_cond(WindowVars { pos: Some(s), ..WindowVars::default() }, boolean(true));
    let end = window_cond(WindowVars { pos: Some(e), ..WindowVars::default() }, eq(var(e), add(var(s), int(1))));
    let body = FlworBuilder::new()
        .sliding_window(w, range(int(1), int(4)), start, end, true)
        .let_(x, sum)
        .return_(var(x));
    qb.finish(body)
}

fn nested_pipelines() -> Query {
    let mut qb = QueryBuilder::new();
    let (o, i, y) = (qb.var("o"), qb.var("i"), qb.var("y"));
    let inner = FlworBuilder::new()
        .for_(i, range(int(1), var(o)))
        .let_(y, mul(var(i), var(o)))
        .return_(var(y));
    let body = FlworBuilder::new().for_(o, range(int(1), int(3))).return_(inner);
    qb.finish(body)
}

#[rstest]
#[case::positional(positional_filter())]
#[case::conjunction(split_conjunction())]
#[case::grouping(grouped_and_ordered())]
#[case::window(sliding_windows())]
#[case::nested(nested_pipelines())]
fn second_run_changes_nothing(#[case] mut q: Query) {
    let ctx = DynamicContext::default();
    let expected = evaluate(&q, &ctx).unwrap();
    let first = optimize(&mut q);
    assert!(!first.hit_cap);
    let snapshot = q.clone();
    let second = optimize(&mut q);
    assert_eq!(second.rewrites(), 0, "second run applied {:?}", second.applied);
    assert_eq!(second.rounds, 1);
    assert_eq!(q, snapshot);
    assert_eq!(evaluate(&q, &ctx).unwrap(), expected);
}
