use rstest::rstest;
use xq_flwor::build::{
    FlworBuilder, QueryBuilder, asc, dbl, dec, desc, empty, eq, idiv, if_, int, modulo, range, seq, string, sub, var,
};
use xq_flwor::ir::OrderSpec;
use xq_flwor::{
    AtomicType, DynamicContext, ErrorCode, ErrorKind, SeqType, XdmItem, evaluate, evaluate_stream, optimize,
};

fn texts(out: &[XdmItem]) -> Vec<String> {
    out.iter().map(XdmItem::string_value).collect()
}

fn ctx() -> DynamicContext {
    DynamicContext::default()
}

#[rstest]
fn groups_come_out_in_first_seen_order() {
    // for $x in 1 to 7 group by $k := $x mod 3 return ($k, count($x))
    let mut qb = QueryBuilder::new();
    let (x, k, xs) = (qb.var("x"), qb.var("k"), qb.var("x"));
    let count = qb.call("count", vec![var(xs)]).unwrap();
    let body = FlworBuilder::new()
        .for_(x, range(int(1), int(7)))
        .group_by(vec![(k, modulo(var(x), int(3)))], vec![(x, xs)])
        .return_(seq(vec![var(k), count]));
    let q = qb.finish(body);
    assert_eq!(texts(&evaluate(&q, &ctx()).unwrap()), ["1", "3", "2", "2", "0", "2"]);
}

#[rstest]
fn equal_numeric_keys_share_a_group() {
    let mut qb = QueryBuilder::new();
    let (x, k, xs) = (qb.var("x"), qb.var("k"), qb.var("xs"));
    let count = qb.call("count", vec![var(xs)]).unwrap();
    let body = FlworBuilder::new()
        .for_(x, seq(vec![int(1), dec(1.0), int(2)]))
        .group_by(vec![(k, var(x))], vec![(x, xs)])
        .return_(count);
    let q = qb.finish(body);
    assert_eq!(texts(&evaluate(&q, &ctx()).unwrap()), ["2", "1"]);
}

#[rstest]
fn large_integer_groups_with_equal_double() {
    // 2^53 + 1 and 2^53e0 compare equal as doubles
    let mut qb = QueryBuilder::new();
    let (x, k, xs) = (qb.var("x"), qb.var("k"), qb.var("xs"));
    let count = qb.call("count", vec![var(xs)]).unwrap();
    let body = FlworBuilder::new()
        .for_(x, seq(vec![int((1 << 53) + 1), dbl(9_007_199_254_740_992.0), int(3)]))
        .group_by(vec![(k, var(x))], vec![(x, xs)])
        .return_(count);
    let q = qb.finish(body);
    assert_eq!(texts(&evaluate(&q, &ctx()).unwrap()), ["2", "1"]);
}

#[rstest]
fn empty_keys_share_a_group() {
    let mut qb = QueryBuilder::new();
    let (x, k, xs) = (qb.var("x"), qb.var("k"), qb.var("xs"));
    let count = qb.call("count", vec![var(xs)]).unwrap();
    let key = if_(eq(var(x), int(2)), int(0), empty());
    let body = FlworBuilder::new()
        .for_(x, range(int(1), int(3)))
        .group_by(vec![(k, key)], vec![(x, xs)])
        .return_(count);
    let q = qb.finish(body);
    assert_eq!(texts(&evaluate(&q, &ctx()).unwrap()), ["2", "1"]);
}

#[rstest]
fn groups_can_be_ordered() {
    // for $x in 1 to 7 group by $k := $x mod 3 order by sum($x) descending return $k
    let mut qb = QueryBuilder::new();
    let (x, k, xs) = (qb.var("x"), qb.var("k"), qb.var("xs"));
    let total = qb.call("sum", vec![var(xs)]).unwrap();
    let body = FlworBuilder::new()
        .for_(x, range(int(1), int(7)))
        .group_by(vec![(k, modulo(var(x), int(3)))], vec![(x, xs)])
        .order_by(vec![desc(total)])
        .return_(var(k));
    let mut q = qb.finish(body);
    let expected = evaluate(&q, &ctx()).unwrap();
    assert_eq!(texts(&expected), ["1", "0", "2"]);
    optimize(&mut q);
    assert_eq!(evaluate(&q, &ctx()).unwrap(), expected);
}

#[rstest]
fn strings_sort_descending() {
    let mut qb = QueryBuilder::new();
    let s = qb.var("s");
    let body = FlworBuilder::new()
        .for_(s, seq(vec![string("b"), string("a"), string("c")]))
        .order_by(vec![desc(var(s))])
        .return_(var(s));
    let q = qb.finish(body);
    assert_eq!(texts(&evaluate(&q, &ctx()).unwrap()), ["c", "b", "a"]);
}

#[rstest]
#[case::least(true, &["1", "2", "3"])]
#[case::greatest(false, &["2", "3", "1"])]
fn empty_order_keys(#[case] empty_least: bool, #[case] expected: &[&str]) {
    // order by (if ($x eq 1) then () else $x) empty least|greatest
    let mut qb = QueryBuilder::new();
    let x = qb.var("x");
    let key = if_(eq(var(x), int(1)), empty(), var(x));
    let body = FlworBuilder::new()
        .for_(x, seq(vec![int(2), int(1), int(3)]))
        .order_by(vec![OrderSpec { key, ascending: true, empty_least }])
        .return_(var(x));
    let q = qb.finish(body);
    assert_eq!(texts(&evaluate(&q, &ctx()).unwrap()), expected);
}

#[rstest]
fn multi_item_order_key_is_a_type_error() {
    let mut qb = QueryBuilder::new();
    let x = qb.var("x");
    let body = FlworBuilder::new()
        .for_(x, range(int(1), int(2)))
        .order_by(vec![asc(range(int(1), var(x)))])
        .return_(var(x));
    let q = qb.finish(body);
    assert_eq!(evaluate(&q, &ctx()).unwrap_err().code, ErrorCode::XPTY0004);
}

#[rstest]
fn error_surfaces_lazily_after_earlier_items() {
    // for $i in 1 to 5 return 10 idiv ($i - 2)
    let mut qb = QueryBuilder::new();
    let i = qb.var("i");
    let body = FlworBuilder::new().for_(i, range(int(1), int(5))).return_(idiv(int(10), sub(var(i), int(2))));
    let q = qb.finish(body);
    let ctx = ctx();
    let mut stream = evaluate_stream(&q, &ctx).unwrap();
    assert_eq!(stream.next().unwrap().unwrap(), XdmItem::from(-10i64));
    let err = stream.next().unwrap().unwrap_err();
    assert_eq!(err.code, ErrorCode::FOAR0001);
    assert!(stream.next().is_none());
}

#[rstest]
fn typed_binding_with_too_many_items() {
    // let $x as xs:integer := (1, 2) return $x
    let mut qb = QueryBuilder::new();
    let x = qb.typed_var("x", SeqType::atomic(AtomicType::Integer));
    let body = FlworBuilder::new().let_(x, seq(vec![int(1), int(2)])).return_(var(x));
    let q = qb.finish(body);
    let err = evaluate(&q, &ctx()).unwrap_err();
    assert_eq!(err.code, ErrorCode::XPTY0004);
    assert_eq!(err.kind, ErrorKind::Cardinality);
}

#[rstest]
#[case::unknown("no-such-function", 0)]
#[case::wrong_arity("count", 2)]
fn unresolved_function_is_a_static_error(#[case] name: &str, #[case] arity: usize) {
    let qb = QueryBuilder::new();
    let err = qb.call(name, vec![int(1); arity]).unwrap_err();
    assert_eq!(err.code, ErrorCode::XPST0017);
}

#[rstest]
fn user_error_carries_its_message() {
    let mut qb = QueryBuilder::new();
    let i = qb.var("i");
    let fail = qb.call("error", vec![string("stop here")]).unwrap();
    let body = FlworBuilder::new().for_(i, range(int(1), int(3))).return_(seq(vec![var(i), fail]));
    let mut q = qb.finish(body);
    optimize(&mut q);
    let ctx = ctx();
    let mut stream = evaluate_stream(&q, &ctx).unwrap();
    assert_eq!(stream.next().unwrap().unwrap(), XdmItem::from(1i64));
    let err = stream.next().unwrap().unwrap_err();
    assert_eq!(err.code, ErrorCode::FOER0000);
    assert_eq!(err.message, "stop here");
}
