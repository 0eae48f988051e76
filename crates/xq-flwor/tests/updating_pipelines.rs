use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rstest::rstest;
use xq_flwor::build::{FlworBuilder, QueryBuilder, gt, int, range, seq, var};
use xq_flwor::functions::default_function_registry;
use xq_flwor::ir::{Clause, LetClause};
use xq_flwor::runtime::StaticContextBuilder;
use xq_flwor::{
    ClauseKind as K, DynamicContext, ErrorCode, ErrorKind, Expr, FunctionFlags, Pass, QueryPlan, evaluate, optimize,
};

/// A builder whose registry knows an updating `log($x)` that counts its calls.
fn builder_with_log(calls: &Arc<AtomicUsize>) -> QueryBuilder {
    let mut reg = default_function_registry();
    let counter = Arc::clone(calls);
    reg.register_fn("log", 1, FunctionFlags::UPDATING, move |_ctx, _args| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    });
    QueryBuilder::with_static_context(StaticContextBuilder::new().with_functions(Arc::new(reg)).build())
}

#[rstest]
fn updating_pipeline_only_loses_true_filters() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut qb = builder_with_log(&calls);
    let (i, x) = (qb.var("i"), qb.var("x"));
    let total = qb.call("sum", vec![range(int(1), int(2))]).unwrap();
    let always = qb.call("true", vec![]).unwrap();
    let log = qb.call("log", vec![var(i)]).unwrap();
    let body = FlworBuilder::new()
        .for_(i, range(int(1), int(3)))
        .let_(x, total)
        .where_(always)
        .where_(gt(var(i), int(1)))
        .return_(seq(vec![log, var(x)]));
    let mut q = qb.finish(body);
    let report = optimize(&mut q);
    assert_eq!(report.count(Pass::Eliminate), 1);
    assert_eq!(report.count(Pass::Motion), 0);
    assert_eq!(QueryPlan::of(&q).pipelines[0].kinds(), vec![K::For, K::Let, K::Where, K::Return]);
    let out = evaluate(&q, &DynamicContext::default()).unwrap();
    assert_eq!(out.len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[rstest]
fn updating_call_marks_the_pipeline() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut qb = builder_with_log(&calls);
    let i = qb.var("i");
    let log = qb.call("log", vec![var(i)]).unwrap();
    let body = FlworBuilder::new().for_(i, range(int(1), int(3))).return_(log);
    let q = qb.finish(body);
    let plan = QueryPlan::of(&q);
    assert!(plan.pipelines[0].nodes.last().is_some_and(|n| n.facts.updating));
    assert!(plan.to_string().contains("updating"));
}

#[rstest]
fn invalid_pipeline_is_left_alone() {
    // let $b := $a let $a := 1 return $b
    let mut qb = QueryBuilder::new();
    let (a, b) = (qb.var("a"), qb.var("b"));
    let broken = FlworBuilder::new()
        .clause(Clause::Let(LetClause { var: b, expr: var(a) }))
        .clause(Clause::Let(LetClause { var: a, expr: int(1) }))
        .return_(var(b));
    let mut q = qb.finish(broken);
    let before = q.clone();
    let report = optimize(&mut q);
    assert_eq!(report.rewrites(), 0);
    assert_eq!(q, before);
    assert!(matches!(q.body, Expr::Flwor(_)));
    let err = evaluate(&q, &DynamicContext::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::StaticAnalysis);
    assert_eq!(err.code, ErrorCode::FLWR0001);
}
