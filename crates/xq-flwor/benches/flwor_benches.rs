use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use xq_flwor::build::{FlworBuilder, QueryBuilder, add, and, eq, int, lt, modulo, mul, range, var};
use xq_flwor::{DynamicContext, Query, evaluate, evaluate_stream, optimize};

/// for $i in 1 to 200, $j in 1 to 200 where $i < 20 and $j mod 7 = 0 return $i * $j
fn conjunctive_join() -> Query {
    let mut qb = QueryBuilder::new();
    let (i, j) = (qb.var("i"), qb.var("j"));
    let body = FlworBuilder::new()
        .for_(i, range(int(1), int(200)))
        .for_(j, range(int(1), int(200)))
        .where_(and(lt(var(i), int(20)), eq(modulo(var(j), int(7)), int(0))))
        .return_(mul(var(i), var(j)));
    qb.finish(body)
}

/// for $i in 1 to 5000 let $t := sum(1 to 100) return $i + $t
fn invariant_binding() -> Query {
    let mut qb = QueryBuilder::new();
    let (i, t) = (qb.var("i"), qb.var("t"));
    let total = qb.call("sum", vec![range(int(1), int(100))]).expect("known function");
    let body = FlworBuilder::new()
        .for_(i, range(int(1), int(5000)))
        .let_(t, total)
        .return_(add(var(i), var(t)));
    qb.finish(body)
}

fn queries() -> Vec<(&'static str, Query)> {
    vec![("conjunctive_join", conjunctive_join()), ("invariant_binding", invariant_binding())]
}

fn benchmark_optimizer(c: &mut Criterion) {
    c.bench_function("optimizer/optimize", |b| {
        b.iter(|| {
            for (_, q) in queries() {
                let mut q = q;
                black_box(optimize(black_box(&mut q)));
            }
        })
    });
}

fn benchmark_evaluator(c: &mut Criterion) {
    let ctx = DynamicContext::default();
    let mut group = c.benchmark_group("evaluator/evaluate");
    for (name, q) in queries() {
        let mut optimized = q.clone();
        optimize(&mut optimized);
        group.bench_with_input(BenchmarkId::new("plain", name), &q, |b, q| {
            b.iter(|| black_box(evaluate(q, black_box(&ctx)).map(|r| r.len())));
        });
        group.bench_with_input(BenchmarkId::new("optimized", name), &optimized, |b, q| {
            b.iter(|| black_box(evaluate(q, black_box(&ctx)).map(|r| r.len())));
        });
    }
    group.finish();
}

fn benchmark_first_item(c: &mut Criterion) {
    let ctx = DynamicContext::default();
    let q = conjunctive_join();
    c.bench_function("evaluator/first_item", |b| {
        b.iter(|| {
            let mut stream = evaluate_stream(&q, &ctx).expect("valid query");
            black_box(stream.next());
        })
    });
}

criterion_group!(benches, benchmark_optimizer, benchmark_evaluator, benchmark_first_item);
criterion_main!(benches);
