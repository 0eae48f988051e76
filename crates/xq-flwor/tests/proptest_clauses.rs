use std::collections::HashSet;

use proptest::prelude::*;
use xq_flwor::build::{FlworBuilder, QueryBuilder, boolean, int, modulo, range, seq, sub, value_cmp, var, window_cond};
use xq_flwor::ir::{ComparisonOp, WindowVars};
use xq_flwor::{DynamicContext, XdmAtomicValue as A, XdmItem as I, evaluate};

fn ints(out: &[I]) -> Vec<i64> {
    out.iter()
        .map(|i| match i {
            I::Atomic(A::Integer(n)) => *n,
            other => panic!("integer expected, got {other}"),
        })
        .collect()
}

proptest! {
    #[test]
    fn groups_partition_their_input(xs in proptest::collection::vec(-20i64..20, 0..40), m in 1i64..6) {
        // for $x in xs group by $k := $x mod m return count($x)
        let mut qb = QueryBuilder::new();
        let (x, k, members) = (qb.var("x"), qb.var("k"), qb.var("x"));
        let count = qb.call("count", vec![var(members)]).unwrap();
        let body = FlworBuilder::new()
            .for_(x, seq(xs.iter().map(|n| int(*n)).collect()))
            .group_by(vec![(k, modulo(var(x), int(m)))], vec![(x, members)])
            .return_(count);
        let q = qb.finish(body);
        let counts = ints(&evaluate(&q, &DynamicContext::default()).unwrap());
        let distinct: HashSet<i64> = xs.iter().map(|n| n % m).collect();
        prop_assert_eq!(counts.len(), distinct.len());
        prop_assert_eq!(counts.iter().sum::<i64>(), xs.len() as i64);
        prop_assert!(counts.iter().all(|c| *c > 0));
    }

    #[test]
    fn tumbling_windows_concatenate_to_the_input(xs in proptest::collection::vec(0i64..100, 0..30), width in 1i64..5) {
        // for tumbling window $w in xs start at $s when true() end at $e when $e - $s eq width - 1 return $w
        let mut qb = QueryBuilder::new();
        let (w, s, e) = (qb.var("w"), qb.pos_var("s"), qb.pos_var("e"));
        let start = window_cond(WindowVars { pos: Some(s), ..WindowVars::default() }, boolean(true));
        let end = window_cond(
            WindowVars { pos: Some(e), ..WindowVars::default() },
            value_cmp(ComparisonOp::Eq, sub(var(e), var(s)), int(width - 1)),
        );
        let source = seq(xs.iter().map(|n| int(*n)).collect());
        let body = FlworBuilder::new().tumbling_window(w, source, start, Some(end), false).return_(var(w));
        let q = qb.finish(body);
        prop_assert_eq!(ints(&evaluate(&q, &DynamicContext::default()).unwrap()), xs);
    }

    #[test]
    fn window_counts_follow_width(n in 0i64..25, width in 1i64..6) {
        // start at $s when true() end at $e when $e - $s eq width - 1, over 1 to n
        let ctx = DynamicContext::default();
        let count_windows = |sliding: bool| {
            let mut qb = QueryBuilder::new();
            let (w, s, e) = (qb.var("w"), qb.pos_var("s"), qb.pos_var("e"));
            let size = qb.call("count", vec![var(w)]).unwrap();
            let start = window_cond(WindowVars { pos: Some(s), ..WindowVars::default() }, boolean(true));
            let end = window_cond(
                WindowVars { pos: Some(e), ..WindowVars::default() },
                value_cmp(ComparisonOp::Eq, sub(var(e), var(s)), int(width - 1)),
            );
            let source = range(int(1), int(n));
            let flwor = if sliding {
                FlworBuilder::new().sliding_window(w, source, start, end, true)
            } else {
                FlworBuilder::new().tumbling_window(w, source, start, Some(end), false)
            };
            ints(&evaluate(&qb.finish(flwor.return_(size)), &ctx).unwrap())
        };
        let sliding = count_windows(true);
        prop_assert_eq!(sliding.len() as i64, (n - width + 1).max(0));
        prop_assert!(sliding.iter().all(|c| *c == width));
        let tumbling = count_windows(false);
        prop_assert_eq!(tumbling.len() as i64, (n + width - 1) / width);
        prop_assert_eq!(tumbling.iter().sum::<i64>(), n);
    }
}
