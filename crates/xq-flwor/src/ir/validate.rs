use std::collections::BTreeSet;

use super::{Clause, Pipeline, WindowKind};
use crate::runtime::Error;

/// Check the structural invariants of one pipeline (not of nested ones).
///
/// - every variable is introduced by exactly one clause
/// - no clause reads a variable introduced by itself or a later clause
/// - after a `Group`, only grouping variables and rebinds of that group remain visible
/// - sliding windows have an end condition
pub fn validate_pipeline(p: &Pipeline) -> Result<(), Error> {
    let mut introduced = BTreeSet::new();
    let mut later: Vec<BTreeSet<_>> = vec![BTreeSet::new(); p.clauses.len() + 1];
    for (i, c) in p.clauses.iter().enumerate().rev() {
        later[i] = later[i + 1].clone();
        later[i].extend(c.writes());
    }
    // variables hidden by the most recent group
    let mut hidden = BTreeSet::new();
    for (i, c) in p.clauses.iter().enumerate() {
        let reads = c.reads();
        if let Some(v) = reads.iter().find(|v| later[i].contains(*v)) {
            return Err(Error::static_analysis(format!("clause {i} ({}) reads {v} before it is bound", c.kind().keyword())));
        }
        if let Some(v) = reads.iter().find(|v| hidden.contains(*v)) {
            return Err(Error::static_analysis(format!("clause {i} reads {v} which is out of scope after group by")));
        }
        for w in c.writes() {
            if !introduced.insert(w) {
                return Err(Error::static_analysis(format!("variable {w} is introduced twice")));
            }
        }
        match c {
            Clause::Group(_) => {
                let visible: BTreeSet<_> = c.writes().into_iter().collect();
                hidden.extend(introduced.iter().copied().filter(|v| !visible.contains(v)));
            }
            Clause::Window(w) if w.kind == WindowKind::Sliding && w.end.is_none() => {
                return Err(Error::static_analysis("sliding window without end condition"));
            }
            _ => {}
        }
    }
    if let Some(v) = p.ret.free_vars().iter().find(|v| hidden.contains(*v)) {
        return Err(Error::static_analysis(format!("return reads {v} which is out of scope after group by")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{FlworBuilder, QueryBuilder, int, var};
    use crate::ir::{Clause, LetClause};

    #[test]
    fn forward_reference_is_rejected() {
        let mut qb = QueryBuilder::new();
        let (a, b) = (qb.var("a"), qb.var("b"));
        let mut p = FlworBuilder::new().let_(a, int(1)).let_(b, var(a)).build(var(b));
        assert!(validate_pipeline(&p).is_ok());
        p.clauses.swap(0, 1);
        let err = validate_pipeline(&p).unwrap_err();
        assert_eq!(err.kind, crate::runtime::ErrorKind::StaticAnalysis);
    }

    #[test]
    fn group_hides_non_grouping_vars() {
        let mut qb = QueryBuilder::new();
        let (a, k) = (qb.var("a"), qb.var("k"));
        let p = FlworBuilder::new().let_(a, int(1)).group_by(vec![(k, int(1))], vec![]).build(var(a));
        assert!(validate_pipeline(&p).is_err());
        let dup = Pipeline {
            clauses: vec![Clause::Let(LetClause { var: a, expr: int(1) }), Clause::Let(LetClause { var: a, expr: int(2) })],
            ret: var(a),
        };
        assert!(validate_pipeline(&dup).is_err());
    }
}
