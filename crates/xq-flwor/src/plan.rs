//! Read-only view of the pipelines in a query, for diagnostics and tests.
//!
//! The view is a snapshot: it copies clause kinds, variable names and the
//! analyzer facts, and does not borrow the query.
use core::fmt;

use itertools::Itertools;

use crate::analyze::{ClauseFacts, analyze};
use crate::ir::{ClauseKind, Expr, Pipeline, Query, VarId, VarTable};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanNode {
    pub kind: ClauseKind,
    /// Names of the variables the clause introduces.
    pub binds: Vec<String>,
    /// Names of the variables the clause reads.
    pub reads: Vec<String>,
    pub facts: ClauseFacts,
}

fn names(vars: &VarTable, ids: impl Iterator<Item = VarId>) -> Vec<String> {
    ids.map(|v| vars.name(v).to_owned()).collect()
}

/// One pipeline: its clauses in order, then a terminal `Return` node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanView {
    pub nodes: Vec<PlanNode>,
}

impl PlanView {
    pub fn of(p: &Pipeline, vars: &VarTable) -> Self {
        let facts = analyze(p);
        let mut nodes: Vec<PlanNode> = p
            .clauses
            .iter()
            .zip(facts.clauses)
            .map(|(c, f)| PlanNode {
                kind: c.kind(),
                binds: names(vars, f.writes.iter().copied()),
                reads: names(vars, f.reads.iter().copied()),
                facts: f,
            })
            .collect();
        nodes.push(PlanNode {
            kind: ClauseKind::Return,
            binds: Vec::new(),
            reads: names(vars, facts.ret.reads.iter().copied()),
            facts: facts.ret,
        });
        Self { nodes }
    }

    pub fn kinds(&self) -> Vec<ClauseKind> {
        self.nodes.iter().map(|n| n.kind).collect()
    }

    /// Clauses only, without the terminal return.
    pub fn clause_count(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    pub fn count(&self, kind: ClauseKind) -> usize {
        self.nodes.iter().filter(|n| n.kind == kind).count()
    }

    pub fn position(&self, kind: ClauseKind) -> Option<usize> {
        self.nodes.iter().position(|n| n.kind == kind)
    }

    /// Index of the clause binding `name`.
    pub fn binder_of(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.binds.iter().any(|b| b == name))
    }
}

impl fmt::Display for PlanView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for n in &self.nodes {
            let mut flags = Vec::new();
            if !n.facts.deterministic {
                flags.push("nondeterministic");
            }
            if n.facts.constructs {
                flags.push("constructs");
            }
            if n.facts.updating {
                flags.push("updating");
            }
            if n.facts.single_use {
                flags.push("single-use");
            }
            write!(f, "{}", n.kind.keyword())?;
            if !n.binds.is_empty() {
                write!(f, " {}", n.binds.iter().map(|b| format!("${b}")).join(", "))?;
            }
            if !n.reads.is_empty() {
                write!(f, " <- {}", n.reads.iter().map(|r| format!("${r}")).join(", "))?;
            }
            if !flags.is_empty() {
                write!(f, " [{}]", flags.iter().join(" "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Every pipeline of a query, outermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    pub pipelines: Vec<PlanView>,
    /// Filters introduced for `where` clauses and positional predicates.
    pub selects: usize,
}

impl QueryPlan {
    pub fn of(query: &Query) -> Self {
        let pipelines = query.pipelines().into_iter().map(|p| PlanView::of(p, &query.vars)).collect();
        let mut selects = 0;
        query.body.walk(&mut |e| {
            if matches!(e, Expr::Select { .. }) {
                selects += 1;
            }
        });
        Self { pipelines, selects }
    }

    /// Number of clauses of `kind` over all pipelines.
    pub fn count(&self, kind: ClauseKind) -> usize {
        self.pipelines.iter().map(|p| p.count(kind)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, p) in self.pipelines.iter().enumerate() {
            writeln!(f, "pipeline {i}:")?;
            for line in p.to_string().lines() {
                writeln!(f, "  {line}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{FlworBuilder, QueryBuilder, gt, int, range, var};

    #[test]
    fn renders_clauses_and_return() {
        let mut qb = QueryBuilder::new();
        let i = qb.var("i");
        let rnd = qb.call("random", vec![]).unwrap();
        let body = FlworBuilder::new().for_(i, range(int(1), int(3))).where_(gt(var(i), rnd)).return_(var(i));
        let q = qb.finish(body);
        let plan = QueryPlan::of(&q);
        assert_eq!(plan.pipelines[0].kinds(), vec![ClauseKind::For, ClauseKind::Where, ClauseKind::Return]);
        let text = plan.to_string();
        assert!(text.contains("for $i"));
        assert!(text.contains("where <- $i [nondeterministic]"));
        assert!(text.contains("return <- $i"));
    }
}
