//! FLWOR clause pipelines: model, dependency analysis, rewriting and lazy evaluation.
//!
//! A query is assembled programmatically with [`build::QueryBuilder`] and
//! [`build::FlworBuilder`], optionally rewritten by [`optimizer::optimize`], and
//! evaluated with [`evaluator::evaluate_stream`] (lazy) or [`evaluator::evaluate`].
//!
//! ```
//! use xq_flwor::build::{FlworBuilder, QueryBuilder, int, range, var, mul};
//! use xq_flwor::{evaluate, optimize, DynamicContext, XdmItem, XdmAtomicValue as A};
//!
//! let mut qb = QueryBuilder::new();
//! let i = qb.var("i");
//! let body = FlworBuilder::new()
//!     .for_(i, range(int(1), int(3)))
//!     .return_(mul(var(i), int(2)));
//! let mut query = qb.finish(body);
//! optimize(&mut query);
//! let out = evaluate(&query, &DynamicContext::default()).unwrap();
//! assert_eq!(out, vec![
//!     XdmItem::Atomic(A::Integer(2)),
//!     XdmItem::Atomic(A::Integer(4)),
//!     XdmItem::Atomic(A::Integer(6)),
//! ]);
//! ```
pub mod analyze;
pub mod evaluator;
pub mod functions;
pub mod ir;
pub mod optimizer;
pub mod plan;
pub mod runtime;
pub mod simple_node;
pub mod types;
pub mod xdm;

pub use ir::build;

pub use analyze::{ClauseFacts, PipelineFacts, analyze};
pub use evaluator::{ItemStream, SequenceCursor, evaluate, evaluate_stream};
pub use ir::{Clause, ClauseKind, Expr, Pipeline, Query, VarId, VarTable};
pub use optimizer::{OptimizeReport, Optimizer, OptimizerConfig, Pass, optimize};
pub use plan::{PlanNode, PlanView, QueryPlan};
pub use runtime::{
    DynamicContext, DynamicContextBuilder, Error, ErrorCode, ErrorKind, FunctionFlags, FunctionRegistry,
    StaticContext,
};
pub use simple_node::{SimpleNode, SimpleNodeBuilder, elem, text};
pub use types::{AtomicType, ItemType, Occurrence, SeqType};
pub use xdm::{XdmAtomicValue, XdmItem, XdmSequence};
