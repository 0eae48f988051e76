//! Construction helpers for queries and pipelines.
//!
//! ```
//! use xq_flwor::build::{FlworBuilder, QueryBuilder, int, lt, range, var};
//!
//! // for $a at $p in 1 to 3 where $p < 2 return $a
//! let mut qb = QueryBuilder::new();
//! let (a, p) = (qb.var("a"), qb.pos_var("p"));
//! let body = FlworBuilder::new()
//!     .for_at(a, p, range(int(1), int(3)))
//!     .where_(lt(var(p), int(2)))
//!     .return_(var(a));
//! let query = qb.finish(body);
//! assert_eq!(query.pipelines().len(), 1);
//! ```
use std::sync::Arc;

use super::{
    ArithOp, Clause, CompareKind, ComparisonOp, Expr, ForClause, GroupClause, GroupSpec, LetClause, OrderByClause,
    OrderSpec, Pipeline, Query, TypeCase, VarId, VarTable, WindowClause, WindowCondition, WindowKind, WindowVars,
};
use crate::runtime::{Error, StaticContext};
use crate::types::{AtomicType, SeqType};
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence};

/// Owns the variable arena while a query is assembled and resolves function names.
#[derive(Debug, Default)]
pub struct QueryBuilder {
    vars: VarTable,
    static_ctx: StaticContext,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_static_context(static_ctx: StaticContext) -> Self {
        Self { vars: VarTable::new(), static_ctx }
    }

    pub fn var(&mut self, name: &str) -> VarId {
        self.vars.new_var(name, None)
    }

    /// `$name as ty`
    pub fn typed_var(&mut self, name: &str, ty: SeqType) -> VarId {
        self.vars.new_var(name, Some(ty))
    }

    pub fn pos_var(&mut self, name: &str) -> VarId {
        self.vars.new_pos_var(name)
    }

    /// Resolve `name` with `args.len()` arguments; `err:XPST0017` when unknown.
    pub fn call(&self, name: &str, args: Vec<Expr>) -> Result<Expr, Error> {
        let func = self.static_ctx.functions.resolve(name, args.len())?;
        Ok(Expr::Call { func, args })
    }

    pub fn vars(&self) -> &VarTable {
        &self.vars
    }

    pub fn finish(self, body: Expr) -> Query {
        Query { vars: self.vars, body }
    }
}

#[derive(Debug, Default)]
pub struct FlworBuilder {
    clauses: Vec<Clause>,
}

impl FlworBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn for_(mut self, var: VarId, source: Expr) -> Self {
        self.clauses.push(Clause::For(ForClause { var, pos: None, source }));
        self
    }

    /// `for $var at $pos in source`
    #[must_use]
    pub fn for_at(mut self, var: VarId, pos: VarId, source: Expr) -> Self {
        self.clauses.push(Clause::For(ForClause { var, pos: Some(pos), source }));
        self
    }

    #[must_use]
    pub fn let_(mut self, var: VarId, expr: Expr) -> Self {
        self.clauses.push(Clause::Let(LetClause { var, expr }));
        self
    }

    #[must_use]
    pub fn where_(mut self, predicate: Expr) -> Self {
        self.clauses.push(Clause::Where(predicate));
        self
    }

    /// `group by $k1 := e1, ...`; `rebinds` re-exposes `(pre, post)` pairs.
    #[must_use]
    pub fn group_by(mut self, specs: Vec<(VarId, Expr)>, rebinds: Vec<(VarId, VarId)>) -> Self {
        let specs = specs.into_iter().map(|(var, key)| GroupSpec { var, key }).collect();
        self.clauses.push(Clause::Group(GroupClause { specs, rebinds }));
        self
    }

    #[must_use]
    pub fn order_by(mut self, keys: Vec<OrderSpec>) -> Self {
        self.clauses.push(Clause::OrderBy(OrderByClause { keys }));
        self
    }

    #[must_use]
    pub fn sliding_window(mut self, var: VarId, source: Expr, start: WindowCondition, end: WindowCondition, only_end: bool) -> Self {
        self.clauses.push(Clause::Window(WindowClause {
            kind: WindowKind::Sliding,
            var,
            source,
            start,
            end: Some(end),
            only_end,
        }));
        self
    }

    #[must_use]
    pub fn tumbling_window(
        mut self,
        var: VarId,
        source: Expr,
        start: WindowCondition,
        end: Option<WindowCondition>,
        only_end: bool,
    ) -> Self {
        self.clauses.push(Clause::Window(WindowClause { kind: WindowKind::Tumbling, var, source, start, end, only_end }));
        self
    }

    #[must_use]
    pub fn clause(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    pub fn build(self, ret: Expr) -> Pipeline {
        Pipeline { clauses: self.clauses, ret }
    }

    pub fn return_(self, ret: Expr) -> Expr {
        Expr::Flwor(Box::new(self.build(ret)))
    }
}

/// `start $item at $pos previous $prev next $next when predicate`
pub fn window_cond(vars: WindowVars, predicate: Expr) -> WindowCondition {
    WindowCondition { vars, predicate }
}

pub fn asc(key: Expr) -> OrderSpec {
    OrderSpec { key, ascending: true, empty_least: true }
}

pub fn desc(key: Expr) -> OrderSpec {
    OrderSpec { key, ascending: false, empty_least: true }
}

pub fn literal(items: XdmSequence) -> Expr {
    Expr::Literal(items)
}

fn atomic(v: XdmAtomicValue) -> Expr {
    Expr::Literal(vec![XdmItem::Atomic(v)])
}

pub fn int(i: i64) -> Expr {
    atomic(XdmAtomicValue::Integer(i))
}

pub fn dbl(d: f64) -> Expr {
    atomic(XdmAtomicValue::Double(d))
}

pub fn dec(d: f64) -> Expr {
    atomic(XdmAtomicValue::Decimal(d))
}

pub fn string(s: &str) -> Expr {
    atomic(XdmAtomicValue::String(s.to_string()))
}

pub fn untyped(s: &str) -> Expr {
    atomic(XdmAtomicValue::UntypedAtomic(s.to_string()))
}

pub fn boolean(b: bool) -> Expr {
    Expr::boolean(b)
}

pub fn empty() -> Expr {
    Expr::empty()
}

pub fn var(v: VarId) -> Expr {
    Expr::VarRef(v)
}

pub fn context_item() -> Expr {
    Expr::ContextItem
}

pub fn position() -> Expr {
    Expr::Position
}

pub fn last() -> Expr {
    Expr::Last
}

pub fn seq(items: Vec<Expr>) -> Expr {
    Expr::Sequence(items)
}

pub fn range(start: Expr, end: Expr) -> Expr {
    Expr::Range { start: Box::new(start), end: Box::new(end) }
}

fn arith(op: ArithOp, left: Expr, right: Expr) -> Expr {
    Expr::Arith { op, left: Box::new(left), right: Box::new(right) }
}

pub fn add(l: Expr, r: Expr) -> Expr {
    arith(ArithOp::Add, l, r)
}

pub fn sub(l: Expr, r: Expr) -> Expr {
    arith(ArithOp::Sub, l, r)
}

pub fn mul(l: Expr, r: Expr) -> Expr {
    arith(ArithOp::Mul, l, r)
}

pub fn div(l: Expr, r: Expr) -> Expr {
    arith(ArithOp::Div, l, r)
}

pub fn idiv(l: Expr, r: Expr) -> Expr {
    arith(ArithOp::IDiv, l, r)
}

pub fn modulo(l: Expr, r: Expr) -> Expr {
    arith(ArithOp::Mod, l, r)
}

fn general(op: ComparisonOp, left: Expr, right: Expr) -> Expr {
    Expr::Compare { op, kind: CompareKind::General, left: Box::new(left), right: Box::new(right) }
}

pub fn eq(l: Expr, r: Expr) -> Expr {
    general(ComparisonOp::Eq, l, r)
}

pub fn ne(l: Expr, r: Expr) -> Expr {
    general(ComparisonOp::Ne, l, r)
}

pub fn lt(l: Expr, r: Expr) -> Expr {
    general(ComparisonOp::Lt, l, r)
}

pub fn le(l: Expr, r: Expr) -> Expr {
    general(ComparisonOp::Le, l, r)
}

pub fn gt(l: Expr, r: Expr) -> Expr {
    general(ComparisonOp::Gt, l, r)
}

pub fn ge(l: Expr, r: Expr) -> Expr {
    general(ComparisonOp::Ge, l, r)
}

/// `l eq r`, `l lt r`, ...
pub fn value_cmp(op: ComparisonOp, l: Expr, r: Expr) -> Expr {
    Expr::Compare { op, kind: CompareKind::Value, left: Box::new(l), right: Box::new(r) }
}

pub fn and(l: Expr, r: Expr) -> Expr {
    Expr::And(Box::new(l), Box::new(r))
}

pub fn or(l: Expr, r: Expr) -> Expr {
    Expr::Or(Box::new(l), Box::new(r))
}

pub fn not(e: Expr) -> Expr {
    Expr::Not(Box::new(e))
}

pub fn if_(cond: Expr, then_expr: Expr, else_expr: Expr) -> Expr {
    Expr::If { cond: Box::new(cond), then_expr: Box::new(then_expr), else_expr: Box::new(else_expr) }
}

pub fn filter(input: Expr, predicates: Vec<Expr>) -> Expr {
    Expr::Filter { input: Box::new(input), predicates }
}

/// `element name { content }`
pub fn elem_ctor(name: &str, content: Expr) -> Expr {
    Expr::Element { name: name.into(), content: Box::new(content) }
}

pub fn cast(e: Expr, target: AtomicType) -> Expr {
    Expr::Cast { expr: Box::new(e), target }
}

/// `e treat as ty`, checked at runtime.
pub fn treat(e: Expr, ty: SeqType) -> Expr {
    Expr::TypeCheck { expr: Box::new(e), ty }
}

/// `typeswitch (operand) case ... default ...`
pub fn typeswitch(operand: Expr, cases: Vec<TypeCase>, default: TypeCase) -> Expr {
    Expr::TypeSwitch { operand: Box::new(operand), cases, default: Box::new(default) }
}

/// `case $var as ty return body`
pub fn case(var: Option<VarId>, ty: SeqType, body: Expr) -> TypeCase {
    TypeCase { var, ty: Some(ty), body }
}

/// `default $var return body`
pub fn default_case(var: Option<VarId>, body: Expr) -> TypeCase {
    TypeCase { var, ty: None, body }
}

/// Call a function resolved elsewhere.
pub fn call_def(func: &Arc<crate::runtime::FunctionDef>, args: Vec<Expr>) -> Expr {
    Expr::Call { func: Arc::clone(func), args }
}
