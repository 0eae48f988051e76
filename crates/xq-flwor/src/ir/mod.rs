//! Clause pipelines and the expression tree they hold.
//!
//! Variables live in an arena ([`VarTable`]) and are referenced by [`VarId`];
//! resolution is always by id, names are kept for diagnostics only. Every id
//! is introduced by exactly one binder (a clause or a `Select` expression).
use compact_str::CompactString;
use core::fmt;
use smallvec::SmallVec;
use std::sync::Arc;

use crate::runtime::FunctionDef;
use crate::types::{AtomicType, SeqType};
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence};

pub mod build;
pub mod typing;
mod validate;
mod visit;

pub use validate::validate_pipeline;
pub use visit::VarUse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(u32);

impl VarId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Var {
    pub id: VarId,
    pub name: CompactString,
    /// Type from an `as` clause; checked whenever the variable is bound.
    pub declared: Option<SeqType>,
    /// Bound to a 1-based ordinal.
    pub positional: bool,
    /// Static type derived from the binder, refreshed by the optimizer.
    pub inferred: Option<SeqType>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VarTable {
    vars: Vec<Var>,
}

impl VarTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, name: &str, declared: Option<SeqType>, positional: bool) -> VarId {
        let id = VarId(u32::try_from(self.vars.len()).unwrap_or(u32::MAX));
        self.vars.push(Var { id, name: name.into(), declared, positional, inferred: None });
        id
    }

    pub fn new_var(&mut self, name: &str, declared: Option<SeqType>) -> VarId {
        self.push(name, declared, false)
    }

    pub fn new_pos_var(&mut self, name: &str) -> VarId {
        self.push(name, None, true)
    }

    /// Fresh variable carrying the name, declared type and kind of `like`.
    pub fn fresh_like(&mut self, like: VarId) -> VarId {
        let v = self.get(like).clone();
        self.push(&v.name, v.declared, v.positional)
    }

    pub fn get(&self, id: VarId) -> &Var {
        &self.vars[id.index()]
    }

    pub fn name(&self, id: VarId) -> &str {
        &self.vars[id.index()].name
    }

    pub fn declared(&self, id: VarId) -> Option<&SeqType> {
        self.vars[id.index()].declared.as_ref()
    }

    pub fn set_inferred(&mut self, id: VarId, ty: SeqType) {
        self.vars[id.index()].inferred = Some(ty);
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
}

impl ArithOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "div",
            ArithOp::IDiv => "idiv",
            ArithOp::Mod => "mod",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    pub fn symbol(self, kind: CompareKind) -> &'static str {
        match (kind, self) {
            (CompareKind::General, ComparisonOp::Eq) => "=",
            (CompareKind::General, ComparisonOp::Ne) => "!=",
            (CompareKind::General, ComparisonOp::Lt) => "<",
            (CompareKind::General, ComparisonOp::Le) => "<=",
            (CompareKind::General, ComparisonOp::Gt) => ">",
            (CompareKind::General, ComparisonOp::Ge) => ">=",
            (CompareKind::Value, ComparisonOp::Eq) => "eq",
            (CompareKind::Value, ComparisonOp::Ne) => "ne",
            (CompareKind::Value, ComparisonOp::Lt) => "lt",
            (CompareKind::Value, ComparisonOp::Le) => "le",
            (CompareKind::Value, ComparisonOp::Gt) => "gt",
            (CompareKind::Value, ComparisonOp::Ge) => "ge",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareKind {
    /// `eq`, `lt`, ...: both sides atomize to at most one item.
    Value,
    /// `=`, `<`, ...: existential over both sides.
    General,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(XdmSequence),
    VarRef(VarId),
    ContextItem,
    Position,
    Last,
    Sequence(Vec<Expr>),
    Range { start: Box<Expr>, end: Box<Expr> },
    Arith { op: ArithOp, left: Box<Expr>, right: Box<Expr> },
    Compare { op: ComparisonOp, kind: CompareKind, left: Box<Expr>, right: Box<Expr> },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    If { cond: Box<Expr>, then_expr: Box<Expr>, else_expr: Box<Expr> },
    /// `input[p1][p2]...`: predicates see each item as the context item;
    /// a numeric predicate selects by position.
    Filter { input: Box<Expr>, predicates: Vec<Expr> },
    /// Keeps the items of `input` for which `predicate` holds, with the item
    /// (and optionally its 1-based position) bound to variables. The predicate
    /// is always read as an effective boolean value.
    Select { input: Box<Expr>, item: VarId, pos: Option<VarId>, predicate: Box<Expr> },
    Call { func: Arc<FunctionDef>, args: Vec<Expr> },
    /// Element constructor; always yields a fresh node.
    Element { name: CompactString, content: Box<Expr> },
    Cast { expr: Box<Expr>, target: AtomicType },
    TypeCheck { expr: Box<Expr>, ty: SeqType },
    /// `expr` repeated once per item of `source`.
    Replicate { expr: Box<Expr>, source: Box<Expr> },
    /// `typeswitch (operand) case ... default ...`: the first case whose type
    /// matches the operand value is taken, `default` when none does.
    TypeSwitch { operand: Box<Expr>, cases: Vec<TypeCase>, default: Box<TypeCase> },
    Flwor(Box<Pipeline>),
}

/// One branch of a `typeswitch`, optionally binding the operand value.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeCase {
    pub var: Option<VarId>,
    /// `None` on the default branch.
    pub ty: Option<SeqType>,
    pub body: Expr,
}

impl Expr {
    pub fn empty() -> Expr {
        Expr::Literal(Vec::new())
    }

    pub fn boolean(b: bool) -> Expr {
        Expr::Literal(vec![XdmItem::Atomic(XdmAtomicValue::Boolean(b))])
    }

    pub fn as_literal(&self) -> Option<&XdmSequence> {
        match self {
            Expr::Literal(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_empty_literal(&self) -> bool {
        matches!(self, Expr::Literal(v) if v.is_empty())
    }

    /// Effective boolean value of a literal, if it is one and is defined.
    pub fn literal_ebv(&self) -> Option<bool> {
        self.as_literal().and_then(|v| crate::xdm::ebv(v).ok())
    }

    /// Wrap in a declared-type check unless `ty` is absent.
    pub fn checked(self, ty: Option<&SeqType>) -> Expr {
        match ty {
            Some(ty) => Expr::TypeCheck { expr: Box::new(self), ty: ty.clone() },
            None => self,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForClause {
    pub var: VarId,
    pub pos: Option<VarId>,
    pub source: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LetClause {
    pub var: VarId,
    pub expr: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKind {
    Sliding,
    Tumbling,
}

/// Variables a window condition may bind: `$item at $pos previous $prev next $next`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowVars {
    pub item: Option<VarId>,
    pub pos: Option<VarId>,
    pub prev: Option<VarId>,
    pub next: Option<VarId>,
}

impl WindowVars {
    pub fn iter(&self) -> impl Iterator<Item = VarId> + '_ {
        [self.item, self.pos, self.prev, self.next].into_iter().flatten()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowCondition {
    pub vars: WindowVars,
    pub predicate: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowClause {
    pub kind: WindowKind,
    pub var: VarId,
    pub source: Expr,
    pub start: WindowCondition,
    pub end: Option<WindowCondition>,
    pub only_end: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupSpec {
    pub var: VarId,
    pub key: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupClause {
    pub specs: Vec<GroupSpec>,
    /// `(pre_var, post_var)`: a non-grouping variable re-exposed per group
    /// as the concatenation of its values.
    pub rebinds: Vec<(VarId, VarId)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    pub key: Expr,
    pub ascending: bool,
    pub empty_least: bool,
}

/// Always sorts stably: tuples with equal keys keep their input order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByClause {
    pub keys: Vec<OrderSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    For(ForClause),
    Window(WindowClause),
    Let(LetClause),
    Where(Expr),
    Group(GroupClause),
    OrderBy(OrderByClause),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClauseKind {
    For,
    Window,
    Let,
    Where,
    Group,
    OrderBy,
    Return,
}

impl ClauseKind {
    pub fn keyword(self) -> &'static str {
        match self {
            ClauseKind::For => "for",
            ClauseKind::Window => "window",
            ClauseKind::Let => "let",
            ClauseKind::Where => "where",
            ClauseKind::Group => "group by",
            ClauseKind::OrderBy => "order by",
            ClauseKind::Return => "return",
        }
    }
}

impl Clause {
    pub fn kind(&self) -> ClauseKind {
        match self {
            Clause::For(_) => ClauseKind::For,
            Clause::Window(_) => ClauseKind::Window,
            Clause::Let(_) => ClauseKind::Let,
            Clause::Where(_) => ClauseKind::Where,
            Clause::Group(_) => ClauseKind::Group,
            Clause::OrderBy(_) => ClauseKind::OrderBy,
        }
    }

    /// `For` and `Window` produce several tuples per input tuple.
    pub fn is_generator(&self) -> bool {
        matches!(self, Clause::For(_) | Clause::Window(_))
    }

    /// `Group` and `OrderBy` consume the whole tuple stream; nothing moves across them.
    pub fn is_barrier(&self) -> bool {
        matches!(self, Clause::Group(_) | Clause::OrderBy(_))
    }

    /// Variables introduced by this clause.
    pub fn writes(&self) -> SmallVec<[VarId; 4]> {
        let mut out = SmallVec::new();
        match self {
            Clause::For(f) => {
                out.push(f.var);
                out.extend(f.pos);
            }
            Clause::Let(l) => out.push(l.var),
            Clause::Window(w) => {
                out.push(w.var);
                out.extend(w.start.vars.iter());
                if let Some(end) = &w.end {
                    out.extend(end.vars.iter());
                }
            }
            Clause::Where(_) | Clause::OrderBy(_) => {}
            Clause::Group(g) => {
                out.extend(g.specs.iter().map(|s| s.var));
                out.extend(g.rebinds.iter().map(|(_, post)| *post));
            }
        }
        out
    }

    pub fn exprs(&self) -> Vec<&Expr> {
        match self {
            Clause::For(f) => vec![&f.source],
            Clause::Let(l) => vec![&l.expr],
            Clause::Where(p) => vec![p],
            Clause::Window(w) => {
                let mut v = vec![&w.source, &w.start.predicate];
                if let Some(end) = &w.end {
                    v.push(&end.predicate);
                }
                v
            }
            Clause::Group(g) => g.specs.iter().map(|s| &s.key).collect(),
            Clause::OrderBy(o) => o.keys.iter().map(|k| &k.key).collect(),
        }
    }

    pub fn exprs_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Clause::For(f) => vec![&mut f.source],
            Clause::Let(l) => vec![&mut l.expr],
            Clause::Where(p) => vec![p],
            Clause::Window(w) => {
                let mut v = vec![&mut w.source, &mut w.start.predicate];
                if let Some(end) = &mut w.end {
                    v.push(&mut end.predicate);
                }
                v
            }
            Clause::Group(g) => g.specs.iter_mut().map(|s| &mut s.key).collect(),
            Clause::OrderBy(o) => o.keys.iter_mut().map(|k| &mut k.key).collect(),
        }
    }
}

/// Ordered clauses followed by the terminal return expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub clauses: Vec<Clause>,
    pub ret: Expr,
}

impl Pipeline {
    pub fn exprs(&self) -> impl Iterator<Item = &Expr> {
        self.clauses.iter().flat_map(Clause::exprs).chain(std::iter::once(&self.ret))
    }

    pub fn has_barrier(&self) -> bool {
        self.clauses.iter().any(Clause::is_barrier)
    }
}

/// A built query: the variable arena plus the body expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub vars: VarTable,
    pub body: Expr,
}

impl Query {
    /// All pipelines in the body, outermost first.
    pub fn pipelines(&self) -> Vec<&Pipeline> {
        let mut out = Vec::new();
        self.body.walk(&mut |e| {
            if let Expr::Flwor(p) = e {
                out.push(&**p);
            }
        });
        out
    }
}
