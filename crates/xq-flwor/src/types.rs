//! Sequence types: enough of the type system to check declared variable types,
//! infer cardinalities for the optimizer and cast atomic values.
use core::fmt;

use chrono::DateTime;

use crate::runtime::{Error, ErrorCode};
use crate::simple_node::NodeKind;
use crate::xdm::{XdmAtomicValue, XdmItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicType {
    AnyAtomic,
    Numeric,
    Boolean,
    String,
    Integer,
    Decimal,
    Double,
    UntypedAtomic,
    DateTime,
}

impl AtomicType {
    pub fn name(&self) -> &'static str {
        match self {
            AtomicType::AnyAtomic => "xs:anyAtomicType",
            AtomicType::Numeric => "xs:numeric",
            AtomicType::Boolean => "xs:boolean",
            AtomicType::String => "xs:string",
            AtomicType::Integer => "xs:integer",
            AtomicType::Decimal => "xs:decimal",
            AtomicType::Double => "xs:double",
            AtomicType::UntypedAtomic => "xs:untypedAtomic",
            AtomicType::DateTime => "xs:dateTime",
        }
    }

    /// `self` derives from (or is) `other`.
    pub fn is_subtype_of(self, other: AtomicType) -> bool {
        if self == other || other == AtomicType::AnyAtomic {
            return true;
        }
        match other {
            AtomicType::Decimal => self == AtomicType::Integer,
            AtomicType::Numeric => {
                matches!(self, AtomicType::Integer | AtomicType::Decimal | AtomicType::Double)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemType {
    AnyItem,
    AnyNode,
    /// `element()` or `element(name)`.
    Element(Option<String>),
    Text,
    Atomic(AtomicType),
}

impl ItemType {
    pub fn matches(&self, item: &XdmItem) -> bool {
        match (self, item) {
            (ItemType::AnyItem, _) => true,
            (ItemType::AnyNode, XdmItem::Node(_)) => true,
            (ItemType::Element(name), XdmItem::Node(n)) => {
                n.kind() == NodeKind::Element && name.as_deref().is_none_or(|want| n.name() == Some(want))
            }
            (ItemType::Text, XdmItem::Node(n)) => n.kind() == NodeKind::Text,
            (ItemType::Atomic(t), XdmItem::Atomic(a)) => a.atomic_type().is_subtype_of(*t),
            _ => false,
        }
    }

    /// Whether every item of `self` is also an instance of `other`.
    pub fn is_subtype_of(&self, other: &ItemType) -> bool {
        match (self, other) {
            (_, ItemType::AnyItem) => true,
            (ItemType::AnyNode | ItemType::Element(_) | ItemType::Text, ItemType::AnyNode) => true,
            (ItemType::Element(_), ItemType::Element(None)) => true,
            (ItemType::Element(a), ItemType::Element(b)) => a == b,
            (ItemType::Text, ItemType::Text) => true,
            (ItemType::Atomic(a), ItemType::Atomic(b)) => a.is_subtype_of(*b),
            _ => false,
        }
    }

    /// Smallest common supertype.
    pub fn union(&self, other: &ItemType) -> ItemType {
        if self.is_subtype_of(other) {
            return other.clone();
        }
        if other.is_subtype_of(self) {
            return self.clone();
        }
        match (self, other) {
            (ItemType::Atomic(a), ItemType::Atomic(b)) => {
                if a.is_subtype_of(AtomicType::Numeric) && b.is_subtype_of(AtomicType::Numeric) {
                    ItemType::Atomic(AtomicType::Numeric)
                } else {
                    ItemType::Atomic(AtomicType::AnyAtomic)
                }
            }
            (ItemType::Atomic(_), _) | (_, ItemType::Atomic(_)) => ItemType::AnyItem,
            _ => ItemType::AnyNode,
        }
    }

    pub fn of_item(item: &XdmItem) -> ItemType {
        match item {
            XdmItem::Atomic(a) => ItemType::Atomic(a.atomic_type()),
            XdmItem::Node(n) => match n.kind() {
                NodeKind::Element => ItemType::Element(n.name().map(str::to_string)),
                NodeKind::Text => ItemType::Text,
            },
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemType::AnyItem => f.write_str("item()"),
            ItemType::AnyNode => f.write_str("node()"),
            ItemType::Element(None) => f.write_str("element()"),
            ItemType::Element(Some(n)) => write!(f, "element({n})"),
            ItemType::Text => f.write_str("text()"),
            ItemType::Atomic(t) => f.write_str(t.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Occurrence {
    One,
    ZeroOrOne,
    ZeroOrMore,
    OneOrMore,
}

impl Occurrence {
    pub fn min(self) -> usize {
        match self {
            Occurrence::One | Occurrence::OneOrMore => 1,
            Occurrence::ZeroOrOne | Occurrence::ZeroOrMore => 0,
        }
    }

    pub fn max(self) -> Option<usize> {
        match self {
            Occurrence::One | Occurrence::ZeroOrOne => Some(1),
            Occurrence::ZeroOrMore | Occurrence::OneOrMore => None,
        }
    }

    pub fn allows(self, n: usize) -> bool {
        n >= self.min() && self.max().is_none_or(|m| n <= m)
    }

    fn from_bounds(min: usize, max: Option<usize>) -> Occurrence {
        match (min >= 1, max.is_some_and(|m| m <= 1)) {
            (true, true) => Occurrence::One,
            (false, true) => Occurrence::ZeroOrOne,
            (true, false) => Occurrence::OneOrMore,
            (false, false) => Occurrence::ZeroOrMore,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Occurrence::One => "",
            Occurrence::ZeroOrOne => "?",
            Occurrence::ZeroOrMore => "*",
            Occurrence::OneOrMore => "+",
        }
    }
}

/// A sequence type, also used as the result of static type inference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SeqType {
    EmptySequence,
    Typed { item: ItemType, occ: Occurrence },
}

impl SeqType {
    pub fn one(item: ItemType) -> Self {
        SeqType::Typed { item, occ: Occurrence::One }
    }

    pub fn optional(item: ItemType) -> Self {
        SeqType::Typed { item, occ: Occurrence::ZeroOrOne }
    }

    pub fn star(item: ItemType) -> Self {
        SeqType::Typed { item, occ: Occurrence::ZeroOrMore }
    }

    pub fn plus(item: ItemType) -> Self {
        SeqType::Typed { item, occ: Occurrence::OneOrMore }
    }

    pub fn atomic(t: AtomicType) -> Self {
        Self::one(ItemType::Atomic(t))
    }

    pub fn any() -> Self {
        Self::star(ItemType::AnyItem)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, SeqType::EmptySequence)
    }

    pub fn is_exactly_one(&self) -> bool {
        matches!(self, SeqType::Typed { occ: Occurrence::One, .. })
    }

    pub fn item_type(&self) -> Option<&ItemType> {
        match self {
            SeqType::EmptySequence => None,
            SeqType::Typed { item, .. } => Some(item),
        }
    }

    pub fn min(&self) -> usize {
        match self {
            SeqType::EmptySequence => 0,
            SeqType::Typed { occ, .. } => occ.min(),
        }
    }

    pub fn max(&self) -> Option<usize> {
        match self {
            SeqType::EmptySequence => Some(0),
            SeqType::Typed { occ, .. } => occ.max(),
        }
    }

    /// Same item type with occurrence rebuilt from explicit bounds.
    pub fn with_bounds(item: Option<ItemType>, min: usize, max: Option<usize>) -> Self {
        match (item, max) {
            (None, _) | (_, Some(0)) => SeqType::EmptySequence,
            (Some(item), _) => SeqType::Typed { item, occ: Occurrence::from_bounds(min, max) },
        }
    }

    /// Type of the concatenation of two sequences.
    pub fn concat(&self, other: &SeqType) -> SeqType {
        let item = match (self.item_type(), other.item_type()) {
            (Some(a), Some(b)) => Some(a.union(b)),
            (a, b) => a.or(b).cloned(),
        };
        let max = self.max().zip(other.max()).map(|(a, b)| a + b);
        Self::with_bounds(item, self.min() + other.min(), max)
    }

    /// Type of a value that is either `self` or `other`.
    pub fn choice(&self, other: &SeqType) -> SeqType {
        let item = match (self.item_type(), other.item_type()) {
            (Some(a), Some(b)) => Some(a.union(b)),
            (a, b) => a.or(b).cloned(),
        };
        let max = self.max().zip(other.max()).map(|(a, b)| a.max(b));
        Self::with_bounds(item, self.min().min(other.min()), max)
    }

    pub fn matches(&self, seq: &[XdmItem]) -> bool {
        match self {
            SeqType::EmptySequence => seq.is_empty(),
            SeqType::Typed { item, occ } => occ.allows(seq.len()) && seq.iter().all(|i| item.matches(i)),
        }
    }

    /// Check a bound value against this declared type.
    ///
    /// Occurrence mismatches are cardinality errors, item mismatches `err:XPTY0004`.
    pub fn check(&self, seq: &[XdmItem], what: &str) -> Result<(), Error> {
        match self {
            SeqType::EmptySequence if !seq.is_empty() => Err(Error::cardinality(
                ErrorCode::XPTY0004,
                format!("{what}: expected empty-sequence(), got {} item(s)", seq.len()),
            )),
            SeqType::EmptySequence => Ok(()),
            SeqType::Typed { item, occ } => {
                if !occ.allows(seq.len()) {
                    return Err(Error::cardinality(
                        ErrorCode::XPTY0004,
                        format!("{what}: expected {self}, got {} item(s)", seq.len()),
                    ));
                }
                if let Some(bad) = seq.iter().find(|i| !item.matches(i)) {
                    return Err(Error::from_code(
                        ErrorCode::XPTY0004,
                        format!("{what}: expected {self}, got {}", ItemType::of_item(bad)),
                    ));
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for SeqType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeqType::EmptySequence => f.write_str("empty-sequence()"),
            SeqType::Typed { item, occ } => write!(f, "{item}{}", occ.suffix()),
        }
    }
}

/// Cast one atomic value to `target`.
pub fn cast(value: &XdmAtomicValue, target: AtomicType) -> Result<XdmAtomicValue, Error> {
    use XdmAtomicValue as V;
    let invalid = || {
        Error::from_code(
            ErrorCode::FORG0001,
            format!("cannot cast {:?} to {}", value.string_value(), target.name()),
        )
    };
    Ok(match target {
        AtomicType::AnyAtomic | AtomicType::Numeric => {
            return Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!("cannot cast to abstract type {}", target.name()),
            ));
        }
        AtomicType::String => V::String(value.string_value()),
        AtomicType::UntypedAtomic => V::UntypedAtomic(value.string_value()),
        AtomicType::Boolean => match value {
            V::Boolean(b) => V::Boolean(*b),
            V::Integer(i) => V::Boolean(*i != 0),
            V::Decimal(d) | V::Double(d) => V::Boolean(*d != 0.0 && !d.is_nan()),
            V::String(s) | V::UntypedAtomic(s) => match s.trim() {
                "true" | "1" => V::Boolean(true),
                "false" | "0" => V::Boolean(false),
                _ => return Err(invalid()),
            },
            V::DateTime(_) => return Err(invalid()),
        },
        AtomicType::Integer => match value {
            V::Integer(i) => V::Integer(*i),
            V::Boolean(b) => V::Integer(i64::from(*b)),
            V::Decimal(d) | V::Double(d) => V::Integer(float_to_integer(*d)?),
            V::String(s) | V::UntypedAtomic(s) => V::Integer(s.trim().parse::<i64>().map_err(|_| invalid())?),
            V::DateTime(_) => return Err(invalid()),
        },
        AtomicType::Decimal => match value {
            V::Double(d) if !d.is_finite() => return Err(invalid()),
            V::String(s) | V::UntypedAtomic(s) => {
                let t = s.trim();
                if t.contains(['e', 'E']) || t.eq_ignore_ascii_case("nan") || t.contains("INF") {
                    return Err(invalid());
                }
                V::Decimal(t.parse::<f64>().map_err(|_| invalid())?)
            }
            V::DateTime(_) => return Err(invalid()),
            other => V::Decimal(to_f64(other)),
        },
        AtomicType::Double => match value {
            V::String(s) | V::UntypedAtomic(s) => V::Double(parse_double(s.trim()).ok_or_else(invalid)?),
            V::DateTime(_) => return Err(invalid()),
            other => V::Double(to_f64(other)),
        },
        AtomicType::DateTime => match value {
            V::DateTime(dt) => V::DateTime(*dt),
            V::String(s) | V::UntypedAtomic(s) => {
                V::DateTime(DateTime::parse_from_rfc3339(s.trim()).map_err(|e| invalid().with_source(e))?)
            }
            _ => return Err(invalid()),
        },
    })
}

#[allow(clippy::cast_precision_loss)]
fn to_f64(v: &XdmAtomicValue) -> f64 {
    match v {
        XdmAtomicValue::Integer(i) => *i as f64,
        XdmAtomicValue::Decimal(d) | XdmAtomicValue::Double(d) => *d,
        XdmAtomicValue::Boolean(b) => f64::from(u8::from(*b)),
        _ => f64::NAN,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn float_to_integer(d: f64) -> Result<i64, Error> {
    if !d.is_finite() {
        return Err(Error::from_code(ErrorCode::FORG0001, format!("cannot cast {d} to xs:integer")));
    }
    let t = d.trunc();
    if t < i64::MIN as f64 || t >= i64::MAX as f64 {
        return Err(Error::from_code(ErrorCode::FOAR0002, format!("{d} is out of range for xs:integer")));
    }
    Ok(t as i64)
}

/// XML Schema double lexical space, including `INF`, `-INF` and `NaN`.
pub(crate) fn parse_double(s: &str) -> Option<f64> {
    match s {
        "INF" | "+INF" => Some(f64::INFINITY),
        "-INF" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ if s.contains(|c: char| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => None,
        _ => s.parse::<f64>().ok(),
    }
}
