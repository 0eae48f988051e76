use chrono::{DateTime, FixedOffset};
use core::fmt;

use crate::runtime::{Error, ErrorCode};
use crate::simple_node::SimpleNode;
use crate::types::AtomicType;

#[derive(Debug, Clone, PartialEq)]
pub enum XdmAtomicValue {
    Boolean(bool),
    String(String),
    Integer(i64),
    Decimal(f64),
    Double(f64),
    UntypedAtomic(String),
    DateTime(DateTime<FixedOffset>),
}

impl XdmAtomicValue {
    pub fn atomic_type(&self) -> AtomicType {
        match self {
            Self::Boolean(_) => AtomicType::Boolean,
            Self::String(_) => AtomicType::String,
            Self::Integer(_) => AtomicType::Integer,
            Self::Decimal(_) => AtomicType::Decimal,
            Self::Double(_) => AtomicType::Double,
            Self::UntypedAtomic(_) => AtomicType::UntypedAtomic,
            Self::DateTime(_) => AtomicType::DateTime,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer(_) | Self::Decimal(_) | Self::Double(_))
    }

    /// Canonical lexical form.
    pub fn string_value(&self) -> String {
        match self {
            Self::Boolean(b) => b.to_string(),
            Self::String(s) | Self::UntypedAtomic(s) => s.clone(),
            Self::Integer(i) => i.to_string(),
            Self::Decimal(d) => format_number(*d),
            Self::Double(d) => {
                if d.is_nan() {
                    "NaN".to_string()
                } else if d.is_infinite() {
                    if *d > 0.0 { "INF".to_string() } else { "-INF".to_string() }
                } else {
                    format_number(*d)
                }
            }
            Self::DateTime(dt) => dt.to_rfc3339(),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn format_number(d: f64) -> String {
    if d.fract() == 0.0 && d.abs() < 1e15 {
        // integral values print without a fractional part (xs:double 1.0 is "1")
        format!("{}", d as i64)
    } else {
        format!("{d}")
    }
}

impl fmt::Display for XdmAtomicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.string_value())
    }
}

impl From<bool> for XdmAtomicValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<i64> for XdmAtomicValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for XdmAtomicValue {
    fn from(d: f64) -> Self {
        Self::Double(d)
    }
}

impl From<&str> for XdmAtomicValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

pub type XdmSequence = Vec<XdmItem>;

#[derive(Debug, Clone, PartialEq)]
pub enum XdmItem {
    Node(SimpleNode),
    Atomic(XdmAtomicValue),
}

impl XdmItem {
    /// Atomization: nodes yield their string value as `xs:untypedAtomic`.
    pub fn atomize(&self) -> XdmAtomicValue {
        match self {
            XdmItem::Atomic(a) => a.clone(),
            XdmItem::Node(n) => XdmAtomicValue::UntypedAtomic(n.string_value()),
        }
    }

    pub fn string_value(&self) -> String {
        match self {
            XdmItem::Atomic(a) => a.string_value(),
            XdmItem::Node(n) => n.string_value(),
        }
    }
}

impl fmt::Display for XdmItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XdmItem::Node(n) => write!(f, "{n}"),
            XdmItem::Atomic(a) => write!(f, "{a:?}"),
        }
    }
}

impl From<XdmAtomicValue> for XdmItem {
    fn from(a: XdmAtomicValue) -> Self {
        XdmItem::Atomic(a)
    }
}

macro_rules! item_from {
    ($($t:ty),*) => {
        $(impl From<$t> for XdmItem {
            fn from(v: $t) -> Self {
                XdmItem::Atomic(v.into())
            }
        })*
    };
}

item_from!(bool, i64, f64, &str);

pub fn atomize(seq: &[XdmItem]) -> Vec<XdmAtomicValue> {
    seq.iter().map(XdmItem::atomize).collect()
}

/// Atomize a sequence that must hold at most one item.
pub fn atomize_optional(seq: &[XdmItem], what: &str) -> Result<Option<XdmAtomicValue>, Error> {
    match seq {
        [] => Ok(None),
        [one] => Ok(Some(one.atomize())),
        _ => Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("{what} expects at most one item, got {}", seq.len()),
        )),
    }
}

/// Effective boolean value.
///
/// - `()` is false, a sequence starting with a node is true
/// - a singleton boolean, string, untyped or numeric value follows its own rule
/// - anything else raises `err:FORG0006`
pub fn ebv(seq: &[XdmItem]) -> Result<bool, Error> {
    match seq {
        [] => Ok(false),
        [XdmItem::Node(_), ..] => Ok(true),
        [XdmItem::Atomic(a)] => match a {
            XdmAtomicValue::Boolean(b) => Ok(*b),
            XdmAtomicValue::String(s) | XdmAtomicValue::UntypedAtomic(s) => Ok(!s.is_empty()),
            XdmAtomicValue::Integer(i) => Ok(*i != 0),
            XdmAtomicValue::Decimal(d) | XdmAtomicValue::Double(d) => Ok(*d != 0.0 && !d.is_nan()),
            XdmAtomicValue::DateTime(_) => Err(Error::from_code(
                ErrorCode::FORG0006,
                "effective boolean value not defined for xs:dateTime",
            )),
        },
        _ => Err(Error::from_code(
            ErrorCode::FORG0006,
            "effective boolean value not defined for a sequence of two or more atomic values",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simple_node::{elem, text};

    #[test]
    fn ebv_rules() {
        assert!(!ebv(&[]).unwrap());
        assert!(ebv(&[XdmItem::from(1i64)]).unwrap());
        assert!(!ebv(&[XdmItem::from(0.0f64)]).unwrap());
        assert!(!ebv(&[XdmItem::from(f64::NAN)]).unwrap());
        assert!(!ebv(&[XdmItem::from("")]).unwrap());
        let node = elem("x").build();
        assert!(ebv(&[XdmItem::Node(node), XdmItem::from(1i64)]).unwrap());
        let err = ebv(&[XdmItem::from(1i64), XdmItem::from(2i64)]).unwrap_err();
        assert_eq!(err.code, ErrorCode::FORG0006);
    }

    #[test]
    fn atomize_node_is_untyped() {
        let node = elem("x").child(text("5")).build();
        assert_eq!(XdmItem::Node(node).atomize(), XdmAtomicValue::UntypedAtomic("5".into()));
    }

    #[test]
    fn double_lexical_forms() {
        assert_eq!(XdmAtomicValue::Double(1.0).string_value(), "1");
        assert_eq!(XdmAtomicValue::Double(1.5).string_value(), "1.5");
        assert_eq!(XdmAtomicValue::Double(f64::INFINITY).string_value(), "INF");
    }
}
