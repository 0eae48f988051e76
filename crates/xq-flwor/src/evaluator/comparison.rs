//! Value, general and order-by comparison of atomized operands.

use core::cmp::Ordering;

use super::numeric::{classify, unify_numeric};
use crate::ir::{ComparisonOp, OrderSpec};
use crate::runtime::{Error, ErrorCode};
use crate::types::{AtomicType, cast};
use crate::xdm::{XdmAtomicValue, XdmItem, atomize, atomize_optional};

use XdmAtomicValue as V;

fn incomparable(a: &XdmAtomicValue, b: &XdmAtomicValue) -> Error {
    Error::from_code(
        ErrorCode::XPTY0004,
        format!("cannot compare {} with {}", a.atomic_type().name(), b.atomic_type().name()),
    )
}

/// Order of two values of comparable types; `None` when either is NaN.
pub(crate) fn compare_values(a: &XdmAtomicValue, b: &XdmAtomicValue) -> Result<Option<Ordering>, Error> {
    if let (Some(x), Some(y)) = (classify(a), classify(b)) {
        let (x, y) = unify_numeric(x, y);
        return Ok(match (x, y) {
            (super::numeric::NumKind::Int(x), super::numeric::NumKind::Int(y)) => Some(x.cmp(&y)),
            (x, y) => x.to_f64().partial_cmp(&y.to_f64()),
        });
    }
    match (a, b) {
        (V::String(x) | V::UntypedAtomic(x), V::String(y) | V::UntypedAtomic(y)) => Ok(Some(x.cmp(y))),
        (V::Boolean(x), V::Boolean(y)) => Ok(Some(x.cmp(y))),
        (V::DateTime(x), V::DateTime(y)) => Ok(Some(x.cmp(y))),
        _ => Err(incomparable(a, b)),
    }
}

fn apply(op: ComparisonOp, ord: Option<Ordering>) -> bool {
    let Some(ord) = ord else {
        return op == ComparisonOp::Ne;
    };
    match op {
        ComparisonOp::Eq => ord == Ordering::Equal,
        ComparisonOp::Ne => ord != Ordering::Equal,
        ComparisonOp::Lt => ord == Ordering::Less,
        ComparisonOp::Le => ord != Ordering::Greater,
        ComparisonOp::Gt => ord == Ordering::Greater,
        ComparisonOp::Ge => ord != Ordering::Less,
    }
}

/// `a op b` for value comparisons: untyped operands compare as strings.
pub(crate) fn compare_atomic(op: ComparisonOp, a: &XdmAtomicValue, b: &XdmAtomicValue) -> Result<bool, Error> {
    compare_values(a, b).map(|ord| apply(op, ord))
}

/// Untyped operands of a general comparison take the type of the other side:
/// double against a numeric, string against a string or untyped value.
fn general_pair(a: &XdmAtomicValue, b: &XdmAtomicValue) -> Result<(XdmAtomicValue, XdmAtomicValue), Error> {
    let convert = |untyped: &XdmAtomicValue, other: &XdmAtomicValue| -> Result<XdmAtomicValue, Error> {
        match other {
            _ if other.is_numeric() => cast(untyped, AtomicType::Double),
            V::UntypedAtomic(_) | V::String(_) => cast(untyped, AtomicType::String),
            _ => cast(untyped, other.atomic_type()),
        }
    };
    Ok(match (a, b) {
        (V::UntypedAtomic(_), _) => (convert(a, b)?, b.clone()),
        (_, V::UntypedAtomic(_)) => (a.clone(), convert(b, a)?),
        _ => (a.clone(), b.clone()),
    })
}

/// Value comparison: both sides atomize to at most one item; an empty side
/// yields the empty sequence (`None`).
pub(crate) fn value_compare(op: ComparisonOp, left: &[XdmItem], right: &[XdmItem]) -> Result<Option<bool>, Error> {
    let what = op.symbol(crate::ir::CompareKind::Value);
    let (Some(a), Some(b)) = (atomize_optional(left, what)?, atomize_optional(right, what)?) else {
        return Ok(None);
    };
    compare_atomic(op, &a, &b).map(Some)
}

/// General comparison: true when some pair of atomized items satisfies `op`.
pub(crate) fn general_compare(op: ComparisonOp, left: &[XdmItem], right: &[XdmItem]) -> Result<bool, Error> {
    let (left, right) = (atomize(left), atomize(right));
    for a in &left {
        for b in &right {
            let (x, y) = general_pair(a, b)?;
            if compare_atomic(op, &x, &y)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Normalize one order-by key: untyped values sort as strings.
pub(crate) fn order_key(seq: &[XdmItem]) -> Result<Option<XdmAtomicValue>, Error> {
    Ok(match atomize_optional(seq, "order by key")? {
        Some(V::UntypedAtomic(s)) => Some(V::String(s)),
        other => other,
    })
}

fn is_nan(v: &XdmAtomicValue) -> bool {
    matches!(v, V::Double(d) | V::Decimal(d) if d.is_nan())
}

/// Compare two order-by keys under `spec`.
///
/// With `empty least` the order is `()` < NaN < values; with `empty greatest`
/// it is values < NaN < `()`. `descending` reverses the result.
pub(crate) fn order_atomic(
    a: Option<&XdmAtomicValue>,
    b: Option<&XdmAtomicValue>,
    spec: &OrderSpec,
) -> Result<Ordering, Error> {
    let rank = |v: Option<&XdmAtomicValue>| -> u8 {
        match v {
            None if spec.empty_least => 0,
            None => 2,
            Some(v) if is_nan(v) => 1,
            Some(_) if spec.empty_least => 2,
            Some(_) => 0,
        }
    };
    let ord = match (a, b) {
        (Some(x), Some(y)) if !is_nan(x) && !is_nan(y) => compare_values(x, y)?.unwrap_or(Ordering::Equal),
        _ => rank(a).cmp(&rank(b)),
    };
    Ok(if spec.ascending { ord } else { ord.reverse() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{asc, desc, int};

    fn item(v: impl Into<XdmItem>) -> XdmItem {
        v.into()
    }

    #[test]
    fn general_comparison_is_existential() {
        let left = vec![item(1i64), item(5i64)];
        let right = vec![item(4i64)];
        assert!(general_compare(ComparisonOp::Gt, &left, &right).unwrap());
        assert!(!general_compare(ComparisonOp::Gt, &left[..1], &right).unwrap());
        assert!(!general_compare(ComparisonOp::Eq, &[], &right).unwrap());
    }

    #[test]
    fn untyped_against_number_compares_numerically() {
        let left = vec![XdmItem::Atomic(V::UntypedAtomic("10".into()))];
        assert!(general_compare(ComparisonOp::Gt, &left, &[item(9i64)]).unwrap());
        let err = general_compare(ComparisonOp::Gt, &[XdmItem::Atomic(V::UntypedAtomic("x".into()))], &[item(1i64)])
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::FORG0001);
    }

    #[test]
    fn value_comparison_rejects_sequences_and_mixed_types() {
        assert_eq!(value_compare(ComparisonOp::Eq, &[], &[item(1i64)]).unwrap(), None);
        assert_eq!(value_compare(ComparisonOp::Eq, &[item(1i64)], &[item(1.0f64)]).unwrap(), Some(true));
        let err = value_compare(ComparisonOp::Eq, &[item(1i64), item(2i64)], &[item(1i64)]).unwrap_err();
        assert_eq!(err.code, ErrorCode::XPTY0004);
        let err = value_compare(ComparisonOp::Lt, &[item("a")], &[item(1i64)]).unwrap_err();
        assert_eq!(err.code, ErrorCode::XPTY0004);
    }

    #[test]
    fn nan_and_empty_order() {
        let spec = asc(int(0));
        let nan = V::Double(f64::NAN);
        let one = V::Integer(1);
        assert_eq!(order_atomic(None, Some(&nan), &spec).unwrap(), Ordering::Less);
        assert_eq!(order_atomic(Some(&nan), Some(&one), &spec).unwrap(), Ordering::Less);
        let mut greatest = desc(int(0));
        greatest.empty_least = false;
        assert_eq!(order_atomic(None, Some(&one), &greatest).unwrap(), Ordering::Less);
    }
}
