//! Numeric classification, promotion and arithmetic.
//!
//! [`NumKind`] classifies an atomic value into one of the three numeric types
//! this crate models, carrying the promoted value. Shared by arithmetic,
//! comparison and ordering.

use crate::ir::ArithOp;
use crate::runtime::{Error, ErrorCode};
use crate::types::{AtomicType, cast};
use crate::xdm::XdmAtomicValue;

/// Numeric classification carrying the promoted value.
#[derive(Debug, Clone, Copy)]
pub(crate) enum NumKind {
    Int(i64),
    Dec(f64),
    Double(f64),
}

impl NumKind {
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn to_f64(self) -> f64 {
        match self {
            NumKind::Int(i) => i as f64,
            NumKind::Dec(d) | NumKind::Double(d) => d,
        }
    }
}

/// Classify an atomic value into a [`NumKind`], if it is numeric.
pub(crate) fn classify(v: &XdmAtomicValue) -> Option<NumKind> {
    match v {
        XdmAtomicValue::Integer(i) => Some(NumKind::Int(*i)),
        XdmAtomicValue::Decimal(d) => Some(NumKind::Dec(*d)),
        XdmAtomicValue::Double(d) => Some(NumKind::Double(*d)),
        _ => None,
    }
}

/// Promote two values to a common type: integer+integer stays integer,
/// integer+decimal becomes decimal, anything with a double becomes double.
pub(crate) fn unify_numeric(a: NumKind, b: NumKind) -> (NumKind, NumKind) {
    use NumKind::{Dec, Double, Int};
    match (a, b) {
        (Double(x), y) => (Double(x), Double(y.to_f64())),
        (y, Double(x)) => (Double(y.to_f64()), Double(x)),
        (Int(x), Int(y)) => (Int(x), Int(y)),
        (x, y) => (Dec(x.to_f64()), Dec(y.to_f64())),
    }
}

/// Arithmetic operand after atomization: untyped values become doubles.
fn operand(v: &XdmAtomicValue, op: ArithOp) -> Result<NumKind, Error> {
    if let XdmAtomicValue::UntypedAtomic(_) = v {
        let d = cast(v, AtomicType::Double)?;
        return classify(&d).ok_or_else(|| Error::from_code(ErrorCode::FORG0001, "untyped operand is not numeric"));
    }
    classify(v).ok_or_else(|| {
        Error::from_code(
            ErrorCode::XPTY0004,
            format!("operator '{}' is not defined for {}", op.symbol(), v.atomic_type().name()),
        )
    })
}

fn div_by_zero() -> Error {
    Error::from_code(ErrorCode::FOAR0001, "division by zero")
}

fn overflow() -> Error {
    Error::from_code(ErrorCode::FOAR0002, "integer overflow")
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn trunc_to_int(d: f64) -> Result<i64, Error> {
    if !d.is_finite() || d.trunc() < i64::MIN as f64 || d.trunc() >= i64::MAX as f64 {
        return Err(overflow());
    }
    Ok(d.trunc() as i64)
}

/// `a op b` on two atomized operands.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn arithmetic(op: ArithOp, a: &XdmAtomicValue, b: &XdmAtomicValue) -> Result<XdmAtomicValue, Error> {
    use NumKind::{Dec, Double, Int};
    let (x, y) = unify_numeric(operand(a, op)?, operand(b, op)?);
    Ok(match (x, y) {
        (Int(x), Int(y)) => match op {
            ArithOp::Add => XdmAtomicValue::Integer(x.checked_add(y).ok_or_else(overflow)?),
            ArithOp::Sub => XdmAtomicValue::Integer(x.checked_sub(y).ok_or_else(overflow)?),
            ArithOp::Mul => XdmAtomicValue::Integer(x.checked_mul(y).ok_or_else(overflow)?),
            ArithOp::Div => {
                if y == 0 {
                    return Err(div_by_zero());
                }
                XdmAtomicValue::Decimal(x as f64 / y as f64)
            }
            ArithOp::IDiv => {
                if y == 0 {
                    return Err(div_by_zero());
                }
                XdmAtomicValue::Integer(x.checked_div(y).ok_or_else(overflow)?)
            }
            ArithOp::Mod => {
                if y == 0 {
                    return Err(div_by_zero());
                }
                XdmAtomicValue::Integer(x.checked_rem(y).unwrap_or(0))
            }
        },
        (Dec(x), Dec(y)) => match op {
            ArithOp::Add => XdmAtomicValue::Decimal(x + y),
            ArithOp::Sub => XdmAtomicValue::Decimal(x - y),
            ArithOp::Mul => XdmAtomicValue::Decimal(x * y),
            ArithOp::Div if y == 0.0 => return Err(div_by_zero()),
            ArithOp::Div => XdmAtomicValue::Decimal(x / y),
            ArithOp::IDiv if y == 0.0 => return Err(div_by_zero()),
            ArithOp::IDiv => XdmAtomicValue::Integer(trunc_to_int(x / y)?),
            ArithOp::Mod if y == 0.0 => return Err(div_by_zero()),
            ArithOp::Mod => XdmAtomicValue::Decimal(x % y),
        },
        (x, y) => {
            let (x, y) = (x.to_f64(), y.to_f64());
            match op {
                ArithOp::Add => XdmAtomicValue::Double(x + y),
                ArithOp::Sub => XdmAtomicValue::Double(x - y),
                ArithOp::Mul => XdmAtomicValue::Double(x * y),
                ArithOp::Div => XdmAtomicValue::Double(x / y),
                ArithOp::IDiv if y == 0.0 => return Err(div_by_zero()),
                ArithOp::IDiv => XdmAtomicValue::Integer(trunc_to_int(x / y)?),
                ArithOp::Mod => XdmAtomicValue::Double(x % y),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> XdmAtomicValue {
        XdmAtomicValue::Integer(i)
    }

    #[test]
    fn integer_division_rules() {
        assert_eq!(arithmetic(ArithOp::Div, &int(6), &int(3)).unwrap(), XdmAtomicValue::Decimal(2.0));
        assert_eq!(arithmetic(ArithOp::Div, &int(1), &int(2)).unwrap(), XdmAtomicValue::Decimal(0.5));
        assert_eq!(arithmetic(ArithOp::IDiv, &int(7), &int(2)).unwrap(), int(3));
        assert_eq!(arithmetic(ArithOp::IDiv, &int(1), &int(0)).unwrap_err().code, ErrorCode::FOAR0001);
        assert_eq!(arithmetic(ArithOp::Mod, &int(-7), &int(2)).unwrap(), int(-1));
    }

    #[test]
    fn overflow_is_reported() {
        assert_eq!(arithmetic(ArithOp::Add, &int(i64::MAX), &int(1)).unwrap_err().code, ErrorCode::FOAR0002);
    }

    #[test]
    fn double_division_by_zero_is_infinite() {
        let r = arithmetic(ArithOp::Div, &XdmAtomicValue::Double(1.0), &int(0)).unwrap();
        assert_eq!(r, XdmAtomicValue::Double(f64::INFINITY));
    }

    #[test]
    fn untyped_promotes_to_double() {
        let r = arithmetic(ArithOp::Mul, &XdmAtomicValue::UntypedAtomic("2".into()), &int(3)).unwrap();
        assert_eq!(r, XdmAtomicValue::Double(6.0));
        let err = arithmetic(ArithOp::Add, &XdmAtomicValue::String("a".into()), &int(1)).unwrap_err();
        assert_eq!(err.code, ErrorCode::XPTY0004);
    }
}
