//! Built-in functions.
//!
//! Registration conventions:
//! - Every function declares its `FunctionFlags`; the optimizer never moves,
//!   drops or inlines around a call whose flags forbid it.
//! - Functions with an observable effect (clock reads, randomness, raising an
//!   error on purpose) are registered as non-deterministic.
//! - A declared result type lets the optimizer reason about cardinality.

use crate::evaluator::numeric::arithmetic;
use crate::ir::ArithOp;
use crate::runtime::{CallCtx, Error, ErrorCode, FunctionFlags, FunctionRegistry};
use crate::types::{AtomicType, ItemType, SeqType};
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence, ebv};

fn boolean(b: bool) -> XdmSequence {
    vec![XdmItem::Atomic(XdmAtomicValue::Boolean(b))]
}

fn item_to_string(seq: &[XdmItem]) -> String {
    seq.first().map(XdmItem::string_value).unwrap_or_default()
}

fn sum_default(seq: &[XdmItem]) -> Result<XdmSequence, Error> {
    let mut acc = XdmAtomicValue::Integer(0);
    for it in seq {
        let mut v = it.atomize();
        if matches!(v, XdmAtomicValue::UntypedAtomic(_)) {
            v = crate::types::cast(&v, AtomicType::Double)?;
        }
        if !v.is_numeric() {
            return Err(Error::from_code(ErrorCode::FORG0006, format!("sum over non-numeric value {v}")));
        }
        acc = arithmetic(ArithOp::Add, &acc, &v)?;
    }
    Ok(vec![XdmItem::Atomic(acc)])
}

fn error_default(args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let message = match args.first() {
        Some(desc) if !desc.is_empty() => item_to_string(desc),
        _ => "error() called".to_string(),
    };
    Err(Error::from_code(ErrorCode::FOER0000, message))
}

#[allow(clippy::cast_possible_wrap, clippy::too_many_lines)]
pub fn default_function_registry() -> FunctionRegistry {
    let mut reg = FunctionRegistry::new();
    let bool_one = || SeqType::atomic(AtomicType::Boolean);

    // ===== Core booleans =====
    reg.register_typed("true", 0, FunctionFlags::PURE, bool_one(), |_ctx, _args| Ok(boolean(true)));
    reg.register_typed("false", 0, FunctionFlags::PURE, bool_one(), |_ctx, _args| Ok(boolean(false)));
    reg.register_typed("not", 1, FunctionFlags::PURE, bool_one(), |_ctx, args| Ok(boolean(!ebv(&args[0])?)));
    reg.register_typed("boolean", 1, FunctionFlags::PURE, bool_one(), |_ctx, args| Ok(boolean(ebv(&args[0])?)));

    // ===== Sequences =====
    reg.register_typed("count", 1, FunctionFlags::PURE, SeqType::atomic(AtomicType::Integer), |_ctx, args| {
        Ok(vec![XdmItem::Atomic(XdmAtomicValue::Integer(args[0].len() as i64))])
    });
    reg.register_typed("empty", 1, FunctionFlags::PURE, bool_one(), |_ctx, args| Ok(boolean(args[0].is_empty())));
    reg.register_typed("exists", 1, FunctionFlags::PURE, bool_one(), |_ctx, args| Ok(boolean(!args[0].is_empty())));
    reg.register_typed("sum", 1, FunctionFlags::PURE, SeqType::atomic(AtomicType::Numeric), |_ctx, args| {
        sum_default(&args[0])
    });
    // exactly-one($arg) => returns the item, else FORG0005
    reg.register_typed("exactly-one", 1, FunctionFlags::PURE, SeqType::one(ItemType::AnyItem), |_ctx, args| {
        if args[0].len() != 1 {
            return Err(Error::cardinality(
                ErrorCode::FORG0005,
                format!("exactly-one() requires a sequence of length 1, got {}", args[0].len()),
            ));
        }
        Ok(args[0].clone())
    });
    // zero-or-one($arg) => returns as-is, else FORG0004
    reg.register_typed("zero-or-one", 1, FunctionFlags::PURE, SeqType::optional(ItemType::AnyItem), |_ctx, args| {
        if args[0].len() > 1 {
            return Err(Error::cardinality(
                ErrorCode::FORG0004,
                format!("zero-or-one() called with {} items", args[0].len()),
            ));
        }
        Ok(args[0].clone())
    });

    // ===== Strings and atomization =====
    reg.register_typed("string", 1, FunctionFlags::PURE, SeqType::atomic(AtomicType::String), |_ctx, args| {
        if args[0].len() > 1 {
            return Err(Error::from_code(ErrorCode::XPTY0004, "string() expects at most one item"));
        }
        Ok(vec![XdmItem::Atomic(XdmAtomicValue::String(item_to_string(&args[0])))])
    });
    reg.register_variadic("concat", 2, FunctionFlags::PURE, SeqType::atomic(AtomicType::String), |_ctx, args| {
        let mut out = String::new();
        for a in args {
            if a.len() > 1 {
                return Err(Error::from_code(ErrorCode::XPTY0004, "concat() arguments must be single items"));
            }
            out.push_str(&item_to_string(a));
        }
        Ok(vec![XdmItem::Atomic(XdmAtomicValue::String(out))])
    });
    reg.register_typed(
        "data",
        1,
        FunctionFlags::PURE,
        SeqType::star(ItemType::Atomic(AtomicType::AnyAtomic)),
        |_ctx, args| Ok(args[0].iter().map(|i| XdmItem::Atomic(i.atomize())).collect()),
    );

    // ===== Effects =====
    reg.register_range("error", 0, Some(1), FunctionFlags::NONDETERMINISTIC, None, |_ctx, args| {
        error_default(args)
    });
    reg.register_typed("random", 0, FunctionFlags::NONDETERMINISTIC, SeqType::atomic(AtomicType::Double), |_ctx, _args| {
        Ok(vec![XdmItem::Atomic(XdmAtomicValue::Double(rand::random::<f64>()))])
    });
    reg.register_typed(
        "current-dateTime",
        0,
        FunctionFlags::NONDETERMINISTIC,
        SeqType::atomic(AtomicType::DateTime),
        |ctx: &CallCtx, _args| {
            let now = ctx.dyn_ctx.now.unwrap_or_else(|| chrono::Utc::now().fixed_offset());
            Ok(vec![XdmItem::Atomic(XdmAtomicValue::DateTime(now))])
        },
    );

    reg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::DynamicContext;

    fn call(name: &str, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
        let reg = default_function_registry();
        let def = reg.resolve(name, args.len()).unwrap();
        let dyn_ctx = DynamicContext::default();
        def.invoke(&CallCtx { dyn_ctx: &dyn_ctx }, args)
    }

    #[test]
    fn sum_promotes_untyped_to_double() {
        let args = vec![vec![XdmItem::from(1i64), XdmItem::Atomic(XdmAtomicValue::UntypedAtomic("2".into()))]];
        assert_eq!(call("sum", &args).unwrap(), vec![XdmItem::from(3.0f64)]);
        assert_eq!(call("sum", &[vec![]]).unwrap(), vec![XdmItem::from(0i64)]);
    }

    #[test]
    fn exactly_one_is_a_cardinality_error() {
        let err = call("exactly-one", &[vec![]]).unwrap_err();
        assert_eq!(err.code, ErrorCode::FORG0005);
        assert_eq!(err.kind, crate::runtime::ErrorKind::Cardinality);
    }

    #[test]
    fn error_is_flagged_nondeterministic() {
        let reg = default_function_registry();
        assert!(!reg.resolve("error", 0).unwrap().flags.deterministic);
        assert!(reg.resolve("count", 1).unwrap().flags.deterministic);
        assert_eq!(call("error", &[vec![XdmItem::from("boom")]]).unwrap_err().message, "boom");
    }
}
