//! Numeric comparison/equality/truthiness/printing.

use std::cmp::Ordering;

use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::value::Value;

fn to_bigint(v: &Value) -> Option<BigInt> {
    match v {
        Value::Int32(i) => Some(BigInt::from(*i)),
        Value::BigInt(b) => Some((**b).clone()),
        _ => None,
    }
}

fn to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Int32(i) => Some(*i as f64),
        Value::BigInt(b) => b.to_f64(),
        Value::Float32(f) => Some(*f as f64),
        Value::Float64(f) => Some(*f),
        _ => None,
    }
}

fn is_float(v: &Value) -> bool {
    matches!(v, Value::Float32(_) | Value::Float64(_))
}

fn is_numeric(v: &Value) -> bool {
    matches!(
        v,
        Value::Int32(_) | Value::BigInt(_) | Value::Float32(_) | Value::Float64(_)
    )
}

/// The numeric comparison primitive: `None` means "unordered" (NaN
/// involved), not "incomparable types" — callers that need to report a
/// type error for non-numeric operands check `is_numeric` themselves
/// first.
///
/// Rule order:
/// (a) identical tags compare natively;
/// (b) either operand float ⇒ widen both to f64;
/// (c) otherwise both are Int32/BigInt ⇒ widen both to BigInt.
pub fn compare_numeric(a: &Value, b: &Value) -> Option<Ordering> {
    if !is_numeric(a) || !is_numeric(b) {
        return None;
    }

    match (a, b) {
        (Value::Int32(x), Value::Int32(y)) => Some(x.cmp(y)),
        (Value::BigInt(x), Value::BigInt(y)) => Some(x.cmp(y)),
        (Value::Float32(x), Value::Float32(y)) => x.partial_cmp(y),
        (Value::Float64(x), Value::Float64(y)) => x.partial_cmp(y),
        _ if is_float(a) || is_float(b) => {
            let x = to_f64(a)?;
            let y = to_f64(b)?;
            x.partial_cmp(&y)
        }
        _ => {
            let x = to_bigint(a)?;
            let y = to_bigint(b)?;
            Some(x.cmp(&y))
        }
    }
}

/// Same-type structural equality for immutables, cross-type numeric
/// equality via `compare_numeric`, reference equality for compound
/// containers unless the receiver's class defines `equals`. This
/// function implements the immutable/numeric cases; container identity
/// and class-`equals` dispatch happen in `vm::dispatch` where the class
/// registry is reachable.
pub fn values_equal_primitive(a: &Value, b: &Value) -> Option<bool> {
    if is_numeric(a) && is_numeric(b) {
        return compare_numeric(a, b).map(|o| o == Ordering::Equal);
    }
    match (a, b) {
        (Value::Null, Value::Null) => Some(true),
        (Value::Undefined, Value::Undefined) => Some(true),
        (Value::Boolean(x), Value::Boolean(y)) => Some(x == y),
        (Value::String(x), Value::String(y)) => Some(x == y),
        _ => None,
    }
}

/// Truthiness: null/undefined/false/zero/empty-string/empty-buffer
/// /null-container are falsy; everything else truthy.
pub fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null | Value::Undefined => false,
        Value::Boolean(b) => *b,
        Value::Int32(i) => *i != 0,
        Value::BigInt(b) => !num_traits::Zero::is_zero(&**b),
        Value::Float32(f) => *f != 0.0,
        Value::Float64(f) => *f != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Buffer(b) => !b.borrow().is_empty(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_tags_compare_natively() {
        assert_eq!(
            compare_numeric(&Value::Int32(1), &Value::Int32(2)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn float_widening_compares_as_double() {
        assert_eq!(
            compare_numeric(&Value::Int32(2), &Value::Float64(2.5)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn nan_is_unordered_with_everything_including_itself() {
        let nan = Value::Float64(f64::NAN);
        assert_eq!(compare_numeric(&nan, &nan), None);
        assert_eq!(compare_numeric(&nan, &Value::Int32(1)), None);
    }

    #[test]
    fn mixed_int_bigint_widen_to_bigint() {
        use num_bigint::BigInt;
        let big = Value::BigInt(std::rc::Rc::new(BigInt::from(10)));
        assert_eq!(
            compare_numeric(&Value::Int32(5), &big),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn truthiness_boundary_cases() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&Value::Int32(0)));
        assert!(!is_truthy(&Value::String(std::rc::Rc::from(""))));
        assert!(is_truthy(&Value::String(std::rc::Rc::from("x"))));
        assert!(is_truthy(&Value::Int32(1)));
    }
}
