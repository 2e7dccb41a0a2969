//! Arithmetic/bitwise opcode semantics.
//!
//! Promotion rules: same-typed Int32 ops overflow-check and promote to
//! BigInt rather than wrap; mixed Int32/BigInt promote to
//! BigInt; mixed integer/float widen both to the wider float; `/` always
//! yields a float; `//` yields integer floor division; `**` associates
//! right-to-left (the opcode itself is binary — right-associativity is a
//! parser/codegen concern, already baked into the emitted instruction
//! order by the time this runs).

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{ToPrimitive, Zero};

use crate::bytecode::Opcode;
use crate::error::RuntimeError;
use crate::value::Value;

fn type_error_for(op: &str, a: &Value, b: &Value) -> RuntimeError {
    // The error carries the debug location of the operand at fault,
    // favoring the left operand when both are problematic: span
    // attribution happens at the call site via `with_location`, this just
    // produces the message naming both operand types.
    RuntimeError::type_error(format!(
        "cannot {op} {} and {}",
        a.value_type(),
        b.value_type()
    ))
}

enum Numeric {
    Int32(i32),
    BigInt(BigInt),
    Float(f64),
}

fn classify(v: &Value) -> Option<Numeric> {
    match v {
        Value::Int32(i) => Some(Numeric::Int32(*i)),
        Value::BigInt(b) => Some(Numeric::BigInt((**b).clone())),
        Value::Float32(f) => Some(Numeric::Float(*f as f64)),
        Value::Float64(f) => Some(Numeric::Float(*f)),
        _ => None,
    }
}

fn normalize_bigint(b: BigInt) -> Value {
    match b.to_i32() {
        Some(i) => Value::Int32(i),
        None => Value::BigInt(std::rc::Rc::new(b)),
    }
}

/// Widen `a` and `b` to a common "pair shape" for a binary op: both
/// floats, both bigints, or (fast path) both plain i32s.
enum Pair {
    Ints(i32, i32),
    BigInts(BigInt, BigInt),
    Floats(f64, f64),
}

fn widen(a: &Numeric, b: &Numeric) -> Pair {
    match (a, b) {
        (Numeric::Int32(x), Numeric::Int32(y)) => Pair::Ints(*x, *y),
        (Numeric::Float(_), _) | (_, Numeric::Float(_)) => {
            Pair::Floats(to_f64(a), to_f64(b))
        }
        _ => Pair::BigInts(to_bigint(a), to_bigint(b)),
    }
}

fn to_f64(n: &Numeric) -> f64 {
    match n {
        Numeric::Int32(i) => *i as f64,
        Numeric::BigInt(b) => b.to_f64().unwrap_or(f64::NAN),
        Numeric::Float(f) => *f,
    }
}

fn to_bigint(n: &Numeric) -> BigInt {
    match n {
        Numeric::Int32(i) => BigInt::from(*i),
        Numeric::BigInt(b) => b.clone(),
        Numeric::Float(f) => BigInt::from(*f as i64),
    }
}

/// Binary arithmetic/bitwise dispatch shared by ADD/SUBTRACT/MULTIPLY/
/// DIVIDE/MOD/POWER/FLOOR_DIV and the bitwise/shift family.
pub fn binary(op: Opcode, a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    use Opcode::*;
    if op == Add {
        if let (Value::String(x), Value::String(y)) = (a, b) {
            return Ok(Value::new_string(format!("{x}{y}")));
        }
    }

    match op {
        Add | Subtract | Multiply => {
            let (na, nb) = (classify(a), classify(b));
            let (na, nb) = match (na, nb) {
                (Some(x), Some(y)) => (x, y),
                _ => {
                    let verb = match op {
                        Add => "add",
                        Subtract => "subtract",
                        _ => "multiply",
                    };
                    return Err(type_error_for(verb, a, b));
                }
            };
            match widen(&na, &nb) {
                Pair::Ints(x, y) => {
                    let checked = match op {
                        Add => x.checked_add(y),
                        Subtract => x.checked_sub(y),
                        _ => x.checked_mul(y),
                    };
                    Ok(match checked {
                        Some(v) => Value::Int32(v),
                        None => {
                            let (x, y) = (BigInt::from(x), BigInt::from(y));
                            normalize_bigint(match op {
                                Add => x + y,
                                Subtract => x - y,
                                _ => x * y,
                            })
                        }
                    })
                }
                Pair::BigInts(x, y) => Ok(normalize_bigint(match op {
                    Add => x + y,
                    Subtract => x - y,
                    _ => x * y,
                })),
                Pair::Floats(x, y) => Ok(Value::Float64(match op {
                    Add => x + y,
                    Subtract => x - y,
                    _ => x * y,
                })),
            }
        }
        Divide => {
            let (x, y) = numeric_pair("divide", a, b)?;
            if y == 0.0 {
                return Err(RuntimeError::arithmetic_error("division by zero"));
            }
            Ok(Value::Float64(x / y))
        }
        FloorDiv => {
            let (na, nb) = match (classify(a), classify(b)) {
                (Some(x), Some(y)) => (x, y),
                _ => return Err(type_error_for("floor-divide", a, b)),
            };
            // Floor division (`5 // 2 -> 2`) differs for a negative divisor
            // from Rust's `div_euclid` (Euclidean division, remainder
            // always non-negative) — `Integer::div_floor` floors toward
            // negative infinity instead, and is defined for both `i32` and
            // `BigInt`.
            match widen(&na, &nb) {
                Pair::Ints(x, y) => {
                    if y == 0 {
                        return Err(RuntimeError::arithmetic_error("division by zero"));
                    }
                    Ok(Value::Int32(x.div_floor(&y)))
                }
                Pair::BigInts(x, y) => {
                    if y.is_zero() {
                        return Err(RuntimeError::arithmetic_error("division by zero"));
                    }
                    Ok(normalize_bigint(x.div_floor(&y)))
                }
                Pair::Floats(x, y) => Ok(Value::Float64((x / y).floor())),
            }
        }
        Mod => {
            let (na, nb) = match (classify(a), classify(b)) {
                (Some(x), Some(y)) => (x, y),
                _ => return Err(type_error_for("take the modulus of", a, b)),
            };
            match widen(&na, &nb) {
                Pair::Ints(x, y) => {
                    if y == 0 {
                        return Err(RuntimeError::arithmetic_error("division by zero"));
                    }
                    Ok(Value::Int32(x.mod_floor(&y)))
                }
                Pair::BigInts(x, y) => {
                    if y.is_zero() {
                        return Err(RuntimeError::arithmetic_error("division by zero"));
                    }
                    Ok(normalize_bigint(x.mod_floor(&y)))
                }
                Pair::Floats(x, y) => {
                    let r = x % y;
                    Ok(Value::Float64(if r != 0.0 && (r < 0.0) != (y < 0.0) {
                        r + y
                    } else {
                        r
                    }))
                }
            }
        }
        Power => {
            let (x, y) = numeric_pair("raise", a, b)?;
            Ok(Value::Float64(x.powf(y)))
        }
        BitwiseAnd | BitwiseOr | BitwiseXor => {
            let (x, y) = int_pair("bitwise-combine", a, b)?;
            Ok(Value::Int32(match op {
                BitwiseAnd => x & y,
                BitwiseOr => x | y,
                _ => x ^ y,
            }))
        }
        LeftShift => {
            let (x, y) = int_pair("shift", a, b)?;
            if y < 0 {
                return Err(RuntimeError::range_error("shift amount must be non-negative"));
            }
            match x.checked_shl(y as u32) {
                Some(v) if (v >> y as u32) == x => Ok(Value::Int32(v)),
                _ => Ok(normalize_bigint(BigInt::from(x) << y as u32)),
            }
        }
        RightShift => {
            let (x, y) = int_pair("shift", a, b)?;
            Ok(Value::Int32(x >> y.clamp(0, 31)))
        }
        LogicalRightShift => {
            let (x, y) = int_pair("shift", a, b)?;
            Ok(Value::Int32(((x as u32) >> y.clamp(0, 31) as u32) as i32))
        }
        _ => unreachable!("binary() called with non-arithmetic opcode {op:?}"),
    }
}

fn numeric_pair(verb: &str, a: &Value, b: &Value) -> Result<(f64, f64), RuntimeError> {
    match (classify(a), classify(b)) {
        (Some(x), Some(y)) => Ok((to_f64(&x), to_f64(&y))),
        _ => Err(type_error_for(verb, a, b)),
    }
}

fn int_pair(verb: &str, a: &Value, b: &Value) -> Result<(i32, i32), RuntimeError> {
    match (a, b) {
        (Value::Int32(x), Value::Int32(y)) => Ok((*x, *y)),
        _ => Err(type_error_for(verb, a, b)),
    }
}

pub fn negate(a: &Value) -> Result<Value, RuntimeError> {
    match a {
        Value::Int32(i) => match i.checked_neg() {
            Some(v) => Ok(Value::Int32(v)),
            None => Ok(normalize_bigint(-BigInt::from(*i))),
        },
        Value::BigInt(b) => Ok(normalize_bigint(-(**b).clone())),
        Value::Float32(f) => Ok(Value::Float32(-f)),
        Value::Float64(f) => Ok(Value::Float64(-f)),
        other => Err(RuntimeError::type_error(format!(
            "cannot negate {}",
            other.value_type()
        ))),
    }
}

pub fn bitwise_not(a: &Value) -> Result<Value, RuntimeError> {
    match a {
        Value::Int32(i) => Ok(Value::Int32(!i)),
        other => Err(RuntimeError::type_error(format!(
            "cannot bitwise-negate {}",
            other.value_type()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_overflow_promotes_to_bigint() {
        let r = binary(Opcode::Add, &Value::Int32(i32::MAX), &Value::Int32(1)).unwrap();
        assert!(matches!(r, Value::BigInt(_)));
    }

    #[test]
    fn division_always_yields_float() {
        let r = binary(Opcode::Divide, &Value::Int32(5), &Value::Int32(2)).unwrap();
        assert_eq!(r, Value::Float64(2.5));
    }

    #[test]
    fn floor_division_law_holds() {
        let q = binary(Opcode::FloorDiv, &Value::Int32(5), &Value::Int32(2)).unwrap();
        let r = binary(Opcode::Mod, &Value::Int32(5), &Value::Int32(2)).unwrap();
        assert_eq!(q, Value::Int32(2));
        assert_eq!(r, Value::Int32(1));
    }

    #[test]
    fn floor_division_rounds_toward_negative_infinity() {
        // 7 // -2 == -4 (floor(-3.5)), not Euclidean division's -3.
        let q = binary(Opcode::FloorDiv, &Value::Int32(7), &Value::Int32(-2)).unwrap();
        let r = binary(Opcode::Mod, &Value::Int32(7), &Value::Int32(-2)).unwrap();
        assert_eq!(q, Value::Int32(-4));
        assert_eq!(r, Value::Int32(-1));
    }

    #[test]
    fn mixed_int_float_widens_to_float() {
        let r = binary(Opcode::Add, &Value::Int32(1), &Value::Float64(1.5)).unwrap();
        assert_eq!(r, Value::Float64(2.5));
    }

    #[test]
    fn negative_right_shift_preserves_sign() {
        let r = binary(Opcode::RightShift, &Value::Int32(-16), &Value::Int32(1)).unwrap();
        assert_eq!(r, Value::Int32(-8));
    }

    #[test]
    fn logical_right_shift_fills_with_zero() {
        let r = binary(Opcode::LogicalRightShift, &Value::Int32(-16), &Value::Int32(1)).unwrap();
        assert_eq!(r, Value::Int32(2147483640));
    }

    #[test]
    fn division_by_zero_is_arithmetic_error() {
        let err = binary(Opcode::FloorDiv, &Value::Int32(1), &Value::Int32(0)).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Arithmetic);
    }

    #[test]
    fn string_concatenation_via_add() {
        let r = binary(
            Opcode::Add,
            &Value::new_string("foo"),
            &Value::new_string("bar"),
        )
        .unwrap();
        assert_eq!(r, Value::new_string("foobar"));
    }

    #[test]
    fn multiplying_string_and_int_is_a_type_error() {
        let err = binary(Opcode::Multiply, &Value::new_string("x"), &Value::Int32(3)).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Type);
        assert!(err.message.contains("string"));
        assert!(err.message.contains("int32"));
    }
}
