//! Builtin globals: `print`/`println`, `typeof`, `assert`, and the `Math`
//! namespace. Installed as immutable globals so a user script can't
//! accidentally shadow `print` the way it can an ordinary `val`.
//!
//! `Math` is modeled as a static-only namespace would be: a `Class` with
//! no instance properties and no factory, only static properties, looked
//! up through the same `GET_PROPERTY`/`CALL` path as any other class
//! (`Math.sqrt(x)` resolves `sqrt` as a static property and calls it with
//! no receiver prepended, exactly like a free function).

use std::rc::Rc;

use crate::error::{ErrorKind, RuntimeError};
use crate::value::class::Class;
use crate::value::numeric::is_truthy;
use crate::value::Value;
use crate::vm::printing::display_value;
use crate::vm::Vm;

pub fn install_builtin_globals(vm: &mut Vm) {
    vm.define_immutable_global("print", Value::Native(global_print));
    vm.define_immutable_global("println", Value::Native(global_println));
    vm.define_immutable_global("typeof", Value::Native(global_typeof));
    vm.define_immutable_global("assert", Value::Native(global_assert));
    vm.define_immutable_global("Math", Value::Class(Rc::new(math_class())));
    vm.define_immutable_global("NaN", Value::Float64(f64::NAN));
    vm.define_immutable_global("Infinity", Value::Float64(f64::INFINITY));
}

fn arg<'a>(args: &'a [Value], i: usize, who: &str) -> Result<&'a Value, RuntimeError> {
    args.get(i)
        .ok_or_else(|| RuntimeError::argument_error(format!("{who} expects argument {i}")))
}

fn global_print(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let mut parts = Vec::with_capacity(args.len());
    for a in args {
        parts.push(display_value(vm, a)?);
    }
    print!("{}", parts.join(" "));
    Ok(Value::Undefined)
}

fn global_println(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let mut parts = Vec::with_capacity(args.len());
    for a in args {
        parts.push(display_value(vm, a)?);
    }
    println!("{}", parts.join(" "));
    Ok(Value::Undefined)
}

fn global_typeof(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let v = arg(args, 0, "typeof")?;
    Ok(Value::new_string(v.value_type().to_string()))
}

/// `assert(condition, message?)`: raises an `Assert`-kind error if
/// `condition` is falsy, with a default message naming no particular
/// expression since the original call-site text isn't available this far
/// from codegen (an external collaborator).
fn global_assert(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let condition = arg(args, 0, "assert")?;
    if is_truthy(condition) {
        return Ok(Value::Undefined);
    }
    let message = match args.get(1) {
        Some(Value::String(s)) => s.to_string(),
        _ => "assertion failed".to_string(),
    };
    Err(RuntimeError::new(ErrorKind::Assert, message))
}

fn math_class() -> Class {
    let mut class = Class::new("Math");
    class.static_properties.insert("PI", Value::Float64(std::f64::consts::PI));
    class.static_properties.insert("E", Value::Float64(std::f64::consts::E));
    class.static_properties.insert("sqrt", Value::Native(math_sqrt));
    class.static_properties.insert("abs", Value::Native(math_abs));
    class.static_properties.insert("floor", Value::Native(math_floor));
    class.static_properties.insert("ceil", Value::Native(math_ceil));
    class.static_properties.insert("round", Value::Native(math_round));
    class.static_properties.insert("pow", Value::Native(math_pow));
    class.static_properties.insert("min", Value::Native(math_min));
    class.static_properties.insert("max", Value::Native(math_max));
    class
}

fn as_f64(v: &Value, who: &str) -> Result<f64, RuntimeError> {
    use num_traits::ToPrimitive;
    match v {
        Value::Int32(i) => Ok(*i as f64),
        Value::Float32(f) => Ok(*f as f64),
        Value::Float64(f) => Ok(*f),
        Value::BigInt(b) => Ok(b.to_f64().unwrap_or(f64::NAN)),
        other => Err(RuntimeError::type_error(format!(
            "{who} expects a number, found {}",
            other.value_type()
        ))),
    }
}

fn math_sqrt(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Float64(as_f64(arg(args, 0, "sqrt")?, "sqrt")?.sqrt()))
}

fn math_abs(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    match arg(args, 0, "abs")? {
        Value::Int32(i) => Ok(Value::Int32(i.wrapping_abs())),
        other => Ok(Value::Float64(as_f64(other, "abs")?.abs())),
    }
}

fn math_floor(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Float64(as_f64(arg(args, 0, "floor")?, "floor")?.floor()))
}

fn math_ceil(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Float64(as_f64(arg(args, 0, "ceil")?, "ceil")?.ceil()))
}

fn math_round(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Float64(as_f64(arg(args, 0, "round")?, "round")?.round()))
}

fn math_pow(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let base = as_f64(arg(args, 0, "pow")?, "pow")?;
    let exp = as_f64(arg(args, 1, "pow")?, "pow")?;
    Ok(Value::Float64(base.powf(exp)))
}

fn math_min(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let a = arg(args, 0, "min")?.clone();
    let b = arg(args, 1, "min")?.clone();
    let af = as_f64(&a, "min")?;
    let bf = as_f64(&b, "min")?;
    Ok(if af <= bf { a } else { b })
}

fn math_max(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let a = arg(args, 0, "max")?.clone();
    let b = arg(args, 1, "max")?.clone();
    let af = as_f64(&a, "max")?;
    let bf = as_f64(&b, "max")?;
    Ok(if af >= bf { a } else { b })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typeof_names_match_value_type_display() {
        let mut vm = Vm::new();
        let result = global_typeof(&mut vm, &[Value::Int32(1)]).unwrap();
        assert_eq!(result, Value::new_string("int32"));
    }

    #[test]
    fn assert_raises_assert_kind_on_falsy() {
        let mut vm = Vm::new();
        let err = global_assert(&mut vm, &[Value::Boolean(false)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Assert);
    }

    #[test]
    fn assert_passes_on_truthy() {
        let mut vm = Vm::new();
        assert!(global_assert(&mut vm, &[Value::Boolean(true)]).is_ok());
    }

    #[test]
    fn math_sqrt_and_pow() {
        let mut vm = Vm::new();
        assert_eq!(math_sqrt(&mut vm, &[Value::Int32(9)]).unwrap(), Value::Float64(3.0));
        assert_eq!(
            math_pow(&mut vm, &[Value::Int32(2), Value::Int32(10)]).unwrap(),
            Value::Float64(1024.0)
        );
    }

    #[test]
    fn math_min_max_preserve_operand_identity() {
        let mut vm = Vm::new();
        assert_eq!(
            math_min(&mut vm, &[Value::Int32(3), Value::Int32(5)]).unwrap(),
            Value::Int32(3)
        );
        assert_eq!(
            math_max(&mut vm, &[Value::Int32(3), Value::Int32(5)]).unwrap(),
            Value::Int32(5)
        );
    }
}
