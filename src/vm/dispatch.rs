//! Equality, ordered comparison, `instanceof`/`in`, and property
//! resolution. Split out from `vm::mod` because these are the places
//! where the value model (pure data) and the class registry (needs a
//! live `Vm`) meet.

use crate::error::RuntimeError;
use crate::value::numeric::{compare_numeric, values_equal_primitive};
use crate::value::{Value, ValueType};
use crate::vm::{bind_method, Vm};

/// `==`/`!=`: structural for immutables and cross-type numerics
/// (`values_equal_primitive`); for compound containers, reference
/// equality unless the receiver's class defines `equals`, in which case
/// that method is the final word.
pub fn values_equal(vm: &mut Vm, a: &Value, b: &Value) -> Result<bool, RuntimeError> {
    if let Some(result) = values_equal_primitive(a, b) {
        return Ok(result);
    }
    if let Some(class) = a.own_class().or_else(|| vm.class_for(a.value_type())) {
        if let Some(equals) = class.lookup_instance("equals") {
            let result = vm.call_native_or_closure(equals, vec![a.clone(), b.clone()])?;
            return Ok(crate::value::numeric::is_truthy(&result));
        }
    }
    Ok(reference_equal(a, b))
}

fn reference_equal(a: &Value, b: &Value) -> bool {
    use Value::*;
    match (a, b) {
        (Array(x), Array(y)) => std::rc::Rc::ptr_eq(x, y),
        (Object(x), Object(y)) => std::rc::Rc::ptr_eq(x, y),
        (Function(x), Function(y)) => std::rc::Rc::ptr_eq(x, y),
        (Closure(x), Closure(y)) => std::rc::Rc::ptr_eq(x, y),
        (Class(x), Class(y)) => std::rc::Rc::ptr_eq(x, y),
        _ => a == b,
    }
}

/// The total-order comparison primitive, specialized to the four
/// relational opcodes. Strings never coerce to numbers; comparing
/// disjoint non-numeric types is a type error, except `String`-to-`String`
/// which uses lexicographic order.
pub fn compare(op: crate::bytecode::Opcode, a: &Value, b: &Value) -> Result<bool, RuntimeError> {
    use crate::bytecode::Opcode::*;
    use std::cmp::Ordering;

    let ordering = if let (Value::String(x), Value::String(y)) = (a, b) {
        x.cmp(y)
    } else {
        compare_numeric(a, b).ok_or_else(|| {
            RuntimeError::type_error(format!(
                "cannot compare {} and {}",
                a.value_type(),
                b.value_type()
            ))
        })?
    };
    Ok(match op {
        Less => ordering == Ordering::Less,
        Greater => ordering == Ordering::Greater,
        LessEqual => ordering != Ordering::Greater,
        GreaterEqual => ordering != Ordering::Less,
        _ => unreachable!("compare() called with non-relational opcode {op:?}"),
    })
}

/// `in`: array/range membership by value equality, object membership by
/// key, string substring containment.
pub fn contains(container: &Value, needle: &Value) -> Result<bool, RuntimeError> {
    match container {
        Value::Array(arr) => Ok(arr
            .borrow()
            .iter()
            .any(|v| values_equal_primitive(v, needle).unwrap_or_else(|| reference_equal(v, needle)))),
        Value::Object(obj) => match needle {
            Value::String(key) => Ok(obj.borrow().entries.contains_key(key)),
            other => Err(RuntimeError::type_error(format!(
                "object keys are strings, found {}",
                other.value_type()
            ))),
        },
        Value::String(haystack) => match needle {
            Value::String(needle) => Ok(haystack.contains(needle.as_ref())),
            other => Err(RuntimeError::type_error(format!(
                "cannot search a string for {}",
                other.value_type()
            ))),
        },
        Value::Range(range) => {
            let Some(ord) = compare_numeric(needle, &range.start) else {
                return Ok(false);
            };
            if ord == std::cmp::Ordering::Less {
                return Ok(false);
            }
            let end_ord = compare_numeric(needle, &range.end);
            Ok(match end_ord {
                Some(std::cmp::Ordering::Less) => true,
                Some(std::cmp::Ordering::Equal) => !range.exclusive,
                _ => false,
            })
        }
        other => Err(RuntimeError::type_error(format!(
            "{} is not a container",
            other.value_type()
        ))),
    }
}

/// `instanceof`: forbidden on primitive type names (i.e. the right
/// operand must actually be a `Class`), tests class-chain containment.
pub fn instance_of(value: &Value, class: &Value) -> Result<bool, RuntimeError> {
    let Value::Class(class) = class else {
        return Err(RuntimeError::type_error(
            "the right-hand side of `instanceof` must be a class",
        ));
    };
    let Some(value_class) = value.own_class() else {
        return Ok(false);
    };
    Ok(value_class.chain_contains(class))
}

/// `GET_PROPERTY`: own-property check for `Object` receivers, then
/// the class chain (instance class if any, else the VM's builtin class
/// for the receiver's type). A method resolved off the class chain for a
/// non-`Class` receiver comes back wrapped as a `BoundMethod`.
pub fn get_property(vm: &mut Vm, receiver: &Value, name: &str) -> Result<Value, RuntimeError> {
    if matches!(receiver, Value::Null | Value::Undefined) {
        return Err(RuntimeError::type_error(format!(
            "cannot read property `{name}` of {}",
            receiver.value_type()
        )));
    }
    if let Value::Class(class) = receiver {
        return Ok(class.lookup_static(name).unwrap_or(Value::Undefined));
    }
    if let Value::Object(obj) = receiver {
        if let Some(v) = obj.borrow().entries.get(name) {
            return Ok(v.clone());
        }
    }
    let class = receiver
        .own_class()
        .or_else(|| vm.class_for(receiver.value_type()));
    if let Some(class) = class {
        if let Some(v) = class.lookup_instance(name) {
            return Ok(bind_method(receiver.clone(), v));
        }
    }
    Ok(Value::Undefined)
}

/// As `get_property`, but returns the raw (unbound) callable for
/// `CALL_METHOD`, which prepends the receiver as argument zero itself
/// rather than going through a `BoundMethod` indirection.
pub fn resolve_callable(
    vm: &mut Vm,
    receiver: &Value,
    name: &str,
) -> Result<Option<Value>, RuntimeError> {
    if matches!(receiver, Value::Null | Value::Undefined) {
        return Err(RuntimeError::type_error(format!(
            "cannot call method `{name}` on {}",
            receiver.value_type()
        )));
    }
    if let Value::Class(class) = receiver {
        return Ok(class.lookup_static(name));
    }
    if let Value::Object(obj) = receiver {
        if let Some(v) = obj.borrow().entries.get(name) {
            return Ok(Some(v.clone()));
        }
    }
    let class = receiver
        .own_class()
        .or_else(|| vm.class_for(receiver.value_type()));
    Ok(class.and_then(|c| c.lookup_instance(name)))
}

/// Type-tag gate used by a handful of builtin natives that only make
/// sense for a specific receiver shape (e.g. `Array.push`).
pub fn expect_type<'a>(
    v: &'a Value,
    expected: ValueType,
    context: &str,
) -> Result<&'a Value, RuntimeError> {
    if v.value_type() == expected {
        Ok(v)
    } else {
        Err(RuntimeError::type_error(format!(
            "{context} expects {expected}, found {}",
            v.value_type()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Opcode;

    #[test]
    fn cross_type_numeric_equality() {
        let mut vm = Vm::new();
        assert!(values_equal(&mut vm, &Value::Int32(2), &Value::Float64(2.0)).unwrap());
    }

    #[test]
    fn containers_are_reference_equal_without_a_class() {
        let mut vm = Vm::new();
        let a = Value::new_array(vec![Value::Int32(1)]);
        let b = Value::new_array(vec![Value::Int32(1)]);
        assert!(!values_equal(&mut vm, &a, &b).unwrap());
        assert!(values_equal(&mut vm, &a, &a.clone()).unwrap());
    }

    #[test]
    fn comparison_never_coerces_strings_to_numbers() {
        let err = compare(Opcode::Less, &Value::new_string("1"), &Value::Int32(2)).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Type);
    }

    #[test]
    fn string_in_string_is_substring_search() {
        assert!(contains(&Value::new_string("hello world"), &Value::new_string("world")).unwrap());
    }

    #[test]
    fn array_membership_by_value() {
        let arr = Value::new_array(vec![Value::Int32(1), Value::Int32(2)]);
        assert!(contains(&arr, &Value::Int32(2)).unwrap());
        assert!(!contains(&arr, &Value::Int32(3)).unwrap());
    }

    #[test]
    fn missing_property_on_object_is_undefined() {
        let mut vm = Vm::new();
        let obj = Value::new_object(crate::value::container::ObjectValue::new());
        let v = get_property(&mut vm, &obj, "nope").unwrap();
        assert_eq!(v, Value::Undefined);
    }

    #[test]
    fn property_access_on_null_is_a_type_error() {
        let mut vm = Vm::new();
        let err = get_property(&mut vm, &Value::Null, "a").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Type);
    }
}
