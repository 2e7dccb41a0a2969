//! Builtin class registry and ADT case-class construction.
//!
//! Every non-primitive `Value` variant dispatches `GET_PROPERTY`/
//! `CALL_METHOD` through a `Class` looked up by `ValueType` (`Vm::class_for`,
//! populated here at `Vm::new` time) unless the value carries its own class
//! (user-defined instances and ADT cases, via `Value::own_class`). This
//! registers one native-method table per builtin type rather than
//! special-casing dispatch per opcode.
//!
//! `define_adt_case` is the seam a `data` declaration's compiler hand-off
//! (codegen is an external collaborator) calls through once per case
//! arm: it builds the `Class` with the `__params__` static property and
//! shared `toString`/`equals` instance methods, and — for a
//! zero-parameter case — the single shared singleton instance.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::value::class::{params_of, Class};
use crate::value::container::{BufferReaderState, ObjectValue};
use crate::value::range::{IteratorValue, RangeValue};
use crate::value::{Value, ValueType};
use crate::vm::dispatch::values_equal;
use crate::vm::printing::{builtin_render, debug_value};
use crate::vm::Vm;

pub fn install_builtin_classes(vm: &mut Vm) {
    vm.register_class(ValueType::String, string_class());
    vm.register_class(ValueType::StringBuilder, string_builder_class());
    vm.register_class(ValueType::Array, array_class());
    vm.register_class(ValueType::Object, object_class());
    vm.register_class(ValueType::Range, range_class());
    vm.register_class(ValueType::Iterator, iterator_class());
    vm.register_class(ValueType::Buffer, buffer_class());
    vm.register_class(ValueType::BufferBuilder, buffer_builder_class());
    vm.register_class(ValueType::BufferReader, buffer_reader_class());
    vm.register_class(ValueType::Int32, leaf_class("Int32"));
    vm.register_class(ValueType::BigInt, leaf_class("BigInt"));
    vm.register_class(ValueType::Float32, leaf_class("Float32"));
    vm.register_class(ValueType::Float64, leaf_class("Float64"));
    vm.register_class(ValueType::Boolean, leaf_class("Boolean"));
}

/// `x.toString()` for any builtin value with no user override: defers to
/// the non-class-aware renderer so this doesn't recurse back through class
/// lookup (see `printing::render`'s own `toString` consultation).
fn generic_to_string(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let receiver = receiver_arg(args, "toString")?;
    Ok(Value::new_string(builtin_render(vm, receiver, false)?))
}

fn receiver_arg<'a>(args: &'a [Value], method: &str) -> Result<&'a Value, RuntimeError> {
    args.first()
        .ok_or_else(|| RuntimeError::argument_error(format!("{method} expects a receiver")))
}

fn arg<'a>(args: &'a [Value], i: usize, method: &str) -> Result<&'a Value, RuntimeError> {
    args.get(i)
        .ok_or_else(|| RuntimeError::argument_error(format!("{method} expects argument {i}")))
}

fn as_int(v: &Value, who: &str) -> Result<i64, RuntimeError> {
    match v {
        Value::Int32(i) => Ok(*i as i64),
        other => Err(RuntimeError::type_error(format!(
            "{who} expects an int32 index, found {}",
            other.value_type()
        ))),
    }
}

/// A class with no methods of its own beyond the generic `toString` — used
/// for the numeric/boolean leaves, where `CALL_METHOD`/`GET_PROPERTY` only
/// ever needs to answer `toString`.
fn leaf_class(name: &str) -> Rc<Class> {
    let mut class = Class::new(name);
    class
        .instance_properties
        .insert("toString", Value::Native(generic_to_string));
    Rc::new(class)
}

// ---------------------------------------------------------------------
// String
// ---------------------------------------------------------------------

fn string_class() -> Rc<Class> {
    let mut class = Class::new("String");
    class
        .instance_properties
        .insert("toString", Value::Native(generic_to_string));
    class
        .instance_properties
        .insert("length", Value::Native(string_length));
    class
        .instance_properties
        .insert("isEmpty", Value::Native(string_is_empty));
    class
        .instance_properties
        .insert("toUpperCase", Value::Native(string_to_upper));
    class
        .instance_properties
        .insert("toLowerCase", Value::Native(string_to_lower));
    class.instance_properties.insert("trim", Value::Native(string_trim));
    class
        .instance_properties
        .insert("contains", Value::Native(string_contains));
    class
        .instance_properties
        .insert("indexOf", Value::Native(string_index_of));
    class
        .instance_properties
        .insert("charAt", Value::Native(string_char_at));
    class.instance_properties.insert("slice", Value::Native(string_slice));
    class.instance_properties.insert("split", Value::Native(string_split));
    Rc::new(class)
}

fn as_str<'a>(v: &'a Value, who: &str) -> Result<&'a str, RuntimeError> {
    match v {
        Value::String(s) => Ok(s),
        other => Err(RuntimeError::type_error(format!(
            "{who} expects a string, found {}",
            other.value_type()
        ))),
    }
}

fn string_length(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = as_str(receiver_arg(args, "length")?, "length")?;
    Ok(Value::Int32(s.chars().count() as i32))
}

fn string_is_empty(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = as_str(receiver_arg(args, "isEmpty")?, "isEmpty")?;
    Ok(Value::Boolean(s.is_empty()))
}

fn string_to_upper(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = as_str(receiver_arg(args, "toUpperCase")?, "toUpperCase")?;
    Ok(Value::new_string(s.to_uppercase()))
}

fn string_to_lower(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = as_str(receiver_arg(args, "toLowerCase")?, "toLowerCase")?;
    Ok(Value::new_string(s.to_lowercase()))
}

fn string_trim(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = as_str(receiver_arg(args, "trim")?, "trim")?;
    Ok(Value::new_string(s.trim()))
}

fn string_contains(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = as_str(receiver_arg(args, "contains")?, "contains")?;
    let needle = as_str(arg(args, 1, "contains")?, "contains")?;
    Ok(Value::Boolean(s.contains(needle)))
}

fn string_index_of(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = as_str(receiver_arg(args, "indexOf")?, "indexOf")?;
    let needle = as_str(arg(args, 1, "indexOf")?, "indexOf")?;
    Ok(match s.find(needle) {
        Some(byte_idx) => Value::Int32(s[..byte_idx].chars().count() as i32),
        None => Value::Int32(-1),
    })
}

fn string_char_at(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = as_str(receiver_arg(args, "charAt")?, "charAt")?;
    let idx = as_int(arg(args, 1, "charAt")?, "charAt")?;
    if idx < 0 {
        return Err(RuntimeError::range_error("charAt index out of range"));
    }
    match s.chars().nth(idx as usize) {
        Some(c) => Ok(Value::new_string(c.to_string())),
        None => Err(RuntimeError::range_error("charAt index out of range")),
    }
}

fn string_slice(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = as_str(receiver_arg(args, "slice")?, "slice")?;
    let chars: Vec<char> = s.chars().collect();
    let start = as_int(arg(args, 1, "slice")?, "slice")?.clamp(0, chars.len() as i64) as usize;
    let end = match args.get(2) {
        Some(v) => as_int(v, "slice")?.clamp(start as i64, chars.len() as i64) as usize,
        None => chars.len(),
    };
    Ok(Value::new_string(chars[start..end].iter().collect::<String>()))
}

fn string_split(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = as_str(receiver_arg(args, "split")?, "split")?;
    let sep = as_str(arg(args, 1, "split")?, "split")?;
    let parts = if sep.is_empty() {
        s.chars().map(|c| Value::new_string(c.to_string())).collect()
    } else {
        s.split(sep).map(Value::new_string).collect()
    };
    Ok(Value::new_array(parts))
}

// ---------------------------------------------------------------------
// StringBuilder
// ---------------------------------------------------------------------

fn string_builder_class() -> Rc<Class> {
    let mut class = Class::new("StringBuilder");
    class
        .instance_properties
        .insert("toString", Value::Native(generic_to_string));
    class
        .instance_properties
        .insert("length", Value::Native(string_builder_length));
    class
        .instance_properties
        .insert("append", Value::Native(string_builder_append));
    Rc::new(class)
}

fn as_builder<'a>(v: &'a Value, who: &str) -> Result<&'a Rc<RefCell<String>>, RuntimeError> {
    match v {
        Value::StringBuilder(s) => Ok(s),
        other => Err(RuntimeError::type_error(format!(
            "{who} expects a string builder, found {}",
            other.value_type()
        ))),
    }
}

fn string_builder_length(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = as_builder(receiver_arg(args, "length")?, "length")?;
    Ok(Value::Int32(s.borrow().chars().count() as i32))
}

fn string_builder_append(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let receiver = receiver_arg(args, "append")?.clone();
    let builder = as_builder(&receiver, "append")?;
    let piece = display_piece(vm, arg(args, 1, "append")?)?;
    builder.borrow_mut().push_str(&piece);
    Ok(receiver)
}

fn display_piece(vm: &mut Vm, v: &Value) -> Result<String, RuntimeError> {
    match v {
        Value::String(s) => Ok(s.to_string()),
        other => crate::vm::printing::display_value(vm, other),
    }
}

// ---------------------------------------------------------------------
// Array
// ---------------------------------------------------------------------

fn array_class() -> Rc<Class> {
    let mut class = Class::new("Array");
    class
        .instance_properties
        .insert("toString", Value::Native(generic_to_string));
    class.instance_properties.insert("length", Value::Native(array_length));
    class.instance_properties.insert("isEmpty", Value::Native(array_is_empty));
    class.instance_properties.insert("push", Value::Native(array_push));
    class.instance_properties.insert("pop", Value::Native(array_pop));
    class.instance_properties.insert("get", Value::Native(array_get));
    class.instance_properties.insert("set", Value::Native(array_set));
    class.instance_properties.insert("slice", Value::Native(array_slice));
    class.instance_properties.insert("join", Value::Native(array_join));
    class
        .instance_properties
        .insert("contains", Value::Native(array_contains));
    class
        .instance_properties
        .insert("indexOf", Value::Native(array_index_of));
    class.instance_properties.insert("reverse", Value::Native(array_reverse));
    class.instance_properties.insert("map", Value::Native(array_map));
    class.instance_properties.insert("filter", Value::Native(array_filter));
    class
        .instance_properties
        .insert("forEach", Value::Native(array_for_each));
    class.instance_properties.insert("reduce", Value::Native(array_reduce));
    class
        .instance_properties
        .insert("iterator", Value::Native(array_iterator));
    Rc::new(class)
}

fn as_array<'a>(v: &'a Value, who: &str) -> Result<&'a Rc<RefCell<Vec<Value>>>, RuntimeError> {
    match v {
        Value::Array(a) => Ok(a),
        other => Err(RuntimeError::type_error(format!(
            "{who} expects an array, found {}",
            other.value_type()
        ))),
    }
}

fn array_length(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let a = as_array(receiver_arg(args, "length")?, "length")?;
    Ok(Value::Int32(a.borrow().len() as i32))
}

fn array_is_empty(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let a = as_array(receiver_arg(args, "isEmpty")?, "isEmpty")?;
    Ok(Value::Boolean(a.borrow().is_empty()))
}

fn array_push(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let receiver = receiver_arg(args, "push")?.clone();
    let a = as_array(&receiver, "push")?;
    a.borrow_mut().push(arg(args, 1, "push")?.clone());
    Ok(receiver)
}

fn array_pop(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let a = as_array(receiver_arg(args, "pop")?, "pop")?;
    Ok(a.borrow_mut().pop().unwrap_or(Value::Undefined))
}

fn index_in_bounds(len: usize, idx: i64, who: &str) -> Result<usize, RuntimeError> {
    if idx < 0 || idx as usize >= len {
        return Err(RuntimeError::range_error(format!(
            "{who} index {idx} out of range (length {len})"
        )));
    }
    Ok(idx as usize)
}

fn array_get(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let a = as_array(receiver_arg(args, "get")?, "get")?;
    let idx = as_int(arg(args, 1, "get")?, "get")?;
    let a = a.borrow();
    let i = index_in_bounds(a.len(), idx, "get")?;
    Ok(a[i].clone())
}

fn array_set(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let receiver = receiver_arg(args, "set")?.clone();
    let a = as_array(&receiver, "set")?;
    let idx = as_int(arg(args, 1, "set")?, "set")?;
    let value = arg(args, 2, "set")?.clone();
    let mut a = a.borrow_mut();
    let i = index_in_bounds(a.len(), idx, "set")?;
    a[i] = value;
    Ok(Value::Undefined)
}

fn array_slice(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let a = as_array(receiver_arg(args, "slice")?, "slice")?;
    let a = a.borrow();
    let start = as_int(arg(args, 1, "slice")?, "slice")?.clamp(0, a.len() as i64) as usize;
    let end = match args.get(2) {
        Some(v) => as_int(v, "slice")?.clamp(start as i64, a.len() as i64) as usize,
        None => a.len(),
    };
    Ok(Value::new_array(a[start..end].to_vec()))
}

fn array_join(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let a = as_array(receiver_arg(args, "join")?, "join")?.clone();
    let sep = match args.get(1) {
        Some(Value::String(s)) => s.to_string(),
        Some(other) => {
            return Err(RuntimeError::type_error(format!(
                "join expects a string separator, found {}",
                other.value_type()
            )))
        }
        None => String::new(),
    };
    let items = a.borrow().clone();
    let mut parts = Vec::with_capacity(items.len());
    for item in &items {
        parts.push(crate::vm::printing::display_value(vm, item)?);
    }
    Ok(Value::new_string(parts.join(&sep)))
}

fn array_contains(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let a = as_array(receiver_arg(args, "contains")?, "contains")?.clone();
    let needle = arg(args, 1, "contains")?.clone();
    let items = a.borrow().clone();
    for item in &items {
        if values_equal(vm, item, &needle)? {
            return Ok(Value::Boolean(true));
        }
    }
    Ok(Value::Boolean(false))
}

fn array_index_of(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let a = as_array(receiver_arg(args, "indexOf")?, "indexOf")?.clone();
    let needle = arg(args, 1, "indexOf")?.clone();
    let items = a.borrow().clone();
    for (i, item) in items.iter().enumerate() {
        if values_equal(vm, item, &needle)? {
            return Ok(Value::Int32(i as i32));
        }
    }
    Ok(Value::Int32(-1))
}

fn array_reverse(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let receiver = receiver_arg(args, "reverse")?.clone();
    let a = as_array(&receiver, "reverse")?;
    a.borrow_mut().reverse();
    Ok(receiver)
}

fn array_map(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let a = as_array(receiver_arg(args, "map")?, "map")?.clone();
    let f = arg(args, 1, "map")?.clone();
    let items = a.borrow().clone();
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(vm.call_native_or_closure(f.clone(), vec![item])?);
    }
    Ok(Value::new_array(out))
}

fn array_filter(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let a = as_array(receiver_arg(args, "filter")?, "filter")?.clone();
    let f = arg(args, 1, "filter")?.clone();
    let items = a.borrow().clone();
    let mut out = Vec::new();
    for item in items {
        let keep = vm.call_native_or_closure(f.clone(), vec![item.clone()])?;
        if crate::value::numeric::is_truthy(&keep) {
            out.push(item);
        }
    }
    Ok(Value::new_array(out))
}

fn array_for_each(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let a = as_array(receiver_arg(args, "forEach")?, "forEach")?.clone();
    let f = arg(args, 1, "forEach")?.clone();
    let items = a.borrow().clone();
    for item in items {
        vm.call_native_or_closure(f.clone(), vec![item])?;
    }
    Ok(Value::Undefined)
}

fn array_reduce(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let a = as_array(receiver_arg(args, "reduce")?, "reduce")?.clone();
    let f = arg(args, 1, "reduce")?.clone();
    let mut acc = arg(args, 2, "reduce")?.clone();
    let items = a.borrow().clone();
    for item in items {
        acc = vm.call_native_or_closure(f.clone(), vec![acc, item])?;
    }
    Ok(acc)
}

fn array_iterator(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let receiver = receiver_arg(args, "iterator")?.clone();
    as_array(&receiver, "iterator")?;
    Ok(Value::Iterator(Rc::new(IteratorValue::over_array(receiver))))
}

// ---------------------------------------------------------------------
// Object
// ---------------------------------------------------------------------

fn object_class() -> Rc<Class> {
    let mut class = Class::new("Object");
    class
        .instance_properties
        .insert("toString", Value::Native(generic_to_string));
    class.instance_properties.insert("length", Value::Native(object_length));
    class.instance_properties.insert("isEmpty", Value::Native(object_is_empty));
    class.instance_properties.insert("keys", Value::Native(object_keys));
    class.instance_properties.insert("values", Value::Native(object_values));
    class.instance_properties.insert("has", Value::Native(object_has));
    class.instance_properties.insert("get", Value::Native(object_get));
    class.instance_properties.insert("set", Value::Native(object_set));
    class.instance_properties.insert("remove", Value::Native(object_remove));
    Rc::new(class)
}

fn as_object<'a>(v: &'a Value, who: &str) -> Result<&'a Rc<RefCell<ObjectValue>>, RuntimeError> {
    match v {
        Value::Object(o) => Ok(o),
        other => Err(RuntimeError::type_error(format!(
            "{who} expects an object, found {}",
            other.value_type()
        ))),
    }
}

fn object_length(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let o = as_object(receiver_arg(args, "length")?, "length")?;
    Ok(Value::Int32(o.borrow().entries.len() as i32))
}

fn object_is_empty(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let o = as_object(receiver_arg(args, "isEmpty")?, "isEmpty")?;
    Ok(Value::Boolean(o.borrow().entries.is_empty()))
}

fn object_keys(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let o = as_object(receiver_arg(args, "keys")?, "keys")?;
    let keys = o.borrow().entries.keys().map(Value::new_string).collect();
    Ok(Value::new_array(keys))
}

fn object_values(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let o = as_object(receiver_arg(args, "values")?, "values")?;
    let values = o.borrow().entries.iter().map(|(_, v)| v.clone()).collect();
    Ok(Value::new_array(values))
}

fn object_has(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let o = as_object(receiver_arg(args, "has")?, "has")?;
    let key = as_str(arg(args, 1, "has")?, "has")?;
    Ok(Value::Boolean(o.borrow().entries.contains_key(key)))
}

fn object_get(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let o = as_object(receiver_arg(args, "get")?, "get")?;
    let key = as_str(arg(args, 1, "get")?, "get")?;
    Ok(o.borrow().entries.get(key).cloned().unwrap_or(Value::Undefined))
}

fn object_set(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let receiver = receiver_arg(args, "set")?.clone();
    let o = as_object(&receiver, "set")?;
    let key = as_str(arg(args, 1, "set")?, "set")?.to_string();
    let value = arg(args, 2, "set")?.clone();
    o.borrow_mut().entries.insert(key, value);
    Ok(Value::Undefined)
}

fn object_remove(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let o = as_object(receiver_arg(args, "remove")?, "remove")?;
    let key = as_str(arg(args, 1, "remove")?, "remove")?;
    Ok(o.borrow_mut().entries.remove(key).unwrap_or(Value::Undefined))
}

// ---------------------------------------------------------------------
// Range / Iterator
// ---------------------------------------------------------------------

fn range_class() -> Rc<Class> {
    let mut class = Class::new("Range");
    class
        .instance_properties
        .insert("toString", Value::Native(generic_to_string));
    class.instance_properties.insert("isEmpty", Value::Native(range_is_empty));
    class.instance_properties.insert("length", Value::Native(range_length));
    class
        .instance_properties
        .insert("contains", Value::Native(range_contains));
    class
        .instance_properties
        .insert("iterator", Value::Native(range_iterator));
    Rc::new(class)
}

fn as_range<'a>(v: &'a Value, who: &str) -> Result<&'a Rc<RangeValue>, RuntimeError> {
    match v {
        Value::Range(r) => Ok(r),
        other => Err(RuntimeError::type_error(format!(
            "{who} expects a range, found {}",
            other.value_type()
        ))),
    }
}

fn range_is_empty(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let r = as_range(receiver_arg(args, "isEmpty")?, "isEmpty")?;
    Ok(Value::Boolean(r.is_empty()))
}

fn range_length(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let r = as_range(receiver_arg(args, "length")?, "length")?;
    Ok(match r.len() {
        Some(n) => Value::Int32(n as i32),
        None => Value::Undefined,
    })
}

fn range_contains(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let r = as_range(receiver_arg(args, "contains")?, "contains")?.clone();
    let needle = arg(args, 1, "contains")?.clone();
    Ok(Value::Boolean(
        crate::vm::dispatch::contains(&Value::Range(r), &needle)?,
    ))
}

fn range_iterator(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let r = as_range(receiver_arg(args, "iterator")?, "iterator")?;
    Ok(Value::Iterator(Rc::new(IteratorValue::over_range((**r).clone()))))
}

fn iterator_class() -> Rc<Class> {
    let mut class = Class::new("Iterator");
    class
        .instance_properties
        .insert("toString", Value::Native(generic_to_string));
    class.instance_properties.insert("next", Value::Native(iterator_next));
    class
        .instance_properties
        .insert("hasNext", Value::Native(iterator_has_next));
    Rc::new(class)
}

fn as_iterator<'a>(v: &'a Value, who: &str) -> Result<&'a Rc<IteratorValue>, RuntimeError> {
    match v {
        Value::Iterator(it) => Ok(it),
        other => Err(RuntimeError::type_error(format!(
            "{who} expects an iterator, found {}",
            other.value_type()
        ))),
    }
}

fn iterator_next(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let it = as_iterator(receiver_arg(args, "next")?, "next")?;
    Ok(it.next().unwrap_or(Value::Undefined))
}

fn iterator_has_next(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let it = as_iterator(receiver_arg(args, "hasNext")?, "hasNext")?;
    Ok(Value::Boolean(it.has_next()))
}

// ---------------------------------------------------------------------
// Buffer / BufferBuilder / BufferReader
// ---------------------------------------------------------------------

fn buffer_class() -> Rc<Class> {
    let mut class = Class::new("Buffer");
    class
        .instance_properties
        .insert("toString", Value::Native(generic_to_string));
    class.instance_properties.insert("length", Value::Native(buffer_length));
    class.instance_properties.insert("get", Value::Native(buffer_get));
    class.instance_properties.insert("slice", Value::Native(buffer_slice));
    class
        .instance_properties
        .insert("reader", Value::Native(buffer_reader));
    Rc::new(class)
}

fn as_bytes<'a>(v: &'a Value, who: &str) -> Result<&'a Rc<RefCell<Vec<u8>>>, RuntimeError> {
    match v {
        Value::Buffer(b) | Value::BufferBuilder(b) => Ok(b),
        other => Err(RuntimeError::type_error(format!(
            "{who} expects a buffer, found {}",
            other.value_type()
        ))),
    }
}

fn buffer_length(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let b = as_bytes(receiver_arg(args, "length")?, "length")?;
    Ok(Value::Int32(b.borrow().len() as i32))
}

fn buffer_get(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let b = as_bytes(receiver_arg(args, "get")?, "get")?;
    let idx = as_int(arg(args, 1, "get")?, "get")?;
    let b = b.borrow();
    let i = index_in_bounds(b.len(), idx, "get")?;
    Ok(Value::Int32(b[i] as i32))
}

fn buffer_slice(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let b = as_bytes(receiver_arg(args, "slice")?, "slice")?;
    let b = b.borrow();
    let start = as_int(arg(args, 1, "slice")?, "slice")?.clamp(0, b.len() as i64) as usize;
    let end = match args.get(2) {
        Some(v) => as_int(v, "slice")?.clamp(start as i64, b.len() as i64) as usize,
        None => b.len(),
    };
    Ok(Value::Buffer(Rc::new(RefCell::new(b[start..end].to_vec()))))
}

fn buffer_reader(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let receiver = receiver_arg(args, "reader")?.clone();
    as_bytes(&receiver, "reader")?;
    Ok(Value::BufferReader(Rc::new(RefCell::new(
        BufferReaderState::new(receiver),
    ))))
}

fn buffer_builder_class() -> Rc<Class> {
    let mut class = Class::new("BufferBuilder");
    class
        .instance_properties
        .insert("toString", Value::Native(generic_to_string));
    class.instance_properties.insert("length", Value::Native(buffer_length));
    class
        .instance_properties
        .insert("appendByte", Value::Native(buffer_builder_append_byte));
    class
        .instance_properties
        .insert("appendString", Value::Native(buffer_builder_append_string));
    class
        .instance_properties
        .insert("toBuffer", Value::Native(buffer_builder_to_buffer));
    Rc::new(class)
}

fn buffer_builder_append_byte(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let receiver = receiver_arg(args, "appendByte")?.clone();
    let b = as_bytes(&receiver, "appendByte")?;
    let byte = as_int(arg(args, 1, "appendByte")?, "appendByte")?;
    if !(0..=255).contains(&byte) {
        return Err(RuntimeError::range_error("appendByte expects a byte in 0..=255"));
    }
    b.borrow_mut().push(byte as u8);
    Ok(receiver)
}

fn buffer_builder_append_string(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let receiver = receiver_arg(args, "appendString")?.clone();
    let b = as_bytes(&receiver, "appendString")?;
    let s = as_str(arg(args, 1, "appendString")?, "appendString")?;
    b.borrow_mut().extend_from_slice(s.as_bytes());
    Ok(receiver)
}

fn buffer_builder_to_buffer(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let b = as_bytes(receiver_arg(args, "toBuffer")?, "toBuffer")?;
    Ok(Value::Buffer(Rc::new(RefCell::new(b.borrow().clone()))))
}

fn buffer_reader_class() -> Rc<Class> {
    let mut class = Class::new("BufferReader");
    class
        .instance_properties
        .insert("toString", Value::Native(generic_to_string));
    class
        .instance_properties
        .insert("readByte", Value::Native(buffer_reader_read_byte));
    class
        .instance_properties
        .insert("hasNext", Value::Native(buffer_reader_has_next));
    class
        .instance_properties
        .insert("position", Value::Native(buffer_reader_position));
    Rc::new(class)
}

fn as_reader<'a>(
    v: &'a Value,
    who: &str,
) -> Result<&'a Rc<RefCell<BufferReaderState>>, RuntimeError> {
    match v {
        Value::BufferReader(r) => Ok(r),
        other => Err(RuntimeError::type_error(format!(
            "{who} expects a buffer reader, found {}",
            other.value_type()
        ))),
    }
}

fn buffer_reader_read_byte(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let r = as_reader(receiver_arg(args, "readByte")?, "readByte")?;
    let mut state = r.borrow_mut();
    let bytes = as_bytes(&state.buffer, "readByte")?.clone();
    let bytes = bytes.borrow();
    if state.position >= bytes.len() {
        return Ok(Value::Undefined);
    }
    let byte = bytes[state.position];
    state.position += 1;
    Ok(Value::Int32(byte as i32))
}

fn buffer_reader_has_next(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let r = as_reader(receiver_arg(args, "hasNext")?, "hasNext")?;
    let state = r.borrow();
    let bytes = as_bytes(&state.buffer, "hasNext")?;
    Ok(Value::Boolean(state.position < bytes.borrow().len()))
}

fn buffer_reader_position(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let r = as_reader(receiver_arg(args, "position")?, "position")?;
    Ok(Value::Int32(r.borrow().position as i32))
}

// ---------------------------------------------------------------------
// ADT (`data` declaration) case classes
// ---------------------------------------------------------------------

/// What `define_adt_case` hands back for one case arm: a singleton case
/// produces its single shared instance directly; a constructor case
/// produces the callable `Class` whose factory builds instances on demand.
pub enum AdtCase {
    Singleton(Value),
    Constructor(Rc<Class>),
}

/// Build the `Class` (and, for a singleton, the single instance) for one
/// arm of a `data TypeName case Case(params...)` declaration: a
/// `__params__` static property listing parameter names in order;
/// instances carrying `__type`/`__case_type`/one field per parameter.
///
/// `NativeFn` is a bare `fn` pointer (natives carry no captured state),
/// so a constructor case's factory can't close over its own
/// parameter list the way a closure would. Instead `adt_construct` is one
/// shared factory for every constructor case; it reads `__params__` and
/// `__type` back off `args[0]`, the class itself, which `Vm::invoke`
/// prepends before calling any class factory (see `vm::mod`).
pub fn define_adt_case(type_name: &str, case_name: &str, params: &[&str]) -> AdtCase {
    let mut class = Class::new(case_name);
    class.static_properties.insert(
        "__params__",
        Value::new_array(params.iter().map(|p| Value::new_string(*p)).collect()),
    );
    class
        .static_properties
        .insert("__type", Value::new_string(type_name));
    class
        .instance_properties
        .insert("toString", Value::Native(adt_to_string));
    class
        .instance_properties
        .insert("equals", Value::Native(adt_equals));

    if params.is_empty() {
        let case_type = "singleton";
        class
            .static_properties
            .insert("__case_type", Value::new_string(case_type));
        let class = Rc::new(class);
        let mut instance = ObjectValue::with_class(class);
        instance.entries.insert("__type", Value::new_string(type_name));
        instance.entries.insert("__case_type", Value::new_string(case_type));
        return AdtCase::Singleton(Value::new_object(instance));
    }

    class
        .static_properties
        .insert("__case_type", Value::new_string("constructor"));
    class.factory = Some(adt_construct);
    AdtCase::Constructor(Rc::new(class))
}

/// Shared factory for every constructor-case class: validates
/// arity against `__params__` and builds an instance carrying `__type`,
/// `__case_type`, and one entry per declared parameter in order.
fn adt_construct(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let Some(Value::Class(class)) = args.first() else {
        return Err(RuntimeError::state_error(
            "ADT constructor called without its class as args[0]",
        ));
    };
    let params = params_of(class);
    let ctor_args = &args[1..];
    if ctor_args.len() != params.len() {
        return Err(RuntimeError::argument_error(format!(
            "{} expects {} argument(s), got {}",
            class.name,
            params.len(),
            ctor_args.len()
        )));
    }
    let type_name = match class.lookup_static("__type") {
        Some(Value::String(s)) => s.to_string(),
        _ => class.name.clone(),
    };
    let mut instance = ObjectValue::with_class(class.clone());
    instance.entries.insert("__type", Value::new_string(type_name));
    instance
        .entries
        .insert("__case_type", Value::new_string("constructor"));
    for (name, value) in params.into_iter().zip(ctor_args.iter().cloned()) {
        instance.entries.insert(name, value);
    }
    Ok(Value::new_object(instance))
}

fn adt_to_string(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let receiver = receiver_arg(args, "toString")?;
    let obj = as_object(receiver, "toString")?;
    let (class, case_type) = {
        let obj = obj.borrow();
        let class = obj
            .class
            .clone()
            .ok_or_else(|| RuntimeError::state_error("ADT instance missing class"))?;
        let case_type = match obj.entries.get("__case_type") {
            Some(Value::String(s)) => s.to_string(),
            _ => "constructor".to_string(),
        };
        (class, case_type)
    };
    if case_type == "singleton" {
        return Ok(Value::new_string(class.name.clone()));
    }
    let params = params_of(&class);
    let mut rendered = Vec::with_capacity(params.len());
    for p in &params {
        let v = obj.borrow().entries.get(p).cloned().unwrap_or(Value::Undefined);
        rendered.push(debug_value(vm, &v)?);
    }
    Ok(Value::new_string(format!(
        "{}({})",
        class.name,
        rendered.join(", ")
    )))
}

fn adt_equals(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let a = receiver_arg(args, "equals")?.clone();
    let b = arg(args, 1, "equals")?.clone();
    let (a_obj, b_obj) = match (&a, &b) {
        (Value::Object(x), Value::Object(y)) => (x, y),
        _ => return Ok(Value::Boolean(false)),
    };
    let a_class = a_obj.borrow().class.clone();
    let b_class = b_obj.borrow().class.clone();
    let (Some(a_class), Some(b_class)) = (a_class, b_class) else {
        return Ok(Value::Boolean(false));
    };
    if !Rc::ptr_eq(&a_class, &b_class) {
        return Ok(Value::Boolean(false));
    }
    for p in params_of(&a_class) {
        let av = a_obj.borrow().entries.get(&p).cloned().unwrap_or(Value::Undefined);
        let bv = b_obj.borrow().entries.get(&p).cloned().unwrap_or(Value::Undefined);
        if !values_equal(vm, &av, &bv)? {
            return Ok(Value::Boolean(false));
        }
    }
    Ok(Value::Boolean(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_length_counts_chars_not_bytes() {
        let mut vm = Vm::new();
        let r = crate::vm::dispatch::resolve_callable(&mut vm, &Value::new_string("héllo"), "length")
            .unwrap()
            .unwrap();
        let result = vm
            .call_native_or_closure(r, vec![Value::new_string("héllo")])
            .unwrap();
        assert_eq!(result, Value::Int32(5));
    }

    #[test]
    fn array_push_mutates_in_place() {
        let mut vm = Vm::new();
        let arr = Value::new_array(vec![Value::Int32(1)]);
        let f = crate::vm::dispatch::resolve_callable(&mut vm, &arr, "push").unwrap().unwrap();
        vm.call_native_or_closure(f, vec![arr.clone(), Value::Int32(2)]).unwrap();
        assert_eq!(arr, Value::new_array(vec![Value::Int32(1), Value::Int32(2)]));
    }

    #[test]
    fn object_get_missing_key_is_undefined() {
        let mut vm = Vm::new();
        let obj = Value::new_object(ObjectValue::new());
        let f = crate::vm::dispatch::resolve_callable(&mut vm, &obj, "get").unwrap().unwrap();
        let result = vm
            .call_native_or_closure(f, vec![obj, Value::new_string("missing")])
            .unwrap();
        assert_eq!(result, Value::Undefined);
    }

    #[test]
    fn adt_singleton_renders_as_bare_name() {
        let mut vm = Vm::new();
        let AdtCase::Singleton(none) = define_adt_case("Option", "None", &[]) else {
            panic!("expected a singleton");
        };
        assert_eq!(crate::vm::printing::display_value(&mut vm, &none).unwrap(), "None");
    }

    #[test]
    fn adt_constructor_builds_named_fields_and_equals() {
        let mut vm = Vm::new();
        let AdtCase::Constructor(class) = define_adt_case("Option", "Some", &["value"]) else {
            panic!("expected a constructor case");
        };
        let ctor = Value::Class(class);
        let a = vm.call_native_or_closure(ctor.clone(), vec![Value::Int32(1)]).unwrap();
        let b = vm.call_native_or_closure(ctor.clone(), vec![Value::Int32(1)]).unwrap();
        let c = vm.call_native_or_closure(ctor, vec![Value::Int32(2)]).unwrap();
        assert_eq!(crate::vm::printing::display_value(&mut vm, &a).unwrap(), "Some(1)");
        assert!(values_equal(&mut vm, &a, &b).unwrap());
        assert!(!values_equal(&mut vm, &a, &c).unwrap());
    }
}
