//! Value→string rendering.
//!
//! `render` consults a value's *own* class `toString` first (instance
//! property, then static, then walking the parent chain via
//! `Class::lookup_instance`/`lookup_static`, which already walk the chain)
//! — this only ever fires for user/ADT instances, which are the only
//! values `Value::own_class` returns anything for. Builtin-typed values
//! (strings, arrays, …) have no own class and fall straight through to
//! `builtin_render`, so the `quoted` flag reaches them undisturbed; routing
//! them through the builtin classes' shared `toString` instead would lose
//! it, since that native always renders unquoted (see
//! `vm::classes::generic_to_string`, used only for an explicit
//! `x.toString()` call).
//!
//! Top-level display (`display_value`) renders strings unquoted; nested
//! display (`debug_value`, used for array/object elements) quotes them —
//! strings render without quotes at the top level and with quotes when
//! nested inside containers.

use std::rc::Rc;

use crate::error::RuntimeError;
use crate::value::class::Class;
use crate::value::Value;
use crate::vm::Vm;

/// Top-level display: strings render unquoted.
pub fn display_value(vm: &mut Vm, value: &Value) -> Result<String, RuntimeError> {
    render(vm, value, false)
}

/// Nested display (inside `[...]`/`{...}`): strings render quoted.
pub fn debug_value(vm: &mut Vm, value: &Value) -> Result<String, RuntimeError> {
    render(vm, value, true)
}

fn render(vm: &mut Vm, value: &Value, quoted: bool) -> Result<String, RuntimeError> {
    // Only a user/ADT instance's *own* class (never the VM's builtin-class
    // registry) can override rendering here — the builtin classes' shared
    // `toString` (`classes::generic_to_string`) always renders unquoted, so
    // routing builtin values through it would lose `quoted` for every
    // nested string. Builtin values fall straight through to
    // `builtin_render`, which honors `quoted` itself.
    if let Some(class) = value.own_class() {
        if let Some(to_string) = lookup_to_string(&class) {
            let result = vm.call_native_or_closure(to_string, vec![value.clone()])?;
            return match result {
                Value::String(s) => Ok(s.to_string()),
                // A user `toString` that returns something other than a
                // string is re-rendered rather than rejected — matches the
                // permissive spirit of a dynamically-typed language.
                other => render(vm, &other, quoted),
            };
        }
    }
    builtin_render(vm, value, quoted)
}

fn lookup_to_string(class: &Rc<Class>) -> Option<Value> {
    class
        .lookup_instance("toString")
        .or_else(|| class.lookup_static("toString"))
}

/// Rendering with no class `toString` involved — the fallback `render`
/// reaches for, and also what the builtin classes' own generic `toString`
/// native calls into (see `vm::classes::generic_to_string`) so that an
/// explicit `x.toString()` call doesn't recurse back through class lookup.
pub(crate) fn builtin_render(
    vm: &mut Vm,
    value: &Value,
    quoted: bool,
) -> Result<String, RuntimeError> {
    Ok(match value {
        Value::Null => "null".to_string(),
        Value::Undefined => "undefined".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Int32(i) => i.to_string(),
        Value::BigInt(b) => b.to_string(),
        Value::Float32(f) => format_float(*f as f64),
        Value::Float64(f) => format_float(*f),
        Value::String(s) => {
            if quoted {
                format!("\"{}\"", escape(s))
            } else {
                s.to_string()
            }
        }
        Value::StringBuilder(s) => {
            let s = s.borrow();
            if quoted {
                format!("\"{}\"", escape(&s))
            } else {
                s.clone()
            }
        }
        Value::Array(arr) => {
            let items = arr.borrow();
            let mut parts = Vec::with_capacity(items.len());
            for item in items.iter() {
                parts.push(render(vm, item, true)?);
            }
            format!("[{}]", parts.join(", "))
        }
        Value::Object(obj) => {
            let obj = obj.borrow();
            let mut parts = Vec::with_capacity(obj.entries.len());
            for (k, v) in obj.entries.iter() {
                parts.push(format!("{k}: {}", render(vm, v, true)?));
            }
            format!("{{{}}}", parts.join(", "))
        }
        Value::Range(r) => format!(
            "{}{}{}",
            render(vm, &r.start, true)?,
            if r.exclusive { "..<" } else { ".." },
            render(vm, &r.end, true)?
        ),
        Value::Iterator(_) => "<iterator>".to_string(),
        Value::Buffer(b) => format!("<buffer {} bytes>", b.borrow().len()),
        Value::BufferBuilder(b) => format!("<buffer-builder {} bytes>", b.borrow().len()),
        Value::BufferReader(r) => format!("<buffer-reader @{}>", r.borrow().position),
        Value::Function(f) => format!("<function {}>", f.name),
        Value::Closure(c) => format!("<function {}>", c.function.name),
        Value::Native(_) => "<native function>".to_string(),
        Value::Class(c) => format!("<class {}>", c.name),
        Value::BoundMethod(b) => format!("<bound method on {}>", b.receiver.value_type()),
        Value::LocalDate(d) => format!("{:04}-{:02}-{:02}", d.year, d.month, d.day),
        Value::LocalTime(t) => format!("{:02}:{:02}:{:02}", t.hour, t.minute, t.second),
        Value::LocalDateTime(dt) => format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
            dt.date.year, dt.date.month, dt.date.day, dt.time.hour, dt.time.minute, dt.time.second
        ),
        Value::Instant(i) => format!("<instant {}>", i.epoch_millis),
        Value::Date(d) => format!(
            "{:04}-{:02}-{:02}[{}]",
            d.date.year, d.date.month, d.date.day, d.zone
        ),
        Value::Zone(z) => z.id.to_string(),
        Value::Duration(d) => format!("{}s{}ns", d.seconds, d.nanoseconds),
        Value::Period(p) => format!("{}y{}m{}d", p.years, p.months, p.days),
    })
}

/// Whole-valued floats keep a `.0` suffix so they remain visibly distinct
/// from integers: `Float64` and `Int32` are separate tags, and the printed
/// form should be too.
fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}.0", f as i64)
    } else {
        f.to_string()
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_unquoted_at_top_level_quoted_when_nested() {
        let mut vm = Vm::new();
        assert_eq!(display_value(&mut vm, &Value::new_string("hi")).unwrap(), "hi");
        assert_eq!(debug_value(&mut vm, &Value::new_string("hi")).unwrap(), "\"hi\"");
    }

    #[test]
    fn whole_number_floats_keep_point_zero() {
        let mut vm = Vm::new();
        assert_eq!(display_value(&mut vm, &Value::Float64(2.0)).unwrap(), "2.0");
        assert_eq!(display_value(&mut vm, &Value::Float64(2.5)).unwrap(), "2.5");
    }

    #[test]
    fn array_elements_render_nested_quoted() {
        let mut vm = Vm::new();
        let arr = Value::new_array(vec![Value::new_string("a"), Value::Int32(1)]);
        assert_eq!(display_value(&mut vm, &arr).unwrap(), "[\"a\", 1]");
    }

    #[test]
    fn object_entries_render_insertion_order() {
        let mut vm = Vm::new();
        let mut obj = crate::value::container::ObjectValue::new();
        obj.entries.insert("b", Value::Int32(2));
        obj.entries.insert("a", Value::Int32(1));
        let rendered = display_value(&mut vm, &Value::new_object(obj)).unwrap();
        assert_eq!(rendered, "{b: 2, a: 1}");
    }
}
