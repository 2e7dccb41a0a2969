//! Function, closure, and bound-method objects.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::bytecode::Chunk;
use crate::error::RuntimeError;
use crate::value::Value;
use crate::vm::Vm;

/// A native (Rust-implemented) callable, invoked re-entrantly without
/// pushing a VM call frame.
pub type NativeFn = fn(&mut Vm, &[Value]) -> Result<Value, RuntimeError>;

/// Per-upvalue capture metadata recorded on a `Function` at compile time:
/// which enclosing-scope name to capture when a `CLOSURE` instruction
/// creates a `Closure` from this function.
#[derive(Debug, Clone)]
pub struct CaptureSpec {
    pub name: String,
}

/// A compiled function: bytecode, constant pool (held inside `Chunk`),
/// name, parameter names (for reflection and named-global parameter
/// lookup), and closure-capture metadata.
#[derive(Debug)]
pub struct FunctionValue {
    pub name: String,
    pub chunk: Chunk,
    pub param_names: Vec<String>,
    pub captures: Vec<CaptureSpec>,
}

impl FunctionValue {
    pub fn arity(&self) -> usize {
        self.param_names.len()
    }
}

/// A closure: a `Function` paired with its captured up-values and,
/// if it was created while a `Module` was executing, a non-owning
/// (`Weak`) back-reference to that module. CALL pushes the module for the
/// duration of the call; RETURN pops it — see `vm::dispatch`.
#[derive(Debug)]
pub struct ClosureValue {
    pub function: Rc<FunctionValue>,
    pub upvalues: Vec<Value>,
    pub module: Option<Weak<RefCell<crate::module::Module>>>,
}

impl ClosureValue {
    pub fn new(function: Rc<FunctionValue>, upvalues: Vec<Value>) -> Self {
        Self {
            function,
            upvalues,
            module: None,
        }
    }

    pub fn in_module(
        function: Rc<FunctionValue>,
        upvalues: Vec<Value>,
        module: Weak<RefCell<crate::module::Module>>,
    ) -> Self {
        Self {
            function,
            upvalues,
            module: Some(module),
        }
    }
}

/// A receiver bound to a callable: calling it prepends `receiver` as
/// argument zero.
#[derive(Debug, Clone)]
pub struct BoundMethodValue {
    pub receiver: Value,
    pub callable: Value,
}
