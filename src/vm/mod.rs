//! Interpreter loop and VM-wide state.
//!
//! `Vm` owns the operand/frame stacks, the globals namespace, the module
//! cache, and the module-context stack; `run` is the opcode dispatch loop.
//! A failing opcode handler returns `Err(RuntimeError)`, the loop stops
//! (no further opcodes execute on the failing path), and the stack/frame
//! state is truncated back to the entry-point baseline by the caller of
//! `run_top_level`.

mod arithmetic;
mod classes;
mod dispatch;
mod globals;
mod printing;

pub use printing::{debug_value, display_value};

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::{Rc, Weak};

use crate::bytecode::{Opcode, IMPORT_NAMESPACE, IMPORT_WILDCARD};
use crate::error::RuntimeError;
use crate::module::{apply_import, ImportForm, ModuleCompiler, ModuleExecutor, ModuleLoader};
use crate::ordered_map::OrderedMap;
use crate::value::class::Class;
use crate::value::container::ObjectValue;
use crate::value::function::{BoundMethodValue, ClosureValue, FunctionValue};
use crate::value::{Value, ValueType};

/// A single call frame: the executing closure, the position in the
/// operand stack where this frame's locals begin, and the instruction
/// pointer within the closure's function bytecode.
#[derive(Debug)]
pub struct CallFrame {
    pub closure: Rc<ClosureValue>,
    pub ip: usize,
    pub slots: usize,
    /// Whether opening this frame actually pushed a module onto
    /// `module_context` — not simply whether `closure.module` is `Some`,
    /// since a `Weak` that fails to upgrade pushes nothing. `do_return`
    /// pops iff this is `true`, so the two are always in lockstep.
    pushed_module: bool,
}

/// What the dispatch loop should do after one opcode handler runs.
enum Step {
    Continue,
    Halted,
}

/// The VM: operand/frame stacks, globals, immutability markers, module
/// cache/search path/context stack, result register, and the
/// builtin-class registry used for method dispatch on primitive/compound
/// values.
pub struct Vm {
    pub stack: Vec<Value>,
    pub frames: Vec<CallFrame>,
    pub globals: OrderedMap<Value>,
    pub immutable_globals: HashSet<String>,
    pub loader: ModuleLoader,
    pub module_context: Vec<Rc<RefCell<crate::module::Module>>>,
    pub result: Option<Value>,
    classes: std::collections::HashMap<ValueType, Rc<Class>>,
    trace: bool,
}

thread_local! {
    /// A per-thread current-VM pointer for native methods that need VM
    /// access without an explicit parameter. Every `NativeFn` in this
    /// crate is already passed `&mut Vm` explicitly, so nothing in this
    /// crate's own natives needs this slot — it exists for host code that
    /// calls into Slate-level helpers (e.g. the datetime/timezone
    /// collaborators) without a VM handle in scope. Set for the duration
    /// of `Vm::run` via `CurrentVmGuard`.
    static CURRENT_VM: RefCell<Option<*mut Vm>> = const { RefCell::new(None) };
}

struct CurrentVmGuard;

impl CurrentVmGuard {
    fn set(vm: *mut Vm) -> Self {
        CURRENT_VM.with(|slot| *slot.borrow_mut() = Some(vm));
        CurrentVmGuard
    }
}

impl Drop for CurrentVmGuard {
    fn drop(&mut self) {
        CURRENT_VM.with(|slot| *slot.borrow_mut() = None);
    }
}

/// Run `f` with a raw pointer to the currently-executing VM, if any is set.
/// # Safety contract
/// The pointer is only valid while a `Vm::run` call is on the stack; `f`
/// must not stash it anywhere that outlives the call.
pub fn with_current_vm<R>(f: impl FnOnce(&mut Vm) -> R) -> Option<R> {
    let ptr = CURRENT_VM.with(|slot| *slot.borrow());
    // SAFETY: `ptr` was set by `CurrentVmGuard::set` to a `&mut Vm` that is
    // still on the call stack for as long as the thread-local holds it;
    // `Drop` clears the slot before that `&mut Vm` could be invalidated.
    ptr.map(|p| f(unsafe { &mut *p }))
}

impl Vm {
    pub fn new() -> Self {
        let mut vm = Self {
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(64),
            globals: OrderedMap::new(),
            immutable_globals: HashSet::new(),
            loader: ModuleLoader::new(),
            module_context: Vec::new(),
            result: None,
            classes: std::collections::HashMap::new(),
            trace: std::env::var("SLATE_TRACE_INSTRS").is_ok(),
        };
        classes::install_builtin_classes(&mut vm);
        globals::install_builtin_globals(&mut vm);
        vm
    }

    pub fn class_for(&self, ty: ValueType) -> Option<Rc<Class>> {
        self.classes.get(&ty).cloned()
    }

    pub fn register_class(&mut self, ty: ValueType, class: Rc<Class>) {
        self.classes.insert(ty, class);
    }

    /// Define a VM-global that later `SET_GLOBAL`s may not overwrite.
    /// Used for builtins installed by
    /// `Vm::new`; user-level `val` declarations are the compiler's
    /// responsibility to never re-assign (see DESIGN.md).
    pub fn define_immutable_global(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        self.globals.insert(name.clone(), value);
        self.immutable_globals.insert(name);
    }

    pub fn define_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name, value);
    }

    /// Run `function` as the outermost call: a compiled top-level function
    /// is installed in a fresh call frame, and the interpreter loop runs
    /// until the frame stack empties or an error is raised.
    pub fn run_top_level(&mut self, function: Rc<FunctionValue>) -> Result<Value, RuntimeError> {
        let baseline_stack = self.stack.len();
        let baseline_frames = self.frames.len();
        let closure = Rc::new(ClosureValue::new(function, Vec::new()));
        self.open_frame(closure, Vec::new())?;
        match self.run() {
            Ok(()) => Ok(self.result.take().unwrap_or(Value::Undefined)),
            Err(e) => {
                // On failure, truncate back to the entry-point baseline.
                self.stack.truncate(baseline_stack);
                self.frames.truncate(baseline_frames);
                Err(e)
            }
        }
    }

    /// The opcode dispatch loop. Runs until the frame stack empties
    /// (a `RETURN` from the outermost frame, or `HALT`) or an opcode
    /// handler raises.
    fn run(&mut self) -> Result<(), RuntimeError> {
        let _guard = CurrentVmGuard::set(self as *mut Vm);
        loop {
            if self.frames.is_empty() {
                return Ok(());
            }
            let op = self.fetch_opcode()?;
            if self.trace {
                eprintln!("slate: ip={} op={op:?}", self.current_frame().ip - 1);
            }
            match self.execute_opcode(op)? {
                Step::Continue => continue,
                Step::Halted => return Ok(()),
            }
        }
    }

    fn current_frame(&self) -> &CallFrame {
        self.frames.last().expect("run: frame stack not empty")
    }

    fn current_frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("run: frame stack not empty")
    }

    fn fetch_opcode(&mut self) -> Result<Opcode, RuntimeError> {
        let byte = self.advance_u8();
        Opcode::from_u8(byte)
            .ok_or_else(|| RuntimeError::state_error(format!("invalid opcode byte {byte}")))
    }

    fn advance_u8(&mut self) -> u8 {
        let frame = self.current_frame_mut();
        let byte = frame.closure.function.chunk.read_u8(frame.ip);
        frame.ip += 1;
        byte
    }

    fn advance_u16(&mut self) -> u16 {
        let frame = self.current_frame_mut();
        let v = frame.closure.function.chunk.read_u16(frame.ip);
        frame.ip += 2;
        v
    }

    fn constant(&self, index: u16) -> Value {
        self.current_frame().closure.function.chunk.constants[index as usize].clone()
    }

    fn constant_name(&self, index: u16) -> Result<Rc<str>, RuntimeError> {
        match self.constant(index) {
            Value::String(s) => Ok(s),
            other => Err(RuntimeError::state_error(format!(
                "name constant must be a string, found {}",
                other.value_type()
            ))),
        }
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack
            .pop()
            .ok_or_else(|| RuntimeError::state_error("operand stack underflow"))
    }

    fn peek(&self) -> Result<&Value, RuntimeError> {
        self.stack
            .last()
            .ok_or_else(|| RuntimeError::state_error("operand stack underflow"))
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, RuntimeError> {
        if self.stack.len() < n {
            return Err(RuntimeError::state_error("operand stack underflow"));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    /// Open a new call frame for `closure` with `args` bound to its
    /// leading local slots (arguments are local slots 0..arity-1). Pushes
    /// the closure's owning module onto the module-context stack when its
    /// `Weak` reference still upgrades, and records whether it did in
    /// `CallFrame::pushed_module` so `RETURN` pops iff a push actually
    /// happened here.
    fn open_frame(&mut self, closure: Rc<ClosureValue>, args: Vec<Value>) -> Result<(), RuntimeError> {
        let arity = closure.function.arity();
        if args.len() != arity {
            return Err(RuntimeError::argument_error(format!(
                "{} expects {} argument(s), got {}",
                closure.function.name,
                arity,
                args.len()
            )));
        }
        let slots = self.stack.len();
        self.stack.extend(args);
        let pushed_module = match &closure.module {
            Some(weak_module) => match weak_module.upgrade() {
                Some(module) => {
                    self.module_context.push(module);
                    true
                }
                None => false,
            },
            None => false,
        };
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            slots,
            pushed_module,
        });
        Ok(())
    }

    /// `RETURN`: pop the return value, retire the current frame,
    /// restore `stack_top`, and either push the value for the caller or
    /// (if no frame remains) store it in the result register and signal
    /// the outer loop to stop.
    fn do_return(&mut self) -> Result<Step, RuntimeError> {
        let value = self.pop()?;
        let frame = self.frames.pop().expect("do_return: frame stack not empty");
        if frame.pushed_module {
            self.module_context.pop();
        }
        self.stack.truncate(frame.slots);
        if self.frames.is_empty() {
            self.result = Some(value);
            Ok(Step::Halted)
        } else {
            self.push(value);
            Ok(Step::Continue)
        }
    }

    /// Invoke any callable `Value` with already-evaluated `args`: a `Class`
    /// with a factory runs the factory with the class itself prepended as
    /// `args[0]` (so the factory can read e.g. `__params__` off it, the
    /// same way a method reads its receiver); a `Native` runs synchronously
    /// and its result is pushed directly (natives bypass the frame stack);
    /// a `Function` or `Closure` opens a new frame (its return value
    /// reaches the stack via `RETURN`, not here); a `BoundMethod` prepends
    /// its receiver and recurses.
    pub fn invoke(&mut self, callee: Value, mut args: Vec<Value>) -> Result<(), RuntimeError> {
        match callee {
            Value::Class(class) => {
                let factory = class.factory.ok_or_else(|| {
                    RuntimeError::type_error(format!("class `{}` is not callable", class.name))
                })?;
                args.insert(0, Value::Class(class));
                let result = factory(self, &args)?;
                self.push(result);
                Ok(())
            }
            Value::Native(f) => {
                let result = f(self, &args)?;
                self.push(result);
                Ok(())
            }
            Value::Function(function) => {
                let closure = Rc::new(ClosureValue::new(function, Vec::new()));
                self.open_frame(closure, args)
            }
            Value::Closure(closure) => self.open_frame(closure, args),
            Value::BoundMethod(bound) => {
                args.insert(0, bound.receiver.clone());
                self.invoke(bound.callable.clone(), args)
            }
            other => Err(RuntimeError::type_error(format!(
                "{} is not callable",
                other.value_type()
            ))),
        }
    }

    /// Call a callable `Value` to completion and return its result
    /// synchronously, re-entering the dispatch loop for `Function`/
    /// `Closure` callees. Used by code that needs a value back from a
    /// call but isn't itself an opcode handler driving the main loop —
    /// class-`equals`/`toString` delegation being the prototypical case.
    pub fn call_native_or_closure(
        &mut self,
        callable: Value,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        match callable {
            Value::Native(f) => f(self, &args),
            Value::Function(_) | Value::Closure(_) => {
                let target_depth = self.frames.len();
                self.invoke(callable, args)?;
                self.run_until_depth(target_depth)
            }
            Value::BoundMethod(bound) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(bound.receiver.clone());
                full.extend(args);
                self.call_native_or_closure(bound.callable.clone(), full)
            }
            Value::Class(class) => {
                let factory = class.factory.ok_or_else(|| {
                    RuntimeError::type_error(format!("class `{}` is not callable", class.name))
                })?;
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(Value::Class(class));
                full.extend(args);
                factory(self, &full)
            }
            other => Err(RuntimeError::type_error(format!(
                "{} is not callable",
                other.value_type()
            ))),
        }
    }

    /// Drive the dispatch loop until the frame stack shrinks back to
    /// `target_depth` (the depth captured right before a reentrant call
    /// pushed a new frame), then return the value the completed call left
    /// on top of the stack.
    fn run_until_depth(&mut self, target_depth: usize) -> Result<Value, RuntimeError> {
        loop {
            if self.frames.len() <= target_depth {
                return Ok(self.stack.pop().unwrap_or(Value::Undefined));
            }
            let op = self.fetch_opcode()?;
            match self.execute_opcode(op)? {
                Step::Continue => continue,
                Step::Halted => return Ok(self.result.take().unwrap_or(Value::Undefined)),
            }
        }
    }

    fn execute_opcode(&mut self, op: Opcode) -> Result<Step, RuntimeError> {
        use Opcode::*;
        match op {
            PushConstant => {
                let idx = self.advance_u16();
                self.push(self.constant(idx));
                Ok(Step::Continue)
            }
            PushNull => {
                self.push(Value::Null);
                Ok(Step::Continue)
            }
            PushUndefined => {
                self.push(Value::Undefined);
                Ok(Step::Continue)
            }
            PushTrue => {
                self.push(Value::Boolean(true));
                Ok(Step::Continue)
            }
            PushFalse => {
                self.push(Value::Boolean(false));
                Ok(Step::Continue)
            }
            Pop => {
                self.pop()?;
                Ok(Step::Continue)
            }
            Dup => {
                let v = self.peek()?.clone();
                self.push(v);
                Ok(Step::Continue)
            }
            PopN => {
                let n = self.advance_u8() as usize;
                self.pop_n(n)?;
                Ok(Step::Continue)
            }
            PopNPreserveTop => {
                let n = self.advance_u8() as usize;
                let top = self.pop()?;
                self.pop_n(n)?;
                self.push(top);
                Ok(Step::Continue)
            }
            SetResult => {
                let v = self.peek()?.clone();
                self.result = Some(v);
                Ok(Step::Continue)
            }

            Add | Subtract | Multiply | Divide | Mod | Power | FloorDiv | BitwiseAnd
            | BitwiseOr | BitwiseXor | LeftShift | RightShift | LogicalRightShift => {
                let b = self.pop()?;
                let a = self.pop()?;
                let result = arithmetic::binary(op, &a, &b)?;
                self.push(result);
                Ok(Step::Continue)
            }
            Negate => {
                let a = self.pop()?;
                self.push(arithmetic::negate(&a)?);
                Ok(Step::Continue)
            }
            BitwiseNot => {
                let a = self.pop()?;
                self.push(arithmetic::bitwise_not(&a)?);
                Ok(Step::Continue)
            }
            Increment => {
                let a = self.pop()?;
                self.push(arithmetic::binary(Opcode::Add, &a, &Value::Int32(1))?);
                Ok(Step::Continue)
            }
            Decrement => {
                let a = self.pop()?;
                self.push(arithmetic::binary(Opcode::Subtract, &a, &Value::Int32(1))?);
                Ok(Step::Continue)
            }

            Equal => {
                let b = self.pop()?;
                let a = self.pop()?;
                let eq = dispatch::values_equal(self, &a, &b)?;
                self.push(Value::Boolean(eq));
                Ok(Step::Continue)
            }
            NotEqual => {
                let b = self.pop()?;
                let a = self.pop()?;
                let eq = dispatch::values_equal(self, &a, &b)?;
                self.push(Value::Boolean(!eq));
                Ok(Step::Continue)
            }
            Less | Greater | LessEqual | GreaterEqual => {
                let b = self.pop()?;
                let a = self.pop()?;
                let result = dispatch::compare(op, &a, &b)?;
                self.push(Value::Boolean(result));
                Ok(Step::Continue)
            }
            And => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Boolean(
                    crate::value::numeric::is_truthy(&a) && crate::value::numeric::is_truthy(&b),
                ));
                Ok(Step::Continue)
            }
            Or => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Boolean(
                    crate::value::numeric::is_truthy(&a) || crate::value::numeric::is_truthy(&b),
                ));
                Ok(Step::Continue)
            }
            Not => {
                let a = self.pop()?;
                self.push(Value::Boolean(!crate::value::numeric::is_truthy(&a)));
                Ok(Step::Continue)
            }
            NullCoalesce => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(match a {
                    Value::Null | Value::Undefined => b,
                    other => other,
                });
                Ok(Step::Continue)
            }
            In => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Boolean(dispatch::contains(&b, &a)?));
                Ok(Step::Continue)
            }
            InstanceOf => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Boolean(dispatch::instance_of(&a, &b)?));
                Ok(Step::Continue)
            }

            GetLocal => {
                let slot = self.advance_u8() as usize;
                let idx = self.current_frame().slots + slot;
                self.push(self.stack[idx].clone());
                Ok(Step::Continue)
            }
            SetLocal => {
                let slot = self.advance_u8() as usize;
                let idx = self.current_frame().slots + slot;
                let v = self.peek()?.clone();
                self.stack[idx] = v;
                Ok(Step::Continue)
            }
            GetGlobal => {
                let idx = self.advance_u16();
                let name = self.constant_name(idx)?;
                let v = self.resolve_global(&name)?;
                self.push(v);
                Ok(Step::Continue)
            }
            DefineGlobal => {
                let idx = self.advance_u16();
                let name = self.constant_name(idx)?;
                let v = self.pop()?;
                self.define_in_active_namespace(&name, v)?;
                Ok(Step::Continue)
            }
            SetGlobal => {
                let idx = self.advance_u16();
                let name = self.constant_name(idx)?;
                let v = self.peek()?.clone();
                self.store_global(&name, v)?;
                Ok(Step::Continue)
            }

            GetProperty => {
                let idx = self.advance_u16();
                let name = self.constant_name(idx)?;
                let receiver = self.pop()?;
                let v = dispatch::get_property(self, &receiver, &name)?;
                self.push(v);
                Ok(Step::Continue)
            }
            Call => {
                let argc = self.advance_u8() as usize;
                let args = self.pop_n(argc)?;
                let callee = self.pop()?;
                self.invoke(callee, args)?;
                Ok(Step::Continue)
            }
            CallMethod => {
                let argc = self.advance_u8() as usize;
                let args = self.pop_n(argc)?;
                let name = match self.pop()? {
                    Value::String(s) => s,
                    other => {
                        return Err(RuntimeError::state_error(format!(
                            "CALL_METHOD expects a method-name string below its arguments, found {}",
                            other.value_type()
                        )))
                    }
                };
                let receiver = self.pop()?;
                let callable = dispatch::resolve_callable(self, &receiver, &name)?.ok_or_else(|| {
                    RuntimeError::reference_error(&format!("{}.{name}", receiver.value_type()))
                })?;
                let mut full_args = Vec::with_capacity(args.len() + 1);
                full_args.push(receiver);
                full_args.extend(args);
                self.invoke(callable, full_args)?;
                Ok(Step::Continue)
            }
            Closure => {
                let idx = self.advance_u16();
                let function = match self.constant(idx) {
                    Value::Function(f) => f,
                    other => {
                        return Err(RuntimeError::state_error(format!(
                            "CLOSURE constant must be a function, found {}",
                            other.value_type()
                        )))
                    }
                };
                let upvalues = self.pop_n(function.captures.len())?;
                let module = self
                    .module_context
                    .last()
                    .map(|m| Rc::downgrade(m));
                let closure = match module {
                    Some(m) => ClosureValue::in_module(function, upvalues, m),
                    None => ClosureValue::new(function, upvalues),
                };
                self.push(Value::Closure(Rc::new(closure)));
                Ok(Step::Continue)
            }
            BuildArray => {
                let n = self.advance_u16() as usize;
                let items = self.pop_n(n)?;
                self.push(Value::new_array(items));
                Ok(Step::Continue)
            }
            BuildObject => {
                let n = self.advance_u16() as usize;
                let kvs = self.pop_n(n * 2)?;
                let mut obj = ObjectValue::new();
                for pair in kvs.chunks_exact(2) {
                    let key = match &pair[0] {
                        Value::String(s) => s.to_string(),
                        other => format!("{}", display_value(self, other)?),
                    };
                    obj.entries.insert(key, pair[1].clone());
                }
                self.push(Value::new_object(obj));
                Ok(Step::Continue)
            }
            BuildRange => {
                let exclusive = self.advance_u8() != 0;
                let end = self.pop()?;
                let start = self.pop()?;
                self.push(Value::Range(Rc::new(
                    crate::value::range::RangeValue::new(start, end, exclusive),
                )));
                Ok(Step::Continue)
            }

            Jump => {
                let dist = self.advance_u16();
                self.current_frame_mut().ip += dist as usize;
                Ok(Step::Continue)
            }
            JumpIfFalse => {
                let dist = self.advance_u16();
                // JUMP_IF_FALSE does not pop; callers emit an explicit
                // POP when the value is no longer needed.
                if !crate::value::numeric::is_truthy(self.peek()?) {
                    self.current_frame_mut().ip += dist as usize;
                }
                Ok(Step::Continue)
            }
            Loop => {
                let dist = self.advance_u16();
                self.current_frame_mut().ip -= dist as usize;
                Ok(Step::Continue)
            }
            Return => self.do_return(),
            Halt => {
                let value = self.stack.pop().unwrap_or(Value::Undefined);
                self.result = Some(value);
                self.frames.clear();
                Ok(Step::Halted)
            }

            SetDebugLocation => {
                // 6-byte operand: file-constant index (u16), line (u16),
                // column (u16), attached to values/errors raised by the
                // instruction that follows; tracking the "current"
                // debug span is the compiler's concern for where to attach
                // it on heap values, so here we only consume the operand.
                self.advance_u16();
                self.advance_u16();
                self.advance_u16();
                Ok(Step::Continue)
            }
            ClearDebugLocation => Ok(Step::Continue),

            ImportModule => self.execute_import(),
            GetExport => {
                // Stack layout: [..., namespace_object, name]. The
                // namespace object is the one `IMPORT_MODULE`'s Namespace
                // form binds; `GET_EXPORT` is how compiled code reads a
                // single entry back out of it (e.g. `m.factorial`).
                let name = self.pop_string("export name")?;
                match self.pop()? {
                    Value::Object(obj) => {
                        let v = obj.borrow().entries.get(&name).cloned();
                        self.push(v.unwrap_or(Value::Undefined));
                    }
                    other => {
                        return Err(RuntimeError::type_error(format!(
                            "GET_EXPORT expects a module namespace object, found {}",
                            other.value_type()
                        )))
                    }
                }
                Ok(Step::Continue)
            }
        }
    }

    /// GET_GLOBAL resolution: (1) function-parameter shadow, (2)
    /// active namespace, (3) for gets, VM-globals fallback if inside a
    /// module namespace.
    fn resolve_global(&self, name: &str) -> Result<Value, RuntimeError> {
        if let Some(v) = self.param_shadow(name) {
            return Ok(v);
        }
        if let Some(v) = self.upvalue_shadow(name) {
            return Ok(v);
        }
        if let Some(module) = self.module_context.last() {
            if let Some(v) = module.borrow().namespace.get(name) {
                return Ok(v.clone());
            }
            if let Some(v) = self.globals.get(name) {
                return Ok(v.clone());
            }
        } else if let Some(v) = self.globals.get(name) {
            return Ok(v.clone());
        }
        Err(RuntimeError::reference_error(name))
    }

    fn param_shadow(&self, name: &str) -> Option<Value> {
        let frame = self.frames.last()?;
        let idx = frame
            .closure
            .function
            .param_names
            .iter()
            .position(|p| p == name)?;
        Some(self.stack[frame.slots + idx].clone())
    }

    /// A closure's captured free variables (up-values) are resolved by
    /// name the same way parameters are, one step below the parameter
    /// shadow: the compiler names them in `Function::captures` in the same
    /// order `CLOSURE` popped their values off the stack into
    /// `ClosureValue::upvalues`. Captures are by-value, so there is no
    /// write-back slot for `SET_GLOBAL` the way a parameter has one.
    fn upvalue_shadow(&self, name: &str) -> Option<Value> {
        let frame = self.frames.last()?;
        let idx = frame
            .closure
            .function
            .captures
            .iter()
            .position(|c| c.name == name)?;
        frame.closure.upvalues.get(idx).cloned()
    }

    fn param_shadow_slot(&self, name: &str) -> Option<usize> {
        let frame = self.frames.last()?;
        let idx = frame
            .closure
            .function
            .param_names
            .iter()
            .position(|p| p == name)?;
        Some(frame.slots + idx)
    }

    fn active_namespace_mut(&mut self) -> Option<Rc<RefCell<crate::module::Module>>> {
        self.module_context.last().cloned()
    }

    fn define_in_active_namespace(&mut self, name: &str, value: Value) -> Result<(), RuntimeError> {
        if matches!(value, Value::Undefined) {
            return Err(RuntimeError::type_error(
                "cannot store `undefined` in a global binding",
            ));
        }
        match self.active_namespace_mut() {
            Some(module) => module.borrow_mut().namespace.insert(name.to_string(), value),
            None => self.globals.insert(name.to_string(), value),
        }
        Ok(())
    }

    /// SET_GLOBAL: function-parameter shadow takes priority; writing
    /// `Undefined` or to an immutable VM global is an error.
    fn store_global(&mut self, name: &str, value: Value) -> Result<(), RuntimeError> {
        if matches!(value, Value::Undefined) {
            return Err(RuntimeError::type_error(
                "cannot store `undefined` in a global binding",
            ));
        }
        if let Some(slot) = self.param_shadow_slot(name) {
            self.stack[slot] = value;
            return Ok(());
        }
        match self.active_namespace_mut() {
            Some(module) => {
                let has_own_binding = module.borrow().namespace.contains_key(name);
                if !has_own_binding {
                    // Falling through to a VM global (§4.4's read fallback):
                    // writing here would shadow it inside the module, so the
                    // same immutability guard the VM-global branch applies
                    // has to apply here too.
                    if self.immutable_globals.contains(name) {
                        return Err(RuntimeError::type_error(format!(
                            "`{name}` is immutable and cannot be reassigned"
                        )));
                    }
                    if !self.globals.contains_key(name) {
                        return Err(RuntimeError::reference_error(name));
                    }
                }
                module.borrow_mut().namespace.insert(name.to_string(), value);
                Ok(())
            }
            None => {
                if self.immutable_globals.contains(name) {
                    return Err(RuntimeError::type_error(format!(
                        "`{name}` is immutable and cannot be reassigned"
                    )));
                }
                if !self.globals.contains_key(name) {
                    return Err(RuntimeError::reference_error(name));
                }
                self.globals.insert(name.to_string(), value);
                Ok(())
            }
        }
    }

    /// IMPORT_MODULE. The dotted module path and (for the specific
    /// form) the specifier list travel as preceding `PUSH_CONSTANT`s: a
    /// path string, then for the specific form `count` `(export, local)`
    /// string pairs, all popped here before the flags byte is read.
    fn execute_import(&mut self) -> Result<Step, RuntimeError> {
        let flags = self.advance_u8();
        let count = if flags == IMPORT_WILDCARD || flags == IMPORT_NAMESPACE {
            0
        } else {
            flags as usize
        };
        let mut specifiers = Vec::with_capacity(count);
        for _ in 0..count {
            let local = self.pop_string("import specifier")?;
            let exported = self.pop_string("import specifier")?;
            specifiers.push((exported, local));
        }
        specifiers.reverse();
        let path = self.pop_string("import path")?;

        let current_dir = self
            .module_context
            .last()
            .and_then(|m| m.borrow().path.parent().map(|p| p.to_path_buf()));

        let load_result = self.load_module(&path, current_dir.as_deref());

        match flags {
            IMPORT_WILDCARD => {
                let module = load_result?;
                let mut ns = self.take_active_namespace_snapshot();
                apply_import(ImportForm::Wildcard, &module.borrow(), &mut ns)?;
                self.restore_active_namespace(ns);
                Ok(Step::Continue)
            }
            IMPORT_NAMESPACE => {
                let local_name = path.rsplit('.').next().unwrap_or(&path).to_string();
                match load_result {
                    Ok(module) => {
                        let mut ns = self.take_active_namespace_snapshot();
                        apply_import(
                            ImportForm::Namespace {
                                local_name: &local_name,
                            },
                            &module.borrow(),
                            &mut ns,
                        )?;
                        self.restore_active_namespace(ns);
                        Ok(Step::Continue)
                    }
                    Err(_) => {
                        // §4.6: retry as parent-module + final-segment item import.
                        if let Some((parent, item)) = path.rsplit_once('.') {
                            let parent_module = self.load_module(parent, current_dir.as_deref())?;
                            let value = parent_module
                                .borrow()
                                .exports
                                .get(item)
                                .cloned()
                                .ok_or_else(|| {
                                    RuntimeError::import_error(format!(
                                        "module `{parent}` has no export `{item}`"
                                    ))
                                })?;
                            self.define_in_active_namespace(&local_name, value)?;
                            Ok(Step::Continue)
                        } else {
                            Err(RuntimeError::import_error(format!(
                                "module `{path}` not found"
                            )))
                        }
                    }
                }
            }
            _ => {
                let module = load_result?;
                let mut ns = self.take_active_namespace_snapshot();
                apply_import(
                    ImportForm::Specific {
                        specifiers: &specifiers,
                    },
                    &module.borrow(),
                    &mut ns,
                )?;
                self.restore_active_namespace(ns);
                Ok(Step::Continue)
            }
        }
    }

    fn pop_string(&mut self, what: &str) -> Result<String, RuntimeError> {
        match self.pop()? {
            Value::String(s) => Ok(s.to_string()),
            other => Err(RuntimeError::state_error(format!(
                "expected a string for {what}, found {}",
                other.value_type()
            ))),
        }
    }

    /// `OrderedMap` lives either in a `Module` (behind a `RefCell`) or
    /// directly on the VM; import application needs a plain `&mut
    /// OrderedMap<Value>` so it can share code with the module-loader's
    /// own tests. Snapshot/restore avoids holding a live borrow of the
    /// module's `RefCell` across a call that might re-enter the loader.
    fn take_active_namespace_snapshot(&mut self) -> OrderedMap<Value> {
        match self.active_namespace_mut() {
            Some(module) => module.borrow().namespace.clone(),
            None => self.globals.clone(),
        }
    }

    fn restore_active_namespace(&mut self, ns: OrderedMap<Value>) {
        match self.active_namespace_mut() {
            Some(module) => module.borrow_mut().namespace = ns,
            None => self.globals = ns,
        }
    }

    fn load_module(
        &mut self,
        dotted: &str,
        current_dir: Option<&std::path::Path>,
    ) -> Result<Rc<RefCell<crate::module::Module>>, RuntimeError> {
        if let Some(hit) = self.loader.get_cached(dotted) {
            if hit.borrow().state == crate::module::ModuleState::Loaded {
                return Ok(hit);
            }
        }
        // Splitting the loader out of `self` so `load` can call back into
        // `Vm::execute_as_module` (the `ModuleExecutor`) without aliasing
        // `self.loader` mutably twice.
        let mut loader = std::mem::take(&mut self.loader);
        let compiler = self.loader_compiler();
        let result = loader.load(dotted, current_dir, compiler.as_ref(), self);
        self.loader = loader;
        result
    }

    /// No lexer/parser/codegen lives in this crate (§1): a host embedding
    /// this runtime supplies the real `ModuleCompiler`. Absent one, module
    /// loading of uncompiled source fails with an `Import` error rather
    /// than panicking — tests install their own compiler via
    /// `Vm::load_module_with`.
    fn loader_compiler(&self) -> Box<dyn ModuleCompiler> {
        Box::new(NoCompilerConfigured)
    }

    /// Entry point for hosts/tests that have a real `ModuleCompiler`:
    /// drives the loader directly rather than through `IMPORT_MODULE`.
    pub fn load_module_with(
        &mut self,
        dotted: &str,
        current_dir: Option<&std::path::Path>,
        compiler: &dyn ModuleCompiler,
    ) -> Result<Rc<RefCell<crate::module::Module>>, RuntimeError> {
        let mut loader = std::mem::take(&mut self.loader);
        let result = loader.load(dotted, current_dir, compiler, self);
        self.loader = loader;
        result
    }
}

struct NoCompilerConfigured;
impl ModuleCompiler for NoCompilerConfigured {
    fn compile(
        &self,
        _source: &str,
        path: &std::path::Path,
    ) -> Result<Rc<FunctionValue>, RuntimeError> {
        Err(RuntimeError::import_error(format!(
            "no compiler configured to build `{}` (lexer/parser/codegen are external \
             collaborators, §1); use `Vm::load_module_with` with a real `ModuleCompiler`",
            path.display()
        )))
    }
}

/// §4.6's last paragraph: module execution shares the outer VM's operand
/// and frame stacks. Implementing `ModuleExecutor` for `Vm` itself is what
/// makes that sharing free — `execute` just opens a frame the normal way
/// and drains the loop, with the module already pushed onto the
/// module-context stack by `open_frame` (because the closure we build here
/// carries a reference to it).
impl ModuleExecutor for Vm {
    fn execute(
        &mut self,
        top_level: Rc<FunctionValue>,
        module: &Rc<RefCell<crate::module::Module>>,
    ) -> Result<(), RuntimeError> {
        let closure = Rc::new(ClosureValue::in_module(
            top_level,
            Vec::new(),
            Rc::downgrade(module),
        ));
        let baseline_frames = self.frames.len();
        let baseline_stack = self.stack.len();
        self.open_frame(closure, Vec::new())?;
        match self.run() {
            Ok(()) => {
                self.result = None;
                Ok(())
            }
            Err(e) => {
                self.stack.truncate(baseline_stack);
                self.frames.truncate(baseline_frames);
                Err(e)
            }
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

/// Construct a bound method the way GET_PROPERTY does when a method
/// resolves off a non-class receiver (§4.2).
pub(crate) fn bind_method(receiver: Value, callable: Value) -> Value {
    Value::BoundMethod(Rc::new(BoundMethodValue { receiver, callable }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Chunk, Opcode as Op};
    use crate::value::function::FunctionValue;

    fn function(name: &str, param_names: &[&str], build: impl FnOnce(&mut Chunk)) -> Rc<FunctionValue> {
        let mut chunk = Chunk::new();
        build(&mut chunk);
        Rc::new(FunctionValue {
            name: name.to_string(),
            chunk,
            param_names: param_names.iter().map(|s| s.to_string()).collect(),
            captures: Vec::new(),
        })
    }

    #[test]
    fn push_constant_add_return() {
        let f = function("main", &[], |c| {
            let one = c.add_constant(Value::Int32(40));
            let two = c.add_constant(Value::Int32(2));
            c.emit_op(Op::PushConstant);
            c.emit_u16(one);
            c.emit_op(Op::PushConstant);
            c.emit_u16(two);
            c.emit_op(Op::Add);
            c.emit_op(Op::Return);
        });
        let mut vm = Vm::new();
        let result = vm.run_top_level(f).unwrap();
        assert_eq!(result, Value::Int32(42));
    }

    #[test]
    fn integer_overflow_promotes_to_bigint() {
        let f = function("main", &[], |c| {
            let a = c.add_constant(Value::Int32(2_000_000_000));
            let b = c.add_constant(Value::Int32(2_000_000_000));
            c.emit_op(Op::PushConstant);
            c.emit_u16(a);
            c.emit_op(Op::PushConstant);
            c.emit_u16(b);
            c.emit_op(Op::Add);
            c.emit_op(Op::Return);
        });
        let mut vm = Vm::new();
        let result = vm.run_top_level(f).unwrap();
        match result {
            Value::BigInt(b) => assert_eq!(b.to_string(), "4000000000"),
            other => panic!("expected BigInt, got {other:?}"),
        }
    }

    #[test]
    fn jump_if_false_does_not_pop() {
        // PUSH_FALSE; JUMP_IF_FALSE +3; PUSH_CONSTANT 0 (unreachable); POP;
        // PUSH_CONSTANT 1; RETURN
        let f = function("main", &[], |c| {
            let unreachable = c.add_constant(Value::Int32(999));
            let reached = c.add_constant(Value::Int32(7));
            c.emit_op(Op::PushFalse);
            c.emit_op(Op::JumpIfFalse);
            let patch_at = c.code.len();
            c.emit_u16(0);
            c.emit_op(Op::PushConstant);
            c.emit_u16(unreachable);
            c.emit_op(Op::Pop);
            let target = c.code.len();
            c.patch_u16(patch_at, (target - patch_at - 2) as u16);
            c.emit_op(Op::Pop); // pop the bool JUMP_IF_FALSE left behind
            c.emit_op(Op::PushConstant);
            c.emit_u16(reached);
            c.emit_op(Op::Return);
        });
        let mut vm = Vm::new();
        let result = vm.run_top_level(f).unwrap();
        assert_eq!(result, Value::Int32(7));
    }

    #[test]
    fn call_a_closure_with_one_argument() {
        // fn double(n) { return n + n; }  double(21)
        let double = function("double", &["n"], |c| {
            c.emit_op(Op::GetLocal);
            c.emit_u8(0);
            c.emit_op(Op::GetLocal);
            c.emit_u8(0);
            c.emit_op(Op::Add);
            c.emit_op(Op::Return);
        });
        let main = function("main", &[], |c| {
            let func_const = c.add_constant(Value::Function(double));
            let arg = c.add_constant(Value::Int32(21));
            c.emit_op(Op::PushConstant);
            c.emit_u16(func_const);
            c.emit_op(Op::PushConstant);
            c.emit_u16(arg);
            c.emit_op(Op::Call);
            c.emit_u8(1);
            c.emit_op(Op::Return);
        });
        let mut vm = Vm::new();
        let result = vm.run_top_level(main).unwrap();
        assert_eq!(result, Value::Int32(42));
    }

    #[test]
    fn closure_reads_a_captured_upvalue_by_name() {
        // fn add_k(n) = n + k   // k captured from the enclosing scope
        // (k=10)(31) -> 41
        let mut captured_chunk = Chunk::new();
        let k_name = captured_chunk.add_constant(Value::new_string("k"));
        captured_chunk.emit_op(Op::GetLocal);
        captured_chunk.emit_u8(0);
        captured_chunk.emit_op(Op::GetGlobal);
        captured_chunk.emit_u16(k_name);
        captured_chunk.emit_op(Op::Add);
        captured_chunk.emit_op(Op::Return);
        let captured = Rc::new(FunctionValue {
            name: "add_k".to_string(),
            chunk: captured_chunk,
            param_names: vec!["n".to_string()],
            captures: vec![crate::value::function::CaptureSpec {
                name: "k".to_string(),
            }],
        });

        let main = function("main", &[], |c| {
            let func_const = c.add_constant(Value::Function(captured));
            let k_value = c.add_constant(Value::Int32(10));
            let arg = c.add_constant(Value::Int32(31));
            c.emit_op(Op::PushConstant);
            c.emit_u16(k_value);
            c.emit_op(Op::Closure);
            c.emit_u16(func_const);
            c.emit_op(Op::PushConstant);
            c.emit_u16(arg);
            c.emit_op(Op::Call);
            c.emit_u8(1);
            c.emit_op(Op::Return);
        });
        let mut vm = Vm::new();
        let result = vm.run_top_level(main).unwrap();
        assert_eq!(result, Value::Int32(41));
    }

    #[test]
    fn reference_error_on_unbound_global() {
        let f = function("main", &[], |c| {
            let name = c.add_constant(Value::new_string("missing"));
            c.emit_op(Op::GetGlobal);
            c.emit_u16(name);
            c.emit_op(Op::Return);
        });
        let mut vm = Vm::new();
        let err = vm.run_top_level(f).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Reference);
    }

    #[test]
    fn stack_and_frames_are_restored_after_an_error() {
        let f = function("main", &[], |c| {
            let name = c.add_constant(Value::new_string("missing"));
            c.emit_op(Op::GetGlobal);
            c.emit_u16(name);
            c.emit_op(Op::Return);
        });
        let mut vm = Vm::new();
        let _ = vm.run_top_level(f);
        assert!(vm.stack.is_empty());
        assert!(vm.frames.is_empty());
    }

    fn test_module() -> Rc<RefCell<crate::module::Module>> {
        Rc::new(RefCell::new(crate::module::Module {
            name: "m".to_string(),
            path: std::path::PathBuf::from("m.slate"),
            exports: OrderedMap::new(),
            namespace: OrderedMap::new(),
            state: crate::module::ModuleState::Loading,
        }))
    }

    #[test]
    fn setting_an_immutable_builtin_from_inside_a_module_is_an_error() {
        let mut vm = Vm::new();
        let module = test_module();
        vm.module_context.push(module.clone());
        let err = vm.store_global("print", Value::Int32(1)).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Type);
        // And the builtin must not have been shadowed despite the error.
        assert!(!module.borrow().namespace.contains_key("print"));
    }

    #[test]
    fn setting_a_module_own_binding_does_not_consult_vm_immutability() {
        let mut vm = Vm::new();
        let module = test_module();
        module.borrow_mut().namespace.insert("x", Value::Int32(1));
        vm.module_context.push(module.clone());
        vm.store_global("x", Value::Int32(2)).unwrap();
        assert_eq!(module.borrow().namespace.get("x"), Some(&Value::Int32(2)));
    }

    #[test]
    fn module_context_pop_is_gated_on_whether_open_frame_actually_pushed() {
        // A closure whose module `Weak` no longer upgrades (the module was
        // dropped) must not push onto `module_context` in `open_frame`, and
        // `do_return` must not pop on its behalf either — the two stay in
        // lockstep via `CallFrame::pushed_module` rather than each
        // independently re-deriving "does this closure have a module".
        let f = function("main", &[], |c| {
            c.emit_op(Op::PushNull);
            c.emit_op(Op::Return);
        });
        let dangling_module = {
            let m = test_module();
            Rc::downgrade(&m)
            // `m` drops here; the Weak can no longer upgrade.
        };
        let closure = Rc::new(ClosureValue::in_module(f, Vec::new(), dangling_module));
        let mut vm = Vm::new();
        vm.open_frame(closure, Vec::new()).unwrap();
        assert!(vm.module_context.is_empty());
        let result = vm.run();
        assert!(result.is_ok());
        assert!(vm.module_context.is_empty());
    }
}
