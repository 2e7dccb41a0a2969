//! End-to-end module loading: a real `Vm` + `ModuleLoader` + a stand-in
//! `ModuleCompiler` that hands back hand-assembled bytecode keyed off the
//! requested path, driven through the actual `IMPORT_MODULE` opcode rather
//! than the loader in isolation (`src/module.rs` already covers the loader
//! by itself).

mod common;

use std::path::Path;
use std::rc::Rc;

use slate::bytecode::{Chunk, Opcode, IMPORT_NAMESPACE};
use slate::error::RuntimeError;
use slate::module::ModuleCompiler;
use slate::value::function::FunctionValue;
use slate::Value;
use slate::Vm;

use common::Asm;

/// `recursive_math.slate`'s top level: defines `factorial(n)` and `gcd(a, b)`
/// as module-namespace globals, the way a real compiled module would.
fn recursive_math_top_level() -> Rc<FunctionValue> {
    let mut factorial = Asm::new();
    factorial.get_local(0);
    factorial.push_const(Value::Int32(1));
    factorial.op(Opcode::LessEqual);
    let else_branch = factorial.jump_fwd(Opcode::JumpIfFalse);
    factorial.op(Opcode::Pop);
    factorial.push_const(Value::Int32(1));
    factorial.op(Opcode::Return);
    factorial.patch_jump(else_branch);
    factorial.op(Opcode::Pop);
    factorial.get_local(0);
    factorial.get_global("factorial");
    factorial.get_local(0);
    factorial.push_const(Value::Int32(1));
    factorial.op(Opcode::Subtract);
    factorial.op(Opcode::Call).u8(1);
    factorial.op(Opcode::Multiply);
    factorial.op(Opcode::Return);
    let factorial = factorial.finish("factorial", &["n"]);

    // Euclidean gcd(a, b) = b == 0 ? a : gcd(b, a mod b)
    let mut gcd = Asm::new();
    gcd.get_local(1);
    gcd.push_const(Value::Int32(0));
    gcd.op(Opcode::Equal);
    let else_branch = gcd.jump_fwd(Opcode::JumpIfFalse);
    gcd.op(Opcode::Pop);
    gcd.get_local(0);
    gcd.op(Opcode::Return);
    gcd.patch_jump(else_branch);
    gcd.op(Opcode::Pop);
    gcd.get_global("gcd");
    gcd.get_local(1);
    gcd.get_local(0);
    gcd.get_local(1);
    gcd.op(Opcode::Mod);
    gcd.op(Opcode::Call).u8(2);
    gcd.op(Opcode::Return);
    let gcd = gcd.finish("gcd", &["a", "b"]);

    let mut top = Asm::new();
    top.push_const(Value::Function(factorial));
    top.define_global("factorial");
    top.push_const(Value::Function(gcd));
    top.define_global("gcd");
    // RETURN always pops a value (§4.4); a module body with no trailing
    // expression returns `undefined`, matching a `def`-only module file.
    top.op(Opcode::PushUndefined);
    top.op(Opcode::Return);
    top.finish("<top-level>", &[])
}

struct FixedModuleCompiler;

impl ModuleCompiler for FixedModuleCompiler {
    fn compile(&self, _source: &str, path: &Path) -> Result<Rc<FunctionValue>, RuntimeError> {
        match path.file_stem().and_then(|s| s.to_str()) {
            Some("recursive_math") => Ok(recursive_math_top_level()),
            other => Err(RuntimeError::import_error(format!(
                "no stand-in module body for `{other:?}`"
            ))),
        }
    }
}

/// `import recursive_math.{factorial, gcd}` then `factorial(5) + gcd(12, 18)`
/// -> `120 + 6 == 126`.
#[test]
fn specific_import_then_call_factorial_and_gcd() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("recursive_math.slate"), "").unwrap();

    let mut main = Chunk::new();
    let path_idx = main.add_constant(Value::new_string("recursive_math"));
    let factorial_idx = main.add_constant(Value::new_string("factorial"));
    let gcd_idx = main.add_constant(Value::new_string("gcd"));

    main.emit_op(Opcode::PushConstant);
    main.emit_u16(path_idx);
    // specifier pairs, pushed (exported, local) per pair:
    main.emit_op(Opcode::PushConstant);
    main.emit_u16(factorial_idx);
    main.emit_op(Opcode::PushConstant);
    main.emit_u16(factorial_idx);
    main.emit_op(Opcode::PushConstant);
    main.emit_u16(gcd_idx);
    main.emit_op(Opcode::PushConstant);
    main.emit_u16(gcd_idx);
    main.emit_op(Opcode::ImportModule);
    main.emit_u8(2); // two specific specifiers

    let factorial_name = main.add_constant(Value::new_string("factorial"));
    let gcd_name = main.add_constant(Value::new_string("gcd"));
    let five = main.add_constant(Value::Int32(5));
    let twelve = main.add_constant(Value::Int32(12));
    let eighteen = main.add_constant(Value::Int32(18));

    main.emit_op(Opcode::GetGlobal);
    main.emit_u16(factorial_name);
    main.emit_op(Opcode::PushConstant);
    main.emit_u16(five);
    main.emit_op(Opcode::Call);
    main.emit_u8(1);

    main.emit_op(Opcode::GetGlobal);
    main.emit_u16(gcd_name);
    main.emit_op(Opcode::PushConstant);
    main.emit_u16(twelve);
    main.emit_op(Opcode::PushConstant);
    main.emit_u16(eighteen);
    main.emit_op(Opcode::Call);
    main.emit_u8(2);

    main.emit_op(Opcode::Add);
    main.emit_op(Opcode::Return);

    let main_fn = Rc::new(FunctionValue {
        name: "<top-level>".to_string(),
        chunk: main,
        param_names: vec![],
        captures: vec![],
    });

    let mut vm = Vm::new();
    // Drive the loader once up front with a real compiler (mirrors what a
    // host would do before handing compiled bytecode to the VM), then run
    // the importing program through the actual IMPORT_MODULE opcode; the
    // loader's cache means the second load below is a cache hit.
    vm.load_module_with("recursive_math", Some(dir.path()), &FixedModuleCompiler)
        .unwrap();

    // IMPORT_MODULE resolves relative to the *caller's* directory, which
    // for a top-level program with no owning module is `None` — so the
    // module must already be reachable via `SLATE_PATH`-independent
    // resolution. Since our test fixture only lives in a tempdir, load it
    // into the cache directly (above) and rely on the cache hit here.
    let result = vm.run_top_level(main_fn).unwrap();
    assert_eq!(result, Value::Int32(126));
}

/// The `Namespace` import form (`import recursive_math as m`) binds a
/// read-only object whose fields are the module's exports.
#[test]
fn namespace_import_binds_an_object_of_exports() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("recursive_math.slate"), "").unwrap();

    let mut vm = Vm::new();
    vm.load_module_with("recursive_math", Some(dir.path()), &FixedModuleCompiler)
        .unwrap();

    let mut main = Chunk::new();
    let path_idx = main.add_constant(Value::new_string("recursive_math"));
    main.emit_op(Opcode::PushConstant);
    main.emit_u16(path_idx);
    main.emit_op(Opcode::ImportModule);
    main.emit_u8(IMPORT_NAMESPACE);

    let m_name = main.add_constant(Value::new_string("recursive_math"));
    let factorial_name = main.add_constant(Value::new_string("factorial"));
    let three = main.add_constant(Value::Int32(3));

    main.emit_op(Opcode::GetGlobal);
    main.emit_u16(m_name);
    main.emit_op(Opcode::PushConstant);
    main.emit_u16(factorial_name);
    // GET_EXPORT takes no operand: it pops the name, then the namespace
    // object, both already on the stack in that order.
    main.emit_op(Opcode::GetExport);
    main.emit_op(Opcode::PushConstant);
    main.emit_u16(three);
    main.emit_op(Opcode::Call);
    main.emit_u8(1);
    main.emit_op(Opcode::Return);

    let main_fn = Rc::new(FunctionValue {
        name: "<top-level>".to_string(),
        chunk: main,
        param_names: vec![],
        captures: vec![],
    });

    let result = vm.run_top_level(main_fn).unwrap();
    assert_eq!(result, Value::Int32(6));
}
