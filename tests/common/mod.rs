//! Hand-assembled bytecode helper shared by the integration tests.
//!
//! There is no lexer/parser/codegen in this crate (`src/lib.rs`'s module
//! doc), so every end-to-end scenario below builds its `Chunk`s directly
//! through this tiny assembler instead of compiling source text.

use std::rc::Rc;

use slate::bytecode::{Chunk, Opcode};
use slate::value::function::{CaptureSpec, FunctionValue};
use slate::Value;

pub struct Asm {
    chunk: Chunk,
}

impl Asm {
    pub fn new() -> Self {
        Self { chunk: Chunk::new() }
    }

    pub fn konst(&mut self, value: Value) -> u16 {
        self.chunk.add_constant(value)
    }

    pub fn op(&mut self, op: Opcode) -> &mut Self {
        self.chunk.emit_op(op);
        self
    }

    pub fn u8(&mut self, byte: u8) -> &mut Self {
        self.chunk.emit_u8(byte);
        self
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.chunk.emit_u16(value);
        self
    }

    pub fn push_const(&mut self, value: Value) -> &mut Self {
        let idx = self.konst(value);
        self.op(Opcode::PushConstant).u16(idx)
    }

    pub fn get_local(&mut self, slot: u8) -> &mut Self {
        self.op(Opcode::GetLocal).u8(slot)
    }

    pub fn set_local(&mut self, slot: u8) -> &mut Self {
        self.op(Opcode::SetLocal).u8(slot)
    }

    pub fn get_global(&mut self, name: &str) -> &mut Self {
        let idx = self.konst(Value::new_string(name));
        self.op(Opcode::GetGlobal).u16(idx)
    }

    pub fn define_global(&mut self, name: &str) -> &mut Self {
        let idx = self.konst(Value::new_string(name));
        self.op(Opcode::DefineGlobal).u16(idx)
    }

    /// Emits a forward jump with a placeholder operand; returns the operand
    /// offset to hand to `patch_jump` once the target address is known.
    pub fn jump_fwd(&mut self, op: Opcode) -> usize {
        self.chunk.emit_op(op);
        let operand_at = self.chunk.code.len();
        self.chunk.emit_u16(0);
        operand_at
    }

    pub fn patch_jump(&mut self, operand_at: usize) {
        let after = operand_at + 2;
        let target = self.chunk.code.len();
        self.chunk.patch_u16(operand_at, (target - after) as u16);
    }

    pub fn here(&self) -> usize {
        self.chunk.code.len()
    }

    pub fn loop_back(&mut self, to: usize) {
        self.chunk.emit_op(Opcode::Loop);
        let operand_at = self.chunk.code.len();
        self.chunk.emit_u16(0);
        let after = self.chunk.code.len();
        self.chunk.patch_u16(operand_at, (after - to) as u16);
    }

    pub fn finish(self, name: &str, param_names: &[&str]) -> Rc<FunctionValue> {
        Rc::new(FunctionValue {
            name: name.to_string(),
            chunk: self.chunk,
            param_names: param_names.iter().map(|s| s.to_string()).collect(),
            captures: Vec::new(),
        })
    }

    pub fn finish_with_captures(
        self,
        name: &str,
        param_names: &[&str],
        captures: &[&str],
    ) -> Rc<FunctionValue> {
        Rc::new(FunctionValue {
            name: name.to_string(),
            chunk: self.chunk,
            param_names: param_names.iter().map(|s| s.to_string()).collect(),
            captures: captures
                .iter()
                .map(|c| CaptureSpec { name: c.to_string() })
                .collect(),
        })
    }
}

impl Default for Asm {
    fn default() -> Self {
        Self::new()
    }
}
