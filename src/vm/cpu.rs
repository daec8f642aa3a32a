//! Core interpreter.
//!
//! The [`Cpu`] owns sixteen typed registers, a single zero-flag, a fixed
//! 64 KiB RAM, and an integer stack shared by `call`/`ret` and
//! `push`/`pop`. A program image is copied to address 0 and interpreted
//! from there until an `EXIT` opcode executes or a trap fires; every trap
//! unwinds out of [`Cpu::run`] as a [`VmError`] so the machine can be
//! embedded without side effects on the host process.

use crate::utils::log;
use crate::vm::errors::VmError;
use crate::vm::isa::{Opcode, disassemble_at};
use rand::Rng;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::process::Command;

/// Bytes of RAM. The last addressable byte is `MEM_SIZE - 1`; an image of
/// `MEM_SIZE` bytes or more does not fit.
pub const MEM_SIZE: usize = 0xFFFF;

/// Number of general-purpose registers.
pub const REGISTER_COUNT: usize = 16;

/// Stack capacity; pushing past this traps rather than growing without
/// bound.
pub const STACK_LIMIT: usize = 4096;

/// Runtime value held by a register.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// Signed integer. The machine itself only writes values in
    /// `0..0xFFFF`, but program arithmetic may use the full width.
    Int(i64),
    /// Owned text.
    Str(String),
}

impl Value {
    /// Returns the kind name for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Str(_) => "string",
        }
    }
}

/// Register file with kind-checked accessors.
struct Registers {
    regs: Vec<Value>,
}

impl Registers {
    fn new() -> Self {
        Self {
            regs: vec![Value::Int(0); REGISTER_COUNT],
        }
    }

    fn reset(&mut self) {
        self.regs.fill(Value::Int(0));
    }

    /// Returns the value in register `idx` regardless of kind.
    fn get(&self, idx: u8) -> Result<&Value, VmError> {
        self.regs
            .get(idx as usize)
            .ok_or(VmError::InvalidRegisterIndex { index: idx })
    }

    /// Returns the integer in register `idx`, or a kind mismatch trap.
    fn get_int(&self, idx: u8, instr: &'static str) -> Result<i64, VmError> {
        match self.get(idx)? {
            Value::Int(v) => Ok(*v),
            other => Err(VmError::TypeMismatch {
                instruction: instr,
                register: idx,
                expected: "integer",
                found: other.kind_name(),
            }),
        }
    }

    /// Returns the string in register `idx`, or a kind mismatch trap.
    fn get_str(&self, idx: u8, instr: &'static str) -> Result<&str, VmError> {
        match self.get(idx)? {
            Value::Str(s) => Ok(s),
            other => Err(VmError::TypeMismatch {
                instruction: instr,
                register: idx,
                expected: "string",
                found: other.kind_name(),
            }),
        }
    }

    fn set(&mut self, idx: u8, value: Value) -> Result<(), VmError> {
        let slot = self
            .regs
            .get_mut(idx as usize)
            .ok_or(VmError::InvalidRegisterIndex { index: idx })?;
        *slot = value;
        Ok(())
    }
}

/// CPU flags; the machine has only the zero-flag.
#[derive(Default)]
struct Flags {
    z: bool,
}

/// Integer stack used for `call`/`ret` return addresses and user
/// `push`/`pop`. Last in, first out.
struct Stack {
    entries: Vec<i64>,
}

impl Stack {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn push(&mut self, value: i64) -> Result<(), VmError> {
        if self.entries.len() >= STACK_LIMIT {
            return Err(VmError::StackOverflow { limit: STACK_LIMIT });
        }
        self.entries.push(value);
        Ok(())
    }

    fn pop(&mut self, instr: &'static str) -> Result<i64, VmError> {
        self.entries
            .pop()
            .ok_or(VmError::StackUnderflow { instruction: instr })
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Decodes each opcode's operands from the instruction stream and invokes
/// its handler, passing the mnemonic along for trap messages.
macro_rules! exec_op {
    (
        cpu = $cpu:ident,
        op = $op:ident,
        { $( $variant:ident => $handler:ident ( $( $field:ident : $kind:ident ),* $(,)? ) ),* $(,)? }
    ) => {{
        match $op {
            $(
                Opcode::$variant => {
                    let instr = $op.mnemonic();
                    $( let $field = exec_op!(@read $cpu, $kind); )*
                    $cpu.$handler(instr, $( $field ),*)
                }
            ),*
        }
    }};

    // One register-index byte.
    (@read $cpu:ident, Reg) => {
        $cpu.fetch_byte()?
    };

    // Unsigned 16-bit immediate, little-endian.
    (@read $cpu:ident, Imm16) => {
        $cpu.fetch_u16()?
    };

    // 16-bit bytecode offset, little-endian.
    (@read $cpu:ident, Addr) => {
        $cpu.fetch_u16()? as usize
    };

    // Length-prefixed UTF-8 string.
    (@read $cpu:ident, Str) => {
        $cpu.fetch_string()?
    };
}

/// The virtual machine.
pub struct Cpu {
    /// RAM, exactly [`MEM_SIZE`] bytes; the program image is copied to
    /// offset 0.
    mem: Box<[u8]>,
    regs: Registers,
    flags: Flags,
    stack: Stack,
    /// Instruction pointer, always in `0..MEM_SIZE`.
    ip: usize,
    halted: bool,
    /// Program output sink; stdout unless replaced.
    out: Box<dyn Write>,
}

impl Cpu {
    /// Creates a machine writing program output to stdout.
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()))
    }

    /// Creates a machine writing program output to the given sink.
    pub fn with_output(out: Box<dyn Write>) -> Self {
        Self {
            mem: vec![0u8; MEM_SIZE].into_boxed_slice(),
            regs: Registers::new(),
            flags: Flags::default(),
            stack: Stack::new(),
            ip: 0,
            halted: false,
            out,
        }
    }

    /// Restores the machine to its power-on state: all registers integer 0,
    /// flags clear, stack empty, RAM zeroed, IP at 0.
    pub fn reset(&mut self) {
        self.mem.fill(0);
        self.regs.reset();
        self.flags.z = false;
        self.stack.clear();
        self.ip = 0;
        self.halted = false;
    }

    /// Resets the machine and copies an image to address 0.
    ///
    /// Images of [`MEM_SIZE`] bytes or more are rejected: the last
    /// addressable byte is `MEM_SIZE - 1`.
    pub fn load_bytes(&mut self, image: &[u8]) -> Result<(), VmError> {
        if image.len() >= MEM_SIZE {
            return Err(VmError::ProgramTooLarge { size: image.len() });
        }
        self.reset();
        self.mem[..image.len()].copy_from_slice(image);
        Ok(())
    }

    /// Resets the machine and loads a raw image file.
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), VmError> {
        let path = path.as_ref();
        let image = fs::read(path).map_err(|source| VmError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.load_bytes(&image)
    }

    /// Interprets from the current IP until `EXIT` executes or a trap
    /// fires. Unused RAM is zero-filled and byte 0x00 is `EXIT`, so a
    /// program that runs off its own end halts on the next fetch.
    pub fn run(&mut self) -> Result<(), VmError> {
        self.halted = false;
        while !self.halted {
            if log::debug_enabled() {
                self.trace();
            }
            let offset = self.ip;
            let byte = self.mem[offset];
            self.ip += 1;
            let opcode = Opcode::try_from(byte).map_err(|_| VmError::UnknownOpcode {
                opcode: byte,
                offset,
            })?;
            self.exec(opcode)?;
            // The IP wraps at the memory boundary before the next fetch.
            if self.ip >= MEM_SIZE {
                self.ip = 0;
            }
        }
        Ok(())
    }

    /// Prints the instruction about to execute to stdout.
    fn trace(&mut self) {
        match disassemble_at(&self.mem, self.ip) {
            Ok((text, _)) => {
                let _ = writeln!(self.out, "{:04X}\t{}", self.ip, text);
            }
            Err(_) => {
                let _ = writeln!(self.out, "{:04X}\t.byte 0x{:02X}", self.ip, self.mem[self.ip]);
            }
        }
    }

    // ---- operand fetching ----

    /// Reads one operand byte at IP and advances past it.
    fn fetch_byte(&mut self) -> Result<u8, VmError> {
        let byte = *self.mem.get(self.ip).ok_or(VmError::TruncatedOperand {
            offset: self.ip,
            wanted: 1,
        })?;
        self.ip += 1;
        Ok(byte)
    }

    /// Reads a little-endian u16 operand and advances past it.
    fn fetch_u16(&mut self) -> Result<u16, VmError> {
        let lo = self.fetch_byte()?;
        let hi = self.fetch_byte()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    /// Reads a length-prefixed UTF-8 string operand and advances past it.
    fn fetch_string(&mut self) -> Result<String, VmError> {
        let len = self.fetch_u16()? as usize;
        let start = self.ip;
        let bytes = self
            .mem
            .get(start..start + len)
            .ok_or(VmError::TruncatedOperand {
                offset: start,
                wanted: len,
            })?;
        let text = std::str::from_utf8(bytes)
            .map_err(|_| VmError::InvalidUtf8 { offset: start })?
            .to_string();
        self.ip = start + len;
        Ok(text)
    }

    /// Decodes the remaining operands of `opcode` and runs its handler.
    fn exec(&mut self, opcode: Opcode) -> Result<(), VmError> {
        exec_op! {
            cpu = self,
            op = opcode,
            {
                Exit => op_exit(),
                IntStore => op_int_store(reg: Reg, value: Imm16),
                IntPrint => op_int_print(reg: Reg),
                IntToString => op_int_to_string(reg: Reg),
                IntRandom => op_int_random(reg: Reg),
                Jump => op_jump(addr: Addr),
                JumpZ => op_jump_z(addr: Addr),
                JumpNz => op_jump_nz(addr: Addr),
                Xor => op_xor(dst: Reg, a: Reg, b: Reg),
                Add => op_add(dst: Reg, a: Reg, b: Reg),
                Sub => op_sub(dst: Reg, a: Reg, b: Reg),
                Mul => op_mul(dst: Reg, a: Reg, b: Reg),
                Div => op_div(dst: Reg, a: Reg, b: Reg),
                Inc => op_inc(reg: Reg),
                Dec => op_dec(reg: Reg),
                And => op_and(dst: Reg, a: Reg, b: Reg),
                Or => op_or(dst: Reg, a: Reg, b: Reg),
                StoreString => op_store_string(reg: Reg, text: Str),
                PrintString => op_print_string(reg: Reg),
                StringConcat => op_string_concat(dst: Reg, a: Reg, b: Reg),
                System => op_system(reg: Reg),
                StringToInt => op_string_to_int(reg: Reg),
                CmpReg => op_cmp_reg(a: Reg, b: Reg),
                CmpImm => op_cmp_imm(reg: Reg, value: Imm16),
                CmpStr => op_cmp_str(reg: Reg, text: Str),
                IsString => op_is_string(reg: Reg),
                IsInt => op_is_int(reg: Reg),
                Nop => op_nop(),
                Store => op_store(a: Reg, b: Reg),
                Peek => op_peek(dst: Reg, addr: Reg),
                Poke => op_poke(src: Reg, addr: Reg),
                Memcpy => op_memcpy(dst: Reg, src: Reg, len: Reg),
                Push => op_push(reg: Reg),
                Pop => op_pop(reg: Reg),
                Ret => op_ret(),
                Call => op_call(addr: Addr),
            }
        }
    }

    // ---- handlers ----

    fn op_exit(&mut self, _instr: &'static str) -> Result<(), VmError> {
        self.halted = true;
        Ok(())
    }

    fn op_nop(&mut self, _instr: &'static str) -> Result<(), VmError> {
        Ok(())
    }

    fn op_int_store(&mut self, _instr: &'static str, reg: u8, value: u16) -> Result<(), VmError> {
        self.regs.set(reg, Value::Int(value as i64))
    }

    /// Prints as two hex digits below 256, four otherwise.
    fn op_int_print(&mut self, instr: &'static str, reg: u8) -> Result<(), VmError> {
        let value = self.regs.get_int(reg, instr)?;
        let written = if (0..256).contains(&value) {
            write!(self.out, "{value:02X}")
        } else {
            write!(self.out, "{value:04X}")
        };
        written.map_err(VmError::OutputFailed)?;
        self.out.flush().map_err(VmError::OutputFailed)
    }

    fn op_int_to_string(&mut self, instr: &'static str, reg: u8) -> Result<(), VmError> {
        let value = self.regs.get_int(reg, instr)?;
        self.regs.set(reg, Value::Str(value.to_string()))
    }

    fn op_int_random(&mut self, _instr: &'static str, reg: u8) -> Result<(), VmError> {
        let value = rand::rng().random_range(0..0xFFFF);
        self.regs.set(reg, Value::Int(value))
    }

    fn op_jump(&mut self, _instr: &'static str, addr: usize) -> Result<(), VmError> {
        self.ip = addr;
        Ok(())
    }

    fn op_jump_z(&mut self, _instr: &'static str, addr: usize) -> Result<(), VmError> {
        if self.flags.z {
            self.ip = addr;
        }
        Ok(())
    }

    fn op_jump_nz(&mut self, _instr: &'static str, addr: usize) -> Result<(), VmError> {
        if !self.flags.z {
            self.ip = addr;
        }
        Ok(())
    }

    fn op_add(&mut self, instr: &'static str, dst: u8, a: u8, b: u8) -> Result<(), VmError> {
        let va = self.regs.get_int(a, instr)?;
        let vb = self.regs.get_int(b, instr)?;
        self.regs.set(dst, Value::Int(va.wrapping_add(vb)))
    }

    /// Subtracts and sets the zero-flag on any result that is zero or
    /// negative, which is what the conditional jumps test after a
    /// count-down loop.
    fn op_sub(&mut self, instr: &'static str, dst: u8, a: u8, b: u8) -> Result<(), VmError> {
        let va = self.regs.get_int(a, instr)?;
        let vb = self.regs.get_int(b, instr)?;
        let result = va.wrapping_sub(vb);
        self.flags.z = result <= 0;
        self.regs.set(dst, Value::Int(result))
    }

    fn op_mul(&mut self, instr: &'static str, dst: u8, a: u8, b: u8) -> Result<(), VmError> {
        let va = self.regs.get_int(a, instr)?;
        let vb = self.regs.get_int(b, instr)?;
        self.regs.set(dst, Value::Int(va.wrapping_mul(vb)))
    }

    fn op_div(&mut self, instr: &'static str, dst: u8, a: u8, b: u8) -> Result<(), VmError> {
        let va = self.regs.get_int(a, instr)?;
        let vb = self.regs.get_int(b, instr)?;
        if vb == 0 {
            return Err(VmError::DivisionByZero);
        }
        self.regs.set(dst, Value::Int(va.wrapping_div(vb)))
    }

    fn op_inc(&mut self, instr: &'static str, reg: u8) -> Result<(), VmError> {
        let value = self.regs.get_int(reg, instr)?;
        self.regs.set(reg, Value::Int(value.wrapping_add(1)))
    }

    fn op_dec(&mut self, instr: &'static str, reg: u8) -> Result<(), VmError> {
        let value = self.regs.get_int(reg, instr)?;
        self.regs.set(reg, Value::Int(value.wrapping_sub(1)))
    }

    fn op_and(&mut self, instr: &'static str, dst: u8, a: u8, b: u8) -> Result<(), VmError> {
        let va = self.regs.get_int(a, instr)?;
        let vb = self.regs.get_int(b, instr)?;
        self.regs.set(dst, Value::Int(va & vb))
    }

    fn op_or(&mut self, instr: &'static str, dst: u8, a: u8, b: u8) -> Result<(), VmError> {
        let va = self.regs.get_int(a, instr)?;
        let vb = self.regs.get_int(b, instr)?;
        self.regs.set(dst, Value::Int(va | vb))
    }

    fn op_xor(&mut self, instr: &'static str, dst: u8, a: u8, b: u8) -> Result<(), VmError> {
        let va = self.regs.get_int(a, instr)?;
        let vb = self.regs.get_int(b, instr)?;
        self.regs.set(dst, Value::Int(va ^ vb))
    }

    fn op_store_string(&mut self, _instr: &'static str, reg: u8, text: String) -> Result<(), VmError> {
        self.regs.set(reg, Value::Str(text))
    }

    fn op_print_string(&mut self, instr: &'static str, reg: u8) -> Result<(), VmError> {
        let text = self.regs.get_str(reg, instr)?.to_string();
        write!(self.out, "{text}").map_err(VmError::OutputFailed)?;
        self.out.flush().map_err(VmError::OutputFailed)
    }

    fn op_string_concat(&mut self, instr: &'static str, dst: u8, a: u8, b: u8) -> Result<(), VmError> {
        let mut text = self.regs.get_str(a, instr)?.to_string();
        text.push_str(self.regs.get_str(b, instr)?);
        self.regs.set(dst, Value::Str(text))
    }

    /// Runs the register's text as a command, then copies the child's
    /// stdout to our stdout and its stderr to our stderr. Blocks until the
    /// child exits.
    fn op_system(&mut self, instr: &'static str, reg: u8) -> Result<(), VmError> {
        let command_line = self.regs.get_str(reg, instr)?.to_string();
        let argv = split_command(&command_line);
        let Some((program, args)) = argv.split_first() else {
            return Err(VmError::EmptyCommand);
        };

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| VmError::CommandFailed {
                command: program.clone(),
                source,
            })?;

        self.out
            .write_all(&output.stdout)
            .and_then(|_| self.out.flush())
            .map_err(VmError::OutputFailed)?;
        io::stderr()
            .write_all(&output.stderr)
            .map_err(VmError::OutputFailed)
    }

    fn op_string_to_int(&mut self, instr: &'static str, reg: u8) -> Result<(), VmError> {
        let text = self.regs.get_str(reg, instr)?;
        let value = text
            .parse::<i64>()
            .map_err(|_| VmError::IntConversion {
                value: text.to_string(),
            })?;
        self.regs.set(reg, Value::Int(value))
    }

    /// Register equality respecting kinds: values of different kinds are
    /// never equal.
    fn op_cmp_reg(&mut self, _instr: &'static str, a: u8, b: u8) -> Result<(), VmError> {
        let va = self.regs.get(a)?;
        let vb = self.regs.get(b)?;
        self.flags.z = va == vb;
        Ok(())
    }

    fn op_cmp_imm(&mut self, _instr: &'static str, reg: u8, value: u16) -> Result<(), VmError> {
        self.flags.z = matches!(self.regs.get(reg)?, Value::Int(v) if *v == value as i64);
        Ok(())
    }

    fn op_cmp_str(&mut self, _instr: &'static str, reg: u8, text: String) -> Result<(), VmError> {
        self.flags.z = matches!(self.regs.get(reg)?, Value::Str(s) if *s == text);
        Ok(())
    }

    fn op_is_string(&mut self, _instr: &'static str, reg: u8) -> Result<(), VmError> {
        self.flags.z = matches!(self.regs.get(reg)?, Value::Str(_));
        Ok(())
    }

    fn op_is_int(&mut self, _instr: &'static str, reg: u8) -> Result<(), VmError> {
        self.flags.z = matches!(self.regs.get(reg)?, Value::Int(_));
        Ok(())
    }

    /// Register copy. The first operand byte names the register being
    /// read, the second the register being written; the order is part of
    /// the bytecode format and is kept for image compatibility.
    fn op_store(&mut self, _instr: &'static str, a: u8, b: u8) -> Result<(), VmError> {
        let value = self.regs.get(a)?.clone();
        self.regs.set(b, value)
    }

    fn op_peek(&mut self, instr: &'static str, dst: u8, addr: u8) -> Result<(), VmError> {
        let index = self.mem_index(self.regs.get_int(addr, instr)?);
        let byte = self.mem[index];
        self.regs.set(dst, Value::Int(byte as i64))
    }

    fn op_poke(&mut self, instr: &'static str, src: u8, addr: u8) -> Result<(), VmError> {
        let value = self.regs.get_int(src, instr)?;
        let index = self.mem_index(self.regs.get_int(addr, instr)?);
        self.mem[index] = value as u8;
        Ok(())
    }

    /// Byte-by-byte copy; both addresses wrap at the memory boundary
    /// mid-copy.
    fn op_memcpy(&mut self, instr: &'static str, dst: u8, src: u8, len: u8) -> Result<(), VmError> {
        let dst_base = self.regs.get_int(dst, instr)?;
        let src_base = self.regs.get_int(src, instr)?;
        let count = self.regs.get_int(len, instr)?.max(0);
        for i in 0..count {
            let from = self.mem_index(src_base.wrapping_add(i));
            let to = self.mem_index(dst_base.wrapping_add(i));
            self.mem[to] = self.mem[from];
        }
        Ok(())
    }

    fn op_push(&mut self, instr: &'static str, reg: u8) -> Result<(), VmError> {
        let value = self.regs.get_int(reg, instr)?;
        self.stack.push(value)
    }

    fn op_pop(&mut self, instr: &'static str, reg: u8) -> Result<(), VmError> {
        let value = self.stack.pop(instr)?;
        self.regs.set(reg, Value::Int(value))
    }

    fn op_ret(&mut self, instr: &'static str) -> Result<(), VmError> {
        let addr = self.stack.pop(instr)?;
        self.ip = self.mem_index(addr);
        Ok(())
    }

    /// Pushes the address of the instruction after the operand, then
    /// jumps.
    fn op_call(&mut self, _instr: &'static str, addr: usize) -> Result<(), VmError> {
        self.stack.push(self.ip as i64)?;
        self.ip = addr;
        Ok(())
    }

    /// Reduces an arbitrary integer to a RAM index, wrapping at the
    /// boundary the same way `memcpy` does mid-copy.
    fn mem_index(&self, addr: i64) -> usize {
        addr.rem_euclid(MEM_SIZE as i64) as usize
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits a command line into tokens: runs of non-whitespace, with
/// double-quoted spans keeping their spaces. The quotes themselves are
/// stripped.
fn split_command(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in input.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}
