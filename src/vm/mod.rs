//! Register-based bytecode virtual machine and its assembler.
//!
//! Source programs pass through three stages sharing one byte format:
//!
//! - [`lexer`]: turns source text into a token stream, preserving literals
//! - [`assembler`]: resolves labels and emits the byte image
//! - [`cpu`]: loads an image and interprets it with bit-exact semantics
//!
//! # Architecture
//!
//! - **Registers**: 16 typed registers, each holding an integer or a string
//! - **Flags**: a single zero-flag driven by `sub`, comparisons and kind tests
//! - **Memory**: 64 KiB of byte-addressed RAM, image loaded at offset 0
//! - **Stack**: one integer stack shared by `call`/`ret` and `push`/`pop`
//!
//! The byte encoding lives in [`isa`]; the assembler's encoder, the CPU's
//! decoder and the disassembler are all generated from its single opcode
//! table.

pub mod assembler;
pub mod cpu;
pub mod errors;
pub mod isa;
pub mod lexer;
pub mod token;
