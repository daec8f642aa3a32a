//! Opcode table and bytecode decoding.
//!
//! The [`for_each_opcode!`](crate::for_each_opcode) macro holds the
//! canonical opcode list (byte value, display mnemonic, operand shape) and
//! invokes a callback macro for code generation, so the encoder, the
//! interpreter and the disassembler all derive from one table and cannot
//! drift apart.
//!
//! This module generates:
//! - The [`Opcode`] enum with its byte values
//! - `TryFrom<u8>` for decoding
//! - [`Opcode::mnemonic`] and [`Opcode::operands`]
//!
//! # Bytecode format
//!
//! A program image is a flat byte sequence starting at offset 0 with no
//! header. Each instruction is a 1-byte opcode followed by its operands:
//! - Register operand: 1 byte (index 0-15)
//! - Immediate: 2 bytes (u16, little-endian)
//! - Address: 2 bytes (bytecode offset, little-endian)
//! - String: 2-byte little-endian length, then that many bytes of UTF-8

use crate::vm::errors::VmError;

/// Invokes a callback macro with the complete opcode definition list.
///
/// Keeping the list in one place lets multiple modules generate
/// opcode-driven code without duplicating the table.
#[macro_export]
macro_rules! for_each_opcode {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Integer operations
            // =========================
            /// EXIT ; halt the machine
            Exit = 0x00, "EXIT" => [],
            /// INT_STORE reg, imm16 ; R[reg] = imm
            IntStore = 0x01, "INT_STORE" => [reg: Reg, value: Imm16],
            /// INT_PRINT reg ; print R[reg] in hex
            IntPrint = 0x02, "INT_PRINT" => [reg: Reg],
            /// INT_TOSTRING reg ; R[reg] = decimal string of R[reg]
            IntToString = 0x03, "INT_TOSTRING" => [reg: Reg],
            /// INT_RANDOM reg ; R[reg] = uniform value in [0, 0xFFFF)
            IntRandom = 0x04, "INT_RANDOM" => [reg: Reg],
            // =========================
            // Control flow
            // =========================
            /// JUMP addr16 ; IP = addr
            Jump = 0x10, "JUMP" => [addr: Addr],
            /// JUMP_Z addr16 ; if Z, IP = addr
            JumpZ = 0x11, "JUMP_Z" => [addr: Addr],
            /// JUMP_NZ addr16 ; if not Z, IP = addr
            JumpNz = 0x12, "JUMP_NZ" => [addr: Addr],
            /// XOR dst, a, b ; R[dst] = R[a] ^ R[b]
            Xor = 0x13, "XOR" => [dst: Reg, a: Reg, b: Reg],
            // =========================
            // Integer arithmetic
            // =========================
            /// ADD dst, a, b ; R[dst] = R[a] + R[b]
            Add = 0x21, "ADD" => [dst: Reg, a: Reg, b: Reg],
            /// SUB dst, a, b ; R[dst] = R[a] - R[b], Z set on result <= 0
            Sub = 0x22, "SUB" => [dst: Reg, a: Reg, b: Reg],
            /// MUL dst, a, b ; R[dst] = R[a] * R[b]
            Mul = 0x23, "MUL" => [dst: Reg, a: Reg, b: Reg],
            /// DIV dst, a, b ; R[dst] = R[a] / R[b], trap on zero divisor
            Div = 0x24, "DIV" => [dst: Reg, a: Reg, b: Reg],
            /// INC reg ; R[reg] += 1
            Inc = 0x25, "INC" => [reg: Reg],
            /// DEC reg ; R[reg] -= 1
            Dec = 0x26, "DEC" => [reg: Reg],
            /// AND dst, a, b ; R[dst] = R[a] & R[b]
            And = 0x27, "AND" => [dst: Reg, a: Reg, b: Reg],
            /// OR dst, a, b ; R[dst] = R[a] | R[b]
            Or = 0x28, "OR" => [dst: Reg, a: Reg, b: Reg],
            // =========================
            // String operations
            // =========================
            /// STORE_STRING reg, len16, bytes ; R[reg] = text
            StoreString = 0x30, "STORE_STRING" => [reg: Reg, text: Str],
            /// PRINT_STRING reg ; print R[reg] as text
            PrintString = 0x31, "PRINT_STRING" => [reg: Reg],
            /// STRING_CONCAT dst, a, b ; R[dst] = R[a] followed by R[b]
            StringConcat = 0x32, "STRING_CONCAT" => [dst: Reg, a: Reg, b: Reg],
            /// SYSTEM reg ; run R[reg] as a shell-style command
            System = 0x33, "SYSTEM" => [reg: Reg],
            /// STRING_TOINT reg ; parse R[reg] as decimal, trap on failure
            StringToInt = 0x34, "STRING_TOINT" => [reg: Reg],
            // =========================
            // Comparisons and kind tests
            // =========================
            /// CMP_REG a, b ; Z = (R[a] equals R[b], kinds included)
            CmpReg = 0x40, "CMP_REG" => [a: Reg, b: Reg],
            /// CMP_IMM reg, imm16 ; Z = (R[reg] is the given integer)
            CmpImm = 0x41, "CMP_IMM" => [reg: Reg, value: Imm16],
            /// CMP_STR reg, len16, bytes ; Z = (R[reg] is the given string)
            CmpStr = 0x42, "CMP_STR" => [reg: Reg, text: Str],
            /// IS_STRING reg ; Z = (R[reg] holds a string)
            IsString = 0x43, "IS_STRING" => [reg: Reg],
            /// IS_INT reg ; Z = (R[reg] holds an integer)
            IsInt = 0x44, "IS_INT" => [reg: Reg],
            // =========================
            // Register moves
            // =========================
            /// NOP ; no effect
            Nop = 0x50, "NOP" => [],
            /// STORE a, b ; R[b] = R[a] (first operand is the source)
            Store = 0x51, "STORE" => [a: Reg, b: Reg],
            // =========================
            // Memory access
            // =========================
            /// PEEK dst, addr ; R[dst] = byte at address R[addr]
            Peek = 0x60, "PEEK" => [dst: Reg, addr: Reg],
            /// POKE src, addr ; byte at address R[addr] = low byte of R[src]
            Poke = 0x61, "POKE" => [src: Reg, addr: Reg],
            /// MEMCPY dst, src, len ; copy R[len] bytes, wrapping mod 0xFFFF
            Memcpy = 0x62, "MEMCPY" => [dst: Reg, src: Reg, len: Reg],
            // =========================
            // Stack and calls
            // =========================
            /// PUSH reg ; push the integer R[reg]
            Push = 0x70, "PUSH" => [reg: Reg],
            /// POP reg ; pop into R[reg], trap when empty
            Pop = 0x71, "POP" => [reg: Reg],
            /// RET ; pop the return address into IP, trap when empty
            Ret = 0x72, "RET" => [],
            /// CALL addr16 ; push the address after the operand, IP = addr
            Call = 0x73, "CALL" => [addr: Addr],
        }
    };
}

/// Shape of a single operand in the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// One byte holding a register index.
    Reg,
    /// Two bytes, little-endian, an unsigned 16-bit immediate.
    Imm16,
    /// Two bytes, little-endian, a bytecode offset.
    Addr,
    /// Two-byte little-endian length followed by that many bytes.
    Str,
}

macro_rules! define_opcodes {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $byte:expr, $mnemonic:literal => [
                $( $field:ident : $kind:ident ),* $(,)?
            ]
        ),* $(,)?
    ) => {
        /// One opcode of the instruction set.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Opcode {
            $(
                $(#[$doc])*
                $name = $byte,
            )*
        }

        impl TryFrom<u8> for Opcode {
            type Error = VmError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $byte => Ok(Opcode::$name), )*
                    _ => Err(VmError::UnknownOpcode {
                        opcode: value,
                        offset: 0,
                    }),
                }
            }
        }

        impl Opcode {
            /// Returns the display mnemonic for this opcode.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Opcode::$name => $mnemonic, )*
                }
            }

            /// Returns the operand shape of this opcode, in stream order.
            pub const fn operands(&self) -> &'static [OperandKind] {
                match self {
                    $( Opcode::$name => &[ $( OperandKind::$kind ),* ], )*
                }
            }
        }
    };
}

for_each_opcode!(define_opcodes);

/// Reads a little-endian u16 at `offset`, or reports truncation.
fn read_u16(image: &[u8], offset: usize) -> Result<u16, VmError> {
    match image.get(offset..offset + 2) {
        Some(bytes) => Ok(u16::from_le_bytes([bytes[0], bytes[1]])),
        None => Err(VmError::TruncatedOperand {
            offset,
            wanted: 2,
        }),
    }
}

/// Decodes the instruction at `offset`, returning its textual form and its
/// total encoded length (opcode byte included).
///
/// Used by the `DEBUG` execution trace and by round-trip tests; raw data
/// emitted via `DB`/`DATA` decodes as whatever instruction its bytes spell,
/// like any other disassembler.
pub fn disassemble_at(image: &[u8], offset: usize) -> Result<(String, usize), VmError> {
    let byte = *image.get(offset).ok_or(VmError::TruncatedOperand {
        offset,
        wanted: 1,
    })?;
    let opcode = Opcode::try_from(byte).map_err(|_| VmError::UnknownOpcode {
        opcode: byte,
        offset,
    })?;

    let mut text = opcode.mnemonic().to_string();
    let mut pos = offset + 1;
    for (i, kind) in opcode.operands().iter().enumerate() {
        text.push_str(if i == 0 { " " } else { ", " });
        match kind {
            OperandKind::Reg => {
                let reg = *image.get(pos).ok_or(VmError::TruncatedOperand {
                    offset: pos,
                    wanted: 1,
                })?;
                text.push('#');
                text.push_str(&reg.to_string());
                pos += 1;
            }
            OperandKind::Imm16 | OperandKind::Addr => {
                let value = read_u16(image, pos)?;
                text.push_str(&format!("0x{value:04X}"));
                pos += 2;
            }
            OperandKind::Str => {
                let len = read_u16(image, pos)? as usize;
                pos += 2;
                let bytes = image.get(pos..pos + len).ok_or(VmError::TruncatedOperand {
                    offset: pos,
                    wanted: len,
                })?;
                let body: String = String::from_utf8_lossy(bytes)
                    .chars()
                    .flat_map(char::escape_default)
                    .collect();
                text.push('"');
                text.push_str(&body);
                text.push('"');
                pos += len;
            }
        }
    }
    Ok((text, pos - offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_from_known_bytes() {
        assert_eq!(Opcode::try_from(0x00).unwrap(), Opcode::Exit);
        assert_eq!(Opcode::try_from(0x22).unwrap(), Opcode::Sub);
        assert_eq!(Opcode::try_from(0x73).unwrap(), Opcode::Call);
    }

    #[test]
    fn try_from_unknown_byte() {
        assert!(matches!(
            Opcode::try_from(0xEE),
            Err(VmError::UnknownOpcode { opcode: 0xEE, .. })
        ));
    }

    #[test]
    fn mnemonics() {
        assert_eq!(Opcode::IntStore.mnemonic(), "INT_STORE");
        assert_eq!(Opcode::Store.mnemonic(), "STORE");
        assert_eq!(Opcode::Ret.mnemonic(), "RET");
    }

    #[test]
    fn operand_shapes() {
        assert_eq!(Opcode::Exit.operands(), &[]);
        assert_eq!(
            Opcode::IntStore.operands(),
            &[OperandKind::Reg, OperandKind::Imm16]
        );
        assert_eq!(
            Opcode::StoreString.operands(),
            &[OperandKind::Reg, OperandKind::Str]
        );
        assert_eq!(
            Opcode::Memcpy.operands(),
            &[OperandKind::Reg, OperandKind::Reg, OperandKind::Reg]
        );
    }

    #[test]
    fn disassemble_int_store() {
        let image = [0x01, 3, 0x2A, 0x00];
        let (text, len) = disassemble_at(&image, 0).unwrap();
        assert_eq!(text, "INT_STORE #3, 0x002A");
        assert_eq!(len, 4);
    }

    #[test]
    fn disassemble_string_store() {
        let image = [0x30, 1, 0x02, 0x00, b'h', b'i'];
        let (text, len) = disassemble_at(&image, 0).unwrap();
        assert_eq!(text, "STORE_STRING #1, \"hi\"");
        assert_eq!(len, 6);
    }

    #[test]
    fn round_trip_of_an_assembled_program() {
        let image = crate::vm::assembler::assemble_source(
            r#"store #1, 10 store #2, "hi" add #0, #1, #2 print_int #0 exit"#,
        )
        .unwrap();
        let mut offset = 0;
        let mut seen = Vec::new();
        while offset < image.len() {
            let (text, len) = disassemble_at(&image, offset).unwrap();
            seen.push(text);
            offset += len;
        }
        assert_eq!(
            seen,
            vec![
                "INT_STORE #1, 0x000A",
                "STORE_STRING #2, \"hi\"",
                "ADD #0, #1, #2",
                "INT_PRINT #0",
                "EXIT",
            ]
        );
    }

    #[test]
    fn disassemble_reports_truncation() {
        let image = [0x01, 3];
        assert!(matches!(
            disassemble_at(&image, 0),
            Err(VmError::TruncatedOperand { .. })
        ));
    }

    #[test]
    fn disassemble_reports_unknown_opcode_with_offset() {
        let image = [0x50, 0xEE];
        assert!(matches!(
            disassemble_at(&image, 1),
            Err(VmError::UnknownOpcode {
                opcode: 0xEE,
                offset: 1
            })
        ));
    }
}
