//! Errors produced during assembly or execution.

use thiserror::Error;

/// Everything that can go wrong while assembling a source program, loading
/// an image, or running it.
///
/// There is no recoverable/unrecoverable split visible to a running
/// program: any runtime variant reaching [`Cpu::run`](crate::vm::cpu::Cpu::run)
/// ends execution.
#[derive(Debug, Error)]
pub enum VmError {
    // ---- decoding / runtime traps ----
    /// A byte that is not in the opcode table reached the dispatcher.
    #[error("unknown opcode 0x{opcode:02X} at offset 0x{offset:04X}")]
    UnknownOpcode { opcode: u8, offset: usize },
    /// An operand ran past the end of the image or of RAM.
    #[error("truncated operand at offset 0x{offset:04X} (wanted {wanted} byte(s))")]
    TruncatedOperand { offset: usize, wanted: usize },
    /// A register index outside `0..16` reached the register file.
    #[error("register index {index} out of range")]
    InvalidRegisterIndex { index: u8 },
    /// A register was read as the wrong kind.
    #[error("{instruction}: register #{register} holds a {found}, expected a {expected}")]
    TypeMismatch {
        instruction: &'static str,
        register: u8,
        expected: &'static str,
        found: &'static str,
    },
    /// Integer division with a zero divisor.
    #[error("division by zero")]
    DivisionByZero,
    /// `pop` or `ret` on an empty stack.
    #[error("{instruction}: stack underflow")]
    StackUnderflow { instruction: &'static str },
    /// The stack grew past its fixed capacity.
    #[error("stack overflow (limit {limit} entries)")]
    StackOverflow { limit: usize },
    /// `string2int` on text that is not a decimal integer.
    #[error("cannot convert {value:?} to an integer")]
    IntConversion { value: String },
    /// A string operand in the image is not valid UTF-8.
    #[error("invalid UTF-8 in string at offset 0x{offset:04X}")]
    InvalidUtf8 { offset: usize },
    /// `system` with a command that contains no tokens.
    #[error("system: empty command")]
    EmptyCommand,
    /// `system` could not start the named executable.
    #[error("system: failed to run {command:?}: {source}")]
    CommandFailed {
        command: String,
        source: std::io::Error,
    },
    /// Program output could not be written.
    #[error("failed to write program output: {0}")]
    OutputFailed(std::io::Error),

    // ---- assembly-time failures ----
    /// An operand token was not what the mnemonic required.
    #[error("{mnemonic}: unexpected token {found:?}")]
    UnexpectedToken {
        mnemonic: &'static str,
        found: String,
    },
    /// A token that no mnemonic or label rule accepts.
    #[error("unhandled token {literal:?}")]
    UnhandledToken { literal: String },
    /// A register operand without the `#` sigil.
    #[error("expected a register, got {0:?}")]
    ExpectedRegister(String),
    /// A register operand that does not name one of `#0`..`#15`.
    #[error("invalid register {token:?}")]
    InvalidRegister { token: String },
    /// An integer literal that fits neither decimal nor `0x…` hex u16.
    #[error("invalid integer literal {token:?}")]
    InvalidIntegerLiteral { token: String },
    /// A `DB` literal that does not fit in one byte.
    #[error("DB value {token:?} does not fit in a byte")]
    ByteOutOfRange { token: String },
    /// A string operand longer than a 16-bit length can describe.
    #[error("string literal of {len} bytes exceeds the 16-bit length prefix")]
    StringTooLong { len: usize },
    /// A label was defined twice; the first definition wins.
    #[error("duplicate label {label:?}")]
    DuplicateLabel { label: String },
    /// Backpatching found a reference to a label never defined.
    #[error("use of undefined label {label:?}")]
    UndefinedLabel { label: String },
    /// A label sits past what a 16-bit address operand can reach.
    #[error("label {label:?} at offset 0x{offset:X} is out of address range")]
    LabelOutOfRange { label: String, offset: usize },

    // ---- host errors ----
    /// The image does not fit in RAM.
    #[error("program of {size} bytes does not fit in memory")]
    ProgramTooLarge { size: usize },
    /// Reading a source or image file failed.
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}
