//! Assemble-and-run front end for the virtual machine.
//!
//! # Usage
//! ```text
//! simplevm run <file ...>      assemble each source file and execute it
//! simplevm execute <file ...>  load each file as raw bytecode and execute it
//! ```
//!
//! Exit status is 0 only when every file completes cleanly; any I/O,
//! assembly or runtime failure stops processing and exits non-zero.
//!
//! # Environment
//! Setting `DEBUG` to a non-empty value prints a per-instruction trace to
//! stdout while programs run.

use simplevm::utils::log;
use simplevm::vm::assembler::assemble_file;
use simplevm::vm::cpu::Cpu;
use simplevm::vm::errors::VmError;
use std::env;
use std::process;

fn main() {
    log::init_from_env();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let status = match args[1].as_str() {
        "run" => run_files(&args[2..]),
        "execute" => execute_files(&args[2..]),
        other => {
            eprintln!("Unknown sub-command: {other}\n");
            print_usage(&args[0]);
            1
        }
    };
    process::exit(status);
}

/// Assembles and runs each source file in turn.
fn run_files(files: &[String]) -> i32 {
    if files.is_empty() {
        eprintln!("run: no input files");
        return 1;
    }
    for file in files {
        log::info(&format!("running {file}"));
        if let Err(err) = run_file(file) {
            log::error(&format!("{file}: {err}"));
            return 1;
        }
    }
    0
}

/// Loads and runs each raw bytecode file in turn.
fn execute_files(files: &[String]) -> i32 {
    if files.is_empty() {
        eprintln!("execute: no input files");
        return 1;
    }
    for file in files {
        log::info(&format!("executing {file}"));
        if let Err(err) = execute_file(file) {
            log::error(&format!("{file}: {err}"));
            return 1;
        }
    }
    0
}

fn run_file(path: &str) -> Result<(), VmError> {
    let image = assemble_file(path)?;
    let mut cpu = Cpu::new();
    cpu.load_bytes(&image)?;
    cpu.run()
}

fn execute_file(path: &str) -> Result<(), VmError> {
    let mut cpu = Cpu::new();
    cpu.load_file(path)?;
    cpu.run()
}

fn print_usage(program: &str) {
    eprintln!(
        "Usage: {program} <sub-command> <file ...>

Sub-commands:
  run <file ...>      Assemble each source file, then execute it.
  execute <file ...>  Load each file as raw bytecode, then execute it.

Environment:
  DEBUG               Set to any non-empty value for an instruction trace."
    );
}
