//! GateVM assembly: the program encoding, its builder, and the stack machine
//! that evaluates programs against remote chain storage while recording the
//! proofs the result depends on.

pub mod error;
pub mod execution;
pub mod need;
pub mod opcodes;
pub mod program;
pub mod reader;
pub mod stats;
pub mod storage;
pub mod test_utils;
pub mod util;
pub mod value;

pub use error::{InterpreterError, Result};
pub use execution::{
    check_size, get_storage_bytes, Evaluation, Interpreter, Limits, Machine, StorageBackend,
    StorageBytes,
};
pub use need::{HashedNeed, Need, TargetNeed};
pub use opcodes::{ExitCode, LoopFlags, Opcode, PUSH_MAX};
pub use program::{LoopOptions, Program, ProgramError, Request};
pub use reader::ProgramReader;
pub use stats::OpcodeStats;
pub use util::init_logger;
pub use value::Value;
