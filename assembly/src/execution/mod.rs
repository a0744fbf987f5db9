mod backend;
mod interpreter;
mod machine;

pub use backend::{Limits, StorageBackend};
pub use interpreter::{check_size, get_storage_bytes, Interpreter, StorageBytes};
pub use machine::{Evaluation, Machine};
