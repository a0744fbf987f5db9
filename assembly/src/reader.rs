use alloy_primitives::Bytes;

use crate::{
    error::{InterpreterError, Result},
    opcodes::PUSH_MAX,
    program::{Program, Request},
    value::number_from_bytes,
};

/// Cursor over an encoded program.
#[derive(Debug, Clone)]
pub struct ProgramReader {
    ops: Bytes,
    pos: usize,
}

impl ProgramReader {
    pub fn new(ops: Bytes) -> Self {
        Self { ops, pos: 0 }
    }

    pub fn from_program(program: &Program) -> Self {
        Self::new(program.encode())
    }

    /// Reader over a request, positioned on its output-count byte.
    pub fn from_request(request: &Request) -> Self {
        Self::new(request.encode())
    }

    pub const fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.ops.len() - self.pos
    }

    pub fn has_remaining(&self) -> bool {
        self.pos < self.ops.len()
    }

    /// Rewinds to the first byte so the same body can run again.
    pub fn reset(&mut self) {
        self.pos = 0;
    }

    fn check_read(&self, n: usize) -> Result<()> {
        if n > self.remaining() {
            return Err(InterpreterError::ReaderOverflow {
                pos: self.pos,
                wanted: n,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        self.check_read(1)?;
        let b = self.ops[self.pos];
        self.pos += 1;
        Ok(b)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Bytes> {
        self.check_read(n)?;
        let v = self.ops.slice(self.pos..self.pos + n);
        self.pos += n;
        Ok(v)
    }

    /// Reads an inline literal (width byte followed by big-endian bytes) as a
    /// small number.
    pub fn read_number(&mut self) -> Result<usize> {
        let width = self.read_byte()?;
        if width > PUSH_MAX {
            return Err(InterpreterError::InvalidNumberWidth(width));
        }
        number_from_bytes(&self.read_bytes(width as usize)?)
    }

    pub fn read_small_str(&mut self) -> Result<String> {
        let n = self.read_byte()? as usize;
        Ok(String::from_utf8_lossy(&self.read_bytes(n)?).into_owned())
    }
}
