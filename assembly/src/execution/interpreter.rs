use std::sync::Arc;

use alloy_primitives::{keccak256, Address, Bytes, U256};
use futures::{
    future::{try_join_all, BoxFuture},
    try_join, FutureExt,
};
use tracing::{debug, instrument};

use super::{
    backend::{Limits, StorageBackend},
    machine::{Context, Evaluation, Machine},
};
use crate::{
    error::{InterpreterError, Result},
    need::HashedNeed,
    opcodes::{ExitCode, LoopFlags, Opcode, PUSH_MAX},
    program::{Program, Request},
    reader::ProgramReader,
    storage::{slot_range, solidity_array_slots, solidity_follow_slot, BytesHeader},
    value::{address_from_bytes, is_zeros, number_from_bytes, resolve_all, Value},
};

/// A `bytes`/`string` field read from storage.
#[derive(Debug, Clone)]
pub struct StorageBytes {
    /// Deferred when the field spans data slots.
    pub value: Value,
    pub size: usize,
    /// Data slots the value was assembled from, header excluded.
    pub slots: Vec<U256>,
}

/// Checks a requested byte count against `limit`.
pub fn check_size(size: U256, limit: usize) -> Result<usize> {
    if size > U256::from(limit) {
        return Err(InterpreterError::TooManyBytes { size, limit });
    }
    Ok(size.to::<usize>())
}

/// Reads every slot of `target` and concatenates the words.
async fn read_words<B>(
    backend: Arc<B>,
    target: Address,
    slots: Vec<U256>,
    fast: bool,
) -> Result<Vec<u8>>
where
    B: StorageBackend + ?Sized,
{
    let words = try_join_all(
        slots
            .iter()
            .map(|slot| backend.get_storage(target, *slot, fast)),
    )
    .await?;
    Ok(words.iter().flat_map(|word| word.0).collect())
}

/// Reads a `bytes`/`string` field using the Solidity storage encoding.
///
/// Long values are returned deferred: the data slots are only read once the
/// value is resolved.
pub async fn get_storage_bytes<B>(
    backend: &Arc<B>,
    target: Address,
    slot: U256,
    fast: bool,
) -> Result<StorageBytes>
where
    B: StorageBackend + ?Sized + 'static,
{
    let header = backend.get_storage(target, slot, fast).await?;
    match BytesHeader::decode(&header) {
        BytesHeader::Short(size) => {
            if size > 32 {
                return Err(InterpreterError::InvalidStorageEncoding { target, slot });
            }
            Ok(StorageBytes {
                value: Value::Resolved(Bytes::copy_from_slice(&header[..size])),
                size,
                slots: Vec::new(),
            })
        }
        BytesHeader::Long(size) => {
            let limits = backend.limits();
            let limit = if fast {
                limits.max_supplied_bytes
            } else {
                limits.max_provable_bytes
            };
            let size = check_size(size, limit)?;
            if size < 32 {
                return Err(InterpreterError::InvalidStorageEncoding { target, slot });
            }
            let slots = solidity_array_slots(slot, (size + 31) >> 5);
            let value = Value::deferred(
                Some(size),
                read_words(backend.clone(), target, slots.clone(), fast).map(move |words| {
                    let mut words = words?;
                    words.truncate(size);
                    Ok(Bytes::from(words))
                }),
            );
            Ok(StorageBytes { value, size, slots })
        }
    }
}

/// Bytes the target hands out for `slot` without a storage proof.
async fn read_supplied<B>(backend: Arc<B>, target: Address, slot: U256) -> Result<Bytes>
where
    B: StorageBackend + ?Sized + 'static,
{
    let limit = backend.limits().max_supplied_bytes;
    if let Some(value) = backend.read_supplied_bytes(target, slot).await? {
        check_size(U256::from(value.len()), limit)?;
        return Ok(value);
    }
    get_storage_bytes(&backend, target, slot, true)
        .await?
        .value
        .resolve()
        .await
}

/// Executes programs against a [`StorageBackend`].
///
/// The interpreter is stateless between evaluations; every call builds a
/// fresh [`Machine`].
pub struct Interpreter<B: ?Sized> {
    backend: Arc<B>,
}

impl<B: ?Sized> Clone for Interpreter<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
        }
    }
}

impl<B> Interpreter<B>
where
    B: StorageBackend + ?Sized + 'static,
{
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    fn limits(&self) -> &Limits {
        self.backend.limits()
    }

    pub async fn eval_request(&self, request: &Request) -> Result<Evaluation> {
        self.eval_encoded_request(request.encode()).await
    }

    /// Evaluates an encoded request: an output-count byte followed by the
    /// program.
    #[instrument(level = "debug", skip_all, fields(len = ops.len()))]
    pub async fn eval_encoded_request(&self, ops: Bytes) -> Result<Evaluation> {
        let mut reader = ProgramReader::new(ops);
        let output_count = reader.read_byte()? as usize;
        self.run(reader, Context::new(output_count)).await
    }

    /// Evaluates a bare program, with no outputs.
    pub async fn eval_program(&self, program: &Program) -> Result<Evaluation> {
        self.run(ProgramReader::from_program(program), Context::new(0))
            .await
    }

    async fn run(&self, mut reader: ProgramReader, mut ctx: Context) -> Result<Evaluation> {
        let mut vm = Machine::new(self.limits().max_stack_size);
        self.eval(&mut reader, &mut vm, &mut ctx, 0).await?;
        ctx.stats.log();
        debug!(
            exit_code = ?vm.exit_code,
            needs = ctx.needs_len(),
            targets = ctx.targets_len(),
            "evaluated"
        );
        Ok(Evaluation::new(vm, ctx))
    }

    /// Runs `reader` to completion or until an exit code is set.
    fn eval<'a>(
        &'a self,
        reader: &'a mut ProgramReader,
        vm: &'a mut Machine,
        ctx: &'a mut Context,
        depth: usize,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            if depth > self.limits().max_eval_depth {
                return Err(InterpreterError::MaxEvalDepth(depth));
            }
            while reader.has_remaining() {
                if !self.step(reader, vm, ctx, depth).await? {
                    break;
                }
            }
            Ok(())
        }
        .boxed()
    }

    /// Executes one instruction. Returns `false` once the machine halted with
    /// a non-success exit code.
    async fn step(
        &self,
        reader: &mut ProgramReader,
        vm: &mut Machine,
        ctx: &mut Context,
        depth: usize,
    ) -> Result<bool> {
        let limits = self.limits();
        let op = reader.read_byte()?;
        if op <= PUSH_MAX {
            ctx.stats.record_literal();
            vm.push(Value::padded(&reader.read_bytes(op as usize)?))?;
            return Ok(true);
        }
        let opcode = Opcode::try_from(op).map_err(|_| InterpreterError::UnknownOpcode(op))?;
        ctx.stats.record(opcode);
        match opcode {
            Opcode::PushBytes => {
                let n = check_size(U256::from(reader.read_number()?), limits.max_assemble_bytes)?;
                vm.push(Value::Resolved(reader.read_bytes(n)?))?;
            }
            Opcode::PushStack => {
                let i = vm.pop_number().await?;
                let i = vm.check_stack_index(i)?;
                let value = vm.stack[i].clone();
                vm.push(value)?;
            }
            Opcode::PushOutput => {
                let i = ctx.check_output_index(vm.pop_number().await?)?;
                vm.push(ctx.outputs[i].clone())?;
            }
            Opcode::PushSlot => vm.push(Value::word(vm.slot))?,
            Opcode::PushTarget => vm.push(Value::address(vm.target))?,
            Opcode::PushStackSize => vm.push(Value::word(U256::from(vm.stack.len())))?,
            Opcode::Target => {
                vm.target = address_from_bytes(&vm.pop_bytes().await?);
                vm.slot = U256::ZERO;
                ctx.add_target(vm.target, limits.max_unique_targets)?;
            }
            Opcode::SetOutput => {
                let i = ctx.check_output_index(vm.pop_number().await?)?;
                ctx.outputs[i] = vm.pop()?;
            }
            Opcode::EvalLoop => {
                let flags = LoopFlags(reader.read_byte()?);
                self.eval_loop(vm, ctx, flags, depth).await?;
            }
            Opcode::EvalInline => {
                let mut program = ProgramReader::new(vm.pop_bytes().await?);
                self.eval(&mut program, vm, ctx, depth + 1).await?;
                if !vm.exit_code.is_success() {
                    return Ok(false);
                }
            }
            Opcode::ReqContract => {
                ctx.require_target(vm.target);
                if !self.backend.is_contract(vm.target).await? {
                    vm.exit_code = ExitCode::NotAContract;
                    return Ok(false);
                }
            }
            Opcode::ReqNonzero => {
                let i = vm.check_back(0)?;
                if is_zeros(&vm.stack[i].resolve().await?) {
                    vm.exit_code = ExitCode::IsZero;
                    return Ok(false);
                }
            }
            Opcode::ReadSlot => {
                ctx.add_slots([vm.slot]);
                let value = self.read_slots(vm.target, vec![vm.slot]);
                vm.push(value)?;
            }
            Opcode::ReadSlots => {
                let count = vm.pop_number().await?;
                check_size(U256::from(count) << 5, limits.max_provable_bytes)?;
                let slots = slot_range(vm.slot, count);
                ctx.add_slots(slots.iter().copied());
                let value = self.read_slots(vm.target, slots);
                vm.push(value)?;
            }
            Opcode::ReadBytes => {
                let StorageBytes { value, slots, .. } =
                    get_storage_bytes(&self.backend, vm.target, vm.slot, false).await?;
                ctx.add_slots([vm.slot]);
                ctx.add_slots(slots);
                vm.push(value)?;
            }
            Opcode::ReadArray => {
                let step = vm.pop_number().await?;
                let value = self.read_array(vm, ctx, step).await?;
                vm.push(value)?;
            }
            Opcode::ReadHashedBytes => {
                let hash = vm.pop()?;
                let backend = self.backend.clone();
                let value = Value::deferred(None, read_supplied(backend, vm.target, vm.slot));
                ctx.add_hashed(HashedNeed {
                    hash,
                    value: value.clone(),
                });
                vm.push(value)?;
            }
            Opcode::Slot => vm.slot = vm.pop_uint().await?,
            Opcode::SlotAdd => {
                let x = vm.pop_uint().await?;
                vm.slot = vm.slot.wrapping_add(x);
            }
            Opcode::SlotFollow => {
                let key = vm.pop_bytes().await?;
                vm.slot = solidity_follow_slot(vm.slot, &key);
            }
            Opcode::Dup => {
                let back = vm.pop_number().await?;
                let i = vm.check_back(back)?;
                let value = vm.stack[i].clone();
                vm.push(value)?;
            }
            Opcode::Pop => {
                vm.pop()?;
            }
            Opcode::Swap => {
                let back = vm.pop_number().await?;
                let i = vm.check_back(back)?;
                let last = vm.stack.len() - 1;
                vm.stack.swap(i, last);
            }
            Opcode::Keccak => {
                let v = vm.pop_bytes().await?;
                vm.push(Value::Resolved(Bytes::from(keccak256(&v).0)))?;
            }
            Opcode::Concat => {
                let args = vm.pop_slice(2)?;
                let (a, b) = try_join!(args[0].resolve(), args[1].resolve())?;
                check_size(U256::from(a.len() + b.len()), limits.max_assemble_bytes)?;
                vm.push(Value::Resolved([&a[..], &b[..]].concat().into()))?;
            }
            Opcode::Slice => {
                let args = vm.pop_slice(3)?;
                let (v, x, n) =
                    try_join!(args[0].resolve(), args[1].resolve(), args[2].resolve())?;
                let pos = number_from_bytes(&x)?;
                let size = check_size(
                    U256::from(number_from_bytes(&n)?),
                    limits.max_assemble_bytes,
                )?;
                let mut out = vec![0u8; size];
                if pos < v.len() {
                    let end = (pos + size).min(v.len());
                    out[..end - pos].copy_from_slice(&v[pos..end]);
                }
                vm.push(Value::Resolved(out.into()))?;
            }
            Opcode::Length => {
                let size = vm.pop()?.size().await?;
                vm.push(Value::word(U256::from(size)))?;
            }
            Opcode::Plus => {
                let (a, b) = vm.pop_uint_pair().await?;
                vm.push(Value::word(a.wrapping_add(b)))?;
            }
            Opcode::Times => {
                let (a, b) = vm.pop_uint_pair().await?;
                vm.push(Value::word(a.wrapping_mul(b)))?;
            }
            Opcode::Divide => {
                let (a, b) = vm.pop_uint_pair().await?;
                let x = a.checked_div(b).ok_or(InterpreterError::DivisionByZero)?;
                vm.push(Value::word(x))?;
            }
            Opcode::Mod => {
                let (a, b) = vm.pop_uint_pair().await?;
                let x = a.checked_rem(b).ok_or(InterpreterError::DivisionByZero)?;
                vm.push(Value::word(x))?;
            }
            Opcode::And => {
                let (a, b) = vm.pop_uint_pair().await?;
                vm.push(Value::word(a & b))?;
            }
            Opcode::Or => {
                let (a, b) = vm.pop_uint_pair().await?;
                vm.push(Value::word(a | b))?;
            }
            Opcode::Xor => {
                let (a, b) = vm.pop_uint_pair().await?;
                vm.push(Value::word(a ^ b))?;
            }
            Opcode::ShiftLeft => {
                let (a, b) = vm.pop_uint_pair().await?;
                vm.push(Value::word(shift(a, b, |a, n| a << n)))?;
            }
            Opcode::ShiftRight => {
                let (a, b) = vm.pop_uint_pair().await?;
                vm.push(Value::word(shift(a, b, |a, n| a >> n)))?;
            }
            Opcode::Not => {
                let x = vm.pop_uint().await?;
                vm.push(Value::word(!x))?;
            }
            Opcode::IsZero => {
                let v = vm.pop_bytes().await?;
                vm.push(Value::bool(is_zeros(&v)))?;
            }
            Opcode::Eq => {
                let (a, b) = vm.pop_uint_pair().await?;
                vm.push(Value::bool(a == b))?;
            }
            Opcode::Lt => {
                let (a, b) = vm.pop_uint_pair().await?;
                vm.push(Value::bool(a < b))?;
            }
            Opcode::Gt => {
                let (a, b) = vm.pop_uint_pair().await?;
                vm.push(Value::bool(a > b))?;
            }
            Opcode::Debug => {
                let label = reader.read_small_str()?;
                let stack = resolve_all(&vm.stack).await?;
                let outputs = resolve_all(&ctx.outputs).await?;
                debug!(
                    label = %label,
                    target = %vm.target,
                    slot = %vm.slot,
                    exit_code = ?vm.exit_code,
                    ?stack,
                    ?outputs,
                    needs = ctx.needs_len(),
                    "DEBUG"
                );
            }
        }
        Ok(true)
    }

    fn read_slots(&self, target: Address, slots: Vec<U256>) -> Value {
        if slots.is_empty() {
            return Value::Resolved(Bytes::new());
        }
        let size = slots.len() << 5;
        Value::deferred(
            Some(size),
            read_words(self.backend.clone(), target, slots, false)
                .map(|words| words.map(Bytes::from)),
        )
    }

    /// Reads a dynamic array: the length header followed by the element slots.
    async fn read_array(&self, vm: &Machine, ctx: &mut Context, step: usize) -> Result<Value> {
        if step == 0 {
            return Err(InterpreterError::InvalidElementSize);
        }
        let limit = self.limits().max_provable_bytes;
        let header = self.backend.get_storage(vm.target, vm.slot, false).await?;
        let length = U256::from(check_size(U256::from_be_bytes(header.0), limit)?);
        let slot_count = if step < 32 {
            let per_slot = U256::from(32 / step);
            (length + per_slot - U256::from(1)) / per_slot
        } else {
            length * U256::from((step + 31) >> 5)
        };
        let size = check_size(slot_count << 5, limit)?;

        let mut slots = Vec::with_capacity((size >> 5) + 1);
        slots.push(vm.slot);
        slots.extend(solidity_array_slots(vm.slot, size >> 5));
        ctx.add_slots(slots.iter().copied());
        Ok(self.read_slots(vm.target, slots))
    }

    async fn eval_loop(
        &self,
        vm: &mut Machine,
        ctx: &mut Context,
        flags: LoopFlags,
        depth: usize,
    ) -> Result<()> {
        let args = vm.pop_slice(2)?;
        let (code, n) = try_join!(args[0].resolve(), args[1].resolve())?;
        let mut program = ProgramReader::new(code);
        let mut count = number_from_bytes(&n)?.min(vm.stack.len());
        while count > 0 {
            count -= 1;
            let arg = vm.pop()?;
            let mut child = vm.child(arg);
            program.reset();
            self.eval(&mut program, &mut child, ctx, depth + 1).await?;
            if flags.stops_on(child.exit_code) {
                if !flags.contains(LoopFlags::KEEP_ARGS) {
                    vm.pop_slice(count)?;
                }
                if flags.contains(LoopFlags::ACQUIRE_STATE) {
                    vm.target = child.target;
                    vm.slot = child.slot;
                    for value in child.stack {
                        vm.push(value)?;
                    }
                }
                break;
            }
        }
        Ok(())
    }
}

fn shift(a: U256, b: U256, f: impl FnOnce(U256, usize) -> U256) -> U256 {
    if b >= U256::from(256) {
        U256::ZERO
    } else {
        f(a, b.to::<usize>())
    }
}
