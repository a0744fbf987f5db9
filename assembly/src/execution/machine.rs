use ahash::HashMap;
use alloy_primitives::{Address, Bytes, U256};
use futures::try_join;

use crate::{
    error::{InterpreterError, Result},
    need::{HashedNeed, Need, TargetNeed},
    opcodes::ExitCode,
    stats::OpcodeStats,
    value::{number_from_bytes, resolve_all, uint_from_bytes, Value},
};

/// Registers and stack of one evaluation.
///
/// Nested loop iterations run on their own `Machine` while sharing the
/// [`Context`] of the evaluation that spawned them.
#[derive(Debug, Clone)]
pub struct Machine {
    pub target: Address,
    pub slot: U256,
    pub stack: Vec<Value>,
    pub exit_code: ExitCode,
    max_stack: usize,
}

impl Machine {
    pub fn new(max_stack: usize) -> Self {
        Self {
            target: Address::ZERO,
            slot: U256::ZERO,
            stack: Vec::new(),
            exit_code: ExitCode::Success,
            max_stack,
        }
    }

    pub(crate) fn child(&self, arg: Value) -> Self {
        Self {
            target: self.target,
            slot: self.slot,
            stack: vec![arg],
            exit_code: ExitCode::Success,
            max_stack: self.max_stack,
        }
    }

    pub fn push(&mut self, value: Value) -> Result<()> {
        if self.stack.len() >= self.max_stack {
            return Err(InterpreterError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Value> {
        self.stack.pop().ok_or(InterpreterError::StackUnderflow)
    }

    /// Pops the top `n` values, deepest first.
    pub fn pop_slice(&mut self, n: usize) -> Result<Vec<Value>> {
        if self.stack.len() < n {
            return Err(InterpreterError::StackUnderflow);
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    pub fn check_stack_index(&self, i: usize) -> Result<usize> {
        if i >= self.stack.len() {
            return Err(InterpreterError::StackOverflow);
        }
        Ok(i)
    }

    /// Index of the value `back` positions below the top.
    pub fn check_back(&self, back: usize) -> Result<usize> {
        match self.stack.len().checked_sub(back + 1) {
            Some(i) => Ok(i),
            None => Err(InterpreterError::StackUnderflow),
        }
    }

    pub(crate) async fn pop_bytes(&mut self) -> Result<Bytes> {
        self.pop()?.resolve().await
    }

    pub(crate) async fn pop_number(&mut self) -> Result<usize> {
        number_from_bytes(&self.pop_bytes().await?)
    }

    pub(crate) async fn pop_uint(&mut self) -> Result<U256> {
        Ok(uint_from_bytes(&self.pop_bytes().await?))
    }

    /// Pops `[a, b]` where `b` was on top.
    pub(crate) async fn pop_uint_pair(&mut self) -> Result<(U256, U256)> {
        let v = self.pop_slice(2)?;
        let (a, b) = try_join!(v[0].resolve(), v[1].resolve())?;
        Ok((uint_from_bytes(&a), uint_from_bytes(&b)))
    }
}

#[derive(Debug, Clone)]
enum NeedEntry {
    Target(usize),
    Slot(U256),
    Hashed(HashedNeed),
}

/// State shared by every machine of one evaluation: outputs, the ordered
/// needs and the distinct targets.
#[derive(Debug)]
pub(crate) struct Context {
    pub(crate) outputs: Vec<Value>,
    needs: Vec<NeedEntry>,
    targets: Vec<TargetNeed>,
    target_ids: HashMap<Address, usize>,
    pub(crate) stats: OpcodeStats,
}

impl Context {
    pub(crate) fn new(output_count: usize) -> Self {
        Self {
            outputs: vec![Value::Resolved(Bytes::new()); output_count],
            needs: Vec::new(),
            targets: Vec::new(),
            target_ids: HashMap::default(),
            stats: OpcodeStats::default(),
        }
    }

    pub(crate) fn check_output_index(&self, i: usize) -> Result<usize> {
        if i >= self.outputs.len() {
            return Err(InterpreterError::InvalidOutputIndex(i));
        }
        Ok(i)
    }

    /// Records a target need, reusing the one already registered for the
    /// same address.
    pub(crate) fn add_target(&mut self, target: Address, max_targets: usize) -> Result<()> {
        let id = match self.target_ids.get(&target) {
            Some(id) => *id,
            None => {
                if self.targets.len() >= max_targets {
                    return Err(InterpreterError::TooManyTargets(max_targets));
                }
                let id = self.targets.len();
                self.targets.push(TargetNeed {
                    target,
                    required: false,
                });
                self.target_ids.insert(target, id);
                id
            }
        };
        self.needs.push(NeedEntry::Target(id));
        Ok(())
    }

    pub(crate) fn require_target(&mut self, target: Address) {
        if let Some(id) = self.target_ids.get(&target) {
            self.targets[*id].required = true;
        }
    }

    pub(crate) fn add_slots(&mut self, slots: impl IntoIterator<Item = U256>) {
        self.needs.extend(slots.into_iter().map(NeedEntry::Slot));
    }

    pub(crate) fn add_hashed(&mut self, need: HashedNeed) {
        self.needs.push(NeedEntry::Hashed(need));
    }

    pub(crate) fn needs_len(&self) -> usize {
        self.needs.len()
    }

    pub(crate) fn targets_len(&self) -> usize {
        self.targets.len()
    }

    /// Needs in program order, with the final `required` flag of each target.
    pub(crate) fn needs(&self) -> Vec<Need> {
        self.needs
            .iter()
            .map(|need| match need {
                NeedEntry::Target(id) => Need::Target(self.targets[*id]),
                NeedEntry::Slot(slot) => Need::Slot(*slot),
                NeedEntry::Hashed(need) => Need::Hashed(need.clone()),
            })
            .collect()
    }
}

/// Final state of a top-level evaluation.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub exit_code: ExitCode,
    pub outputs: Vec<Value>,
    pub needs: Vec<Need>,
    pub target: Address,
    pub slot: U256,
    pub stack: Vec<Value>,
    pub stats: OpcodeStats,
}

impl Evaluation {
    pub(crate) fn new(vm: Machine, ctx: Context) -> Self {
        Self {
            exit_code: vm.exit_code,
            needs: ctx.needs(),
            outputs: ctx.outputs,
            target: vm.target,
            slot: vm.slot,
            stack: vm.stack,
            stats: ctx.stats,
        }
    }

    pub async fn resolve_outputs(&self) -> Result<Vec<Bytes>> {
        resolve_all(&self.outputs).await
    }

    pub async fn resolve_stack(&self) -> Result<Vec<Bytes>> {
        resolve_all(&self.stack).await
    }
}
