// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::domain::constants::MAX_OUTPUT_SLOTS;
use crate::domain::error::MigrationError;
use crate::domain::instruction::{
    Instruction, Operation, OutputReference, ProtocolContext, Target,
};
use alloy::primitives::Address;
use serde::Serialize;

/// One entry in the output-slot arena.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutputSlot {
    /// Position of the instruction that fills this slot.
    pub producer: usize,
    pub operation: Operation,
    pub token: Address,
}

/// Where the borrowed funds go to settle the transient loan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Settlement {
    pub token: Address,
    pub target: Address,
}

/// Ordered, acyclic instruction sequence for one migration attempt.
///
/// A `Flow` has no mutating API; it is produced by [`FlowDraft::freeze`] and
/// handed to the orchestrator as-is.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Flow {
    instructions: Vec<Instruction>,
    slots: Vec<OutputSlot>,
    settlement: Option<Settlement>,
}

impl Flow {
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn slots(&self) -> &[OutputSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.instructions.iter().map(Instruction::operation).collect()
    }

    pub fn settlement(&self) -> Option<Settlement> {
        self.settlement
    }

    /// Slot referenced by `reference`, if it exists.
    pub fn slot(&self, reference: OutputReference) -> Option<&OutputSlot> {
        self.slots.get(reference.index())
    }

    /// True when a push of `token` to `target` is part of the flow.
    pub fn pushes_to(&self, token: Address, target: Address) -> bool {
        self.instructions.iter().any(|ix| {
            ix.operation() == Operation::PushToken
                && ix.token() == token
                && ix.target() == Some(&Target::Account(target))
        })
    }

    /// Every referenced slot was produced by a strictly earlier instruction.
    pub fn references_are_backward(&self) -> bool {
        self.instructions.iter().enumerate().all(|(position, ix)| {
            match ix.amount_source().reference() {
                None => true,
                Some(reference) => self
                    .slots
                    .get(reference.index())
                    .is_some_and(|slot| slot.producer < position),
            }
        })
    }
}

/// Growable arena used while assembling a flow.
///
/// Appending an instruction returns the typed references of the slots it
/// fills; slot numbering is never tracked by hand.
#[derive(Debug, Default)]
pub struct FlowDraft {
    instructions: Vec<Instruction>,
    slots: Vec<OutputSlot>,
    settlement: Option<Settlement>,
}

impl FlowDraft {
    pub fn new() -> Self {
        Self::default()
    }

    fn append(&mut self, instruction: Instruction) -> Result<Vec<OutputReference>, MigrationError> {
        if let Some(reference) = instruction.amount_source().reference() {
            let Some(slot) = self.slots.get(reference.index()) else {
                return Err(MigrationError::InvalidReference(format!(
                    "{} at step {} references missing slot {}",
                    instruction.operation(),
                    self.instructions.len(),
                    reference.index()
                )));
            };
            if slot.token != instruction.token() {
                return Err(MigrationError::InvalidReference(format!(
                    "{} of {} consumes slot {} holding {}",
                    instruction.operation(),
                    instruction.token(),
                    reference.index(),
                    slot.token
                )));
            }
        }

        let produced = instruction.operation().produced_slots();
        if self.slots.len() + produced > MAX_OUTPUT_SLOTS {
            return Err(MigrationError::InvalidReference(format!(
                "flow exceeds {MAX_OUTPUT_SLOTS} output slots"
            )));
        }

        let producer = self.instructions.len();
        let mut refs = Vec::with_capacity(produced);
        for i in 0..produced {
            let token = match (instruction.operation(), instruction.context()) {
                // Second swap slot is unspent input; first is the bought token.
                (Operation::SwapExactOut, ProtocolContext::SwapVenue { token_out, .. }) if i == 0 => {
                    *token_out
                }
                _ => instruction.token(),
            };
            refs.push(OutputReference::new(self.slots.len()));
            self.slots.push(OutputSlot {
                producer,
                operation: instruction.operation(),
                token,
            });
        }
        self.instructions.push(instruction);
        Ok(refs)
    }

    /// Append an instruction that fills exactly one slot and return its handle.
    pub fn produce(&mut self, instruction: Instruction) -> Result<OutputReference, MigrationError> {
        let operation = instruction.operation();
        if operation.produced_slots() != 1 {
            return Err(MigrationError::InvalidReference(format!(
                "{operation} does not produce a single output"
            )));
        }
        let refs = self.append(instruction)?;
        refs.first().copied().ok_or_else(|| {
            MigrationError::InvalidReference(format!("{operation} produced no output"))
        })
    }

    /// Append an instruction whose outputs (if any) nobody consumes.
    pub fn consume(&mut self, instruction: Instruction) -> Result<(), MigrationError> {
        self.append(instruction).map(|_| ())
    }

    /// Append a swap and return `(amount_out, unspent_input)`.
    pub fn swap(
        &mut self,
        instruction: Instruction,
    ) -> Result<(OutputReference, OutputReference), MigrationError> {
        if instruction.operation() != Operation::SwapExactOut {
            return Err(MigrationError::InvalidReference(format!(
                "{} is not a swap",
                instruction.operation()
            )));
        }
        let refs = self.append(instruction)?;
        match refs.as_slice() {
            [out, leftover] => Ok((*out, *leftover)),
            _ => Err(MigrationError::InvalidReference(
                "swap must produce two outputs".into(),
            )),
        }
    }

    pub fn settle_to(&mut self, token: Address, target: Address) {
        self.settlement = Some(Settlement { token, target });
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn freeze(self) -> Flow {
        Flow {
            instructions: self.instructions,
            slots: self.slots,
            settlement: self.settlement,
        }
    }
}
