//! The MDM instruction set. Modeled as a tagged variant with a small
//! method table (`cost`, `memory`, `batchable`) rather than as trait
//! objects: the set is closed and small enough that a match arm per
//! instruction reads more plainly than dynamic dispatch.

use host_common::crypto::{Hash, PublicKey, Signature};

use crate::pricetable::{InstructionCost, PriceTable};

#[derive(Debug, Clone)]
pub enum Instruction {
    ReadSector {
        root: Hash,
        offset: u64,
        length: u64,
    },
    AppendSector {
        /// Offset/length of the sector bytes within the program data
        /// stream.
        data_offset: u64,
        data_length: u64,
    },
    DropSectors {
        n: u64,
    },
    HasSector {
        root: Hash,
    },
    ReadRegistry {
        public_key: PublicKey,
        tweak: Hash,
    },
    UpdateRegistry {
        public_key: PublicKey,
        tweak: Hash,
        revision: u64,
        expiry: u32,
        signature: Signature,
        data_offset: u64,
        data_length: u64,
    },
    RevisionMetadata,
    SwapSector {
        a: u64,
        b: u64,
    },
}

impl Instruction {
    /// Whether a run of consecutive instances of this kind may have
    /// their reads coalesced. The observable output (order, total
    /// cost) is unaffected either way; this
    /// implementation always executes instructions one at a time and
    /// uses this flag only to classify which ones *could* be
    /// coalesced by a future physical batching pass.
    pub fn batchable(&self) -> bool {
        matches!(
            self,
            Instruction::ReadSector { .. }
                | Instruction::HasSector { .. }
                | Instruction::ReadRegistry { .. }
                | Instruction::UpdateRegistry { .. }
                | Instruction::RevisionMetadata
        )
    }

    /// Whether this instruction can mutate sector roots. Programs
    /// declared read-only must never execute one of these.
    pub fn mutates_sectors(&self) -> bool {
        matches!(
            self,
            Instruction::AppendSector { .. } | Instruction::DropSectors { .. } | Instruction::SwapSector { .. }
        )
    }

    pub fn cost(&self, prices: &PriceTable) -> InstructionCost {
        match self {
            Instruction::ReadSector { length, .. } => add_byte_cost(prices.read_sector_cost, prices.read_byte_cost, *length),
            Instruction::AppendSector { .. } => prices.append_sector_cost,
            Instruction::DropSectors { .. } => prices.drop_sectors_cost,
            Instruction::HasSector { .. } => prices.has_sector_cost,
            Instruction::ReadRegistry { .. } => prices.read_registry_cost,
            Instruction::UpdateRegistry { data_length, .. } => {
                add_byte_cost(prices.update_registry_cost, prices.write_byte_cost, *data_length)
            }
            Instruction::RevisionMetadata => prices.revision_metadata_cost,
            Instruction::SwapSector { .. } => prices.swap_sector_cost,
        }
    }
}

fn add_byte_cost(base: InstructionCost, per_byte: u128, bytes: u64) -> InstructionCost {
    InstructionCost {
        execution_cost: base.execution_cost.saturating_add(per_byte.saturating_mul(bytes as u128)),
        store_cost: base.store_cost,
        memory_cost: base.memory_cost,
    }
}
