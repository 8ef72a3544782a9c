//! Program execution engine. A program executes speculatively against
//! a frozen snapshot of sector roots; any instruction error aborts the whole thing with no
//! observable state change. A write program's result is only applied
//! to the storage obligation after the caller supplies a matching
//! signed revision (the two-phase exchange).

use std::sync::Arc;

use host_common::crypto::Hash;

use crate::collaborators::SectorStorage;
use crate::config::{SECTOR_SIZE, SEGMENT_SIZE};
use crate::error::{HostError, ProgramError};
use crate::merkle::{self, MerkleProof};
use crate::mdm::datastream::ProgramDataStream;
use crate::mdm::instruction::Instruction;
use crate::pricetable::PriceTable;
use crate::registry::{EntryType, Registry, RegistryEntry, UpdateOutcome};

/// Frozen inputs a program executes against.
#[derive(Debug, Clone)]
pub struct ObligationSnapshot {
    pub sector_roots: Vec<Hash>,
}

pub struct InstructionResult {
    pub output: Vec<u8>,
    pub proof: Option<MerkleProof>,
}

pub struct ProgramOutcome {
    pub results: Vec<InstructionResult>,
    pub new_size: u64,
    pub new_merkle_root: Hash,
    pub new_sector_roots: Vec<Hash>,
    pub added_sectors: Vec<(Hash, Vec<u8>)>,
    pub removed_sectors: Vec<Hash>,
    pub spent_budget: u128,
    pub spent_collateral: u128,
}

/// What the caller must supply to commit a write program: a revision
/// whose declared new size/root must match the program's computed
/// result exactly.
pub struct SignedRevision {
    pub new_file_size: u64,
    pub new_file_merkle_root: Hash,
    pub collateral: u128,
}

pub fn verify_commit(outcome: &ProgramOutcome, revision: &SignedRevision) -> Result<(), HostError> {
    if revision.new_file_size != outcome.new_size || revision.new_file_merkle_root != outcome.new_merkle_root {
        return Err(HostError::Program(ProgramError::RevisionMismatch));
    }
    if revision.collateral < outcome.spent_collateral {
        return Err(HostError::Program(ProgramError::InsufficientCollateral {
            needed: outcome.spent_collateral,
            remaining: revision.collateral,
        }));
    }
    Ok(())
}

pub struct Program {
    instructions: Vec<Instruction>,
    data: Arc<ProgramDataStream>,
    sectors: Arc<dyn SectorStorage>,
    registry: Arc<Registry>,
    prices: PriceTable,
    read_only: bool,
    current_revision_number: u64,
    max_memory: u64,
}

impl Program {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instructions: Vec<Instruction>,
        data: Arc<ProgramDataStream>,
        sectors: Arc<dyn SectorStorage>,
        registry: Arc<Registry>,
        prices: PriceTable,
        read_only: bool,
        current_revision_number: u64,
        max_memory: u64,
    ) -> Self {
        Self {
            instructions,
            data,
            sectors,
            registry,
            prices,
            read_only,
            current_revision_number,
            max_memory,
        }
    }

    /// Execute every instruction in order against `snapshot`. Aborts
    /// (returning `Err`) at the first instruction error; the caller
    /// must discard `self` and never apply any partial result.
    pub async fn execute(&self, snapshot: ObligationSnapshot, budget: u128, collateral: u128) -> Result<ProgramOutcome, HostError> {
        let mut remaining_budget = budget;
        let mut remaining_collateral = collateral;
        let mut used_memory: u64 = 0;

        let mut sector_roots = snapshot.sector_roots;
        let mut size = sector_roots.len() as u64 * SECTOR_SIZE;
        let mut merkle_root = merkle::root(&sector_roots);

        let mut results = Vec::with_capacity(self.instructions.len());
        let mut added_sectors = Vec::new();
        let mut removed_sectors = Vec::new();
        let mut spent_budget: u128 = 0;
        let mut spent_collateral: u128 = 0;

        for instr in &self.instructions {
            if self.read_only && instr.mutates_sectors() {
                return Err(HostError::Program(ProgramError::ReadOnlyViolation));
            }

            let cost = instr.cost(&self.prices);
            let charge = cost.total();
            remaining_budget = remaining_budget.checked_sub(charge).ok_or(HostError::Program(ProgramError::InsufficientBudget {
                needed: charge,
                remaining: remaining_budget,
            }))?;
            spent_budget += charge;

            let footprint = instruction_memory_footprint(instr);
            used_memory = used_memory.checked_add(footprint).ok_or(HostError::Program(ProgramError::MemoryExceeded {
                needed: footprint,
                remaining: self.max_memory.saturating_sub(used_memory),
            }))?;
            if used_memory > self.max_memory {
                return Err(HostError::Program(ProgramError::MemoryExceeded {
                    needed: footprint,
                    remaining: self.max_memory.saturating_sub(used_memory - footprint),
                }));
            }

            let (output, refund) = match instr {
                Instruction::ReadSector { root, offset, length } => {
                    self.exec_read_sector(&sector_roots, *root, *offset, *length).await?
                }
                Instruction::AppendSector { data_offset, data_length } => {
                    let sector_collateral = self.prices.collateral.saturating_mul(SECTOR_SIZE as u128);
                    remaining_collateral = remaining_collateral.checked_sub(sector_collateral).ok_or(
                        HostError::Program(ProgramError::InsufficientCollateral {
                            needed: sector_collateral,
                            remaining: remaining_collateral,
                        }),
                    )?;
                    spent_collateral += sector_collateral;

                    if *data_length != SECTOR_SIZE {
                        return Err(HostError::Program(ProgramError::InvalidSectorSize {
                            expected: SECTOR_SIZE,
                            got: *data_length,
                        }));
                    }
                    let sector_bytes = self.data.bytes(*data_offset, *data_length).await?;
                    let leaves = merkle::segment_leaves(&sector_bytes, SEGMENT_SIZE as usize);
                    let sector_root = merkle::root(&leaves);
                    sector_roots.push(sector_root);
                    size += SECTOR_SIZE;
                    merkle_root = merkle::root(&sector_roots);
                    added_sectors.push((sector_root, sector_bytes));
                    (InstructionResult { output: sector_root.as_bytes().to_vec(), proof: None }, 0)
                }
                Instruction::DropSectors { n } => {
                    let have = sector_roots.len() as u64;
                    if *n > have {
                        return Err(HostError::Program(ProgramError::DropExceedsSectors { requested: *n, have }));
                    }
                    let new_len = (have - n) as usize;
                    removed_sectors.extend(sector_roots[new_len..].iter().copied());
                    sector_roots.truncate(new_len);
                    size -= n * SECTOR_SIZE;
                    merkle_root = merkle::root(&sector_roots);
                    (InstructionResult { output: Vec::new(), proof: None }, 0)
                }
                Instruction::HasSector { root } => {
                    let has = self.sectors.has_sector(root).await?;
                    (InstructionResult { output: vec![has as u8], proof: None }, 0)
                }
                Instruction::ReadRegistry { public_key, tweak } => {
                    match self.registry.get(public_key, tweak)? {
                        Some(entry) => (InstructionResult { output: encode_registry_entry(&entry), proof: None }, 0),
                        None => (InstructionResult { output: Vec::new(), proof: None }, cost.execution_cost),
                    }
                }
                Instruction::UpdateRegistry {
                    public_key,
                    tweak,
                    revision,
                    expiry,
                    signature,
                    data_offset,
                    data_length,
                } => {
                    let data = self.data.bytes(*data_offset, *data_length).await?;
                    let entry = RegistryEntry {
                        public_key: *public_key,
                        tweak: *tweak,
                        expiry: *expiry,
                        data,
                        revision: *revision,
                        signature: *signature,
                        entry_type: EntryType::Regular,
                    };
                    match self.registry.update(entry, false)? {
                        UpdateOutcome::Inserted | UpdateOutcome::Updated => {
                            (InstructionResult { output: revision.to_le_bytes().to_vec(), proof: None }, 0)
                        }
                        UpdateOutcome::LowerRevNum { existing } | UpdateOutcome::SameRevNum { existing } => {
                            (InstructionResult { output: encode_registry_entry(&existing), proof: None }, 0)
                        }
                    }
                }
                Instruction::RevisionMetadata => {
                    let mut out = Vec::with_capacity(48);
                    out.extend_from_slice(&self.current_revision_number.to_le_bytes());
                    out.extend_from_slice(&size.to_le_bytes());
                    out.extend_from_slice(merkle_root.as_bytes());
                    (InstructionResult { output: out, proof: None }, 0)
                }
                Instruction::SwapSector { a, b } => {
                    let len = sector_roots.len() as u64;
                    if *a >= len {
                        return Err(HostError::Program(ProgramError::IndexOutOfRange { index: *a, len }));
                    }
                    if *b >= len {
                        return Err(HostError::Program(ProgramError::IndexOutOfRange { index: *b, len }));
                    }
                    sector_roots.swap(*a as usize, *b as usize);
                    merkle_root = merkle::root(&sector_roots);
                    (InstructionResult { output: Vec::new(), proof: None }, 0)
                }
            };

            if refund > 0 {
                remaining_budget += refund;
                spent_budget = spent_budget.saturating_sub(refund);
            }
            results.push(output);
        }

        Ok(ProgramOutcome {
            results,
            new_size: size,
            new_merkle_root: merkle_root,
            new_sector_roots: sector_roots,
            added_sectors,
            removed_sectors,
            spent_budget,
            spent_collateral,
        })
    }

    async fn exec_read_sector(&self, sector_roots: &[Hash], root: Hash, offset: u64, length: u64) -> Result<(InstructionResult, u128), HostError> {
        if !sector_roots.contains(&root) {
            return Err(HostError::Program(ProgramError::SectorNotFound(root.to_hex())));
        }
        let sector_bytes = self.sectors.read_sector(&root).await?;
        let end = offset.checked_add(length).ok_or(HostError::Program(ProgramError::OutOfBounds {
            offset,
            length,
            declared: sector_bytes.len() as u64,
        }))?;
        if end > sector_bytes.len() as u64 {
            return Err(HostError::Program(ProgramError::OutOfBounds {
                offset,
                length,
                declared: sector_bytes.len() as u64,
            }));
        }
        let output = sector_bytes[offset as usize..end as usize].to_vec();

        // A Merkle proof is only computed for single-segment reads; a
        // range spanning multiple segments is served without one
        // (renters needing cross-segment proofs issue one ReadSector
        // per segment).
        let proof = if offset % SEGMENT_SIZE == 0 && length <= SEGMENT_SIZE {
            let leaves = merkle::segment_leaves(&sector_bytes, SEGMENT_SIZE as usize);
            let leaf_index = (offset / SEGMENT_SIZE) as usize;
            if leaf_index < leaves.len() {
                Some(merkle::proof(&leaves, leaf_index))
            } else {
                None
            }
        } else {
            None
        };
        Ok((InstructionResult { output, proof }, 0))
    }
}

fn encode_registry_entry(entry: &RegistryEntry) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + 8 + entry.data.len());
    out.extend_from_slice(entry.signature.as_bytes());
    out.extend_from_slice(&entry.revision.to_le_bytes());
    out.extend_from_slice(&entry.data);
    out
}

fn instruction_memory_footprint(instr: &Instruction) -> u64 {
    match instr {
        Instruction::ReadSector { length, .. } => *length,
        Instruction::AppendSector { data_length, .. } => *data_length,
        Instruction::UpdateRegistry { data_length, .. } => *data_length,
        Instruction::DropSectors { .. }
        | Instruction::HasSector { .. }
        | Instruction::ReadRegistry { .. }
        | Instruction::RevisionMetadata
        | Instruction::SwapSector { .. } => 256,
    }
}
