//! Block header wire format.

use std::io::{self, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use sha2::{Digest, Sha256};
use zcash_encoding::Vector;
use zcash_primitives::block::BlockHash;

use super::push_compact_size;

/// Length of an Equihash (200, 9) solution.
pub const SOLUTION_SIZE: usize = 1344;
/// Serialised length of a header carrying a full size solution.
pub const HEADER_SIZE: usize = 4 + 32 + 32 + 32 + 4 + 4 + 32 + 3 + SOLUTION_SIZE;

/// A block header with every wire field named.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block version.
    pub version: i32,
    /// Hash of the previous block.
    pub prev_block: BlockHash,
    /// Merkle root of the block's transactions.
    pub merkle_root: [u8; 32],
    /// Commitment tree root. The first byte doubles as a marker the darkside
    /// chain bumps whenever it injects a transaction, so the block hash moves.
    pub final_sapling_root: [u8; 32],
    /// Block timestamp.
    pub time: u32,
    /// Compact difficulty target.
    pub bits: u32,
    /// Equihash nonce.
    pub nonce: [u8; 32],
    /// Equihash solution.
    pub solution: Vec<u8>,
}

impl BlockHeader {
    /// Reads a header from its wire encoding.
    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let version = reader.read_i32::<LittleEndian>()?;
        let prev_block = BlockHash(read_array(&mut reader)?);
        let merkle_root = read_array(&mut reader)?;
        let final_sapling_root = read_array(&mut reader)?;
        let time = reader.read_u32::<LittleEndian>()?;
        let bits = reader.read_u32::<LittleEndian>()?;
        let nonce = read_array(&mut reader)?;
        let solution = Vector::read(&mut reader, |r| r.read_u8())?;

        Ok(Self {
            version,
            prev_block,
            merkle_root,
            final_sapling_root,
            time,
            bits,
            nonce,
            solution,
        })
    }

    /// Wire encoding of the header.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE);
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&self.prev_block.0);
        bytes.extend_from_slice(&self.merkle_root);
        bytes.extend_from_slice(&self.final_sapling_root);
        bytes.extend_from_slice(&self.time.to_le_bytes());
        bytes.extend_from_slice(&self.bits.to_le_bytes());
        bytes.extend_from_slice(&self.nonce);
        push_compact_size(&mut bytes, self.solution.len());
        bytes.extend_from_slice(&self.solution);
        bytes
    }

    /// Double SHA-256 of the encoded header.
    pub fn hash(&self) -> BlockHash {
        let first = Sha256::digest(self.to_bytes());
        BlockHash(Sha256::digest(first).into())
    }
}

fn read_array<R: Read>(reader: &mut R) -> io::Result<[u8; 32]> {
    let mut bytes = [0u8; 32];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}
