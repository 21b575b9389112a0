//! Full blocks: header, declared height and the raw transactions they carry.

use std::io::{self, Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use zcash_encoding::CompactSize;
use zcash_primitives::block::BlockHash;
use zcash_protocol::consensus::BranchId;
use zcash_primitives::transaction::{Transaction, TxId};

use crate::proto::CompactBlock;

mod compact;
mod header;

pub use compact::{COMPACT_NOTE_SIZE, compact_transaction, has_shielded_elements};
pub use header::{BlockHeader, HEADER_SIZE, SOLUTION_SIZE};

/// Most transactions a block may hold before its count stops fitting the
/// single byte form of the count prefix.
pub const MAX_BLOCK_TRANSACTIONS: usize = 253;

/// Branch used to decode transactions that do not carry their own branch id.
pub const DECODE_BRANCH_ID: BranchId = BranchId::Nu5;

/// The genesis coinbase pushes its difficulty target instead of a height.
const GENESIS_TARGET_DIFFICULTY: u64 = 520_617_983;

/// Block errors.
#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    /// Decode failure.
    #[error("decode error. {0}")]
    Io(#[from] io::Error),
    /// Hex decode failure.
    #[error("hex decode error. {0}")]
    Hex(#[from] hex::FromHexError),
    /// A block must carry at least its coinbase.
    #[error("block has no transactions")]
    NoTransactions,
    /// Bytes were left over after the last transaction.
    #[error("block serialization is too long by {0} bytes")]
    TrailingBytes(usize),
    /// The coinbase script does not start with a height push.
    #[error("coinbase script does not encode a height")]
    CoinbaseHeight,
    /// The block's transaction count is at its ceiling.
    #[error("block at height {0} already holds the maximum of 253 transactions")]
    TransactionLimit(u64),
}

/// Decodes a single transaction, requiring every byte to be consumed.
pub fn read_transaction(bytes: &[u8]) -> io::Result<Transaction> {
    let mut cursor = Cursor::new(bytes);
    let transaction = Transaction::read(&mut cursor, DECODE_BRANCH_ID)?;
    let leftover = bytes.len() - cursor.position() as usize;
    if leftover != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("transaction serialization is too long by {leftover} bytes"),
        ));
    }
    Ok(transaction)
}

/// Appends the CompactSize encoding of `size`.
pub(crate) fn push_compact_size(bytes: &mut Vec<u8>, size: usize) {
    match size {
        0..=0xfc => bytes.push(size as u8),
        0xfd..=0xffff => {
            bytes.push(0xfd);
            bytes.extend_from_slice(&(size as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            bytes.push(0xfe);
            bytes.extend_from_slice(&(size as u32).to_le_bytes());
        }
        _ => {
            bytes.push(0xff);
            bytes.extend_from_slice(&(size as u64).to_le_bytes());
        }
    }
}

/// A raw transaction paired with its id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockTransaction {
    txid: TxId,
    data: Vec<u8>,
}

impl BlockTransaction {
    /// Checks that `data` is exactly one well-formed transaction.
    pub fn parse(data: Vec<u8>) -> io::Result<Self> {
        let txid = read_transaction(&data)?.txid();
        Ok(Self { txid, data })
    }

    /// Transaction id.
    pub fn txid(&self) -> TxId {
        self.txid
    }

    /// Raw transaction bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Decodes the full transaction.
    pub fn decode(&self) -> io::Result<Transaction> {
        read_transaction(&self.data)
    }
}

/// A block whose header fields can be edited structurally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainBlock {
    header: BlockHeader,
    height: u64,
    transactions: Vec<BlockTransaction>,
}

impl ChainBlock {
    /// Assembles a block. The height is taken from the coinbase.
    pub fn new(header: BlockHeader, transactions: Vec<BlockTransaction>) -> Result<Self, BlockError> {
        let coinbase = transactions.first().ok_or(BlockError::NoTransactions)?;
        let height = coinbase_height(coinbase.data())?;
        Ok(Self {
            header,
            height,
            transactions,
        })
    }

    /// Decodes a serialised block, requiring every byte to be consumed.
    pub fn parse(bytes: &[u8]) -> Result<Self, BlockError> {
        let mut cursor = Cursor::new(bytes);
        let header = BlockHeader::read(&mut cursor)?;
        let count = CompactSize::read(&mut cursor)?;

        let mut transactions = Vec::new();
        for _ in 0..count {
            let start = cursor.position() as usize;
            let transaction = Transaction::read(&mut cursor, DECODE_BRANCH_ID)?;
            let end = cursor.position() as usize;
            transactions.push(BlockTransaction {
                txid: transaction.txid(),
                data: bytes[start..end].to_vec(),
            });
        }

        let leftover = bytes.len() - cursor.position() as usize;
        if leftover != 0 {
            return Err(BlockError::TrailingBytes(leftover));
        }

        Self::new(header, transactions)
    }

    /// Block header.
    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    /// Height declared by the coinbase.
    pub fn height(&self) -> u64 {
        self.height
    }

    /// Hash of the current header.
    pub fn hash(&self) -> BlockHash {
        self.header.hash()
    }

    /// Transactions in block order, coinbase first.
    pub fn transactions(&self) -> &[BlockTransaction] {
        &self.transactions
    }

    /// Points the header at a new parent.
    pub fn set_prev_block(&mut self, prev_block: BlockHash) {
        self.header.prev_block = prev_block;
    }

    /// Appends a transaction and bumps the sapling root marker so the block
    /// hash changes with it.
    pub fn append_transaction(&mut self, transaction: BlockTransaction) -> Result<(), BlockError> {
        if self.transactions.len() >= MAX_BLOCK_TRANSACTIONS {
            return Err(BlockError::TransactionLimit(self.height));
        }
        self.header.final_sapling_root[0] = self.header.final_sapling_root[0].wrapping_add(1);
        self.transactions.push(transaction);
        Ok(())
    }

    /// Wire encoding of the block.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.header.to_bytes();
        push_compact_size(&mut bytes, self.transactions.len());
        for transaction in &self.transactions {
            bytes.extend_from_slice(transaction.data());
        }
        bytes
    }

    /// Reduces the block to the transactions with shielded elements.
    pub fn to_compact(&self) -> Result<CompactBlock, BlockError> {
        let mut vtx = Vec::new();
        for (index, transaction) in self.transactions.iter().enumerate() {
            let decoded = transaction.decode()?;
            if has_shielded_elements(&decoded) {
                vtx.push(compact_transaction(index as u64, &decoded));
            }
        }

        Ok(CompactBlock {
            proto_version: 1,
            height: self.height,
            hash: self.hash().0.to_vec(),
            prev_hash: self.header.prev_block.0.to_vec(),
            time: self.header.time,
            header: Vec::new(),
            vtx,
        })
    }
}

/// Reads the BIP34 height from the first input script of a coinbase.
fn coinbase_height(coinbase: &[u8]) -> Result<u64, BlockError> {
    let mut reader = Cursor::new(coinbase);
    let header = reader.read_u32::<LittleEndian>()?;
    let overwintered = header >> 31 == 1;
    let version = header & 0x7FFF_FFFF;
    if overwintered {
        let _version_group_id = reader.read_u32::<LittleEndian>()?;
        if version >= 5 {
            // branch id, lock time, expiry height
            let mut skipped = [0u8; 12];
            reader.read_exact(&mut skipped)?;
        }
    }

    if CompactSize::read(&mut reader)? == 0 {
        return Err(BlockError::CoinbaseHeight);
    }
    let mut prevout = [0u8; 36];
    reader.read_exact(&mut prevout)?;
    let script_len = CompactSize::read(&mut reader)? as usize;
    let mut script = vec![0u8; script_len];
    reader.read_exact(&mut script)?;

    script_height(&script)
}

fn script_height(script: &[u8]) -> Result<u64, BlockError> {
    let height = match script.first() {
        Some(0x00) => 0,
        Some(&opcode @ 0x51..=0x60) => u64::from(opcode - 0x50),
        Some(&len @ 1..=8) => {
            let push = script
                .get(1..=usize::from(len))
                .ok_or(BlockError::CoinbaseHeight)?;
            push.iter()
                .rev()
                .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
        }
        _ => return Err(BlockError::CoinbaseHeight),
    };

    if height == GENESIS_TARGET_DIFFICULTY {
        Ok(0)
    } else {
        Ok(height)
    }
}
