//! Placeholder blocks for tests that only need chain height.

use sha2::{Digest, Sha256};
use zcash_primitives::block::BlockHash;

use crate::block::{BlockError, BlockHeader, BlockTransaction, ChainBlock, SOLUTION_SIZE};

/// Transparent coinbase mined at height 797905.
const COINBASE_TEMPLATE: &str = concat!(
    "0400008085202f890100000000000000000000000000000000000000000000000000",
    "00000000000000ffffffff2a03d12c0c00043855975e464b8896790758f824ceac97836",
    "22c17ed38f1669b8a45ce1da857dbbe7950e2ffffffff02a0ebce1d000000001976a914",
    "7ed15946ec14ae0cd8fa8991eb6084452eb3f77c88ac405973070000000017a914e445cf",
    "a944b6f2bdacefbda904a81d5fdd26d77f8700000000000000000000000000000000000000",
);

/// Offset of the little-endian height inside the template's coinbase script.
const COINBASE_HEIGHT_OFFSET: usize = 47;

/// Builds `count` empty blocks from `start_height` upward. Identical
/// arguments always give identical blocks.
pub fn build_blocks(start_height: u64, nonce: i32, count: u64) -> Result<Vec<ChainBlock>, BlockError> {
    let template = hex::decode(COINBASE_TEMPLATE)?;
    (start_height..start_height + count)
        .map(|height| build_block(&template, height, nonce))
        .collect()
}

fn build_block(template: &[u8], height: u64, nonce: i32) -> Result<ChainBlock, BlockError> {
    let mut coinbase = template.to_vec();
    coinbase[COINBASE_HEIGHT_OFFSET..COINBASE_HEIGHT_OFFSET + 4]
        .copy_from_slice(&(height as u32).to_le_bytes());

    let header = BlockHeader {
        version: 4,
        prev_block: BlockHash([0; 32]),
        merkle_root: merkle_root(nonce, height),
        final_sapling_root: [0; 32],
        time: 1,
        bits: 0,
        nonce: [0; 32],
        solution: vec![0; SOLUTION_SIZE],
    };

    ChainBlock::new(header, vec![BlockTransaction::parse(coinbase)?])
}

/// Hash of `nonce` and `height`, each taken as a unicode code point. Values
/// that are not scalar values become U+FFFD.
fn merkle_root(nonce: i32, height: u64) -> [u8; 32] {
    let input = format!("{}#{}", code_point(nonce), code_point(height));
    Sha256::digest(input).into()
}

fn code_point(value: impl TryInto<u32>) -> char {
    value
        .try_into()
        .ok()
        .and_then(char::from_u32)
        .unwrap_or(char::REPLACEMENT_CHARACTER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_height_is_at_offset() {
        let template = hex::decode(COINBASE_TEMPLATE).unwrap();
        assert_eq!(
            &template[COINBASE_HEIGHT_OFFSET..COINBASE_HEIGHT_OFFSET + 4],
            &[0xd1, 0x2c, 0x0c, 0x00]
        );
    }

    #[test]
    fn deterministic() {
        let first: Vec<Vec<u8>> = build_blocks(1000, 7, 5)
            .unwrap()
            .iter()
            .map(ChainBlock::to_bytes)
            .collect();
        let second: Vec<Vec<u8>> = build_blocks(1000, 7, 5)
            .unwrap()
            .iter()
            .map(ChainBlock::to_bytes)
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn merkle_root_hashes_code_points() {
        let cases = [
            (0, 1, "16114bcb4ac1395a6402fc968cea03c3248c3af0560dacbfd657d8a6570db1e6"),
            (7, 1000, "0929cff39fcd92b63da0b868720c0b2de46e7f70a048c7e9442c0f6bb055a430"),
            // negative nonce and a surrogate height both become U+FFFD
            (-1, 0xD800, "56da3a9a4c36a3dcfd74dd33db8497a886024842afba0b5676156c9142a1d618"),
            (65, 0x1F600, "2e4c88654c7543c23d4fe08713214c38bde73de7ea014c7f8c493014e6823c14"),
        ];
        for (nonce, height, expected) in cases {
            assert_eq!(hex::encode(merkle_root(nonce, height)), expected);
        }
        assert_eq!(code_point(-1), char::REPLACEMENT_CHARACTER);
        assert_eq!(code_point(u64::from(u32::MAX) + 66), char::REPLACEMENT_CHARACTER);
        assert_eq!(
            build_blocks(1, 0, 1).unwrap()[0].header().merkle_root,
            merkle_root(0, 1)
        );
    }

    #[test]
    fn nonce_changes_merkle_root() {
        let a = build_blocks(1000, 1, 1).unwrap().remove(0);
        let b = build_blocks(1000, 2, 1).unwrap().remove(0);
        assert_ne!(a.header().merkle_root, b.header().merkle_root);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn consecutive_heights_with_one_coinbase() {
        let blocks = build_blocks(663_150, 0, 3).unwrap();
        let heights: Vec<u64> = blocks.iter().map(ChainBlock::height).collect();
        assert_eq!(heights, vec![663_150, 663_151, 663_152]);
        assert!(blocks.iter().all(|block| block.transactions().len() == 1));
        assert_ne!(
            blocks[0].transactions()[0].txid(),
            blocks[1].transactions()[0].txid()
        );
    }

    #[test]
    fn zero_count_is_empty() {
        assert!(build_blocks(5, 0, 0).unwrap().is_empty());
    }
}
