//! Compact transaction encoding.

use zcash_primitives::transaction::Transaction;

use crate::proto::{CompactOrchardAction, CompactSaplingOutput, CompactSaplingSpend, CompactTx};

/// Prefix of a note ciphertext a light client needs for trial decryption.
pub const COMPACT_NOTE_SIZE: usize = 52;

/// Whether the transaction touches the sapling or orchard pools.
pub fn has_shielded_elements(transaction: &Transaction) -> bool {
    let sapling = transaction.sapling_bundle().is_some_and(|bundle| {
        !bundle.shielded_spends().is_empty() || !bundle.shielded_outputs().is_empty()
    });
    sapling || transaction.orchard_bundle().is_some()
}

/// Builds the compact form of the transaction at `index` within its block.
pub fn compact_transaction(index: u64, transaction: &Transaction) -> CompactTx {
    let (spends, outputs) = transaction
        .sapling_bundle()
        .map(|bundle| {
            let spends: Vec<CompactSaplingSpend> = bundle
                .shielded_spends()
                .iter()
                .map(|spend| CompactSaplingSpend {
                    nf: spend.nullifier().0.to_vec(),
                })
                .collect();
            let outputs: Vec<CompactSaplingOutput> = bundle
                .shielded_outputs()
                .iter()
                .map(|output| CompactSaplingOutput {
                    cmu: output.cmu().to_bytes().to_vec(),
                    ephemeral_key: output.ephemeral_key().0.to_vec(),
                    ciphertext: output.enc_ciphertext()[..COMPACT_NOTE_SIZE].to_vec(),
                })
                .collect();
            (spends, outputs)
        })
        .unwrap_or_default();

    let actions: Vec<CompactOrchardAction> = transaction
        .orchard_bundle()
        .map(|bundle| {
            bundle
                .actions()
                .iter()
                .map(|action| CompactOrchardAction {
                    nullifier: action.nullifier().to_bytes().to_vec(),
                    cmx: action.cmx().to_bytes().to_vec(),
                    ephemeral_key: action.encrypted_note().epk_bytes.to_vec(),
                    ciphertext: action.encrypted_note().enc_ciphertext[..COMPACT_NOTE_SIZE]
                        .to_vec(),
                })
                .collect()
        })
        .unwrap_or_default();

    CompactTx {
        index,
        hash: transaction.txid().as_ref().to_vec(),
        fee: 0,
        spends,
        outputs,
        actions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{sapling_ciphertext, sapling_output_transaction};

    #[test]
    fn sapling_output_is_compacted() {
        let transaction = sapling_output_transaction(9);
        let decoded = transaction.decode().unwrap();
        assert!(has_shielded_elements(&decoded));

        let compact = compact_transaction(4, &decoded);
        assert_eq!(compact.index, 4);
        assert_eq!(compact.hash, transaction.txid().as_ref().to_vec());
        assert!(compact.spends.is_empty());
        assert!(compact.actions.is_empty());
        assert_eq!(compact.outputs.len(), 1);

        let output = &compact.outputs[0];
        let mut cmu = vec![0u8; 32];
        cmu[0] = 9;
        assert_eq!(output.cmu, cmu);
        assert_eq!(output.ephemeral_key, vec![0xee; 32]);
        assert_eq!(output.ciphertext.len(), COMPACT_NOTE_SIZE);
        assert_eq!(output.ciphertext, sapling_ciphertext()[..COMPACT_NOTE_SIZE]);
    }
}
