//! This crate provides generators of random keys, hashes and outbound items for the test suites
//! of the bifrost crates.

use bifrost_primitives::{
    chain::Chain,
    keys::{PubKey, TxId},
    outbound::{Coin, OutboundItem, TransferInstruction},
    BlockHeight,
};
use rand::{thread_rng, Rng};
use secp256k1::{PublicKey, Secp256k1, SecretKey};

/// Generates a random secp256k1 keypair.
pub fn generate_keypair() -> (SecretKey, PublicKey) {
    let secp = Secp256k1::new();
    secp.generate_keypair(&mut thread_rng())
}

/// Generates a random vault or node key.
pub fn generate_pubkey() -> PubKey {
    PubKey::from(generate_keypair().1)
}

/// Generates a random transaction hash.
pub fn generate_txid() -> TxId {
    let bytes: [u8; 32] = thread_rng().gen();
    TxId::new(hex::encode_upper(bytes))
}

/// Generates a transfer of a random amount out of `vault` on `chain`.
pub fn generate_transfer(chain: Chain, vault: &PubKey) -> TransferInstruction {
    let mut rng = thread_rng();
    let in_hash = generate_txid();
    let asset = format!("{chain}.{chain}");

    TransferInstruction {
        chain,
        to_address: format!("dest-{}", hex::encode(rng.gen::<[u8; 8]>())),
        vault_pub_key: vault.clone(),
        coins: vec![Coin::new(asset.clone(), rng.gen_range(1_000..1_000_000))],
        memo: format!("OUT:{in_hash}"),
        max_gas: vec![Coin::new(asset, 10_000)],
        gas_rate: rng.gen_range(1..100),
        in_hash,
        out_hash: TxId::default(),
    }
}

/// Generates an unsigned outbound item at `height` for `vault` on `chain`.
pub fn generate_outbound_item(
    height: BlockHeight,
    chain: Chain,
    vault: &PubKey,
    sequence_index: u64,
) -> OutboundItem {
    OutboundItem::new(height, generate_transfer(chain, vault), sequence_index)
}
