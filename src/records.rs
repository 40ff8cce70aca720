//! Chain Records
//!
//! Block and transaction records returned by the storage collaborator.
//! They are serialized as-is into the `data` field of every push.

use serde::{Deserialize, Serialize};

use crate::address::{Address, AddressKind, Network};

/// Payment script classification of an output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptType {
    Hash160,
    P2sh,
    Pubkey,
    Multisig,
    OpReturn,
    #[serde(other)]
    Unknown,
}

/// A block on the main chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Block {
    pub hash: String,
    pub height: u64,
    pub version: u32,
    pub previous_block_hash: String,
    pub merkle_root: String,
    pub time: u64,
    pub bits: u32,
    pub nonce: u32,
    pub size: u64,
    #[serde(default)]
    pub transaction_hashes: Vec<String>,
}

/// A transaction output, or the previous output spent by an input
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TxOutput {
    /// Amount in base units
    pub amount: u64,
    /// Hex-encoded output script
    pub script: String,
    pub script_type: ScriptType,
}

impl TxOutput {
    /// Output paying `address` with a standard script
    pub fn paying(address: &Address, amount: u64) -> Self {
        let script_type = match address.kind() {
            AddressKind::Hash160 => ScriptType::Hash160,
            AddressKind::P2sh => ScriptType::P2sh,
        };

        Self {
            amount,
            script: hex::encode(address.to_script()),
            script_type,
        }
    }

    /// The hash160 address this output pays, if it is a hash160 output
    pub fn hash160_address(&self, network: Network) -> Option<String> {
        if self.script_type != ScriptType::Hash160 {
            return None;
        }

        let script = hex::decode(&self.script).ok()?;
        Address::from_script(&script, network).map(Address::into_string)
    }
}

/// A transaction input
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TxInput {
    pub previous_transaction_hash: String,
    pub output_index: u32,
    /// Output being spent; absent for coinbase inputs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_output: Option<TxOutput>,
}

/// A confirmed or pending transaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub hash: String,
    pub version: u32,
    pub lock_time: u32,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u64>,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Outputs spent by this transaction's inputs, in input order
    pub fn previous_outputs(&self) -> impl Iterator<Item = &TxOutput> {
        self.inputs.iter().filter_map(|input| input.previous_output.as_ref())
    }

    pub fn is_pending(&self) -> bool {
        self.block_hash.is_none()
    }
}
