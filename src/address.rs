//! Address Validation
//!
//! Parses Base58Check payment addresses for the configured network and
//! converts between hash160 addresses and their pay-to-pubkey-hash scripts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of a hash160 digest
pub const HASH160_LEN: usize = 20;

/// Length of a standard pay-to-pubkey-hash script
pub const P2PKH_SCRIPT_LEN: usize = 25;

const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;
const PUSH_20: u8 = 0x14;

/// Errors that can occur while parsing an address
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid address")]
    Invalid,

    #[error("unsupported address type")]
    UnsupportedType,

    #[error("unknown network: {0}")]
    UnknownNetwork(String),
}

/// Chain the gateway serves; decides which version bytes are accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    #[default]
    Bitcoin,
    Testnet,
    Regtest,
    Dogecoin,
    DogecoinTestnet,
}

impl Network {
    /// Version byte of single-key (hash160) addresses
    pub fn p2pkh_version(&self) -> u8 {
        match self {
            Network::Bitcoin => 0x00,
            Network::Testnet | Network::Regtest => 0x6f,
            Network::Dogecoin => 0x1e,
            Network::DogecoinTestnet => 0x71,
        }
    }

    /// Version byte of script-hash addresses
    pub fn p2sh_version(&self) -> u8 {
        match self {
            Network::Bitcoin => 0x05,
            Network::Testnet | Network::Regtest => 0xc4,
            Network::Dogecoin => 0x16,
            Network::DogecoinTestnet => 0xc4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Network::Bitcoin => "bitcoin",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
            Network::Dogecoin => "dogecoin",
            Network::DogecoinTestnet => "dogecoin_testnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Network {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bitcoin" | "mainnet" => Ok(Network::Bitcoin),
            "testnet" | "testnet3" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            "dogecoin" => Ok(Network::Dogecoin),
            "dogecoin_testnet" => Ok(Network::DogecoinTestnet),
            other => Err(AddressError::UnknownNetwork(other.to_string())),
        }
    }
}

/// Kind of payment an address encodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    /// Single-key address, hash160 of a public key
    Hash160,
    /// Script-hash address
    P2sh,
}

/// A Base58Check address validated against a network
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    encoded: String,
    kind: AddressKind,
    hash: [u8; HASH160_LEN],
}

impl Address {
    /// Parse an address of any supported kind
    ///
    /// # Arguments
    /// * `s` - The Base58Check encoded address
    /// * `network` - The network whose version bytes are accepted
    ///
    /// # Returns
    /// The parsed address, or `AddressError::Invalid` if the checksum, length
    /// or version byte does not match
    pub fn parse(s: &str, network: Network) -> Result<Self, AddressError> {
        let payload = bs58::decode(s)
            .with_check(None)
            .into_vec()
            .map_err(|_| AddressError::Invalid)?;

        if payload.len() != HASH160_LEN + 1 {
            return Err(AddressError::Invalid);
        }

        let kind = match payload[0] {
            v if v == network.p2pkh_version() => AddressKind::Hash160,
            v if v == network.p2sh_version() => AddressKind::P2sh,
            _ => return Err(AddressError::Invalid),
        };

        let mut hash = [0u8; HASH160_LEN];
        hash.copy_from_slice(&payload[1..]);

        Ok(Self {
            encoded: s.to_string(),
            kind,
            hash,
        })
    }

    /// Parse an address and require it to be a hash160 address
    pub fn parse_hash160(s: &str, network: Network) -> Result<Self, AddressError> {
        let address = Self::parse(s, network)?;
        if address.kind != AddressKind::Hash160 {
            return Err(AddressError::UnsupportedType);
        }
        Ok(address)
    }

    /// Build the hash160 address for a public key hash
    pub fn from_hash160(hash: [u8; HASH160_LEN], network: Network) -> Self {
        Self::encode(AddressKind::Hash160, hash, network)
    }

    /// Build the script-hash address for a script hash
    pub fn from_script_hash(hash: [u8; HASH160_LEN], network: Network) -> Self {
        Self::encode(AddressKind::P2sh, hash, network)
    }

    fn encode(kind: AddressKind, hash: [u8; HASH160_LEN], network: Network) -> Self {
        let version = match kind {
            AddressKind::Hash160 => network.p2pkh_version(),
            AddressKind::P2sh => network.p2sh_version(),
        };

        let mut payload = Vec::with_capacity(HASH160_LEN + 1);
        payload.push(version);
        payload.extend_from_slice(&hash);

        Self {
            encoded: bs58::encode(payload).with_check().into_string(),
            kind,
            hash,
        }
    }

    /// Derive the hash160 address paid by a pay-to-pubkey-hash script
    ///
    /// # Returns
    /// `None` unless the script is exactly `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG`
    pub fn from_script(script: &[u8], network: Network) -> Option<Self> {
        if script.len() != P2PKH_SCRIPT_LEN
            || script[0] != OP_DUP
            || script[1] != OP_HASH160
            || script[2] != PUSH_20
            || script[23] != OP_EQUALVERIFY
            || script[24] != OP_CHECKSIG
        {
            return None;
        }

        let mut hash = [0u8; HASH160_LEN];
        hash.copy_from_slice(&script[3..23]);
        Some(Self::from_hash160(hash, network))
    }

    /// The output script paying this address
    pub fn to_script(&self) -> Vec<u8> {
        match self.kind {
            AddressKind::Hash160 => {
                let mut script = vec![OP_DUP, OP_HASH160, PUSH_20];
                script.extend_from_slice(&self.hash);
                script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
                script
            }
            AddressKind::P2sh => {
                let mut script = vec![OP_HASH160, PUSH_20];
                script.extend_from_slice(&self.hash);
                script.push(OP_EQUAL);
                script
            }
        }
    }

    pub fn kind(&self) -> AddressKind {
        self.kind
    }

    pub fn hash160(&self) -> &[u8; HASH160_LEN] {
        &self.hash
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    pub fn into_string(self) -> String {
        self.encoded
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}
