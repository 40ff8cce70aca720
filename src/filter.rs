//! Address Filtering
//!
//! Matches a transaction against a connection's address interest set.
//! Only hash160 outputs are considered; every other script type is skipped
//! even when some identifier derived from it equals an interesting address.

use std::collections::HashSet;

use crate::address::Network;
use crate::records::{Transaction, TxOutput};

/// Interesting addresses found in one transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressMatches {
    /// Addresses whose funds the transaction spends
    pub in_matches: Vec<String>,
    /// Addresses the transaction pays
    pub out_matches: Vec<String>,
}

impl AddressMatches {
    /// True when neither side matched; such a transaction is not pushed
    pub fn is_empty(&self) -> bool {
        self.in_matches.is_empty() && self.out_matches.is_empty()
    }
}

/// Collect the hash160 addresses among `outputs` that are in `interest`
///
/// # Arguments
/// * `outputs` - Outputs in transaction order
/// * `interest` - The connection's interest set
/// * `network` - Network used to encode the derived addresses
///
/// # Returns
/// Matching addresses in output order; an address paid twice appears twice
pub fn match_outputs<'a, I>(outputs: I, interest: &HashSet<String>, network: Network) -> Vec<String>
where
    I: IntoIterator<Item = &'a TxOutput>,
{
    if interest.is_empty() {
        return Vec::new();
    }

    outputs
        .into_iter()
        .filter_map(|output| output.hash160_address(network))
        .filter(|address| interest.contains(address))
        .collect()
}

/// Match a transaction's outputs and spent previous outputs against `interest`
pub fn filter_transaction(
    tx: &Transaction,
    interest: &HashSet<String>,
    network: Network,
) -> AddressMatches {
    AddressMatches {
        in_matches: match_outputs(tx.previous_outputs(), interest, network),
        out_matches: match_outputs(&tx.outputs, interest, network),
    }
}
