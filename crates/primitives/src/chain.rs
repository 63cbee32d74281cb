//! Identifiers of the chains the bridge custodies funds on.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A chain supported by the bridge, including the consensus chain itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Chain {
    /// Bitcoin.
    Btc,
    /// Bitcoin Cash.
    Bch,
    /// Litecoin.
    Ltc,
    /// Dogecoin.
    Doge,
    /// Ethereum.
    Eth,
    /// Avalanche C-Chain.
    Avax,
    /// BNB Smart Chain.
    Bsc,
    /// Base.
    Base,
    /// Cosmos Hub.
    Gaia,
    /// XRP Ledger.
    Xrp,
    /// The consensus chain.
    Switchly,
}

impl Chain {
    /// All chains known to this build.
    pub const ALL: [Chain; 11] = [
        Chain::Btc,
        Chain::Bch,
        Chain::Ltc,
        Chain::Doge,
        Chain::Eth,
        Chain::Avax,
        Chain::Bsc,
        Chain::Base,
        Chain::Gaia,
        Chain::Xrp,
        Chain::Switchly,
    ];

    /// The ticker used in logs, mimir keys and the consensus chain's messages.
    pub const fn ticker(&self) -> &'static str {
        match self {
            Chain::Btc => "BTC",
            Chain::Bch => "BCH",
            Chain::Ltc => "LTC",
            Chain::Doge => "DOGE",
            Chain::Eth => "ETH",
            Chain::Avax => "AVAX",
            Chain::Bsc => "BSC",
            Chain::Base => "BASE",
            Chain::Gaia => "GAIA",
            Chain::Xrp => "XRP",
            Chain::Switchly => "SWITCHLY",
        }
    }

    /// Whether the chain runs the EVM.
    ///
    /// Instant observations on EVM chains carry an estimated gas and must be corrected by a later
    /// observation.
    pub const fn is_evm(&self) -> bool {
        matches!(self, Chain::Eth | Chain::Avax | Chain::Bsc | Chain::Base)
    }

    /// Whether the chain uses unspent-output accounting.
    pub const fn is_utxo(&self) -> bool {
        matches!(self, Chain::Btc | Chain::Bch | Chain::Ltc | Chain::Doge)
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ticker())
    }
}

/// Error returned when a string does not name a known chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown chain: {0}")]
pub struct UnknownChain(pub String);

impl FromStr for Chain {
    type Err = UnknownChain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Chain::ALL
            .into_iter()
            .find(|chain| chain.ticker().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownChain(s.to_string()))
    }
}
