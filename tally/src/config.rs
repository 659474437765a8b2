//! TOML + environment configuration. The chain selector resolves to the
//! baked-in core contract addresses; everything else is deployment detail.

use std::net::SocketAddr;
use std::path::PathBuf;

use alloy_primitives::{address, aliases::U96, Address, U256};
use anyhow::Context;
use serde::Deserialize;

use tally_ingest::seed::{CollateralSeed, NetworkSeed};
use tally_ingest::{CoreAddresses, PriceProvider};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Holesky,
    Sepolia,
    Mainnet,
}

impl Chain {
    pub fn id(&self) -> u64 {
        match self {
            Chain::Holesky => 17000,
            Chain::Sepolia => 11155111,
            Chain::Mainnet => 1,
        }
    }

    pub fn addresses(&self) -> CoreAddresses {
        match self {
            Chain::Holesky | Chain::Sepolia => CoreAddresses {
                operator_network_opt_in_service: address!(
                    "58973d16FFA900D11fC22e5e2B6840d9f7e13401"
                ),
                operator_vault_opt_in_service: address!(
                    "95CC0a052ae33941877c9619835A233D21D57351"
                ),
                vault_factory: address!("407A039D94948484D356eFB765b3c74382A050B4"),
            },
            Chain::Mainnet => CoreAddresses {
                operator_network_opt_in_service: Address::ZERO,
                operator_vault_opt_in_service: Address::ZERO,
                vault_factory: Address::ZERO,
            },
        }
    }

    pub fn blockscout_host(&self) -> &'static str {
        match self {
            Chain::Holesky => "eth-holesky.blockscout.com",
            Chain::Sepolia => "eth-sepolia.blockscout.com",
            Chain::Mainnet => "eth-mainnet.blockscout.com",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceProviderName {
    Coinmarketcap,
    Alchemy,
}

impl Default for PriceProviderName {
    fn default() -> Self {
        PriceProviderName::Coinmarketcap
    }
}

impl From<PriceProviderName> for PriceProvider {
    fn from(value: PriceProviderName) -> Self {
        match value {
            PriceProviderName::Coinmarketcap => PriceProvider::CoinMarketCap,
            PriceProviderName::Alchemy => PriceProvider::Alchemy,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub listen: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:5000".parse().unwrap(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Keys {
    pub coinmarketcap: Option<String>,
    pub alchemy: Option<String>,
    pub blockscout: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    pub pause_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { pause_secs: 60 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollateralEntry {
    pub address: Address,
    pub cmc_id: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkEntry {
    pub network: Address,
    pub identifier: u64,
    /// Decimal string at scale 10^48.
    pub max_rate: String,
    /// Decimal string at scale 10^24.
    pub target_stake: Option<String>,
    pub network_fee: Option<u64>,
    pub operator_fee: u64,
    pub start_from: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub chain: Chain,
    pub rpc_url: String,
    pub store_path: PathBuf,
    #[serde(default)]
    pub price_provider: PriceProviderName,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub keys: Keys,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub collaterals: Vec<CollateralEntry>,
    #[serde(default)]
    pub networks: Vec<NetworkEntry>,
}

impl Config {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("TALLY").separator("__"))
            .build()
            .context("reading configuration")?;

        settings
            .try_deserialize()
            .context("deserializing configuration")
    }

    pub fn collateral_seeds(&self) -> Vec<CollateralSeed> {
        self.collaterals
            .iter()
            .map(|entry| CollateralSeed {
                address: entry.address,
                cmc_id: entry.cmc_id,
            })
            .collect()
    }

    pub fn network_seeds(&self) -> anyhow::Result<Vec<NetworkSeed>> {
        self.networks
            .iter()
            .map(|entry| {
                let max_rate: U256 = entry
                    .max_rate
                    .parse()
                    .with_context(|| format!("max_rate for {}", entry.network))?;

                let target_stake = entry
                    .target_stake
                    .as_deref()
                    .map(|raw| {
                        raw.parse()
                            .with_context(|| format!("target_stake for {}", entry.network))
                    })
                    .transpose()?;

                Ok(NetworkSeed {
                    network: entry.network,
                    identifier: U96::from(entry.identifier),
                    max_rate,
                    target_stake,
                    network_fee: entry.network_fee,
                    operator_fee: entry.operator_fee,
                    start_from: entry.start_from,
                })
            })
            .collect()
    }
}
