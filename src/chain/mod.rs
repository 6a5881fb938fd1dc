//! Narrow interfaces to the on-chain collaborators.
//!
//! The saga never talks to a node directly; it goes through these four traits.
//! Real implementation: [`rpc`]. Test double and local backend: [`memory`].

pub mod abi;
pub mod memory;
pub mod rpc;

use std::sync::Arc;

use alloy_primitives::{Address, B256, Bytes, U256, keccak256};
use alloy_sol_types::SolEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ChainError;
use crate::registration::Founder;

pub type TxHash = B256;

/// Parameters shared by the commit and register calls of the registrar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRequest {
    pub label: String,
    pub owner: Address,
    pub duration_secs: u64,
    pub secret: B256,
    pub resolver: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RentPrice {
    pub base: U256,
    pub premium: U256,
}

impl RentPrice {
    pub fn total(&self) -> U256 {
        self.base.saturating_add(self.premium)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub success: bool,
    pub logs: Vec<Log>,
}

/// A company entry as the registry stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyEntry {
    pub name: String,
    pub owner: Address,
    pub founders: Vec<Founder>,
    pub threshold: u32,
}

#[async_trait]
pub trait NameRegistrar: Send + Sync {
    /// Current owner of `<label>.eth`, `None` if unregistered.
    async fn owner_of(&self, label: &str) -> Result<Option<Address>, ChainError>;

    async fn commit(&self, request: &NameRequest) -> Result<TxHash, ChainError>;

    /// Reveal a matured commitment, paying `value` wei.
    async fn register(&self, request: &NameRequest, value: U256) -> Result<TxHash, ChainError>;

    async fn rent_price(&self, label: &str, duration_secs: u64) -> Result<RentPrice, ChainError>;
}

#[async_trait]
pub trait SafeFactory: Send + Sync {
    /// Counterfactual address. May read chain state, never writes.
    async fn predict_address(
        &self,
        owners: &[Address],
        threshold: u32,
        salt_nonce: U256,
    ) -> Result<Address, ChainError>;

    async fn deploy(
        &self,
        owners: &[Address],
        threshold: u32,
        salt_nonce: U256,
    ) -> Result<TxHash, ChainError>;

    /// Proxy address announced in a deployment receipt.
    fn deployed_address(&self, receipt: &Receipt) -> Option<Address>;

    async fn code_exists_at(&self, address: Address) -> Result<bool, ChainError>;
}

#[async_trait]
pub trait CompanyRegistry: Send + Sync {
    async fn company_by_name(&self, name: &str) -> Result<Option<CompanyEntry>, ChainError>;

    async fn registration_fee(&self) -> Result<U256, ChainError>;

    async fn register_company(&self, entry: &CompanyEntry, fee: U256) -> Result<TxHash, ChainError>;
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Account that signs and pays for the saga's transactions.
    fn sender(&self) -> Address;

    /// Poll until the transaction is mined or the configured timeout elapses.
    async fn wait_for_receipt(&self, tx: TxHash) -> Result<Receipt, ChainError>;

    async fn code_at(&self, address: Address) -> Result<Bytes, ChainError>;

    async fn balance_of(&self, address: Address) -> Result<U256, ChainError>;
}

/// The four collaborators one orchestrator works against.
#[derive(Clone)]
pub struct Collaborators {
    pub registrar: Arc<dyn NameRegistrar>,
    pub factory: Arc<dyn SafeFactory>,
    pub registry: Arc<dyn CompanyRegistry>,
    pub client: Arc<dyn ChainClient>,
}

impl Collaborators {
    /// Wait for `tx` and fail if it reverted.
    pub async fn confirm(&self, tx: TxHash) -> Result<Receipt, ChainError> {
        let receipt = self.client.wait_for_receipt(tx).await?;
        if !receipt.success {
            return Err(ChainError::Reverted { tx });
        }
        Ok(receipt)
    }
}

/// Proxy address from the factory's `ProxyCreation` event in `receipt`.
pub fn proxy_creation_address(factory: Address, receipt: &Receipt) -> Option<Address> {
    receipt
        .logs
        .iter()
        .filter(|log| log.address == factory)
        .find(|log| {
            log.topics.len() >= 2
                && log.topics[0] == abi::ISafeProxyFactory::ProxyCreation::SIGNATURE_HASH
        })
        .map(|log| Address::from_word(log.topics[1]))
}

pub fn labelhash(label: &str) -> B256 {
    keccak256(label.as_bytes())
}

/// ENS namehash of `<label>.eth`.
pub fn eth_namehash(label: &str) -> B256 {
    let eth_node = keccak256([[0u8; 32], keccak256("eth").0].concat());
    keccak256([eth_node.0, labelhash(label).0].concat())
}
