//! JSON-RPC adapter for an Ethereum node.
//!
//! Transactions are sent with `eth_sendTransaction` from a sender account the
//! node manages (a local dev node or a signing proxy), so no key material ever
//! reaches this process.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::OnceCell;

use super::abi::{
    ICompanyRegistry, IENSRegistry, IETHRegistrarController, INameWrapper, ISafeProxyFactory,
};
use super::{
    ChainClient, CompanyEntry, CompanyRegistry, Log, NameRegistrar, NameRequest, Receipt,
    RentPrice, SafeFactory, TxHash, eth_namehash, proxy_creation_address,
};
use crate::errors::ChainError;
use crate::registration::Founder;
use crate::safe::{SafeDeployment, predict_safe_address};

/// Addresses of the contracts the adapter calls.
#[derive(Debug, Clone)]
pub struct ContractAddresses {
    pub controller: Address,
    pub name_wrapper: Address,
    pub ens_registry: Address,
    pub company_registry: Address,
    pub safe: SafeDeployment,
}

#[derive(Debug, Clone)]
pub struct RpcSettings {
    pub url: String,
    pub sender: Address,
    pub contracts: ContractAddresses,
    pub poll_interval: Duration,
    pub receipt_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: B256,
    block_number: String,
    status: String,
    #[serde(default)]
    logs: Vec<Log>,
}

pub struct RpcChain {
    http: reqwest::Client,
    settings: RpcSettings,
    next_id: AtomicU64,
    init_code_hash: OnceCell<B256>,
}

impl RpcChain {
    pub fn new(settings: RpcSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
            next_id: AtomicU64::new(1),
            init_code_hash: OnceCell::new(),
        }
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        tracing::trace!(method, id, "JSON-RPC request");

        let response: RpcResponse = self
            .http
            .post(&self.settings.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Rpc(format!("{} failed: {}", method, e)))?
            .error_for_status()
            .map_err(|e| ChainError::Rpc(format!("{} returned error status: {}", method, e)))?
            .json()
            .await
            .map_err(|e| ChainError::Rpc(format!("{} returned malformed JSON: {}", method, e)))?;

        if let Some(err) = response.error {
            return Err(ChainError::Rpc(format!(
                "{} error {}: {}",
                method, err.code, err.message
            )));
        }
        serde_json::from_value(response.result.unwrap_or(Value::Null)).map_err(|e| {
            ChainError::Decode {
                what: format!("{} result", method),
                message: e.to_string(),
            }
        })
    }

    async fn call<C: SolCall>(&self, to: Address, call: &C) -> Result<C::Return, ChainError> {
        let data = Bytes::from(call.abi_encode());
        let raw: Bytes = self
            .request("eth_call", json!([{ "to": to, "data": data }, "latest"]))
            .await?;
        C::abi_decode_returns(&raw, true).map_err(|e| ChainError::Decode {
            what: C::SIGNATURE.to_string(),
            message: e.to_string(),
        })
    }

    async fn send<C: SolCall>(&self, to: Address, call: &C, value: U256) -> Result<TxHash, ChainError> {
        let data = Bytes::from(call.abi_encode());
        let tx: TxHash = self
            .request(
                "eth_sendTransaction",
                json!([{
                    "from": self.settings.sender,
                    "to": to,
                    "data": data,
                    "value": value,
                }]),
            )
            .await?;
        tracing::debug!(function = C::SIGNATURE, %tx, "Transaction submitted");
        Ok(tx)
    }

    /// Proxy init code hash, read from the factory once per process.
    async fn init_code_hash(&self) -> Result<B256, ChainError> {
        self.init_code_hash
            .get_or_try_init(|| async {
                let code = self
                    .call(
                        self.settings.contracts.safe.factory,
                        &ISafeProxyFactory::proxyCreationCodeCall {},
                    )
                    .await?
                    .code;
                Ok::<_, ChainError>(self.settings.contracts.safe.init_code_hash(&code))
            })
            .await
            .copied()
    }

    fn controller_args(request: &NameRequest) -> (String, Address, U256, B256, Address) {
        (
            request.label.clone(),
            request.owner,
            U256::from(request.duration_secs),
            request.secret,
            request.resolver,
        )
    }
}

fn parse_quantity(raw: &str) -> Result<u64, ChainError> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    u64::from_str_radix(digits, 16).map_err(|e| ChainError::Decode {
        what: format!("quantity '{}'", raw),
        message: e.to_string(),
    })
}

fn non_zero(address: Address) -> Option<Address> {
    (address != Address::ZERO).then_some(address)
}

#[async_trait]
impl NameRegistrar for RpcChain {
    async fn owner_of(&self, label: &str) -> Result<Option<Address>, ChainError> {
        let node = eth_namehash(label);
        let wrapped = self
            .call(
                self.settings.contracts.name_wrapper,
                &INameWrapper::ownerOfCall {
                    id: U256::from_be_bytes(node.0),
                },
            )
            .await?
            .owner;
        if let Some(owner) = non_zero(wrapped) {
            return Ok(Some(owner));
        }

        let registry_owner = self
            .call(
                self.settings.contracts.ens_registry,
                &IENSRegistry::ownerCall { node },
            )
            .await?
            .owner;
        Ok(non_zero(registry_owner))
    }

    async fn commit(&self, request: &NameRequest) -> Result<TxHash, ChainError> {
        let (name, owner, duration, secret, resolver) = Self::controller_args(request);
        let commitment = self
            .call(
                self.settings.contracts.controller,
                &IETHRegistrarController::makeCommitmentCall {
                    name,
                    owner,
                    duration,
                    secret,
                    resolver,
                    data: Vec::new(),
                    reverseRecord: false,
                    ownerControlledFuses: 0,
                },
            )
            .await?
            .commitment;

        self.send(
            self.settings.contracts.controller,
            &IETHRegistrarController::commitCall { commitment },
            U256::ZERO,
        )
        .await
    }

    async fn register(&self, request: &NameRequest, value: U256) -> Result<TxHash, ChainError> {
        let (name, owner, duration, secret, resolver) = Self::controller_args(request);
        self.send(
            self.settings.contracts.controller,
            &IETHRegistrarController::registerCall {
                name,
                owner,
                duration,
                secret,
                resolver,
                data: Vec::new(),
                reverseRecord: false,
                ownerControlledFuses: 0,
            },
            value,
        )
        .await
    }

    async fn rent_price(&self, label: &str, duration_secs: u64) -> Result<RentPrice, ChainError> {
        let price = self
            .call(
                self.settings.contracts.controller,
                &IETHRegistrarController::rentPriceCall {
                    name: label.to_string(),
                    duration: U256::from(duration_secs),
                },
            )
            .await?
            .price;
        Ok(RentPrice {
            base: price.base,
            premium: price.premium,
        })
    }
}

#[async_trait]
impl SafeFactory for RpcChain {
    async fn predict_address(
        &self,
        owners: &[Address],
        threshold: u32,
        salt_nonce: U256,
    ) -> Result<Address, ChainError> {
        let init_code_hash = self.init_code_hash().await?;
        Ok(predict_safe_address(
            &self.settings.contracts.safe,
            init_code_hash,
            owners,
            threshold,
            salt_nonce,
        ))
    }

    async fn deploy(
        &self,
        owners: &[Address],
        threshold: u32,
        salt_nonce: U256,
    ) -> Result<TxHash, ChainError> {
        let safe = &self.settings.contracts.safe;
        self.send(
            safe.factory,
            &ISafeProxyFactory::createProxyWithNonceCall {
                singleton: safe.singleton,
                initializer: safe.initializer(owners, threshold),
                saltNonce: salt_nonce,
            },
            U256::ZERO,
        )
        .await
    }

    fn deployed_address(&self, receipt: &Receipt) -> Option<Address> {
        proxy_creation_address(self.settings.contracts.safe.factory, receipt)
    }

    async fn code_exists_at(&self, address: Address) -> Result<bool, ChainError> {
        Ok(!self.code_at(address).await?.is_empty())
    }
}

#[async_trait]
impl CompanyRegistry for RpcChain {
    async fn company_by_name(&self, name: &str) -> Result<Option<CompanyEntry>, ChainError> {
        let found = self
            .call(
                self.settings.contracts.company_registry,
                &ICompanyRegistry::companyByNameCall {
                    name: name.to_string(),
                },
            )
            .await?;
        if !found.exists {
            return Ok(None);
        }
        let company = found.company;
        Ok(Some(CompanyEntry {
            name: company.name,
            owner: company.safe,
            founders: company
                .founders
                .into_iter()
                .map(|share| Founder {
                    address: share.wallet,
                    equity_bps: share.equityBps,
                    role: share.role,
                })
                .collect(),
            threshold: u32::from(company.threshold),
        }))
    }

    async fn registration_fee(&self) -> Result<U256, ChainError> {
        Ok(self
            .call(
                self.settings.contracts.company_registry,
                &ICompanyRegistry::registrationFeeCall {},
            )
            .await?
            .fee)
    }

    async fn register_company(&self, entry: &CompanyEntry, fee: U256) -> Result<TxHash, ChainError> {
        let threshold = u8::try_from(entry.threshold).map_err(|_| ChainError::Decode {
            what: "threshold".into(),
            message: format!("{} does not fit in uint8", entry.threshold),
        })?;
        let founders = entry
            .founders
            .iter()
            .map(|f| ICompanyRegistry::FounderShare {
                wallet: f.address,
                equityBps: f.equity_bps,
                role: f.role.clone(),
            })
            .collect();

        self.send(
            self.settings.contracts.company_registry,
            &ICompanyRegistry::registerCompanyCall {
                name: entry.name.clone(),
                safe: entry.owner,
                founders,
                threshold,
            },
            fee,
        )
        .await
    }
}

#[async_trait]
impl ChainClient for RpcChain {
    fn sender(&self) -> Address {
        self.settings.sender
    }

    async fn wait_for_receipt(&self, tx: TxHash) -> Result<Receipt, ChainError> {
        let deadline = tokio::time::Instant::now() + self.settings.receipt_timeout;
        loop {
            let raw: Option<RawReceipt> = self
                .request("eth_getTransactionReceipt", json!([tx]))
                .await?;
            if let Some(raw) = raw {
                return Ok(Receipt {
                    tx_hash: raw.transaction_hash,
                    block_number: parse_quantity(&raw.block_number)?,
                    success: parse_quantity(&raw.status)? == 1,
                    logs: raw.logs,
                });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ChainError::Timeout { tx });
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    async fn code_at(&self, address: Address) -> Result<Bytes, ChainError> {
        self.request("eth_getCode", json!([address, "latest"])).await
    }

    async fn balance_of(&self, address: Address) -> Result<U256, ChainError> {
        self.request("eth_getBalance", json!([address, "latest"])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x1").unwrap(), 1);
        assert_eq!(parse_quantity("0x10").unwrap(), 16);
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn test_raw_receipt_deserializes_node_shape() {
        let json = json!({
            "transactionHash": format!("0x{}", "ab".repeat(32)),
            "blockNumber": "0x2a",
            "status": "0x1",
            "gasUsed": "0x5208",
            "logs": [{
                "address": format!("0x{}", "11".repeat(20)),
                "topics": [format!("0x{}", "22".repeat(32))],
                "data": "0x",
                "logIndex": "0x0"
            }]
        });
        let raw: RawReceipt = serde_json::from_value(json).unwrap();
        assert_eq!(parse_quantity(&raw.block_number).unwrap(), 42);
        assert_eq!(raw.logs.len(), 1);
        assert_eq!(raw.logs[0].address, Address::repeat_byte(0x11));
    }

    #[test]
    fn test_non_zero_maps_zero_to_none() {
        assert_eq!(non_zero(Address::ZERO), None);
        assert_eq!(
            non_zero(Address::repeat_byte(1)),
            Some(Address::repeat_byte(1))
        );
    }
}
