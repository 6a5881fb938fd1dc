//! An in-process chain that plays all four collaborators.
//!
//! It keeps just enough state to make the saga's reconciliation meaningful:
//! name owners, matured commitments, deployed code, registry entries and
//! receipts. Faults can be queued per operation to exercise retry paths.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use alloy_primitives::{Address, B256, Bytes, U256, keccak256};
use alloy_sol_types::{SolEvent, SolValue};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::abi::ISafeProxyFactory;
use super::{
    ChainClient, CompanyEntry, CompanyRegistry, Log, NameRegistrar, NameRequest, Receipt,
    RentPrice, SafeFactory, TxHash, labelhash, proxy_creation_address,
};
use crate::clock::Clock;
use crate::errors::ChainError;
use crate::safe::{SafeDeployment, predict_safe_address};

/// Stand-in proxy creation code; only its hash matters for prediction.
pub const PROXY_CREATION_CODE: &[u8] = &[
    0x60, 0x80, 0x60, 0x40, 0x52, 0x34, 0x80, 0x15, 0x61, 0x00, 0x10, 0x57, 0x60, 0x00, 0x80,
    0xfd,
];

/// Chain operations a fault can be queued against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    OwnerOf,
    Commit,
    Register,
    RentPrice,
    PredictAddress,
    Deploy,
    CodeExists,
    CompanyByName,
    RegistrationFee,
    RegisterCompany,
    WaitForReceipt,
    Balance,
}

#[derive(Debug, Clone)]
pub struct MemoryChainSettings {
    pub min_commitment_age: Duration,
    pub base_price: U256,
    pub premium: U256,
    pub registry_fee: U256,
    pub sender: Address,
    pub sender_balance: U256,
    pub deployment: SafeDeployment,
}

impl Default for MemoryChainSettings {
    fn default() -> Self {
        Self {
            min_commitment_age: Duration::seconds(60),
            base_price: U256::from(3_000_000_000_000_000u64),
            premium: U256::ZERO,
            registry_fee: U256::from(1_000_000_000_000_000u64),
            sender: Address::repeat_byte(0xee),
            sender_balance: U256::from(10u64).pow(U256::from(21u64)),
            deployment: SafeDeployment::default(),
        }
    }
}

#[derive(Default)]
struct ChainState {
    block: u64,
    names: HashMap<String, Address>,
    commitments: HashMap<B256, DateTime<Utc>>,
    code: HashSet<Address>,
    companies: HashMap<String, CompanyEntry>,
    receipts: HashMap<TxHash, Receipt>,
    balances: HashMap<Address, U256>,
    faults: HashMap<Op, VecDeque<ChainError>>,
    deploy_redirect: Option<Address>,
    register_redirect: Option<Address>,
    company_race: Option<CompanyEntry>,
    submitted: Vec<(Op, TxHash)>,
}

/// Shared handle to the simulated chain. Clones see the same state.
#[derive(Clone)]
pub struct InMemoryChain {
    state: Arc<Mutex<ChainState>>,
    settings: Arc<MemoryChainSettings>,
    clock: Arc<dyn Clock>,
}

impl InMemoryChain {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_settings(clock, MemoryChainSettings::default())
    }

    pub fn with_settings(clock: Arc<dyn Clock>, settings: MemoryChainSettings) -> Self {
        let mut state = ChainState::default();
        state
            .balances
            .insert(settings.sender, settings.sender_balance);
        Self {
            state: Arc::new(Mutex::new(state)),
            settings: Arc::new(settings),
            clock,
        }
    }

    pub fn settings(&self) -> &MemoryChainSettings {
        &self.settings
    }

    /// Make the next call of `op` fail with `error`.
    pub fn fail_next(&self, op: Op, error: ChainError) {
        self.lock().faults.entry(op).or_default().push_back(error);
    }

    /// Give `<label>.eth` to `owner` outside of the saga.
    pub fn set_name_owner(&self, label: &str, owner: Address) {
        self.lock().names.insert(label.to_string(), owner);
    }

    pub fn name_owner(&self, label: &str) -> Option<Address> {
        self.lock().names.get(label).copied()
    }

    /// Write a registry entry outside of the saga.
    pub fn insert_company(&self, entry: CompanyEntry) {
        self.lock().companies.insert(entry.name.clone(), entry);
    }

    pub fn company(&self, name: &str) -> Option<CompanyEntry> {
        self.lock().companies.get(name).cloned()
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.lock().balances.insert(address, balance);
    }

    pub fn deploy_code(&self, address: Address) {
        self.lock().code.insert(address);
    }

    /// The next deployment lands at `address` instead of the CREATE2 target.
    pub fn redirect_next_deployment(&self, address: Address) {
        self.lock().deploy_redirect = Some(address);
    }

    /// The next successful reveal assigns the name to `owner`.
    pub fn redirect_next_registration(&self, owner: Address) {
        self.lock().register_redirect = Some(owner);
    }

    /// Another actor's registry write lands just before our next one.
    pub fn race_next_company_write(&self, winner: CompanyEntry) {
        self.lock().company_race = Some(winner);
    }

    /// Every transaction submitted so far, in order.
    pub fn submitted(&self) -> Vec<(Op, TxHash)> {
        self.lock().submitted.clone()
    }

    pub fn transaction_count(&self) -> usize {
        self.lock().submitted.len()
    }

    pub fn count_of(&self, op: Op) -> usize {
        self.lock().submitted.iter().filter(|(o, _)| *o == op).count()
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_fault(state: &mut ChainState, op: Op) -> Result<(), ChainError> {
        match state.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn init_code_hash(&self) -> B256 {
        self.settings.deployment.init_code_hash(PROXY_CREATION_CODE)
    }

    /// Record a mined transaction and return its hash.
    fn mine(state: &mut ChainState, op: Op, success: bool, logs: Vec<Log>) -> TxHash {
        state.block += 1;
        let tx = keccak256(
            [
                state.block.to_be_bytes().as_slice(),
                format!("{:?}", op).as_bytes(),
            ]
            .concat(),
        );
        state.receipts.insert(
            tx,
            Receipt {
                tx_hash: tx,
                block_number: state.block,
                success,
                logs,
            },
        );
        state.submitted.push((op, tx));
        tx
    }

    fn charge(state: &mut ChainState, payer: Address, value: U256) -> bool {
        let balance = state.balances.entry(payer).or_default();
        if *balance < value {
            return false;
        }
        *balance -= value;
        true
    }
}

fn commitment_hash(request: &NameRequest) -> B256 {
    keccak256(
        (
            labelhash(&request.label),
            request.owner,
            U256::from(request.duration_secs),
            request.secret,
            request.resolver,
        )
            .abi_encode(),
    )
}

#[async_trait]
impl NameRegistrar for InMemoryChain {
    async fn owner_of(&self, label: &str) -> Result<Option<Address>, ChainError> {
        let mut state = self.lock();
        Self::take_fault(&mut state, Op::OwnerOf)?;
        Ok(state.names.get(label).copied())
    }

    async fn commit(&self, request: &NameRequest) -> Result<TxHash, ChainError> {
        tokio::task::yield_now().await;
        let now = self.clock.now();
        let mut state = self.lock();
        Self::take_fault(&mut state, Op::Commit)?;
        state.commitments.insert(commitment_hash(request), now);
        Ok(Self::mine(&mut state, Op::Commit, true, Vec::new()))
    }

    async fn register(&self, request: &NameRequest, value: U256) -> Result<TxHash, ChainError> {
        tokio::task::yield_now().await;
        let now = self.clock.now();
        let sender = self.settings.sender;
        let price = self.settings.base_price + self.settings.premium;
        let min_age = self.settings.min_commitment_age;

        let mut state = self.lock();
        Self::take_fault(&mut state, Op::Register)?;

        let matured = state
            .commitments
            .get(&commitment_hash(request))
            .is_some_and(|at| now - *at >= min_age);
        let ok = matured
            && value >= price
            && !state.names.contains_key(&request.label)
            && Self::charge(&mut state, sender, value);

        if ok {
            let owner = state.register_redirect.take().unwrap_or(request.owner);
            state.names.insert(request.label.clone(), owner);
            state.commitments.remove(&commitment_hash(request));
        }
        Ok(Self::mine(&mut state, Op::Register, ok, Vec::new()))
    }

    async fn rent_price(&self, _label: &str, _duration_secs: u64) -> Result<RentPrice, ChainError> {
        let mut state = self.lock();
        Self::take_fault(&mut state, Op::RentPrice)?;
        Ok(RentPrice {
            base: self.settings.base_price,
            premium: self.settings.premium,
        })
    }
}

#[async_trait]
impl SafeFactory for InMemoryChain {
    async fn predict_address(
        &self,
        owners: &[Address],
        threshold: u32,
        salt_nonce: U256,
    ) -> Result<Address, ChainError> {
        Self::take_fault(&mut self.lock(), Op::PredictAddress)?;
        Ok(predict_safe_address(
            &self.settings.deployment,
            self.init_code_hash(),
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
        tokio::task::yield_now().await;
        let target = predict_safe_address(
            &self.settings.deployment,
            self.init_code_hash(),
            owners,
            threshold,
            salt_nonce,
        );
        let deployment = self.settings.deployment;

        let mut state = self.lock();
        Self::take_fault(&mut state, Op::Deploy)?;

        let proxy = state.deploy_redirect.take().unwrap_or(target);
        if state.code.contains(&proxy) {
            return Ok(Self::mine(&mut state, Op::Deploy, false, Vec::new()));
        }
        state.code.insert(proxy);
        let log = Log {
            address: deployment.factory,
            topics: vec![
                ISafeProxyFactory::ProxyCreation::SIGNATURE_HASH,
                proxy.into_word(),
            ],
            data: Bytes::from(deployment.singleton.into_word().to_vec()),
        };
        Ok(Self::mine(&mut state, Op::Deploy, true, vec![log]))
    }

    fn deployed_address(&self, receipt: &Receipt) -> Option<Address> {
        proxy_creation_address(self.settings.deployment.factory, receipt)
    }

    async fn code_exists_at(&self, address: Address) -> Result<bool, ChainError> {
        let mut state = self.lock();
        Self::take_fault(&mut state, Op::CodeExists)?;
        Ok(state.code.contains(&address))
    }
}

#[async_trait]
impl CompanyRegistry for InMemoryChain {
    async fn company_by_name(&self, name: &str) -> Result<Option<CompanyEntry>, ChainError> {
        let mut state = self.lock();
        Self::take_fault(&mut state, Op::CompanyByName)?;
        Ok(state.companies.get(name).cloned())
    }

    async fn registration_fee(&self) -> Result<U256, ChainError> {
        let mut state = self.lock();
        Self::take_fault(&mut state, Op::RegistrationFee)?;
        Ok(self.settings.registry_fee)
    }

    async fn register_company(&self, entry: &CompanyEntry, fee: U256) -> Result<TxHash, ChainError> {
        tokio::task::yield_now().await;
        let sender = self.settings.sender;
        let required = self.settings.registry_fee;

        let mut state = self.lock();
        Self::take_fault(&mut state, Op::RegisterCompany)?;
        if let Some(winner) = state.company_race.take() {
            state.companies.insert(winner.name.clone(), winner);
        }

        let ok = fee >= required
            && !state.companies.contains_key(&entry.name)
            && Self::charge(&mut state, sender, fee);
        if ok {
            state.companies.insert(entry.name.clone(), entry.clone());
        }
        Ok(Self::mine(&mut state, Op::RegisterCompany, ok, Vec::new()))
    }
}

#[async_trait]
impl ChainClient for InMemoryChain {
    fn sender(&self) -> Address {
        self.settings.sender
    }

    async fn wait_for_receipt(&self, tx: TxHash) -> Result<Receipt, ChainError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        Self::take_fault(&mut state, Op::WaitForReceipt)?;
        state
            .receipts
            .get(&tx)
            .cloned()
            .ok_or(ChainError::Timeout { tx })
    }

    async fn code_at(&self, address: Address) -> Result<Bytes, ChainError> {
        let state = self.lock();
        Ok(if state.code.contains(&address) {
            Bytes::from_static(PROXY_CREATION_CODE)
        } else {
            Bytes::new()
        })
    }

    async fn balance_of(&self, address: Address) -> Result<U256, ChainError> {
        let mut state = self.lock();
        Self::take_fault(&mut state, Op::Balance)?;
        Ok(state.balances.get(&address).copied().unwrap_or_default())
    }
}
