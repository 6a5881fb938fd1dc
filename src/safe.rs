//! Counterfactual Safe address prediction.
//!
//! The proxy factory deploys with CREATE2, so the address depends only on the
//! factory, the singleton, the proxy creation code, the `setup` initializer
//! (owners, threshold, fallback handler) and the salt nonce. Prediction and
//! deployment must be fed identical inputs or the two addresses diverge.

use alloy_primitives::{Address, B256, Bytes, U256, address, keccak256};
use alloy_sol_types::SolCall;
use serde::{Deserialize, Serialize};

use crate::chain::abi::ISafe;
use crate::errors::ValidationError;

/// Safe 1.4.1 SafeProxyFactory.
pub const DEFAULT_PROXY_FACTORY: Address = address!("4e1dcf7ad4e460cfd30791ccc4f9c8a4f820ec67");
/// Safe 1.4.1 SafeL2 singleton.
pub const DEFAULT_SINGLETON: Address = address!("29fcb43b46531bca003ddc8fcb67ffe91900c762");
/// Safe 1.4.1 CompatibilityFallbackHandler.
pub const DEFAULT_FALLBACK_HANDLER: Address = address!("fd0732dc9e303f09fcef3a7388ad10a83459ec99");

/// Contract addresses that pin down a Safe deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeDeployment {
    pub factory: Address,
    pub singleton: Address,
    pub fallback_handler: Address,
}

impl Default for SafeDeployment {
    fn default() -> Self {
        Self {
            factory: DEFAULT_PROXY_FACTORY,
            singleton: DEFAULT_SINGLETON,
            fallback_handler: DEFAULT_FALLBACK_HANDLER,
        }
    }
}

impl SafeDeployment {
    /// ABI-encoded `setup` call the proxy is initialized with.
    pub fn initializer(&self, owners: &[Address], threshold: u32) -> Bytes {
        ISafe::setupCall {
            owners: owners.to_vec(),
            threshold: U256::from(threshold),
            to: Address::ZERO,
            data: Bytes::new(),
            fallbackHandler: self.fallback_handler,
            paymentToken: Address::ZERO,
            payment: U256::ZERO,
            paymentReceiver: Address::ZERO,
        }
        .abi_encode()
        .into()
    }

    /// `keccak256(proxyCreationCode ‖ uint256(singleton))`.
    pub fn init_code_hash(&self, proxy_creation_code: &[u8]) -> B256 {
        let mut code = proxy_creation_code.to_vec();
        code.extend_from_slice(&self.singleton.into_word().0);
        keccak256(&code)
    }
}

/// Parse the decimal salt nonce stored on a registration record.
pub fn parse_salt_nonce(salt: &str) -> Result<U256, ValidationError> {
    let invalid = || ValidationError::InvalidSaltNonce {
        salt: salt.to_string(),
    };
    if salt.is_empty() || !salt.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    U256::from_str_radix(salt, 10).map_err(|_| invalid())
}

/// Generate a fresh salt nonce for a new session.
pub fn generate_salt_nonce() -> String {
    U256::from_be_bytes(rand::random::<[u8; 32]>()).to_string()
}

/// Compute the address `createProxyWithNonce` will deploy to.
pub fn predict_safe_address(
    deployment: &SafeDeployment,
    init_code_hash: B256,
    owners: &[Address],
    threshold: u32,
    salt_nonce: U256,
) -> Address {
    let initializer = deployment.initializer(owners, threshold);
    let mut preimage = [0u8; 64];
    preimage[..32].copy_from_slice(keccak256(&initializer).as_slice());
    preimage[32..].copy_from_slice(&salt_nonce.to_be_bytes::<32>());
    let salt = keccak256(preimage);
    deployment.factory.create2(salt, init_code_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CREATION_CODE: &[u8] = &[0x60, 0x80, 0x60, 0x40, 0x52];

    fn owners(bytes: &[u8]) -> Vec<Address> {
        bytes.iter().map(|b| Address::repeat_byte(*b)).collect()
    }

    fn predict(owners: &[Address], threshold: u32, salt: u64) -> Address {
        let deployment = SafeDeployment::default();
        let hash = deployment.init_code_hash(CREATION_CODE);
        predict_safe_address(&deployment, hash, owners, threshold, U256::from(salt))
    }

    #[test]
    fn test_prediction_is_deterministic() {
        let set = owners(&[1, 2, 3]);
        assert_eq!(predict(&set, 2, 42), predict(&set, 2, 42));
    }

    #[test]
    fn test_every_input_changes_the_address() {
        let set = owners(&[1, 2, 3]);
        let base = predict(&set, 2, 42);
        assert_ne!(base, predict(&set, 2, 43), "salt");
        assert_ne!(base, predict(&set, 3, 42), "threshold");
        assert_ne!(base, predict(&owners(&[1, 2, 4]), 2, 42), "owners");
        assert_ne!(base, predict(&owners(&[3, 2, 1]), 2, 42), "owner order");
    }

    #[test]
    fn test_salt_sensitivity_over_many_owner_sets() {
        for seed in 1u8..40 {
            let count = (seed % 7) as usize + 1;
            let set: Vec<Address> = (0..count)
                .map(|i| Address::repeat_byte(seed.wrapping_mul(7).wrapping_add(i as u8) | 1))
                .collect();
            let threshold = crate::policy::threshold_for(set.len()).unwrap();
            let a = predict(&set, threshold, u64::from(seed));
            assert_eq!(a, predict(&set, threshold, u64::from(seed)));
            assert_ne!(a, predict(&set, threshold, u64::from(seed) + 1000));
        }
    }

    #[test]
    fn test_initializer_starts_with_setup_selector() {
        let init = SafeDeployment::default().initializer(&owners(&[1]), 1);
        assert_eq!(&init[..4], &ISafe::setupCall::SELECTOR);
    }

    #[test]
    fn test_parse_salt_nonce() {
        assert_eq!(parse_salt_nonce("42").unwrap(), U256::from(42));
        assert!(parse_salt_nonce("").is_err());
        assert!(parse_salt_nonce("0x2a").is_err());
        assert!(parse_salt_nonce("-1").is_err());
    }

    #[test]
    fn test_generated_salt_nonce_parses() {
        let salt = generate_salt_nonce();
        parse_salt_nonce(&salt).unwrap();
        assert_ne!(salt, generate_salt_nonce());
    }
}
