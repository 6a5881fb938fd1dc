//! Input policy for a registration: signature threshold, name shape, founder
//! equity and duration. Everything here is pure and runs before any
//! transaction is sent.

use std::collections::HashSet;

use alloy_primitives::Address;

use crate::errors::ValidationError;
use crate::registration::Founder;

/// 100.00% expressed in basis points.
pub const MAX_EQUITY_BPS: u32 = 10_000;

/// Upper bound on the default threshold regardless of owner count.
pub const MAX_DEFAULT_THRESHOLD: u32 = 5;

/// Shortest label the .eth registrar controller accepts.
pub const MIN_LABEL_LEN: usize = 3;

pub const SECONDS_PER_YEAR: u64 = 31_536_000;

/// Default signature threshold for a Safe with `owner_count` owners.
///
/// | owners | threshold              |
/// |--------|------------------------|
/// | 1      | 1                      |
/// | 2      | 2                      |
/// | 3..=5  | ceil(n / 2)            |
/// | 6+     | min(5, ceil(n / 2))    |
pub fn threshold_for(owner_count: usize) -> Result<u32, ValidationError> {
    match owner_count {
        0 => Err(ValidationError::InvalidOwnerCount { count: 0 }),
        1 => Ok(1),
        2 => Ok(2),
        n => {
            let half = n.div_ceil(2) as u32;
            Ok(half.min(MAX_DEFAULT_THRESHOLD))
        }
    }
}

/// Normalize a user-supplied name into a bare .eth label.
pub fn normalize_label(raw: &str) -> Result<String, ValidationError> {
    let lowered = raw.trim().to_lowercase();
    let label = lowered.strip_suffix(".eth").unwrap_or(&lowered);

    let invalid = |reason: &str| ValidationError::InvalidName {
        name: raw.to_string(),
        reason: reason.to_string(),
    };

    if label.is_empty() {
        return Err(invalid("name is empty"));
    }
    if label.contains('.') {
        return Err(invalid("subdomains are not supported"));
    }
    if label.chars().count() < MIN_LABEL_LEN {
        return Err(invalid("name must be at least 3 characters"));
    }
    if let Some(c) = label
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        return Err(invalid(&format!("character '{}' is not allowed", c)));
    }
    if label.starts_with('-') || label.ends_with('-') {
        return Err(invalid("name must not start or end with a hyphen"));
    }

    Ok(label.to_string())
}

/// Check founder addresses and equity. Order is preserved by the caller.
pub fn validate_founders(founders: &[Founder]) -> Result<(), ValidationError> {
    if founders.is_empty() {
        return Err(ValidationError::NoFounders);
    }

    let mut seen: HashSet<Address> = HashSet::with_capacity(founders.len());
    let mut total: u32 = 0;
    for founder in founders {
        if founder.address == Address::ZERO {
            return Err(ValidationError::ZeroAddressFounder);
        }
        if !seen.insert(founder.address) {
            return Err(ValidationError::DuplicateFounder {
                address: founder.address,
            });
        }
        let bps = u32::from(founder.equity_bps);
        if bps > MAX_EQUITY_BPS {
            return Err(ValidationError::FounderEquityOutOfRange {
                address: founder.address,
                equity_bps: bps,
            });
        }
        total += bps;
    }

    if total > MAX_EQUITY_BPS {
        return Err(ValidationError::EquityExceeded { total_bps: total });
    }
    Ok(())
}

pub fn validate_threshold(threshold: u32, owner_count: usize) -> Result<(), ValidationError> {
    if threshold == 0 || threshold as usize > owner_count {
        return Err(ValidationError::ThresholdOutOfRange {
            threshold,
            owners: owner_count,
        });
    }
    Ok(())
}

/// Registration duration in seconds for whole years.
pub fn duration_from_years(years: u32) -> Result<u64, ValidationError> {
    if years == 0 {
        return Err(ValidationError::InvalidDuration { years });
    }
    Ok(u64::from(years) * SECONDS_PER_YEAR)
}
