//! Conversion of decimal user input into the ledger's base unit.

use alloy::primitives::{U256, utils::parse_units};
use thiserror::Error;

/// Decimals between ether and wei.
pub const ETHER_DECIMALS: u8 = 18;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,
    #[error("negative amount {0:?}")]
    Negative(String),
    #[error("{input:?} has more than {decimals} fractional digits")]
    TooPrecise { input: String, decimals: u8 },
    #[error("{0:?} is not a decimal number")]
    Malformed(String),
    #[error("{0:?} does not fit in 256 bits")]
    Overflow(String),
}

/// Converts `"1.5"` with 18 decimals into `1500000000000000000`, exactly.
pub fn to_base_units(input: &str, decimals: u8) -> Result<U256, AmountError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AmountError::Empty);
    }
    if input.starts_with('-') {
        return Err(AmountError::Negative(input.to_string()));
    }

    let (whole, fraction) = input.split_once('.').unwrap_or((input, ""));
    let is_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !is_digits(whole) || !is_digits(fraction) {
        return Err(AmountError::Malformed(input.to_string()));
    }
    if fraction.len() > decimals as usize {
        return Err(AmountError::TooPrecise {
            input: input.to_string(),
            decimals,
        });
    }

    let normalized = match (whole.is_empty(), fraction.is_empty()) {
        (true, _) => format!("0.{fraction}"),
        (false, true) => whole.to_string(),
        (false, false) => format!("{whole}.{fraction}"),
    };
    parse_units(&normalized, decimals)
        .map(|parsed| parsed.get_absolute())
        .map_err(|_| AmountError::Overflow(input.to_string()))
}

pub fn ether_to_wei(input: &str) -> Result<U256, AmountError> {
    to_base_units(input, ETHER_DECIMALS)
}
