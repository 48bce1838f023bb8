//! Fixed-point money helpers. Every amount in the crate is a
//! [`rust_decimal::Decimal`]; floats never carry money.

mod words;

pub use words::amount_to_words;
pub(crate) use words::capitalize;

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

/// Scale used for stored amounts (rubles and kopeks).
pub const AMOUNT_SCALE: u32 = 2;
/// Scale used for derived hourly rates.
pub const RATE_SCALE: u32 = 4;

/// Round half away from zero, which is half-up for the non-negative
/// amounts this crate deals with.
pub fn round_half_up(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}

pub fn round_amount(value: Decimal) -> Decimal {
    round_half_up(value, AMOUNT_SCALE)
}

pub fn round_rate(value: Decimal) -> Decimal {
    round_half_up(value, RATE_SCALE)
}

/// Round and pad to exactly `scale` fractional digits.
pub fn fixed(value: Decimal, scale: u32) -> String {
    let mut rounded = round_half_up(value, scale);
    rounded.rescale(scale);
    rounded.to_string()
}

/// `1234567.891` → `1 234 567.89`
pub fn format_number_plain(value: Decimal) -> String {
    let text = fixed(value, AMOUNT_SCALE);
    let (sign, unsigned) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text.as_str()),
    };
    let (whole, frac) = unsigned.split_once('.').unwrap_or((unsigned, "00"));
    format!("{sign}{}.{frac}", group_thousands(whole))
}

/// `1234.5, "RUB"` → `1 234.50 RUB`
pub fn format_currency(value: Decimal, currency: &str) -> String {
    format!("{} {}", format_number_plain(value), currency)
}

/// Hours always print with two decimals: `7.5` → `7.50`.
pub fn format_hours(value: Decimal) -> String {
    fixed(value, AMOUNT_SCALE)
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            out.push(' ');
        }
        out.push(ch);
    }
    out.chars().rev().collect()
}

/// VAT regime of a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VatMode {
    #[default]
    NoVat,
    #[serde(rename = "vat_0")]
    Vat0,
    #[serde(rename = "vat_10")]
    Vat10,
    #[serde(rename = "vat_20")]
    Vat20,
}

impl VatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoVat => "no_vat",
            Self::Vat0 => "vat_0",
            Self::Vat10 => "vat_10",
            Self::Vat20 => "vat_20",
        }
    }

    pub fn rate(&self) -> Decimal {
        match self {
            Self::NoVat | Self::Vat0 => Decimal::ZERO,
            Self::Vat10 => Decimal::new(10, 2),
            Self::Vat20 => Decimal::new(20, 2),
        }
    }

    /// Modes that require a separate invoice document.
    pub fn requires_invoice(&self) -> bool {
        matches!(self, Self::Vat10 | Self::Vat20)
    }

    /// VAT on an amount, rounded half-up to kopeks.
    pub fn vat_on(&self, amount_wo_vat: Decimal) -> Decimal {
        round_amount(amount_wo_vat * self.rate())
    }
}

impl std::fmt::Display for VatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
