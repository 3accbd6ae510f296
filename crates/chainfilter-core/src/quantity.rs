//! Ethereum quantity encoding (`0x`-prefixed, no leading zeros).
//!
//! Upstream providers are not consistent about numeric fields: some return
//! hex quantities, some decimal numerals, some bare JSON integers. Everything
//! that passes through [`Quantity`] is normalised to the canonical hex form.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A `u64` that serialises as an Ethereum hex quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Quantity(pub u64);

impl Quantity {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for Quantity {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

impl std::fmt::Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Render `n` as a hex quantity, e.g. `26` → `"0x1a"`.
pub fn to_quantity(n: u64) -> String {
    format!("{n:#x}")
}

/// Parse a hex quantity (`0x…`). Returns `None` for anything else.
pub fn parse_hex_quantity(s: &str) -> Option<u64> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Parse a numeral as upstreams render it: hex with a `0x` prefix, otherwise
/// decimal digits.
pub fn parse_numeral(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.starts_with("0x") || s.starts_with("0X") {
        parse_hex_quantity(s)
    } else if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        s.parse().ok()
    } else {
        None
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&to_quantity(self.0))
    }
}

struct QuantityVisitor;

impl<'de> Visitor<'de> for QuantityVisitor {
    type Value = Quantity;

    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("a hex quantity, decimal numeral or unsigned integer")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Quantity, E> {
        Ok(Quantity(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Quantity, E> {
        u64::try_from(v)
            .map(Quantity)
            .map_err(|_| E::custom(format!("negative quantity {v}")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Quantity, E> {
        parse_numeral(v)
            .map(Quantity)
            .ok_or_else(|| E::custom(format!("invalid quantity {v:?}")))
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(QuantityVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_without_leading_zeros() {
        assert_eq!(to_quantity(0), "0x0");
        assert_eq!(to_quantity(1), "0x1");
        assert_eq!(to_quantity(0x1a), "0x1a");
        assert_eq!(Quantity(255).to_string(), "0xff");
    }

    #[test]
    fn parses_hex_and_decimal() {
        assert_eq!(parse_numeral("0x10"), Some(16));
        assert_eq!(parse_numeral("0x0010"), Some(16));
        assert_eq!(parse_numeral("16"), Some(16));
        assert_eq!(parse_numeral("latest"), None);
        assert_eq!(parse_numeral("0x"), None);
        assert_eq!(parse_hex_quantity("16"), None);
    }

    #[test]
    fn deserialize_normalises() {
        let from_hex: Quantity = serde_json::from_str("\"0x00ff\"").unwrap();
        let from_dec: Quantity = serde_json::from_str("\"255\"").unwrap();
        let from_int: Quantity = serde_json::from_str("255").unwrap();
        assert_eq!(from_hex, Quantity(255));
        assert_eq!(from_dec, from_hex);
        assert_eq!(from_int, from_hex);
        assert_eq!(serde_json::to_string(&from_dec).unwrap(), "\"0xff\"");
    }

    #[test]
    fn rejects_negative() {
        assert!(serde_json::from_str::<Quantity>("-1").is_err());
    }
}
