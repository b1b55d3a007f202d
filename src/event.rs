//! Purchase events consumed by the engine
//!
//! A `PurchaseEvent` is the opaque payload emitted by the bonding-curve market
//! for each buy. Token amounts, supplies and prices are unsigned fixed-point
//! integers; the engine never assumes a decimal scale for them.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Length of a `0x`-prefixed 20-byte hex address
const ADDRESS_LEN: usize = 42;

/// One token purchase on an artist's market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseEvent {
    pub artist_id: u64,
    pub buyer: String,
    #[serde(with = "decimal")]
    pub token_amount: u128,
    #[serde(with = "decimal")]
    pub new_supply: u128,
    #[serde(with = "decimal")]
    pub new_price: u128,
    pub block_height: u64,
    /// Unix seconds
    pub timestamp: i64,
}

impl PurchaseEvent {
    /// Parse a single JSON-encoded event.
    ///
    /// Any decode failure (negative amounts, missing fields, bad numbers) is a
    /// validation error, not a storage or internal error.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        serde_json::from_str(json)
            .map_err(|e| EngineError::Validation(format!("Malformed event payload: {}", e)))
    }

    /// Validate the event and return a copy with the buyer address in canonical case
    pub fn normalized(&self) -> Result<Self, EngineError> {
        let buyer = normalize_address(&self.buyer)?;

        if self.token_amount == 0 {
            return Err(EngineError::Validation("token amount must be positive".into()));
        }
        if self.new_supply < self.token_amount {
            return Err(EngineError::Validation(format!(
                "new supply {} is smaller than purchased amount {}",
                self.new_supply, self.token_amount
            )));
        }
        if self.timestamp < 0 {
            return Err(EngineError::Validation(format!(
                "negative timestamp {}",
                self.timestamp
            )));
        }
        if i64::try_from(self.artist_id).is_err() || i64::try_from(self.block_height).is_err() {
            return Err(EngineError::Validation(
                "artist id or block height out of storable range".into(),
            ));
        }

        Ok(Self {
            buyer,
            ..self.clone()
        })
    }

    /// Deterministic identity of this event, used to skip re-appending
    /// snapshots when the same event is delivered again.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}:{}",
            self.artist_id,
            self.block_height,
            self.timestamp,
            self.buyer.to_ascii_lowercase(),
            self.token_amount,
            self.new_supply,
            self.new_price,
        )
    }
}

/// Lowercase and check a `0x` hex wallet address
pub fn normalize_address(address: &str) -> Result<String, EngineError> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Validation("buyer address is empty".into()));
    }

    let lower = trimmed.to_ascii_lowercase();
    let well_formed = lower.len() == ADDRESS_LEN
        && lower.starts_with("0x")
        && lower[2..].chars().all(|c| c.is_ascii_hexdigit());

    if !well_formed {
        return Err(EngineError::Validation(format!(
            "buyer address is not a 20-byte hex address: {}",
            trimmed
        )));
    }
    Ok(lower)
}

/// Serde helpers for u128 amounts.
///
/// Written as decimal strings. Input may be a string or, for values that fit
/// in a u64, a plain JSON number.
pub mod decimal {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(u128::from(n)),
            Raw::Text(s) => s
                .trim()
                .parse::<u128>()
                .map_err(|e| de::Error::custom(format!("invalid unsigned amount {:?}: {}", s, e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PurchaseEvent {
        PurchaseEvent {
            artist_id: 7,
            buyer: "0xABCDEFabcdef0123456789012345678901234567".into(),
            token_amount: 1_000,
            new_supply: 10_000,
            new_price: 1_000_000_000_000_000_000,
            block_height: 42,
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn test_normalize_lowercases_buyer() {
        let event = sample().normalized().unwrap();
        assert_eq!(event.buyer, "0xabcdefabcdef0123456789012345678901234567");
        assert_eq!(event.artist_id, 7);
    }

    #[test]
    fn test_rejects_empty_buyer() {
        let mut event = sample();
        event.buyer = "   ".into();
        assert!(matches!(event.normalized(), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_rejects_short_address() {
        let mut event = sample();
        event.buyer = "0x1234".into();
        assert!(matches!(event.normalized(), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_rejects_supply_below_amount() {
        let mut event = sample();
        event.new_supply = 10;
        assert!(matches!(event.normalized(), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_rejects_zero_amount() {
        let mut event = sample();
        event.token_amount = 0;
        assert!(matches!(event.normalized(), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_json_accepts_strings_and_numbers() {
        let json = r#"{
            "artistId": 3,
            "buyer": "0x00000000000000000000000000000000000000aa",
            "tokenAmount": "500000",
            "newSupply": 10000000,
            "newPrice": "800000000000000000",
            "blockHeight": 10,
            "timestamp": 1700000000
        }"#;
        let event = PurchaseEvent::from_json(json).unwrap();
        assert_eq!(event.token_amount, 500_000);
        assert_eq!(event.new_supply, 10_000_000);
        assert_eq!(event.new_price, 800_000_000_000_000_000);
    }

    #[test]
    fn test_json_rejects_negative_amount() {
        let json = r#"{
            "artistId": 3,
            "buyer": "0x00000000000000000000000000000000000000aa",
            "tokenAmount": "-5",
            "newSupply": "100",
            "newPrice": "1",
            "blockHeight": 10,
            "timestamp": 1700000000
        }"#;
        assert!(matches!(
            PurchaseEvent::from_json(json),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_fingerprint_ignores_address_case() {
        let a = sample();
        let b = a.normalized().unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
