//! Ledger amounts and their wire representation.
//!
//! Amounts are unsigned 64-bit integers. Every JSON surface (HTTP bodies,
//! cached idempotency results, webhook payloads) carries them as decimal
//! strings so that values above 2^53 survive clients and caches that decode
//! numbers as doubles.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use super::error::{AppError, DatabaseError};

/// Ledger amount in the asset's smallest unit
pub type Amount = u64;

/// Convert a `NUMERIC(20,0)` column value into an [`Amount`].
pub fn amount_from_decimal(value: Decimal, column: &str) -> Result<Amount, AppError> {
    if value.fract() != Decimal::ZERO {
        return Err(AppError::Database(DatabaseError::Query(format!(
            "column {column} holds a fractional amount: {value}"
        ))));
    }
    value.to_u64().ok_or_else(|| {
        AppError::Database(DatabaseError::Query(format!(
            "column {column} is out of range: {value}"
        )))
    })
}

#[must_use]
pub fn amount_to_decimal(value: Amount) -> Decimal {
    Decimal::from(value)
}

/// Serde codec for `Amount` as a decimal string.
pub mod amount_string {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use super::Amount;

    pub fn serialize<S: Serializer>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<Amount>()
            .map_err(|e| D::Error::custom(format!("invalid amount '{raw}': {e}")))
    }
}

/// Serde codec for `Option<Amount>` as an optional decimal string.
pub mod option_amount_string {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use super::Amount;

    pub fn serialize<S: Serializer>(
        value: &Option<Amount>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.collect_str(v),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Amount>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|s| {
            s.parse::<Amount>()
                .map_err(|e| D::Error::custom(format!("invalid amount '{s}': {e}")))
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Holder {
        #[serde(with = "amount_string")]
        value: Amount,
        #[serde(default, with = "option_amount_string")]
        threshold: Option<Amount>,
    }

    #[test]
    fn test_large_amounts_survive_json_as_strings() {
        let holder = Holder {
            value: u64::MAX,
            threshold: Some(9_007_199_254_740_993),
        };
        let json = serde_json::to_string(&holder).unwrap();
        assert_eq!(
            json,
            r#"{"value":"18446744073709551615","threshold":"9007199254740993"}"#
        );
        let back: Holder = serde_json::from_str(&json).unwrap();
        assert_eq!(back, holder);
    }

    #[test]
    fn test_numeric_json_is_rejected() {
        let result = serde_json::from_str::<Holder>(r#"{"value":10}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_optional_amount_is_none() {
        let holder: Holder = serde_json::from_str(r#"{"value":"7"}"#).unwrap();
        assert_eq!(holder.threshold, None);
    }

    #[test]
    fn test_decimal_conversion() {
        assert_eq!(
            amount_from_decimal(amount_to_decimal(u64::MAX), "x").unwrap(),
            u64::MAX
        );
        assert!(amount_from_decimal(Decimal::new(-1, 0), "x").is_err());
        assert!(amount_from_decimal(Decimal::new(15, 1), "x").is_err());
    }
}
