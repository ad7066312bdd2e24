pub type Amount = u128;

pub const TOKEN_DECIMALS: u32 = 18;
pub const TOKEN_SCALE: Amount = 1_000_000_000_000_000_000; // 1 GRO = 1e18 units

/// 0.05 ether in wei.
pub const DEFAULT_MIN_AMOUNT_WEI: Amount = 50_000_000_000_000_000;

/// Whole tokens to base units, `None` on overflow.
pub fn to_base_units(tokens: Amount) -> Option<Amount> {
    tokens.checked_mul(TOKEN_SCALE)
}

/// Amounts cross the wire and the disk as decimal strings; JSON numbers are
/// accepted on input too.
pub mod dec {
    use std::fmt;

    use serde::{
        de::{self, Visitor},
        Deserializer, Serializer,
    };

    use super::Amount;

    pub fn serialize<S>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Amount, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(AmountVisitor)
    }

    struct AmountVisitor;

    impl<'de> Visitor<'de> for AmountVisitor {
        type Value = Amount;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an unsigned integer or a decimal string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
            Ok(v as Amount)
        }

        fn visit_u128<E: de::Error>(self, v: u128) -> Result<Amount, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
            Amount::try_from(v).map_err(|_| E::custom("amount must not be negative"))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
            v.trim().parse().map_err(E::custom)
        }
    }
}

/// Maps whose values are amounts, encoded with [`dec`].
pub mod dec_map {
    use std::collections::BTreeMap;

    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};

    use super::Amount;

    pub fn serialize<K, S>(value: &BTreeMap<K, Amount>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Serialize + Ord,
        S: Serializer,
    {
        let encoded: BTreeMap<&K, String> = value.iter().map(|(k, v)| (k, v.to_string())).collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, K, D>(deserializer: D) -> Result<BTreeMap<K, Amount>, D::Error>
    where
        K: Deserialize<'de> + Ord,
        D: Deserializer<'de>,
    {
        let encoded = BTreeMap::<K, String>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|(k, v)| v.parse::<Amount>().map(|amount| (k, amount)).map_err(D::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Wrapped {
        #[serde(with = "dec")]
        value: Amount,
    }

    #[test]
    fn amounts_beyond_u64_survive_json() {
        let cap = 950_000_000 * TOKEN_SCALE;
        let json = serde_json::to_string(&Wrapped { value: cap }).unwrap();
        assert_eq!(json, r#"{"value":"950000000000000000000000000"}"#);
        let back: Wrapped = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value, cap);
    }

    #[test]
    fn accepts_plain_numbers_and_rejects_negative() {
        let w: Wrapped = serde_json::from_str(r#"{"value":10000}"#).unwrap();
        assert_eq!(w.value, 10_000);
        assert!(serde_json::from_str::<Wrapped>(r#"{"value":-1}"#).is_err());
        assert!(serde_json::from_str::<Wrapped>(r#"{"value":"1x"}"#).is_err());
    }

    #[test]
    fn scaling_detects_overflow() {
        assert_eq!(to_base_units(550), Some(550 * TOKEN_SCALE));
        assert_eq!(to_base_units(Amount::MAX), None);
    }
}
