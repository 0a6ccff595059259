use core::fmt;
use std::fmt::{Debug, Display};
use std::str::FromStr;

use diesel::backend::Backend;
use diesel::deserialize::{FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::Pg;
use diesel::serialize::ToSql;
use diesel::sql_types;
use hex::FromHex;
use quickcheck::Arbitrary;
use serde::{Deserialize, Serialize};

/// A [`serde`] and [`diesel`]-compatible wrapper around a hex-encoded byte
/// sequence with `0x` prefix. Parsing and deserializing from hex strings
/// without the `0x` prefix is also allowed.
///
/// Most code should use one of the aliases in the crate root ([`crate::B256`],
/// [`crate::Address`], [`crate::Bytes`]) rather than this type directly.
#[derive(
    Copy,
    Clone,
    Default,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    AsExpression,
    FromSqlRow,
    derive_more::From,
)]
// Fixed-length words are stored as variable-length `bytea`; the length is
// checked again when reading them back.
#[diesel(sql_type = sql_types::Binary)]
pub struct HexString<T>(pub T);

impl<T: AsRef<[u8]>> HexString<T> {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    pub fn is_zero(&self) -> bool {
        self.as_bytes().iter().all(|b| *b == 0)
    }

    /// Interprets the bytes as null-padded UTF-8 text, as used by contracts
    /// that pass short strings through `bytes32` arguments.
    pub fn trimmed_utf8(&self) -> String {
        let bytes = self.as_bytes();
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        let end = bytes.iter().rposition(|b| *b != 0).map_or(start, |i| i + 1);
        String::from_utf8_lossy(&bytes[start..end]).into_owned()
    }
}

impl HexString<[u8; 32]> {
    /// Builds a 32-byte word from a shorter big-endian value by padding it
    /// with leading zeros. Longer inputs keep their trailing 32 bytes.
    pub fn from_be_slice(bytes: &[u8]) -> Self {
        let mut word = [0u8; 32];
        let len = bytes.len().min(32);
        word[32 - len..].copy_from_slice(&bytes[bytes.len() - len..]);
        Self(word)
    }
}

impl<T: AsRef<[u8]>> Display for HexString<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0.as_ref()))
    }
}

impl<T: AsRef<[u8]>> Serialize for HexString<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(&self)
    }
}

impl<T: FromHex> FromStr for HexString<T> {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // The `0x` prefix is optional.
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        FromHex::from_hex(stripped)
            .map(Self)
            .map_err(|_| "invalid hex string")
    }
}

impl<'a, T: FromHex> Deserialize<'a> for HexString<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl<T> schemars::JsonSchema for HexString<T> {
    fn schema_name() -> String {
        "HexString".to_owned()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        gen.subschema_for::<String>()
    }
}

impl<T> ToSql<sql_types::Binary, Pg> for HexString<T>
where
    T: AsRef<[u8]> + Debug,
{
    fn to_sql<'b>(
        &'b self,
        out: &mut diesel::serialize::Output<'b, '_, Pg>,
    ) -> diesel::serialize::Result {
        ToSql::<sql_types::Binary, Pg>::to_sql(self.0.as_ref(), out)
    }
}

impl<T> FromSql<sql_types::Binary, Pg> for HexString<T>
where
    T: TryFrom<Vec<u8>>,
    T::Error: Debug,
{
    fn from_sql(bytes: <Pg as Backend>::RawValue<'_>) -> diesel::deserialize::Result<Self> {
        T::try_from(FromSql::<sql_types::Binary, Pg>::from_sql(bytes)?)
            .map(HexString)
            .map_err(|e| anyhow::anyhow!("unexpected byte length: {:?}", e).into())
    }
}

impl<T: Arbitrary> Arbitrary for HexString<T> {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        Self(T::arbitrary(g))
    }
}

#[cfg(test)]
mod tests {
    use quickcheck_macros::quickcheck;

    use super::*;

    #[quickcheck]
    fn serde_roundtrip(hex_string: HexString<Vec<u8>>) -> bool {
        let json = serde_json::to_string(&hex_string).unwrap();
        let hex_string2: HexString<Vec<u8>> = serde_json::from_str(&json).unwrap();

        hex_string == hex_string2
    }

    #[quickcheck]
    fn always_starts_with_0x(hex_string: HexString<Vec<u8>>) -> bool {
        hex_string.to_string().starts_with("0x")
    }

    #[test]
    fn decodable_without_0x() {
        let hex_string: HexString<Vec<u8>> = "deadbeef".parse().unwrap();
        assert_eq!(hex_string.to_string(), "0xdeadbeef");
    }

    #[test]
    fn fixed_length_rejects_wrong_size() {
        assert!("0xdeadbeef".parse::<HexString<[u8; 32]>>().is_err());
        assert!("0x00000000000000000000000000000000000000aa"
            .parse::<HexString<[u8; 20]>>()
            .is_ok());
    }

    #[quickcheck]
    fn trimmed_utf8_strips_null_padding(text: String) -> bool {
        let text: String = text.chars().filter(|c| *c != '\0').take(8).collect();
        let mut word = [0u8; 32];
        let bytes = text.as_bytes();
        if bytes.len() > 32 {
            return true;
        }
        word[..bytes.len()].copy_from_slice(bytes);

        HexString(word).trimmed_utf8() == text
    }

    #[test]
    fn trimmed_utf8_of_left_padded_word() {
        let word = HexString::from_be_slice(b"spot");
        assert_eq!(word.trimmed_utf8(), "spot");
        assert!(!word.is_zero());
        assert!(HexString::<[u8; 32]>::default().is_zero());
    }

    #[test]
    fn from_be_slice_pads_on_the_left() {
        let word = HexString::from_be_slice(&[0x01, 0x02]);
        assert_eq!(word.0[30..], [0x01, 0x02]);
        assert!(word.0[..30].iter().all(|b| *b == 0));
    }
}
