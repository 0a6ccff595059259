//! Helpers shared by converters: text carried in indexed topics and
//! fixed-point numbers carried in the data payload.

use bigdecimal::num_bigint::{BigInt, Sign};
use bigdecimal::BigDecimal;
use strata_common_types::{Bytes, Topic};

/// Width of one ABI-encoded word.
pub const WORD_LEN: usize = 32;

/// Fixed-point scales used by the contracts' numeric parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    /// 27 decimals, for rates and ratios.
    Ray,
    /// 18 decimals, for token amounts.
    Wad,
}

impl Scale {
    pub fn decimals(self) -> i64 {
        match self {
            Scale::Ray => 27,
            Scale::Wad => 18,
        }
    }

    /// Interprets `word` as an unsigned big-endian integer at this scale.
    pub fn apply(self, word: &[u8]) -> BigDecimal {
        BigDecimal::new(BigInt::from_bytes_be(Sign::Plus, word), self.decimals())
    }
}

/// The trailing word of `data`, which carries the non-indexed argument. The
/// caller must have checked that `data` is at least one word long.
pub fn last_word(data: &Bytes) -> &[u8] {
    let data = data.as_bytes();
    &data[data.len().saturating_sub(WORD_LEN)..]
}

/// An indexed `bytes32` argument holding null-padded text.
pub fn topic_text(topic: &Topic) -> String {
    topic.trimmed_utf8()
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use quickcheck_macros::quickcheck;
    use strata_common_types::{HexString, B256};

    use super::*;

    #[test]
    fn ray_and_wad() {
        let word = B256::from_be_slice(&1_500_000_000_000_000_000u64.to_be_bytes());

        assert_eq!(
            Scale::Wad.apply(word.as_bytes()),
            BigDecimal::from_str("1.5").unwrap()
        );
        assert_eq!(
            Scale::Ray.apply(word.as_bytes()),
            BigDecimal::from_str("0.0000000015").unwrap()
        );
    }

    #[test]
    fn ray_of_large_value() {
        let raw = BigInt::from_str("139840000000000003410605131648").unwrap();
        let (_, bytes) = raw.to_bytes_be();
        let word = B256::from_be_slice(&bytes);

        assert_eq!(
            Scale::Ray.apply(word.as_bytes()),
            BigDecimal::from_str("139.840000000000003410605131648").unwrap()
        );
    }

    #[quickcheck]
    fn scaling_divides_by_power_of_ten(value: u64) -> bool {
        let word = B256::from_be_slice(&value.to_be_bytes());
        let scaled = Scale::Wad.apply(word.as_bytes());

        scaled * BigDecimal::from_str("1000000000000000000").unwrap() == BigDecimal::from(value)
    }

    #[test]
    fn last_word_of_longer_payload() {
        let mut data = vec![0xff; 4];
        data.extend_from_slice(&[0x01; WORD_LEN]);
        assert_eq!(last_word(&HexString(data)), &[0x01; WORD_LEN]);
    }

    #[test]
    fn topic_text_trims_padding() {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(b"fake ilk");
        assert_eq!(topic_text(&HexString(bytes)), "fake ilk");
    }
}
