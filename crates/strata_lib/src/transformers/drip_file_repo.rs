//! `file(bytes32 what, uint256 data)` on the drip contract.

use strata_common_types::{RawLog, Topic, B256};
use strata_store::DripFileRepo;

use super::converter::{Converter, DecodeError, EventSchema};
use super::decoding::{last_word, topic_text, Scale, WORD_LEN};

const EVENT: &str = "drip_file_repo";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DripFileRepoEntity {
    pub what: String,
    pub data: B256,
    pub log_index: u32,
    pub raw_log: RawLog,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DripFileRepoConverter;

impl Converter for DripFileRepoConverter {
    type Entity = DripFileRepoEntity;
    type Model = DripFileRepo;

    fn schema(&self, signature: Topic) -> EventSchema {
        EventSchema {
            name: EVENT,
            signature,
            // signature, sender, what
            min_topics: 3,
            min_data_len: WORD_LEN,
        }
    }

    fn to_entities(
        &self,
        schema: &EventSchema,
        logs: &[RawLog],
    ) -> Result<Vec<DripFileRepoEntity>, DecodeError> {
        logs.iter()
            .map(|log| {
                schema.verify(log)?;
                Ok(DripFileRepoEntity {
                    what: topic_text(&log.topics[2]),
                    data: B256::from_be_slice(last_word(&log.data)),
                    log_index: log.log_index,
                    raw_log: log.clone(),
                })
            })
            .collect()
    }

    fn to_models(
        &self,
        entities: Vec<DripFileRepoEntity>,
    ) -> Result<Vec<DripFileRepo>, DecodeError> {
        entities
            .into_iter()
            .map(|entity| {
                if entity.what != "repo" {
                    return Err(DecodeError::UnknownScale {
                        event: EVENT,
                        log_index: entity.log_index,
                        what: entity.what,
                    });
                }
                let (tx_index, log_index) = super::positions(EVENT, &entity.raw_log)?;
                Ok(DripFileRepo {
                    data: Scale::Ray.apply(entity.data.as_bytes()),
                    raw_log: serde_json::to_value(&entity.raw_log)?,
                    what: entity.what,
                    tx_index,
                    log_index,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use bigdecimal::BigDecimal;
    use strata_common_types::HexString;

    use super::*;
    use crate::test_utils::{hash, text_topic};

    fn log(what: &str, value: u64) -> RawLog {
        RawLog {
            address: HexString([0xbb; 20]),
            topics: vec![HexString([0x29; 32]), HexString([0x11; 32]), text_topic(what)],
            data: HexString(B256::from_be_slice(&value.to_be_bytes()).as_bytes().to_vec()),
            block_number: 4,
            block_hash: hash(4, 0),
            transaction_hash: hash(4, 9),
            transaction_index: 0,
            log_index: 1,
            removed: false,
        }
    }

    fn decode(logs: &[RawLog]) -> Result<Vec<DripFileRepo>, DecodeError> {
        let converter = DripFileRepoConverter;
        let schema = converter.schema(HexString([0x29; 32]));
        converter.to_models(converter.to_entities(&schema, logs)?)
    }

    #[test]
    fn repo_is_a_ray() {
        let models = decode(&[log("repo", 5_000_000)]).unwrap();

        assert_eq!(models[0].what, "repo");
        assert_eq!(
            models[0].data,
            BigDecimal::from_str("0.000000000000000000005").unwrap()
        );
        assert_eq!(models[0].log_index, 1);
    }

    #[test]
    fn other_parameters_are_rejected() {
        assert!(matches!(
            decode(&[log("vow", 1)]),
            Err(DecodeError::UnknownScale { .. })
        ));
    }

    #[test]
    fn wrong_signature_is_rejected() {
        let mut wrong = log("repo", 1);
        wrong.topics[0] = HexString([0x01; 32]);
        assert!(matches!(
            decode(&[wrong]),
            Err(DecodeError::UnexpectedSignature { .. })
        ));
    }
}
