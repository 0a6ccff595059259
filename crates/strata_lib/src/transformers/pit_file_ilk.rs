//! `file(bytes32 ilk, bytes32 what, uint256 data)` on the pit contract.

use strata_common_types::{RawLog, Topic, B256};
use strata_store::PitFileIlk;

use super::converter::{Converter, DecodeError, EventSchema};
use super::decoding::{last_word, topic_text, Scale, WORD_LEN};

const EVENT: &str = "pit_file_ilk";

/// One decoded log, before the numeric payload is scaled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PitFileIlkEntity {
    pub ilk: String,
    pub what: String,
    pub data: B256,
    pub tx_index: u32,
    pub log_index: u32,
    pub raw_log: RawLog,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PitFileIlkConverter;

impl PitFileIlkConverter {
    fn scale_of(entity: &PitFileIlkEntity) -> Result<Scale, DecodeError> {
        match entity.what.as_str() {
            "spot" => Ok(Scale::Ray),
            "line" => Ok(Scale::Wad),
            _ => Err(DecodeError::UnknownScale {
                event: EVENT,
                log_index: entity.log_index,
                what: entity.what.clone(),
            }),
        }
    }
}

impl Converter for PitFileIlkConverter {
    type Entity = PitFileIlkEntity;
    type Model = PitFileIlk;

    fn schema(&self, signature: Topic) -> EventSchema {
        EventSchema {
            name: EVENT,
            signature,
            // signature, sender, ilk, what
            min_topics: 4,
            min_data_len: WORD_LEN,
        }
    }

    fn to_entities(
        &self,
        schema: &EventSchema,
        logs: &[RawLog],
    ) -> Result<Vec<PitFileIlkEntity>, DecodeError> {
        logs.iter()
            .map(|log| {
                schema.verify(log)?;
                Ok(PitFileIlkEntity {
                    ilk: topic_text(&log.topics[2]),
                    what: topic_text(&log.topics[3]),
                    data: B256::from_be_slice(last_word(&log.data)),
                    tx_index: log.transaction_index,
                    log_index: log.log_index,
                    raw_log: log.clone(),
                })
            })
            .collect()
    }

    fn to_models(&self, entities: Vec<PitFileIlkEntity>) -> Result<Vec<PitFileIlk>, DecodeError> {
        entities
            .into_iter()
            .map(|entity| {
                let scale = Self::scale_of(&entity)?;
                let (tx_index, log_index) = super::positions(EVENT, &entity.raw_log)?;
                Ok(PitFileIlk {
                    data: scale.apply(entity.data.as_bytes()),
                    raw_log: serde_json::to_value(&entity.raw_log)?,
                    ilk: entity.ilk,
                    what: entity.what,
                    tx_index,
                    log_index,
                })
            })
            .collect()
    }
}
