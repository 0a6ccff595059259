use strata_common_types::{RawLog, Topic};
use thiserror::Error;

/// Shape of the logs of one contract event: what every log must look like
/// before a [`Converter`] attempts to decode it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSchema {
    pub name: &'static str,
    /// Hash of the event signature, carried as the first topic.
    pub signature: Topic,
    /// Including the signature topic.
    pub min_topics: usize,
    pub min_data_len: usize,
}

impl EventSchema {
    pub fn verify(&self, log: &RawLog) -> Result<(), DecodeError> {
        if log.topics.len() < self.min_topics {
            return Err(DecodeError::MissingTopics {
                event: self.name,
                log_index: log.log_index,
                expected: self.min_topics,
                found: log.topics.len(),
            });
        }
        if log.topics.first() != Some(&self.signature) {
            return Err(DecodeError::UnexpectedSignature {
                event: self.name,
                log_index: log.log_index,
            });
        }
        if log.data.0.len() < self.min_data_len {
            return Err(DecodeError::ShortData {
                event: self.name,
                log_index: log.log_index,
                expected: self.min_data_len,
                found: log.data.0.len(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("{event} log {log_index} has {found} topics, at least {expected} are required")]
    MissingTopics {
        event: &'static str,
        log_index: u32,
        expected: usize,
        found: usize,
    },
    #[error("{event} log {log_index} has a different event signature")]
    UnexpectedSignature { event: &'static str, log_index: u32 },
    #[error("{event} log {log_index} has {found} bytes of data, at least {expected} are required")]
    ShortData {
        event: &'static str,
        log_index: u32,
        expected: usize,
        found: usize,
    },
    #[error("{event} log {log_index} changes '{what}', which has no known scale")]
    UnknownScale {
        event: &'static str,
        log_index: u32,
        what: String,
    },
    #[error("{event} log {log_index} doesn't fit the event table: {reason}")]
    OutOfRange {
        event: &'static str,
        log_index: u32,
        reason: String,
    },
    #[error("failed to encode raw log: {0}")]
    RawLog(#[from] serde_json::Error),
}

/// Decodes the raw logs of one contract event, first into entities that
/// mirror the event's arguments, then into models that can be persisted.
///
/// A converter is bound to an orchestrator when the latter is built, so
/// every log the orchestrator sees goes through the same, statically known
/// decoder.
pub trait Converter: Send + Sync {
    type Entity: Send;
    type Model: Send + Sync;

    /// The schema of this event for the given signature hash.
    fn schema(&self, signature: Topic) -> EventSchema;

    /// Fails on the first log that doesn't match `schema`, in which case
    /// none of the logs must be persisted.
    fn to_entities(
        &self,
        schema: &EventSchema,
        logs: &[RawLog],
    ) -> Result<Vec<Self::Entity>, DecodeError>;

    fn to_models(&self, entities: Vec<Self::Entity>) -> Result<Vec<Self::Model>, DecodeError>;
}
