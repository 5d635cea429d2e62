//! Encoding of application messages carried by `Broadcast` events.
//! Both ends of a collective must use the same codec.
use crate::error::{CollectiveError, Result};
use crate::pubsub::Message;

pub trait PayloadCodec: Send + Sync {
    fn encode(&self, message: &Message) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<Message>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode(&self, message: &Message) -> Result<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| CollectiveError::Codec(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message> {
        serde_json::from_slice(bytes).map_err(|e| CollectiveError::Codec(e.to_string()))
    }
}
