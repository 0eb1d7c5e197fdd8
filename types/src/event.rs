use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::id::{uuid_v5, ResolutionId};

/// An event a validator set can vote on: an opaque body tagged with a
/// registered resolution type name.
///
/// The id is content-addressed over `type_name || body`, so two producers
/// observing the same event derive the same resolution id independently.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotableEvent {
    pub type_name: String,
    pub body: Bytes,
}

impl VotableEvent {
    pub fn new(type_name: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            type_name: type_name.into(),
            body: body.into(),
        }
    }

    /// The resolution id this event resolves to.
    pub fn id(&self) -> ResolutionId {
        let mut preimage = BytesMut::with_capacity(self.type_name.len() + self.body.len());
        preimage.extend_from_slice(self.type_name.as_bytes());
        preimage.extend_from_slice(&self.body);
        uuid_v5(&preimage)
    }
}
