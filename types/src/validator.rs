use core::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::id::{uuid_v5, VoterId};

/// A member of the voting set: an opaque public key and its voting power.
///
/// The store does not interpret the key bytes; it only derives the voter id
/// from them. Power is kept as `i64` to match the SQL column type, but is
/// never negative at a commit boundary.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub pub_key: Bytes,
    pub power: i64,
}

impl Validator {
    pub fn new(pub_key: impl Into<Bytes>, power: i64) -> Self {
        Self {
            pub_key: pub_key.into(),
            power,
        }
    }

    /// The voter's content-addressed identity.
    pub fn id(&self) -> VoterId {
        uuid_v5(&self.pub_key)
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Validator({}, power={})",
            hex::encode(&self.pub_key),
            self.power
        )
    }
}
