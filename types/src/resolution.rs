use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::id::ResolutionId;
use crate::validator::Validator;

/// A fully decoded resolution as read back from the store.
///
/// `body`, `type_name` and `proposer` are all `None` for a resolution that
/// was approved before anyone proposed its body; they are filled together by
/// the create path and never change afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub id: ResolutionId,

    /// Opaque payload supplied by the proposer. Set exactly once.
    pub body: Option<Bytes>,

    /// Registered resolution type name. Null until a body arrives.
    pub type_name: Option<String>,

    /// Block height past which the resolution is eligible for expiry.
    pub expiration_height: i64,

    /// Sum of the powers of all validators that approved this resolution.
    pub approved_power: i64,

    /// The validators that approved this resolution, with their powers.
    pub voters: Vec<Validator>,

    /// Public key of the party that attached the body, if any.
    pub proposer: Option<Bytes>,

    /// True when the proposer had already approved the id before proposing
    /// the body. Downstream reward accounting needs to refund both
    /// transactions in that case.
    pub double_proposer_vote: bool,
}
