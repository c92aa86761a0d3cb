//! The user entity and its voting capabilities.

use crate::time::UtcMicros;
use parity_scale_codec::{Decode, Encode, Input, Output};
use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Named capabilities gating privileged voting actions.
    ///
    /// Capabilities are granted by role administration, which is outside this
    /// engine; the engine only ever consults them.
    #[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[serde(transparent)]
    pub struct Capabilities: u32 {
        /// May cast votes at all.
        const FLAG = 0b0000_0001;
        /// A positive vote by this user clears the flagged bit.
        const UNFLAG = 0b0000_0010;
        /// A negative vote by this user forces the SUSPECT state.
        const MARK_MALWARE = 0b0000_0100;
        /// May reset a blockable's policy outright.
        const RESET = 0b0000_1000;
        /// May change engine-wide settings such as installer policy.
        const CHANGE_SETTINGS = 0b0001_0000;
    }
}

impl Encode for Capabilities {
    fn encode_to<T: Output + ?Sized>(&self, dest: &mut T) {
        self.bits().encode_to(dest)
    }
}

impl Decode for Capabilities {
    fn decode<I: Input>(input: &mut I) -> Result<Self, parity_scale_codec::Error> {
        let bits = u32::decode(input)?;
        Self::from_bits(bits).ok_or_else(|| "invalid bits for Capabilities".into())
    }
}

/// A person who can cast votes.
#[derive(Encode, Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// The user's email address, lower-cased.
    pub id: String,
    /// Weight applied to this user's votes when no explicit weight is given.
    pub vote_weight: u32,
    /// Admin standing: required to vote on certificates and on blockables in
    /// admin-only states.
    pub is_admin: bool,
    pub capabilities: Capabilities,
    pub recorded_at: UtcMicros,
}

impl User {
    pub fn has_capability(&self, capability: Capabilities) -> bool {
        self.capabilities.contains(capability)
    }

    /// The user's short name: the local part of the email address. Host
    /// association on both platforms is recorded by short name.
    pub fn short_name(&self) -> &str {
        self.id.split('@').next().unwrap_or(&self.id)
    }
}
