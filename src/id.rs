use std::fmt::{self, Display};
use uuid::Uuid;

/// A 128-bit random identifier assigned to every endpoint and session at
/// creation. Immutable for the lifetime of its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(Uuid);

impl EndpointId {
    pub fn random() -> Self {
        EndpointId(Uuid::new_v4())
    }
}

impl Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for EndpointId {
    fn default() -> Self {
        Self::random()
    }
}
