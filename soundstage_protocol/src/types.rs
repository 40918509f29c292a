// Core ID types for the relay protocol.
//
// The relay assigns each live transport connection a compact integer handle.
// Handles are never reused within one relay process, so a device that drops
// and reconnects shows up under a fresh ID and the old one is forgotten.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Relay-assigned connection handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
