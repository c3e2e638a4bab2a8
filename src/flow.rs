//! Per-flow conversation state, scoped to one loaded capture.

use std::collections::HashMap;
use std::net::SocketAddr;

/// IP protocol number for UDP, the only transport this analyzer claims.
pub const PROTO_UDP: u8 = 17;

/// Identity of one bidirectional conversation.
///
/// Endpoints are stored in normalized order so both directions of a flow
/// resolve to the same key regardless of which endpoint sent first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowKey {
    /// IP protocol number
    pub protocol: u8,
    /// Lower endpoint after normalization
    pub endpoint_a: SocketAddr,
    /// Higher endpoint after normalization
    pub endpoint_b: SocketAddr,
}

impl FlowKey {
    /// Key for a UDP conversation between two endpoints.
    pub fn udp(first: SocketAddr, second: SocketAddr) -> Self {
        let (endpoint_a, endpoint_b) = if first <= second {
            (first, second)
        } else {
            (second, first)
        };

        Self {
            protocol: PROTO_UDP,
            endpoint_a,
            endpoint_b,
        }
    }
}

/// Mutable tracking state for one flow, indexed by direction.
///
/// Mutated exactly once per packet, during that packet's first
/// capture-order analysis; read-only on every redisplay. `None` doubles as
/// the "nothing seen yet in this direction" flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowState {
    /// Sequence counter of the latest packet per direction
    pub last_seq: [Option<u64>; 2],
    /// Truncated-clock offset per direction, from the freshest packet
    pub clock_offset: [Option<u16>; 2],
}

/// Map from flow identity to tracking state.
///
/// Lives for the duration of the loaded capture and is cleared when the
/// session closes. Lookup never re-initializes an existing record.
#[derive(Debug, Default)]
pub struct FlowTable {
    flows: HashMap<FlowKey, FlowState>,
}

impl FlowTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the state for a flow, creating it on first observation.
    pub fn get_or_create(&mut self, key: FlowKey) -> &mut FlowState {
        self.flows.entry(key).or_default()
    }

    /// Read-only lookup.
    pub fn get(&self, key: &FlowKey) -> Option<&FlowState> {
        self.flows.get(key)
    }

    /// Number of flows observed so far.
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    /// True when no flow has been observed.
    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Drop all flow state, for session close or capture reload.
    pub fn clear(&mut self) {
        self.flows.clear();
    }
}
