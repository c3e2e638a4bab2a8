//! Two-way clock-offset tracking and round-trip estimation.
//!
//! Both sides of the transport stamp packets with their local clock
//! truncated to 16 bits of milliseconds. Offsets and round trips are
//! computed in wrapping 16-bit arithmetic: a reply that crosses a
//! wraparound boundary still lands on the right small delta, and the
//! final estimate is reinterpreted as signed to keep near-zero round
//! trips meaningful in the presence of clock jitter.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::flow::FlowState;
use crate::packet::Direction;

/// Reply-timestamp sentinel: the sender has no reply to echo yet.
pub const NO_REPLY: u16 = 0xFFFF;

/// Local arrival time truncated to 16 bits of milliseconds.
pub fn truncate_millis(arrival: SystemTime) -> u16 {
    let millis = arrival
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    (millis & 0xFFFF) as u16
}

/// Record a packet's timestamp against the flow clock and, when the
/// opposite direction has already been observed, estimate the round trip.
///
/// Sets `clock_offset[direction]` from the freshest packet, then projects
/// the echoed reply timestamp back onto the local clock through the
/// opposite direction's offset. Returns `None` when the sender echoed the
/// [`NO_REPLY`] sentinel or the opposite offset is still unknown.
///
/// Only meaningful during the first capture-order pass: the estimate
/// depends on the currently freshest opposite-direction offset, which is
/// undefined out of capture order.
pub fn observe(
    state: &mut FlowState,
    direction: Direction,
    timestamp: u16,
    timestamp_reply: u16,
    local16: u16,
) -> Option<i16> {
    state.clock_offset[direction.index()] = Some(timestamp.wrapping_sub(local16));

    if timestamp_reply == NO_REPLY {
        return None;
    }

    let opposite_offset = state.clock_offset[direction.opposite().index()]?;
    let projected_send_time = timestamp_reply.wrapping_sub(opposite_offset);
    Some(local16.wrapping_sub(projected_send_time) as i16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at_millis(ms: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(ms)
    }

    #[test]
    fn truncation_wraps_at_16_bits() {
        assert_eq!(truncate_millis(at_millis(0)), 0);
        assert_eq!(truncate_millis(at_millis(65_535)), 65_535);
        assert_eq!(truncate_millis(at_millis(65_536)), 0);
        assert_eq!(truncate_millis(at_millis(65_536 + 123)), 123);
    }

    #[test]
    fn first_direction_sets_offset_without_estimate() {
        let mut state = FlowState::default();
        let rtt = observe(&mut state, Direction::ToServer, 100, NO_REPLY, 40);

        assert_eq!(rtt, None);
        assert_eq!(state.clock_offset[0], Some(60));
        assert_eq!(state.clock_offset[1], None);
    }

    #[test]
    fn reply_produces_round_trip() {
        let mut state = FlowState::default();

        // Client sends at its clock 100, arriving at local clock 1000.
        observe(&mut state, Direction::ToServer, 100, NO_REPLY, 1000);

        // Server echoes 100; its packet arrives 30 ms later on our clock.
        let rtt = observe(&mut state, Direction::ToClient, 5000, 100, 1030);
        assert_eq!(rtt, Some(30));
    }

    #[test]
    fn no_estimate_without_opposite_offset() {
        let mut state = FlowState::default();
        let rtt = observe(&mut state, Direction::ToClient, 5000, 100, 1030);
        assert_eq!(rtt, None);
    }

    #[test]
    fn estimate_survives_clock_wraparound() {
        let mut state = FlowState::default();

        // Arrival clock wraps between the two packets.
        observe(&mut state, Direction::ToServer, 200, NO_REPLY, 65_530);
        let rtt = observe(&mut state, Direction::ToClient, 9, 200, 14);

        assert_eq!(rtt, Some(20));
    }

    #[test]
    fn negative_estimate_stays_signed() {
        let mut state = FlowState::default();

        observe(&mut state, Direction::ToServer, 200, NO_REPLY, 1000);
        // Reply appears to arrive before the projected send time.
        let rtt = observe(&mut state, Direction::ToClient, 9, 200, 995);

        assert_eq!(rtt, Some(-5));
    }
}
