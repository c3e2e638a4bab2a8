//! Feed the analyzer a mix of good and damaged packets, then dump the
//! session counters.

use std::net::SocketAddr;
use std::time::{Duration, UNIX_EPOCH};

use termtap::crypto::{CipherContext, SessionKey};
use termtap::packet::{Direction, WireHeader, HEADER_LEN};
use termtap::record::FRAGMENT_COMPLETE;
use termtap::session::{PacketInput, Session, SessionConfig};

fn packet(sequence: u64, combined: u16) -> Vec<u8> {
    let mut plaintext = Vec::new();
    plaintext.extend_from_slice(&0u16.to_be_bytes());
    plaintext.extend_from_slice(&0xFFFFu16.to_be_bytes());
    plaintext.extend_from_slice(&sequence.to_be_bytes());
    plaintext.extend_from_slice(&combined.to_be_bytes());
    plaintext.extend_from_slice(&[0x03, 0x00]);

    let key = SessionKey::new([0u8; 16]);
    let sealed = CipherContext::new(&key, sequence)
        .and_then(|ctx| ctx.seal(&plaintext))
        .expect("seal");

    let mut bytes = vec![0u8; HEADER_LEN];
    WireHeader {
        direction: Direction::ToServer,
        sequence,
    }
    .encode(&mut bytes)
    .expect("header");
    bytes.extend_from_slice(&sealed);
    bytes
}

fn main() {
    let mut session = Session::new(&SessionConfig {
        key: Some("AAAAAAAAAAAAAAAAAAAAAA".to_string()),
    });

    let client: SocketAddr = "192.0.2.10:60001".parse().expect("addr");
    let server: SocketAddr = "192.0.2.20:60002".parse().expect("addr");

    let mut capture = vec![
        packet(1, FRAGMENT_COMPLETE),
        packet(2, FRAGMENT_COMPLETE),
        packet(3, 0x0002),
    ];
    // Damage the second packet's tag.
    let last = capture[1].len() - 1;
    capture[1][last] ^= 0xFF;

    for (index, bytes) in capture.iter().enumerate() {
        let _ = session.dissect(&PacketInput {
            bytes,
            source: client,
            destination: server,
            index,
            arrival: UNIX_EPOCH + Duration::from_millis(1000 + index as u64 * 20),
        });
    }

    eprintln!("{}", session.metrics.export_metrics());
}
