//! Walk a small synthetic capture through the analyzer and print what the
//! host framework would render.

use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use flate2::read::DeflateEncoder;
use flate2::Compression;
use parking_lot::Mutex;

use termtap::crypto::{CipherContext, SessionKey};
use termtap::packet::{Direction, WireHeader, HEADER_LEN};
use termtap::record::FRAGMENT_COMPLETE;
use termtap::session::{PacketInput, Session, SessionConfig};

fn encrypted_packet(direction: Direction, sequence: u64, timestamp: u16, reply: u16, message: &[u8]) -> Vec<u8> {
    let mut compressed = Vec::new();
    DeflateEncoder::new(message, Compression::default())
        .read_to_end(&mut compressed)
        .expect("deflate");

    let mut plaintext = Vec::new();
    plaintext.extend_from_slice(&timestamp.to_be_bytes());
    plaintext.extend_from_slice(&reply.to_be_bytes());
    plaintext.extend_from_slice(&sequence.to_be_bytes());
    plaintext.extend_from_slice(&FRAGMENT_COMPLETE.to_be_bytes());
    plaintext.extend_from_slice(&compressed);

    let key = SessionKey::new([0u8; 16]);
    let sealed = CipherContext::new(&key, sequence)
        .and_then(|ctx| ctx.seal(&plaintext))
        .expect("seal");

    let mut packet = vec![0u8; HEADER_LEN];
    WireHeader { direction, sequence }
        .encode(&mut packet)
        .expect("header");
    packet.extend_from_slice(&sealed);
    packet
}

fn main() {
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let mut session = Session::new(&SessionConfig {
        key: Some("AAAAAAAAAAAAAAAAAAAAAA".to_string()),
    })
    .with_delivery_callback(delivered.clone());

    let client: SocketAddr = "192.0.2.10:60001".parse().expect("addr");
    let server: SocketAddr = "192.0.2.20:60002".parse().expect("addr");

    let capture = [
        (client, server, Direction::ToServer, 1, 100, 0xFFFF, 1000, &b"keystroke: ls"[..]),
        (server, client, Direction::ToClient, 1, 4000, 100, 1035, &b"screen update"[..]),
        (client, server, Direction::ToServer, 3, 180, 4000, 1080, &b"keystroke: exit"[..]),
    ];

    for (index, (source, destination, direction, seq, ts, reply, ms, message)) in
        capture.into_iter().enumerate()
    {
        let bytes = encrypted_packet(direction, seq, ts, reply, message);
        let dissection = session
            .dissect(&PacketInput {
                bytes: &bytes,
                source,
                destination,
                index,
                arrival: UNIX_EPOCH + Duration::from_millis(ms),
            })
            .expect("dissect");

        println!("#{index} {}", dissection.summary);
        print!("{}", dissection.fields);
        println!();
    }

    println!(
        "{} inner messages delivered, {} flow(s) tracked",
        delivered.lock().len(),
        session.flow_count()
    );
}
