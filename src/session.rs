//! Capture-session orchestration.
//!
//! A [`Session`] owns all cross-packet state for one loaded capture: the
//! flow table, the per-packet view cache, the optional pre-shared key, and
//! session metrics. Packets are dissected once each, in capture order;
//! that first visit is the only point where flow state mutates and derived
//! values (sequence deltas, clock offsets, round-trip estimates) are
//! computed and cached. Any later visit to the same capture index replays
//! the cached view and never touches flow state, since those values are
//! point-in-time snapshots that are undefined out of capture order.
//!
//! Scheduling is single-threaded and non-blocking; nothing here suspends
//! or retries. A parallel host must serialize mutation per flow key and
//! preserve capture-order sequencing, but may fan out across flows.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::clock;
use crate::crypto::{CipherContext, SessionKey};
use crate::error::DissectError;
use crate::fields::Field;
use crate::flow::{FlowKey, FlowState, FlowTable};
use crate::inflate;
use crate::packet::{classify, Direction};
use crate::record::{Completeness, DecryptedRecord, RECORD_LEN};

/// Fixed top-level type tag presented to the downstream structured-message
/// decoder along with every inflated buffer.
pub const INNER_MESSAGE_KIND: u16 = 0x0001;

/// Session configuration surface: one string option.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Unpadded base64 encoding of the 16-byte pre-shared key. Absent or
    /// invalid disables decryption; structural analysis still runs.
    pub key: Option<String>,
}

/// Raw packet plus capture context, as supplied by the host framework.
#[derive(Debug, Clone, Copy)]
pub struct PacketInput<'a> {
    /// Raw datagram bytes
    pub bytes: &'a [u8],
    /// Transport-level source endpoint
    pub source: SocketAddr,
    /// Transport-level destination endpoint
    pub destination: SocketAddr,
    /// Position of the packet in capture order
    pub index: usize,
    /// Wall-clock arrival time recorded by the capture
    pub arrival: SystemTime,
}

/// Derived per-packet values, computed once and replayed verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketView {
    /// Direction from the header bit
    pub direction: Direction,
    /// 63-bit sequence counter
    pub sequence: u64,
    /// True for the first packet seen in this flow and direction
    pub first_packet: bool,
    /// Signed gap from the previous same-direction packet: zero means
    /// duplication, negative reordering, more than one loss
    pub seq_delta: Option<i64>,
    /// Round-trip estimate in milliseconds, when a reply correlated
    pub rtt_estimate: Option<i16>,
}

/// Inner message handed to the downstream structured decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerMessage {
    /// Fixed top-level type tag, always [`INNER_MESSAGE_KIND`]
    pub kind: u16,
    /// Inflated message bytes
    pub data: Vec<u8>,
}

/// Diagnostic notes attached to one dissection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Annotation {
    /// No usable key is configured; payload left opaque
    DecryptionDisabled,
    /// Authentication tag did not verify; no plaintext exposed
    AuthenticationFailure,
    /// Cipher engine failed on this packet only
    CipherFailure,
    /// Message spans multiple packets; header fields above remain valid
    UnsupportedFragmentation {
        /// Identifier shared by the message's fragments
        fragment_id: u64,
        /// Final-fragment bit
        fragment_final: bool,
        /// Fragment position
        fragment_index: u16,
    },
    /// Authenticated payload did not inflate
    MalformedCompressedPayload,
}

impl std::fmt::Display for Annotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DecryptionDisabled => write!(f, "encrypted, no key configured"),
            Self::AuthenticationFailure => write!(f, "authentication failed"),
            Self::CipherFailure => write!(f, "cipher engine failure"),
            Self::UnsupportedFragmentation {
                fragment_id,
                fragment_index,
                ..
            } => write!(
                f,
                "fragment {fragment_index} of message {fragment_id}, reassembly unsupported"
            ),
            Self::MalformedCompressedPayload => write!(f, "malformed compressed payload"),
        }
    }
}

/// Everything the host gets back for one packet.
#[derive(Debug, Clone)]
pub struct Dissection {
    /// One-line summary for packet lists
    pub summary: String,
    /// Structured field tree for the detail pane
    pub fields: Field,
    /// Inflated inner message for further decoding, when the pipeline ran
    /// to completion
    pub inner: Option<InnerMessage>,
    /// Diagnostics gathered along the way
    pub annotations: Vec<Annotation>,
    /// Cached derived values
    pub view: PacketView,
}

/// Counters for one analysis session.
///
/// Clone-shareable; all counters sit behind mutexes so an embedding host
/// can read them from a different thread than the dissection loop.
#[derive(Clone, Debug)]
pub struct SessionMetrics {
    /// Packets claimed by the classifier
    pub packets_claimed: Arc<Mutex<u64>>,
    /// Packets whose authentication tag failed to verify
    pub auth_failures: Arc<Mutex<u64>>,
    /// Packets lost to cipher-engine errors
    pub cipher_errors: Arc<Mutex<u64>>,
    /// Packets carrying one fragment of a multi-packet message
    pub fragmented_messages: Arc<Mutex<u64>>,
    /// Authenticated payloads that failed to inflate
    pub inflate_failures: Arc<Mutex<u64>>,
    /// Inner messages handed to the downstream decoder
    pub handoffs: Arc<Mutex<u64>>,
}

impl SessionMetrics {
    fn new() -> Self {
        Self {
            packets_claimed: Arc::new(Mutex::new(0)),
            auth_failures: Arc::new(Mutex::new(0)),
            cipher_errors: Arc::new(Mutex::new(0)),
            fragmented_messages: Arc::new(Mutex::new(0)),
            inflate_failures: Arc::new(Mutex::new(0)),
            handoffs: Arc::new(Mutex::new(0)),
        }
    }

    /// Export counters in plain text, one `name value` line each.
    pub fn export_metrics(&self) -> String {
        format!(
            "termtap_packets_claimed {}\n\
             termtap_auth_failures {}\n\
             termtap_cipher_errors {}\n\
             termtap_fragmented_messages {}\n\
             termtap_inflate_failures {}\n\
             termtap_handoffs {}\n",
            self.packets_claimed.lock(),
            self.auth_failures.lock(),
            self.cipher_errors.lock(),
            self.fragmented_messages.lock(),
            self.inflate_failures.lock(),
            self.handoffs.lock(),
        )
    }
}

/// One loaded capture's analysis state.
pub struct Session {
    /// Session counters
    pub metrics: SessionMetrics,

    key: Option<SessionKey>,
    config_error: Option<DissectError>,
    flows: FlowTable,
    views: HashMap<usize, PacketView>,
    delivered_callback: Option<Arc<Mutex<Vec<Vec<u8>>>>>,
}

impl Session {
    /// Open a session with the given configuration.
    ///
    /// A malformed key is reported here, once, and decryption stays
    /// disabled for the whole session until the option is corrected.
    pub fn new(config: &SessionConfig) -> Self {
        let mut key = None;
        let mut config_error = None;

        match config.key.as_deref() {
            None => debug!("no session key configured, decryption disabled"),
            Some(encoded) => match SessionKey::from_base64(encoded) {
                Ok(parsed) => {
                    debug!(fingerprint = %parsed.fingerprint(), "session key loaded");
                    key = Some(parsed);
                }
                Err(err) => {
                    warn!(%err, "session key rejected, decryption disabled");
                    config_error = Some(err);
                }
            },
        }

        Self {
            metrics: SessionMetrics::new(),
            key,
            config_error,
            flows: FlowTable::new(),
            views: HashMap::new(),
            delivered_callback: None,
        }
    }

    /// Register a sink that collects every inner message handed off to the
    /// downstream decoder.
    pub fn with_delivery_callback(mut self, sink: Arc<Mutex<Vec<Vec<u8>>>>) -> Self {
        self.delivered_callback = Some(sink);
        self
    }

    /// The configuration error recorded at load, if any.
    pub fn config_error(&self) -> Option<DissectError> {
        self.config_error
    }

    /// True when a usable key is loaded.
    pub fn decryption_enabled(&self) -> bool {
        self.key.is_some()
    }

    /// Number of flows observed so far.
    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    /// Read-only view of one flow's tracking state.
    pub fn flow_state(&self, key: &FlowKey) -> Option<&FlowState> {
        self.flows.get(key)
    }

    /// Cached view for a capture index, if that packet was visited.
    pub fn cached_view(&self, index: usize) -> Option<&PacketView> {
        self.views.get(&index)
    }

    /// Drop all flow state and cached views, for session close or capture
    /// reload.
    pub fn close(&mut self) {
        self.flows.clear();
        self.views.clear();
    }

    /// Analyze one packet.
    ///
    /// Returns [`DissectError::StructuralMismatch`] when the buffer is not
    /// a session-transport packet; the packet is not claimed and no state
    /// changes. Every other outcome claims the packet and reports problems
    /// as [`Annotation`]s on the returned [`Dissection`].
    ///
    /// The first call for a capture index mutates flow state and caches
    /// the derived view; later calls for the same index are pure reads of
    /// that cache (decryption and decompression re-run as pure functions
    /// of the bytes and key, with the nonce rebuilt from the packet's own
    /// sequence counter).
    pub fn dissect(&mut self, input: &PacketInput<'_>) -> Result<Dissection, DissectError> {
        let classified = classify(input.bytes)?;
        let header = classified.header;
        let direction = header.direction;
        let local16 = clock::truncate_millis(input.arrival);
        let flow_key = FlowKey::udp(input.source, input.destination);

        let cached = self.views.get(&input.index).copied();
        let first_visit = cached.is_none();

        let mut view = match cached {
            Some(view) => view,
            None => {
                *self.metrics.packets_claimed.lock() += 1;

                let state = self.flows.get_or_create(flow_key.clone());
                let previous = state.last_seq[direction.index()];
                state.last_seq[direction.index()] = Some(header.sequence);

                PacketView {
                    direction,
                    sequence: header.sequence,
                    first_packet: previous.is_none(),
                    seq_delta: previous.map(|prev| header.sequence as i64 - prev as i64),
                    rtt_estimate: None,
                }
            }
        };

        let mut annotations = Vec::new();
        let mut fields = Field::branch(
            "session transport",
            vec![
                Field::leaf("direction", direction.to_string()),
                Field::leaf("sequence", header.sequence.to_string()),
            ],
        );
        if view.first_packet {
            fields.push(Field::leaf("first packet", "true"));
        }
        if let Some(delta) = view.seq_delta {
            fields.push(Field::leaf("sequence delta", format!("{delta:+}")));
        }

        let plaintext = match self.decrypt(header.sequence, classified.ciphertext, first_visit) {
            Ok(plain) => Some(plain),
            Err(annotation) => {
                fields.push(Field::leaf(
                    "ciphertext",
                    format!("{} bytes", classified.ciphertext.len()),
                ));
                annotations.push(annotation);
                None
            }
        };

        let mut inner = None;

        if let Some(plain) = plaintext {
            let record = DecryptedRecord::parse(&plain)?;

            if first_visit {
                let state = self.flows.get_or_create(flow_key);
                view.rtt_estimate = clock::observe(
                    state,
                    direction,
                    record.timestamp,
                    record.timestamp_reply,
                    local16,
                );
            }

            let mut record_fields = vec![
                Field::leaf("timestamp", record.timestamp.to_string()),
                Field::leaf(
                    "timestamp reply",
                    if record.timestamp_reply == clock::NO_REPLY {
                        "none".to_string()
                    } else {
                        record.timestamp_reply.to_string()
                    },
                ),
                Field::leaf("fragment id", record.fragment_id.to_string()),
                Field::leaf("final fragment", record.fragment_final.to_string()),
                Field::leaf("fragment index", record.fragment_index.to_string()),
            ];
            if let Some(rtt) = view.rtt_estimate {
                record_fields.push(Field::leaf("rtt estimate", format!("{rtt} ms")));
            }
            fields.push(Field::branch("record", record_fields));

            match record.completeness() {
                Completeness::Fragmented {
                    fragment_final,
                    fragment_index,
                } => {
                    if first_visit {
                        *self.metrics.fragmented_messages.lock() += 1;
                        debug!(
                            fragment_id = record.fragment_id,
                            fragment_index, "fragmented message, reassembly unsupported"
                        );
                    }
                    annotations.push(Annotation::UnsupportedFragmentation {
                        fragment_id: record.fragment_id,
                        fragment_final,
                        fragment_index,
                    });
                }
                Completeness::Complete => match inflate::inflate(&plain[RECORD_LEN..]) {
                    Ok(data) => {
                        fields.push(Field::leaf(
                            "payload",
                            format!(
                                "{} bytes ({} compressed)",
                                data.len(),
                                plain.len() - RECORD_LEN
                            ),
                        ));
                        if first_visit {
                            *self.metrics.handoffs.lock() += 1;
                            if let Some(sink) = &self.delivered_callback {
                                sink.lock().push(data.clone());
                            }
                        }
                        inner = Some(InnerMessage {
                            kind: INNER_MESSAGE_KIND,
                            data,
                        });
                    }
                    Err(_) => {
                        if first_visit {
                            *self.metrics.inflate_failures.lock() += 1;
                            warn!(
                                sequence = header.sequence,
                                "authenticated payload failed to inflate"
                            );
                        }
                        annotations.push(Annotation::MalformedCompressedPayload);
                    }
                },
            }
        }

        if first_visit {
            self.views.insert(input.index, view);
        }

        Ok(Dissection {
            summary: Self::summarize(&view, &annotations),
            fields,
            inner,
            annotations,
            view,
        })
    }

    // Fresh context per attempt; never reused across packets.
    fn decrypt(
        &self,
        sequence: u64,
        ciphertext: &[u8],
        first_visit: bool,
    ) -> Result<Vec<u8>, Annotation> {
        let key = match &self.key {
            Some(key) => key,
            None => return Err(Annotation::DecryptionDisabled),
        };

        let context = match CipherContext::new(key, sequence) {
            Ok(context) => context,
            Err(err) => {
                if first_visit {
                    *self.metrics.cipher_errors.lock() += 1;
                    warn!(sequence, %err, "cipher engine failure, packet skipped");
                }
                return Err(Annotation::CipherFailure);
            }
        };

        context.open(ciphertext).map_err(|_| {
            if first_visit {
                *self.metrics.auth_failures.lock() += 1;
                warn!(sequence, "authentication failed");
            }
            Annotation::AuthenticationFailure
        })
    }

    fn summarize(view: &PacketView, annotations: &[Annotation]) -> String {
        let mut summary = format!("{} seq={}", view.direction, view.sequence);

        if view.first_packet {
            summary.push_str(" first packet");
        }
        if let Some(delta) = view.seq_delta {
            summary.push_str(&format!(" delta={delta:+}"));
        }
        if let Some(rtt) = view.rtt_estimate {
            summary.push_str(&format!(" rtt={rtt}ms"));
        }
        for annotation in annotations {
            summary.push_str(&format!(" [{annotation}]"));
        }

        summary
    }
}
