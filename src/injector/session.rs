//! TCP flow session tracking
//!
//! Decides whether an outbound packet is the first of its flow. A flow gets
//! exactly one decoy until a FIN or RST evicts its key, after which a
//! re-established flow triggers one more.

use std::collections::HashSet;

use super::packet::ParsedPacket;

/// A TCP flow 4-tuple, stored as the raw bytes from the packet.
///
/// Addresses and ports keep the wire byte order; equality is bitwise and the
/// hash mixes all four fields. The key is not directly comparable to a
/// host-order tuple without conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    src_addr: [u8; 4],
    dst_addr: [u8; 4],
    src_port: [u8; 2],
    dst_port: [u8; 2],
}

impl SessionKey {
    /// Derive the key from a packet's 4-tuple as it appears on the wire.
    pub fn from_packet(packet: &ParsedPacket<'_>) -> Self {
        let tcp = packet.tcp().as_bytes();
        Self {
            src_addr: packet.ip().src_addr(),
            dst_addr: packet.ip().dst_addr(),
            src_port: [tcp[0], tcp[1]],
            dst_port: [tcp[2], tcp[3]],
        }
    }
}

/// Set of live flows. The engine guards it with its state mutex; operations
/// here are single hash-set mutations.
#[derive(Debug, Default)]
pub struct SessionTracker {
    keys: HashSet<SessionKey>,
}

impl SessionTracker {
    /// Insert the key, returning true iff it was not already present.
    pub fn first_seen(&mut self, key: SessionKey) -> bool {
        self.keys.insert(key)
    }

    /// Remove a flow after FIN or RST.
    pub fn mark_done(&mut self, key: &SessionKey) {
        self.keys.remove(key);
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(src_port: u16) -> SessionKey {
        SessionKey {
            src_addr: [10, 1, 2, 3],
            dst_addr: [10, 0, 0, 1],
            src_port: src_port.to_be_bytes(),
            dst_port: 443u16.to_be_bytes(),
        }
    }

    #[test]
    fn first_seen_then_seen_before() {
        let mut tracker = SessionTracker::default();
        assert!(tracker.first_seen(key(1000)));
        assert!(!tracker.first_seen(key(1000)));
        assert!(tracker.first_seen(key(1001)));
    }

    #[test]
    fn fin_rst_rearm_sequence() {
        // [A, A, B, A(FIN), A, B(RST), B] -> [t, f, t, f, t, f, t]
        let a = key(1000);
        let b = key(2000);
        let mut tracker = SessionTracker::default();

        assert!(tracker.first_seen(a));
        assert!(!tracker.first_seen(a));
        assert!(tracker.first_seen(b));
        assert!(!tracker.first_seen(a));
        tracker.mark_done(&a); // FIN observed on A
        assert!(tracker.first_seen(a));
        assert!(!tracker.first_seen(b));
        tracker.mark_done(&b); // RST observed on B
        assert!(tracker.first_seen(b));
    }

    #[test]
    fn clear_empties_the_set() {
        let mut tracker = SessionTracker::default();
        tracker.first_seen(key(1));
        tracker.first_seen(key(2));
        assert_eq!(tracker.len(), 2);
        tracker.clear();
        assert!(tracker.is_empty());
    }

    #[test]
    fn mark_done_on_absent_key_is_a_noop() {
        let mut tracker = SessionTracker::default();
        tracker.mark_done(&key(7));
        assert!(tracker.is_empty());
    }

    #[test]
    fn key_from_packet_uses_wire_bytes() {
        let mut buf = vec![0u8; 40];
        buf[0] = 0x45;
        buf[12..16].copy_from_slice(&[1, 2, 3, 4]);
        buf[16..20].copy_from_slice(&[5, 6, 7, 8]);
        buf[20..22].copy_from_slice(&[0xAB, 0xCD]);
        buf[22..24].copy_from_slice(&[0x01, 0xBB]);
        buf[32] = 0x50;

        let parsed = crate::injector::packet::parse(&buf).unwrap();
        let key = SessionKey::from_packet(&parsed);
        assert_eq!(
            key,
            SessionKey {
                src_addr: [1, 2, 3, 4],
                dst_addr: [5, 6, 7, 8],
                src_port: [0xAB, 0xCD],
                dst_port: [0x01, 0xBB],
            }
        );
    }
}
