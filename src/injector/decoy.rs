//! Phantom SYN construction
//!
//! Builds the decoy packet from a genuine outbound segment: same addressing
//! and header options, TTL low enough to expire in-flight before the server,
//! SYN-only flags, a fresh random sequence number and a short random payload.
//! DPI equipment that builds per-flow state from the first SYN-shaped segment
//! binds that state to the decoy; the real server never sees it.

use rand::Rng;

use super::checksum;
use super::packet::{ParsedPacket, TCP_SYN};

/// TTL for decoys. Expires a few hops out, past local DPI gear.
pub const DECOY_TTL: u8 = 5;

/// Junk payload bounds, inclusive.
pub const JUNK_LEN_MIN: usize = 16;
pub const JUNK_LEN_MAX: usize = 32;

/// Build a decoy from the parsed headers of a genuine outbound packet.
///
/// The returned buffer is a complete IPv4+TCP SYN with valid checksums,
/// ready to hand to the driver ahead of the genuine packet.
pub fn build_decoy(packet: &ParsedPacket<'_>, rng: &mut impl Rng) -> Vec<u8> {
    let ip_len = packet.ip_header_len();
    let tcp_len = packet.tcp_header_len();
    let junk_len = rng.gen_range(JUNK_LEN_MIN..=JUNK_LEN_MAX);
    let total = ip_len + tcp_len + junk_len;

    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(packet.ip().as_bytes());
    buf.extend_from_slice(packet.tcp().as_bytes());
    buf.resize(total, 0);

    // IPv4 header: new total length, low TTL, checksum recomputed below.
    buf[2..4].copy_from_slice(&(total as u16).to_be_bytes());
    buf[8] = DECOY_TTL;
    buf[10..12].fill(0);

    // TCP header: SYN only (data-offset nibble preserved), zero ack,
    // fresh random sequence number.
    let tcp = ip_len;
    buf[tcp + 12] &= 0xF0;
    buf[tcp + 13] = TCP_SYN;
    let seq: u32 = rng.gen();
    buf[tcp + 4..tcp + 8].copy_from_slice(&seq.to_be_bytes());
    buf[tcp + 8..tcp + 12].fill(0);
    buf[tcp + 16..tcp + 18].fill(0);

    rng.fill(&mut buf[ip_len + tcp_len..]);

    let ip_sum = checksum::ipv4_checksum(&buf[..ip_len]);
    buf[10..12].copy_from_slice(&ip_sum.to_be_bytes());

    let src = [buf[12], buf[13], buf[14], buf[15]];
    let dst = [buf[16], buf[17], buf[18], buf[19]];
    let tcp_sum = checksum::tcp_checksum(src, dst, &buf[ip_len..]);
    buf[tcp + 16..tcp + 18].copy_from_slice(&tcp_sum.to_be_bytes());

    buf
}
