//! Capture/inject worker
//!
//! One long-running thread: receive a diverted packet, decide whether the
//! flow is new, emit the decoy ahead of the genuine packet, reinject the
//! genuine packet, evict the flow on FIN/RST. The engine's state mutex is
//! never held across a driver call.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::decoy::build_decoy;
use super::driver::{
    DivertAddress, DivertDriver, DivertHandle, DivertLayer, DIVERT_FLAG_FRAGMENTS,
    MAX_PACKET_SIZE,
};
use super::engine::EngineShared;
use super::packet;
use super::session::SessionKey;

/// Backoff after a transient recv failure, so a wedged driver does not spin
/// the worker hot.
const RECV_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Build the driver filter for one target endpoint.
fn divert_filter(server_ip: &str, server_port: u16) -> String {
    format!(
        "outbound and ip and tcp and tcp.DstPort == {} and ip.DstAddr == {}",
        server_port, server_ip
    )
}

/// Worker entry point. Owns the receive buffer and PRNG; exits when the stop
/// flag is raised or the driver cannot be opened.
pub(crate) fn run(
    driver: Arc<dyn DivertDriver>,
    shared: Arc<EngineShared>,
    server_ip: String,
    server_port: u16,
) {
    let filter = divert_filter(&server_ip, server_port);
    log::info!("Opening diversion handle with filter: {}", filter);

    let handle = match driver.open(&filter, DivertLayer::Network, 0, DIVERT_FLAG_FRAGMENTS) {
        Ok(handle) => {
            shared.state.lock().handle = handle;
            handle
        }
        Err(e) => {
            log::error!("Diversion open failed: {}", e);
            shared.stop.store(true, Ordering::SeqCst);
            return;
        }
    };

    let mut buf = vec![0u8; MAX_PACKET_SIZE];
    let mut rng = rand::thread_rng();

    while !shared.stop.load(Ordering::SeqCst) {
        let mut addr = DivertAddress::default();
        let len = match driver.recv(handle, &mut buf, &mut addr) {
            Ok(len) => len,
            Err(e) => {
                if shared.stop.load(Ordering::SeqCst) {
                    break;
                }
                log::trace!("recv failed, backing off: {}", e);
                std::thread::sleep(RECV_RETRY_DELAY);
                continue;
            }
        };
        if len == 0 {
            continue;
        }

        // The filter guarantees TCP-over-IPv4; anything else is dropped.
        let parsed = match packet::parse(&buf[..len]) {
            Some(parsed) => parsed,
            None => continue,
        };

        let key = SessionKey::from_packet(&parsed);
        let is_new = shared.state.lock().sessions.first_seen(key);

        if is_new {
            let decoy = build_decoy(&parsed, &mut rng);
            log::debug!(
                "New flow {}:{} -> {}:{}, emitting {}-byte phantom",
                std::net::Ipv4Addr::from(parsed.ip().src_addr()),
                parsed.tcp().src_port(),
                std::net::Ipv4Addr::from(parsed.ip().dst_addr()),
                parsed.tcp().dst_port(),
                decoy.len(),
            );
            // Decoy rides the genuine packet's address record and goes first.
            if let Err(e) = driver.send(handle, &decoy, &addr) {
                log::debug!("phantom send failed: {}", e);
            }
        }

        if let Err(e) = driver.send(handle, &buf[..len], &addr) {
            log::debug!("reinject failed: {}", e);
        }

        if parsed.tcp().is_fin() || parsed.tcp().is_rst() {
            shared.state.lock().sessions.mark_done(&key);
        }
    }

    if let Err(e) = driver.close(handle) {
        log::warn!("close failed: {}", e);
    }
    let mut state = shared.state.lock();
    state.handle = DivertHandle::INVALID;
    state.sessions.clear();
    log::info!("Capture worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_matches_driver_template() {
        assert_eq!(
            divert_filter("10.0.0.1", 443),
            "outbound and ip and tcp and tcp.DstPort == 443 and ip.DstAddr == 10.0.0.1"
        );
    }
}
