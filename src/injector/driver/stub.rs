//! Programmable in-memory driver
//!
//! Stands in for the kernel driver in the test suite and the testbench
//! dry-run mode. Recv is fed from a script of preset packets and failures and
//! blocks like the real driver when the script is drained; shutdown unblocks
//! it. Every open, send and close is recorded for inspection.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use super::{DivertAddress, DivertDriver, DivertHandle, DivertLayer, DivertShutdown};
use crate::injector::{InjectorError, InjectorResult};

/// One scripted recv outcome.
enum RecvStep {
    Packet { data: Vec<u8>, addr: DivertAddress },
    Failure(String),
}

/// A recorded send: the packet bytes and the address record they carried.
#[derive(Debug, Clone)]
pub struct SendRecord {
    pub handle: DivertHandle,
    pub data: Vec<u8>,
    pub addr: DivertAddress,
}

/// A recorded open call.
#[derive(Debug, Clone)]
pub struct OpenRecord {
    pub filter: String,
    pub layer: DivertLayer,
    pub priority: i16,
    pub flags: u64,
    pub handle: DivertHandle,
}

#[derive(Default)]
struct State {
    script: VecDeque<RecvStep>,
    sends: Vec<SendRecord>,
    opens: Vec<OpenRecord>,
    recv_calls: Vec<Instant>,
    shutdown: bool,
    fail_open: bool,
    closed: usize,
    next_handle: isize,
    addr_seq: i64,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    recv_ready: Condvar,
}

/// Cloneable handle to the shared stub; clones script and observe the same
/// recorded state.
#[derive(Clone, Default)]
pub struct StubDriver {
    inner: Arc<Inner>,
}

impl StubDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a packet for the next recv, with a distinct address record.
    pub fn push_packet(&self, data: Vec<u8>) {
        let mut state = self.inner.state.lock();
        state.addr_seq += 1;
        let addr = DivertAddress {
            timestamp: state.addr_seq,
            ..DivertAddress::default()
        };
        state.script.push_back(RecvStep::Packet { data, addr });
        drop(state);
        self.inner.recv_ready.notify_all();
    }

    /// Queue a packet with an explicit address record.
    pub fn push_packet_with_addr(&self, data: Vec<u8>, addr: DivertAddress) {
        self.inner
            .state
            .lock()
            .script
            .push_back(RecvStep::Packet { data, addr });
        self.inner.recv_ready.notify_all();
    }

    /// Queue a recv failure.
    pub fn push_recv_failure(&self, message: &str) {
        self.inner
            .state
            .lock()
            .script
            .push_back(RecvStep::Failure(message.to_string()));
        self.inner.recv_ready.notify_all();
    }

    /// Make subsequent opens fail.
    pub fn set_fail_open(&self, fail: bool) {
        self.inner.state.lock().fail_open = fail;
    }

    pub fn sends(&self) -> Vec<SendRecord> {
        self.inner.state.lock().sends.clone()
    }

    pub fn opens(&self) -> Vec<OpenRecord> {
        self.inner.state.lock().opens.clone()
    }

    pub fn open_count(&self) -> usize {
        self.inner.state.lock().opens.len()
    }

    pub fn close_count(&self) -> usize {
        self.inner.state.lock().closed
    }

    /// Handles opened but not yet closed.
    pub fn live_handle_count(&self) -> usize {
        let state = self.inner.state.lock();
        state.opens.len() - state.closed
    }

    /// Instants at which recv was entered, in order.
    pub fn recv_call_instants(&self) -> Vec<Instant> {
        self.inner.state.lock().recv_calls.clone()
    }
}

impl DivertDriver for StubDriver {
    fn open(
        &self,
        filter: &str,
        layer: DivertLayer,
        priority: i16,
        flags: u64,
    ) -> InjectorResult<DivertHandle> {
        let mut state = self.inner.state.lock();
        if state.fail_open {
            return Err(InjectorError::Open("scripted open failure".to_string()));
        }
        state.shutdown = false;
        state.next_handle += 1;
        let handle = DivertHandle(state.next_handle);
        state.opens.push(OpenRecord {
            filter: filter.to_string(),
            layer,
            priority,
            flags,
            handle,
        });
        Ok(handle)
    }

    fn recv(
        &self,
        _handle: DivertHandle,
        packet: &mut [u8],
        addr: &mut DivertAddress,
    ) -> InjectorResult<usize> {
        let mut state = self.inner.state.lock();
        state.recv_calls.push(Instant::now());
        loop {
            if state.shutdown {
                return Err(InjectorError::Recv("handle shut down".to_string()));
            }
            match state.script.pop_front() {
                Some(RecvStep::Packet { data, addr: step_addr }) => {
                    packet[..data.len()].copy_from_slice(&data);
                    *addr = step_addr;
                    return Ok(data.len());
                }
                Some(RecvStep::Failure(message)) => {
                    return Err(InjectorError::Recv(message));
                }
                None => self.inner.recv_ready.wait(&mut state),
            }
        }
    }

    fn send(
        &self,
        handle: DivertHandle,
        packet: &[u8],
        addr: &DivertAddress,
    ) -> InjectorResult<usize> {
        self.inner.state.lock().sends.push(SendRecord {
            handle,
            data: packet.to_vec(),
            addr: *addr,
        });
        Ok(packet.len())
    }

    fn shutdown(&self, _handle: DivertHandle, _how: DivertShutdown) -> InjectorResult<()> {
        self.inner.state.lock().shutdown = true;
        self.inner.recv_ready.notify_all();
        Ok(())
    }

    fn close(&self, _handle: DivertHandle) -> InjectorResult<()> {
        self.inner.state.lock().closed += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn scripted_steps_come_back_in_order() {
        let stub = StubDriver::new();
        stub.push_packet(vec![1, 2, 3]);
        stub.push_recv_failure("transient");
        let handle = stub
            .open("outbound and ip and tcp", DivertLayer::Network, 0, 0)
            .unwrap();

        let mut buf = [0u8; 64];
        let mut addr = DivertAddress::default();
        assert_eq!(stub.recv(handle, &mut buf, &mut addr).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert!(stub.recv(handle, &mut buf, &mut addr).is_err());
    }

    #[test]
    fn shutdown_unblocks_waiting_recv() {
        let stub = StubDriver::new();
        let handle = stub.open("tcp", DivertLayer::Network, 0, 0).unwrap();

        let waiter = {
            let stub = stub.clone();
            std::thread::spawn(move || {
                let mut buf = [0u8; 64];
                let mut addr = DivertAddress::default();
                stub.recv(handle, &mut buf, &mut addr)
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        stub.shutdown(handle, DivertShutdown::Both).unwrap();
        assert!(waiter.join().unwrap().is_err());
    }

    #[test]
    fn records_sends_with_addr() {
        let stub = StubDriver::new();
        let handle = stub.open("tcp", DivertLayer::Network, 0, 0).unwrap();
        let addr = DivertAddress {
            timestamp: 42,
            ..DivertAddress::default()
        };
        stub.send(handle, &[9, 9], &addr).unwrap();

        let sends = stub.sends();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].data, vec![9, 9]);
        assert_eq!(sends[0].addr.timestamp, 42);
    }
}
