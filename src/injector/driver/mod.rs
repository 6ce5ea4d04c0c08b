//! Packet-diversion driver interface
//!
//! The engine talks to the kernel driver through the [`DivertDriver`] trait:
//! one implementation resolves the WinDivert entry points from the DLL at
//! runtime, a second is a programmable in-memory stub for the test suite and
//! the testbench dry-run mode.

#[cfg(windows)]
pub mod windivert;

pub mod stub;

#[cfg(windows)]
pub use windivert::WinDivertDriver;

use super::InjectorResult;

/// Deliver IP-fragmented packets whole.
pub const DIVERT_FLAG_FRAGMENTS: u64 = 0x0020;

/// Receive buffer size for one diverted packet.
pub const MAX_PACKET_SIZE: usize = 0xFFFF;

/// Diversion layer; the injector only uses the network layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DivertLayer {
    Network = 0,
}

/// Which half of a handle to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DivertShutdown {
    Recv = 0x1,
    Send = 0x2,
    Both = 0x3,
}

/// Opaque driver handle. Mirrors a Windows HANDLE; `INVALID` is the sentinel
/// the engine state carries while no worker is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DivertHandle(pub(crate) isize);

impl DivertHandle {
    pub const INVALID: DivertHandle = DivertHandle(-1);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

/// Per-packet address record returned by recv.
///
/// Layout mirrors WINDIVERT_ADDRESS (timestamp, packed flag word, 64-byte
/// layer data). The engine treats it as opaque and replays the record
/// verbatim on send so the kernel reinjects in the original direction on the
/// original interface; the decoy inherits the genuine packet's record.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DivertAddress {
    pub timestamp: i64,
    pub flags: u32,
    pub reserved: u32,
    pub layer_data: [u8; 64],
}

impl Default for DivertAddress {
    fn default() -> Self {
        Self {
            timestamp: 0,
            flags: 0,
            reserved: 0,
            layer_data: [0; 64],
        }
    }
}

/// The five driver operations the engine needs, plus runtime linkage.
pub trait DivertDriver: Send + Sync {
    /// Resolve any runtime linkage required before the first open. A missing
    /// library or symbol is fatal to startup; the engine reports failure and
    /// spawns no worker.
    fn ensure_loaded(&self) -> InjectorResult<()> {
        Ok(())
    }

    /// Open a diversion handle for packets matching `filter`.
    fn open(
        &self,
        filter: &str,
        layer: DivertLayer,
        priority: i16,
        flags: u64,
    ) -> InjectorResult<DivertHandle>;

    /// Block until a diverted packet arrives; fills `addr` and returns the
    /// packet length.
    fn recv(
        &self,
        handle: DivertHandle,
        packet: &mut [u8],
        addr: &mut DivertAddress,
    ) -> InjectorResult<usize>;

    /// Reinject a packet with the given address record.
    fn send(
        &self,
        handle: DivertHandle,
        packet: &[u8],
        addr: &DivertAddress,
    ) -> InjectorResult<usize>;

    /// Unblock pending and future operations on the handle.
    fn shutdown(&self, handle: DivertHandle, how: DivertShutdown) -> InjectorResult<()>;

    /// Close the handle.
    fn close(&self, handle: DivertHandle) -> InjectorResult<()>;
}
