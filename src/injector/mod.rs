//! Phantom Injector Module
//!
//! Intercepts outbound TCP traffic to a target endpoint via a packet-diversion
//! driver and poisons DPI flow state with low-TTL decoy SYNs.
//!
//! Architecture:
//! - checksum.rs: one's-complement checksum arithmetic (RFC 791 / RFC 793)
//! - packet.rs: zero-copy IPv4/TCP header views and validation
//! - session.rs: concurrency-safe first-seen tracking of TCP 4-tuples
//! - decoy.rs: phantom SYN construction from a genuine outbound segment
//! - driver/: packet-diversion driver interface, WinDivert binding, test stub
//! - worker.rs: capture/inject loop running on a dedicated thread
//! - engine.rs: idempotent start/stop lifecycle coordination

pub mod checksum;
pub mod decoy;
pub mod driver;
pub mod engine;
pub mod packet;
pub mod session;
pub(crate) mod worker;

pub use decoy::build_decoy;
pub use engine::PhantomEngine;
pub use packet::{parse, ParsedPacket};
pub use session::{SessionKey, SessionTracker};

/// Injector-related errors
#[derive(Debug, thiserror::Error)]
pub enum InjectorError {
    #[error("Packet diversion driver unavailable: {0}")]
    DriverUnavailable(String),

    #[error("Failed to open diversion handle: {0}")]
    Open(String),

    #[error("Driver recv failed: {0}")]
    Recv(String),

    #[error("Driver send failed: {0}")]
    Send(String),

    #[error("Driver shutdown failed: {0}")]
    Shutdown(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type InjectorResult<T> = Result<T, InjectorError>;
