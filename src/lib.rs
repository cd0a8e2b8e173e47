//! # mbport - Transport-agnostic Modbus protocol engine
//!
//! A Modbus application-protocol implementation for both client and server
//! roles, built as cooperative non-blocking state machines over an abstract
//! byte-level port. The crate contains no sockets, no serial handles and no
//! async runtime: a single external task drives every component by calling
//! its `process()`-style crank, and every potentially blocking step
//! surfaces as a [`StatusCode::Processing`] return.
//!
//! ## Components
//!
//! | Component | Role |
//! |-----------|------|
//! | [`protocol`] | Pure PDU codec for all sixteen public function codes |
//! | [`ClientPort`] / [`Client`] | Client-side transaction engine with FIFO multiplexing, retry and broadcast |
//! | [`ServerResource`] | Server-side request broker between a port and a [`Device`] |
//! | [`TcpServer`] | Listener lifecycle with one sub-server per connection |
//! | [`UnitFilter`] | 256-bit unit map + broadcast flag |
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Client | Server |
//! |------|----------|--------|--------|
//! | 0x01 | Read Coils | yes | yes |
//! | 0x02 | Read Discrete Inputs | yes | yes |
//! | 0x03 | Read Holding Registers | yes | yes |
//! | 0x04 | Read Input Registers | yes | yes |
//! | 0x05 | Write Single Coil | yes | yes |
//! | 0x06 | Write Single Register | yes | yes |
//! | 0x07 | Read Exception Status | yes | yes |
//! | 0x08 | Diagnostics | yes | yes |
//! | 0x0B | Get Comm Event Counter | yes | yes |
//! | 0x0C | Get Comm Event Log | yes | yes |
//! | 0x0F | Write Multiple Coils | yes | yes |
//! | 0x10 | Write Multiple Registers | yes | yes |
//! | 0x11 | Report Server ID | yes | yes |
//! | 0x16 | Mask Write Register | yes | yes |
//! | 0x17 | Read/Write Multiple Registers | yes | yes |
//! | 0x18 | Read FIFO Queue | yes | yes |
//!
//! ## Architecture
//!
//! ```text
//!  Client / Client ... Client          Device (user supplied)
//!          │  FIFO                            ▲
//!  ┌───────────────┐                  ┌───────────────┐   ┌────────────┐
//!  │  ClientPort   │                  │ServerResource │◄──│ TcpServer  │ per
//!  │ state machine │                  │ state machine │   │  listener  │ conn
//!  └───────────────┘                  └───────────────┘   └────────────┘
//!          │                                  │                  │
//!     Port (RTU / ASCII / TCP framing, outside this crate)   TcpGateway
//! ```
//!
//! The driving contract is uniform: call the operation (client side) or
//! `process()` (server side) repeatedly; `Processing` means "blocked on the
//! port, call again", anything else is the terminal status of exactly one
//! transaction. Lifecycle and traffic edges are published through
//! per-component signal tables ([`signal::Signals`]).
//!
//! ## Status codes
//!
//! ```rust
//! use mbport::StatusCode;
//!
//! let status = StatusCode::BadIllegalDataAddress;
//! assert!(status.is_bad());
//! assert_eq!(status.to_exception(), Some(0x02));
//! ```
//!
//! ## Unit filtering
//!
//! ```rust
//! use mbport::UnitFilter;
//!
//! let mut filter: UnitFilter = "1,5-10".parse().unwrap();
//! filter.set_broadcast_enabled(true);
//! assert!(filter.is_accepted(7));
//! assert!(!filter.is_accepted(11));
//! assert!(filter.is_accepted(0)); // broadcast
//! ```

/// Status codes and band predicates
pub mod status;

/// Fixed-size PDU buffer
pub mod pdu;

/// Function codes and the PDU codec
pub mod protocol;

/// Abstract non-blocking port contract
pub mod port;

/// Callback signal tables
pub mod signal;

/// Unit filter (unit map + broadcast flag)
pub mod unitmap;

/// Device back-end contract
pub mod device;

/// Reference in-memory device
pub mod register_bank;

/// Client port state machine and client facades
pub mod client;

/// Server resource state machine
pub mod server;

/// TCP listener state machine
pub mod tcp_server;

// Re-export main types for convenience
pub use client::{Client, ClientId, ClientPort};
pub use device::{CommEventLog, Device, DeviceResult};
pub use pdu::Pdu;
pub use port::{Port, ProtocolType};
pub use protocol::{FunctionCode, Request, Response, ResponseKind};
pub use register_bank::RegisterBank;
pub use server::ServerResource;
pub use status::StatusCode;
pub use tcp_server::{TcpGateway, TcpServer, TcpServerConfig};
pub use unitmap::UnitFilter;

/// Maximum PDU wire size: function byte + body (Modbus limit)
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum PDU body size (wire size minus the function byte)
pub const MAX_PDU_DATA_SIZE: usize = MAX_PDU_SIZE - 1;

/// Maximum coils/discrete inputs per read or multi-write request
pub const MAX_READ_DISCRETS: u16 = 2040;

/// Maximum registers per read or multi-write request
pub const MAX_READ_REGISTERS: u16 = 125;

/// Size of the unit map in bytes (one bit per unit id)
pub const UNIT_MAP_SIZE: usize = 32;

/// Standard Modbus TCP port
pub const STANDARD_TCP_PORT: u16 = 502;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
