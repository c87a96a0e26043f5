//! # Rembus Protocol Library
//!
//! Wire definitions and signing primitives for the Rembus message bus.
//!
//! ## Overview
//!
//! - **Frames**: the closed set of CBOR-encoded frame types and their fields
//! - **Status codes**: RESPONSE status values, including the client-local timeout
//! - **Tables**: Arrow IPC tables carried under semantic tag 80
//! - **Signing**: shared-secret digests and RSA signatures for attestation
//! - **Errors**: the error taxonomy shared by every Rembus crate
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │      Application arguments (Arg)        │  scalars, tables
//! ├─────────────────────────────────────────┤
//! │         Table tag transform             │  tag 80 + Arrow IPC
//! ├─────────────────────────────────────────┤
//! │              Frames                     │  CBOR arrays [type, ...]
//! ├─────────────────────────────────────────┤
//! │       Transport (WebSocket binary)      │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{table2tag, Arg, Frame, MsgId};
//!
//! let args = table2tag(vec![Arg::from(1), Arg::from(2)]).unwrap();
//! let frame = Frame::Rpc {
//!     id: MsgId::new(),
//!     method: "add".to_string(),
//!     target: None,
//!     args,
//! };
//! let bytes = frame.clone().encode().unwrap();
//! assert_eq!(Frame::decode(&bytes).unwrap(), frame);
//! ```

pub mod crypto;
pub mod error;
pub mod messages;
pub mod status;
pub mod table;

pub use ciborium::Value;
pub use crypto::{sign_with_secret, signing_input, verify_key_signature, KeyPair, RSA_KEY_BITS};
pub use error::{RembusError, Result};
pub use messages::{
    parse_pin, Frame, MsgId, SettingCommand, SettingKind, MSG_ID_LENGTH, PIN_LENGTH,
    PROTOCOL_VERSION,
};
pub use status::Status;
pub use table::{tag2table, table2tag, Arg, Table, TABLE_TAG};
