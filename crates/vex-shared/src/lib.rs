//! Types shared by every vex crate: the wire protocol, the signing identity,
//! protocol constants and the common error enums.

pub mod constants;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod types;

pub use error::{IdentityError, ProtocolError};
pub use identity::{verify_signature, Identity};
pub use protocol::{Envelope, Inbound, Outbound};
