//! Tock bootloader command protocol
//!
//! - [`codes`]: opcode and response code tables
//! - [`command`]: typed [`Command`]/[`Response`] values
//! - [`engine`]: the [`ProtocolEngine`] that runs commands over a transport
//! - [`attribute`]: the bootloader's key/value attribute slots

pub mod attribute;
pub mod codes;
pub mod command;
pub mod engine;

pub use attribute::{Attribute, AttributeError};
pub use command::{Command, Rejection, Response, Status};
pub use engine::{EngineStats, ProtocolEngine, RequestState};
