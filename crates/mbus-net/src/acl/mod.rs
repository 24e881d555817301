//! # Access Control
//!
//! Ordered allow/deny rules over IP networks, consulted for every inbound
//! bridge connection before any byte is read from it.
//!
//! ## Evaluation
//!
//! Entries are evaluated in insertion order and the first entry whose
//! network contains the peer decides. A peer matching no entry is denied.
//!
//! ## Textual Forms
//!
//! - network: `192.168.1.0/24`, `10.0.0.7` (host), `fd00::/8`
//! - entry: `allow:192.168.1.0/24`, `deny:10.0.0.7`

mod list;
mod network;

pub use list::{AccessControlList, AclEntry};
pub use network::{AclParseError, NetworkSpec};
