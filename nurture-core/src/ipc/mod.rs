//! Serialisable types the host forwards to its UI.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! emit them as JSON over whatever event bus it uses.

pub mod events;
