//! # Shared Jell-O protocol library
//!
//! Everything the server and its clients have to agree on: the geometry
//! value types, the message vocabulary, and the framed little-endian codec
//! that carries them over a TCP connection.
//!
//! The protocol is deliberately small. A client connects and immediately
//! receives a `CONNECT_REPLY` describing the crystal (domain bounds and atom
//! grid size). From then on it streams `CLIENT_UPDATE` dragger frames and
//! occasional `CLIENT_PARAMUPDATE` triples upstream, while the server
//! streams `SERVER_UPDATE` atom snapshots (and `SERVER_PARAMUPDATE` echoes
//! when the applied parameters change) downstream at a fixed cadence.
//! Disconnect is a two-message handshake followed by a half-close.
//!
//! See [`wire`] for the exact binary layout of each payload.

pub mod geometry;
pub mod protocol;
pub mod wire;

pub use geometry::{OnTransform, Point, Ray, Scalar, Vector};
pub use protocol::{DraggerState, MessageId, SimParameters, StateUpdate, MAX_DRAGGERS};
pub use wire::{MessageReader, MessageWriter, PipeError};
