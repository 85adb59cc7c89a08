//! # Shared Jell-O server library
//!
//! Dedicated multi-client server for a shared soft-body ("Jell-O crystal")
//! world. Clients connect over TCP, each contributing any number of
//! draggers that grab and move individual atoms of the crystal; the server
//! simulates continuously, arbitrates conflicting grabs so every atom has
//! at most one owner, and broadcasts the full crystal state at a fixed
//! cadence.
//!
//! Module layout:
//! - [`crystal`] — the mass-spring lattice and its atom lock bitmap
//! - [`client`] — per-connection state and the input triple buffer
//! - [`game`] — the simulation tick: parameters, pruning, grab arbitration
//! - [`network`] — listener, reader sessions, broadcast, main loop

pub mod client;
pub mod crystal;
pub mod game;
pub mod network;
