//! Message identifiers and payload types of the Jell-O wire protocol.

use crate::geometry::{OnTransform, Ray, Scalar};

/// Upper bound on draggers in a single `CLIENT_UPDATE`. Counts outside
/// `0..=MAX_DRAGGERS` are rejected as malformed frames before any
/// allocation happens.
pub const MAX_DRAGGERS: usize = 256;

/// One-byte message identifiers, shared by both stream directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    /// S→C: domain bounds and atom grid size, sent once at connect.
    ConnectReply = 0,
    /// C→S: request an orderly disconnect.
    DisconnectRequest = 1,
    /// S→C: acknowledges the disconnect; the server half-closes afterwards.
    DisconnectReply = 2,
    /// C→S: new simulation parameter triple.
    ClientParamUpdate = 3,
    /// C→S: one complete dragger state frame.
    ClientUpdate = 4,
    /// S→C: echo of the currently applied parameter triple.
    ServerParamUpdate = 5,
    /// S→C: full atom-state snapshot, in crystal grid order.
    ServerUpdate = 6,
}

impl MessageId {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::ConnectReply),
            1 => Some(Self::DisconnectRequest),
            2 => Some(Self::DisconnectReply),
            3 => Some(Self::ClientParamUpdate),
            4 => Some(Self::ClientUpdate),
            5 => Some(Self::ServerParamUpdate),
            6 => Some(Self::ServerUpdate),
            _ => None,
        }
    }
}

/// The global simulation parameter triple.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimParameters {
    pub atom_mass: Scalar,
    pub attenuation: Scalar,
    pub gravity: Scalar,
}

impl Default for SimParameters {
    fn default() -> Self {
        Self {
            atom_mass: 1.0,
            attenuation: 0.5,
            gravity: 9.81,
        }
    }
}

/// State of a single dragger within a client update frame.
///
/// `id` is scoped to the sending client. When `ray_based` is set the server
/// picks the grabbed atom with `ray`, otherwise with the transform origin;
/// either way `transform` drives the atom while the grab is held.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DraggerState {
    pub id: u32,
    pub ray_based: bool,
    pub ray: Ray,
    pub transform: OnTransform,
    pub active: bool,
}

/// One complete `CLIENT_UPDATE` frame: the state of every dragger the client
/// currently owns. Decoding reuses the allocation frame to frame.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub draggers: Vec<DraggerState>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_round_trip_through_u8() {
        for id in [
            MessageId::ConnectReply,
            MessageId::DisconnectRequest,
            MessageId::DisconnectReply,
            MessageId::ClientParamUpdate,
            MessageId::ClientUpdate,
            MessageId::ServerParamUpdate,
            MessageId::ServerUpdate,
        ] {
            assert_eq!(MessageId::from_u8(id as u8), Some(id));
        }
    }

    #[test]
    fn unknown_message_id_is_rejected() {
        assert_eq!(MessageId::from_u8(7), None);
        assert_eq!(MessageId::from_u8(0xff), None);
    }
}
