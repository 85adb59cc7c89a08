//! Per-client connection state.
//!
//! Each connection is split in two: a [`ClientHandle`] shared between the
//! client's reader task and the main loop, and a [`ClientEntry`] owned by
//! the client registry and touched only by the main loop (under the
//! registry lock). The handle carries the input triple buffer, the guarded
//! write half of the socket, and the lifecycle flags; the entry carries the
//! simulation-side bookkeeping (held atom locks, last echoed parameter
//! version) and the reader task handle.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use shared::wire::MessageWriter;
use shared::{OnTransform, StateUpdate};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::task::JoinHandle;

use crate::crystal::AtomId;

/// An atom currently held by one of a client's draggers. `drag_transform`
/// is the rigid offset captured at grab time such that
/// `dragger_transform * drag_transform` reproduces the atom pose.
#[derive(Debug, Clone, Copy)]
pub struct AtomLock {
    pub dragger_id: u32,
    pub atom: AtomId,
    pub drag_transform: OnTransform,
}

/// Three-slot input buffer between a client's reader task (producer) and
/// the simulation (consumer).
///
/// The producer always has a slot that is neither the one the consumer
/// holds (`consumed`) nor the last one published (`produced`), so it never
/// blocks and never tears a frame; the consumer only ever sees complete
/// frames and skips nothing newer than the latest. Intermediate frames are
/// coalesced away by design.
#[derive(Debug, Default)]
pub struct InputSlots {
    slots: [StateUpdate; 3],
    produced: usize,
    consumed: usize,
}

impl InputSlots {
    /// Publish a frame by swapping it into a free slot. The caller's
    /// `update` receives the displaced slot contents for reuse as the next
    /// decode scratch buffer.
    pub fn publish(&mut self, update: &mut StateUpdate) {
        let mut next = (self.consumed + 1) % 3;
        if next == self.produced {
            next = (next + 1) % 3;
        }
        std::mem::swap(&mut self.slots[next], update);
        self.produced = next;
    }

    /// Take the most recent unread frame, if any. The returned borrow stays
    /// valid until the next `publish`/`acquire`; a frame is never returned
    /// twice.
    pub fn acquire(&mut self) -> Option<&StateUpdate> {
        if self.produced == self.consumed {
            return None;
        }
        self.consumed = self.produced;
        Some(&self.slots[self.consumed])
    }
}

/// State shared between a client's reader task and the main loop.
pub struct ClientHandle {
    pub id: u64,
    pub addr: SocketAddr,
    /// Set once the reader task has sent `CONNECT_REPLY`; broadcast only
    /// addresses connected clients.
    connected: AtomicBool,
    /// Set by whoever observes the connection failing (reader on any exit,
    /// broadcast on a write error); the main loop prunes dead clients.
    dead: AtomicBool,
    pub input: Mutex<InputSlots>,
    pub writer: tokio::sync::Mutex<MessageWriter<OwnedWriteHalf>>,
}

impl ClientHandle {
    pub fn new(id: u64, addr: SocketAddr, writer: MessageWriter<OwnedWriteHalf>) -> Self {
        Self {
            id,
            addr,
            connected: AtomicBool::new(false),
            dead: AtomicBool::new(false),
            input: Mutex::new(InputSlots::default()),
            writer: tokio::sync::Mutex::new(writer),
        }
    }

    pub fn set_connected(&self) {
        self.connected.store(true, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn mark_dead(&self) {
        self.dead.store(true, Ordering::Release);
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }
}

/// Registry entry for one client. Fields other than `handle` belong to the
/// main loop and are only accessed under the registry lock.
pub struct ClientEntry {
    pub handle: Arc<ClientHandle>,
    pub reader: JoinHandle<()>,
    pub atom_locks: Vec<AtomLock>,
    pub seen_parameter_version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use shared::{DraggerState, Ray};

    fn frame(tag: f32) -> StateUpdate {
        StateUpdate {
            draggers: vec![DraggerState {
                id: 1,
                ray_based: false,
                ray: Ray::new(Vec3::ZERO, Vec3::Z),
                transform: OnTransform::from_translation(Vec3::new(tag, 0.0, 0.0)),
                active: true,
            }],
        }
    }

    fn tag_of(update: &StateUpdate) -> f32 {
        update.draggers[0].transform.translation.x
    }

    #[test]
    fn empty_slots_yield_nothing() {
        let mut slots = InputSlots::default();
        assert!(slots.acquire().is_none());
    }

    #[test]
    fn single_publish_is_consumed_once() {
        let mut slots = InputSlots::default();
        let mut scratch = frame(1.0);
        slots.publish(&mut scratch);
        assert_eq!(tag_of(slots.acquire().unwrap()), 1.0);
        // no re-delivery of the same frame
        assert!(slots.acquire().is_none());
    }

    #[test]
    fn rapid_publishes_coalesce_to_the_latest() {
        let mut slots = InputSlots::default();
        for tag in [1.0, 2.0, 3.0] {
            let mut scratch = frame(tag);
            slots.publish(&mut scratch);
        }
        assert_eq!(tag_of(slots.acquire().unwrap()), 3.0);
        assert!(slots.acquire().is_none());
    }

    #[test]
    fn producer_never_overwrites_the_consumed_slot() {
        let mut slots = InputSlots::default();
        let mut scratch = frame(1.0);
        slots.publish(&mut scratch);
        assert_eq!(tag_of(slots.acquire().unwrap()), 1.0);

        // Publish a burst while the consumer sits on frame 1; the slot the
        // consumer last read must not be picked by the producer.
        for tag in [2.0, 3.0, 4.0, 5.0] {
            let mut scratch = frame(tag);
            slots.publish(&mut scratch);
            assert_eq!(tag_of(&slots.slots[slots.consumed]), 1.0);
        }
        assert_eq!(tag_of(slots.acquire().unwrap()), 5.0);
    }

    #[test]
    fn interleaved_publish_acquire_sees_every_latest_frame() {
        let mut slots = InputSlots::default();
        for round in 0..20 {
            let mut scratch = frame(round as f32);
            slots.publish(&mut scratch);
            assert_eq!(tag_of(slots.acquire().unwrap()), round as f32);
        }
    }

    #[test]
    fn indices_stay_in_slot_range() {
        let mut slots = InputSlots::default();
        for round in 0..50 {
            let mut scratch = frame(round as f32);
            slots.publish(&mut scratch);
            if round % 3 == 0 {
                slots.acquire();
            }
            assert!(slots.produced < 3 && slots.consumed < 3);
        }
    }

    #[test]
    fn published_frames_are_never_torn() {
        // A frame swapped in must come back out with a consistent dragger
        // list, regardless of how the scratch buffer was reused.
        let mut slots = InputSlots::default();
        let mut scratch = StateUpdate::default();
        for round in 1..=10usize {
            scratch.draggers.clear();
            for i in 0..round {
                scratch.draggers.push(DraggerState {
                    id: i as u32,
                    ray_based: false,
                    ray: Ray::new(Vec3::ZERO, Vec3::Z),
                    transform: OnTransform::IDENTITY,
                    active: true,
                });
            }
            slots.publish(&mut scratch);
            let seen = slots.acquire().unwrap();
            assert_eq!(seen.draggers.len(), round);
            for (i, d) in seen.draggers.iter().enumerate() {
                assert_eq!(d.id, i as u32);
            }
        }
    }
}
