//! Simulation tick and state arbitration.
//!
//! [`World`] owns the crystal and is driven exclusively by the main loop:
//! each tick applies pending parameter changes, prunes dead clients,
//! ingests the latest dragger frame per client (resolving grab contention
//! through the crystal's atom locks), and advances the physics. Reader
//! tasks never touch the crystal; they only publish inputs.

use std::sync::{Arc, Mutex};

use log::{debug, info};
use shared::{SimParameters, StateUpdate};

use crate::client::{AtomLock, ClientEntry};
use crate::crystal::Crystal;

/// Pending simulation parameters, written by any client's reader task and
/// drained by the main loop. The version counter makes "has anything
/// changed" a cheap comparison and lets the broadcaster echo exactly once
/// per client per change.
pub struct SharedParameters {
    inner: Mutex<Pending>,
}

struct Pending {
    version: u64,
    values: SimParameters,
}

impl SharedParameters {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Pending {
                version: 1,
                values: SimParameters::default(),
            }),
        }
    }

    /// Overwrite the pending triple; only the latest submission wins.
    pub fn submit(&self, values: SimParameters) {
        let mut pending = self.inner.lock().unwrap();
        pending.version += 1;
        pending.values = values;
    }

    pub fn snapshot(&self) -> (u64, SimParameters) {
        let pending = self.inner.lock().unwrap();
        (pending.version, pending.values)
    }
}

impl Default for SharedParameters {
    fn default() -> Self {
        Self::new()
    }
}

/// The authoritative simulation state.
pub struct World {
    crystal: Crystal,
    params: Arc<SharedParameters>,
    applied_version: u64,
}

impl World {
    pub fn new(num_atoms: [usize; 3], params: Arc<SharedParameters>) -> Self {
        Self {
            crystal: Crystal::new(num_atoms),
            params,
            applied_version: 1,
        }
    }

    pub fn crystal(&self) -> &Crystal {
        &self.crystal
    }

    pub fn applied_version(&self) -> u64 {
        self.applied_version
    }

    /// The parameter triple as currently mirrored in the crystal.
    pub fn applied_parameters(&self) -> SimParameters {
        SimParameters {
            atom_mass: self.crystal.atom_mass(),
            attenuation: self.crystal.attenuation(),
            gravity: self.crystal.gravity(),
        }
    }

    /// One simulation tick: parameters, client pruning, input ingestion,
    /// physics. Called with the registry lock held.
    pub fn tick(&mut self, clients: &mut Vec<ClientEntry>, dt: f32) {
        self.apply_parameters();
        self.prune_dead(clients);
        for entry in clients.iter_mut() {
            self.ingest(entry);
        }
        self.crystal.simulate(dt);
    }

    fn apply_parameters(&mut self) {
        let (version, values) = self.params.snapshot();
        if version != self.applied_version {
            self.crystal.set_atom_mass(values.atom_mass);
            self.crystal.set_attenuation(values.attenuation);
            self.crystal.set_gravity(values.gravity);
            self.applied_version = version;
            debug!(
                "applied parameters v{version}: mass={} attenuation={} gravity={}",
                values.atom_mass, values.attenuation, values.gravity
            );
        }
    }

    /// Remove clients whose connection has died: release every atom they
    /// hold, stop their reader task, drop the entry.
    fn prune_dead(&mut self, clients: &mut Vec<ClientEntry>) {
        let crystal = &mut self.crystal;
        clients.retain_mut(|entry| {
            if !entry.handle.is_dead() {
                return true;
            }
            for lock in entry.atom_locks.drain(..) {
                crystal.unlock_atom(lock.atom);
            }
            entry.reader.abort();
            info!("client {} ({}) removed", entry.handle.id, entry.handle.addr);
            false
        });
    }

    /// Consume the client's latest dragger frame, if it published one since
    /// the last tick.
    fn ingest(&mut self, entry: &mut ClientEntry) {
        let mut input = entry.handle.input.lock().unwrap();
        if let Some(update) = input.acquire() {
            Self::arbitrate(
                &mut self.crystal,
                entry.handle.id,
                &mut entry.atom_locks,
                update,
            );
        }
    }

    /// Apply one dragger frame: acquire and release atom locks, and drive
    /// the held atoms to their dragged poses.
    fn arbitrate(
        crystal: &mut Crystal,
        client_id: u64,
        locks: &mut Vec<AtomLock>,
        update: &StateUpdate,
    ) {
        for dragger in &update.draggers {
            let existing = locks.iter().position(|l| l.dragger_id == dragger.id);
            if dragger.active {
                let held = match existing {
                    Some(i) => Some(i),
                    None => {
                        // Dragger just became active: pick and try to grab.
                        let atom = if dragger.ray_based {
                            crystal.pick_atom_ray(&dragger.ray)
                        } else {
                            crystal.pick_atom(dragger.transform.origin())
                        };
                        if crystal.lock_atom(atom) {
                            let drag_transform =
                                dragger.transform.inverse() * crystal.atom_state(atom);
                            locks.push(AtomLock {
                                dragger_id: dragger.id,
                                atom,
                                drag_transform,
                            });
                            Some(locks.len() - 1)
                        } else {
                            // Held by someone else; the grab retries on the
                            // next frame while the dragger stays active.
                            debug!(
                                "client {client_id} dragger {} lost the grab race",
                                dragger.id
                            );
                            None
                        }
                    }
                };
                if let Some(i) = held {
                    let lock = locks[i];
                    crystal.set_atom_state(lock.atom, dragger.transform * lock.drag_transform);
                }
            } else if let Some(i) = existing {
                let lock = locks.swap_remove(i);
                crystal.unlock_atom(lock.atom);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientHandle;
    use assert_approx_eq::assert_approx_eq;
    use glam::Vec3;
    use shared::wire::MessageWriter;
    use shared::{DraggerState, OnTransform, Ray};
    use tokio::net::{TcpListener, TcpStream};

    fn world() -> World {
        World::new([2, 2, 2], Arc::new(SharedParameters::new()))
    }

    fn dragger(id: u32, origin: Vec3, active: bool) -> DraggerState {
        DraggerState {
            id,
            ray_based: false,
            ray: Ray::new(Vec3::ZERO, Vec3::Z),
            transform: OnTransform::from_translation(origin),
            active,
        }
    }

    fn frame(draggers: Vec<DraggerState>) -> StateUpdate {
        StateUpdate { draggers }
    }

    #[test]
    fn parameter_application_is_monotonic_and_latest_wins() {
        let params = Arc::new(SharedParameters::new());
        let mut world = World::new([2, 2, 2], Arc::clone(&params));
        assert_eq!(world.applied_version(), 1);

        params.submit(SimParameters {
            atom_mass: 2.0,
            attenuation: 0.9,
            gravity: 1.0,
        });
        params.submit(SimParameters {
            atom_mass: 3.0,
            attenuation: 0.8,
            gravity: 2.0,
        });
        world.apply_parameters();

        // Two submissions, one application: the version catches up to the
        // highest pending value and only the latest triple sticks.
        assert_eq!(world.applied_version(), 3);
        assert_eq!(world.applied_parameters().atom_mass, 3.0);

        // Re-applying with nothing pending changes nothing.
        world.apply_parameters();
        assert_eq!(world.applied_version(), 3);
    }

    #[test]
    fn grab_locks_the_nearest_atom_and_follows_the_dragger() {
        let mut world = world();
        let mut locks = Vec::new();

        let grab_at = Vec3::new(0.5, 0.5, 0.5);
        World::arbitrate(
            &mut world.crystal,
            1,
            &mut locks,
            &frame(vec![dragger(1, grab_at, true)]),
        );
        assert_eq!(locks.len(), 1);
        let atom = locks[0].atom;
        assert!(world.crystal.is_locked(atom));
        let grab_pose = world.crystal.atom_state(atom).translation;

        // Move the dragger; the atom pose translates by the same amount
        // relative to its pose at grab time.
        World::arbitrate(
            &mut world.crystal,
            1,
            &mut locks,
            &frame(vec![dragger(1, grab_at + Vec3::new(0.1, 0.0, 0.0), true)]),
        );
        let moved = world.crystal.atom_state(atom).translation;
        assert_approx_eq!(moved.x - grab_pose.x, 0.1, 1e-5);
        assert_approx_eq!(moved.y, grab_pose.y, 1e-5);
        assert_approx_eq!(moved.z, grab_pose.z, 1e-5);
    }

    #[test]
    fn contended_grab_goes_to_exactly_one_client() {
        let mut world = world();
        let mut locks_a = Vec::new();
        let mut locks_b = Vec::new();
        let target = Vec3::new(0.5, 0.5, 0.5);

        World::arbitrate(
            &mut world.crystal,
            1,
            &mut locks_a,
            &frame(vec![dragger(1, target, true)]),
        );
        World::arbitrate(
            &mut world.crystal,
            2,
            &mut locks_b,
            &frame(vec![dragger(1, target, true)]),
        );

        assert_eq!(locks_a.len(), 1);
        assert!(locks_b.is_empty());
        assert!(world.crystal.is_locked(locks_a[0].atom));
    }

    #[test]
    fn losing_dragger_retries_and_wins_after_release() {
        let mut world = world();
        let mut locks_a = Vec::new();
        let mut locks_b = Vec::new();
        let target = Vec3::new(0.5, 0.5, 0.5);

        World::arbitrate(
            &mut world.crystal,
            1,
            &mut locks_a,
            &frame(vec![dragger(1, target, true)]),
        );
        World::arbitrate(
            &mut world.crystal,
            2,
            &mut locks_b,
            &frame(vec![dragger(1, target, true)]),
        );
        assert!(locks_b.is_empty());

        // Client A lets go; client B's still-active dragger grabs on its
        // next frame.
        World::arbitrate(
            &mut world.crystal,
            1,
            &mut locks_a,
            &frame(vec![dragger(1, target, false)]),
        );
        assert!(locks_a.is_empty());
        World::arbitrate(
            &mut world.crystal,
            2,
            &mut locks_b,
            &frame(vec![dragger(1, target, true)]),
        );
        assert_eq!(locks_b.len(), 1);
    }

    #[test]
    fn absent_dragger_keeps_its_lock() {
        let mut world = world();
        let mut locks = Vec::new();
        World::arbitrate(
            &mut world.crystal,
            1,
            &mut locks,
            &frame(vec![dragger(1, Vec3::new(0.5, 0.5, 0.5), true)]),
        );
        let atom = locks[0].atom;

        // A frame that simply omits the dragger does not release the grab;
        // only an explicit active=false does.
        World::arbitrate(&mut world.crystal, 1, &mut locks, &frame(vec![]));
        assert_eq!(locks.len(), 1);
        assert!(world.crystal.is_locked(atom));

        World::arbitrate(
            &mut world.crystal,
            1,
            &mut locks,
            &frame(vec![dragger(1, Vec3::new(0.5, 0.5, 0.5), false)]),
        );
        assert!(locks.is_empty());
        assert!(!world.crystal.is_locked(atom));
    }

    #[test]
    fn one_client_can_hold_several_atoms() {
        let mut world = world();
        let mut locks = Vec::new();
        World::arbitrate(
            &mut world.crystal,
            1,
            &mut locks,
            &frame(vec![
                dragger(1, Vec3::new(0.5, 0.5, 0.5), true),
                dragger(2, Vec3::new(-0.5, -0.5, -0.5), true),
                dragger(3, Vec3::new(0.5, -0.5, 0.5), true),
            ]),
        );
        assert_eq!(locks.len(), 3);
        let mut atoms: Vec<_> = locks.iter().map(|l| l.atom).collect();
        atoms.dedup();
        assert_eq!(atoms.len(), 3);
    }

    async fn loopback_entry(id: u64) -> (ClientEntry, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (stream, addr) = listener.accept().await.unwrap();
        let (_read, write) = stream.into_split();
        let handle = Arc::new(ClientHandle::new(id, addr, MessageWriter::new(write)));
        let entry = ClientEntry {
            handle,
            reader: tokio::spawn(async {}),
            atom_locks: Vec::new(),
            seen_parameter_version: 1,
        };
        (entry, peer)
    }

    #[tokio::test]
    async fn dead_client_releases_every_lock_on_the_next_tick() {
        let mut world = world();
        let (mut entry, _peer) = loopback_entry(1).await;

        World::arbitrate(
            &mut world.crystal,
            1,
            &mut entry.atom_locks,
            &frame(vec![
                dragger(1, Vec3::new(0.5, 0.5, 0.5), true),
                dragger(2, Vec3::new(-0.5, -0.5, -0.5), true),
                dragger(3, Vec3::new(0.5, -0.5, 0.5), true),
            ]),
        );
        let atoms: Vec<_> = entry.atom_locks.iter().map(|l| l.atom).collect();
        assert_eq!(atoms.len(), 3);

        entry.handle.mark_dead();
        let mut clients = vec![entry];
        world.tick(&mut clients, 0.01);

        assert!(clients.is_empty());
        for atom in atoms {
            assert!(!world.crystal.is_locked(atom));
        }
    }

    #[tokio::test]
    async fn tick_ingests_only_the_latest_published_frame() {
        let mut world = world();
        let (entry, _peer) = loopback_entry(1).await;

        // Three frames between ticks: the first two grab nothing because
        // they are coalesced away; only the third drives the crystal.
        {
            let mut slots = entry.handle.input.lock().unwrap();
            let mut a = frame(vec![dragger(1, Vec3::new(-0.5, -0.5, -0.5), true)]);
            let mut b = frame(vec![]);
            let mut c = frame(vec![dragger(2, Vec3::new(0.5, 0.5, 0.5), true)]);
            slots.publish(&mut a);
            slots.publish(&mut b);
            slots.publish(&mut c);
        }

        let mut clients = vec![entry];
        world.tick(&mut clients, 0.01);

        assert_eq!(clients[0].atom_locks.len(), 1);
        assert_eq!(clients[0].atom_locks[0].dragger_id, 2);
    }
}
