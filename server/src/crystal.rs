//! The Jell-O crystal: a lattice of mass points ("atoms") connected by
//! springs, simulated with damped spring forces and gravity inside a
//! closed domain box.
//!
//! Atoms sit on an `nx × ny × nz` grid with unit spacing, centered on the
//! origin; the domain is the lattice extent padded by half a spacing on
//! every side. Structural springs connect axis neighbors, shear springs
//! connect face diagonals. Atoms locked by a dragger are kinematic: the
//! integrator skips them and their pose changes only through
//! [`Crystal::set_atom_state`].

use glam::Vec3;
use shared::wire::{MessageWriter, PipeError};
use shared::{OnTransform, Point, Ray, Scalar, Vector};
use tokio::io::AsyncWrite;

/// Distance between grid neighbors.
pub const ATOM_SPACING: Scalar = 1.0;

/// Stiffness of axis-neighbor springs.
const STRUCTURAL_STIFFNESS: Scalar = 60.0;
/// Stiffness of face-diagonal springs.
const SHEAR_STIFFNESS: Scalar = 25.0;
/// Velocity retained along the surface normal after hitting the domain wall.
const WALL_BOUNCE: Scalar = 0.3;
/// Longest integration sub-step that keeps the stiffest spring stable.
const MAX_SUBSTEP: Scalar = 0.005;
/// Longest frame the integrator will honor; a stalled frame beyond this is
/// truncated rather than simulated in thousands of sub-steps.
const MAX_FRAME_TIME: Scalar = 0.25;

const SQRT_2: Scalar = std::f32::consts::SQRT_2;

/// Spring topology: grid offset and rest length in units of the spacing.
const SPRINGS: [([i32; 3], Scalar); 9] = [
    ([1, 0, 0], 1.0),
    ([0, 1, 0], 1.0),
    ([0, 0, 1], 1.0),
    ([1, 1, 0], SQRT_2),
    ([1, -1, 0], SQRT_2),
    ([1, 0, 1], SQRT_2),
    ([1, 0, -1], SQRT_2),
    ([0, 1, 1], SQRT_2),
    ([0, 1, -1], SQRT_2),
];

/// Opaque handle to one atom, valid for the lifetime of the crystal that
/// issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtomId(usize);

#[derive(Debug, Clone)]
struct Atom {
    transform: OnTransform,
    velocity: Vector,
    locked: bool,
}

pub struct Crystal {
    num_atoms: [usize; 3],
    domain_min: Point,
    domain_max: Point,
    atoms: Vec<Atom>,
    // force accumulator, reused across steps
    forces: Vec<Vector>,
    atom_mass: Scalar,
    attenuation: Scalar,
    gravity: Scalar,
}

impl Crystal {
    pub fn new(num_atoms: [usize; 3]) -> Self {
        let [nx, ny, nz] = num_atoms;
        assert!(nx > 0 && ny > 0 && nz > 0, "crystal must have atoms");

        let extent = Vec3::new(
            (nx - 1) as Scalar * ATOM_SPACING,
            (ny - 1) as Scalar * ATOM_SPACING,
            (nz - 1) as Scalar * ATOM_SPACING,
        );
        let half = extent * 0.5;
        let margin = Vec3::splat(ATOM_SPACING * 0.5);

        let mut atoms = Vec::with_capacity(nx * ny * nz);
        for ix in 0..nx {
            for iy in 0..ny {
                for iz in 0..nz {
                    let position = Vec3::new(
                        ix as Scalar * ATOM_SPACING,
                        iy as Scalar * ATOM_SPACING,
                        iz as Scalar * ATOM_SPACING,
                    ) - half;
                    atoms.push(Atom {
                        transform: OnTransform::from_translation(position),
                        velocity: Vec3::ZERO,
                        locked: false,
                    });
                }
            }
        }

        let count = atoms.len();
        let defaults = shared::SimParameters::default();
        Self {
            num_atoms,
            domain_min: -half - margin,
            domain_max: half + margin,
            atoms,
            forces: vec![Vec3::ZERO; count],
            atom_mass: defaults.atom_mass,
            attenuation: defaults.attenuation,
            gravity: defaults.gravity,
        }
    }

    pub fn domain(&self) -> (Point, Point) {
        (self.domain_min, self.domain_max)
    }

    /// Grid dimensions in wire form.
    pub fn num_atoms(&self) -> [i32; 3] {
        [
            self.num_atoms[0] as i32,
            self.num_atoms[1] as i32,
            self.num_atoms[2] as i32,
        ]
    }

    pub fn atom_count(&self) -> usize {
        self.atoms.len()
    }

    pub fn atom_mass(&self) -> Scalar {
        self.atom_mass
    }

    pub fn set_atom_mass(&mut self, mass: Scalar) {
        self.atom_mass = mass.max(1e-6);
    }

    pub fn attenuation(&self) -> Scalar {
        self.attenuation
    }

    pub fn set_attenuation(&mut self, attenuation: Scalar) {
        self.attenuation = attenuation.clamp(0.0, 1.0);
    }

    pub fn gravity(&self) -> Scalar {
        self.gravity
    }

    pub fn set_gravity(&mut self, gravity: Scalar) {
        self.gravity = gravity;
    }

    fn index(&self, ix: usize, iy: usize, iz: usize) -> usize {
        (ix * self.num_atoms[1] + iy) * self.num_atoms[2] + iz
    }

    /// Nearest atom to a point.
    pub fn pick_atom(&self, position: Point) -> AtomId {
        let mut best = 0;
        let mut best_dist = Scalar::INFINITY;
        for (i, atom) in self.atoms.iter().enumerate() {
            let dist = atom.transform.translation.distance_squared(position);
            if dist < best_dist {
                best = i;
                best_dist = dist;
            }
        }
        AtomId(best)
    }

    /// Atom closest to the ray among those in front of its origin; falls
    /// back to the atom nearest the origin when the ray points away from
    /// the whole crystal (or has a degenerate direction).
    pub fn pick_atom_ray(&self, ray: &Ray) -> AtomId {
        let dir = ray.direction;
        if dir.length_squared() < 1e-12 {
            return self.pick_atom(ray.origin);
        }
        let dir = dir.normalize();

        let mut best = None;
        let mut best_dist = Scalar::INFINITY;
        for (i, atom) in self.atoms.iter().enumerate() {
            let to_atom = atom.transform.translation - ray.origin;
            let t = to_atom.dot(dir);
            if t < 0.0 {
                continue;
            }
            let dist = (to_atom - dir * t).length_squared();
            if dist < best_dist {
                best = Some(i);
                best_dist = dist;
            }
        }
        match best {
            Some(i) => AtomId(i),
            None => self.pick_atom(ray.origin),
        }
    }

    /// Attempt to lock an atom for dragging. Returns false if some dragger
    /// already holds it.
    pub fn lock_atom(&mut self, atom: AtomId) -> bool {
        let a = &mut self.atoms[atom.0];
        if a.locked {
            return false;
        }
        a.locked = true;
        a.velocity = Vec3::ZERO;
        true
    }

    pub fn unlock_atom(&mut self, atom: AtomId) {
        self.atoms[atom.0].locked = false;
    }

    pub fn is_locked(&self, atom: AtomId) -> bool {
        self.atoms[atom.0].locked
    }

    pub fn atom_state(&self, atom: AtomId) -> OnTransform {
        self.atoms[atom.0].transform
    }

    pub fn set_atom_state(&mut self, atom: AtomId, transform: OnTransform) {
        self.atoms[atom.0].transform = transform;
    }

    /// Advance the lattice by `dt` seconds, sub-stepping as needed to keep
    /// the springs stable.
    pub fn simulate(&mut self, dt: Scalar) {
        if !(dt > 0.0) {
            return;
        }
        let dt = dt.min(MAX_FRAME_TIME);
        let substeps = (dt / MAX_SUBSTEP).ceil().max(1.0) as usize;
        let h = dt / substeps as Scalar;
        for _ in 0..substeps {
            self.step(h);
        }
    }

    fn step(&mut self, h: Scalar) {
        let gravity_force = Vec3::new(0.0, 0.0, -self.gravity * self.atom_mass);
        for f in self.forces.iter_mut() {
            *f = gravity_force;
        }

        let [nx, ny, nz] = self.num_atoms;
        for ix in 0..nx {
            for iy in 0..ny {
                for iz in 0..nz {
                    let a = self.index(ix, iy, iz);
                    for (offset, rest) in SPRINGS {
                        let jx = ix as i32 + offset[0];
                        let jy = iy as i32 + offset[1];
                        let jz = iz as i32 + offset[2];
                        if jx < 0 || jy < 0 || jz < 0 {
                            continue;
                        }
                        let (jx, jy, jz) = (jx as usize, jy as usize, jz as usize);
                        if jx >= nx || jy >= ny || jz >= nz {
                            continue;
                        }
                        let b = self.index(jx, jy, jz);

                        let delta = self.atoms[b].transform.translation
                            - self.atoms[a].transform.translation;
                        let length = delta.length();
                        if length < 1e-6 {
                            continue;
                        }
                        let stiffness = if rest > 1.0 {
                            SHEAR_STIFFNESS
                        } else {
                            STRUCTURAL_STIFFNESS
                        };
                        let force = delta * (stiffness * (length - rest * ATOM_SPACING) / length);
                        self.forces[a] += force;
                        self.forces[b] -= force;
                    }
                }
            }
        }

        let damping = self.attenuation.powf(h);
        let inv_mass = 1.0 / self.atom_mass;
        for (atom, force) in self.atoms.iter_mut().zip(self.forces.iter()) {
            if atom.locked {
                continue;
            }
            atom.velocity += *force * (inv_mass * h);
            atom.velocity *= damping;
            let mut position = atom.transform.translation + atom.velocity * h;

            // keep the atom inside the domain box
            for axis in 0..3 {
                if position[axis] < self.domain_min[axis] {
                    position[axis] = self.domain_min[axis];
                    if atom.velocity[axis] < 0.0 {
                        atom.velocity[axis] *= -WALL_BOUNCE;
                    }
                } else if position[axis] > self.domain_max[axis] {
                    position[axis] = self.domain_max[axis];
                    if atom.velocity[axis] > 0.0 {
                        atom.velocity[axis] *= -WALL_BOUNCE;
                    }
                }
            }
            atom.transform.translation = position;
        }
    }

    /// Stream every atom pose in grid order (x-major, z fastest) — the
    /// payload of a `SERVER_UPDATE` message.
    pub async fn write_atom_states<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut MessageWriter<W>,
    ) -> Result<(), PipeError> {
        for atom in &self.atoms {
            writer.write_transform(&atom.transform).await?;
        }
        Ok(())
    }
}
