//! One rigid-body world per declared `Physics2D` entity. Positions in map
//! space are pixels with the body origin at the shape's top-left corner;
//! rapier works in meters at the world's pixels-per-meter scale with body
//! origins at the center, so every crossing converts both.

use glam::Vec2;
use rapier2d::geometry::{CollisionEvent, CollisionEventFlags};
use rapier2d::pipeline::{ActiveEvents, EventHandler};
use rapier2d::prelude::{
    CCDSolver, ColliderBuilder, ColliderHandle, ColliderSet, ContactPair, DefaultBroadPhase, Group,
    ImpulseJointSet, IntegrationParameters, InteractionGroups, IslandManager, MultibodyJointSet,
    NarrowPhase, PhysicsPipeline, QueryPipeline, Real, RigidBodyBuilder, RigidBodyHandle, RigidBodySet,
    Vector,
};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;

pub const PHYSICS_TIMESTEP: f32 = 1.0 / 60.0;
const SOLVER_ITERATIONS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactPhase {
    Begin,
    End,
}

/// Geometry of the body to create, in map units.
pub struct BodySpec {
    pub is_disk: bool,
    pub position: Vec2,
    pub size: Vec2,
    pub radius: f32,
    pub rotation_deg: f32,
    pub category: u16,
    pub mask: u16,
}

/// Options parsed from an `ApplyPhysics2D` command.
#[derive(Debug, Clone)]
pub struct BodyOptions {
    pub dynamic: bool,
    pub friction: f32,
    pub restitution: f32,
    pub density: f32,
    pub fixed_rotation: bool,
    pub bullet: bool,
}

impl Default for BodyOptions {
    fn default() -> Self {
        BodyOptions {
            dynamic: false,
            friction: 0.3,
            restitution: 0.0,
            density: 0.0,
            fixed_rotation: false,
            bullet: false,
        }
    }
}

struct CollisionEventCollector {
    events: Mutex<Vec<CollisionEvent>>,
}

impl CollisionEventCollector {
    fn new() -> Self {
        Self { events: Mutex::new(Vec::new()) }
    }

    fn drain(&self) -> Vec<CollisionEvent> {
        match self.events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(_) => Vec::new(),
        }
    }
}

impl EventHandler for CollisionEventCollector {
    fn handle_collision_event(
        &self,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        event: CollisionEvent,
        _contact_pair: Option<&ContactPair>,
    ) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    fn handle_contact_force_event(
        &self,
        _dt: Real,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        _contact_pair: &ContactPair,
        _total_force_magnitude: Real,
    ) {
    }
}

pub struct PhysicsWorld2D {
    pipeline: PhysicsPipeline,
    gravity: Vector<Real>,
    integration_parameters: IntegrationParameters,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,
    collider_shapes: HashMap<ColliderHandle, String>,
    event_collector: CollisionEventCollector,
    ppm: f32,
}

impl PhysicsWorld2D {
    /// `gravity` is the declared map option in y-up convention; worlds run
    /// in screen coordinates, so the y component flips here.
    pub fn new(gravity: Vec2, ppm: f32) -> Self {
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = PHYSICS_TIMESTEP;
        if let Some(iterations) = NonZeroUsize::new(SOLVER_ITERATIONS) {
            integration_parameters.num_solver_iterations = iterations;
        }
        Self {
            pipeline: PhysicsPipeline::new(),
            gravity: Vector::new(gravity.x, -gravity.y),
            integration_parameters,
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            collider_shapes: HashMap::new(),
            event_collector: CollisionEventCollector::new(),
            ppm,
        }
    }

    pub fn ppm(&self) -> f32 {
        self.ppm
    }

    fn groups(category: u16, mask: u16) -> InteractionGroups {
        InteractionGroups::new(
            Group::from_bits_truncate(category as u32),
            Group::from_bits_truncate(mask as u32),
        )
    }

    /// Creates a body plus one fixture for the given shape and registers the
    /// collider under the shape's name for contact resolution.
    pub fn add_body(&mut self, shape_name: &str, spec: &BodySpec, options: &BodyOptions) -> RigidBodyHandle {
        let ppm = self.ppm;
        let center = (spec.position + spec.size * 0.5) / ppm;
        // A zero density forces a static body.
        let dynamic = options.dynamic && options.density > 0.0;

        let builder = if dynamic { RigidBodyBuilder::dynamic() } else { RigidBodyBuilder::fixed() };
        let body = builder
            .translation(Vector::new(center.x, center.y))
            .rotation(spec.rotation_deg.to_radians())
            .ccd_enabled(options.bullet)
            .build();
        let body_handle = self.bodies.insert(body);
        if options.fixed_rotation {
            if let Some(body) = self.bodies.get_mut(body_handle) {
                body.lock_rotations(true, false);
            }
        }

        let collider = if spec.is_disk {
            ColliderBuilder::ball(spec.radius / ppm)
        } else {
            ColliderBuilder::cuboid(spec.size.x * 0.5 / ppm, spec.size.y * 0.5 / ppm)
        }
        .friction(options.friction)
        .restitution(options.restitution)
        .density(options.density.max(0.0))
        .collision_groups(Self::groups(spec.category, spec.mask))
        .active_events(ActiveEvents::COLLISION_EVENTS)
        .build();
        let collider_handle = self.colliders.insert_with_parent(collider, body_handle, &mut self.bodies);
        self.collider_shapes.insert(collider_handle, shape_name.to_string());
        body_handle
    }

    /// Static collision box for a merged run of layer tiles; `center` and
    /// `half` are in map units.
    pub fn add_static_tile(&mut self, center: Vec2, half: Vec2, category: u16) {
        let ppm = self.ppm;
        let body = RigidBodyBuilder::fixed()
            .translation(Vector::new(center.x / ppm, center.y / ppm))
            .build();
        let body_handle = self.bodies.insert(body);
        let collider = ColliderBuilder::cuboid(half.x / ppm, half.y / ppm)
            .friction(0.1)
            .collision_groups(Self::groups(category, 0xffff))
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .build();
        self.colliders.insert_with_parent(collider, body_handle, &mut self.bodies);
    }

    pub fn remove_body(&mut self, handle: RigidBodyHandle) {
        let collider_handles: Vec<ColliderHandle> = self
            .bodies
            .get(handle)
            .map(|body| body.colliders().iter().copied().collect())
            .unwrap_or_default();
        for collider in collider_handles {
            self.collider_shapes.remove(&collider);
        }
        let _ = self.bodies.remove(
            handle,
            &mut self.island_manager,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
    }

    /// Advances the world by the fixed timestep.
    pub fn step(&mut self) {
        let hooks = ();
        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &hooks,
            &self.event_collector,
        );
        self.query_pipeline.update(&self.colliders);
    }

    /// Collision begin/end events since the last drain, resolved back to
    /// shape names through the collider registry.
    pub fn drain_contacts(&mut self) -> Vec<(ContactPhase, String, String)> {
        let mut out = Vec::new();
        for event in self.event_collector.drain() {
            let (phase, a, b, flags) = match event {
                CollisionEvent::Started(a, b, flags) => (ContactPhase::Begin, a, b, flags),
                CollisionEvent::Stopped(a, b, flags) => (ContactPhase::End, a, b, flags),
            };
            if flags.contains(CollisionEventFlags::SENSOR) {
                continue;
            }
            if let (Some(name_a), Some(name_b)) =
                (self.collider_shapes.get(&a), self.collider_shapes.get(&b))
            {
                out.push((phase, name_a.clone(), name_b.clone()));
            }
        }
        out
    }

    /// Simulated transform converted back to map units: top-left position in
    /// pixels and rotation in degrees.
    pub fn body_transform(&self, handle: RigidBodyHandle, size: Vec2) -> Option<(Vec2, f32)> {
        let body = self.bodies.get(handle)?;
        let center = body.translation();
        let position = Vec2::new(center.x, center.y) * self.ppm - size * 0.5;
        Some((position, body.rotation().angle().to_degrees()))
    }

    pub fn set_body_position(&mut self, handle: RigidBodyHandle, position: Vec2, size: Vec2) {
        let ppm = self.ppm;
        if let Some(body) = self.bodies.get_mut(handle) {
            let center = (position + size * 0.5) / ppm;
            body.set_translation(Vector::new(center.x, center.y), true);
        }
    }

    pub fn set_linear_velocity(&mut self, handle: RigidBodyHandle, velocity: Vec2) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.set_linvel(Vector::new(velocity.x, velocity.y), true);
        }
    }

    pub fn linear_velocity(&self, handle: RigidBodyHandle) -> Option<Vec2> {
        self.bodies.get(handle).map(|body| {
            let v = body.linvel();
            Vec2::new(v.x, v.y)
        })
    }

    pub fn apply_force(&mut self, handle: RigidBodyHandle, force: Vec2) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.reset_forces(true);
            body.add_force(Vector::new(force.x, force.y), true);
        }
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn contact_count(&self) -> usize {
        self.narrow_phase.contact_pairs().count()
    }
}
