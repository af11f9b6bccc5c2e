// pmove.rs -- Player movement code
//
// Shared by the server (authoritative) and the client (prediction). Given the
// same PlayerMove, command and physents it must produce bit-identical results
// on both ends.

use std::sync::Arc;

use crate::cmodel::{hull_point_contents, recursive_hull_check, BoxHull, BrushModel, GeometryError, Hull};
use crate::common::com_dprintf;
use crate::crc::crc_floats;
use crate::cvar::{CvarContext, CvarFlags};
use crate::q_shared::{
    angle_vectors, cross_product, dot_product, vector_add, vector_length, vector_normalize,
    vector_subtract, Buttons, Trace, UserCmd, Vec3, BUTTON_JUMP, CONTENTS_EMPTY, CONTENTS_SLIME,
    CONTENTS_SOLID, CONTENTS_WATER, VEC3_ORIGIN,
};

// ============================================================
// Constants
// ============================================================

pub const STEPSIZE: f32 = 18.0;
pub const STOP_EPSILON: f32 = 0.1;
pub const MAX_CLIP_PLANES: usize = 5;
pub const MAX_PHYSENTS: usize = 32;
pub const MAX_TOUCH: usize = 32;
const MIN_STEP_NORMAL: f32 = 0.7;

pub const PLAYER_MINS: Vec3 = [-16.0, -16.0, -24.0];
pub const PLAYER_MAXS: Vec3 = [16.0, 16.0, 32.0];

// ============================================================
// Movement tunables
// ============================================================

/// Movement constants. Both ends of a connection must agree on every bit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveVars {
    pub gravity: f32,
    pub stopspeed: f32,
    pub maxspeed: f32,
    pub spectatormaxspeed: f32,
    pub accelerate: f32,
    pub airaccelerate: f32,
    pub wateraccelerate: f32,
    pub friction: f32,
    pub waterfriction: f32,
    pub entgravity: f32,
}

impl Default for MoveVars {
    fn default() -> Self {
        Self {
            gravity: 800.0,
            stopspeed: 100.0,
            maxspeed: 320.0,
            spectatormaxspeed: 500.0,
            accelerate: 10.0,
            airaccelerate: 0.7,
            wateraccelerate: 10.0,
            friction: 4.0,
            waterfriction: 1.0,
            entgravity: 1.0,
        }
    }
}

const MOVEVAR_CVARS: [(&str, &str); 9] = [
    ("sv_gravity", "800"),
    ("sv_stopspeed", "100"),
    ("sv_maxspeed", "320"),
    ("sv_spectatormaxspeed", "500"),
    ("sv_accelerate", "10"),
    ("sv_airaccelerate", "0.7"),
    ("sv_wateraccelerate", "10"),
    ("sv_friction", "4"),
    ("sv_waterfriction", "1"),
];

impl MoveVars {
    /// Create the movement cvars with their default values.
    pub fn register_cvars(cvars: &mut CvarContext) {
        for (name, value) in MOVEVAR_CVARS {
            cvars.get(name, value, CvarFlags::SERVERINFO);
        }
    }

    /// Read the current movement cvars. Missing cvars keep their defaults.
    pub fn from_cvars(cvars: &CvarContext) -> Self {
        let d = Self::default();
        let read = |name: &str, default: f32| cvars.find_var(name).map_or(default, |v| v.value);
        Self {
            gravity: read("sv_gravity", d.gravity),
            stopspeed: read("sv_stopspeed", d.stopspeed),
            maxspeed: read("sv_maxspeed", d.maxspeed),
            spectatormaxspeed: read("sv_spectatormaxspeed", d.spectatormaxspeed),
            accelerate: read("sv_accelerate", d.accelerate),
            airaccelerate: read("sv_airaccelerate", d.airaccelerate),
            wateraccelerate: read("sv_wateraccelerate", d.wateraccelerate),
            friction: read("sv_friction", d.friction),
            waterfriction: read("sv_waterfriction", d.waterfriction),
            entgravity: d.entgravity,
        }
    }

    pub fn checksum(&self) -> u16 {
        crc_floats(&[
            self.gravity,
            self.stopspeed,
            self.maxspeed,
            self.spectatormaxspeed,
            self.accelerate,
            self.airaccelerate,
            self.wateraccelerate,
            self.friction,
            self.waterfriction,
            self.entgravity,
        ])
    }
}

bitflags::bitflags! {
    /// What stopped a slide move.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Blocked: u32 {
        /// a floor (normal z > 0.7)
        const FLOOR = 1;
        /// a step or wall (vertical surface)
        const STEP  = 2;
    }
}

// ============================================================
// Physents and move state
// ============================================================

/// A collidable snapshot for one tick. Physent 0 is always the world.
#[derive(Debug, Clone, Default)]
pub struct PhysEnt {
    pub origin: Vec3,
    /// only for bsp models
    pub model: Option<Arc<BrushModel>>,
    /// only for non-bsp models
    pub mins: Vec3,
    pub maxs: Vec3,
    /// for client or server to identify
    pub info: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerMove {
    // player state
    pub origin: Vec3,
    pub angles: Vec3,
    pub velocity: Vec3,
    pub oldbuttons: Buttons,
    pub waterjumptime: f32,
    pub dead: bool,
    pub spectator: bool,

    // world state
    pub cmd: UserCmd,

    // results
    pub onground: i32,
    pub waterlevel: i32,
    pub watertype: i32,
    pub touchindex: Vec<i32>,
}

impl Default for PlayerMove {
    fn default() -> Self {
        Self {
            origin: VEC3_ORIGIN,
            angles: VEC3_ORIGIN,
            velocity: VEC3_ORIGIN,
            oldbuttons: Buttons::empty(),
            waterjumptime: 0.0,
            dead: false,
            spectator: false,
            cmd: UserCmd::default(),
            onground: -1,
            waterlevel: 0,
            watertype: CONTENTS_EMPTY,
            touchindex: Vec::new(),
        }
    }
}

// ============================================================
// Callbacks trait -- the collision queries the solver needs
// ============================================================

pub trait PmoveCallbacks {
    /// Sweep the player box from start to end against everything solid.
    fn trace(&mut self, start: &Vec3, end: &Vec3) -> Result<Trace, GeometryError>;
    /// World contents at a point.
    fn point_contents(&mut self, point: &Vec3) -> Result<i32, GeometryError>;
    /// True if the player box fits at `point`.
    fn test_position(&mut self, point: &Vec3) -> Result<bool, GeometryError>;
}

// ============================================================
// MoveContext -- physents plus a private box hull
// ============================================================

#[derive(Debug, Clone, Default)]
pub struct MoveContext {
    pub physents: Vec<PhysEnt>,
    box_hull: BoxHull,
}

impl MoveContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_world(world: Arc<BrushModel>) -> Self {
        let mut ctx = Self::new();
        ctx.set_world(world);
        ctx
    }

    /// Reset the physent list to just the world.
    pub fn set_world(&mut self, world: Arc<BrushModel>) {
        self.physents.clear();
        self.physents.push(PhysEnt {
            model: Some(world),
            ..Default::default()
        });
    }

    /// Add a physent, refusing once MAX_PHYSENTS is reached.
    pub fn add_physent(&mut self, pe: PhysEnt) -> bool {
        if self.physents.len() >= MAX_PHYSENTS {
            com_dprintf("MoveContext: too many physents\n");
            return false;
        }
        self.physents.push(pe);
        true
    }

    fn physent_hull<'h>(box_hull: &'h mut BoxHull, pe: &'h PhysEnt) -> &'h Hull {
        match &pe.model {
            Some(model) => model.hull(1),
            None => {
                let mins = vector_subtract(&pe.mins, &PLAYER_MAXS);
                let maxs = vector_subtract(&pe.maxs, &PLAYER_MINS);
                box_hull.hull_for_box(&mins, &maxs)
            }
        }
    }

    /// Sweep the player box through every physent, keeping the nearest impact.
    pub fn player_trace(&mut self, start: &Vec3, end: &Vec3) -> Result<Trace, GeometryError> {
        let mut total = Trace {
            endpos: *end,
            ..Trace::default()
        };

        let Self { physents, box_hull } = self;
        for (i, pe) in physents.iter().enumerate() {
            let hull = Self::physent_hull(box_hull, pe);
            let offset = pe.origin;

            let start_l = vector_subtract(start, &offset);
            let end_l = vector_subtract(end, &offset);

            // fill in a default trace
            let mut trace = Trace::unclipped(end);

            // trace a line through the apropriate clipping hull
            recursive_hull_check(hull, hull.firstclipnode, 0.0, 1.0, &start_l, &end_l, &mut trace)?;

            if trace.allsolid {
                trace.startsolid = true;
            }
            if trace.startsolid {
                trace.fraction = 0.0;
            }

            // did we clip the move?
            if trace.fraction < total.fraction {
                trace.endpos = vector_add(&trace.endpos, &offset);
                trace.ent = i as i32;
                total = trace;
            }
        }

        Ok(total)
    }

    /// Contents of the world's point hull; EMPTY without a world.
    pub fn point_contents(&self, p: &Vec3) -> Result<i32, GeometryError> {
        match self.physents.first().and_then(|pe| pe.model.as_ref()) {
            Some(world) => {
                let hull = world.hull(0);
                hull_point_contents(hull, hull.firstclipnode, p)
            }
            None => Ok(CONTENTS_EMPTY),
        }
    }

    /// Returns false if the given player position is not valid (in solid).
    pub fn test_player_position(&mut self, pos: &Vec3) -> Result<bool, GeometryError> {
        let Self { physents, box_hull } = self;
        for pe in physents.iter() {
            let hull = Self::physent_hull(box_hull, pe);
            let test = vector_subtract(pos, &pe.origin);
            if hull_point_contents(hull, hull.firstclipnode, &test)? == CONTENTS_SOLID {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl PmoveCallbacks for MoveContext {
    fn trace(&mut self, start: &Vec3, end: &Vec3) -> Result<Trace, GeometryError> {
        self.player_trace(start, end)
    }

    fn point_contents(&mut self, point: &Vec3) -> Result<i32, GeometryError> {
        MoveContext::point_contents(self, point)
    }

    fn test_position(&mut self, point: &Vec3) -> Result<bool, GeometryError> {
        self.test_player_position(point)
    }
}

// ============================================================
// Pmove local state -- rebuilt for each player_move call
// ============================================================

#[derive(Clone, Default)]
struct PmLocal {
    forward: Vec3,
    right: Vec3,
    frametime: f32,
}

/// Planes a slide move was clipped against since it last made progress.
#[derive(Clone, Copy, Default)]
struct ClipPlanes {
    normals: [Vec3; MAX_CLIP_PLANES],
    count: usize,
}

impl ClipPlanes {
    fn as_slice(&self) -> &[Vec3] {
        &self.normals[..self.count]
    }
}

struct PmoveContext<'a, C: PmoveCallbacks> {
    pm: &'a mut PlayerMove,
    pml: PmLocal,
    cb: &'a mut C,
    mv: &'a MoveVars,
}

/// Slide off of the impacting surface.
pub fn clip_velocity(inv: &Vec3, normal: &Vec3, overbounce: f32) -> (Vec3, Blocked) {
    let mut blocked = Blocked::empty();
    if normal[2] > 0.0 {
        blocked |= Blocked::FLOOR; // floor
    }
    if normal[2] == 0.0 {
        blocked |= Blocked::STEP; // step
    }

    let backoff = dot_product(inv, normal) * overbounce;

    let mut out = [0.0f32; 3];
    for i in 0..3 {
        let change = normal[i] * backoff;
        out[i] = inv[i] - change;
        if out[i] > -STOP_EPSILON && out[i] < STOP_EPSILON {
            out[i] = 0.0;
        }
    }
    (out, blocked)
}

impl<'a, C: PmoveCallbacks> PmoveContext<'a, C> {
    fn add_touch(&mut self, ent: i32) {
        if self.pm.touchindex.len() < MAX_TOUCH {
            self.pm.touchindex.push(ent);
        }
    }

    // --------------------------------------------------------
    // PM_FlyMove
    // --------------------------------------------------------
    fn slide_move(&mut self) -> Result<(Blocked, ClipPlanes), GeometryError> {
        let numbumps = 4;
        let mut blocked = Blocked::empty();
        let original_velocity = self.pm.velocity;
        let primal_velocity = self.pm.velocity;
        let mut planes = ClipPlanes::default();

        let mut time_left = self.pml.frametime;

        for _bumpcount in 0..numbumps {
            let end = [
                self.pm.origin[0] + time_left * self.pm.velocity[0],
                self.pm.origin[1] + time_left * self.pm.velocity[1],
                self.pm.origin[2] + time_left * self.pm.velocity[2],
            ];

            let trace = self.cb.trace(&self.pm.origin, &end)?;

            if trace.startsolid || trace.allsolid {
                // entity is trapped in another solid
                self.pm.velocity = VEC3_ORIGIN;
                return Ok((Blocked::FLOOR | Blocked::STEP, ClipPlanes::default()));
            }

            if trace.fraction > 0.0 {
                // actually covered some distance
                self.pm.origin = trace.endpos;
                planes.count = 0;
            }

            if trace.fraction == 1.0 {
                break; // moved the entire distance
            }

            // save entity for contact
            self.add_touch(trace.ent);

            if trace.plane.normal[2] > MIN_STEP_NORMAL {
                blocked |= Blocked::FLOOR;
            }
            if trace.plane.normal[2] == 0.0 {
                blocked |= Blocked::STEP;
            }

            time_left -= time_left * trace.fraction;

            // cliped to another plane
            if planes.count >= MAX_CLIP_PLANES {
                // this shouldn't really happen
                self.pm.velocity = VEC3_ORIGIN;
                break;
            }

            planes.normals[planes.count] = trace.plane.normal;
            planes.count += 1;

            // modify original_velocity so it parallels all of the clip planes
            let found = planes.as_slice().iter().enumerate().find_map(|(i, plane)| {
                let (clipped, _) = clip_velocity(&original_velocity, plane, 1.0);
                let ok = planes
                    .as_slice()
                    .iter()
                    .enumerate()
                    .all(|(j, other)| j == i || dot_product(&clipped, other) >= 0.0);
                ok.then_some(clipped)
            });

            match found {
                // go along this plane
                Some(v) => self.pm.velocity = v,
                None => {
                    // go along the crease
                    if planes.count != 2 {
                        self.pm.velocity = VEC3_ORIGIN;
                        break;
                    }
                    let dir = cross_product(&planes.normals[0], &planes.normals[1]);
                    let d = dot_product(&dir, &self.pm.velocity);
                    self.pm.velocity = [dir[0] * d, dir[1] * d, dir[2] * d];
                }
            }

            // if velocity is against the original velocity, stop dead
            // to avoid tiny occilations in sloping corners
            if dot_product(&self.pm.velocity, &primal_velocity) <= 0.0 {
                self.pm.velocity = VEC3_ORIGIN;
                break;
            }
        }

        if self.pm.waterjumptime > 0.0 {
            self.pm.velocity = primal_velocity;
        }
        Ok((blocked, planes))
    }

    fn fly_move(&mut self) -> Result<Blocked, GeometryError> {
        self.slide_move().map(|(blocked, _)| blocked)
    }

    // --------------------------------------------------------
    // PM_GroundMove -- player is on ground, with no upwards velocity
    // --------------------------------------------------------
    fn ground_move(&mut self) -> Result<(), GeometryError> {
        self.pm.velocity[2] = 0.0;
        if self.pm.velocity[0] == 0.0 && self.pm.velocity[1] == 0.0 && self.pm.velocity[2] == 0.0 {
            return Ok(());
        }

        let ft = self.pml.frametime;

        // first try just moving to the destination
        let dest = [
            self.pm.origin[0] + self.pm.velocity[0] * ft,
            self.pm.origin[1] + self.pm.velocity[1] * ft,
            self.pm.origin[2],
        ];

        let trace = self.cb.trace(&self.pm.origin, &dest)?;
        if trace.fraction == 1.0 {
            self.pm.origin = trace.endpos;
            return Ok(());
        }

        // try sliding forward both on ground and up 16 pixels
        // take the move that goes farthest
        let original = self.pm.origin;
        let originalvel = self.pm.velocity;

        // slide move
        self.fly_move()?;

        let down = self.pm.origin;
        let downvel = self.pm.velocity;

        self.pm.origin = original;
        self.pm.velocity = originalvel;

        // move up a stair height
        let mut dest = self.pm.origin;
        dest[2] += STEPSIZE;
        let trace = self.cb.trace(&self.pm.origin, &dest)?;
        if !trace.startsolid && !trace.allsolid {
            self.pm.origin = trace.endpos;
        }

        // slide move
        self.fly_move()?;

        // press down the stepheight
        let mut dest = self.pm.origin;
        dest[2] -= STEPSIZE;
        let trace = self.cb.trace(&self.pm.origin, &dest)?;
        if trace.plane.normal[2] < MIN_STEP_NORMAL {
            self.pm.origin = down;
            self.pm.velocity = downvel;
            return Ok(());
        }
        if !trace.startsolid && !trace.allsolid {
            self.pm.origin = trace.endpos;
        }
        let up = self.pm.origin;

        // decide which one went farther
        let downdist = (down[0] - original[0]) * (down[0] - original[0])
            + (down[1] - original[1]) * (down[1] - original[1]);
        let updist = (up[0] - original[0]) * (up[0] - original[0])
            + (up[1] - original[1]) * (up[1] - original[1]);

        if downdist > updist {
            self.pm.origin = down;
            self.pm.velocity = downvel;
        } else {
            // copy z value from slide move
            self.pm.velocity[2] = downvel[2];
        }
        Ok(())
    }

    // --------------------------------------------------------
    // PM_Friction -- handles both ground friction and water friction
    // --------------------------------------------------------
    fn friction(&mut self) -> Result<(), GeometryError> {
        if self.pm.waterjumptime > 0.0 {
            return Ok(());
        }

        let vel = self.pm.velocity;
        let speed = vector_length(&vel);
        if speed < 1.0 {
            self.pm.velocity[0] = 0.0;
            self.pm.velocity[1] = 0.0;
            return Ok(());
        }

        let mut friction = self.mv.friction;

        // if the leading edge is over a dropoff, increase friction
        if self.pm.onground != -1 {
            let start = [
                self.pm.origin[0] + vel[0] / speed * 16.0,
                self.pm.origin[1] + vel[1] / speed * 16.0,
                self.pm.origin[2] + PLAYER_MINS[2],
            ];
            let stop = [start[0], start[1], start[2] - 34.0];

            let trace = self.cb.trace(&start, &stop)?;
            if trace.fraction == 1.0 {
                friction *= 2.0;
            }
        }

        let mut drop = 0.0;
        if self.pm.waterlevel >= 2 {
            // apply water friction
            drop += speed * self.mv.waterfriction * self.pm.waterlevel as f32 * self.pml.frametime;
        } else if self.pm.onground != -1 {
            // apply ground friction
            let control = speed.max(self.mv.stopspeed);
            drop += control * friction * self.pml.frametime;
        }

        // scale the velocity
        let newspeed = (speed - drop).max(0.0) / speed;
        for v in self.pm.velocity.iter_mut() {
            *v *= newspeed;
        }
        Ok(())
    }

    // --------------------------------------------------------
    // PM_Accelerate
    // --------------------------------------------------------
    fn accelerate(&mut self, wishdir: &Vec3, wishspeed: f32, accel: f32) {
        if self.pm.dead || self.pm.waterjumptime > 0.0 {
            return;
        }

        let currentspeed = dot_product(&self.pm.velocity, wishdir);
        let addspeed = wishspeed - currentspeed;
        if addspeed <= 0.0 {
            return;
        }
        let accelspeed = (accel * self.pml.frametime * wishspeed).min(addspeed);

        for i in 0..3 {
            self.pm.velocity[i] += accelspeed * wishdir[i];
        }
    }

    // --------------------------------------------------------
    // PM_AirAccelerate
    // --------------------------------------------------------
    fn air_accelerate(&mut self, wishdir: &Vec3, wishspeed: f32, accel: f32) {
        if self.pm.dead || self.pm.waterjumptime > 0.0 {
            return;
        }

        let wishspd = wishspeed.min(30.0);
        let currentspeed = dot_product(&self.pm.velocity, wishdir);
        let addspeed = wishspd - currentspeed;
        if addspeed <= 0.0 {
            return;
        }
        let accelspeed = (accel * wishspeed * self.pml.frametime).min(addspeed);

        for i in 0..3 {
            self.pm.velocity[i] += accelspeed * wishdir[i];
        }
    }

    // --------------------------------------------------------
    // PM_WaterMove
    // --------------------------------------------------------
    fn water_move(&mut self) -> Result<(), GeometryError> {
        let cmd = self.pm.cmd;
        let fmove = cmd.forwardmove as f32;
        let smove = cmd.sidemove as f32;

        // user intentions
        let mut wishvel = [0.0f32; 3];
        for i in 0..3 {
            wishvel[i] = self.pml.forward[i] * fmove + self.pml.right[i] * smove;
        }

        if cmd.forwardmove == 0 && cmd.sidemove == 0 && cmd.upmove == 0 {
            wishvel[2] -= 60.0; // drift towards bottom
        } else {
            wishvel[2] += cmd.upmove as f32;
        }

        let mut wishdir = wishvel;
        let mut wishspeed = vector_normalize(&mut wishdir);

        if wishspeed > self.mv.maxspeed {
            wishspeed = self.mv.maxspeed;
        }
        wishspeed *= 0.7;

        // water acceleration
        self.accelerate(&wishdir, wishspeed, self.mv.wateraccelerate);

        // assume it is a stair or a slope, so press down from stepheight above
        let ft = self.pml.frametime;
        let dest = [
            self.pm.origin[0] + ft * self.pm.velocity[0],
            self.pm.origin[1] + ft * self.pm.velocity[1],
            self.pm.origin[2] + ft * self.pm.velocity[2],
        ];
        let mut start = dest;
        start[2] += STEPSIZE + 1.0;
        let trace = self.cb.trace(&start, &dest)?;
        if !trace.startsolid && !trace.allsolid {
            // walked up the step
            self.pm.origin = trace.endpos;
            return Ok(());
        }

        self.fly_move()?;
        Ok(())
    }

    // --------------------------------------------------------
    // PM_AirMove
    // --------------------------------------------------------
    fn air_move(&mut self) -> Result<(), GeometryError> {
        let fmove = self.pm.cmd.forwardmove as f32;
        let smove = self.pm.cmd.sidemove as f32;

        self.pml.forward[2] = 0.0;
        self.pml.right[2] = 0.0;
        vector_normalize(&mut self.pml.forward);
        vector_normalize(&mut self.pml.right);

        let mut wishvel = [0.0f32; 3];
        for i in 0..2 {
            wishvel[i] = self.pml.forward[i] * fmove + self.pml.right[i] * smove;
        }

        let mut wishdir = wishvel;
        let mut wishspeed = vector_normalize(&mut wishdir);

        // clamp to server defined max speed
        if wishspeed > self.mv.maxspeed {
            wishspeed = self.mv.maxspeed;
        }

        let gravity = self.mv.entgravity * self.mv.gravity * self.pml.frametime;

        if self.pm.onground != -1 {
            self.pm.velocity[2] = 0.0;
            self.accelerate(&wishdir, wishspeed, self.mv.accelerate);
            self.pm.velocity[2] -= gravity;
            self.ground_move()
        } else {
            // not on ground, so little effect on velocity
            self.air_accelerate(&wishdir, wishspeed, self.mv.accelerate);

            // add gravity
            self.pm.velocity[2] -= gravity;
            self.fly_move()?;
            Ok(())
        }
    }

    // --------------------------------------------------------
    // PM_CategorizePosition
    // --------------------------------------------------------
    fn categorize_position(&mut self) -> Result<(), GeometryError> {
        // if the player hull point one unit down is solid, the player
        // is on ground

        // see if standing on something solid
        let mut point = self.pm.origin;
        point[2] -= 1.0;

        if self.pm.velocity[2] > 180.0 {
            self.pm.onground = -1;
        } else {
            let tr = self.cb.trace(&self.pm.origin, &point)?;
            if tr.plane.normal[2] < MIN_STEP_NORMAL {
                self.pm.onground = -1; // too steep
            } else {
                self.pm.onground = tr.ent;
            }
            if self.pm.onground != -1 {
                self.pm.waterjumptime = 0.0;
                if !tr.startsolid && !tr.allsolid {
                    self.pm.origin = tr.endpos;
                }
            }

            // standing on an entity other than the world
            if tr.ent > 0 {
                self.add_touch(tr.ent);
            }
        }

        // get waterlevel
        self.pm.waterlevel = 0;
        self.pm.watertype = CONTENTS_EMPTY;

        point[2] = self.pm.origin[2] + PLAYER_MINS[2] + 1.0;
        let cont = self.cb.point_contents(&point)?;
        if cont <= CONTENTS_WATER {
            self.pm.watertype = cont;
            self.pm.waterlevel = 1;
            point[2] = self.pm.origin[2] + (PLAYER_MINS[2] + PLAYER_MAXS[2]) * 0.5;
            let cont = self.cb.point_contents(&point)?;
            if cont <= CONTENTS_WATER {
                self.pm.waterlevel = 2;
                point[2] = self.pm.origin[2] + 22.0;
                let cont = self.cb.point_contents(&point)?;
                if cont <= CONTENTS_WATER {
                    self.pm.waterlevel = 3;
                }
            }
        }
        Ok(())
    }

    // --------------------------------------------------------
    // JumpButton
    // --------------------------------------------------------
    fn jump_button(&mut self) {
        if self.pm.dead {
            self.pm.oldbuttons |= BUTTON_JUMP; // don't jump again until released
            return;
        }

        if self.pm.waterjumptime > 0.0 {
            self.pm.waterjumptime = (self.pm.waterjumptime - self.pml.frametime).max(0.0);
            return;
        }

        if self.pm.waterlevel >= 2 {
            // swimming, not jumping
            self.pm.onground = -1;

            self.pm.velocity[2] = if self.pm.watertype == CONTENTS_WATER {
                100.0
            } else if self.pm.watertype == CONTENTS_SLIME {
                80.0
            } else {
                50.0
            };
            return;
        }

        if self.pm.onground == -1 {
            return; // in air, so no effect
        }

        if self.pm.oldbuttons.contains(BUTTON_JUMP) {
            return; // don't pogo stick
        }

        self.pm.onground = -1;
        self.pm.velocity[2] += 270.0;

        self.pm.oldbuttons |= BUTTON_JUMP; // don't jump again until released
    }

    // --------------------------------------------------------
    // CheckWaterJump
    // --------------------------------------------------------
    fn check_water_jump(&mut self) -> Result<(), GeometryError> {
        if self.pm.waterjumptime > 0.0 {
            return Ok(());
        }

        // don't hop out if we just jumped in
        if self.pm.velocity[2] < -180.0 {
            return Ok(());
        }

        // see if near an edge
        let mut flatforward = [self.pml.forward[0], self.pml.forward[1], 0.0];
        vector_normalize(&mut flatforward);

        let mut spot = [
            self.pm.origin[0] + 24.0 * flatforward[0],
            self.pm.origin[1] + 24.0 * flatforward[1],
            self.pm.origin[2] + 24.0 * flatforward[2],
        ];
        spot[2] += 8.0;
        if self.cb.point_contents(&spot)? != CONTENTS_SOLID {
            return Ok(());
        }
        spot[2] += 24.0;
        if self.cb.point_contents(&spot)? != CONTENTS_EMPTY {
            return Ok(());
        }

        // jump out of water
        self.pm.velocity = [flatforward[0] * 50.0, flatforward[1] * 50.0, 310.0];
        self.pm.waterjumptime = 2.0; // safety net
        self.pm.oldbuttons |= BUTTON_JUMP; // don't jump again until released
        Ok(())
    }

    // --------------------------------------------------------
    // NudgePosition
    //
    // If pmove.origin is in a solid position, try nudging slightly on all
    // axis to allow for the cut precision of the net coordinates.
    // --------------------------------------------------------
    fn nudge_position(&mut self) -> Result<(), GeometryError> {
        const SIGN: [f32; 3] = [0.0, -1.0, 1.0];

        let base = self.pm.origin;

        for z in SIGN {
            for x in SIGN {
                for y in SIGN {
                    let candidate = [
                        base[0] + x * 0.125,
                        base[1] + y * 0.125,
                        base[2] + z * 0.125,
                    ];
                    if self.cb.test_position(&candidate)? {
                        self.pm.origin = candidate;
                        return Ok(());
                    }
                }
            }
        }

        self.pm.origin = base;
        com_dprintf("NudgePosition: stuck\n");
        Ok(())
    }

    // --------------------------------------------------------
    // SpectatorMove
    // --------------------------------------------------------
    fn spectator_move(&mut self) {
        // friction
        let speed = vector_length(&self.pm.velocity);
        if speed < 1.0 {
            self.pm.velocity = VEC3_ORIGIN;
        } else {
            let friction = self.mv.friction * 1.5; // extra friction
            let control = speed.max(self.mv.stopspeed);
            let drop = control * friction * self.pml.frametime;

            // scale the velocity
            let newspeed = (speed - drop).max(0.0) / speed;
            for v in self.pm.velocity.iter_mut() {
                *v *= newspeed;
            }
        }

        // accelerate
        let fmove = self.pm.cmd.forwardmove as f32;
        let smove = self.pm.cmd.sidemove as f32;

        vector_normalize(&mut self.pml.forward);
        vector_normalize(&mut self.pml.right);

        let mut wishvel = [0.0f32; 3];
        for i in 0..3 {
            wishvel[i] = self.pml.forward[i] * fmove + self.pml.right[i] * smove;
        }
        wishvel[2] += self.pm.cmd.upmove as f32;

        let mut wishdir = wishvel;
        let mut wishspeed = vector_normalize(&mut wishdir);

        // clamp to server defined max speed
        if wishspeed > self.mv.spectatormaxspeed {
            wishspeed = self.mv.spectatormaxspeed;
        }

        let currentspeed = dot_product(&self.pm.velocity, &wishdir);
        let addspeed = wishspeed - currentspeed;
        if addspeed <= 0.0 {
            return;
        }
        let accelspeed = (self.mv.accelerate * self.pml.frametime * wishspeed).min(addspeed);

        for i in 0..3 {
            self.pm.velocity[i] += accelspeed * wishdir[i];
        }

        // move
        let ft = self.pml.frametime;
        for i in 0..3 {
            self.pm.origin[i] += ft * self.pm.velocity[i];
        }
    }

    // --------------------------------------------------------
    // PlayerMove
    // --------------------------------------------------------
    fn execute(&mut self) -> Result<(), GeometryError> {
        self.pml.frametime = self.pm.cmd.msec as f32 * 0.001;
        self.pm.touchindex.clear();

        let (forward, right, _) = angle_vectors(&self.pm.angles);
        self.pml.forward = forward;
        self.pml.right = right;

        if self.pm.spectator {
            self.spectator_move();
            return Ok(());
        }

        self.nudge_position()?;

        // take angles directly from command
        self.pm.angles = self.pm.cmd.angles;

        // set onground, watertype, and waterlevel
        self.categorize_position()?;

        if self.pm.waterlevel == 2 {
            self.check_water_jump()?;
        }

        if self.pm.velocity[2] < 0.0 {
            self.pm.waterjumptime = 0.0;
        }

        if self.pm.cmd.buttons.contains(BUTTON_JUMP) {
            self.jump_button();
        } else {
            self.pm.oldbuttons.remove(BUTTON_JUMP);
        }

        self.friction()?;

        if self.pm.waterlevel >= 2 {
            self.water_move()?;
        } else {
            self.air_move()?;
        }

        // set onground, watertype, and waterlevel for final spot
        self.categorize_position()
    }
}

// ============================================================
// Public API
// ============================================================

/// Run one command through the movement solver. Can be called by either the
/// server or the client.
pub fn player_move(
    pm: &mut PlayerMove,
    callbacks: &mut impl PmoveCallbacks,
    movevars: &MoveVars,
) -> Result<(), GeometryError> {
    let mut ctx = PmoveContext {
        pm,
        pml: PmLocal::default(),
        cb: callbacks,
        mv: movevars,
    };
    ctx.execute()
}

// ============================================================
// Unit tests
// ============================================================
