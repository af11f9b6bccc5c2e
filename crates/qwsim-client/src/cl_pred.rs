// cl_pred.rs -- client-side movement prediction
//
// Every command sent to the server is remembered in a ring of frames. When
// the server reports the state after some command, the client rewinds to it
// and replays the commands still in flight through the same movement solver
// the server runs, so the view does not wait a round trip to move.

use std::sync::Arc;

use rayon::prelude::*;

use qwsim_common::cmodel::{hull_point_contents, BrushModel, GeometryError};
use qwsim_common::common::com_dprintf;
use qwsim_common::cvar::{CvarContext, CvarFlags};
use qwsim_common::net_queue::MAX_CLIENTS;
use qwsim_common::pmove::{
    player_move, MoveContext, MoveVars, PhysEnt, PlayerMove, PLAYER_MAXS, PLAYER_MINS,
};
use qwsim_common::q_shared::*;

use crate::client::ClientState;

/// Commands remembered for replay. Must be a power of two.
pub const UPDATE_BACKUP: usize = 64;
pub const UPDATE_MASK: usize = UPDATE_BACKUP - 1;

/// Displacement in one frame past which the move is treated as a teleport.
const TELEPORT_DIST: f32 = 128.0;

// ============================================================
// Prediction cvars
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClPredCvars {
    /// cl_nopred: show the last server state instead of predicting
    pub nopred: bool,
    /// pushlatency: milliseconds, negative values predict further ahead
    pub pushlatency: f32,
    /// cl_solid_players: other players block predicted movement
    pub solid_players: bool,
    /// cl_predict_players: extrapolate other players along their velocity
    pub predict_players: bool,
}

impl Default for ClPredCvars {
    fn default() -> Self {
        Self {
            nopred: false,
            pushlatency: -999.0,
            solid_players: true,
            predict_players: true,
        }
    }
}

impl ClPredCvars {
    pub fn register(cvars: &mut CvarContext) {
        cvars.get("cl_nopred", "0", CvarFlags::empty());
        cvars.get("pushlatency", "-999", CvarFlags::ARCHIVE);
        cvars.get("cl_solid_players", "1", CvarFlags::empty());
        cvars.get("cl_predict_players", "1", CvarFlags::empty());
    }

    pub fn from_cvars(cvars: &CvarContext) -> Self {
        let d = Self::default();
        let read = |name: &str, default: f32| cvars.find_var(name).map_or(default, |v| v.value);
        Self {
            nopred: read("cl_nopred", 0.0) != 0.0,
            pushlatency: read("pushlatency", d.pushlatency),
            solid_players: read("cl_solid_players", 1.0) != 0.0,
            predict_players: read("cl_predict_players", 1.0) != 0.0,
        }
    }
}

// ============================================================
// Frames
// ============================================================

/// The local player's state after running a command.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlayerState {
    pub origin: Vec3,
    pub velocity: Vec3,
    pub viewangles: Vec3,
    pub onground: bool,
    pub oldbuttons: Buttons,
    pub waterjumptime: f32,
}

/// One slot of the command ring.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Frame {
    pub cmd: UserCmd,
    /// realtime the command was sent, 0 for a slot never written
    pub senttime: f64,
    pub playerstate: PlayerState,
}

/// Where another player is believed to be right now.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PredictedPlayer {
    pub active: bool,
    pub origin: Vec3,
    pub velocity: Vec3,
    pub angles: Vec3,
    pub msgtime: f64,
}

#[inline]
fn frame_index(sequence: i32) -> usize {
    sequence as usize & UPDATE_MASK
}

// ============================================================
// CL_PredictUsercmd
// ============================================================

/// Run one command from `from` and return the resulting state. Commands
/// longer than 50 ms are split in two so long frames stay stable.
pub fn predict_usercmd(
    ctx: &mut MoveContext,
    movevars: &MoveVars,
    from: &PlayerState,
    cmd: &UserCmd,
    spectator: bool,
    dead: bool,
) -> Result<PlayerState, GeometryError> {
    if cmd.msec > 50 {
        let mut split = *cmd;
        split.msec /= 2;
        let temp = predict_usercmd(&mut *ctx, movevars, from, &split, spectator, dead)?;
        return predict_usercmd(ctx, movevars, &temp, &split, spectator, dead);
    }

    let mut pm = PlayerMove {
        origin: from.origin,
        angles: cmd.angles,
        velocity: from.velocity,
        oldbuttons: from.oldbuttons,
        waterjumptime: from.waterjumptime,
        dead,
        spectator,
        cmd: *cmd,
        ..Default::default()
    };
    player_move(&mut pm, ctx, movevars)?;

    Ok(PlayerState {
        origin: pm.origin,
        velocity: pm.velocity,
        viewangles: pm.angles,
        onground: pm.onground != -1,
        oldbuttons: cmd.buttons,
        waterjumptime: pm.waterjumptime,
    })
}

// ============================================================
// CL_NudgePosition
// ============================================================

/// If `origin` is inside the world's player hull, try the eight neighbours
/// one eighth of a unit away in x and y to make up for coordinate loss on
/// the wire. Returns the first empty spot, or `origin` if there is none.
pub fn nudge_position(world: &BrushModel, origin: &Vec3) -> Result<Vec3, GeometryError> {
    let hull = world.hull(1);
    if hull_point_contents(hull, hull.firstclipnode, origin)? == CONTENTS_EMPTY {
        return Ok(*origin);
    }

    for x in -1..=1 {
        for y in -1..=1 {
            let candidate = [
                origin[0] + x as f32 / 8.0,
                origin[1] + y as f32 / 8.0,
                origin[2],
            ];
            if hull_point_contents(hull, hull.firstclipnode, &candidate)? == CONTENTS_EMPTY {
                return Ok(candidate);
            }
        }
    }
    Ok(*origin)
}

// ============================================================
// Prediction state
// ============================================================

pub struct Prediction {
    pub frames: [Frame; UPDATE_BACKUP],
    /// next sequence to be sent
    pub outgoing_sequence: i32,
    /// newest sequence the server has acknowledged
    pub incoming_sequence: i32,
    /// estimated round trip in seconds, 0 until measured
    pub latency: f64,
    /// the time the last prediction was made for
    pub predicted_time: f64,
    pub simorg: Vec3,
    pub simvel: Vec3,
    pub simangles: Vec3,
    /// 0 when standing on something, -1 in the air
    pub simonground: i32,
    pub predicted_players: [PredictedPlayer; MAX_CLIENTS],
    pub cvars: ClPredCvars,
    pmove: MoveContext,
}

impl Default for Prediction {
    fn default() -> Self {
        Self {
            frames: [Frame::default(); UPDATE_BACKUP],
            outgoing_sequence: 0,
            incoming_sequence: 0,
            latency: 0.0,
            predicted_time: 0.0,
            simorg: VEC3_ORIGIN,
            simvel: VEC3_ORIGIN,
            simangles: VEC3_ORIGIN,
            simonground: -1,
            predicted_players: [PredictedPlayer::default(); MAX_CLIENTS],
            cvars: ClPredCvars::default(),
            pmove: MoveContext::new(),
        }
    }
}

impl Prediction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cvars(cvars: ClPredCvars) -> Self {
        Self {
            cvars,
            ..Self::default()
        }
    }

    /// Forget everything about the previous connection. Cvars survive.
    pub fn reset(&mut self) {
        *self = Self::with_cvars(self.cvars);
    }

    pub fn frame(&self, sequence: i32) -> &Frame {
        &self.frames[frame_index(sequence)]
    }

    /// Collision set used by the last prediction.
    pub fn physents(&self) -> &[PhysEnt] {
        &self.pmove.physents
    }

    /// Commands sent but not yet acknowledged, the acknowledged one included.
    pub fn window(&self) -> i32 {
        self.outgoing_sequence - self.incoming_sequence
    }

    // ===========================================================================
    // Sequence bookkeeping
    // ===========================================================================

    /// Remember a command about to be sent. Returns its sequence, or `None`
    /// when the ring is full and the command must not be sent; writing it
    /// would overwrite the unacknowledged frame replay starts from.
    pub fn store_command(&mut self, cmd: &UserCmd, senttime: f64) -> Option<i32> {
        if self.window() >= UPDATE_BACKUP as i32 - 1 {
            com_dprintf("CL_StoreCommand: prediction window full\n");
            return None;
        }
        let sequence = self.outgoing_sequence;
        let frame = &mut self.frames[frame_index(sequence)];
        frame.cmd = *cmd;
        frame.senttime = senttime;
        self.outgoing_sequence += 1;
        Some(sequence)
    }

    /// Advance the acknowledged watermark. Never moves backwards. Returns
    /// `false` when `sequence` was never sent or is older than the watermark,
    /// in which case nothing changes.
    pub fn acknowledge(&mut self, sequence: i32) -> bool {
        if sequence >= self.outgoing_sequence {
            com_dprintf(&format!(
                "CL_Acknowledge: {} was never sent (outgoing {})\n",
                sequence, self.outgoing_sequence
            ));
            return false;
        }
        if sequence < self.incoming_sequence {
            return false;
        }
        self.incoming_sequence = sequence;
        true
    }

    /// Store the server's state for the acknowledged command.
    pub fn set_server_state(&mut self, origin: Vec3, velocity: Vec3, onground: bool) {
        let state = &mut self.frames[frame_index(self.incoming_sequence)].playerstate;
        state.origin = origin;
        state.velocity = velocity;
        state.onground = onground;
    }

    /// Fold the round trip of `sequence`, acknowledged at `now`, into the
    /// latency estimate.
    pub fn update_latency(&mut self, sequence: i32, now: f64) {
        let senttime = self.frame(sequence).senttime;
        if senttime <= 0.0 {
            return;
        }
        let observed = now - senttime;
        if observed > 0.0 && observed < 1.0 {
            // drop quickly, rise slowly
            if observed < self.latency {
                self.latency = observed;
            } else {
                self.latency += 0.001;
            }
        }
    }

    // ===========================================================================
    // CL_SetSolidEntities
    // ===========================================================================

    fn set_solid_entities(&mut self, cl: &ClientState) {
        for (num, ent) in cl.entities.iter().enumerate().skip(1) {
            let Some(model) = ent.brush.as_ref() else {
                continue;
            };
            if !ent.has_model || model.hull(1).clipnodes.is_empty() {
                continue;
            }
            let added = self.pmove.add_physent(PhysEnt {
                origin: ent.origin,
                model: Some(Arc::clone(model)),
                info: num as i32,
                ..Default::default()
            });
            if !added {
                break;
            }
        }
    }

    // ===========================================================================
    // CL_SetUpPlayerPrediction
    // ===========================================================================

    /// Work out where every other player is now. With `dopred` they are
    /// extrapolated along their last observed velocity, never more than a
    /// tenth of a second.
    pub fn set_up_player_prediction(&mut self, cl: &ClientState, realtime: f64, dopred: bool) {
        let playertime = (realtime - self.latency + 0.02).min(realtime);
        let msgdt = cl.mtime[0] - cl.mtime[1];
        let viewentity = cl.viewentity();
        let (simorg, simvel) = (self.simorg, self.simvel);
        let extrapolate = dopred && self.cvars.predict_players;

        self.predicted_players
            .par_iter_mut()
            .enumerate()
            .for_each(|(j, pplayer)| {
                *pplayer = PredictedPlayer::default();
                if j == 0 || j > cl.maxclients {
                    return;
                }
                let Some(ent) = cl.entities.get(j) else {
                    return;
                };
                if ent.msgtime <= 0.0 || !ent.has_model {
                    return;
                }

                pplayer.active = true;
                pplayer.msgtime = ent.msgtime;
                pplayer.angles = ent.angles;

                if j == viewentity {
                    pplayer.origin = simorg;
                    pplayer.velocity = simvel;
                    return;
                }

                if msgdt > 0.0 {
                    let delta = vector_subtract(&ent.msg_origins[0], &ent.msg_origins[1]);
                    pplayer.velocity = vector_scale(&delta, (1.0 / msgdt) as f32);
                }

                let dt = playertime - ent.msgtime;
                pplayer.origin = if dt <= 0.0 || !extrapolate {
                    ent.origin
                } else {
                    let dt = (dt * 0.5).min(0.1) as f32;
                    vector_ma(&ent.origin, dt, &pplayer.velocity)
                };
            });
    }

    // ===========================================================================
    // CL_SetSolidPlayers
    // ===========================================================================

    fn set_solid_players(&mut self, cl: &ClientState) {
        if !self.cvars.solid_players {
            return;
        }
        let viewentity = cl.viewentity();
        for (j, pplayer) in self.predicted_players.iter().enumerate() {
            if !pplayer.active || j == viewentity {
                continue;
            }
            let added = self.pmove.add_physent(PhysEnt {
                origin: pplayer.origin,
                model: None,
                mins: PLAYER_MINS,
                maxs: PLAYER_MAXS,
                info: j as i32,
            });
            if !added {
                break;
            }
        }
    }

    fn setup_pmove(&mut self, cl: &ClientState, realtime: f64) {
        match cl.worldmodel.as_ref() {
            Some(world) => self.pmove.set_world(Arc::clone(world)),
            None => self.pmove.physents.clear(),
        }
        self.set_solid_entities(cl);
        self.set_up_player_prediction(cl, realtime, true);
        self.set_solid_players(cl);
    }

    fn copy_state(&mut self, state: &PlayerState) {
        self.simorg = state.origin;
        self.simvel = state.velocity;
        self.simonground = if state.onground { 0 } else { -1 };
    }

    // ===========================================================================
    // CL_PredictMove
    // ===========================================================================

    /// Rewind to the acknowledged frame and replay every command still in
    /// flight, then interpolate between the two frames bracketing the
    /// target time to produce `simorg`, `simvel` and `simonground`.
    pub fn predict_move(
        &mut self,
        cl: &ClientState,
        realtime: f64,
        movevars: &MoveVars,
    ) -> Result<(), GeometryError> {
        if self.cvars.pushlatency > 0.0 {
            self.cvars.pushlatency = 0.0;
        }
        if cl.paused {
            return Ok(());
        }

        let time =
            (realtime - self.latency - self.cvars.pushlatency as f64 * 0.001).min(realtime);
        self.predicted_time = time;

        if cl.intermission {
            return Ok(());
        }

        // the ring is full; wait for the server to catch up
        if self.window() >= UPDATE_BACKUP as i32 - 1 {
            return Ok(());
        }

        self.simangles = cl.viewangles;

        let from = self.frames[frame_index(self.incoming_sequence)];
        let in_flight = self.incoming_sequence + 1 < self.outgoing_sequence;
        if self.cvars.nopred || cl.local_server || cl.worldmodel.is_none() || !in_flight {
            self.copy_state(&from.playerstate);
            return Ok(());
        }

        self.setup_pmove(cl, realtime);

        let dead = cl.health <= 0;
        let mut last_from = from;
        let mut to = from;
        let mut i = 1;
        while i < UPDATE_BACKUP as i32 - 1 && self.incoming_sequence + i < self.outgoing_sequence {
            let idx = frame_index(self.incoming_sequence + i);
            let cmd = self.frames[idx].cmd;
            let state = predict_usercmd(
                &mut self.pmove,
                movevars,
                &last_from.playerstate,
                &cmd,
                cl.spectator,
                dead,
            )?;
            self.frames[idx].playerstate = state;
            to = self.frames[idx];
            if to.senttime >= time {
                break;
            }
            last_from = to;
            i += 1;
        }

        let f = if to.senttime == last_from.senttime {
            0.0
        } else {
            ((time - last_from.senttime) / (to.senttime - last_from.senttime)).clamp(0.0, 1.0)
                as f32
        };

        let (a, b) = (&last_from.playerstate, &to.playerstate);
        if (0..3).any(|k| (a.origin[k] - b.origin[k]).abs() > TELEPORT_DIST) {
            self.copy_state(b);
            return Ok(());
        }

        for k in 0..3 {
            self.simorg[k] = a.origin[k] + f * (b.origin[k] - a.origin[k]);
            self.simvel[k] = a.velocity[k] + f * (b.velocity[k] - a.velocity[k]);
        }
        self.simonground = if b.onground { 0 } else { -1 };
        Ok(())
    }
}

// ============================================================
// Unit tests
// ============================================================
