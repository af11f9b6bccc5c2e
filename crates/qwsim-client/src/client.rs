// client.rs -- primary header for client
//
// What the client knows about the world it is predicting in: the map, the
// entities it has received, and a few flags from the server that gate
// prediction.

use std::sync::Arc;

use qwsim_common::cmodel::BrushModel;
use qwsim_common::net_queue::MAX_CLIENTS;
use qwsim_common::q_shared::{Vec3, VEC3_ORIGIN};

/// Last known state of one entity as received from the server.
#[derive(Debug, Clone, Default)]
pub struct ClientEntity {
    pub origin: Vec3,
    pub angles: Vec3,
    /// the two most recently received origins, newest first
    pub msg_origins: [Vec3; 2],
    /// time of the last message that carried this entity, 0 if never seen
    pub msgtime: f64,
    /// false when the entity has nothing to draw
    pub has_model: bool,
    /// inline brush model for solid entities such as doors and platforms
    pub brush: Option<Arc<BrushModel>>,
}

impl ClientEntity {
    /// Record a fresh origin from the server.
    pub fn set_origin(&mut self, origin: Vec3, msgtime: f64) {
        self.msg_origins = [origin, self.msg_origins[0]];
        self.origin = origin;
        self.msgtime = msgtime;
    }
}

/// The client_state_t equivalent: wiped on every new connection.
#[derive(Debug, Clone)]
pub struct ClientState {
    pub worldmodel: Option<Arc<BrushModel>>,
    /// entity 0 is the world, 1..=maxclients are players, brush entities follow
    pub entities: Vec<ClientEntity>,
    /// the two most recent server message times, newest first
    pub mtime: [f64; 2],
    pub playernum: usize,
    pub maxclients: usize,
    pub viewangles: Vec3,
    pub spectator: bool,
    pub health: i32,
    pub paused: bool,
    pub intermission: bool,
    /// a server is running in this same process
    pub local_server: bool,
}

impl Default for ClientState {
    fn default() -> Self {
        Self {
            worldmodel: None,
            entities: vec![ClientEntity::default(); MAX_CLIENTS + 1],
            mtime: [0.0; 2],
            playernum: 0,
            maxclients: MAX_CLIENTS - 1,
            viewangles: VEC3_ORIGIN,
            spectator: false,
            health: 100,
            paused: false,
            intermission: false,
            local_server: false,
        }
    }
}

impl ClientState {
    pub fn new(worldmodel: Arc<BrushModel>, playernum: usize) -> Self {
        Self {
            worldmodel: Some(worldmodel),
            playernum,
            ..Default::default()
        }
    }

    /// Entity number of the local player.
    pub fn viewentity(&self) -> usize {
        self.playernum + 1
    }

    /// Push the message clock forward.
    pub fn mark_message(&mut self, time: f64) {
        self.mtime = [time, self.mtime[0]];
    }

    /// Add a solid brush entity at `origin`, returning its entity number.
    pub fn add_brush_entity(&mut self, model: Arc<BrushModel>, origin: Vec3) -> usize {
        self.entities.push(ClientEntity {
            origin,
            msg_origins: [origin; 2],
            has_model: true,
            brush: Some(model),
            ..Default::default()
        });
        self.entities.len() - 1
    }
}
