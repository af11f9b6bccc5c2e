// sv_user.rs -- server code for moving users
//
// Commands arrive over the inbound queue in arrival order. Each accepted
// command runs once through the shared movement solver; the result is the
// authoritative state broadcast back to every client.

use rayon::prelude::*;

use qwsim_common::cmodel::GeometryError;
use qwsim_common::common::{com_dprintf, com_printf, com_wprintf};
use qwsim_common::net_queue::{
    ClientMessage, ClientMove, MessageQueue, MessageSender, PlayerUpdate,
    DEFAULT_QUEUE_CAPACITY, MAX_CLIENTS,
};
use qwsim_common::pmove::{player_move, MoveContext, MoveVars, PlayerMove, PLAYER_MAXS, PLAYER_MINS};
use qwsim_common::q_shared::*;

use crate::sv_world::{EntFlags, Solid, SvWorld, TouchHandler};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClientState {
    /// can be reused for a new connection
    #[default]
    Free,
    /// has an edict and runs commands
    Spawned,
}

pub struct Client {
    pub state: ClientState,
    pub edict: usize,
    /// newest command sequence run for this client
    pub last_sequence: i32,
    pub spectator: bool,
    pub oldbuttons: Buttons,
    pub waterjumptime: f32,
    pub dead: bool,
    /// outbound state updates, if anyone is listening
    pub netchan: Option<MessageSender<PlayerUpdate>>,
    /// simulated one-way delay added to outbound updates
    pub latency: f64,
}

impl Default for Client {
    fn default() -> Self {
        Self {
            state: ClientState::Free,
            edict: 0,
            last_sequence: -1,
            spectator: false,
            oldbuttons: Buttons::empty(),
            waterjumptime: 0.0,
            dead: false,
            netchan: None,
            latency: 0.0,
        }
    }
}

pub struct ServerContext {
    pub world: SvWorld,
    pub clients: Vec<Client>,
    pub movevars: MoveVars,
    pub spawn_origin: Vec3,
    inbound: MessageQueue<ClientMessage>,
    pmove_ctx: MoveContext,
}

impl ServerContext {
    pub fn new(world: SvWorld, movevars: MoveVars) -> Self {
        Self {
            world,
            clients: (0..MAX_CLIENTS).map(|_| Client::default()).collect(),
            movevars,
            spawn_origin: VEC3_ORIGIN,
            inbound: MessageQueue::new(DEFAULT_QUEUE_CAPACITY),
            pmove_ctx: MoveContext::new(),
        }
    }

    /// Handle for clients to send commands with.
    pub fn sender(&self) -> MessageSender<ClientMessage> {
        self.inbound.sender()
    }

    /// Route a client's state updates to `netchan`, delayed by `latency` seconds.
    pub fn set_client_channel(
        &mut self,
        client: usize,
        netchan: MessageSender<PlayerUpdate>,
        latency: f64,
    ) {
        if let Some(cl) = self.clients.get_mut(client) {
            cl.netchan = Some(netchan);
            cl.latency = latency;
        }
    }

    // ===========================================================================
    // CONNECTION
    // ===========================================================================

    /// SV_Connect
    ///
    /// A client whose movement tunables differ from ours would mispredict every
    /// frame, so it is refused.
    fn sv_connect(
        &mut self,
        client_idx: usize,
        spectator: bool,
        movevars_checksum: u16,
    ) -> Result<(), GeometryError> {
        if client_idx >= self.clients.len() {
            com_wprintf(&format!("SV_Connect: bad client slot {}\n", client_idx));
            return Ok(());
        }

        let expected = self.movevars.checksum();
        if movevars_checksum != expected {
            com_printf(&format!(
                "client {} refused: movevars checksum {:04x} != {:04x}\n",
                client_idx, movevars_checksum, expected
            ));
            self.sv_drop_client(client_idx);
            return Ok(());
        }

        // a reconnect replaces the old body
        self.sv_drop_client(client_idx);

        let e = self.world.spawn();
        let ent = &mut self.world.edicts[e];
        ent.origin = self.spawn_origin;
        ent.solid = if spectator { Solid::Not } else { Solid::SlideBox };
        ent.set_size(PLAYER_MINS, PLAYER_MAXS);
        ent.modelindex = 1;
        ent.flags = EntFlags::CLIENT;
        self.world.link_edict(e, None)?;

        let cl = &mut self.clients[client_idx];
        cl.state = ClientState::Spawned;
        cl.edict = e;
        cl.last_sequence = -1;
        cl.spectator = spectator;
        cl.oldbuttons = Buttons::empty();
        cl.waterjumptime = 0.0;
        cl.dead = false;

        com_printf(&format!(
            "client {} connected{}\n",
            client_idx,
            if spectator { " as spectator" } else { "" }
        ));
        Ok(())
    }

    /// SV_DropClient
    pub fn sv_drop_client(&mut self, client_idx: usize) {
        let cl = &mut self.clients[client_idx];
        if cl.state == ClientState::Free {
            return;
        }
        cl.state = ClientState::Free;
        let e = cl.edict;
        self.world.free_edict(e);
        com_dprintf(&format!("client {} dropped\n", client_idx));
    }

    // ===========================================================================
    // USER CMD EXECUTION
    // ===========================================================================

    /// SV_RunCmd
    pub fn sv_run_cmd(
        &mut self,
        client_idx: usize,
        cmd: &UserCmd,
        handler: &mut dyn TouchHandler,
    ) -> Result<(), GeometryError> {
        // chop up very long commands
        if cmd.msec > 50 {
            let mut split = *cmd;
            split.msec /= 2;
            self.sv_run_cmd(client_idx, &split, handler)?;
            return self.sv_run_cmd(client_idx, &split, handler);
        }

        let cl = &self.clients[client_idx];
        let player = cl.edict;
        let ent = &self.world.edicts[player];

        let mut pm = PlayerMove {
            origin: ent.origin,
            angles: ent.angles,
            velocity: ent.velocity,
            oldbuttons: cl.oldbuttons,
            waterjumptime: cl.waterjumptime,
            dead: cl.dead,
            spectator: cl.spectator,
            cmd: *cmd,
            ..Default::default()
        };

        self.world.add_links_to_pmove(player, &mut self.pmove_ctx)?;
        player_move(&mut pm, &mut self.pmove_ctx, &self.movevars)?;

        let groundentity = usize::try_from(pm.onground)
            .ok()
            .and_then(|i| self.pmove_ctx.physents.get(i))
            .map(|pe| pe.info as usize);

        let cl = &mut self.clients[client_idx];
        cl.oldbuttons = pm.oldbuttons;
        cl.waterjumptime = pm.waterjumptime;
        let spectator = cl.spectator;

        let ent = &mut self.world.edicts[player];
        ent.waterlevel = pm.waterlevel;
        ent.watertype = pm.watertype;
        ent.flags.set(EntFlags::ONGROUND, groundentity.is_some());
        ent.flags.set(EntFlags::WATERJUMP, pm.waterjumptime > 0.0);
        ent.groundentity = groundentity;
        ent.origin = pm.origin;
        ent.velocity = pm.velocity;
        ent.angles = pm.angles;

        if spectator {
            return Ok(());
        }

        // link into place and touch triggers
        self.world.link_edict(player, Some(&mut *handler))?;

        // touch other objects, once each per command
        let mut touched: Vec<usize> = Vec::new();
        for &i in &pm.touchindex {
            let Some(pe) = usize::try_from(i).ok().and_then(|i| self.pmove_ctx.physents.get(i)) else {
                continue;
            };
            let n = pe.info as usize;
            if touched.contains(&n) || !self.world.edicts[n].has_touch {
                continue;
            }
            touched.push(n);
        }
        for n in touched {
            handler.touch(&mut self.world, n, player);
        }

        Ok(())
    }

    /// Run one received move. Returns false when it was discarded.
    fn sv_client_move(
        &mut self,
        mv: &ClientMove,
        handler: &mut dyn TouchHandler,
    ) -> Result<bool, GeometryError> {
        let Some(cl) = self.clients.get(mv.client) else {
            com_wprintf(&format!("move from bad client slot {}\n", mv.client));
            return Ok(false);
        };
        if cl.state != ClientState::Spawned {
            return Ok(false);
        }
        if mv.sequence <= cl.last_sequence {
            com_dprintf(&format!(
                "client {}: stale command {} <= {}\n",
                mv.client, mv.sequence, cl.last_sequence
            ));
            return Ok(false);
        }

        self.sv_run_cmd(mv.client, &mv.cmd, handler)?;
        self.clients[mv.client].last_sequence = mv.sequence;
        Ok(true)
    }

    /// Process every inbound message that has arrived by `now`, in arrival
    /// order. Returns how many movement commands ran.
    pub fn execute_client_moves(
        &mut self,
        now: f64,
        handler: &mut dyn TouchHandler,
    ) -> Result<usize, GeometryError> {
        let mut executed = 0;
        for msg in self.inbound.receive_due(now) {
            match msg {
                ClientMessage::Connect {
                    client,
                    spectator,
                    movevars_checksum,
                } => self.sv_connect(client, spectator, movevars_checksum)?,
                ClientMessage::Move(mv) => {
                    if self.sv_client_move(&mv, handler)? {
                        executed += 1;
                    }
                }
            }
        }
        Ok(executed)
    }

    // ===========================================================================
    // STATE BROADCAST
    // ===========================================================================

    fn player_update(&self, cl: &Client) -> Option<PlayerUpdate> {
        if cl.state != ClientState::Spawned {
            return None;
        }
        let ent = &self.world.edicts[cl.edict];
        Some(PlayerUpdate {
            ack_sequence: cl.last_sequence,
            origin: ent.origin,
            velocity: ent.velocity,
            onground: ent.flags.contains(EntFlags::ONGROUND),
        })
    }

    /// Send every spawned client its authoritative state. Returns the number
    /// of updates queued.
    pub fn broadcast_updates(&self, now: f64) -> usize {
        let updates: Vec<Option<PlayerUpdate>> = self
            .clients
            .par_iter()
            .map(|cl| self.player_update(cl))
            .collect();

        let mut sent = 0;
        for (cl, update) in self.clients.iter().zip(updates) {
            let (Some(update), Some(netchan)) = (update, cl.netchan.as_ref()) else {
                continue;
            };
            if netchan.try_send(update, now + cl.latency) {
                sent += 1;
            }
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sv_world::NoTouch;
    use qwsim_common::cmodel::{slab_model, Slab};
    use std::sync::Arc;

    const FLOOR_Z: f32 = 24.03125;

    fn make_server() -> ServerContext {
        let model = slab_model("floor", &[Slab::floor(0.0)], [-4096.0; 3], [4096.0; 3]).unwrap();
        let mut sv = ServerContext::new(SvWorld::new(Arc::new(model)), MoveVars::default());
        sv.spawn_origin = [0.0, 0.0, FLOOR_Z];
        sv
    }

    fn connect(sv: &mut ServerContext, client: usize, spectator: bool) {
        let checksum = sv.movevars.checksum();
        sv.sender().try_send(
            ClientMessage::Connect {
                client,
                spectator,
                movevars_checksum: checksum,
            },
            0.0,
        );
        sv.execute_client_moves(0.0, &mut NoTouch).unwrap();
    }

    fn send_move(sv: &ServerContext, client: usize, sequence: i32, cmd: UserCmd, at: f64) {
        assert!(sv
            .sender()
            .try_send(ClientMessage::Move(ClientMove { client, sequence, cmd }), at));
    }

    fn forward(msec: u8) -> UserCmd {
        UserCmd {
            msec,
            forwardmove: 400,
            ..Default::default()
        }
    }

    #[derive(Default)]
    struct Recorder {
        touches: Vec<(usize, usize)>,
    }

    impl TouchHandler for Recorder {
        fn touch(&mut self, _world: &mut SvWorld, trigger: usize, other: usize) {
            self.touches.push((trigger, other));
        }
    }

    #[test]
    fn test_connect_spawns_player() {
        let mut sv = make_server();
        connect(&mut sv, 0, false);
        let cl = &sv.clients[0];
        assert_eq!(cl.state, ClientState::Spawned);
        let ent = &sv.world.edicts[cl.edict];
        assert_eq!(ent.origin, [0.0, 0.0, FLOOR_Z]);
        assert_eq!(ent.solid, Solid::SlideBox);
        assert!(sv.world.is_linked(cl.edict));
    }

    #[test]
    fn test_checksum_mismatch_is_refused() {
        let mut sv = make_server();
        let bad = sv.movevars.checksum().wrapping_add(1);
        sv.sender().try_send(
            ClientMessage::Connect {
                client: 2,
                spectator: false,
                movevars_checksum: bad,
            },
            0.0,
        );
        sv.execute_client_moves(0.0, &mut NoTouch).unwrap();
        assert_eq!(sv.clients[2].state, ClientState::Free);

        // moves from a refused client are ignored
        send_move(&sv, 2, 1, forward(20), 0.0);
        assert_eq!(sv.execute_client_moves(0.0, &mut NoTouch).unwrap(), 0);
    }

    #[test]
    fn test_move_runs_solver() {
        let mut sv = make_server();
        connect(&mut sv, 0, false);
        send_move(&sv, 0, 1, forward(50), 0.0);
        assert_eq!(sv.execute_client_moves(0.0, &mut NoTouch).unwrap(), 1);

        let cl = &sv.clients[0];
        assert_eq!(cl.last_sequence, 1);
        let ent = &sv.world.edicts[cl.edict];
        // 10 * 0.05 * 320 = 160 units/s after one tick, 8 units travelled
        assert!((ent.velocity[0] - 160.0).abs() < 0.01, "velocity {:?}", ent.velocity);
        assert!((ent.origin[0] - 8.0).abs() < 0.01, "origin {:?}", ent.origin);
        assert!(ent.flags.contains(EntFlags::ONGROUND));
        assert_eq!(ent.groundentity, Some(0));
    }

    #[test]
    fn test_stale_sequences_are_discarded() {
        let mut sv = make_server();
        connect(&mut sv, 0, false);
        send_move(&sv, 0, 5, forward(20), 0.0);
        send_move(&sv, 0, 3, forward(20), 0.0);
        send_move(&sv, 0, 5, forward(20), 0.0);
        assert_eq!(sv.execute_client_moves(0.0, &mut NoTouch).unwrap(), 1);
        assert_eq!(sv.clients[0].last_sequence, 5);
    }

    #[test]
    fn test_messages_wait_for_delivery_time() {
        let mut sv = make_server();
        connect(&mut sv, 0, false);
        send_move(&sv, 0, 1, forward(20), 1.0);
        assert_eq!(sv.execute_client_moves(0.5, &mut NoTouch).unwrap(), 0);
        assert_eq!(sv.execute_client_moves(1.0, &mut NoTouch).unwrap(), 1);
    }

    #[test]
    fn test_long_commands_are_split() {
        let mut a = make_server();
        let mut b = make_server();
        connect(&mut a, 0, false);
        connect(&mut b, 0, false);

        a.sv_run_cmd(0, &forward(100), &mut NoTouch).unwrap();
        b.sv_run_cmd(0, &forward(50), &mut NoTouch).unwrap();
        b.sv_run_cmd(0, &forward(50), &mut NoTouch).unwrap();

        let ea = &a.world.edicts[a.clients[0].edict];
        let eb = &b.world.edicts[b.clients[0].edict];
        assert_eq!(ea.origin, eb.origin);
        assert_eq!(ea.velocity, eb.velocity);
    }

    #[test]
    fn test_moving_into_trigger_fires_touch() {
        let mut sv = make_server();
        connect(&mut sv, 0, false);
        let player = sv.clients[0].edict;

        let trigger = sv.world.spawn();
        {
            let ent = &mut sv.world.edicts[trigger];
            ent.origin = [60.0, 0.0, 32.0];
            ent.solid = Solid::Trigger;
            ent.has_touch = true;
            ent.set_size([-64.0; 3], [64.0; 3]);
        }
        sv.world.link_edict(trigger, None).unwrap();

        let mut rec = Recorder::default();
        sv.sv_run_cmd(0, &forward(20), &mut rec).unwrap();
        assert_eq!(rec.touches, vec![(trigger, player)]);
    }

    #[test]
    fn test_running_into_entity_fires_touch_once() {
        let mut sv = make_server();
        connect(&mut sv, 0, false);
        let player = sv.clients[0].edict;
        sv.world.edicts[player].velocity = [320.0, 0.0, 0.0];

        let block = sv.world.spawn();
        {
            let ent = &mut sv.world.edicts[block];
            ent.origin = [40.0, 0.0, FLOOR_Z];
            ent.solid = Solid::Bbox;
            ent.has_touch = true;
            ent.set_size(PLAYER_MINS, PLAYER_MAXS);
        }
        sv.world.link_edict(block, None).unwrap();

        let mut rec = Recorder::default();
        sv.sv_run_cmd(0, &forward(50), &mut rec).unwrap();
        assert_eq!(rec.touches, vec![(block, player)]);
        assert!(sv.world.edicts[player].origin[0] < 8.0, "player stops at the block");
    }

    #[test]
    fn test_spectator_is_not_linked() {
        let mut sv = make_server();
        connect(&mut sv, 1, true);
        let e = sv.clients[1].edict;
        assert!(!sv.world.is_linked(e));

        let cmd = UserCmd {
            msec: 50,
            upmove: 400,
            ..Default::default()
        };
        sv.sv_run_cmd(1, &cmd, &mut NoTouch).unwrap();
        assert!(sv.world.edicts[e].origin[2] > FLOOR_Z);
        assert!(!sv.world.is_linked(e));
    }

    #[test]
    fn test_broadcast_updates_in_client_order() {
        let mut sv = make_server();
        let queue: MessageQueue<PlayerUpdate> = MessageQueue::new(8);
        connect(&mut sv, 0, false);
        sv.spawn_origin = [200.0, 0.0, FLOOR_Z];
        connect(&mut sv, 3, false);
        sv.set_client_channel(0, queue.sender(), 0.1);
        sv.set_client_channel(3, queue.sender(), 0.2);
        // a listener without a spawned client gets nothing
        sv.set_client_channel(5, queue.sender(), 0.0);

        send_move(&sv, 0, 7, forward(20), 0.0);
        sv.execute_client_moves(0.0, &mut NoTouch).unwrap();

        assert_eq!(sv.broadcast_updates(1.0), 2);
        let updates = queue.drain();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].msg.ack_sequence, 7);
        assert!((updates[0].deliver_at - 1.1).abs() < 1e-9);
        assert!(updates[0].msg.onground);
        assert_eq!(updates[1].msg.ack_sequence, -1);
        assert!((updates[1].deliver_at - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_reconnect_replaces_edict() {
        let mut sv = make_server();
        connect(&mut sv, 0, false);
        let first = sv.clients[0].edict;
        sv.world.edicts[first].origin = [500.0, 0.0, FLOOR_Z];
        connect(&mut sv, 0, false);
        let second = sv.clients[0].edict;
        assert_eq!(second, first, "freed slot is reused");
        assert_eq!(sv.world.edicts[second].origin, [0.0, 0.0, FLOOR_Z]);
        assert_eq!(sv.world.edicts.iter().filter(|e| e.inuse).count(), 2);
    }
}
