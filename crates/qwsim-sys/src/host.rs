// host.rs -- loopback host running a server and its clients in one process
//
// Every frame each client samples its input, stores and sends a command,
// the server runs whatever has arrived, broadcasts state, and each client
// reads its updates and predicts. Latency is simulated by stamping every
// message with a delivery time.

use std::sync::Arc;

use anyhow::{bail, Result};

use qwsim_client::cl_input::{cl_connect, cl_create_cmd, cl_send_cmd, InputButtons, InputCvars};
use qwsim_client::cl_parse::cl_read_packets;
use qwsim_client::cl_pred::{ClPredCvars, Prediction};
use qwsim_client::client::ClientState;
use qwsim_common::cmodel::{box_model, slab_model, BrushModel, Slab};
use qwsim_common::common::{com_begin_redirect, com_dprintf, com_end_redirect, com_printf};
use qwsim_common::cvar::{CvarContext, CvarFlags};
use qwsim_common::net_queue::{MessageQueue, PlayerUpdate, DEFAULT_QUEUE_CAPACITY, MAX_CLIENTS};
use qwsim_common::pmove::MoveVars;
use qwsim_common::q_shared::*;
use qwsim_server::sv_user::ServerContext;
use qwsim_server::sv_world::{Solid, SvWorld, TouchHandler};

/// Lateral spacing between spawn points, wide enough that players never meet.
const LANE_WIDTH: f32 = 128.0;
const SPAWN_X: f32 = -512.0;

// ============================================================
// Host cvars
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostConfig {
    pub clients: usize,
    /// round trip time in seconds
    pub latency: f64,
    pub fps: f64,
    pub seconds: f64,
    /// seconds at the end with no input, for everything to settle
    pub settle: f64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            clients: 2,
            latency: 0.1,
            fps: 72.0,
            seconds: 5.0,
            settle: 1.0,
        }
    }
}

impl HostConfig {
    pub fn register(cvars: &mut CvarContext) {
        cvars.get("sim_clients", "2", CvarFlags::empty());
        cvars.get("sim_latency", "100", CvarFlags::ARCHIVE);
        cvars.get("sim_fps", "72", CvarFlags::empty());
        cvars.get("sim_seconds", "5", CvarFlags::empty());
    }

    pub fn from_cvars(cvars: &CvarContext) -> Self {
        let d = Self::default();
        let read = |name: &str, default: f64| {
            cvars.find_var(name).map_or(default, |v| v.value as f64)
        };
        Self {
            clients: read("sim_clients", d.clients as f64).max(0.0) as usize,
            latency: read("sim_latency", d.latency * 1000.0).max(0.0) * 0.001,
            fps: read("sim_fps", d.fps).clamp(10.0, 1000.0),
            seconds: read("sim_seconds", d.seconds).max(0.0),
            settle: d.settle,
        }
    }
}

/// Register every cvar the host and its endpoints read.
pub fn host_register_cvars(cvars: &mut CvarContext) {
    MoveVars::register_cvars(cvars);
    ClPredCvars::register(cvars);
    InputCvars::register(cvars);
    HostConfig::register(cvars);
}

// ============================================================
// Demo map
// ============================================================

/// A walled arena with a floor at z = 0.
pub fn demo_world() -> Result<Arc<BrushModel>> {
    let slabs = [
        Slab::floor(0.0),
        Slab::below(0, -1024.0, CONTENTS_SOLID),
        Slab::above(0, 1024.0, CONTENTS_SOLID),
        Slab::below(1, -1024.0, CONTENTS_SOLID),
        Slab::above(1, 1024.0, CONTENTS_SOLID),
    ];
    Ok(Arc::new(slab_model("arena", &slabs, [-1024.0, -1024.0, -64.0], [1024.0, 1024.0, 512.0])?))
}

struct LogTouch;

impl TouchHandler for LogTouch {
    fn touch(&mut self, _world: &mut SvWorld, trigger: usize, other: usize) {
        com_dprintf(&format!("touch: {} -> {}\n", other, trigger));
    }
}

// ============================================================
// Host
// ============================================================

pub struct HostClient {
    pub num: usize,
    pub pred: Prediction,
    pub cl: ClientState,
    pub inbound: MessageQueue<PlayerUpdate>,
    pub viewangles: Vec3,
    /// one way delay in seconds
    pub one_way: f64,
}

pub struct Host {
    pub sv: ServerContext,
    pub clients: Vec<HostClient>,
    pub movevars: MoveVars,
    pub input_cvars: InputCvars,
    pub config: HostConfig,
    pub realtime: f64,
    frametime: f64,
}

impl Host {
    pub fn new(world: Arc<BrushModel>, cvars: &CvarContext) -> Result<Self> {
        let config = HostConfig::from_cvars(cvars);
        if config.clients > MAX_CLIENTS {
            bail!("sim_clients {} exceeds {}", config.clients, MAX_CLIENTS);
        }
        let movevars = MoveVars::from_cvars(cvars);
        let pred_cvars = ClPredCvars::from_cvars(cvars);

        let mut sv = ServerContext::new(SvWorld::new(Arc::clone(&world)), movevars);

        // a crate in the first lane
        let crate_model = Arc::new(box_model("*1", [-32.0, -32.0, 0.0], [32.0, 32.0, 48.0])?);
        let crate_origin = [0.0, 0.0, 0.0];
        let e = sv.world.spawn();
        let ent = &mut sv.world.edicts[e];
        ent.origin = crate_origin;
        ent.solid = Solid::Bsp;
        ent.set_size(crate_model.mins, crate_model.maxs);
        ent.model = Some(Arc::clone(&crate_model));
        ent.modelindex = 2;
        sv.world.link_edict(e, None)?;

        let netchan = sv.sender();
        let mut clients = Vec::with_capacity(config.clients);
        for num in 0..config.clients {
            // later clients sit behind slower links
            let one_way = config.latency * 0.5 * (1.0 + num as f64 * 0.5);
            let spawn = [SPAWN_X, num as f32 * LANE_WIDTH, 24.0];

            sv.spawn_origin = spawn;
            if !cl_connect(&netchan, num, false, &movevars, 0.0, 0.0) {
                bail!("client {} could not reach the server", num);
            }
            sv.execute_client_moves(0.0, &mut LogTouch)?;

            let inbound = MessageQueue::new(DEFAULT_QUEUE_CAPACITY);
            sv.set_client_channel(num, inbound.sender(), one_way);

            let mut cl = ClientState::new(Arc::clone(&world), num);
            cl.add_brush_entity(Arc::clone(&crate_model), crate_origin);
            let view = cl.viewentity();
            cl.entities[view].set_origin(spawn, 0.0);
            cl.entities[view].has_model = true;

            let mut pred = Prediction::with_cvars(pred_cvars);
            pred.set_server_state(spawn, VEC3_ORIGIN, true);
            pred.simorg = spawn;

            clients.push(HostClient {
                num,
                pred,
                cl,
                inbound,
                viewangles: VEC3_ORIGIN,
                one_way,
            });
        }

        Ok(Self {
            sv,
            clients,
            movevars,
            input_cvars: InputCvars::from_cvars(cvars),
            config,
            realtime: 0.0,
            frametime: 1.0 / config.fps,
        })
    }

    /// Scripted input: run forward with a gentle weave, hop now and then,
    /// and let go of everything for the final settle period.
    fn sample_input(&self, num: usize) -> (InputButtons, f32) {
        if self.realtime > self.config.seconds - self.config.settle {
            return (InputButtons::default(), 0.0);
        }
        let t = self.realtime as f32;
        let yaw = 10.0 * (t * 2.0 + num as f32).sin();
        let buttons = InputButtons {
            forward: true,
            jump: (self.realtime * 2.0) as i64 % 3 == 1,
            ..Default::default()
        };
        (buttons, yaw)
    }

    /// Host_Frame
    pub fn frame(&mut self) -> Result<()> {
        self.realtime += self.frametime;
        let realtime = self.realtime;

        let netchan = self.sv.sender();
        for i in 0..self.clients.len() {
            let (buttons, yaw) = self.sample_input(i);
            let hc = &mut self.clients[i];
            hc.viewangles[YAW] = yaw;
            let cmd = cl_create_cmd(&mut hc.viewangles, &buttons, &self.input_cvars, self.frametime as f32);
            cl_send_cmd(&mut hc.pred, &netchan, hc.num, &cmd, realtime, hc.one_way);
        }

        let executed = self.sv.execute_client_moves(realtime, &mut LogTouch)?;
        let sent = self.sv.broadcast_updates(realtime);
        com_dprintf(&format!("{:.3}: ran {} moves, sent {} updates\n", realtime, executed, sent));

        for hc in &mut self.clients {
            cl_read_packets(&mut hc.pred, &mut hc.cl, &mut hc.inbound, realtime)?;
            hc.cl.viewangles = hc.viewangles;
            hc.pred.predict_move(&hc.cl, realtime, &self.movevars)?;
        }
        Ok(())
    }

    /// Run frames until `config.seconds` have passed.
    pub fn run(&mut self) -> Result<()> {
        let frames = (self.config.seconds * self.config.fps).round() as usize;
        for _ in 0..frames {
            self.frame()?;
        }
        Ok(())
    }

    /// Distance between a client's predicted origin and its body on the server.
    pub fn prediction_error(&self, num: usize) -> Option<f32> {
        let hc = self.clients.get(num)?;
        let edict = self.sv.clients.get(num)?.edict;
        let server = self.sv.world.edicts.get(edict)?.origin;
        Some(vector_length(&vector_subtract(&hc.pred.simorg, &server)))
    }

    /// Per-client summary of where prediction ended up. The lines are
    /// collected through the print redirect and logged as one block.
    pub fn report(&self) -> String {
        com_begin_redirect();
        for hc in &self.clients {
            let error = self.prediction_error(hc.num).unwrap_or(f32::NAN);
            com_printf(&format!(
                "client {}: origin ({:.2} {:.2} {:.2}) latency {:.0} ms error {:.4}\n",
                hc.num,
                hc.pred.simorg[0],
                hc.pred.simorg[1],
                hc.pred.simorg[2],
                hc.pred.latency * 1000.0,
                error
            ));
        }
        let text = com_end_redirect().unwrap_or_default();
        com_printf(&text);
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_with(settings: &[(&str, &str)]) -> Host {
        let mut cvars = CvarContext::new();
        host_register_cvars(&mut cvars);
        for (name, value) in settings {
            cvars.set(name, value);
        }
        Host::new(demo_world().unwrap(), &cvars).unwrap()
    }

    #[test]
    fn test_config_from_cvars() {
        let mut cvars = CvarContext::new();
        host_register_cvars(&mut cvars);
        cvars.set("sim_latency", "250");
        cvars.set("sim_clients", "3");
        let config = HostConfig::from_cvars(&cvars);
        assert_eq!(config.clients, 3);
        assert!((config.latency - 0.25).abs() < 1e-9);
        assert_eq!(config.fps, 72.0);
    }

    #[test]
    fn test_too_many_clients_is_an_error() {
        let mut cvars = CvarContext::new();
        host_register_cvars(&mut cvars);
        cvars.set("sim_clients", "40");
        assert!(Host::new(demo_world().unwrap(), &cvars).is_err());
    }

    #[test]
    fn test_clients_connect_in_their_lanes() {
        let host = host_with(&[]);
        for num in 0..2 {
            let edict = host.sv.clients[num].edict;
            assert_eq!(
                host.sv.world.edicts[edict].origin,
                [SPAWN_X, num as f32 * LANE_WIDTH, 24.0]
            );
            assert_eq!(host.prediction_error(num), Some(0.0));
        }
    }

    #[test]
    fn test_prediction_settles_on_server_state() {
        let mut host = host_with(&[("sim_seconds", "4")]);
        host.run().unwrap();
        for num in 0..2 {
            let error = host.prediction_error(num).unwrap();
            assert!(error < 0.01, "client {} off by {}", num, error);
            let moved = host.clients[num].pred.simorg[0] - SPAWN_X;
            assert!(moved > 100.0, "client {} only moved {}", num, moved);
            assert!(host.clients[num].pred.latency > 0.0);
        }
    }

    #[test]
    fn test_prediction_leads_server_while_moving() {
        let mut host = host_with(&[("sim_latency", "200")]);
        for _ in 0..72 {
            host.frame().unwrap();
        }
        let edict = host.sv.clients[0].edict;
        let server_x = host.sv.world.edicts[edict].origin[0];
        assert!(
            host.clients[0].pred.simorg[0] > server_x,
            "predicted {} vs server {}",
            host.clients[0].pred.simorg[0],
            server_x
        );
    }

    #[test]
    fn test_report_has_a_line_per_client() {
        let host = host_with(&[("sim_clients", "3")]);
        let report = host.report();
        for num in 0..3 {
            assert!(
                report.contains(&format!("client {}: origin ({:.2} ", num, SPAWN_X)),
                "missing client {} in {:?}",
                num,
                report
            );
        }
        assert!(report.contains("error 0.0000"));
    }

    #[test]
    fn test_nopred_trails_server() {
        let mut host = host_with(&[("cl_nopred", "1"), ("sim_latency", "200")]);
        for _ in 0..72 {
            host.frame().unwrap();
        }
        let edict = host.sv.clients[0].edict;
        let server_x = host.sv.world.edicts[edict].origin[0];
        let shown = host.clients[0].pred.simorg[0];
        assert!(shown < server_x, "shown {} vs server {}", shown, server_x);
        assert_eq!(shown, host.clients[0].pred.frame(host.clients[0].pred.incoming_sequence).playerstate.origin[0]);
    }
}
