// cl_input.rs -- builds an intended movement command to send to the server

use qwsim_common::common::com_dprintf;
use qwsim_common::cvar::{CvarContext, CvarFlags};
use qwsim_common::net_queue::{ClientMessage, ClientMove, MessageSender};
use qwsim_common::pmove::MoveVars;
use qwsim_common::q_shared::*;

use crate::cl_pred::Prediction;

/// Input-related cvars.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputCvars {
    pub cl_upspeed: f32,
    pub cl_forwardspeed: f32,
    pub cl_sidespeed: f32,
    pub cl_run: bool,
}

impl Default for InputCvars {
    fn default() -> Self {
        Self {
            cl_upspeed: 200.0,
            cl_forwardspeed: 200.0,
            cl_sidespeed: 350.0,
            cl_run: false,
        }
    }
}

impl InputCvars {
    pub fn register(cvars: &mut CvarContext) {
        cvars.get("cl_upspeed", "200", CvarFlags::empty());
        cvars.get("cl_forwardspeed", "200", CvarFlags::ARCHIVE);
        cvars.get("cl_sidespeed", "350", CvarFlags::empty());
        cvars.get("cl_run", "0", CvarFlags::ARCHIVE);
    }

    pub fn from_cvars(cvars: &CvarContext) -> Self {
        let d = Self::default();
        let read = |name: &str, default: f32| cvars.find_var(name).map_or(default, |v| v.value);
        Self {
            cl_upspeed: read("cl_upspeed", d.cl_upspeed),
            cl_forwardspeed: read("cl_forwardspeed", d.cl_forwardspeed),
            cl_sidespeed: read("cl_sidespeed", d.cl_sidespeed),
            cl_run: read("cl_run", 0.0) != 0.0,
        }
    }
}

/// Which movement keys are held this frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputButtons {
    pub forward: bool,
    pub back: bool,
    pub moveleft: bool,
    pub moveright: bool,
    pub up: bool,
    pub down: bool,
    pub speed: bool,
    pub jump: bool,
    pub attack: bool,
}

#[inline]
fn key_state(held: bool) -> f32 {
    if held {
        1.0
    } else {
        0.0
    }
}

/// Build the intended movement command from keyboard state.
pub fn cl_base_move(viewangles: &Vec3, buttons: &InputButtons, cvars: &InputCvars) -> UserCmd {
    let mut cmd = UserCmd {
        angles: *viewangles,
        ..Default::default()
    };

    cmd.sidemove += (cvars.cl_sidespeed * key_state(buttons.moveright)) as i16;
    cmd.sidemove -= (cvars.cl_sidespeed * key_state(buttons.moveleft)) as i16;

    cmd.upmove += (cvars.cl_upspeed * key_state(buttons.up)) as i16;
    cmd.upmove -= (cvars.cl_upspeed * key_state(buttons.down)) as i16;

    cmd.forwardmove += (cvars.cl_forwardspeed * key_state(buttons.forward)) as i16;
    cmd.forwardmove -= (cvars.cl_forwardspeed * key_state(buttons.back)) as i16;

    // adjust for speed key / running
    if buttons.speed ^ cvars.cl_run {
        cmd.forwardmove *= 2;
        cmd.sidemove *= 2;
        cmd.upmove *= 2;
    }
    cmd
}

/// Clamp the pitch angle to valid range.
pub fn cl_clamp_pitch(viewangles: &mut Vec3) {
    if viewangles[PITCH] > 80.0 {
        viewangles[PITCH] = 80.0;
    }
    if viewangles[PITCH] < -70.0 {
        viewangles[PITCH] = -70.0;
    }
}

/// Fill in the remaining fields of a usercmd after base movement.
pub fn cl_finish_move(cmd: &mut UserCmd, viewangles: &mut Vec3, buttons: &InputButtons, frametime: f32) {
    // figure button bits
    if buttons.attack {
        cmd.buttons |= BUTTON_ATTACK;
    }
    if buttons.jump {
        cmd.buttons |= BUTTON_JUMP;
    }

    // send milliseconds of time to apply the move
    let ms = (frametime * 1000.0) as i32;
    let ms = if ms > 250 { 100 } else { ms };
    cmd.msec = ms.max(0) as u8;

    cl_clamp_pitch(viewangles);
    cmd.angles = *viewangles;
}

/// Create a complete usercmd for this frame.
pub fn cl_create_cmd(
    viewangles: &mut Vec3,
    buttons: &InputButtons,
    cvars: &InputCvars,
    frametime: f32,
) -> UserCmd {
    let mut cmd = cl_base_move(viewangles, buttons, cvars);
    cl_finish_move(&mut cmd, viewangles, buttons, frametime);
    cmd
}

/// Announce ourselves to the server along with our movement tunables.
pub fn cl_connect(
    netchan: &MessageSender<ClientMessage>,
    client: usize,
    spectator: bool,
    movevars: &MoveVars,
    realtime: f64,
    one_way: f64,
) -> bool {
    netchan.try_send(
        ClientMessage::Connect {
            client,
            spectator,
            movevars_checksum: movevars.checksum(),
        },
        realtime + one_way,
    )
}

/// Save a command off for prediction and send it. Returns the sequence it
/// went out with, or `None` if the prediction window is full and the
/// command was held back.
///
/// A command the channel refuses is treated as a lost packet: it keeps its
/// sequence and stays in the ring, so prediction replays it until a later
/// acknowledgement moves past it and the server state corrects the drift.
pub fn cl_send_cmd(
    pred: &mut Prediction,
    netchan: &MessageSender<ClientMessage>,
    client: usize,
    cmd: &UserCmd,
    realtime: f64,
    one_way: f64,
) -> Option<i32> {
    let sequence = pred.store_command(cmd, realtime)?;
    let sent = netchan.try_send(
        ClientMessage::Move(ClientMove {
            client,
            sequence,
            cmd: *cmd,
        }),
        realtime + one_way,
    );
    if !sent {
        // stays in the ring; the server will never acknowledge it
        com_dprintf(&format!("CL_SendCmd: dropped command {}\n", sequence));
    }
    Some(sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use qwsim_common::net_queue::MessageQueue;

    #[test]
    fn test_base_move_scales_keys() {
        let cvars = InputCvars::default();
        let buttons = InputButtons {
            forward: true,
            moveleft: true,
            ..Default::default()
        };
        let cmd = cl_base_move(&[0.0, 90.0, 0.0], &buttons, &cvars);
        assert_eq!(cmd.forwardmove, 200);
        assert_eq!(cmd.sidemove, -350);
        assert_eq!(cmd.upmove, 0);
        assert_eq!(cmd.angles, [0.0, 90.0, 0.0]);
    }

    #[test]
    fn test_speed_key_cancels_run() {
        let mut cvars = InputCvars::default();
        let walking = InputButtons { forward: true, ..Default::default() };
        let sprinting = InputButtons { speed: true, ..walking };

        assert_eq!(cl_base_move(&VEC3_ORIGIN, &sprinting, &cvars).forwardmove, 400);
        cvars.cl_run = true;
        assert_eq!(cl_base_move(&VEC3_ORIGIN, &walking, &cvars).forwardmove, 400);
        assert_eq!(cl_base_move(&VEC3_ORIGIN, &sprinting, &cvars).forwardmove, 200);
    }

    #[test]
    fn test_finish_move_sets_msec_and_buttons() {
        let buttons = InputButtons { jump: true, ..Default::default() };
        let mut viewangles = [95.0, 10.0, 0.0];
        let cmd = cl_create_cmd(&mut viewangles, &buttons, &InputCvars::default(), 0.0135);
        assert_eq!(cmd.msec, 13);
        assert_eq!(cmd.buttons, BUTTON_JUMP);
        assert_eq!(cmd.angles, [80.0, 10.0, 0.0]);

        // long hitches send a modest step instead
        let cmd = cl_create_cmd(&mut viewangles, &buttons, &InputCvars::default(), 0.5);
        assert_eq!(cmd.msec, 100);
    }

    #[test]
    fn test_send_cmd_stores_then_sends() {
        let mut queue = MessageQueue::new(8);
        let netchan = queue.sender();
        let mut pred = Prediction::new();
        let cmd = UserCmd { msec: 20, forwardmove: 200, ..Default::default() };

        assert_eq!(cl_send_cmd(&mut pred, &netchan, 3, &cmd, 1.0, 0.05), Some(0));
        assert_eq!(cl_send_cmd(&mut pred, &netchan, 3, &cmd, 1.02, 0.05), Some(1));
        assert_eq!(pred.frame(1).senttime, 1.02);

        assert!(queue.receive_due(1.06).len() == 1);
        let later = queue.receive_due(1.1);
        assert_eq!(
            later,
            vec![ClientMessage::Move(ClientMove { client: 3, sequence: 1, cmd })]
        );
    }

    #[test]
    fn test_refused_send_is_a_lost_command() {
        let mut queue = MessageQueue::new(1);
        let netchan = queue.sender();
        let mut pred = Prediction::new();
        let cmd = UserCmd { msec: 20, forwardmove: 200, ..Default::default() };

        assert_eq!(cl_send_cmd(&mut pred, &netchan, 0, &cmd, 1.0, 0.0), Some(0));
        assert_eq!(cl_send_cmd(&mut pred, &netchan, 0, &cmd, 1.02, 0.0), Some(1));
        assert_eq!(pred.outgoing_sequence, 2);
        assert_eq!(pred.frame(1).cmd, cmd);

        let delivered = queue.receive_due(2.0);
        assert_eq!(delivered.len(), 1);
        assert_eq!(cl_send_cmd(&mut pred, &netchan, 0, &cmd, 1.04, 0.0), Some(2));
        assert!(pred.acknowledge(2), "later commands still acknowledge past the lost one");
    }

    #[test]
    fn test_connect_carries_checksum() {
        let mut queue = MessageQueue::new(2);
        let mv = MoveVars::default();
        assert!(cl_connect(&queue.sender(), 1, true, &mv, 0.0, 0.0));
        let msgs = queue.receive_due(0.0);
        assert_eq!(
            msgs,
            vec![ClientMessage::Connect {
                client: 1,
                spectator: true,
                movevars_checksum: mv.checksum()
            }]
        );
    }
}
