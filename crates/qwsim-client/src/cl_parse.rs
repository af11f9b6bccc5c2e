// cl_parse.rs -- parse a message received from the server

use qwsim_common::cmodel::GeometryError;
use qwsim_common::common::com_dprintf;
use qwsim_common::net_queue::{MessageQueue, PlayerUpdate};

use crate::cl_pred::{nudge_position, Prediction};
use crate::client::ClientState;

/// Apply one authoritative state update. Returns `false` if the update was
/// older than one already applied, or acknowledges a command we never sent,
/// and has been dropped.
pub fn cl_parse_player_update(
    pred: &mut Prediction,
    cl: &mut ClientState,
    update: &PlayerUpdate,
    realtime: f64,
) -> Result<bool, GeometryError> {
    if update.ack_sequence < pred.incoming_sequence {
        com_dprintf(&format!(
            "CL_ParsePlayerUpdate: stale ack {} < {}\n",
            update.ack_sequence, pred.incoming_sequence
        ));
        return Ok(false);
    }

    if !pred.acknowledge(update.ack_sequence) {
        return Ok(false);
    }
    pred.update_latency(update.ack_sequence, realtime);

    // the wire may have cut precision enough to leave us in a wall
    let origin = match cl.worldmodel.as_ref() {
        Some(world) => nudge_position(world, &update.origin)?,
        None => update.origin,
    };
    pred.set_server_state(origin, update.velocity, update.onground);

    cl.mark_message(realtime);
    let view = cl.viewentity();
    if let Some(ent) = cl.entities.get_mut(view) {
        ent.set_origin(origin, realtime);
        ent.has_model = true;
    }
    Ok(true)
}

/// Apply every update that has arrived by `realtime`. Returns how many
/// were accepted.
pub fn cl_read_packets(
    pred: &mut Prediction,
    cl: &mut ClientState,
    inbound: &mut MessageQueue<PlayerUpdate>,
    realtime: f64,
) -> Result<usize, GeometryError> {
    let mut accepted = 0;
    for update in inbound.receive_due(realtime) {
        if cl_parse_player_update(pred, cl, &update, realtime)? {
            accepted += 1;
        }
    }
    Ok(accepted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use qwsim_common::cmodel::{slab_model, Slab};
    use qwsim_common::q_shared::{UserCmd, CONTENTS_SOLID};
    use std::sync::Arc;

    fn setup() -> (Prediction, ClientState) {
        let world = slab_model(
            "room",
            &[Slab::floor(0.0), Slab::below(0, 0.0, CONTENTS_SOLID)],
            [-4096.0; 3],
            [4096.0; 3],
        )
        .unwrap();
        let mut pred = Prediction::new();
        for i in 0..10 {
            let cmd = UserCmd { msec: 20, ..Default::default() };
            pred.store_command(&cmd, 1.0 + i as f64 * 0.02);
        }
        (pred, ClientState::new(Arc::new(world), 0))
    }

    fn update(ack_sequence: i32, x: f32) -> PlayerUpdate {
        PlayerUpdate {
            ack_sequence,
            origin: [x, 0.0, 24.0],
            velocity: [0.0; 3],
            onground: true,
        }
    }

    #[test]
    fn test_update_sets_acknowledged_frame() {
        let (mut pred, mut cl) = setup();
        assert!(cl_parse_player_update(&mut pred, &mut cl, &update(5, 50.0), 1.3).unwrap());
        assert_eq!(pred.incoming_sequence, 5);
        assert_eq!(pred.frame(5).playerstate.origin, [50.0, 0.0, 24.0]);
        assert!(pred.frame(5).playerstate.onground);
        assert_eq!(cl.entities[1].origin, [50.0, 0.0, 24.0]);
        assert_eq!(cl.mtime[0], 1.3);
        assert!(pred.latency > 0.0, "latency estimate should be refreshed");
    }

    #[test]
    fn test_stale_update_is_dropped() {
        let (mut pred, mut cl) = setup();
        assert!(cl_parse_player_update(&mut pred, &mut cl, &update(5, 50.0), 1.3).unwrap());
        assert!(!cl_parse_player_update(&mut pred, &mut cl, &update(3, 30.0), 1.31).unwrap());
        assert_eq!(pred.incoming_sequence, 5);
        assert_eq!(pred.frame(5).playerstate.origin, [50.0, 0.0, 24.0]);
        assert_eq!(pred.frame(3).playerstate.origin, [0.0; 3]);
    }

    #[test]
    fn test_repeated_ack_is_accepted() {
        let (mut pred, mut cl) = setup();
        assert!(cl_parse_player_update(&mut pred, &mut cl, &update(5, 50.0), 1.3).unwrap());
        assert!(cl_parse_player_update(&mut pred, &mut cl, &update(5, 52.0), 1.32).unwrap());
        assert_eq!(pred.frame(5).playerstate.origin, [52.0, 0.0, 24.0]);
    }

    #[test]
    fn test_ack_for_unsent_command_is_dropped() {
        let (mut pred, mut cl) = setup();
        assert!(cl_parse_player_update(&mut pred, &mut cl, &update(1, 60.0), 1.3).unwrap());
        let latency = pred.latency;

        assert!(!cl_parse_player_update(&mut pred, &mut cl, &update(50, 999.0), 1.31).unwrap());
        assert!(!cl_parse_player_update(&mut pred, &mut cl, &update(10, 999.0), 1.32).unwrap());
        assert_eq!(pred.incoming_sequence, 1);
        assert_eq!(pred.frame(1).playerstate.origin, [60.0, 0.0, 24.0]);
        assert_eq!(cl.entities[1].origin, [60.0, 0.0, 24.0]);
        assert_eq!(cl.mtime[0], 1.3);
        assert_eq!(pred.latency, latency);
    }

    #[test]
    fn test_duplicate_ack_refreshes_current_frame() {
        let (mut pred, mut cl) = setup();
        assert!(cl_parse_player_update(&mut pred, &mut cl, &update(4, 40.0), 1.3).unwrap());
        assert!(cl_parse_player_update(&mut pred, &mut cl, &update(4, 41.0), 1.35).unwrap());
        assert_eq!(pred.incoming_sequence, 4);
        assert_eq!(pred.frame(4).playerstate.origin, [41.0, 0.0, 24.0]);
        assert_eq!(cl.entities[1].msg_origins, [[41.0, 0.0, 24.0], [40.0, 0.0, 24.0]]);
        assert_eq!(cl.mtime, [1.35, 1.3]);
    }

    #[test]
    fn test_origin_is_nudged_out_of_wall() {
        let (mut pred, mut cl) = setup();
        // hull 1 puts the wall face at x = 16
        cl_parse_player_update(&mut pred, &mut cl, &update(2, 15.9), 1.3).unwrap();
        let origin = pred.frame(2).playerstate.origin;
        assert!(origin[0] > 16.0, "still in the wall: {:?}", origin);
    }

    #[test]
    fn test_read_packets_waits_for_delivery() {
        let (mut pred, mut cl) = setup();
        let mut inbound = MessageQueue::new(8);
        let sender = inbound.sender();
        assert!(sender.try_send(update(2, 40.0), 1.25));
        assert!(sender.try_send(update(4, 44.0), 1.35));

        assert_eq!(cl_read_packets(&mut pred, &mut cl, &mut inbound, 1.2).unwrap(), 0);
        assert_eq!(cl_read_packets(&mut pred, &mut cl, &mut inbound, 1.3).unwrap(), 1);
        assert_eq!(pred.incoming_sequence, 2);
        assert_eq!(cl_read_packets(&mut pred, &mut cl, &mut inbound, 1.4).unwrap(), 1);
        assert_eq!(pred.incoming_sequence, 4);
    }
}
