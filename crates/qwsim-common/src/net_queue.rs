// net_queue.rs -- Thread-safe message queueing between endpoints
//
// Commands travel client -> server and state updates server -> client over
// bounded crossbeam channels. A full queue drops the message; the producer
// never blocks.

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};

use crate::common::com_wprintf;
use crate::q_shared::{UserCmd, Vec3};

/// Client slots on one server.
pub const MAX_CLIENTS: usize = 16;

/// One movement command, tagged with the sender's outgoing sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientMove {
    pub client: usize,
    pub sequence: i32,
    pub cmd: UserCmd,
}

/// Everything a client can send.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClientMessage {
    /// Handshake carrying the client's movement tunables checksum.
    Connect {
        client: usize,
        spectator: bool,
        movevars_checksum: u16,
    },
    Move(ClientMove),
}

/// Authoritative state for one client after its latest accepted command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerUpdate {
    pub ack_sequence: i32,
    pub origin: Vec3,
    pub velocity: Vec3,
    pub onground: bool,
}

/// A message plus the time it becomes visible to the receiver.
#[derive(Debug, Clone)]
pub struct QueuedMessage<T> {
    pub msg: T,
    /// delivery time in seconds
    pub deliver_at: f64,
}

/// Bounded queue between two endpoints.
pub struct MessageQueue<T> {
    sender: Sender<QueuedMessage<T>>,
    receiver: Receiver<QueuedMessage<T>>,
    /// received but not yet due
    held: Vec<QueuedMessage<T>>,
}

impl<T> MessageQueue<T> {
    /// Create a new bounded queue. When full, new messages are dropped.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            held: Vec::new(),
        }
    }

    /// Get a clone of the sender handle.
    pub fn sender(&self) -> MessageSender<T> {
        MessageSender {
            sender: self.sender.clone(),
        }
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Option<QueuedMessage<T>> {
        self.receiver.try_recv().ok()
    }

    /// Drain everything queued right now, in arrival order.
    pub fn drain(&self) -> Vec<QueuedMessage<T>> {
        self.receiver.try_iter().collect()
    }

    /// Take every message whose delivery time has come, in arrival order.
    /// Messages not yet due stay held for a later call.
    pub fn receive_due(&mut self, now: f64) -> Vec<T> {
        self.held.extend(self.receiver.try_iter());
        let (due, later): (Vec<_>, Vec<_>) = std::mem::take(&mut self.held)
            .into_iter()
            .partition(|m| m.deliver_at <= now);
        self.held = later;
        due.into_iter().map(|m| m.msg).collect()
    }

    /// Messages received but still waiting on their delivery time.
    pub fn held_len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }
}

/// Sender handle for a message queue.
pub struct MessageSender<T> {
    sender: Sender<QueuedMessage<T>>,
}

impl<T> Clone for MessageSender<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T> MessageSender<T> {
    /// Try to send without blocking.
    ///
    /// Returns `true` if sent, `false` if the queue is full or closed
    /// (message dropped).
    pub fn try_send(&self, msg: T, deliver_at: f64) -> bool {
        match self.sender.try_send(QueuedMessage { msg, deliver_at }) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                com_wprintf("MessageQueue: queue full, message dropped\n");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Default queue capacity, a few seconds of commands at 72 fps.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    fn make_move(sequence: i32) -> ClientMessage {
        ClientMessage::Move(ClientMove {
            client: 0,
            sequence,
            cmd: UserCmd { msec: 13, ..Default::default() },
        })
    }

    #[test]
    fn test_queue_basic_operations() {
        let queue = MessageQueue::new(10);
        let sender = queue.sender();

        assert!(queue.is_empty());
        assert!(sender.try_send(make_move(1), 0.5));
        assert_eq!(queue.len(), 1);

        let m = queue.try_recv().unwrap();
        assert_eq!(m.msg, make_move(1));
        assert_eq!(m.deliver_at, 0.5);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_full_drops_messages() {
        let queue = MessageQueue::new(2);
        let sender = queue.sender();

        assert!(sender.try_send(make_move(1), 0.0));
        assert!(sender.try_send(make_move(2), 0.0));
        assert!(!sender.try_send(make_move(3), 0.0));

        let seqs: Vec<ClientMessage> = queue.drain().into_iter().map(|m| m.msg).collect();
        assert_eq!(seqs, vec![make_move(1), make_move(2)]);
    }

    #[test]
    fn test_receive_due_holds_future_messages() {
        let mut queue = MessageQueue::new(10);
        let sender = queue.sender();
        assert!(sender.try_send(make_move(1), 0.2));
        assert!(sender.try_send(make_move(2), 0.1));
        assert!(sender.try_send(make_move(3), 0.3));

        assert!(queue.receive_due(0.05).is_empty());
        assert_eq!(queue.held_len(), 3);

        assert_eq!(queue.receive_due(0.2), vec![make_move(1), make_move(2)]);
        assert_eq!(queue.held_len(), 1);

        assert_eq!(queue.receive_due(1.0), vec![make_move(3)]);
        assert_eq!(queue.held_len(), 0);
    }

    #[test]
    fn test_cloned_senders_share_queue() {
        let queue: MessageQueue<PlayerUpdate> = MessageQueue::new(10);
        let a = queue.sender();
        let b = a.clone();
        let update = PlayerUpdate {
            ack_sequence: 4,
            origin: [1.0, 2.0, 3.0],
            velocity: [0.0; 3],
            onground: true,
        };
        assert!(a.try_send(update, 0.0));
        assert!(b.try_send(update, 0.1));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_closed_queue_refuses() {
        let queue: MessageQueue<PlayerUpdate> = MessageQueue::new(1);
        let sender = queue.sender();
        drop(queue);
        let update = PlayerUpdate {
            ack_sequence: 0,
            origin: [0.0; 3],
            velocity: [0.0; 3],
            onground: false,
        };
        assert!(!sender.try_send(update, 0.0));
    }
}
