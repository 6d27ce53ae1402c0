//! Unsolicited frames from the peripheral.
//!
//! Receive threads push event frames into a channel. The event pump decodes
//! them, keeps [`SystemState`] current and fans each event out to
//! subscribers.

use {
    crate::{
        error::Result,
        host::reassembly::POLL_INTERVAL,
        protocol::{Frame, FrameCheckError, Opcode},
        system::SystemState,
        worker::Worker,
    },
    crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender},
    log::{debug, warn},
    parking_lot::Mutex,
    std::sync::Arc,
};

/// A decoded unsolicited frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The peripheral rejected a frame.
    FrameCheckError {
        /// Opcode of the rejected frame.
        opcode: u8,
        /// Peripheral error code.
        code: u8,
    },
    /// The peripheral changed system status.
    StatusChanged(u8),
    /// Any other event frame, passed through undecoded.
    Other(Frame),
}

impl Event {
    /// Decode an event frame.
    pub fn from_frame(frame: Frame) -> Self {
        if let Some(FrameCheckError { opcode, code }) = FrameCheckError::from_frame(&frame) {
            return Self::FrameCheckError { opcode, code };
        }
        if frame.opcode() == u8::from(Opcode::ChangeStatus) {
            if let Some(status) = frame.status() {
                return Self::StatusChanged(status);
            }
        }
        Self::Other(frame)
    }
}

/// Registered event listeners.
#[derive(Debug, Clone, Default)]
pub struct Subscribers(Arc<Mutex<Vec<Sender<Event>>>>);

impl Subscribers {
    /// Register a new listener.
    pub fn subscribe(&self) -> Receiver<Event> {
        let (tx, rx) = channel::unbounded();
        self.0
            .lock()
            .push(tx);
        rx
    }

    /// Deliver `event` to every listener, forgetting those that hung up.
    pub fn publish(&self, event: &Event) {
        self.0
            .lock()
            .retain(|tx| {
                tx.send(event.clone())
                    .is_ok()
            });
    }

    /// Number of live listeners.
    pub fn len(&self) -> usize {
        self.0
            .lock()
            .len()
    }

    /// Whether nobody is listening.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn handle(frame: Frame, system: &SystemState, subscribers: &Subscribers) {
    let event = Event::from_frame(frame);
    match &event {
        Event::FrameCheckError { opcode, code } => {
            warn!("Frame check error from peripheral: opcode {opcode:#04x}, code {code:#04x}");
        },
        Event::StatusChanged(status) => system.on_status_event(*status),
        Event::Other(frame) => {
            if frame.opcode() == u8::from(Opcode::FrameCheckError) {
                warn!(
                    "Malformed frame check notification with {} operand bytes",
                    frame
                        .operand()
                        .len()
                );
            } else {
                debug!("Event with opcode {:#04x}", frame.opcode());
            }
        },
    }
    subscribers.publish(&event);
}

/// Start the event pump. It runs until stopped or every sender is gone.
pub(crate) fn spawn_pump(
    frames: Receiver<Frame>,
    system: SystemState,
    subscribers: Subscribers,
) -> Result<Worker> {
    Worker::spawn("ghifp-events", move |shutdown| {
        while !shutdown.is_requested() {
            match frames.recv_timeout(POLL_INTERVAL) {
                Ok(frame) => handle(frame, &system, &subscribers),
                Err(RecvTimeoutError::Timeout) => {},
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::system::SystemStatus,
        std::time::Duration,
    };

    #[test]
    fn test_decode_events() {
        assert_eq!(
            Event::from_frame(Frame::new(0xFF, vec![0x01, 0x02])),
            Event::FrameCheckError {
                opcode: 0x01,
                code: 0x02
            }
        );
        assert_eq!(
            Event::from_frame(Frame::new(0x00, vec![0x03])),
            Event::StatusChanged(0x03)
        );
        let odd = Frame::new(0xFF, vec![0x01]);
        assert_eq!(Event::from_frame(odd.clone()), Event::Other(odd));
    }

    #[test]
    fn test_subscribers_drop_closed_listeners() {
        let subscribers = Subscribers::default();
        let rx = subscribers.subscribe();
        drop(subscribers.subscribe());
        assert_eq!(subscribers.len(), 2);

        subscribers.publish(&Event::StatusChanged(1));
        assert_eq!(subscribers.len(), 1);
        assert_eq!(rx.try_recv().unwrap(), Event::StatusChanged(1));
    }

    #[test]
    fn test_pump_updates_status_and_forwards() {
        let (tx, rx) = channel::unbounded();
        let system = SystemState::new();
        let subscribers = Subscribers::default();
        let events = subscribers.subscribe();
        let _pump = spawn_pump(rx, system.clone(), subscribers).unwrap();

        tx.send(Frame::new(0x00, vec![0x03]))
            .unwrap();
        tx.send(Frame::new(0xFF, vec![0x07, 0x01]))
            .unwrap();

        let timeout = Duration::from_secs(2);
        assert_eq!(events.recv_timeout(timeout).unwrap(), Event::StatusChanged(3));
        assert_eq!(
            events
                .recv_timeout(timeout)
                .unwrap(),
            Event::FrameCheckError {
                opcode: 0x07,
                code: 0x01
            }
        );
        assert_eq!(system.status(), SystemStatus::DeepSleep);
    }

    #[test]
    fn test_pump_exits_when_senders_drop() {
        let (tx, rx) = channel::unbounded::<Frame>();
        let pump = spawn_pump(rx, SystemState::new(), Subscribers::default()).unwrap();
        drop(tx);
        std::thread::sleep(Duration::from_millis(300));
        assert!(!pump.is_running());
    }
}
