//! Routing of reassembled frames.

use {
    super::{HostIfState, HostState, exchange::ResponseExchange},
    crate::protocol::{Frame, Opcode},
    crossbeam::channel::Sender,
    log::{debug, trace, warn},
};

/// Which opcodes arrive as unsolicited events rather than responses.
///
/// Frame-check-error notifications are always events. Change-status frames
/// are events only when `status_change` is set; otherwise they are treated as
/// the response to a change-status request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventFilter {
    /// Route change-status frames to the event channel.
    pub status_change: bool,
}

impl EventFilter {
    /// Whether frames with `opcode` are events.
    pub fn is_event(self, opcode: u8) -> bool {
        opcode == u8::from(Opcode::FrameCheckError)
            || (self.status_change && opcode == u8::from(Opcode::ChangeStatus))
    }
}

/// Sends each complete frame to the event channel or the response slot.
#[derive(Debug, Clone)]
pub(crate) struct Dispatcher {
    state: HostState,
    exchange: ResponseExchange,
    events: Sender<Frame>,
    filter: EventFilter,
}

impl Dispatcher {
    pub(crate) fn new(
        state: HostState,
        exchange: ResponseExchange,
        events: Sender<Frame>,
        filter: EventFilter,
    ) -> Self {
        Self {
            state,
            exchange,
            events,
            filter,
        }
    }

    pub(crate) fn dispatch(&self, frame: Frame) {
        trace!(
            "Received opcode {:#04x} with {} operand bytes",
            frame.opcode(),
            frame
                .operand()
                .len()
        );

        if self
            .filter
            .is_event(frame.opcode())
        {
            if self
                .events
                .send(frame)
                .is_err()
            {
                debug!("Event channel closed, dropping event");
            }
            return;
        }

        match self
            .state
            .get()
        {
            HostIfState::WaitingForResponse => {
                if self
                    .exchange
                    .push(frame)
                    .is_err()
                {
                    warn!("Response slot already full, dropping frame");
                }
            },
            HostIfState::Idle => {
                debug!("Discarding unsolicited opcode {:#04x}", frame.opcode());
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crossbeam::channel, std::time::Duration};

    fn dispatcher(filter: EventFilter) -> (Dispatcher, HostState, ResponseExchange, channel::Receiver<Frame>) {
        let state = HostState::default();
        let exchange = ResponseExchange::new();
        let (tx, rx) = channel::unbounded();
        (
            Dispatcher::new(state.clone(), exchange.clone(), tx, filter),
            state,
            exchange,
            rx,
        )
    }

    #[test]
    fn test_frame_check_error_is_always_an_event() {
        assert!(EventFilter::default().is_event(0xFF));
        assert!(!EventFilter::default().is_event(0x00));
        assert!(EventFilter { status_change: true }.is_event(0x00));
    }

    #[test]
    fn test_response_only_delivered_while_waiting() {
        let (dispatcher, state, exchange, _events) = dispatcher(EventFilter::default());

        dispatcher.dispatch(Frame::new(0x01, vec![0]));
        assert!(!exchange.is_pending());

        state.set(HostIfState::WaitingForResponse);
        dispatcher.dispatch(Frame::new(0x01, vec![0]));
        let frame = exchange
            .pop(Duration::from_millis(10))
            .unwrap();
        assert_eq!(frame.opcode(), 0x01);
    }

    #[test]
    fn test_events_bypass_response_slot() {
        let (dispatcher, state, exchange, events) =
            dispatcher(EventFilter { status_change: true });
        state.set(HostIfState::WaitingForResponse);

        dispatcher.dispatch(Frame::new(0xFF, vec![0x01, 0x02]));
        dispatcher.dispatch(Frame::new(0x00, vec![0x02]));

        assert!(!exchange.is_pending());
        assert_eq!(events.try_iter().count(), 2);
    }

    #[test]
    fn test_status_change_is_response_when_filter_disabled() {
        let (dispatcher, state, exchange, events) = dispatcher(EventFilter::default());
        state.set(HostIfState::WaitingForResponse);
        dispatcher.dispatch(Frame::new(0x00, vec![0x02]));
        assert!(exchange.is_pending());
        assert!(events.is_empty());
    }
}
