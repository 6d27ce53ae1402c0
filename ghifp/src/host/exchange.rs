//! Single-slot hand-off of response frames from a receive thread to the
//! caller waiting on them.

use {
    crate::{
        error::{Error, Result},
        protocol::Frame,
    },
    crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError},
    std::time::Duration,
};

/// At most one pending response frame.
///
/// Clones share the slot. The receive thread pushes, the request issuer pops;
/// a push while a frame is still pending fails instead of queueing, because
/// requests and responses strictly alternate.
#[derive(Debug, Clone)]
pub struct ResponseExchange {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
}

impl Default for ResponseExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseExchange {
    /// Create an empty slot.
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(1);
        Self { tx, rx }
    }

    /// Hand a frame to the waiting caller. Ownership moves into the slot.
    pub fn push(&self, frame: Frame) -> Result<()> {
        self.tx
            .try_send(frame)
            .map_err(|e| match e {
                TrySendError::Full(_) | TrySendError::Disconnected(_) => Error::QueueFull,
            })
    }

    /// Take the pending frame, waiting up to `timeout` for one.
    pub fn pop(&self, timeout: Duration) -> Result<Frame> {
        self.rx
            .recv_timeout(timeout)
            .map_err(|e| match e {
                RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected => {
                    Error::Timeout(format!("no response within {timeout:?}"))
                },
            })
    }

    /// Discard a stale frame, if any. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        self.rx
            .try_iter()
            .count()
    }

    /// Whether a frame is waiting to be popped.
    pub fn is_pending(&self) -> bool {
        !self
            .rx
            .is_empty()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::{thread, time::Instant},
    };

    #[test]
    fn test_pop_without_push_times_out() {
        let exchange = ResponseExchange::new();
        let start = Instant::now();
        let err = exchange
            .pop(Duration::from_millis(10))
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_second_push_is_rejected() {
        let exchange = ResponseExchange::new();
        exchange
            .push(Frame::new(0x01, vec![0]))
            .unwrap();
        assert!(matches!(
            exchange.push(Frame::new(0x01, vec![1])),
            Err(Error::QueueFull)
        ));
        let frame = exchange
            .pop(Duration::from_millis(10))
            .unwrap();
        assert_eq!(frame.operand(), &[0]);
        assert!(!exchange.is_pending());
    }

    #[test]
    fn test_push_from_producer_thread() {
        let exchange = ResponseExchange::new();
        let producer = exchange.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer
                .push(Frame::new(0x02, Vec::new()))
                .unwrap();
        });
        let frame = exchange
            .pop(Duration::from_secs(2))
            .unwrap();
        assert_eq!(frame.opcode(), 0x02);
        handle
            .join()
            .unwrap();
    }

    #[test]
    fn test_clear_discards_stale_frame() {
        let exchange = ResponseExchange::new();
        exchange
            .push(Frame::new(0x00, vec![2]))
            .unwrap();
        assert_eq!(exchange.clear(), 1);
        assert_eq!(exchange.clear(), 0);
        assert!(exchange.push(Frame::new(0x00, vec![2])).is_ok());
    }
}
