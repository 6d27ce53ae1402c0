//! Peripheral system-status tracking and change-status requests.

use {
    crate::{
        error::{Error, ProtocolError, Result},
        host::HostInterface,
        protocol::{
            Opcode, StatusRequest,
            catalog::{self, STATUS_RESPONSE_LEN},
        },
    },
    crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender},
    log::{debug, info, warn},
    parking_lot::Mutex,
    std::{fmt, sync::Arc, time::Duration},
};

/// System status of the peripheral as last reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SystemStatus {
    /// Idle in ROM; the status cannot be changed from here.
    IdleFromRom,
    /// Idle in firmware.
    #[default]
    Idle,
    /// Deep sleep.
    DeepSleep,
}

impl fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdleFromRom => write!(f, "idle (ROM)"),
            Self::Idle => write!(f, "idle"),
            Self::DeepSleep => write!(f, "deep sleep"),
        }
    }
}

/// Where change-status confirmations come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// A change-status event delivered through the event pump.
    Event,
    /// The change-status frame read back as the response to the request.
    Response,
}

/// Shared status plus the confirmation signal a change request waits on.
#[derive(Debug, Clone)]
pub struct SystemState {
    status: Arc<Mutex<SystemStatus>>,
    confirm_tx: Sender<()>,
    confirm_rx: Receiver<()>,
}

impl Default for SystemState {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemState {
    /// Start out [`SystemStatus::Idle`] with no pending confirmation.
    pub fn new() -> Self {
        let (confirm_tx, confirm_rx) = channel::unbounded();
        Self {
            status: Arc::new(Mutex::new(SystemStatus::default())),
            confirm_tx,
            confirm_rx,
        }
    }

    /// Last known status.
    pub fn status(&self) -> SystemStatus {
        *self
            .status
            .lock()
    }

    /// Apply a change-status notification and wake a waiting request.
    ///
    /// Unknown values leave the status untouched but still count as a
    /// confirmation.
    pub fn on_status_event(&self, notification: u8) {
        let next = match StatusRequest::try_from(notification) {
            Ok(StatusRequest::RomRestart) => Some(SystemStatus::IdleFromRom),
            Ok(StatusRequest::Restart | StatusRequest::Wakeup) => Some(SystemStatus::Idle),
            Ok(StatusRequest::Suspend) => Some(SystemStatus::DeepSleep),
            Ok(StatusRequest::BrokenDown) => {
                warn!("Peripheral reports it has broken down");
                Some(SystemStatus::IdleFromRom)
            },
            Err(_) => {
                warn!("Unexpected status change notification {notification:#04x}");
                None
            },
        };

        if let Some(next) = next {
            let mut status = self
                .status
                .lock();
            info!("System status {} -> {next}", *status);
            *status = next;
        }

        if self
            .confirm_tx
            .send(())
            .is_err()
        {
            debug!("Status confirmation dropped, no receiver");
        }
    }

    /// Send a change-status request and wait for its confirmation.
    ///
    /// Requests that cannot change anything (already awake, already asleep,
    /// or idle in ROM) are logged and still sent.
    pub fn request_change(
        &self,
        host: &mut dyn HostInterface,
        request: StatusRequest,
        confirmation: Confirmation,
        timeout: Duration,
    ) -> Result<SystemStatus> {
        let current = self.status();
        let redundant = matches!(
            (current, request),
            (SystemStatus::IdleFromRom, _)
                | (SystemStatus::Idle, StatusRequest::Wakeup)
                | (SystemStatus::DeepSleep, StatusRequest::Suspend)
        );
        if redundant {
            info!("No need to change status {current} with {request:?}, sending anyway");
        }

        let drained = self
            .confirm_rx
            .try_iter()
            .count();
        if drained > 0 {
            debug!("Dropped {drained} stale confirmation(s)");
        }

        let cmd = catalog::change_status(request)?;
        match confirmation {
            Confirmation::Event => {
                host.write(&cmd)?;
                let waited = self
                    .confirm_rx
                    .recv_timeout(timeout);
                host.abandon_response();
                match waited {
                    Ok(()) => {},
                    Err(RecvTimeoutError::Timeout) => {
                        return Err(Error::Timeout(format!(
                            "no status change confirmation within {timeout:?}"
                        )));
                    },
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(Error::State("status confirmation channel closed".into()));
                    },
                }
            },
            Confirmation::Response => {
                // The confirmation carries the new status, not a zero status.
                let response = host.transaction(&cmd)?;
                let expected = u8::from(Opcode::ChangeStatus);
                if response.opcode() != expected {
                    return Err(ProtocolError::UnexpectedOpcode {
                        expected,
                        actual: response.opcode(),
                    }
                    .into());
                }
                let notification = response
                    .status()
                    .ok_or(ProtocolError::UnexpectedLength {
                        expected: STATUS_RESPONSE_LEN,
                        actual: response.wire_len(),
                    })?;
                self.on_status_event(notification);
            },
        }

        Ok(self.status())
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            host::{TransportKind, mock::ScriptedTransport},
            protocol::Frame,
        },
        std::thread,
    };

    #[test]
    fn test_status_table() {
        let state = SystemState::new();
        assert_eq!(state.status(), SystemStatus::Idle);

        state.on_status_event(0x03);
        assert_eq!(state.status(), SystemStatus::DeepSleep);
        state.on_status_event(0x02);
        assert_eq!(state.status(), SystemStatus::Idle);
        state.on_status_event(0x00);
        assert_eq!(state.status(), SystemStatus::IdleFromRom);
        state.on_status_event(0x01);
        assert_eq!(state.status(), SystemStatus::Idle);
        state.on_status_event(0xFF);
        assert_eq!(state.status(), SystemStatus::IdleFromRom);

        state.on_status_event(0x42);
        assert_eq!(state.status(), SystemStatus::IdleFromRom);
    }

    #[test]
    fn test_event_confirmation() {
        let state = SystemState::new();
        let mut host = ScriptedTransport::acking(TransportKind::Serial);

        let notifier = state.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            notifier.on_status_event(0x03);
        });

        let status = state
            .request_change(
                &mut host,
                StatusRequest::Suspend,
                Confirmation::Event,
                Duration::from_secs(2),
            )
            .unwrap();
        handle
            .join()
            .unwrap();

        assert_eq!(status, SystemStatus::DeepSleep);
        assert_eq!(host.sent()[0].operand(), &[0x03]);
    }

    #[test]
    fn test_event_without_waiter_updates_status() {
        let state = SystemState::new();
        state.on_status_event(0x03);
        assert_eq!(state.status(), SystemStatus::DeepSleep);
        state.on_status_event(0x7E);
        assert_eq!(state.status(), SystemStatus::DeepSleep);
        state.on_status_event(0x02);
        assert_eq!(state.status(), SystemStatus::Idle);
    }

    #[test]
    fn test_stale_confirmation_is_drained() {
        let state = SystemState::new();
        state.on_status_event(0x02);
        let mut host = ScriptedTransport::acking(TransportKind::Serial);

        let err = state
            .request_change(
                &mut host,
                StatusRequest::Wakeup,
                Confirmation::Event,
                Duration::from_millis(50),
            )
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(host.sent().len(), 1);
    }

    #[test]
    fn test_response_confirmation() {
        let state = SystemState::new();
        let mut host = ScriptedTransport::new(TransportKind::Serial, |request: &Frame| {
            Ok(Frame::new(0x00, request.operand().to_vec()))
        });

        let status = state
            .request_change(
                &mut host,
                StatusRequest::RomRestart,
                Confirmation::Response,
                Duration::from_secs(1),
            )
            .unwrap();
        assert_eq!(status, SystemStatus::IdleFromRom);
    }

    #[test]
    fn test_response_with_wrong_opcode() {
        let state = SystemState::new();
        let mut host =
            ScriptedTransport::new(TransportKind::Serial, |_: &Frame| Ok(Frame::new(0x01, vec![0])));

        assert!(state
            .request_change(
                &mut host,
                StatusRequest::Suspend,
                Confirmation::Response,
                Duration::from_secs(1),
            )
            .is_err());
        assert_eq!(state.status(), SystemStatus::Idle);
    }
}
