//! The top-level driver context.
//!
//! [`Gacrux`] owns every runtime setting and, between [`Gacrux::init`] and
//! [`Gacrux::deinit`], one session: the registered transports with their
//! receive threads, the shared response slot and the event pump.

use {
    crate::{
        error::{Error, Result},
        events::{Event, Subscribers, spawn_pump},
        firmware::{self, TransferReport, binary, fuzz},
        host::{
            ConfigRequest, EventFilter, HostInterface, HostState, LinkContext, ResponseExchange,
            RetryPolicy, TransportKind,
            addressed::bus_speed,
            clocked::word_size,
            serial::serial_rate,
        },
        protocol::{
            CatalogPolicy, Frame, Opcode, StatusRequest,
            catalog::{
                self, BUS_SPEED_INDEX_MAX, FIRMWARE_PACKET_PREFIX, FLOW_CONTROL_MAX,
                SERIAL_RATE_INDEX_MAX, WORD_SIZE_INDEX_MAX, check_status_response,
            },
            frame::MAX_OPERAND_LEN,
        },
        system::{Confirmation, SystemState, SystemStatus},
        worker::Worker,
    },
    crossbeam::channel::{self, Receiver},
    log::{debug, error, info, warn},
    std::{fmt, fs, path::Path, thread, time::Duration},
};

/// How configure commands treat values outside what the host supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConfigPolicy {
    /// Warn and send the request anyway.
    #[default]
    Permissive,
    /// Reject the request before anything is sent.
    Strict,
}

/// Runtime settings of a [`Gacrux`] driver.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Image bytes per firmware packet.
    pub packet_size: usize,
    /// Data bytes per binary-input packet.
    pub binary_input_packet_size: usize,
    /// How long a transaction waits for its response.
    pub response_timeout: Duration,
    /// How long a status change waits for its confirmation.
    pub status_timeout: Duration,
    /// Pause between a serial reconfigure request and switching the host
    /// side, so the request leaves at the old rate.
    pub serial_settle: Duration,
    /// Handling of unsupported configure values.
    pub config_policy: ConfigPolicy,
    /// Handling of unsupported opcodes in raw writes.
    pub catalog_policy: CatalogPolicy,
    /// Deliver change-status frames as events and confirm status changes
    /// through them instead of through the response.
    pub status_change_events: bool,
    /// Retries for block reads.
    pub retry: RetryPolicy,
    /// Transport selected after construction.
    pub transport: TransportKind,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            packet_size: firmware::DEFAULT_PACKET_SIZE,
            binary_input_packet_size: binary::DEFAULT_PACKET_SIZE,
            response_timeout: Duration::from_secs(1),
            status_timeout: Duration::from_secs(3),
            serial_settle: Duration::from_millis(20),
            config_policy: ConfigPolicy::default(),
            catalog_policy: CatalogPolicy::default(),
            status_change_events: false,
            retry: RetryPolicy::default(),
            transport: TransportKind::Serial,
        }
    }
}

impl DriverConfig {
    /// Set the firmware packet size.
    #[must_use]
    pub fn with_packet_size(mut self, size: usize) -> Self {
        self.packet_size = size;
        self
    }

    /// Set the binary-input packet size.
    #[must_use]
    pub fn with_binary_input_packet_size(mut self, size: usize) -> Self {
        self.binary_input_packet_size = size;
        self
    }

    /// Set the response timeout.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the status change timeout.
    #[must_use]
    pub fn with_status_timeout(mut self, timeout: Duration) -> Self {
        self.status_timeout = timeout;
        self
    }

    /// Set the serial settle delay.
    #[must_use]
    pub fn with_serial_settle(mut self, delay: Duration) -> Self {
        self.serial_settle = delay;
        self
    }

    /// Set the configure policy.
    #[must_use]
    pub fn with_config_policy(mut self, policy: ConfigPolicy) -> Self {
        self.config_policy = policy;
        self
    }

    /// Set the raw-write catalog policy.
    #[must_use]
    pub fn with_catalog_policy(mut self, policy: CatalogPolicy) -> Self {
        self.catalog_policy = policy;
        self
    }

    /// Route change-status frames to the event pump.
    #[must_use]
    pub fn with_status_change_events(mut self, enabled: bool) -> Self {
        self.status_change_events = enabled;
        self
    }

    /// Set the block read retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the initially selected transport.
    #[must_use]
    pub fn with_transport(mut self, kind: TransportKind) -> Self {
        self.transport = kind;
        self
    }
}

/// Creates a transport for a new session.
pub type TransportFactory =
    Box<dyn FnMut(&LinkContext) -> Result<Box<dyn HostInterface>> + Send>;

struct Session {
    transports: [Option<Box<dyn HostInterface>>; 3],
    // Stopped after the transports, which hold the pump's senders.
    _events: Worker,
}

/// Host driver for one Gacrux peripheral.
pub struct Gacrux {
    config: DriverConfig,
    factories: [Option<TransportFactory>; 3],
    selected: TransportKind,
    system: SystemState,
    subscribers: Subscribers,
    session: Option<Session>,
}

impl fmt::Debug for Gacrux {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gacrux")
            .field("config", &self.config)
            .field("selected", &self.selected)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl Gacrux {
    /// Create an uninitialized driver with no transports registered.
    pub fn new(config: DriverConfig) -> Self {
        Self {
            selected: config.transport,
            config,
            factories: [None, None, None],
            system: SystemState::new(),
            subscribers: Subscribers::default(),
            session: None,
        }
    }

    /// Register the factory for `kind`, replacing any earlier one.
    ///
    /// The factory runs on every [`Gacrux::init`].
    pub fn register<F>(&mut self, kind: TransportKind, factory: F)
    where
        F: FnMut(&LinkContext) -> Result<Box<dyn HostInterface>> + Send + 'static,
    {
        self.factories[kind.index()] = Some(Box::new(factory));
    }

    /// Builder form of [`Gacrux::register`].
    #[must_use]
    pub fn with_transport<F>(mut self, kind: TransportKind, factory: F) -> Self
    where
        F: FnMut(&LinkContext) -> Result<Box<dyn HostInterface>> + Send + 'static,
    {
        self.register(kind, factory);
        self
    }

    /// Register a serial transport on a native port.
    #[cfg(feature = "native")]
    #[must_use]
    pub fn with_serial_port(self, port: crate::port::SerialConfig) -> Self {
        use crate::{host::SerialTransport, port::NativePort};

        self.with_transport(TransportKind::Serial, move |ctx| {
            let native = NativePort::open(&port)?;
            Ok(Box::new(SerialTransport::new(native, ctx)?))
        })
    }

    /// Current settings.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Whether a session is running.
    pub fn is_initialized(&self) -> bool {
        self.session
            .is_some()
    }

    /// Start a session: the event pump plus every registered transport.
    ///
    /// On failure everything created so far is torn down again.
    pub fn init(&mut self) -> Result<()> {
        if self.is_initialized() {
            return Err(Error::State("already initialized".into()));
        }
        if self
            .factories
            .iter()
            .all(Option::is_none)
        {
            return Err(Error::State("no transport registered".into()));
        }

        let (events_tx, events_rx) = channel::unbounded();
        let pump = spawn_pump(events_rx, self.system.clone(), self.subscribers.clone())?;
        let ctx = LinkContext::new(
            HostState::default(),
            ResponseExchange::new(),
            events_tx,
            EventFilter {
                status_change: self.config.status_change_events,
            },
        )
        .with_response_timeout(self.config.response_timeout)
        .with_retry(self.config.retry);

        let mut transports: [Option<Box<dyn HostInterface>>; 3] = [None, None, None];
        for (kind, factory) in TransportKind::ALL
            .iter()
            .zip(self.factories.iter_mut())
        {
            if let Some(factory) = factory {
                match factory(&ctx) {
                    Ok(transport) => transports[kind.index()] = Some(transport),
                    Err(e) => {
                        error!("Failed to create {kind} transport: {e}");
                        return Err(e);
                    },
                }
            }
        }

        self.session = Some(Session {
            transports,
            _events: pump,
        });
        info!("Initialized, {} transport selected", self.selected);
        Ok(())
    }

    /// Stop the session and its threads.
    pub fn deinit(&mut self) -> Result<()> {
        match self
            .session
            .take()
        {
            Some(session) => {
                drop(session);
                info!("Deinitialized");
                Ok(())
            },
            None => Err(Error::State("not initialized".into())),
        }
    }

    /// Transport used by subsequent commands.
    pub fn transport(&self) -> TransportKind {
        self.selected
    }

    /// Switch to another registered transport.
    pub fn select_transport(&mut self, kind: TransportKind) -> Result<()> {
        let session = self.session()?;
        if session.transports[kind.index()].is_none() {
            return Err(Error::State(format!("{kind} transport is not available")));
        }
        info!("Transport changed {} -> {kind}", self.selected);
        self.selected = kind;
        Ok(())
    }

    /// Last reported peripheral status.
    pub fn system_status(&self) -> SystemStatus {
        self.system
            .status()
    }

    /// Receive every event decoded from now on.
    pub fn subscribe(&self) -> Receiver<Event> {
        self.subscribers
            .subscribe()
    }

    fn session(&self) -> Result<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| Error::State("not initialized".into()))
    }

    fn host(&mut self) -> Result<&mut dyn HostInterface> {
        let kind = self.selected;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::State("not initialized".into()))?;
        match session.transports[kind.index()].as_deref_mut() {
            Some(host) => Ok(host),
            None => Err(Error::State(format!("{kind} transport is not available"))),
        }
    }

    fn require_selected(&self, kind: TransportKind) -> Result<()> {
        self.session()?;
        if self.selected != kind {
            return Err(Error::State(format!(
                "only permitted while the {kind} transport is selected"
            )));
        }
        Ok(())
    }

    /// Change a runtime parameter of the selected transport.
    pub fn set_config(&mut self, request: ConfigRequest) -> Result<()> {
        self.host()?
            .configure(request)
    }

    /// Ask the peripheral to change system status and wait for confirmation.
    pub fn change_status(&mut self, request: StatusRequest) -> Result<SystemStatus> {
        let confirmation = if self.config.status_change_events {
            Confirmation::Event
        } else {
            Confirmation::Response
        };
        let timeout = self.config.status_timeout;
        let system = self.system.clone();
        system.request_change(self.host()?, request, confirmation, timeout)
    }

    /// Transfer the firmware file at `path`.
    pub fn transmit_firmware<F>(&mut self, path: &Path, progress: F) -> Result<TransferReport>
    where
        F: FnMut(usize, usize),
    {
        self.session()?;
        let image = fs::read(path)?;
        info!("Firmware {} is {} bytes", path.display(), image.len());
        self.transmit_firmware_bytes(&image, progress)
    }

    /// Transfer an in-memory firmware image.
    pub fn transmit_firmware_bytes<F>(&mut self, image: &[u8], progress: F) -> Result<TransferReport>
    where
        F: FnMut(usize, usize),
    {
        let packet_size = self.config.packet_size;
        firmware::send(self.host()?, image, packet_size, progress)
    }

    /// Start the transferred firmware.
    pub fn execute_firmware(&mut self) -> Result<()> {
        let cmd = catalog::execute_firmware()?;
        let response = self
            .host()?
            .transaction(&cmd)?;
        check_status_response(&response, Opcode::ExecuteFirmware)
    }

    /// Whether an out-of-range configure value may proceed.
    fn screen(&self, what: &str, unsupported: bool) -> Result<()> {
        if !unsupported {
            return Ok(());
        }
        match self.config.config_policy {
            ConfigPolicy::Permissive => {
                warn!("Unsupported {what}, behavior is undefined");
                Ok(())
            },
            ConfigPolicy::Strict => Err(Error::InvalidOperand(format!("unsupported {what}"))),
        }
    }

    /// Write a configure request at the old settings, switch the host side,
    /// then read the response at the new settings.
    fn reconfigure(
        &mut self,
        cmd: &[u8],
        opcode: Opcode,
        settle: Option<Duration>,
        host_request: Option<ConfigRequest>,
    ) -> Result<()> {
        let host = self.host()?;
        host.write(cmd)?;
        if let Some(delay) = settle {
            thread::sleep(delay);
        }

        match host_request {
            Some(request) => match host.configure(request) {
                Ok(()) => info!("Applied new configuration"),
                Err(e) => error!("Host side reconfigure failed: {e}"),
            },
            None => warn!("Invalid operand, not changing the internal setting"),
        }

        let response = host.read()?;
        check_status_response(&response, opcode)
    }

    /// Change the serial rate and flow control.
    pub fn configure_serial(&mut self, rate_index: u8, flow_control: u8) -> Result<()> {
        self.require_selected(TransportKind::Serial)?;
        info!("Configure serial: rate index {rate_index:#04x}, flow control {flow_control:#04x}");
        self.screen(
            "serial configuration",
            flow_control > 0 || serial_rate(rate_index).is_err(),
        )?;

        let cmd = catalog::configure_serial(rate_index, flow_control)?;
        let in_range = rate_index <= SERIAL_RATE_INDEX_MAX && flow_control <= FLOW_CONTROL_MAX;
        let settle = self.config.serial_settle;
        self.reconfigure(
            &cmd,
            Opcode::ConfigureSerial,
            Some(settle),
            in_range.then_some(ConfigRequest::LineParameters(rate_index)),
        )
    }

    /// Change the bus-addressed clock speed.
    pub fn configure_bus(&mut self, speed_index: u8) -> Result<()> {
        self.require_selected(TransportKind::Addressed)?;
        info!("Configure bus: speed index {speed_index:#04x}");
        self.screen("bus configuration", bus_speed(speed_index).is_err())?;

        let cmd = catalog::configure_bus(speed_index)?;
        let in_range = speed_index <= BUS_SPEED_INDEX_MAX;
        self.reconfigure(
            &cmd,
            Opcode::ConfigureBus,
            None,
            in_range.then_some(ConfigRequest::LineParameters(speed_index)),
        )
    }

    /// Change the clocked word size.
    pub fn configure_clocked(&mut self, word_size_index: u8) -> Result<()> {
        self.require_selected(TransportKind::Clocked)?;
        info!("Configure clocked: word size index {word_size_index:#04x}");
        self.screen("clocked configuration", word_size(word_size_index).is_err())?;

        let cmd = catalog::configure_clocked(word_size_index)?;
        let in_range = word_size_index <= WORD_SIZE_INDEX_MAX;
        self.reconfigure(
            &cmd,
            Opcode::ConfigureClocked,
            None,
            in_range.then_some(ConfigRequest::LineParameters(word_size_index)),
        )
    }

    /// Send an arbitrary request and return whatever answers it.
    pub fn raw_write(&mut self, opcode: u8, operand: &[u8]) -> Result<Frame> {
        let cmd = catalog::build_with(opcode, operand, self.config.catalog_policy)?;
        debug!("Raw write {cmd:02X?}");
        self.host()?
            .transaction(&cmd)
    }

    /// Send `length` bytes given as hex digits, unframed.
    pub fn diagnostic_send(&mut self, length: usize, hex: &str) -> Result<usize> {
        if length == 0 || hex.len() != length * 2 {
            return Err(Error::InvalidOperand(format!(
                "{} hex digits do not describe {length} bytes",
                hex.len()
            )));
        }
        let bytes = parse_hex(hex)?;
        self.host()?
            .diagnostic_write(&bytes)
    }

    /// Send a file's bytes unframed.
    pub fn diagnostic_file_send(&mut self, path: &Path) -> Result<usize> {
        self.session()?;
        let bytes = fs::read(path)?;
        info!("Sending {} raw bytes from {}", bytes.len(), path.display());
        self.host()?
            .diagnostic_write(&bytes)
    }

    /// Switch raw receive dumping on the selected transport.
    pub fn diagnostic_receive(&mut self, on: bool) -> Result<()> {
        self.set_config(ConfigRequest::DiagnosticReceive(on))
    }

    /// Change the firmware packet size.
    ///
    /// Sizes whose frames exceed the operand limit are accepted with a
    /// warning so oversized frames can be provoked on purpose.
    pub fn set_packet_size(&mut self, size: usize) -> Result<()> {
        if size == 0 {
            return Err(Error::InvalidOperand("packet size must be at least 1".into()));
        }
        info!("Packet size changed {} -> {size}", self.config.packet_size);
        if size + FIRMWARE_PACKET_PREFIX > MAX_OPERAND_LEN {
            warn!("Packet size {size} exceeds the maximum operand length");
        }
        self.config.packet_size = size;
        Ok(())
    }

    /// Current firmware packet size.
    pub fn packet_size(&self) -> usize {
        self.config.packet_size
    }

    /// Transfer a synthetic image with tampered packet fields.
    pub fn debug_transmit_firmware<F>(
        &mut self,
        virtual_len: usize,
        packet_size: usize,
        total_mode: fuzz::TotalCountMode,
        sequence_mode: fuzz::SequenceMode,
        progress: F,
    ) -> Result<TransferReport>
    where
        F: FnMut(usize, usize),
    {
        fuzz::debug_send(
            self.host()?,
            virtual_len,
            packet_size,
            total_mode,
            sequence_mode,
            progress,
        )
    }

    /// Stream the file at `path` to peripheral input `input`.
    pub fn binary_input(&mut self, input: u8, path: &Path) -> Result<TransferReport> {
        self.session()?;
        let data = fs::read(path)?;
        let packet_size = self.config.binary_input_packet_size;
        binary::send(self.host()?, input, &data, packet_size)
    }
}

/// Parse hex digits into bytes. An odd trailing digit is padded with `F`.
pub fn parse_hex(hex: &str) -> Result<Vec<u8>> {
    let digits: Vec<u8> = hex
        .chars()
        .map(|c| {
            c.to_digit(16)
                .map(|d| d as u8)
                .ok_or_else(|| Error::InvalidOperand(format!("'{c}' is not a hex digit")))
        })
        .collect::<Result<_>>()?;

    if digits.len() % 2 == 1 {
        debug!("Padding hex string with 'F'");
    }
    Ok(digits
        .chunks(2)
        .map(|pair| (pair[0] << 4) | pair.get(1).copied().unwrap_or(0x0F))
        .collect())
}
