//! Serial lines opened through the `serialport` crate.

use {
    crate::{
        error::Result,
        port::{FlowControl, Port, PortEnumerator, PortInfo, SerialConfig},
    },
    log::{debug, trace},
    serialport::{ClearBuffer, SerialPort, SerialPortInfo, SerialPortType},
    std::{
        io::{Read, Write},
        time::Duration,
    },
};

/// Serial line to a Gacrux peripheral (8N1).
pub struct NativePort {
    port: Box<dyn SerialPort>,
    name: String,
    baud_rate: u32,
}

impl NativePort {
    /// Open the line described by `config`.
    ///
    /// Bytes left over from an earlier session are discarded so the receive
    /// thread starts on a clean stream.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(
                config
                    .flow_control
                    .into(),
            )
            .open()?;
        port.clear(ClearBuffer::Input)?;

        debug!(
            "Opened {} at {} baud, flow control {:?}",
            config.port_name, config.baud_rate, config.flow_control
        );
        Ok(Self {
            port,
            name: config
                .port_name
                .clone(),
            baud_rate: config.baud_rate,
        })
    }
}

impl Port for NativePort {
    fn name(&self) -> &str {
        &self.name
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        trace!("{}: baud rate {} -> {baud_rate}", self.name, self.baud_rate);
        self.port
            .set_baud_rate(baud_rate)?;
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn receiver(&self, poll: Duration) -> Result<Self> {
        let mut port = self
            .port
            .try_clone()?;
        port.set_timeout(poll)?;
        Ok(Self {
            port,
            name: self
                .name
                .clone(),
            baud_rate: self.baud_rate,
        })
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port
            .read(buf)
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port
            .write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port
            .flush()
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                product: usb.product,
            },
            _ => Self {
                name: info.port_name,
                vid: None,
                pid: None,
                product: None,
            },
        }
    }
}

/// Lists ports through `serialport`.
pub struct NativePortEnumerator;

impl PortEnumerator for NativePortEnumerator {
    fn list_ports() -> Result<Vec<PortInfo>> {
        let mut ports: Vec<PortInfo> = serialport::available_ports()?
            .into_iter()
            .map(PortInfo::from)
            .collect();
        ports.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(ports)
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => Self::None,
            FlowControl::Hardware => Self::Hardware,
        }
    }
}
