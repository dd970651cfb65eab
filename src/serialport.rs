use crate::protocol::READ_COMMAND;
use crate::{Error, Result};
use std::fmt;
use std::io::{self, Read, Write};
use std::time::Duration;

pub const DEFAULT_BAUD_RATE: u32 = 115200;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
// The ESP32 bridge resets when the port opens and needs time before it answers.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Separator between device path and description in a port label.
pub const LABEL_SEPARATOR: &str = " - ";

const MAX_LINE_LENGTH: usize = 4096;

/// Parameters of the serial channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SerialSettings {
    pub baud_rate: u32,
    /// Bound on a single line read.
    pub timeout: Duration,
    /// Pause after opening the port before the first request.
    pub settle_delay: Duration,
    /// Token written (followed by a newline) to request a reading.
    pub command: String,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            command: READ_COMMAND.to_string(),
        }
    }
}

/// Reduces a display label such as `"COM3 - USB Serial"` to the device identifier.
pub fn strip_port_label(label: &str) -> &str {
    label
        .split(LABEL_SEPARATOR)
        .next()
        .unwrap_or(label)
        .trim()
}

/// Owns at most one open serial channel to the BMS.
pub struct Transport {
    settings: SerialSettings,
    serial: Option<Box<dyn serialport::SerialPort>>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("settings", &self.settings)
            .field("port", &self.port_name())
            .finish()
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(SerialSettings::default())
    }
}

impl Transport {
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            serial: None,
        }
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    /// Opens the port named by `label`, closing any previously open one first.
    ///
    /// Returns the device identifier that was actually opened.
    pub fn connect(&mut self, label: &str) -> Result<String> {
        self.disconnect();

        let port = strip_port_label(label).to_string();
        log::debug!(
            "Opening serial port '{}' at {} baud",
            port,
            self.settings.baud_rate
        );
        let serial = serialport::new(&port, self.settings.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(self.settings.timeout)
            .open()
            .map_err(|e| Error::Connection {
                port: port.clone(),
                source: e.into(),
            })?;
        self.serial = Some(serial);

        std::thread::sleep(self.settings.settle_delay);
        log::info!("Connected to '{}'", port);
        Ok(port)
    }

    /// Closes the channel. Does nothing if none is open.
    pub fn disconnect(&mut self) {
        if let Some(serial) = self.serial.take() {
            log::info!(
                "Disconnected from '{}'",
                serial.name().unwrap_or_else(|| "<unnamed>".to_string())
            );
        }
    }

    pub fn is_connected(&self) -> bool {
        self.serial.is_some()
    }

    pub fn port_name(&self) -> Option<String> {
        self.serial.as_ref().and_then(|serial| serial.name())
    }

    /// Sends the read command and returns the trimmed response line.
    ///
    /// Input still pending from earlier traffic is discarded before the command is sent.
    pub fn request_raw(&mut self) -> Result<String> {
        let serial = self.serial.as_mut().ok_or(Error::NotConnected)?;
        exchange(serial.as_mut(), &self.settings.command)
    }
}

/// Number of received bytes waiting to be read.
pub(crate) trait PendingInput {
    fn pending_bytes(&self) -> io::Result<u32>;
}

impl PendingInput for dyn serialport::SerialPort {
    fn pending_bytes(&self) -> io::Result<u32> {
        self.bytes_to_read().map_err(io::Error::from)
    }
}

/// Reads and drops everything already received, such as a late reply or a boot banner.
pub(crate) fn discard_pending<P: Read + PendingInput + ?Sized>(port: &mut P) -> Result<()> {
    let mut buf = [0u8; 64];
    loop {
        let pending = port.pending_bytes()?;
        if pending == 0 {
            break;
        }
        log::trace!("Got {} pending bytes", pending);
        let received = port.read(&mut buf)?;
        log::trace!("Discarded {} pending bytes", received);
        if received == 0 {
            break;
        }
    }
    Ok(())
}

/// One request/response exchange on a clean input buffer.
pub(crate) fn exchange<P>(port: &mut P, command: &str) -> Result<String>
where
    P: Read + Write + PendingInput + ?Sized,
{
    discard_pending(port)?;
    request_line(port, command)
}

/// Writes `command` plus a newline and reads back one line.
///
/// A read timeout ends the line; whatever arrived before it is returned.
pub(crate) fn request_line<P>(port: &mut P, command: &str) -> Result<String>
where
    P: Read + Write + ?Sized,
{
    let mut tx_buffer = Vec::with_capacity(command.len() + 1);
    tx_buffer.extend_from_slice(command.as_bytes());
    tx_buffer.push(b'\n');
    log::trace!("send_bytes: {:02X?}", tx_buffer);
    port.write_all(&tx_buffer)?;
    port.flush()?;

    let mut rx_buffer = Vec::new();
    let mut byte = [0u8; 1];
    while rx_buffer.len() < MAX_LINE_LENGTH {
        match port.read(&mut byte) {
            Ok(0) => break,
            Ok(_) if byte[0] == b'\n' => break,
            Ok(_) => rx_buffer.push(byte[0]),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                log::debug!("Read timeout after {} bytes", rx_buffer.len());
                break;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    log::trace!("receive_bytes: {:02X?}", rx_buffer);

    let line = String::from_utf8_lossy(&rx_buffer).trim().to_string();
    if line.is_empty() {
        return Err(Error::EmptyResponse);
    }
    Ok(line)
}

/// One enumerated serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub hardware_id: Option<String>,
}

impl PortDescriptor {
    fn has_description(&self) -> bool {
        matches!(self.description.as_deref(), Some(d) if !d.is_empty() && d != "n/a")
    }
}

impl From<serialport::SerialPortInfo> for PortDescriptor {
    fn from(info: serialport::SerialPortInfo) -> Self {
        let (description, hardware_id) = match info.port_type {
            serialport::SerialPortType::UsbPort(usb) => (
                usb.product.or(usb.manufacturer),
                Some(format!(
                    "USB VID:PID={:04X}:{:04X}{}",
                    usb.vid,
                    usb.pid,
                    usb.serial_number
                        .map(|sn| format!(" SER={sn}"))
                        .unwrap_or_default()
                )),
            ),
            serialport::SerialPortType::PciPort => (Some("PCI".to_string()), None),
            serialport::SerialPortType::BluetoothPort => (Some("Bluetooth".to_string()), None),
            serialport::SerialPortType::Unknown => (None, None),
        };
        Self {
            name: info.port_name,
            description,
            hardware_id,
        }
    }
}

/// `"<name> - <description>"`, or the bare name without a useful description.
impl fmt::Display for PortDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.description {
            Some(description) if self.has_description() => {
                write!(f, "{}{}{}", self.name, LABEL_SEPARATOR, description)
            }
            _ => write!(f, "{}", self.name),
        }
    }
}

/// Default port filter: keeps ports that look like USB-serial adapters.
pub fn is_usb_candidate(port: &PortDescriptor) -> bool {
    port.name.starts_with("/dev/ttyUSB")
        || port.name.starts_with("/dev/ttyACM")
        || port
            .description
            .as_deref()
            .is_some_and(|d| d.contains("USB"))
        || port
            .hardware_id
            .as_deref()
            .is_some_and(|h| h.contains("USB"))
}

/// Enumerates system ports that pass `filter`, in system enumeration order.
pub fn list_ports_with<F>(filter: F) -> Result<Vec<PortDescriptor>>
where
    F: Fn(&PortDescriptor) -> bool,
{
    let ports = serialport::available_ports().map_err(io::Error::from)?;
    log::debug!("Found {} serial ports", ports.len());
    Ok(ports
        .into_iter()
        .map(PortDescriptor::from)
        .filter(|port| filter(port))
        .collect())
}

/// Enumerates ports plausibly backed by a USB-serial adapter.
pub fn list_candidate_ports() -> Result<Vec<PortDescriptor>> {
    list_ports_with(is_usb_candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Loopback stand-in for a serial port.
    ///
    /// `stale` is already received when the command is sent, `rx` is the reply to it.
    struct MockPort {
        stale: Cursor<Vec<u8>>,
        rx: Cursor<Vec<u8>>,
        tx: Vec<u8>,
        timeout_at_end: bool,
    }

    impl MockPort {
        fn new(response: &[u8], timeout_at_end: bool) -> Self {
            Self::with_stale(b"", response, timeout_at_end)
        }

        fn with_stale(stale: &[u8], response: &[u8], timeout_at_end: bool) -> Self {
            Self {
                stale: Cursor::new(stale.to_vec()),
                rx: Cursor::new(response.to_vec()),
                tx: Vec::new(),
                timeout_at_end,
            }
        }

        fn stale_left(&self) -> usize {
            self.stale.get_ref().len() - self.stale.position() as usize
        }
    }

    impl PendingInput for MockPort {
        fn pending_bytes(&self) -> io::Result<u32> {
            Ok(self.stale_left() as u32)
        }
    }

    impl Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.stale_left() > 0 {
                return self.stale.read(buf);
            }
            let n = self.rx.read(buf)?;
            if n == 0 && self.timeout_at_end {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "Operation timed out"));
            }
            Ok(n)
        }
    }

    impl Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.tx.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn descriptor(
        name: &str,
        description: Option<&str>,
        hardware_id: Option<&str>,
    ) -> PortDescriptor {
        PortDescriptor {
            name: name.to_string(),
            description: description.map(str::to_string),
            hardware_id: hardware_id.map(str::to_string),
        }
    }

    #[test]
    fn request_line_sends_command_and_reads_one_line() {
        let mut port = MockPort::new(b"{\"CycleCount\":3}\r\n{\"CycleCount\":4}\n", true);
        let line = request_line(&mut port, "READ_ALL").unwrap();
        assert_eq!(line, "{\"CycleCount\":3}");
        assert_eq!(port.tx, b"READ_ALL\n");
    }

    #[test]
    fn exchange_discards_stale_input() {
        let banner = b"ESP32 SMBus Battery Reader Started\n";
        let mut port = MockPort::with_stale(banner, b"{\"CycleCount\":3}\n", true);
        assert_eq!(exchange(&mut port, "READ_ALL").unwrap(), "{\"CycleCount\":3}");
        assert_eq!(port.tx, b"READ_ALL\n");

        // tail of a reply that arrived after the previous read timed out
        let mut port = MockPort::with_stale(b"3810]}\r\n", b"{\"CycleCount\":4}\n", true);
        assert_eq!(exchange(&mut port, "READ_ALL").unwrap(), "{\"CycleCount\":4}");
    }

    #[test]
    fn exchange_without_stale_input() {
        let mut port = MockPort::new(b"{\"CycleCount\":5}\n", true);
        assert_eq!(exchange(&mut port, "READ_ALL").unwrap(), "{\"CycleCount\":5}");
    }

    #[test]
    fn request_line_timeout_returns_partial_line() {
        let mut port = MockPort::new(b"{\"CycleCount\":3}", true);
        assert_eq!(request_line(&mut port, "READ_ALL").unwrap(), "{\"CycleCount\":3}");
    }

    #[test]
    fn request_line_silence_is_empty_response() {
        let mut port = MockPort::new(b"", true);
        assert!(matches!(
            request_line(&mut port, "READ_ALL"),
            Err(Error::EmptyResponse)
        ));
        let mut port = MockPort::new(b"\r\n", false);
        assert!(matches!(
            request_line(&mut port, "READ_ALL"),
            Err(Error::EmptyResponse)
        ));
    }

    #[test]
    fn request_without_connection() {
        let mut transport = Transport::default();
        assert!(!transport.is_connected());
        assert!(matches!(transport.request_raw(), Err(Error::NotConnected)));
    }

    #[test]
    fn disconnect_when_closed_is_noop() {
        let mut transport = Transport::default();
        transport.disconnect();
        transport.disconnect();
        assert!(!transport.is_connected());
    }

    #[test]
    fn connect_to_missing_port_fails() {
        let mut transport = Transport::new(SerialSettings {
            settle_delay: Duration::ZERO,
            ..Default::default()
        });
        match transport.connect("/dev/amplyze-does-not-exist - Nothing") {
            Err(Error::Connection { port, .. }) => assert_eq!(port, "/dev/amplyze-does-not-exist"),
            other => panic!("unexpected result {other:?}"),
        }
        assert!(!transport.is_connected());
    }

    #[test]
    fn strip_label() {
        assert_eq!(strip_port_label("COM3 - USB Serial Device"), "COM3");
        assert_eq!(strip_port_label("/dev/ttyUSB0"), "/dev/ttyUSB0");
        assert_eq!(strip_port_label(" COM4  - A - B"), "COM4");
    }

    #[test]
    fn descriptor_display() {
        assert_eq!(
            descriptor("COM3", Some("CP2102 USB to UART"), None).to_string(),
            "COM3 - CP2102 USB to UART"
        );
        assert_eq!(descriptor("COM3", Some("n/a"), None).to_string(), "COM3");
        assert_eq!(descriptor("COM3", Some(""), None).to_string(), "COM3");
        assert_eq!(descriptor("/dev/ttyS0", None, None).to_string(), "/dev/ttyS0");
    }

    #[test]
    fn usb_predicate() {
        assert!(is_usb_candidate(&descriptor("/dev/ttyUSB0", None, None)));
        assert!(is_usb_candidate(&descriptor("/dev/ttyACM1", None, None)));
        assert!(is_usb_candidate(&descriptor("COM7", Some("USB-SERIAL CH340"), None)));
        assert!(is_usb_candidate(&descriptor(
            "COM8",
            None,
            Some("USB VID:PID=10C4:EA60")
        )));
        assert!(!is_usb_candidate(&descriptor("/dev/ttyS0", Some("n/a"), None)));
        assert!(!is_usb_candidate(&descriptor("COM1", Some("PCI"), None)));
    }

    #[test]
    fn usb_port_info_maps_to_descriptor() {
        let info = serialport::SerialPortInfo {
            port_name: "/dev/ttyUSB0".to_string(),
            port_type: serialport::SerialPortType::UsbPort(serialport::UsbPortInfo {
                vid: 0x10c4,
                pid: 0xea60,
                serial_number: Some("0001".to_string()),
                manufacturer: Some("Silicon Labs".to_string()),
                product: Some("CP2102 USB to UART Bridge Controller".to_string()),
            }),
        };
        let port = PortDescriptor::from(info);
        assert_eq!(
            port.to_string(),
            "/dev/ttyUSB0 - CP2102 USB to UART Bridge Controller"
        );
        assert_eq!(port.hardware_id.as_deref(), Some("USB VID:PID=10C4:EA60 SER=0001"));
    }
}
