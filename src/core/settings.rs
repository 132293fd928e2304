//! Line settings applied to a serial handle at every (re)open

use super::error::{SerialError, SerialResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Parity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
    /// Parity bit always set
    Mark,
    /// Parity bit always cleared
    Space,
}

impl Parity {
    fn letter(self) -> char {
        match self {
            Self::None => 'N',
            Self::Odd => 'O',
            Self::Even => 'E',
            Self::Mark => 'M',
            Self::Space => 'S',
        }
    }
}

impl FromStr for Parity {
    type Err = SerialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            "mark" | "m" => Ok(Self::Mark),
            "space" | "s" => Ok(Self::Space),
            other => Err(SerialError::InvalidSettings(format!("unknown parity '{other}'"))),
        }
    }
}

/// Serial port stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopBits {
    /// One stop bit
    #[default]
    One,
    /// One and a half stop bits
    OnePointFive,
    /// Two stop bits
    Two,
}

impl FromStr for StopBits {
    type Err = SerialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" => Ok(Self::One),
            "1.5" => Ok(Self::OnePointFive),
            "2" => Ok(Self::Two),
            other => Err(SerialError::InvalidSettings(format!("unknown stop bits '{other}'"))),
        }
    }
}

impl fmt::Display for StopBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::One => write!(f, "1"),
            Self::OnePointFive => write!(f, "1.5"),
            Self::Two => write!(f, "2"),
        }
    }
}

/// How the RTS/DTR lines and in-band XON/XOFF bytes are managed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlowControlMode {
    /// No flow control
    #[default]
    None,
    /// Hardware handshake (RTS/CTS), driver owns RTS
    RequestToSend,
    /// Software handshake (XON/XOFF)
    XOnXOff,
    /// Hardware and software handshake together
    RequestToSendXOnXOff,
    /// RTS and DTR driven by the user
    Manual,
    /// Half-duplex transceiver, RTS raised only while transmitting
    Rs485,
}

impl FlowControlMode {
    /// Pin levels to configure before the handle is opened.
    ///
    /// This is the only place the flow-control table lives; both the initial
    /// open and a settings change on a live handle go through it.
    pub fn initial_pins(self, manual_rts: bool, manual_dtr: bool) -> PinLevels {
        match self {
            Self::None | Self::XOnXOff | Self::Rs485 => PinLevels {
                rts: Some(false),
                dtr: false,
            },
            Self::RequestToSend | Self::RequestToSendXOnXOff => PinLevels {
                rts: None,
                dtr: false,
            },
            Self::Manual => PinLevels {
                rts: Some(manual_rts),
                dtr: manual_dtr,
            },
        }
    }

    /// Whether the driver handles RTS/CTS itself
    pub fn uses_hardware_handshake(self) -> bool {
        matches!(self, Self::RequestToSend | Self::RequestToSendXOnXOff)
    }

    /// Whether XON/XOFF bytes are interpreted by the driver
    pub fn uses_software_handshake(self) -> bool {
        matches!(self, Self::XOnXOff | Self::RequestToSendXOnXOff)
    }

    fn short_name(self) -> &'static str {
        match self {
            Self::None => "No FC",
            Self::RequestToSend => "RTS/CTS",
            Self::XOnXOff => "XON/XOFF",
            Self::RequestToSendXOnXOff => "RTS/CTS+XON/XOFF",
            Self::Manual => "Manual",
            Self::Rs485 => "RS485",
        }
    }
}

impl FromStr for FlowControlMode {
    type Err = SerialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "rts" | "hw" | "request-to-send" => Ok(Self::RequestToSend),
            "xonxoff" | "sw" | "xon-xoff" => Ok(Self::XOnXOff),
            "rts-xonxoff" | "request-to-send-xon-xoff" => Ok(Self::RequestToSendXOnXOff),
            "manual" => Ok(Self::Manual),
            "rs485" | "rs-485" => Ok(Self::Rs485),
            other => Err(SerialError::InvalidSettings(format!(
                "unknown flow control '{other}'"
            ))),
        }
    }
}

/// RTS/DTR levels to drive at open.
///
/// `rts == None` leaves RTS to the driver's hardware handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinLevels {
    /// Request To Send
    pub rts: Option<bool>,
    /// Data Terminal Ready
    pub dtr: bool,
}

/// Complete configuration of one serial line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineSettings {
    /// Port name (e.g., COM3, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Parity
    pub parity: Parity,
    /// Stop bits
    pub stop_bits: StopBits,
    /// Flow control
    pub flow_control: FlowControlMode,
    /// RTS level in manual flow control
    pub manual_rts: bool,
    /// DTR level in manual flow control
    pub manual_dtr: bool,
    /// Byte substituted for characters received with a parity error
    pub parity_replacement: Option<u8>,
    /// Reopen the port automatically after the device disappears
    pub auto_reopen: bool,
    /// Delay between reopen attempts
    pub auto_reopen_interval_ms: u64,
}

impl LineSettings {
    /// Create settings for `port` at `baud_rate`, 8N1, no flow control
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControlMode::None,
            manual_rts: false,
            manual_dtr: false,
            parity_replacement: None,
            auto_reopen: false,
            auto_reopen_interval_ms: 1000,
        }
    }

    /// Set data bits
    #[must_use]
    pub fn data_bits(mut self, bits: u8) -> Self {
        self.data_bits = bits;
        self
    }

    /// Set parity
    #[must_use]
    pub fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Set stop bits
    #[must_use]
    pub fn stop_bits(mut self, bits: StopBits) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Set flow control
    #[must_use]
    pub fn flow_control(mut self, mode: FlowControlMode) -> Self {
        self.flow_control = mode;
        self
    }

    /// Set the manual RTS/DTR levels
    #[must_use]
    pub fn manual_pins(mut self, rts: bool, dtr: bool) -> Self {
        self.manual_rts = rts;
        self.manual_dtr = dtr;
        self
    }

    /// Set the parity error replacement byte
    #[must_use]
    pub fn parity_replacement(mut self, byte: Option<u8>) -> Self {
        self.parity_replacement = byte;
        self
    }

    /// Enable auto-reopen with the given retry interval
    #[must_use]
    pub fn auto_reopen(mut self, interval: Duration) -> Self {
        self.auto_reopen = true;
        self.auto_reopen_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Disable auto-reopen
    #[must_use]
    pub fn no_auto_reopen(mut self) -> Self {
        self.auto_reopen = false;
        self
    }

    /// Interval between reopen attempts
    pub fn reopen_interval(&self) -> Duration {
        Duration::from_millis(self.auto_reopen_interval_ms)
    }

    /// Pin levels for the configured flow control mode
    pub fn initial_pins(&self) -> PinLevels {
        self.flow_control
            .initial_pins(self.manual_rts, self.manual_dtr)
    }

    /// Check the invariants a handle relies on
    pub fn validate(&self) -> SerialResult<()> {
        if self.port.trim().is_empty() {
            return Err(SerialError::InvalidSettings("port name is empty".into()));
        }
        if self.baud_rate == 0 {
            return Err(SerialError::InvalidSettings("baud rate must be > 0".into()));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(SerialError::InvalidSettings(format!(
                "data bits must be 5..=8, got {}",
                self.data_bits
            )));
        }
        if self.auto_reopen && self.auto_reopen_interval_ms == 0 {
            return Err(SerialError::InvalidSettings(
                "auto-reopen interval must be > 0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for LineSettings {
    fn default() -> Self {
        Self::new("COM1", 9600)
    }
}

impl fmt::Display for LineSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {} baud ({}{}{} {})",
            self.port,
            self.baud_rate,
            self.data_bits,
            self.parity.letter(),
            self.stop_bits,
            self.flow_control.short_name()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_control_table() {
        use FlowControlMode::*;

        for mode in [None, XOnXOff] {
            assert_eq!(mode.initial_pins(true, true), PinLevels { rts: Some(false), dtr: false });
        }
        for mode in [RequestToSend, RequestToSendXOnXOff] {
            assert_eq!(mode.initial_pins(true, true), PinLevels { rts: Option::None, dtr: false });
        }
        assert_eq!(Manual.initial_pins(true, false), PinLevels { rts: Some(true), dtr: false });
        assert_eq!(Manual.initial_pins(false, true), PinLevels { rts: Some(false), dtr: true });
        assert_eq!(Rs485.initial_pins(true, true), PinLevels { rts: Some(false), dtr: false });
    }

    #[test]
    fn test_validate() {
        assert!(LineSettings::new("COM3", 9600).validate().is_ok());
        assert!(LineSettings::new("COM3", 0).validate().is_err());
        assert!(LineSettings::new("", 9600).validate().is_err());
        assert!(LineSettings::new("COM3", 9600).data_bits(9).validate().is_err());

        let mut settings = LineSettings::new("COM3", 9600).auto_reopen(Duration::from_millis(250));
        assert!(settings.validate().is_ok());
        settings.auto_reopen_interval_ms = 0;
        assert!(settings.validate().is_err());
        settings.auto_reopen = false;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("E".parse::<Parity>().unwrap(), Parity::Even);
        assert_eq!("rs485".parse::<FlowControlMode>().unwrap(), FlowControlMode::Rs485);
        assert_eq!("hw".parse::<FlowControlMode>().unwrap(), FlowControlMode::RequestToSend);
        assert_eq!("1.5".parse::<StopBits>().unwrap(), StopBits::OnePointFive);
        assert!("bogus".parse::<FlowControlMode>().is_err());
    }

    #[test]
    fn test_display() {
        let settings = LineSettings::new("/dev/ttyUSB0", 115_200)
            .parity(Parity::Even)
            .flow_control(FlowControlMode::Rs485);
        assert_eq!(settings.to_string(), "/dev/ttyUSB0 @ 115200 baud (8E1 RS485)");
    }

    #[test]
    fn test_toml_defaults() {
        let settings: LineSettings = toml::from_str("port = \"COM7\"\nbaud_rate = 19200").unwrap();
        assert_eq!(settings.port, "COM7");
        assert_eq!(settings.baud_rate, 19200);
        assert_eq!(settings.data_bits, 8);
        assert!(!settings.auto_reopen);
    }
}
