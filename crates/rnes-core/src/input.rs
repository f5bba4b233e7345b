//! Controller ports
//!
//! Two ports, each holding nothing, a standard joypad or a Zapper light gun.
//! The CPU sees them through $4016 (strobe write, port 1 read) and $4017
//! (port 2 read).

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Input configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("invalid port {0}, expected 1 or 2")]
    InvalidPort(u8),
    #[error("invalid device: {0}")]
    InvalidDevice(String),
}

/// Controller port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    One,
    Two,
}

impl Port {
    fn index(self) -> usize {
        match self {
            Port::One => 0,
            Port::Two => 1,
        }
    }
}

impl TryFrom<u8> for Port {
    type Error = InputError;

    fn try_from(port: u8) -> Result<Self, Self::Error> {
        match port {
            1 => Ok(Port::One),
            2 => Ok(Port::Two),
            other => Err(InputError::InvalidPort(other)),
        }
    }
}

/// Device variants that can be plugged into a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Joypad,
    Zapper,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Joypad => write!(f, "joypad"),
            DeviceKind::Zapper => write!(f, "zapper"),
        }
    }
}

impl FromStr for DeviceKind {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "joypad" | "pad" | "standard" => Ok(DeviceKind::Joypad),
            "zapper" | "pointer" => Ok(DeviceKind::Zapper),
            other => Err(InputError::InvalidDevice(other.to_string())),
        }
    }
}

bitflags! {
    /// Joypad buttons in shift-out order
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Buttons: u8 {
        const A = 0x01;
        const B = 0x02;
        const SELECT = 0x04;
        const START = 0x08;
        const UP = 0x10;
        const DOWN = 0x20;
        const LEFT = 0x40;
        const RIGHT = 0x80;
    }
}

/// Standard controller: 8-bit parallel-in serial-out shift register
#[derive(Debug, Clone, Default)]
pub struct Joypad {
    buttons: Buttons,
    strobe: bool,
    shift: u8,
}

impl Joypad {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently held buttons
    pub fn buttons(&self) -> Buttons {
        self.buttons
    }

    pub fn set_buttons(&mut self, buttons: Buttons) {
        self.buttons = buttons;
        if self.strobe {
            self.shift = buttons.bits();
        }
    }

    pub fn set_button(&mut self, button: Buttons, pressed: bool) {
        let mut buttons = self.buttons;
        buttons.set(button, pressed);
        self.set_buttons(buttons);
    }

    fn write_strobe(&mut self, value: u8) {
        self.strobe = value & 0x01 != 0;
        if self.strobe {
            self.shift = self.buttons.bits();
        }
    }

    fn read(&mut self) -> u8 {
        if self.strobe {
            return self.buttons.bits() & 0x01;
        }
        let bit = self.shift & 0x01;
        // Shift in ones so reads past the eighth return 1
        self.shift = (self.shift >> 1) | 0x80;
        bit
    }
}

/// Zapper light gun
#[derive(Debug, Clone, Default)]
pub struct Zapper {
    position: Option<(u16, u16)>,
    trigger: bool,
}

impl Zapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Screen position the gun points at, `None` when aimed off-screen
    pub fn position(&self) -> Option<(u16, u16)> {
        self.position
    }

    pub fn set_position(&mut self, position: Option<(u16, u16)>) {
        self.position = position;
    }

    pub fn trigger(&self) -> bool {
        self.trigger
    }

    pub fn set_trigger(&mut self, pulled: bool) {
        self.trigger = pulled;
    }

    fn read(&self, light: impl Fn(u16, u16) -> bool) -> u8 {
        let lit = self.position.is_some_and(|(x, y)| light(x, y));
        let mut value = if lit { 0x00 } else { 0x08 };
        if self.trigger {
            value |= 0x10;
        }
        value
    }
}

/// A device plugged into a port
#[derive(Debug, Clone)]
pub enum Device {
    Joypad(Joypad),
    Zapper(Zapper),
}

impl Device {
    pub fn new(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Joypad => Device::Joypad(Joypad::new()),
            DeviceKind::Zapper => Device::Zapper(Zapper::new()),
        }
    }

    pub fn kind(&self) -> DeviceKind {
        match self {
            Device::Joypad(_) => DeviceKind::Joypad,
            Device::Zapper(_) => DeviceKind::Zapper,
        }
    }
}

/// State change delivered to a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceInput {
    /// Replace the whole joypad button mask
    Buttons(Buttons),
    /// Press or release joypad buttons
    Button { button: Buttons, pressed: bool },
    /// Aim the Zapper; `None` points it away from the screen
    Pointer(Option<(u16, u16)>),
    /// Pull or release the Zapper trigger
    Trigger(bool),
}

/// Both controller ports
#[derive(Debug, Clone, Default)]
pub struct InputPorts {
    ports: [Option<Device>; 2],
}

impl InputPorts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plug a new device into `port`, or unplug with `None`
    pub fn set_device(&mut self, port: u8, kind: Option<DeviceKind>) -> Result<(), InputError> {
        self.plug(Port::try_from(port)?, kind);
        Ok(())
    }

    /// Replace the device on a known-valid port
    pub fn plug(&mut self, port: Port, kind: Option<DeviceKind>) {
        debug!(?port, ?kind, "set device");
        self.ports[port.index()] = kind.map(Device::new);
    }

    /// Kind of device on `port`
    pub fn device(&self, port: u8) -> Result<Option<DeviceKind>, InputError> {
        let port = Port::try_from(port)?;
        Ok(self.ports[port.index()].as_ref().map(Device::kind))
    }

    /// The device instance on `port`
    pub fn input_device(&self, port: u8) -> Result<Option<&Device>, InputError> {
        let port = Port::try_from(port)?;
        Ok(self.ports[port.index()].as_ref())
    }

    /// Apply an input change to the device on `port`
    pub fn update(&mut self, port: u8, input: DeviceInput) -> Result<(), InputError> {
        let port = Port::try_from(port)?;
        match (&mut self.ports[port.index()], input) {
            (Some(Device::Joypad(pad)), DeviceInput::Buttons(buttons)) => pad.set_buttons(buttons),
            (Some(Device::Joypad(pad)), DeviceInput::Button { button, pressed }) => {
                pad.set_button(button, pressed)
            }
            (Some(Device::Zapper(zapper)), DeviceInput::Pointer(position)) => zapper.set_position(position),
            (Some(Device::Zapper(zapper)), DeviceInput::Trigger(pulled)) => zapper.set_trigger(pulled),
            (Some(device), input) => {
                return Err(InputError::InvalidDevice(format!(
                    "{} does not accept {input:?}",
                    device.kind()
                )))
            }
            (None, _) => {
                return Err(InputError::InvalidDevice(format!("no device on {port:?}")));
            }
        }
        Ok(())
    }

    /// CPU write to $4016
    pub fn write_strobe(&mut self, value: u8) {
        for device in self.ports.iter_mut().flatten() {
            if let Device::Joypad(pad) = device {
                pad.write_strobe(value);
            }
        }
    }

    /// CPU read of $4016 (`Port::One`) or $4017 (`Port::Two`), data bits only
    pub fn read(&mut self, port: Port, light: impl Fn(u16, u16) -> bool) -> u8 {
        match &mut self.ports[port.index()] {
            Some(Device::Joypad(pad)) => pad.read(),
            Some(Device::Zapper(zapper)) => zapper.read(light),
            None => 0,
        }
    }

    /// Zapper aim on either port, used to sample the light sensor
    pub fn pointer(&self, port: Port) -> Option<(u16, u16)> {
        match &self.ports[port.index()] {
            Some(Device::Zapper(zapper)) => zapper.position(),
            _ => None,
        }
    }
}
