//! `i2c` namespace: two-wire serial bus access.
//!
//! Convention: [`ErrorConvention::Sentinel`]. A failed transaction returns
//! `nil` plus the driver's status code. Using a port that was never
//! configured, an address above `0x7f` or a read length outside `1..=256`
//! raises. Payload bytes given as a table are masked to 8 bits.

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use mlua::{FromLua, Lua, Value};
use tracing::info;

use crate::bridge::{ErrorConvention, Namespace, NativeError};

/// Driver status for a transaction nobody acknowledged.
pub const NACK: i32 = -1;
/// Driver status for a transaction that did not finish in time.
pub const TIMEOUT: i32 = 0x107;

pub const DEFAULT_FREQ_HZ: u32 = 100_000;
pub const MAX_READ: i64 = 256;

const SCAN_RANGE: std::ops::Range<u8> = 0x08..0x78;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusSettings {
    pub sda: u32,
    pub scl: u32,
    pub freq_hz: u32,
}

/// Two-wire bus controller with one or more ports.
pub trait I2cBus {
    fn configure(&mut self, port: u8, settings: BusSettings) -> Result<(), NativeError>;
    fn release(&mut self, port: u8);
    fn write(&mut self, port: u8, addr: u8, data: &[u8]) -> Result<(), NativeError>;
    fn read(&mut self, port: u8, addr: u8, len: usize) -> Result<Vec<u8>, NativeError>;
    /// Write then read with a repeated start in between.
    fn write_read(&mut self, port: u8, addr: u8, data: &[u8], len: usize) -> Result<Vec<u8>, NativeError>;
    /// Whether a device acknowledges `addr`.
    fn probe(&mut self, port: u8, addr: u8) -> bool;
}

/// A device exposing 256 byte-wide registers behind an auto-incrementing
/// register pointer: the first byte of a write selects the register, the
/// rest are stored from there on.
#[derive(Debug, Clone)]
pub struct RegisterDevice {
    registers: [u8; 256],
    pointer: u8,
}

impl Default for RegisterDevice {
    fn default() -> Self {
        Self {
            registers: [0; 256],
            pointer: 0,
        }
    }
}

impl RegisterDevice {
    pub fn register(&self, reg: u8) -> u8 {
        self.registers[usize::from(reg)]
    }

    pub fn set_register(&mut self, reg: u8, value: u8) {
        self.registers[usize::from(reg)] = value;
    }

    fn write(&mut self, data: &[u8]) {
        let Some((&reg, values)) = data.split_first() else {
            return;
        };
        self.pointer = reg;
        for value in values {
            self.registers[usize::from(self.pointer)] = *value;
            self.pointer = self.pointer.wrapping_add(1);
        }
    }

    fn read(&mut self, len: usize) -> Vec<u8> {
        (0..len)
            .map(|_| {
                let value = self.registers[usize::from(self.pointer)];
                self.pointer = self.pointer.wrapping_add(1);
                value
            })
            .collect()
    }
}

/// In-memory bus with register devices attached at fixed addresses.
#[derive(Debug, Default)]
pub struct SimulatedBus {
    configured: HashMap<u8, BusSettings>,
    devices: HashMap<(u8, u8), RegisterDevice>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, port: u8, addr: u8) -> &mut RegisterDevice {
        self.devices.entry((port, addr)).or_default()
    }

    pub fn device(&self, port: u8, addr: u8) -> Option<&RegisterDevice> {
        self.devices.get(&(port, addr))
    }

    pub fn settings(&self, port: u8) -> Option<BusSettings> {
        self.configured.get(&port).copied()
    }

    fn target(&mut self, port: u8, addr: u8) -> Result<&mut RegisterDevice, NativeError> {
        if !self.configured.contains_key(&port) {
            return Err(NativeError::Transport {
                code: TIMEOUT,
                message: format!("bus {port} is not running"),
            });
        }
        self.devices
            .get_mut(&(port, addr))
            .ok_or_else(|| NativeError::Transport {
                code: NACK,
                message: format!("no acknowledge from 0x{addr:02x}"),
            })
    }
}

impl I2cBus for SimulatedBus {
    fn configure(&mut self, port: u8, settings: BusSettings) -> Result<(), NativeError> {
        if settings.freq_hz == 0 {
            return Err(NativeError::invalid("bus frequency must be positive"));
        }
        self.configured.insert(port, settings);
        Ok(())
    }

    fn release(&mut self, port: u8) {
        self.configured.remove(&port);
    }

    fn write(&mut self, port: u8, addr: u8, data: &[u8]) -> Result<(), NativeError> {
        self.target(port, addr)?.write(data);
        Ok(())
    }

    fn read(&mut self, port: u8, addr: u8, len: usize) -> Result<Vec<u8>, NativeError> {
        Ok(self.target(port, addr)?.read(len))
    }

    fn write_read(&mut self, port: u8, addr: u8, data: &[u8], len: usize) -> Result<Vec<u8>, NativeError> {
        let device = self.target(port, addr)?;
        device.write(data);
        Ok(device.read(len))
    }

    fn probe(&mut self, port: u8, addr: u8) -> bool {
        self.target(port, addr).is_ok()
    }
}

/// Bytes to put on the bus: a table of integers or a raw string.
#[derive(Debug, Clone)]
pub struct Payload(pub Vec<u8>);

impl FromLua for Payload {
    fn from_lua(value: Value, _: &Lua) -> mlua::Result<Self> {
        match value {
            Value::Table(table) => table
                .sequence_values::<i64>()
                .map(|byte| byte.map(|byte| byte as u8))
                .collect::<mlua::Result<Vec<u8>>>()
                .map(Payload),
            Value::String(text) => Ok(Payload(text.as_bytes().to_vec())),
            _ => Err(mlua::Error::runtime("Expected table or string for data")),
        }
    }
}

/// Which ports this namespace has configured. The only state the bridge keeps.
struct PortFlags {
    configured: Vec<bool>,
}

impl PortFlags {
    fn index(&self, port: i64) -> Result<u8, NativeError> {
        if port < 0 || port as usize >= self.configured.len() {
            return Err(NativeError::invalid(format!("Invalid I2C port: {port}")));
        }
        Ok(port as u8)
    }

    fn ready(&self, port: i64) -> Result<u8, NativeError> {
        match self.index(port) {
            Ok(idx) if self.configured[usize::from(idx)] => Ok(idx),
            _ => Err(NativeError::NotConfigured(format!(
                "I2C port {port} not initialized"
            ))),
        }
    }
}

fn address(addr: i64) -> Result<u8, NativeError> {
    u8::try_from(addr)
        .ok()
        .filter(|addr| *addr <= 0x7f)
        .ok_or_else(|| NativeError::invalid(format!("Invalid I2C address: {addr}")))
}

fn read_len(len: i64) -> Result<usize, NativeError> {
    if len <= 0 || len > MAX_READ {
        return Err(NativeError::invalid(format!("Invalid read length: {len}")));
    }
    Ok(len as usize)
}

fn byte_table(lua: &Lua, bytes: Vec<u8>) -> Result<mlua::Table, NativeError> {
    lua.create_sequence_from(bytes.into_iter().map(i64::from))
        .map_err(|err| NativeError::failed(err.to_string()))
}

pub fn namespace(bus: Rc<RefCell<dyn I2cBus>>, ports: u8) -> Namespace {
    let flags = Rc::new(RefCell::new(PortFlags {
        configured: vec![false; usize::from(ports)],
    }));

    let mut ns = Namespace::new("i2c", ErrorConvention::Sentinel);
    for port in 0..ports.min(2) {
        ns = ns.constant(if port == 0 { "PORT0" } else { "PORT1" }, i64::from(port));
    }

    ns.function("init", {
        let (bus, flags) = (bus.clone(), flags.clone());
        move |_, (port, sda, scl, freq): (i64, u32, u32, Option<u32>)| {
            let port = flags.borrow().index(port)?;
            let mut bus = bus.borrow_mut();
            let mut flags = flags.borrow_mut();
            if flags.configured[usize::from(port)] {
                bus.release(port);
                flags.configured[usize::from(port)] = false;
            }
            let settings = BusSettings {
                sda,
                scl,
                freq_hz: freq.unwrap_or(DEFAULT_FREQ_HZ),
            };
            bus.configure(port, settings)?;
            flags.configured[usize::from(port)] = true;
            info!(port, sda, scl, freq_hz = settings.freq_hz, "I2C port initialized");
            Ok(true)
        }
    })
    .function("deinit", {
        let (bus, flags) = (bus.clone(), flags.clone());
        move |_, port: i64| {
            let port = flags.borrow().index(port)?;
            let mut flags = flags.borrow_mut();
            if flags.configured[usize::from(port)] {
                bus.borrow_mut().release(port);
                flags.configured[usize::from(port)] = false;
            }
            Ok(())
        }
    })
    .function("write", {
        let (bus, flags) = (bus.clone(), flags.clone());
        move |_, (port, addr, data): (i64, i64, Payload)| {
            let port = flags.borrow().ready(port)?;
            bus.borrow_mut().write(port, address(addr)?, &data.0)?;
            Ok(true)
        }
    })
    .function("read", {
        let (bus, flags) = (bus.clone(), flags.clone());
        move |lua, (port, addr, len): (i64, i64, i64)| {
            let port = flags.borrow().ready(port)?;
            let bytes = bus.borrow_mut().read(port, address(addr)?, read_len(len)?)?;
            byte_table(lua, bytes)
        }
    })
    .function("writeread", {
        let (bus, flags) = (bus.clone(), flags.clone());
        move |lua, (port, addr, data, len): (i64, i64, Payload, i64)| {
            let port = flags.borrow().ready(port)?;
            let bytes = bus
                .borrow_mut()
                .write_read(port, address(addr)?, &data.0, read_len(len)?)?;
            byte_table(lua, bytes)
        }
    })
    .function("scan", {
        let (bus, flags) = (bus.clone(), flags.clone());
        move |lua, port: i64| {
            let port = flags.borrow().ready(port)?;
            let mut bus = bus.borrow_mut();
            let found: Vec<u8> = SCAN_RANGE.filter(|addr| bus.probe(port, *addr)).collect();
            byte_table(lua, found)
        }
    })
}
