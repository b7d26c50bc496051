//! Native capability namespaces and the devices behind them.

pub mod bus;
pub mod display;
pub mod network;
pub mod system;
pub mod touch;

use std::{cell::RefCell, rc::Rc, time::Duration};

use tracing::info;

use crate::{
    config::DeviceConfig,
    diagnostics::Result,
    runtime::Host,
};

use self::{
    bus::{I2cBus, SimulatedBus},
    display::{DisplayDriver, Framebuffer},
    network::{HttpClient, HttpLimits, ReqwestClient, SimulatedStation, StaticHttp, Station},
    touch::{ScriptedTouch, TouchPanel},
};

/// The peripherals the bridge talks to.
#[derive(Clone)]
pub struct Devices {
    pub display: Rc<RefCell<dyn DisplayDriver>>,
    pub bus: Rc<RefCell<dyn I2cBus>>,
    pub touch: Rc<RefCell<dyn TouchPanel>>,
    pub station: Rc<RefCell<dyn Station>>,
    pub http: Rc<dyn HttpClient>,
}

impl Devices {
    /// Fully in-memory devices. HTTP requests fail as unreachable.
    pub fn simulated(config: &DeviceConfig) -> Self {
        Self {
            display: Rc::new(RefCell::new(Framebuffer::default())),
            bus: Rc::new(RefCell::new(SimulatedBus::new())),
            touch: Rc::new(RefCell::new(ScriptedTouch::new())),
            station: Rc::new(RefCell::new(SimulatedStation::new(config.networks.clone()))),
            http: Rc::new(StaticHttp::new()),
        }
    }

    /// Simulated peripherals with a real HTTP client.
    pub fn hosted(config: &DeviceConfig) -> Result<Self> {
        Ok(Self {
            http: Rc::new(ReqwestClient::new(config)?),
            ..Self::simulated(config)
        })
    }
}

/// Installs every capability namespace into `host`.
pub fn install(host: &Host, devices: &Devices, config: &DeviceConfig) -> Result<()> {
    let namespaces = [
        display::namespace(devices.display.clone()),
        bus::namespace(devices.bus.clone(), config.i2c_ports),
        network::wifi_namespace(
            devices.station.clone(),
            Duration::from_millis(config.wifi_timeout_ms),
        ),
        network::http_namespace(devices.http.clone(), HttpLimits::from(config)),
        touch::namespace(devices.touch.clone()),
        system::namespace(),
    ];
    for namespace in namespaces {
        host.register_namespace(namespace)?;
    }
    info!("capability namespaces installed");
    Ok(())
}
