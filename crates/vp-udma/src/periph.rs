//! The peripheral shell: register-offset routing shared by every interface, plus the
//! capability-set hook standing in for the original's `Udma_periph` subclass dispatch.

use vp_host::{Host, IoRequest, IoStatus};

/// Channel-window boundaries within one peripheral's address range.
pub(crate) const TX_OFFSET: u64 = 0x10;
pub(crate) const CUSTOM_OFFSET: u64 = 0x20;

/// Interface families the core validates configuration against. Carried purely for config
/// validation — dispatch never branches on it; peripheral-specific behavior is a capability-set
/// hook, not inheritance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriphFamily {
    Uart,
    Spim,
    Hyper,
    Cpi,
}

impl PeriphFamily {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "uart" => Some(PeriphFamily::Uart),
            "spim" => Some(PeriphFamily::Spim),
            "hyper" => Some(PeriphFamily::Hyper),
            "cpi" => Some(PeriphFamily::Cpi),
            _ => None,
        }
    }

    /// The one supported version per family: `uart` v1, `spim` v2, `hyper` v1, `cpi` v1.
    pub fn supported_version(self) -> u32 {
        match self {
            PeriphFamily::Uart => 1,
            PeriphFamily::Spim => 2,
            PeriphFamily::Hyper => 1,
            PeriphFamily::Cpi => 1,
        }
    }
}

/// The peripheral-specific register region beyond the generic channel registers. No family
/// implements more than the stub: custom registers are simply not modeled, matching the original
/// `Udma_periph::custom_req` default of `IO_REQ_INVALID`.
pub trait PeriphCustom: Send {
    fn custom_req(&mut self, offset: u64, req: &mut IoRequest<()>) -> IoStatus;
}

/// Always-invalid custom region, for peripherals with nothing beyond the generic registers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCustomRegisters;

impl PeriphCustom for NoCustomRegisters {
    fn custom_req(&mut self, _offset: u64, _req: &mut IoRequest<()>) -> IoStatus {
        IoStatus::Invalid
    }
}

/// Where a peripheral-window access routes: a channel offset, the custom region, or a decision
/// that the peripheral is gated off (`Udma_periph::req`'s `is_on` gate and channel/custom split).
pub(crate) enum PeriphRoute {
    GatedOff,
    Rx(u64),
    Tx(u64),
    Custom(u64),
}

/// One configured peripheral: its RX/TX channel indices into `UdmaController::channels`, its
/// family (validation only), its clock-gate state, and its custom-register hook.
pub struct Peripheral {
    id: usize,
    family: PeriphFamily,
    rx_channel: usize,
    tx_channel: usize,
    custom: Box<dyn PeriphCustom>,
    is_on: bool,
}

impl Peripheral {
    pub fn new(id: usize, family: PeriphFamily, rx_channel: usize, tx_channel: usize) -> Self {
        Self {
            id,
            family,
            rx_channel,
            tx_channel,
            custom: Box::new(NoCustomRegisters),
            is_on: false,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn family(&self) -> PeriphFamily {
        self.family
    }

    pub fn rx_channel(&self) -> usize {
        self.rx_channel
    }

    pub fn tx_channel(&self) -> usize {
        self.tx_channel
    }

    pub fn custom_mut(&mut self) -> &mut dyn PeriphCustom {
        self.custom.as_mut()
    }

    pub fn is_on(&self) -> bool {
        self.is_on
    }

    /// Activates or deactivates the peripheral, tracing only on the edge (`Udma_periph::clock_gate`).
    pub fn clock_gate(&mut self, new_is_on: bool, host: &mut dyn Host) {
        if self.is_on != new_is_on {
            if new_is_on {
                host.debug(&format!("Activating periph (periph: {})", self.id));
            } else {
                host.debug(&format!("Deactivating periph (periph: {})", self.id));
            }
        }
        self.is_on = new_is_on;
    }

    /// Clears the clock-gate state (channel state is reset separately by the controller, which
    /// owns the channel array) (`Udma_periph::reset`).
    pub fn reset(&mut self) {
        self.is_on = false;
    }

    /// Decides how to route `offset` within this peripheral's window (`Udma_periph::req`).
    pub(crate) fn request(&self, offset: u64) -> PeriphRoute {
        if !self.is_on {
            return PeriphRoute::GatedOff;
        }
        if offset < TX_OFFSET {
            PeriphRoute::Rx(offset)
        } else if offset < CUSTOM_OFFSET {
            PeriphRoute::Tx(offset - TX_OFFSET)
        } else {
            PeriphRoute::Custom(offset - CUSTOM_OFFSET)
        }
    }
}
