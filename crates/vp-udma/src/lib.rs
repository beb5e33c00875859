//! The micro-DMA controller core.

mod channel;
mod controller;
mod periph;
mod transfer;

pub use channel::{Channel, ChannelDirection, RxPushError};
pub use controller::{L2Target, UdmaController};
pub use periph::{NoCustomRegisters, Peripheral, PeriphCustom, PeriphFamily};
pub use transfer::{ChannelId, TransferDescriptor, TransferSize};
