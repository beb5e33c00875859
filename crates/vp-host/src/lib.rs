//! Host-facing contract shared by `vp-router` and `vp-udma`: the request type, the
//! clock/scheduler/trace-sink traits the simulation host implements, and the configuration
//! schema read at build time.

mod config;
mod host;
mod request;

pub use config::{
    ConfigError, InterfaceConfig, MappingConfig, RouterConfig, UdmaConfig, UdmaProperties,
};
pub use host::{Clock, EventId, EventTrigger, Host, Scheduler, TraceLevel, TraceSink, TracingSink};
pub use request::{IoRequest, IoStatus};
