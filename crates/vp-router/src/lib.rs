//! The address-decoding interconnect router.

mod map;
mod router;

pub use map::{RegionSpec, RouterBuilder, RouterError};
pub use router::{IoTarget, Router};
