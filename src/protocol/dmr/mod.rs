//! WildFly management model over the HTTP management API

mod driver;
mod location;

pub use driver::{DmrConnection, DmrDriver, DmrDriverFactory};
pub use location::{DmrLocationResolver, DmrNodeLocation};
