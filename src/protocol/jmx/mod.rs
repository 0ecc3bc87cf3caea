//! JMX MBeans reached through a Jolokia HTTP agent

mod driver;
mod location;

pub use driver::{JolokiaConnection, JolokiaDriver, JolokiaDriverFactory};
pub use location::{JmxLocationResolver, JmxNodeLocation};
