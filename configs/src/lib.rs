pub mod constants;
pub mod enforcement;
pub mod topology;

pub use enforcement::Enforcement;
pub use topology::{Node, Pod, Topology, app_of};
