pub mod controller;
pub mod decision;
pub mod demand;
pub mod optimizer;
pub mod roundlog;
pub mod sampler;
pub mod transport;
