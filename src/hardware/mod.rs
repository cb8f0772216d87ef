pub mod cloud;
pub mod factory;
pub mod simulated;

pub use cloud::CloudGateway;
pub use factory::{build_gateway, GatewayHandles};
pub use simulated::SimulatedGateway;
