pub mod gateway;
pub mod mode;
pub mod peak;
pub mod snapshot;

pub use gateway::*;
pub use mode::*;
pub use peak::*;
pub use snapshot::*;
