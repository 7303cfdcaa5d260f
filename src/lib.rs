pub mod logging;
pub mod net;
pub mod relay;
pub mod session;
pub mod trainer;
