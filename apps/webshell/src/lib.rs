pub mod bridge;
pub mod emulator;
pub mod fixture;
pub mod session;
pub mod telemetry;
pub mod terminal;
pub mod transport;
