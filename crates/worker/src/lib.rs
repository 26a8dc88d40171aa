//! Process wiring shared by the worker, watchdog and (in memory mode) API
//! binaries: background loops on OS threads plus OS signal handling.

pub mod runtime;
pub mod signal;

pub use runtime::Background;
pub use signal::shutdown_requested;
