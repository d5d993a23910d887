//! Helpers shared by the Parley packages: clock abstraction and logger setup.

pub mod logger;
pub mod time;
