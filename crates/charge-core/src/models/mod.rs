//! Bus event models

mod command;
mod connection;
mod status;

pub use command::*;
pub use connection::*;
pub use status::*;
