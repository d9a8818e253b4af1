pub mod command;
pub mod gap;
pub mod record;
pub mod sync;

pub use command::*;
pub use gap::*;
pub use record::*;
pub use sync::*;
