//! Built-in pipeline operators.

pub mod count;
pub mod file_system;
pub mod map;
pub mod serial_readahead;
pub mod user_app;

pub use count::Count;
pub use file_system::FileSystem;
pub use map::MapOp;
pub use serial_readahead::SerialReadahead;
pub use user_app::UserApp;
