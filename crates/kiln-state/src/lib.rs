pub mod file;
pub mod memory;
pub mod types;

pub use file::{FileStateStore, STATE_FILE_NAME};
pub use memory::MemoryStateStore;
pub use types::{StateError, StateStore};
