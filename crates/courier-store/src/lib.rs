pub mod error;
pub mod file;
pub mod memory;
pub mod sealed;
pub mod store;

pub use error::StoreError;
pub use file::FileSessionStore;
pub use memory::MemorySessionStore;
pub use sealed::Sealer;
pub use store::SessionStore;
