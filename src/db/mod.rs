pub mod convert;
pub mod memory;
pub mod mongo;
pub mod query;
pub mod store;

pub use memory::MemoryStore;
pub use mongo::MongoStore;
pub use store::{Changes, DocumentStore, FindSpec, Store, StoreError, UniqueIndex};
