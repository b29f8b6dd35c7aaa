pub mod connection;
pub mod indexes;
pub mod memory_store;
pub mod mongo_store;
pub mod repository;

pub use memory_store::MemoryStore;
pub use mongo_store::MongoStore;
pub use repository::{MarketStore, StintFilter};
