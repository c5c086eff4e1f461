// Local persistence: engine seam, value-list adapter, wire codecs.

pub mod adapter;
pub mod engine;
pub mod serializer;

pub use adapter::ValueStore;
pub use engine::{DiskEngine, MemoryEngine, StorageEngine};
pub use serializer::Serializer;
