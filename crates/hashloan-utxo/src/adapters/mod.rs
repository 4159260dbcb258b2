pub mod memory;

pub use memory::InMemoryBitcoinNode;
