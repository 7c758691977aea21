mod memory;
mod store;

pub use memory::MemoryStore;
pub use store::RoomStore;

#[cfg(test)]
pub use store::MockRoomStore;
