pub mod allocator;
pub mod connection;
pub mod migrations;
pub mod repositories;

pub use allocator::{AllocationError, QuoteNumberAllocator};
pub use connection::{connect, connect_with_settings, DbPool};
