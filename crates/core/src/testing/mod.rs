//! Test doubles shared by unit and integration tests.

mod memory_history;
mod mock_codec;
mod mock_encoder;

pub use memory_history::MemoryHistory;
pub use mock_codec::MockCodec;
pub use mock_encoder::MockEncoder;
