//! Testing utilities and mock implementations.
//!
//! Provides a mock batch client so orchestration flows can be tested
//! end to end without a real compute service.

mod mock_batch_client;

pub use mock_batch_client::MockBatchClient;
