//! Test utilities for datarepo.
//!
//! Only available when the `testing` feature is enabled or during tests:
//!
//! ```toml
//! [dev-dependencies]
//! common = { path = "../common", features = ["testing"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use common::testing::TestConfigBuilder;
//!
//! let config = TestConfigBuilder::new()
//!     .in_memory()
//!     .with_batch_size(2)
//!     .build();
//! ```

mod config_builder;

pub use config_builder::TestConfigBuilder;
