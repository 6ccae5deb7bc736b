//! Utility functions for credential encoding and display.

pub mod format;

pub use format::{encode_password, mask_mobile};
