//! the test_utils folder here will share utils or fake components between
//! unit tests
mod common;
mod fake_backend;
mod fake_coordination;

pub use common::*;
pub use fake_backend::*;
pub use fake_coordination::*;
