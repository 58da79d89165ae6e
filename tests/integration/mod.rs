//! Integration tests for the lazyrows query cache

mod derivations;
mod lazy_value;
mod scenarios;
pub mod test_utils;
