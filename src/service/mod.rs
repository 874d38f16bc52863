//! Service layer
//!
//! Account reconciliation and score computation.

pub mod account;
pub mod score;

pub use account::{AccountService, merge_account};
