// Accounting provider access
pub mod client;

pub use client::{AccountProvider, WhooingClient};
