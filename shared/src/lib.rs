//! Shared models and utilities for the warung storefront agent
//!
//! Holds the plain data types that make up the store document
//! (products, orders, ledger entries, user registry) plus small
//! time/id helpers. No I/O lives here.

pub mod models;
pub mod util;

pub use models::{
    DurationPolicy, FeedCredentials, LedgerEntry, Order, Product, StoreDocument, UserActivity,
};
pub use util::{now_millis, ref_id};
