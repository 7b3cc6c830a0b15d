//! Canopy Store - Bounded cell cache
//!
//! The [`Database`] owns the opened datasets and pages their cells in and
//! out of memory within a fixed resident cell budget.

pub mod database;
pub mod ticket;

pub use database::{Database, DatabaseStats};
pub use ticket::LoadTicket;
