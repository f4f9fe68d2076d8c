//! SQL access, one module per table group. Functions take a connection so
//! handlers can run them on a pooled connection or inside a transaction.
pub mod audit;
pub mod clock;
pub mod incident;
pub mod schedule;
pub mod user;
