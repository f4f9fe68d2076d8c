pub mod audit;
pub mod clock_entry;
pub mod incident;
pub mod role;
pub mod schedule;
pub mod user;
pub mod user_cache;
