pub mod audit;
pub mod clock;
pub mod incident;
pub mod schedule;
pub mod user;
