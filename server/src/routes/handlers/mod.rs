pub mod assistant;
pub mod auth;
pub mod categories;
mod common;
pub mod email;
pub mod health;
pub mod saved;
