//! Database query modules.

pub mod auth;
pub mod organizations;
pub mod users;
pub mod videos;
