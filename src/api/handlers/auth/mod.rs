//! Authentication endpoints: login, refresh, logout, verify.

pub mod login;
pub mod logout;
pub mod refresh;
pub mod types;
pub mod verify;
