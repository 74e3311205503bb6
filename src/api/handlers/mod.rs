pub mod admin;
pub mod auth;
pub mod health;
pub mod reminders;
pub mod subscription;
pub mod sync;
pub mod user;
pub mod vehicles;
