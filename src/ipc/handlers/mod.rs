pub mod classes;
pub mod core;
pub mod notifications;
pub mod resources;
pub mod setup;
