//! Background delivery of push notifications.
//!
//! The worker shares nothing with the foreground dashboard: its only input is one push message
//! at a time, and its only output is zero or one displayed notification (plus opening a
//! notification's URL when it is clicked).

pub mod config;
pub mod display;
pub mod metrics;
pub mod payload;
pub mod routes;
pub mod state;
pub mod tag;
pub mod telemetry;
pub mod worker;
