pub mod auth;
pub mod conversation;
pub mod convert;
pub mod error;
pub mod media;
pub mod messages;
pub mod middleware;
pub mod state;
