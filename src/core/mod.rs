pub mod channel;
pub mod connection;
pub mod delivery;
pub mod error;
pub mod message;
pub mod publisher;
pub mod queue;
pub mod router;
pub mod topology;
