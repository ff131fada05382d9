//! Moderation and event-dispatch core for a multi-node channel/room
//! chat system: ACL evaluation, request validation, and cluster-wide
//! ban/kick/remove coordination, expressed as ports so the transport,
//! database driver, and cluster bus are swappable.

pub mod acl;
pub mod adapters;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod model;
pub mod ports;
pub mod store;
pub mod validator;

pub use config::Config;
pub use error::{Error, PortError, Result};
