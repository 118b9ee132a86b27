//! Live fan-out for the Vigil pipeline.
//!
//! The [`BroadcastHub`] keeps a registry of connected subscribers and pushes
//! every [`vigil_types::Envelope`] to all of them without ever waiting on a
//! slow consumer. A subscriber whose buffer is full, or whose receiving end
//! has gone away, is disconnected and removed.

#![deny(unsafe_code)]

pub mod error;
pub mod hub;

pub use error::{HubError, HubResult};
pub use hub::{
    BroadcastHub, BroadcastReport, SubscriberId, SubscriberInfo, SubscriberState, Subscription,
    DEFAULT_SUBSCRIBER_BUFFER,
};
