//! WebSocket Hub (C6): connected-client registry, topic subscriptions,
//! heartbeats, and typed notification fan-out. See [`hub`] for the
//! implementation and [`types`] for the wire envelope.

pub mod hub;
pub mod types;

pub use hub::{Hub, HubRunner};
pub use types::{
    run_topic, test_topic, ClientFrame, ClientInfo, Envelope, HubConfig, MessageType, TOPIC_ALL,
};
