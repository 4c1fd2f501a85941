//! Outbound publish seam shared by the telemetry loop and the command handler.

use std::future::Future;

use crate::error::SessionError;

/// Delivery guarantee requested for a single publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Fire and forget. Used for high-rate telemetry where a lost frame is
    /// superseded by the next one.
    AtMostOnce,
    /// Completes only once the broker has acknowledged the message.
    AtLeastOnce,
}

/// Message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Anything that can publish to the broker. Must be callable from several
/// tasks at once.
pub trait Publish: Send + Sync {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        delivery: Delivery,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;
}
