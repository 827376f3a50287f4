//! Client broker (C3): the reliable, heartbeat-driven bridge between the
//! master task and the remote view server.

mod engine;
pub mod state;

pub use engine::{run_broker, Broker, ServerConnector};
pub use state::{BrokerState, ConnState};

use crate::protocol::Frame;

/// Messages the master sends down to the broker task.
#[derive(Debug, Clone)]
pub enum MasterMsg {
    /// Publish a view to the server; carries its payload frames.
    PublishView(Vec<Frame>),
    /// Request a clean shutdown.
    Shutdown,
}

/// Messages the broker sends back up to the master task.
#[derive(Debug, Clone)]
pub enum BrokerMsg {
    /// A relayed view received on the sub channel, with its decoded
    /// interests bitmask.
    View {
        interests: crate::config::InterestSet,
        payload: Vec<Frame>,
    },
    /// A protocol or unrecoverable transport error; the broker exits after
    /// sending this.
    Error(String),
}
