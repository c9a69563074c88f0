//! Channel plumbing between the control thread and the render engine.
//!
//! | Direction | Channel | Engine side |
//! |-----------|---------|-------------|
//! | control → engine | unbounded | `try_recv`, drained at the top of every block |
//! | engine → control | bounded | `try_send`, a full channel drops the event |
//!
//! Neither end of the engine side ever blocks or allocates.

pub mod messages;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use messages::{ControlMessage, EngineEvent};

/// Channel ends held by the control thread.
#[derive(Debug, Clone)]
pub struct ControlEndpoint {
    pub commands: Sender<ControlMessage>,
    pub events: Receiver<EngineEvent>,
}

/// Channel ends held by the render engine.
#[derive(Debug)]
pub struct EngineEndpoint {
    pub commands: Receiver<ControlMessage>,
    pub events: Sender<EngineEvent>,
}

/// Create both directions. `event_capacity` bounds undelivered engine events.
pub fn create_channels(event_capacity: usize) -> (ControlEndpoint, EngineEndpoint) {
    let (command_tx, command_rx) = unbounded();
    let (event_tx, event_rx) = bounded(event_capacity.max(1));
    (
        ControlEndpoint {
            commands: command_tx,
            events: event_rx,
        },
        EngineEndpoint {
            commands: command_rx,
            events: event_tx,
        },
    )
}
