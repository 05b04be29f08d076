//! # Core Teppan Server
//!
//! The pieces that run inside the server process and share its state.
//!
//! ## Module Structure
//!
//! * [`group_table`] - Pending requests keyed by their generation-parameter
//!   fingerprint, handed out to the scheduler a round at a time.
//!
//! * [`batch`] - The batch scheduler: picks a group each tick, collates a
//!   capacity-bounded plan, runs the compute backend and fans rows back out.
//!
//! * [`handler`] - Per-connection request/reply loop.
//!
//! * [`listener`] - Accept loop spawning one handler per connection.
//!
//! * [`idle`] - Shuts the server down once no client has been connected for
//!   the idle timeout.
//!
//! * [`worker`] - Shutdown signalling and handles for the background tasks.
//!
//! Every task shares one [`ServerState`] behind one mutex. It is held only
//! for table mutations and plan extraction, never across a backend call.

pub(crate) mod batch;
pub(crate) mod group_table;
pub(crate) mod handler;
pub(crate) mod idle;
pub(crate) mod listener;
pub(crate) mod worker;

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::Instant;

use group_table::GroupTable;

/// State shared by the listener, handlers, scheduler and idle monitor.
pub(crate) struct ServerState {
    pub(crate) groups: GroupTable,

    /// Open client connections.
    pub(crate) connections: usize,

    /// Last time a connection was opened, closed or seen open by the idle monitor.
    pub(crate) last_activity: Instant,
}

impl ServerState {
    pub(crate) fn new() -> Self {
        Self {
            groups: GroupTable::new(),
            connections: 0,
            last_activity: Instant::now(),
        }
    }

    pub(crate) fn connection_opened(&mut self) {
        self.connections += 1;
        self.last_activity = Instant::now();
    }

    pub(crate) fn connection_closed(&mut self) {
        self.connections = self.connections.saturating_sub(1);
        self.last_activity = Instant::now();
    }
}

pub(crate) type SharedState = Arc<Mutex<ServerState>>;

pub(crate) fn shared_state() -> SharedState {
    Arc::new(Mutex::new(ServerState::new()))
}
