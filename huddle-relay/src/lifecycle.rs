//! Connection lifetime bookkeeping.
//!
//! One table entry per live transport connection, inserted when the
//! socket is admitted and removed on teardown. `close()` is the single
//! teardown path for both clean closes and reader errors; the first
//! caller removes the entry and runs cleanup, any racing caller finds
//! the entry gone and returns.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::events::{EventBus, RelayEvent};
use crate::protocol::ConnectionId;
use crate::rooms::ClientHandle;
use crate::signaling::SignalingRelay;
use crate::usage::UsageTracker;
use crate::whiteboard::WhiteboardRelay;

/// Admits and tears down connections, driving both relays on close.
pub struct SessionManager {
    connections: RwLock<HashMap<ConnectionId, ClientHandle>>,
    signaling: Arc<SignalingRelay>,
    whiteboard: Arc<WhiteboardRelay>,
    usage: Arc<UsageTracker>,
    bus: EventBus,
    queue_capacity: usize,
}

impl SessionManager {
    pub fn new(
        signaling: Arc<SignalingRelay>,
        whiteboard: Arc<WhiteboardRelay>,
        usage: Arc<UsageTracker>,
        bus: EventBus,
        queue_capacity: usize,
    ) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            signaling,
            whiteboard,
            usage,
            bus,
            queue_capacity,
        }
    }

    /// Admit a connection: allocate its id and bounded outbound queue.
    /// The receiver goes to the connection's writer task.
    pub async fn open(&self) -> (ClientHandle, mpsc::Receiver<Arc<Vec<u8>>>) {
        let conn = Uuid::new_v4();
        let (handle, rx) = ClientHandle::channel(conn, self.queue_capacity);

        self.connections.write().await.insert(conn, handle.clone());
        self.usage.record_message();
        self.usage
            .record_activity(format!("connection {conn} opened"))
            .await;
        self.bus.publish(RelayEvent::ConnectionOpened { conn });
        debug!("connection {conn} opened");

        (handle, rx)
    }

    /// Tear a connection down. Only the call that removes the table
    /// entry runs cleanup, so racing closes are safe.
    pub async fn close(&self, conn: ConnectionId) {
        let removed = self.connections.write().await.remove(&conn);
        if removed.is_none() {
            return;
        }

        self.signaling.disconnect(conn).await;
        self.whiteboard.disconnect(conn).await;

        self.usage.record_message();
        self.usage
            .record_activity(format!("connection {conn} closed"))
            .await;
        self.bus.publish(RelayEvent::ConnectionClosed { conn });
        debug!("connection {conn} closed");
    }

    pub async fn active_connections(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_open(&self, conn: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&conn)
    }
}
