//! Room registry: named broadcast groups over WebSocket connections.
//!
//! Rooms are created on first join and destroyed when their last client
//! leaves; a periodic sweeper backstops the eager cleanup. The registry
//! keeps `room.clients` and each connection's joined-room set mutually
//! consistent by updating both under the registry lock. Broadcast and emit
//! fan out to every client in the room, optionally excluding one connection
//! id (typically the sender).

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};

use parking_lot::Mutex;
use serde_json::Value;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::ws::WsConnection;

struct Room {
    clients: HashMap<String, WsConnection>,
    created: SystemTime,
    last_activity: Instant,
    message_count: u64,
    metadata: HashMap<String, Value>,
}

impl Room {
    fn new() -> Self {
        Self {
            clients: HashMap::new(),
            created: SystemTime::now(),
            last_activity: Instant::now(),
            message_count: 0,
            metadata: HashMap::new(),
        }
    }
}

struct ConnEntry {
    conn: WsConnection,
    last_seen: Instant,
}

/// Point-in-time view of a room for monitoring.
#[derive(Clone, Debug)]
pub struct RoomInfo {
    /// Room name.
    pub name: String,
    /// Number of joined clients.
    pub clients: usize,
    /// Creation time.
    pub created: SystemTime,
    /// Time since the last join, leave, or fanout.
    pub idle: Duration,
    /// Messages fanned out through this room.
    pub message_count: u64,
    /// User-attached metadata.
    pub metadata: HashMap<String, Value>,
}

/// Registry of rooms and live connections.
pub struct RoomManager {
    rooms: Mutex<HashMap<String, Room>>,
    connections: Mutex<HashMap<String, ConnEntry>>,
    max_rooms: usize,
}

impl RoomManager {
    /// Creates a registry bounded at `max_rooms` concurrently live rooms.
    pub fn new(max_rooms: usize) -> Arc<Self> {
        Arc::new(Self {
            rooms: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
            max_rooms,
        })
    }

    /// Tracks a newly opened connection.
    pub(crate) fn register(&self, conn: &WsConnection) {
        self.connections.lock().insert(
            conn.id().to_owned(),
            ConnEntry {
                conn: conn.clone(),
                last_seen: Instant::now(),
            },
        );
    }

    /// Forgets a closed connection.
    pub(crate) fn unregister(&self, id: &str) {
        self.connections.lock().remove(id);
    }

    /// Records inbound activity for a connection.
    pub(crate) fn touch_liveness(&self, id: &str) {
        if let Some(entry) = self.connections.lock().get_mut(id) {
            entry.last_seen = Instant::now();
        }
    }

    /// Adds the connection to a room, creating the room on first join.
    ///
    /// Returns `false` when creating the room would exceed `max_rooms`.
    /// The connection's own room set is updated in the same critical
    /// section, keeping both sides of the membership relation in step.
    pub fn join(&self, conn: &WsConnection, room: &str) -> bool {
        let mut rooms = self.rooms.lock();
        if !rooms.contains_key(room) && rooms.len() >= self.max_rooms {
            tracing::warn!(room, limit = self.max_rooms, "room limit reached");
            return false;
        }
        let entry = rooms.entry(room.to_owned()).or_insert_with(Room::new);
        entry.clients.insert(conn.id().to_owned(), conn.clone());
        entry.last_activity = Instant::now();
        conn.rooms_set().lock().insert(room.to_owned());
        true
    }

    /// Removes the connection from a room, destroying the room when it
    /// empties.
    pub fn leave(&self, conn: &WsConnection, room: &str) {
        let mut rooms = self.rooms.lock();
        if let Some(entry) = rooms.get_mut(room) {
            entry.clients.remove(conn.id());
            entry.last_activity = Instant::now();
            if entry.clients.is_empty() {
                rooms.remove(room);
            }
        }
        conn.rooms_set().lock().remove(room);
    }

    /// Removes the connection from every room it joined.
    ///
    /// Lock order is registry then connection, matching `join` and `leave`.
    pub fn leave_all(&self, conn: &WsConnection) {
        let mut rooms = self.rooms.lock();
        let joined: Vec<String> = conn.rooms_set().lock().drain().collect();
        for room in joined {
            if let Some(entry) = rooms.get_mut(&room) {
                entry.clients.remove(conn.id());
                if entry.clients.is_empty() {
                    rooms.remove(&room);
                }
            }
        }
    }

    /// Sends a text message to every client in the room except `except`.
    ///
    /// Returns how many clients accepted the message into their write
    /// queues.
    pub async fn broadcast_to_room(
        &self,
        room: &str,
        data: impl Into<String>,
        except: Option<&str>,
    ) -> usize {
        let data = data.into();
        let targets = self.collect_targets(room, except);
        let mut delivered = 0;
        for conn in targets {
            if conn.send_message(Message::text(data.clone())).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Sends an event frame `{"event": …, "data": …}` to the room.
    pub async fn emit_to_room(
        &self,
        room: &str,
        event: &str,
        data: Value,
        except: Option<&str>,
    ) -> usize {
        let frame = serde_json::json!({ "event": event, "data": data }).to_string();
        self.broadcast_to_room(room, frame, except).await
    }

    fn collect_targets(&self, room: &str, except: Option<&str>) -> Vec<WsConnection> {
        let mut rooms = self.rooms.lock();
        let Some(entry) = rooms.get_mut(room) else {
            return Vec::new();
        };
        entry.message_count += 1;
        entry.last_activity = Instant::now();
        entry
            .clients
            .values()
            .filter(|c| except.map(|id| c.id() != id).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// Whether `conn_id` is a member of `room`.
    pub fn contains(&self, room: &str, conn_id: &str) -> bool {
        self.rooms
            .lock()
            .get(room)
            .map(|r| r.clients.contains_key(conn_id))
            .unwrap_or(false)
    }

    /// Number of clients in a room, when it exists.
    pub fn room_size(&self, room: &str) -> Option<usize> {
        self.rooms.lock().get(room).map(|r| r.clients.len())
    }

    /// Number of live rooms.
    pub fn rooms_len(&self) -> usize {
        self.rooms.lock().len()
    }

    /// Attaches a metadata value to a room.
    pub fn set_metadata(&self, room: &str, key: &str, value: Value) {
        if let Some(entry) = self.rooms.lock().get_mut(room) {
            entry.metadata.insert(key.to_owned(), value);
        }
    }

    /// Snapshot of all rooms for monitoring.
    pub fn room_infos(&self) -> Vec<RoomInfo> {
        self.rooms
            .lock()
            .iter()
            .map(|(name, room)| RoomInfo {
                name: name.clone(),
                clients: room.clients.len(),
                created: room.created,
                idle: room.last_activity.elapsed(),
                message_count: room.message_count,
                metadata: room.metadata.clone(),
            })
            .collect()
    }

    /// Removes rooms the eager cleanup missed.
    pub fn sweep(&self) {
        self.rooms.lock().retain(|_, room| !room.clients.is_empty());
    }

    /// Spawns the periodic sweeper task.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                registry.sweep();
            }
        })
    }

    /// Closes every live connection, used during graceful shutdown.
    pub async fn close_all(&self, code: u16) {
        let conns: Vec<WsConnection> = self
            .connections
            .lock()
            .values()
            .map(|e| e.conn.clone())
            .collect();
        for conn in conns {
            conn.close(code).await;
        }
        self.connections.lock().clear();
    }

    /// Drops all rooms and connections, for application shutdown.
    pub fn clear(&self) {
        self.rooms.lock().clear();
        self.connections.lock().clear();
    }
}
