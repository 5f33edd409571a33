//! Socket channels: a path clients connect to, with message handlers and a
//! broadcast `send`. Wire transport is left to whoever owns the registrar.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    #[default]
    Json,
    Text,
}

impl Codec {
    pub fn encode(&self, message: &Value) -> String {
        match (self, message) {
            (Codec::Text, Value::String(s)) => s.clone(),
            _ => message.to_string(),
        }
    }

    /// Undecodable JSON frames are passed on as plain strings.
    pub fn decode(&self, frame: &str) -> Value {
        match self {
            Codec::Json => serde_json::from_str(frame).unwrap_or_else(|_| Value::String(frame.to_string())),
            Codec::Text => Value::String(frame.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SocketOptions {
    pub codec: Codec,
}

impl SocketOptions {
    pub fn text() -> Self {
        Self { codec: Codec::Text }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub client_id: u64,
    pub user_uid: Option<String>,
}

pub type ConnectionHandler = Arc<dyn Fn(&Connection) + Send + Sync>;
pub type MessageHandler = Arc<dyn Fn(&Value, &Connection) + Send + Sync>;

struct Client {
    connection: Connection,
    outbound: mpsc::UnboundedSender<String>,
}

pub struct SocketChannel {
    path: String,
    codec: Codec,
    next_client: AtomicU64,
    clients: RwLock<HashMap<u64, Client>>,
    on_connect: RwLock<Vec<ConnectionHandler>>,
    on_message: RwLock<Vec<MessageHandler>>,
    on_disconnect: RwLock<Vec<ConnectionHandler>>,
}

impl SocketChannel {
    pub fn new(path: impl Into<String>, options: SocketOptions) -> Self {
        Self {
            path: path.into(),
            codec: options.codec,
            next_client: AtomicU64::new(1),
            clients: RwLock::new(HashMap::new()),
            on_connect: RwLock::new(Vec::new()),
            on_message: RwLock::new(Vec::new()),
            on_disconnect: RwLock::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn on_connect<F>(&self, handler: F) -> &Self
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.on_connect.write().push(Arc::new(handler));
        self
    }

    pub fn on_message<F>(&self, handler: F) -> &Self
    where
        F: Fn(&Value, &Connection) + Send + Sync + 'static,
    {
        self.on_message.write().push(Arc::new(handler));
        self
    }

    pub fn on_disconnect<F>(&self, handler: F) -> &Self
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.on_disconnect.write().push(Arc::new(handler));
        self
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Attaches a client; frames sent to it arrive on the returned receiver.
    pub fn connect(&self, user_uid: Option<String>) -> (Connection, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Connection {
            client_id: self.next_client.fetch_add(1, Ordering::Relaxed),
            user_uid,
        };
        self.clients.write().insert(
            connection.client_id,
            Client {
                connection: connection.clone(),
                outbound: tx,
            },
        );
        debug!(path = %self.path, client = connection.client_id, "socket connected");
        let handlers = self.on_connect.read().clone();
        for handler in handlers {
            handler(&connection);
        }
        (connection, rx)
    }

    /// Decodes an inbound frame and hands it to every message handler.
    pub fn receive(&self, client_id: u64, frame: &str) {
        let Some(connection) = self
            .clients
            .read()
            .get(&client_id)
            .map(|c| c.connection.clone())
        else {
            warn!(path = %self.path, client = client_id, "frame from unknown client");
            return;
        };
        let message = self.codec.decode(frame);
        let handlers = self.on_message.read().clone();
        for handler in handlers {
            handler(&message, &connection);
        }
    }

    pub fn disconnect(&self, client_id: u64) {
        let Some(client) = self.clients.write().remove(&client_id) else {
            return;
        };
        debug!(path = %self.path, client = client_id, "socket disconnected");
        let handlers = self.on_disconnect.read().clone();
        for handler in handlers {
            handler(&client.connection);
        }
    }

    /// Sends to every client, or only to the listed users' clients.
    /// Returns the number of clients the frame was delivered to.
    pub fn send(&self, message: &Value, users: &[&str]) -> usize {
        let frame = self.codec.encode(message);
        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, client) in self.clients.read().iter() {
            let addressed = users.is_empty()
                || client
                    .connection
                    .user_uid
                    .as_deref()
                    .is_some_and(|uid| users.contains(&uid));
            if !addressed {
                continue;
            }
            if client.outbound.send(frame.clone()).is_ok() {
                delivered += 1;
            } else {
                closed.push(*id);
            }
        }
        for id in closed {
            self.disconnect(id);
        }
        trace!(path = %self.path, delivered, "socket send");
        delivered
    }

    /// Drops every client without running disconnect handlers.
    pub fn close(&self) {
        self.clients.write().clear();
    }
}

impl fmt::Debug for SocketChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketChannel")
            .field("path", &self.path)
            .field("codec", &self.codec)
            .field("clients", &self.client_count())
            .finish()
    }
}

pub trait SocketRegistrar: Send + Sync {
    fn register(&self, channel: Arc<SocketChannel>);

    fn unregister(&self, path: &str) -> Option<Arc<SocketChannel>>;
}

#[derive(Debug, Default)]
pub struct InMemorySocketRegistrar {
    channels: RwLock<HashMap<String, Arc<SocketChannel>>>,
}

impl InMemorySocketRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel(&self, path: &str) -> Option<Arc<SocketChannel>> {
        self.channels.read().get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.channels.read().keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl SocketRegistrar for InMemorySocketRegistrar {
    fn register(&self, channel: Arc<SocketChannel>) {
        debug!(path = %channel.path(), "registering socket channel");
        if let Some(previous) = self
            .channels
            .write()
            .insert(channel.path().to_string(), channel)
        {
            warn!(path = %previous.path(), "replaced socket channel");
        }
    }

    fn unregister(&self, path: &str) -> Option<Arc<SocketChannel>> {
        let channel = self.channels.write().remove(path)?;
        channel.close();
        debug!(path, "unregistered socket channel");
        Some(channel)
    }
}
