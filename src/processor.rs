//! Delivery of connection events to application code.
//!
//! A [`Processor`] drains one connection's event queue on a tokio task and
//! hands each message either to the installed [`ProtocolConsumer`] or, if
//! there is none, to every registered [`MessageListener`]. Callbacks run on
//! that task, one at a time. A listener that fails or panics is logged and
//! the processor moves on.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::connection::{Connection, Event};
use crate::error::Result;
use crate::message::{CloseFrame, Message};

/// Application callbacks for one connection.
///
/// Only [`on_message`](Self::on_message) is required.
pub trait MessageListener: Send + Sync {
    /// The listener is attached to a running processor.
    fn on_established(&self, _connection: &Connection) {}

    /// A complete message arrived and no consumer is installed.
    fn on_message(&self, connection: &Connection, message: &Message) -> anyhow::Result<()>;

    /// A pong arrived. `delay` is the time since the last ping sent
    /// through [`Processor::ping`], if one was outstanding.
    fn on_pong(&self, _connection: &Connection, _payload: &[u8], _delay: Option<Duration>) {}

    /// The connection reached `Closed`. `close` is the peer's close frame;
    /// `None` means the closure was abnormal.
    fn on_closed(&self, _connection: &Connection, _close: Option<&CloseFrame>) {}

    /// The listener was removed or the processor stopped.
    fn on_stopped(&self, _connection: &Connection) {}
}

/// Takes every message instead of the listeners.
pub trait ProtocolConsumer: Send + Sync {
    fn consume(&self, connection: &Connection, message: Message) -> anyhow::Result<()>;
}

/// Handle returned by [`Processor::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Shared {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn MessageListener>)>>,
    consumer: RwLock<Option<Arc<dyn ProtocolConsumer>>>,
    running: AtomicBool,
    next_id: AtomicU64,
    last_ping: Mutex<Option<Instant>>,
    cancel: CancellationToken,
}

impl Shared {
    /// Copy of the listener list so callbacks may add or remove listeners.
    fn listeners(&self) -> Vec<Arc<dyn MessageListener>> {
        self.listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    fn dispatch(&self, connection: &Connection, event: Event) {
        match event {
            Event::Message(message) => {
                let consumer = self.consumer.read().clone();
                if let Some(consumer) = consumer {
                    guarded("consume", || consumer.consume(connection, message));
                    return;
                }
                for listener in self.listeners() {
                    guarded("on_message", || listener.on_message(connection, &message));
                }
            }
            Event::Pong(payload) => {
                let delay = self.last_ping.lock().take().map(|sent| sent.elapsed());
                tracing::trace!(role = %connection.role(), ?delay, "pong");
                for listener in self.listeners() {
                    guarded("on_pong", || {
                        listener.on_pong(connection, &payload, delay);
                        Ok(())
                    });
                }
            }
            Event::Closed(close) => {
                for listener in self.listeners() {
                    guarded("on_closed", || {
                        listener.on_closed(connection, close.as_ref());
                        Ok(())
                    });
                }
            }
        }
    }
}

fn guarded(callback: &'static str, f: impl FnOnce() -> anyhow::Result<()>) {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(callback, error = %e, "listener failed"),
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown".to_string());
            tracing::error!(callback, panic = %reason, "listener panicked");
        }
    }
}

/// Runs the event loop of one connection.
///
/// ```rust,ignore
/// let processor = Processor::new(conn.clone());
/// processor.add_listener(Arc::new(Echo));
/// let task = processor.start().expect("events not taken yet");
/// ```
pub struct Processor {
    connection: Connection,
    shared: Arc<Shared>,
}

impl Processor {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            shared: Arc::new(Shared {
                listeners: RwLock::new(Vec::new()),
                consumer: RwLock::new(None),
                running: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
                last_ping: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Register a listener. If the processor is running,
    /// `on_established` fires right away.
    pub fn add_listener(&self, listener: Arc<dyn MessageListener>) -> ListenerId {
        let id = ListenerId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        self.shared
            .listeners
            .write()
            .push((id, Arc::clone(&listener)));
        if self.is_running() {
            guarded("on_established", || {
                listener.on_established(&self.connection);
                Ok(())
            });
        }
        id
    }

    /// Unregister a listener and fire its `on_stopped`.
    ///
    /// Returns false if the id is unknown.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let removed = {
            let mut listeners = self.shared.listeners.write();
            listeners
                .iter()
                .position(|(existing, _)| *existing == id)
                .map(|index| listeners.remove(index).1)
        };
        match removed {
            Some(listener) => {
                guarded("on_stopped", || {
                    listener.on_stopped(&self.connection);
                    Ok(())
                });
                true
            }
            None => false,
        }
    }

    /// Route all messages to `consumer` instead of the listeners, or back
    /// to the listeners with `None`.
    pub fn set_consumer(&self, consumer: Option<Arc<dyn ProtocolConsumer>>) {
        *self.shared.consumer.write() = consumer;
    }

    /// Spawn the event loop on the current runtime.
    ///
    /// Returns `None` if the connection's events were already taken. The
    /// loop ends after the connection closes or [`stop`](Self::stop) is
    /// called; every listener then gets `on_stopped`.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        let Some(mut events) = self.connection.take_events() else {
            tracing::warn!(role = %self.connection.role(), "connection events already taken");
            return None;
        };
        self.shared.running.store(true, Ordering::Release);
        for listener in self.shared.listeners() {
            guarded("on_established", || {
                listener.on_established(&self.connection);
                Ok(())
            });
        }

        let shared = Arc::clone(&self.shared);
        let connection = self.connection.clone();
        Some(tokio::spawn(async move {
            tracing::debug!(role = %connection.role(), "processor started");
            loop {
                let event = tokio::select! {
                    _ = shared.cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                let Some(event) = event else { break };
                let last = matches!(event, Event::Closed(_));
                shared.dispatch(&connection, event);
                if last {
                    break;
                }
            }

            shared.running.store(false, Ordering::Release);
            for listener in shared.listeners() {
                guarded("on_stopped", || {
                    listener.on_stopped(&connection);
                    Ok(())
                });
            }
            tracing::debug!(role = %connection.role(), "processor stopped");
        }))
    }

    /// Stop the event loop. Queued events are not delivered.
    pub fn stop(&self) {
        self.shared.cancel.cancel();
    }

    /// Send an asynchronous ping and remember when, so the matching
    /// `on_pong` reports the round-trip delay.
    ///
    /// Returns false if another ping is still in flight.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::ping_async`].
    pub fn ping(&self, data: impl Into<Vec<u8>>) -> Result<bool> {
        let previous = self.shared.last_ping.lock().replace(Instant::now());
        match self.connection.ping_async(data) {
            Ok(true) => Ok(true),
            other => {
                *self.shared.last_ping.lock() = previous;
                other
            }
        }
    }
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("connection", &self.connection)
            .field("running", &self.is_running())
            .field("listeners", &self.shared.listeners.read().len())
            .finish_non_exhaustive()
    }
}
