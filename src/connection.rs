// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Shared Broker Connection
//!
//! A process keeps a single connection and channel to RabbitMQ. The
//! `ConnectionManager` owns that pair as a `BrokerHandle` and hands out the
//! same `Arc` to every acquisition until it is closed. Each acquisition also
//! returns a `ConnectionResult` so callers can tell a reused handle from a
//! fresh one, and a disabled broker from a broken one.
//!
//! `global()` is the process-wide manager backed by lapin.

use crate::{
    channel::{BrokerChannel, LapinChannel},
    config::RabbitMQConfigs,
    errors::AmqpError,
};
use async_trait::async_trait;
use lapin::{types::LongString, Connection, ConnectionProperties};
use std::{
    future::Future,
    sync::{Arc, OnceLock},
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// An open connection plus the channel created on it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// The channel shared by every operation on this transport.
    fn channel(&self) -> Arc<dyn BrokerChannel>;

    /// True while both the connection and its channel are open.
    fn is_open(&self) -> bool;

    /// Closes the channel, then the connection. Parts already closed are skipped.
    async fn close(&self) -> Result<(), AmqpError>;
}

/// Opens transports from configuration.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, cfg: &RabbitMQConfigs) -> Result<Box<dyn Transport>, AmqpError>;
}

/// `Connector` that dials RabbitMQ with lapin.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmqpConnector;

#[async_trait]
impl Connector for AmqpConnector {
    async fn connect(&self, cfg: &RabbitMQConfigs) -> Result<Box<dyn Transport>, AmqpError> {
        let (connection, channel) = new_amqp_channel(cfg).await?;
        Ok(Box::new(AmqpTransport {
            connection,
            channel,
        }))
    }
}

/// Creates a new AMQP connection and a channel on it.
///
/// The connection is named after `cfg.connection_name` so it can be told
/// apart in the broker's management UI.
pub async fn new_amqp_channel(
    cfg: &RabbitMQConfigs,
) -> Result<(Connection, Arc<LapinChannel>), AmqpError> {
    debug!("creating amqp connection...");
    let options = ConnectionProperties::default()
        .with_connection_name(LongString::from(cfg.connection_name.clone()));

    let conn = match Connection::connect(&cfg.uri(), options).await {
        Ok(c) => Ok(c),
        Err(err) => {
            error!(
                error = err.to_string(),
                uri = cfg.redacted_uri(),
                "failure to connect"
            );
            Err(AmqpError::ConnectionError(err.to_string()))
        }
    }?;
    debug!("amqp connected");

    debug!("creating amqp channel...");
    match conn.create_channel().await {
        Ok(c) => {
            debug!("channel created");
            Ok((conn, LapinChannel::new(c)))
        }
        Err(err) => {
            error!(error = err.to_string(), "error to create the channel");
            // the channel failed, so the connection is not kept either
            let _ = conn.close(200, "channel failure").await;
            Err(AmqpError::ChannelError(err.to_string()))
        }
    }
}

/// `Transport` holding a lapin connection and its channel.
pub struct AmqpTransport {
    connection: Connection,
    channel: Arc<LapinChannel>,
}

#[async_trait]
impl Transport for AmqpTransport {
    fn channel(&self) -> Arc<dyn BrokerChannel> {
        self.channel.clone()
    }

    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.is_open()
    }

    async fn close(&self) -> Result<(), AmqpError> {
        close_in_order(&*self.channel, || async {
            if !self.connection.status().connected() {
                return Ok(());
            }

            debug!("closing amqp connection...");
            match self.connection.close(200, "closing").await {
                Err(err) => {
                    error!(error = err.to_string(), "error to close the connection");
                    Err(AmqpError::CloseError(err.to_string()))
                }
                _ => Ok(()),
            }
        })
        .await
    }
}

/// Closes `channel`, then runs `close_connection`.
///
/// The connection close runs even when the channel close fails, so a broken
/// channel never leaves its connection open.
///
/// # Parameters
/// * `channel` - Channel to close first
/// * `close_connection` - Closes the connection the channel was created on
///
/// # Returns
/// The channel error if there was one, otherwise the connection close result
async fn close_in_order<F, Fut>(
    channel: &dyn BrokerChannel,
    close_connection: F,
) -> Result<(), AmqpError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), AmqpError>>,
{
    let channel_closed = channel.close().await;
    let connection_closed = close_connection().await;
    channel_closed.and(connection_closed)
}

/// The shared connection and channel, with the facts recorded when it was opened.
pub struct BrokerHandle {
    transport: Box<dyn Transport>,
    pid: u32,
    configs: RabbitMQConfigs,
}

impl BrokerHandle {
    /// Returns the channel shared by every service built on this handle.
    ///
    /// # Returns
    /// The same channel on every call; it is never reopened
    pub fn channel(&self) -> Arc<dyn BrokerChannel> {
        self.transport.channel()
    }

    /// True while the connection and the channel are both open.
    ///
    /// `ConnectionManager::acquire` replaces a handle once this turns false.
    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Process id of the process that opened the connection.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether payloads and connection details are logged.
    pub fn debug(&self) -> bool {
        self.configs.debug
    }

    /// Configuration the handle was created from.
    pub fn configs(&self) -> &RabbitMQConfigs {
        &self.configs
    }

    /// Closes the channel, then the connection.
    ///
    /// This leaves the manager's slot alone; use `ConnectionManager::close`
    /// to allow a later acquisition to reconnect.
    pub async fn close(&self) -> Result<(), AmqpError> {
        self.transport.close().await
    }
}

impl std::fmt::Debug for BrokerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerHandle")
            .field("open", &self.is_open())
            .field("pid", &self.pid)
            .field("debug", &self.configs.debug)
            .finish()
    }
}

/// Outcome of an acquisition attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionResult {
    pub connected: bool,
    pub new_instance: bool,
    pub message: String,
    pub error: Option<AmqpError>,
    pub pid: Option<u32>,
    pub debug: bool,
}

impl ConnectionResult {
    fn unavailable(debug: bool) -> Self {
        ConnectionResult {
            connected: false,
            message: AmqpError::BrokerUnavailable.to_string(),
            error: Some(AmqpError::BrokerUnavailable),
            debug,
            ..Default::default()
        }
    }

    fn failed(err: AmqpError, debug: bool) -> Self {
        ConnectionResult {
            connected: false,
            message: err.to_string(),
            error: Some(err),
            debug,
            ..Default::default()
        }
    }
}

/// Owns the single `BrokerHandle` and serializes access to it.
pub struct ConnectionManager {
    connector: Box<dyn Connector>,
    slot: Mutex<Option<Arc<BrokerHandle>>>,
}

impl ConnectionManager {
    /// Creates an empty manager that dials through `connector`.
    pub fn new(connector: impl Connector + 'static) -> Self {
        ConnectionManager {
            connector: Box::new(connector),
            slot: Mutex::new(None),
        }
    }

    /// Returns the shared handle, connecting on first use.
    ///
    /// A disabled config never dials. An open handle is returned as is,
    /// whatever config is passed; a handle that has been closed, by
    /// `BrokerHandle::close` or by the broker, is dropped from the slot and
    /// replaced by a new connection. A failed connection leaves the slot empty.
    ///
    /// # Parameters
    /// * `cfg` - Connection settings, used only when a new connection is opened
    ///
    /// # Returns
    /// The handle (`None` when disabled or on failure) and the outcome report
    pub async fn acquire(
        &self,
        cfg: &RabbitMQConfigs,
    ) -> (Option<Arc<BrokerHandle>>, ConnectionResult) {
        if !cfg.enabled {
            return (None, ConnectionResult::unavailable(cfg.debug));
        }

        let mut slot = self.slot.lock().await;

        if let Some(handle) = slot.as_ref() {
            if handle.is_open() {
                let result = ConnectionResult {
                    connected: true,
                    new_instance: false,
                    message: "connection reused".to_owned(),
                    pid: Some(handle.pid),
                    debug: cfg.debug,
                    ..Default::default()
                };
                return (Some(handle.clone()), result);
            }
        }

        if let Some(stale) = slot.take() {
            warn!(pid = stale.pid, "shared rabbitmq connection is closed, reconnecting");
            // whatever part is still open gets closed; closed parts are skipped
            if let Err(err) = stale.close().await {
                error!(error = err.to_string(), "error to close the stale connection");
            }
        }

        let transport = match self.connector.connect(cfg).await {
            Ok(t) => t,
            Err(err) => return (None, ConnectionResult::failed(err, cfg.debug)),
        };

        if cfg.debug {
            info!(configs = ?cfg, "rabbitmq client connection");
            info!(uri = cfg.redacted_uri(), "connected successfully to rabbitmq");
        }

        let pid = std::process::id();
        let handle = Arc::new(BrokerHandle {
            transport,
            pid,
            configs: cfg.clone(),
        });
        *slot = Some(handle.clone());

        let result = ConnectionResult {
            connected: true,
            new_instance: true,
            message: "connection established".to_owned(),
            pid: Some(pid),
            debug: cfg.debug,
            ..Default::default()
        };
        (Some(handle), result)
    }

    /// The handle currently held, if any.
    pub async fn current(&self) -> Option<Arc<BrokerHandle>> {
        self.slot.lock().await.clone()
    }

    /// Empties the slot and closes the handle it held.
    pub async fn close(&self) -> Result<(), AmqpError> {
        let handle = self.slot.lock().await.take();

        match handle {
            Some(handle) => {
                debug!(pid = handle.pid, "closing shared rabbitmq connection");
                handle.close().await
            }
            None => Ok(()),
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        ConnectionManager::new(AmqpConnector)
    }
}

static GLOBAL: OnceLock<ConnectionManager> = OnceLock::new();

/// Process-wide connection manager.
pub fn global() -> &'static ConnectionManager {
    GLOBAL.get_or_init(ConnectionManager::default)
}

/// Acquires the process-wide handle.
pub async fn acquire(cfg: &RabbitMQConfigs) -> (Option<Arc<BrokerHandle>>, ConnectionResult) {
    global().acquire(cfg).await
}

/// Closes the process-wide handle.
pub async fn close() -> Result<(), AmqpError> {
    global().close().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockBrokerChannel;
    use mockall::Sequence;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Mutex as StdMutex,
    };

    fn enabled() -> RabbitMQConfigs {
        RabbitMQConfigs {
            enabled: true,
            host: "localhost".to_owned(),
            ..Default::default()
        }
    }

    fn open_transport() -> Box<dyn Transport> {
        let mut transport = MockTransport::new();
        transport
            .expect_channel()
            .returning(|| Arc::new(MockBrokerChannel::new()) as Arc<dyn BrokerChannel>);
        transport.expect_is_open().return_const(true);
        transport.expect_close().returning(|| Ok(()));
        Box::new(transport)
    }

    #[tokio::test]
    async fn test_second_acquire_reuses_handle() {
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(|_| Ok(open_transport()));

        let manager = ConnectionManager::new(connector);

        let (first, result) = manager.acquire(&enabled()).await;
        assert!(result.connected);
        assert!(result.new_instance);
        assert_eq!(result.pid, Some(std::process::id()));
        assert!(result.error.is_none());

        let other = RabbitMQConfigs {
            host: "elsewhere".to_owned(),
            ..enabled()
        };
        let (second, result) = manager.acquire(&other).await;
        assert!(result.connected);
        assert!(!result.new_instance);

        assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
    }

    /// A transport that reports closed once `close` has run.
    fn closable_transport() -> Box<dyn Transport> {
        let open = Arc::new(AtomicBool::new(true));
        let mut transport = MockTransport::new();
        transport
            .expect_channel()
            .returning(|| Arc::new(MockBrokerChannel::new()) as Arc<dyn BrokerChannel>);
        let state = open.clone();
        transport
            .expect_is_open()
            .returning(move || state.load(Ordering::SeqCst));
        transport.expect_close().returning(move || {
            open.store(false, Ordering::SeqCst);
            Ok(())
        });
        Box::new(transport)
    }

    #[tokio::test]
    async fn test_closed_handle_is_replaced() {
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(2)
            .returning(|_| Ok(closable_transport()));

        let manager = ConnectionManager::new(connector);

        let (first, result) = manager.acquire(&enabled()).await;
        assert!(result.new_instance);
        let first = first.unwrap();
        first.close().await.unwrap();
        assert!(!first.is_open());

        let (second, result) = manager.acquire(&enabled()).await;
        assert!(result.connected);
        assert!(result.new_instance);
        assert_eq!(result.message, "connection established");

        let second = second.unwrap();
        assert!(second.is_open());
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&second, &manager.current().await.unwrap()));
    }

    #[tokio::test]
    async fn test_connection_closed_after_channel() {
        let calls = Arc::new(StdMutex::new(vec![]));

        let mut channel = MockBrokerChannel::new();
        let log = calls.clone();
        channel.expect_close().times(1).returning(move || {
            log.lock().unwrap().push("channel");
            Ok(())
        });

        let log = calls.clone();
        close_in_order(&channel, || async move {
            log.lock().unwrap().push("connection");
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["channel", "connection"]);
    }

    #[tokio::test]
    async fn test_connection_closed_when_channel_close_fails() {
        let mut channel = MockBrokerChannel::new();
        channel
            .expect_close()
            .times(1)
            .returning(|| Err(AmqpError::CloseError("channel gone".to_owned())));

        let connection_closed = Arc::new(AtomicBool::new(false));
        let flag = connection_closed.clone();
        let err = close_in_order(&channel, || async move {
            flag.store(true, Ordering::SeqCst);
            Err(AmqpError::CloseError("connection gone".to_owned()))
        })
        .await
        .unwrap_err();

        assert!(connection_closed.load(Ordering::SeqCst));
        assert_eq!(err, AmqpError::CloseError("channel gone".to_owned()));
    }

    #[tokio::test]
    async fn test_disabled_never_dials() {
        let mut connector = MockConnector::new();
        connector.expect_connect().never();

        let manager = ConnectionManager::new(connector);
        let (handle, result) = manager.acquire(&RabbitMQConfigs::default()).await;

        assert!(handle.is_none());
        assert!(!result.connected);
        assert_eq!(result.message, "broker unavailable");
        assert_eq!(result.error, Some(AmqpError::BrokerUnavailable));
        assert!(manager.current().await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_wins_over_existing_handle() {
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(|_| Ok(open_transport()));

        let manager = ConnectionManager::new(connector);
        let _ = manager.acquire(&enabled()).await;

        let (handle, result) = manager.acquire(&RabbitMQConfigs::default()).await;
        assert!(handle.is_none());
        assert!(!result.connected);
    }

    #[tokio::test]
    async fn test_failed_connect_is_not_retained() {
        let mut connector = MockConnector::new();
        let mut seq = Sequence::new();
        connector
            .expect_connect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(AmqpError::ConnectionError("connection refused".to_owned())));
        connector
            .expect_connect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(open_transport()));

        let manager = ConnectionManager::new(connector);

        let (handle, result) = manager.acquire(&enabled()).await;
        assert!(handle.is_none());
        assert!(!result.connected);
        assert_eq!(
            result.error,
            Some(AmqpError::ConnectionError("connection refused".to_owned()))
        );
        assert_eq!(result.message, "failure to connect: connection refused");

        let (handle, result) = manager.acquire(&enabled()).await;
        assert!(handle.is_some());
        assert!(result.new_instance);
    }

    #[tokio::test]
    async fn test_close_clears_slot() {
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(2)
            .returning(|_| Ok(open_transport()));

        let manager = ConnectionManager::new(connector);

        let (first, _) = manager.acquire(&enabled()).await;
        manager.close().await.unwrap();
        assert!(manager.current().await.is_none());

        let (second, result) = manager.acquire(&enabled()).await;
        assert!(result.new_instance);
        assert!(!Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
    }

    #[tokio::test]
    async fn test_close_without_handle_is_noop() {
        let manager = ConnectionManager::new(MockConnector::new());
        assert!(manager.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_acquire_dials_once() {
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(|_| Ok(open_transport()));

        let manager = Arc::new(ConnectionManager::new(connector));
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.acquire(&enabled()).await.1 })
            })
            .collect();

        let mut fresh = 0;
        for task in tasks {
            let result = task.await.unwrap();
            assert!(result.connected);
            if result.new_instance {
                fresh += 1;
            }
        }
        assert_eq!(fresh, 1);
    }
}
