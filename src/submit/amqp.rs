//! AMQP submitter with background reconnection.
//!
//! Publishes verdict payloads to a durable exchange. A watcher task listens
//! on a close-notification channel fed by the connection error callback; on
//! a broker outage it retries the connect every two seconds, re-declares the
//! exchange and swaps the connection and channel under their locks. During
//! an outage publishes fail synchronously and are not buffered: verdicts are
//! idempotent by content hash and the source event recurs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::{mpsc, Mutex};

use super::{Submitter, ROUTING_KEY};
use crate::error::Result;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Submitter publishing to a RabbitMQ exchange.
pub struct AmqpSubmitter {
    url: String,
    exchange: String,
    kind: ExchangeKind,
    sensor_id: String,
    conn: Arc<Mutex<Connection>>,
    channel: Arc<Mutex<Channel>>,
    stop_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl AmqpSubmitter {
    /// Connect to the broker, declare the exchange and start the reconnect
    /// watcher. `uri` is `host:port[/vhost]` without scheme or credentials.
    ///
    /// The exchange kind is `Fanout` in production deployments; tests use
    /// `Direct` so a consumer can bind with the routing key.
    pub async fn connect(
        uri: &str,
        user: &str,
        pass: &str,
        exchange: &str,
        kind: ExchangeKind,
        sensor_id: String,
    ) -> Result<Arc<Self>> {
        let url = format!("amqp://{user}:{pass}@{uri}");
        tracing::debug!(url = %uri, "initial connection");

        let (err_tx, err_rx) = mpsc::unbounded_channel();
        let (conn, channel) = dial(&url, exchange, kind.clone()).await?;
        register_error_hook(&conn, err_tx.clone());

        let (stop_tx, stop_rx) = mpsc::channel(1);
        let submitter = Arc::new(Self {
            url,
            exchange: exchange.to_string(),
            kind,
            sensor_id,
            conn: Arc::new(Mutex::new(conn)),
            channel: Arc::new(Mutex::new(channel)),
            stop_tx: Mutex::new(Some(stop_tx)),
        });

        tokio::spawn(reconnect_on_failure(
            submitter.clone(),
            err_tx,
            err_rx,
            stop_rx,
        ));
        Ok(submitter)
    }
}

/// Establish a connection and channel, declaring the durable exchange.
async fn dial(url: &str, exchange: &str, kind: ExchangeKind) -> Result<(Connection, Channel)> {
    let options = ConnectionProperties::default()
        .with_executor(tokio_executor_trait::Tokio::current())
        .with_reactor(tokio_reactor_trait::Tokio);
    let conn = Connection::connect(url, options).await?;
    let channel = conn.create_channel().await?;
    channel
        .exchange_declare(
            exchange,
            kind,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    tracing::debug!(exchange, "submitter established connection");
    Ok((conn, channel))
}

fn register_error_hook(conn: &Connection, err_tx: mpsc::UnboundedSender<lapin::Error>) {
    conn.on_error(move |e| {
        let _ = err_tx.send(e);
    });
}

/// Watcher task: on a connection error, retry the connect until it succeeds,
/// then swap the connection and channel for the publishers.
async fn reconnect_on_failure(
    submitter: Arc<AmqpSubmitter>,
    err_tx: mpsc::UnboundedSender<lapin::Error>,
    mut err_rx: mpsc::UnboundedReceiver<lapin::Error>,
    mut stop_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop_rx.recv() => return,
            err = err_rx.recv() => {
                let Some(err) = err else { return };
                tracing::warn!(error = %err, "message bus connection failed");
                loop {
                    tokio::select! {
                        biased;
                        _ = stop_rx.recv() => return,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                    match dial(&submitter.url, &submitter.exchange, submitter.kind.clone()).await {
                        Ok((conn, channel)) => {
                            register_error_hook(&conn, err_tx.clone());
                            {
                                let mut conn_guard = submitter.conn.lock().await;
                                *conn_guard = conn;
                            }
                            {
                                let mut chan_guard = submitter.channel.lock().await;
                                *chan_guard = channel;
                            }
                            tracing::info!("reestablished connection to message bus");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "message bus reconnect failed");
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Submitter for AmqpSubmitter {
    async fn submit(&self, payload: &[u8]) -> Result<()> {
        let mut headers = FieldTable::default();
        headers.insert(
            ShortString::from("sensor_id"),
            AMQPValue::LongString(LongString::from(self.sensor_id.clone())),
        );
        let properties = BasicProperties::default()
            .with_content_type(ShortString::from("application/json"))
            .with_headers(headers);

        let channel = self.channel.lock().await;
        let result = channel
            .basic_publish(
                &self.exchange,
                ROUTING_KEY,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await;
        drop(channel);

        match result {
            Ok(confirm) => {
                confirm.await?;
                tracing::debug!("message bus submission successful");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "message bus submission not successful");
                Err(e.into())
            }
        }
    }

    async fn finish(&self) {
        // Dropping the stop sender ends the reconnect watcher.
        self.stop_tx.lock().await.take();
        tracing::debug!("submitter closing connection");
        let conn = self.conn.lock().await;
        if let Err(e) = conn.close(0, "shutdown").await {
            tracing::debug!(error = %e, "connection close");
        }
    }
}
