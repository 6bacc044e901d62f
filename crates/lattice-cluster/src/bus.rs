//! Per-instance work queues on RabbitMQ.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::sync::mpsc;
use tracing::warn;

use lattice_core::{Acknowledge, ClusterError, ClusterResult, Delivery, MessageBus};

/// Persistent delivery mode per the AMQP 0.9.1 basic class.
const PERSISTENT: u8 = 2;

/// Message bus backed by one durable RabbitMQ queue per instance.
///
/// Queues are named by the owning instance's address, declared durable,
/// non-exclusive and non-auto-delete on both the publish and consume paths,
/// so either side may come up first.
pub struct AmqpBus {
    // The connection owns the socket; channels stay valid only while it lives.
    connection: Connection,
    publish_channel: Channel,
}

impl AmqpBus {
    /// Dials the broker and opens the shared publish channel. Fatal at
    /// startup when it fails.
    pub async fn connect(url: &str) -> ClusterResult<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(ClusterError::broker)?;
        let publish_channel = connection
            .create_channel()
            .await
            .map_err(ClusterError::broker)?;
        Ok(Self {
            connection,
            publish_channel,
        })
    }

    async fn declare_queue(channel: &Channel, queue: &str) -> ClusterResult<()> {
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(ClusterError::broker)?;
        Ok(())
    }
}

#[async_trait]
impl MessageBus for AmqpBus {
    async fn publish(&self, queue: &str, payload: &[u8]) -> ClusterResult<()> {
        Self::declare_queue(&self.publish_channel, queue).await?;
        self.publish_channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_delivery_mode(PERSISTENT)
                    .with_content_type("text/plain".into()),
            )
            .await
            .map_err(ClusterError::broker)?
            .await
            .map_err(ClusterError::broker)?;
        Ok(())
    }

    async fn consume(&self, queue: &str) -> ClusterResult<mpsc::Receiver<Delivery>> {
        // Dedicated channel so prefetch applies to this consumer alone.
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(ClusterError::broker)?;
        Self::declare_queue(&channel, queue).await?;
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(ClusterError::broker)?;
        let mut consumer = channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(ClusterError::broker)?;

        // Capacity 1 keeps the broker's prefetch window honest: at most one
        // delivery parked here while the hub works on the previous one.
        let (tx, rx) = mpsc::channel(1);
        let queue_name = queue.to_string();
        tokio::spawn(async move {
            // Channel handle must outlive the consumer stream.
            let _channel = channel;
            while let Some(attempt) = consumer.next().await {
                match attempt {
                    Ok(delivery) => {
                        let handoff =
                            Delivery::with_acker(delivery.data, Box::new(AmqpAck(delivery.acker)));
                        if tx.send(handoff).await.is_err() {
                            return;
                        }
                    }
                    Err(error) => {
                        warn!(queue = %queue_name, %error, "consumer stream failed");
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

struct AmqpAck(lapin::acker::Acker);

#[async_trait]
impl Acknowledge for AmqpAck {
    async fn ack(self: Box<Self>) -> ClusterResult<()> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map_err(ClusterError::broker)
    }
}
