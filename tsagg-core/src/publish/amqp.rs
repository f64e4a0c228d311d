use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::sync::Mutex;

use crate::error::{Result, SchedulerError};

use super::Publisher;

/// AMQP (RabbitMQ) [`Publisher`]. Publishes to the default exchange with
/// the queue name as routing key, matching a plain work-queue topology.
pub struct AmqpPublisher {
    channel: Mutex<Channel>,
}

impl AmqpPublisher {
    pub async fn connect(uri: &str) -> Result<Self> {
        let connection = Connection::connect(uri, ConnectionProperties::default())
            .await
            .map_err(|e| SchedulerError::ConfigFatal(format!("amqp connect: {e}")))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| SchedulerError::ConfigFatal(format!("amqp channel: {e}")))?;
        Ok(Self {
            channel: Mutex::new(channel),
        })
    }

    async fn ensure_queue(&self, channel: &Channel, queue: &str) -> Result<()> {
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(SchedulerError::from)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Publisher for AmqpPublisher {
    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<()> {
        let channel = self.channel.lock().await;
        self.ensure_queue(&channel, queue).await?;
        channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(SchedulerError::from)?
            .await
            .map_err(SchedulerError::from)?;
        Ok(())
    }
}
