use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Headers, Message as _};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use tracing::info;

use super::{Message, MessageSink, MessageSource, StreamError};
use crate::config::{KafkaConfig, SaslMechanism};

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

fn client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client.set("bootstrap.servers", &config.bootstrap_servers);
    if let (Some(username), Some(password)) = (&config.client_id, &config.client_secret) {
        let mechanism = match config.sasl_mechanism {
            SaslMechanism::Plain => "PLAIN",
            SaslMechanism::Scram => "SCRAM-SHA-512",
        };
        client
            .set("security.protocol", "SASL_SSL")
            .set("sasl.mechanism", mechanism)
            .set("sasl.username", username)
            .set("sasl.password", password);
    }
    client
}

/// Consumer-group member with manual commits.
pub struct KafkaSource {
    consumer: StreamConsumer,
}

impl KafkaSource {
    pub fn connect(config: &KafkaConfig) -> Result<Self, StreamError> {
        let consumer: StreamConsumer = client_config(config)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;
        consumer.subscribe(&[config.topic.as_str()])?;
        info!(
            topic = %config.topic,
            group_id = %config.group_id,
            "subscribed to event stream"
        );
        Ok(Self { consumer })
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    async fn fetch_next(&self) -> Result<Message, StreamError> {
        let fetched = self.consumer.recv().await?;
        let headers = fetched
            .headers()
            .map(|headers| {
                headers
                    .iter()
                    .map(|header| {
                        (
                            header.key.to_string(),
                            header.value.map(<[u8]>::to_vec).unwrap_or_default(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Message {
            topic: fetched.topic().to_string(),
            partition: fetched.partition(),
            offset: fetched.offset(),
            key: fetched.key().map(<[u8]>::to_vec).unwrap_or_default(),
            value: fetched.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            headers,
        })
    }

    async fn commit(&self, message: &Message) -> Result<(), StreamError> {
        // the committed position is the next offset to read
        let mut offsets = TopicPartitionList::new();
        offsets.add_partition_offset(
            &message.topic,
            message.partition,
            Offset::Offset(message.offset + 1),
        )?;
        self.consumer.commit(&offsets, CommitMode::Async)?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StreamError> {
        self.consumer.unsubscribe();
        Ok(())
    }
}

pub struct KafkaSink {
    producer: FutureProducer,
    topic: String,
}

impl KafkaSink {
    pub fn connect(config: &KafkaConfig) -> Result<Self, StreamError> {
        let producer: FutureProducer = client_config(config).create()?;
        Ok(Self {
            producer,
            topic: config.topic.clone(),
        })
    }
}

#[async_trait]
impl MessageSink for KafkaSink {
    async fn write(&self, key: &[u8], value: &[u8]) -> Result<(), StreamError> {
        let record = FutureRecord::to(&self.topic).key(key).payload(value);
        self.producer
            .send(record, SEND_TIMEOUT)
            .await
            .map(|_| ())
            .map_err(|(err, _)| StreamError::Kafka(err))
    }

    async fn close(&self) -> Result<(), StreamError> {
        use rdkafka::producer::Producer;
        self.producer.flush(SEND_TIMEOUT)?;
        Ok(())
    }
}
