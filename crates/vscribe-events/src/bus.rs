//! Event bus client over Redis Streams.
//!
//! Topics map to streams, durable named queues map to consumer groups, and
//! prefetch-1 delivery is enforced by reading one message per subscription
//! at a time and awaiting the handler inline. A failed handler leaves the
//! message pending (the Streams analogue of nack-with-requeue); stale
//! pending messages are reclaimed for redelivery, and after a bounded number
//! of failed deliveries the message is moved to the dead-letter stream.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vscribe_models::{
    bound_payload, JobId, JobKind, JobStatus, JobStatusChanged, SummaryCreated,
    TranscriptionCreated, VideoCreated, TOPIC_JOB_STATUS_CHANGED, TOPIC_SUMMARY_CREATED,
    TOPIC_TRANSCRIPTION_CREATED, TOPIC_VIDEO_CREATED,
};

use crate::error::{EventBusError, EventBusResult};

/// Handler invoked for each delivered event payload.
pub type EventHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// How many entries each event stream retains (approximate trim on publish).
const STREAM_MAX_LEN: usize = 10_000;

/// Event bus configuration.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Redis URL
    pub redis_url: String,
    /// Connection/publish attempts before giving up
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
    /// Stream key prefix, one stream per topic
    pub stream_prefix: String,
    /// Dead letter stream for poison messages
    pub dead_letter_stream: String,
    /// Failed deliveries before a message is dead-lettered
    pub max_redelivery: u32,
    /// Idle time before a pending message is reclaimed for redelivery
    pub claim_min_idle: Duration,
    /// Sleep between empty consume passes
    pub idle_sleep: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            stream_prefix: "vscribe:events".to_string(),
            dead_letter_stream: "vscribe:events:dead".to_string(),
            max_redelivery: 5,
            claim_min_idle: Duration::from_secs(60),
            idle_sleep: Duration::from_millis(500),
        }
    }
}

impl EventBusConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            max_attempts: std::env::var("EVENTS_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_attempts),
            retry_delay: Duration::from_secs(
                std::env::var("EVENTS_RETRY_DELAY_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.retry_delay.as_secs()),
            ),
            max_redelivery: std::env::var("EVENTS_MAX_REDELIVERY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_redelivery),
            claim_min_idle: Duration::from_secs(
                std::env::var("EVENTS_CLAIM_MIN_IDLE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.claim_min_idle.as_secs()),
            ),
            ..defaults
        }
    }
}

/// Derive a stable queue (consumer group) name from a topic.
pub fn derive_queue_name(topic: &str) -> String {
    format!("{}_queue", topic.replace('.', "_"))
}

#[derive(Clone)]
struct Subscription {
    topic: String,
    stream: String,
    group: String,
    handler: EventHandler,
}

/// Durable pub/sub client.
///
/// Constructed once per process and passed down (`Arc`); connection churn is
/// hidden behind `publish`/`start_consuming`.
pub struct EventBus {
    client: redis::Client,
    config: EventBusConfig,
    conn: Mutex<Option<MultiplexedConnection>>,
    subscriptions: Mutex<Vec<Subscription>>,
    consumer_name: String,
    stop_tx: watch::Sender<bool>,
}

impl EventBus {
    /// Create a new event bus client. Does not connect.
    pub fn new(config: EventBusConfig) -> EventBusResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let (stop_tx, _) = watch::channel(false);
        Ok(Self {
            client,
            config,
            conn: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
            consumer_name: format!("consumer-{}", Uuid::new_v4()),
            stop_tx,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> EventBusResult<Self> {
        Self::new(EventBusConfig::from_env())
    }

    fn stream_key(&self, topic: &str) -> String {
        format!("{}:{}", self.config.stream_prefix, topic)
    }

    /// Establish a connection. Idempotent: reuses an open connection.
    ///
    /// Attempts are bounded with a fixed inter-attempt delay; exhaustion is
    /// fatal for this call, not for the process.
    pub async fn connect(&self) -> EventBusResult<()> {
        self.connection().await.map(|_| ())
    }

    async fn connection(&self) -> EventBusResult<MultiplexedConnection> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let mut reason = String::new();
        for attempt in 1..=self.config.max_attempts {
            match self.client.get_multiplexed_async_connection().await {
                Ok(conn) => {
                    info!("Connected to event bus at {}", self.config.redis_url);
                    *guard = Some(conn.clone());
                    return Ok(conn);
                }
                Err(e) => {
                    warn!(
                        "Event bus connection attempt {}/{} failed: {}",
                        attempt, self.config.max_attempts, e
                    );
                    reason = e.to_string();
                    if attempt < self.config.max_attempts {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        Err(EventBusError::ConnectionFailed {
            attempts: self.config.max_attempts,
            reason,
        })
    }

    /// Best-effort close. Always clears connection state so a subsequent
    /// `connect()` retries cleanly.
    pub async fn close(&self) {
        let mut guard = self.conn.lock().await;
        if guard.take().is_some() {
            info!("Closed event bus connection");
        }
    }

    /// Publish a persistent event on `topic`.
    ///
    /// The payload is size-bounded before serialization. Any transport
    /// failure force-closes the connection and retries up to the attempt
    /// bound; the final failure is surfaced so the caller can degrade to
    /// polling.
    pub async fn publish<T: Serialize>(&self, topic: &str, payload: &T) -> EventBusResult<()> {
        let mut value = serde_json::to_value(payload)?;
        bound_payload(&mut value);
        let body = serde_json::to_string(&value)?;
        let stream = self.stream_key(topic);

        let mut reason = String::new();
        for attempt in 1..=self.config.max_attempts {
            match self.try_publish(&stream, topic, &body).await {
                Ok(message_id) => {
                    debug!("Published event {} as {}", topic, message_id);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Publish of {} failed (attempt {}/{}): {}",
                        topic, attempt, self.config.max_attempts, e
                    );
                    reason = e.to_string();
                    // Force reconnection on the next attempt
                    self.close().await;
                    if attempt < self.config.max_attempts {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        Err(EventBusError::PublishFailed {
            topic: topic.to_string(),
            attempts: self.config.max_attempts,
            reason,
        })
    }

    async fn try_publish(
        &self,
        stream: &str,
        topic: &str,
        body: &str,
    ) -> EventBusResult<String> {
        let mut conn = self.connection().await?;
        let message_id: String = redis::cmd("XADD")
            .arg(stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(STREAM_MAX_LEN)
            .arg("*")
            .arg("topic")
            .arg(topic)
            .arg("payload")
            .arg(body)
            .query_async(&mut conn)
            .await?;
        Ok(message_id)
    }

    /// Declare a durable queue bound to `topic` and register a handler.
    ///
    /// The queue name defaults to a stable derivation from the topic, so
    /// redeclaration across restarts is idempotent. Delivery starts when
    /// `start_consuming` runs.
    pub async fn subscribe<F>(
        &self,
        topic: &str,
        handler: F,
        queue_name: Option<&str>,
    ) -> EventBusResult<()>
    where
        F: Fn(Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    {
        let group = queue_name
            .map(str::to_string)
            .unwrap_or_else(|| derive_queue_name(topic));
        let stream = self.stream_key(topic);

        let mut conn = self.connection().await?;
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&stream)
            .arg(&group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created queue {} for topic {}", group, topic),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Queue {} already exists for topic {}", group, topic);
            }
            Err(e) => {
                return Err(EventBusError::SubscribeFailed {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                })
            }
        }

        self.subscriptions.lock().await.push(Subscription {
            topic: topic.to_string(),
            stream,
            group,
            handler: Arc::new(handler),
        });

        info!("Subscribed to topic {} on queue", topic);
        Ok(())
    }

    /// Consume messages until `stop_consuming` is called.
    ///
    /// Exits with the connection closed, never half-open. Transport errors
    /// inside the loop are logged and retried after a delay; they do not
    /// kill the consumer.
    pub async fn start_consuming(&self) -> EventBusResult<()> {
        self.stop_tx.send_replace(false);
        let mut stop_rx = self.stop_tx.subscribe();

        let subs = self.subscriptions.lock().await.clone();
        if subs.is_empty() {
            warn!("start_consuming called with no subscriptions");
            return Ok(());
        }

        info!(
            "Consuming {} subscriptions as {}",
            subs.len(),
            self.consumer_name
        );

        loop {
            if *stop_rx.borrow() {
                break;
            }

            let mut delivered = false;
            for sub in &subs {
                match self.read_one(sub).await {
                    Ok(true) => delivered = true,
                    Ok(false) => {}
                    Err(e) => {
                        error!("Error consuming {}: {}", sub.topic, e);
                        self.close().await;
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }

                match self.redeliver_stale(sub).await {
                    Ok(true) => delivered = true,
                    Ok(false) => {}
                    Err(e) => warn!("Error reclaiming pending on {}: {}", sub.topic, e),
                }
            }

            if !delivered {
                tokio::select! {
                    _ = stop_rx.changed() => {}
                    _ = tokio::time::sleep(self.config.idle_sleep) => {}
                }
            }
        }

        self.close().await;
        info!("Stopped consuming");
        Ok(())
    }

    /// Request a cooperative stop of the consume loop.
    pub fn stop_consuming(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Read and handle at most one new message for a subscription.
    async fn read_one(&self, sub: &Subscription) -> EventBusResult<bool> {
        let mut conn = self.connection().await?;
        let reply: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&sub.group)
            .arg(&self.consumer_name)
            .arg("COUNT")
            .arg(1usize)
            .arg("BLOCK")
            .arg(100usize)
            .arg("STREAMS")
            .arg(&sub.stream)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let mut handled = false;
        for key in reply.keys {
            for entry in key.ids {
                let raw = payload_field(&entry);
                self.deliver(sub, &entry.id, raw).await?;
                handled = true;
            }
        }
        Ok(handled)
    }

    /// Reclaim one stale pending message and redeliver it.
    ///
    /// Covers both handler failures within this process and messages left
    /// behind by a crashed consumer.
    async fn redeliver_stale(&self, sub: &Subscription) -> EventBusResult<bool> {
        let mut conn = self.connection().await?;
        let min_idle_ms = self.config.claim_min_idle.as_millis() as u64;

        let pending: redis::streams::StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&sub.stream)
            .arg(&sub.group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(1usize)
            .query_async(&mut conn)
            .await?;

        for stale in pending.ids {
            let claim: redis::streams::StreamClaimReply = redis::cmd("XCLAIM")
                .arg(&sub.stream)
                .arg(&sub.group)
                .arg(&self.consumer_name)
                .arg(min_idle_ms)
                .arg(&stale.id)
                .query_async(&mut conn)
                .await?;

            for entry in claim.ids {
                debug!("Reclaimed pending message {} on {}", entry.id, sub.topic);
                let raw = payload_field(&entry);
                self.deliver(sub, &entry.id, raw).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Invoke the handler and settle the message: ack on success, leave
    /// pending on failure, dead-letter once redelivery is exhausted.
    async fn deliver(
        &self,
        sub: &Subscription,
        message_id: &str,
        raw: Option<String>,
    ) -> EventBusResult<()> {
        let outcome = match raw.as_deref() {
            Some(body) => match serde_json::from_str::<Value>(body) {
                Ok(value) => (sub.handler)(value).await,
                Err(e) => Err(anyhow::anyhow!("malformed event payload: {e}")),
            },
            None => Err(anyhow::anyhow!("message missing payload field")),
        };

        match outcome {
            Ok(()) => {
                self.ack(sub, message_id).await?;
                debug!("Acknowledged {} on {}", message_id, sub.topic);
            }
            Err(e) => {
                warn!(
                    "Handler for {} failed on message {}: {:#}",
                    sub.topic, message_id, e
                );
                let deliveries = self.increment_redelivery(sub, message_id).await?;
                if deliveries >= self.config.max_redelivery {
                    self.dead_letter(sub, message_id, raw.as_deref().unwrap_or(""), &e.to_string())
                        .await?;
                }
                // Otherwise the message stays pending and is reclaimed after
                // the min-idle window.
            }
        }
        Ok(())
    }

    async fn ack(&self, sub: &Subscription, message_id: &str) -> EventBusResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("XACK")
            .arg(&sub.stream)
            .arg(&sub.group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;
        // No XDEL: other queues may still be bound to this topic. The stream
        // is trimmed on publish instead.
        let retry_key = self.redelivery_key(sub, message_id);
        let _: Result<(), redis::RedisError> = conn.del(&retry_key).await;
        Ok(())
    }

    fn redelivery_key(&self, sub: &Subscription, message_id: &str) -> String {
        format!(
            "{}:retry:{}:{}",
            self.config.stream_prefix, sub.group, message_id
        )
    }

    async fn increment_redelivery(
        &self,
        sub: &Subscription,
        message_id: &str,
    ) -> EventBusResult<u32> {
        let mut conn = self.connection().await?;
        let key = self.redelivery_key(sub, message_id);
        let count: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, 86400).await?;
        Ok(count)
    }

    /// Move a poison message to the dead-letter stream and ack the original.
    async fn dead_letter(
        &self,
        sub: &Subscription,
        message_id: &str,
        payload: &str,
        error: &str,
    ) -> EventBusResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("XADD")
            .arg(&self.config.dead_letter_stream)
            .arg("*")
            .arg("topic")
            .arg(&sub.topic)
            .arg("queue")
            .arg(&sub.group)
            .arg("original_id")
            .arg(message_id)
            .arg("payload")
            .arg(payload)
            .arg("error")
            .arg(error)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(sub, message_id).await?;
        warn!(
            "Dead-lettered message {} on {} after {} deliveries: {}",
            message_id, sub.topic, self.config.max_redelivery, error
        );
        Ok(())
    }

    // Typed publish helpers for the pipeline's events.

    pub async fn publish_video_created(
        &self,
        video_id: &str,
        filename: &str,
    ) -> EventBusResult<()> {
        self.publish(
            TOPIC_VIDEO_CREATED,
            &VideoCreated {
                video_id: video_id.to_string(),
                filename: filename.to_string(),
            },
        )
        .await
    }

    pub async fn publish_transcription_created(
        &self,
        transcript_id: &str,
        video_id: &str,
    ) -> EventBusResult<()> {
        self.publish(
            TOPIC_TRANSCRIPTION_CREATED,
            &TranscriptionCreated {
                transcript_id: transcript_id.to_string(),
                video_id: video_id.to_string(),
            },
        )
        .await
    }

    pub async fn publish_summary_created(
        &self,
        summary_id: &str,
        transcript_id: &str,
    ) -> EventBusResult<()> {
        self.publish(
            TOPIC_SUMMARY_CREATED,
            &SummaryCreated {
                summary_id: summary_id.to_string(),
                transcript_id: transcript_id.to_string(),
            },
        )
        .await
    }

    pub async fn publish_job_status_changed(
        &self,
        job_type: JobKind,
        job_id: &JobId,
        status: JobStatus,
    ) -> EventBusResult<()> {
        self.publish(
            TOPIC_JOB_STATUS_CHANGED,
            &JobStatusChanged {
                job_type,
                job_id: job_id.to_string(),
                status,
            },
        )
        .await
    }
}

fn payload_field(entry: &redis::streams::StreamId) -> Option<String> {
    match entry.map.get("payload") {
        Some(redis::Value::BulkString(bytes)) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
        _ => None,
    }
}
