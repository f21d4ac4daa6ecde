use std::time::Duration;

use async_trait::async_trait;

use crate::error::PublishError;

/// A pub/sub transport.
///
/// `publish` resolves only once the broker has confirmed receipt (or the
/// attempt has failed); an `Ok` is an acknowledgement.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError>;

    /// `publish` bounded by `timeout`.
    ///
    /// Brokers that serialize publishes override this so that time spent
    /// queued behind another publish does not count against the attempt.
    async fn publish_within(
        &self,
        topic: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<(), PublishError> {
        match tokio::time::timeout(timeout, self.publish(topic, payload)).await {
            Ok(result) => result,
            Err(_) => Err(PublishError::Timeout(timeout)),
        }
    }

    fn name(&self) -> &str {
        "broker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    #[async_trait]
    impl Broker for Silent {
        async fn publish(&self, _topic: &str, _payload: &[u8]) -> Result<(), PublishError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_publish_within_times_out() {
        let timeout = Duration::from_millis(20);
        let err = Silent.publish_within("t", b"x", timeout).await.unwrap_err();
        assert_eq!(err, PublishError::Timeout(timeout));
        assert!(err.is_retryable());
    }
}
