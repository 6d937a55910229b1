//! Short numeric one-time codes bound to a phone number or email address.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use thiserror::Error;

use super::redis::{EphemeralStore, StoreError};
use crate::config::ConsumptionPolicy;

pub const OTP_KEY_PREFIX: &str = "otp";

#[derive(Debug, Error)]
pub enum OtpError {
    #[error("No live code for this target")]
    NotFound,

    #[error("Code does not match")]
    Mismatch,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type CodeGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Uniform over 1000..=9999.
pub fn random_code() -> String {
    rand::thread_rng().gen_range(1000..=9999).to_string()
}

#[derive(Clone)]
pub struct OtpStore {
    store: Arc<dyn EphemeralStore>,
    ttl: Duration,
    policy: ConsumptionPolicy,
    generator: CodeGenerator,
}

impl OtpStore {
    pub fn new(store: Arc<dyn EphemeralStore>, ttl: Duration, policy: ConsumptionPolicy) -> Self {
        Self {
            store,
            ttl,
            policy,
            generator: Arc::new(random_code),
        }
    }

    pub fn with_generator(mut self, generator: CodeGenerator) -> Self {
        self.generator = generator;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn key(target: &str) -> String {
        format!("{}:{}", OTP_KEY_PREFIX, target)
    }

    /// Stores a fresh code for `target`, replacing any live one, and returns it
    /// for out-of-band delivery.
    pub async fn issue(&self, target: &str) -> Result<String, OtpError> {
        let code = (self.generator)();
        self.store.set(&Self::key(target), &code, self.ttl).await?;
        tracing::debug!(ttl_secs = self.ttl.as_secs(), "One-time code stored");
        Ok(code)
    }

    /// Under `ConsumptionPolicy::Reusable` a matching code stays live until its
    /// TTL elapses.
    pub async fn verify(&self, target: &str, supplied: &str) -> Result<(), OtpError> {
        let key = Self::key(target);
        let stored = self.store.get(&key).await?.ok_or(OtpError::NotFound)?;

        let matches: bool = stored.as_bytes().ct_eq(supplied.as_bytes()).into();
        if !matches {
            return Err(OtpError::Mismatch);
        }

        if self.policy.is_single_use() && !self.store.delete_if_eq(&key, &stored).await? {
            return Err(OtpError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::redis::InMemoryStore;
    use async_trait::async_trait;

    /// Yields between the read and the caller's next step, like a remote store.
    struct YieldingStore(InMemoryStore);

    #[async_trait]
    impl EphemeralStore for YieldingStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            let value = self.0.get(key).await;
            tokio::task::yield_now().await;
            value
        }
        async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
            self.0.set(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.0.delete(key).await
        }
        async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
            self.0.delete_if_eq(key, expected).await
        }
        async fn health_check(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn otp_store(policy: ConsumptionPolicy) -> OtpStore {
        OtpStore::new(Arc::new(InMemoryStore::new()), Duration::from_secs(300), policy)
    }

    #[test]
    fn test_random_code_is_four_digits() {
        for _ in 0..200 {
            let code: u32 = random_code().parse().unwrap();
            assert!((1000..=9999).contains(&code));
        }
    }

    #[test]
    fn test_key_is_namespaced_by_target() {
        assert_eq!(OtpStore::key("+15551234567"), "otp:+15551234567");
    }

    #[tokio::test]
    async fn test_issue_then_verify() {
        let otp = otp_store(ConsumptionPolicy::Reusable)
            .with_generator(Arc::new(|| "4821".to_string()));
        let code = otp.issue("+15551234567").await.unwrap();
        assert_eq!(code, "4821");

        otp.verify("+15551234567", "4821").await.unwrap();
        assert!(matches!(
            otp.verify("+15551234567", "0000").await,
            Err(OtpError::Mismatch)
        ));
    }

    #[tokio::test]
    async fn test_unissued_target_is_not_found() {
        let otp = otp_store(ConsumptionPolicy::Reusable);
        assert!(matches!(
            otp.verify("+15550000000", "1234").await,
            Err(OtpError::NotFound)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_code_expires_after_ttl() {
        let otp = otp_store(ConsumptionPolicy::Reusable);
        let code = otp.issue("jane@example.com").await.unwrap();
        tokio::time::advance(Duration::from_secs(300)).await;
        assert!(matches!(
            otp.verify("jane@example.com", &code).await,
            Err(OtpError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_reissue_replaces_live_code() {
        let codes = Arc::new(std::sync::Mutex::new(vec!["2222", "1111"]));
        let otp = otp_store(ConsumptionPolicy::Reusable).with_generator(Arc::new(move || {
            codes.lock().unwrap().pop().unwrap_or("9999").to_string()
        }));

        assert_eq!(otp.issue("+15551234567").await.unwrap(), "1111");
        assert_eq!(otp.issue("+15551234567").await.unwrap(), "2222");
        assert!(matches!(
            otp.verify("+15551234567", "1111").await,
            Err(OtpError::Mismatch)
        ));
        otp.verify("+15551234567", "2222").await.unwrap();
    }

    #[tokio::test]
    async fn test_reusable_code_verifies_repeatedly() {
        let otp = otp_store(ConsumptionPolicy::Reusable);
        let code = otp.issue("+15551234567").await.unwrap();
        otp.verify("+15551234567", &code).await.unwrap();
        otp.verify("+15551234567", &code).await.unwrap();
    }

    #[tokio::test]
    async fn test_single_use_code_is_consumed() {
        let otp = otp_store(ConsumptionPolicy::SingleUse);
        let code = otp.issue("+15551234567").await.unwrap();
        otp.verify("+15551234567", &code).await.unwrap();
        assert!(matches!(
            otp.verify("+15551234567", &code).await,
            Err(OtpError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_mismatch_does_not_consume_single_use_code() {
        let otp = otp_store(ConsumptionPolicy::SingleUse)
            .with_generator(Arc::new(|| "4821".to_string()));
        otp.issue("+15551234567").await.unwrap();
        assert!(otp.verify("+15551234567", "0000").await.is_err());
        otp.verify("+15551234567", "4821").await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_single_use_verification_succeeds_once() {
        let otp = OtpStore::new(
            Arc::new(YieldingStore(InMemoryStore::new())),
            Duration::from_secs(300),
            ConsumptionPolicy::SingleUse,
        );
        let code = otp.issue("+15551234567").await.unwrap();

        let (first, second) = tokio::join!(
            otp.verify("+15551234567", &code),
            otp.verify("+15551234567", &code)
        );
        assert!(first.is_ok() ^ second.is_ok());
        assert!(matches!(
            if first.is_err() { first } else { second },
            Err(OtpError::NotFound)
        ));
    }
}
