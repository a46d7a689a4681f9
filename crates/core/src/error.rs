use std::future::Future;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("remote call failed: {0}")]
    TransientRemote(String),
    #[error("remote call rejected: {0}")]
    RemoteRejected(String),
    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),
    #[error("rate limited")]
    RateLimited,
    #[error("callback {0} already processed")]
    DuplicateCallback(String),
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("shutting down")]
    Shutdown,
}

impl SyncError {
    /// Errors a later attempt may clear without anyone changing data.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::TransientRemote(_) | SyncError::Timeout(_) | SyncError::Storage(_)
        )
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Runs a remote call under a deadline; an expired deadline becomes
/// `SyncError::Timeout`.
pub async fn within<T, F>(limit: Duration, fut: F) -> SyncResult<T>
where
    F: Future<Output = SyncResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SyncError::TransientRemote("503".into()).is_transient());
        assert!(SyncError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(SyncError::Storage("pool closed".into()).is_transient());
        assert!(!SyncError::NotFound("design des_1".into()).is_transient());
        assert!(!SyncError::InvariantViolation("two active".into()).is_transient());
        assert!(!SyncError::RemoteRejected("400".into()).is_transient());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            SyncError::NotFound("customer cus_1".into()).to_string(),
            "customer cus_1 not found"
        );
        assert_eq!(SyncError::RateLimited.to_string(), "rate limited");
    }

    #[tokio::test(start_paused = true)]
    async fn test_within_times_out() {
        let result: SyncResult<()> = within(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(SyncError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_within_passes_result_through() {
        let result = within(Duration::from_secs(1), async { Ok::<_, SyncError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
