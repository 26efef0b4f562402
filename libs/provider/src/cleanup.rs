//! Release-on-failure scopes for partially created resources.

use std::future::Future;

use tracing::{info, warn};

use crate::error::Result;

/// Run `work`; if it fails, run `cleanup` before returning the error.
///
/// Cleanup failures are logged and never replace the original error.
pub async fn with_cleanup<T, W, C, CFut>(resource: &str, work: W, cleanup: C) -> Result<T>
where
    W: Future<Output = Result<T>>,
    C: FnOnce() -> CFut,
    CFut: Future<Output = Result<()>>,
{
    match work.await {
        Ok(value) => Ok(value),
        Err(err) => {
            info!(resource = %resource, error = %err, "Releasing partially created resource");
            if let Err(cleanup_err) = cleanup().await {
                warn!(
                    resource = %resource,
                    error = %cleanup_err,
                    "Cleanup failed"
                );
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::error::FleetError;

    #[tokio::test]
    async fn test_success_skips_cleanup() {
        let cleaned = AtomicBool::new(false);
        let value = with_cleanup("vm", async { Ok(7) }, || async {
            cleaned.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert!(!cleaned.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failure_runs_cleanup_and_keeps_error() {
        let cleaned = AtomicBool::new(false);
        let result: Result<()> = with_cleanup(
            "vm",
            async { Err(FleetError::provision("bootstrap failed")) },
            || async {
                cleaned.store(true, Ordering::SeqCst);
                Err(FleetError::Configuration("engine gone".into()))
            },
        )
        .await;

        assert!(cleaned.load(Ordering::SeqCst));
        assert!(matches!(result, Err(FleetError::Provision { .. })));
    }
}
