use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: usize,
    pub failed: usize,
}

/// Sends to every recipient in order, pausing `delay` between sends. A failed
/// delivery is logged and counted; it never stops the loop.
pub async fn broadcast<F, Fut, E>(recipients: &[i64], delay: Duration, mut send: F) -> BroadcastReport
where
    F: FnMut(i64) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let mut report = BroadcastReport::default();
    for (index, recipient) in recipients.iter().enumerate() {
        if index > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match send(*recipient).await {
            Ok(()) => report.sent += 1,
            Err(err) => {
                warn!("Broadcast to {} failed: {}", recipient, err);
                report.failed += 1;
            }
        }
    }
    info!(
        "Broadcast finished: sent={} failed={}",
        report.sent, report.failed
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn failures_are_counted_without_aborting() {
        let attempted = Mutex::new(Vec::new());
        let report = broadcast(&[1, 2, 3, 4], Duration::ZERO, |id| {
            attempted.lock().push(id);
            async move {
                if id == 2 {
                    Err("blocked by user")
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert_eq!(report, BroadcastReport { sent: 3, failed: 1 });
        assert_eq!(*attempted.lock(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn empty_audience_sends_nothing() {
        let report = broadcast(&[], Duration::from_millis(5), |_| async { Ok::<(), String>(()) }).await;
        assert_eq!(report, BroadcastReport::default());
    }
}
