//! Feedback surface toward the UI layer
//!
//! The engine only produces notifications; presentation belongs to the
//! host app.

use tracing::debug;

/// Sink for connectivity indicators and missed-transition notifications
pub trait FeedbackNotifier: Send + Sync {
    /// Device lost connectivity; show a dismissible offline indicator
    fn show_connectivity_warning(&self);

    /// Connectivity restored; clear the indicator
    fn hide_connectivity_warning(&self);

    /// A claim was redeemed
    fn notify_finalized(&self, claim_id: &str);

    /// A claim expired before redemption
    fn notify_expired(&self, claim_id: &str);

    /// A claim was cancelled or rejected
    fn notify_rejected(&self, claim_id: &str, reason: &str);
}

/// Notifier that only logs; default for headless hosts
pub struct NoopNotifier;

impl FeedbackNotifier for NoopNotifier {
    fn show_connectivity_warning(&self) {
        debug!("Connectivity warning shown");
    }

    fn hide_connectivity_warning(&self) {
        debug!("Connectivity warning hidden");
    }

    fn notify_finalized(&self, claim_id: &str) {
        debug!(claim_id = %claim_id, "Claim finalized");
    }

    fn notify_expired(&self, claim_id: &str) {
        debug!(claim_id = %claim_id, "Claim expired");
    }

    fn notify_rejected(&self, claim_id: &str, reason: &str) {
        debug!(claim_id = %claim_id, reason = %reason, "Claim rejected");
    }
}
