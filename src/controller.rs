//! Asynchronous submission controller.
//!
//! Owns the three pieces of process-wide state behind one lock: the in-flight
//! flag, the timestamp of the last accepted submission, and the single-slot
//! result channel. A submission is either accepted (work starts on a
//! background task and the caller polls later), rejected because another
//! request is still running, or rejected because the throttle window has not
//! elapsed. The flag check and flip happen under the same guard, so two
//! submissions can never both observe an idle controller.
//!
//! The lock is only ever held for flag/slot mutation and is never held across
//! an await point.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::{GenerateError, TitleGenerator};

/// Minimum gap between two accepted submissions.
pub const MIN_SUBMIT_INTERVAL: Duration = Duration::from_secs(5);
/// Absolute ceiling on one background generation, network timeouts included.
/// Kept under the 30-second execution limit of serverless deployments.
pub const GENERATION_DEADLINE: Duration = Duration::from_secs(25);

/// Synchronous answer to a submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Work started in the background; poll for the result later.
    Accepted,
    /// Another submission is still in flight.
    RejectedBusy,
    /// The minimum interval since the last accepted submission has not
    /// elapsed.
    RejectedThrottled,
}

/// Finished generation handed from the background task to a later poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub topic: String,
    pub titles: Option<Vec<String>>,
    pub error: Option<String>,
}

impl GenerationResult {
    fn success(topic: &str, titles: Vec<String>) -> Self {
        Self {
            topic: topic.to_string(),
            titles: Some(titles),
            error: None,
        }
    }

    fn failure(topic: &str, error: impl Into<String>) -> Self {
        Self {
            topic: topic.to_string(),
            titles: None,
            error: Some(error.into()),
        }
    }
}

/// What to do when the remote call succeeds but parses to zero headlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyResultPolicy {
    /// Pass the empty list through as a success.
    #[default]
    Allow,
    /// Convert it into a user-visible error.
    Reject,
}

#[derive(Debug, Clone, Copy)]
pub struct SubmissionPolicy {
    pub min_interval: Duration,
    pub deadline: Duration,
    pub empty_results: EmptyResultPolicy,
}

impl Default for SubmissionPolicy {
    fn default() -> Self {
        Self {
            min_interval: MIN_SUBMIT_INTERVAL,
            deadline: GENERATION_DEADLINE,
            empty_results: EmptyResultPolicy::default(),
        }
    }
}

#[derive(Clone)]
pub struct SubmissionController {
    shared: Arc<ControllerShared>,
}

struct ControllerShared {
    state: Mutex<SubmissionState>,
    generator: Arc<dyn TitleGenerator>,
    policy: SubmissionPolicy,
}

#[derive(Default)]
struct SubmissionState {
    in_flight: bool,
    last_submit: Option<Instant>,
    slot: Option<GenerationResult>,
}

impl SubmissionController {
    pub fn new(generator: Arc<dyn TitleGenerator>) -> Self {
        Self::with_policy(generator, SubmissionPolicy::default())
    }

    pub fn with_policy(generator: Arc<dyn TitleGenerator>, policy: SubmissionPolicy) -> Self {
        Self {
            shared: Arc::new(ControllerShared {
                state: Mutex::new(SubmissionState::default()),
                generator,
                policy,
            }),
        }
    }

    /// Try to start a generation for `topic`. On acceptance the remote call
    /// runs on a background task and this returns immediately; the caller is
    /// expected to come back with [`poll`](Self::poll).
    ///
    /// Rejections never touch `last_submit`, so a burst of busy retries does
    /// not extend the throttle window.
    pub fn submit(&self, topic: &str) -> SubmissionOutcome {
        let now = Instant::now();
        {
            let mut state = self.shared.state.lock();
            if state.in_flight {
                return SubmissionOutcome::RejectedBusy;
            }
            if let Some(last) = state.last_submit {
                if now.duration_since(last) < self.shared.policy.min_interval {
                    return SubmissionOutcome::RejectedThrottled;
                }
            }
            state.in_flight = true;
            state.last_submit = Some(now);
        }

        info!(topic, "generation accepted");
        let topic = topic.to_string();
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let result = run_generation(&shared, &topic).await;
            let mut state = shared.state.lock();
            state.slot = Some(result);
            state.in_flight = false;
        });
        SubmissionOutcome::Accepted
    }

    /// Non-blocking read of the result slot. The stored result is consumed
    /// only when its topic matches the requested one; a result for any other
    /// topic is discarded on the spot so it can never surface under an
    /// unrelated later poll.
    pub fn poll(&self, topic: &str) -> Option<GenerationResult> {
        let mut state = self.shared.state.lock();
        match state.slot.take() {
            Some(result) if result.topic == topic => Some(result),
            Some(stale) => {
                debug!(stale_topic = %stale.topic, requested = topic, "discarding stale result");
                None
            }
            None => None,
        }
    }
}

async fn run_generation(shared: &ControllerShared, topic: &str) -> GenerationResult {
    match tokio::time::timeout(shared.policy.deadline, shared.generator.generate(topic)).await {
        Ok(Ok(titles)) => {
            if titles.is_empty() && shared.policy.empty_results == EmptyResultPolicy::Reject {
                warn!(topic, "generation produced no usable headlines");
                return GenerationResult::failure(topic, GenerateError::EmptyResult.to_string());
            }
            info!(topic, count = titles.len(), "generation finished");
            GenerationResult::success(topic, titles)
        }
        Ok(Err(err)) => {
            warn!(topic, error = %err, "generation failed");
            GenerationResult::failure(topic, err.to_string())
        }
        // The in-flight future is dropped here, cancelling the remote call;
        // only the timeout result is ever published for this submission.
        Err(_) => {
            warn!(topic, "generation exceeded the absolute deadline");
            GenerationResult::failure(topic, GenerateError::Timeout.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StubGenerator {
        delay: Duration,
        reply: StubReply,
    }

    enum StubReply {
        Titles(Vec<String>),
        Status(u16),
    }

    #[async_trait]
    impl TitleGenerator for StubGenerator {
        async fn generate(&self, _topic: &str) -> Result<Vec<String>, GenerateError> {
            tokio::time::sleep(self.delay).await;
            match &self.reply {
                StubReply::Titles(titles) => Ok(titles.clone()),
                StubReply::Status(status) => Err(GenerateError::Remote { status: *status }),
            }
        }
    }

    fn stub(delay: Duration, titles: &[&str]) -> Arc<dyn TitleGenerator> {
        Arc::new(StubGenerator {
            delay,
            reply: StubReply::Titles(titles.iter().map(|t| t.to_string()).collect()),
        })
    }

    fn failing_stub(delay: Duration, status: u16) -> Arc<dyn TitleGenerator> {
        Arc::new(StubGenerator {
            delay,
            reply: StubReply::Status(status),
        })
    }

    async fn advance(duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    #[tokio::test(start_paused = true)]
    async fn second_submit_while_in_flight_is_rejected_busy() {
        let controller = SubmissionController::new(stub(Duration::from_secs(1), &["标题"]));
        assert_eq!(controller.submit("A"), SubmissionOutcome::Accepted);
        advance(Duration::from_millis(500)).await;
        assert_eq!(controller.submit("A"), SubmissionOutcome::RejectedBusy);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_rejection_does_not_extend_the_throttle_window() {
        let controller = SubmissionController::new(stub(Duration::from_secs(1), &["标题"]));
        assert_eq!(controller.submit("A"), SubmissionOutcome::Accepted);
        // Rejected at t=0.5; if this bumped last_submit, the submit at t=5.2
        // would still sit inside the 5 s window.
        advance(Duration::from_millis(500)).await;
        assert_eq!(controller.submit("A"), SubmissionOutcome::RejectedBusy);
        advance(Duration::from_millis(4700)).await;
        assert_eq!(controller.submit("A"), SubmissionOutcome::Accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn resubmit_inside_window_is_throttled() {
        let controller = SubmissionController::new(stub(Duration::from_secs(1), &["标题"]));
        assert_eq!(controller.submit("A"), SubmissionOutcome::Accepted);
        advance(Duration::from_secs(2)).await;
        assert_eq!(controller.submit("A"), SubmissionOutcome::RejectedThrottled);
        advance(Duration::from_millis(3100)).await;
        assert_eq!(controller.submit("A"), SubmissionOutcome::Accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn first_submission_is_never_throttled() {
        let controller = SubmissionController::new(stub(Duration::from_secs(1), &["标题"]));
        assert_eq!(controller.submit("first"), SubmissionOutcome::Accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_returns_nothing_before_completion() {
        let controller = SubmissionController::new(stub(Duration::from_secs(1), &["标题"]));
        controller.submit("A");
        assert_eq!(controller.poll("A"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn completed_result_is_delivered_once_for_the_matching_topic() {
        let controller =
            SubmissionController::new(stub(Duration::from_secs(1), &["line1", "line2"]));
        assert_eq!(controller.submit("skincare"), SubmissionOutcome::Accepted);
        advance(Duration::from_secs(2)).await;
        let result = controller.poll("skincare").expect("result ready");
        assert_eq!(result.topic, "skincare");
        assert_eq!(
            result.titles,
            Some(vec!["line1".to_string(), "line2".to_string()])
        );
        assert_eq!(result.error, None);
        // Consumed: the slot is empty on the next poll.
        assert_eq!(controller.poll("skincare"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn result_for_another_topic_is_discarded_not_delivered() {
        let controller = SubmissionController::new(stub(Duration::from_secs(1), &["标题"]));
        assert_eq!(controller.submit("A"), SubmissionOutcome::Accepted);
        advance(Duration::from_millis(500)).await;
        assert_eq!(controller.submit("B"), SubmissionOutcome::RejectedBusy);
        advance(Duration::from_secs(2)).await;
        assert_eq!(controller.poll("B"), None);
        // The mismatching poll dropped A's result entirely.
        assert_eq!(controller.poll("A"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn controller_is_idle_again_after_completion() {
        let controller = SubmissionController::new(stub(Duration::from_secs(1), &["标题"]));
        assert_eq!(controller.submit("A"), SubmissionOutcome::Accepted);
        advance(Duration::from_secs(6)).await;
        assert_eq!(controller.submit("A"), SubmissionOutcome::Accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_failure_lands_in_the_slot_and_frees_the_controller() {
        let controller =
            SubmissionController::new(failing_stub(Duration::from_secs(1), 502));
        assert_eq!(controller.submit("A"), SubmissionOutcome::Accepted);
        advance(Duration::from_secs(2)).await;
        let result = controller.poll("A").expect("failure captured");
        assert_eq!(result.titles, None);
        assert!(result.error.as_deref().unwrap().contains("502"));
        advance(Duration::from_secs(4)).await;
        assert_eq!(controller.submit("A"), SubmissionOutcome::Accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_generation_is_cut_off_at_the_deadline() {
        let controller = SubmissionController::new(stub(Duration::from_secs(60), &["标题"]));
        assert_eq!(controller.submit("A"), SubmissionOutcome::Accepted);
        advance(Duration::from_secs(26)).await;
        let result = controller.poll("A").expect("timeout result published");
        assert_eq!(result.titles, None);
        assert!(result.error.as_deref().unwrap().contains("超时"));
        assert_eq!(controller.submit("A"), SubmissionOutcome::Accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_titles_pass_through_under_the_default_policy() {
        let controller = SubmissionController::new(stub(Duration::from_secs(1), &[]));
        controller.submit("A");
        advance(Duration::from_secs(2)).await;
        let result = controller.poll("A").expect("result ready");
        assert_eq!(result.titles, Some(Vec::new()));
        assert_eq!(result.error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_titles_become_an_error_under_the_strict_policy() {
        let policy = SubmissionPolicy {
            empty_results: EmptyResultPolicy::Reject,
            ..SubmissionPolicy::default()
        };
        let controller =
            SubmissionController::with_policy(stub(Duration::from_secs(1), &[]), policy);
        controller.submit("A");
        advance(Duration::from_secs(2)).await;
        let result = controller.poll("A").expect("result ready");
        assert_eq!(result.titles, None);
        assert!(result.error.as_deref().unwrap().contains("未能生成任何标题"));
    }
}
