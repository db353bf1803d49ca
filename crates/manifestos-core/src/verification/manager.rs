//! Verification UI orchestration.
//!
//! [`GlobalVerificationManager`] listens for `request-verification-ui`
//! signals, shows one modal at a time and publishes exactly one
//! `verification-result` per request. It never touches task or
//! verification state; the store applies the results.
//!
//! ## Modal lifecycle
//!
//! ```text
//! queued -> open -> (accepted | cancelled | timed out | rejected too often) -> closed
//!   |         ^ |
//!   |         +-+ recognition error / evidence not matching (modal stays open)
//!   |         |
//!   +---------+-> dismissed (store moved on, or a newer request replaced it; no result)
//! ```
//!
//! Queued requests whose deadline passed before they could be shown are
//! dropped; the store's own countdown has already expired the step.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use super::bus::{
    FailureReason, Signal, SignalBus, VerificationDismissal, VerificationRequest, VerificationResult,
};
use super::state::{VerificationPolicy, VerificationType};
use super::timer::{CountdownKind, VerificationTimer};
use crate::error::{CoreError, Result};
use crate::events::Event;
use crate::recognition::{with_single_retry, Evidence, KeywordMatcher, MatchReport, Recognition, Recognizer};

/// What happened to a submitted piece of evidence.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Result published; the modal is closed.
    Accepted(Option<MatchReport>),
    /// Evidence did not match; the modal stays open for another try.
    Rejected { report: MatchReport, attempts_left: u32 },
    /// Too many rejections; a failure was published and the modal closed.
    Failed(MatchReport),
}

/// The modal currently on screen.
#[derive(Debug)]
pub struct ActiveModal {
    request: VerificationRequest,
    timer: VerificationTimer,
    rejections: u32,
    inline_error: Option<String>,
}

impl ActiveModal {
    pub fn request(&self) -> &VerificationRequest {
        &self.request
    }

    pub fn remaining_secs(&self) -> u64 {
        self.timer.remaining_secs()
    }

    /// Countdown text shown in the modal.
    pub fn countdown(&self) -> String {
        self.timer.display()
    }

    pub fn rejections(&self) -> u32 {
        self.rejections
    }

    /// Message shown under the evidence picker after a failed attempt.
    pub fn inline_error(&self) -> Option<&str> {
        self.inline_error.as_deref()
    }
}

pub struct GlobalVerificationManager<R> {
    bus: SignalBus,
    inbox: broadcast::Receiver<Signal>,
    recognizer: R,
    matcher: KeywordMatcher,
    max_rejections: u32,
    retry_backoff: Duration,
    queue: VecDeque<VerificationRequest>,
    active: Option<ActiveModal>,
    /// Events produced since the last `poll`.
    outbox: Vec<Event>,
}

impl<R: Recognizer> GlobalVerificationManager<R> {
    /// Subscribe to `bus`. Only requests published after this call are seen.
    pub fn new(bus: &SignalBus, recognizer: R, policy: &VerificationPolicy, retry_backoff: Duration) -> Self {
        Self {
            bus: bus.clone(),
            inbox: bus.subscribe(),
            recognizer,
            matcher: KeywordMatcher::new(policy.match_threshold),
            max_rejections: policy.max_rejections.max(1),
            retry_backoff,
            queue: VecDeque::new(),
            active: None,
            outbox: Vec::new(),
        }
    }

    pub fn active(&self) -> Option<&ActiveModal> {
        self.active.as_ref()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn recognizer(&self) -> &R {
        &self.recognizer
    }

    /// Pick up new requests, advance the modal countdown, open the next
    /// queued modal. Call once per second.
    ///
    /// Returns everything that happened since the previous poll, including
    /// modals closed by [`submit_evidence`](Self::submit_evidence).
    pub fn poll(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        loop {
            match self.inbox.try_recv() {
                Ok(Signal::RequestVerificationUi(request)) => self.enqueue(request, now),
                Ok(Signal::DismissVerificationUi(dismissal)) => self.dismiss(&dismissal, now),
                Ok(Signal::VerificationResult(_)) => {}
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "verification requests dropped by slow receiver");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }

        if let Some(modal) = self.active.as_mut() {
            if modal.timer.tick(now).is_some() {
                info!(task_id = %modal.request.task_id, "verification modal timed out");
                self.close(ModalOutcome::Failure(FailureReason::Timeout), now);
            }
        }

        if self.active.is_none() {
            self.open_next(now);
        }
        std::mem::take(&mut self.outbox)
    }

    /// Run recognition on the evidence and resolve the modal if it matches.
    ///
    /// A recognition failure (after one retry for transient errors) is
    /// returned as an error and leaves the modal open, so the user can
    /// submit again.
    pub async fn submit_evidence(&mut self, evidence: &Evidence, now: DateTime<Utc>) -> Result<SubmitOutcome> {
        let keywords = match self.active.as_ref() {
            Some(modal) => modal.request.keywords.clone(),
            None => return Err(CoreError::NoActiveVerification),
        };

        let recognizer = &self.recognizer;
        let recognized = with_single_retry(self.retry_backoff, || recognizer.recognize(evidence)).await;

        let labels = match recognized {
            Ok(Recognition::Labels(labels)) => labels,
            Ok(Recognition::Unverified) => {
                self.close(ModalOutcome::Success(Some("trusted".into())), now);
                return Ok(SubmitOutcome::Accepted(None));
            }
            Err(e) => {
                warn!(error = %e, "recognition failed");
                if let Some(modal) = self.active.as_mut() {
                    modal.inline_error = Some(format!("Recognition failed, please try again: {e}"));
                    self.outbox.push(Event::RecognitionFailed {
                        task_id: modal.request.task_id.clone(),
                        message: e.to_string(),
                    });
                }
                return Err(e.into());
            }
        };

        let report = self.matcher.evaluate(&keywords, &labels);
        if report.passed {
            let evidence = report.matched.join(", ");
            self.close(ModalOutcome::Success(Some(evidence)), now);
            return Ok(SubmitOutcome::Accepted(Some(report)));
        }

        let max_rejections = self.max_rejections;
        let Some(modal) = self.active.as_mut() else {
            return Err(CoreError::NoActiveVerification);
        };
        modal.rejections += 1;
        let attempts = modal.rejections;
        debug!(task_id = %modal.request.task_id, attempts, unmatched = ?report.unmatched, "evidence rejected");
        self.outbox.push(Event::EvidenceRejected {
            task_id: modal.request.task_id.clone(),
            attempts,
            unmatched: report.unmatched.clone(),
        });

        if attempts >= max_rejections {
            let message = format!("could not find: {}", report.unmatched.join(", "));
            self.close(
                ModalOutcome::Failure(FailureReason::Rejected { message, attempts }),
                now,
            );
            return Ok(SubmitOutcome::Failed(report));
        }

        modal.inline_error = Some(if report.recognized.is_empty() {
            "Nothing recognized, retake the photo with better light".to_string()
        } else {
            format!(
                "Expected {}, saw {}",
                keywords.join(" or "),
                report.recognized.iter().take(8).cloned().collect::<Vec<_>>().join(", ")
            )
        });
        Ok(SubmitOutcome::Rejected {
            report,
            attempts_left: max_rejections - attempts,
        })
    }

    /// The user closed the modal without evidence.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<Vec<Event>> {
        if self.active.is_none() {
            return Err(CoreError::NoActiveVerification);
        }
        self.close(ModalOutcome::Failure(FailureReason::Cancelled), now);
        Ok(std::mem::take(&mut self.outbox))
    }

    /// Queue a request. A request for a step that is already open or queued
    /// replaces it only when it carries a later deadline, i.e. it belongs to
    /// a newer window.
    fn enqueue(&mut self, request: VerificationRequest, now: DateTime<Utc>) {
        if let Some(queued) = self.queue.iter_mut().find(|r| same_step(r, &request)) {
            if request.deadline > queued.deadline {
                debug!(task_id = %request.task_id, "queued verification request replaced");
                *queued = request;
            } else {
                debug!(task_id = %request.task_id, "duplicate verification request ignored");
            }
            return;
        }

        let open_deadline = self
            .active
            .as_ref()
            .filter(|m| same_step(&m.request, &request))
            .map(|m| m.request.deadline);
        match open_deadline {
            Some(deadline) if request.deadline > deadline => {
                debug!(task_id = %request.task_id, "open verification modal replaced");
                self.withdraw(now);
                self.queue.push_front(request);
            }
            Some(_) => {
                debug!(task_id = %request.task_id, "duplicate verification request ignored");
            }
            None => {
                debug!(task_id = %request.task_id, verification_type = %request.verification_type, "verification request queued");
                self.queue.push_back(request);
            }
        }
    }

    /// Drop every open or queued modal the dismissal covers.
    fn dismiss(&mut self, dismissal: &VerificationDismissal, now: DateTime<Utc>) {
        let before = self.queue.len();
        self.queue.retain(|r| !dismissal.covers(r));
        let purged = before - self.queue.len();
        if purged > 0 {
            debug!(task_id = %dismissal.task_id, purged, "queued verification requests dismissed");
        }
        if self.active.as_ref().is_some_and(|m| dismissal.covers(&m.request)) {
            self.withdraw(now);
        }
    }

    fn open_next(&mut self, now: DateTime<Utc>) {
        while let Some(request) = self.queue.pop_front() {
            if request.deadline <= now {
                info!(task_id = %request.task_id, verification_type = %request.verification_type, "verification request expired in the queue");
                continue;
            }
            let kind = match request.verification_type {
                VerificationType::Start => CountdownKind::Start,
                VerificationType::Complete => CountdownKind::Finish,
            };
            let timer = VerificationTimer::new(request.deadline, kind, now);
            info!(task_id = %request.task_id, verification_type = %request.verification_type, remaining = timer.remaining_secs(), "verification modal opened");
            self.outbox.push(Event::ModalOpened {
                task_id: request.task_id.clone(),
                verification_type: request.verification_type,
                remaining_secs: timer.remaining_secs(),
                at: now,
            });
            self.active = Some(ActiveModal {
                request,
                timer,
                rejections: 0,
                inline_error: None,
            });
            return;
        }
    }

    /// Close the active modal without publishing a result.
    fn withdraw(&mut self, now: DateTime<Utc>) {
        let Some(mut modal) = self.active.take() else {
            return;
        };
        modal.timer.dispose();
        info!(task_id = %modal.request.task_id, "verification modal dismissed");
        self.outbox.push(Event::ModalDismissed {
            task_id: modal.request.task_id,
            verification_type: modal.request.verification_type,
            at: now,
        });
    }

    /// Publish the single result for the active request and close the modal.
    fn close(&mut self, outcome: ModalOutcome, now: DateTime<Utc>) {
        let Some(mut modal) = self.active.take() else {
            return;
        };
        modal.timer.dispose();
        let result = match outcome {
            ModalOutcome::Success(evidence) => VerificationResult::accepted(&modal.request, evidence),
            ModalOutcome::Failure(reason) => VerificationResult::failed(&modal.request, reason),
        };
        let success = result.success;
        self.bus.publish(Signal::VerificationResult(result));
        info!(task_id = %modal.request.task_id, success, "verification modal closed");
        self.outbox.push(Event::ModalClosed {
            task_id: modal.request.task_id,
            verification_type: modal.request.verification_type,
            success,
            at: now,
        });
    }
}

enum ModalOutcome {
    Success(Option<String>),
    Failure(FailureReason),
}

fn same_step(a: &VerificationRequest, b: &VerificationRequest) -> bool {
    a.task_id == b.task_id && a.verification_type == b.verification_type
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecognitionError;
    use crate::recognition::ScriptedRecognizer;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 10, 0, 0).unwrap()
    }

    fn request(task_id: &str, verification_type: VerificationType) -> VerificationRequest {
        VerificationRequest {
            task_id: task_id.into(),
            task_title: "Read".into(),
            verification_type,
            requirement: "Show the book".into(),
            keywords: vec!["书".into()],
            timeout_secs: 120,
            deadline: t0() + chrono::Duration::seconds(120),
        }
    }

    fn setup() -> (SignalBus, GlobalVerificationManager<ScriptedRecognizer>, broadcast::Receiver<Signal>, ScriptedRecognizer) {
        let bus = SignalBus::default();
        let recognizer = ScriptedRecognizer::new();
        let manager = GlobalVerificationManager::new(
            &bus,
            recognizer.clone(),
            &VerificationPolicy::default(),
            Duration::from_millis(1),
        );
        let results = bus.subscribe();
        (bus, manager, results, recognizer)
    }

    fn next_result(rx: &mut broadcast::Receiver<Signal>) -> Option<VerificationResult> {
        loop {
            match rx.try_recv() {
                Ok(Signal::VerificationResult(r)) => return Some(r),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }

    #[test]
    fn requests_queue_one_modal_at_a_time() {
        let (bus, mut manager, _rx, _) = setup();
        bus.publish(Signal::RequestVerificationUi(request("a", VerificationType::Start)));
        bus.publish(Signal::RequestVerificationUi(request("b", VerificationType::Start)));
        bus.publish(Signal::RequestVerificationUi(request("a", VerificationType::Start)));

        let events = manager.poll(t0());
        assert_eq!(events.len(), 1);
        assert_eq!(manager.active().unwrap().request().task_id, "a");
        assert_eq!(manager.queued(), 1);
        assert_eq!(manager.active().unwrap().countdown(), "02:00");
    }

    #[test]
    fn cancel_publishes_cancelled_once() {
        let (bus, mut manager, mut rx, _) = setup();
        bus.publish(Signal::RequestVerificationUi(request("a", VerificationType::Start)));
        manager.poll(t0());

        manager.cancel(t0()).unwrap();
        let result = next_result(&mut rx).unwrap();
        assert!(!result.success);
        assert_eq!(result.reason, Some(FailureReason::Cancelled));
        assert!(next_result(&mut rx).is_none());
        assert!(matches!(manager.cancel(t0()), Err(CoreError::NoActiveVerification)));
    }

    #[test]
    fn modal_timeout_publishes_timeout() {
        let (bus, mut manager, mut rx, _) = setup();
        bus.publish(Signal::RequestVerificationUi(request("a", VerificationType::Complete)));
        manager.poll(t0());
        manager.poll(t0() + chrono::Duration::seconds(119));
        assert!(next_result(&mut rx).is_none());

        manager.poll(t0() + chrono::Duration::seconds(120));
        let result = next_result(&mut rx).unwrap();
        assert_eq!(result.reason, Some(FailureReason::Timeout));
        assert_eq!(result.verification_type, VerificationType::Complete);
        assert!(manager.active().is_none());
    }

    #[test]
    fn dismissal_withdraws_open_and_queued_modals_silently() {
        let (bus, mut manager, mut rx, _) = setup();
        bus.publish(Signal::RequestVerificationUi(request("a", VerificationType::Start)));
        bus.publish(Signal::RequestVerificationUi(request("b", VerificationType::Start)));
        bus.publish(Signal::RequestVerificationUi(request("a", VerificationType::Complete)));
        manager.poll(t0());
        assert_eq!(manager.queued(), 2);

        bus.publish(Signal::DismissVerificationUi(VerificationDismissal::task("a")));
        let events = manager.poll(t0() + chrono::Duration::seconds(5));

        assert!(events
            .iter()
            .any(|e| matches!(e, Event::ModalDismissed { task_id, .. } if task_id == "a")));
        assert_eq!(manager.active().unwrap().request().task_id, "b");
        assert_eq!(manager.queued(), 0);
        assert!(next_result(&mut rx).is_none());
    }

    #[test]
    fn newer_window_replaces_the_open_modal() {
        let (bus, mut manager, mut rx, _) = setup();
        bus.publish(Signal::RequestVerificationUi(request("a", VerificationType::Start)));
        manager.poll(t0());

        let mut renewed = request("a", VerificationType::Start);
        renewed.deadline = t0() + chrono::Duration::seconds(140);
        bus.publish(Signal::RequestVerificationUi(renewed));
        manager.poll(t0() + chrono::Duration::seconds(20));

        let modal = manager.active().unwrap();
        assert_eq!(modal.request().deadline, t0() + chrono::Duration::seconds(140));
        assert_eq!(modal.remaining_secs(), 120);

        // the old deadline passes without a timeout
        manager.poll(t0() + chrono::Duration::seconds(120));
        assert!(manager.active().is_some());
        assert!(next_result(&mut rx).is_none());
    }

    #[test]
    fn request_that_expired_in_the_queue_is_skipped() {
        let (bus, mut manager, mut rx, _) = setup();
        let mut short = request("b", VerificationType::Start);
        short.deadline = t0() + chrono::Duration::seconds(30);
        let mut later = request("c", VerificationType::Start);
        later.deadline = t0() + chrono::Duration::seconds(300);
        bus.publish(Signal::RequestVerificationUi(request("a", VerificationType::Start)));
        bus.publish(Signal::RequestVerificationUi(short));
        bus.publish(Signal::RequestVerificationUi(later));
        manager.poll(t0());

        manager.cancel(t0() + chrono::Duration::seconds(60)).unwrap();
        next_result(&mut rx);
        let events = manager.poll(t0() + chrono::Duration::seconds(60));

        assert_eq!(manager.active().unwrap().request().task_id, "c");
        assert!(!events
            .iter()
            .any(|e| matches!(e, Event::ModalOpened { task_id, .. } if task_id == "b")));
        assert!(next_result(&mut rx).is_none());
    }

    #[tokio::test]
    async fn matching_evidence_is_accepted() {
        let (bus, mut manager, mut rx, recognizer) = setup();
        bus.publish(Signal::RequestVerificationUi(request("a", VerificationType::Start)));
        manager.poll(t0());
        recognizer.push_labels(["书本", "桌子"]);

        let outcome = manager.submit_evidence(&Evidence::photo("aGk="), t0()).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Accepted(Some(_))));
        let result = next_result(&mut rx).unwrap();
        assert!(result.success);
        assert_eq!(result.evidence.as_deref(), Some("书"));

        let events = manager.poll(t0());
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::ModalClosed { success: true, .. })));
    }

    #[tokio::test]
    async fn recognition_error_keeps_modal_open() {
        let (bus, mut manager, mut rx, recognizer) = setup();
        bus.publish(Signal::RequestVerificationUi(request("a", VerificationType::Start)));
        manager.poll(t0());
        recognizer.push(Err(RecognitionError::Service {
            code: 282000,
            message: "internal error".into(),
        }));
        recognizer.push(Err(RecognitionError::Service {
            code: 282000,
            message: "internal error".into(),
        }));

        let err = manager.submit_evidence(&Evidence::photo("aGk="), t0()).await;
        assert!(err.is_err());
        assert_eq!(recognizer.calls(), 2);
        assert!(manager.active().unwrap().inline_error().is_some());
        assert!(next_result(&mut rx).is_none());
    }

    #[tokio::test]
    async fn repeated_mismatch_fails_after_limit() {
        let (bus, mut manager, mut rx, recognizer) = setup();
        bus.publish(Signal::RequestVerificationUi(request("a", VerificationType::Start)));
        manager.poll(t0());
        for _ in 0..3 {
            recognizer.push_labels(["猫"]);
        }

        let first = manager.submit_evidence(&Evidence::photo("aGk="), t0()).await.unwrap();
        assert!(matches!(first, SubmitOutcome::Rejected { attempts_left: 2, .. }));
        manager.submit_evidence(&Evidence::photo("aGk="), t0()).await.unwrap();
        assert!(next_result(&mut rx).is_none());

        let last = manager.submit_evidence(&Evidence::photo("aGk="), t0()).await.unwrap();
        assert!(matches!(last, SubmitOutcome::Failed(_)));
        let result = next_result(&mut rx).unwrap();
        assert!(matches!(result.reason, Some(FailureReason::Rejected { attempts: 3, .. })));
    }

    #[tokio::test]
    async fn unconfigured_recognition_trusts_evidence() {
        let (bus, mut manager, mut rx, recognizer) = setup();
        bus.publish(Signal::RequestVerificationUi(request("a", VerificationType::Start)));
        manager.poll(t0());
        recognizer.push(Ok(Recognition::Unverified));

        let outcome = manager.submit_evidence(&Evidence::photo("aGk="), t0()).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Accepted(None));
        assert!(next_result(&mut rx).unwrap().success);
    }
}
