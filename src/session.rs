use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::dispatch::http::HttpDispatch;
use crate::dispatch::{StreamObserver, StreamOutcome, StreamRequest};
use crate::error::KilnError;
use crate::extract::{self, DEFAULT_SCOPE, ExtractedComponent};

/// Default minimum interval between accepted submissions.
pub const DEFAULT_MIN_SUBMIT_INTERVAL: Duration = Duration::from_millis(1000);

/// Instructions prepended to every user request.
pub const SYSTEM_PROMPT: &str = "\
You are a React development assistant. The user describes a page or widget. \
Reply with exactly one complete JSX function component and nothing else:
- Wrap the component in a single ```jsx fenced block
- No explanations, headings or comments
- Use the `const Name = () => {}` form
- The component name starts with an uppercase letter (e.g. Countdown, Timer)
- No import or export statements
- The code must be complete and directly renderable
- Start the code on a new line after the opening fence, close every JSX tag, \
and do not squash the code onto one line";

/// Full prompt sent to the model for a user request.
pub fn compose_prompt(user_request: &str) -> String {
    format!("{SYSTEM_PROMPT}\n\nUser request: {}", user_request.trim())
}

/// Identifiers the renderer exposes to generated code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderScope {
    pub primitives: Vec<String>,
}

impl Default for RenderScope {
    fn default() -> Self {
        Self {
            primitives: DEFAULT_SCOPE.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Rejects submissions that arrive too soon after the last accepted one.
/// Measured on the monotonic clock, independent of retry backoff.
#[derive(Debug)]
pub struct SubmissionGuard {
    min_interval: Duration,
    last_accepted: Option<Instant>,
}

impl SubmissionGuard {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_accepted: None,
        }
    }

    pub fn try_accept(&mut self) -> Result<(), KilnError> {
        self.try_accept_at(Instant::now())
    }

    pub fn try_accept_at(&mut self, now: Instant) -> Result<(), KilnError> {
        if let Some(last) = self.last_accepted {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.min_interval {
                let remaining = self.min_interval - elapsed;
                return Err(KilnError::Throttled(remaining.as_millis() as u64));
            }
        }
        self.last_accepted = Some(now);
        Ok(())
    }
}

impl Default for SubmissionGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SUBMIT_INTERVAL)
    }
}

/// Write-once holder for the extracted component of one generation.
#[derive(Debug, Default)]
pub struct ComponentSlot {
    value: Option<ExtractedComponent>,
}

impl ComponentSlot {
    /// Store `candidate` if the slot is empty. Returns true if it was stored.
    pub fn offer(&mut self, candidate: ExtractedComponent) -> bool {
        if self.value.is_some() {
            return false;
        }
        self.value = Some(candidate);
        true
    }

    pub fn get(&self) -> Option<&ExtractedComponent> {
        self.value.as_ref()
    }

    pub fn is_filled(&self) -> bool {
        self.value.is_some()
    }
}

/// Terminal state as reported to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SessionOutcome {
    Completed,
    Failed { message: String },
}

/// State of one generation: the growing text, the first extracted
/// component and the terminal outcome.
#[derive(Debug, Default)]
pub struct Session {
    text: String,
    component: ComponentSlot,
    outcome: Option<SessionOutcome>,
    increments: usize,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream one request into a fresh session.
    pub async fn run(
        dispatch: &HttpDispatch,
        req: &StreamRequest,
        cancel: &CancellationToken,
    ) -> (Self, StreamOutcome) {
        let mut session = Self::new();
        let outcome = dispatch.stream(req, &mut session, cancel).await;
        (session, outcome)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn component(&self) -> Option<&ExtractedComponent> {
        self.component.get()
    }

    pub fn outcome(&self) -> Option<&SessionOutcome> {
        self.outcome.as_ref()
    }

    pub fn increments(&self) -> usize {
        self.increments
    }

    pub fn is_settled(&self) -> bool {
        self.outcome.is_some()
    }

    fn settle(&mut self, outcome: SessionOutcome) {
        if let Some(existing) = &self.outcome {
            tracing::warn!(?existing, ?outcome, "ignoring second terminal state");
            return;
        }
        self.outcome = Some(outcome);
    }
}

impl StreamObserver for Session {
    fn on_increment(&mut self, text: &str) {
        if self.is_settled() {
            tracing::warn!("increment after terminal state dropped");
            return;
        }
        self.text.push_str(text);
        self.increments += 1;

        // Once a component is held, later (possibly worse) states are not extracted.
        if self.component.is_filled() {
            return;
        }
        if let Some(found) = extract::extract(&self.text) {
            tracing::info!(
                component = found.component_name.as_deref().unwrap_or("<unnamed>"),
                buffer_len = self.text.len(),
                "component available"
            );
            self.component.offer(found);
        }
    }

    fn on_done(&mut self) {
        if self.component.get().is_none() {
            tracing::info!(buffer_len = self.text.len(), "completed without a code block");
        }
        self.settle(SessionOutcome::Completed);
    }

    fn on_failure(&mut self, error: &KilnError) {
        self.settle(SessionOutcome::Failed {
            message: error.user_message(),
        });
    }
}

/// Owns the submission guard and the cancellation handle of the in-flight
/// generation. One generation is active at a time.
#[derive(Debug, Default)]
pub struct SessionController {
    guard: SubmissionGuard,
    active: Option<CancellationToken>,
}

impl SessionController {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            guard: SubmissionGuard::new(min_interval),
            active: None,
        }
    }

    /// Accept a submission. Abandons the previous generation, if any, and
    /// returns the cancellation token for the new one.
    pub fn begin(&mut self) -> Result<CancellationToken, KilnError> {
        self.guard.try_accept()?;
        if let Some(previous) = self.active.take() {
            previous.cancel();
        }
        let token = CancellationToken::new();
        self.active = Some(token.clone());
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(name: &str) -> ExtractedComponent {
        ExtractedComponent {
            source_code: format!("const {name} = () => null;"),
            component_name: Some(name.to_string()),
        }
    }

    #[test]
    fn guard_rejects_inside_interval() {
        let mut guard = SubmissionGuard::new(Duration::from_millis(1000));
        let t0 = Instant::now();
        assert!(guard.try_accept_at(t0).is_ok());
        match guard.try_accept_at(t0 + Duration::from_millis(400)) {
            Err(KilnError::Throttled(ms)) => assert_eq!(ms, 600),
            other => panic!("expected Throttled, got {other:?}"),
        }
        assert!(guard.try_accept_at(t0 + Duration::from_millis(1000)).is_ok());
    }

    #[test]
    fn rejected_submission_does_not_reset_the_clock() {
        let mut guard = SubmissionGuard::new(Duration::from_millis(1000));
        let t0 = Instant::now();
        guard.try_accept_at(t0).unwrap();
        assert!(guard.try_accept_at(t0 + Duration::from_millis(900)).is_err());
        assert!(guard.try_accept_at(t0 + Duration::from_millis(1001)).is_ok());
    }

    #[test]
    fn slot_is_write_once() {
        let mut slot = ComponentSlot::default();
        assert!(slot.offer(component("First")));
        assert!(!slot.offer(component("Second")));
        assert_eq!(
            slot.get().and_then(|c| c.component_name.as_deref()),
            Some("First")
        );
    }

    #[test]
    fn session_settles_once() {
        let mut session = Session::new();
        session.on_increment("hello");
        session.on_done();
        session.on_failure(&KilnError::Superseded);
        session.on_increment(" late");
        assert_eq!(session.outcome(), Some(&SessionOutcome::Completed));
        assert_eq!(session.text(), "hello");
    }

    #[test]
    fn controller_cancels_previous_generation() {
        let mut controller = SessionController::new(Duration::ZERO);
        let first = controller.begin().unwrap();
        let second = controller.begin().unwrap();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }

    #[test]
    fn prompt_carries_instructions_and_request() {
        let prompt = compose_prompt("  a countdown timer \n");
        assert!(prompt.starts_with(SYSTEM_PROMPT));
        assert!(prompt.ends_with("User request: a countdown timer"));
    }
}
