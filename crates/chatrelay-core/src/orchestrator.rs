//! Chat orchestrator: one send-message lifecycle as a lazy event sequence.
//!
//! The sequence is finite, forward-only and consumed exactly once. Steps
//! are strictly sequential: billing precedes generation, the user turn is
//! persisted before the model is invoked, the assistant turn is persisted
//! before settlement.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;

use chatrelay_ai::{EventStream, PromptMessage, UpstreamClient, UpstreamInput};
use chatrelay_billing::{BillingApi, SettleAction};
use chatrelay_models::{Attachment, ErrorCode, Message, StreamEvent, TokenUsage};
use chatrelay_storage::ConversationStore;

/// Inbound send-message request.
#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub session_id: String,
    pub user_id: String,
    pub message: String,
    pub images: Vec<Attachment>,
    /// Free-form caller context, injected into the message text once, on
    /// the session's first message only.
    pub context: Option<BTreeMap<String, String>>,
}

/// Aggregate result of the synchronous send variant.
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub content: String,
    pub usage: Option<TokenUsage>,
    pub model: String,
}

/// Terminal error of the synchronous send variant.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ChatError {
    pub code: ErrorCode,
    pub message: String,
}

/// Drives one message-send lifecycle against injected collaborators.
pub struct ChatOrchestrator {
    store: Arc<ConversationStore>,
    billing: Arc<dyn BillingApi>,
    upstream: Arc<dyn UpstreamClient>,
    /// In strict mode a failing billing call terminates the request; in
    /// development deployments the request proceeds unbilled.
    strict_billing: bool,
}

impl ChatOrchestrator {
    pub fn new(
        store: Arc<ConversationStore>,
        billing: Arc<dyn BillingApi>,
        upstream: Arc<dyn UpstreamClient>,
        strict_billing: bool,
    ) -> Self {
        Self {
            store,
            billing,
            upstream,
            strict_billing,
        }
    }

    /// Create an empty conversation and return its session id.
    pub fn new_conversation(&self, user_id: &str) -> anyhow::Result<String> {
        let session_id = uuid::Uuid::new_v4().to_string();
        self.store.create(user_id, &session_id)?;
        Ok(session_id)
    }

    /// Execute one send-message lifecycle as a lazy stream of events.
    ///
    /// The stream ends with exactly one `Done` or exactly one `Error`.
    /// If pre-authorization succeeded, settlement is called exactly once:
    /// `commit` when generation succeeded with usage counters, `rollback`
    /// otherwise.
    pub fn send_message_stream(&self, request: SendMessageRequest) -> EventStream {
        let store = Arc::clone(&self.store);
        let billing = Arc::clone(&self.billing);
        let upstream = Arc::clone(&self.upstream);
        let strict_billing = self.strict_billing;

        Box::pin(async_stream::stream! {
            yield StreamEvent::status("Checking balance", 5);

            let mut preauthorized = false;
            match billing.preauthorize(&request.user_id).await {
                Ok(outcome) if outcome.allowed => {
                    preauthorized = true;
                }
                Ok(outcome) => {
                    let balance_related = outcome
                        .reason
                        .as_ref()
                        .is_some_and(|r| r.is_balance_related());
                    tracing::info!(
                        user_id = %request.user_id,
                        reason = ?outcome.reason,
                        balance = outcome.balance,
                        "Pre-authorization denied"
                    );
                    if balance_related {
                        yield StreamEvent::error(
                            ErrorCode::InsufficientBalance,
                            "Your balance is insufficient, please top up to continue",
                        );
                    } else {
                        yield StreamEvent::error(
                            ErrorCode::BillingDenied,
                            "The billing service declined this request",
                        );
                    }
                    return;
                }
                Err(error) if !strict_billing => {
                    // Documented development-mode fallback: proceed unbilled.
                    tracing::warn!(%error, "Billing unavailable, continuing without billing");
                }
                Err(error) => {
                    tracing::error!(%error, "Billing pre-authorization failed");
                    yield StreamEvent::error(
                        ErrorCode::BillingError,
                        "The billing service is currently unavailable, please try again later",
                    );
                    return;
                }
            }

            yield StreamEvent::status("Loading history", 15);

            let existing = match store.get(&request.user_id, &request.session_id) {
                Ok(existing) => existing,
                Err(error) => {
                    tracing::error!(%error, "Failed to load conversation");
                    rollback_if(preauthorized, &*billing, &request.user_id).await;
                    yield StreamEvent::error(ErrorCode::AiError, "Something went wrong, please try again");
                    return;
                }
            };

            // One-time context injection on the session's first message.
            let is_first_message = existing.as_ref().is_none_or(|c| c.messages.is_empty());
            let mut text = request.message.clone();
            if is_first_message
                && let Some(context) = &request.context
                && !context.is_empty()
            {
                text.push_str("\n\n");
                for (key, value) in context {
                    text.push_str(&format!("{key}: {value}\n"));
                }
            }

            let resume_id = existing
                .as_ref()
                .and_then(|c| c.last_response_id().map(str::to_string));

            let user_message = Message::user(text.clone()).with_attachments(request.images.clone());
            let conversation = match store.append_message(
                &request.user_id,
                &request.session_id,
                user_message,
            ) {
                Ok(conversation) => conversation,
                Err(error) => {
                    tracing::error!(%error, "Failed to persist user message");
                    rollback_if(preauthorized, &*billing, &request.user_id).await;
                    yield StreamEvent::error(ErrorCode::AiError, "Something went wrong, please try again");
                    return;
                }
            };

            // Resume from server-side context when the prior assistant turn
            // left a response id, otherwise replay the full history.
            let input = match resume_id {
                Some(resume_id) => UpstreamInput::Resume {
                    message: text,
                    resume_id,
                },
                None => UpstreamInput::History(
                    conversation
                        .messages
                        .iter()
                        .map(|m| PromptMessage::new(m.role, m.content.clone()))
                        .collect(),
                ),
            };

            let mut events = upstream.stream_completion(input);
            while let Some(event) = events.next().await {
                match event {
                    StreamEvent::Status { .. } | StreamEvent::TextDelta { .. } => yield event,
                    StreamEvent::Error { code, message } => {
                        rollback_if(preauthorized, &*billing, &request.user_id).await;
                        yield StreamEvent::Error { code, message };
                        return;
                    }
                    StreamEvent::Done {
                        content,
                        usage,
                        model,
                        response_id,
                    } => {
                        let assistant = Message::assistant(content.clone())
                            .with_response_id(response_id.clone());
                        if let Err(error) =
                            store.append_message(&request.user_id, &request.session_id, assistant)
                        {
                            // The caller already holds a valid answer;
                            // losing the stored turn is logged, not fatal.
                            tracing::error!(%error, "Failed to persist assistant message");
                        }

                        if preauthorized {
                            let action = match &usage {
                                Some(usage) => SettleAction::Commit {
                                    usage: usage.clone(),
                                    model: model.clone(),
                                },
                                None => SettleAction::Rollback,
                            };
                            if let Err(error) = billing.settle(&request.user_id, action).await {
                                // Settlement faults never surface after a
                                // valid answer was delivered.
                                tracing::error!(%error, "Billing settlement failed");
                            }
                        }

                        yield StreamEvent::Done {
                            content,
                            usage,
                            model,
                            response_id,
                        };
                        return;
                    }
                }
            }

            // The upstream contract guarantees a terminal event; ending
            // without one counts as a failed generation.
            rollback_if(preauthorized, &*billing, &request.user_id).await;
            yield StreamEvent::error(ErrorCode::AiError, "The model produced no result");
        })
    }

    /// Synchronous variant: drains the event sequence and returns the
    /// aggregate result, mapping a terminal `Error` event to [`ChatError`].
    pub async fn send_message(
        &self,
        request: SendMessageRequest,
    ) -> Result<ChatCompletion, ChatError> {
        let mut events = self.send_message_stream(request);
        while let Some(event) = events.next().await {
            match event {
                StreamEvent::Done {
                    content,
                    usage,
                    model,
                    ..
                } => {
                    return Ok(ChatCompletion {
                        content,
                        usage,
                        model,
                    });
                }
                StreamEvent::Error { code, message } => {
                    return Err(ChatError { code, message });
                }
                StreamEvent::Status { .. } | StreamEvent::TextDelta { .. } => {}
            }
        }
        Err(ChatError {
            code: ErrorCode::AiError,
            message: "The model produced no result".to_string(),
        })
    }
}

/// Release the reservation after a failed generation. Rollback errors are
/// logged, never propagated: the request is already failing for its own
/// reason.
async fn rollback_if(preauthorized: bool, billing: &dyn BillingApi, user_id: &str) {
    if !preauthorized {
        return;
    }
    if let Err(error) = billing.settle(user_id, SettleAction::Rollback).await {
        tracing::error!(%error, user_id, "Billing rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use async_trait::async_trait;
    use chatrelay_billing::{
        BalanceInfo, BillingError, BillingOutcome, DenyReason, IdentityInfo, IdentityRequest,
    };
    use chatrelay_models::MessageRole;
    use tempfile::tempdir;

    /// Scripted billing fake recording every settlement.
    struct FakeBilling {
        outcome: Mutex<Option<Result<BillingOutcome, BillingError>>>,
        settlements: Mutex<Vec<SettleAction>>,
        preauth_calls: Mutex<u32>,
    }

    impl FakeBilling {
        fn allowing() -> Self {
            Self::with_outcome(Ok(BillingOutcome {
                allowed: true,
                reason: None,
                balance: 10.0,
            }))
        }

        fn denying(reason: DenyReason) -> Self {
            Self::with_outcome(Ok(BillingOutcome {
                allowed: false,
                reason: Some(reason),
                balance: 0.0,
            }))
        }

        fn failing() -> Self {
            Self::with_outcome(Err(BillingError::Api {
                status: 503,
                code: None,
                message: "wallet down".into(),
            }))
        }

        fn with_outcome(outcome: Result<BillingOutcome, BillingError>) -> Self {
            Self {
                outcome: Mutex::new(Some(outcome)),
                settlements: Mutex::new(Vec::new()),
                preauth_calls: Mutex::new(0),
            }
        }

        fn settlements(&self) -> Vec<SettleAction> {
            self.settlements.lock().unwrap().clone()
        }

        fn preauth_calls(&self) -> u32 {
            *self.preauth_calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl BillingApi for FakeBilling {
        async fn preauthorize(&self, _user_id: &str) -> chatrelay_billing::Result<BillingOutcome> {
            *self.preauth_calls.lock().unwrap() += 1;
            self.outcome
                .lock()
                .unwrap()
                .take()
                .expect("preauthorize called more than once")
        }

        async fn settle(
            &self,
            _user_id: &str,
            action: SettleAction,
        ) -> chatrelay_billing::Result<()> {
            self.settlements.lock().unwrap().push(action);
            Ok(())
        }

        async fn balance(&self, _user_id: &str) -> chatrelay_billing::Result<BalanceInfo> {
            unimplemented!("not used by the orchestrator")
        }

        async fn resolve_identity(
            &self,
            _request: IdentityRequest,
        ) -> chatrelay_billing::Result<IdentityInfo> {
            unimplemented!("not used by the orchestrator")
        }
    }

    /// Scripted upstream fake replaying a fixed event sequence and
    /// recording the inputs it was invoked with.
    struct FakeUpstream {
        events: Vec<StreamEvent>,
        inputs: Mutex<Vec<UpstreamInput>>,
    }

    impl FakeUpstream {
        fn replying(events: Vec<StreamEvent>) -> Self {
            Self {
                events,
                inputs: Mutex::new(Vec::new()),
            }
        }

        fn succeeding() -> Self {
            Self::replying(vec![
                StreamEvent::text_delta("Hel"),
                StreamEvent::text_delta("lo"),
                StreamEvent::Done {
                    content: "Hello".into(),
                    usage: Some(TokenUsage::new(10, 5)),
                    model: "relay-large".into(),
                    response_id: Some("resp-1".into()),
                },
            ])
        }

        fn call_count(&self) -> usize {
            self.inputs.lock().unwrap().len()
        }
    }

    impl UpstreamClient for FakeUpstream {
        fn stream_completion(&self, input: UpstreamInput) -> EventStream {
            self.inputs.lock().unwrap().push(input);
            Box::pin(futures::stream::iter(self.events.clone()))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<ConversationStore>,
        billing: Arc<FakeBilling>,
        upstream: Arc<FakeUpstream>,
        orchestrator: ChatOrchestrator,
    }

    fn fixture(billing: FakeBilling, upstream: FakeUpstream) -> Fixture {
        fixture_with_mode(billing, upstream, true)
    }

    fn fixture_with_mode(billing: FakeBilling, upstream: FakeUpstream, strict: bool) -> Fixture {
        let dir = tempdir().unwrap();
        let store = Arc::new(ConversationStore::new(dir.path().join("conv")).unwrap());
        let billing = Arc::new(billing);
        let upstream = Arc::new(upstream);
        let orchestrator = ChatOrchestrator::new(
            Arc::clone(&store),
            billing.clone() as Arc<dyn BillingApi>,
            upstream.clone() as Arc<dyn UpstreamClient>,
            strict,
        );
        Fixture {
            _dir: dir,
            store,
            billing,
            upstream,
            orchestrator,
        }
    }

    fn request(message: &str) -> SendMessageRequest {
        SendMessageRequest {
            session_id: "session-1".into(),
            user_id: "user-1".into(),
            message: message.into(),
            images: Vec::new(),
            context: None,
        }
    }

    async fn drain(fixture: &Fixture, req: SendMessageRequest) -> Vec<StreamEvent> {
        fixture.orchestrator.send_message_stream(req).collect().await
    }

    fn terminal_count(events: &[StreamEvent]) -> (usize, usize) {
        let done = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::Done { .. }))
            .count();
        let error = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::Error { .. }))
            .count();
        (done, error)
    }

    #[tokio::test]
    async fn test_successful_send_commits_exactly_once() {
        let fx = fixture(FakeBilling::allowing(), FakeUpstream::succeeding());
        let events = drain(&fx, request("hi there")).await;

        assert_eq!(terminal_count(&events), (1, 0));
        let settlements = fx.billing.settlements();
        assert_eq!(settlements.len(), 1);
        assert!(matches!(
            &settlements[0],
            SettleAction::Commit { usage, model }
                if *usage == TokenUsage::new(10, 5) && model == "relay-large"
        ));

        // Both turns persisted, in order.
        let conversation = fx.store.get("user-1", "session-1").unwrap().unwrap();
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[0].role, MessageRole::User);
        assert_eq!(conversation.messages[1].role, MessageRole::Assistant);
        assert_eq!(conversation.messages[1].content, "Hello");
        assert_eq!(
            conversation.messages[1].response_id.as_deref(),
            Some("resp-1")
        );
    }

    #[tokio::test]
    async fn test_denied_balance_stops_before_any_side_effect() {
        let fx = fixture(
            FakeBilling::denying(DenyReason::BalanceNonPositive),
            FakeUpstream::succeeding(),
        );
        let events = drain(&fx, request("hi")).await;

        match events.last().unwrap() {
            StreamEvent::Error { code, .. } => assert_eq!(*code, ErrorCode::InsufficientBalance),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(terminal_count(&events), (0, 1));
        // No generation, no persistence, no settlement.
        assert_eq!(fx.upstream.call_count(), 0);
        assert!(fx.store.get("user-1", "session-1").unwrap().is_none());
        assert!(fx.billing.settlements().is_empty());
    }

    #[tokio::test]
    async fn test_other_denial_maps_to_billing_denied() {
        let fx = fixture(
            FakeBilling::denying(DenyReason::Other("account_suspended".into())),
            FakeUpstream::succeeding(),
        );
        let events = drain(&fx, request("hi")).await;
        match events.last().unwrap() {
            StreamEvent::Error { code, .. } => assert_eq!(*code, ErrorCode::BillingDenied),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_billing_outage_strict_mode_errors() {
        let fx = fixture(FakeBilling::failing(), FakeUpstream::succeeding());
        let events = drain(&fx, request("hi")).await;
        match events.last().unwrap() {
            StreamEvent::Error { code, .. } => assert_eq!(*code, ErrorCode::BillingError),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(fx.upstream.call_count(), 0);
    }

    #[tokio::test]
    async fn test_billing_outage_non_strict_continues_unbilled() {
        let fx = fixture_with_mode(FakeBilling::failing(), FakeUpstream::succeeding(), false);
        let events = drain(&fx, request("hi")).await;

        assert_eq!(terminal_count(&events), (1, 0));
        // Not pre-authorized, so no settlement of either kind.
        assert!(fx.billing.settlements().is_empty());
    }

    #[tokio::test]
    async fn test_upstream_error_rolls_back_exactly_once() {
        let fx = fixture(
            FakeBilling::allowing(),
            FakeUpstream::replying(vec![
                StreamEvent::text_delta("par"),
                StreamEvent::error(ErrorCode::AiError, "model exploded"),
            ]),
        );
        let events = drain(&fx, request("hi")).await;

        assert_eq!(terminal_count(&events), (0, 1));
        assert_eq!(fx.billing.settlements(), vec![SettleAction::Rollback]);
        // The user turn stays persisted; no assistant turn exists.
        let conversation = fx.store.get("user-1", "session-1").unwrap().unwrap();
        assert_eq!(conversation.messages.len(), 1);
        assert_eq!(conversation.messages[0].role, MessageRole::User);
    }

    #[tokio::test]
    async fn test_done_without_usage_rolls_back() {
        let fx = fixture(
            FakeBilling::allowing(),
            FakeUpstream::replying(vec![StreamEvent::Done {
                content: "answer".into(),
                usage: None,
                model: "relay-large".into(),
                response_id: None,
            }]),
        );
        let events = drain(&fx, request("hi")).await;

        assert_eq!(terminal_count(&events), (1, 0));
        assert_eq!(fx.billing.settlements(), vec![SettleAction::Rollback]);
    }

    #[tokio::test]
    async fn test_context_injected_only_on_first_message() {
        let fx = fixture(FakeBilling::allowing(), FakeUpstream::succeeding());
        let mut req = request("first question");
        req.context = Some(BTreeMap::from([(
            "origin".to_string(),
            "https://shell.example".to_string(),
        )]));
        let _ = drain(&fx, req).await;

        let conversation = fx.store.get("user-1", "session-1").unwrap().unwrap();
        assert!(conversation.messages[0].content.contains("first question"));
        assert!(conversation.messages[0]
            .content
            .contains("origin: https://shell.example"));
    }

    #[tokio::test]
    async fn test_context_not_injected_on_later_messages() {
        let fx = fixture(FakeBilling::allowing(), FakeUpstream::succeeding());
        fx.store
            .append_message("user-1", "session-1", Message::user("earlier"))
            .unwrap();

        let mut req = request("second question");
        req.context = Some(BTreeMap::from([("origin".to_string(), "x".to_string())]));
        let _ = drain(&fx, req).await;

        let conversation = fx.store.get("user-1", "session-1").unwrap().unwrap();
        let second = &conversation.messages[1];
        assert_eq!(second.content, "second question");
    }

    #[tokio::test]
    async fn test_resume_id_sends_only_new_message() {
        let fx = fixture(FakeBilling::allowing(), FakeUpstream::succeeding());
        fx.store
            .append_message("user-1", "session-1", Message::user("earlier"))
            .unwrap();
        fx.store
            .append_message(
                "user-1",
                "session-1",
                Message::assistant("sure").with_response_id(Some("resp-0".into())),
            )
            .unwrap();

        let _ = drain(&fx, request("follow-up")).await;

        let inputs = fx.upstream.inputs.lock().unwrap();
        match &inputs[0] {
            UpstreamInput::Resume { message, resume_id } => {
                assert_eq!(message, "follow-up");
                assert_eq!(resume_id, "resp-0");
            }
            other => panic!("expected resume input, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_resume_id_sends_full_history() {
        let fx = fixture(FakeBilling::allowing(), FakeUpstream::succeeding());
        fx.store
            .append_message("user-1", "session-1", Message::user("earlier"))
            .unwrap();
        fx.store
            .append_message("user-1", "session-1", Message::assistant("no id"))
            .unwrap();

        let _ = drain(&fx, request("follow-up")).await;

        let inputs = fx.upstream.inputs.lock().unwrap();
        match &inputs[0] {
            UpstreamInput::History(messages) => {
                assert_eq!(messages.len(), 3);
                assert_eq!(messages[2].content, "follow-up");
            }
            other => panic!("expected history input, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_preauthorize_called_once() {
        let fx = fixture(FakeBilling::allowing(), FakeUpstream::succeeding());
        let _ = drain(&fx, request("hi")).await;
        assert_eq!(fx.billing.preauth_calls(), 1);
    }

    #[tokio::test]
    async fn test_sync_variant_returns_aggregate() {
        let fx = fixture(FakeBilling::allowing(), FakeUpstream::succeeding());
        let completion = fx.orchestrator.send_message(request("hi")).await.unwrap();
        assert_eq!(completion.content, "Hello");
        assert_eq!(completion.usage, Some(TokenUsage::new(10, 5)));
        assert_eq!(completion.model, "relay-large");
    }

    #[tokio::test]
    async fn test_sync_variant_maps_error_event() {
        let fx = fixture(
            FakeBilling::denying(DenyReason::BalanceBelowThreshold),
            FakeUpstream::succeeding(),
        );
        let error = fx
            .orchestrator
            .send_message(request("hi"))
            .await
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::InsufficientBalance);
    }

    #[tokio::test]
    async fn test_new_conversation_creates_empty() {
        let fx = fixture(FakeBilling::allowing(), FakeUpstream::succeeding());
        let session_id = fx.orchestrator.new_conversation("user-1").unwrap();
        let conversation = fx.store.get("user-1", &session_id).unwrap().unwrap();
        assert!(conversation.messages.is_empty());
    }
}
