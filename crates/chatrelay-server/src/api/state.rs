use std::sync::Arc;

use chatrelay_billing::BillingApi;
use chatrelay_core::ChatOrchestrator;
use chatrelay_storage::ConversationStore;

/// Shared handler state. Collaborators are constructed once at process
/// start and injected, never reached through globals.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ChatOrchestrator>,
    pub store: Arc<ConversationStore>,
    pub billing: Arc<dyn BillingApi>,
}
