//! Conversation orchestration: turns a prompt into a provider call and a stored exchange.
//!
//! A prompt turn runs in two stages. The compute stage resolves the chat,
//! assembles the bounded context (rolling summary + recent exchanges + new
//! prompt), calls the provider and, every `summary_interval` exchanges, asks
//! for a fresh summary. Nothing is written during this stage, so any failure
//! leaves the store untouched. The persist stage hands the new chat, summary
//! and exchange to the store in a single `record_turn` call.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::completion::CompletionBackend;
use crate::config::ChatConfig;
use crate::error::{ParleyError, Result};
use crate::models::{Chat, ChatMessage, Exchange, ModelName};
use crate::store::{ConversationStore, TurnRecord};

/// Path segment clients use to start a conversation.
pub const NEW_CHAT: &str = "new";

const SUMMARY_PREFIX: &str = "Previous conversation summary: ";
const SUMMARY_ACK: &str = "I understand the context of our previous conversation";
const SUMMARY_INSTRUCTION: &str = "Summarize our conversation in 3-4 sentences";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptReply {
    pub chat_id: Uuid,
    pub title: String,
    pub response: String,
}

/// `None` for the `new` sentinel or anything that is not a UUID.
pub fn parse_chat_ref(chat_ref: &str) -> Option<Uuid> {
    if chat_ref == NEW_CHAT {
        return None;
    }
    Uuid::parse_str(chat_ref).ok()
}

/// Messages sent to the provider for one turn.
pub fn build_context(summary: Option<&str>, history: &[Exchange], prompt: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() * 2 + 3);

    if let Some(summary) = summary {
        messages.push(ChatMessage::user(format!("{SUMMARY_PREFIX}{summary}")));
        messages.push(ChatMessage::assistant(SUMMARY_ACK));
    }

    for exchange in history {
        messages.push(ChatMessage::user(exchange.prompt.clone()));
        messages.push(ChatMessage::assistant(exchange.response.clone()));
    }

    messages.push(ChatMessage::user(prompt));
    messages
}

/// True when `stored` (the count before this turn is written) is a positive multiple of `interval`.
pub fn summary_due(stored: u64, interval: u32) -> bool {
    interval > 0 && stored > 0 && stored % u64::from(interval) == 0
}

enum ResolvedChat {
    Existing(Chat),
    Draft(Chat),
}

impl ResolvedChat {
    fn chat(&self) -> &Chat {
        match self {
            ResolvedChat::Existing(chat) | ResolvedChat::Draft(chat) => chat,
        }
    }
}

#[derive(Clone)]
pub struct ConversationOrchestrator {
    store: Arc<dyn ConversationStore>,
    completions: Arc<dyn CompletionBackend>,
    config: ChatConfig,
}

impl ConversationOrchestrator {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        completions: Arc<dyn CompletionBackend>,
        config: ChatConfig,
    ) -> Self {
        Self {
            store,
            completions,
            config,
        }
    }

    pub async fn create_prompt(
        &self,
        owner_id: Uuid,
        chat_ref: &str,
        prompt: &str,
        model: &str,
    ) -> Result<PromptReply> {
        let model: ModelName = model
            .parse()
            .map_err(|e: crate::models::UnknownModelError| ParleyError::UnknownModel(e.0))?;
        if prompt.trim().is_empty() {
            return Err(ParleyError::Validation("Prompt is required".to_string()));
        }

        // Compute stage: reads and provider calls only.
        let resolved = self.resolve_chat(owner_id, chat_ref, prompt).await?;
        let chat = resolved.chat();

        let history = match resolved {
            ResolvedChat::Existing(_) => {
                self.store
                    .recent_exchanges(chat.id, self.config.context_window)
                    .await?
            }
            ResolvedChat::Draft(_) => Vec::new(),
        };
        let messages = build_context(chat.summary.as_deref(), &history, prompt);

        let response = self.completions.complete(model, &messages).await?;

        let stored = match resolved {
            ResolvedChat::Existing(_) => self.store.count_exchanges(chat.id).await?,
            ResolvedChat::Draft(_) => 0,
        };
        let summary = if summary_due(stored, self.config.summary_interval) {
            Some(self.refresh_summary(chat, model, messages, &response).await?)
        } else {
            None
        };

        // Persist stage.
        let exchange = Exchange::new(chat.id, prompt.to_string(), response.clone(), model);
        let reply = PromptReply {
            chat_id: chat.id,
            title: chat.title.clone(),
            response,
        };
        let new_chat = match resolved {
            ResolvedChat::Draft(chat) => Some(chat),
            ResolvedChat::Existing(_) => None,
        };
        let created = new_chat.is_some();

        self.store
            .record_turn(&TurnRecord {
                new_chat,
                summary,
                exchange,
            })
            .await?;

        if created {
            tracing::info!(chat_id = %reply.chat_id, owner_id = %owner_id, "Chat created");
        }
        tracing::info!(
            chat_id = %reply.chat_id,
            model = %model,
            history = history.len(),
            "Prompt answered"
        );

        Ok(reply)
    }

    async fn resolve_chat(&self, owner_id: Uuid, chat_ref: &str, prompt: &str) -> Result<ResolvedChat> {
        let Some(chat_id) = parse_chat_ref(chat_ref) else {
            return Ok(ResolvedChat::Draft(Chat::draft(owner_id, prompt)));
        };

        match self.store.find_chat(chat_id).await? {
            Some(chat) if chat.owner_id == owner_id => Ok(ResolvedChat::Existing(chat)),
            _ => Err(ParleyError::NotFound(
                "Can't find chat enter correct id.".to_string(),
            )),
        }
    }

    async fn refresh_summary(
        &self,
        chat: &Chat,
        model: ModelName,
        mut messages: Vec<ChatMessage>,
        response: &str,
    ) -> Result<String> {
        messages.push(ChatMessage::assistant(response));
        messages.push(ChatMessage::user(SUMMARY_INSTRUCTION));

        let summary = self.completions.complete(model, &messages).await.map_err(|e| {
            tracing::error!(chat_id = %chat.id, error = %e, "Summary refresh failed");
            e
        })?;
        tracing::info!(chat_id = %chat.id, "Chat summary refreshed");
        Ok(summary)
    }

    pub async fn view_chats(&self, owner_id: Uuid) -> Result<Vec<Chat>> {
        self.store.list_chats(owner_id).await
    }

    /// Exchanges of a chat, oldest first. Chats the caller does not own read as empty.
    pub async fn view_prompts(&self, owner_id: Uuid, chat_ref: &str) -> Result<Vec<Exchange>> {
        let chat_id = require_chat_id(chat_ref)?;
        match self.store.find_chat(chat_id).await? {
            Some(chat) if chat.owner_id == owner_id => self.store.list_exchanges(chat_id).await,
            _ => Ok(Vec::new()),
        }
    }

    pub async fn delete_chat(&self, owner_id: Uuid, chat_ref: &str) -> Result<()> {
        let chat_id = require_chat_id(chat_ref)?;
        let removed = self.store.delete_chat(chat_id, owner_id).await?;
        tracing::info!(chat_id = %chat_id, removed, "Chat delete requested");
        Ok(())
    }
}

fn require_chat_id(chat_ref: &str) -> Result<Uuid> {
    Uuid::parse_str(chat_ref)
        .map_err(|_| ParleyError::Validation(format!("'{chat_ref}' is not a valid chat id")))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionError;
    use crate::models::Role;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Answers `reply N` for the Nth call; fails the call numbers listed in `fail_on`.
    #[derive(Default)]
    struct ScriptedBackend {
        calls: Mutex<Vec<Vec<ChatMessage>>>,
        fail_on: Vec<usize>,
    }

    impl ScriptedBackend {
        fn failing_on(calls: &[usize]) -> Self {
            Self {
                fail_on: calls.to_vec(),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<Vec<ChatMessage>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(
            &self,
            _model: ModelName,
            messages: &[ChatMessage],
        ) -> std::result::Result<String, CompletionError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(messages.to_vec());
            let n = calls.len();
            if self.fail_on.contains(&n) {
                return Err(CompletionError::Api {
                    code: 503,
                    message: "over capacity".to_string(),
                });
            }
            Ok(format!("reply {n}"))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn setup(backend: ScriptedBackend) -> (ConversationOrchestrator, Arc<MemoryStore>, Arc<ScriptedBackend>) {
        let store = Arc::new(MemoryStore::default());
        let backend = Arc::new(backend);
        let orchestrator =
            ConversationOrchestrator::new(store.clone(), backend.clone(), ChatConfig::default());
        (orchestrator, store, backend)
    }

    async fn seed_chat(store: &MemoryStore, owner: Uuid, exchanges: usize, summary: Option<&str>) -> Chat {
        let mut chat = Chat::draft(owner, "seeded chat");
        chat.summary = summary.map(String::from);
        for i in 0..exchanges {
            store
                .record_turn(&TurnRecord {
                    new_chat: (i == 0).then(|| chat.clone()),
                    summary: None,
                    exchange: Exchange::new(chat.id, format!("p{i}"), format!("r{i}"), ModelName::Llama3),
                })
                .await
                .unwrap();
        }
        chat
    }

    fn is_summary_request(messages: &[ChatMessage]) -> bool {
        messages
            .last()
            .is_some_and(|m| m.role == Role::User && m.content == SUMMARY_INSTRUCTION)
    }

    #[test]
    fn chat_ref_sentinel_and_garbage_mean_new() {
        assert!(parse_chat_ref("new").is_none());
        assert!(parse_chat_ref("not-a-uuid").is_none());
        let id = Uuid::new_v4();
        assert_eq!(parse_chat_ref(&id.to_string()), Some(id));
    }

    #[test]
    fn summary_due_on_positive_multiples_only() {
        assert!(!summary_due(0, 10));
        assert!(!summary_due(9, 10));
        assert!(summary_due(10, 10));
        assert!(!summary_due(11, 10));
        assert!(summary_due(20, 10));
        assert!(!summary_due(10, 0));
    }

    #[test]
    fn context_puts_summary_pair_first_and_prompt_last() {
        let chat_id = Uuid::new_v4();
        let history = vec![
            Exchange::new(chat_id, "p0".into(), "r0".into(), ModelName::Gemma),
            Exchange::new(chat_id, "p1".into(), "r1".into(), ModelName::Gemma),
        ];

        let messages = build_context(Some("we talked"), &history, "next");

        assert_eq!(
            messages,
            vec![
                ChatMessage::user("Previous conversation summary: we talked"),
                ChatMessage::assistant(SUMMARY_ACK),
                ChatMessage::user("p0"),
                ChatMessage::assistant("r0"),
                ChatMessage::user("p1"),
                ChatMessage::assistant("r1"),
                ChatMessage::user("next"),
            ]
        );
        assert_eq!(build_context(None, &[], "hi"), vec![ChatMessage::user("hi")]);
    }

    #[tokio::test]
    async fn new_chat_creates_one_chat_and_one_exchange() {
        let (orchestrator, store, backend) = setup(ScriptedBackend::default());
        let owner = Uuid::new_v4();

        let reply = orchestrator
            .create_prompt(owner, NEW_CHAT, "Hello, how are you doing today?", "llama3")
            .await
            .unwrap();

        assert_eq!(reply.title, "Hello, how are you doing...");
        assert_eq!(reply.response, "reply 1");
        let chats = store.list_chats(owner).await.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].id, reply.chat_id);
        assert!(chats[0].summary.is_none());
        let exchanges = store.list_exchanges(reply.chat_id).await.unwrap();
        assert_eq!(exchanges.len(), 1);
        assert_eq!(exchanges[0].prompt, "Hello, how are you doing today?");
        assert_eq!(exchanges[0].model, ModelName::Llama3);
        assert_eq!(backend.calls(), vec![vec![ChatMessage::user("Hello, how are you doing today?")]]);
    }

    #[tokio::test]
    async fn malformed_chat_id_starts_a_new_chat() {
        let (orchestrator, store, _) = setup(ScriptedBackend::default());
        let owner = Uuid::new_v4();

        orchestrator
            .create_prompt(owner, "12345", "hi there", "gemma")
            .await
            .unwrap();

        assert_eq!(store.list_chats(owner).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn follow_up_replays_previous_turn() {
        let (orchestrator, _, backend) = setup(ScriptedBackend::default());
        let owner = Uuid::new_v4();

        let first = orchestrator
            .create_prompt(owner, NEW_CHAT, "first question", "mixtral")
            .await
            .unwrap();
        let second = orchestrator
            .create_prompt(owner, &first.chat_id.to_string(), "second question", "mixtral")
            .await
            .unwrap();

        assert_eq!(second.chat_id, first.chat_id);
        assert_eq!(second.title, "first question...");
        assert_eq!(
            backend.calls()[1],
            vec![
                ChatMessage::user("first question"),
                ChatMessage::assistant("reply 1"),
                ChatMessage::user("second question"),
            ]
        );
    }

    #[tokio::test]
    async fn context_is_bounded_to_ten_recent_turns_plus_summary() {
        let (orchestrator, store, backend) = setup(ScriptedBackend::default());
        let owner = Uuid::new_v4();
        let chat = seed_chat(&store, owner, 25, Some("earlier stuff")).await;

        orchestrator
            .create_prompt(owner, &chat.id.to_string(), "latest", "llama3")
            .await
            .unwrap();

        let calls = backend.calls();
        assert_eq!(calls.len(), 1, "25 stored exchanges must not trigger a summary");
        let sent = &calls[0];
        assert_eq!(sent.len(), 2 + 10 * 2 + 1);
        assert_eq!(sent[0].content, "Previous conversation summary: earlier stuff");
        assert_eq!(sent[2], ChatMessage::user("p15"));
        assert_eq!(sent[21], ChatMessage::assistant("r24"));
        assert_eq!(sent[22], ChatMessage::user("latest"));
    }

    #[tokio::test]
    async fn summary_refresh_on_eleventh_and_twenty_first_prompt() {
        let (orchestrator, store, backend) = setup(ScriptedBackend::default());
        let owner = Uuid::new_v4();

        let first = orchestrator
            .create_prompt(owner, NEW_CHAT, "turn 1", "llama3")
            .await
            .unwrap();
        let chat_ref = first.chat_id.to_string();

        for turn in 2..=10 {
            orchestrator
                .create_prompt(owner, &chat_ref, &format!("turn {turn}"), "llama3")
                .await
                .unwrap();
        }
        assert!(backend.calls().iter().all(|c| !is_summary_request(c)));
        assert!(store.find_chat(first.chat_id).await.unwrap().unwrap().summary.is_none());

        orchestrator
            .create_prompt(owner, &chat_ref, "turn 11", "llama3")
            .await
            .unwrap();
        let calls = backend.calls();
        assert_eq!(calls.len(), 12);
        assert!(is_summary_request(&calls[11]));
        assert_eq!(
            calls[11][calls[11].len() - 2],
            ChatMessage::assistant("reply 11"),
            "summary request must include the fresh response"
        );
        let chat = store.find_chat(first.chat_id).await.unwrap().unwrap();
        assert_eq!(chat.summary.as_deref(), Some("reply 12"));

        for turn in 12..=21 {
            orchestrator
                .create_prompt(owner, &chat_ref, &format!("turn {turn}"), "llama3")
                .await
                .unwrap();
        }
        let summary_calls = backend.calls().iter().filter(|c| is_summary_request(c)).count();
        assert_eq!(summary_calls, 2);
        assert_eq!(store.count_exchanges(first.chat_id).await.unwrap(), 21);

        // The turn after a refresh opens with the stored summary.
        orchestrator
            .create_prompt(owner, &chat_ref, "turn 22", "llama3")
            .await
            .unwrap();
        let last = backend.calls().last().cloned().unwrap();
        assert!(last[0].content.starts_with(SUMMARY_PREFIX));
    }

    #[tokio::test]
    async fn upstream_failure_persists_nothing() {
        let (orchestrator, store, _) = setup(ScriptedBackend::failing_on(&[1]));
        let owner = Uuid::new_v4();

        let result = orchestrator
            .create_prompt(owner, NEW_CHAT, "hello", "llama3")
            .await;

        assert!(matches!(result, Err(ParleyError::Upstream(_))));
        assert!(store.list_chats(owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn summary_failure_aborts_the_whole_turn() {
        let (orchestrator, store, backend) = setup(ScriptedBackend::failing_on(&[2]));
        let owner = Uuid::new_v4();
        let chat = seed_chat(&store, owner, 10, Some("old summary")).await;

        let result = orchestrator
            .create_prompt(owner, &chat.id.to_string(), "eleventh", "llama3")
            .await;

        assert!(matches!(result, Err(ParleyError::Upstream(_))));
        assert_eq!(backend.calls().len(), 2);
        assert_eq!(store.count_exchanges(chat.id).await.unwrap(), 10);
        let stored = store.find_chat(chat.id).await.unwrap().unwrap();
        assert_eq!(stored.summary.as_deref(), Some("old summary"));
    }

    #[tokio::test]
    async fn unknown_model_is_rejected_before_any_call() {
        let (orchestrator, store, backend) = setup(ScriptedBackend::default());
        let owner = Uuid::new_v4();

        let result = orchestrator
            .create_prompt(owner, NEW_CHAT, "hello", "gpt-4o")
            .await;

        assert!(matches!(result, Err(ParleyError::UnknownModel(ref m)) if m == "gpt-4o"));
        assert!(backend.calls().is_empty());
        assert!(store.list_chats(owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_prompt_is_invalid() {
        let (orchestrator, _, backend) = setup(ScriptedBackend::default());
        let result = orchestrator
            .create_prompt(Uuid::new_v4(), NEW_CHAT, "   ", "llama3")
            .await;
        assert!(matches!(result, Err(ParleyError::Validation(_))));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_or_foreign_chat_is_not_found() {
        let (orchestrator, store, _) = setup(ScriptedBackend::default());
        let owner = Uuid::new_v4();
        let chat = seed_chat(&store, owner, 1, None).await;

        let missing = orchestrator
            .create_prompt(owner, &Uuid::new_v4().to_string(), "hi", "llama3")
            .await;
        let foreign = orchestrator
            .create_prompt(Uuid::new_v4(), &chat.id.to_string(), "hi", "llama3")
            .await;

        assert!(matches!(missing, Err(ParleyError::NotFound(_))));
        assert!(matches!(foreign, Err(ParleyError::NotFound(_))));
    }

    #[tokio::test]
    async fn view_chats_is_owner_scoped_newest_first() {
        let (orchestrator, _, _) = setup(ScriptedBackend::default());
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let older = orchestrator.create_prompt(alice, NEW_CHAT, "older", "llama3").await.unwrap();
        orchestrator.create_prompt(bob, NEW_CHAT, "bob's", "llama3").await.unwrap();
        let newer = orchestrator.create_prompt(alice, NEW_CHAT, "newer", "llama3").await.unwrap();

        let chats = orchestrator.view_chats(alice).await.unwrap();
        let ids: Vec<Uuid> = chats.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![newer.chat_id, older.chat_id]);
    }

    #[tokio::test]
    async fn delete_removes_chat_and_history() {
        let (orchestrator, store, _) = setup(ScriptedBackend::default());
        let owner = Uuid::new_v4();
        let chat = seed_chat(&store, owner, 3, None).await;
        let chat_ref = chat.id.to_string();

        assert_eq!(orchestrator.view_prompts(owner, &chat_ref).await.unwrap().len(), 3);
        orchestrator.delete_chat(owner, &chat_ref).await.unwrap();

        assert!(orchestrator.view_prompts(owner, &chat_ref).await.unwrap().is_empty());
        assert!(orchestrator.view_chats(owner).await.unwrap().is_empty());
        assert_eq!(store.count_exchanges(chat.id).await.unwrap(), 0);
        // Deleting again is a no-op.
        orchestrator.delete_chat(owner, &chat_ref).await.unwrap();
    }

    #[tokio::test]
    async fn view_prompts_hides_foreign_chats_and_rejects_bad_ids() {
        let (orchestrator, store, _) = setup(ScriptedBackend::default());
        let owner = Uuid::new_v4();
        let chat = seed_chat(&store, owner, 2, None).await;

        let foreign = orchestrator
            .view_prompts(Uuid::new_v4(), &chat.id.to_string())
            .await
            .unwrap();
        assert!(foreign.is_empty());

        let prompts: Vec<String> = orchestrator
            .view_prompts(owner, &chat.id.to_string())
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.prompt)
            .collect();
        assert_eq!(prompts, vec!["p0".to_string(), "p1".to_string()]);

        assert!(matches!(
            orchestrator.view_prompts(owner, "new").await,
            Err(ParleyError::Validation(_))
        ));
        assert!(matches!(
            orchestrator.delete_chat(owner, "nope").await,
            Err(ParleyError::Validation(_))
        ));
    }
}
