//! Turns one user submission into one assistant reply.

use std::sync::Arc;
use std::time::Duration;

use crate::bridge;
use crate::config::Config;
use crate::error::TurnError;
use crate::provider::ModelProvider;
use crate::search::{self, SearchHit, SearchProvider};
use crate::session::{Attachment, ChatTurn, Mode, SessionState};

const SEARCH_PREFIX: &str = "search:";

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// When false every turn is sent as Normal, whatever the session selected.
    pub research_enabled: bool,
    pub search_command: bool,
    pub timeout: Duration,
    /// Hits kept per search, never more than [`search::MAX_SEARCH_RESULTS`].
    pub search_limit: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        DispatchSettings {
            research_enabled: true,
            search_command: false,
            timeout: Duration::from_secs(120),
            search_limit: search::MAX_SEARCH_RESULTS,
        }
    }
}

impl DispatchSettings {
    pub fn from_config(config: &Config) -> Self {
        DispatchSettings {
            research_enabled: config.features.research_mode,
            search_command: config.features.search_command,
            timeout: config.provider.request_timeout(),
            search_limit: config.search.result_limit(),
        }
    }
}

/// Builds the single prompt string sent to the model.
///
/// Attachment bytes never enter the prompt, only their names. A search
/// section is added only when there is at least one hit.
pub fn compose_prompt(text: &str, mode: Mode, attachments: &[Attachment], hits: &[SearchHit]) -> String {
    let mut prompt = format!("Mode: {}\nUser: {}", mode, text);

    if !attachments.is_empty() {
        let names: Vec<&str> = attachments.iter().map(|a| a.name.as_str()).collect();
        prompt.push_str(&format!("\n\nUser uploaded files: {}", names.join(", ")));
    }

    if !hits.is_empty() {
        prompt.push_str(&format!("\n\nSearch results:\n{}", search::format_hits(hits)));
    }

    prompt
}

fn strip_search_prefix(text: &str) -> Option<&str> {
    text.get(..SEARCH_PREFIX.len())
        .filter(|prefix| prefix.eq_ignore_ascii_case(SEARCH_PREFIX))
        .map(|_| &text[SEARCH_PREFIX.len()..])
}

pub struct TurnDispatcher {
    model: Arc<dyn ModelProvider>,
    search: Arc<dyn SearchProvider>,
    settings: DispatchSettings,
}

impl TurnDispatcher {
    pub fn new(model: Arc<dyn ModelProvider>, search: Arc<dyn SearchProvider>, settings: DispatchSettings) -> Self {
        TurnDispatcher { model, search, settings }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn model_name(&self) -> &str {
        self.model.model()
    }

    pub fn effective_mode(&self, session: &SessionState) -> Mode {
        if self.settings.research_enabled {
            session.mode()
        } else {
            Mode::Normal
        }
    }

    /// Submit `text` and block until the assistant turn is appended.
    ///
    /// The user turn is appended before any network call and stays in the
    /// history when the call fails; it is then reported by
    /// [`SessionState::is_failed`]. Staged attachments are only consumed on
    /// success so a resend carries them again.
    pub fn submit<'s>(&self, session: &'s mut SessionState, text: &str) -> Result<&'s ChatTurn, TurnError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(TurnError::EmptyInput);
        }

        if self.settings.search_command {
            if let Some(query) = strip_search_prefix(trimmed) {
                return self.run_search_command(session, text, query.trim());
            }
        }

        let mode = self.effective_mode(session);
        let attachments = session.pending_attachments().to_vec();
        let user_index = session.append(ChatTurn::user(text, mode, attachments.clone()));
        log::info!(
            "Dispatching turn {} ({} mode, {} attachment(s)) to {}",
            user_index,
            mode,
            attachments.len(),
            self.model.name()
        );

        let model = Arc::clone(&self.model);
        let search = Arc::clone(&self.search);
        let timeout = self.settings.timeout;
        let limit = self.settings.search_limit;
        let query = trimmed.to_string();

        let outcome = bridge::run_to_completion(async move {
            let hits = match mode {
                Mode::Research => {
                    // A stalled search degrades to no results, like a failed one.
                    let lookup = search::resolve_search(search.as_ref(), &query, limit);
                    tokio::time::timeout(timeout, lookup).await.unwrap_or_else(|_| {
                        log::warn!(
                            "Search via {} timed out after {:?}, continuing without results",
                            search.name(),
                            timeout
                        );
                        Vec::new()
                    })
                }
                Mode::Normal => Vec::new(),
            };
            let prompt = compose_prompt(&query, mode, &attachments, &hits);
            log::debug!("Prompt:\n{}", prompt);

            match tokio::time::timeout(timeout, model.complete(&prompt)).await {
                Ok(reply) => reply.map_err(TurnError::from),
                Err(_) => Err(TurnError::Timeout(timeout)),
            }
        });

        let reply = match outcome.map_err(TurnError::from).and_then(|r| r) {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("Turn {} failed: {}", user_index, e);
                session.mark_failed(user_index);
                return Err(e);
            }
        };

        let attachments = session.consume_attachments();
        let index = session.append(ChatTurn::assistant(reply, mode, attachments));
        Ok(&session.history()[index])
    }

    /// `search: <query>` answers straight from the search provider.
    fn run_search_command<'s>(
        &self,
        session: &'s mut SessionState,
        text: &str,
        query: &str,
    ) -> Result<&'s ChatTurn, TurnError> {
        if query.is_empty() {
            return Err(TurnError::EmptyInput);
        }

        let mode = self.effective_mode(session);
        let attachments = session.pending_attachments().to_vec();
        let user_index = session.append(ChatTurn::user(text, mode, attachments));
        log::info!("Running search command for turn {} via {}", user_index, self.search.name());

        let search = Arc::clone(&self.search);
        let timeout = self.settings.timeout;
        let limit = self.settings.search_limit;
        let owned_query = query.to_string();

        let outcome = bridge::run_to_completion(async move {
            tokio::time::timeout(timeout, search::resolve_search(search.as_ref(), &owned_query, limit))
                .await
                .map_err(|_| TurnError::Timeout(timeout))
        });

        let hits = match outcome.map_err(TurnError::from).and_then(|r| r) {
            Ok(hits) => hits,
            Err(e) => {
                log::warn!("Search command for turn {} failed: {}", user_index, e);
                session.mark_failed(user_index);
                return Err(e);
            }
        };

        let reply = if hits.is_empty() {
            format!("No search results for '{}'.", query)
        } else {
            format!("Here are the search results for '{}':\n{}", query, search::format_hits(&hits))
        };

        let attachments = session.consume_attachments();
        let index = session.append(ChatTurn::assistant(reply, mode, attachments));
        Ok(&session.history()[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::search::tests::{hit, FixedSearch};
    use crate::search::NoSearch;
    use crate::session::Sender;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every prompt and answers with a canned reply.
    struct MockProvider {
        reply: Option<String>,
        delay: Duration,
        prompts: Mutex<Vec<String>>,
    }

    impl MockProvider {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Some(reply.to_string()),
                delay: Duration::ZERO,
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: None,
                delay: Duration::ZERO,
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn hanging() -> Arc<Self> {
            Arc::new(Self {
                reply: Some("too late".to_string()),
                delay: Duration::from_secs(30),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelProvider for MockProvider {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn model(&self) -> &str {
            "mock-model"
        }

        async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.reply
                .clone()
                .ok_or_else(|| ProviderError::Decode("rate limited".to_string()))
        }
    }

    fn dispatcher(model: Arc<MockProvider>, search: Arc<dyn SearchProvider>) -> TurnDispatcher {
        TurnDispatcher::new(model, search, DispatchSettings::default())
    }

    fn file(name: &str) -> Attachment {
        Attachment::new(name, name.as_bytes().to_vec(), "text/plain")
    }

    /// A search backend that never answers.
    struct StalledSearch;

    #[async_trait]
    impl SearchProvider for StalledSearch {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![hit(1)])
        }
    }

    #[test]
    fn test_hello_scenario() {
        let model = MockProvider::replying("Hi! How can I help?");
        let dispatcher = dispatcher(model.clone(), Arc::new(NoSearch));
        let mut session = SessionState::new();

        let reply = dispatcher.submit(&mut session, "Hello").unwrap();
        assert_eq!(reply.sender(), Sender::Assistant);
        assert_eq!(reply.message(), "Hi! How can I help?");

        assert_eq!(model.prompts(), vec!["Mode: Normal\nUser: Hello".to_string()]);
        let history = session.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].sender(), Sender::User);
        assert_eq!(history[0].message(), "Hello");
        assert_eq!(history[0].mode(), Mode::Normal);
        assert!(!session.is_failed(0));
    }

    #[test]
    fn test_prompt_uses_trimmed_text_history_keeps_raw() {
        let model = MockProvider::replying("Hi");
        let dispatcher = dispatcher(model.clone(), Arc::new(NoSearch));
        let mut session = SessionState::new();

        dispatcher.submit(&mut session, "  Hello ").unwrap();
        assert_eq!(model.prompts(), vec!["Mode: Normal\nUser: Hello".to_string()]);
        assert_eq!(session.history()[0].message(), "  Hello ");
    }

    #[test]
    fn test_empty_input_changes_nothing() {
        let model = MockProvider::replying("unused");
        let dispatcher = dispatcher(model.clone(), Arc::new(NoSearch));
        let mut session = SessionState::new();
        session.stage(vec![file("a.txt")]);

        for input in ["", "   ", "\n\t"] {
            let err = dispatcher.submit(&mut session, input).unwrap_err();
            assert!(matches!(err, TurnError::EmptyInput));
            assert!(err.is_user_correctable());
        }
        assert!(session.history().is_empty());
        assert_eq!(session.pending_attachments().len(), 1);
        assert!(model.prompts().is_empty());
    }

    #[test]
    fn test_search_prefix_is_literal_text_by_default() {
        let model = MockProvider::replying("Cats are great.");
        let search = Arc::new(FixedSearch { hits: Some(vec![hit(1)]) });
        let dispatcher = dispatcher(model.clone(), search);
        let mut session = SessionState::new();

        dispatcher.submit(&mut session, "search: cats").unwrap();
        assert_eq!(model.prompts(), vec!["Mode: Normal\nUser: search: cats".to_string()]);
        assert_eq!(session.history()[0].message(), "search: cats");
    }

    #[test]
    fn test_search_command_when_enabled() {
        let model = MockProvider::replying("unused");
        let search = Arc::new(FixedSearch { hits: Some((1..=4).map(hit).collect()) });
        let settings = DispatchSettings { search_command: true, ..DispatchSettings::default() };
        let dispatcher = TurnDispatcher::new(model.clone(), search, settings);
        let mut session = SessionState::new();

        let reply = dispatcher.submit(&mut session, "Search: cats").unwrap();
        assert_eq!(
            reply.message(),
            "Here are the search results for 'cats':\n\
             1. Result 1 - https://example.com/1\n\
             2. Result 2 - https://example.com/2\n\
             3. Result 3 - https://example.com/3"
        );
        assert!(model.prompts().is_empty());
        assert_eq!(session.history().len(), 2);

        assert!(matches!(dispatcher.submit(&mut session, "search:   "), Err(TurnError::EmptyInput)));
        assert_eq!(session.history().len(), 2);
    }

    #[test]
    fn test_search_command_without_results() {
        let settings = DispatchSettings { search_command: true, ..DispatchSettings::default() };
        let dispatcher = TurnDispatcher::new(MockProvider::replying("unused"), Arc::new(NoSearch), settings);
        let mut session = SessionState::new();

        let reply = dispatcher.submit(&mut session, "search: cats").unwrap();
        assert_eq!(reply.message(), "No search results for 'cats'.");
    }

    #[test]
    fn test_research_mode_appends_search_section() {
        let model = MockProvider::replying("Summary");
        let search = Arc::new(FixedSearch { hits: Some((1..=5).map(hit).collect()) });
        let dispatcher = dispatcher(model.clone(), search);
        let mut session = SessionState::new();
        session.set_mode(Mode::Research);

        dispatcher.submit(&mut session, "rust async").unwrap();
        assert_eq!(
            model.prompts()[0],
            "Mode: Research\nUser: rust async\n\nSearch results:\n\
             1. Result 1 - https://example.com/1\n\
             2. Result 2 - https://example.com/2\n\
             3. Result 3 - https://example.com/3"
        );
        assert_eq!(session.history()[0].mode(), Mode::Research);
        assert_eq!(session.history()[1].mode(), Mode::Research);
    }

    #[test]
    fn test_research_mode_survives_search_failure() {
        let model = MockProvider::replying("Answer anyway");
        let dispatcher = dispatcher(model.clone(), Arc::new(FixedSearch { hits: None }));
        let mut session = SessionState::new();
        session.set_mode(Mode::Research);

        let reply = dispatcher.submit(&mut session, "rust async").unwrap();
        assert_eq!(reply.message(), "Answer anyway");
        assert_eq!(model.prompts()[0], "Mode: Research\nUser: rust async");
    }

    #[test]
    fn test_research_mode_with_stalled_search_still_answers() {
        let model = MockProvider::replying("Answer without sources");
        let settings = DispatchSettings { timeout: Duration::from_millis(50), ..DispatchSettings::default() };
        let dispatcher = TurnDispatcher::new(model.clone(), Arc::new(StalledSearch), settings);
        let mut session = SessionState::new();
        session.set_mode(Mode::Research);

        let started = std::time::Instant::now();
        let reply = dispatcher.submit(&mut session, "rust async").unwrap();
        assert_eq!(reply.message(), "Answer without sources");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(model.prompts(), vec!["Mode: Research\nUser: rust async".to_string()]);
        assert!(!session.is_failed(0));
    }

    #[test]
    fn test_search_command_with_stalled_search_times_out() {
        let settings = DispatchSettings {
            search_command: true,
            timeout: Duration::from_millis(50),
            ..DispatchSettings::default()
        };
        let dispatcher = TurnDispatcher::new(MockProvider::replying("unused"), Arc::new(StalledSearch), settings);
        let mut session = SessionState::new();

        let err = dispatcher.submit(&mut session, "search: cats").unwrap_err();
        assert!(matches!(err, TurnError::Timeout(_)));
        assert!(session.is_failed(0));
    }

    #[test]
    fn test_research_mode_honours_search_limit() {
        let model = MockProvider::replying("Summary");
        let search = Arc::new(FixedSearch { hits: Some((1..=5).map(hit).collect()) });
        let settings = DispatchSettings { search_limit: 1, ..DispatchSettings::default() };
        let dispatcher = TurnDispatcher::new(model.clone(), search, settings);
        let mut session = SessionState::new();
        session.set_mode(Mode::Research);

        dispatcher.submit(&mut session, "rust async").unwrap();
        assert_eq!(
            model.prompts()[0],
            "Mode: Research\nUser: rust async\n\nSearch results:\n1. Result 1 - https://example.com/1"
        );
    }

    #[test]
    fn test_settings_from_config() {
        let config = Config::from_toml_str(
            "[search]\nmax_results = 2\n\n[features]\nsearch_command = true\n\n[provider]\nrequest_timeout_secs = 5\n",
        )
        .unwrap();
        let settings = DispatchSettings::from_config(&config);
        assert_eq!(settings.search_limit, 2);
        assert!(settings.search_command);
        assert!(settings.research_enabled);
        assert_eq!(settings.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_research_disabled_forces_normal() {
        let model = MockProvider::replying("ok");
        let search = Arc::new(FixedSearch { hits: Some(vec![hit(1)]) });
        let settings = DispatchSettings { research_enabled: false, ..DispatchSettings::default() };
        let dispatcher = TurnDispatcher::new(model.clone(), search, settings);
        let mut session = SessionState::new();
        session.set_mode(Mode::Research);

        dispatcher.submit(&mut session, "hi").unwrap();
        assert_eq!(model.prompts()[0], "Mode: Normal\nUser: hi");
        assert_eq!(session.history()[0].mode(), Mode::Normal);
    }

    #[test]
    fn test_attachments_follow_the_exchange() {
        let model = MockProvider::replying("Got them");
        let dispatcher = dispatcher(model.clone(), Arc::new(NoSearch));
        let mut session = SessionState::new();
        session.stage(vec![file("notes.txt"), file("cat.png")]);

        dispatcher.submit(&mut session, "Look at these").unwrap();

        assert_eq!(
            model.prompts()[0],
            "Mode: Normal\nUser: Look at these\n\nUser uploaded files: notes.txt, cat.png"
        );
        let history = session.history();
        assert_eq!(history[0].attachments(), history[1].attachments());
        assert_eq!(history[1].attachments().len(), 2);
        assert!(session.pending_attachments().is_empty());
    }

    #[test]
    fn test_provider_failure_keeps_user_turn() {
        let model = MockProvider::failing();
        let dispatcher = dispatcher(model.clone(), Arc::new(NoSearch));
        let mut session = SessionState::new();
        session.stage(vec![file("a.txt")]);
        let before = session.history().len();

        let err = dispatcher.submit(&mut session, "Hello").unwrap_err();
        assert!(matches!(err, TurnError::Provider(_)));
        assert!(!err.is_user_correctable());

        assert_eq!(session.history().len(), before + 1);
        assert_eq!(session.history()[0].sender(), Sender::User);
        assert!(session.is_failed(0));
        // still staged for the resend
        assert_eq!(session.pending_attachments().len(), 1);
        assert_eq!(model.prompts().len(), 1);
    }

    #[test]
    fn test_resend_after_failure_appends_new_turns() {
        let dispatcher = dispatcher(MockProvider::failing(), Arc::new(NoSearch));
        let mut session = SessionState::new();
        assert!(dispatcher.submit(&mut session, "Hello").is_err());

        let retry = TurnDispatcher::new(MockProvider::replying("Hi"), Arc::new(NoSearch), DispatchSettings::default());
        retry.submit(&mut session, "Hello").unwrap();

        assert_eq!(session.history().len(), 3);
        assert!(session.is_failed(0));
        assert!(!session.is_failed(1));
    }

    #[test]
    fn test_hung_provider_times_out() {
        let settings = DispatchSettings { timeout: Duration::from_millis(50), ..DispatchSettings::default() };
        let dispatcher = TurnDispatcher::new(MockProvider::hanging(), Arc::new(NoSearch), settings);
        let mut session = SessionState::new();

        let err = dispatcher.submit(&mut session, "Hello").unwrap_err();
        assert!(matches!(err, TurnError::Timeout(d) if d == Duration::from_millis(50)));
        assert_eq!(session.history().len(), 1);
        assert!(session.is_failed(0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_submit_from_inside_a_runtime() {
        let model = MockProvider::replying("from the runtime");
        let dispatcher = dispatcher(model, Arc::new(NoSearch));
        let mut session = SessionState::new();

        let reply = dispatcher.submit(&mut session, "Hello").unwrap();
        assert_eq!(reply.message(), "from the runtime");
    }

    #[test]
    fn test_compose_prompt_orders_sections() {
        let prompt = compose_prompt("q", Mode::Research, &[file("a.md")], &[hit(1)]);
        assert_eq!(
            prompt,
            "Mode: Research\nUser: q\n\nUser uploaded files: a.md\n\nSearch results:\n1. Result 1 - https://example.com/1"
        );
    }

    #[test]
    fn test_strip_search_prefix() {
        assert_eq!(strip_search_prefix("SEARCH: dogs"), Some(" dogs"));
        assert_eq!(strip_search_prefix("searching"), None);
        assert_eq!(strip_search_prefix("sé"), None);
    }
}
