//! One-shot helpers on top of the blocking path
//!
//! Each helper builds a non-streamed request with a fitting scenario and
//! system prompt and returns just the generated text.

use crate::dispatcher::RequestDispatcher;
use crate::error::DispatchError;
use crate::request::{RequestConfig, Scenario};
use crate::transport::Transport;

/// System prompt used by [`RequestDispatcher::quick_chat`] when none is given
pub const DEFAULT_CHAT_SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant. Give accurate, concise answers.";

const TECHNICAL_SYSTEM_PROMPT: &str = "You are a technical expert. Give detailed, accurate and \
     practical answers, with examples where they help.";

/// Prompt for a code-generation request
fn code_prompt(requirement: &str, language: &str) -> String {
    format!("Generate {language} code for the following requirement:\n{requirement}")
}

fn code_system_prompt(language: &str) -> String {
    format!(
        "You are an expert {language} programmer. Write clean, commented and efficient \
         code, including any imports or headers it needs."
    )
}

/// Prompt for a technical question, with optional background
fn question_prompt(question: &str, context: &str) -> String {
    if context.is_empty() {
        question.to_string()
    } else {
        format!("Context: {context}\n\nQuestion: {question}")
    }
}

impl<T: Transport + 'static> RequestDispatcher<T> {
    /// General chat; an empty `model_hint` lets the selector choose
    pub async fn quick_chat(
        &self,
        message: &str,
        system_prompt: Option<&str>,
        model_hint: &str,
    ) -> Result<String, DispatchError> {
        let system = system_prompt
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_CHAT_SYSTEM_PROMPT);
        let config = RequestConfig::new(message)
            .with_system(system)
            .with_model(model_hint)
            .with_scenario(Scenario::GeneralChat)
            .with_stream(false);
        self.generate_text(config).await
    }

    /// Code generation in `language`
    pub async fn generate_code(
        &self,
        requirement: &str,
        language: &str,
    ) -> Result<String, DispatchError> {
        let config = RequestConfig::new(code_prompt(requirement, language))
            .with_system(code_system_prompt(language))
            .with_scenario(Scenario::CodeGeneration)
            .with_stream(false);
        self.generate_text(config).await
    }

    /// Technical support answer; `context` may be empty
    pub async fn answer_technical_question(
        &self,
        question: &str,
        context: &str,
    ) -> Result<String, DispatchError> {
        let config = RequestConfig::new(question_prompt(question, context))
            .with_system(TECHNICAL_SYSTEM_PROMPT)
            .with_scenario(Scenario::TechnicalSupport)
            .with_stream(false);
        self.generate_text(config).await
    }

    async fn generate_text(&self, config: RequestConfig) -> Result<String, DispatchError> {
        self.run_blocking(&config)
            .await
            .map(|response| response.content)
            .map_err(|(_, error)| error)
    }
}
