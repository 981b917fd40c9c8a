//! Demo binary: run one conversation through the orchestrator against a
//! locally running LM Studio endpoint.

use std::io::Write as _;

use lmstudio_orchestrator::model::{Conversation, ConversationSettings, Message};
use lmstudio_orchestrator::orchestrator::OrchestratorLimits;
use lmstudio_orchestrator::transport::LmStudioTransport;
use lmstudio_orchestrator::{Config, Orchestrator};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    config.validate()?;

    let model = std::env::var("LMSTUDIO_MODEL").unwrap_or_else(|_| "local-model".to_string());

    print!("prompt> ");
    std::io::stdout().flush().ok();
    let mut prompt = String::new();
    std::io::stdin().read_line(&mut prompt)?;
    let prompt = prompt.trim();

    let transport = LmStudioTransport::new(
        config.api_endpoint.clone(),
        config.api_timeout_secs,
        config.preflight_timeout_secs,
    );

    let orchestrator = Orchestrator::new(
        transport,
        OrchestratorLimits {
            max_tool_rounds: config.max_tool_rounds,
            checkpoint_soft_limit: config.checkpoint_soft_limit,
        },
    );

    let conversation = Conversation {
        id: uuid::Uuid::new_v4().to_string(),
        model,
        messages: vec![Message::user(prompt)],
        settings: ConversationSettings {
            system_prompt: Some(config.default_system_prompt.clone()),
            temperature: Some(config.default_temperature),
            max_tokens: Some(config.default_max_tokens),
            top_p: Some(config.default_top_p),
            repetition_penalty: Some(config.default_repetition_penalty),
            context_limit: Some(config.default_context_limit),
            token_saver: config.default_token_saver,
            ..ConversationSettings::default()
        },
    };

    let cancel = CancellationToken::new();
    let mut stdout_sink = |delta: &str| {
        print!("{}", delta);
        std::io::stdout().flush().ok();
    };

    let answer = orchestrator
        .run(&conversation, None, None, Some(&mut stdout_sink), true, &cancel)
        .await?;

    println!();
    tracing::info!(len = answer.len(), "conversation finished");
    Ok(())
}
