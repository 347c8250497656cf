//! `replybot chat`: interactive or single-message terminal chat.

use crate::runtime::{self, Runtime};
use replybot_agent::{Agent, Persistence};
use replybot_channels::ConsoleMessenger;
use replybot_core::context::{ReplyHandle, RequestContext};
use replybot_core::message::ConversationKey;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(
    config_path: Option<&Path>,
    conversation: &str,
    message: Option<String>,
) -> anyhow::Result<()> {
    let config = runtime::load_config(config_path)?;
    let runtime = Runtime::build(config, Arc::new(ConsoleMessenger::stdout()))?;
    let cache = runtime.prompt_cache().await;
    let agent = runtime.agent(cache.clone());
    let key = ConversationKey::from(conversation);

    let result = match message {
        Some(text) => {
            send(&agent, &key, 0, &text).await;
            Ok(())
        }
        None => interactive(&runtime, &agent, &key).await,
    };

    runtime.shutdown(cache).await;
    result
}

async fn interactive(
    runtime: &Runtime,
    agent: &Agent,
    key: &ConversationKey,
) -> anyhow::Result<()> {
    println!();
    println!("  replybot interactive chat");
    println!("  Provider:      {}", runtime.provider.name());
    println!("  Model:         {}", runtime.config.provider.model);
    println!("  Conversation:  {key}");
    println!("  Tools:         {}", runtime.tools.names().join(", "));
    println!("  Type 'exit' or press Ctrl+D to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut turn = 0u64;
    loop {
        print!("you> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }
        turn += 1;
        send(agent, key, turn, line).await;
    }
    println!();
    Ok(())
}

/// One invocation; the bot's answer reaches stdout through the console messenger.
async fn send(agent: &Agent, key: &ConversationKey, turn: u64, text: &str) {
    let ctx = RequestContext::new(
        key.clone(),
        "console",
        ReplyHandle::new(format!("console-{turn}")),
    );
    match agent.respond(&ctx, text).await {
        Ok(outcome) => {
            if !outcome.reply_delivered {
                if let Some(answer) = &outcome.final_text {
                    println!("bot> {answer}");
                }
            }
            if let Persistence::Gap(e) = &outcome.persistence {
                eprintln!("[warning] this exchange was not saved: {e}");
            }
        }
        Err(e) => eprintln!("[error] {} ({})", e, e.kind()),
    }
}
