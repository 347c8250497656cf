//! `replybot history`: print a conversation's stored turns.

use crate::runtime;
use replybot_core::history::HistoryStore;
use replybot_core::message::ConversationKey;
use std::path::Path;

pub async fn run(config_path: Option<&Path>, key: &str) -> anyhow::Result<()> {
    let config = runtime::load_config(config_path)?;
    let storage = runtime::open_storage(&config)?;
    let key = ConversationKey::from(key);

    let (history, revision) = storage.history.get(&key).await?;
    let report = serde_json::json!({
        "key": key,
        "revision": revision,
        "turns": history.turns(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
