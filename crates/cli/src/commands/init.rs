//! `replybot init`: write a starter config file.

use anyhow::{Context, bail};
use replybot_config::AppConfig;
use std::path::Path;

pub fn run(path: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => AppConfig::config_dir().join("config.toml"),
    };
    if path.exists() && !force {
        bail!("{} already exists; pass --force to overwrite it", path.display());
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    std::fs::write(&path, AppConfig::default_toml())
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Wrote {}", path.display());
    println!("Set REPLYBOT_API_KEY, REPLYBOT_CHANNEL_SECRET and REPLYBOT_CHANNEL_ACCESS_TOKEN,");
    println!("or fill in the [provider] and [channel] sections, then run `replybot serve`.");
    Ok(())
}
