use anyhow::Context;
use std::env;
use std::path::PathBuf;

fn home_dir() -> anyhow::Result<PathBuf> {
    // On Unix, HOME is standard. (Windows support can be expanded later.)
    let home = env::var_os("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home))
}

fn benchgate_home() -> Option<PathBuf> {
    env::var_os("BENCHGATE_HOME").map(PathBuf::from)
}

/// Directory holding `config.toml`. Not created; a missing config is fine.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    if let Some(base) = benchgate_home() {
        return Ok(base.join("config"));
    }

    if let Some(xdg) = env::var_os("XDG_CONFIG_HOME").map(PathBuf::from) {
        return Ok(xdg.join("benchgate"));
    }

    Ok(home_dir()?.join(".config").join("benchgate"))
}

pub fn config_file() -> anyhow::Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}
