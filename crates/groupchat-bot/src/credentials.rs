//! Reads the single-line `jid password` credentials file. Kept separate
//! from [`crate::config::Config`] — the account is the one thing this
//! bootstrap treats as a secret, not a tunable.

use std::path::Path;

use anyhow::{bail, Context, Result};

pub struct Credentials {
    pub jid: String,
    pub password: String,
}

pub fn load(path: &Path) -> Result<Credentials> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read credentials file: {}", path.display()))?;
    let line = contents
        .lines()
        .find(|line| !line.trim().is_empty())
        .with_context(|| format!("credentials file is empty: {}", path.display()))?;
    let mut parts = line.split_whitespace();
    let (Some(jid), Some(password)) = (parts.next(), parts.next()) else {
        bail!("credentials file must contain \"jid password\": {}", path.display());
    };
    Ok(Credentials {
        jid: jid.to_string(),
        password: password.to_string(),
    })
}
