//! Authentication context passed explicitly to the HTTP collaborators.

use crate::config::Auth;
use crate::util::ensure_dir;
use anyhow::{Context, Result};
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct Session {
    token: RwLock<Option<SecretString>>,
    token_file: Option<PathBuf>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("token", &self.token.read().as_ref().map(|_| "[REDACTED]"))
            .field("token_file", &self.token_file)
            .finish()
    }
}

impl Session {
    /// A session with no token and nowhere to persist one.
    pub fn anonymous() -> Self {
        Self {
            token: RwLock::new(None),
            token_file: None,
        }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(SecretString::from(token.into()))),
            token_file: None,
        }
    }

    /// Loads the token from `auth.token_env`, falling back to `auth.token_file`.
    pub fn init(cfg: &Auth) -> Result<Self> {
        let token_file = (!cfg.token_file.is_empty()).then(|| PathBuf::from(&cfg.token_file));

        let from_env = (!cfg.token_env.is_empty())
            .then(|| std::env::var(&cfg.token_env).ok())
            .flatten()
            .filter(|t| !t.trim().is_empty());

        let token = match from_env {
            Some(t) => {
                debug!(source = %cfg.token_env, "token loaded from environment");
                Some(t)
            }
            None => match &token_file {
                Some(path) => read_token_file(path)?,
                None => None,
            },
        };

        Ok(Self {
            token: RwLock::new(token.map(|t| SecretString::from(t.trim().to_string()))),
            token_file,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.read().is_some()
    }

    /// Value for the `Authorization` header, if a token is held.
    pub fn bearer(&self) -> Option<String> {
        self.token
            .read()
            .as_ref()
            .map(|t| format!("Bearer {}", t.expose_secret()))
    }

    /// Replaces the token and mirrors the change to the token file.
    pub fn set_token(&self, token: Option<String>) -> Result<()> {
        match token {
            Some(t) => {
                if let Some(path) = &self.token_file {
                    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                        ensure_dir(parent)?;
                    }
                    std::fs::write(path, &t)
                        .with_context(|| format!("writing token file: {}", path.display()))?;
                }
                *self.token.write() = Some(SecretString::from(t));
            }
            None => {
                *self.token.write() = None;
                if let Some(path) = &self.token_file {
                    if path.exists() {
                        std::fs::remove_file(path)
                            .with_context(|| format!("removing token file: {}", path.display()))?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Forgets the token, in memory and on disk.
    pub fn teardown(&self) -> Result<()> {
        self.set_token(None)
    }
}

fn read_token_file(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading token file: {}", path.display()))?;
    let raw = raw.trim();
    Ok((!raw.is_empty()).then(|| raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg_in(dir: &Path) -> Auth {
        Auth {
            token_env: "".into(),
            token_file: dir.join("nested").join("token").display().to_string(),
        }
    }

    #[test]
    fn token_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_in(dir.path());

        let session = Session::init(&cfg).unwrap();
        assert!(!session.is_authenticated());

        session.set_token(Some("abc".into())).unwrap();
        assert_eq!(session.bearer().as_deref(), Some("Bearer abc"));

        let reloaded = Session::init(&cfg).unwrap();
        assert!(reloaded.is_authenticated());

        reloaded.teardown().unwrap();
        assert!(!reloaded.is_authenticated());
        assert!(!Session::init(&cfg).unwrap().is_authenticated());
    }

    #[test]
    fn debug_redacts_token() {
        let session = Session::with_token("super-secret");
        let printed = format!("{session:?}");
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("REDACTED"));
    }
}
