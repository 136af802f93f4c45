//! Opaque credential handles
//!
//! A `Secret` is only ever bound into an execution environment. It never
//! prints, never serializes, and is read-only once created.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

/// A credential value. `Debug` and `Display` are redacted.
#[derive(Clone)]
pub struct Secret(Arc<str>);

impl Secret {
    /// Wrap a plaintext value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(Arc::from(value.into()))
    }

    /// The plaintext value. Only runtimes should call this, when binding
    /// the secret into a child process environment.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Where to read a secret from: `env:NAME` or `file:PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    /// Host environment variable
    Env(String),
    /// File on the host (one trailing newline is trimmed)
    File(PathBuf),
}

impl FromStr for SecretSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(name) = s.strip_prefix("env:") {
            if name.is_empty() {
                bail!("Invalid secret source '{s}': variable name cannot be empty");
            }
            return Ok(Self::Env(name.to_string()));
        }
        if let Some(path) = s.strip_prefix("file:") {
            if path.is_empty() {
                bail!("Invalid secret source '{s}': file path cannot be empty");
            }
            return Ok(Self::File(PathBuf::from(path)));
        }
        bail!("Invalid secret source: expected 'env:NAME' or 'file:PATH'")
    }
}

impl fmt::Display for SecretSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Env(name) => write!(f, "env:{name}"),
            Self::File(path) => write!(f, "file:{}", path.display()),
        }
    }
}

impl SecretSource {
    /// Read the secret value from its source.
    pub fn resolve(&self) -> Result<Secret> {
        match self {
            Self::Env(name) => {
                let value = std::env::var(name)
                    .with_context(|| format!("Secret variable '{name}' is not set"))?;
                Ok(Secret::new(value))
            }
            Self::File(path) => {
                let mut value = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read secret file: {}", path.display()))?;
                if value.ends_with('\n') {
                    value.pop();
                    if value.ends_with('\r') {
                        value.pop();
                    }
                }
                Ok(Secret::new(value))
            }
        }
    }
}
