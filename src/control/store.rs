//! Persistence collaborator for accounts and authorized operators.
//!
//! The dispatch engine never touches this; only the control surface loads and saves state.

use super::context::{Account, Operator};
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const ACCOUNTS_FILE: &str = "accounts.json";
pub const OPERATORS_FILE: &str = "operators.json";
pub const DEFAULT_ACCOUNT_FILE: &str = "default_account.json";

pub trait StateStore: Send + Sync + 'static {
    fn load_accounts(&self) -> BoxFuture<'_, Result<Vec<Account>>>;
    fn save_accounts<'a>(&'a self, accounts: &'a [Account]) -> BoxFuture<'a, Result<()>>;
    fn load_operators(&self) -> BoxFuture<'_, Result<Vec<Operator>>>;
    fn save_operators<'a>(&'a self, operators: &'a [Operator]) -> BoxFuture<'a, Result<()>>;
    /// Username of the account `/use` last selected, if any.
    fn load_default_account(&self) -> BoxFuture<'_, Result<Option<String>>>;
    fn save_default_account<'a>(
        &'a self,
        username: Option<&'a str>,
    ) -> BoxFuture<'a, Result<()>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DefaultAccount {
    username: Option<String>,
}

/// JSON documents under one data directory. Missing files load as empty; saves write a
/// temporary file and rename it over the old one.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn load<T: DeserializeOwned + Default>(&self, file: &str) -> Result<T> {
        let path = self.dir.join(file);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }

        serde_json::from_slice(&bytes).with_context(|| format!("failed to parse {}", path.display()))
    }

    async fn save<T: Serialize + Sync + ?Sized>(&self, file: &str, value: &T) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;

        let path = self.dir.join(file);
        let tmp = self.dir.join(format!("{file}.tmp"));
        let json = serde_json::to_vec_pretty(value).context("failed to serialize state")?;

        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to replace {}", path.display()))?;

        tracing::debug!(path = %path.display(), "state saved");
        Ok(())
    }
}

impl StateStore for JsonFileStore {
    fn load_accounts(&self) -> BoxFuture<'_, Result<Vec<Account>>> {
        Box::pin(self.load(ACCOUNTS_FILE))
    }

    fn save_accounts<'a>(&'a self, accounts: &'a [Account]) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.save(ACCOUNTS_FILE, accounts))
    }

    fn load_operators(&self) -> BoxFuture<'_, Result<Vec<Operator>>> {
        Box::pin(self.load(OPERATORS_FILE))
    }

    fn save_operators<'a>(&'a self, operators: &'a [Operator]) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.save(OPERATORS_FILE, operators))
    }

    fn load_default_account(&self) -> BoxFuture<'_, Result<Option<String>>> {
        Box::pin(async move {
            let stored: DefaultAccount = self.load(DEFAULT_ACCOUNT_FILE).await?;
            Ok(stored.username)
        })
    }

    fn save_default_account<'a>(
        &'a self,
        username: Option<&'a str>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let stored = DefaultAccount {
                username: username.map(str::to_string),
            };
            self.save(DEFAULT_ACCOUNT_FILE, &stored).await
        })
    }
}

/// In-process store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: Mutex<Vec<Account>>,
    operators: Mutex<Vec<Operator>>,
    default_account: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn with_state(accounts: Vec<Account>, operators: Vec<Operator>) -> Self {
        Self {
            accounts: Mutex::new(accounts),
            operators: Mutex::new(operators),
            default_account: Mutex::new(None),
        }
    }

    pub fn with_default_account(self, username: &str) -> Self {
        *self.default_account.lock().expect("store mutex poisoned") = Some(username.to_string());
        self
    }

    pub fn default_account(&self) -> Option<String> {
        self.default_account.lock().expect("store mutex poisoned").clone()
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.accounts.lock().expect("store mutex poisoned").clone()
    }

    pub fn operators(&self) -> Vec<Operator> {
        self.operators.lock().expect("store mutex poisoned").clone()
    }
}

impl StateStore for MemoryStore {
    fn load_accounts(&self) -> BoxFuture<'_, Result<Vec<Account>>> {
        Box::pin(async move { Ok(self.accounts()) })
    }

    fn save_accounts<'a>(&'a self, accounts: &'a [Account]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            *self.accounts.lock().expect("store mutex poisoned") = accounts.to_vec();
            Ok(())
        })
    }

    fn load_operators(&self) -> BoxFuture<'_, Result<Vec<Operator>>> {
        Box::pin(async move { Ok(self.operators()) })
    }

    fn save_operators<'a>(&'a self, operators: &'a [Operator]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            *self.operators.lock().expect("store mutex poisoned") = operators.to_vec();
            Ok(())
        })
    }

    fn load_default_account(&self) -> BoxFuture<'_, Result<Option<String>>> {
        Box::pin(async move { Ok(self.default_account()) })
    }

    fn save_default_account<'a>(
        &'a self,
        username: Option<&'a str>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            *self.default_account.lock().expect("store mutex poisoned") =
                username.map(str::to_string);
            Ok(())
        })
    }
}
