//! Application context: the explicitly owned state behind the control surface.

use super::factory::SessionFactory;
use super::store::StateStore;
use crate::dispatch::DispatchService;
use crate::job::DeliveryMode;
use crate::session::TargetResolver;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

pub type OperatorId = i64;

/// Saved account: a display name and the session token used in token mode.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub token: String,
    #[serde(default)]
    pub added_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            token: token.into(),
            added_at: None,
        }
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .field("added_at", &self.added_at)
            .finish()
    }
}

/// Someone allowed to issue commands besides the owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub id: OperatorId,
    #[serde(default)]
    pub name: String,
}

impl Operator {
    pub fn new(id: OperatorId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preferences {
    pub workers: usize,
    pub mode: DeliveryMode,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            workers: 1,
            mode: DeliveryMode::Repeat,
        }
    }
}

#[derive(Debug, Default)]
struct AccountBook {
    accounts: Vec<Account>,
    default_index: usize,
}

impl AccountBook {
    fn default_account(&self) -> Option<&Account> {
        self.accounts.get(self.default_index)
    }

    fn default_username(&self) -> Option<&str> {
        self.default_account().map(|account| account.username.as_str())
    }
}

/// Owns accounts, operators, preferences, and the dispatch service. Passed to the control
/// surface at construction; every field sits behind its own lock.
pub struct AppContext {
    owner: OperatorId,
    service: DispatchService,
    factory: Arc<dyn SessionFactory>,
    store: Arc<dyn StateStore>,
    resolver: TargetResolver,
    accounts: RwLock<AccountBook>,
    operators: RwLock<Vec<Operator>>,
    preferences: RwLock<Preferences>,
}

impl AppContext {
    /// Loads persisted accounts, the selected default account, and operators from `store`.
    pub async fn load(
        owner: OperatorId,
        service: DispatchService,
        factory: Arc<dyn SessionFactory>,
        store: Arc<dyn StateStore>,
    ) -> Result<Self> {
        let accounts = store
            .load_accounts()
            .await
            .context("failed to load accounts")?;
        let operators = store
            .load_operators()
            .await
            .context("failed to load operators")?;
        let default_username = store
            .load_default_account()
            .await
            .context("failed to load default account")?;
        // A stale name (account since removed) falls back to the first account.
        let default_index = default_username
            .and_then(|name| accounts.iter().position(|known| known.username == name))
            .unwrap_or(0);

        tracing::info!(
            accounts = accounts.len(),
            default_index,
            operators = operators.len(),
            "application state loaded"
        );

        let resolver = TargetResolver::new(
            service.config().resolver_limit(),
            service.config().io_timeout(),
        );

        Ok(Self {
            owner,
            service,
            factory,
            store,
            resolver,
            accounts: RwLock::new(AccountBook {
                accounts,
                default_index,
            }),
            operators: RwLock::new(operators),
            preferences: RwLock::new(Preferences::default()),
        })
    }

    pub fn owner(&self) -> OperatorId {
        self.owner
    }

    pub fn service(&self) -> &DispatchService {
        &self.service
    }

    pub fn factory(&self) -> &dyn SessionFactory {
        self.factory.as_ref()
    }

    pub fn resolver(&self) -> &TargetResolver {
        &self.resolver
    }

    pub fn is_owner(&self, operator: OperatorId) -> bool {
        operator == self.owner
    }

    pub async fn is_authorized(&self, operator: OperatorId) -> bool {
        self.is_owner(operator)
            || self
                .operators
                .read()
                .await
                .iter()
                .any(|known| known.id == operator)
    }

    pub async fn accounts(&self) -> (Vec<Account>, usize) {
        let book = self.accounts.read().await;
        (book.accounts.clone(), book.default_index)
    }

    pub async fn default_account(&self) -> Option<Account> {
        self.accounts.read().await.default_account().cloned()
    }

    /// Adds or replaces (by username) an account, makes it the default, and persists.
    pub async fn add_account(&self, mut account: Account) -> Result<()> {
        account.added_at.get_or_insert_with(Utc::now);
        let mut book = self.accounts.write().await;
        let index = match book
            .accounts
            .iter()
            .position(|known| known.username == account.username)
        {
            Some(index) => {
                book.accounts[index] = account;
                index
            }
            None => {
                book.accounts.push(account);
                book.accounts.len() - 1
            }
        };
        book.default_index = index;
        self.store.save_accounts(&book.accounts).await?;
        self.store.save_default_account(book.default_username()).await
    }

    /// Selects the default account by 1-based position.
    pub async fn use_account(&self, position: usize) -> Result<Account> {
        let mut book = self.accounts.write().await;
        if position == 0 || position > book.accounts.len() {
            bail!("no account #{position}; {} saved", book.accounts.len());
        }
        book.default_index = position - 1;
        self.store
            .save_default_account(book.default_username())
            .await
            .context("failed to save default account")?;
        Ok(book.accounts[book.default_index].clone())
    }

    /// Drops the default account and persists the remaining ones.
    pub async fn remove_default_account(&self) -> Result<Option<Account>> {
        let mut book = self.accounts.write().await;
        if book.accounts.is_empty() {
            return Ok(None);
        }
        let index = book.default_index.min(book.accounts.len() - 1);
        let removed = book.accounts.remove(index);
        book.default_index = 0;
        self.store.save_accounts(&book.accounts).await?;
        self.store.save_default_account(book.default_username()).await?;
        Ok(Some(removed))
    }

    pub async fn flush_accounts(&self) -> Result<usize> {
        let mut book = self.accounts.write().await;
        let removed = book.accounts.len();
        book.accounts.clear();
        book.default_index = 0;
        self.store.save_accounts(&book.accounts).await?;
        self.store.save_default_account(None).await?;
        Ok(removed)
    }

    pub async fn operators(&self) -> Vec<Operator> {
        self.operators.read().await.clone()
    }

    /// Returns `false` if the operator was already authorized.
    pub async fn add_operator(&self, operator: Operator) -> Result<bool> {
        let mut operators = self.operators.write().await;
        if operators.iter().any(|known| known.id == operator.id) {
            return Ok(false);
        }
        operators.push(operator);
        self.store.save_operators(&operators).await?;
        Ok(true)
    }

    /// Returns `false` if no such operator was authorized.
    pub async fn remove_operator(&self, id: OperatorId) -> Result<bool> {
        let mut operators = self.operators.write().await;
        let before = operators.len();
        operators.retain(|known| known.id != id);
        if operators.len() == before {
            return Ok(false);
        }
        self.store.save_operators(&operators).await?;
        Ok(true)
    }

    pub async fn preferences(&self) -> Preferences {
        *self.preferences.read().await
    }

    pub async fn set_workers(&self, workers: usize) -> Result<()> {
        let max = self.service.config().max_concurrency();
        if workers == 0 || workers > max {
            bail!("workers must be between 1 and {max}");
        }
        self.preferences.write().await.workers = workers;
        Ok(())
    }

    pub async fn set_mode(&self, mode: DeliveryMode) {
        self.preferences.write().await.mode = mode;
    }
}
