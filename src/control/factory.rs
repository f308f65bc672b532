use super::context::Account;
use crate::gateway::{GatewayOptions, GatewaySession};
use crate::session::{SessionError, SessionFuture, SessionHandle};

/// Produces session handles for stored accounts.
///
/// Every started job gets a fresh handle so no two engines ever share one.
pub trait SessionFactory: Send + Sync + 'static {
    /// Credential login: performs the authentication round trip and returns the account to
    /// persist.
    fn login<'a>(&'a self, username: &'a str, password: &'a str) -> SessionFuture<'a, Account>;

    /// Token mode: builds a handle without any network call.
    fn open(&self, account: &Account) -> Result<Box<dyn SessionHandle>, SessionError>;

    /// Revokes the account's token on the remote service. Defaults to nothing to revoke.
    fn logout<'a>(&'a self, _account: &'a Account) -> SessionFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }
}

pub struct GatewaySessionFactory {
    endpoint: String,
    options: GatewayOptions,
}

impl GatewaySessionFactory {
    pub fn new(endpoint: impl Into<String>, options: GatewayOptions) -> Self {
        Self {
            endpoint: endpoint.into(),
            options,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn session_for(&self, account: &Account) -> Result<GatewaySession, SessionError> {
        GatewaySession::with_token(
            self.endpoint.clone(),
            account.username.clone(),
            account.token.clone(),
            self.options.clone(),
        )
    }
}

impl SessionFactory for GatewaySessionFactory {
    fn login<'a>(&'a self, username: &'a str, password: &'a str) -> SessionFuture<'a, Account> {
        Box::pin(async move {
            let session =
                GatewaySession::login(self.endpoint.clone(), username, password, self.options.clone())
                    .await?;
            let account = Account::new(username, session.token());
            if let Err(err) = session.close().await {
                tracing::debug!(account = username, error = %err, "failed to release login session");
            }
            Ok(account)
        })
    }

    fn open(&self, account: &Account) -> Result<Box<dyn SessionHandle>, SessionError> {
        Ok(Box::new(self.session_for(account)?))
    }

    fn logout<'a>(&'a self, account: &'a Account) -> SessionFuture<'a, ()> {
        Box::pin(async move { self.session_for(account)?.logout().await })
    }
}
