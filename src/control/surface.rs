//! Transport-agnostic command interface: one input from one operator in, one reply out.

use super::context::{Account, AppContext, Operator, OperatorId};
use super::dialogue::{parse_selection, DialogueState};
use crate::dispatch::{RegistryError, StatusSnapshot, StopTarget};
use crate::job::{parse_document, parse_text, DeliveryMode, JobSpecification, Message};
use crate::session::TargetSummary;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::timeout;

const RECENT_HISTORY: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Text(String),
    /// An uploaded text file.
    Document { name: String, bytes: Vec<u8> },
}

impl Input {
    pub fn text(text: impl Into<String>) -> Self {
        Input::Text(text.into())
    }
}

/// Lines to show the operator. Empty for ignored input (unauthorized senders).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    lines: Vec<String>,
}

impl Reply {
    fn line(text: impl Into<String>) -> Self {
        Self {
            lines: vec![text.into()],
        }
    }

    fn push(&mut self, text: impl Into<String>) {
        self.lines.push(text.into());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|line| line.contains(needle))
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lines.join("\n"))
    }
}

pub struct ControlSurface {
    ctx: Arc<AppContext>,
    dialogues: Mutex<HashMap<OperatorId, DialogueState>>,
}

impl ControlSurface {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            ctx,
            dialogues: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    /// Current dialogue step for `operator` (`"idle"` when nothing is in progress).
    pub fn dialogue_step(&self, operator: OperatorId) -> &'static str {
        self.lock()
            .get(&operator)
            .map(DialogueState::step)
            .unwrap_or("idle")
    }

    pub fn awaiting_payload(&self, operator: OperatorId) -> bool {
        matches!(
            self.lock().get(&operator),
            Some(DialogueState::AwaitingPayload { .. })
        )
    }

    pub async fn handle(&self, operator: OperatorId, input: Input) -> Reply {
        if !self.ctx.is_authorized(operator).await {
            tracing::debug!(operator, "ignoring input from unauthorized operator");
            return Reply::default();
        }

        match input {
            Input::Text(text) => {
                let command = text.trim().strip_prefix('/').map(str::to_string);
                match command {
                    Some(command) => self.command(operator, &command).await,
                    None => self.advance(operator, Input::Text(text)).await,
                }
            }
            document @ Input::Document { .. } => self.advance(operator, document).await,
        }
    }

    async fn command(&self, operator: OperatorId, command: &str) -> Reply {
        let mut parts = command.split_whitespace();
        let name = parts.next().unwrap_or_default().to_ascii_lowercase();
        let args: Vec<&str> = parts.collect();

        tracing::debug!(operator, command = %name, "control command");

        match name.as_str() {
            "help" | "start" => self.help(operator),
            "login" => {
                self.set_state(operator, DialogueState::AwaitingUsername);
                Reply::line("Enter username:")
            }
            "tokenlogin" => {
                let label = match args.first() {
                    Some(label) => label.to_string(),
                    None => format!("account-{}", self.ctx.accounts().await.0.len() + 1),
                };
                let reply = Reply::line(format!("Send the session token for {label}:"));
                self.set_state(operator, DialogueState::AwaitingToken { label });
                reply
            }
            "accounts" => self.list_accounts().await,
            "use" => self.use_account(&args).await,
            "logout" => self.logout().await,
            "workers" => self.set_workers(&args).await,
            "mode" => self.set_mode(&args).await,
            "prefs" => self.preferences().await,
            "dispatch" => self.begin_dispatch(operator).await,
            "stop" => self.stop(&args).await,
            "tasks" => self.tasks(),
            "status" => self.status(&args),
            "cancel" => {
                let previous = self.take_state(operator);
                if previous.is_idle() {
                    Reply::line("Nothing to cancel.")
                } else {
                    Reply::line(format!("Cancelled at step: {}.", previous.step()))
                }
            }
            "add" | "remove" | "operators" | "flush" if !self.ctx.is_owner(operator) => {
                Reply::line("Owner only.")
            }
            "add" => self.add_operator(&args).await,
            "remove" => self.remove_operator(&args).await,
            "operators" => self.list_operators().await,
            "flush" => match self.ctx.flush_accounts().await {
                Ok(count) => Reply::line(format!("Flushed {count} account(s).")),
                Err(err) => Reply::line(format!("Failed to flush accounts: {err:#}")),
            },
            _ => Reply::line(format!("Unknown command /{name}. Send /help.")),
        }
    }

    async fn advance(&self, operator: OperatorId, input: Input) -> Reply {
        let state = self.take_state(operator);
        tracing::debug!(operator, step = state.step(), "dialogue input");

        let (next, reply) = match (state, input) {
            (DialogueState::Idle, _) => (
                DialogueState::Idle,
                Reply::line("Nothing in progress. Send /help for commands."),
            ),
            (DialogueState::AwaitingUsername, Input::Text(text)) => {
                let username = text.trim().to_string();
                if username.is_empty() {
                    (
                        DialogueState::AwaitingUsername,
                        Reply::line("Username cannot be empty. Enter username:"),
                    )
                } else {
                    (
                        DialogueState::AwaitingPassword { username },
                        Reply::line("Enter password:"),
                    )
                }
            }
            (DialogueState::AwaitingPassword { username }, Input::Text(text)) => (
                DialogueState::Idle,
                self.finish_login(&username, text.trim()).await,
            ),
            (DialogueState::AwaitingToken { label }, Input::Text(text)) => {
                let token = text.trim();
                if token.is_empty() {
                    (
                        DialogueState::AwaitingToken { label },
                        Reply::line("Token cannot be empty. Send the session token:"),
                    )
                } else {
                    (
                        DialogueState::Idle,
                        self.finish_token_login(Account::new(label, token)).await,
                    )
                }
            }
            (
                DialogueState::AwaitingTargets {
                    account,
                    candidates,
                },
                Input::Text(text),
            ) => match parse_selection(&text, candidates.len()) {
                Ok(indices) => {
                    let targets: Vec<TargetSummary> = indices
                        .into_iter()
                        .map(|index| candidates[index].clone())
                        .collect();
                    let titles: Vec<&str> = targets.iter().map(|t| t.title.as_str()).collect();
                    let mut reply = Reply::line(format!("Selected: {}", titles.join(", ")));
                    reply.push("Send messages separated by `&` or `and`, or upload a text file:");
                    (DialogueState::AwaitingPayload { account, targets }, reply)
                }
                Err(err) => (
                    DialogueState::AwaitingTargets {
                        account,
                        candidates,
                    },
                    Reply::line(err.to_string()),
                ),
            },
            (DialogueState::AwaitingPayload { account, targets }, input) => {
                let parsed = match &input {
                    Input::Text(text) => parse_text(text),
                    Input::Document { bytes, .. } => parse_document(bytes),
                };
                match parsed {
                    Ok(messages) => {
                        let mut reply =
                            Reply::line(format!("Loaded {} message(s).", messages.len()));
                        reply.push("Send the repeat count (0 = unbounded):");
                        (
                            DialogueState::AwaitingCount {
                                account,
                                targets,
                                messages,
                            },
                            reply,
                        )
                    }
                    Err(err) => (
                        DialogueState::AwaitingPayload { account, targets },
                        Reply::line(format!("No messages found: {err}.")),
                    ),
                }
            }
            (
                DialogueState::AwaitingCount {
                    account,
                    targets,
                    messages,
                },
                Input::Text(text),
            ) => match text.trim().parse::<u64>() {
                Ok(count) => (
                    DialogueState::Idle,
                    self.launch(account, targets, messages, count).await,
                ),
                Err(_) => (
                    DialogueState::AwaitingCount {
                        account,
                        targets,
                        messages,
                    },
                    Reply::line("Send a number (0 = unbounded)."),
                ),
            },
            (state, Input::Document { name, .. }) => {
                let reply = Reply::line(format!(
                    "Not expecting a document at step `{}`; ignored {name}.",
                    state.step()
                ));
                (state, reply)
            }
        };

        self.set_state(operator, next);
        reply
    }

    async fn finish_login(&self, username: &str, password: &str) -> Reply {
        let limit = self.ctx.service().config().io_timeout();
        let result = match timeout(limit, self.ctx.factory().login(username, password)).await {
            Ok(result) => result,
            Err(_) => {
                return Reply::line(format!("Login for {username} timed out."));
            }
        };

        match result {
            Ok(account) => match self.ctx.add_account(account).await {
                Ok(()) => Reply::line(format!("Logged in as {username}; now the default account.")),
                Err(err) => Reply::line(format!("Logged in but failed to save: {err:#}")),
            },
            Err(err) => {
                tracing::warn!(account = username, error = %err, "login failed");
                Reply::line(format!("Login failed: {err}"))
            }
        }
    }

    async fn finish_token_login(&self, account: Account) -> Reply {
        if let Err(err) = self.ctx.factory().open(&account) {
            return Reply::line(format!("Token rejected: {err}"));
        }
        let username = account.username.clone();
        match self.ctx.add_account(account).await {
            Ok(()) => Reply::line(format!("Saved {username}; now the default account.")),
            Err(err) => Reply::line(format!("Failed to save account: {err:#}")),
        }
    }

    async fn begin_dispatch(&self, operator: OperatorId) -> Reply {
        let Some(account) = self.ctx.default_account().await else {
            return Reply::line("No account saved. Use /login or /tokenlogin first.");
        };

        let probe = match self.ctx.factory().open(&account) {
            Ok(probe) => probe,
            Err(err) => {
                return Reply::line(format!(
                    "Cannot open a session for {}: {err}",
                    account.username
                ))
            }
        };
        let candidates = self.ctx.resolver().resolve(probe.as_ref()).await;
        let close_limit = self.ctx.service().config().close_timeout();
        match timeout(close_limit, probe.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::debug!(error = %err, "failed to close probe session"),
            Err(_) => tracing::debug!("timed out closing probe session"),
        }

        if candidates.is_empty() {
            return Reply::line(format!(
                "Configuration error: no targets available for {}.",
                account.username
            ));
        }

        let mut reply = Reply::line(format!("Targets for {}:", account.username));
        for (position, candidate) in candidates.iter().enumerate() {
            reply.push(format!("{}. {}", position + 1, candidate.title));
        }
        reply.push("Send target numbers (e.g. 1,3,5 or 1-3 or all):");

        self.set_state(
            operator,
            DialogueState::AwaitingTargets {
                account,
                candidates,
            },
        );
        reply
    }

    async fn launch(
        &self,
        account: Account,
        targets: Vec<TargetSummary>,
        messages: Vec<Message>,
        count: u64,
    ) -> Reply {
        let preferences = self.ctx.preferences().await;
        let description = describe(&account, &targets, messages.len(), count);
        let builder = JobSpecification::builder()
            .targets(targets.into_iter().map(|summary| summary.target))
            .messages(messages)
            .repeat_count(count)
            .concurrency(preferences.workers)
            .mode(preferences.mode)
            .description(description.clone());

        // Reject before a session exists so nothing is left open.
        if let Err(err) = builder.validate() {
            return Reply::line(format!("Configuration error: {err}"));
        }

        let session = match self.ctx.factory().open(&account) {
            Ok(session) => session,
            Err(err) => {
                return Reply::line(format!(
                    "Cannot open a session for {}: {err}",
                    account.username
                ))
            }
        };

        // A job the service rejects has its session closed by the service.
        match builder
            .session(session)
            .build()
            .and_then(|spec| self.ctx.service().start_job(spec))
        {
            Ok(id) => Reply::line(format!(
                "Task {id} started: {description} with {} worker(s).",
                preferences.workers
            )),
            Err(err) => Reply::line(format!("Configuration error: {err}")),
        }
    }

    fn help(&self, operator: OperatorId) -> Reply {
        let mut reply = Reply::line("Commands:");
        for line in [
            "/login - log in with username and password",
            "/tokenlogin [name] - save an account from a session token",
            "/accounts - list saved accounts",
            "/use <n> - set the default account",
            "/logout - revoke and drop the default account",
            "/workers <n> - workers for new jobs",
            "/mode <repeat|single> - delivery mode for new jobs",
            "/prefs - show preferences",
            "/dispatch - configure and start a job",
            "/stop <id|all> - stop tasks",
            "/tasks - list running and recent tasks",
            "/status [id] - task status",
            "/cancel - abort the current dialogue",
        ] {
            reply.push(line);
        }
        if self.ctx.is_owner(operator) {
            for line in [
                "/add <id> [name] - authorize an operator",
                "/remove <id> - revoke an operator",
                "/operators - list operators",
                "/flush - drop all saved accounts",
            ] {
                reply.push(line);
            }
        }
        reply
    }

    async fn list_accounts(&self) -> Reply {
        let (accounts, default_index) = self.ctx.accounts().await;
        if accounts.is_empty() {
            return Reply::line("No accounts saved.");
        }
        let mut reply = Reply::line("Accounts:");
        for (index, account) in accounts.iter().enumerate() {
            let marker = if index == default_index { " (default)" } else { "" };
            reply.push(format!("{}. {}{marker}", index + 1, account.username));
        }
        reply
    }

    async fn use_account(&self, args: &[&str]) -> Reply {
        let Some(position) = args.first().and_then(|arg| arg.parse::<usize>().ok()) else {
            return Reply::line("Usage: /use <n>");
        };
        match self.ctx.use_account(position).await {
            Ok(account) => Reply::line(format!("Default account: {}", account.username)),
            Err(err) => Reply::line(err.to_string()),
        }
    }

    async fn logout(&self) -> Reply {
        match self.ctx.remove_default_account().await {
            Ok(Some(account)) => {
                if let Err(err) = self.ctx.factory().logout(&account).await {
                    tracing::warn!(account = %account.username, error = %err, "token revocation failed");
                }
                Reply::line(format!("Logged out {}.", account.username))
            }
            Ok(None) => Reply::line("No account to log out."),
            Err(err) => Reply::line(format!("Failed to save accounts: {err:#}")),
        }
    }

    async fn set_workers(&self, args: &[&str]) -> Reply {
        let Some(workers) = args.first().and_then(|arg| arg.parse::<usize>().ok()) else {
            return Reply::line("Usage: /workers <n>");
        };
        match self.ctx.set_workers(workers).await {
            Ok(()) => Reply::line(format!("New jobs will use {workers} worker(s).")),
            Err(err) => Reply::line(err.to_string()),
        }
    }

    async fn set_mode(&self, args: &[&str]) -> Reply {
        let mode = match args.first().map(|arg| arg.to_ascii_lowercase()) {
            Some(arg) if arg == "repeat" => DeliveryMode::Repeat,
            Some(arg) if arg == "single" => DeliveryMode::SinglePass,
            _ => return Reply::line("Usage: /mode <repeat|single>"),
        };
        self.ctx.set_mode(mode).await;
        Reply::line(format!("New jobs will use {} mode.", mode_label(mode)))
    }

    async fn preferences(&self) -> Reply {
        let preferences = self.ctx.preferences().await;
        let account = self
            .ctx
            .default_account()
            .await
            .map(|account| account.username)
            .unwrap_or_else(|| "none".to_string());
        let mut reply = Reply::line(format!(
            "Workers: {} (max {})",
            preferences.workers,
            self.ctx.service().config().max_concurrency()
        ));
        reply.push(format!("Mode: {}", mode_label(preferences.mode)));
        reply.push(format!("Default account: {account}"));
        reply
    }

    async fn stop(&self, args: &[&str]) -> Reply {
        let Some(arg) = args.first() else {
            return Reply::line("Usage: /stop <id|all>");
        };
        let target = match arg.parse::<StopTarget>() {
            Ok(target) => target,
            Err(message) => return Reply::line(message),
        };

        match self.ctx.service().stop_job(target).await {
            Ok(ids) if ids.is_empty() => Reply::line("No running tasks."),
            Ok(ids) => {
                let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
                Reply::line(format!("Stopped task(s): {}.", ids.join(", ")))
            }
            Err(RegistryError::NotFound(id)) => Reply::line(format!("Task {id} not found.")),
        }
    }

    fn tasks(&self) -> Reply {
        let service = self.ctx.service();
        let running = service.list();
        let history = service.history();

        if running.is_empty() && history.is_empty() {
            return Reply::line("No tasks.");
        }

        let mut reply = Reply::line(format!("Running tasks: {}", running.len()));
        for snapshot in &running {
            reply.push(format_snapshot(snapshot));
        }
        if !history.is_empty() {
            reply.push("Recently finished:");
            for report in history.iter().rev().take(RECENT_HISTORY) {
                reply.push(format_snapshot(&report.status));
            }
        }
        reply
    }

    fn status(&self, args: &[&str]) -> Reply {
        let service = self.ctx.service();
        if let Some(arg) = args.first() {
            return match arg.parse() {
                Ok(id) => match service.get_status(id) {
                    Ok(snapshot) => Reply::line(format_snapshot(&snapshot)),
                    Err(err) => Reply::line(format!("{err}.")),
                },
                Err(_) => Reply::line("Usage: /status [id]"),
            };
        }

        let running = service.list();
        if running.is_empty() {
            return Reply::line("Idle: no running tasks.");
        }
        let sent: u64 = running.iter().map(|snapshot| snapshot.sent_count).sum();
        let mut reply = Reply::line(format!(
            "Running: {} task(s), {sent} message(s) sent.",
            running.len()
        ));
        for snapshot in &running {
            reply.push(format_snapshot(snapshot));
        }
        reply
    }

    async fn add_operator(&self, args: &[&str]) -> Reply {
        let Some(id) = args.first().and_then(|arg| arg.parse::<OperatorId>().ok()) else {
            return Reply::line("Usage: /add <id> [name]");
        };
        let name = args.get(1).copied().unwrap_or_default();
        match self.ctx.add_operator(Operator::new(id, name)).await {
            Ok(true) => Reply::line(format!("Authorized operator {id}.")),
            Ok(false) => Reply::line(format!("Operator {id} is already authorized.")),
            Err(err) => Reply::line(format!("Failed to save operators: {err:#}")),
        }
    }

    async fn remove_operator(&self, args: &[&str]) -> Reply {
        let Some(id) = args.first().and_then(|arg| arg.parse::<OperatorId>().ok()) else {
            return Reply::line("Usage: /remove <id>");
        };
        match self.ctx.remove_operator(id).await {
            Ok(true) => {
                self.lock().remove(&id);
                Reply::line(format!("Removed operator {id}."))
            }
            Ok(false) => Reply::line(format!("Operator {id} not found.")),
            Err(err) => Reply::line(format!("Failed to save operators: {err:#}")),
        }
    }

    async fn list_operators(&self) -> Reply {
        let operators = self.ctx.operators().await;
        let mut reply = Reply::line(format!("Owner: {}", self.ctx.owner()));
        if operators.is_empty() {
            reply.push("No other operators.");
        }
        for operator in operators {
            if operator.name.is_empty() {
                reply.push(format!("- {}", operator.id));
            } else {
                reply.push(format!("- {} ({})", operator.id, operator.name));
            }
        }
        reply
    }

    fn take_state(&self, operator: OperatorId) -> DialogueState {
        self.lock().remove(&operator).unwrap_or_default()
    }

    fn set_state(&self, operator: OperatorId, state: DialogueState) {
        let mut dialogues = self.lock();
        if state.is_idle() {
            dialogues.remove(&operator);
        } else {
            dialogues.insert(operator, state);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<OperatorId, DialogueState>> {
        self.dialogues.lock().expect("dialogue mutex poisoned")
    }
}

fn describe(account: &Account, targets: &[TargetSummary], messages: usize, count: u64) -> String {
    let titles: Vec<&str> = targets.iter().map(|target| target.title.as_str()).collect();
    let limit = if count == 0 {
        "unbounded".to_string()
    } else {
        format!("{count} send(s)")
    };
    format!(
        "{messages} message(s) to {} as {}, {limit}",
        titles.join(", "),
        account.username
    )
}

fn mode_label(mode: DeliveryMode) -> &'static str {
    match mode {
        DeliveryMode::Repeat => "repeat",
        DeliveryMode::SinglePass => "single-pass",
    }
}

pub fn format_snapshot(snapshot: &StatusSnapshot) -> String {
    let sent = match snapshot.repeat_limit {
        Some(limit) => format!("{}/{limit}", snapshot.sent_count),
        None => snapshot.sent_count.to_string(),
    };
    let started = snapshot
        .started_at
        .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string());

    let mut line = format!(
        "#{} [{}] sent {sent} | workers {} | uptime {}s | started {started} | {}",
        snapshot.id,
        snapshot.state,
        snapshot.workers_alive,
        snapshot.uptime.as_secs(),
        snapshot.description
    );
    if let Some(error) = &snapshot.last_error {
        line.push_str(&format!(" | error: {error}"));
    }
    line
}
