use crate::session::SessionHandle;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;

/// Addressable remote conversation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque message payload. Internal line breaks are preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message(Arc<str>);

impl Message {
    pub fn new(text: impl Into<String>) -> Self {
        Self(Arc::from(text.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short single-line preview for logs.
    pub fn preview(&self) -> String {
        let first_line = self.0.lines().next().unwrap_or_default();
        first_line.chars().take(40).collect()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// The cursor wraps forever; the job ends on the repeat count, a stop, or a fatal error.
    #[default]
    Repeat,
    /// Every distinct (target, message) pairing is visited once, then the job completes.
    SinglePass,
}

/// Rejection raised before a job enters the running state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("job has no targets")]
    NoTargets,
    #[error("job has no messages")]
    NoMessages,
    #[error("message {index} is blank")]
    BlankMessage { index: usize },
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("concurrency {requested} exceeds the maximum of {max}")]
    ConcurrencyTooHigh { requested: usize, max: usize },
    #[error("job has no session")]
    MissingSession,
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// The immutable part of a job that workers share: what to send and to whom.
#[derive(Debug)]
pub struct JobPlan {
    targets: Vec<TargetId>,
    messages: Vec<Message>,
    repeat_count: Option<NonZeroU64>,
    mode: DeliveryMode,
}

impl JobPlan {
    pub fn targets(&self) -> &[TargetId] {
        &self.targets
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of successful sends after which the job completes; `None` means unbounded.
    pub fn repeat_limit(&self) -> Option<NonZeroU64> {
        self.repeat_count
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    pub fn message_index(&self, position: u64) -> usize {
        (position % self.messages.len() as u64) as usize
    }

    pub fn target_index(&self, position: u64) -> usize {
        (position % self.targets.len() as u64) as usize
    }

    /// Resolves a cursor position into its (target, message) pair.
    pub fn pair(&self, position: u64) -> (&TargetId, &Message) {
        (
            &self.targets[self.target_index(position)],
            &self.messages[self.message_index(position)],
        )
    }

    /// Number of cursor positions before the (target, message) pairing repeats.
    pub fn pass_length(&self) -> u64 {
        let targets = self.targets.len() as u64;
        let messages = self.messages.len() as u64;
        targets / gcd(targets, messages) * messages
    }

    /// Upper bound on cursor positions for the configured delivery mode.
    pub fn cursor_bound(&self) -> Option<u64> {
        match self.mode {
            DeliveryMode::Repeat => None,
            DeliveryMode::SinglePass => Some(self.pass_length()),
        }
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a.max(1)
}

/// Validated description of a dispatch job. Owns its session exclusively; starting the job
/// moves the session into the engine.
pub struct JobSpecification {
    plan: JobPlan,
    concurrency: usize,
    description: String,
    session: Box<dyn SessionHandle>,
}

impl fmt::Debug for JobSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobSpecification")
            .field("plan", &self.plan)
            .field("concurrency", &self.concurrency)
            .field("description", &self.description)
            .field("session", &self.session.label())
            .finish()
    }
}

impl JobSpecification {
    pub fn builder() -> JobSpecificationBuilder {
        JobSpecificationBuilder::default()
    }

    pub fn plan(&self) -> &JobPlan {
        &self.plan
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn session(&self) -> &dyn SessionHandle {
        self.session.as_ref()
    }

    /// Re-checks the invariants established by the builder.
    pub fn validate(&self) -> Result<(), JobError> {
        validate_parts(&self.plan.targets, &self.plan.messages, self.concurrency)
    }

    pub(crate) fn into_parts(self) -> (JobPlan, usize, String, Box<dyn SessionHandle>) {
        (self.plan, self.concurrency, self.description, self.session)
    }

    pub(crate) fn into_session(self) -> Box<dyn SessionHandle> {
        self.session
    }
}

#[derive(Default)]
pub struct JobSpecificationBuilder {
    targets: Vec<TargetId>,
    messages: Vec<Message>,
    repeat_count: u64,
    concurrency: Option<usize>,
    mode: DeliveryMode,
    description: Option<String>,
    session: Option<Box<dyn SessionHandle>>,
}

impl JobSpecificationBuilder {
    pub fn targets<I, T>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TargetId>,
    {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn messages<I, M>(mut self, messages: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<Message>,
    {
        self.messages = messages.into_iter().map(Into::into).collect();
        self
    }

    /// `0` means unbounded.
    pub fn repeat_count(mut self, count: u64) -> Self {
        self.repeat_count = count;
        self
    }

    pub fn concurrency(mut self, workers: usize) -> Self {
        self.concurrency = Some(workers);
        self
    }

    pub fn mode(mut self, mode: DeliveryMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn session(mut self, session: Box<dyn SessionHandle>) -> Self {
        self.session = Some(session);
        self
    }

    /// Checks targets, messages and concurrency without requiring a session, so callers can
    /// reject a job before opening one.
    pub fn validate(&self) -> Result<(), JobError> {
        validate_parts(&self.targets, &self.messages, self.concurrency.unwrap_or(1))
    }

    pub fn build(self) -> Result<JobSpecification, JobError> {
        let concurrency = self.concurrency.unwrap_or(1);
        validate_parts(&self.targets, &self.messages, concurrency)?;
        let session = self.session.ok_or(JobError::MissingSession)?;

        let description = self.description.unwrap_or_else(|| {
            format!(
                "{} message(s) to {} target(s)",
                self.messages.len(),
                self.targets.len()
            )
        });

        Ok(JobSpecification {
            plan: JobPlan {
                targets: self.targets,
                messages: self.messages,
                repeat_count: NonZeroU64::new(self.repeat_count),
                mode: self.mode,
            },
            concurrency,
            description,
            session,
        })
    }
}

fn validate_parts(
    targets: &[TargetId],
    messages: &[Message],
    concurrency: usize,
) -> Result<(), JobError> {
    if targets.is_empty() {
        return Err(JobError::NoTargets);
    }
    if messages.is_empty() {
        return Err(JobError::NoMessages);
    }
    if let Some(index) = messages.iter().position(|m| m.as_str().trim().is_empty()) {
        return Err(JobError::BlankMessage { index });
    }
    if concurrency == 0 {
        return Err(JobError::ZeroConcurrency);
    }
    Ok(())
}

impl From<&str> for TargetId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TargetId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Message {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Message {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
