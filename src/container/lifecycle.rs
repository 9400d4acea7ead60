//! Start/stop hooks recorded while providers run.
//!
//! Hooks form a stack: they start in the order they were appended and stop
//! in exact reverse, limited to the prefix that started successfully.

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Instrument, Span};

use super::error::ContainerError;

type HookFn = Box<dyn FnOnce(HookContext) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Cancellation context handed to every hook. It is cancelled when the
/// hook's deadline expires.
#[derive(Clone, Debug)]
pub struct HookContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl HookContext {
    /// Context expiring `timeout` from now. Only the lifecycle cancels the
    /// token when that deadline passes; other holders check `expired`.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: timeout.map(|timeout| Instant::now() + timeout),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancelled, or past the deadline.
    pub fn expired(&self) -> bool {
        self.is_cancelled()
            || self
                .deadline
                .is_some_and(|deadline| deadline <= Instant::now())
    }

    /// Resolves once the deadline has passed.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Token that is cancelled together with this context, for handing to
    /// spawned work.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// A `{on_start, on_stop}` pair. Either side may be absent.
pub struct Hook {
    description: String,
    on_start: Option<HookFn>,
    on_stop: Option<HookFn>,
    span: Option<Span>,
}

impl Hook {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            on_start: None,
            on_stop: None,
            span: None,
        }
    }

    pub fn on_start<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce(HookContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_start = Some(Box::new(move |ctx| f(ctx).boxed()));
        self
    }

    pub fn on_stop<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce(HookContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_stop = Some(Box::new(move |ctx| f(ctx).boxed()));
        self
    }

    /// Run both sides of the hook inside `span`.
    pub fn instrument(mut self, span: &Span) -> Self {
        self.span = Some(span.clone());
        self
    }
}

pub(crate) struct RecordedHook {
    pub(crate) module: String,
    pub(crate) description: String,
    pub(crate) has_start: bool,
    pub(crate) has_stop: bool,
    stop_timeout: Option<Duration>,
    on_start: Option<HookFn>,
    on_stop: Option<HookFn>,
    span: Span,
}

impl RecordedHook {
    pub(crate) fn label(&self) -> String {
        format!("{}: {}", self.module, self.description)
    }
}

/// Handle providers use to append hooks.
pub struct Lifecycle {
    hooks: Vec<RecordedHook>,
    started: usize,
    module: String,
    stop_timeout: Option<Duration>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            hooks: Vec::new(),
            started: 0,
            module: String::new(),
            stop_timeout: None,
        }
    }

    /// Attribute subsequently appended hooks to `module`.
    pub(crate) fn enter(&mut self, module: &str, stop_timeout: Option<Duration>) {
        self.module = module.to_string();
        self.stop_timeout = stop_timeout;
    }

    pub fn append(&mut self, hook: Hook) {
        self.hooks.push(RecordedHook {
            module: self.module.clone(),
            has_start: hook.on_start.is_some(),
            has_stop: hook.on_stop.is_some(),
            description: hook.description,
            stop_timeout: self.stop_timeout,
            on_start: hook.on_start,
            on_stop: hook.on_stop,
            span: hook.span.unwrap_or_else(Span::current),
        });
    }

    pub(crate) fn hooks(&self) -> &[RecordedHook] {
        &self.hooks
    }

    /// Run start hooks in order. On the first failure the already-started
    /// prefix is stopped in reverse and the start error is returned.
    pub(crate) async fn start(
        &mut self,
        start_timeout: Option<Duration>,
        default_stop_timeout: Duration,
    ) -> Result<(), ContainerError> {
        while self.started < self.hooks.len() {
            let hook = &mut self.hooks[self.started];
            let label = hook.label();
            if let Some(on_start) = hook.on_start.take() {
                let span = hook.span.clone();
                info!(hook = %label, "starting");
                let begun = Instant::now();
                if let Err(source) = run_hook(on_start, start_timeout, span).await {
                    error!(hook = %label, error = %format!("{source:#}"), "start hook failed");
                    if let Err(stop_err) = self.stop(default_stop_timeout).await {
                        error!(error = %stop_err, "rollback after failed start was not clean");
                    }
                    return Err(ContainerError::Start {
                        hook: label,
                        source,
                    });
                }
                info!(hook = %label, elapsed = ?begun.elapsed(), "started");
            }
            self.started += 1;
        }
        Ok(())
    }

    /// Run stop hooks of the started prefix in reverse. Every hook runs even
    /// when an earlier one fails; the first failure is returned.
    pub(crate) async fn stop(&mut self, default_timeout: Duration) -> Result<(), ContainerError> {
        let mut first_error = None;
        while self.started > 0 {
            self.started -= 1;
            let hook = &mut self.hooks[self.started];
            let Some(on_stop) = hook.on_stop.take() else {
                continue;
            };
            let label = hook.label();
            let timeout = hook.stop_timeout.unwrap_or(default_timeout);
            let span = hook.span.clone();
            info!(hook = %label, "stopping");
            match run_hook(on_stop, Some(timeout), span).await {
                Ok(()) => info!(hook = %label, "stopped"),
                Err(source) => {
                    error!(hook = %label, error = %format!("{source:#}"), "stop hook failed");
                    if first_error.is_none() {
                        first_error = Some(ContainerError::Shutdown {
                            hook: label,
                            source,
                        });
                    }
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

async fn run_hook(hook: HookFn, timeout: Option<Duration>, span: Span) -> anyhow::Result<()> {
    let ctx = HookContext::new(timeout);
    let guard = ctx.token();
    let fut = hook(ctx).instrument(span);
    match timeout {
        None => fut.await,
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                guard.cancel();
                Err(anyhow::anyhow!("deadline of {limit:?} exceeded"))
            }
        },
    }
}

/// Lets any component ask the container for an orderly shutdown.
#[derive(Clone, Default)]
pub struct Shutdowner {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl Shutdowner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. The first error reported is kept as the reason.
    pub fn shutdown(&self, err: Option<anyhow::Error>) {
        if let Some(err) = err {
            // Only the first reason is kept.
            let _ = self.reason.set(format!("{err:#}"));
        }
        self.token.cancel();
    }

    pub async fn requested(&self) {
        self.token.cancelled().await
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.get().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    type Journal = Arc<Mutex<Vec<String>>>;

    fn recording_hook(name: &str, journal: &Journal, fail_start: bool, fail_stop: bool) -> Hook {
        let (start_name, stop_name) = (name.to_string(), name.to_string());
        let (start_log, stop_log) = (Arc::clone(journal), Arc::clone(journal));
        Hook::new(name)
            .on_start(move |_ctx| async move {
                start_log.lock().unwrap().push(format!("start {start_name}"));
                if fail_start {
                    anyhow::bail!("{start_name} refused to start");
                }
                anyhow::Ok(())
            })
            .on_stop(move |_ctx| async move {
                stop_log.lock().unwrap().push(format!("stop {stop_name}"));
                if fail_stop {
                    anyhow::bail!("{stop_name} refused to stop");
                }
                anyhow::Ok(())
            })
    }

    fn lifecycle_with(hooks: Vec<Hook>) -> Lifecycle {
        let mut lifecycle = Lifecycle::new();
        lifecycle.enter("test", None);
        for hook in hooks {
            lifecycle.append(hook);
        }
        lifecycle
    }

    fn entries(journal: &Journal) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn stops_in_reverse_start_order() {
        let journal = Journal::default();
        let mut lifecycle = lifecycle_with(vec![
            recording_hook("a", &journal, false, false),
            recording_hook("b", &journal, false, false),
            recording_hook("c", &journal, false, false),
        ]);

        lifecycle.start(None, Duration::from_secs(5)).await.unwrap();
        lifecycle.stop(Duration::from_secs(5)).await.unwrap();

        assert_eq!(
            entries(&journal),
            vec!["start a", "start b", "start c", "stop c", "stop b", "stop a"]
        );
    }

    #[tokio::test]
    async fn failed_start_rolls_back_started_prefix() {
        let journal = Journal::default();
        let mut lifecycle = lifecycle_with(vec![
            recording_hook("a", &journal, false, false),
            recording_hook("b", &journal, false, false),
            recording_hook("c", &journal, true, false),
            recording_hook("d", &journal, false, false),
        ]);

        let err = lifecycle
            .start(None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ContainerError::Start { ref hook, .. } if hook == "test: c"));

        assert_eq!(
            entries(&journal),
            vec!["start a", "start b", "start c", "stop b", "stop a"]
        );

        // Nothing left to stop.
        lifecycle.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(entries(&journal).len(), 5);
    }

    #[tokio::test]
    async fn stop_errors_do_not_skip_remaining_hooks() {
        let journal = Journal::default();
        let mut lifecycle = lifecycle_with(vec![
            recording_hook("a", &journal, false, true),
            recording_hook("b", &journal, false, true),
            recording_hook("c", &journal, false, false),
        ]);

        lifecycle.start(None, Duration::from_secs(5)).await.unwrap();
        let err = lifecycle.stop(Duration::from_secs(5)).await.unwrap_err();

        // The first failure in stop order is b.
        assert!(matches!(err, ContainerError::Shutdown { ref hook, .. } if hook == "test: b"));
        assert_eq!(
            entries(&journal),
            vec!["start a", "start b", "start c", "stop c", "stop b", "stop a"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn start_deadline_aborts_and_cancels_context() {
        let observed = Arc::new(Mutex::new(None::<CancellationToken>));
        let slot = Arc::clone(&observed);
        let mut lifecycle = lifecycle_with(vec![Hook::new("slow").on_start(move |ctx| async move {
            *slot.lock().unwrap() = Some(ctx.token());
            tokio::time::sleep(Duration::from_secs(60)).await;
            anyhow::Ok(())
        })]);

        let err = lifecycle
            .start(Some(Duration::from_secs(1)), Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("deadline"));
        let token = observed.lock().unwrap().clone().expect("hook ran");
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_deadline_uses_module_override() {
        let journal = Journal::default();
        let mut lifecycle = Lifecycle::new();
        lifecycle.enter("slow-module", Some(Duration::from_millis(10)));
        lifecycle.append(Hook::new("hang").on_stop(|_ctx| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            anyhow::Ok(())
        }));
        lifecycle.enter("quick-module", None);
        lifecycle.append(recording_hook("after", &journal, false, false));

        lifecycle.start(None, Duration::from_secs(5)).await.unwrap();
        let begun = Instant::now();
        let err = lifecycle.stop(Duration::from_secs(5)).await.unwrap_err();

        assert!(begun.elapsed() < Duration::from_secs(1));
        assert!(matches!(err, ContainerError::Shutdown { ref hook, .. } if hook == "slow-module: hang"));
        assert_eq!(entries(&journal), vec!["start after", "stop after"]);
    }

    #[tokio::test]
    async fn shutdowner_keeps_first_reason() {
        let shutdowner = Shutdowner::new();
        shutdowner.shutdown(Some(anyhow::anyhow!("listener died")));
        shutdowner.shutdown(Some(anyhow::anyhow!("second")));
        shutdowner.requested().await;
        assert_eq!(shutdowner.reason().as_deref(), Some("listener died"));
    }
}
