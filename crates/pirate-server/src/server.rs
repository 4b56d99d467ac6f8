//! The server: configuration, scheduler fleet, and shutdown path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use futures::future::BoxFuture;
use tracing::{error, info};

use pirate_config::{Config, ExecutionPolicy, Handler};
use pirate_runner::{deadline_token, run_script};
use pirate_scheduler::{DropScheduler, Job, ParallelScheduler, QueueScheduler, Scheduler};

use crate::error::ServerError;
use crate::logging;

/// How long request validation may take, including an auth command run.
pub const VALIDATION_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a handler script may run before it is killed.
pub const SCRIPT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub(crate) const WEBHOOK_SCRIPT_PREFIX: &str = "pirate-webhook-script-";
pub(crate) const COMMAND_SCRIPT_PREFIX: &str = "pirate-command-";

/// A shutdown callback. Registered during construction, invoked in
/// reverse order by [`Server::close`].
pub type CleanupFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Owns the configuration and one scheduler per configured handler,
/// indexed by handler position.
pub struct Server {
    // Read-only after initialization.
    cfg: Config,

    validation_timeout: Duration,
    schedulers: Vec<Arc<dyn Scheduler>>,
    cleanup: Mutex<Vec<CleanupFn>>,
}

impl Server {
    /// Sets up the log sink and builds and starts one scheduler per
    /// handler. Every acquired resource registers a cleanup callback;
    /// [`Server::close`] runs them LIFO.
    pub fn new(cfg: Config) -> Result<Self, ServerError> {
        let log_cleanup = logging::init(&cfg.server.logging.dir)?;

        let mut cleanup: Vec<CleanupFn> = Vec::with_capacity(1 + cfg.handlers.len());
        cleanup.push(log_cleanup);

        let mut schedulers: Vec<Arc<dyn Scheduler>> = Vec::with_capacity(cfg.handlers.len());
        for handler in &cfg.handlers {
            let scheduler: Arc<dyn Scheduler> = match handler.policy {
                ExecutionPolicy::Queue => Arc::new(QueueScheduler::new(handler.name.clone())),
                ExecutionPolicy::Parallel => {
                    Arc::new(ParallelScheduler::new(handler.name.clone()))
                }
                ExecutionPolicy::Drop => Arc::new(DropScheduler::new(handler.name.clone())),
            };

            scheduler
                .start()
                .map_err(|source| ServerError::Scheduler {
                    name: handler.name.clone(),
                    source,
                })?;

            info!(handler = %handler.name, policy = %handler.policy, "Scheduler started");

            let paused = scheduler.clone();
            let name = handler.name.clone();
            cleanup.push(Box::new(move || {
                Box::pin(async move {
                    if let Err(error) = paused.pause() {
                        error!(name = %name, error = %error, "Could not pause scheduler");
                    }
                })
            }));

            schedulers.push(scheduler);
        }

        Ok(Self {
            cfg,
            validation_timeout: VALIDATION_TIMEOUT,
            schedulers,
            cleanup: Mutex::new(cleanup),
        })
    }

    /// Invokes the cleanup callbacks in reverse registration order and
    /// empties the stack. A second call is a no-op.
    pub async fn close(&self) {
        let callbacks: Vec<CleanupFn> = {
            let mut guard = self.cleanup.lock().expect("cleanup lock poisoned");
            guard.drain(..).collect()
        };

        for callback in callbacks.into_iter().rev() {
            callback().await;
        }
    }

    /// Finds the handler whose endpoint exactly equals `endpoint`,
    /// returning it with its index (which also keys its scheduler).
    pub fn find_handler(&self, endpoint: &str) -> Result<(usize, &Handler), ServerError> {
        self.cfg
            .handlers
            .iter()
            .position(|h| h.endpoint == endpoint)
            .map(|k| (k, &self.cfg.handlers[k]))
            .ok_or(ServerError::HandlerNotFound)
    }

    pub fn validation_timeout(&self) -> Duration {
        self.validation_timeout
    }

    /// Wraps a validated request into a job and submits it to the
    /// handler's scheduler. Submission and script errors are logged,
    /// never surfaced: by the time this runs the request has already
    /// been accepted.
    pub async fn dispatch(&self, index: usize, headers: HashMap<String, String>, payload: Bytes) {
        let handler = &self.cfg.handlers[index];

        info!(handler = %handler.name, "Starting handler");

        let headers_json = match serde_json::to_string(&headers) {
            Ok(encoded) => encoded,
            Err(error) => {
                error!(handler = %handler.name, error = %error, "Could not encode headers");
                return;
            }
        };

        let env = vec![
            ("PIRATE_HEADERS".to_string(), headers_json),
            (
                "PIRATE_BODY".to_string(),
                String::from_utf8_lossy(&payload).into_owned(),
            ),
        ];

        let name = handler.name.clone();
        let script = handler.run.clone();
        let job = Job::new(move |cancel| {
            Box::pin(async move {
                // The job owns its lifetime: the deadline derives from the
                // scheduler's token, not the request's.
                let deadline = deadline_token(&cancel, SCRIPT_TIMEOUT);

                let result = run_script(&deadline, WEBHOOK_SCRIPT_PREFIX, &script, &env).await;
                deadline.cancel();

                if let Err(error) = result {
                    error!(handler = %name, error = %error, "Error running script");
                }

                Ok(())
            })
        });

        let job_id = job.id();
        if let Err(error) = self.schedulers[index].add(job).await {
            error!(
                handler = %handler.name,
                job_id = %job_id,
                error = %error,
                "Could not add job to scheduler"
            );
        }
    }
}
