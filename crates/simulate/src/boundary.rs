//! The isolation boundary: a dedicated thread that owns the application
//! under test and runs submitted work on it one job at a time.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use crossbeam::channel;
use ewe_routing::application::{Application, HostEnvironment};
use ewe_routing::errors::ApplicationError;

use crate::browsing::BrowsingSession;
use crate::config::{self, BoundaryConfig};
use crate::errors::{SimulateError, SimulateResult};
use crate::interceptor;
use crate::transfer::{self, Closure, ClosureEnvelope};

type Job = Box<dyn FnOnce(&HostDomain) + Send>;

/// The boundary side: the initialized application, with interception
/// installed.
pub struct HostDomain {
    application: Arc<Application>,
}

impl HostDomain {
    fn start<F>(environment: HostEnvironment, factory: F) -> SimulateResult<Self>
    where
        F: FnOnce(HostEnvironment) -> Result<Application, ApplicationError>,
    {
        let mut application = factory(environment)?;
        interceptor::install(&mut application);
        Ok(Self {
            application: Arc::new(application),
        })
    }

    fn serve(&self, jobs: &channel::Receiver<Job>) {
        for job in jobs {
            job(self);
        }
        tracing::debug!("HostDomain: job channel closed, shutting down");
    }

    #[must_use]
    pub fn application(&self) -> &Application {
        &self.application
    }

    /// A fresh browsing session against this domain's application.
    #[must_use]
    pub fn browse(&self) -> BrowsingSession {
        BrowsingSession::new(self.application.clone())
    }
}

/// Owns the boundary thread. Dropping it closes the job channel and joins the
/// thread.
pub struct IsolationBoundary {
    application_root: PathBuf,
    jobs: Option<channel::Sender<Job>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl IsolationBoundary {
    /// Starts a boundary for the application deployed at `application_root`,
    /// building it with `factory` on the boundary thread.
    pub fn initialize<F>(application_root: impl Into<PathBuf>, factory: F) -> SimulateResult<Self>
    where
        F: FnOnce(HostEnvironment) -> Result<Application, ApplicationError> + Send + 'static,
    {
        Self::initialize_with(application_root, BoundaryConfig::default(), factory)
    }

    pub fn initialize_with<F>(
        application_root: impl Into<PathBuf>,
        config: BoundaryConfig,
        factory: F,
    ) -> SimulateResult<Self>
    where
        F: FnOnce(HostEnvironment) -> Result<Application, ApplicationError> + Send + 'static,
    {
        let application_root = application_root.into();
        let manifest = config::load_manifest(&application_root, &config)?;
        let environment = HostEnvironment::new(application_root.clone(), manifest);

        let (sender, receiver) = channel::unbounded::<Job>();
        let (ready_sender, ready_receiver) = channel::bounded::<SimulateResult<()>>(1);

        let worker = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || match HostDomain::start(environment, factory) {
                Ok(domain) => {
                    if ready_sender.send(Ok(())).is_ok() {
                        domain.serve(&receiver);
                    }
                }
                Err(err) => {
                    let _ = ready_sender.send(Err(err));
                }
            })?;

        match ready_receiver.recv() {
            Ok(Ok(())) => {
                tracing::info!(
                    "IsolationBoundary: application at {} is ready on thread {}",
                    application_root.display(),
                    config.thread_name
                );
                Ok(Self {
                    application_root,
                    jobs: Some(sender),
                    worker: Some(worker),
                })
            }
            Ok(Err(err)) => {
                tracing::warn!("IsolationBoundary: initialization failed: {}", err);
                let _ = worker.join();
                Err(err)
            }
            Err(_) => match worker.join() {
                Err(payload) => panic::resume_unwind(payload),
                Ok(()) => Err(SimulateError::BoundaryClosed),
            },
        }
    }

    #[must_use]
    pub fn application_root(&self) -> &Path {
        &self.application_root
    }

    /// Runs `action` on the boundary thread and waits for its value.
    ///
    /// A panic inside `action` is resumed on the calling thread; the boundary
    /// keeps serving later jobs.
    pub fn run_inside<R, F>(&self, action: F) -> SimulateResult<R>
    where
        F: FnOnce(&HostDomain) -> R + Send + 'static,
        R: Send + 'static,
    {
        let jobs = self.jobs.as_ref().ok_or(SimulateError::BoundaryClosed)?;
        let (reply_sender, reply_receiver) = channel::bounded::<thread::Result<R>>(1);

        let job: Job = Box::new(move |domain: &HostDomain| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| action(domain)));
            let _ = reply_sender.send(outcome);
        });
        jobs.send(job).map_err(|_| SimulateError::BoundaryClosed)?;

        match reply_receiver.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(_) => Err(SimulateError::BoundaryClosed),
        }
    }

    /// Sends `script` across the boundary and runs it against a fresh
    /// [`BrowsingSession`].
    ///
    /// Captured variables are decomposed before anything is sent, so an
    /// untransferable capture fails without a single request being made.
    pub fn run_browsing_script(&self, script: &Closure) -> SimulateResult<()> {
        let wire = transfer::capture(script)?.to_wire()?;
        tracing::debug!("IsolationBoundary: running browsing script {}", script.code());

        self.run_inside(move |domain: &HostDomain| -> SimulateResult<()> {
            let restored = transfer::restore(ClosureEnvelope::from_wire(&wire)?)?;
            let mut session = domain.browse();
            restored.invoke(&mut session).map_err(|err| match err.downcast::<SimulateError>() {
                Ok(inner) => inner,
                Err(other) => SimulateError::Script(other),
            })
        })?
    }
}

impl fmt::Debug for IsolationBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolationBoundary")
            .field("application_root", &self.application_root)
            .field("running", &self.jobs.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for IsolationBoundary {
    fn drop(&mut self) {
        self.jobs = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("IsolationBoundary: boundary thread panicked while shutting down");
            }
        }
    }
}
