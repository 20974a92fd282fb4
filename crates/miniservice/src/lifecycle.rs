//! Run state machine shared by the probe and RPC serve loops.
//!
//! `Starting → HealthProbeUp → Registering → Serving → Stopped`. The control
//! flow waits on the grace timer, both loop handles and an external shutdown
//! signal. Whichever loop ends first decides the outcome; the other one is
//! told to stop and, if it does not drain in time, aborted.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use miniservice_core::{Error, Registry, RegistryRecord};

pub(crate) type ServeLoop = JoinHandle<Result<(), Error>>;

type Submission<'a> = Pin<Box<dyn Future<Output = Result<(), Error>> + Send + 'a>>;

/// Resolves once the run has been told to stop.
pub(crate) async fn stopped(mut stop: watch::Receiver<bool>) {
    // A dropped sender also means stop.
    let _ = stop.wait_for(|stop| *stop).await;
}

enum Registration<'a> {
    Pending,
    /// Submitted; polled alongside the serve loops so a slow registry never
    /// holds up a terminal event.
    InFlight(Submission<'a>),
    Registered,
}

/// Completes with the in-flight submission, or never.
async fn submitted(registration: &mut Registration<'_>) -> Result<(), Error> {
    match registration {
        Registration::InFlight(submission) => submission.as_mut().await,
        _ => std::future::pending().await,
    }
}

#[derive(Debug)]
enum Terminal {
    Probe(Result<(), Error>),
    Rpc(Result<(), Error>),
    RegisterFailed(Error),
    Shutdown,
}

pub(crate) struct Lifecycle<'a> {
    pub registry: &'a dyn Registry,
    pub record: RegistryRecord,
    pub registration_delay: Duration,
    /// Bounds each teardown step: deregistration and draining each loop.
    pub drain_timeout: Duration,
    pub stop: watch::Sender<bool>,
}

impl Lifecycle<'_> {
    pub(crate) async fn run<F>(self, mut probe: ServeLoop, mut rpc: ServeLoop, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        let id = self.record.identity.id.as_str();
        let timer = tokio::time::sleep(self.registration_delay);
        tokio::pin!(timer);
        tokio::pin!(shutdown);
        let mut registration = Registration::Pending;

        let terminal = loop {
            tokio::select! {
                () = &mut timer, if matches!(registration, Registration::Pending) => {
                    registration = Registration::InFlight(self.registry.register(&self.record));
                }
                res = submitted(&mut registration), if matches!(registration, Registration::InFlight(_)) => {
                    match res {
                        Ok(()) => {
                            registration = Registration::Registered;
                            metrics::counter!("miniservice_registrations_total").increment(1);
                            info!(id, name = %self.record.identity.name, "registered service");
                        }
                        Err(e) => {
                            registration = Registration::Pending;
                            break Terminal::RegisterFailed(e);
                        }
                    }
                }
                res = &mut probe => break Terminal::Probe(joined(res, "health check")),
                res = &mut rpc => break Terminal::Rpc(joined(res, "rpc server")),
                () = &mut shutdown => break Terminal::Shutdown,
            }
        };
        debug!(id, ?terminal, "run ending");

        let outcome = match terminal {
            Terminal::Probe(Ok(())) => {
                info!(id, "health check has ended - exiting");
                Ok(())
            }
            Terminal::Rpc(Ok(())) => {
                info!(id, "service has ended - exiting");
                Ok(())
            }
            Terminal::Shutdown => {
                info!(id, "shutdown requested - exiting");
                Ok(())
            }
            Terminal::Probe(Err(e)) | Terminal::Rpc(Err(e)) | Terminal::RegisterFailed(e) => Err(e),
        };

        let _ = self.stop.send(true);

        let deregistered = match registration {
            Registration::Registered => self.deregister().await,
            Registration::InFlight(submission) => {
                // The registry may have applied the abandoned submission.
                drop(submission);
                if let Err(e) = self.deregister().await {
                    debug!(id, error = %e, "cleanup after abandoned registration failed");
                }
                Ok(())
            }
            Registration::Pending => Ok(()),
        };

        for (what, handle) in [("health check", &mut probe), ("rpc server", &mut rpc)] {
            if handle.is_finished() {
                continue;
            }
            match tokio::time::timeout(self.drain_timeout, &mut *handle).await {
                Ok(res) => {
                    if let Err(e) = joined(res, what) {
                        debug!(id, error = %e, "{what} ended with error during teardown");
                    }
                }
                Err(_) => {
                    warn!(id, "{what} did not drain in time, aborting");
                    handle.abort();
                }
            }
        }

        match (outcome, deregistered) {
            (Ok(()), res) => res,
            (Err(e), Err(dereg)) => {
                warn!(id, error = %dereg, "deregistration failed");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
        }
    }

    async fn deregister(&self) -> Result<(), Error> {
        let id = self.record.identity.id.as_str();
        tokio::time::timeout(self.drain_timeout, self.registry.deregister(id))
            .await
            .map_err(|_| Error::registry("deregister", format!("no answer within {:?}", self.drain_timeout)))??;
        metrics::counter!("miniservice_deregistrations_total").increment(1);
        info!(id, "deregistered service");
        Ok(())
    }
}

fn joined(res: Result<Result<(), Error>, tokio::task::JoinError>, what: &str) -> Result<(), Error> {
    res.map_err(|e| Error::transport(format!("{what} task failed"), e))?
}
