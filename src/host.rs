//! Host-side event dispatch for the agent.
//!
//! The platform contract is modeled explicitly: events arrive on a channel,
//! lifecycle events (install, activate) are awaited to completion before the
//! next event is taken, and fetch events are served concurrently once the
//! agent is active. Each event carries a responder the driver completes when
//! the handler's future resolves.

use color_eyre::{eyre::eyre, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::agent::{FetchOutcome, OfflineAgent};
use crate::cache::CacheStore;
use crate::net::{Network, Request};

/// Lifecycle of a hosted agent generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  /// Registered, install not yet run in this session
  New,
  /// Install completed successfully
  Installed,
  /// Activation completed; fetch events are intercepted
  Active,
  /// Install failed; this generation will never activate
  Redundant,
}

/// Events the host delivers to the agent.
enum Event {
  Install {
    done: oneshot::Sender<Result<()>>,
  },
  Activate {
    done: oneshot::Sender<Result<()>>,
  },
  Fetch {
    request: Request,
    respond_to: oneshot::Sender<Result<FetchOutcome>>,
  },
}

/// Handle for delivering events to a running driver.
///
/// Dropping every handle shuts the driver down.
#[derive(Clone)]
pub struct HostHandle {
  tx: mpsc::UnboundedSender<Event>,
}

impl HostHandle {
  /// Deliver an install event and wait for the handler to finish.
  pub async fn install(&self) -> Result<()> {
    let (done, rx) = oneshot::channel();
    self
      .tx
      .send(Event::Install { done })
      .map_err(|_| eyre!("Host driver is gone"))?;
    rx.await.map_err(|_| eyre!("Host driver dropped the install event"))?
  }

  /// Deliver an activate event and wait for the handler to finish.
  pub async fn activate(&self) -> Result<()> {
    let (done, rx) = oneshot::channel();
    self
      .tx
      .send(Event::Activate { done })
      .map_err(|_| eyre!("Host driver is gone"))?;
    rx.await.map_err(|_| eyre!("Host driver dropped the activate event"))?
  }

  /// Deliver a fetch event and wait for the response.
  pub async fn fetch(&self, request: Request) -> Result<FetchOutcome> {
    let (respond_to, rx) = oneshot::channel();
    self
      .tx
      .send(Event::Fetch {
        request,
        respond_to,
      })
      .map_err(|_| eyre!("Host driver is gone"))?;
    rx.await.map_err(|_| eyre!("Host driver dropped the fetch event"))?
  }
}

/// Spawn the driver task for an agent and return a handle to it.
pub fn spawn<S, N>(agent: OfflineAgent<S, N>) -> HostHandle
where
  S: CacheStore + 'static,
  N: Network + 'static,
{
  let (tx, rx) = mpsc::unbounded_channel();
  tokio::spawn(drive(agent, rx));
  HostHandle { tx }
}

async fn drive<S, N>(agent: OfflineAgent<S, N>, mut rx: mpsc::UnboundedReceiver<Event>)
where
  S: CacheStore + 'static,
  N: Network + 'static,
{
  let mut lifecycle = Lifecycle::New;

  while let Some(event) = rx.recv().await {
    match event {
      Event::Install { done } => {
        let result = agent.handle_install().await;
        lifecycle = match (&result, lifecycle) {
          (Ok(_), Lifecycle::Active) => Lifecycle::Active,
          (Ok(_), _) => Lifecycle::Installed,
          (Err(_), _) => Lifecycle::Redundant,
        };
        let _ = done.send(result);
      }
      Event::Activate { done } => {
        let result = match lifecycle {
          Lifecycle::Installed | Lifecycle::Active => agent.handle_activate().await,
          // A namespace pre-cached by an earlier host session counts as
          // installed; registration is durable.
          Lifecycle::New => match agent.installed() {
            Ok(true) => agent.handle_activate().await,
            Ok(false) => Err(eyre!("Cannot activate: agent was never installed")),
            Err(e) => Err(e),
          },
          Lifecycle::Redundant => {
            Err(eyre!("Cannot activate: install failed for this generation"))
          }
        };
        if result.is_ok() {
          lifecycle = Lifecycle::Active;
        }
        let _ = done.send(result);
      }
      Event::Fetch {
        request,
        respond_to,
      } => {
        if lifecycle != Lifecycle::Active {
          let _ = respond_to.send(Err(eyre!(
            "Agent is not active; fetch events are not intercepted"
          )));
          continue;
        }
        // Fetch handling is concurrent; lifecycle events stay sequential.
        let agent = agent.clone();
        tokio::spawn(async move {
          let _ = respond_to.send(agent.handle_fetch(request).await);
        });
      }
    }
  }

  debug!("all host handles dropped, driver finished");
}
