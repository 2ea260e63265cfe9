//! Controller service task
//!
//! Each open connection is driven by one tokio task that owns its
//! [`Controller`] and multiplexes three inputs: lines from the transport,
//! requests from clients and the poll interval. Clients talk to the task
//! through a cloneable [`ControllerHandle`].

use std::sync::Arc;

use halstream_core::error::{ConnectionError, ControllerError};
use halstream_core::event_bus::EventBus;
use halstream_settings::Config;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::connection::{ChannelConnection, Transport, TransportEvent};
use crate::firmware::grblhal::{Controller, ControllerCommand, ControllerSnapshot};
use crate::registry::ControllerRegistry;

const REQUEST_CHANNEL_CAPACITY: usize = 64;

type Reply = oneshot::Sender<Result<(), ControllerError>>;

#[derive(Debug)]
enum Request {
    Command {
        command: ControllerCommand,
        reply: Option<Reply>,
    },
    Snapshot(oneshot::Sender<ControllerSnapshot>),
    Close,
}

/// Client side of a running controller
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    id: Uuid,
    ident: String,
    requests: mpsc::Sender<Request>,
}

impl ControllerHandle {
    pub fn ident(&self) -> &str {
        &self.ident
    }

    /// Unique per service task; distinguishes reconnects on the same port
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The service task is still running
    pub fn is_alive(&self) -> bool {
        !self.requests.is_closed()
    }

    /// Run a command and wait for it to be accepted or rejected
    pub async fn command(&self, command: ControllerCommand) -> Result<(), ControllerError> {
        let (reply, result) = oneshot::channel();
        self.requests
            .send(Request::Command {
                command,
                reply: Some(reply),
            })
            .await
            .map_err(|_| ControllerError::NotConnected)?;
        result.await.map_err(|_| ControllerError::NotConnected)?
    }

    /// Queue a command without waiting; rejections are only logged
    pub async fn send(&self, command: ControllerCommand) -> Result<(), ControllerError> {
        self.requests
            .send(Request::Command {
                command,
                reply: None,
            })
            .await
            .map_err(|_| ControllerError::NotConnected)
    }

    /// Parse a named command such as `gcode:start 12` and run it
    pub async fn dispatch(&self, name: &str, args: &[&str]) -> Result<(), ControllerError> {
        self.command(ControllerCommand::parse(name, args)?).await
    }

    pub async fn snapshot(&self) -> Result<ControllerSnapshot, ControllerError> {
        let (reply, result) = oneshot::channel();
        self.requests
            .send(Request::Snapshot(reply))
            .await
            .map_err(|_| ControllerError::NotConnected)?;
        result.await.map_err(|_| ControllerError::NotConnected)
    }

    /// Ask the service to close the connection and exit
    pub async fn close(&self) {
        self.requests.send(Request::Close).await.ok();
    }
}

/// Open `transport` and start a controller on it
pub async fn connect(
    transport: &dyn Transport,
    config: Config,
    bus: Arc<EventBus>,
    registry: Option<Arc<ControllerRegistry>>,
) -> Result<ControllerHandle, ConnectionError> {
    let (connection, events) = transport.open().await?;
    Ok(spawn_controller(connection, events, config, bus, registry))
}

/// Start the service task for an already open connection
pub fn spawn_controller(
    connection: ChannelConnection,
    events: mpsc::Receiver<TransportEvent>,
    config: Config,
    bus: Arc<EventBus>,
    registry: Option<Arc<ControllerRegistry>>,
) -> ControllerHandle {
    let ident = crate::connection::Connection::ident(&connection).to_string();
    let (requests, receiver) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
    let handle = ControllerHandle {
        id: Uuid::new_v4(),
        ident: ident.clone(),
        requests,
    };
    if let Some(registry) = &registry {
        if registry.register(handle.clone()).is_some() {
            tracing::warn!("Replaced an existing controller for {}", ident);
        }
    }

    let controller = Controller::new(Box::new(connection), config, bus);
    tokio::spawn(run(controller, events, receiver, registry, handle.id));
    handle
}

async fn run(
    mut controller: Controller,
    mut events: mpsc::Receiver<TransportEvent>,
    mut requests: mpsc::Receiver<Request>,
    registry: Option<Arc<ControllerRegistry>>,
    id: Uuid,
) {
    let mut poll = tokio::time::interval(controller.config().streaming.poll_interval());
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    controller.open();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(TransportEvent::Data(line)) => controller.on_data(&line),
                Some(TransportEvent::Error(message)) => {
                    controller.on_error(&message);
                    if !controller.is_open() {
                        break;
                    }
                }
                Some(TransportEvent::Close) | None => break,
            },
            request = requests.recv() => match request {
                Some(Request::Command { command, reply }) => {
                    let result = controller.command(command);
                    match reply {
                        Some(reply) => {
                            reply.send(result).ok();
                        }
                        None => {
                            if let Err(e) = result {
                                tracing::warn!("Command rejected on {}: {}", controller.ident(), e);
                            }
                        }
                    }
                }
                Some(Request::Snapshot(reply)) => {
                    reply.send(controller.snapshot()).ok();
                }
                Some(Request::Close) | None => break,
            },
            _ = poll.tick() => controller.tick(),
        }
    }

    controller.on_close();
    if let Some(registry) = registry {
        registry.deregister(controller.ident(), id);
    }
}
