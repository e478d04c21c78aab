//! The command queue: ordered, unbounded, many producers and one consumer.
//!
//! State-mutating requests (`Init`, `AddData`) are acknowledged as soon as
//! they are enqueued. The [`EventLoop`] applies them in enqueue order, so a
//! command for a pod always sees the effects of every command enqueued
//! before it.

mod event_loop;

pub use event_loop::{CommandOutcome, EventLoop};

use crate::error::{Error, Result};
use crate::service::messages::{AddDataRequest, InitRequest};
use std::fmt;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    AddData,
    Init,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::AddData => "add_data",
            CommandKind::Init => "init",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued request. Only the event loop looks inside.
#[derive(Debug, Clone)]
pub enum Command {
    AddData(AddDataRequest),
    Init(InitRequest),
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::AddData(_) => CommandKind::AddData,
            Command::Init(_) => CommandKind::Init,
        }
    }

    pub fn pod(&self) -> &str {
        match self {
            Command::AddData(req) => &req.pod,
            Command::Init(req) => &req.pod,
        }
    }
}

/// Create a connected queue
pub fn command_queue() -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CommandSender { tx }, CommandReceiver { rx })
}

/// Producer side. Cloned into every request handler.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<Command>,
}

impl CommandSender {
    /// Never blocks. Fails only once the event loop has stopped.
    pub fn enqueue(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| Error::QueueClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct CommandReceiver {
    rx: mpsc::UnboundedReceiver<Command>,
}

impl CommandReceiver {
    pub async fn recv(&mut self) -> Option<Command> {
        self.rx.recv().await
    }

    pub(crate) fn close(&mut self) {
        self.rx.close();
    }
}
