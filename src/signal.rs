//! Controlling a running daemon with signals.
//!
//! The same table of commands is used on both ends: a controlling invocation marks the
//! commands it wants and [`send`](SignalCommands::send)s them to the process found by
//! [`Context::search`](crate::Context::search), while the daemon
//! [`listen`](SignalCommands::listen)s and runs the handlers.

use std::collections::HashMap;
use std::fmt;
use std::io;

use log::{debug, trace};
use signal_hook::consts::FORBIDDEN;
use signal_hook::iterator::{Handle, Signals};

use crate::error::{DaemonError, DaemonResult};
use crate::process::DaemonProcess;

/// What the serving loop does after a handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalFlow {
    Continue,
    Stop,
}

type Handler = Box<dyn FnMut(i32) -> DaemonResult<SignalFlow> + Send>;

struct Command {
    signal: i32,
    requested: bool,
    handler: Option<Handler>,
}

/// A table of signals, whether each was requested on the command line, and what the
/// daemon does on receiving it.
#[derive(Default)]
pub struct SignalCommands {
    commands: Vec<Command>,
}

impl fmt::Debug for SignalCommands {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.commands.iter().map(|c| (c.signal, c.requested, c.handler.is_some())))
            .finish()
    }
}

impl SignalCommands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a command with a handler. A later handler for the same signal replaces the
    /// earlier one.
    pub fn add<F>(&mut self, signal: i32, requested: bool, handler: F) -> &mut Self
    where
        F: FnMut(i32) -> DaemonResult<SignalFlow> + Send + 'static,
    {
        self.commands.push(Command {
            signal,
            requested,
            handler: Some(Box::new(handler)),
        });
        self
    }

    /// Adds a command that is only ever sent, never handled here.
    pub fn flag(&mut self, signal: i32, requested: bool) -> &mut Self {
        self.commands.push(Command {
            signal,
            requested,
            handler: None,
        });
        self
    }

    /// Whether any command was requested.
    pub fn any_requested(&self) -> bool {
        self.commands.iter().any(|c| c.requested)
    }

    /// Sends every requested signal to `process`, returning how many were sent.
    pub fn send(&self, process: &DaemonProcess) -> DaemonResult<usize> {
        let mut sent = 0;
        for command in self.commands.iter().filter(|c| c.requested) {
            debug!("Sending signal {} to {}", command.signal, process.id());
            process.signal(command.signal)?;
            sent += 1;
        }
        Ok(sent)
    }

    /// Installs the signal handlers. Signals arriving from now on are queued until
    /// [`SignalServer::serve`] picks them up.
    pub fn listen(self) -> DaemonResult<SignalServer> {
        let mut handlers = HashMap::new();
        for command in self.commands {
            if let Some(handler) = command.handler {
                if FORBIDDEN.contains(&command.signal) {
                    return Err(DaemonError::Syscall {
                        call: "sigaction",
                        source: io::Error::new(
                            io::ErrorKind::InvalidInput,
                            format!("signal {} can't be handled", command.signal),
                        ),
                    });
                }
                handlers.insert(command.signal, handler);
            }
        }
        let signals = Signals::new(handlers.keys().copied()).map_err(|source| DaemonError::Syscall {
            call: "sigaction",
            source,
        })?;
        Ok(SignalServer { signals, handlers })
    }
}

/// Registered handlers waiting for their signals.
pub struct SignalServer {
    signals: Signals,
    handlers: HashMap<i32, Handler>,
}

impl SignalServer {
    /// A handle that can end [`serve`](Self::serve) from another thread.
    pub fn handle(&self) -> Handle {
        self.signals.handle()
    }

    /// Runs handlers as signals come in, until one returns [`SignalFlow::Stop`] or an
    /// error, or the loop is closed through a [`Handle`].
    pub fn serve(mut self) -> DaemonResult<()> {
        for signal in self.signals.forever() {
            let Some(handler) = self.handlers.get_mut(&signal) else {
                continue;
            };
            trace!("Handling signal {}", signal);
            if handler(signal)? == SignalFlow::Stop {
                debug!("Signal {} stopped the daemon", signal);
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_hook::consts::{SIGKILL, SIGUSR1, SIGUSR2};
    use signal_hook::low_level::raise;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn handler_runs_and_stops_serving() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        let mut commands = SignalCommands::new();
        commands.add(SIGUSR2, false, move |sig| {
            assert_eq!(sig, SIGUSR2);
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(SignalFlow::Stop)
        });
        let server = commands.listen().unwrap();

        raise(SIGUSR2).unwrap();
        server.serve().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn closed_handle_ends_serving() {
        let mut commands = SignalCommands::new();
        commands.add(SIGUSR2, false, |_| Ok(SignalFlow::Continue));
        let server = commands.listen().unwrap();

        server.handle().close();
        server.serve().unwrap();
    }

    #[test]
    fn only_requested_commands_are_sent() {
        let mut commands = SignalCommands::new();
        commands.flag(SIGUSR1, false);
        assert!(!commands.any_requested());

        let nobody = DaemonProcess::from_pid(std::process::id());
        assert_eq!(commands.send(&nobody).unwrap(), 0);
    }

    #[test]
    fn forbidden_signal_is_rejected() {
        let mut commands = SignalCommands::new();
        commands.add(SIGKILL, false, |_| Ok(SignalFlow::Stop));
        assert!(commands.listen().is_err());
    }
}
