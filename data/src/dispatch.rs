use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};

use irc::proto::Message;

use crate::callback::panic_message;

pub type Handler<T> = Box<dyn Fn(&mut T, &Message) -> anyhow::Result<()> + Send + Sync>;

/// Routes parsed lines to the handlers registered for their command.
///
/// Keys are matched exactly as they appear on the wire, so `privmsg` and
/// `PRIVMSG` are different keys.
pub struct Dispatcher<T> {
    handlers: HashMap<String, Vec<Handler<T>>>,
    unknown: AtomicUsize,
}

impl<T> Default for Dispatcher<T> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
            unknown: AtomicUsize::new(0),
        }
    }
}

impl<T> Dispatcher<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler for `key`. Handlers for the same key run in the
    /// order they were registered.
    pub fn register(
        &mut self,
        key: impl Into<String>,
        handler: impl Fn(&mut T, &Message) -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        self.handlers
            .entry(key.into())
            .or_default()
            .push(Box::new(handler));
    }

    pub fn handles(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }

    /// Number of lines seen so far that no handler was registered for.
    pub fn unknown(&self) -> usize {
        self.unknown.load(Ordering::Relaxed)
    }

    pub fn dispatch(&self, message: &Message, target: &mut T) -> Report {
        let Some(handlers) = self.handlers.get(&message.command) else {
            self.unknown.fetch_add(1, Ordering::Relaxed);
            log::debug!("no handler for {}", message.command);

            return Report {
                handlers: 0,
                errors: vec![],
            };
        };

        let mut errors = vec![];

        for handler in handlers {
            let result = panic::catch_unwind(AssertUnwindSafe(|| handler(target, message)));

            let reason = match result {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => format!("{error:#}"),
                Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
            };

            log::error!("handler for {} failed: {reason}", message.command);

            errors.push(Error {
                command: message.command.clone(),
                reason,
            });
        }

        Report {
            handlers: handlers.len(),
            errors,
        }
    }
}

/// Outcome of dispatching one line.
#[derive(Debug, Default)]
pub struct Report {
    pub handlers: usize,
    pub errors: Vec<Error>,
}

impl Report {
    pub fn is_unknown(&self) -> bool {
        self.handlers == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("handler for {command} failed: {reason}")]
pub struct Error {
    pub command: String,
    pub reason: String,
}
