use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::bot::Bot;
use crate::types::Message;

pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Type-erased handler callback. It receives the owning bot so it can reply.
pub type Callback = Arc<dyn Fn(Arc<Bot>, Message) -> HandlerFuture + Send + Sync>;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid command {command:?}: {source}")]
    InvalidCommand {
        command: String,
        #[source]
        source: regex::Error,
    },
}

/// Box an async closure into a [`Callback`].
pub fn callback<F, Fut>(f: F) -> Callback
where
    F: Fn(Arc<Bot>, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |bot: Arc<Bot>, msg: Message| -> HandlerFuture {
        Box::pin(f(bot, msg))
    })
}

/// A matcher paired with the callback to run when it matches.
pub enum Handler {
    /// `/command` at the very start of the body, followed by whitespace or
    /// the end of the text.
    Command {
        command: String,
        pattern: Regex,
        callback: Callback,
    },
    /// Any message with a non-empty body.
    Text { callback: Callback },
}

impl Handler {
    /// The command is spliced into the pattern as-is, so regex
    /// metacharacters in it are not escaped.
    pub fn command(command: &str, callback: Callback) -> Result<Self, HandlerError> {
        let pattern = Regex::new(&format!(r"^/{}(\s|$)", command)).map_err(|source| {
            HandlerError::InvalidCommand {
                command: command.to_string(),
                source,
            }
        })?;
        Ok(Handler::Command {
            command: command.to_string(),
            pattern,
            callback,
        })
    }

    pub fn text(callback: Callback) -> Self {
        Handler::Text { callback }
    }

    pub fn matches(&self, message: &Message) -> bool {
        match self {
            Handler::Command { pattern, .. } => pattern.is_match(&message.text),
            Handler::Text { .. } => !message.text.is_empty(),
        }
    }

    pub fn invoke(&self, bot: Arc<Bot>, message: Message) -> HandlerFuture {
        match self {
            Handler::Command { callback, .. } | Handler::Text { callback } => {
                callback(bot, message)
            }
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handler::Command { command, .. } => write!(f, "Command(/{})", command),
            Handler::Text { .. } => write!(f, "Text"),
        }
    }
}

/// Ordered handler registry. The first handler that matches wins.
#[derive(Debug, Default)]
pub struct Router {
    handlers: Vec<Handler>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handler: Handler) {
        debug!("Registered handler #{}: {:?}", self.handlers.len(), handler);
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// The handler that would receive `message`, if any.
    pub fn find(&self, message: &Message) -> Option<&Handler> {
        self.handlers.iter().find(|h| h.matches(message))
    }

    /// Run the first matching handler. Returns `None` when nothing matched;
    /// unmatched messages are dropped without a trace.
    pub async fn route(&self, bot: Arc<Bot>, message: Message) -> Option<anyhow::Result<()>> {
        let handler = self.find(&message)?;
        debug!(
            "Message {} in chat {} -> {:?}",
            message.message_id, message.chat.id, handler
        );
        Some(handler.invoke(bot, message).await)
    }
}
