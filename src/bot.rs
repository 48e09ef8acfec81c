use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::api::{ApiError, TelegramClient, UpdateSource};
use crate::config::{Config, DispatchConfig};
use crate::dispatch::{job_queue, Dispatcher};
use crate::handler::{callback, Handler, HandlerError, Router};
use crate::poller::Poller;
use crate::types::{Message, Update, User};

/// A bot: an API client plus an ordered set of handlers.
///
/// Handlers are registered on an owned `Bot`. [`Bot::run`] moves it behind an
/// `Arc`, after which the handler list can no longer change.
pub struct Bot {
    api: TelegramClient,
    router: Router,
    dispatch: DispatchConfig,
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("handlers", &self.router.len())
            .field("dispatch", &self.dispatch)
            .finish_non_exhaustive()
    }
}

impl Bot {
    pub fn new(token: &str) -> Self {
        Self::with_client(TelegramClient::new(token))
    }

    pub fn with_client(api: TelegramClient) -> Self {
        Self {
            api,
            router: Router::new(),
            dispatch: DispatchConfig::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let api =
            TelegramClient::with_api_url(&config.telegram.bot_token, &config.telegram.api_url);
        Self::with_client(api).with_dispatch(config.dispatch)
    }

    /// Override the queue and worker-pool sizes.
    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        self.dispatch
    }

    /// Handle `/command` messages. `command` is used as a regex fragment
    /// without escaping.
    pub fn add_command_handler<F, Fut>(&mut self, command: &str, f: F) -> Result<(), HandlerError>
    where
        F: Fn(Arc<Bot>, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.router.push(Handler::command(command, callback(f))?);
        Ok(())
    }

    /// Handle any message with a non-empty body. Register it after the command
    /// handlers, or it will take their messages too.
    pub fn add_text_handler<F, Fut>(&mut self, f: F)
    where
        F: Fn(Arc<Bot>, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.router.push(Handler::text(callback(f)));
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub async fn get_me(&self) -> Result<User, ApiError> {
        self.api.get_me().await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<Message, ApiError> {
        self.api.send_message(chat_id, text).await
    }

    pub async fn forward_message(
        &self,
        chat_id: i64,
        message: &Message,
    ) -> Result<Message, ApiError> {
        self.api.forward_message(chat_id, message).await
    }

    /// Route one update to the first matching handler. `None` if nothing
    /// matched.
    pub async fn handle_update(self: Arc<Self>, update: Update) -> Option<anyhow::Result<()>> {
        self.router.route(Arc::clone(&self), update.message).await
    }

    /// Poll the Bot API forever, `timeout` seconds per long poll.
    pub async fn run(self, timeout: u64) -> Result<()> {
        let source = self.api.clone();
        self.run_with_source(source, timeout).await
    }

    /// Like [`Bot::run`], but pulls updates from `source`.
    pub async fn run_with_source<S>(self, source: S, timeout: u64) -> Result<()>
    where
        S: UpdateSource + 'static,
    {
        let bot = Arc::new(self);
        let DispatchConfig {
            max_jobs,
            max_workers,
            ..
        } = bot.dispatch;

        let (queue, jobs) = job_queue(max_jobs);
        let dispatcher = Dispatcher::new(max_workers, max_jobs).start(jobs);

        info!(
            "Polling with {} handler(s), timeout {}s, queue capacity {}",
            bot.router.len(),
            timeout,
            max_jobs
        );

        let closed = Poller::new(source, timeout).run(Arc::clone(&bot), queue).await;
        dispatcher.shutdown().await;
        Err(closed).context("Dispatcher stopped accepting jobs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Emits one message per call with increasing ids until `texts` runs out,
    /// then empty batches.
    struct Chatter {
        texts: Vec<&'static str>,
        next: AtomicI64,
    }

    #[async_trait]
    impl UpdateSource for Chatter {
        async fn fetch_updates(&self, _timeout: u64, offset: i64) -> Result<Vec<Update>, ApiError> {
            let id = self.next.fetch_add(1, Ordering::SeqCst);
            assert_eq!(offset, id);
            let Some(text) = self.texts.get(id as usize) else {
                tokio::time::sleep(Duration::from_millis(10)).await;
                self.next.fetch_sub(1, Ordering::SeqCst);
                return Ok(Vec::new());
            };
            Ok(vec![Update {
                update_id: id,
                message: Message {
                    message_id: id as i32,
                    text: text.to_string(),
                    ..Default::default()
                },
            }])
        }
    }

    #[test]
    fn test_invalid_command_is_rejected_at_registration() {
        let mut bot = Bot::new("test");
        let result = bot.add_command_handler("(", |_bot, _msg| async { anyhow::Ok(()) });
        assert!(result.is_err());
        assert!(bot.router().is_empty());
    }

    #[test]
    fn test_from_config_applies_dispatch_settings() {
        let config = Config::parse(
            r#"
            [telegram]
            bot_token = "abc"

            [dispatch]
            max_jobs = 5
            max_workers = 2
            "#,
        )
        .unwrap();
        let bot = Bot::from_config(&config);
        assert_eq!(bot.dispatch_config().max_jobs, 5);
        assert_eq!(bot.dispatch_config().max_workers, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_routes_polled_updates() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut bot = Bot::new("test").with_dispatch(DispatchConfig {
            max_jobs: 4,
            max_workers: 2,
            poll_timeout: 0,
        });

        let start_tx = tx.clone();
        bot.add_command_handler("start", move |_bot, msg| {
            let tx = start_tx.clone();
            async move {
                tx.send(format!("start:{}", msg.message_id)).ok();
                anyhow::Ok(())
            }
        })
        .unwrap();
        bot.add_text_handler(move |_bot, msg| {
            let tx = tx.clone();
            async move {
                tx.send(format!("text:{}", msg.text)).ok();
                anyhow::Ok(())
            }
        });

        let source = Chatter {
            texts: vec!["/start", "", "hello"],
            next: AtomicI64::new(0),
        };
        let task = tokio::spawn(bot.run_with_source(source, 0));

        let mut seen = Vec::new();
        for _ in 0..2 {
            let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(got);
        }
        seen.sort();
        assert_eq!(seen, vec!["start:0", "text:hello"]);

        // The empty message matched nothing.
        assert!(tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .is_err());
        task.abort();
    }
}
