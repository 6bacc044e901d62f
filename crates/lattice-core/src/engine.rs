//! The handler engine.
//!
//! An [`Engine`] carries the instance configuration and two ordered handler
//! chains: the send chain runs before cross-instance dispatch, the receive
//! chain before local delivery. Handlers may rewrite a message, drop it, or
//! (send side) absorb it so the hub publishes nothing.
//!
//! Handlers are plain closures over `(engine, ctx, message)`. Anything else a
//! handler needs is closed over at construction — see [`bound`] — so a chain
//! can never disagree with a parameter list at runtime.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::error;

use crate::cluster::ClusterContext;
use crate::config::GatewayConfig;
use crate::message::Message;

/// One link of a handler chain.
///
/// Returning `Some` replaces the message for the next handler; returning
/// `None` drops the message and stops the chain.
pub type ChainHandler =
    Arc<dyn Fn(&Engine, &ClusterContext, Message) -> Option<Message> + Send + Sync>;

/// Wraps a closure as a [`ChainHandler`].
pub fn handler<F>(f: F) -> ChainHandler
where
    F: Fn(&Engine, &ClusterContext, Message) -> Option<Message> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wraps a closure together with a parameter bundle it receives on every
/// invocation. The typed replacement for handler/parameter-tuple pairing:
/// a missing or mismatched bundle fails to compile instead of failing at
/// install time.
pub fn bound<P, F>(params: P, f: F) -> ChainHandler
where
    P: Send + Sync + 'static,
    F: Fn(&Engine, &ClusterContext, Message, &P) -> Option<Message> + Send + Sync + 'static,
{
    Arc::new(move |engine, ctx, msg| f(engine, ctx, msg, &params))
}

/// Per-instance configuration plus the two handler chains.
///
/// Built mutable during startup, then shared immutably (`Arc`) by the hub and
/// the HTTP entry point. Only the absorb flag changes after that.
pub struct Engine {
    config: Arc<GatewayConfig>,
    auth_enabled: bool,
    absorbed: AtomicBool,
    send_chain: Vec<ChainHandler>,
    receive_chain: Vec<ChainHandler>,
}

impl Engine {
    /// Creates an engine with empty chains and auth disabled.
    pub fn new(config: Arc<GatewayConfig>) -> Self {
        Self {
            config,
            auth_enabled: false,
            absorbed: AtomicBool::new(false),
            send_chain: Vec::new(),
            receive_chain: Vec::new(),
        }
    }

    /// The instance configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Turns on bearer-token validation at the HTTP entry point.
    pub fn enable_auth(&mut self) {
        self.auth_enabled = true;
    }

    /// Whether upgrades must present a valid bearer token.
    pub fn auth_enabled(&self) -> bool {
        self.auth_enabled
    }

    /// Installs the send-side chain, replacing any previous one.
    pub fn set_send_chain(&mut self, chain: Vec<ChainHandler>) {
        self.send_chain = chain;
    }

    /// Installs the receive-side chain, replacing any previous one.
    pub fn set_receive_chain(&mut self, chain: Vec<ChainHandler>) {
        self.receive_chain = chain;
    }

    /// Marks the in-flight message as consumed by the server. Called from a
    /// send handler; the hub observes it through [`take_absorbed`](Self::take_absorbed)
    /// and skips dispatch.
    pub fn absorb(&self) {
        self.absorbed.store(true, Ordering::SeqCst);
    }

    /// Snapshots and clears the absorb flag. The hub calls this exactly once
    /// per dispatch, right after the send chain returns.
    pub fn take_absorbed(&self) -> bool {
        self.absorbed.swap(false, Ordering::SeqCst)
    }

    /// Runs the send chain over a message.
    pub fn run_send_chain(&self, ctx: &ClusterContext, msg: Message) -> Option<Message> {
        self.run_chain(&self.send_chain, ctx, msg, "send")
    }

    /// Runs the receive chain over a message.
    pub fn run_receive_chain(&self, ctx: &ClusterContext, msg: Message) -> Option<Message> {
        self.run_chain(&self.receive_chain, ctx, msg, "receive")
    }

    fn run_chain(
        &self,
        chain: &[ChainHandler],
        ctx: &ClusterContext,
        msg: Message,
        side: &'static str,
    ) -> Option<Message> {
        let mut current = msg;
        for (index, link) in chain.iter().enumerate() {
            // A panicking handler must not take the hub down with it; the
            // message it was holding is gone either way.
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| link(self, ctx, current)));
            current = match outcome {
                Ok(Some(next)) => next,
                Ok(None) => return None,
                Err(_) => {
                    error!(side, index, "message handler panicked, dropping message");
                    return None;
                }
            };
        }
        Some(current)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("auth_enabled", &self.auth_enabled)
            .field("send_chain", &self.send_chain.len())
            .field("receive_chain", &self.receive_chain.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Delivery, LeaseId, MessageBus, Presence};
    use crate::error::ClusterResult;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct NullPresence;

    #[async_trait]
    impl Presence for NullPresence {
        async fn bind(&self, _ttl: i64, _id: &str, _addr: &str) -> ClusterResult<LeaseId> {
            Ok(1)
        }

        async fn release(&self, _lease: LeaseId) -> ClusterResult<()> {
            Ok(())
        }

        async fn refresh(&self, _lease: LeaseId) -> ClusterResult<()> {
            Ok(())
        }

        async fn locate(&self, _id: &str) -> ClusterResult<Option<String>> {
            Ok(None)
        }
    }

    struct NullBus;

    #[async_trait]
    impl MessageBus for NullBus {
        async fn publish(&self, _queue: &str, _payload: &[u8]) -> ClusterResult<()> {
            Ok(())
        }

        async fn consume(&self, _queue: &str) -> ClusterResult<mpsc::Receiver<Delivery>> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
    }

    fn test_ctx() -> ClusterContext {
        ClusterContext::new(Arc::new(NullPresence), Arc::new(NullBus))
    }

    fn test_engine() -> Engine {
        Engine::new(Arc::new(GatewayConfig::default()))
    }

    #[test]
    fn handlers_rewrite_in_order() {
        let mut engine = test_engine();
        engine.set_send_chain(vec![
            handler(|_, _, mut msg| {
                msg.body.push('1');
                Some(msg)
            }),
            handler(|_, _, mut msg| {
                msg.body.push('2');
                Some(msg)
            }),
        ]);

        let out = engine
            .run_send_chain(&test_ctx(), Message::new("x", "a"))
            .unwrap();
        assert_eq!(out.body, "x12");
    }

    #[test]
    fn none_drops_and_short_circuits() {
        let mut engine = test_engine();
        engine.set_receive_chain(vec![
            handler(|_, _, _| None),
            handler(|_, _, _| panic!("must not run")),
        ]);

        assert!(
            engine
                .run_receive_chain(&test_ctx(), Message::new("x", "a"))
                .is_none()
        );
    }

    #[test]
    fn panicking_handler_drops_message() {
        let mut engine = test_engine();
        engine.set_send_chain(vec![handler(|_, _, _| panic!("boom"))]);

        assert!(
            engine
                .run_send_chain(&test_ctx(), Message::new("x", "a"))
                .is_none()
        );
    }

    #[test]
    fn absorb_is_snapshot_and_clear() {
        let mut engine = test_engine();
        engine.set_send_chain(vec![handler(|engine, _, msg| {
            engine.absorb();
            Some(msg)
        })]);

        let out = engine.run_send_chain(&test_ctx(), Message::new("x", "a"));
        assert!(out.is_some());
        assert!(engine.take_absorbed());
        // Cleared for the next dispatch.
        assert!(!engine.take_absorbed());
    }

    #[test]
    fn bound_handler_sees_its_parameters() {
        let mut engine = test_engine();
        engine.set_send_chain(vec![bound(
            ("prefix".to_string(), 3usize),
            |_, _, mut msg: Message, (prefix, times): &(String, usize)| {
                for _ in 0..*times {
                    msg.body.insert_str(0, prefix);
                }
                Some(msg)
            },
        )]);

        let out = engine
            .run_send_chain(&test_ctx(), Message::new("x", "a"))
            .unwrap();
        assert_eq!(out.body, "prefixprefixprefixx");
    }
}
