//! Handlers for responses on meta channels.
//!
//! The registry holds one actor per meta channel. An actor is either a plain
//! handler function or a chained-once composition: the original handler plus
//! a one-shot continuation that runs right after it on the next firing, after
//! which the slot reverts to the original handler. Because the handlers
//! mutate the same state that owns the registry, firing is a take/invoke/
//! restore cycle driven by the owner.

use std::collections::HashMap;

use crate::message::{Message, MetaChannel};

/// A persistent handler bound to a meta channel.
pub(crate) type HandlerFn<C> = fn(&mut C, &Message);

/// A one-shot continuation chained in front of a restore.
pub(crate) type OnceFn<C> = Box<dyn FnOnce(&mut C, &Message) + Send>;

pub(crate) enum Actor<C> {
    Handler(HandlerFn<C>),
    Chained { original: Box<Actor<C>>, once: OnceFn<C> },
}

impl<C> Actor<C> {
    /// Invokes the actor and returns the actor to restore into its slot:
    /// the original handler, with every chained layer consumed.
    pub(crate) fn invoke(self, cx: &mut C, message: &Message) -> Actor<C> {
        match self {
            Actor::Handler(handler) => {
                handler(cx, message);
                Actor::Handler(handler)
            }
            Actor::Chained { original, once } => {
                let restored = original.invoke(cx, message);
                once(cx, message);
                restored
            }
        }
    }
}

pub(crate) struct ActorRegistry<C> {
    slots: HashMap<MetaChannel, Actor<C>>,
}

fn noop<C>(_: &mut C, _: &Message) {}

impl<C> ActorRegistry<C> {
    pub(crate) fn new() -> Self {
        Self { slots: HashMap::new() }
    }

    /// Installs `handler` as the persistent actor for `channel`.
    pub(crate) fn set(&mut self, channel: MetaChannel, handler: HandlerFn<C>) {
        self.slots.insert(channel, Actor::Handler(handler));
    }

    /// Wraps the current actor so that `once` runs right after it on the
    /// next firing only.
    pub(crate) fn chain_once(&mut self, channel: MetaChannel, once: OnceFn<C>) {
        let original = self.slots.remove(&channel).unwrap_or(Actor::Handler(noop));
        self.slots.insert(channel, Actor::Chained { original: Box::new(original), once });
    }

    /// Removes the actor for `channel` so the owner can invoke it without
    /// aliasing itself. Pair with [`ActorRegistry::restore`].
    pub(crate) fn take(&mut self, channel: MetaChannel) -> Option<Actor<C>> {
        self.slots.remove(&channel)
    }

    /// Puts an actor back after invocation. A handler installed while the
    /// slot was checked out wins over the restoration.
    pub(crate) fn restore(&mut self, channel: MetaChannel, actor: Actor<C>) {
        self.slots.entry(channel).or_insert(actor);
    }
}
