use std::time::Duration;

use log::{error, info};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinSet};

pub trait Actor: Sized + Send + 'static {
    type Message: Send + 'static;
    type Options;

    fn name() -> &'static str;

    fn new(options: Self::Options) -> Self;

    /// Called once before the actor starts receiving messages.
    fn start(&mut self, ctx: &mut ActorContext<Self>);

    /// Process one message and return the next action.
    /// All messages are processed sequentially in a single task, so this
    /// method must not block. If the actor needs to perform async
    /// operations, it should spawn tasks via [ActorContext::spawn] and
    /// send itself a message when the operation completes.
    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: Self::Message) -> ActorAction;

    fn stop(self);
}

pub enum ActorAction {
    Continue,
    Stop,
}

pub struct ActorContext<T: Actor> {
    handle: ActorHandle<T>,
    /// A set of tasks spawned by the actor when processing messages.
    /// All these tasks will be aborted when the context is dropped.
    tasks: JoinSet<()>,
}

impl<T: Actor> ActorContext<T> {
    pub fn new(handle: &ActorHandle<T>) -> Self {
        Self {
            handle: handle.clone(),
            tasks: JoinSet::new(),
        }
    }

    pub fn handle(&self) -> &ActorHandle<T> {
        &self.handle
    }

    /// Send a message to the actor itself.
    /// The message is silently dropped if the actor has stopped.
    pub fn send(&mut self, message: T::Message) {
        let _ = self.handle.send(message);
    }

    /// Send a message to the actor itself after a delay.
    pub fn send_with_delay(&mut self, message: T::Message, delay: Duration) {
        let handle = self.handle.clone();
        self.tasks.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = handle.send(message);
        });
    }

    /// Spawn a task and save the handle in the context.
    pub fn spawn(
        &mut self,
        task: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> AbortHandle {
        self.tasks.spawn(task)
    }

    /// Join tasks that have completed and log errors.
    /// When the actor expects to handle task failures, it should add the
    /// logic inside the task (e.g. sending itself a message on error).
    pub fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    error!("failed to join task spawned by actor {}: {e}", T::name());
                }
            }
        }
    }
}

pub struct ActorHandle<T: Actor> {
    sender: mpsc::UnboundedSender<T::Message>,
}

impl<T: Actor> Clone for ActorHandle<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T: Actor> ActorHandle<T> {
    /// Create a handle along with the receiving end of its channel.
    /// This is used by [ActorSystem::spawn], and by embedders that drive
    /// message delivery themselves (e.g. deterministic test harnesses).
    /// The channel is unbounded so that completion callbacks can send
    /// messages without suspending.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<T::Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { sender: tx }, rx)
    }

    pub fn send(&self, message: T::Message) -> Result<(), mpsc::error::SendError<T::Message>> {
        self.sender.send(message)
    }
}

#[derive(Default)]
pub struct ActorSystem {
    tasks: JoinSet<()>,
}

impl ActorSystem {
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
        }
    }

    pub fn spawn<T: Actor>(&mut self, options: T::Options) -> ActorHandle<T> {
        let (handle, receiver) = ActorHandle::channel();
        let runner = ActorRunner {
            actor: T::new(options),
            ctx: ActorContext::new(&handle),
            receiver,
        };
        self.tasks.spawn(runner.run());
        handle
    }

    /// Wait for all actors in the system to stop.
    /// An actor stops when it returns [ActorAction::Stop] from its
    /// `receive` method and all its handles have been dropped or its
    /// channel has been closed.
    pub async fn join(&mut self) {
        while self.tasks.join_next().await.is_some() {}
    }
}

struct ActorRunner<T: Actor> {
    actor: T,
    ctx: ActorContext<T>,
    receiver: mpsc::UnboundedReceiver<T::Message>,
}

impl<T: Actor> ActorRunner<T> {
    async fn run(mut self) {
        self.actor.start(&mut self.ctx);
        while let Some(message) = self.receiver.recv().await {
            match self.actor.receive(&mut self.ctx, message) {
                ActorAction::Continue => {}
                ActorAction::Stop => break,
            }
            self.ctx.reap();
        }
        self.actor.stop();
        info!("actor {} has stopped", T::name());
    }
}
