//! Single-owner navigation queue.
//!
//! [`BeltRuntime`] moves a [`ConveyorBeltManager`] into one tokio task and
//! hands out cloneable [`BeltHandle`]s. Every mutation travels through a
//! bounded `mpsc` queue and is applied in arrival order, so navigation from
//! several sources (scroll callbacks, keyboard, speech playback) never
//! interleaves. After each processed command the task publishes the current
//! [`BeltSnapshot`] on a `watch` channel; load completions refresh it too.
//!
//! ```ignore
//! let (belt, task) = BeltRuntime::builder(provider)
//!     .config(BeltConfig::default())
//!     .event_handler(LoggingHandler)
//!     .spawn()?;
//!
//! belt.initialize(0, 100).await?.wait_all().await?;
//! let mut updates = belt.subscribe();
//! belt.enqueue(1).await?;
//! updates.changed().await.ok();
//!
//! drop(belt);
//! let manager = task.await?; // the task ends once every handle is gone
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::config::BeltConfig;
use crate::content::{BatchLoad, ContentBlob, ContentProvider, WindowContentCache};
use crate::events::{BeltEvent, CompositeEventHandler, EventHandler};
use crate::manager::{ConveyorBeltManager, NavigationOutcome};
use crate::offset::{CharacterOffset, LayoutEngine, ViewportAnchor};
use crate::snapshot::BeltSnapshot;
use crate::window::Shift;
use crate::{BeltError, Result, WindowIndex};

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Initialize {
        start: WindowIndex,
        total: usize,
        reply: Reply<BatchLoad>,
    },
    Enter {
        window: WindowIndex,
        reply: Option<Reply<NavigationOutcome>>,
    },
    ShiftForward {
        reply: Reply<Shift>,
    },
    ShiftBackward {
        reply: Reply<Shift>,
    },
    CapturePosition {
        anchor: ViewportAnchor,
        reply: Reply<CharacterOffset>,
    },
    CaptureOffset {
        window: WindowIndex,
        anchor: ViewportAnchor,
        reply: Reply<CharacterOffset>,
    },
    RecordPosition {
        window: WindowIndex,
        offset: CharacterOffset,
        reply: Reply<()>,
    },
    BeginRelayout {
        anchor: ViewportAnchor,
        reply: Reply<CharacterOffset>,
    },
    FinishRelayout {
        reply: Reply<Vec<(WindowIndex, ViewportAnchor)>>,
    },
    Refresh {
        reply: Reply<BeltSnapshot>,
    },
}

/// Entry point for spawning a belt task.
pub struct BeltRuntime;

impl BeltRuntime {
    /// Start configuring a belt backed by `provider`.
    pub fn builder(provider: Arc<dyn ContentProvider>) -> BeltRuntimeBuilder {
        BeltRuntimeBuilder {
            provider,
            config: BeltConfig::default(),
            handlers: CompositeEventHandler::new(),
            layout: None,
        }
    }
}

/// Builder for a belt task. See [`BeltRuntime::builder`].
pub struct BeltRuntimeBuilder {
    provider: Arc<dyn ContentProvider>,
    config: BeltConfig,
    handlers: CompositeEventHandler,
    layout: Option<Arc<dyn LayoutEngine>>,
}

impl BeltRuntimeBuilder {
    pub fn config(mut self, config: BeltConfig) -> Self {
        self.config = config;
        self
    }

    /// Add an event handler. Handlers run on the belt task or on the worker
    /// task that finished a load.
    pub fn event_handler(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers = self.handlers.with(handler);
        self
    }

    pub fn layout_engine(mut self, engine: Arc<dyn LayoutEngine>) -> Self {
        self.layout = Some(engine);
        self
    }

    /// Spawn the belt task on the current tokio runtime.
    ///
    /// Returns a handle and the task's join handle, which yields the manager
    /// back once every handle has been dropped.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn(self) -> Result<(BeltHandle, JoinHandle<ConveyorBeltManager>)> {
        let (settled_tx, settled_rx) = mpsc::unbounded_channel();
        let handlers = self.handlers.with(LoadSettledForwarder { tx: settled_tx });

        let mut manager =
            ConveyorBeltManager::new(self.provider, self.config.clone())?.with_event_handler(handlers);
        if let Some(layout) = self.layout {
            manager = manager.with_layout_engine(layout);
        }

        let (commands_tx, commands_rx) = mpsc::channel(self.config.queue_capacity);
        let (snapshots_tx, snapshots_rx) = watch::channel(manager.snapshot());
        let cache = manager.cache().clone();
        let task = tokio::spawn(run(manager, commands_rx, settled_rx, snapshots_tx));

        let handle = BeltHandle {
            commands: commands_tx,
            snapshots: snapshots_rx,
            cache,
        };
        Ok((handle, task))
    }
}

/// Reports load completions to the belt task so it can refresh the
/// published readiness.
struct LoadSettledForwarder {
    tx: mpsc::UnboundedSender<WindowIndex>,
}

impl EventHandler for LoadSettledForwarder {
    fn on_event(&self, event: &BeltEvent<'_>) {
        if let BeltEvent::WindowLoaded { window } | BeltEvent::LoadFailed { window, .. } = event {
            // The task is gone when this fails; nothing left to refresh.
            let _ = self.tx.send(*window);
        }
    }
}

async fn run(
    mut manager: ConveyorBeltManager,
    mut commands: mpsc::Receiver<Command>,
    mut settled: mpsc::UnboundedReceiver<WindowIndex>,
    snapshots: watch::Sender<BeltSnapshot>,
) -> ConveyorBeltManager {
    debug!("belt task started");
    loop {
        let reply = tokio::select! {
            biased;
            command = commands.recv() => {
                let Some(command) = command else { break };
                Some(dispatch(&mut manager, command))
            }
            Some(window) = settled.recv() => {
                trace!("refreshing snapshot after window {window} settled");
                while settled.try_recv().is_ok() {}
                None
            }
        };
        // Publish before replying so a caller that saw its reply also sees
        // the state it produced.
        snapshots.send_replace(manager.snapshot());
        if let Some(reply) = reply {
            reply();
        }
    }
    debug!("belt task stopped: all handles dropped");
    manager
}

/// A reply to deliver once the resulting snapshot is published.
type DeferredReply = Box<dyn FnOnce() + Send>;

fn answer<T: Send + 'static>(reply: Reply<T>, result: Result<T>) -> DeferredReply {
    Box::new(move || {
        // A dropped receiver only means the caller stopped waiting.
        let _ = reply.send(result);
    })
}

fn dispatch(manager: &mut ConveyorBeltManager, command: Command) -> DeferredReply {
    match command {
        Command::Initialize {
            start,
            total,
            reply,
        } => answer(reply, manager.initialize(start, total)),
        Command::Enter { window, reply } => {
            let outcome = manager.on_window_entered(window);
            match reply {
                Some(reply) => answer(reply, outcome),
                None => {
                    if let Err(e) = outcome {
                        debug!("queued entry into window {window} failed: {e}");
                    }
                    Box::new(|| {})
                }
            }
        }
        Command::ShiftForward { reply } => answer(reply, manager.shift_forward()),
        Command::ShiftBackward { reply } => answer(reply, manager.shift_backward()),
        Command::CapturePosition { anchor, reply } => {
            answer(reply, manager.capture_position(anchor))
        }
        Command::CaptureOffset {
            window,
            anchor,
            reply,
        } => answer(reply, manager.capture_offset(window, anchor)),
        Command::RecordPosition {
            window,
            offset,
            reply,
        } => answer(reply, manager.record_position(window, offset)),
        Command::BeginRelayout { anchor, reply } => answer(reply, manager.begin_relayout(anchor)),
        Command::FinishRelayout { reply } => answer(reply, manager.finish_relayout()),
        Command::Refresh { reply } => answer(reply, Ok(manager.snapshot())),
    }
}

/// Cloneable handle to a running belt.
///
/// Commands sent through one handle are applied in the order they were
/// sent. Queries read the latest published snapshot and never wait for the
/// queue.
#[derive(Clone)]
pub struct BeltHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<BeltSnapshot>,
    cache: WindowContentCache,
}

impl BeltHandle {
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| BeltError::QueueClosed)?;
        response.await.map_err(|_| BeltError::QueueClosed)?
    }

    /// Start a session. See [`ConveyorBeltManager::initialize`].
    pub async fn initialize(&self, start: WindowIndex, total: usize) -> Result<BatchLoad> {
        self.request(|reply| Command::Initialize {
            start,
            total,
            reply,
        })
        .await
    }

    /// Enter `window` and wait for the outcome.
    pub async fn enter(&self, window: WindowIndex) -> Result<NavigationOutcome> {
        self.request(|reply| Command::Enter {
            window,
            reply: Some(reply),
        })
        .await
    }

    /// Queue an entry into `window` without waiting for it to be applied.
    ///
    /// Waits only for queue capacity.
    pub async fn enqueue(&self, window: WindowIndex) -> Result<()> {
        self.commands
            .send(Command::Enter {
                window,
                reply: None,
            })
            .await
            .map_err(|_| BeltError::QueueClosed)
    }

    pub async fn shift_forward(&self) -> Result<Shift> {
        self.request(|reply| Command::ShiftForward { reply }).await
    }

    pub async fn shift_backward(&self) -> Result<Shift> {
        self.request(|reply| Command::ShiftBackward { reply }).await
    }

    pub async fn capture_position(&self, anchor: ViewportAnchor) -> Result<CharacterOffset> {
        self.request(|reply| Command::CapturePosition { anchor, reply })
            .await
    }

    /// Capture the position at `anchor` in a resident, possibly inactive,
    /// window.
    pub async fn capture_offset(
        &self,
        window: WindowIndex,
        anchor: ViewportAnchor,
    ) -> Result<CharacterOffset> {
        self.request(|reply| Command::CaptureOffset {
            window,
            anchor,
            reply,
        })
        .await
    }

    pub async fn record_position(&self, window: WindowIndex, offset: CharacterOffset) -> Result<()> {
        self.request(|reply| Command::RecordPosition {
            window,
            offset,
            reply,
        })
        .await
    }

    pub async fn begin_relayout(&self, anchor: ViewportAnchor) -> Result<CharacterOffset> {
        self.request(|reply| Command::BeginRelayout { anchor, reply })
            .await
    }

    pub async fn finish_relayout(&self) -> Result<Vec<(WindowIndex, ViewportAnchor)>> {
        self.request(|reply| Command::FinishRelayout { reply }).await
    }

    /// A snapshot taken after every command queued before this call.
    ///
    /// Load readiness is read live from the cache, so loads that finished
    /// before the call are reported as ready.
    pub async fn refresh(&self) -> Result<BeltSnapshot> {
        self.request(|reply| Command::Refresh { reply }).await
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> BeltSnapshot {
        self.snapshots.borrow().clone()
    }

    /// A receiver notified whenever a new snapshot is published.
    pub fn subscribe(&self) -> watch::Receiver<BeltSnapshot> {
        self.snapshots.clone()
    }

    /// Window displayed at `slot` in the latest snapshot.
    pub fn window_at_slot(&self, slot: usize) -> Option<WindowIndex> {
        self.snapshots.borrow().window_at_slot(slot)
    }

    /// Content for `slot`, loading it on demand when it is not ready yet.
    ///
    /// Returns `None` for an empty slot.
    pub async fn content_at_slot(&self, slot: usize) -> Result<Option<ContentBlob>> {
        let Some(window) = self.window_at_slot(slot) else {
            return Ok(None);
        };
        self.cache.ensure_loaded(window).await.map(Some)
    }

    /// The belt's content cache, for direct lookups.
    pub fn cache(&self) -> &WindowContentCache {
        &self.cache
    }

    /// Whether the belt task has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}
