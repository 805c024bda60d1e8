//! bevy_askbot: a bevy chat client for a single question-answering endpoint.
//!
//! - `ChatSession` (a component) owns the transcript, the input buffer and
//!   the busy gate. call `submit` on it, or send a `SubmitText` event.
//! - each accepted submission produces exactly one outbound call; the reply
//!   (or a fixed failure line) lands back in the transcript.
//! - never blocks the main thread: on native the call runs on a tiny tokio
//!   runtime; on wasm it runs on bevy's async pool, which yields to the
//!   browser event loop.
//! - uis read the transcript and listen for `MessageAppended` after
//!   `AskSet::Drain`.

use bevy::prelude::*;
use bevy::tasks::AsyncComputeTaskPool;
use flume::{Receiver, Sender, TryRecvError};
use std::sync::Arc;

mod backend;
mod config;
mod session;
mod transcript;

pub use backend::{AnswerBackend, AskRequest, AskResponse, BackendError, HttpBackend};
pub use config::{API_URL_ENV, ClientConfig, DEFAULT_API_URL};
pub use session::{CONNECTION_ERROR_TEXT, ChatSession, Outbound, Reply, TurnId};
pub use transcript::{Message, Role, Transcript};

/// the backend every session dispatches to.
#[derive(Resource, Clone)]
pub struct Backend(pub Arc<dyn AnswerBackend>);

impl Backend {
    pub fn new(backend: impl AnswerBackend + 'static) -> Self {
        Self(Arc::new(backend))
    }
}

/// on native we keep a tiny tokio runtime to drive outbound calls.
/// we spawn onto this rt from compute tasks so neither the main thread
/// nor bevy's compute pools block.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Resource, Clone)]
pub struct TokioRt(pub Arc<tokio::runtime::Runtime>);

#[cfg(not(target_arch = "wasm32"))]
impl Default for TokioRt {
    fn default() -> Self {
        info!(target: "bevy_askbot", "AskbotPlugin: initializing Tokio multi-thread runtime (native)");
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("tokio runtime");
        Self(Arc::new(rt))
    }
}

/// system ordering so uis can run after we apply settlements
#[derive(SystemSet, Debug, Hash, PartialEq, Eq, Clone)]
pub enum AskSet {
    /// submissions are dispatched and settlements applied here (in `Update`)
    Drain,
}

/// submit `text` on the session entity, same rules as `ChatSession::submit`.
#[derive(Event, Debug, Clone)]
pub struct SubmitText {
    pub entity: Entity,
    pub text: String,
}

/// helper to submit text on a session entity from anywhere with `Commands`.
pub fn submit_text(commands: &mut Commands, target: Entity, text: impl Into<String>) {
    commands.send_event(SubmitText { entity: target, text: text.into() });
}

/// an outbound call left for this session.
#[derive(Event, Debug)]
pub struct ChatStarted {
    pub entity: Entity,
    pub turn: TurnId,
}

/// a turn finished; `answered` is false when the failure line was appended.
#[derive(Event, Debug)]
pub struct ChatSettled {
    pub entity: Entity,
    pub turn: TurnId,
    pub answered: bool,
}

/// a message was appended at `index` of the session's transcript.
#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageAppended {
    pub entity: Entity,
    pub index: usize,
    pub role: Role,
}

#[derive(Debug)]
struct Settled {
    entity: Entity,
    turn: TurnId,
    reply: Reply,
}

const INBOX_CAPACITY: usize = 256;

/// cross-thread inbox for settlements; tasks send, main thread drains.
#[derive(Resource, Clone)]
struct SettleInbox {
    tx: Sender<Settled>,
    rx: Receiver<Settled>,
}

impl Default for SettleInbox {
    fn default() -> Self {
        let (tx, rx) = flume::bounded(INBOX_CAPACITY);
        Self { tx, rx }
    }
}

/// bevy plugin: wires systems, events, resources.
///
/// uses an existing `Backend` / `ClientConfig` resource if present, otherwise
/// reads the config from the environment and installs an `HttpBackend`.
/// on native, also inserts a tiny tokio runtime resource by default.
pub struct AskbotPlugin;

impl Plugin for AskbotPlugin {
    fn build(&self, app: &mut App) {
        info!(target: "bevy_askbot", "AskbotPlugin: build()");
        if app.world().get_resource::<ClientConfig>().is_none() {
            app.insert_resource(ClientConfig::from_env());
        }
        if app.world().get_resource::<Backend>().is_none() {
            let backend = HttpBackend::from_config(app.world().resource::<ClientConfig>());
            info!(target: "bevy_askbot", "AskbotPlugin: using http backend at {}", backend.url());
            app.insert_resource(Backend::new(backend));
        }

        app.init_resource::<SettleInbox>()
            .add_event::<SubmitText>()
            .add_event::<ChatStarted>()
            .add_event::<ChatSettled>()
            .add_event::<MessageAppended>()
            .configure_sets(Update, AskSet::Drain)
            .add_systems(
                Update,
                (apply_submit_events, dispatch_outbound, drain_settled, announce_appends)
                    .chain()
                    .in_set(AskSet::Drain),
            );

        #[cfg(not(target_arch = "wasm32"))]
        if app.world().get_resource::<TokioRt>().is_none() {
            app.insert_resource(TokioRt::default());
        }
    }
}

fn apply_submit_events(mut ev: EventReader<SubmitText>, mut q: Query<&mut ChatSession>) {
    for SubmitText { entity, text } in ev.read() {
        match q.get_mut(*entity) {
            Ok(mut session) => session.submit(text.clone()),
            Err(_) => warn!(target: "bevy_askbot", "SubmitText for {:?}: no ChatSession", entity),
        }
    }
}

/// spawns one async task per queued outbound call (compute-tasks-first).
fn dispatch_outbound(
    backend: Res<Backend>,
    inbox: Res<SettleInbox>,
    mut q: Query<(Entity, &mut ChatSession), Changed<ChatSession>>,
    mut ev_start: EventWriter<ChatStarted>,

    // native-only: small runtime to drive network futures
    #[cfg(not(target_arch = "wasm32"))] rt: Res<TokioRt>,
) {
    for (entity, mut session) in q.iter_mut() {
        // check through a shared borrow so idle sessions don't get flagged as changed
        if !session.has_outbound() {
            continue;
        }
        let Some(Outbound { turn, query }) = session.take_outbound() else {
            continue;
        };

        info!(target: "bevy_askbot", "dispatch: entity={:?} {:?} query_len={}", entity, turn, query.len());
        ev_start.write(ChatStarted { entity, turn });

        let backend = backend.0.clone();
        let tx = inbox.tx.clone();
        let pool = AsyncComputeTaskPool::get();
        #[cfg(not(target_arch = "wasm32"))]
        let rt = rt.0.clone();

        pool.spawn(async move {
            let run = async move {
                match backend.ask(&query).await {
                    Ok(answer) => {
                        info!(target: "bevy_askbot", "{:?} answered: len={}", turn, answer.len());
                        Reply::Answer(answer)
                    }
                    Err(err) => {
                        warn!(target: "bevy_askbot", "{:?} failed: {}", turn, err);
                        Reply::Failure
                    }
                }
            };

            #[cfg(target_arch = "wasm32")]
            let reply = run.await;
            #[cfg(not(target_arch = "wasm32"))]
            let reply = match rt.spawn(run).await {
                Ok(reply) => reply,
                Err(err) => {
                    error!(target: "bevy_askbot", "{:?} worker died: {}", turn, err);
                    Reply::Failure
                }
            };

            // report on every exit path; the session stays busy until this lands
            if tx.send_async(Settled { entity, turn, reply }).await.is_err() {
                debug!(target: "bevy_askbot", "{:?} settled after inbox closed", turn);
            }
        })
        .detach();
    }
}

/// drains the inbox and applies settlements to their sessions.
fn drain_settled(
    inbox: Res<SettleInbox>,
    mut q: Query<&mut ChatSession>,
    mut ev_settled: EventWriter<ChatSettled>,
) {
    // drain up to a cap per frame to avoid long frames
    const MAX_PER_FRAME: usize = 64;
    for _ in 0..MAX_PER_FRAME {
        let Settled { entity, turn, reply } = match inbox.rx.try_recv() {
            Ok(s) => s,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        };
        let Ok(mut session) = q.get_mut(entity) else {
            debug!(target: "bevy_askbot", "{:?} settled for abandoned session {:?}", turn, entity);
            continue;
        };
        let answered = reply.is_answer();
        if session.settle(turn, reply) {
            ev_settled.write(ChatSettled { entity, turn, answered });
        }
    }
}

/// emits one `MessageAppended` per new transcript entry, in order.
fn announce_appends(
    mut q: Query<(Entity, &mut ChatSession), Changed<ChatSession>>,
    mut ev: EventWriter<MessageAppended>,
) {
    for (entity, mut session) in q.iter_mut() {
        // bookkeeping only; must not re-trigger change detection
        let session = session.bypass_change_detection();
        for index in session.take_unannounced() {
            let role = session.transcript().snapshot()[index].role();
            ev.write(MessageAppended { entity, index, role });
        }
    }
}
