//! bevy_llm_chat: a bevy chat page over a hosted llm completion endpoint.
//!
//! - one turn = one user input and its streamed response.
//! - every fragment is folded into the turn's `StreamAssembler`; the page
//!   receives the *whole* response so far and replaces its text with it.
//! - any upstream failure shows a single fixed message (`ERROR_MESSAGE`);
//!   nothing is retried.
//! - the completion client is injected through the `Clients` resource, so
//!   tests (or other backends) can swap it out.
//! - never blocks the main thread: on native we spawn onto a tiny tokio
//!   runtime; on wasm we use bevy's async pool.
//!
//! api docs for the underlying client types: https://docs.rs/llm

use bevy::prelude::*;
use bevy::tasks::AsyncComputeTaskPool;
use std::collections::HashMap;
use std::sync::Arc;
use flume::{Receiver, Sender, TryRecvError};

pub mod assembler;
pub mod client;
pub mod config;
pub mod error;
pub mod turn;

pub use assembler::StreamAssembler;
pub use client::{CompletionClient, FragmentStream, LlmClient};
pub use config::{ChatConfig, normalize_base_url};
pub use error::{ChatError, ERROR_MESSAGE};
pub use turn::{TurnOutcome, run_turn};

/// re-export the llm types so downstream code can use the same structs/enums.
pub use llm::{
    builder::{LLMBackend, LLMBuilder},
    chat::{ChatMessage, ChatProvider, ChatRole, StreamChoice, StreamDelta, StreamResponse},
    error::LLMError,
    LLMProvider,
};

/// ready-to-use completion clients.
///
/// - `default`: used when a `ChatSession` doesn't specify a `key`
/// - `per_key`: named clients if you want multiple endpoints/models
#[derive(Resource, Clone)]
pub struct Clients {
    pub default: Arc<dyn CompletionClient>,
    pub per_key: HashMap<String, Arc<dyn CompletionClient>>,
}

impl Clients {
    pub fn new(default: Arc<dyn CompletionClient>) -> Self {
        Self { default, per_key: HashMap::new() }
    }
    pub fn with(mut self, key: impl Into<String>, client: Arc<dyn CompletionClient>) -> Self {
        self.per_key.insert(key.into(), client);
        self
    }
    fn get(&self, key: Option<&String>) -> Arc<dyn CompletionClient> {
        if let Some(k) = key {
            self.per_key.get(k).cloned().unwrap_or_else(|| self.default.clone())
        } else {
            self.default.clone()
        }
    }
}

/// on native we keep a tiny tokio runtime to drive the http futures.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Resource, Clone)]
pub struct TokioRt(pub Arc<tokio::runtime::Runtime>);

#[cfg(not(target_arch = "wasm32"))]
impl Default for TokioRt {
    fn default() -> Self {
        info!(target: "bevy_llm_chat", "BevyLlmChat: initializing Tokio multi-thread runtime (native)");
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("tokio runtime");
        Self(Arc::new(rt))
    }
}

/// system ordering so uis can run after we emit events
#[derive(SystemSet, Debug, Hash, PartialEq, Eq, Clone)]
pub enum LlmSet {
    /// bevy_llm_chat emits Chat* events here (in `Update`)
    Drain,
}

/// attach this to an entity you want to chat with a client.
#[derive(Component, Clone, Debug, Default)]
pub struct ChatSession {
    /// optional key to pick a client from `Clients::per_key`.
    pub key: Option<String>,
    /// id of the latest turn started on this session. output from older
    /// turns still in flight is dropped.
    pub turn: u64,
}

/// insert this component to start a turn for the session entity.
/// only the new input is sent; there is no conversation history.
#[derive(Component, Clone, Debug)]
pub struct ChatRequest {
    pub input: String,
}

/// helper to enqueue a user turn on a session entity.
pub fn send_user_text(commands: &mut Commands, target: Entity, text: impl Into<String>) {
    let text = text.into();
    info!(target: "bevy_llm_chat", "send_user_text -> '{}' (len={})", text, text.len());
    commands.entity(target).insert(ChatRequest { input: text });
}

/// events emitted during/after a turn.
#[derive(Event, Debug)]
pub struct ChatStarted {
    pub entity: Entity,
    pub turn: u64,
}
/// full response so far; replaces whatever the ui showed before.
#[derive(Event, Debug)]
pub struct ChatResponseEvt {
    pub entity: Entity,
    pub text: String,
}
#[derive(Event, Debug)]
pub struct ChatCompletedEvt {
    pub entity: Entity,
    /// the final assembled text, `None` for an empty completion.
    pub final_text: Option<String>,
    pub fragments: usize,
}
/// diagnostic for a failed turn. the user-facing `ERROR_MESSAGE` has
/// already arrived as a `ChatResponseEvt`.
#[derive(Event, Debug)]
pub struct ChatErrorEvt {
    pub entity: Entity,
    pub error: String,
}

/// cross-thread inbox for streaming; producers send, main thread drains.
/// bounded to avoid unbounded growth when the frame stalls briefly.
#[derive(Resource, Clone)]
struct StreamInbox {
    tx: Sender<StreamMsg>,
    rx: Receiver<StreamMsg>,
}

impl Default for StreamInbox {
    fn default() -> Self {
        let (tx, rx) = flume::bounded(2048);
        Self { tx, rx }
    }
}


#[derive(Debug)]
enum StreamMsg {
    Snapshot { entity: Entity, turn: u64, text: String },
    Done     { entity: Entity, turn: u64, final_text: Option<String>, fragments: usize },
    Err      { entity: Entity, turn: u64, error: String },
}

impl StreamMsg {
    fn target(&self) -> (Entity, u64) {
        match self {
            StreamMsg::Snapshot { entity, turn, .. }
            | StreamMsg::Done { entity, turn, .. }
            | StreamMsg::Err { entity, turn, .. } => (*entity, *turn),
        }
    }
}

/// send to inbox (ignore disconnected)
fn push_inbox(tx: &Sender<StreamMsg>, msg: StreamMsg) {
    let _ = tx.send(msg);
}

/// bevy plugin: wires systems, events, resources.
/// requires you to insert a `Clients` resource before/after adding the plugin.
/// on native, also inserts a tiny tokio runtime resource by default.
pub struct BevyLlmChatPlugin;

impl Plugin for BevyLlmChatPlugin {
    fn build(&self, app: &mut App) {
        info!(target: "bevy_llm_chat", "BevyLlmChatPlugin: build()");

        #[cfg(target_arch = "wasm32")]
        console_error_panic_hook::set_once();

        app.init_resource::<StreamInbox>()
            .add_event::<ChatStarted>()
            .add_event::<ChatResponseEvt>()
            .add_event::<ChatCompletedEvt>()
            .add_event::<ChatErrorEvt>()
            // write + read events in the same schedule (Update)
            .configure_sets(Update, LlmSet::Drain)
            .add_systems(Update, drain_stream_inbox.in_set(LlmSet::Drain))
            // spawn turns in Update; work continues off-thread/tokio
            .add_systems(Update, spawn_chat_requests.before(LlmSet::Drain));

        #[cfg(not(target_arch = "wasm32"))]
        if app.world().get_resource::<TokioRt>().is_none() {
            app.insert_resource(TokioRt::default());
        }
    }
}

/// spawns one async task per pending request.
fn spawn_chat_requests(
    mut commands: Commands,
    clients: Res<Clients>,
    inbox: Res<StreamInbox>,
    mut q: Query<(Entity, &mut ChatSession, &ChatRequest)>,
    mut ev_start: EventWriter<ChatStarted>,

    // native-only: small runtime to drive network futures
    #[cfg(not(target_arch = "wasm32"))] rt: Res<TokioRt>,
) {
    for (e, mut session, req) in q.iter_mut() {
        let client = clients.get(session.key.as_ref());
        let inbox_tx = inbox.tx.clone();
        let input = req.input.clone();

        session.turn += 1;
        let turn = session.turn;
        info!(target: "bevy_llm_chat",
            "spawn_chat_requests: entity={:?} key={:?} turn={} input_len={}",
            e, session.key, turn, input.len()
        );

        // one-shot marker removal
        commands.entity(e).remove::<ChatRequest>();
        ev_start.write(ChatStarted { entity: e, turn });

        let pool = AsyncComputeTaskPool::get();
        #[cfg(not(target_arch = "wasm32"))]
        let rt = rt.0.clone();

        pool.spawn(async move {
            let run = async move {
                let outcome = run_turn(client.as_ref(), &input, |text| {
                    push_inbox(&inbox_tx, StreamMsg::Snapshot { entity: e, turn, text: text.to_string() });
                })
                .await;

                let msg = match outcome {
                    TurnOutcome::Completed { text: final_text, fragments } => {
                        info!(target: "bevy_llm_chat",
                            "turn completed: entity={:?} turn={} fragments={} final_len={}",
                            e, turn, fragments, final_text.as_deref().map_or(0, str::len)
                        );
                        StreamMsg::Done { entity: e, turn, final_text, fragments }
                    }
                    TurnOutcome::Failed { reason } => {
                        StreamMsg::Err { entity: e, turn, error: reason.to_string() }
                    }
                };
                push_inbox(&inbox_tx, msg);
            };

            #[cfg(target_arch = "wasm32")]
            {
                // wasm path: just await directly (no tokio).
                run.await;
            }
            #[cfg(not(target_arch = "wasm32"))]
            {
                // native: hand off to tokio so bevy pools stay free.
                let _ = rt.spawn(run).await;
            }
        })
        .detach();
    }
}

/// drains the inbox and emits user-facing events.
fn drain_stream_inbox(
    inbox: Res<StreamInbox>,
    sessions: Query<&ChatSession>,
    mut ev_response: EventWriter<ChatResponseEvt>,
    mut ev_done: EventWriter<ChatCompletedEvt>,
    mut ev_err: EventWriter<ChatErrorEvt>,
) {
    // drain up to a cap per frame to avoid long frames on bursty streams
    const MAX_PER_FRAME: usize = 512;
    let mut drained = Vec::with_capacity(64);
    for _ in 0..MAX_PER_FRAME {
        match inbox.rx.try_recv() {
            Ok(m) => drained.push(m),
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => break,
        }
    }
    if drained.is_empty() { return; }

    // later snapshots supersede earlier ones, so the ui gets one per entity per frame
    let mut latest: HashMap<Entity, String> = HashMap::new();
    let mut dones: Vec<(Entity, Option<String>, usize)> = Vec::new();
    let mut errs: Vec<(Entity, String)> = Vec::new();

    for msg in drained {
        let (entity, turn) = msg.target();
        if let Ok(session) = sessions.get(entity)
            && session.turn != turn {
                debug!(target: "bevy_llm_chat", "dropping stale output: entity={:?} turn={} current={}", entity, turn, session.turn);
                continue;
        }
        match msg {
            StreamMsg::Snapshot { entity, text, .. } => {
                latest.insert(entity, text);
            }
            StreamMsg::Done { entity, final_text, fragments, .. } => dones.push((entity, final_text, fragments)),
            StreamMsg::Err { entity, error, .. } => errs.push((entity, error)),
        }
    }

    for (entity, text) in latest {
        ev_response.write(ChatResponseEvt { entity, text });
    }
    // ensure snapshots land before "done" for the same frame
    for (entity, final_text, fragments) in dones {
        ev_done.write(ChatCompletedEvt { entity, final_text, fragments });
    }
    for (entity, error) in errs {
        ev_err.write(ChatErrorEvt { entity, error });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turn::tests::{ScriptedClient, Step};
    use bevy::app::AppExit;
    use pretty_assertions::assert_eq;
    use std::time::{Duration, Instant};

    fn drained<E: Event>(app: &mut App) -> Vec<E> {
        app.world_mut().resource_mut::<Events<E>>().drain().collect()
    }

    #[test]
    fn attach_request_via_send_user_text() {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins);
        app.add_event::<AppExit>();

        let e = app.world_mut().spawn(ChatSession::default()).id();

        {
            let mut commands = app.world_mut().commands();
            super::send_user_text(&mut commands, e, "hello world");
        }
        app.world_mut().flush();

        let req = app.world().entity(e).get::<ChatRequest>().expect("ChatRequest exists");
        assert_eq!(req.input, "hello world");
    }

    #[test]
    fn clients_fall_back_to_default() {
        let default: Arc<dyn CompletionClient> = Arc::new(ScriptedClient::default());
        let named: Arc<dyn CompletionClient> = Arc::new(ScriptedClient::default());
        let clients = Clients::new(default.clone()).with("alt", named.clone());

        assert!(Arc::ptr_eq(&clients.get(None), &default));
        assert!(Arc::ptr_eq(&clients.get(Some(&"alt".to_string())), &named));
        assert!(Arc::ptr_eq(&clients.get(Some(&"missing".to_string())), &default));
    }

    fn drain_app() -> App {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins);
        app.add_event::<ChatResponseEvt>();
        app.add_event::<ChatCompletedEvt>();
        app.add_event::<ChatErrorEvt>();
        app.insert_resource(StreamInbox::default());
        app.add_systems(Update, super::drain_stream_inbox);
        app
    }

    #[test]
    fn drain_keeps_latest_snapshot_per_entity() {
        let mut app = drain_app();
        let e = app.world_mut().spawn_empty().id();

        {
            let tx = app.world().resource::<StreamInbox>().tx.clone();
            for text in ["Hel", "Hello", "Hello world"] {
                tx.send(StreamMsg::Snapshot { entity: e, turn: 1, text: text.into() }).unwrap();
            }
            tx.send(StreamMsg::Done {
                entity: e,
                turn: 1,
                final_text: Some("Hello world".into()),
                fragments: 3,
            })
            .unwrap();
        }

        app.update();

        let responses = drained::<ChatResponseEvt>(&mut app);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].text, "Hello world");

        let done = drained::<ChatCompletedEvt>(&mut app);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].final_text.as_deref(), Some("Hello world"));
        assert_eq!(done[0].fragments, 3);

        assert!(drained::<ChatErrorEvt>(&mut app).is_empty(), "no errors expected");
    }

    #[test]
    fn drain_drops_output_of_superseded_turns() {
        let mut app = drain_app();
        let e = app.world_mut().spawn(ChatSession { key: None, turn: 2 }).id();

        {
            let tx = app.world().resource::<StreamInbox>().tx.clone();
            tx.send(StreamMsg::Snapshot { entity: e, turn: 1, text: "old".into() }).unwrap();
            tx.send(StreamMsg::Err { entity: e, turn: 1, error: "old failure".into() }).unwrap();
            tx.send(StreamMsg::Snapshot { entity: e, turn: 2, text: "new".into() }).unwrap();
        }

        app.update();

        let responses = drained::<ChatResponseEvt>(&mut app);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].text, "new");
        assert!(drained::<ChatErrorEvt>(&mut app).is_empty());
    }

    /// runs frames until `done` says so (tasks finish on other threads).
    fn update_until(app: &mut App, mut done: impl FnMut(&mut App) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            app.update();
            if done(app) {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("timed out waiting for chat events");
    }

    fn plugin_app(client: ScriptedClient) -> App {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins);
        app.insert_resource(Clients::new(Arc::new(client)));
        app.add_plugins(BevyLlmChatPlugin);
        app
    }

    #[test]
    fn plugin_streams_a_turn_end_to_end() {
        let mut app = plugin_app(ScriptedClient::new(vec![
            Step::Text("Hello"),
            Step::Text("Hello"),
            Step::Text(" world"),
        ]));
        let e = app.world_mut().spawn(ChatSession::default()).id();
        {
            let mut commands = app.world_mut().commands();
            send_user_text(&mut commands, e, "hi");
        }
        app.world_mut().flush();

        let mut last_response = None;
        let mut completed = Vec::new();
        update_until(&mut app, |app| {
            if let Some(r) = drained::<ChatResponseEvt>(app).pop() {
                last_response = Some(r.text);
            }
            completed.extend(drained::<ChatCompletedEvt>(app));
            !completed.is_empty()
        });

        assert_eq!(last_response.as_deref(), Some("Hello world"));
        assert_eq!(completed[0].entity, e);
        assert_eq!(completed[0].final_text.as_deref(), Some("Hello world"));
        assert_eq!(app.world().entity(e).get::<ChatSession>().unwrap().turn, 1);
        assert!(app.world().entity(e).get::<ChatRequest>().is_none());
    }

    #[test]
    fn plugin_reports_failure_with_fixed_message() {
        let mut app = plugin_app(ScriptedClient::new(vec![
            Step::Text("Par"),
            Step::Fail("transport closed"),
            Step::Text("tial"),
        ]));
        let e = app.world_mut().spawn(ChatSession::default()).id();
        {
            let mut commands = app.world_mut().commands();
            send_user_text(&mut commands, e, "hi");
        }
        app.world_mut().flush();

        let mut last_response = None;
        let mut errors = Vec::new();
        update_until(&mut app, |app| {
            if let Some(r) = drained::<ChatResponseEvt>(app).pop() {
                last_response = Some(r.text);
            }
            errors.extend(drained::<ChatErrorEvt>(app));
            !errors.is_empty()
        });

        assert_eq!(last_response.as_deref(), Some(ERROR_MESSAGE));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].error.contains("transport closed"));
        assert!(drained::<ChatCompletedEvt>(&mut app).is_empty());
    }
}
