use crate::config::ServerConfig;
use crate::coordinator::{Coordinator, CoordinatorDeps};
use crate::events::EventBus;
use crate::handlers;
use crate::history::HistoryStore;
use crate::matchmaking::Matchmaker;
use crate::metrics::MetricsCollector;
use crate::middleware::with_request_logging;
use crate::session::Identity;
use crate::settings::{SettingsError, SettingsStore};
use gambit_ai::Strategies;
use gambit_engine::chess::ChessRules;
use gambit_engine::rps::RpsRules;
use gambit_engine::ttt::TttRules;
use std::convert::Infallible;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use warp::filters::BoxedFilter;
use warp::reply::{Reply, Response};
use warp::Filter;

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Coordinator and matchmaking queue of one game kind.
pub struct GameService<R: Strategies> {
    coordinator: Coordinator<R>,
    matchmaker: Arc<Matchmaker<R>>,
}

impl<R: Strategies> GameService<R> {
    fn new(rules: R, deps: CoordinatorDeps) -> Self {
        let coordinator = Coordinator::new(rules, deps);
        let matchmaker = Arc::new(Matchmaker::new(coordinator.clone()));
        Self {
            coordinator,
            matchmaker,
        }
    }

    pub fn coordinator(&self) -> &Coordinator<R> {
        &self.coordinator
    }

    pub fn matchmaker(&self) -> Arc<Matchmaker<R>> {
        Arc::clone(&self.matchmaker)
    }
}

impl<R: Strategies> Clone for GameService<R> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            matchmaker: Arc::clone(&self.matchmaker),
        }
    }
}

impl<R: Strategies> fmt::Debug for GameService<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameService")
            .field("kind", &self.coordinator.kind())
            .field("sessions", &self.coordinator.registry().len())
            .field("queued", &self.matchmaker.queue_len())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AppContext {
    config: ServerConfig,
    history: Arc<HistoryStore>,
    settings: Arc<SettingsStore>,
    metrics: MetricsCollector,
    chess: GameService<ChessRules>,
    rps: GameService<RpsRules>,
    ttt: GameService<TttRules>,
}

impl AppContext {
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let settings = SettingsStore::with_settings(config.settings.clone())?;
        Ok(Self::with_settings_store(config, Arc::new(settings)))
    }

    pub fn with_settings_store(config: ServerConfig, settings: Arc<SettingsStore>) -> Self {
        let shared = CoordinatorDeps {
            bus: EventBus::new(),
            history: Arc::new(HistoryStore::new()),
            settings,
            metrics: MetricsCollector::new(),
            seed: config.seed,
        };
        // Codes are only unique within one kind, so each kind gets its own rooms.
        let deps = || CoordinatorDeps {
            bus: EventBus::new(),
            ..shared.clone()
        };

        Self {
            chess: GameService::new(ChessRules, deps()),
            rps: GameService::new(RpsRules, deps()),
            ttt: GameService::new(TttRules, deps()),
            history: Arc::clone(&shared.history),
            settings: Arc::clone(&shared.settings),
            metrics: shared.metrics.clone(),
            config,
        }
    }

    pub fn new_for_tests() -> Self {
        Self::with_settings_store(ServerConfig::for_tests(), Arc::new(SettingsStore::new()))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Room subscribers across every game kind.
    pub fn subscriber_count(&self) -> usize {
        self.chess.coordinator.bus().subscriber_count()
            + self.rps.coordinator.bus().subscriber_count()
            + self.ttt.coordinator.bus().subscriber_count()
    }

    pub fn history(&self) -> Arc<HistoryStore> {
        Arc::clone(&self.history)
    }

    pub fn settings(&self) -> Arc<SettingsStore> {
        Arc::clone(&self.settings)
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn chess(&self) -> &GameService<ChessRules> {
        &self.chess
    }

    pub fn rps(&self) -> &GameService<RpsRules> {
        &self.rps
    }

    pub fn ttt(&self) -> &GameService<TttRules> {
        &self.ttt
    }

    /// Tear down every session idle longer than `session_timeout_minutes`.
    pub fn sweep_expired(&self) -> usize {
        let minutes = match self.settings.get() {
            Ok(settings) => settings.session_timeout_minutes,
            Err(err) => {
                tracing::error!(error = %err, "sweeper could not read settings");
                return 0;
            }
        };
        let idle = Duration::from_secs(minutes.saturating_mul(60));
        let removed = self.chess.coordinator.sweep_expired(idle)
            + self.rps.coordinator.sweep_expired(idle)
            + self.ttt.coordinator.sweep_expired(idle);
        if removed > 0 {
            tracing::info!(removed, idle_minutes = minutes, "expired sessions swept");
        }
        self.chess.matchmaker.prune_pending();
        self.rps.matchmaker.prune_pending();
        self.ttt.matchmaker.prune_pending();
        removed
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot resolve listen address `{0}`")]
    Unresolvable(String),
    #[error("cannot listen on {addr}: {reason}")]
    Listen { addr: SocketAddr, reason: String },
    #[error("server task ended abnormally: {0}")]
    Task(String),
    #[error("invalid initial settings: {0}")]
    Settings(#[from] SettingsError),
}

#[derive(Debug, Clone)]
pub struct WebServer {
    context: AppContext,
}

impl WebServer {
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let context = AppContext::new(config)?;
        Ok(Self { context })
    }

    pub fn from_context(context: AppContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &AppContext {
        &self.context
    }

    /// Bind, spawn the accept loop and the expiry sweeper, and hand back
    /// a handle that stops both.
    pub async fn start(self) -> Result<ServerHandle, ServerError> {
        let context = self.context;
        let requested = Self::bind_addr(context.config())?;

        let (stop, stopped) = oneshot::channel::<()>();
        let (addr, serving) = warp::serve(Self::routes(&context))
            .try_bind_with_graceful_shutdown(requested, async move {
                stopped.await.ok();
            })
            .map_err(|err| ServerError::Listen {
                addr: requested,
                reason: err.to_string(),
            })?;
        tracing::info!(address = %addr, "lobby server listening");

        let server = tokio::spawn(serving);
        let sweeper = Self::spawn_sweeper(context.clone());
        Ok(ServerHandle {
            addr,
            stop: Some(stop),
            server: Some(server),
            sweeper: Some(sweeper),
            context,
        })
    }

    fn spawn_sweeper(context: AppContext) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                context.sweep_expired();
                context.metrics().log_metrics();
            }
        })
    }

    /// `host` may carry its own port (`0.0.0.0:9000`); otherwise `port` applies.
    fn bind_addr(config: &ServerConfig) -> Result<SocketAddr, ServerError> {
        if let Ok(addr) = config.host.parse::<SocketAddr>() {
            return Ok(addr);
        }
        (config.host.as_str(), config.port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut candidates| candidates.next())
            .ok_or_else(|| ServerError::Unresolvable(format!("{}:{}", config.host, config.port)))
    }

    /// The full HTTP surface: every route is logged and counted, and
    /// anything unmatched becomes a JSON error.
    pub fn routes(
        context: &AppContext,
    ) -> impl Filter<Extract = (Response,), Error = Infallible> + Clone + Send + Sync + 'static {
        let api = Self::health_route()
            .or(Self::metrics_route(context))
            .unify()
            .or(Self::game_routes(context.chess()))
            .unify()
            .or(Self::game_routes(context.rps()))
            .unify()
            .or(Self::game_routes(context.ttt()))
            .unify()
            .or(handlers::history::routes(context.history()))
            .unify()
            .or(Self::settings_routes(context))
            .unify()
            .boxed();

        with_request_logging(api, context.metrics().clone())
            .recover(handlers::handle_rejection)
            .unify()
    }

    fn health_route() -> BoxedFilter<(Response,)> {
        warp::path("health")
            .and(warp::get())
            .and(warp::path::end())
            .map(|| handlers::health().into_response())
            .boxed()
    }

    fn metrics_route(context: &AppContext) -> BoxedFilter<(Response,)> {
        let metrics = context.metrics().clone();
        warp::path!("api" / "metrics")
            .and(warp::get())
            .map(move || handlers::metrics(metrics.clone()).into_response())
            .boxed()
    }

    fn game_routes<R: Strategies>(service: &GameService<R>) -> BoxedFilter<(Response,)> {
        let slug = service.coordinator.kind().slug();
        let coordinator = service.coordinator.clone();
        let sessions = warp::path("api")
            .and(warp::path(slug))
            .and(warp::path("sessions"));
        let session = sessions.clone().and(warp::path::param::<String>());

        let list = sessions
            .clone()
            .and(warp::path::end())
            .and(warp::get())
            .and(Self::with_coordinator(coordinator.clone()))
            .and_then(|coordinator: Coordinator<R>| async move {
                Ok::<_, Infallible>(handlers::game::list_sessions(coordinator).await)
            });

        let create = sessions
            .clone()
            .and(warp::path::end())
            .and(warp::post())
            .and(Self::with_coordinator(coordinator.clone()))
            .and(handlers::identity())
            .and(handlers::optional_json())
            .and_then(
                |coordinator: Coordinator<R>,
                 identity: Option<Identity>,
                 options: crate::coordinator::CreateOptions| async move {
                    let response =
                        handlers::game::create_session(coordinator, identity, options).await;
                    Ok::<_, Infallible>(response)
                },
            );

        let info = session
            .clone()
            .and(warp::path::end())
            .and(warp::get())
            .and(Self::with_coordinator(coordinator.clone()))
            .and(handlers::identity())
            .and_then(
                |code: String, coordinator: Coordinator<R>, identity: Option<Identity>| async move {
                    let response = handlers::game::get_session(coordinator, code, identity).await;
                    Ok::<_, Infallible>(response)
                },
            );

        let end = session
            .clone()
            .and(warp::path::end())
            .and(warp::delete())
            .and(Self::with_coordinator(coordinator.clone()))
            .and(handlers::identity())
            .and_then(
                |code: String, coordinator: Coordinator<R>, identity: Option<Identity>| async move {
                    let response = handlers::game::end_session(coordinator, code, identity).await;
                    Ok::<_, Infallible>(response)
                },
            );

        let join = session
            .clone()
            .and(warp::path("join"))
            .and(warp::path::end())
            .and(warp::post())
            .and(Self::with_coordinator(coordinator.clone()))
            .and(handlers::identity())
            .and(handlers::optional_json())
            .and_then(
                |code: String,
                 coordinator: Coordinator<R>,
                 identity: Option<Identity>,
                 request: handlers::JoinRequest| async move {
                    let response =
                        handlers::game::join_session(coordinator, code, identity, request).await;
                    Ok::<_, Infallible>(response)
                },
            );

        let actions = session
            .clone()
            .and(warp::path("actions"))
            .and(warp::path::end())
            .and(warp::post())
            .and(Self::with_coordinator(coordinator.clone()))
            .and(handlers::identity())
            .and(warp::body::json())
            .and_then(
                |code: String,
                 coordinator: Coordinator<R>,
                 identity: Option<Identity>,
                 request: handlers::ActionRequest| async move {
                    let response =
                        handlers::game::submit_action(coordinator, code, identity, request).await;
                    Ok::<_, Infallible>(response)
                },
            );

        let resign = session
            .clone()
            .and(warp::path("resign"))
            .and(warp::path::end())
            .and(warp::post())
            .and(Self::with_coordinator(coordinator.clone()))
            .and(handlers::identity())
            .and_then(
                |code: String, coordinator: Coordinator<R>, identity: Option<Identity>| async move {
                    let response = handlers::game::resign(coordinator, code, identity).await;
                    Ok::<_, Infallible>(response)
                },
            );

        let offer_draw = session
            .clone()
            .and(warp::path("draw"))
            .and(warp::path::end())
            .and(warp::post())
            .and(Self::with_coordinator(coordinator.clone()))
            .and(handlers::identity())
            .and_then(
                |code: String, coordinator: Coordinator<R>, identity: Option<Identity>| async move {
                    let response = handlers::game::offer_draw(coordinator, code, identity).await;
                    Ok::<_, Infallible>(response)
                },
            );

        let respond_draw = session
            .clone()
            .and(warp::path!("draw" / "respond"))
            .and(warp::post())
            .and(Self::with_coordinator(coordinator.clone()))
            .and(handlers::identity())
            .and(warp::body::json())
            .and_then(
                |code: String,
                 coordinator: Coordinator<R>,
                 identity: Option<Identity>,
                 request: handlers::RespondDrawRequest| async move {
                    let response =
                        handlers::game::respond_draw(coordinator, code, identity, request).await;
                    Ok::<_, Infallible>(response)
                },
            );

        let claim = session
            .clone()
            .and(warp::path("claim"))
            .and(warp::path::end())
            .and(warp::post())
            .and(Self::with_coordinator(coordinator.clone()))
            .and(handlers::identity())
            .and(warp::body::json())
            .and_then(
                |code: String,
                 coordinator: Coordinator<R>,
                 identity: Option<Identity>,
                 request: handlers::ClaimRequest| async move {
                    let response =
                        handlers::game::claim_abandonment(coordinator, code, identity, request)
                            .await;
                    Ok::<_, Infallible>(response)
                },
            );

        let continue_session = session
            .clone()
            .and(warp::path("continue"))
            .and(warp::path::end())
            .and(warp::post())
            .and(Self::with_coordinator(coordinator.clone()))
            .and(handlers::identity())
            .and_then(
                |code: String, coordinator: Coordinator<R>, identity: Option<Identity>| async move {
                    let response =
                        handlers::game::continue_session(coordinator, code, identity).await;
                    Ok::<_, Infallible>(response)
                },
            );

        let chat = session
            .clone()
            .and(warp::path("chat"))
            .and(warp::path::end())
            .and(warp::post())
            .and(Self::with_coordinator(coordinator.clone()))
            .and(handlers::identity())
            .and(warp::body::json())
            .and_then(
                |code: String,
                 coordinator: Coordinator<R>,
                 identity: Option<Identity>,
                 request: handlers::ChatRequest| async move {
                    let response = handlers::game::chat(coordinator, code, identity, request).await;
                    Ok::<_, Infallible>(response)
                },
            );

        let add_bot = session
            .clone()
            .and(warp::path("bot"))
            .and(warp::path::end())
            .and(warp::post())
            .and(Self::with_coordinator(coordinator.clone()))
            .and(handlers::identity())
            .and(handlers::optional_json())
            .and_then(
                |code: String,
                 coordinator: Coordinator<R>,
                 identity: Option<Identity>,
                 request: handlers::BotJoinRequest| async move {
                    let response =
                        handlers::battle::add_bot(coordinator, code, identity, request).await;
                    Ok::<_, Infallible>(response)
                },
            );

        let events = session
            .clone()
            .and(warp::path("events"))
            .and(warp::path::end())
            .and(warp::get())
            .and(Self::with_coordinator(coordinator.clone()))
            .and(handlers::identity())
            .and_then(
                |code: String, coordinator: Coordinator<R>, identity: Option<Identity>| async move {
                    let response = handlers::stream_events(coordinator, code, identity).await;
                    Ok::<_, Infallible>(response)
                },
            );

        let socket = warp::path("ws")
            .and(warp::path(slug))
            .and(warp::path::param::<String>())
            .and(warp::path::end())
            .and(warp::query::<handlers::SocketQuery>())
            .and(warp::ws())
            .and(Self::with_coordinator(coordinator))
            .map(
                |code: String,
                 query: handlers::SocketQuery,
                 ws: warp::ws::Ws,
                 coordinator: Coordinator<R>| {
                    handlers::socket::upgrade(coordinator, code, query, ws)
                },
            );

        list.or(create)
            .unify()
            .or(info)
            .unify()
            .or(end)
            .unify()
            .or(join)
            .unify()
            .or(actions)
            .unify()
            .or(resign)
            .unify()
            .or(offer_draw)
            .unify()
            .or(respond_draw)
            .unify()
            .or(claim)
            .unify()
            .or(continue_session)
            .unify()
            .or(chat)
            .unify()
            .or(add_bot)
            .unify()
            .or(events)
            .unify()
            .or(socket)
            .unify()
            .or(Self::battle_routes(slug, service.coordinator.clone()))
            .unify()
            .or(Self::queue_routes(slug, service.matchmaker()))
            .unify()
            .boxed()
    }

    fn battle_routes<R: Strategies>(
        slug: &'static str,
        coordinator: Coordinator<R>,
    ) -> BoxedFilter<(Response,)> {
        let battles = warp::path("api")
            .and(warp::path(slug))
            .and(warp::path("battles"));

        let list = battles
            .clone()
            .and(warp::path::end())
            .and(warp::get())
            .and(Self::with_coordinator(coordinator.clone()))
            .and_then(|coordinator: Coordinator<R>| async move {
                Ok::<_, Infallible>(handlers::battle::list_battles(coordinator).await)
            });

        let create = battles
            .clone()
            .and(warp::path::end())
            .and(warp::post())
            .and(Self::with_coordinator(coordinator.clone()))
            .and(handlers::identity())
            .and(handlers::optional_json())
            .and_then(
                |coordinator: Coordinator<R>,
                 identity: Option<Identity>,
                 options: crate::coordinator::BattleOptions| async move {
                    let response =
                        handlers::battle::create_battle(coordinator, identity, options).await;
                    Ok::<_, Infallible>(response)
                },
            );

        let profiles = battles
            .clone()
            .and(warp::path("profiles"))
            .and(warp::path::end())
            .and(warp::get())
            .and_then(|| async move {
                Ok::<_, Infallible>(handlers::battle::battle_profiles::<R>().await)
            });

        let battle = battles.and(warp::path::param::<String>()).and(warp::path::end());

        let check = battle
            .clone()
            .and(warp::get())
            .and(Self::with_coordinator(coordinator.clone()))
            .and_then(|code: String, coordinator: Coordinator<R>| async move {
                Ok::<_, Infallible>(handlers::battle::check_battle(coordinator, code).await)
            });

        let stop = battle
            .and(warp::delete())
            .and(Self::with_coordinator(coordinator))
            .and(handlers::identity())
            .and_then(
                |code: String, coordinator: Coordinator<R>, identity: Option<Identity>| async move {
                    let response = handlers::battle::stop_battle(coordinator, code, identity).await;
                    Ok::<_, Infallible>(response)
                },
            );

        list.or(create)
            .unify()
            .or(profiles)
            .unify()
            .or(check)
            .unify()
            .or(stop)
            .unify()
            .boxed()
    }

    fn queue_routes<R: Strategies>(
        slug: &'static str,
        matchmaker: Arc<Matchmaker<R>>,
    ) -> BoxedFilter<(Response,)> {
        let queue = warp::path("api")
            .and(warp::path(slug))
            .and(warp::path("queue"))
            .and(warp::path::end());

        let join = queue
            .clone()
            .and(warp::post())
            .and(Self::with_matchmaker(Arc::clone(&matchmaker)))
            .and(handlers::identity())
            .and_then(
                |matchmaker: Arc<Matchmaker<R>>, identity: Option<Identity>| async move {
                    Ok::<_, Infallible>(handlers::matchmaking::join(matchmaker, identity).await)
                },
            );

        let status = queue
            .clone()
            .and(warp::get())
            .and(Self::with_matchmaker(Arc::clone(&matchmaker)))
            .and(handlers::identity())
            .and_then(
                |matchmaker: Arc<Matchmaker<R>>, identity: Option<Identity>| async move {
                    Ok::<_, Infallible>(handlers::matchmaking::status(matchmaker, identity).await)
                },
            );

        let leave = queue
            .clone()
            .and(warp::delete())
            .and(Self::with_matchmaker(matchmaker))
            .and(handlers::identity())
            .and_then(
                |matchmaker: Arc<Matchmaker<R>>, identity: Option<Identity>| async move {
                    Ok::<_, Infallible>(handlers::matchmaking::leave(matchmaker, identity).await)
                },
            );

        join.or(status).unify().or(leave).unify().boxed()
    }

    fn settings_routes(context: &AppContext) -> BoxedFilter<(Response,)> {
        let settings = context.settings();

        let get = warp::path!("api" / "settings")
            .and(warp::get())
            .and(Self::with_settings_store(Arc::clone(&settings)))
            .and_then(|store: Arc<SettingsStore>| async move {
                Ok::<_, Infallible>(handlers::settings::get_settings(store).await)
            });

        let update = warp::path!("api" / "settings")
            .and(warp::put())
            .and(Self::with_settings_store(Arc::clone(&settings)))
            .and(warp::body::json())
            .and_then(
                |store: Arc<SettingsStore>, request: handlers::UpdateSettingsRequest| async move {
                    Ok::<_, Infallible>(handlers::settings::update_settings(store, request).await)
                },
            );

        let field = warp::path!("api" / "settings" / "field")
            .and(warp::patch())
            .and(Self::with_settings_store(Arc::clone(&settings)))
            .and(warp::body::json())
            .and_then(
                |store: Arc<SettingsStore>, request: handlers::UpdateFieldRequest| async move {
                    Ok::<_, Infallible>(handlers::settings::update_field(store, request).await)
                },
            );

        let reset = warp::path!("api" / "settings" / "reset")
            .and(warp::post())
            .and(Self::with_settings_store(settings))
            .and_then(|store: Arc<SettingsStore>| async move {
                Ok::<_, Infallible>(handlers::settings::reset_settings(store).await)
            });

        get.or(update)
            .unify()
            .or(field)
            .unify()
            .or(reset)
            .unify()
            .boxed()
    }

    fn with_coordinator<R: Strategies>(
        coordinator: Coordinator<R>,
    ) -> impl Filter<Extract = (Coordinator<R>,), Error = Infallible> + Clone {
        warp::any().map(move || coordinator.clone())
    }

    fn with_matchmaker<R: Strategies>(
        matchmaker: Arc<Matchmaker<R>>,
    ) -> impl Filter<Extract = (Arc<Matchmaker<R>>,), Error = Infallible> + Clone {
        warp::any().map(move || Arc::clone(&matchmaker))
    }

    fn with_settings_store(
        settings: Arc<SettingsStore>,
    ) -> impl Filter<Extract = (Arc<SettingsStore>,), Error = Infallible> + Clone {
        warp::any().map(move || Arc::clone(&settings))
    }
}

#[derive(Debug)]
pub struct ServerHandle {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
    context: AppContext,
}

impl ServerHandle {
    pub fn address(&self) -> SocketAddr {
        self.addr
    }

    pub fn context(&self) -> &AppContext {
        &self.context
    }

    /// Stop the sweeper and signal the accept loop; returns the server task
    /// if it has not been taken yet.
    fn signal_stop(&mut self) -> Option<JoinHandle<()>> {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
        if let Some(stop) = self.stop.take() {
            stop.send(()).ok();
        }
        self.server.take()
    }

    /// Graceful: waits for in-flight requests to drain.
    pub async fn shutdown(mut self) -> Result<(), ServerError> {
        if let Some(server) = self.signal_stop() {
            server.await.map_err(|err| ServerError::Task(err.to_string()))?;
        }
        tracing::info!(address = %self.addr, "lobby server stopped");
        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(server) = self.signal_stop() {
            server.abort();
        }
    }
}
