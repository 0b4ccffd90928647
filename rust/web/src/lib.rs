//! # gambit_web: multiplayer lobby for chess, rock-paper-scissors and tic-tac-toe
//!
//! Sessions are addressed by short public codes. Each game kind has its own
//! [`coordinator::Coordinator`], which owns every state transition of its
//! sessions: seating, turns and rounds, clocks, draw offers, abandonment,
//! rematches and teardown. Room members follow a session over a WebSocket
//! or an SSE stream; REST calls drive the same coordinator operations.

pub mod autoplay;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod history;
pub mod logging;
pub mod matchmaking;
pub mod metrics;
pub mod middleware;
pub mod registry;
pub mod server;
pub mod session;
pub mod settings;
pub mod timer;

pub use config::{CliArgs, ConfigError, ServerConfig};
pub use coordinator::{BattleOptions, ClaimOutcome, Coordinator, CoordinatorDeps, CreateOptions};
pub use errors::{ErrorResponse, ErrorSeverity, IntoErrorResponse};
pub use events::{EventBus, EventSubscription, RoomEvent};
pub use history::{HistoryError, HistoryStore, MatchFilter, MatchRecord, MatchStatistics};
pub use logging::{init_logging, LogCapture, LogEntry, LogFormat};
pub use matchmaking::{Matchmaker, QueueStatus};
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use middleware::{with_request_logging, Outcome};
pub use server::{AppContext, GameService, ServerError, ServerHandle, WebServer};
pub use session::{Identity, SessionCode, SessionError, SnapshotView};
pub use settings::{AppSettings, GameSettings, SettingsError, SettingsStore, TimeoutPolicy};
