use super::{error_response, success_response};
use crate::history::{HistoryError, HistoryStore, MatchFilter};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::Filter;

/// Every history route; `stats` and `filter` are matched before the id route.
pub fn routes(history: Arc<HistoryStore>) -> BoxedFilter<(Response,)> {
    get_statistics(Arc::clone(&history))
        .or(filter_matches(Arc::clone(&history)))
        .unify()
        .or(get_recent_matches(Arc::clone(&history)))
        .unify()
        .or(get_match_by_id(history))
        .unify()
        .boxed()
}

/// GET /api/history?limit=N&player=ID
pub fn get_recent_matches(
    history: Arc<HistoryStore>,
) -> impl Filter<Extract = (Response,), Error = warp::Rejection> + Clone {
    warp::path!("api" / "history")
        .and(warp::get())
        .and(warp::query::<GetHistoryQuery>())
        .and(with_history(history))
        .and_then(handle_get_recent_matches)
}

/// GET /api/history/:id
pub fn get_match_by_id(
    history: Arc<HistoryStore>,
) -> impl Filter<Extract = (Response,), Error = warp::Rejection> + Clone {
    warp::path!("api" / "history" / String)
        .and(warp::get())
        .and(with_history(history))
        .and_then(handle_get_match_by_id)
}

/// POST /api/history/filter
pub fn filter_matches(
    history: Arc<HistoryStore>,
) -> impl Filter<Extract = (Response,), Error = warp::Rejection> + Clone {
    warp::path!("api" / "history" / "filter")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_history(history))
        .and_then(handle_filter_matches)
}

/// GET /api/history/stats
pub fn get_statistics(
    history: Arc<HistoryStore>,
) -> impl Filter<Extract = (Response,), Error = warp::Rejection> + Clone {
    warp::path!("api" / "history" / "stats")
        .and(warp::get())
        .and(with_history(history))
        .and_then(handle_get_statistics)
}

fn with_history(
    history: Arc<HistoryStore>,
) -> impl Filter<Extract = (Arc<HistoryStore>,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&history))
}

#[derive(Debug, Default, Deserialize)]
pub struct GetHistoryQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    /// Only matches this player took part in.
    #[serde(default)]
    pub player: Option<String>,
}

async fn handle_get_recent_matches(
    query: GetHistoryQuery,
    history: Arc<HistoryStore>,
) -> Result<Response, Infallible> {
    let result = match query.player {
        Some(player_id) => history.filter(MatchFilter {
            player_id: Some(player_id),
            limit: query.limit,
            ..MatchFilter::default()
        }),
        None => history.get_recent(query.limit),
    };
    Ok(match result {
        Ok(records) => success_response(StatusCode::OK, records),
        Err(err) => error_response(err),
    })
}

async fn handle_get_match_by_id(
    id: String,
    history: Arc<HistoryStore>,
) -> Result<Response, Infallible> {
    Ok(match history.get_record(&id) {
        Ok(Some(record)) => success_response(StatusCode::OK, record),
        Ok(None) => error_response(HistoryError::NotFound(id)),
        Err(err) => error_response(err),
    })
}

async fn handle_filter_matches(
    filter: MatchFilter,
    history: Arc<HistoryStore>,
) -> Result<Response, Infallible> {
    Ok(match history.filter(filter) {
        Ok(records) => success_response(StatusCode::OK, records),
        Err(err) => error_response(err),
    })
}

async fn handle_get_statistics(history: Arc<HistoryStore>) -> Result<Response, Infallible> {
    Ok(match history.calculate_stats() {
        Ok(stats) => success_response(StatusCode::OK, stats),
        Err(err) => error_response(err),
    })
}
