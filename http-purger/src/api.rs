//! REST surface: lets a purge pipeline submit batches and inspect purgers.
//!
//! - `GET /health`
//! - `GET /purgers`
//! - `POST /purgers/{id}/invalidate` with `{"invalidations": [{"type": .., "target": ..}]}`

use crate::errors::ApiError;
use crate::invalidation::{Invalidation, RequestOutcome};
use crate::purgers::Purgers;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use shared::http::{make_error_response, make_json_response, make_text_response};
use std::pin::Pin;
use std::sync::Arc;

pub type ApiBody = BoxBody<Bytes, ApiError>;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Serialize, Debug, PartialEq)]
pub struct PurgerInfo {
    pub id: String,
    pub label: String,
    pub types: Vec<String>,
    pub cooldown_time: f64,
    pub max_requests: u32,
    pub time_hint: f64,
    pub requests_issued: u64,
    pub remaining_budget: u64,
}

#[derive(Deserialize, Debug)]
pub struct InvalidateRequest {
    pub invalidations: Vec<Invalidation>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct OutcomeBody {
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<&RequestOutcome> for OutcomeBody {
    fn from(outcome: &RequestOutcome) -> Self {
        match outcome {
            RequestOutcome::Succeeded => OutcomeBody {
                state: "succeeded".into(),
                reason: None,
            },
            RequestOutcome::Failed(reason) => OutcomeBody {
                state: "failed".into(),
                reason: Some(reason.to_string()),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct InvalidateResponse {
    pub outcomes: Vec<OutcomeBody>,
}

pub async fn run(host: &str, port: u16, purgers: Arc<Purgers>) -> Result<(), ApiError> {
    let service = PurgeApiService { purgers };
    shared::http::run_http_service(host, port, service).await
}

pub struct PurgeApiService {
    purgers: Arc<Purgers>,
}

impl PurgeApiService {
    pub fn new(purgers: Arc<Purgers>) -> Self {
        PurgeApiService { purgers }
    }
}

impl Service<Request<Incoming>> for PurgeApiService {
    type Response = Response<ApiBody>;
    type Error = ApiError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let purgers = self.purgers.clone();
        Box::pin(async move { Ok(handle(&purgers, req).await) })
    }
}

/// Routes one request.
pub async fn handle<B>(purgers: &Purgers, req: Request<B>) -> Response<ApiBody>
where
    B: hyper::body::Body + Send,
    B::Error: Into<BoxError>,
{
    let method = req.method().clone();
    let path = req.uri().path().trim_end_matches('/').to_string();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match (&method, segments.as_slice()) {
        (&Method::GET, ["health"]) => make_text_response(StatusCode::OK, "ok\n"),
        (&Method::GET, ["purgers"]) => list_purgers(purgers),
        (&Method::POST, ["purgers", id, "invalidate"]) => {
            let id = id.to_string();
            invalidate(purgers, &id, req).await
        }
        (_, ["health"]) | (_, ["purgers"]) | (_, ["purgers", _, "invalidate"]) => {
            make_error_response(StatusCode::METHOD_NOT_ALLOWED)
        }
        _ => {
            tracing::debug!(method = %method, path = %path, "No route matched");
            make_error_response(StatusCode::NOT_FOUND)
        }
    }
}

fn list_purgers(purgers: &Purgers) -> Response<ApiBody> {
    let infos: Vec<PurgerInfo> = purgers
        .iter()
        .map(|p| PurgerInfo {
            id: p.id().to_string(),
            label: p.label().to_string(),
            types: p.types().into_iter().map(String::from).collect(),
            cooldown_time: p.cooldown_time(),
            max_requests: p.ideal_conditions_limit(),
            time_hint: p.time_hint(),
            requests_issued: p.requests_issued(),
            remaining_budget: p.remaining_budget(),
        })
        .collect();
    make_json_response(StatusCode::OK, &infos)
}

async fn invalidate<B>(purgers: &Purgers, id: &str, req: Request<B>) -> Response<ApiBody>
where
    B: hyper::body::Body + Send,
    B::Error: Into<BoxError>,
{
    let Some(dispatcher) = purgers.get(id) else {
        return make_error_response(StatusCode::NOT_FOUND);
    };

    let body: InvalidateRequest = match read_json(req.into_body()).await {
        Ok(body) => body,
        Err(ApiError::PayloadTooLarge) => {
            return make_error_response(StatusCode::PAYLOAD_TOO_LARGE);
        }
        Err(e) => {
            tracing::debug!("Rejecting invalidate request: {e}");
            return make_text_response(StatusCode::BAD_REQUEST, &format!("{e}\n"));
        }
    };

    let outcomes = dispatcher.run_batch(&body.invalidations).await;
    let response = InvalidateResponse {
        outcomes: outcomes.iter().map(OutcomeBody::from).collect(),
    };
    make_json_response(StatusCode::OK, &response)
}

async fn read_json<T, B>(body: B) -> Result<T, ApiError>
where
    T: serde::de::DeserializeOwned,
    B: hyper::body::Body,
    B::Error: Into<BoxError>,
{
    let bytes = Limited::new(body, MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| {
            if e.is::<LengthLimitError>() {
                ApiError::PayloadTooLarge
            } else {
                ApiError::RequestBodyError(e.to_string())
            }
        })?
        .to_bytes();
    serde_json::from_slice(&bytes).map_err(|e| ApiError::RequestBodyError(e.to_string()))
}
