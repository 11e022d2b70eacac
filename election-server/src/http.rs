//! HTTP proxy for the evoting contract commands and the DKG actor
//! lifecycle.
//!
//! Validation failures (malformed bodies, unknown elections, denied
//! transactions) map to 4xx; internal failures map to 5xx.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use election_common::bls::Keypair;
use evoting_contract::types::{
    CancelElectionTransaction, CastVoteTransaction, Ciphervote, CloseElectionTransaction, Command,
    CreateElectionTransaction, Configuration, DecryptBallotsTransaction, Election,
    ElectionsMetadata, OpenElectionTransaction, Status,
};
use evoting_contract::ELECTIONS_METADATA_KEY;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::watch;

use crate::dkg::{self, DkgService};
use crate::services::{
    wait_for_inclusion, OrderingService, Pool, ServiceError, TransactionManager,
};
use crate::shuffle::ShuffleOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub ordering: Arc<dyn OrderingService>,
    pub pool: Arc<dyn Pool>,
    pub manager: Arc<TransactionManager>,
    pub dkg: Arc<DkgService>,
    pub trustees: Vec<Arc<Keypair>>,
    pub inclusion_timeout: Duration,
    pub shutdown: watch::Receiver<bool>,
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("malformed request: {0}")]
    BadRequest(String),
    #[error("election not found: {0}")]
    NotFound(String),
    #[error("transaction denied: {0}")]
    Denied(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::BadRequest(_) | ServerError::Denied(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, self.to_string()).into_response()
    }
}

impl From<ServiceError> for ServerError {
    fn from(err: ServiceError) -> Self {
        ServerError::Internal(err.to_string())
    }
}

/// Builds the proxy router over the node services.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/evoting/elections", post(create_election).get(list_elections))
        .route(
            "/evoting/elections/:election_id",
            get(election_info).put(update_election),
        )
        .route("/evoting/elections/:election_id/vote", post(cast_vote))
        .route("/evoting/services/dkg/actors", post(init_dkg_actor))
        .route("/evoting/services/dkg/actors/:election_id", put(edit_dkg_actor))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateElectionRequest {
    configuration: Configuration,
    admin_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateElectionResponse {
    election_id: String,
}

/// POST /evoting/elections
async fn create_election(
    State(state): State<AppState>,
    Json(request): Json<CreateElectionRequest>,
) -> Result<Json<CreateElectionResponse>, ServerError> {
    let payload = CreateElectionTransaction {
        configuration: request.configuration,
        admin_id: request.admin_id,
    };
    let tx = state.manager.make(Command::CreateElection, &payload)?;
    // the election will be addressed by the digest of its creation tx
    let election_id = hex::encode(Sha256::digest(&tx.id));

    submit_and_wait(&state, tx).await?;
    Ok(Json(CreateElectionResponse { election_id }))
}

/// GET /evoting/elections
async fn list_elections(
    State(state): State<AppState>,
) -> Result<Json<ElectionsMetadata>, ServerError> {
    let metadata = match state.ordering.get_proof(ELECTIONS_METADATA_KEY)? {
        Some(buf) => election_common::decode(&buf)
            .map_err(|err| ServerError::Internal(err.to_string()))?,
        None => ElectionsMetadata::default(),
    };
    Ok(Json(metadata))
}

/// GET /evoting/elections/{election_id}
async fn election_info(
    State(state): State<AppState>,
    Path(election_id): Path<String>,
) -> Result<Json<Election>, ServerError> {
    let election = get_election(&state, &election_id)?;
    Ok(Json(election))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
enum ElectionAction {
    Open,
    Close,
    Cancel,
    Decrypt,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateElectionRequest {
    action: ElectionAction,
    #[serde(default)]
    user_id: String,
}

/// PUT /evoting/elections/{election_id}
async fn update_election(
    State(state): State<AppState>,
    Path(election_id): Path<String>,
    Json(request): Json<UpdateElectionRequest>,
) -> Result<StatusCode, ServerError> {
    // fail fast on ids that are not even well-formed
    decode_election_id(&election_id)?;

    let was_close = matches!(request.action, ElectionAction::Close);
    let tx = match request.action {
        ElectionAction::Open => state.manager.make(
            Command::OpenElection,
            &OpenElectionTransaction {
                election_id: election_id.clone(),
            },
        )?,
        ElectionAction::Close => state.manager.make(
            Command::CloseElection,
            &CloseElectionTransaction {
                election_id: election_id.clone(),
                user_id: request.user_id,
            },
        )?,
        ElectionAction::Cancel => state.manager.make(
            Command::CancelElection,
            &CancelElectionTransaction {
                election_id: election_id.clone(),
                user_id: request.user_id,
            },
        )?,
        ElectionAction::Decrypt => state.manager.make(
            Command::DecryptBallots,
            &DecryptBallotsTransaction {
                election_id: election_id.clone(),
                user_id: request.user_id,
            },
        )?,
    };

    submit_and_wait(&state, tx).await?;

    // once the board is frozen the local trustees start mixing
    if was_close {
        spawn_orchestrators(&state, &election_id)?;
    }

    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CastVoteRequest {
    user_id: String,
    ballot: Ciphervote,
}

/// POST /evoting/elections/{election_id}/vote
async fn cast_vote(
    State(state): State<AppState>,
    Path(election_id): Path<String>,
    Json(request): Json<CastVoteRequest>,
) -> Result<StatusCode, ServerError> {
    decode_election_id(&election_id)?;

    let tx = state.manager.make(
        Command::CastVote,
        &CastVoteTransaction {
            election_id,
            user_id: request.user_id,
            ballot: request.ballot,
        },
    )?;
    submit_and_wait(&state, tx).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitDkgActorRequest {
    election_id: String,
}

/// POST /evoting/services/dkg/actors
async fn init_dkg_actor(
    State(state): State<AppState>,
    Json(request): Json<InitDkgActorRequest>,
) -> Result<StatusCode, ServerError> {
    let election_id = decode_election_id(&request.election_id)?;
    state
        .dkg
        .init_actor(&election_id)
        .map_err(|err| ServerError::BadRequest(err.to_string()))?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
enum DkgAction {
    Setup,
    ComputePubshares,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditDkgActorRequest {
    action: DkgAction,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetupDkgResponse {
    public_key: String,
}

/// PUT /evoting/services/dkg/actors/{election_id}
async fn edit_dkg_actor(
    State(state): State<AppState>,
    Path(election_id): Path<String>,
    Json(request): Json<EditDkgActorRequest>,
) -> Result<Response, ServerError> {
    let raw_id = decode_election_id(&election_id)?;

    match request.action {
        DkgAction::Setup => {
            let election = get_election(&state, &election_id)?;
            let public_key = state
                .dkg
                .setup(&raw_id, election.shuffle_threshold, &mut rand::rngs::OsRng)
                .map_err(|err| ServerError::BadRequest(err.to_string()))?;
            let response = SetupDkgResponse {
                public_key: hex::encode(election_common::elgamal::encode_point(&public_key)),
            };
            Ok(Json(response).into_response())
        }
        DkgAction::ComputePubshares => {
            let election = get_election(&state, &election_id)?;
            if election.status != Status::ShuffledBallots {
                return Err(ServerError::BadRequest(format!(
                    "the ballots have not been shuffled, current status: {}",
                    election.status
                )));
            }
            dkg::submit_pub_shares(
                &state.dkg,
                &state.ordering,
                &state.pool,
                &state.manager,
                &raw_id,
                state.inclusion_timeout,
            )
            .await
            .map_err(|err| ServerError::Internal(err.to_string()))?;
            Ok(StatusCode::OK.into_response())
        }
    }
}

/// Submits a transaction and waits for its inclusion event.
async fn submit_and_wait(state: &AppState, tx: evoting_contract::Transaction) -> Result<(), ServerError> {
    let mut events = state.ordering.watch();
    state.pool.add(tx.clone()).await?;

    let (accepted, message) = wait_for_inclusion(&mut events, &tx.id, state.inclusion_timeout)
        .await
        .map_err(ServerError::from)?;
    if !accepted {
        return Err(ServerError::Denied(message));
    }
    Ok(())
}

/// Starts one orchestrator task per local trustee for the election.
fn spawn_orchestrators(state: &AppState, election_id: &str) -> Result<(), ServerError> {
    let raw_id = decode_election_id(election_id)?;
    for keypair in &state.trustees {
        let orchestrator = ShuffleOrchestrator::new(
            keypair.clone(),
            state.ordering.clone(),
            state.pool.clone(),
            state.manager.clone(),
            state.inclusion_timeout,
        );
        let shutdown = state.shutdown.clone();
        let raw_id = raw_id.clone();
        tokio::spawn(async move {
            if let Err(err) = orchestrator.run(&raw_id, shutdown).await {
                tracing::warn!(error = %err, "shuffle orchestrator stopped");
            }
        });
    }
    Ok(())
}

fn decode_election_id(election_id: &str) -> Result<Vec<u8>, ServerError> {
    hex::decode(election_id)
        .map_err(|err| ServerError::BadRequest(format!("failed to decode electionID: {err}")))
}

fn get_election(state: &AppState, election_id: &str) -> Result<Election, ServerError> {
    let raw_id = decode_election_id(election_id)?;
    let buf = state
        .ordering
        .get_proof(&raw_id)?
        .ok_or_else(|| ServerError::NotFound(election_id.to_string()))?;
    election_common::decode(&buf).map_err(|err| ServerError::Internal(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_the_right_status_codes() {
        let response = ServerError::BadRequest("bad".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ServerError::Denied("denied".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ServerError::NotFound("missing".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = ServerError::Internal("boom".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn malformed_ids_are_bad_requests() {
        assert!(matches!(
            decode_election_id("not-hex"),
            Err(ServerError::BadRequest(_))
        ));
    }
}
