use crate::{
    Error,
    analyzer::{
        Disqualification,
        Evaluation,
    },
    app::{
        ledger::SettlementError,
        query_api::{
            OpenRoundQuery,
            Query,
            QueryAPI,
            SettleRoundQuery,
        },
    },
    coordinator::ClaimOutcome,
    records::{
        RoundId,
        SettledGuess,
        StreakCandidate,
        UserId,
    },
};
use actix_web::{
    App,
    HttpResponse,
    HttpServer,
    dev::ServerHandle,
    error::{
        ErrorBadRequest,
        ErrorConflict,
        ErrorInternalServerError,
        ErrorServiceUnavailable,
    },
    web,
};
use anyhow::{
    Context,
    anyhow,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    net::TcpListener,
    str::FromStr,
    thread::JoinHandle,
};
use tokio::sync::{
    mpsc,
    oneshot,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvaluationDto {
    pub qualified: bool,
    pub candidate: Option<StreakCandidate>,
    pub reason: String,
    pub reasons: Vec<Disqualification>,
}

impl From<Evaluation> for EvaluationDto {
    fn from(evaluation: Evaluation) -> Self {
        Self {
            qualified: evaluation.is_qualified(),
            reason: evaluation.reason(),
            candidate: evaluation.candidate,
            reasons: evaluation.reasons,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClaimResponseDto {
    pub outcome: ClaimOutcome,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct EvaluateParams {
    current_round: Option<RoundId>,
}

pub struct ActixQueryApi {
    receiver: mpsc::Receiver<Query>,
    base_url: String,
    server_handle: ServerHandle,
    server_thread: Option<JoinHandle<()>>,
}

impl ActixQueryApi {
    pub async fn new(port: Option<u16>) -> anyhow::Result<Self> {
        let (sender, receiver) = mpsc::channel(16);

        let listener = TcpListener::bind(("127.0.0.1", port.unwrap_or(0)))
            .context("failed to bind HTTP listener for query API")?;
        let address = listener
            .local_addr()
            .context("failed to read listener address")?;
        let base_url = format!("http://{}", address);

        tracing::info!("query API listening on {}", base_url);

        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(sender.clone()))
                .route("/evaluate/{user_id}", web::get().to(handle_evaluate))
                .route("/claim/{user_id}", web::post().to(handle_claim))
                .route("/rounds/{round_id}/open", web::post().to(handle_open_round))
                .route(
                    "/rounds/{round_id}/settle",
                    web::post().to(handle_settle_round),
                )
        })
        .listen(listener)
        .context("failed to start Actix server")?
        .run();

        let server_handle = server.handle();
        let server_thread = std::thread::spawn(move || {
            let sys = actix_web::rt::System::new();
            let _ = sys.block_on(server);
        });

        Ok(Self {
            receiver,
            base_url,
            server_handle,
            server_thread: Some(server_thread),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl QueryAPI for ActixQueryApi {
    async fn query(&mut self) -> anyhow::Result<Query> {
        self.receiver
            .recv()
            .await
            .ok_or_else(|| anyhow!("query server closed"))
    }
}

impl Drop for ActixQueryApi {
    fn drop(&mut self) {
        let _ = self.server_handle.stop(true);
        if let Some(thread) = self.server_thread.take() {
            let _ = thread.join();
        }
    }
}

fn parse_user_id(raw: &str) -> actix_web::Result<UserId> {
    UserId::from_str(raw).map_err(ErrorBadRequest)
}

fn core_error(err: Error) -> actix_web::Error {
    match err {
        Error::CollaboratorUnavailable { .. } => ErrorServiceUnavailable(err.to_string()),
        Error::InvalidUserId(_) => ErrorBadRequest(err.to_string()),
    }
}

fn settlement_error(err: anyhow::Error) -> actix_web::Error {
    if err.downcast_ref::<SettlementError>().is_some() {
        ErrorConflict(format!("{err:#}"))
    } else {
        ErrorServiceUnavailable(format!("{err:#}"))
    }
}

async fn forward<T>(
    sender: &mpsc::Sender<Query>,
    query: Query,
    receiver: oneshot::Receiver<T>,
) -> actix_web::Result<T> {
    sender
        .send(query)
        .await
        .map_err(|_| ErrorInternalServerError("unable to forward query"))?;
    receiver
        .await
        .map_err(|_| ErrorInternalServerError("query responder dropped"))
}

async fn handle_evaluate(
    sender: web::Data<mpsc::Sender<Query>>,
    user_id: web::Path<String>,
    params: web::Query<EvaluateParams>,
) -> actix_web::Result<web::Json<EvaluationDto>> {
    tracing::info!("received evaluate request");
    let user_id = parse_user_id(&user_id)?;
    let (response_sender, response_receiver) = oneshot::channel();
    let query = Query::evaluate(user_id, params.current_round, response_sender);
    let evaluation = forward(sender.get_ref(), query, response_receiver)
        .await?
        .map_err(core_error)?;
    Ok(web::Json(evaluation.into()))
}

async fn handle_claim(
    sender: web::Data<mpsc::Sender<Query>>,
    user_id: web::Path<String>,
    candidate: web::Json<StreakCandidate>,
) -> actix_web::Result<web::Json<ClaimResponseDto>> {
    tracing::info!("received claim request");
    let user_id = parse_user_id(&user_id)?;
    let (response_sender, response_receiver) = oneshot::channel();
    let query = Query::claim(user_id, candidate.into_inner(), response_sender);
    let outcome = forward(sender.get_ref(), query, response_receiver)
        .await?
        .map_err(core_error)?;
    Ok(web::Json(ClaimResponseDto {
        message: outcome.message(),
        outcome,
    }))
}

async fn handle_open_round(
    sender: web::Data<mpsc::Sender<Query>>,
    round_id: web::Path<RoundId>,
) -> actix_web::Result<HttpResponse> {
    let (response_sender, response_receiver) = oneshot::channel();
    let query = Query::OpenRound(OpenRoundQuery {
        round_id: round_id.into_inner(),
        sender: response_sender,
    });
    forward(sender.get_ref(), query, response_receiver)
        .await?
        .map_err(settlement_error)?;
    Ok(HttpResponse::NoContent().finish())
}

async fn handle_settle_round(
    sender: web::Data<mpsc::Sender<Query>>,
    round_id: web::Path<RoundId>,
    guesses: web::Json<Vec<SettledGuess>>,
) -> actix_web::Result<HttpResponse> {
    let (response_sender, response_receiver) = oneshot::channel();
    let query = Query::SettleRound(SettleRoundQuery {
        round_id: round_id.into_inner(),
        guesses: guesses.into_inner(),
        sender: response_sender,
    });
    forward(sender.get_ref(), query, response_receiver)
        .await?
        .map_err(settlement_error)?;
    Ok(HttpResponse::NoContent().finish())
}
