//! HTTP implementation of [`LedgerClient`], talking JSON to the ledger
//! gateway service that fronts the chain.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client as HttpClient, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{
    CandidateReceipt, ElectionReceipt, LedgerCandidateId, LedgerClient, LedgerElection,
    LedgerElectionId, LedgerError, LedgerRef, LedgerResult, VoteReceipt,
};

pub struct HttpLedger {
    http: HttpClient,
    base_url: String,
}

impl HttpLedger {
    /// Build a client for the gateway at `base_url`. All requests share the
    /// given time bound; exceeding it surfaces [`LedgerError::Timeout`].
    pub fn new(base_url: String, timeout: Duration) -> LedgerResult<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> LedgerResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.post(&url).json(body).send().await?;
        Self::decode(response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> LedgerResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.get(&url).send().await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> LedgerResult<T> {
        if response.status().is_success() {
            return Ok(response.json().await?);
        }
        let status = response.status();
        let rejection: Rejection = response.json().await.unwrap_or_default();
        Err(match rejection.code.as_deref() {
            Some("ALREADY_VOTED") => LedgerError::AlreadyVoted,
            Some("NOT_ELIGIBLE") => LedgerError::NotEligible,
            _ if status == StatusCode::GATEWAY_TIMEOUT => LedgerError::Timeout,
            _ => LedgerError::Rejected(
                rejection.message.unwrap_or_else(|| status.to_string()),
            ),
        })
    }
}

/// Gateway error payload.
#[derive(Debug, Default, Deserialize)]
struct Rejection {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Serialize)]
struct CreateElectionBody<'a> {
    title: &'a str,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
}

#[derive(Serialize)]
struct RegisterCandidateBody<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct CastVoteBody<'a> {
    candidate: LedgerCandidateId,
    wallet: &'a str,
}

#[derive(Deserialize)]
struct VoteStatusResponse {
    confirmation: Option<LedgerRef>,
}

#[rocket::async_trait]
impl LedgerClient for HttpLedger {
    async fn create_election(
        &self,
        title: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> LedgerResult<ElectionReceipt> {
        let body = CreateElectionBody {
            title,
            start_time,
            end_time,
        };
        self.post("/elections", &body).await
    }

    async fn register_candidate(
        &self,
        election: LedgerElectionId,
        name: &str,
    ) -> LedgerResult<CandidateReceipt> {
        let body = RegisterCandidateBody { name };
        self.post(&format!("/elections/{election}/candidates"), &body)
            .await
    }

    async fn cast_vote(
        &self,
        election: LedgerElectionId,
        candidate: LedgerCandidateId,
        wallet: &str,
    ) -> LedgerResult<VoteReceipt> {
        let body = CastVoteBody { candidate, wallet };
        self.post(&format!("/elections/{election}/votes"), &body)
            .await
    }

    async fn vote_status(
        &self,
        election: LedgerElectionId,
        wallet: &str,
    ) -> LedgerResult<Option<LedgerRef>> {
        let response: VoteStatusResponse = self
            .get(&format!("/elections/{election}/votes/{wallet}"))
            .await?;
        Ok(response.confirmation)
    }

    async fn tally(
        &self,
        election: LedgerElectionId,
    ) -> LedgerResult<HashMap<LedgerCandidateId, u64>> {
        self.get(&format!("/elections/{election}/tally")).await
    }

    async fn read_election(&self, election: LedgerElectionId) -> LedgerResult<LedgerElection> {
        self.get(&format!("/elections/{election}")).await
    }
}
