//! HTTP surface over the ledger. Identity and sessions live upstream; the
//! caller forwarding a vote is trusted to send an accurate voter assertion.

use std::collections::BTreeSet;
use std::sync::Arc;

use actix_web::{web, HttpResponse, Responder};
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::LedgerError;
use crate::ledger::Ledger;
use crate::models::{Ballot, CategoryId, VoterAssertion};
use crate::tally::TallyAggregator;

pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub tally: Arc<TallyAggregator>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct VoteRequest {
    pub voter: String,
    pub department: String,
    #[serde(default)]
    pub has_voted: bool,
    pub eligible_categories: BTreeSet<CategoryId>,
    pub ballot: Ballot,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct VerifyVoteRequest {
    pub input: String,
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/vote", web::post().to(handle_vote))
        .route("/verify", web::get().to(verify_chain))
        .route("/verify-vote", web::post().to(verify_vote))
        .route("/tally", web::get().to(get_tally))
        .route("/history", web::get().to(get_history))
        .route("/block/{index}", web::get().to(get_block));
}

async fn handle_vote(data: web::Data<AppState>, vote: web::Json<VoteRequest>) -> impl Responder {
    let vote = vote.into_inner();
    let assertion = VoterAssertion {
        voter: vote.voter,
        department: vote.department,
        has_voted: vote.has_voted,
        eligible_categories: vote.eligible_categories,
    };
    let ledger = Arc::clone(&data.ledger);

    match web::block(move || ledger.cast(&vote.ballot, &assertion)).await {
        Ok(Ok(receipt)) => HttpResponse::Ok().json(receipt),
        Ok(Err(err @ LedgerError::IneligibleVote { .. })) => {
            HttpResponse::Forbidden().json(json!({ "error": err.to_string() }))
        }
        Ok(Err(err)) => {
            HttpResponse::InternalServerError().json(json!({ "error": err.to_string() }))
        }
        Err(err) => {
            error!("Vote handler failed: {}", err);
            HttpResponse::InternalServerError().body("Vote could not be processed")
        }
    }
}

async fn verify_chain(data: web::Data<AppState>) -> impl Responder {
    let ledger = Arc::clone(&data.ledger);
    match web::block(move || ledger.verify_chain()).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(err) => HttpResponse::InternalServerError().body(format!("Verification failed: {}", err)),
    }
}

async fn verify_vote(
    data: web::Data<AppState>,
    body: web::Json<VerifyVoteRequest>,
) -> impl Responder {
    let input = body.into_inner().input;
    if input.trim().is_empty() {
        return HttpResponse::BadRequest().body("Provide an encrypted vote or block hash");
    }

    let ledger = Arc::clone(&data.ledger);
    match web::block(move || ledger.verify_receipt(&input)).await {
        Ok(Ok(verdict)) => HttpResponse::Ok().json(json!({
            "position": verdict.position,
            "index": verdict.index,
            "hash": verdict.hash,
            "is_valid": verdict.is_valid(),
            "faults": verdict.faults,
        })),
        Ok(Err(LedgerError::NotFound(_))) => {
            HttpResponse::NotFound().body("No matching vote or block found")
        }
        Ok(Err(err)) => HttpResponse::InternalServerError().body(err.to_string()),
        Err(err) => HttpResponse::InternalServerError().body(format!("Lookup failed: {}", err)),
    }
}

async fn get_tally(data: web::Data<AppState>) -> impl Responder {
    let ledger = Arc::clone(&data.ledger);
    let tally = Arc::clone(&data.tally);
    match web::block(move || tally.get_tally(&ledger)).await {
        Ok(snapshot) => HttpResponse::Ok().json(json!({
            "counts": snapshot.tally,
            "blocks": snapshot.tip.length,
            "skipped": snapshot.skipped.len(),
        })),
        Err(err) => HttpResponse::InternalServerError().body(format!("Tally failed: {}", err)),
    }
}

async fn get_history(data: web::Data<AppState>) -> impl Responder {
    let blocks = data.ledger.snapshot();
    let history: Vec<_> = blocks
        .iter()
        .map(|block| {
            json!({
                "index": block.index,
                "timestamp": block.timestamp_string(),
                "hash": block.hash,
            })
        })
        .collect();
    HttpResponse::Ok().json(history)
}

async fn get_block(data: web::Data<AppState>, index: web::Path<u64>) -> impl Responder {
    match data.ledger.block_at(index.into_inner()) {
        Some(block) => HttpResponse::Ok().json(block),
        None => HttpResponse::NotFound().body("No block at that index"),
    }
}
