use super::*;
use axum::{
    body::{self, Body},
    http::Request,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use fhe::{encrypt_inputs, LocalWallet, SealingKeypair};
use serde::de::DeserializeOwned;
use shared::{
    directory::{DEV_DIARY_ADDRESS, HARDHAT_CHAIN_ID},
    protocol::{ContractCall, TxStatus, UnsignedTransaction},
};
use tower::ServiceExt;

async fn test_app() -> (Router, Arc<AppState>) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let api = DiaryContext::new(storage, SealingKeypair::generate(), HARDHAT_CHAIN_ID);
    diary_api::deploy(&api, DEV_DIARY_ADDRESS, "hardhat")
        .await
        .expect("deploy");
    let state = Arc::new(AppState { api });
    (build_router(state.clone()), state)
}

async fn read_json<T: DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

fn get_request(uri: String) -> Request<Body> {
    Request::get(uri).body(Body::empty()).expect("request")
}

fn post_json(uri: &str, value: &impl serde::Serialize) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(value).expect("json")))
        .expect("request")
}

fn signed_submit(state: &AppState, wallet: &LocalWallet, score: u32) -> SignedTransaction {
    let encrypted = encrypt_inputs(
        &state.api.network_key.public_key(),
        DEV_DIARY_ADDRESS,
        wallet.address(),
        &[score],
    )
    .expect("encrypt");
    let tx = UnsignedTransaction {
        chain_id: HARDHAT_CHAIN_ID,
        from: wallet.address(),
        to: DEV_DIARY_ADDRESS,
        nonce: 1,
        call: ContractCall::SubmitMood {
            handle: encrypted.handles[0],
            input_proof_b64: STANDARD.encode(&encrypted.input_proof),
        },
    };
    let signature = wallet.sign(&tx.signing_bytes().expect("bytes"));
    SignedTransaction {
        tx,
        verifying_key_b64: STANDARD.encode(wallet.verifying_key()),
        signature_b64: STANDARD.encode(signature),
    }
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let (app, _state) = test_app().await;
    let response = app.oneshot(get_request("/healthz".into())).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn network_key_and_deployments_are_published() {
    let (app, state) = test_app().await;

    let response = app
        .clone()
        .oneshot(get_request("/v1/keys/network".into()))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let key: NetworkKeyResponse = read_json(response).await;
    assert_eq!(key.chain_id, HARDHAT_CHAIN_ID);
    assert_eq!(
        STANDARD.decode(key.public_key_b64).expect("b64"),
        state.api.network_key.public_key().to_vec()
    );

    let response = app
        .oneshot(get_request("/v1/deployments".into()))
        .await
        .expect("response");
    let deployments: Vec<DeploymentSummary> = read_json(response).await;
    assert_eq!(deployments.len(), 1);
    assert_eq!(deployments[0].address, DEV_DIARY_ADDRESS);
}

#[tokio::test]
async fn submitted_mood_is_mined_and_counted() {
    let (app, state) = test_app().await;
    let wallet = LocalWallet::generate();

    let response = app
        .clone()
        .oneshot(post_json("/v1/transactions", &signed_submit(&state, &wallet, 4)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let submitted: SubmitTransactionResponse = read_json(response).await;

    let response = app
        .clone()
        .oneshot(get_request(format!("/v1/transactions/{}", submitted.tx_hash)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let receipt: TxReceipt = read_json(response).await;
    assert_eq!(receipt.status, TxStatus::Mined);

    let response = app
        .clone()
        .oneshot(get_request(format!("/v1/diaries/{DEV_DIARY_ADDRESS}/entry-count")))
        .await
        .expect("response");
    let count: EntryCountResponse = read_json(response).await;
    assert_eq!(count.entry_count, 1);

    let response = app
        .oneshot(get_request(format!("/v1/diaries/{DEV_DIARY_ADDRESS}/encrypted-trend")))
        .await
        .expect("response");
    let trend: HandleResponse = read_json(response).await;
    assert!(!trend.handle.is_zero());
}

#[tokio::test]
async fn trend_handle_without_grant_reverts() {
    let (app, state) = test_app().await;
    let wallet = LocalWallet::generate();
    app.clone()
        .oneshot(post_json("/v1/transactions", &signed_submit(&state, &wallet, 2)))
        .await
        .expect("response");

    let response = app
        .clone()
        .oneshot(get_request(format!(
            "/v1/diaries/{DEV_DIARY_ADDRESS}/my-trend-handle?caller={}",
            wallet.address()
        )))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let err: ApiError = read_json(response).await;
    assert_eq!(err.code, ErrorCode::Reverted);

    let response = app
        .oneshot(get_request(format!(
            "/v1/diaries/{DEV_DIARY_ADDRESS}/can-decrypt?caller={}",
            wallet.address()
        )))
        .await
        .expect("response");
    let can: CanDecryptResponse = read_json(response).await;
    assert!(!can.can_decrypt);
}

#[tokio::test]
async fn unknown_diary_and_receipt_are_not_found() {
    let (app, _state) = test_app().await;
    let response = app
        .clone()
        .oneshot(get_request(format!(
            "/v1/diaries/{}/entry-count",
            Address([0x42; 20])
        )))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(get_request(format!("/v1/transactions/{}", TxHash([7; 32]))))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let err: ApiError = read_json(response).await;
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn malformed_address_is_a_bad_request() {
    let (app, _state) = test_app().await;
    let response = app
        .oneshot(get_request("/v1/diaries/not-an-address/entry-count".into()))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
