use super::*;
use crate::mocks::{
    trend_handle_for, MockContract, MockFhe, MockProvider, MockSigner, SignMode, TxFailure,
};
use shared::directory::{DEV_DIARY_ADDRESS, HARDHAT_CHAIN_ID, SEPOLIA_CHAIN_ID};
use storage::MemoryStore;

struct Harness {
    contract: MockContract,
    provider: MockProvider,
    signer: MockSigner,
    fhe: MockFhe,
}

impl Harness {
    fn new(entry_count: u64) -> Self {
        let contract = MockContract::new(DEV_DIARY_ADDRESS).with_entries(entry_count);
        Self {
            provider: MockProvider::new(contract.clone()),
            contract,
            signer: MockSigner::new(),
            fhe: MockFhe::new(),
        }
    }

    fn collaborators(&self) -> SessionCollaborators {
        SessionCollaborators {
            provider: Some(Arc::new(self.provider.clone())),
            signer: Some(Arc::new(self.signer.clone())),
            fhe: Some(Arc::new(self.fhe.clone())),
            storage: Arc::new(MemoryStore::new()),
            wallet_address: Some(self.signer.address()),
        }
    }

    fn controller(&self) -> DiaryController {
        self.controller_with(self.collaborators())
    }

    fn controller_with(&self, collaborators: SessionCollaborators) -> DiaryController {
        DiaryController::new(
            collaborators,
            ChainDirectory::builtin(),
            Some(HARDHAT_CHAIN_ID),
        )
    }
}

#[tokio::test]
async fn invalid_scores_are_rejected_without_network_calls() {
    let harness = Harness::new(0);
    let controller = harness.controller();

    let cases = [
        (0.0, "Mood score must be between 1 and 5."),
        (6.0, "Mood score must be between 1 and 5."),
        (-3.0, "Mood score must be between 1 and 5."),
        (2.5, "Mood score must be a whole number."),
        (f64::NAN, "Mood score must be a whole number."),
    ];
    for (score, expected) in cases {
        let mut state = SessionState::default();
        controller.submit_mood(&mut state, score).await;
        assert_eq!(state.message, expected, "score {score}");
        assert_eq!(state.submit, OperationStatus::Idle);
    }

    assert!(harness.contract.calls().is_empty());
    assert!(harness.fhe.encrypted().is_empty());
    assert_eq!(harness.signer.signed(), 0);
}

#[tokio::test]
async fn write_operations_require_a_connected_wallet() {
    let harness = Harness::new(0);
    let controller = harness.controller_with(SessionCollaborators {
        signer: None,
        wallet_address: None,
        ..harness.collaborators()
    });
    assert!(!controller.is_ready_for_tx());

    let mut state = SessionState::default();
    controller.submit_mood(&mut state, 3.0).await;
    assert_eq!(state.message, "Connect a wallet to submit a mood score.");

    controller.request_trend_handle(&mut state).await;
    assert_eq!(state.message, "Connect a wallet to request access.");

    assert!(harness.contract.calls().is_empty());
    assert_eq!(state.submit, OperationStatus::Idle);
    assert_eq!(state.request_access, OperationStatus::Idle);
}

#[tokio::test]
async fn missing_fhe_client_blocks_transactions() {
    let harness = Harness::new(0);
    let controller = harness.controller_with(SessionCollaborators {
        fhe: None,
        ..harness.collaborators()
    });
    assert!(!controller.is_ready_for_tx());

    let mut state = SessionState::default();
    controller.submit_mood(&mut state, 4.0).await;
    assert_eq!(state.message, "Connect a wallet to submit a mood score.");
    assert!(harness.contract.calls().is_empty());
}

#[tokio::test]
async fn submitted_mood_is_encrypted_mined_and_refreshed_once() {
    let harness = Harness::new(2);
    let controller = harness.controller();
    assert!(controller.is_ready_for_tx());

    let mut state = SessionState::default();
    controller.submit_mood(&mut state, 4.0).await;

    assert_eq!(harness.fhe.encrypted(), vec![vec![4]]);
    assert_eq!(harness.contract.count_calls("submit_mood"), 1);
    assert_eq!(harness.contract.count_calls("entry_count"), 1);
    assert_eq!(harness.contract.count_calls("encrypted_trend"), 1);
    assert_eq!(state.entry_count, 3);
    assert_eq!(state.network_trend_handle, Some(trend_handle_for(3)));
    assert_eq!(state.my_trend_handle, None);
    assert_eq!(state.message, "Mood encrypted and stored privately.");
    assert_eq!(state.submit, OperationStatus::Succeeded);
    assert_eq!(state.refresh, OperationStatus::Succeeded);

    let chain = harness.contract.chain.lock().expect("chain");
    assert_eq!(chain.submitted.len(), 1);
    assert_eq!(chain.submitted[0].1, b"mock-proof".to_vec());
}

#[tokio::test]
async fn rejected_submission_reports_wallet_rejection() {
    let harness = Harness::new(1);
    harness.signer.set_mode(SignMode::Reject);
    let controller = harness.controller();

    let mut state = SessionState::default();
    controller.submit_mood(&mut state, 5.0).await;

    assert_eq!(state.message, "Transaction was rejected by your wallet.");
    assert_eq!(state.submit, OperationStatus::Failed);
    assert_eq!(state.entry_count, 0);
    assert_eq!(harness.contract.count_calls("entry_count"), 0);
}

#[tokio::test]
async fn failed_submission_uses_normalized_message() {
    let harness = Harness::new(1);
    harness
        .contract
        .fail_tx_with(TxFailure::Transport("connection refused".to_string()));
    let controller = harness.controller();

    let mut state = SessionState::default();
    controller.submit_mood(&mut state, 2.0).await;

    assert_eq!(
        state.message,
        "Failed to submit mood entry: Network connection error. Please check your internet connection."
    );
    assert_eq!(state.submit, OperationStatus::Failed);
}

#[tokio::test]
async fn reverted_receipt_is_reported_as_contract_error() {
    let harness = Harness::new(1);
    harness
        .contract
        .fail_tx_with(TxFailure::RevertedReceipt("invalid encrypted input".to_string()));
    let controller = harness.controller();

    let mut state = SessionState::default();
    controller.submit_mood(&mut state, 2.0).await;

    assert_eq!(
        state.message,
        "Failed to submit mood entry: Smart contract error. Please try again or contact support."
    );
    assert_eq!(state.submit, OperationStatus::Failed);
    assert_eq!(harness.contract.chain.lock().expect("chain").entry_count, 1);
}

#[tokio::test]
async fn refresh_failure_keeps_previous_values() {
    let harness = Harness::new(3);
    let handle = harness.contract.grant();
    let controller = harness.controller();

    let mut state = SessionState::default();
    controller.refresh_stats(&mut state).await;
    assert_eq!(state.entry_count, 3);
    assert_eq!(state.my_trend_handle, Some(handle));

    harness.contract.fail_reads_with("connection reset");
    controller.refresh_stats(&mut state).await;

    assert_eq!(state.message, "Unable to refresh diary state.");
    assert_eq!(state.refresh, OperationStatus::Failed);
    assert_eq!(state.entry_count, 3);
    assert_eq!(state.network_trend_handle, Some(trend_handle_for(3)));
    assert_eq!(state.my_trend_handle, Some(handle));
}

#[tokio::test]
async fn refresh_without_signer_skips_authorized_handle() {
    let harness = Harness::new(2);
    harness.contract.grant();
    let controller = harness.controller_with(SessionCollaborators {
        signer: None,
        ..harness.collaborators()
    });

    let mut state = SessionState::default();
    controller.refresh_stats(&mut state).await;

    assert_eq!(state.entry_count, 2);
    assert_eq!(state.my_trend_handle, None);
    assert_eq!(harness.contract.count_calls("my_trend_handle"), 0);
}

#[tokio::test]
async fn refresh_without_provider_does_nothing() {
    let harness = Harness::new(2);
    let controller = harness.controller_with(SessionCollaborators {
        provider: None,
        ..harness.collaborators()
    });

    let mut state = SessionState::default();
    controller.refresh_stats(&mut state).await;

    assert_eq!(state, SessionState::default());
    assert!(harness.contract.calls().is_empty());
}

#[tokio::test]
async fn trend_access_request_shares_handle_and_refreshes() {
    let harness = Harness::new(2);
    let controller = harness.controller();

    let mut state = SessionState::default();
    controller.request_trend_handle(&mut state).await;

    assert_eq!(state.message, "Trend handle shared with your wallet.");
    assert_eq!(state.request_access, OperationStatus::Succeeded);
    assert_eq!(state.my_trend_handle, Some(trend_handle_for(2)));
    assert_eq!(state.entry_count, 2);
    assert!(controller.can_decrypt(&state));
}

#[tokio::test]
async fn trend_access_failures_are_reported() {
    let harness = Harness::new(2);
    harness.signer.set_mode(SignMode::Reject);
    let controller = harness.controller();

    let mut state = SessionState::default();
    controller.request_trend_handle(&mut state).await;
    assert_eq!(state.message, "Wallet cancelled trend access authorization.");
    assert_eq!(state.request_access, OperationStatus::Failed);

    harness.signer.set_mode(SignMode::Approve);
    harness
        .contract
        .fail_tx_with(TxFailure::Other("nonce already used".to_string()));
    controller.request_trend_handle(&mut state).await;
    assert_eq!(
        state.message,
        "Failed to request trend access: nonce already used"
    );
    assert_eq!(state.my_trend_handle, None);
}

#[tokio::test]
async fn zero_handle_has_nothing_to_decrypt() {
    let harness = Harness::new(0);
    let controller = harness.controller();

    let mut state = SessionState {
        my_trend_handle: Some(Handle::ZERO),
        ..SessionState::default()
    };
    assert!(!controller.can_decrypt(&state));
    controller.decrypt_trend(&mut state).await;

    assert_eq!(state.message, "Nothing to decrypt yet.");
    assert_eq!(state.decrypt, OperationStatus::Idle);
    assert_eq!(harness.signer.signed(), 0);
    assert_eq!(harness.fhe.decrypt_calls(), 0);

    state.my_trend_handle = None;
    state.message.clear();
    controller.decrypt_trend(&mut state).await;
    assert_eq!(state.message, "Nothing to decrypt yet.");
}

#[tokio::test]
async fn repeated_decrypt_performs_one_handshake() {
    let harness = Harness::new(4);
    let handle = harness.contract.grant();
    harness.fhe.decrypts_to(ClearValue::uint(3));
    let controller = harness.controller();

    let mut state = SessionState::default();
    controller.refresh_stats(&mut state).await;
    controller.decrypt_trend(&mut state).await;

    assert_eq!(state.message, "Average decrypted locally.");
    assert_eq!(state.decrypt, OperationStatus::Succeeded);
    let cached = state.clear_trend.expect("clear trend");
    assert_eq!(cached.handle, handle);
    assert_eq!(cached.value.value(), 3);

    state.message.clear();
    controller.decrypt_trend(&mut state).await;
    assert_eq!(state.message, "");
    assert_eq!(harness.fhe.decrypt_calls(), 1);
    assert_eq!(harness.signer.signed(), 1);
}

#[tokio::test]
async fn decrypt_signs_again_only_for_a_new_handle() {
    let harness = Harness::new(1);
    harness.contract.grant();
    harness.fhe.decrypts_to(ClearValue::uint(2));
    let controller = harness.controller();

    let mut state = SessionState::default();
    controller.refresh_stats(&mut state).await;
    controller.decrypt_trend(&mut state).await;

    controller.submit_mood(&mut state, 3.0).await;
    controller.request_trend_handle(&mut state).await;
    controller.decrypt_trend(&mut state).await;

    assert_eq!(harness.fhe.decrypt_calls(), 2);
    // Two transactions plus one decryption authorization from the cache miss.
    assert_eq!(harness.signer.signed(), 3);
    assert_eq!(
        state.clear_trend.map(|cached| cached.handle),
        Some(trend_handle_for(2))
    );
}

#[tokio::test]
async fn boolean_decryption_is_rejected() {
    let harness = Harness::new(1);
    harness.contract.grant();
    harness.fhe.decrypts_to(ClearValue::Bool(true));
    let controller = harness.controller();

    let mut state = SessionState::default();
    controller.refresh_stats(&mut state).await;
    controller.decrypt_trend(&mut state).await;

    assert_eq!(
        state.message,
        "Decryption returned unexpected boolean value."
    );
    assert_eq!(state.clear_trend, None);
    assert_eq!(state.decrypt, OperationStatus::Failed);
}

#[tokio::test]
async fn out_of_range_decryption_keeps_previous_cache() {
    let harness = Harness::new(1);
    harness.contract.grant();
    let controller = harness.controller();

    let previous = ClearTrend {
        handle: Handle([0x55; 32]),
        value: MoodScore::new(4).expect("score"),
    };
    let mut oversized = [0u8; 32];
    oversized[0] = 1;

    for value in [ClearValue::uint(0), ClearValue::uint(6), ClearValue::Uint(oversized)] {
        harness.fhe.decrypts_to(value);
        let mut state = SessionState {
            clear_trend: Some(previous),
            ..SessionState::default()
        };
        controller.refresh_stats(&mut state).await;
        controller.decrypt_trend(&mut state).await;

        assert_eq!(
            state.message,
            "Decryption returned invalid mood score value.",
            "{value:?}"
        );
        assert_eq!(state.clear_trend, Some(previous));
        assert_eq!(state.decrypt, OperationStatus::Failed);
    }
}

#[tokio::test]
async fn decrypt_reports_signature_problems() {
    let harness = Harness::new(1);
    harness.contract.grant();
    harness.fhe.decrypts_to(ClearValue::uint(1));
    let controller = harness.controller();

    let mut state = SessionState::default();
    controller.refresh_stats(&mut state).await;

    harness.signer.set_mode(SignMode::Reject);
    controller.decrypt_trend(&mut state).await;
    assert_eq!(
        state.message,
        "Wallet cancelled decryption signature. Please try again."
    );
    assert_eq!(state.decrypt, OperationStatus::Failed);

    harness.signer.set_mode(SignMode::Fail);
    controller.decrypt_trend(&mut state).await;
    assert_eq!(state.message, "Unable to authorize FHE decryption.");
    assert_eq!(state.decrypt, OperationStatus::Failed);

    assert_eq!(harness.fhe.decrypt_calls(), 0);
    assert_eq!(state.clear_trend, None);
}

#[tokio::test]
async fn relayer_failure_is_normalized() {
    let harness = Harness::new(1);
    harness.contract.grant();
    harness.fhe.fail_decrypt_with("FHE relayer unavailable");
    let controller = harness.controller();

    let mut state = SessionState::default();
    controller.refresh_stats(&mut state).await;
    controller.decrypt_trend(&mut state).await;

    assert_eq!(
        state.message,
        "Decryption failed: FHEVM encryption error. Please refresh the page and try again."
    );
    assert!(!state.decrypt.is_running());
}

#[tokio::test]
async fn chain_change_resets_cached_state() {
    let harness = Harness::new(5);
    let handle = harness.contract.grant();
    let mut controller = harness.controller();

    let mut state = SessionState::default();
    controller.refresh_stats(&mut state).await;
    state.clear_trend = Some(ClearTrend {
        handle,
        value: MoodScore::new(2).expect("score"),
    });

    controller.change_chain(&mut state, Some(SEPOLIA_CHAIN_ID)).await;
    assert_eq!(state.entry_count, 0);
    assert_eq!(state.network_trend_handle, None);
    assert_eq!(state.my_trend_handle, None);
    assert_eq!(state.clear_trend, None);
    assert!(controller.is_deploying());
    assert!(!controller.is_ready_for_tx());
    assert_eq!(controller.contract_address(), None);

    controller.change_chain(&mut state, Some(HARDHAT_CHAIN_ID)).await;
    assert_eq!(state.entry_count, 5);
    assert_eq!(state.my_trend_handle, Some(handle));
    assert!(!controller.is_deploying());
    assert_eq!(controller.contract_address(), Some(DEV_DIARY_ADDRESS));
    assert_eq!(
        harness.provider.requested.lock().expect("requested").as_slice(),
        &[DEV_DIARY_ADDRESS, DEV_DIARY_ADDRESS]
    );
}

#[tokio::test]
async fn chain_change_stays_reset_when_first_read_fails() {
    let harness = Harness::new(5);
    let mut controller = harness.controller();

    let mut state = SessionState::default();
    controller.refresh_stats(&mut state).await;
    assert_eq!(state.entry_count, 5);

    harness.contract.fail_reads_with("connection refused");
    controller.change_chain(&mut state, Some(HARDHAT_CHAIN_ID)).await;

    assert_eq!(state.entry_count, 0);
    assert_eq!(state.network_trend_handle, None);
    assert_eq!(state.message, "Unable to refresh diary state.");
}

#[test]
fn trend_values_are_validated() {
    assert_eq!(
        validate_trend_value(Some(&ClearValue::uint(5))).map(MoodScore::value),
        Ok(5)
    );
    assert_eq!(
        validate_trend_value(Some(&ClearValue::Bool(false))),
        Err(TrendValueError::UnexpectedBoolean)
    );
    assert_eq!(
        validate_trend_value(None),
        Err(TrendValueError::InvalidScore)
    );
    assert_eq!(
        validate_trend_value(Some(&ClearValue::uint(256 + 3))),
        Err(TrendValueError::InvalidScore)
    );
}
