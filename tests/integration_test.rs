//! Integration tests for the CPH bridge reconciler
//!
//! These tests require real infrastructure:
//! - Anvil running on localhost:8545
//! - PostgreSQL reachable through DATABASE_URL
//!
//! Run with: cargo test --test integration_test -- --ignored --nocapture
//!
//! Environment variables:
//! - EVM_RPC_URL (default: http://localhost:8545)
//! - DATABASE_URL (required for store tests)

use std::env;
use std::sync::Arc;
use std::time::Duration;

use alloy::network::TransactionBuilder;
use alloy::primitives::{address, Address, B256, U256};
use alloy::rpc::types::TransactionRequest;
use tokio_test::{assert_err, assert_ok};

use reconciler::config::ChainConfig;
use reconciler::contracts::default_event_layout;
use reconciler::gateway::{ChainGateway, HttpTransport, RpcTransport};
use reconciler::signer::{LocalSigner, TransactionSigner};
use reconciler::types::ChainRole;

/// Anvil account #0
const ANVIL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
const ANVIL_ADDRESS: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

fn evm_rpc_url() -> String {
    env::var("EVM_RPC_URL").unwrap_or_else(|_| "http://localhost:8545".to_string())
}

fn anvil_gateway(rpc_urls: Vec<String>) -> ChainGateway {
    let transport: Arc<dyn RpcTransport> =
        Arc::new(HttpTransport::new(Duration::from_secs(5)).unwrap());
    let signer: Arc<dyn TransactionSigner> =
        Arc::new(LocalSigner::from_private_key(ANVIL_KEY).unwrap());
    let role = ChainRole::LockUnlock {
        contract: Address::repeat_byte(0x11),
    };
    let config = ChainConfig {
        name: "Anvil".to_string(),
        chain_id: 31337,
        role,
        event: default_event_layout(&role),
        rpc_urls,
        finality_blocks: 1,
        gas_limit: 21_000,
        gas_price_multiplier_pct: 100,
        confirmation_timeout: Duration::from_secs(30),
    };
    ChainGateway::new(config, transport, Some(signer), Duration::from_millis(200)).unwrap()
}

// ============================================================================
// Chain Connectivity Tests
// ============================================================================

mod chain {
    use super::*;

    #[tokio::test]
    #[ignore = "requires Anvil running"]
    async fn test_anvil_reads() {
        let gateway = anvil_gateway(vec![evm_rpc_url()]);

        let block = assert_ok!(gateway.block_number().await);
        println!("Anvil block number: {}", block);

        let gas_price = assert_ok!(gateway.gas_price().await);
        assert!(gas_price > 0);

        let balance = assert_ok!(gateway.balance(ANVIL_ADDRESS).await);
        assert!(balance > U256::ZERO, "Anvil account 0 should be funded");

        assert_eq!(gateway.signer_address().unwrap(), ANVIL_ADDRESS);
    }

    #[tokio::test]
    #[ignore = "requires Anvil running"]
    async fn test_dead_primary_fails_over_to_anvil() {
        let gateway = anvil_gateway(vec!["http://127.0.0.1:1".to_string(), evm_rpc_url()]);

        assert_ok!(gateway.block_number().await);
        assert_eq!(gateway.endpoints().current_index(), 1);
    }

    #[tokio::test]
    #[ignore = "requires Anvil running"]
    async fn test_unknown_receipt_is_none() {
        let gateway = anvil_gateway(vec![evm_rpc_url()]);
        let receipt = assert_ok!(gateway.transaction_receipt(B256::repeat_byte(0xee)).await);
        assert!(receipt.is_none());
    }

    #[tokio::test]
    #[ignore = "requires Anvil running"]
    async fn test_signed_transfer_confirms() {
        let gateway = anvil_gateway(vec![evm_rpc_url()]);
        let nonce = assert_ok!(gateway.pending_nonce(ANVIL_ADDRESS).await);
        let gas_price = assert_ok!(gateway.gas_price().await);

        let tx = TransactionRequest::default()
            .with_from(ANVIL_ADDRESS)
            .with_to(ANVIL_ADDRESS)
            .with_value(U256::from(1u64))
            .with_nonce(nonce)
            .with_chain_id(gateway.chain_id())
            .with_gas_limit(21_000)
            .with_gas_price(gas_price);

        let signed = assert_ok!(gateway.sign(tx).await);
        let hash = assert_ok!(gateway.broadcast(&signed).await);
        assert_eq!(hash, signed.hash);
        let receipt = assert_ok!(gateway.wait_for_receipt(hash, Duration::from_secs(30)).await);
        assert_eq!(receipt.succeeded(), Some(true));
        assert_eq!(receipt.transaction_hash, hash);

        let mined = assert_ok!(gateway.mined_nonce(ANVIL_ADDRESS).await);
        assert!(mined > nonce);
    }
}

// ============================================================================
// Record Store Tests
// ============================================================================

mod store {
    use super::*;

    use reconciler::db::{
        create_pool, run_migrations, NewBridgeTransaction, PgRecordStore, RecordStore,
        RecordUpdate,
    };
    use reconciler::error::StoreError;
    use reconciler::types::{BridgeAction, BroadcastSlot, Status};

    async fn store() -> PgRecordStore {
        let url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = create_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        PgRecordStore::new(pool)
    }

    fn claim(source: B256) -> NewBridgeTransaction {
        NewBridgeTransaction {
            user: ANVIL_ADDRESS,
            source_network: "Cypherium".to_string(),
            destination_network: "XDC".to_string(),
            action: BridgeAction::LockMint,
            amount: None,
            source_tx_hash: source,
        }
    }

    fn unique_hash() -> B256 {
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        alloy::primitives::keccak256(nanos.to_be_bytes())
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_duplicate_source_is_rejected() {
        let store = store().await;
        let source = unique_hash();

        let id = assert_ok!(store.create(&claim(source)).await);
        let err = assert_err!(store.create(&claim(source)).await);
        assert!(matches!(err, StoreError::Duplicate { existing_id } if existing_id == id));
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_verified_failure_is_leased_once() {
        let store = store().await;
        let source = unique_hash();
        let id = assert_ok!(store.create(&claim(source)).await);

        let max = U256::MAX;
        assert_ok!(
            store
                .update(
                    id,
                    &RecordUpdate::default()
                        .verified(max, 1234)
                        .failed("destination transaction reverted"),
                )
                .await
        );

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, Status::Failed);
        assert_eq!(record.amount, Some(max));
        assert_eq!(record.retries, 1);

        let retryable = assert_ok!(store.query_failed_retryable(3).await);
        assert!(retryable.iter().any(|r| r.id == id));

        assert!(assert_ok!(store.try_lease(id, "a", Duration::from_secs(60)).await));
        assert!(!assert_ok!(store.try_lease(id, "b", Duration::from_secs(60)).await));
        assert_ok!(store.release_lease(id, "a").await);
        assert!(assert_ok!(store.try_lease(id, "b", Duration::from_secs(60)).await));
        assert_ok!(store.release_lease(id, "b").await);
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_unverified_failure_reopens() {
        let store = store().await;
        let source = unique_hash();
        let id = assert_ok!(store.create(&claim(source)).await);
        assert_ok!(
            store
                .update(id, &RecordUpdate::default().failed("source transaction not found"))
                .await
        );

        assert!(assert_ok!(store.reopen_unverified(id, &claim(source)).await));
        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, Status::Pending);

        // A pending record cannot be reopened
        assert!(!assert_ok!(store.reopen_unverified(id, &claim(source)).await));
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_rejected_failure_stays_closed_to_same_claim() {
        let store = store().await;
        let source = unique_hash();
        let id = assert_ok!(store.create(&claim(source)).await);
        assert_ok!(
            store
                .update(
                    id,
                    &RecordUpdate::default()
                        .failed("source transaction reverted")
                        .rejected(),
                )
                .await
        );

        assert!(!assert_ok!(store.reopen_unverified(id, &claim(source)).await));
        let record = store.get(id).await.unwrap().unwrap();
        assert!(record.rejected);

        let mut other_user = claim(source);
        other_user.user = Address::repeat_byte(0x42);
        assert!(assert_ok!(store.reopen_unverified(id, &other_user).await));
        let record = store.get(id).await.unwrap().unwrap();
        assert!(!record.rejected);
        assert_eq!(record.status, Status::Pending);
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_replacement_keeps_earlier_hash() {
        let store = store().await;
        let id = assert_ok!(store.create(&claim(unique_hash())).await);
        let first = BroadcastSlot {
            nonce: 9,
            gas_price: 1_500_000_000,
        };
        let second = BroadcastSlot {
            nonce: 9,
            gas_price: 1_680_000_000,
        };

        assert_ok!(
            store
                .update(id, &RecordUpdate::default().in_flight(B256::repeat_byte(1), first))
                .await
        );
        assert_ok!(
            store
                .update(id, &RecordUpdate::default().in_flight(B256::repeat_byte(2), second))
                .await
        );

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.destination_tx_hash, Some(B256::repeat_byte(2)));
        assert_eq!(record.superseded_tx_hashes, vec![B256::repeat_byte(1)]);
        assert_eq!(record.broadcast_slot(), Some(second));
    }
}
