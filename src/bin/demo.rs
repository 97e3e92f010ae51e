//! Confidential Wrapper Demo
//!
//! Walks one wallet through the whole lifecycle in-process against mock
//! contracts, a mock FHE engine and a mock indexer:
//! create wrapper → approve → wrap → decrypt → transfer → unwrap → finalize.
//!
//! Run with: `cargo run --bin demo`

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use tokio::sync::broadcast;

use confidential_wrapper::adapters::memory_store::InMemoryKeyValueStore;
use confidential_wrapper::adapters::mock_contracts::MockContracts;
use confidential_wrapper::adapters::mock_fhe::MockFheEngine;
use confidential_wrapper::adapters::mock_indexer::{pending_request, MockIndexer};
use confidential_wrapper::adapters::mock_wallet::MockWallet;
use confidential_wrapper::config::PollPolicy;
use confidential_wrapper::domain::token::TokenMetadata;
use confidential_wrapper::events::{EventBus, OperationEvent};
use confidential_wrapper::orchestrator::transfer::TransferOrchestrator;
use confidential_wrapper::orchestrator::unwrap::UnwrapOrchestrator;
use confidential_wrapper::orchestrator::wrap::{WrapOrchestrator, WrapOutcome};
use confidential_wrapper::orchestrator::OperationContext;
use confidential_wrapper::reconciliation::UnwrapReconciler;
use confidential_wrapper::registry::TokenPairRegistry;

const ALICE: Address = Address::repeat_byte(0xA1);
const BOB: Address = Address::repeat_byte(0xB0);
const USDC: Address = Address::repeat_byte(0x1C);

#[tokio::main(flavor = "current_thread")]
async fn main() {
    println!("=== Confidential ERC20 Wrapper ===");
    println!("=== In-process demo (mock chain, mock FHE) ===\n");

    // ── Setup ──
    let chain = Arc::new(MockContracts::new(ALICE));
    let engine = Arc::new(MockFheEngine::new());
    let wallet = Arc::new(MockWallet::connected(ALICE));
    let indexer = Arc::new(MockIndexer::new());
    let events = EventBus::new();
    let mut rx = events.subscribe();

    chain
        .add_token(
            USDC,
            TokenMetadata {
                name: "USD Coin".into(),
                symbol: "USDC".into(),
                decimals: 6,
            },
            U256::from(1_000_000_000u64),
        )
        .await;

    let ctx = OperationContext::new(
        Arc::clone(&chain),
        Arc::clone(&engine),
        Arc::clone(&wallet),
        events.clone(),
    );
    let registry = TokenPairRegistry::new(
        Arc::clone(&chain),
        Arc::new(InMemoryKeyValueStore::new()),
        vec![USDC],
    );
    let reconciler = Arc::new(UnwrapReconciler::new(
        Arc::clone(&indexer),
        ctx.fhe.clone(),
        Arc::clone(&wallet),
    ));
    let wrap = WrapOrchestrator::new(ctx.clone());
    let transfer = TransferOrchestrator::new(ctx.clone());
    let unwrap = UnwrapOrchestrator::new(ctx.clone(), Arc::clone(&reconciler), PollPolicy::immediate(2));

    let requirements = ctx.balances.requirements();
    println!("[Setup] Alice: {ALICE}");
    println!("  can decrypt: {}", requirements.can_decrypt);

    // ── Wrap ──
    println!("\n[Wrap] Wrapping 100 USDC for the first time...");
    registry.refresh(Some(ALICE)).await;
    let pair = registry.pair(USDC).await.expect("USDC listed");
    println!("  wrapper deployed: {}", pair.has_wrapper());
    wrap.set_pair(pair).await;

    let amount = U256::from(100_000_000u64);
    match wrap.start(amount).await.expect("create wrapper") {
        WrapOutcome::AwaitingWrapper { receipt, .. } => {
            println!("  create confirmed (tx {})", receipt.tx_hash)
        }
        other => println!("  unexpected outcome: {other:?}"),
    }
    drain(&mut rx);

    registry.refresh(Some(ALICE)).await;
    let pair = registry.pair(USDC).await.expect("USDC listed");
    let wrapper = pair.wrapped_address.expect("wrapper after creation");
    println!("  refreshed pair, wrapper at {wrapper}");

    if let Some(Ok(WrapOutcome::Wrapped { completed_steps, .. })) = wrap.on_pair_updated(pair.clone()).await {
        println!("  completed steps: {completed_steps:?}");
    }
    // A second refresh signal must not wrap again.
    assert!(wrap.on_pair_updated(pair).await.is_none());
    println!("  duplicate pair signal ignored, wraps sent: {}", chain.call_count("wrap").await);
    drain(&mut rx);

    // The mock chain does no FHE arithmetic; install the minted balance.
    chain
        .set_confidential_handle(wrapper, ALICE, engine.seed_value(100_000_000))
        .await;

    // ── Decrypt ──
    println!("\n[Decrypt] Fetching and decrypting Alice's confidential balance...");
    ctx.balances.fetch_and_decrypt(wrapper).await;
    let state = ctx.balances.get_state(wrapper).await;
    println!("  decrypted: {:?}", state.authoritative_value());
    println!("  signatures requested: {}", wallet.signature_count());

    // ── Transfer ──
    println!("\n[Transfer] Sending 25 cUSDC to Bob...");
    transfer.set_wrapper(Some(wrapper)).await;
    transfer.set_recipient(BOB.to_string()).await;
    transfer.set_amount(Some(25_000_000)).await;
    let receipt = transfer.submit().await.expect("transfer");
    println!("  transfer confirmed (tx {})", receipt.tx_hash);
    println!(
        "  cached balance after transfer: {:?}",
        ctx.balances.get_state(wrapper).await.decrypted_value
    );
    drain(&mut rx);

    chain
        .set_confidential_handle(wrapper, ALICE, engine.seed_value(75_000_000))
        .await;
    ctx.balances.fetch_and_decrypt(wrapper).await;
    println!(
        "  re-decrypted: {:?}",
        ctx.balances.get_state(wrapper).await.authoritative_value()
    );

    // ── Unwrap: burn ──
    println!("\n[Unwrap] Burning 50 cUSDC...");
    unwrap.set_wrapper(Some(wrapper)).await;
    let burn_tx = chain.peek_next_tx_hash().await;
    let burnt_amount = engine.seed_value(50_000_000);
    // The indexer only sees the burn on its second query.
    indexer
        .stage(2, pending_request(ALICE, wrapper, burnt_amount, burn_tx, 1_700_000_000))
        .await;

    let outcome = unwrap.burn(50_000_000).await.expect("burn");
    println!("  burn confirmed (tx {})", outcome.receipt.tx_hash);
    println!("  indexer queries: {}", indexer.query_count());
    let request = outcome.request.expect("indexer caught up");
    println!("  pending request {} (finalized: {})", request.id, request.is_finalized);
    drain(&mut rx);

    // ── Unwrap: finalize ──
    println!("\n[Unwrap] Finalizing...");
    let views = reconciler.views(&[request.clone()]).await;
    println!("  amount before decrypt: {:?}", views[0].amount);
    reconciler.decrypt(&request).await.expect("public decrypt");
    let views = reconciler.views(&[request.clone()]).await;
    println!("  amount after public decrypt: {:?}", views[0].amount);

    let finalized = unwrap.finalize(&request).await.expect("finalize");
    println!(
        "  finalize confirmed (tx {}), released {} base units",
        finalized.receipt.tx_hash, finalized.cleartext_amount
    );
    println!("  public decryptions: {}", engine.public_decrypt_count());
    drain(&mut rx);

    indexer.mark_finalized(burnt_amount, finalized.cleartext_amount).await;
    let pending = reconciler.fetch_or_empty(ALICE, wrapper).await;
    println!("  pending unwraps left: {}", pending.len());

    println!("\n=== Demo completed successfully ===");
}

fn drain(rx: &mut broadcast::Receiver<OperationEvent>) {
    while let Ok(event) = rx.try_recv() {
        println!("  event: {event:?}");
    }
}
