//! 结算全流程集成测试
//!
//! 用脚本化的流水源和记录式消息通道跑完整的订单生命周期：
//! 创建 → 轮询 → 匹配 → 结算 → 落盘，包括并发买家场景。

use async_trait::async_trait;
use parking_lot::Mutex;
use shared::{FeedCredentials, Product, StoreDocument};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use warung_server::core::PollPolicy;
use warung_server::services::QrError;
use warung_server::{
    BackgroundTasks, ChatChannel, ChatError, Config, FeedError, Mutation, OrderManager,
    PersistCoordinator, QrRenderer, Store, TaskKind, TransactionFeed,
};

// ==========================================================
// Test doubles
// ==========================================================

#[derive(Default)]
struct ScriptedFeed {
    mutations: Mutex<Vec<Mutation>>,
}

impl ScriptedFeed {
    fn push_inbound(&self, amount: i64, description: &str) {
        self.mutations.lock().push(Mutation {
            amount,
            direction: "in".to_string(),
            description: description.to_string(),
        });
    }
}

#[async_trait]
impl TransactionFeed for ScriptedFeed {
    async fn fetch_mutations(&self, _creds: &FeedCredentials) -> Result<Vec<Mutation>, FeedError> {
        Ok(self.mutations.lock().clone())
    }
}

#[derive(Default)]
struct RecordingChat {
    sent: Mutex<Vec<(i64, String)>>,
    next_id: AtomicI64,
}

impl RecordingChat {
    fn messages_for(&self, chat_id: i64) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(id, _)| *id == chat_id)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl ChatChannel for RecordingChat {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, ChatError> {
        self.sent.lock().push((chat_id, text.to_string()));
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        _photo: &Path,
        caption: &str,
    ) -> Result<i64, ChatError> {
        self.sent.lock().push((chat_id, caption.to_string()));
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn delete_message(&self, _chat_id: i64, _message_id: i64) -> Result<(), ChatError> {
        Ok(())
    }
}

struct StubQr {
    dir: PathBuf,
}

#[async_trait]
impl QrRenderer for StubQr {
    async fn render(&self, _amount: i64, ref_id: &str) -> Result<PathBuf, QrError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{ref_id}.jpg"));
        tokio::fs::write(&path, b"qr").await?;
        Ok(path)
    }
}

// ==========================================================
// Fixture
// ==========================================================

const OPERATOR: i64 = 900_000;

struct Harness {
    manager: Arc<OrderManager>,
    feed: Arc<ScriptedFeed>,
    chat: Arc<RecordingChat>,
    store: Store,
    persist: PersistCoordinator,
    tasks: BackgroundTasks,
    store_path: PathBuf,
    _dir: tempfile::TempDir,
}

fn seed_catalog(store: &Store, stock_per_product: usize) {
    store.write(|doc| {
        doc.feed = FeedCredentials {
            username: "warung".into(),
            auth_token: "secret".into(),
            account_id: "12345".into(),
        };
        for (id, price) in [("vpn30", 10_000), ("stream90", 25_000)] {
            doc.products.insert(
                id.to_string(),
                Product {
                    id: id.to_string(),
                    name: id.to_uppercase(),
                    desc: String::new(),
                    terms: "Jangan ganti password.".into(),
                    price,
                    profit: price / 5,
                    stock: (0..stock_per_product)
                        .map(|i| format!("{id}-acc{i}|pw{i}"))
                        .collect(),
                    sold: 0,
                    duration: Default::default(),
                },
            );
        }
    });
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("store.json");
    let store = Store::open(&store_path).unwrap();
    seed_catalog(&store, 5);

    let mut config = Config::with_overrides(
        dir.path().to_string_lossy().to_string(),
        store_path.clone(),
    );
    config.operator_chat_id = OPERATOR;
    config.poll = PollPolicy {
        interval_ms: 20,
        max_retries: 100,
        order_ttl_ms: 60_000,
        absolute_timeout_ms: 60_000,
        feed_timeout_ms: 1_000,
    };

    let mut tasks = BackgroundTasks::new();
    let persist = PersistCoordinator::new();
    tasks.spawn(
        "persist_writer",
        TaskKind::Worker,
        persist.clone().run_writer(store.clone(), tasks.shutdown_token()),
    );

    let feed = Arc::new(ScriptedFeed::default());
    let chat = Arc::new(RecordingChat::default());
    let allocator = Arc::new(warung_server::CodeAllocator::new());
    let manager = Arc::new(OrderManager::new(
        config,
        store.clone(),
        persist.clone(),
        Arc::clone(&allocator),
        feed.clone(),
        chat.clone(),
        Arc::new(StubQr {
            dir: dir.path().join("qr"),
        }),
        CancellationToken::new(),
    ));

    Harness {
        manager,
        feed,
        chat,
        store,
        persist,
        tasks,
        store_path,
        _dir: dir,
    }
}

async fn wait_until(deadline_ms: u64, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_millis(deadline_ms);
    while !done() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ==========================================================
// Scenarios
// ==========================================================

#[tokio::test]
async fn paid_order_settles_and_persists() {
    let hx = harness();
    let buyer = 1001;

    let ack = hx.manager.start_order(buyer, "vpn30", 1).await.unwrap();
    assert!((10..=400).contains(&ack.surcharge));
    assert_eq!(ack.total, 10_000 + ack.surcharge as i64);

    // The buyer got a payment prompt carrying the exact amount.
    let prompts = hx.chat.messages_for(buyer);
    assert!(prompts[0].contains(&ack.total.to_string()));

    hx.feed.push_inbound(ack.total, "trf masuk");
    wait_until(5_000, || {
        hx.store.read(|d| !d.orders.contains_key(&buyer))
    })
    .await;
    wait_until(5_000, || hx.manager.polling_count() == 0).await;

    hx.store.read(|doc| {
        assert_eq!(doc.products["vpn30"].stock.len(), 4);
        assert_eq!(doc.products["vpn30"].sold, 1);
        assert_eq!(doc.ledger.len(), 1);
        assert_eq!(doc.ledger[0].ref_id, ack.ref_id);
        assert_eq!(doc.ledger[0].surcharge, ack.surcharge);
        // Active-window timestamps are rendered for humans.
        assert_eq!(doc.ledger[0].start.len(), "2026-01-01 00:00:00".len());
    });

    // Buyer received the item plus terms; operator was notified.
    let delivery = hx.chat.messages_for(buyer);
    assert!(delivery.iter().any(|m| m.contains("vpn30-acc0|pw0")));
    assert!(delivery.iter().any(|m| m.contains("Jangan ganti password.")));
    assert!(hx
        .chat
        .messages_for(OPERATOR)
        .iter()
        .any(|m| m.contains(&ack.ref_id)));

    // The settled state reaches disk through the writer worker.
    hx.persist.request_save();
    wait_until(5_000, || {
        std::fs::read_to_string(&hx.store_path)
            .ok()
            .and_then(|raw| serde_json::from_str::<StoreDocument>(&raw).ok())
            .map(|doc| doc.ledger.len() == 1 && doc.orders.is_empty())
            .unwrap_or(false)
    })
    .await;

    hx.tasks.shutdown().await;
}

#[tokio::test]
async fn concurrent_buyers_get_distinct_totals() {
    let hx = harness();

    let mut acks = Vec::new();
    for buyer in 0..10 {
        acks.push(hx.manager.start_order(2000 + buyer, "vpn30", 1).await.unwrap());
    }

    // Distinct surcharges mean distinct payable totals for the same
    // product, which is the whole point of the code.
    let mut totals: Vec<i64> = acks.iter().map(|a| a.total).collect();
    totals.sort_unstable();
    totals.dedup();
    assert_eq!(totals.len(), 10);

    // Settle only buyer 2003; everyone else keeps waiting.
    let target = &acks[3];
    hx.feed.push_inbound(target.total, "trf");
    wait_until(5_000, || {
        hx.store.read(|d| !d.orders.contains_key(&2003))
    })
    .await;

    hx.store.read(|doc| {
        assert_eq!(doc.orders.len(), 9);
        assert_eq!(doc.ledger.len(), 1);
        assert_eq!(doc.ledger[0].buyer, 2003);
    });

    // Cancel the rest so the run ends clean.
    for buyer in 0..10 {
        if buyer != 3 {
            hx.manager.cancel_order(2000 + buyer).await.unwrap();
        }
    }
    wait_until(5_000, || hx.manager.polling_count() == 0).await;
    hx.tasks.shutdown().await;
}

#[tokio::test]
async fn near_amount_within_tolerance_settles() {
    let hx = harness();
    let buyer = 3001;
    let ack = hx.manager.start_order(buyer, "stream90", 2).await.unwrap();

    // Provider reports the transfer two units off.
    hx.feed.push_inbound(ack.total - 2, "trf");
    wait_until(5_000, || {
        hx.store.read(|d| !d.orders.contains_key(&buyer))
    })
    .await;

    hx.store.read(|doc| assert_eq!(doc.ledger.len(), 1));
    hx.tasks.shutdown().await;
}

#[tokio::test]
async fn outbound_and_mismatched_amounts_never_settle() {
    let hx = harness();
    let buyer = 3002;
    let ack = hx.manager.start_order(buyer, "vpn30", 1).await.unwrap();

    hx.feed.mutations.lock().push(Mutation {
        amount: ack.total,
        direction: "out".to_string(),
        description: "trf keluar".to_string(),
    });
    hx.feed.push_inbound(ack.total + 500, "trf lain");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(hx.store.read(|d| d.orders.contains_key(&buyer)));
    assert!(hx.store.read(|d| d.ledger.is_empty()));

    hx.manager.cancel_order(buyer).await.unwrap();
    wait_until(5_000, || hx.manager.polling_count() == 0).await;
    hx.tasks.shutdown().await;
}

#[tokio::test]
async fn shutdown_flushes_pending_state() {
    let hx = harness();
    hx.store.write(|doc| {
        doc.products.get_mut("vpn30").unwrap().sold = 42;
    });
    hx.persist.request_save();
    hx.tasks.shutdown().await;

    let raw = std::fs::read_to_string(&hx.store_path).unwrap();
    let doc: StoreDocument = serde_json::from_str(&raw).unwrap();
    assert_eq!(doc.products["vpn30"].sold, 42);
}
