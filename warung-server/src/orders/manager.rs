//! Order manager
//!
//! Owns the full order lifecycle: validation, surcharge allocation,
//! payment-target delivery, the per-order polling loop against the
//! transaction feed, settlement, and the cancel/failure paths.
//!
//! # Concurrency
//!
//! One polling task per pending order, tracked in a [`DashMap`] keyed
//! by buyer chat id. Settlement and cancellation race freely: both
//! *claim* the order by removing it from the orders table inside a
//! synchronous write closure, and only the successful claimer touches
//! stock, the ledger, or the surcharge code. The surcharge code is
//! released strictly last on settlement so a settled code always
//! reaches the allocator's exclusion history before it can be
//! redrawn.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDateTime, TimeZone, Utc};
use dashmap::DashMap;
use shared::{LedgerEntry, Order};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::Config;
use crate::payment::{find_match, CodeAllocator, TransactionFeed};
use crate::services::qr::remove_qr_file;
use crate::services::{ChatChannel, QrRenderer};
use crate::store::{PersistCoordinator, Store};

/// Order errors surfaced to the command layer.
///
/// Validation variants carry enough context to render a buyer-facing
/// message without another store lookup.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Transaction feed credentials are not configured")]
    MissingCredentials,

    #[error("Buyer already has a pending order")]
    ActiveOrderExists,

    #[error("Unknown product '{0}'")]
    UnknownProduct(String),

    #[error("Quantity must be between 1 and {max}")]
    QuantityOutOfRange { max: u32 },

    #[error("Insufficient stock: {available} available")]
    InsufficientStock { available: usize },

    #[error("Buyer has no pending order")]
    NoActiveOrder,

    #[error(transparent)]
    Qr(#[from] crate::services::QrError),

    #[error(transparent)]
    Chat(#[from] crate::services::ChatError),
}

/// What the command layer needs to acknowledge a started order.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub ref_id: String,
    pub total: i64,
    pub surcharge: u32,
    pub expires_at: i64,
}

/// Terminal non-success outcomes of the polling loop.
#[derive(Debug)]
enum FailReason {
    Expired,
    RetriesExhausted,
    AuthFailure(String),
}

pub struct OrderManager {
    config: Config,
    store: Store,
    persist: PersistCoordinator,
    allocator: Arc<CodeAllocator>,
    feed: Arc<dyn TransactionFeed>,
    chat: Arc<dyn ChatChannel>,
    qr: Arc<dyn QrRenderer>,
    /// buyer chat id -> cancellation token of the polling task
    polling: DashMap<i64, CancellationToken>,
    /// Parent of every polling token; cancelled on shutdown
    shutdown: CancellationToken,
}

impl OrderManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        store: Store,
        persist: PersistCoordinator,
        allocator: Arc<CodeAllocator>,
        feed: Arc<dyn TransactionFeed>,
        chat: Arc<dyn ChatChannel>,
        qr: Arc<dyn QrRenderer>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            store,
            persist,
            allocator,
            feed,
            chat,
            qr,
            polling: DashMap::new(),
            shutdown,
        }
    }

    // ==========================================================
    // Order creation
    // ==========================================================

    /// Validate, create and announce a new order, then start its
    /// polling task.
    ///
    /// Validation order: feed credentials, no pending order, quantity
    /// bounds, product exists, stock covers the quantity. Stock is
    /// *not* reserved here; settlement re-checks it.
    pub async fn start_order(
        self: &Arc<Self>,
        buyer: i64,
        product_id: &str,
        quantity: u32,
    ) -> Result<OrderAck, OrderError> {
        let unit_price = self.store.read(|doc| -> Result<i64, OrderError> {
            if !doc.feed.is_complete() {
                return Err(OrderError::MissingCredentials);
            }
            if doc.orders.contains_key(&buyer) {
                return Err(OrderError::ActiveOrderExists);
            }
            if quantity == 0 || quantity > self.config.max_quantity {
                return Err(OrderError::QuantityOutOfRange {
                    max: self.config.max_quantity,
                });
            }
            let product = doc
                .products
                .get(product_id)
                .ok_or_else(|| OrderError::UnknownProduct(product_id.to_string()))?;
            if product.stock.len() < quantity as usize {
                return Err(OrderError::InsufficientStock {
                    available: product.stock.len(),
                });
            }
            Ok(product.price)
        })?;

        let surcharge = self.allocator.allocate();
        let total = unit_price * quantity as i64 + surcharge as i64;
        let ref_id = shared::ref_id();
        let now = shared::now_millis();
        let order = Order {
            product_id: product_id.to_string(),
            quantity,
            surcharge,
            total,
            ref_id: ref_id.clone(),
            created_at: now,
            expires_at: now + self.config.poll.order_ttl_ms,
            message_id: None,
            qr_path: None,
        };

        // Re-check under the write lock: a second command for the same
        // buyer may have won the race since the read above.
        let inserted = self.store.write(|doc| {
            if doc.orders.contains_key(&buyer) {
                return false;
            }
            doc.orders.insert(buyer, order.clone());
            let user = doc.users.entry(buyer).or_default();
            user.touch(now);
            user.orders_started += 1;
            true
        });
        if !inserted {
            self.allocator.release(surcharge, false);
            return Err(OrderError::ActiveOrderExists);
        }

        info!(
            buyer,
            product = product_id,
            quantity,
            surcharge,
            total,
            ref_id = %ref_id,
            "Order created"
        );

        // Payment target: rendered QR photo with the exact amount in
        // the caption. Any delivery failure rolls the order back.
        let qr_path = match self.qr.render(total, &ref_id).await {
            Ok(p) => p,
            Err(e) => {
                self.rollback_order(buyer, surcharge).await;
                return Err(e.into());
            }
        };
        let caption = format!(
            "Order {ref_id}\nTransfer EXACTLY {total} (surcharge {surcharge} included).\n\
             Payment window: {} minutes. Reply /batal to cancel.",
            self.config.poll.order_ttl_ms / 60_000
        );
        let message_id = match self.chat.send_photo(buyer, &qr_path, &caption).await {
            Ok(id) => id,
            Err(e) => {
                remove_qr_file(&qr_path).await;
                self.rollback_order(buyer, surcharge).await;
                return Err(e.into());
            }
        };

        let expires_at = self.store.write(|doc| {
            doc.orders.get_mut(&buyer).map(|o| {
                o.message_id = Some(message_id);
                o.qr_path = Some(qr_path.clone());
                o.expires_at
            })
        });
        let Some(expires_at) = expires_at else {
            // Cancelled in the window between insert and announce; the
            // cancel path already released the code.
            remove_qr_file(&qr_path).await;
            return Err(OrderError::NoActiveOrder);
        };
        self.persist.request_save();

        let token = self.shutdown.child_token();
        self.polling.insert(buyer, token.clone());
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.run_polling(buyer, token).await;
        });

        Ok(OrderAck {
            ref_id,
            total,
            surcharge,
            expires_at,
        })
    }

    /// Undo a half-created order after a delivery failure.
    async fn rollback_order(&self, buyer: i64, surcharge: u32) {
        let removed = self.store.write(|doc| doc.orders.remove(&buyer));
        if removed.is_some() {
            self.allocator.release(surcharge, false);
            self.persist.request_save();
        }
        warn!(buyer, surcharge, "Order rolled back before announcement");
    }

    // ==========================================================
    // Polling
    // ==========================================================

    /// Per-order reconciliation loop.
    ///
    /// Three independent ceilings: the order's own expiry, the tick
    /// count, and an absolute wall-clock limit from loop entry. Each
    /// tick places the feed call under its own hard timeout so one
    /// hung request cannot stall the loop past its ceilings.
    async fn run_polling(self: Arc<Self>, buyer: i64, token: CancellationToken) {
        let policy = self.config.poll;
        let started = Instant::now();
        let mut retries: u32 = 0;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(policy.interval_ms)) => {}
                _ = token.cancelled() => {
                    debug!(buyer, "Polling task cancelled");
                    break;
                }
            }

            // Snapshot the order; gone means settled or cancelled by
            // someone else.
            let snapshot = self.store.read(|doc| doc.orders.get(&buyer).cloned());
            let Some(order) = snapshot else {
                break;
            };

            if order.is_expired(shared::now_millis()) {
                self.finish_failure(buyer, FailReason::Expired).await;
                break;
            }

            retries += 1;
            if retries > policy.max_retries
                || started.elapsed() >= Duration::from_millis(policy.absolute_timeout_ms)
            {
                self.finish_failure(buyer, FailReason::RetriesExhausted).await;
                break;
            }

            let creds = self.store.read(|doc| doc.feed.clone());
            let fetch = tokio::time::timeout(
                Duration::from_millis(policy.feed_timeout_ms),
                self.feed.fetch_mutations(&creds),
            );
            let mutations = match fetch.await {
                Err(_) => {
                    warn!(buyer, retries, "Feed call timed out, will retry");
                    continue;
                }
                Ok(Err(e)) if e.is_auth() => {
                    error!(buyer, error = %e, "Feed authentication failed, escalating");
                    self.finish_failure(buyer, FailReason::AuthFailure(e.to_string()))
                        .await;
                    break;
                }
                Ok(Err(e)) => {
                    warn!(buyer, retries, error = %e, "Feed call failed, will retry");
                    continue;
                }
                Ok(Ok(m)) => m,
            };

            if find_match(&mutations, order.total, &order.ref_id).is_some() {
                info!(buyer, ref_id = %order.ref_id, total = order.total, "Payment matched");
                self.settle(buyer).await;
                break;
            }
            debug!(buyer, retries, "No matching mutation yet");
        }

        self.polling.remove(&buyer);
    }

    // ==========================================================
    // Settlement
    // ==========================================================

    /// Settle a paid order.
    ///
    /// Claims the order by removing it from the table; a `None` claim
    /// means cancel or expiry won the race and nothing happens here.
    /// The buyer is acknowledged as soon as the claim lands, before
    /// the stock re-check. Stock is popped, `sold` advanced and the
    /// ledger appended inside one write closure. The surcharge code is
    /// released settled as the very last step.
    async fn settle(&self, buyer: i64) {
        let Some(order) = self.store.write(|doc| doc.orders.remove(&buyer)) else {
            return;
        };

        self.remove_prompt(buyer, &order).await;
        if let Err(e) = self
            .chat
            .send_message(
                buyer,
                &format!("Payment received for order {}. Preparing your items...", order.ref_id),
            )
            .await
        {
            warn!(buyer, error = %e, "Failed to acknowledge payment");
        }

        let now_utc = Utc::now();
        let fulfilment = self.store.write(|doc| {
            let mut rng = rand::thread_rng();
            let Some(product) = doc.products.get_mut(&order.product_id) else {
                return None;
            };
            if product.stock.len() < order.quantity as usize {
                // Oversold between creation and payment. The payment is
                // real, so the sale stands; delivery goes manual.
                return Some((Vec::new(), product.name.clone(), String::new(), 0));
            }
            let items: Vec<String> = product.stock.drain(..order.quantity as usize).collect();
            product.sold += order.quantity as u64;
            let days = product.duration.sample_days(&mut rng);

            let tz = self.config.timezone;
            let start = now_utc.with_timezone(&tz);
            let expire = start + chrono::Duration::days(days as i64);
            doc.ledger.push(LedgerEntry {
                ref_id: order.ref_id.clone(),
                product_id: order.product_id.clone(),
                buyer,
                unit_price: product.price,
                quantity: order.quantity,
                profit_each: product.profit,
                surcharge: order.surcharge,
                status: "settled".to_string(),
                start: start.format("%Y-%m-%d %H:%M:%S").to_string(),
                expire: expire.format("%Y-%m-%d %H:%M:%S").to_string(),
                remaining_days: days,
                created_at: start.format("%Y-%m-%d %H:%M:%S").to_string(),
            });
            Some((items, product.name.clone(), product.terms.clone(), days))
        });

        match fulfilment {
            Some((items, name, terms, days)) if !items.is_empty() => {
                let mut body = format!(
                    "Order {}: {} x{}.\nActive for {} days.\n\n",
                    order.ref_id, name, order.quantity, days
                );
                for item in &items {
                    body.push_str(item);
                    body.push('\n');
                }
                if !terms.is_empty() {
                    body.push('\n');
                    body.push_str(&terms);
                }
                if let Err(e) = self.chat.send_message(buyer, &body).await {
                    error!(buyer, error = %e, "Failed to deliver purchased items");
                }
                self.notify_operator(&format!(
                    "Sale settled: {} x{} for buyer {} (ref {}, total {})",
                    name, order.quantity, buyer, order.ref_id, order.total
                ))
                .await;
                info!(buyer, ref_id = %order.ref_id, items = items.len(), "Order settled");
            }
            Some((_, name, _, _)) => {
                if let Err(e) = self
                    .chat
                    .send_message(
                        buyer,
                        &format!(
                            "Stock ran out for order {}; your items will be \
                             delivered manually shortly.",
                            order.ref_id
                        ),
                    )
                    .await
                {
                    error!(buyer, error = %e, "Failed to notify buyer of manual fulfilment");
                }
                self.notify_operator(&format!(
                    "MANUAL FULFILMENT needed: {} x{} for buyer {} (ref {}, total {})",
                    name, order.quantity, buyer, order.ref_id, order.total
                ))
                .await;
                warn!(buyer, ref_id = %order.ref_id, "Settled with manual fulfilment");
            }
            None => {
                // Product vanished from the catalog while pending.
                self.notify_operator(&format!(
                    "Paid order {} references missing product '{}' (buyer {})",
                    order.ref_id, order.product_id, buyer
                ))
                .await;
                error!(buyer, product = %order.product_id, "Settled order had no product");
            }
        }

        self.persist.request_save();
        // Released last: the code must already be in the exclusion
        // history by the time it could be redrawn.
        self.allocator.release(order.surcharge, true);
    }

    // ==========================================================
    // Cancel and failure
    // ==========================================================

    /// Buyer-initiated cancellation.
    pub async fn cancel_order(&self, buyer: i64) -> Result<(), OrderError> {
        let Some(order) = self.store.write(|doc| doc.orders.remove(&buyer)) else {
            return Err(OrderError::NoActiveOrder);
        };
        if let Some((_, token)) = self.polling.remove(&buyer) {
            token.cancel();
        }

        self.remove_prompt(buyer, &order).await;
        self.allocator.release(order.surcharge, false);
        self.persist.request_save();

        if let Err(e) = self
            .chat
            .send_message(buyer, &format!("Order {} cancelled.", order.ref_id))
            .await
        {
            warn!(buyer, error = %e, "Failed to confirm cancellation");
        }
        info!(buyer, ref_id = %order.ref_id, "Order cancelled by buyer");
        Ok(())
    }

    /// Shared terminal path for expiry, exhausted retries and auth
    /// failures. Claims the order like settlement does.
    async fn finish_failure(&self, buyer: i64, reason: FailReason) {
        let Some(order) = self.store.write(|doc| doc.orders.remove(&buyer)) else {
            return;
        };

        self.remove_prompt(buyer, &order).await;
        self.allocator.release(order.surcharge, false);
        self.persist.request_save();

        let buyer_text = match &reason {
            FailReason::Expired => format!(
                "Order {} expired without a matching payment. \
                 If you already paid, contact the operator with this reference.",
                order.ref_id
            ),
            FailReason::RetriesExhausted => format!(
                "Payment check for order {} timed out. \
                 If you already paid, contact the operator with this reference.",
                order.ref_id
            ),
            FailReason::AuthFailure(_) => format!(
                "Payment check for order {} is temporarily unavailable. \
                 The operator has been notified.",
                order.ref_id
            ),
        };
        if let Err(e) = self.chat.send_message(buyer, &buyer_text).await {
            warn!(buyer, error = %e, "Failed to notify buyer of order failure");
        }

        if let FailReason::AuthFailure(detail) = &reason {
            self.notify_operator(&format!(
                "Transaction feed credentials rejected while polling order {} \
                 (buyer {}): {}. Polling stopped; refresh the credentials.",
                order.ref_id, buyer, detail
            ))
            .await;
        }

        warn!(buyer, ref_id = %order.ref_id, ?reason, "Order failed");
    }

    /// Delete the payment prompt message and its QR file.
    async fn remove_prompt(&self, buyer: i64, order: &Order) {
        if let Some(message_id) = order.message_id {
            if let Err(e) = self.chat.delete_message(buyer, message_id).await {
                debug!(buyer, message_id, error = %e, "Payment prompt already gone");
            }
        }
        if let Some(path) = &order.qr_path {
            remove_qr_file(path).await;
        }
    }

    async fn notify_operator(&self, text: &str) {
        if self.config.operator_chat_id == 0 {
            return;
        }
        if let Err(e) = self
            .chat
            .send_message(self.config.operator_chat_id, text)
            .await
        {
            error!(error = %e, "Failed to notify operator");
        }
    }

    // ==========================================================
    // Views
    // ==========================================================

    /// Snapshot of pending orders, for status commands.
    pub fn active_orders(&self) -> Vec<(i64, Order)> {
        self.store
            .read(|doc| doc.orders.iter().map(|(k, v)| (*k, v.clone())).collect())
    }

    /// Full settlement ledger, for status commands.
    pub fn ledger(&self) -> Vec<LedgerEntry> {
        self.store.read(|doc| doc.ledger.clone())
    }

    /// Ledger rows with their active flag, computed against the store
    /// timezone. A sale is active while its `expire` timestamp lies in
    /// the future; an unparseable timestamp counts as expired.
    pub fn ledger_status(&self) -> Vec<(LedgerEntry, bool)> {
        let tz = self.config.timezone;
        let now = Utc::now().with_timezone(&tz);
        self.store.read(|doc| {
            doc.ledger
                .iter()
                .map(|entry| {
                    let active =
                        NaiveDateTime::parse_from_str(&entry.expire, "%Y-%m-%d %H:%M:%S")
                            .ok()
                            .and_then(|naive| tz.from_local_datetime(&naive).earliest())
                            .map(|expire| expire > now)
                            .unwrap_or(false);
                    (entry.clone(), active)
                })
                .collect()
        })
    }

    pub fn polling_count(&self) -> usize {
        self.polling.len()
    }
}
