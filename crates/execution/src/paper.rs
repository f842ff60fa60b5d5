use async_trait::async_trait;
use chrono::Utc;
use predmarket_core::{
    CancelAck, ExchangeClient, ExchangeError, MarketFilter, MarketSnapshot, OrderProposal,
    OrderResult, Side,
};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// Paper trading venue: simulates quotes and fills with configurable
/// slippage and makes zero network calls. It is impossible to execute a
/// real trade through this client.
///
/// Used for paper runs and tests; a real venue adapter implements the same
/// `ExchangeClient` trait outside this workspace.
pub struct PaperExchangeClient {
    markets: Mutex<HashMap<String, MarketSnapshot>>,
    filled: Mutex<HashSet<Uuid>>,
    slippage_bps: Decimal,
    /// Remaining forced transient failures, for exercising retry paths.
    forced_failures: AtomicU32,
}

impl PaperExchangeClient {
    #[must_use]
    pub fn new(slippage_bps: u32) -> Self {
        Self {
            markets: Mutex::new(HashMap::new()),
            filled: Mutex::new(HashSet::new()),
            slippage_bps: Decimal::from(slippage_bps) / Decimal::from(10_000),
            forced_failures: AtomicU32::new(0),
        }
    }

    /// Seeds or replaces a simulated market.
    pub fn seed_market(&self, snapshot: MarketSnapshot) {
        self.markets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(snapshot.market_id.clone(), snapshot);
    }

    /// Moves a seeded market's quote, keeping the book one cent wide.
    pub fn move_price(&self, market_id: &str, price: Decimal) {
        let mut markets = self.markets.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(snapshot) = markets.get_mut(market_id) {
            snapshot.price = price;
            snapshot.yes_bid = (price - Decimal::new(1, 2)).max(Decimal::ZERO);
            snapshot.yes_ask = (price + Decimal::new(1, 2)).min(Decimal::ONE);
            snapshot.timestamp = Utc::now();
        }
    }

    /// The next `count` submissions fail with a transient transport error.
    pub fn force_failures(&self, count: u32) {
        self.forced_failures.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExchangeClient for PaperExchangeClient {
    async fn list_markets(
        &self,
        filter: &MarketFilter,
    ) -> Result<Vec<MarketSnapshot>, ExchangeError> {
        let markets = self.markets.lock().unwrap_or_else(|e| e.into_inner());
        let mut listed: Vec<MarketSnapshot> = markets
            .values()
            .filter(|m| {
                (filter.categories.is_empty() || filter.categories.contains(&m.category))
                    && m.volume_24h >= filter.min_volume
            })
            .cloned()
            .map(|mut m| {
                m.timestamp = Utc::now();
                m
            })
            .collect();
        listed.sort_by(|a, b| b.volume_24h.cmp(&a.volume_24h));
        if filter.max_markets > 0 {
            listed.truncate(filter.max_markets);
        }
        Ok(listed)
    }

    async fn submit_order(
        &self,
        proposal: &OrderProposal,
    ) -> Result<OrderResult, ExchangeError> {
        let remaining = self.forced_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.forced_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ExchangeError::Transport("simulated outage".to_string()));
        }

        let markets = self.markets.lock().unwrap_or_else(|e| e.into_inner());
        let Some(snapshot) = markets.get(&proposal.market_id) else {
            return Ok(OrderResult::Rejected {
                reason: format!("unknown market {}", proposal.market_id),
            });
        };

        let quote = match proposal.side {
            Side::Yes => snapshot.yes_ask,
            Side::No => Decimal::ONE - snapshot.yes_bid,
        };
        // Entries pay slippage up, exits give it back down.
        let slip = quote * self.slippage_bps;
        let fill_price = if proposal.is_exit {
            (quote - slip).max(Decimal::ZERO)
        } else {
            (quote + slip).min(Decimal::ONE)
        };

        self.filled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(proposal.id);

        Ok(OrderResult::Filled {
            fill_price,
            contracts: proposal.contracts,
        })
    }

    async fn cancel_order(&self, proposal_id: Uuid) -> Result<CancelAck, ExchangeError> {
        let filled = self.filled.lock().unwrap_or_else(|e| e.into_inner());
        if filled.contains(&proposal_id) {
            Ok(CancelAck::AlreadyFilled)
        } else {
            Ok(CancelAck::Cancelled)
        }
    }
}
