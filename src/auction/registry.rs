//! Bid Registry: per-round collection of bids with a deadline
//!
//! Each open round has its own book guarded by a mutex, so concurrent
//! submissions to one round are serialized while distinct rounds proceed
//! independently. A round closes on its deadline regardless of how many
//! robots replied.

use super::clock::Clock;
use super::types::{Item, ItemBid, ItemId, RobotId, RoundId, Timestamp};
use crate::error::{Error, Result};
use crate::{auction_debug, auction_warn};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// An item as offered in a round
#[derive(Debug, Clone, PartialEq)]
pub struct RoundItem {
    pub item: Item,
    /// Item was taken away from a robot and is being offered again
    pub reauction: bool,
    /// Robot that held the item before it was re-auctioned
    pub previous_holder: Option<RobotId>,
}

impl RoundItem {
    pub fn fresh(item: Item) -> Self {
        Self {
            item,
            reauction: false,
            previous_holder: None,
        }
    }

    pub fn id(&self) -> &ItemId {
        &self.item.item_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BookStatus {
    Open,
    Closed,
    Abandoned,
}

#[derive(Debug)]
struct RoundBook {
    items: BTreeMap<ItemId, RoundItem>,
    deadline: Timestamp,
    bids: BTreeMap<(ItemId, RobotId), ItemBid>,
    status: BookStatus,
    late: usize,
}

/// Frozen bid set of a round that stopped accepting bids
///
/// Items are ordered by id and bids by (item, robot), so consumers never see
/// arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedRound {
    pub round_id: RoundId,
    pub deadline: Timestamp,
    pub items: Vec<RoundItem>,
    pub bids: Vec<ItemBid>,
    /// Bids rejected because they arrived after the deadline
    pub late_bids: usize,
}

impl ClosedRound {
    pub fn item(&self, item_id: &ItemId) -> Option<&RoundItem> {
        self.items.iter().find(|i| i.id() == item_id)
    }

    pub fn bids_for<'a>(&'a self, item_id: &'a ItemId) -> impl Iterator<Item = &'a ItemBid> + 'a {
        self.bids.iter().filter(move |b| &b.item_id == item_id)
    }
}

#[derive(Debug)]
pub struct BidRegistry {
    clock: Arc<dyn Clock>,
    rounds: RwLock<HashMap<RoundId, Arc<Mutex<RoundBook>>>>,
}

impl BidRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            rounds: RwLock::new(HashMap::new()),
        }
    }

    /// Start collecting bids for `items` until `deadline`
    pub fn open(&self, round_id: RoundId, items: Vec<RoundItem>, deadline: Timestamp) -> Result<()> {
        let mut rounds = self.rounds.write();
        if rounds.contains_key(&round_id) {
            return Err(Error::StateError(format!("round {} is already open", round_id)));
        }
        let items = items.into_iter().map(|i| (i.id().clone(), i)).collect();
        rounds.insert(
            round_id,
            Arc::new(Mutex::new(RoundBook {
                items,
                deadline,
                bids: BTreeMap::new(),
                status: BookStatus::Open,
                late: 0,
            })),
        );
        Ok(())
    }

    /// Record one bid. Duplicates are rejected, never overwritten.
    pub fn submit(&self, round_id: RoundId, bid: ItemBid) -> Result<()> {
        let book = self.book(round_id)?;
        let mut book = book.lock();

        if book.status != BookStatus::Open {
            auction_debug!("dropping bid from {} for closed round {}", bid.robot_id, round_id);
            return Err(Error::StaleRound(round_id));
        }
        let now = self.clock.now();
        if now > book.deadline {
            book.late += 1;
            auction_warn!(
                "late bid from {} for item {} in round {} (now {}, deadline {})",
                bid.robot_id,
                bid.item_id,
                round_id,
                now,
                book.deadline
            );
            return Err(Error::StaleRound(round_id));
        }
        if !book.items.contains_key(&bid.item_id) {
            return Err(Error::UnknownItem {
                round: round_id,
                item: bid.item_id,
            });
        }
        bid.validate()?;

        let key = (bid.item_id.clone(), bid.robot_id.clone());
        if book.bids.contains_key(&key) {
            return Err(Error::DuplicateBid {
                round: round_id,
                item: key.0,
                robot: key.1,
            });
        }
        auction_debug!(
            "round {}: {} bid {} on {}",
            round_id,
            bid.robot_id,
            bid.marginal(),
            bid.item_id
        );
        book.bids.insert(key, bid);
        Ok(())
    }

    /// Stop accepting bids and hand back the frozen bid set
    pub fn close(&self, round_id: RoundId) -> Result<ClosedRound> {
        let book = self.book(round_id)?;
        let mut book = book.lock();
        if book.status != BookStatus::Open {
            return Err(Error::StaleRound(round_id));
        }
        book.status = BookStatus::Closed;
        let closed = ClosedRound {
            round_id,
            deadline: book.deadline,
            items: book.items.values().cloned().collect(),
            bids: std::mem::take(&mut book.bids).into_values().collect(),
            late_bids: book.late,
        };
        Ok(closed)
    }

    /// Discard every pending bid of a round; nothing from it is committed
    pub fn abandon(&self, round_id: RoundId) -> Result<usize> {
        let book = self.book(round_id)?;
        let mut book = book.lock();
        if book.status != BookStatus::Open {
            return Err(Error::StaleRound(round_id));
        }
        book.status = BookStatus::Abandoned;
        let discarded = book.bids.len();
        book.bids.clear();
        Ok(discarded)
    }

    pub fn is_expired(&self, round_id: RoundId) -> bool {
        match self.rounds.read().get(&round_id) {
            Some(book) => self.clock.now() > book.lock().deadline,
            None => true,
        }
    }

    pub fn bid_count(&self, round_id: RoundId) -> usize {
        self.rounds
            .read()
            .get(&round_id)
            .map(|b| b.lock().bids.len())
            .unwrap_or(0)
    }

    /// Forget books of rounds that are no longer open
    pub fn prune(&self) {
        self.rounds.write().retain(|_, b| b.lock().status == BookStatus::Open);
    }

    fn book(&self, round_id: RoundId) -> Result<Arc<Mutex<RoundBook>>> {
        self.rounds
            .read()
            .get(&round_id)
            .cloned()
            .ok_or(Error::StaleRound(round_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::clock::SimClock;
    use crate::auction::types::Cost;
    use std::time::Duration;

    fn setup() -> (Arc<SimClock>, BidRegistry) {
        let clock = Arc::new(SimClock::new());
        let registry = BidRegistry::new(clock.clone());
        let items = vec![
            RoundItem::fresh(Item::new("i1", [1, 0, 0, 0, 0, 0], "s1")),
            RoundItem::fresh(Item::new("i2", [0, 1, 0, 0, 0, 0], "s2")),
        ];
        registry.open(RoundId(1), items, Timestamp::from_millis(100)).unwrap();
        (clock, registry)
    }

    fn bid(item: &str, robot: &str, marginal: f64) -> ItemBid {
        ItemBid::new(item, robot, Cost::new(marginal, marginal), Cost::new(marginal, marginal))
    }

    #[test]
    fn test_submit_and_close() {
        let (_clock, registry) = setup();
        registry.submit(RoundId(1), bid("i1", "r2", 3.0)).unwrap();
        registry.submit(RoundId(1), bid("i1", "r1", 5.0)).unwrap();
        assert_eq!(registry.bid_count(RoundId(1)), 2);

        let closed = registry.close(RoundId(1)).unwrap();
        assert_eq!(closed.items.len(), 2);
        // sorted by (item, robot), not arrival
        assert_eq!(closed.bids[0].robot_id, RobotId::from("r1"));
        assert_eq!(closed.bids_for(&ItemId::from("i2")).count(), 0);
    }

    #[test]
    fn test_duplicate_rejected() {
        let (_clock, registry) = setup();
        registry.submit(RoundId(1), bid("i1", "r1", 5.0)).unwrap();
        let err = registry.submit(RoundId(1), bid("i1", "r1", 1.0)).unwrap_err();
        assert!(matches!(err, Error::DuplicateBid { .. }));

        let closed = registry.close(RoundId(1)).unwrap();
        assert_eq!(closed.bids.len(), 1);
        assert_eq!(closed.bids[0].marginal_distance_cost, 5.0);
    }

    #[test]
    fn test_unknown_item_and_round() {
        let (_clock, registry) = setup();
        assert!(matches!(
            registry.submit(RoundId(1), bid("i9", "r1", 1.0)),
            Err(Error::UnknownItem { .. })
        ));
        assert_eq!(
            registry.submit(RoundId(7), bid("i1", "r1", 1.0)),
            Err(Error::StaleRound(RoundId(7)))
        );
    }

    #[test]
    fn test_closed_round_is_stale() {
        let (_clock, registry) = setup();
        registry.close(RoundId(1)).unwrap();
        assert_eq!(
            registry.submit(RoundId(1), bid("i1", "r1", 1.0)),
            Err(Error::StaleRound(RoundId(1)))
        );
        assert_eq!(registry.close(RoundId(1)), Err(Error::StaleRound(RoundId(1))));
    }

    #[test]
    fn test_late_bid_dropped() {
        let (clock, registry) = setup();
        clock.advance(Duration::from_millis(101));
        assert!(registry.is_expired(RoundId(1)));
        assert_eq!(
            registry.submit(RoundId(1), bid("i1", "r1", 1.0)),
            Err(Error::StaleRound(RoundId(1)))
        );
        let closed = registry.close(RoundId(1)).unwrap();
        assert!(closed.bids.is_empty());
        assert_eq!(closed.late_bids, 1);
    }

    #[test]
    fn test_abandon_discards() {
        let (_clock, registry) = setup();
        registry.submit(RoundId(1), bid("i1", "r1", 1.0)).unwrap();
        assert_eq!(registry.abandon(RoundId(1)), Ok(1));
        assert_eq!(registry.close(RoundId(1)), Err(Error::StaleRound(RoundId(1))));
        registry.prune();
        assert_eq!(registry.bid_count(RoundId(1)), 0);
    }

    #[test]
    fn test_concurrent_duplicates_accept_exactly_one() {
        let (_clock, registry) = setup();
        let registry = Arc::new(registry);
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.submit(RoundId(1), bid("i1", "r1", n as f64)).is_ok())
            })
            .collect();
        let accepted = handles.into_iter().filter_map(|h| h.join().ok()).filter(|ok| *ok).count();
        assert_eq!(accepted, 1);
    }
}
