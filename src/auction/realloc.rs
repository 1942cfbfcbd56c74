//! Reallocation Controller
//!
//! Takes committed items away from their holder when the holder fails,
//! drops out, reports an infeasible precondition or lets a time window lapse.
//! With `reallocate` on, items also move when another robot can build one for
//! less than its holder would save by dropping it, and every committed item
//! is put up again when scripted items arrive. The removed items come back as
//! [`Reoffer`]s for the auctioneer's backlog.

use super::agenda::AgendaManager;
use super::clock::Clock;
use super::mechanism::compare_bids;
use super::registry::ClosedRound;
use super::types::{Cost, Item, ItemBid, ItemId, RobotId, Timestamp};
use crate::error::{Error, Infeasibility, Result};
use crate::{auction_info, auction_warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Why an item went back to auction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum ReallocationCause {
    Failed,
    Dropout,
    Infeasible { reason: Infeasibility },
    Undercut { saving: Cost, quote: Cost, bidder: RobotId },
    /// New items arrived and everything unbuilt is allocated again with them
    Arrivals,
}

impl std::fmt::Display for ReallocationCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed => write!(f, "execution failed"),
            Self::Dropout => write!(f, "robot dropped out"),
            Self::Infeasible { reason } => write!(f, "{}", reason),
            Self::Undercut { saving, quote, bidder } => {
                write!(f, "{} quoted {} against a saving of {}", bidder, quote, saving)
            }
            Self::Arrivals => write!(f, "new items arrived"),
        }
    }
}

/// An item removed from its holder that must be auctioned again
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reoffer {
    pub item: Item,
    pub previous_holder: RobotId,
    pub cause: ReallocationCause,
}

/// A quote found cheaper than what its holder saves by letting the item go
#[derive(Debug, Clone, PartialEq)]
pub struct Undercut {
    pub item_id: ItemId,
    pub holder: RobotId,
    pub saving: Cost,
    pub quote: ItemBid,
}

#[derive(Debug)]
pub struct ReallocationController {
    agendas: Arc<AgendaManager>,
    clock: Arc<dyn Clock>,
    reallocate: bool,
    audit_interval: Duration,
    last_audit: Mutex<Timestamp>,
}

impl ReallocationController {
    pub fn new(agendas: Arc<AgendaManager>, clock: Arc<dyn Clock>, reallocate: bool, audit_interval: Duration) -> Self {
        let now = clock.now();
        Self {
            agendas,
            clock,
            reallocate,
            audit_interval,
            last_audit: Mutex::new(now),
        }
    }

    /// The holder could not build the item
    pub fn on_failure(&self, robot_id: &RobotId, item_id: &ItemId, revised: Option<Cost>) -> Result<Reoffer> {
        self.take(robot_id, item_id, revised, ReallocationCause::Failed)
    }

    /// The holder reported that a precondition no longer holds
    pub fn on_infeasible(&self, robot_id: &RobotId, item_id: &ItemId, reason: Infeasibility) -> Result<Reoffer> {
        self.take(robot_id, item_id, None, ReallocationCause::Infeasible { reason })
    }

    /// Every item of a departed robot goes back to auction and the robot is forgotten
    pub fn on_dropout(&self, robot_id: &RobotId) -> Result<Vec<Reoffer>> {
        let entries = self.agendas.deregister(robot_id)?;
        auction_warn!("{}", Error::RobotDropout(robot_id.clone()));
        Ok(entries
            .into_iter()
            .map(|e| {
                auction_info!("re-auctioning {} from {}: robot dropped out", e.item_id(), robot_id);
                Reoffer {
                    item: e.item,
                    previous_holder: robot_id.clone(),
                    cause: ReallocationCause::Dropout,
                }
            })
            .collect())
    }

    /// Pull every committed item whose tightest material window has lapsed
    pub fn sweep(&self) -> Vec<Reoffer> {
        let now = self.clock.now();
        let mut expired = Vec::new();
        for snapshot in self.agendas.snapshot() {
            for entry in &snapshot.entries {
                if let Some((material, window)) = entry.item.time_window()
                    && now > entry.committed_at.saturating_add(window)
                {
                    expired.push((snapshot.robot_id.clone(), entry.item_id().clone(), material));
                }
            }
        }

        let mut reoffers = Vec::new();
        for (robot_id, item_id, material) in expired {
            let reason = Infeasibility::MaterialExpired(material);
            match self.on_infeasible(&robot_id, &item_id, reason) {
                Ok(r) => reoffers.push(r),
                // completed or removed since the snapshot
                Err(e) => auction_warn!("sweep skipped {} on {}: {}", item_id, robot_id, e),
            }
        }
        reoffers
    }

    /// Take every committed item back so it is allocated together with new arrivals
    pub fn on_arrivals(&self) -> Vec<Reoffer> {
        if !self.reallocate {
            return Vec::new();
        }
        let mut reoffers = Vec::new();
        for robot_id in self.agendas.robots() {
            match self.agendas.drain(&robot_id) {
                Ok(entries) => reoffers.extend(entries.into_iter().map(|e| Reoffer {
                    item: e.item,
                    previous_holder: robot_id.clone(),
                    cause: ReallocationCause::Arrivals,
                })),
                Err(e) => auction_warn!("could not clear agenda of {}: {}", robot_id, e),
            }
        }
        if !reoffers.is_empty() {
            auction_info!("re-auctioning {} committed items with new arrivals", reoffers.len());
        }
        reoffers
    }

    pub fn audit_due(&self) -> bool {
        self.reallocate && self.clock.now() >= self.last_audit.lock().saturating_add(self.audit_interval)
    }

    pub fn mark_audited(&self) {
        *self.last_audit.lock() = self.clock.now();
    }

    /// Compare the quotes of an audit round against what each holder would save
    ///
    /// The holder quotes its own item with the cost of its agenda now and
    /// the saving of leaving the item out as marginal. Moving the item lowers
    /// the fleet's total distance only when the cheapest other quote is below
    /// that saving by more than the cost tolerance. Items whose holder sent
    /// no quote stay put.
    pub fn audit(&self, round: &ClosedRound) -> Vec<Undercut> {
        if !self.reallocate {
            return Vec::new();
        }
        let tolerance = self.agendas.tolerance();
        let mut undercuts = Vec::new();

        for item in &round.items {
            let Some(holder) = self.agendas.holder(item.id()) else {
                continue;
            };
            let Some(saving) = round
                .bids_for(item.id())
                .find(|b| b.robot_id == holder)
                .map(|b| b.marginal())
            else {
                auction_warn!("{} sent no quote for its own {}; kept", holder, item.id());
                continue;
            };
            let best = round
                .bids_for(item.id())
                .filter(|b| b.robot_id != holder)
                .min_by(|a, b| compare_bids((a, item), (b, item), false));

            if let Some(quote) = best
                && quote.marginal_distance_cost < saving.distance
                && !tolerance.allows(saving.distance, quote.marginal_distance_cost)
            {
                undercuts.push(Undercut {
                    item_id: item.id().clone(),
                    holder,
                    saving,
                    quote: quote.clone(),
                });
            }
        }
        undercuts
    }

    /// Take an undercut item away from its holder, if it still holds it
    pub fn apply(&self, undercut: &Undercut) -> Result<Reoffer> {
        if self.agendas.holder(&undercut.item_id).as_ref() != Some(&undercut.holder) {
            return Err(Error::StateError(format!(
                "{} no longer holds {}",
                undercut.holder, undercut.item_id
            )));
        }
        self.take(
            &undercut.holder,
            &undercut.item_id,
            None,
            ReallocationCause::Undercut {
                saving: undercut.saving,
                quote: undercut.quote.marginal(),
                bidder: undercut.quote.robot_id.clone(),
            },
        )
    }

    fn take(
        &self,
        robot_id: &RobotId,
        item_id: &ItemId,
        revised: Option<Cost>,
        cause: ReallocationCause,
    ) -> Result<Reoffer> {
        let entry = self.agendas.remove(robot_id, item_id, revised)?;
        auction_info!("re-auctioning {} from {}: {}", item_id, robot_id, cause);
        Ok(Reoffer {
            item: entry.item,
            previous_holder: robot_id.clone(),
            cause,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::agenda::CostTolerance;
    use crate::auction::clock::SimClock;
    use crate::auction::registry::RoundItem;
    use crate::auction::types::{Material, RoundId};

    fn setup(reallocate: bool) -> (Arc<SimClock>, Arc<AgendaManager>, ReallocationController) {
        let clock = Arc::new(SimClock::new());
        let agendas = Arc::new(AgendaManager::new(clock.clone(), CostTolerance::default(), 0));
        agendas.register(&RobotId::from("r1"));
        agendas.register(&RobotId::from("r2"));
        let controller = ReallocationController::new(agendas.clone(), clock.clone(), reallocate, Duration::from_secs(5));
        (clock, agendas, controller)
    }

    fn commit(agendas: &AgendaManager, robot: &str, item: &Item, total: f64, marginal: f64) {
        let bid = ItemBid::new(
            item.item_id.clone(),
            robot,
            Cost::new(total, total),
            Cost::new(marginal, marginal),
        );
        agendas
            .commit(&RobotId::from(robot), item, None, &bid, RoundId(1))
            .unwrap();
    }

    fn audit_round(items: &[&Item], bids: Vec<ItemBid>) -> ClosedRound {
        ClosedRound {
            round_id: RoundId(9),
            deadline: Timestamp(0),
            items: items.iter().map(|i| RoundItem::fresh((*i).clone())).collect(),
            bids,
            late_bids: 0,
        }
    }

    #[test]
    fn test_failure_reoffers_item() {
        let (_clock, agendas, controller) = setup(false);
        let item = Item::new("i1", [1, 0, 0, 0, 0, 0], "s1");
        commit(&agendas, "r1", &item, 5.0, 5.0);

        let reoffer = controller.on_failure(&RobotId::from("r1"), &item.item_id, None).unwrap();
        assert_eq!(reoffer.cause, ReallocationCause::Failed);
        assert_eq!(reoffer.previous_holder, RobotId::from("r1"));
        assert!(agendas.holder(&item.item_id).is_none());
    }

    #[test]
    fn test_dropout_drains_and_deregisters() {
        let (_clock, agendas, controller) = setup(false);
        commit(&agendas, "r1", &Item::new("i1", [1, 0, 0, 0, 0, 0], "s1"), 5.0, 5.0);
        commit(&agendas, "r1", &Item::new("i2", [1, 0, 0, 0, 0, 0], "s2"), 8.0, 3.0);

        let reoffers = controller.on_dropout(&RobotId::from("r1")).unwrap();
        assert_eq!(reoffers.len(), 2);
        assert!(reoffers.iter().all(|r| r.cause == ReallocationCause::Dropout));
        assert!(!agendas.is_registered(&RobotId::from("r1")));
        assert!(controller.on_dropout(&RobotId::from("r1")).is_err());
    }

    #[test]
    fn test_sweep_reoffers_expired_red_item() {
        let (clock, agendas, controller) = setup(false);
        let red = Item::new("red", [0, 1, 0, 0, 0, 0], "s1");
        let grey = Item::new("grey", [1, 0, 0, 0, 0, 0], "s1");
        commit(&agendas, "r1", &red, 5.0, 5.0);
        commit(&agendas, "r2", &grey, 5.0, 5.0);

        clock.advance(Duration::from_secs(120));
        assert!(controller.sweep().is_empty());

        clock.advance(Duration::from_millis(1));
        let reoffers = controller.sweep();
        assert_eq!(reoffers.len(), 1);
        assert_eq!(reoffers[0].item.item_id, red.item_id);
        assert_eq!(
            reoffers[0].cause,
            ReallocationCause::Infeasible {
                reason: Infeasibility::MaterialExpired(Material::Red)
            }
        );
        assert_eq!(agendas.holder(&grey.item_id), Some(RobotId::from("r2")));
    }

    #[test]
    fn test_audit_requires_strictly_cheaper_quote() {
        let (clock, agendas, controller) = setup(true);
        let a = Item::new("a", [1, 0, 0, 0, 0, 0], "s1");
        let b = Item::new("b", [1, 0, 0, 0, 0, 0], "s2");
        commit(&agendas, "r1", &a, 10.0, 10.0);
        commit(&agendas, "r1", &b, 16.0, 6.0);

        assert!(!controller.audit_due());
        clock.advance(Duration::from_secs(5));
        assert!(controller.audit_due());
        controller.mark_audited();
        assert!(!controller.audit_due());

        let round = audit_round(
            &[&a, &b],
            vec![
                ItemBid::new("a", "r1", Cost::new(16.0, 16.0), Cost::new(10.0, 10.0)),
                ItemBid::new("a", "r2", Cost::new(4.0, 4.0), Cost::new(4.0, 4.0)),
                ItemBid::new("b", "r1", Cost::new(16.0, 16.0), Cost::new(6.0, 6.0)),
                // equal within tolerance, not strictly cheaper
                ItemBid::new("b", "r2", Cost::new(6.0, 6.0), Cost::new(5.9995, 6.0)),
            ],
        );
        let undercuts = controller.audit(&round);
        assert_eq!(undercuts.len(), 1);
        assert_eq!(undercuts[0].item_id, a.item_id);

        assert_eq!(undercuts[0].saving, Cost::new(10.0, 10.0));

        let reoffer = controller.apply(&undercuts[0]).unwrap();
        assert!(matches!(reoffer.cause, ReallocationCause::Undercut { .. }));
        assert!(agendas.holder(&a.item_id).is_none());
        assert!(controller.apply(&undercuts[0]).is_err());
    }

    #[test]
    fn test_audit_compares_against_current_saving() {
        let (_clock, agendas, controller) = setup(true);
        let a = Item::new("a", [1, 0, 0, 0, 0, 0], "s1");
        let b = Item::new("b", [1, 0, 0, 0, 0, 0], "s2");
        // a was accepted at 5, but b now sits behind it on the same line
        commit(&agendas, "r1", &a, 5.0, 5.0);
        commit(&agendas, "r1", &b, 10.0, 5.0);

        let round = audit_round(
            &[&a, &b],
            vec![
                ItemBid::new("a", "r1", Cost::new(10.0, 10.0), Cost::ZERO),
                ItemBid::new("a", "r2", Cost::new(1.0, 1.0), Cost::new(1.0, 1.0)),
                ItemBid::new("b", "r1", Cost::new(10.0, 10.0), Cost::new(5.0, 5.0)),
                ItemBid::new("b", "r2", Cost::new(5.1, 5.1), Cost::new(5.1, 5.1)),
            ],
        );
        assert!(controller.audit(&round).is_empty());
    }

    #[test]
    fn test_audit_keeps_items_without_holder_quote() {
        let (_clock, agendas, controller) = setup(true);
        let a = Item::new("a", [1, 0, 0, 0, 0, 0], "s1");
        commit(&agendas, "r1", &a, 10.0, 10.0);

        let round = audit_round(
            &[&a],
            vec![ItemBid::new("a", "r2", Cost::new(1.0, 1.0), Cost::new(1.0, 1.0))],
        );
        assert!(controller.audit(&round).is_empty());
    }

    #[test]
    fn test_arrivals_take_back_every_committed_item() {
        let (_clock, agendas, controller) = setup(true);
        commit(&agendas, "r1", &Item::new("a", [1, 0, 0, 0, 0, 0], "s1"), 5.0, 5.0);
        commit(&agendas, "r1", &Item::new("b", [1, 0, 0, 0, 0, 0], "s2"), 8.0, 3.0);
        commit(&agendas, "r2", &Item::new("c", [1, 0, 0, 0, 0, 0], "s3"), 4.0, 4.0);

        let reoffers = controller.on_arrivals();
        assert_eq!(reoffers.len(), 3);
        assert!(reoffers.iter().all(|r| r.cause == ReallocationCause::Arrivals));
        assert_eq!(
            reoffers.iter().filter(|r| r.previous_holder == RobotId::from("r1")).count(),
            2
        );
        assert!(agendas.all_empty());
        assert!(agendas.is_registered(&RobotId::from("r1")));
        assert_eq!(agendas.agenda(&RobotId::from("r1")).unwrap().cumulative, Cost::ZERO);
    }

    #[test]
    fn test_arrivals_leave_agendas_alone_without_reallocate() {
        let (_clock, agendas, controller) = setup(false);
        commit(&agendas, "r1", &Item::new("a", [1, 0, 0, 0, 0, 0], "s1"), 5.0, 5.0);
        assert!(controller.on_arrivals().is_empty());
        assert_eq!(agendas.holder(&ItemId::from("a")), Some(RobotId::from("r1")));
    }

    #[test]
    fn test_audit_disabled_without_reallocate() {
        let (clock, agendas, controller) = setup(false);
        let a = Item::new("a", [1, 0, 0, 0, 0, 0], "s1");
        commit(&agendas, "r1", &a, 10.0, 10.0);
        clock.advance(Duration::from_secs(60));

        assert!(!controller.audit_due());
        let round = audit_round(
            &[&a],
            vec![ItemBid::new("a", "r2", Cost::new(1.0, 1.0), Cost::new(1.0, 1.0))],
        );
        assert!(controller.audit(&round).is_empty());
    }
}
