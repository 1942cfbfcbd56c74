use super::{Determination, Mechanism, MechanismKind, compare_bids};
use crate::auction::registry::{ClosedRound, RoundItem};
use crate::auction::types::{ItemBid, ItemId, RobotId};
use std::collections::HashSet;

/// Global cheapest-first assignment over every (item, robot) bid
///
/// All bids are ranked by marginal distance (ties: marginal time, robot id,
/// item id) and taken in order, skipping bids whose item is already placed or
/// whose robot already won this round.
#[derive(Debug, Clone, Copy, Default)]
pub struct Greedy {
    pub reauction_tiebreak: bool,
}

impl Mechanism for Greedy {
    fn kind(&self) -> MechanismKind {
        MechanismKind::Greedy
    }

    fn determine(&self, round: &ClosedRound) -> Determination {
        let mut ranked: Vec<(&ItemBid, &RoundItem)> = round
            .bids
            .iter()
            .filter_map(|b| round.item(&b.item_id).map(|i| (b, i)))
            .collect();
        ranked.sort_by(|a, b| {
            compare_bids(*a, *b, self.reauction_tiebreak).then_with(|| a.0.item_id.cmp(&b.0.item_id))
        });

        let mut result = Determination::new(round.round_id);
        let mut placed: HashSet<&ItemId> = HashSet::new();
        let mut busy: HashSet<&RobotId> = HashSet::new();

        for (bid, item) in ranked {
            if placed.contains(&bid.item_id) || busy.contains(&bid.robot_id) {
                continue;
            }
            placed.insert(&bid.item_id);
            busy.insert(&bid.robot_id);
            result.award(item, bid);
        }

        result.finish(round)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::mechanism::test_support::*;

    #[test]
    fn test_lowest_marginal_distance_wins() {
        let closed = round(1, vec![item("i1")], vec![bid("i1", "r1", 5.0, 1.0), bid("i1", "r2", 3.0, 9.0)]);
        let result = Greedy::default().determine(&closed);
        assert_eq!(result.winner_of(&ItemId::from("i1")), Some(&RobotId::from("r2")));
        assert!(result.unassigned.is_empty());
    }

    #[test]
    fn test_tie_broken_by_marginal_time_then_robot_id() {
        let closed = round(1, vec![item("i4")], vec![bid("i4", "r2", 4.0, 3.0), bid("i4", "r1", 4.0, 2.0)]);
        let result = Greedy::default().determine(&closed);
        assert_eq!(result.winner_of(&ItemId::from("i4")), Some(&RobotId::from("r1")));

        let closed = round(1, vec![item("i4")], vec![bid("i4", "r2", 4.0, 2.0), bid("i4", "r1", 4.0, 2.0)]);
        let result = Greedy::default().determine(&closed);
        assert_eq!(result.winner_of(&ItemId::from("i4")), Some(&RobotId::from("r1")));
    }

    #[test]
    fn test_one_item_per_robot() {
        // r1 is cheapest for both items; it takes the cheaper one, r2 gets the other
        let closed = round(
            1,
            vec![item("a"), item("b")],
            vec![
                bid("a", "r1", 1.0, 1.0),
                bid("b", "r1", 2.0, 1.0),
                bid("b", "r2", 6.0, 1.0),
            ],
        );
        let result = Greedy::default().determine(&closed);
        assert_eq!(result.winner_of(&ItemId::from("a")), Some(&RobotId::from("r1")));
        assert_eq!(result.winner_of(&ItemId::from("b")), Some(&RobotId::from("r2")));
    }

    #[test]
    fn test_items_without_bids_are_unassigned() {
        let closed = round(1, vec![item("i1"), item("i2")], vec![bid("i1", "r1", 1.0, 1.0)]);
        let result = Greedy::default().determine(&closed);
        assert_eq!(result.unassigned, vec![ItemId::from("i2")]);
    }

    #[test]
    fn test_robot_exhaustion_leaves_items_unassigned() {
        let closed = round(
            1,
            vec![item("a"), item("b")],
            vec![bid("a", "r1", 1.0, 1.0), bid("b", "r1", 2.0, 1.0)],
        );
        let result = Greedy::default().determine(&closed);
        assert_eq!(result.awards.len(), 1);
        assert_eq!(result.unassigned, vec![ItemId::from("b")]);
    }
}
