use super::{Determination, Mechanism, MechanismKind, compare_bids};
use crate::auction::registry::ClosedRound;
use crate::auction::types::RobotId;
use std::collections::HashSet;

/// Sequential single-item auction
///
/// Items are auctioned one after another in ascending id order. Each goes to
/// the cheapest bidder that has not already won an item in this round.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential {
    pub reauction_tiebreak: bool,
}

impl Mechanism for Sequential {
    fn kind(&self) -> MechanismKind {
        MechanismKind::Sequential
    }

    fn determine(&self, round: &ClosedRound) -> Determination {
        let mut result = Determination::new(round.round_id);
        let mut busy: HashSet<RobotId> = HashSet::new();

        // ClosedRound keeps items sorted by id
        for item in &round.items {
            let best = round
                .bids_for(item.id())
                .filter(|b| !busy.contains(&b.robot_id))
                .min_by(|a, b| compare_bids((a, item), (b, item), self.reauction_tiebreak));

            if let Some(bid) = best {
                busy.insert(bid.robot_id.clone());
                result.award(item, bid);
            }
        }

        result.finish(round)
    }
}
