use super::agenda::AgendaSnapshot;
use super::auctioneer::RoundOutcome;
use super::types::{ItemId, RobotId};
use std::collections::BTreeMap;

#[macro_export]
macro_rules! auction_info {
    ($($arg:tt)+) => {
        tracing::info!(target: "auction", $($arg)+)
    }
}

#[macro_export]
macro_rules! auction_debug {
    ($($arg:tt)+) => {
        tracing::debug!(target: "auction", $($arg)+)
    }
}

#[macro_export]
macro_rules! auction_warn {
    ($($arg:tt)+) => {
        tracing::warn!(target: "auction", $($arg)+)
    }
}

/// Log what a committed round produced
pub fn log_round_outcome(outcome: &RoundOutcome) {
    auction_info!(
        "Round {} committed: {} assigned, {} bounced, {} unassigned",
        outcome.round_id,
        outcome.assignments.len(),
        outcome.bounced.len(),
        outcome.unassigned.len()
    );
    for a in &outcome.assignments {
        auction_info!(
            "  {} -> {} at position {} (cumulative {})",
            a.item.item_id,
            a.robot_id,
            a.position,
            a.expected_cumulative
        );
    }
    for (item_id, reason) in &outcome.bounced {
        auction_info!("  {} bounced: {}", item_id, reason);
    }
    for e in &outcome.failed {
        auction_info!("  {}", e);
    }
}

/// Log every robot's agenda
pub fn log_agendas(agendas: &[AgendaSnapshot]) {
    auction_info!("Agendas:");
    for agenda in agendas {
        if agenda.entries.is_empty() {
            auction_info!("  {} has an empty agenda", agenda.robot_id);
            continue;
        }
        let items = agenda
            .entries
            .iter()
            .map(|e| e.item_id().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        auction_info!("  {} [{}] cumulative {}", agenda.robot_id, items, agenda.cumulative);
    }
}

/// Log the final item table: who built each item, or that nobody did
pub fn log_assignment_table(completed: &BTreeMap<ItemId, RobotId>, outstanding: &[ItemId]) {
    auction_info!("Final Item Table:");
    for (item_id, robot) in completed {
        auction_info!("{}: {}", item_id, robot);
    }
    for item_id in outstanding {
        auction_info!("{}: None", item_id);
    }
}
