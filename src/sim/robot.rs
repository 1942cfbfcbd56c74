//! Simulated robot: prices announcements, keeps its own agenda and builds
//! items on sim time

use super::cost::CostModel;
use super::types::{Location, RobotSpec};
use crate::auction::agenda::CostTolerance;
use crate::auction::types::{
    Announcement, Assignment, BidMessage, Cost, Item, ItemBid, ItemId, RobotId, RoundPurpose, StatusReport, TaskStatus,
    Timestamp,
};
use crate::bus::{AuctioneerCommand, RobotCommand, RobotEndpoint};
use crate::error::Infeasibility;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
struct ActiveTask {
    item_id: ItemId,
    finishes_at: Timestamp,
}

/// End-of-run view of one robot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RobotSummary {
    pub robot_id: RobotId,
    pub built: Vec<ItemId>,
    pub position: Location,
    pub dropped: bool,
}

pub struct SimRobot {
    spec: RobotSpec,
    position: Location,
    cost_model: Arc<dyn CostModel>,
    tolerance: CostTolerance,
    agenda: Vec<Item>,
    active: Option<ActiveTask>,
    dropout_at: Option<Timestamp>,
    dropped: bool,
    built: Vec<ItemId>,
}

impl SimRobot {
    pub fn new(spec: RobotSpec, start: Location, cost_model: Arc<dyn CostModel>, tolerance: CostTolerance) -> Self {
        Self {
            spec,
            position: start,
            cost_model,
            tolerance,
            agenda: Vec::new(),
            active: None,
            dropout_at: None,
            dropped: false,
            built: Vec::new(),
        }
    }

    pub fn with_dropout(mut self, at: Option<Timestamp>) -> Self {
        self.dropout_at = at;
        self
    }

    pub fn id(&self) -> &RobotId {
        &self.spec.robot_id
    }

    pub fn position(&self) -> Location {
        self.position
    }

    pub fn agenda_ids(&self) -> Vec<ItemId> {
        self.agenda.iter().map(|i| i.item_id.clone()).collect()
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped
    }

    pub fn summary(&self) -> RobotSummary {
        RobotSummary {
            robot_id: self.spec.robot_id.clone(),
            built: self.built.clone(),
            position: self.position,
            dropped: self.dropped,
        }
    }

    /// Remaining agenda cost measured from the current position
    pub fn agenda_cost(&self) -> Option<Cost> {
        self.cost_model.agenda_cost(self.position, self.spec.speed, &self.agenda)
    }

    /// One bid per announced item
    ///
    /// Items already on the agenda are only quoted in audit rounds, where the
    /// marginal is what dropping the item would save right now.
    pub fn on_announcement(&self, announcement: &Announcement) -> Vec<BidMessage> {
        if self.dropped {
            return Vec::new();
        }
        let audit = announcement.purpose == RoundPurpose::Audit;
        announcement
            .items
            .iter()
            .filter(|item| audit || !self.holds(&item.item_id))
            .filter_map(|item| {
                let (total, marginal) = if self.holds(&item.item_id) {
                    self.cost_model
                        .removal_quote(self.position, self.spec.speed, &self.agenda, &item.item_id)?
                } else {
                    self.cost_model
                        .quote(self.position, self.spec.speed, &self.agenda, item)?
                };
                Some(BidMessage {
                    round_id: announcement.round_id,
                    bid: ItemBid::new(item.item_id.clone(), self.spec.robot_id.clone(), total, marginal),
                })
            })
            .collect()
    }

    /// Take a committed item; repeated deliveries are ignored
    ///
    /// Returns a `Revised` report when the auctioneer's idea of the agenda
    /// cost no longer matches ours.
    pub fn on_award(&mut self, assignment: &Assignment) -> Option<StatusReport> {
        if self.dropped || assignment.robot_id != self.spec.robot_id || self.holds(&assignment.item.item_id) {
            return None;
        }
        let position = assignment.position.min(self.agenda.len());
        self.agenda.insert(position, assignment.item.clone());
        debug!(
            "{} accepted {} at position {}",
            self.spec.robot_id, assignment.item.item_id, position
        );

        let own = self.agenda_cost()?;
        if self.tolerance.allows_cost(assignment.expected_cumulative, own) {
            return None;
        }
        warn!(
            "{} expected cumulative {} after {}, computed {}",
            self.spec.robot_id, assignment.expected_cumulative, assignment.item.item_id, own
        );
        Some(self.report(TaskStatus::Revised { cost: own }))
    }

    /// Drop an item the auctioneer took away
    pub fn on_revoke(&mut self, item_id: &ItemId) -> Option<StatusReport> {
        let index = self.agenda.iter().position(|i| &i.item_id == item_id)?;
        self.agenda.remove(index);
        if self.active.as_ref().is_some_and(|a| &a.item_id == item_id) {
            self.active = None;
        }
        info!("{} dropped revoked item {}", self.spec.robot_id, item_id);
        if self.agenda.is_empty() {
            return Some(self.report(TaskStatus::AgendaCleared));
        }
        let cost = self.agenda_cost().unwrap_or(Cost::ZERO);
        Some(self.report(TaskStatus::Revised { cost }))
    }

    /// Execute the agenda up to `now`
    pub fn advance(&mut self, now: Timestamp) -> Vec<StatusReport> {
        if self.dropped {
            return Vec::new();
        }
        if self.dropout_at.is_some_and(|at| at <= now) {
            self.dropped = true;
            self.agenda.clear();
            self.active = None;
            warn!("{} dropping out at {}", self.spec.robot_id, now);
            return vec![self.report(TaskStatus::Dropout)];
        }

        let mut reports = Vec::new();
        if let Some(active) = &self.active
            && active.finishes_at <= now
        {
            let item_id = active.item_id.clone();
            self.active = None;
            if let Some(index) = self.agenda.iter().position(|i| i.item_id == item_id) {
                let item = self.agenda.remove(index);
                if let Some(site) = self.cost_model.site(&item) {
                    self.position = site;
                }
                self.built.push(item_id.clone());
                info!("{} built {} at {}", self.spec.robot_id, item_id, now);
                let revised = self.agenda_cost();
                reports.push(self.report(TaskStatus::Success { item_id, revised }));
                if self.agenda.is_empty() {
                    reports.push(self.report(TaskStatus::AllTasksComplete));
                }
            }
        }

        while self.active.is_none() && !self.agenda.is_empty() {
            let head = self.agenda[0].clone();
            match self.cost_model.agenda_cost(self.position, self.spec.speed, std::slice::from_ref(&head)) {
                Some(cost) => {
                    let finishes_at = now.saturating_add(Duration::from_secs_f64(cost.time.max(0.0)));
                    debug!("{} started {} until {}", self.spec.robot_id, head.item_id, finishes_at);
                    self.active = Some(ActiveTask {
                        item_id: head.item_id,
                        finishes_at,
                    });
                }
                None => {
                    self.agenda.remove(0);
                    reports.push(self.report(TaskStatus::Infeasible {
                        item_id: head.item_id,
                        reason: Infeasibility::SiteUnavailable(head.site),
                    }));
                }
            }
        }
        reports
    }

    fn holds(&self, item_id: &ItemId) -> bool {
        self.agenda.iter().any(|i| &i.item_id == item_id)
    }

    fn report(&self, status: TaskStatus) -> StatusReport {
        StatusReport::new(self.spec.robot_id.clone(), status)
    }
}

/// Serve bus commands until terminated or dropped out
pub async fn run_robot(mut robot: SimRobot, endpoint: RobotEndpoint) -> RobotSummary {
    let RobotEndpoint { writer, mut reader } = endpoint;
    loop {
        let command = match reader.command_stream.recv().await {
            Ok(command) => command,
            Err(RecvError::Lagged(n)) => {
                warn!("{} missed {} commands", robot.id(), n);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        // awards and revocations are applied before anything that depends on the agenda
        let mut reports = Vec::new();
        for direct in reader.drain_direct() {
            let report = match direct {
                RobotCommand::Award(assignment) => robot.on_award(&assignment),
                RobotCommand::Revoke { item_id } => robot.on_revoke(&item_id),
            };
            reports.extend(report);
        }

        let mut terminate = false;
        let mut tick = false;
        match command {
            AuctioneerCommand::Announce(announcement) => {
                for bid in robot.on_announcement(&announcement) {
                    if let Err(e) = writer.publish_bid(bid) {
                        warn!("{} could not send bid: {}", robot.id(), e);
                    }
                }
            }
            AuctioneerCommand::Tick { now } => {
                reports.extend(robot.advance(now));
                tick = true;
            }
            AuctioneerCommand::Terminate => terminate = true,
        }

        for report in reports {
            if let Err(e) = writer.publish_status(report) {
                warn!("{} could not send status: {}", robot.id(), e);
            }
        }
        if tick && writer.publish_tick_done().is_err() {
            break;
        }
        if terminate || robot.is_dropped() {
            break;
        }
    }
    debug!("{} stopped", robot.id());
    robot.summary()
}
