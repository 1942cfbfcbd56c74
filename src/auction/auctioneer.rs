//! Auctioneer: drives announce -> collect -> decide -> commit
//!
//! The auctioneer owns the backlog, the scripted arrivals and the round
//! currently in flight. It is advanced explicitly with [`Auctioneer::step`],
//! one state transition per call, so a driver decides how time passes
//! between transitions.

use super::agenda::AgendaManager;
use super::clock::Clock;
use super::logging;
use super::mechanism::{Determination, Mechanism};
use super::realloc::{ReallocationController, Reoffer, Undercut};
use super::registry::{BidRegistry, ClosedRound, RoundItem};
use super::types::{
    Announcement, Assignment, BidMessage, Item, ItemId, RobotId, RoundId, RoundPurpose, StatusReport, TaskStatus,
    Timestamp,
};
use crate::config::AuctioneerConfig;
use crate::error::{Error, Result};
use crate::{auction_debug, auction_info, auction_warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuctioneerState {
    Idle,
    RoundOpen,
    RoundClosing,
    Committing,
    /// Nothing left to allocate or build, or torn down
    Drained,
}

#[derive(Debug, Clone)]
struct BacklogEntry {
    item: Item,
    reauction: bool,
    previous_holder: Option<RobotId>,
    /// Rounds this item went through without a single bid
    attempts: u32,
}

impl BacklogEntry {
    fn fresh(item: Item) -> Self {
        Self {
            item,
            reauction: false,
            previous_holder: None,
            attempts: 0,
        }
    }

    fn round_item(&self) -> RoundItem {
        RoundItem {
            item: self.item.clone(),
            reauction: self.reauction,
            previous_holder: self.previous_holder.clone(),
        }
    }
}

impl From<Reoffer> for BacklogEntry {
    fn from(r: Reoffer) -> Self {
        Self {
            item: r.item,
            reauction: true,
            previous_holder: Some(r.previous_holder),
            attempts: 0,
        }
    }
}

#[derive(Debug)]
struct OpenRound {
    round_id: RoundId,
    purpose: RoundPurpose,
    deadline: Timestamp,
    opened_at: Timestamp,
    items: Vec<ItemId>,
    /// Backlog entries on offer; empty for audit rounds
    entries: Vec<BacklogEntry>,
}

#[derive(Debug)]
enum Decision {
    Awards(Determination),
    Undercuts(Vec<Undercut>),
}

/// What one committed round did
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RoundOutcome {
    pub round_id: RoundId,
    pub assignments: Vec<Assignment>,
    /// Awards the agenda refused; the items went back to the backlog
    pub bounced: Vec<(ItemId, Error)>,
    pub unassigned: Vec<ItemId>,
    /// Items given up on in this round
    pub failed: Vec<Error>,
}

/// Record of a finished round
#[derive(Debug, Clone, Serialize)]
pub struct RoundLog {
    pub round_id: RoundId,
    pub purpose: RoundPurpose,
    pub opened_at_s: f64,
    pub closed_at_s: f64,
    pub items: Vec<ItemId>,
    pub bids_received: usize,
    pub late_bids: usize,
    pub awards: Vec<(ItemId, RobotId)>,
    pub unassigned: Vec<ItemId>,
    pub bounced: Vec<ItemId>,
    pub reoffered: Vec<ItemId>,
}

/// Result of one [`Auctioneer::step`]
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// A round opened; broadcast this to every robot
    Announced(Announcement),
    /// The open round has not reached its deadline
    Waiting { round_id: RoundId, deadline: Timestamp },
    /// Deadline passed, no more bids are taken
    Closing { round_id: RoundId },
    /// Bids frozen and evaluated
    Decided {
        round_id: RoundId,
        bids: usize,
        late_bids: usize,
        proposals: usize,
    },
    Committed(RoundOutcome),
    /// Audit round finished; these items were taken from their holders
    Audited { round_id: RoundId, reoffers: Vec<Reoffer> },
    /// Nothing to announce right now
    Idle,
    Drained,
}

pub struct Auctioneer {
    config: AuctioneerConfig,
    clock: Arc<dyn Clock>,
    registry: Arc<BidRegistry>,
    agendas: Arc<AgendaManager>,
    controller: ReallocationController,
    mechanism: Box<dyn Mechanism>,
    state: AuctioneerState,
    backlog: VecDeque<BacklogEntry>,
    scripted: BTreeMap<(Timestamp, ItemId), Item>,
    known: HashSet<ItemId>,
    next_round: RoundId,
    current: Option<OpenRound>,
    decision: Option<(ClosedRound, Decision)>,
    completed: BTreeMap<ItemId, RobotId>,
    failed: Vec<Error>,
    revocations: Vec<Reoffer>,
    history: Vec<RoundLog>,
    torn_down: bool,
}

impl Auctioneer {
    pub fn new(config: AuctioneerConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(BidRegistry::new(clock.clone()));
        let agendas = Arc::new(AgendaManager::new(
            clock.clone(),
            config.cost_tolerance,
            config.max_agenda_len,
        ));
        let controller = ReallocationController::new(
            agendas.clone(),
            clock.clone(),
            config.reallocate,
            config.audit_interval(),
        );
        let mechanism = config.mechanism.build(config.reauction_tiebreak);
        auction_info!(
            "auctioneer ready: mechanism {}, reallocate {}, round deadline {}ms",
            mechanism.name(),
            config.reallocate,
            config.round_deadline_ms
        );

        Ok(Self {
            config,
            clock,
            registry,
            agendas,
            controller,
            mechanism,
            state: AuctioneerState::Idle,
            backlog: VecDeque::new(),
            scripted: BTreeMap::new(),
            known: HashSet::new(),
            next_round: RoundId(1),
            current: None,
            decision: None,
            completed: BTreeMap::new(),
            failed: Vec::new(),
            revocations: Vec::new(),
            history: Vec::new(),
            torn_down: false,
        })
    }

    pub fn state(&self) -> AuctioneerState {
        self.state
    }

    pub fn config(&self) -> &AuctioneerConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<BidRegistry> {
        self.registry.clone()
    }

    pub fn agendas(&self) -> Arc<AgendaManager> {
        self.agendas.clone()
    }

    pub fn register_robot(&mut self, robot_id: &RobotId) -> bool {
        let added = self.agendas.register(robot_id);
        if added {
            auction_info!("robot {} registered", robot_id);
        }
        added
    }

    /// Put an item on the backlog now
    pub fn admit(&mut self, item: Item) -> Result<()> {
        if !self.known.insert(item.item_id.clone()) {
            return Err(Error::ItemAlreadyExists);
        }
        auction_debug!("admitted {}", item);
        self.backlog.push_back(BacklogEntry::fresh(item));
        self.revive();
        Ok(())
    }

    /// Put an item on the backlog once the clock reaches `arrival`
    pub fn schedule(&mut self, item: Item, arrival: Timestamp) -> Result<()> {
        if arrival <= self.clock.now() {
            return self.admit(item);
        }
        if !self.known.insert(item.item_id.clone()) {
            return Err(Error::ItemAlreadyExists);
        }
        self.scripted.insert((arrival, item.item_id.clone()), item);
        self.revive();
        Ok(())
    }

    pub fn submit_bid(&self, message: BidMessage) -> Result<()> {
        if !self.agendas.is_registered(&message.bid.robot_id) {
            return Err(Error::UnknownRobot(message.bid.robot_id));
        }
        self.registry.submit(message.round_id, message.bid)
    }

    pub fn report_status(&mut self, report: StatusReport) -> Result<()> {
        let robot_id = &report.robot_id;
        match report.status {
            TaskStatus::Success { item_id, revised } => {
                self.agendas.complete(robot_id, &item_id, revised)?;
                auction_info!("{} built {}", robot_id, item_id);
                self.completed.insert(item_id, robot_id.clone());
            }
            TaskStatus::Failed { item_id, revised } => {
                let reoffer = self.controller.on_failure(robot_id, &item_id, revised)?;
                self.requeue(reoffer);
            }
            TaskStatus::Infeasible { item_id, reason } => {
                let reoffer = self.controller.on_infeasible(robot_id, &item_id, reason)?;
                self.requeue(reoffer);
            }
            TaskStatus::Revised { cost } => self.agendas.revise(robot_id, cost)?,
            TaskStatus::Dropout => {
                for reoffer in self.controller.on_dropout(robot_id)? {
                    self.requeue(reoffer);
                }
            }
            TaskStatus::AllTasksComplete => auction_info!("{} reports all tasks complete", robot_id),
            TaskStatus::AgendaCleared => match self.agendas.agenda(robot_id) {
                // awards sent after the revocation are already in here
                Some(agenda) if !agenda.entries.is_empty() => auction_debug!(
                    "{} cleared its agenda, {:?} committed since",
                    robot_id,
                    agenda.item_ids()
                ),
                Some(_) => auction_info!("{} cleared its agenda", robot_id),
                None => return Err(Error::UnknownRobot(robot_id.clone())),
            },
        }
        Ok(())
    }

    /// Perform one state transition
    pub fn step(&mut self) -> Step {
        match self.state {
            AuctioneerState::Idle => self.step_idle(),
            AuctioneerState::RoundOpen => self.step_open(),
            AuctioneerState::RoundClosing => self.step_closing(),
            AuctioneerState::Committing => self.step_committing(),
            AuctioneerState::Drained => Step::Drained,
        }
    }

    /// Abandon any open round and stop
    pub fn teardown(&mut self) {
        if let Some(round) = self.current.take() {
            match self.registry.abandon(round.round_id) {
                Ok(n) => auction_info!("abandoned round {} with {} pending bids", round.round_id, n),
                Err(e) => auction_debug!("round {} not abandoned: {}", round.round_id, e),
            }
            self.backlog.extend(round.entries);
        }
        self.decision = None;
        self.torn_down = true;
        self.state = AuctioneerState::Drained;
        auction_info!("auctioneer torn down with {} items outstanding", self.outstanding().len());
    }

    /// Items taken from a holder by the auctioneer itself since the last call
    ///
    /// Failures and dropouts are reported by the robot, so only sweeps,
    /// audits and re-auctions on arrival end up here. The driver tells each previous holder to drop them.
    pub fn take_revocations(&mut self) -> Vec<Reoffer> {
        std::mem::take(&mut self.revocations)
    }

    pub fn is_drained(&self) -> bool {
        self.state == AuctioneerState::Drained
    }

    pub fn completed(&self) -> &BTreeMap<ItemId, RobotId> {
        &self.completed
    }

    pub fn failed(&self) -> &[Error] {
        &self.failed
    }

    pub fn history(&self) -> &[RoundLog] {
        &self.history
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Known items that are neither built nor given up on
    pub fn outstanding(&self) -> Vec<ItemId> {
        let mut ids: Vec<ItemId> = self.backlog.iter().map(|e| e.item.item_id.clone()).collect();
        ids.extend(self.scripted.keys().map(|(_, id)| id.clone()));
        if let Some(round) = &self.current {
            ids.extend(round.entries.iter().map(|e| e.item.item_id.clone()));
        }
        for agenda in self.agendas.snapshot() {
            ids.extend(agenda.item_ids());
        }
        ids.sort();
        ids
    }

    fn step_idle(&mut self) -> Step {
        if self.admit_arrivals() > 0 {
            for reoffer in self.controller.on_arrivals() {
                self.revocations.push(reoffer.clone());
                self.requeue(reoffer);
            }
        }

        for reoffer in self.controller.sweep() {
            self.revocations.push(reoffer.clone());
            self.requeue(reoffer);
        }

        if self.controller.audit_due() {
            self.controller.mark_audited();
            let items: Vec<RoundItem> = self
                .agendas
                .snapshot()
                .into_iter()
                .flat_map(|a| {
                    let holder = a.robot_id;
                    a.entries.into_iter().map(move |e| RoundItem {
                        item: e.item,
                        reauction: false,
                        previous_holder: Some(holder.clone()),
                    })
                })
                .collect();
            if !items.is_empty() {
                return self.open_round(RoundPurpose::Audit, items, Vec::new());
            }
        }

        // rounds run without robots too, so unbiddable items reach the retry bound
        if !self.backlog.is_empty() {
            let limit = self.config.max_items_per_round;
            let take = if limit == 0 {
                self.backlog.len()
            } else {
                limit.min(self.backlog.len())
            };
            let entries: Vec<BacklogEntry> = self.backlog.drain(..take).collect();
            let items = entries.iter().map(|e| e.round_item()).collect();
            return self.open_round(RoundPurpose::Allocation, items, entries);
        }

        if self.backlog.is_empty() && self.scripted.is_empty() && self.agendas.all_empty() {
            self.state = AuctioneerState::Drained;
            auction_info!(
                "drained: {} items built, {} failed",
                self.completed.len(),
                self.failed.len()
            );
            return Step::Drained;
        }
        Step::Idle
    }

    fn step_open(&mut self) -> Step {
        let Some(round) = &self.current else {
            self.state = AuctioneerState::Idle;
            return Step::Idle;
        };
        if !self.registry.is_expired(round.round_id) {
            return Step::Waiting {
                round_id: round.round_id,
                deadline: round.deadline,
            };
        }
        self.state = AuctioneerState::RoundClosing;
        Step::Closing {
            round_id: round.round_id,
        }
    }

    fn step_closing(&mut self) -> Step {
        let Some(round) = &self.current else {
            self.state = AuctioneerState::Idle;
            return Step::Idle;
        };
        let (round_id, purpose) = (round.round_id, round.purpose);
        let closed = match self.registry.close(round_id) {
            Ok(closed) => closed,
            Err(e) => {
                auction_warn!("could not close round {}: {}", round_id, e);
                self.release_current();
                return Step::Idle;
            }
        };

        let (decision, proposals) = match purpose {
            RoundPurpose::Allocation => {
                let determination = self.mechanism.determine(&closed);
                let n = determination.awards.len();
                (Decision::Awards(determination), n)
            }
            RoundPurpose::Audit => {
                let undercuts = self.controller.audit(&closed);
                let n = undercuts.len();
                (Decision::Undercuts(undercuts), n)
            }
        };
        let step = Step::Decided {
            round_id,
            bids: closed.bids.len(),
            late_bids: closed.late_bids,
            proposals,
        };
        self.decision = Some((closed, decision));
        self.state = AuctioneerState::Committing;
        step
    }

    fn step_committing(&mut self) -> Step {
        let round = self.current.take();
        let decision = self.decision.take();
        self.state = AuctioneerState::Idle;
        self.registry.prune();

        match (round, decision) {
            (Some(round), Some((closed, Decision::Awards(determination)))) => {
                Step::Committed(self.commit_awards(round, &closed, determination))
            }
            (Some(round), Some((closed, Decision::Undercuts(undercuts)))) => {
                self.apply_undercuts(round, &closed, undercuts)
            }
            (round, _) => {
                if let Some(round) = round {
                    self.backlog.extend(round.entries);
                }
                Step::Idle
            }
        }
    }

    fn open_round(&mut self, purpose: RoundPurpose, items: Vec<RoundItem>, entries: Vec<BacklogEntry>) -> Step {
        let round_id = self.next_round;
        let now = self.clock.now();
        let deadline = now.saturating_add(self.config.round_deadline());
        let announced: Vec<Item> = items.iter().map(|i| i.item.clone()).collect();
        let ids: Vec<ItemId> = announced.iter().map(|i| i.item_id.clone()).collect();

        if let Err(e) = self.registry.open(round_id, items, deadline) {
            auction_warn!("could not open round {}: {}", round_id, e);
            self.backlog.extend(entries);
            return Step::Idle;
        }
        self.next_round = round_id.next();
        auction_info!(
            "Round {} ({:?}) open for {} items until {}",
            round_id,
            purpose,
            ids.len(),
            deadline
        );
        self.current = Some(OpenRound {
            round_id,
            purpose,
            deadline,
            opened_at: now,
            items: ids,
            entries,
        });
        self.state = AuctioneerState::RoundOpen;

        Step::Announced(Announcement {
            round_id,
            mechanism: self.mechanism.kind(),
            purpose,
            items: announced,
            deadline,
        })
    }

    fn commit_awards(&mut self, round: OpenRound, closed: &ClosedRound, determination: Determination) -> RoundOutcome {
        let round_id = round.round_id;
        let mut entries: HashMap<ItemId, BacklogEntry> = round
            .entries
            .into_iter()
            .map(|e| (e.item.item_id.clone(), e))
            .collect();
        let mut outcome = RoundOutcome {
            round_id,
            ..Default::default()
        };

        for award in determination.awards {
            let Some(entry) = entries.remove(&award.item.item_id) else {
                continue;
            };
            match self
                .agendas
                .commit(award.robot_id(), &award.item, None, &award.bid, round_id)
            {
                Ok(assignment) => outcome.assignments.push(assignment),
                Err(e) => {
                    auction_warn!("award of {} to {} bounced: {}", award.item.item_id, award.robot_id(), e);
                    outcome.bounced.push((award.item.item_id.clone(), e));
                    self.backlog.push_back(entry);
                }
            }
        }

        let bid_on: HashSet<&ItemId> = closed.bids.iter().map(|b| &b.item_id).collect();
        for item_id in determination.unassigned {
            let Some(mut entry) = entries.remove(&item_id) else {
                continue;
            };
            if !bid_on.contains(&item_id) {
                entry.attempts += 1;
            }
            if entry.attempts > self.config.max_unassigned_retries {
                let err = Error::Unassignable {
                    item: item_id.clone(),
                    attempts: entry.attempts,
                };
                auction_warn!("{}", err);
                self.failed.push(err.clone());
                outcome.failed.push(err);
            } else {
                self.backlog.push_back(entry);
            }
            outcome.unassigned.push(item_id);
        }
        self.backlog.extend(entries.into_values());

        self.history.push(RoundLog {
            round_id,
            purpose: round.purpose,
            opened_at_s: round.opened_at.as_secs_f64(),
            closed_at_s: self.clock.now().as_secs_f64(),
            items: round.items,
            bids_received: closed.bids.len(),
            late_bids: closed.late_bids,
            awards: outcome
                .assignments
                .iter()
                .map(|a| (a.item.item_id.clone(), a.robot_id.clone()))
                .collect(),
            unassigned: outcome.unassigned.clone(),
            bounced: outcome.bounced.iter().map(|(id, _)| id.clone()).collect(),
            reoffered: Vec::new(),
        });
        logging::log_round_outcome(&outcome);
        outcome
    }

    fn apply_undercuts(&mut self, round: OpenRound, closed: &ClosedRound, undercuts: Vec<Undercut>) -> Step {
        let mut reoffers = Vec::new();
        for undercut in &undercuts {
            match self.controller.apply(undercut) {
                Ok(reoffer) => {
                    self.revocations.push(reoffer.clone());
                    reoffers.push(reoffer.clone());
                    self.requeue(reoffer);
                }
                Err(e) => auction_debug!("undercut on {} dropped: {}", undercut.item_id, e),
            }
        }
        auction_info!("Audit round {} reoffered {} items", round.round_id, reoffers.len());

        self.history.push(RoundLog {
            round_id: round.round_id,
            purpose: round.purpose,
            opened_at_s: round.opened_at.as_secs_f64(),
            closed_at_s: self.clock.now().as_secs_f64(),
            items: round.items,
            bids_received: closed.bids.len(),
            late_bids: closed.late_bids,
            awards: Vec::new(),
            unassigned: Vec::new(),
            bounced: Vec::new(),
            reoffered: reoffers.iter().map(|r| r.item.item_id.clone()).collect(),
        });
        Step::Audited {
            round_id: round.round_id,
            reoffers,
        }
    }

    /// Move due scripted items onto the backlog; returns how many arrived
    fn admit_arrivals(&mut self) -> usize {
        let now = self.clock.now();
        let mut arrived = 0;
        while let Some(entry) = self.scripted.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let item = entry.remove();
            auction_info!("{} arrived at {}", item.item_id, now);
            self.backlog.push_back(BacklogEntry::fresh(item));
            arrived += 1;
        }
        arrived
    }

    fn requeue(&mut self, reoffer: Reoffer) {
        self.backlog.push_back(BacklogEntry::from(reoffer));
        self.revive();
    }

    fn release_current(&mut self) {
        if let Some(round) = self.current.take() {
            self.backlog.extend(round.entries);
        }
        self.decision = None;
        self.state = AuctioneerState::Idle;
    }

    fn revive(&mut self) {
        if self.state == AuctioneerState::Drained && !self.torn_down {
            self.state = AuctioneerState::Idle;
        }
    }
}
