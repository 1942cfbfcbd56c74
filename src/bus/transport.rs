use crate::auction::types::{Announcement, Assignment, BidMessage, ItemId, RobotId, StatusReport, Timestamp};
use crate::bus::types::{
    ANNOUNCEMENT_TOPIC, AWARD_TOPIC, AuctioneerCommand, RobotCommand, RobotReply,
};
use crate::error::Error;
use std::collections::HashMap;
use tokio::sync::{broadcast, mpsc};

const BROADCAST_CAPACITY: usize = 1024;

/// In-process bus handler for the auctioneer (Writer part)
#[derive(Debug, Clone)]
pub struct AuctioneerWriter {
    pub command_writer: broadcast::Sender<AuctioneerCommand>,
    pub award_writers: HashMap<RobotId, mpsc::UnboundedSender<RobotCommand>>,
}

impl AuctioneerWriter {
    pub fn publish_announcement(&self, announcement: Announcement) -> Result<(), Error> {
        self.broadcast(AuctioneerCommand::Announce(announcement))
    }

    pub fn publish_tick(&self, now: Timestamp) -> Result<(), Error> {
        self.broadcast(AuctioneerCommand::Tick { now })
    }

    pub fn publish_terminate(&self) -> Result<(), Error> {
        self.broadcast(AuctioneerCommand::Terminate)
    }

    pub fn publish_award(&self, assignment: Assignment) -> Result<(), Error> {
        let robot_id = assignment.robot_id.clone();
        self.direct(&robot_id, RobotCommand::Award(assignment))
    }

    pub fn publish_revoke(&self, robot_id: &RobotId, item_id: ItemId) -> Result<(), Error> {
        self.direct(robot_id, RobotCommand::Revoke { item_id })
    }

    fn broadcast(&self, command: AuctioneerCommand) -> Result<(), Error> {
        self.command_writer
            .send(command)
            .map(|_| ())
            .map_err(|e| Error::NetworkError(format!("{} write error: {:?}", ANNOUNCEMENT_TOPIC, e)))
    }

    fn direct(&self, robot_id: &RobotId, command: RobotCommand) -> Result<(), Error> {
        let writer = self
            .award_writers
            .get(robot_id)
            .ok_or_else(|| Error::UnknownRobot(robot_id.clone()))?;
        writer
            .send(command)
            .map_err(|e| Error::NetworkError(format!("{} write error for {}: {:?}", AWARD_TOPIC, robot_id, e)))
    }
}

/// In-process bus handler for the auctioneer (Reader part)
#[derive(Debug)]
pub struct AuctioneerReader {
    pub reply_stream: mpsc::UnboundedReceiver<RobotReply>,
}

impl AuctioneerReader {
    pub async fn recv(&mut self) -> Option<RobotReply> {
        self.reply_stream.recv().await
    }
}

/// In-process bus handler for a robot (Writer part)
#[derive(Debug, Clone)]
pub struct RobotWriter {
    pub reply_writer: mpsc::UnboundedSender<RobotReply>,
    robot_id: RobotId,
}

impl RobotWriter {
    pub fn robot_id(&self) -> &RobotId {
        &self.robot_id
    }

    pub fn publish_bid(&self, bid: BidMessage) -> Result<(), Error> {
        self.send(RobotReply::Bid(bid))
    }

    pub fn publish_status(&self, status: StatusReport) -> Result<(), Error> {
        self.send(RobotReply::Status(status))
    }

    pub fn publish_tick_done(&self) -> Result<(), Error> {
        self.send(RobotReply::TickDone {
            robot_id: self.robot_id.clone(),
        })
    }

    fn send(&self, reply: RobotReply) -> Result<(), Error> {
        let topic = reply.topic();
        self.reply_writer
            .send(reply)
            .map_err(|e| Error::NetworkError(format!("{} write error from {}: {:?}", topic, self.robot_id, e)))
    }
}

/// In-process bus handler for a robot (Reader part)
#[derive(Debug)]
pub struct RobotReader {
    pub command_stream: broadcast::Receiver<AuctioneerCommand>,
    pub award_stream: mpsc::UnboundedReceiver<RobotCommand>,
}

impl RobotReader {
    /// Commands addressed to this robot that are already queued
    pub fn drain_direct(&mut self) -> Vec<RobotCommand> {
        let mut commands = Vec::new();
        while let Ok(command) = self.award_stream.try_recv() {
            commands.push(command);
        }
        commands
    }
}

/// Endpoints for one robot
#[derive(Debug)]
pub struct RobotEndpoint {
    pub writer: RobotWriter,
    pub reader: RobotReader,
}

/// Wire the auctioneer and the given robots together
pub fn new_bus(robot_ids: &[RobotId]) -> (AuctioneerWriter, AuctioneerReader, Vec<RobotEndpoint>) {
    let (command_writer, _) = broadcast::channel(BROADCAST_CAPACITY);
    let (reply_writer, reply_stream) = mpsc::unbounded_channel();

    let mut award_writers = HashMap::new();
    let mut endpoints = Vec::with_capacity(robot_ids.len());
    for robot_id in robot_ids {
        let (award_writer, award_stream) = mpsc::unbounded_channel();
        award_writers.insert(robot_id.clone(), award_writer);
        endpoints.push(RobotEndpoint {
            writer: RobotWriter {
                reply_writer: reply_writer.clone(),
                robot_id: robot_id.clone(),
            },
            reader: RobotReader {
                command_stream: command_writer.subscribe(),
                award_stream,
            },
        });
    }

    (
        AuctioneerWriter {
            command_writer,
            award_writers,
        },
        AuctioneerReader { reply_stream },
        endpoints,
    )
}
