//! The non-blocking point-to-point transport seam.
//!
//! Ranks exchange tagged byte messages through the [`Transport`] trait:
//! post a send or a receive, poll the returned handle without blocking, and
//! retire the handle once complete to recover the payload. Delivery is
//! reliable and ordered per (peer, tag) pair; the exchange protocol never
//! keeps two same-tag messages in flight to one peer, so ordering alone
//! pairs questions with answers.

use crate::direction::Direction;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::collections::VecDeque;

/// A message tag. Tags are grouped into kinds with disjoint wire ranges, so
/// the per-direction neighbour-assignment tags can never collide with the
/// row tags or the exchange tags, and a direction's slot index is never
/// itself a wire tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tag {
    /// Coordinator → worker: the rank of the neighbour in this direction.
    Neighbour(Direction),
    /// Coordinator → worker: sub-image row count.
    Rows,
    /// Coordinator → worker: sub-image column count.
    Columns,
    /// Coordinator → worker: one row of initial pixels.
    ImageRow(usize),
    /// Worker → worker: a boundary question (window position).
    Question,
    /// Worker → worker: the partial sum answering a question.
    Answer,
    /// Worker → worker: iteration budget exhausted.
    Finished,
    /// Worker → coordinator: one row of the final image.
    FinalRow(usize),
}

impl Tag {
    pub fn wire(self) -> u64 {
        let (kind, argument) = match self {
            Tag::Neighbour(direction) => (0, direction.index() as u64),
            Tag::Rows => (1, 0),
            Tag::Columns => (2, 0),
            Tag::ImageRow(row) => (3, row as u64),
            Tag::Question => (4, 0),
            Tag::Answer => (5, 0),
            Tag::Finished => (6, 0),
            Tag::FinalRow(row) => (7, row as u64),
        };
        (kind << 32) | argument
    }
}

/// An opaque reference to a posted operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handle(u64);

pub trait Transport {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Post a non-blocking send. The handle completes once the payload has
    /// been handed to the wire.
    fn post_send(&mut self, peer: usize, tag: Tag, payload: Vec<u8>) -> Result<Handle>;

    /// Post a non-blocking receive for the next message from `peer` with
    /// the given tag.
    fn post_recv(&mut self, peer: usize, tag: Tag) -> Result<Handle>;

    /// Non-blocking completion test. May be called repeatedly.
    fn poll(&mut self, handle: Handle) -> Result<bool>;

    /// Consume a completed operation, returning the received payload (empty
    /// for sends). Retiring an incomplete operation is an error.
    fn retire(&mut self, handle: Handle) -> Result<Vec<u8>>;

    /// Block until one operation completes and retire it. Used only where
    /// no concurrent answer service is required.
    fn wait(&mut self, handle: Handle) -> Result<Vec<u8>> {
        while !self.poll(handle)? {
            std::thread::yield_now();
        }
        self.retire(handle)
    }

    /// Block until every listed operation completes, without retiring any.
    fn wait_all(&mut self, handles: &[Handle]) -> Result<()> {
        loop {
            let mut all = true;
            for handle in handles {
                all &= self.poll(*handle)?;
            }
            if all {
                return Ok(());
            }
            std::thread::yield_now();
        }
    }
}

/// An inbound message as it comes off the wire.
#[derive(Debug)]
pub(crate) struct Packet {
    pub from: usize,
    pub tag: u64,
    pub payload: Vec<u8>,
}

enum Op {
    SendDone,
    Waiting { peer: usize, tag: u64 },
    Arrived(Vec<u8>),
}

/// Operation bookkeeping shared by the transport implementations: a table
/// of posted operations in post order and a parking list for arrivals with
/// no matching receive yet. Receives match arrivals oldest-first per
/// (peer, tag), which preserves wire order.
#[derive(Default)]
pub(crate) struct Mailbox {
    next: u64,
    ops: BTreeMap<u64, Op>,
    undelivered: VecDeque<Packet>,
}

impl Mailbox {
    fn insert(&mut self, op: Op) -> Handle {
        let id = self.next;
        self.next += 1;
        self.ops.insert(id, op);
        Handle(id)
    }

    pub fn post_send(&mut self) -> Handle {
        self.insert(Op::SendDone)
    }

    pub fn post_recv(&mut self, peer: usize, tag: u64) -> Handle {
        let parked = self
            .undelivered
            .iter()
            .position(|p| p.from == peer && p.tag == tag);
        match parked {
            Some(index) => {
                let packet = self.undelivered.remove(index).unwrap();
                self.insert(Op::Arrived(packet.payload))
            }
            None => self.insert(Op::Waiting { peer, tag }),
        }
    }

    /// Hand an inbound packet to the oldest matching posted receive, or
    /// park it.
    pub fn deliver(&mut self, packet: Packet) {
        let slot = self.ops.iter_mut().find_map(|(_, op)| match op {
            Op::Waiting { peer, tag } if *peer == packet.from && *tag == packet.tag => Some(op),
            _ => None,
        });
        match slot {
            Some(op) => *op = Op::Arrived(packet.payload),
            None => self.undelivered.push_back(packet),
        }
    }

    pub fn poll(&self, handle: Handle) -> Result<bool> {
        match self.ops.get(&handle.0) {
            Some(Op::Waiting { .. }) => Ok(false),
            Some(_) => Ok(true),
            None => Err(Error::Transport(format!(
                "poll of unknown operation {:?}",
                handle
            ))),
        }
    }

    pub fn retire(&mut self, handle: Handle) -> Result<Vec<u8>> {
        match self.ops.remove(&handle.0) {
            Some(Op::SendDone) => Ok(Vec::new()),
            Some(Op::Arrived(payload)) => Ok(payload),
            Some(op @ Op::Waiting { .. }) => {
                self.ops.insert(handle.0, op);
                Err(Error::Transport(format!(
                    "retire of incomplete operation {:?}",
                    handle
                )))
            }
            None => Err(Error::Transport(format!(
                "retire of unknown operation {:?}",
                handle
            ))),
        }
    }
}
