//! Boundary-question exchange between neighbouring workers.
//!
//! When a worker samples a pixel on its sub-image edge, part of the 3×3
//! window lives on neighbouring ranks. The [`QueryEngine`] posts one
//! question per touched direction and collects the replies; the
//! [`AnswerEngine`] keeps a standing receive per present direction and
//! serves incoming questions from the local sub-image. Collection never
//! blocks without pumping the answer side: two workers may question each
//! other in the same step, and whichever reply arrives later must not stop
//! either worker from serving the other first.

use crate::coder::{CborCoder, Coder};
use crate::direction::{Direction, DIRECTIONS};
use crate::error::{Error, Result};
use crate::message::{Handle, Tag, Transport};
use crate::sub_image::SubImage;
use crate::topology::NeighbourTable;

struct Ask {
    send: Handle,
    recv: Handle,
}

/// Outgoing boundary questions and their reply slots.
#[derive(Default)]
pub struct QueryEngine {
    asks: Vec<Ask>,
    asked: [u64; DIRECTIONS],
    code: CborCoder<i32>,
}

impl QueryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Post a question toward the neighbour in `direction`. The position
    /// carries the centre column for N/S, the centre row for E/W, and 0
    /// for diagonals (the responder knows the corner from the direction).
    pub fn ask<T: Transport>(
        &mut self,
        transport: &mut T,
        table: &NeighbourTable,
        direction: Direction,
        position: i64,
    ) -> Result<()> {
        let peer = table
            .peer(direction)
            .ok_or_else(|| Error::Transport(format!("no neighbour toward {:?}", direction)))?;
        let send = transport.post_send(peer, Tag::Question, self.code.encode(&(position as i32)))?;
        let recv = transport.post_recv(peer, Tag::Answer)?;
        self.asks.push(Ask { send, recv });
        self.asked[direction.index()] += 1;
        Ok(())
    }

    pub fn outstanding(&self) -> usize {
        self.asks.len()
    }

    /// How many questions have been posted per direction, over the engine's
    /// lifetime.
    pub fn asked(&self) -> [u64; DIRECTIONS] {
        self.asked
    }

    /// Wait for every outstanding reply and return the sum. While any
    /// handle is incomplete the answer engine is pumped, so a peer waiting
    /// on this worker's answer is always served.
    pub fn collect<T: Transport>(
        &mut self,
        transport: &mut T,
        answers: &mut AnswerEngine,
        table: &NeighbourTable,
        sub: &SubImage,
    ) -> Result<i64> {
        loop {
            let mut all = true;
            for ask in &self.asks {
                all &= transport.poll(ask.send)? && transport.poll(ask.recv)?;
            }
            if all {
                break;
            }
            answers.service(transport, table, sub)?;
        }
        let mut total = 0;
        for ask in self.asks.drain(..) {
            transport.retire(ask.send)?;
            total += self.code.decode(&transport.retire(ask.recv)?) as i64;
        }
        Ok(total)
    }
}

/// The servicing side: standing question receives, one per present
/// direction, re-armed as they fire.
pub struct AnswerEngine {
    questions: [Option<Handle>; DIRECTIONS],
    replies: [Option<Handle>; DIRECTIONS],
    answered: [u64; DIRECTIONS],
    code: CborCoder<i32>,
}

impl AnswerEngine {
    /// Post the initial standing receive on every present direction.
    pub fn arm<T: Transport>(transport: &mut T, table: &NeighbourTable) -> Result<Self> {
        let mut questions = [None; DIRECTIONS];
        for (direction, peer) in table.present() {
            questions[direction.index()] = Some(transport.post_recv(peer, Tag::Question)?);
        }
        Ok(Self {
            questions,
            replies: [None; DIRECTIONS],
            answered: [0; DIRECTIONS],
            code: CborCoder::new(),
        })
    }

    /// One pump: serve every direction whose standing receive has fired.
    /// Each served question is immediately re-armed; the previous reply
    /// send on that direction is drained before its slot is reused.
    pub fn service<T: Transport>(
        &mut self,
        transport: &mut T,
        table: &NeighbourTable,
        sub: &SubImage,
    ) -> Result<usize> {
        let mut served = 0;
        for (direction, peer) in table.present() {
            let slot = direction.index();
            let handle = match self.questions[slot] {
                Some(handle) => handle,
                None => continue,
            };
            if !transport.poll(handle)? {
                continue;
            }
            let position = self.code.decode(&transport.retire(handle)?) as i64;
            self.questions[slot] = Some(transport.post_recv(peer, Tag::Question)?);
            if let Some(previous) = self.replies[slot].take() {
                transport.wait(previous)?;
            }
            let (row, column) = sub.remote_centre(direction, position);
            let sum = sub.window_sum(row, column) as i32;
            self.replies[slot] = Some(transport.post_send(peer, Tag::Answer, self.code.encode(&sum))?);
            self.answered[slot] += 1;
            served += 1;
        }
        Ok(served)
    }

    /// Whether a standing question receive is armed toward `direction`.
    pub fn standing(&self, direction: Direction) -> bool {
        self.questions[direction.index()].is_some()
    }

    /// How many questions have been served per direction.
    pub fn answered(&self) -> [u64; DIRECTIONS] {
        self.answered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::direction::Direction::*;
    use crate::message::channel_network;
    use std::sync::Barrier;

    fn table(entries: &[(Direction, usize)]) -> NeighbourTable {
        let mut peers = [None; DIRECTIONS];
        for &(direction, peer) in entries {
            peers[direction.index()] = Some(peer);
        }
        NeighbourTable::new(peers)
    }

    fn sub_3x3(values: [i8; 9]) -> SubImage {
        SubImage::from_rows(values.chunks(3).map(|c| c.to_vec()).collect())
    }

    #[test]
    fn an_axial_question_sums_the_facing_edge() {
        let mut network = channel_network(2);
        let mut right = network.remove(1);
        let mut left = network.remove(0);
        let left_table = table(&[(East, 1)]);
        let right_table = table(&[(West, 0)]);
        let left_sub = sub_3x3([1; 9]);
        let right_sub = sub_3x3([1, -1, 1, -1, 1, -1, 1, -1, 1]);

        let mut right_answers = AnswerEngine::arm(&mut right, &right_table).unwrap();
        let mut left_answers = AnswerEngine::arm(&mut left, &left_table).unwrap();
        let mut queries = QueryEngine::new();

        // Pixel (1, 2) on the left worker: the window's right column lives
        // on the right worker, rows 0..=2 of its column 0.
        queries.ask(&mut left, &left_table, East, 1).unwrap();
        while right_answers
            .service(&mut right, &right_table, &right_sub)
            .unwrap()
            == 0
        {}
        let sum = queries
            .collect(&mut left, &mut left_answers, &left_table, &left_sub)
            .unwrap();
        assert_eq!(sum, 1 - 1 + 1);
        assert_eq!(queries.outstanding(), 0);
        assert_eq!(right_answers.answered()[West.index()], 1);
    }

    #[test]
    fn a_corner_question_returns_a_single_pixel() {
        let mut network = channel_network(2);
        let mut se = network.remove(1);
        let mut nw = network.remove(0);
        let nw_table = table(&[(SouthEast, 1)]);
        let se_table = table(&[(NorthWest, 0)]);
        let nw_sub = sub_3x3([1; 9]);
        let se_sub = sub_3x3([-1, 1, 1, 1, 1, 1, 1, 1, 1]);

        let mut se_answers = AnswerEngine::arm(&mut se, &se_table).unwrap();
        let mut nw_answers = AnswerEngine::arm(&mut nw, &nw_table).unwrap();
        let mut queries = QueryEngine::new();

        queries.ask(&mut nw, &nw_table, SouthEast, 0).unwrap();
        while se_answers.service(&mut se, &se_table, &se_sub).unwrap() == 0 {}
        let sum = queries
            .collect(&mut nw, &mut nw_answers, &nw_table, &nw_sub)
            .unwrap();
        assert_eq!(sum, -1);
    }

    #[test]
    fn the_standing_receive_is_rearmed_after_service() {
        let mut network = channel_network(2);
        let mut b = network.remove(1);
        let mut a = network.remove(0);
        let a_table = table(&[(East, 1)]);
        let b_table = table(&[(West, 0)]);
        let b_sub = sub_3x3([1; 9]);

        let mut b_answers = AnswerEngine::arm(&mut b, &b_table).unwrap();
        assert!(b_answers.standing(West));

        let mut a_answers = AnswerEngine::arm(&mut a, &a_table).unwrap();
        let a_sub = sub_3x3([1; 9]);
        let mut queries = QueryEngine::new();
        for round in 0u64..3 {
            queries.ask(&mut a, &a_table, East, 1).unwrap();
            while b_answers.service(&mut b, &b_table, &b_sub).unwrap() == 0 {}
            assert!(b_answers.standing(West));
            queries
                .collect(&mut a, &mut a_answers, &a_table, &a_sub)
                .unwrap();
            assert_eq!(b_answers.answered()[West.index()], round + 1);
        }
    }

    /// Two workers posting questions to each other in the same step must
    /// both complete: collection pumps the answer engine, so neither can
    /// starve the other.
    #[test]
    fn simultaneous_mutual_asks_do_not_deadlock() {
        let mut network = channel_network(2);
        let right = network.remove(1);
        let left = network.remove(0);
        let barrier = Barrier::new(2);

        std::thread::scope(|scope| {
            let sides = [
                (left, table(&[(East, 1)]), East),
                (right, table(&[(West, 0)]), West),
            ];
            let barrier = &barrier;
            let handles: Vec<_> = sides
                .into_iter()
                .map(|(mut transport, table, direction)| {
                    scope.spawn(move || {
                        let sub = sub_3x3([1; 9]);
                        let mut answers = AnswerEngine::arm(&mut transport, &table).unwrap();
                        let mut queries = QueryEngine::new();
                        barrier.wait();
                        queries.ask(&mut transport, &table, direction, 1).unwrap();
                        queries
                            .collect(&mut transport, &mut answers, &table, &sub)
                            .unwrap()
                    })
                })
                .collect();
            for handle in handles {
                assert_eq!(handle.join().unwrap(), 3);
            }
        });
    }
}
