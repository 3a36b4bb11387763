//! A worker rank: receives its sub-image, runs the Metropolis sampler with
//! halo queries for boundary pixels, and hands the result back.
//!
//! The worker is a single-threaded cooperative loop over the transport's
//! non-blocking primitives. Its only suspension points are reply
//! collection and the closing handshake, and both pump the answer engine
//! between polls, so a neighbour is never left waiting on this rank.

use crate::coder::{CborCoder, Coder};
use crate::direction::{Direction, ALL, DIRECTIONS};
use crate::error::Result;
use crate::halo::{AnswerEngine, QueryEngine};
use crate::message::{Tag, Transport};
use crate::sampler::Sampler;
use crate::sub_image::{Pixel, SubImage};
use crate::topology::NeighbourTable;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const PROGRESS_EVERY: u64 = 1_000_000;

#[derive(Clone, Copy, Debug)]
pub struct WorkerConfig {
    /// Rank of the coordinator.
    pub coordinator: usize,
    /// This worker's iteration budget.
    pub iterations: u64,
    pub beta: f64,
    pub pi: f64,
    /// Seed for this worker's own random source.
    pub seed: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct WorkerStats {
    pub proposals: u64,
    pub accepted: u64,
    pub asked: [u64; DIRECTIONS],
    pub answered: [u64; DIRECTIONS],
}

/// Receive the sub-image shape, the neighbour table and the initial pixel
/// rows from the coordinator.
fn startup<T: Transport>(
    transport: &mut T,
    coordinator: usize,
) -> Result<(NeighbourTable, SubImage)> {
    let ints = CborCoder::<i32>::new();
    let rows_code = CborCoder::<Vec<Pixel>>::new();

    let handle = transport.post_recv(coordinator, Tag::Rows)?;
    let rows = ints.decode(&transport.wait(handle)?) as usize;
    let handle = transport.post_recv(coordinator, Tag::Columns)?;
    let columns = ints.decode(&transport.wait(handle)?) as usize;

    let mut peers = [None; DIRECTIONS];
    for direction in ALL {
        let handle = transport.post_recv(coordinator, Tag::Neighbour(direction))?;
        let peer = ints.decode(&transport.wait(handle)?);
        peers[direction.index()] = (peer >= 0).then(|| peer as usize);
    }

    let mut image_rows = Vec::with_capacity(rows);
    for row in 0..rows {
        let handle = transport.post_recv(coordinator, Tag::ImageRow(row))?;
        let pixels = rows_code.decode(&transport.wait(handle)?);
        debug_assert_eq!(pixels.len(), columns);
        image_rows.push(pixels);
    }
    Ok((NeighbourTable::new(peers), SubImage::from_rows(image_rows)))
}

/// The external directions touched by the window about `(row, column)`,
/// with the position payload each question carries. Presence of the
/// neighbour is the caller's concern.
fn boundary_questions(sub: &SubImage, row: usize, column: usize) -> Vec<(Direction, i64)> {
    use Direction::*;
    let top = row == 0;
    let bottom = row == sub.rows() - 1;
    let left = column == 0;
    let right = column == sub.columns() - 1;
    let mut questions = Vec::new();
    if top {
        questions.push((North, column as i64));
    }
    if bottom {
        questions.push((South, column as i64));
    }
    if left {
        questions.push((West, row as i64));
    }
    if right {
        questions.push((East, row as i64));
    }
    if top && left {
        questions.push((NorthWest, 0));
    }
    if top && right {
        questions.push((NorthEast, 0));
    }
    if bottom && left {
        questions.push((SouthWest, 0));
    }
    if bottom && right {
        questions.push((SouthEast, 0));
    }
    questions
}

/// Announce the exhausted budget to every neighbour and keep serving their
/// questions until each has announced the same. Both the send and the
/// receive of the closing message must complete on every present
/// direction before the worker may stop answering.
fn shutdown<T: Transport>(
    transport: &mut T,
    table: &NeighbourTable,
    answers: &mut AnswerEngine,
    sub: &SubImage,
) -> Result<()> {
    let mut handles = Vec::new();
    for (_, peer) in table.present() {
        handles.push(transport.post_send(peer, Tag::Finished, Vec::new())?);
        handles.push(transport.post_recv(peer, Tag::Finished)?);
    }
    loop {
        let mut all = true;
        for handle in &handles {
            all &= transport.poll(*handle)?;
        }
        if all {
            break;
        }
        answers.service(transport, table, sub)?;
    }
    for handle in handles {
        transport.retire(handle)?;
    }
    Ok(())
}

fn ship_final<T: Transport>(transport: &mut T, coordinator: usize, sub: &SubImage) -> Result<()> {
    let rows_code = CborCoder::<Vec<Pixel>>::new();
    let mut handles = Vec::new();
    for row in 0..sub.rows() {
        let payload = rows_code.encode(&sub.row(row).to_vec());
        handles.push(transport.post_send(coordinator, Tag::FinalRow(row), payload)?);
    }
    transport.wait_all(&handles)?;
    for handle in handles {
        transport.retire(handle)?;
    }
    Ok(())
}

/// Run the sampler over an already constructed sub-image and neighbour
/// table, then run the closing handshake. The random source is passed in
/// explicitly; a worker's whole trajectory is a function of its seed.
pub fn sample<T: Transport, R: Rng>(
    transport: &mut T,
    table: &NeighbourTable,
    sub: &mut SubImage,
    sampler: &Sampler,
    rng: &mut R,
    iterations: u64,
) -> Result<WorkerStats> {
    let mut answers = AnswerEngine::arm(transport, table)?;
    let mut queries = QueryEngine::new();
    let mut accepted = 0;

    for iteration in 0..iterations {
        let row = rng.gen_range(0..sub.rows());
        let column = rng.gen_range(0..sub.columns());
        let mut sum = sub.window_sum(row as i64, column as i64);
        for (direction, position) in boundary_questions(sub, row, column) {
            if table.peer(direction).is_some() {
                queries.ask(transport, table, direction, position)?;
            }
        }
        sum += queries.collect(transport, &mut answers, table, sub)?;

        let delta = sampler.delta_energy(sub.initial(row, column), sub.get(row, column), sum);
        let u = 1.0 - rng.gen::<f64>();
        if sampler.accepts(delta, u) {
            sub.flip(row, column);
            accepted += 1;
        }
        if (iteration + 1) % PROGRESS_EVERY == 0 {
            debug!(
                "rank {}: {} of {} iterations",
                transport.rank(),
                iteration + 1,
                iterations
            );
        }
    }

    shutdown(transport, table, &mut answers, sub)?;
    Ok(WorkerStats {
        proposals: iterations,
        accepted,
        asked: queries.asked(),
        answered: answers.answered(),
    })
}

fn host_name() -> String {
    hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".into())
}

/// The whole worker lifecycle on one rank.
pub fn run<T: Transport>(transport: &mut T, config: &WorkerConfig) -> Result<WorkerStats> {
    let (table, mut sub) = startup(transport, config.coordinator)?;
    let sampler = Sampler::new(config.beta, config.pi)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let host = host_name();
    info!(
        "rank {} on {} starting: {}x{} tile, {} neighbours, {} iterations",
        transport.rank(),
        host,
        sub.rows(),
        sub.columns(),
        table.len(),
        config.iterations
    );
    let stats = sample(
        transport,
        &table,
        &mut sub,
        &sampler,
        &mut rng,
        config.iterations,
    )?;
    ship_final(transport, config.coordinator, &sub)?;
    info!(
        "rank {} on {} finished: accepted {} of {} proposals",
        transport.rank(),
        host,
        stats.accepted,
        stats.proposals
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::direction::Direction::*;
    use crate::message::channel_network;

    fn table(entries: &[(Direction, usize)]) -> NeighbourTable {
        let mut peers = [None; DIRECTIONS];
        for &(direction, peer) in entries {
            peers[direction.index()] = Some(peer);
        }
        NeighbourTable::new(peers)
    }

    fn all_ones(rows: usize, columns: usize) -> SubImage {
        SubImage::from_rows(vec![vec![1; columns]; rows])
    }

    /// A random source with no entropy: range draws land on the minimum
    /// and float draws on zero.
    struct ZeroRng;

    impl rand::RngCore for ZeroRng {
        fn next_u32(&mut self) -> u32 {
            0
        }
        fn next_u64(&mut self) -> u64 {
            0
        }
        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0);
        }
        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
            dest.fill(0);
            Ok(())
        }
    }

    #[test]
    fn interior_pixels_ask_nothing() {
        let sub = all_ones(3, 3);
        assert!(boundary_questions(&sub, 1, 1).is_empty());
    }

    #[test]
    fn edges_ask_one_direction_and_corners_three() {
        let sub = all_ones(3, 3);
        assert_eq!(boundary_questions(&sub, 0, 1), vec![(North, 1)]);
        assert_eq!(boundary_questions(&sub, 1, 2), vec![(East, 1)]);
        let corner = boundary_questions(&sub, 2, 0);
        assert_eq!(corner, vec![(South, 0), (West, 2), (SouthWest, 0)]);
    }

    #[test]
    fn a_single_row_tile_asks_both_north_and_south() {
        let sub = all_ones(1, 3);
        let questions = boundary_questions(&sub, 0, 1);
        assert!(questions.contains(&(North, 1)));
        assert!(questions.contains(&(South, 1)));
    }

    /// A budget-1 worker must keep serving questions until its large-budget
    /// neighbour has finished too; both sides completing is the proof.
    #[test]
    fn termination_race_between_unequal_budgets() {
        let mut network = channel_network(2);
        let right = network.remove(1);
        let left = network.remove(0);
        let sides = [
            (left, table(&[(East, 1)]), 1u64, 11u64),
            (right, table(&[(West, 0)]), 500, 12),
        ];
        std::thread::scope(|scope| {
            let handles: Vec<_> = sides
                .into_iter()
                .map(|(mut transport, table, budget, seed)| {
                    scope.spawn(move || {
                        let mut sub = all_ones(2, 2);
                        let sampler = Sampler::new(0.5, 0.5).unwrap();
                        let mut rng = StdRng::seed_from_u64(seed);
                        let stats =
                            sample(&mut transport, &table, &mut sub, &sampler, &mut rng, budget)
                                .unwrap();
                        // The observed pixels never change, however the
                        // current ones evolved.
                        for row in 0..2 {
                            for column in 0..2 {
                                assert_eq!(sub.initial(row, column), 1);
                            }
                        }
                        stats
                    })
                })
                .collect();
            let stats: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            assert_eq!(stats[0].proposals, 1);
            assert_eq!(stats[1].proposals, 500);
            // The slow side asked across the shared edge at least once...
            assert!(stats[1].asked[West.index()] > 0);
            // ...and the fast side answered at least one of those while
            // closing down.
            assert!(stats[0].answered[East.index()] > 0);
        });
    }

    /// With every draw forced to the top-left corner and all three of N, W
    /// and NW present, each iteration must pose exactly three questions.
    #[test]
    fn forced_corner_sampling_asks_three_directions() {
        let iterations: u64 = 5;
        let mut network = channel_network(4);
        // Ranks form a 2x2 worker grid; rank 3 is the bottom-right tile.
        let tables = [
            table(&[(East, 1), (South, 2), (SouthEast, 3)]),
            table(&[(West, 0), (South, 3), (SouthWest, 2)]),
            table(&[(North, 0), (East, 3), (NorthEast, 1)]),
            table(&[(North, 1), (West, 2), (NorthWest, 0)]),
        ];
        let stats = std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for (rank, (mut transport, table)) in network.drain(..).zip(tables).enumerate() {
                handles.push(scope.spawn(move || {
                    let mut sub = all_ones(2, 2);
                    let sampler = Sampler::new(0.0, 0.5).unwrap();
                    if rank == 3 {
                        let mut rng = ZeroRng;
                        sample(&mut transport, &table, &mut sub, &sampler, &mut rng, iterations)
                            .unwrap()
                    } else {
                        let mut rng = StdRng::seed_from_u64(rank as u64);
                        sample(&mut transport, &table, &mut sub, &sampler, &mut rng, iterations)
                            .unwrap()
                    }
                }));
            }
            let stats: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            stats[3]
        });
        assert_eq!(stats.asked[North.index()], iterations);
        assert_eq!(stats.asked[West.index()], iterations);
        assert_eq!(stats.asked[NorthWest.index()], iterations);
        assert_eq!(stats.asked.iter().sum::<u64>(), 3 * iterations);
    }
}
