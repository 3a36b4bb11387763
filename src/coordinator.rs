//! The coordinator rank: partitions the image, ships each worker its tile
//! and neighbour table, and reassembles the denoised result.

use crate::coder::{CborCoder, Coder};
use crate::direction::ALL;
use crate::error::{Error, Result};
use crate::image::Image;
use crate::message::{channel_network, Tag, Transport};
use crate::sub_image::Pixel;
use crate::topology::WorkerGrid;
use crate::worker::{self, WorkerConfig, WorkerStats};
use log::info;

/// The sampling job, as seen by the coordinator.
#[derive(Clone, Copy, Debug)]
pub struct Job {
    pub beta: f64,
    pub pi: f64,
    /// Total iteration budget, split evenly over the workers.
    pub total_iterations: u64,
    pub seed: u64,
}

/// Drive a denoising run from rank 0. Workers are expected on ranks
/// `1..=workers` of the same transport network.
pub fn run<T: Transport>(transport: &mut T, image: &Image, workers: usize) -> Result<Image> {
    if transport.size() != workers + 1 {
        return Err(Error::Topology(format!(
            "{} workers need a network of {} ranks, found {}",
            workers,
            workers + 1,
            transport.size()
        )));
    }
    let grid = WorkerGrid::derive(workers, image.rows(), image.columns())?;
    let (tile_rows, tile_cols) = grid.tile_shape();
    info!(
        "partitioning a {}x{} image over a {:?} worker grid ({}x{} tiles)",
        image.rows(),
        image.columns(),
        grid.shape(),
        tile_rows,
        tile_cols
    );

    let ints = CborCoder::<i32>::new();
    let rows_code = CborCoder::<Vec<Pixel>>::new();
    let mut handles = Vec::new();
    for w in 0..grid.workers() {
        let rank = w + 1;
        handles.push(transport.post_send(rank, Tag::Rows, ints.encode(&(tile_rows as i32)))?);
        handles.push(transport.post_send(rank, Tag::Columns, ints.encode(&(tile_cols as i32)))?);
        for direction in ALL {
            let peer = grid
                .neighbour(w, direction)
                .map_or(-1, |neighbour| (neighbour + 1) as i32);
            handles.push(transport.post_send(
                rank,
                Tag::Neighbour(direction),
                ints.encode(&peer),
            )?);
        }
        let (row_span, col_span) = grid.tile(w);
        for (i, row) in row_span.enumerate() {
            let pixels = image.row(row)[col_span.clone()].to_vec();
            handles.push(transport.post_send(rank, Tag::ImageRow(i), rows_code.encode(&pixels))?);
        }
    }
    transport.wait_all(&handles)?;
    for handle in handles {
        transport.retire(handle)?;
    }

    let mut result = image.clone();
    for w in 0..grid.workers() {
        let (row_span, col_span) = grid.tile(w);
        for (i, row) in row_span.enumerate() {
            let handle = transport.post_recv(w + 1, Tag::FinalRow(i))?;
            let pixels = rows_code.decode(&transport.wait(handle)?);
            result.splice_row(row, col_span.clone(), &pixels);
        }
    }
    info!("reassembled the final image");
    Ok(result)
}

/// Run an entire job in this process: one thread per rank over the channel
/// transport, coordinator on the calling thread. Returns the denoised
/// image and each worker's statistics.
pub fn denoise_in_process(image: &Image, workers: usize, job: &Job) -> Result<(Image, Vec<WorkerStats>)> {
    // Fail on an untileable worker count before any thread exists; a
    // worker blocked in its startup receive has no other way out.
    WorkerGrid::derive(workers, image.rows(), image.columns())?;
    let mut network = channel_network(workers + 1);
    let mut coordinator = network.remove(0);
    std::thread::scope(|scope| {
        let handles: Vec<_> = network
            .into_iter()
            .map(|mut transport| {
                let config = WorkerConfig {
                    coordinator: 0,
                    iterations: job.total_iterations / workers as u64,
                    beta: job.beta,
                    pi: job.pi,
                    seed: job.seed.wrapping_add(transport.rank() as u64),
                };
                scope.spawn(move || worker::run(&mut transport, &config))
            })
            .collect();
        let result = run(&mut coordinator, image, workers)?;
        let mut stats = Vec::new();
        for handle in handles {
            stats.push(
                handle
                    .join()
                    .map_err(|_| Error::Transport("worker thread panicked".into()))??,
            );
        }
        Ok((result, stats))
    })
}
