use clap::Parser;
use despeckle::coordinator::{self, Job};
use despeckle::error::{Error, Result};
use despeckle::image::Image;
use despeckle::message::{TcpTransport, Transport};
use despeckle::worker::{self, WorkerConfig};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[clap(name = "denoiser", version, about = "Distributed Ising-model image denoiser")]
struct Opts {
    /// Noisy input image: whitespace-separated -1/+1 values, one row per line
    input: PathBuf,

    /// Where to write the denoised image
    output: PathBuf,

    /// Neighbour coupling strength
    beta: f64,

    /// Assumed flip probability of the noise channel, in (0, 1)
    pi: f64,

    #[clap(short, long, default_value_t = 4)]
    workers: usize,

    /// Total iteration budget, split evenly over the workers
    #[clap(short, long, default_value_t = 1_000_000)]
    iterations: u64,

    /// threads|tcp
    #[clap(short, long, default_value = "threads")]
    strategy: String,

    /// Seed for the per-worker random sources; random if omitted
    #[clap(long)]
    seed: Option<u64>,

    /// First port of the per-rank loopback listeners (tcp strategy)
    #[clap(long, default_value_t = 7070)]
    port: u16,
}

fn peer(port: u16, rank: usize) -> SocketAddr {
    SocketAddr::new(
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
        port + rank as u16,
    )
}

/// Run every rank as a thread over loopback TCP sockets. All listeners are
/// bound before any rank starts, so connects cannot race the binds.
fn denoise_tcp(image: &Image, opts: &Opts, job: &Job) -> Result<Image> {
    // Validate the topology while no rank is waiting on a message yet.
    despeckle::topology::WorkerGrid::derive(opts.workers, image.rows(), image.columns())?;
    let peers: Vec<_> = (0..=opts.workers).map(|rank| peer(opts.port, rank)).collect();
    let mut network = (0..=opts.workers)
        .map(|rank| TcpTransport::new(rank, peers.clone()))
        .collect::<Result<Vec<_>>>()?;
    let mut coordinator_transport = network.remove(0);
    std::thread::scope(|scope| {
        let handles: Vec<_> = network
            .into_iter()
            .map(|mut transport| {
                let config = WorkerConfig {
                    coordinator: 0,
                    iterations: job.total_iterations / opts.workers as u64,
                    beta: job.beta,
                    pi: job.pi,
                    seed: job.seed.wrapping_add(transport.rank() as u64),
                };
                scope.spawn(move || worker::run(&mut transport, &config))
            })
            .collect();
        let result = coordinator::run(&mut coordinator_transport, image, opts.workers)?;
        for handle in handles {
            handle
                .join()
                .map_err(|_| Error::Transport("worker thread panicked".into()))??;
        }
        Ok(result)
    })
}

fn run(opts: &Opts) -> Result<()> {
    let image = Image::load(&opts.input)?;
    let job = Job {
        beta: opts.beta,
        pi: opts.pi,
        total_iterations: opts.iterations,
        seed: opts.seed.unwrap_or_else(rand::random),
    };
    let denoised = match opts.strategy.as_str() {
        "threads" => coordinator::denoise_in_process(&image, opts.workers, &job)?.0,
        _ => denoise_tcp(&image, opts, &job)?,
    };
    denoised.save(&opts.output)
}

fn main() {
    env_logger::init();
    let opts = match Opts::try_parse() {
        Ok(opts) => opts,
        Err(error) => {
            let _ = error.print();
            let code = match error.kind() {
                clap::ErrorKind::DisplayHelp | clap::ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            std::process::exit(code);
        }
    };
    if !(opts.pi > 0.0 && opts.pi < 1.0) {
        eprintln!("Error: pi must lie in (0, 1)");
        std::process::exit(1);
    }
    if opts.workers == 0 {
        eprintln!("Error: at least one worker is required");
        std::process::exit(1);
    }
    if !["threads", "tcp"].contains(&opts.strategy.as_str()) {
        eprintln!("Error: --strategy options are [threads|tcp]");
        std::process::exit(1);
    }
    if let Err(error) = run(&opts) {
        eprintln!("Error: {}", error);
        std::process::exit(2);
    }
}
