//! Subsidy pool simulation CLI.
//!
//! Inspect allocations and replay purchases against a configured pool.

#[cfg(feature = "cli")]
mod cli {
    use std::path::{Path, PathBuf};

    use anyhow::{ensure, Context, Result};
    use clap::{Parser, Subcommand};
    use rand::prelude::*;
    use storage_subsidies::{
        allocate_subsidies,
        storage::{Blob, BYTES_PER_UNIT_SIZE},
        BlobDescriptor, InMemoryStorage, SharedSubsidies, SubsidyConfig, SubsidyRateBps,
        MAX_SUBSIDY_RATE,
    };
    use tracing::{debug, info};

    #[derive(Parser)]
    #[command(name = "subsidy-sim")]
    #[command(about = "Simulate a shared storage subsidy pool")]
    pub struct Cli {
        #[command(subcommand)]
        pub command: Command,
    }

    #[derive(Subcommand)]
    pub enum Command {
        /// Compute the subsidies granted for one purchase
        Allocate {
            /// Buyer subsidy rate in basis points
            #[arg(short, long, default_value = "500", value_parser = rate_parser())]
            buyer_rate: SubsidyRateBps,

            /// System subsidy rate in basis points
            #[arg(short, long, default_value = "300", value_parser = rate_parser())]
            system_rate: SubsidyRateBps,

            /// Cost of the purchase
            #[arg(short, long)]
            cost: u64,

            /// Pool value before the purchase
            #[arg(short, long)]
            pool: u64,
        },

        /// Replay random purchases against a deployment described in TOML
        Run {
            /// Deployment config file
            #[arg(short, long)]
            config: PathBuf,

            /// Number of purchases to attempt
            #[arg(short = 'n', long, default_value = "100")]
            operations: usize,

            /// Purchases per epoch
            #[arg(long, default_value = "10")]
            epoch_length: usize,

            /// Random seed
            #[arg(long, default_value = "42")]
            seed: u64,
        },

        /// Tabulate allocations as the pool drains
        Sweep {
            /// Buyer subsidy rate in basis points
            #[arg(short, long, default_value = "500", value_parser = rate_parser())]
            buyer_rate: SubsidyRateBps,

            /// System subsidy rate in basis points
            #[arg(short, long, default_value = "300", value_parser = rate_parser())]
            system_rate: SubsidyRateBps,

            /// Cost of the purchase
            #[arg(short, long, default_value = "10000")]
            cost: u64,

            /// Number of pool sizes to sample
            #[arg(short = 'n', long, default_value = "10")]
            steps: u64,
        },
    }

    /// Rates are basis points of the cost, at most 100%.
    fn rate_parser() -> clap::builder::RangedI64ValueParser<SubsidyRateBps> {
        clap::value_parser!(SubsidyRateBps).range(0..=MAX_SUBSIDY_RATE as i64)
    }

    pub fn run(cli: Cli) -> Result<()> {
        match cli.command {
            Command::Allocate {
                buyer_rate,
                system_rate,
                cost,
                pool,
            } => {
                let allocation = allocate_subsidies(buyer_rate, system_rate, cost, pool)?;
                println!("Cost:            {cost}");
                println!("Pool:            {pool}");
                println!("Buyer subsidy:   {}", allocation.buyer_subsidy);
                println!("System subsidy:  {}", allocation.system_subsidy);
                println!("Buyer pays:      {}", cost - allocation.buyer_subsidy);
            }
            Command::Run {
                config,
                operations,
                epoch_length,
                seed,
            } => simulate(&config, operations, epoch_length.max(1), seed)?,
            Command::Sweep {
                buyer_rate,
                system_rate,
                cost,
                steps,
            } => {
                let full = allocate_subsidies(buyer_rate, system_rate, cost, u64::MAX)?.total();
                let steps = steps.max(1);
                println!("{:>14} {:>14} {:>14} {:>8}", "pool", "buyer", "system", "full");
                for i in 0..=steps {
                    let pool = full.saturating_mul(i) / steps;
                    let allocation = allocate_subsidies(buyer_rate, system_rate, cost, pool)?;
                    println!(
                        "{:>14} {:>14} {:>14} {:>8}",
                        pool,
                        allocation.buyer_subsidy,
                        allocation.system_subsidy,
                        if allocation.total() == full { "yes" } else { "no" }
                    );
                }
            }
        }
        Ok(())
    }

    fn simulate(path: &Path, operations: usize, epoch_length: usize, seed: u64) -> Result<()> {
        let config = SubsidyConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?;
        ensure!(!config.buyers.is_empty(), "config lists no buyers");

        let mut rng = StdRng::seed_from_u64(seed);
        let (ledger, _cap) = config.build_ledger(&mut rng)?;
        let shared = SharedSubsidies::new(ledger);
        let initial_total = total_value(&ledger_snapshot(&shared));
        let max_epochs = config.storage.max_epochs_ahead;

        let mut blobs: Vec<(String, Blob)> = Vec::new();
        let mut paid_out = 0u128;

        for op in 0..operations {
            let buyer = &config.buyers[rng.gen_range(0..config.buyers.len())].name;
            let extend = !blobs.is_empty() && rng.gen_bool(0.3);

            let result = if extend {
                let index = rng.gen_range(0..blobs.len());
                let (owner, blob) = &mut blobs[index];
                let epochs = rng.gen_range(1..=max_epochs);
                shared.extend_blob(owner, blob, epochs)
            } else {
                let size = rng.gen_range(1..=8) * BYTES_PER_UNIT_SIZE;
                let epochs = rng.gen_range(1..=max_epochs);
                shared
                    .reserve_space(buyer, size, epochs)
                    .and_then(|(storage, settlement)| {
                        let descriptor = BlobDescriptor {
                            blob_id: rng.gen(),
                            size,
                            deletable: false,
                        };
                        let blob = shared
                            .transact(|ledger| ledger.register_blob(buyer, storage, descriptor))?;
                        blobs.push((buyer.clone(), blob));
                        Ok(settlement)
                    })
            };
            match result {
                Ok(settlement) => debug!(op, ?settlement, "purchase committed"),
                Err(err) => debug!(op, %err, "purchase rejected"),
            }

            if (op + 1) % epoch_length == 0 {
                let paid = shared.transact(|ledger| Ok(ledger.system_mut().advance_epoch()))?;
                paid_out += paid.value() as u128;
                let epoch = shared.read(|ledger| ledger.system().current_epoch());
                blobs.retain(|(_, blob)| blob.end_epoch() > epoch);
                info!(epoch, paid = paid.value(), pool = shared.subsidy_pool_value(), "epoch closed");
            }
        }

        let snapshot = ledger_snapshot(&shared);
        let final_total = total_value(&snapshot) + paid_out;
        let stats = shared.stats();

        println!("=== Subsidy Simulation ===");
        println!("Operations:            {operations}");
        println!("Subsidised:            {}", stats.subsidized_operations());
        println!("Fast path:             {}", stats.fast_path_operations());
        println!("Rejected:              {}", stats.failed_operations());
        println!("Buyer subsidies paid:  {}", stats.buyer_subsidies_paid());
        println!("System subsidies paid: {}", stats.system_subsidies_paid());
        println!();
        println!("Pool remaining:        {}", snapshot.pool);
        println!("Network rewards held:  {}", snapshot.rewards);
        println!("Network rewards paid:  {paid_out}");
        for (name, value) in &snapshot.accounts {
            println!("  {name:<20} {value}");
        }

        ensure!(
            final_total == initial_total,
            "value not conserved: started with {initial_total}, ended with {final_total}"
        );
        println!();
        println!("Value conserved: {final_total}");
        Ok(())
    }

    struct Snapshot {
        pool: u64,
        rewards: u64,
        accounts: Vec<(String, u64)>,
    }

    fn ledger_snapshot(shared: &SharedSubsidies<InMemoryStorage>) -> Snapshot {
        shared.read(|ledger| Snapshot {
            pool: ledger.subsidies().subsidy_pool_value(),
            rewards: ledger.system().total_rewards(),
            accounts: ledger
                .accounts()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        })
    }

    fn total_value(snapshot: &Snapshot) -> u128 {
        snapshot.pool as u128
            + snapshot.rewards as u128
            + snapshot.accounts.iter().map(|(_, v)| *v as u128).sum::<u128>()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_rates_above_max_are_rejected() {
            for args in [
                ["subsidy-sim", "allocate", "-b", "20000", "-c", "100", "-p", "1000"],
                ["subsidy-sim", "allocate", "-s", "10001", "-c", "100", "-p", "1000"],
                ["subsidy-sim", "sweep", "-b", "10001", "-s", "0", "-c", "100"],
                ["subsidy-sim", "sweep", "-b", "0", "-s", "65535", "-c", "100"],
            ] {
                assert!(Cli::try_parse_from(args).is_err(), "{args:?}");
            }
        }

        #[test]
        fn test_full_rate_is_accepted() {
            let cli =
                Cli::try_parse_from(["subsidy-sim", "allocate", "-b", "10000", "-c", "100", "-p", "0"])
                    .unwrap();
            assert!(matches!(
                cli.command,
                Command::Allocate {
                    buyer_rate: 10_000,
                    system_rate: 300,
                    ..
                }
            ));
            run(cli).unwrap();
        }
    }
}

#[cfg(feature = "cli")]
fn main() -> anyhow::Result<()> {
    use clap::Parser;
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = cli::Cli::parse();
    cli::run(cli)
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("This binary requires the 'cli' feature. Build with:");
    eprintln!("  cargo build -p storage-subsidies --features cli --bin subsidy-sim");
}
