use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context as _};
use ash::vk;
use clap::{Parser, Subcommand};
use tracing::info;

use gpubatch_core::{default_config_path, ContextConfig};
use gpubatch_engine::{
    BufferKind, Context, Device, PipelineBarrier, RecordingDevice, VulkanBuffer, VulkanDevice,
};

#[derive(Parser)]
#[command(name = "gpubatch")]
#[command(about = "gpubatch - batched command submission for Vulkan compute")]
#[command(version)]
struct Cli {
    /// Configuration file path (defaults to $GPUBATCH_CONFIG or ./gpubatch.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the adapter a context would be created on
    Info {
        /// Index among compute-capable adapters
        #[arg(short, long, default_value_t = 0)]
        adapter: usize,
    },

    /// Print the effective context configuration as TOML
    Config,

    /// Record buffer copies through a context and report batching behaviour
    BenchCopy {
        /// Bytes per copy
        #[arg(short, long, default_value_t = 1 << 20)]
        size: u32,

        /// Number of copies to record
        #[arg(short = 'n', long, default_value_t = 256)]
        count: u32,

        /// Override cmd_submit_frequency from the config
        #[arg(short, long)]
        frequency: Option<u32>,

        /// Bracket every copy with timestamps and print a report
        #[arg(long)]
        profile: bool,

        /// Record against a host-only device instead of a GPU
        #[arg(long)]
        dry_run: bool,

        /// Index among compute-capable adapters
        #[arg(short, long, default_value_t = 0)]
        adapter: usize,
    },
}

fn load_config(path: Option<String>) -> anyhow::Result<ContextConfig> {
    let path = path.unwrap_or_else(default_config_path);
    if !Path::new(&path).exists() {
        info!("no config at {}, using defaults", path);
        return Ok(ContextConfig::default());
    }
    ContextConfig::load(&path).with_context(|| format!("invalid config {}", path))
}

fn main() -> anyhow::Result<()> {
    gpubatch_common::init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Info { adapter } => {
            let device = VulkanDevice::new(adapter)?;
            println!("Adapter {}: {}", adapter, device.name());
            println!("  Timestamp period: {} ns/tick", device.timestamp_period());
        }

        Commands::Config => {
            let config = load_config(cli.config)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }

        Commands::BenchCopy {
            size,
            count,
            frequency,
            profile,
            dry_run,
            adapter,
        } => {
            let mut config = load_config(cli.config)?;
            if let Some(frequency) = frequency {
                config.cmd_submit_frequency = frequency;
            }
            if profile && u64::from(count) * 2 > u64::from(config.query_pool.max_query_count) {
                bail!(
                    "profiling {} copies needs {} timestamp queries, query_pool.max_query_count is {}",
                    count,
                    u64::from(count) * 2,
                    config.query_pool.max_query_count
                );
            }

            let device: Arc<dyn Device> = if dry_run {
                Arc::new(RecordingDevice::new())
            } else {
                Arc::new(VulkanDevice::new(adapter)?)
            };
            let ctx = Context::new(device, config)?;
            bench_copy(&ctx, size, count, profile)?;
        }
    }

    Ok(())
}

fn bench_copy(ctx: &Context, size: u32, count: u32, profile: bool) -> anyhow::Result<()> {
    let device = ctx.device();
    let src = device.create_buffer(u64::from(size), BufferKind::Staging)?;
    let dst = match device.create_buffer(u64::from(size), BufferKind::Storage { gpu_only: true }) {
        Ok(dst) => dst,
        Err(e) => {
            ctx.register_buffer_cleanup(src);
            return Err(e.into());
        }
    };

    if profile {
        ctx.enable_op_profiling();
        ctx.reset_querypool()?;
    }

    let started = Instant::now();
    let recorded = record_copies(ctx, &src, &dst, size, count);
    // Released on the flush below whether or not recording succeeded
    ctx.register_buffer_cleanup(src);
    ctx.register_buffer_cleanup(dst);
    recorded?;
    ctx.flush()?;
    let elapsed = started.elapsed();

    println!("Device:            {}", device.name());
    println!("Copies:            {} x {} bytes", count, size);
    println!("Submit frequency:  {}", ctx.config().cmd_submit_frequency);
    println!("Queue submissions: {}", ctx.submissions());
    println!("Elapsed:           {:.3} ms", elapsed.as_secs_f64() * 1e3);

    if profile {
        println!();
        print!("{}", ctx.querypool().generate_report()?);
    }
    Ok(())
}

fn record_copies(
    ctx: &Context,
    src: &VulkanBuffer,
    dst: &VulkanBuffer,
    size: u32,
    count: u32,
) -> anyhow::Result<()> {
    let barrier = PipelineBarrier::stages(
        vk::PipelineStageFlags::TRANSFER,
        vk::PipelineStageFlags::TRANSFER,
    );
    for i in 0..count {
        ctx.submit_copy(&barrier, src, dst, [size, 1, 1], [0, 0, 0], [0, 0, 0])
            .with_context(|| format!("copy {} of {}", i + 1, count))?;
    }
    Ok(())
}
