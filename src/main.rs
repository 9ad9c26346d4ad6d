mod cli;

use reframe::{config, probe, remux};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "reframe=trace,reframe_pipeline=trace,reframe_media=debug".to_string()
        } else {
            "reframe=info,reframe_pipeline=info,reframe_media=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Probe { file, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_file(&file, json))
        }
        Commands::Remux {
            input,
            output,
            codec,
            bitrate,
            chunk_duration,
            lookahead,
        } => {
            let mut config = config::load_config_or_default(cli.config.as_deref())?;
            let options = &mut config.transcode;
            if let Some(bitrate) = bitrate {
                options.output.bitrate = bitrate;
            }
            if let Some(secs) = chunk_duration {
                options.chunk_duration_secs = secs;
            }
            if let Some(frames) = lookahead {
                options.max_pending_frames = frames;
            }
            config::validate_config(&config)?;

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(remux_file(&input, &output, config, codec))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("reframe {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn probe_file(file: &Path, json: bool) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let report = probe::probe_file(file).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report);
    }
    Ok(())
}

async fn remux_file(
    input: &Path,
    output: &Path,
    config: config::Config,
    codec: Option<String>,
) -> Result<()> {
    if !input.exists() {
        anyhow::bail!("Input file does not exist: {:?}", input);
    }

    let summary = remux::remux_file(input, output, config.transcode, codec).await?;
    println!(
        "Wrote {} frames, {} bytes to {}",
        summary.frames,
        summary.bytes_written,
        output.display()
    );
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            config::load_config(p)?
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };

    let options = &config.transcode;
    println!("✓ Configuration is valid");
    println!("  Formats: {} -> {}", options.input_format, options.output_format);
    println!(
        "  Output: {} {}x{} @ {} bps",
        options.output.codec, options.output.width, options.output.height, options.output.bitrate
    );
    println!("  Lookahead: {} frames", options.max_pending_frames);
    println!("  Chunk duration: {}s", options.chunk_duration_secs);
    Ok(())
}
