mod cli;
mod processor;

use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};

use cli::{Cli, Commands};
use processor::{detect_source_kind, QueueProcessor};
use rf_core::config::Config;
use rf_core::job::{Container, EncodingProfile, JobDescriptor};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "ripforge=trace,rf_pipeline=trace,rf_av=debug,rf_core=debug,rf_probe=debug"
                .to_string()
        } else {
            "ripforge=debug,rf_pipeline=debug,rf_av=info,rf_core=info,rf_probe=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Run {
            inputs,
            target,
            output_dir,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_queue(
                &inputs,
                &target,
                output_dir.as_deref(),
                cli.config.as_deref(),
            ))
        }
        Commands::Probe { file, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_file(&file, json, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("ripforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn parse_target(target: &str) -> Result<Container> {
    match target.to_ascii_lowercase().as_str() {
        "mkv" => Ok(Container::Mkv),
        "mp4" => Ok(Container::Mp4),
        "ts" => Ok(Container::Ts),
        other => anyhow::bail!("unknown target container: {other} (expected mkv, mp4 or ts)"),
    }
}

async fn run_queue(
    inputs: &[PathBuf],
    target: &str,
    output_dir: Option<&Path>,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = Config::load_or_default(config_path);
    for warning in config.validate() {
        tracing::warn!("Config: {warning}");
    }

    let target = parse_target(target)?;
    let out_dir = output_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.work.dir.clone());
    let processor = QueueProcessor::new(config)?;

    let mut failures = 0usize;
    for input in inputs {
        if !input.exists() {
            tracing::error!(input = %input.display(), "Input does not exist; skipping");
            failures += 1;
            continue;
        }

        let kind = detect_source_kind(input);
        let base = input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".into());
        let output = out_dir.join(format!("{base}.{target}"));

        let profile = EncodingProfile {
            target,
            ..Default::default()
        };
        let mut job = JobDescriptor::new(input.clone(), output, kind, profile);

        tracing::info!(job = %job.id, input = %input.display(), ?kind, "Queued");

        let result = async {
            processor.prepare(&mut job).await?;
            processor.process(&mut job).await
        }
        .await;

        match result {
            Ok(()) => println!("{} -> {}", input.display(), job.output.display()),
            Err(e) => {
                tracing::error!(input = %input.display(), error = %e, "Job failed");
                eprintln!("{}: {e}", input.display());
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} job(s) failed", inputs.len());
    }
    Ok(())
}

async fn probe_file(file: &Path, json: bool, config_path: Option<&Path>) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let config = Config::load_or_default(config_path);
    let tools = rf_av::ToolRegistry::discover(&config.tools);
    let ffprobe = tools.require("ffprobe")?;
    let info = rf_probe::probe(&ffprobe.path, file).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("File: {}", info.file_path.display());
    println!("Container: {}", info.container);
    println!("Size: {} bytes", info.file_size);
    if let Some(duration) = info.duration {
        let secs = duration.as_secs();
        let mins = secs / 60;
        let hours = mins / 60;
        println!("Duration: {:02}:{:02}:{:02}", hours, mins % 60, secs % 60);
    }

    println!("\nVideo Tracks: {}", info.video_tracks.len());
    for track in &info.video_tracks {
        print!(
            "  [{}] {} {}x{}",
            track.index, track.codec, track.width, track.height
        );
        if let Some(fps) = track.frame_rate {
            print!(", {fps:.3} fps");
        }
        if let Some(frames) = track.frame_count {
            print!(", {frames} frames");
        }
        println!();
    }

    println!("\nAudio Tracks: {}", info.audio_tracks.len());
    for track in &info.audio_tracks {
        print!("  [{}] {} {}ch", track.index, track.codec, track.channels);
        if let Some(ref lang) = track.language {
            print!(" ({lang})");
        }
        println!();
    }

    println!("\nSubtitle Tracks: {}", info.subtitle_tracks.len());
    for track in &info.subtitle_tracks {
        print!("  [{}] {}", track.index, track.codec);
        if let Some(ref lang) = track.language {
            print!(" ({lang})");
        }
        if track.forced {
            print!(" [forced]");
        }
        println!();
    }

    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = Config::load_or_default(config_path);
    let tools = rf_av::ToolRegistry::discover(&config.tools);
    let mut all_ok = true;

    for tool in tools.check_all() {
        let status = if tool.available {
            "ok "
        } else {
            all_ok = false;
            "-- "
        };

        print!("{status}{}", tool.name);
        if let Some(ref version) = tool.version {
            print!(" ({version})");
        }
        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }
        println!();
    }

    println!();
    if all_ok {
        println!("All wrapped tools are available.");
    } else {
        println!("Some tools are missing; stages that need them will fail to launch.");
    }
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let contents = std::fs::read_to_string(p)?;
            Config::from_json(&contents)?
        }
        None => {
            println!("No config file specified, validating defaults");
            Config::default()
        }
    };

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("Configuration is valid");
    } else {
        println!("Configuration parsed with {} warning(s):", warnings.len());
        for w in &warnings {
            println!("  - {w}");
        }
    }
    println!("  Work dir: {}", config.work.dir.display());
    println!(
        "  Pipe channels: {} / {}",
        config.pipes.decode_channel, config.pipes.encode_channel
    );
    println!("  Child niceness: {}", config.process.nice);

    Ok(())
}
