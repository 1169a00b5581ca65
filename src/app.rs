use crate::cli::{Cli, Commands};
use anyhow::{Context, Result};
use audioshrink::config::Config;
use audioshrink::engine::{
    self, AudioFormat, EncodeRequest, EncodedOutput, EncoderSession, Event, EventKind,
    FfmpegChannelFactory, ProgressMode, SessionOptions, SessionState,
};
use std::collections::VecDeque;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::Level;

/// How many trailing stderr lines to show when an encode fails
const STDERR_TAIL: usize = 12;

pub struct CompressArgs {
    pub file: PathBuf,
    pub bitrate: Option<u32>,
    pub format: Option<AudioFormat>,
    pub output_dir: Option<PathBuf>,
    pub encoder: Option<PathBuf>,
    pub timeout: Option<u64>,
    pub keep_original: bool,
    pub raw_progress: bool,
    pub no_guard: bool,
}

pub fn run(cli: Cli) {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: {:#}; using built-in defaults", e);
            Config::default()
        }
    };

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        engine::parse_level(&config.logging.level).unwrap_or(Level::INFO)
    };
    if let Err(e) = engine::init_logging(level, config.logging.debug_file) {
        eprintln!("Warning: {:#}", e);
    }

    let result = match cli.command {
        Commands::Compress {
            file,
            bitrate,
            format,
            output_dir,
            encoder,
            timeout,
            keep_original,
            raw_progress,
            no_guard,
        } => handle_compress(
            &config,
            CompressArgs {
                file,
                bitrate,
                format,
                output_dir,
                encoder,
                timeout,
                keep_original,
                raw_progress,
                no_guard,
            },
        ),
        Commands::DryRun {
            file,
            bitrate,
            format,
        } => handle_dry_run(&config, file, bitrate, format),
        Commands::Probe { file } => handle_probe(&config, file),
        Commands::CheckFfmpeg => handle_check_ffmpeg(&config),
        Commands::InitConfig => handle_init_config(),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

/// Build the request from CLI flags layered over config
fn build_request(
    config: &Config,
    file: &Path,
    buffer: Vec<u8>,
    bitrate: Option<u32>,
    format: Option<AudioFormat>,
    encoder: Option<PathBuf>,
) -> Result<EncodeRequest> {
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("Not a file: {}", file.display()))?;

    let request = match format.or(config.defaults.format) {
        Some(format) => EncodeRequest::with_explicit_format(file_name, buffer, format)?,
        None => EncodeRequest::new(file_name, buffer)?,
    };

    Ok(request
        .with_bit_rate(bitrate.unwrap_or(config.defaults.bit_rate))?
        .with_encoder_path(encoder.unwrap_or_else(|| config.defaults.encoder_path.clone())))
}

fn session_options(config: &Config, args: &CompressArgs) -> SessionOptions {
    let mut options = config.session.to_options();
    if args.raw_progress {
        options.progress_mode = ProgressMode::Raw;
    }
    if args.no_guard {
        options.bitrate_guard = false;
    }
    if let Some(secs) = args.timeout {
        options.deadline = Some(Duration::from_secs(secs));
    }
    options
}

fn resolve_output_dir(config: &Config, args: &CompressArgs) -> PathBuf {
    args.output_dir
        .clone()
        .or_else(|| config.defaults.output_dir.clone())
        .unwrap_or_else(|| match args.file.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        })
}

/// What the terminal listeners observed
enum Outcome {
    Success(EncodedOutput),
    Fail { code: i32 },
    Abort { message: String },
}

fn handle_compress(config: &Config, args: CompressArgs) -> Result<()> {
    let buffer = fs::read(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let request = build_request(
        config,
        &args.file,
        buffer,
        args.bitrate,
        args.format,
        args.encoder.clone(),
    )?;
    let options = session_options(config, &args);
    let output_dir = resolve_output_dir(config, &args);
    let target_kbps = request.bit_rate;
    let guard_enabled = options.bitrate_guard;

    println!(
        "Compressing {} -> {} at {}kb/s",
        request.file_name, request.format, request.bit_rate
    );

    let factory = Arc::new(FfmpegChannelFactory::new(request.encoder_path.clone()));
    let mut session = EncoderSession::with_options(request, factory, options)?;

    let outcome: Arc<Mutex<Option<Outcome>>> = Arc::new(Mutex::new(None));
    let stderr_tail: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(VecDeque::new()));

    session.on(EventKind::Progress, |event, _| {
        if let Event::Progress(pct) = event {
            print!("\r  {:>3}%", pct);
            let _ = std::io::stdout().flush();
        }
    });

    let tail = Arc::clone(&stderr_tail);
    session.on(EventKind::Stderr, move |event, _| {
        if let Event::Stderr(line) = event {
            tracing::trace!(target: "ffmpeg", "{}", line);
            if let Ok(mut tail) = tail.lock() {
                if tail.len() == STDERR_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line.clone());
            }
        }
    });

    for kind in [EventKind::Success, EventKind::Fail, EventKind::Abort] {
        let slot = Arc::clone(&outcome);
        session.on(kind, move |event, _| {
            let observed = match event {
                Event::Success(output) => Outcome::Success(output.clone()),
                Event::Fail(report) => Outcome::Fail { code: report.code },
                Event::Abort { message } => Outcome::Abort {
                    message: message.clone(),
                },
                _ => return,
            };
            if let Ok(mut slot) = slot.lock() {
                *slot = Some(observed);
            }
        });
    }

    session.convert()?;
    let state = session.wait()?;
    println!();

    let observed = outcome
        .lock()
        .map_err(|_| anyhow::anyhow!("outcome lock poisoned"))?
        .take();

    match (state, observed) {
        (SessionState::Completed, Some(Outcome::Success(output))) => {
            let blobs = session.blob_store();
            let blob = blobs
                .resolve(&output.url)
                .with_context(|| format!("Output URL {} was already revoked", output.url))?;
            let name = destination_name(&output_dir, &args.file, &output.name, target_kbps);
            let dest = write_output(&output_dir, &name, &blob.data)?;
            blobs.revoke(&output.url);
            println!("Encoded: {} ({} bytes)", dest.display(), blob.len());
            Ok(())
        }
        (SessionState::Failed, Some(Outcome::Fail { code })) => {
            if let Ok(tail) = stderr_tail.lock() {
                for line in tail.iter() {
                    eprintln!("  {}", line);
                }
            }
            anyhow::bail!("ffmpeg exited with code {}", code)
        }
        (SessionState::Aborted, Some(Outcome::Abort { message })) => {
            let guard_tripped =
                guard_enabled && session.source_bit_rate().is_some_and(|s| s <= target_kbps);
            if !guard_tripped {
                anyhow::bail!("Encode aborted: {}", message);
            }

            println!("Skipped: {}", message);
            let keep = args.keep_original || config.defaults.keep_original_on_guard;
            if keep {
                let name = &session.request().file_name;
                let dest = output_dir.join(name);
                if same_file(&dest, &args.file) {
                    println!("Original left in place: {}", dest.display());
                } else {
                    let dest = write_output(&output_dir, name, &session.request().file_buffer)?;
                    println!("Kept original: {}", dest.display());
                }
            }
            Ok(())
        }
        (state, _) => anyhow::bail!("Session ended in unexpected state {:?}", state),
    }
}

fn write_output(dir: &Path, name: &str, data: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
    let dest = dir.join(name);
    fs::write(&dest, data).with_context(|| format!("Failed to write {}", dest.display()))?;
    Ok(dest)
}

/// Name to write an encoded output under
///
/// An output that would land on the input itself (mp3 to mp3 beside the
/// original) gets the target bitrate appended to its stem instead.
fn destination_name(output_dir: &Path, input: &Path, name: &str, kbps: u32) -> String {
    if !same_file(&output_dir.join(name), input) {
        return name.to_string();
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let renamed = match path.extension() {
        Some(ext) => format!("{}-{}k.{}", stem, kbps, ext.to_string_lossy()),
        None => format!("{}-{}k", stem, kbps),
    };
    tracing::debug!(from = name, to = %renamed, "output would overwrite its input");
    renamed
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn handle_dry_run(
    config: &Config,
    file: PathBuf,
    bitrate: Option<u32>,
    format: Option<AudioFormat>,
) -> Result<()> {
    // The buffer is never sent anywhere; the command only needs the name
    let request = build_request(config, &file, Vec::new(), bitrate, format, None)?;
    let args = engine::build_arguments(&request.file_name, request.bit_rate, request.format);

    let mut full = vec!["-hide_banner".to_string(), "-nostdin".to_string()];
    full.extend(args);
    println!(
        "{}",
        engine::format_command(&request.encoder_path.to_string_lossy(), &full)
    );
    Ok(())
}

fn handle_probe(config: &Config, file: PathBuf) -> Result<()> {
    let ffprobe = engine::sibling_ffprobe(&config.defaults.encoder_path);
    let probe = engine::probe_audio(&ffprobe, &file)?;

    match probe.duration_s {
        Some(d) => println!("Duration: {:.2} seconds", d),
        None => println!("Duration: unknown"),
    }
    match probe.bit_rate_kbps {
        Some(kbps) => {
            println!("Bitrate: {} kb/s", kbps);
            if config.session.bitrate_guard && kbps <= config.defaults.bit_rate {
                println!(
                    "Already at or below the {}kb/s target; compress would skip it",
                    config.defaults.bit_rate
                );
            }
        }
        None => println!("Bitrate: unknown"),
    }
    Ok(())
}

fn handle_check_ffmpeg(config: &Config) -> Result<()> {
    let encoder = &config.defaults.encoder_path;
    let version = engine::ffmpeg_version(encoder)?;
    println!("ffmpeg found: {}", version);

    for (format, available) in engine::supported_formats(encoder)? {
        println!(
            "  {:<4} {:<11} {}",
            format.name(),
            format.codec(),
            if available { "OK" } else { "MISSING" }
        );
    }
    Ok(())
}

fn handle_init_config() -> Result<()> {
    let path = Config::config_path()?;
    if Config::exists() {
        match Config::load_from(&path) {
            Ok(cfg) => {
                println!("Config loaded successfully from {}", path.display());
                println!("{:#?}", cfg);
                return Ok(());
            }
            Err(e) => println!("Config invalid: {:#}", e),
        }
    } else {
        println!("Config missing");
    }

    println!("Creating default config...");
    Config::default().save()?;
    println!("Default config saved to {}", path.display());
    Ok(())
}
