//! vstream CLI entrypoint.
//!
//! ```bash
//! vstream encode --input frames.yuv --output stream.vsb --width 1920 --height 1080
//! vstream decode --input stream.vsb --output frames.yuv --json
//! vstream roundtrip --input frames.yuv --output decoded.yuv --width 640 --height 360 --quantizer 2
//! ```

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use vstream_core::error::{EngineError, Result};
use vstream_core::types::{EncodeConfig, PixelLayout};
use vstream_io::{FileByteSink, FileByteSource};
use vstream_pipeline::{DecodePipeline, EncodePipeline, PipelineConfig, PipelineReport};
use vstream_swcodec::{SwDecoder, SwEncoder, SwEngineConfig};

const JSON_SCHEMA_VERSION: u32 = 1;

#[derive(Parser, Debug)]
#[command(
    name = "vstream",
    version,
    about = "Streaming decode/encode through asynchronous codec engines",
    arg_required_else_help = true,
    after_help = "Examples:\n  vstream encode -i in.yuv -o out.vsb --width 1280 --height 720\n  vstream decode -i out.vsb -o back.yuv --json\n  vstream roundtrip -i in.yuv -o back.yuv --width 1280 --height 720 --quantizer 2"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode a compressed stream into packed raw frames.
    Decode(DecodeArgs),
    /// Encode packed raw frames into a compressed stream.
    Encode(EncodeArgs),
    /// Encode, then decode the result again.
    Roundtrip(RoundtripArgs),
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::Encode(_) => "encode",
            Self::Roundtrip(_) => "roundtrip",
        }
    }

    fn json(&self) -> bool {
        match self {
            Self::Decode(args) => args.common.json,
            Self::Encode(args) => args.common.json,
            Self::Roundtrip(args) => args.common.json,
        }
    }
}

#[derive(Args, Debug, Clone)]
struct CommonArgs {
    /// Optional JSON file with pipeline settings; flags override it.
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Initial compressed buffer capacity in bytes.
    #[arg(long = "buffer-capacity")]
    buffer_capacity: Option<usize>,

    /// Upper bound for compressed buffer growth in bytes.
    #[arg(long = "max-buffer-capacity")]
    max_buffer_capacity: Option<usize>,

    /// Bounded wait per completion poll, in milliseconds.
    #[arg(long = "poll-timeout-ms")]
    poll_timeout_ms: Option<u64>,

    /// Sleep between busy resubmissions, in milliseconds.
    #[arg(long = "busy-backoff-ms")]
    busy_backoff_ms: Option<u64>,

    /// Consecutive busy resubmissions before giving up.
    #[arg(long = "max-busy-retries")]
    max_busy_retries: Option<u32>,

    /// Pictures the engine holds back before its first output.
    #[arg(long = "output-delay")]
    output_delay: Option<usize>,

    /// Polls before a completion token reports done.
    #[arg(long = "latency-polls")]
    latency_polls: Option<u32>,

    /// Emit one structured JSON line to stdout.
    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

impl CommonArgs {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(v) = self.buffer_capacity {
            config.buffer_capacity = v;
        }
        if let Some(v) = self.max_buffer_capacity {
            config.max_buffer_capacity = v;
        }
        if let Some(v) = self.poll_timeout_ms {
            config.poll_timeout_ms = v;
        }
        if let Some(v) = self.busy_backoff_ms {
            config.busy_backoff_ms = v;
        }
        if let Some(v) = self.max_busy_retries {
            config.max_busy_retries = v;
        }
        config.validate()?;
        Ok(config)
    }

    fn engine_config(&self) -> SwEngineConfig {
        let mut config = SwEngineConfig::default();
        if let Some(v) = self.output_delay {
            config.output_delay = v;
            config.max_surfaces = config.max_surfaces.max(v + 2);
        }
        if let Some(v) = self.latency_polls {
            config.completion_latency = v;
        }
        config
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LayoutArg {
    I420,
    Nv12,
    Rgba,
}

impl From<LayoutArg> for PixelLayout {
    fn from(arg: LayoutArg) -> Self {
        match arg {
            LayoutArg::I420 => PixelLayout::I420,
            LayoutArg::Nv12 => PixelLayout::Nv12,
            LayoutArg::Rgba => PixelLayout::Rgba,
        }
    }
}

#[derive(Args, Debug, Clone)]
struct FormatArgs {
    /// Frame width in pixels.
    #[arg(long = "width")]
    width: u32,

    /// Frame height in pixels.
    #[arg(long = "height")]
    height: u32,

    /// Layout of the raw frames.
    #[arg(long = "layout", value_enum, default_value_t = LayoutArg::I420)]
    layout: LayoutArg,

    /// Framerate numerator.
    #[arg(long = "fps-num", default_value_t = 30)]
    fps_num: u32,

    /// Framerate denominator.
    #[arg(long = "fps-den", default_value_t = 1)]
    fps_den: u32,

    /// Quantizer shift (0 = lossless).
    #[arg(short = 'q', long = "quantizer", default_value_t = 0)]
    quantizer: u8,
}

impl FormatArgs {
    fn encode_config(&self) -> EncodeConfig {
        EncodeConfig {
            width: self.width,
            height: self.height,
            layout: self.layout.into(),
            fps_num: self.fps_num,
            fps_den: self.fps_den,
            quantizer: self.quantizer,
        }
    }
}

#[derive(Args, Debug, Clone)]
struct DecodeArgs {
    /// Compressed input stream.
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Raw frame output file.
    #[arg(short = 'o', long = "output")]
    output: PathBuf,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug, Clone)]
struct EncodeArgs {
    /// Raw frame input file.
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Compressed output stream.
    #[arg(short = 'o', long = "output")]
    output: PathBuf,

    #[command(flatten)]
    format: FormatArgs,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug, Clone)]
struct RoundtripArgs {
    /// Raw frame input file.
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Decoded raw frame output file.
    #[arg(short = 'o', long = "output")]
    output: PathBuf,

    /// Intermediate compressed stream (default: output with a .vsb extension).
    #[arg(long = "bitstream")]
    bitstream: Option<PathBuf>,

    #[command(flatten)]
    format: FormatArgs,

    #[command(flatten)]
    common: CommonArgs,
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let command = cli.command.name();
    let json_output = cli.command.json();

    let result = build_runtime().and_then(|rt| {
        rt.block_on(async {
            let cancel = CancellationToken::new();
            let watcher = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));
            let result = match cli.command {
                Commands::Decode(args) => run_decode(args, cancel).await,
                Commands::Encode(args) => run_encode(args, cancel).await,
                Commands::Roundtrip(args) => run_roundtrip(args, cancel).await,
            };
            watcher.abort();
            result
        })
    });

    match result {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            if json_output {
                println!(
                    "{}",
                    json!({
                        "schema_version": JSON_SCHEMA_VERSION,
                        "command": command,
                        "ok": false,
                        "code": err.error_code(),
                        "error": err.to_string(),
                    })
                );
            } else {
                tracing::error!(error = %err, code = err.error_code(), "Command failed");
            }
            std::process::exit(err.error_code() as i32);
        }
    }
}

fn init_tracing() {
    let ansi_enabled = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(ansi_enabled)
        .init();
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

/// First Ctrl-C drains the running pipeline; the process exits normally.
async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::warn!("Interrupt received; draining");
        cancel.cancel();
    }
}

/// Run a blocking pipeline body on the blocking pool.
async fn blocking<T, F>(body: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(body)
        .await
        .map_err(|e| EngineError::Io(std::io::Error::other(format!("pipeline worker failed: {e}"))))?
}

fn decode_file(
    input: &Path,
    output: &Path,
    pipeline: PipelineConfig,
    engine: SwEngineConfig,
    cancel: CancellationToken,
) -> Result<PipelineReport> {
    let mut source = FileByteSource::open(input)?;
    let mut sink = FileByteSink::create(output)?;
    let mut decoder = SwDecoder::new(engine)?;
    let report = DecodePipeline::new(pipeline)?
        .with_cancel(cancel)
        .run(&mut decoder, &mut source, &mut sink)?;
    log_file_totals(&source, &sink);
    sink.finish()?;
    Ok(report)
}

fn encode_file(
    input: &Path,
    output: &Path,
    encode: &EncodeConfig,
    pipeline: PipelineConfig,
    engine: SwEngineConfig,
    cancel: CancellationToken,
) -> Result<PipelineReport> {
    let mut source = FileByteSource::open(input)?;
    if source.is_empty() {
        tracing::warn!(path = %source.path().display(), "Raw input is empty; no frames to encode");
    }
    let mut sink = FileByteSink::create(output)?;
    let mut encoder = SwEncoder::new(engine)?;
    let report = EncodePipeline::new(pipeline)?
        .with_cancel(cancel)
        .run(&mut encoder, encode, &mut source, &mut sink)?;
    log_file_totals(&source, &sink);
    sink.finish()?;
    Ok(report)
}

fn log_file_totals(source: &FileByteSource, sink: &FileByteSink) {
    tracing::debug!(
        input = %source.path().display(),
        input_bytes = source.len(),
        read = source.bytes_read(),
        output = %sink.path().display(),
        written = sink.bytes_written(),
        "File totals"
    );
}

async fn run_decode(args: DecodeArgs, cancel: CancellationToken) -> Result<()> {
    let pipeline = args.common.pipeline_config()?;
    let engine = args.common.engine_config();
    let (input, output) = (args.input.clone(), args.output.clone());
    let report = blocking(move || decode_file(&input, &output, pipeline, engine, cancel)).await?;

    if args.common.json {
        print_json("decode", json!({ "report": report }));
    } else {
        print_summary("decode", &report, &args.output);
    }
    Ok(())
}

async fn run_encode(args: EncodeArgs, cancel: CancellationToken) -> Result<()> {
    let pipeline = args.common.pipeline_config()?;
    let engine = args.common.engine_config();
    let encode = args.format.encode_config();
    encode.validate()?;
    let (input, output) = (args.input.clone(), args.output.clone());
    let report =
        blocking(move || encode_file(&input, &output, &encode, pipeline, engine, cancel)).await?;

    if args.common.json {
        print_json("encode", json!({ "report": report }));
    } else {
        print_summary("encode", &report, &args.output);
    }
    Ok(())
}

async fn run_roundtrip(args: RoundtripArgs, cancel: CancellationToken) -> Result<()> {
    let pipeline = args.common.pipeline_config()?;
    let engine = args.common.engine_config();
    let encode = args.format.encode_config();
    encode.validate()?;
    let bitstream = args
        .bitstream
        .clone()
        .unwrap_or_else(|| args.output.with_extension("vsb"));

    let (input, stream, output) = (args.input.clone(), bitstream.clone(), args.output.clone());
    let (encoded, decoded) = blocking(move || {
        let encoded = encode_file(
            &input,
            &stream,
            &encode,
            pipeline.clone(),
            engine.clone(),
            cancel.clone(),
        )?;
        let decoded = decode_file(&stream, &output, pipeline, engine, cancel)?;
        Ok((encoded, decoded))
    })
    .await?;

    if encoded.frames != decoded.frames {
        tracing::warn!(
            encoded = encoded.frames,
            decoded = decoded.frames,
            "Frame count changed across the round trip"
        );
    }

    if args.common.json {
        print_json(
            "roundtrip",
            json!({
                "bitstream": bitstream.display().to_string(),
                "encode": encoded,
                "decode": decoded,
            }),
        );
    } else {
        print_summary("encode", &encoded, &bitstream);
        print_summary("decode", &decoded, &args.output);
    }
    Ok(())
}

/// Print `{schema_version, command, ok, ...fields}` as a single line.
fn print_json(command: &str, fields: serde_json::Value) {
    let mut value = json!({
        "schema_version": JSON_SCHEMA_VERSION,
        "command": command,
        "ok": true,
    });
    if let (Some(out), serde_json::Value::Object(extra)) = (value.as_object_mut(), fields) {
        out.extend(extra);
    }
    println!("{value}");
}

fn print_summary(command: &str, report: &PipelineReport, output: &Path) {
    println!(
        "{command}: {} frames, {} packets, {} bytes in, {} bytes out, {} ms{} -> {}",
        report.frames,
        report.packets,
        report.bytes_in,
        report.bytes_out,
        report.elapsed_ms,
        if report.cancelled { " (cancelled)" } else { "" },
        output.display()
    );
}
