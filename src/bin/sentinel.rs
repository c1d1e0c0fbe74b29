/// 工厂哨兵 (Factory Sentinel)
///
/// 离线回放工具: 读取检测结果 (JSON Lines), 经跟踪与行为分析后输出事件
///
/// 子命令:
/// 1. replay:   逐帧回放, 每路流一个工作线程
/// 2. identity: 回放人脸识别结果, 输出去重后的身份事件
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use factory_sentinel::analytics::{DetectionTextRecognizer, RetryingRecognizer};
use factory_sentinel::identity::{DuplicateSuppressor, IdentityRegistry, IdentitySessionCache};
use factory_sentinel::{BBox, EventSink, Frame, JsonLinesSink, SentinelConfig, SessionStore};
use factory_sentinel::{StreamPipeline, StreamWorkers};

/// 工厂哨兵参数
#[derive(Parser, Debug)]
#[command(author, version, about = "工厂哨兵 - 视频行为分析事件回放", long_about = None)]
struct Args {
    /// 配置文件 (不存在时写入默认配置)
    #[arg(short, long, default_value = "sentinel.json")]
    config: PathBuf,

    /// 事件输出文件 (默认标准输出)
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 回放检测帧
    Replay {
        /// 输入: 每行一个帧, 检测项可带 `label` (类别) 与 `text` (上游OCR车牌)
        #[arg(short, long)]
        input: PathBuf,

        /// 帧未指定流ID时使用的默认流
        #[arg(short, long, default_value = "cam-1")]
        stream: String,
    },
    /// 回放识别结果
    Identity {
        /// 输入: 每行一个识别结果
        #[arg(short, long)]
        input: PathBuf,
    },
}

/// 一条识别结果
#[derive(Debug, Deserialize)]
struct RecognitionRecord {
    #[serde(default)]
    stream_id: String,
    timestamp: DateTime<Utc>,
    label: String,
    is_known: bool,
    confidence: f32,
    bbox: BBox,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = SentinelConfig::load(&args.config)?;
    config.log_summary();

    let sink = Arc::new(match &args.output {
        Some(path) => JsonLinesSink::create(path)
            .with_context(|| format!("failed to create output {}", path.display()))?,
        None => JsonLinesSink::stdout(),
    });

    match args.command {
        Command::Replay { input, stream } => replay(&config, &input, &stream, sink.clone())?,
        Command::Identity { input } => identity(&config, &input, sink.clone())?,
    }

    sink.flush_writer().context("failed to flush output")?;
    Ok(())
}

fn open_lines(path: &Path) -> Result<impl Iterator<Item = (usize, std::io::Result<String>)>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    Ok(BufReader::new(file).lines().enumerate())
}

fn replay(
    config: &SentinelConfig,
    input: &Path,
    default_stream: &str,
    sink: Arc<JsonLinesSink>,
) -> Result<()> {
    let event_sink: Arc<dyn EventSink> = sink;
    let mut workers = StreamWorkers::new(event_sink, config.queue_capacity);
    let mut known_streams = HashSet::new();
    let mut frames = 0u64;

    for (line_no, line) in open_lines(input)? {
        let line = line.with_context(|| format!("failed to read line {}", line_no + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let mut frame: Frame = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "skipping malformed frame");
                continue;
            }
        };
        if frame.stream_id.is_empty() {
            frame.stream_id = default_stream.to_string();
        }

        if known_streams.insert(frame.stream_id.clone()) {
            let mut pipeline = StreamPipeline::new(frame.stream_id.clone(), config.clone());
            if config.features.gate {
                let recognizer =
                    RetryingRecognizer::new(DetectionTextRecognizer, config.retry_policy());
                pipeline = pipeline.with_recognizer(Arc::new(recognizer));
            }
            workers.spawn(pipeline)?;
        }

        workers.submit_blocking(frame);
        frames += 1;
    }

    info!(frames, streams = workers.stream_count(), "input exhausted");
    for stats in workers.shutdown() {
        info!(
            stream_id = %stats.stream_id,
            frames = stats.frames_processed,
            tracks = stats.tracks_registered,
            crossings = stats.total_crossings,
            loitering = stats.loitering_tracks,
            triggers = stats.triggers_fired,
            "stream statistics"
        );
    }
    Ok(())
}

fn identity(config: &SentinelConfig, input: &Path, sink: Arc<JsonLinesSink>) -> Result<()> {
    let events: Arc<dyn EventSink> = sink.clone();
    let store: Arc<dyn SessionStore> = sink;
    let registry = IdentityRegistry::new(
        IdentitySessionCache::new(
            config.identity.spatial_tolerance,
            config.identity_session_timeout(),
        ),
        DuplicateSuppressor::new(config.duplicate_window()),
        events,
        store,
    );

    for (line_no, line) in open_lines(input)? {
        let line = line.with_context(|| format!("failed to read line {}", line_no + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: RecognitionRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "skipping malformed recognition");
                continue;
            }
        };
        if record.bbox.is_degenerate() {
            warn!(line = line_no + 1, "skipping recognition with degenerate bbox");
            continue;
        }

        registry.expire(record.timestamp);
        registry.record(
            &record.stream_id,
            &record.label,
            record.is_known,
            record.confidence,
            record.bbox,
            record.timestamp,
        );
    }

    // 回放结束: 所有剩余会话落盘
    registry.flush_all();

    let stats = registry.statistics();
    info!(
        accepted = stats.accepted_events,
        suppressed = stats.suppressed_duplicates,
        flushed = stats.flushed_sessions,
        pending = stats.pending_flush,
        "identity statistics"
    );
    Ok(())
}
