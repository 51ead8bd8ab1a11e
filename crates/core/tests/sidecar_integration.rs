//! 外部プロセス連携の統合テスト。
//!
//! 前提条件:
//! - whisper-cli が PATH 上にあるか、WHISPER_BIN 環境変数で指定
//! - GGML モデルが WHISPER_MODEL 環境変数で指定
//! - ffmpeg / ffprobe が PATH 上にある
//!
//! 実行: cargo test --test sidecar_integration -- --ignored

use std::path::PathBuf;
use std::sync::Arc;

use nv_core::domain::capability::{
    AudioRef, LoadedAudio, NormalizeError, Normalizer, TranscribeError, Transcriber,
};
use nv_core::domain::error::ErrorCode;
use nv_core::domain::job::JobStage;
use nv_core::domain::settings::{JobOptions, ServerSettings};
use nv_core::infra::align::PassthroughAligner;
use nv_core::infra::normalize::{FfmpegConfig, FfmpegNormalizer};
use nv_core::infra::storage::{SqliteResultSink, Storage};
use nv_core::infra::stt::whisper::{WhisperConfig, WhisperSidecar};
use nv_core::infra::summarize::NoopSummarizer;
use nv_core::usecase::{Capabilities, JobQueue};

fn whisper_config() -> WhisperConfig {
    WhisperConfig {
        binary_path: std::env::var("WHISPER_BIN")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("whisper-cli")),
        model_path: std::env::var("WHISPER_MODEL")
            .map(PathBuf::from)
            .expect("WHISPER_MODEL env var required for integration tests"),
        ..Default::default()
    }
}

fn write_silence(path: &std::path::Path, secs: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for _ in 0..(16_000 * secs) {
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();
}

#[tokio::test]
#[ignore]
async fn transcribe_known_wav() {
    let engine = WhisperSidecar::new(whisper_config());
    engine.validate().expect("Whisper not properly configured");

    let wav_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/hello_en.wav");
    if !wav_path.exists() {
        eprintln!("Test WAV file not found: {:?}. Skipping.", wav_path);
        return;
    }

    let normalizer = FfmpegNormalizer::new(FfmpegConfig::default());
    let loaded = normalizer.load(&AudioRef::source(&wav_path)).await.unwrap();
    let result = engine.transcribe(&loaded, None).await.unwrap();

    assert!(!result.segments.is_empty(), "Transcript should not be empty");
    for pair in result.segments.windows(2) {
        assert!(pair[0].start <= pair[1].start);
    }
    println!("Detected language: {:?}", result.detected_language);
}

#[tokio::test]
#[ignore]
async fn ffmpeg_extracts_audio_next_to_input() {
    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("tone.wav");
    write_silence(&wav, 2);

    // ffmpeg でコンテナを作ってから取り出し直す
    let avi = dir.path().join("clip.avi");
    let status = std::process::Command::new("ffmpeg")
        .args(["-y", "-i"])
        .arg(&wav)
        .arg(&avi)
        .status()
        .expect("ffmpeg must be installed");
    assert!(status.success());

    let normalizer = FfmpegNormalizer::new(FfmpegConfig::default());
    let audio = normalizer.normalize(&avi).await.unwrap();
    assert!(audio.temporary);
    assert_eq!(audio.path, dir.path().join("clip_audio.wav"));

    let loaded = normalizer.load(&audio).await.unwrap();
    assert!((loaded.duration_secs - 2.0).abs() < 0.1);
}

#[tokio::test]
async fn transcribe_missing_wav() {
    let engine = WhisperSidecar::new(WhisperConfig::default());
    let audio = LoadedAudio {
        audio: AudioRef::source("/nonexistent/audio.wav"),
        duration_secs: 1.0,
    };

    let err = engine.transcribe(&audio, None).await.unwrap_err();
    assert!(matches!(err, TranscribeError::AudioFormat(_)));
}

#[tokio::test]
async fn ffmpeg_missing_binary_is_not_available() {
    let dir = tempfile::tempdir().unwrap();
    let avi = dir.path().join("clip.avi");
    std::fs::write(&avi, b"not really a video").unwrap();

    let normalizer = FfmpegNormalizer::new(FfmpegConfig {
        ffmpeg_path: PathBuf::from("/nonexistent/ffmpeg"),
        ..FfmpegConfig::default()
    });
    let err = normalizer.normalize(&avi).await.unwrap_err();
    assert!(matches!(err, NormalizeError::NotAvailable(_)));
}

/// 出力先 (9 番目の引数) に書きかけのファイルを作って異常終了する ffmpeg の代役
#[cfg(unix)]
fn write_crashing_ffmpeg(dir: &std::path::Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    const SCRIPT: &str = "#!/bin/sh\nprintf 'RIFF' > \"$9\"\necho 'conversion aborted' >&2\nexit 1\n";

    let script = dir.join("ffmpeg");
    std::fs::write(&script, SCRIPT).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    script
}

#[cfg(unix)]
#[tokio::test]
async fn ffmpeg_crash_leaves_no_partial_audio() {
    let bin = tempfile::tempdir().unwrap();
    let uploads = tempfile::tempdir().unwrap();
    let media = uploads.path().join("meeting.mp4");
    std::fs::write(&media, b"not really a video").unwrap();

    let settings = ServerSettings {
        ffmpeg: FfmpegConfig {
            ffmpeg_path: write_crashing_ffmpeg(bin.path()),
            ..FfmpegConfig::default()
        },
        ..ServerSettings::default()
    };
    let caps = Capabilities {
        normalizer: Arc::new(FfmpegNormalizer::new(settings.ffmpeg.clone())),
        transcriber: Arc::new(WhisperSidecar::new(WhisperConfig::default())),
        aligner: Arc::new(PassthroughAligner),
        diarizer: None,
        summarizer: Arc::new(NoopSummarizer),
    };
    let sink = Arc::new(SqliteResultSink::new(Storage::open_in_memory().unwrap()));
    let queue = JobQueue::new(settings, caps, sink);

    let id = queue.submit(&media, JobOptions::default()).await.unwrap();
    let state = queue.wait(&id).await.unwrap();

    assert_eq!(state.stage, JobStage::Failed);
    assert_eq!(state.error.unwrap().code, ErrorCode::InputConversion);
    assert!(!uploads.path().join("meeting_audio.wav").exists());
    assert!(!media.exists());
    assert_eq!(queue.metrics().degradations.cleanup, 0);
}
