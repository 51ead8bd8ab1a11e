//! 外部コマンド（ffmpeg / whisper-cli / 話者分離 CLI）実行の共通部分。

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

#[derive(Debug, thiserror::Error)]
pub enum SidecarError {
    #[error("binary not found: {0:?}")]
    NotFound(PathBuf),
    #[error("cannot execute {0:?}: {1}")]
    PermissionDenied(PathBuf, String),
    #[error("failed to spawn {0:?}: {1}")]
    Spawn(PathBuf, String),
    #[error("timed out after {0}s")]
    Timeout(u64),
    #[error("process error: {0}")]
    Io(String),
    #[error("exited with status {status}: {stderr}")]
    Exit { status: String, stderr: String },
}

/// 成功した実行の出力
#[derive(Debug)]
pub struct SidecarOutput {
    pub stdout: String,
    pub stderr: String,
}

/// コマンドを実行し、完了を待つ。タイムアウト時はプロセスを kill する。
pub async fn run_sidecar(
    binary: &Path,
    args: &[String],
    envs: &[(&str, &str)],
    timeout_secs: u64,
) -> Result<SidecarOutput, SidecarError> {
    // envs はログに出さない
    log::debug!("Running sidecar: {:?} {:?}", binary, args);

    let child = Command::new(binary)
        .args(args)
        .envs(envs.iter().copied())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SidecarError::NotFound(binary.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => {
                SidecarError::PermissionDenied(binary.to_path_buf(), e.to_string())
            }
            _ => SidecarError::Spawn(binary.to_path_buf(), e.to_string()),
        })?;

    let output = timeout(Duration::from_secs(timeout_secs), child.wait_with_output())
        .await
        .map_err(|_| SidecarError::Timeout(timeout_secs))?
        .map_err(|e| SidecarError::Io(e.to_string()))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(SidecarError::Exit {
            status: output.status.to_string(),
            stderr: truncate(&stderr, 2000),
        });
    }

    Ok(SidecarOutput { stdout, stderr })
}

/// PATH 上でバイナリを検索する簡易ヘルパー。
pub fn which_binary(name: &Path) -> Option<PathBuf> {
    let name_str = name.to_string_lossy();
    if name_str.contains('/') || name_str.contains('\\') {
        // 絶対/相対パスの場合はそのまま返す
        return if name.exists() { Some(name.to_path_buf()) } else { None };
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|full| full.exists())
}

/// 文字境界を壊さずに先頭 `max` バイト程度に切り詰める
pub fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}
