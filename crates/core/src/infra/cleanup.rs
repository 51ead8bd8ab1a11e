use std::path::Path;

/// ファイルを削除する。失敗はログに残すだけで呼び出し元には伝えない。
///
/// 削除できなかった場合は false を返す（存在しない場合は true）。
pub fn cleanup_file(path: &Path, description: &str) -> bool {
    if !path.exists() {
        return true;
    }
    match std::fs::remove_file(path) {
        Ok(()) => {
            log::info!("Deleted {description}: {}", path.display());
            true
        }
        Err(e) => {
            log::warn!("[E_CLEANUP] Could not delete {description} {}: {e}", path.display());
            false
        }
    }
}
