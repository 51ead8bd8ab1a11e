/// 言語が特定できなかったときの番兵値
pub const UNKNOWN_LANGUAGE: &str = "unknown";

/// 自動検出を意味する言語指定
pub const AUTO_LANGUAGE: &str = "auto";

/// 検出言語を正規化する。
///
/// `None`、空文字、文字列 `"None"`/`"null"` はすべて [`UNKNOWN_LANGUAGE`] として扱う。
/// 検出結果の扱いはこの関数に集約し、呼び出し側で個別に判定しない。
pub fn normalize_language(detected: Option<&str>) -> String {
    match detected.map(str::trim) {
        None => UNKNOWN_LANGUAGE.to_string(),
        Some(s) if s.is_empty() => UNKNOWN_LANGUAGE.to_string(),
        Some(s) if s.eq_ignore_ascii_case("none") || s.eq_ignore_ascii_case("null") => {
            UNKNOWN_LANGUAGE.to_string()
        }
        Some(s) => s.to_ascii_lowercase(),
    }
}

/// 正規化済みの言語が実際に検出されたものかどうか
pub fn is_known_language(language: &str) -> bool {
    normalize_language(Some(language)) != UNKNOWN_LANGUAGE
}

/// ジョブの言語を決める。
///
/// 検出結果を正規化し、特定できなければ投入時のヒントを同じ規則で正規化して使う。
/// どちらもなければ [`UNKNOWN_LANGUAGE`]。
pub fn resolve_language(detected: Option<&str>, hint: Option<&str>) -> String {
    let language = normalize_language(detected);
    if is_known_language(&language) {
        return language;
    }
    normalize_language(hint)
}

/// 投入時の言語指定を STT 用ヒントに変換する（"auto" / 空はヒントなし）
pub fn language_hint(requested: &str) -> Option<String> {
    let trimmed = requested.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(AUTO_LANGUAGE) {
        None
    } else {
        Some(trimmed.to_ascii_lowercase())
    }
}
