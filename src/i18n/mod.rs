//! Internationalization (i18n) module.
//!
//! Provides localized strings for CLI help and output.
//! English is the default language; Korean is available as an alternative.

use std::sync::OnceLock;

static CURRENT_LANG: OnceLock<Lang> = OnceLock::new();

/// Supported languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lang {
    /// English (default)
    En,
    /// Korean
    Ko,
}

impl Lang {
    /// Parse a language code string (e.g. "en", "ko", "en_US", "ko_KR.UTF-8").
    /// Returns `None` for unrecognized codes.
    pub fn from_code(code: &str) -> Option<Self> {
        let normalized = code.to_lowercase();
        let prefix = normalized.split(['_', '-', '.']).next().unwrap_or("");
        match prefix {
            "en" => Some(Self::En),
            "ko" => Some(Self::Ko),
            _ => None,
        }
    }

    /// Return the ISO 639-1 code for this language.
    pub fn code(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Ko => "ko",
        }
    }
}

/// Initialize the global language. Call once at startup.
/// If already initialized, this is a no-op.
pub fn set_lang(lang: Lang) {
    let _ = CURRENT_LANG.set(lang);
}

/// Get the currently configured language (defaults to English).
pub fn lang() -> Lang {
    CURRENT_LANG.get().copied().unwrap_or(Lang::En)
}

/// Detect language from `MAILRANK_LANG`, `LC_MESSAGES`, then `LANG`.
pub fn detect_system_lang() -> Lang {
    ["MAILRANK_LANG", "LC_MESSAGES", "LANG"]
        .iter()
        .find_map(|var| std::env::var(var).ok().and_then(|v| Lang::from_code(&v)))
        .unwrap_or(Lang::En)
}

/// Defines one function per translatable message, plus a catalog of all of them.
/// Each function returns a `&'static str` based on the current language.
macro_rules! msg {
    ($($name:ident, $en:expr, $ko:expr;)*) => {
        $(
            /// Returns a localized string for the current language.
            pub fn $name() -> &'static str {
                match lang() {
                    Lang::En => $en,
                    Lang::Ko => $ko,
                }
            }
        )*

        /// Every message as `(name, english, korean)`.
        #[allow(dead_code)]
        pub(crate) const CATALOG: &[(&str, &str, &str)] = &[$((stringify!($name), $en, $ko)),*];
    };
}

msg! {
    // ── General ──────────────────────────────────────────────────

    app_about,
        "mailrank: hybrid keyword and semantic search over your mail archive",
        "mailrank: 메일 보관함을 위한 키워드 + 의미 하이브리드 검색";
    app_long_about,
        "mailrank: hybrid keyword and semantic search over your mail archive.\nResults are ranked by relevance and by the people you actually correspond with.",
        "mailrank: 메일 보관함을 위한 키워드 + 의미 하이브리드 검색.\n관련도와 실제로 자주 연락하는 사람을 함께 고려해 결과를 정렬합니다.";
    app_after_help,
        "Examples:\n  mailrank ingest ~/Mail/export\n  mailrank index\n  mailrank search \"subject:budget from:alice\" --weight 0.3",
        "예시:\n  mailrank ingest ~/Mail/export\n  mailrank index\n  mailrank search \"subject:budget from:alice\" --weight 0.3";

    // ── CLI help strings ─────────────────────────────────────────

    help_verbose,
        "Verbose logging (-v info, -vv debug, -vvv trace)",
        "상세 로그 (-v info, -vv debug, -vvv trace)";
    help_lang,
        "Language (en, ko). Defaults to system locale",
        "언어 (en, ko). 기본값은 시스템 로케일";
    help_cmd_ingest,
        "Read an EML directory, EML file, or MBOX file into the message store",
        "EML 폴더, EML 파일 또는 MBOX 파일을 메시지 저장소로 가져오기";
    help_cmd_index,
        "Build a new index generation from the message store",
        "메시지 저장소로부터 새 인덱스 세대 생성";
    help_cmd_search,
        "Search the index and print ranked results",
        "인덱스를 검색하고 순위별 결과 출력";
    help_cmd_contacts,
        "Show the inferred main user and important contacts",
        "추정된 주 사용자와 중요 연락처 표시";
    help_cmd_status,
        "Show the state of the index directory",
        "인덱스 디렉터리 상태 표시";
    help_cmd_completions,
        "Generate shell completions",
        "셸 자동완성 스크립트 생성";
    help_cmd_manpage,
        "Generate a man page",
        "man 페이지 생성";

    // ── Progress ─────────────────────────────────────────────────

    msg_ingesting, "Ingesting", "가져오는 중";
    msg_indexing, "Indexing", "인덱싱 중";

    // ── Summaries ────────────────────────────────────────────────

    msg_ingest_complete, "Ingestion complete", "가져오기 완료";
    msg_index_complete, "Index built", "인덱스 생성 완료";
    msg_source, "Source", "원본";
    msg_database, "Database", "데이터베이스";
    msg_messages, "Messages", "메시지";
    msg_skipped, "Skipped", "건너뜀";
    msg_elapsed, "Elapsed", "소요 시간";
    msg_index_dir, "Index directory", "인덱스 디렉터리";
    msg_generation, "Generation", "세대";
    msg_generations_on_disk, "Generations on disk", "보관 중인 세대";
    msg_lexical_terms, "Lexical terms", "색인어";
    msg_vectors, "Vectors", "벡터";
    msg_dimension, "Dimension", "차원";
    msg_metric, "Metric", "거리 척도";
    msg_model, "Model", "모델";
    msg_index_size, "Index size", "인덱스 크기";
    msg_pruned, "Pruned generations", "삭제된 세대";

    // ── Contacts ─────────────────────────────────────────────────

    msg_main_user, "Main user", "주 사용자";
    msg_important_contacts, "Important contacts", "중요 연락처";
    msg_none, "(none)", "(없음)";
    msg_top_senders, "Top senders", "주요 발신자";

    // ── Search ───────────────────────────────────────────────────

    msg_results, "result(s)", "개 결과";
    msg_no_results, "No results.", "검색 결과가 없습니다.";
    msg_warning, "Warning", "경고";
    msg_semantic_weight, "Semantic weight", "의미 가중치";
    col_rank, "#", "#";
    col_score, "Score", "점수";
    col_date, "Date", "날짜";
    col_from, "From", "보낸 사람";
    col_subject, "Subject", "제목";

    // ── Errors ───────────────────────────────────────────────────

    err_index_not_found,
        "Index not found. Run `mailrank index` first",
        "인덱스가 없습니다. 먼저 `mailrank index`를 실행하세요";
    err_source_not_found, "Mail source not found", "메일 원본을 찾을 수 없습니다";
    err_database_not_found,
        "Message store not found. Run `mailrank ingest` first",
        "메시지 저장소가 없습니다. 먼저 `mailrank ingest`를 실행하세요";
}
