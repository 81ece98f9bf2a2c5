//! Query signal detection for AUTO routing
//!
//! English vocabulary is matched with word-boundary regexes so `log` does not
//! fire on `login`. Korean vocabulary is matched by substring because particles
//! attach directly to the stem (`서버는`, `로그를`).

use regex_lite::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::LazyLock;

static REALTIME: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(right now|at the moment|real-time|realtime|currently|current|latest|live|now)\b").ok()
});

static TECHNICAL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(cpu|memory|disk|server|kubectl|docker|nginx|systemctl|linux|k8s|kubernetes|pod|mysql|redis|postgres|process|port|log|command)(e?s)?\b",
    )
    .ok()
});

static CONNECTIVES: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(and then|because|however|although|compare|versus)\b").ok()
});

static ANALYSIS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(analy[sz]e|analysis|why|explain|optimi[sz]e|diagnose|troubleshoot|predict|trend|trends|recommend|evaluate|investigate|correlat(e|ion)|root cause|bottleneck)\b",
    )
    .ok()
});

const REALTIME_KO: &[&str] = &["지금", "현재", "실시간"];
const TECHNICAL_KO: &[&str] = &["서버", "명령어", "메모리", "디스크", "프로세스", "로그"];
const CONNECTIVES_KO: &[&str] = &["그리고", "하지만", "그래서", "때문에", "비교"];
const ANALYSIS_KO: &[&str] = &["분석", "왜", "설명", "최적화", "진단", "예측", "추천", "원인"];

/// Complexity bucket derived from the score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    High,
}

impl Complexity {
    fn from_score(score: u32) -> Self {
        match score {
            0 => Complexity::Simple,
            1 | 2 => Complexity::Medium,
            _ => Complexity::High,
        }
    }
}

/// Everything AUTO routing looks at
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySignals {
    pub non_latin: bool,
    pub realtime: bool,
    pub technical: bool,
    pub complexity: Complexity,
    pub complexity_score: u32,
    pub token_count: usize,
}

/// Detect routing signals in `query`. `has_server_hints` marks a request
/// that carried `context.servers`.
pub fn analyze(query: &str, has_server_hints: bool) -> QuerySignals {
    let token_count = query.split_whitespace().count();

    let realtime = matches(&REALTIME, query) || REALTIME_KO.iter().any(|w| query.contains(w));
    let technical = has_server_hints
        || matches(&TECHNICAL, query)
        || TECHNICAL_KO.iter().any(|w| query.contains(w));

    let complexity_score = complexity_score(query, token_count);

    QuerySignals {
        non_latin: has_non_latin_script(query),
        realtime,
        technical,
        complexity: Complexity::from_score(complexity_score),
        complexity_score,
        token_count,
    }
}

fn matches(re: &LazyLock<Option<Regex>>, text: &str) -> bool {
    re.as_ref().is_some_and(|r| r.is_match(text))
}

fn complexity_score(query: &str, token_count: usize) -> u32 {
    let mut score = 0;

    if token_count > 25 {
        score += 2;
    } else if token_count > 12 {
        score += 1;
    }

    // Each distinct connective counts once
    let mut connectives: HashSet<String> = HashSet::new();
    if let Some(re) = CONNECTIVES.as_ref() {
        for m in re.find_iter(query) {
            connectives.insert(m.as_str().to_lowercase());
        }
    }
    for word in CONNECTIVES_KO {
        if query.contains(word) {
            connectives.insert((*word).to_string());
        }
    }
    score += connectives.len() as u32;

    let analysis_hits = ANALYSIS.as_ref().map_or(0, |re| re.find_iter(query).count())
        + ANALYSIS_KO.iter().map(|w| query.matches(w).count()).sum::<usize>();

    if token_count > 0 && analysis_hits as f32 / token_count as f32 >= 0.2 {
        score += 1;
    }
    if analysis_hits >= 2 {
        score += 1;
    }

    score
}

/// Any alphabetic character from Hangul, CJK, Kana, Cyrillic, Arabic, Thai or Devanagari
pub fn has_non_latin_script(text: &str) -> bool {
    text.chars().any(|c| c.is_alphabetic() && is_non_latin(c))
}

fn is_non_latin(c: char) -> bool {
    matches!(c as u32,
        0x1100..=0x11FF     // Hangul Jamo
        | 0x3130..=0x318F   // Hangul compatibility Jamo
        | 0xAC00..=0xD7AF   // Hangul syllables
        | 0x3040..=0x30FF   // Hiragana, Katakana
        | 0x3400..=0x4DBF   // CJK extension A
        | 0x4E00..=0x9FFF   // CJK unified
        | 0x0400..=0x04FF   // Cyrillic
        | 0x0600..=0x06FF   // Arabic
        | 0x0E00..=0x0E7F   // Thai
        | 0x0900..=0x097F   // Devanagari
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_korean_ops_question() {
        let s = analyze("서버 상태 확인 명령어는?", false);
        assert!(s.non_latin);
        assert!(s.technical);
        assert!(!s.realtime);
        assert_eq!(s.complexity, Complexity::Simple);
    }

    #[test]
    fn test_realtime_phrases() {
        assert!(analyze("what is the current CPU load right now", false).realtime);
        assert!(analyze("show live traffic", false).realtime);
        assert!(analyze("지금 트래픽", false).realtime);
        assert!(!analyze("knowledge base article", false).realtime);
    }

    #[test]
    fn test_technical_uses_word_boundaries() {
        assert!(analyze("tail the nginx logs", false).technical);
        assert!(analyze("list processes", false).technical);
        assert!(!analyze("login page design", false).technical);
        assert!(!analyze("support ticket", false).technical);
    }

    #[test]
    fn test_server_hints_count_as_technical() {
        assert!(analyze("anything unusual?", true).technical);
    }

    #[test]
    fn test_complexity_levels() {
        assert_eq!(analyze("hello", false).complexity, Complexity::Simple);

        // 13 tokens, no other signal
        let long = "please tell me a little bit about the way our team plans the week";
        assert_eq!(analyze(long, false).complexity, Complexity::Medium);

        // connectives + dense analysis vocabulary
        let heavy = "analyze and compare the trend because latency changed, however explain why";
        let s = analyze(heavy, false);
        assert!(s.complexity_score >= 3);
        assert_eq!(s.complexity, Complexity::High);
    }

    #[test]
    fn test_connectives_counted_once() {
        let once = complexity_score("because", 1);
        let twice = complexity_score("because because", 2);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_script_detection() {
        assert!(has_non_latin_script("привет"));
        assert!(has_non_latin_script("ディスク"));
        assert!(has_non_latin_script("磁盘"));
        assert!(!has_non_latin_script("disk usage 100%"));
        assert!(!has_non_latin_script("café"));
    }
}
