//! In-process fallback index
//!
//! Keyword index over a small operations knowledge base. Only constructed
//! when the runtime profile allows it; it never touches the network.

use super::RetrievalItem;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};
use waypoint_common::errors::{AppError, Result};

/// Secondary retrieval engine consulted when the primary store is exhausted
#[async_trait]
pub trait FallbackEngine: Send + Sync {
    async fn search(&self, query: &str, limit: usize, category: Option<&str>) -> Result<Vec<RetrievalItem>>;

    /// Number of indexed documents; zero means the engine cannot answer anything
    fn document_count(&self) -> usize;
}

/// One indexed document
#[derive(Debug, Clone, Deserialize)]
pub struct FallbackDocument {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

fn default_category() -> String {
    "general".to_string()
}

struct IndexedDocument {
    doc: FallbackDocument,
    haystack: String,
    command_lower: Option<String>,
}

pub struct FallbackIndex {
    docs: Vec<IndexedDocument>,
}

impl FallbackIndex {
    pub fn new(documents: Vec<FallbackDocument>) -> Self {
        let docs = documents
            .into_iter()
            .map(|doc| {
                let haystack = [
                    Some(doc.content.as_str()),
                    doc.command.as_deref(),
                    doc.description.as_deref(),
                    Some(doc.category.as_str()),
                ]
                .into_iter()
                .flatten()
                .chain(doc.keywords.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase();
                let command_lower = doc.command.as_ref().map(|c| c.to_lowercase());
                IndexedDocument {
                    doc,
                    haystack,
                    command_lower,
                }
            })
            .collect();
        Self { docs }
    }

    /// Index over the built-in knowledge base
    pub fn builtin() -> Self {
        Self::new(builtin_documents())
    }

    /// Built-in knowledge base, extended with a JSON array of documents when `path` is set
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let mut documents = builtin_documents();
        if let Some(path) = path {
            let raw = tokio::fs::read_to_string(path).await.map_err(|e| AppError::Configuration {
                message: format!("Cannot read fallback documents {}: {}", path.display(), e),
            })?;
            let extra: Vec<FallbackDocument> = serde_json::from_str(&raw)?;
            info!(count = extra.len(), path = %path.display(), "Loaded extra fallback documents");
            documents.extend(extra);
        }
        Ok(Self::new(documents))
    }

    fn score(&self, entry: &IndexedDocument, query_lower: &str, tokens: &[String]) -> f32 {
        if tokens.is_empty() {
            return 0.0;
        }

        let matched = tokens
            .iter()
            .filter(|t| token_hits(&entry.haystack, t))
            .count();
        let mut score = matched as f32 / tokens.len() as f32;

        if entry
            .command_lower
            .as_deref()
            .is_some_and(|c| !c.is_empty() && query_lower.contains(c))
        {
            score += 0.25;
        }

        score.clamp(0.0, 1.0)
    }
}

#[async_trait]
impl FallbackEngine for FallbackIndex {
    async fn search(&self, query: &str, limit: usize, category: Option<&str>) -> Result<Vec<RetrievalItem>> {
        let query_lower = query.to_lowercase();
        let tokens = tokenize(&query_lower);

        let mut hits: Vec<RetrievalItem> = self
            .docs
            .iter()
            .filter(|e| category.map_or(true, |c| e.doc.category.eq_ignore_ascii_case(c)))
            .filter_map(|e| {
                let score = self.score(e, &query_lower, &tokens);
                (score > 0.0).then(|| RetrievalItem {
                    id: e.doc.id.clone(),
                    content: e.doc.content.clone(),
                    command: e.doc.command.clone(),
                    description: e.doc.description.clone(),
                    category: e.doc.category.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);

        debug!(hits = hits.len(), "Fallback index searched");
        Ok(hits)
    }

    fn document_count(&self) -> usize {
        self.docs.len()
    }
}

/// Lowercased query tokens. Single ASCII characters carry no signal and are dropped.
fn tokenize(query_lower: &str) -> Vec<String> {
    query_lower
        .split(|c: char| !(c.is_alphanumeric() || c == '-'))
        .map(|t| t.trim_matches('-'))
        .filter(|t| !t.is_empty() && !(t.is_ascii() && t.len() < 2))
        .map(str::to_string)
        .collect()
}

/// Korean particles attach to the stem, so non-ASCII tokens also match by
/// progressively shorter prefixes (down to two characters).
fn token_hits(haystack: &str, token: &str) -> bool {
    if haystack.contains(token) {
        return true;
    }
    if token.is_ascii() {
        return false;
    }
    let chars: Vec<char> = token.chars().collect();
    (2..chars.len())
        .rev()
        .any(|n| haystack.contains(&chars[..n].iter().collect::<String>()))
}

fn doc(
    id: &str,
    command: &str,
    description: &str,
    category: &str,
    content: &str,
    keywords: &[&str],
) -> FallbackDocument {
    FallbackDocument {
        id: id.to_string(),
        content: content.to_string(),
        command: Some(command.to_string()),
        description: Some(description.to_string()),
        category: category.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
    }
}

fn builtin_documents() -> Vec<FallbackDocument> {
    vec![
        doc(
            "ops-top",
            "top -b -n 1",
            "Live view of processes and CPU/memory usage",
            "monitoring",
            "Use top to see which processes consume the most CPU and memory. Batch mode prints one snapshot.",
            &["cpu", "load", "process", "실시간", "프로세스", "모니터링", "cpu 사용률"],
        ),
        doc(
            "ops-htop",
            "htop",
            "Interactive process viewer",
            "monitoring",
            "htop shows per-core CPU bars, memory and swap, and lets you sort or kill processes interactively.",
            &["cpu", "process", "interactive", "프로세스"],
        ),
        doc(
            "ops-df",
            "df -h",
            "Disk usage per filesystem in human-readable units",
            "disk",
            "Check free and used space on every mounted filesystem. Filter tmpfs with grep -v tmpfs.",
            &["disk", "storage", "space", "mount", "디스크", "용량", "사용량"],
        ),
        doc(
            "ops-du",
            "du -sh *",
            "Size of each entry in the current directory",
            "disk",
            "Find which directories take up space. Combine with sort -h to list the largest first.",
            &["disk", "directory", "size", "디스크", "폴더", "용량"],
        ),
        doc(
            "ops-free",
            "free -m",
            "Memory usage in megabytes",
            "monitoring",
            "Shows total, used, free, shared, buffer/cache and available memory plus swap.",
            &["memory", "ram", "swap", "메모리", "사용량"],
        ),
        doc(
            "ops-iostat",
            "iostat -x 1",
            "Extended disk I/O statistics every second",
            "disk",
            "Watch %util and await to spot saturated disks.",
            &["disk", "io", "latency", "디스크", "입출력"],
        ),
        doc(
            "ops-ss",
            "ss -tuln",
            "Listening TCP and UDP ports",
            "network",
            "Lists sockets in LISTEN state with numeric ports. netstat -tuln is the older equivalent.",
            &["port", "network", "socket", "listen", "포트", "네트워크"],
        ),
        doc(
            "ops-ping",
            "ping -c 4",
            "Check reachability and round-trip time",
            "network",
            "Send four ICMP echo requests to a host to test connectivity and latency.",
            &["network", "latency", "connectivity", "네트워크", "연결"],
        ),
        doc(
            "ops-ps-grep",
            "ps aux | grep",
            "Find a specific process",
            "process",
            "List all processes and filter by name, e.g. ps aux | grep nginx.",
            &["process", "pid", "find", "프로세스", "찾기"],
        ),
        doc(
            "ops-kill",
            "kill -15",
            "Ask a process to terminate gracefully",
            "process",
            "Send SIGTERM to a PID. Use kill -9 only when the process ignores SIGTERM.",
            &["process", "stop", "terminate", "프로세스", "종료"],
        ),
        doc(
            "ops-systemctl-status",
            "systemctl status",
            "Service status",
            "system",
            "Shows whether a systemd unit is active, its main PID and the latest log lines, e.g. systemctl status nginx.",
            &["service", "status", "server", "서버", "서비스", "상태", "확인"],
        ),
        doc(
            "ops-systemctl-restart",
            "systemctl restart",
            "Restart a service",
            "system",
            "Stops and starts a systemd unit. Prefer reload when the service supports it.",
            &["service", "restart", "서비스", "재시작"],
        ),
        doc(
            "ops-journalctl",
            "journalctl -xe",
            "Recent system log entries with explanations",
            "system",
            "Jump to the end of the journal with extra context. journalctl -f follows new entries.",
            &["log", "logs", "error", "journal", "로그", "에러", "오류"],
        ),
        doc(
            "ops-tail-log",
            "tail -f /var/log/syslog",
            "Follow the system log",
            "system",
            "Stream new syslog lines as they are written.",
            &["log", "logs", "follow", "로그"],
        ),
        doc(
            "ops-uptime",
            "uptime",
            "Uptime and load averages",
            "monitoring",
            "Prints how long the server has been running and the 1, 5 and 15 minute load averages.",
            &["load", "uptime", "server", "서버", "가동", "상태"],
        ),
        doc(
            "ops-kubectl-pods",
            "kubectl get pods -A",
            "List pods in all namespaces",
            "kubernetes",
            "Shows pod status, restarts and age across the cluster.",
            &["kubernetes", "k8s", "pod", "pods", "cluster", "쿠버네티스", "파드"],
        ),
        doc(
            "ops-kubectl-logs",
            "kubectl logs",
            "Container logs of a pod",
            "kubernetes",
            "Print logs from a pod container; add -f to follow and --previous for the last crashed instance.",
            &["kubernetes", "k8s", "pod", "log", "logs", "로그", "파드"],
        ),
        doc(
            "ops-docker-ps",
            "docker ps",
            "Running containers",
            "container",
            "Lists running containers with image, status and published ports. docker ps -a includes stopped ones.",
            &["docker", "container", "containers", "도커", "컨테이너"],
        ),
        doc(
            "ops-docker-stats",
            "docker stats --no-stream",
            "Container resource usage snapshot",
            "container",
            "CPU, memory, network and block I/O per container.",
            &["docker", "container", "cpu", "memory", "도커", "컨테이너", "메모리"],
        ),
        doc(
            "ops-nginx-test",
            "nginx -t",
            "Validate nginx configuration",
            "system",
            "Checks configuration syntax before reloading with systemctl reload nginx.",
            &["nginx", "config", "web", "server", "웹서버", "설정"],
        ),
    ]
}
