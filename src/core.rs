use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// A 32-byte BLAKE3 hash used for content-addressing.
///
/// In `fuigo`, this serves two purposes:
/// 1. It keys the optimized image cache under `.cache/img/`, so unchanged
///    sources are never re-encoded.
/// 2. It is the revision of each precached file in the generated service
///    worker, so browsers refetch exactly the files that changed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(crate) struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub(crate) fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub(crate) fn hash_file(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        Ok(blake3::Hasher::new().update_mmap(path)?.finalize().into())
    }

    pub(crate) fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in self.0.iter() {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// The mode in which the pipeline is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// A one-time build.
    Build,
    /// A continuous watch mode for development.
    Watch,
}

/// What happens when a transformer reports malformed input.
///
/// Filesystem failures are never absorbed, whichever policy is selected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Log the error, drop the transformer's output, keep building.
    #[default]
    BestEffort,
    /// Fail the task and stop the build after the current group.
    FailFast,
}

impl std::str::FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "best-effort" => Ok(Self::BestEffort),
            "fail-fast" => Ok(Self::FailFast),
            other => Err(format!(
                "unknown error policy '{other}', expected 'best-effort' or 'fail-fast'"
            )),
        }
    }
}

/// Global settings available to every task.
#[derive(Debug, Clone)]
pub struct Environment {
    /// The name of the generator.
    pub generator: &'static str,
    /// Project root, every configured path is relative to it.
    pub root: Utf8PathBuf,
    /// The current build mode (Build or Watch).
    pub mode: Mode,
    /// The port of the reload WebSocket server (if running).
    pub port: Option<u16>,
    /// How recoverable transformer errors are treated.
    pub policy: ErrorPolicy,
}

impl Environment {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            generator: "fuigo",
            root: root.into(),
            mode: Mode::Build,
            port: None,
            policy: ErrorPolicy::default(),
        }
    }

    /// Resolves a project-relative path against the root.
    pub fn path(&self, relative: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.root.join(relative)
    }

    /// Returns a JavaScript snippet to enable live-reloading.
    ///
    /// The client reloads the page on `"reload"` and re-requests every
    /// stylesheet on `"css"`, so style edits apply without losing state.
    pub fn get_refresh_script(&self) -> Option<String> {
        if self.mode != Mode::Watch {
            return None;
        }

        self.port.map(|port| {
            format!(
                r#"
const socket = new WebSocket("ws://" + (location.hostname || "localhost") + ":{port}");
socket.addEventListener("message", event => {{
    if (event.data === "css") {{
        for (const link of document.querySelectorAll('link[rel="stylesheet"]')) {{
            const url = new URL(link.href);
            url.searchParams.set("_reload", Date.now());
            link.href = url.toString();
        }}
    }} else {{
        window.location.reload();
    }}
}});
"#
            )
        })
    }
}

/// The context passed to every transformer invocation.
pub struct TaskContext<'a> {
    /// Name of the running task.
    pub name: &'a str,
    /// Access to global configuration.
    pub env: &'a Environment,
    /// Tracing span assigned to this task.
    pub(crate) span: tracing::Span,
}

impl TaskContext<'_> {
    pub fn path(&self, relative: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.env.path(relative)
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}
