use std::fs::Metadata;
use std::io;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, response::Builder, HeaderMap, StatusCode},
    response::Response,
    Router,
};
use tokio::signal;
use tower_http::compression::CompressionLayer;

use crate::error::{PaperError, Result};
use crate::html::{self, RenderRequest, SourceLocation};
use crate::page::{PageContext, Settings};
use crate::storage::{decode_prefs, MemoryStore, PreferenceStore};
use crate::web_assets;

/// Maximum number of consecutive ports to try before giving up.
const MAX_PORT_ATTEMPTS: u16 = 100;

/// Maximum file size that will be read and served (16 MiB).
pub const MAX_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Everything `paperdoc serve` needs to start.
pub struct ServeOptions {
    /// Markdown entry file; its directory becomes the serve root.
    pub file: PathBuf,
    pub bind_addr: String,
    pub start_port: u16,
    pub settings: Settings,
    pub prefs_path: PathBuf,
}

/// Shared state handed to the request handler.
pub struct AppState {
    /// Base directory from which markdown files and assets are served.
    pub serve_root: PathBuf,
    /// Canonicalized `serve_root` used for symlink-safe containment checks.
    pub canonical_root: PathBuf,
    pub settings: Settings,
    /// Preference file consulted for the stored theme on every render.
    pub prefs_path: PathBuf,
}

/// Bind a TCP listener on `bind_addr`, starting at `start_port`.
///
/// `EADDRINUSE` moves on to the next port, up to `MAX_PORT_ATTEMPTS` ports;
/// any other OS error fails immediately.
pub fn bind_with_retry(bind_addr: &str, start_port: u16) -> Result<(TcpListener, u16)> {
    let mut port = start_port;
    log::info!("[bind] trying port={port}");
    for _ in 0..MAX_PORT_ATTEMPTS {
        match TcpListener::bind((bind_addr, port)) {
            Ok(listener) => {
                log::info!("[bind] success port={port}");
                return Ok((listener, port));
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                let next = port.wrapping_add(1);
                log::info!("[bind] EADDRINUSE, trying {next}");
                port = next;
            }
            Err(e) => {
                return Err(PaperError::Bind(format!("bind {bind_addr}:{port} failed: {e}")));
            }
        }
    }
    Err(PaperError::Bind(format!(
        "exhausted {MAX_PORT_ATTEMPTS} port candidates starting at {start_port}; all ports in use"
    )))
}

// ---------------------------------------------------------------------------
// Request path and query helpers
// ---------------------------------------------------------------------------

/// Decode `%XX` escapes byte by byte.
///
/// Fails on a truncated or non-hex escape and on output that is not UTF-8.
pub fn percent_decode(encoded: &str) -> std::result::Result<String, ()> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len() {
                return Err(());
            }
            out.push((hex_digit(bytes[i + 1])? << 4) | hex_digit(bytes[i + 2])?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| ())
}

fn hex_digit(b: u8) -> std::result::Result<u8, ()> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        _ => Err(()),
    }
}

/// Strip `.` and empty components and resolve `..` against a stack.
///
/// `None` means a `..` tried to climb above the serve root.
pub fn normalize_path(decoded: &str) -> Option<PathBuf> {
    let mut parts: Vec<&str> = Vec::new();
    for component in decoded.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            name => parts.push(name),
        }
    }
    Some(parts.iter().collect())
}

/// `Content-Type` for a file extension, case-insensitive.
///
/// Unknown extensions map to `application/octet-stream`.
pub fn mime_for_ext(ext: &str) -> &'static str {
    match ext.to_lowercase().as_str() {
        "md" | "html" | "htm" => "text/html; charset=utf-8",
        "txt" => "text/plain; charset=utf-8",
        "css" => "text/css",
        "js" => "text/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff2" => "font/woff2",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// True when the query string carries `raw=1`.
fn is_raw_mode(query: &str) -> bool {
    query.split('&').any(|param| param == "raw=1")
}

/// Value of the first `name=` parameter, form-decoded (`+` is a space).
///
/// Malformed escapes make the parameter count as absent.
fn query_param(query: &str, name: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .and_then(|(_, value)| percent_decode(&value.replace('+', " ")).ok())
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Resolve a request candidate to an existing file.
///
/// Tries the exact file, then `README.md` and `index.md` inside a directory,
/// then `<candidate>.md` for extensionless paths. Returns the file and the
/// branch that matched.
async fn resolve_candidate(candidate: &Path) -> Option<(PathBuf, &'static str)> {
    match tokio::fs::metadata(candidate).await {
        Ok(meta) if meta.is_file() => return Some((candidate.to_path_buf(), "exact")),
        Ok(meta) if meta.is_dir() => {
            for (name, branch) in [("README.md", "readme"), ("index.md", "index")] {
                let path = candidate.join(name);
                if is_file(&path).await {
                    return Some((path, branch));
                }
            }
            return None;
        }
        _ => {}
    }

    if candidate.extension().is_none() {
        let with_md = candidate.with_extension("md");
        if is_file(&with_md).await {
            return Some((with_md, "extensionless"));
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Conditional GET
// ---------------------------------------------------------------------------

/// Cache validators for one representation of a file.
struct Validators {
    etag: String,
    last_modified: SystemTime,
}

impl Validators {
    /// `variant` distinguishes representations of the same file (query, theme).
    fn new(meta: &Metadata, variant: Option<&str>) -> Self {
        let modified = meta.modified().unwrap_or(UNIX_EPOCH);
        let secs = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mut etag = format!("\"{:x}-{:x}", meta.len(), secs);
        if let Some(variant) = variant.filter(|v| !v.is_empty()) {
            etag.push('-');
            etag.push_str(&fnv1a_hex(variant));
        }
        etag.push('"');
        Self {
            etag,
            last_modified: UNIX_EPOCH + Duration::from_secs(secs),
        }
    }

    /// `If-None-Match` wins over `If-Modified-Since` when both are sent.
    fn not_modified(&self, headers: &HeaderMap) -> bool {
        if let Some(tags) = headers
            .get(header::IF_NONE_MATCH)
            .and_then(|v| v.to_str().ok())
        {
            return tags.split(',').map(str::trim).any(|tag| {
                tag == "*" || tag == self.etag || tag.strip_prefix("W/") == Some(self.etag.as_str())
            });
        }
        headers
            .get(header::IF_MODIFIED_SINCE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| httpdate::parse_http_date(v).ok())
            .is_some_and(|since| self.last_modified <= since)
    }

    fn apply(&self, builder: Builder) -> Builder {
        builder
            .header(header::ETAG, &self.etag)
            .header(header::LAST_MODIFIED, httpdate::fmt_http_date(self.last_modified))
    }
}

/// 64-bit FNV-1a, stable across runs.
fn fnv1a_hex(s: &str) -> String {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in s.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    format!("{hash:x}")
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

/// Builder preloaded with status, content type, and `nosniff`.
fn respond(status: StatusCode, content_type: &str) -> Builder {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::X_CONTENT_TYPE_OPTIONS, "nosniff")
}

fn not_found_response() -> Response {
    respond(StatusCode::NOT_FOUND, "text/plain; charset=utf-8")
        .body(Body::from("Not Found"))
        .expect("not_found_response builder is infallible")
}

fn too_large_response(norm_path: &str, size: u64) -> Response {
    respond(StatusCode::PAYLOAD_TOO_LARGE, "text/plain; charset=utf-8")
        .body(Body::from(format!(
            "Content Too Large: {norm_path} ({size} bytes exceeds {MAX_FILE_SIZE} byte limit)"
        )))
        .expect("too_large_response builder is infallible")
}

fn not_modified_response(validators: &Validators) -> Response {
    validators
        .apply(
            Response::builder()
                .status(StatusCode::NOT_MODIFIED)
                .header(header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        )
        .body(Body::empty())
        .expect("not_modified_response builder is infallible")
}

fn asset_response(content_type: &str, body: &'static str) -> Response {
    respond(StatusCode::OK, content_type)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(body))
        .expect("asset response builder is infallible")
}

/// Render `source` into a full page for `path`, optionally highlighting
/// `query`. The page sees `theme` as its stored theme; rendering never
/// touches the preference file.
fn render_page_html(
    state: &AppState,
    source: &str,
    path: &Path,
    query: Option<&str>,
    theme: Option<&str>,
) -> String {
    let mut store = MemoryStore::new();
    if let Some(theme) = theme {
        // MemoryStore writes cannot fail.
        let _ = store.set(&state.settings.theme_key, theme);
    }
    let ctx = PageContext {
        settings: state.settings.clone(),
        store: Box::new(store),
        platform: html::host_platform(),
    };
    let request = RenderRequest {
        location: SourceLocation {
            file_path: path,
            serve_root: &state.canonical_root,
        },
        query,
    };
    html::render_page(source, &request, ctx).to_html()
}

/// Theme currently stored in the preference file. Missing or unreadable
/// files count as no theme.
async fn stored_theme(state: &AppState) -> Option<String> {
    let text = match tokio::fs::read_to_string(&state.prefs_path).await {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            log::warn!("[prefs] path={} read failed: {e}", state.prefs_path.display());
            return None;
        }
    };
    match decode_prefs(&state.prefs_path, &text) {
        Ok(mut values) => values.remove(&state.settings.theme_key),
        Err(e) => {
            log::warn!("[prefs] {e}");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Request handler
// ---------------------------------------------------------------------------

/// Serve one request through the secure path pipeline.
///
/// 0. `/assets/paperdoc.{css,js}` come from embedded constants.
/// 1. Percent-decode the raw path; reject NUL bytes.
/// 2. Normalize; reject traversal above the root.
/// 3. Resolve: exact file, directory `README.md`/`index.md`, extensionless `.md`.
/// 4. Canonicalize and re-check containment (symlink-safe).
/// 5. Stat; reject files over `MAX_FILE_SIZE` with 413.
/// 6. Answer 304 when the client's validators still match.
/// 7. Markdown renders to a page (`?raw=1` returns the source, `?q=`
///    pre-applies the search highlight); anything else is a static file.
///
/// Every response carries `X-Content-Type-Options: nosniff`.
async fn serve_handler(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let raw_path = req.uri().path().to_owned();
    let query = req.uri().query().unwrap_or("").to_owned();
    let headers = req.headers().clone();

    match raw_path.as_str() {
        web_assets::CSS_PATH => {
            log::debug!("[request] path={raw_path} mode=asset");
            return asset_response("text/css; charset=utf-8", web_assets::CSS);
        }
        web_assets::JS_PATH => {
            log::debug!("[request] path={raw_path} mode=asset");
            return asset_response("text/javascript; charset=utf-8", web_assets::JS);
        }
        _ => {}
    }

    let Ok(decoded) = percent_decode(&raw_path) else {
        log::info!("[resolve] path={raw_path} branch=denied reason=invalid-percent-encoding");
        return not_found_response();
    };
    if decoded.contains('\0') {
        log::info!("[resolve] path={raw_path} branch=denied reason=null-byte");
        return not_found_response();
    }

    let Some(normalized) = normalize_path(&decoded) else {
        log::info!("[resolve] path={raw_path} branch=denied reason=path-traversal");
        return not_found_response();
    };
    let norm_display = normalized.display().to_string();

    let candidate = state.serve_root.join(&normalized);
    let Some((resolved, branch)) = resolve_candidate(&candidate).await else {
        log::info!("[resolve] path={norm_display} branch=denied reason=not-found");
        return not_found_response();
    };

    let Ok(canonical) = tokio::fs::canonicalize(&resolved).await else {
        log::info!("[resolve] path={norm_display} branch=denied reason=canonicalize-failed");
        return not_found_response();
    };
    if !canonical.starts_with(&state.canonical_root) {
        log::warn!(
            "[resolve] path={norm_display} branch=denied reason=outside-root canonical={}",
            canonical.display()
        );
        return not_found_response();
    }

    let Ok(meta) = tokio::fs::metadata(&canonical).await else {
        log::info!("[resolve] path={norm_display} branch=denied reason=metadata-failed");
        return not_found_response();
    };
    let size = meta.len();
    if size > MAX_FILE_SIZE {
        log::warn!("[resolve] path={norm_display} branch=denied reason=too-large size={size}");
        return too_large_response(&norm_display, size);
    }
    log::info!("[resolve] path={norm_display} branch={branch} size={size}");

    let ext = canonical
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_owned();

    if !ext.eq_ignore_ascii_case("md") {
        let validators = Validators::new(&meta, None);
        if validators.not_modified(&headers) {
            return not_modified_response(&validators);
        }
        let Ok(bytes) = tokio::fs::read(&canonical).await else {
            return not_found_response();
        };
        return validators
            .apply(respond(StatusCode::OK, mime_for_ext(&ext)))
            .body(Body::from(bytes))
            .expect("static file response builder is infallible");
    }

    let raw = is_raw_mode(&query);
    let search = query_param(&query, "q").filter(|q| !q.trim().is_empty());
    let theme = if raw { None } else { stored_theme(&state).await };
    let variant = if raw {
        "raw".to_owned()
    } else {
        format!(
            "q={}&theme={}",
            search.as_deref().unwrap_or(""),
            theme.as_deref().unwrap_or("")
        )
    };
    let validators = Validators::new(&meta, Some(variant.as_str()));
    if validators.not_modified(&headers) {
        log::debug!("[request] path={norm_display} mode=not-modified");
        return not_modified_response(&validators);
    }

    let Ok(source) = tokio::fs::read_to_string(&canonical).await else {
        return not_found_response();
    };

    if raw {
        log::info!("[request] path={norm_display} mode=raw");
        return validators
            .apply(respond(StatusCode::OK, "text/plain; charset=utf-8"))
            .body(Body::from(source))
            .expect("raw mode response builder is infallible");
    }

    let page = render_page_html(&state, &source, &canonical, search.as_deref(), theme.as_deref());
    log::info!("[request] path={norm_display} mode=rendered");
    validators
        .apply(respond(StatusCode::OK, "text/html; charset=utf-8"))
        .body(Body::from(page))
        .expect("rendered page response builder is infallible")
}

// ---------------------------------------------------------------------------
// Server entry point
// ---------------------------------------------------------------------------

/// Build the router: one fallback handler behind gzip/brotli compression.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(serve_handler)
        .with_state(state)
        .layer(CompressionLayer::new())
}

/// Serve the directory of `options.file` until Ctrl+C.
///
/// Prints a startup banner with the root, entry file, and URL on stdout.
pub async fn run_serve(options: ServeOptions) -> Result<()> {
    let entry_file = std::fs::canonicalize(&options.file).map_err(|source| PaperError::Read {
        path: options.file.clone(),
        source,
    })?;
    let serve_root = entry_file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let canonical_root = std::fs::canonicalize(&serve_root).unwrap_or_else(|_| serve_root.clone());

    let (std_listener, bound_port) = bind_with_retry(&options.bind_addr, options.start_port)?;
    std_listener.set_nonblocking(true)?;
    let listener = tokio::net::TcpListener::from_std(std_listener)?;

    let entry_rel = entry_file
        .strip_prefix(&canonical_root)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    println!("paperdoc serve");
    println!("root:  {}", canonical_root.display());
    println!("entry: {}", entry_file.display());
    println!("url:   http://{}:{}/{}", options.bind_addr, bound_port, entry_rel);

    let state = Arc::new(AppState {
        serve_root,
        canonical_root,
        settings: options.settings,
        prefs_path: options.prefs_path,
    });

    log::info!("[serve] listening on {}:{}", options.bind_addr, bound_port);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = signal::ctrl_c().await {
                log::error!("[shutdown] cannot listen for Ctrl+C: {e}");
                std::future::pending::<()>().await;
            }
            log::info!("[shutdown] complete");
        })
        .await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
