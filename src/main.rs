mod chrome;
mod dom;
mod error;
mod events;
mod html;
mod page;
mod replay;
mod search;
mod serve;
mod slug;
mod storage;
mod toc;
mod web_assets;

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    process,
};

use clap::{Parser, Subcommand};
use env_logger::{Env, Target};

use crate::chrome::next_theme;
use crate::error::{PaperError, Result};
use crate::html::{RenderRequest, SourceLocation};
use crate::page::{Page, PageContext, Settings};
use crate::storage::{default_prefs_path, JsonFileStore, MemoryStore, PreferenceStore};

/// Extensions accepted as markdown input.
const MARKDOWN_EXTENSIONS: [&str; 6] = ["md", "markdown", "mdx", "mdown", "mkd", "mkdn"];

/// Explicit subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Render a markdown file into a complete reading page
    Render {
        /// Path to the markdown file
        file: PathBuf,
        /// Write the page here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
        /// Pre-apply an in-page search highlight
        #[arg(long)]
        query: Option<String>,
    },
    /// Serve a markdown file's directory over HTTP
    Serve {
        /// Path to the markdown entry file
        file: PathBuf,
        /// Interface address to bind to
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Starting port number for the HTTP server
        #[arg(long, default_value = "3333")]
        port: u16,
    },
    /// Read or change the stored page theme
    Theme {
        #[command(subcommand)]
        action: Option<ThemeAction>,
    },
    /// Print word count and reading time
    Stats {
        /// Path to the markdown file
        file: PathBuf,
    },
    /// Print every highlighted match of a query
    Search {
        /// Path to the markdown file
        file: PathBuf,
        /// Text to look for (case-insensitive, literal)
        query: String,
    },
    /// Replay a JSON session script against a rendered page
    Replay {
        /// Path to the markdown file
        file: PathBuf,
        /// JSON array of scroll, layout, click, key, search, and teardown steps
        script: PathBuf,
        /// Write the final page here
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum ThemeAction {
    /// Print the stored theme (`light` when nothing is stored)
    Get,
    /// Store a theme by name
    Set { name: String },
    /// Switch between `dark` and `light`
    Toggle,
}

#[derive(Parser, Debug)]
#[command(
    name = "paperdoc",
    version,
    about = "Markdown reading pages with a generated TOC, in-page search, and reading stats",
    after_help = "INVOCATION FORMS:\n  paperdoc render [OPTIONS] <file>     Render a page to stdout or --out\n  paperdoc serve [OPTIONS] <file>      Serve the file's directory over HTTP\n  paperdoc theme [get|set <name>|toggle]\n  paperdoc stats <file>\n  paperdoc search <file> <query>\n  paperdoc replay [OPTIONS] <file> <script>"
)]
struct Cli {
    /// JSON settings file (heading tags, reading speed, thresholds)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Preference file holding the stored theme
    #[arg(long, global = true)]
    prefs: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(Target::Stderr)
        .init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    let prefs_path = default_prefs_path(cli.prefs);

    match cli.command {
        Commands::Render { file, out, query } => {
            let store = JsonFileStore::new(&prefs_path);
            let page = load_page(&file, settings, Box::new(store), query.as_deref())?;
            let html = page.to_html();
            match out {
                Some(out) => {
                    fs::write(&out, html).map_err(|source| PaperError::Write {
                        path: out.clone(),
                        source,
                    })?;
                    log::info!("[render] wrote path={}", out.display());
                }
                None => io::stdout().write_all(html.as_bytes())?,
            }
        }
        Commands::Serve { file, bind, port } => {
            check_extension(&file)?;
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            rt.block_on(serve::run_serve(serve::ServeOptions {
                file,
                bind_addr: bind,
                start_port: port,
                settings,
                prefs_path,
            }))?;
        }
        Commands::Theme { action } => {
            let mut store = JsonFileStore::new(&prefs_path);
            let key = settings.theme_key.as_str();
            match action.unwrap_or(ThemeAction::Get) {
                ThemeAction::Get => {
                    println!("{}", store.get(key)?.unwrap_or_else(|| "light".to_owned()));
                }
                ThemeAction::Set { name } => {
                    store.set(key, &name)?;
                    println!("{name}");
                }
                ThemeAction::Toggle => {
                    let next = next_theme(store.get(key)?.as_deref());
                    store.set(key, next)?;
                    println!("{next}");
                }
            }
            log::debug!("[theme] prefs={}", prefs_path.display());
        }
        Commands::Stats { file } => {
            let page = load_page(&file, settings, Box::new(MemoryStore::new()), None)?;
            if let Some(stats) = page.stats() {
                println!("{}", stats.word_count_label());
                println!("{}", stats.reading_time_label());
            }
            let sections = page.toc().map_or(0, |toc| toc.len());
            println!("{sections} разделов");
        }
        Commands::Search { file, query } => {
            let page = load_page(&file, settings, Box::new(MemoryStore::new()), Some(&query))?;
            let doc = page.document();
            println!("{}", page.marks().len());
            for &mark in page.marks() {
                println!("{}", doc.text_content(mark));
            }
        }
        Commands::Replay { file, script, out } => {
            let steps = replay::load_script(&script)?;
            // Seed an in-memory store so theme clicks never touch the prefs file.
            let mut store = MemoryStore::new();
            let key = settings.theme_key.clone();
            match JsonFileStore::new(&prefs_path).get(&key) {
                Ok(Some(theme)) => store.set(&key, &theme)?,
                Ok(None) => {}
                Err(e) => log::warn!("[prefs] ignoring stored theme: {e}"),
            }
            let mut page = load_page(&file, settings, Box::new(store), None)?;
            for line in replay::outline(&page) {
                println!("{line}");
            }
            for step in &steps {
                println!("{}", replay::run_step(&mut page, step));
            }
            log::info!("[replay] script={} steps={}", script.display(), steps.len());
            if let Some(out) = out {
                fs::write(&out, page.to_html()).map_err(|source| PaperError::Write {
                    path: out.clone(),
                    source,
                })?;
            }
        }
    }
    Ok(())
}

/// Reject files whose extension is not a markdown one.
fn check_extension(path: &Path) -> Result<()> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if MARKDOWN_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) => Ok(()),
        Some(ext) => Err(PaperError::UnsupportedExtension(ext.to_owned())),
        None => Err(PaperError::UnsupportedExtension("(none)".to_owned())),
    }
}

/// Read `path` and build an initialized page rooted at its directory.
fn load_page(
    path: &Path,
    settings: Settings,
    store: Box<dyn PreferenceStore + Send>,
    query: Option<&str>,
) -> Result<Page> {
    check_extension(path)?;
    let source = fs::read_to_string(path).map_err(|source| PaperError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let serve_root = canonical
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let request = RenderRequest {
        location: SourceLocation {
            file_path: &canonical,
            serve_root: &serve_root,
        },
        query,
    };
    let ctx = PageContext {
        settings,
        store,
        platform: html::host_platform(),
    };
    Ok(html::render_page(&source, &request, ctx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_defaults() {
        let cli = Cli::try_parse_from(["paperdoc", "serve", "README.md"]).unwrap();
        match cli.command {
            Commands::Serve { file, bind, port } => {
                assert_eq!(file, PathBuf::from("README.md"));
                assert_eq!(bind, "127.0.0.1");
                assert_eq!(port, 3333);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["paperdoc", "theme", "set", "dark", "--prefs", "/tmp/p.json"]).unwrap();
        assert_eq!(cli.prefs, Some(PathBuf::from("/tmp/p.json")));
        match cli.command {
            Commands::Theme { action } => {
                assert_eq!(action, Some(ThemeAction::Set { name: "dark".into() }));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn extension_check_accepts_markdown_variants() {
        assert!(check_extension(Path::new("a.md")).is_ok());
        assert!(check_extension(Path::new("a.MARKDOWN")).is_ok());
        assert!(check_extension(Path::new("a.mkdn")).is_ok());
        assert!(matches!(
            check_extension(Path::new("a.txt")),
            Err(PaperError::UnsupportedExtension(ext)) if ext == "txt"
        ));
        assert!(check_extension(Path::new("Makefile")).is_err());
    }

    #[test]
    fn load_page_reads_and_initializes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.md");
        fs::write(&path, "# Doc\n\n## One\n\ntext here\n").unwrap();
        let page = load_page(&path, Settings::default(), Box::new(MemoryStore::new()), Some("text")).unwrap();
        assert_eq!(page.toc().map(|t| t.len()), Some(1));
        assert_eq!(page.marks().len(), 1);
    }

    #[test]
    fn load_page_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_page(&dir.path().join("nope.md"), Settings::default(), Box::new(MemoryStore::new()), None)
            .err()
            .unwrap();
        assert!(matches!(err, PaperError::Read { .. }), "got {err:?}");
    }
}
