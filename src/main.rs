use clap::{Args, Parser, Subcommand};
use spacedump::confluence::{self, Auth, ConfluenceClient};
use spacedump::config::{self, CONFIG_FILE, ExportConfig};
use spacedump::editor;
use spacedump::export::{self, ExportOptions};
use spacedump::gateway::{Gateway, RootDirectory};
use spacedump::patch::{self, PatchOptions};
use spacedump::scan::{self, ScanRequest};
use spacedump::sidebar::SidebarMode;
use spacedump::{download::DownloadOptions, output};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

fn version_string() -> &'static str {
    let hash = env!("SPACEDUMP_GIT_HASH");
    if hash.is_empty() {
        env!("CARGO_PKG_VERSION")
    } else {
        // Leaked once at startup
        Box::leak(format!("{} ({hash})", env!("CARGO_PKG_VERSION")).into_boxed_str())
    }
}

#[derive(Parser)]
#[command(name = "spacedump")]
#[command(about = "Export Confluence pages into a browsable offline archive")]
#[command(long_about = "\
Export Confluence pages into a browsable offline archive

Pages are discovered in their manual order, downloaded in parallel and written
with their attachments into a self-contained HTML archive:

  <outdir>/<YYYY-MM-DD HHMM> <title>/
  ├── index.html
  ├── sidebar.md                   # Editable navigation (Markdown list)
  ├── sidebar.html  tree.json
  ├── styles/site.css
  ├── pages/<title>--<id>.html     # One file per page, plus .json metadata
  └── attachments/<page-id>/<file>

Restructure the navigation by copying sidebar.md to sidebar_edit.md, moving
lines around (indentation is nesting, `- Title` lines without a link become
folders) and running 'spacedump patch <archive>'. No page is downloaded again.
'spacedump edit <archive>' writes editor.html, a drag-and-drop view of the
sidebar that exports sidebar_edit.md.

Credentials come from the environment:
  Cloud:        CONFLUENCE_USER and CONFLUENCE_TOKEN (API token)
  Data Center:  CONFLUENCE_TOKEN (personal access token)

Run 'spacedump gen-config' to generate a documented spacedump.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Config file
    #[arg(long, default_value = CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Log progress details (same as RUST_LOG=info)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// Connection and output flags shared by every export command.
#[derive(Args, Clone, Default)]
struct ExportArgs {
    /// Site root, e.g. https://acme.atlassian.net
    #[arg(long)]
    base_url: Option<String>,

    /// Deployment type
    #[arg(long, value_parser = ["cloud", "dc"])]
    platform: Option<String>,

    /// Path the site is served under (Data Center), e.g. /confluence
    #[arg(long)]
    context_path: Option<String>,

    /// Parent directory of the export
    #[arg(short, long)]
    outdir: Option<PathBuf>,

    /// Extra stylesheet linked after the standard one
    #[arg(long)]
    css_file: Option<PathBuf>,

    /// Concurrent page downloads
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    /// Write straight into --outdir instead of a timestamped directory
    #[arg(long)]
    no_timestamp: bool,

    /// Skip a page and everything below it (repeatable)
    #[arg(long = "exclude-page-id", value_name = "ID")]
    exclude_page_ids: Vec<String>,

    /// Skip pages carrying this label, with everything below them
    #[arg(long)]
    exclude_label: Option<String>,

    /// Only discover and print the tree; download nothing
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Export one page without its descendants
    Single {
        #[arg(short, long)]
        page_id: String,
        #[command(flatten)]
        args: ExportArgs,
    },
    /// Export a page and all its descendants
    Tree {
        #[arg(short, long)]
        page_id: String,
        #[command(flatten)]
        args: ExportArgs,
    },
    /// Export a whole space from its homepage
    Space {
        #[arg(short, long)]
        space_key: String,
        #[command(flatten)]
        args: ExportArgs,
    },
    /// Export every page carrying a label, with its descendants
    Label {
        #[arg(short, long)]
        label: String,
        #[command(flatten)]
        args: ExportArgs,
    },
    /// Export every space, one archive each
    AllSpaces {
        #[command(flatten)]
        args: ExportArgs,
    },
    /// Re-apply an edited sidebar to an existing archive
    Patch {
        /// Archive directory (the one containing sidebar.md)
        site_dir: PathBuf,
        /// Promote the children of a single top-level entry
        #[arg(long)]
        unwrap: bool,
        /// Ignore sidebar_edit.md and restore the original navigation
        #[arg(long)]
        restore_original: bool,
    },
    /// Write a drag-and-drop sidebar editor (editor.html) into an archive
    Edit {
        /// Archive directory (the one containing sidebar.md)
        site_dir: PathBuf,
        /// Show sidebar.md even when sidebar_edit.md exists
        #[arg(long)]
        restore_original: bool,
    },
    /// Print a stock spacedump.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --verbose enables INFO level, otherwise use RUST_LOG or default to WARN
    let filter = if cli.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Single { page_id, args } => {
            let session = Session::open(&cli.config, &args)?;
            let title = session.client.get_metadata(&page_id)?.title;
            let request = ScanRequest::single(&page_id);
            session.run(request, &title, SidebarMode::Default)?;
        }
        Command::Tree { page_id, args } => {
            let session = Session::open(&cli.config, &args)?;
            let title = session.client.get_metadata(&page_id)?.title;
            let request = ScanRequest::tree(&page_id);
            session.run(request, &title, SidebarMode::Default)?;
        }
        Command::Space { space_key, args } => {
            let session = Session::open(&cli.config, &args)?;
            let homepage = session.client.space_homepage(&space_key)?;
            session.run(ScanRequest::tree(homepage), &space_key, SidebarMode::Space)?;
        }
        Command::Label { label, args } => {
            let session = Session::open(&cli.config, &args)?;
            let roots = session.client.pages_with_label(&label)?;
            println!("Found {} pages labelled \"{}\"", roots.len(), label);
            let request = ScanRequest::forest(roots, &label);
            session.run(request, &label, SidebarMode::Default)?;
        }
        Command::AllSpaces { args } => {
            let session = Session::open(&cli.config, &args)?;
            let spaces = session.client.list_spaces()?;
            output::print_space_list(&spaces);
            let mut failed = 0;
            for space in &spaces {
                if session.cancelled() {
                    break;
                }
                println!("==> Space {} ({})", space.name, space.key);
                let result = session
                    .client
                    .space_homepage(&space.key)
                    .map_err(Box::<dyn std::error::Error>::from)
                    .and_then(|homepage| {
                        session.run(ScanRequest::tree(homepage), &space.name, SidebarMode::Space)
                    });
                if let Err(err) = result {
                    error!("Space {} failed: {}", space.key, err);
                    failed += 1;
                }
            }
            if failed > 0 {
                println!("{} of {} spaces could not be exported", failed, spaces.len());
            }
        }
        Command::Patch {
            site_dir,
            unwrap,
            restore_original,
        } => {
            let (sidebar, markdown) = patch::load_edited_sidebar(&site_dir, restore_original)?;
            let report = patch::apply_patch(&site_dir, &markdown, &PatchOptions { unwrap })?;
            output::print_patch_report(&report, &sidebar, unwrap);
        }
        Command::Edit {
            site_dir,
            restore_original,
        } => {
            let written = editor::write_editor(&site_dir, restore_original)?;
            output::print_editor_output(&written);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// A configured client plus everything an export run needs.
struct Session {
    client: ConfluenceClient,
    config: ExportConfig,
    exclude_page_ids: Vec<String>,
    dry_run: bool,
    cancel: Arc<AtomicBool>,
}

impl Session {
    fn open(config_path: &Path, args: &ExportArgs) -> Result<Self, Box<dyn std::error::Error>> {
        let config = config::load_config(config_path, Some(cli_overlay(args)))?;
        let gateway = &config.gateway;
        if gateway.base_url.trim().is_empty() {
            return Err(format!(
                "no site configured: pass --base-url or set gateway.base_url in {}",
                config_path.display()
            )
            .into());
        }
        let site = confluence::site_url(
            &gateway.base_url,
            gateway.platform,
            gateway.context_path.as_deref(),
        );
        let auth = Auth::from_env(gateway.platform, gateway.auth)?;
        let client = ConfluenceClient::new(
            site,
            auth,
            Duration::from_secs(config.download.timeout_secs),
        );

        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        ctrlc::set_handler(move || {
            if flag.swap(true, Ordering::Relaxed) {
                std::process::exit(130);
            }
            eprintln!("Interrupted: finishing pages in flight (press Ctrl-C again to abort)");
        })?;

        // CLI ids add to the configured ones rather than replacing them.
        let mut exclude_page_ids = config.scan.exclude_page_ids.clone();
        exclude_page_ids.extend(args.exclude_page_ids.iter().cloned());

        Ok(Self {
            client,
            config,
            exclude_page_ids,
            dry_run: args.dry_run,
            cancel,
        })
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn run(
        &self,
        request: ScanRequest,
        title: &str,
        mode: SidebarMode,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let request = request
            .exclude_ids(&self.exclude_page_ids)
            .exclude_label(self.config.scan.exclude_label.clone());

        if self.dry_run {
            let inventory = scan::scan(&self.client, &request)?;
            output::print_scan_output(&inventory.tree, &inventory.report);
            return Ok(());
        }

        let outdir = PathBuf::from(&self.config.output.outdir);
        let output_root = if self.config.output.timestamped_dirs {
            export::run_directory(&outdir, title, &chrono::Local::now())
        } else {
            outdir
        };
        let options = ExportOptions {
            title: Some(title.to_string()),
            mode,
            custom_css: self.config.output.css_file.as_ref().map(PathBuf::from),
            download: DownloadOptions {
                concurrency: config::effective_threads(&self.config.download),
                write_metadata_json: self.config.output.write_metadata_json,
                base_url: Some(self.client.site_url().to_string()),
                cancel: Some(Arc::clone(&self.cancel)),
                ..DownloadOptions::default()
            },
        };

        let (tx, rx) = std::sync::mpsc::channel();
        let printer = std::thread::spawn(move || {
            for event in rx {
                for line in output::format_download_event(&event) {
                    println!("{}", line);
                }
            }
        });
        let result = export::export(&self.client, &request, &output_root, &options, Some(tx));
        printer
            .join()
            .map_err(|_| "progress printer thread panicked")?;
        let report = result?;

        output::print_export_report(&report);
        if !report.download.is_complete() {
            warn!(
                "Archive at {} is incomplete; re-run the export to fill the gaps",
                report.output_root.display()
            );
        }
        Ok(())
    }
}

/// Command-line values as a TOML overlay, the top configuration layer.
fn cli_overlay(args: &ExportArgs) -> toml::Value {
    let mut root = toml::Table::new();
    let mut set = |section: &str, key: &str, value: toml::Value| {
        if let Some(table) = root
            .entry(section)
            .or_insert_with(|| toml::Value::Table(toml::Table::new()))
            .as_table_mut()
        {
            table.insert(key.to_string(), value);
        }
    };

    if let Some(url) = &args.base_url {
        set("gateway", "base_url", url.clone().into());
    }
    if let Some(platform) = &args.platform {
        set("gateway", "platform", platform.clone().into());
    }
    if let Some(path) = &args.context_path {
        set("gateway", "context_path", path.clone().into());
    }
    if let Some(dir) = &args.outdir {
        set("output", "outdir", dir.display().to_string().into());
    }
    if let Some(css) = &args.css_file {
        set("output", "css_file", css.display().to_string().into());
    }
    if args.no_timestamp {
        set("output", "timestamped_dirs", false.into());
    }
    if let Some(threads) = args.threads {
        set("download", "threads", (threads as i64).into());
    }
    if let Some(label) = &args.exclude_label {
        set("scan", "exclude_label", label.clone().into());
    }
    toml::Value::Table(root)
}
