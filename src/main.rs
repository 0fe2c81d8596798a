use clap::{Parser, Subcommand};
use imageresize::ephemeral::{DESCRIPTOR_PREFIX, EphemeralCache};
use imageresize::gc::{self, NoHook};
use imageresize::options::CanonicalOptions;
use imageresize::permalink::Permalinks;
use imageresize::route::{self, Route};
use imageresize::store::{FileDescriptorStore, FilePermalinkStore};
use imageresize::{Resizer, config, output};
use serde_json::Value;
use std::path::PathBuf;

/// Flags shared by the commands that hand out URLs.
#[derive(clap::Args, Clone)]
struct ResizeArgs {
    /// Source image: a path relative to the base directory, a same-site URL,
    /// or media JSON such as {"path":"media/a.jpg"}
    source: String,

    /// Target width in pixels
    #[arg(long, short = 'W')]
    width: Option<i64>,

    /// Target height in pixels
    #[arg(long, short = 'H')]
    height: Option<i64>,

    /// Extra option as key=value (repeatable), e.g. --option mode=cover
    #[arg(long = "option", short = 'o', value_parser = parse_option)]
    options: Vec<(String, Value)>,
}

#[derive(Parser)]
#[command(name = "imageresize")]
#[command(version)]
#[command(about = "On-demand image resizing with a content-addressed cache")]
#[command(long_about = "\
On-demand image resizing with a content-addressed cache

'resize' and 'permalink' hand out URLs without touching pixels. 'fetch'
serves a URL, rendering the artifact on first request and from disk after.

Layout under --base-dir (paths configurable in imageresize.toml):

  storage/imageresizecache/         # Artifacts, sharded by cache key
  │   └── 3a7/bd3/e23/3a7bd3…4f1b.jpg
  storage/imageresize/descriptors/  # Pending ephemeral renders
  storage/imageresize/permalinks/   # Permalink records

URL shapes:
  Ephemeral: {app_url}/imageresize/{key}.{ext}
  Permalink: {app_url}/imageresizestatic/{identifier}.{ext}
  Cached:    {app_url}/storage/imageresizecache/{k0-3}/{k3-6}/{k6-9}/{key}.{ext}

Set RUST_LOG=debug for per-request detail.
Run 'imageresize gen-config' to generate a documented imageresize.toml.")]
struct Cli {
    /// Config file
    #[arg(long, default_value = "imageresize.toml", global = true)]
    config: PathBuf,

    /// Directory that sources, storage and the not-found image are relative to
    #[arg(long, default_value = ".", global = true)]
    base_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the URL for a resized source image
    Resize(ResizeArgs),
    /// Bind an identifier to a source and options, printing its stable URL
    Permalink {
        /// Permalink identifier, e.g. blog/post/hello
        identifier: String,
        #[command(flatten)]
        resize: ResizeArgs,
    },
    /// Serve a request path, rendering the artifact if needed
    Fetch {
        /// Request path or URL, e.g. /imageresize/{key}.jpg
        request: String,
        /// Also write the image bytes here
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Delete artifacts older than cache.clear_interval
    Clear {
        /// Delete every artifact regardless of age
        #[arg(long)]
        all: bool,
    },
    /// Scheduled collection, expired descriptors included (honours cache.scheduled_gc)
    Gc,
    /// React to an external cache clear (honours cache.cleanup_on_cache_clear)
    CacheCleared,
    /// Delete every permalink record
    ResetPermalinks,
    /// Print a stock imageresize.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let settings = config::load_config(&cli.config)?;
    init_thread_pool(&settings.processing);
    let resizer = Resizer::new(settings, &cli.base_dir);
    let cache_root = resizer.artifacts().root().to_path_buf();

    match cli.command {
        Command::Resize(args) => {
            let store = descriptor_store(&resizer);
            let cache = EphemeralCache::new(&resizer, &store);
            let url = cache.resolve(&args.source, args.width, args.height, &options_of(&args))?;
            println!("{url}");
        }
        Command::Permalink { identifier, resize } => {
            let store = permalink_store(&resizer);
            store.provision()?;
            let permalinks = Permalinks::new(&resizer, &store);
            match permalinks.resolve(
                &identifier,
                &resize.source,
                resize.width,
                resize.height,
                &options_of(&resize),
            ) {
                Some(url) => println!("{url}"),
                None => return Err(format!("Could not create permalink '{identifier}'").into()),
            }
        }
        Command::Fetch { request, output: out } => {
            let image = match route::parse(&request) {
                Some(Route::Ephemeral { key, .. }) => {
                    let store = descriptor_store(&resizer);
                    EphemeralCache::new(&resizer, &store).fetch(&key)?
                }
                Some(Route::Permalink { identifier, .. }) => {
                    let store = permalink_store(&resizer);
                    Permalinks::new(&resizer, &store)
                        .render(&identifier)?
                        .ok_or_else(|| format!("Unknown permalink '{identifier}'"))?
                }
                None => return Err(format!("Not an image route: {request}").into()),
            };
            if let Some(path) = &out {
                std::fs::write(path, &image.bytes)?;
            }
            output::print_rendered(&image, out.as_deref());
        }
        Command::Clear { all } => {
            let report = gc::clear(&resizer.settings().cache, &cache_root, all, &NoHook)?;
            output::print_gc_report(&report, &cache_root);
        }
        Command::Gc => {
            let descriptors = descriptor_store(&resizer);
            let cache = &resizer.settings().cache;
            match gc::run_scheduled(cache, &cache_root, &descriptors, &NoHook)? {
                Some(report) => output::print_gc_report(&report, &cache_root),
                None => println!("{}", output::format_gc_disabled("cache.scheduled_gc")),
            }
        }
        Command::CacheCleared => {
            let descriptors = descriptor_store(&resizer);
            let cache = &resizer.settings().cache;
            match gc::on_cache_cleared(cache, &cache_root, &descriptors, &NoHook)? {
                Some(report) => output::print_gc_report(&report, &cache_root),
                None => println!(
                    "{}",
                    output::format_gc_disabled("cache.cleanup_on_cache_clear")
                ),
            }
        }
        Command::ResetPermalinks => {
            let store = permalink_store(&resizer);
            let count = Permalinks::new(&resizer, &store).reset();
            println!("{}", output::format_reset(count));
        }
        Command::GenConfig => unreachable!("handled before config load"),
    }

    Ok(())
}

/// Initialize the rayon thread pool based on processing config.
///
/// Capped at the available CPU cores; config can lower the count, not raise it.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

fn descriptor_store(resizer: &Resizer) -> FileDescriptorStore {
    let dir = resizer.store_dir(&resizer.settings().stores.descriptors);
    FileDescriptorStore::new(dir, DESCRIPTOR_PREFIX)
}

fn permalink_store(resizer: &Resizer) -> FilePermalinkStore {
    FilePermalinkStore::new(resizer.store_dir(&resizer.settings().stores.permalinks))
}

fn options_of(args: &ResizeArgs) -> CanonicalOptions {
    args.options.iter().cloned().collect()
}

/// `key=value` → typed option. Integers, floats and booleans are recognised;
/// anything else stays a string.
fn parse_option(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing option name in '{raw}'"));
    }
    Ok((key.to_string(), option_value(value.trim())))
}

fn option_value(value: &str) -> Value {
    if let Ok(n) = value.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = value.parse::<f64>()
        && f.is_finite()
    {
        return Value::from(f);
    }
    match value {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => Value::String(value.to_string()),
    }
}
