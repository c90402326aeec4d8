use std::collections::HashSet;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Result, eyre};
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

use guildsync::application::{AppState, ChatService, GuildService, ImageCache};
use guildsync::domain::entities::{Channel, Message};
use guildsync::domain::ports::{Filter, KeyValueStorePort, Query, RemoteDataPort};
use guildsync::domain::SyncRecord;
use guildsync::infrastructure::{
    AppConfig, CliArgs, Command, FileKeyValueStore, HttpImageFetcher, ImageCommand,
    MemoryKeyValueStore, RealtimeClient, RealtimeClientConfig, RestDataClient, StorageManager,
};

fn level_filter(config: &AppConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()))
}

/// Filter for the stderr layer. When a log file receives the full stream,
/// the terminal only shows warnings and errors.
fn stderr_filter(config: &AppConfig, log_to_file: bool) -> EnvFilter {
    if log_to_file {
        EnvFilter::new("warn")
    } else {
        level_filter(config)
    }
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let log_path = config.effective_log_path();

    let file_layer = match &log_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;

            Some(
                fmt::layer()
                    .with_writer(file)
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_filter(level_filter(config)),
            )
        }
        None => None,
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(stderr_filter(config, log_path.is_some()));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .init();

    if let Some(path) = log_path {
        info!(path = %path.display(), "Logging initialized");
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<(StorageManager, AppConfig)> {
    let storage = match &args.config {
        Some(path) => StorageManager::with_dir(
            path.parent()
                .map(std::path::Path::to_path_buf)
                .unwrap_or_default(),
        ),
        None => StorageManager::new()?,
    };
    let mut config = storage.load_config(args.config.as_deref())?;
    config.merge_with_args(args);
    Ok((storage, config))
}

fn run_config(args: &CliArgs, storage: &StorageManager, config: &AppConfig, save: bool) -> Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    if save {
        let path = storage.save_config(config, args.config.as_deref())?;
        eprintln!("Saved to {}", path.display());
    }
    Ok(())
}

async fn open_store(config: &AppConfig) -> Arc<dyn KeyValueStorePort> {
    if let Some(dir) = config.kv_dir() {
        match FileKeyValueStore::open(&dir).await {
            Ok(store) => return Arc::new(store),
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Key-value store unavailable, cache will not persist");
            }
        }
    }
    Arc::new(MemoryKeyValueStore::new())
}

struct Backend {
    data: Arc<dyn RemoteDataPort>,
    realtime: Arc<RealtimeClient>,
}

fn connect_backend(config: &AppConfig) -> Result<Backend> {
    let backend = &config.backend;
    if !backend.is_configured() {
        return Err(eyre!(
            "backend URL and anon key are required (config [backend], --url/--anon-key or GUILDSYNC_URL/GUILDSYNC_ANON_KEY)"
        ));
    }

    let data = RestDataClient::new(
        &backend.url,
        backend.anon_key.clone(),
        backend.access_token.clone(),
    )?;
    let realtime = RealtimeClient::new(
        &backend.url,
        &backend.anon_key,
        backend.access_token.clone(),
        RealtimeClientConfig {
            heartbeat_interval: config.realtime.heartbeat_interval(),
            join_timeout: config.realtime.join_timeout(),
        },
    );
    Ok(Backend {
        data: Arc::new(data),
        realtime: Arc::new(realtime),
    })
}

async fn fetch_channel(data: &dyn RemoteDataPort, id: &str) -> Result<Channel> {
    let rows = data
        .query(&Query::table(Channel::TABLE).filter(Filter::eq("id", id)))
        .await?;
    let row = rows
        .into_iter()
        .next()
        .ok_or_else(|| eyre!("channel {id} not found"))?;
    Ok(serde_json::from_value(row)?)
}

fn print_message(message: &Message) {
    println!(
        "[{}] {}: {}",
        message.inserted_at().format("%Y-%m-%d %H:%M:%S"),
        message.user_id(),
        message.content()
    );
}

async fn run_image(command: ImageCommand, images: &ImageCache) {
    match command {
        ImageCommand::Get { url, force } => println!("{}", images.get_image(&url, force).await),
        ImageCommand::Clear => {
            images.clear_cache().await;
            println!("Image cache cleared");
        }
        ImageCommand::Stats => println!("{}", images.stats()),
    }
}

async fn run_watch(config: &AppConfig, backend: Backend, channel: &str) -> Result<()> {
    let channel = fetch_channel(backend.data.as_ref(), channel).await?;
    let state = Arc::new(AppState::new());
    let chat = ChatService::new(
        backend.data,
        backend.realtime,
        config.realtime.backoff(),
        Arc::clone(&state),
    );

    let mut view = chat.messages().watch();
    let mut status = chat.messages().state_watch();
    let _follow = chat.follow();
    state.set_active_channel(Some(channel.clone()));
    println!("# {} ({})", channel.name(), channel.id());

    let mut seen = HashSet::new();
    loop {
        for message in view.borrow_and_update().iter() {
            if seen.insert(message.id()) {
                print_message(message);
            }
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = view.changed() => if changed.is_err() { break },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                eprintln!("-- {}", *status.borrow_and_update());
            }
        }
    }

    chat.messages().shutdown();
    Ok(())
}

async fn run_send(config: &AppConfig, backend: Backend, channel: &str, user: String, text: &str) -> Result<()> {
    let channel = fetch_channel(backend.data.as_ref(), channel).await?;
    let state = Arc::new(AppState::with_principal(user));
    state.set_active_channel(Some(channel));
    let chat = ChatService::new(
        backend.data,
        backend.realtime,
        config.realtime.backoff(),
        state,
    );
    chat.send(text).await?;
    println!("Sent");
    Ok(())
}

async fn run_guilds(config: &AppConfig, backend: Backend, images: ImageCache) {
    let state = Arc::new(AppState::new());
    let guilds = GuildService::new(
        backend.data,
        backend.realtime,
        images,
        state,
        config.realtime.backoff(),
        config.backend.storage_bucket.clone(),
    );
    for guild in guilds.load_guilds().await {
        println!("{}\t{}", guild.id(), guild.name());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    let args = CliArgs::parse();
    let (storage, config) = load_config(&args)?;
    init_logging(&config)?;

    info!(version = guildsync::VERSION, "Starting guildsync");

    if let Command::Config { save } = args.command {
        return run_config(&args, &storage, &config, save);
    }

    let fetcher = Arc::new(HttpImageFetcher::new(config.image_cache.fetch_timeout())?);
    let store = open_store(&config).await;
    let images = ImageCache::load(config.image_cache.cache_config(), fetcher, store).await;

    match args.command {
        Command::Image { action } => run_image(action, &images).await,
        Command::Guilds => run_guilds(&config, connect_backend(&config)?, images).await,
        Command::Watch { channel } => run_watch(&config, connect_backend(&config)?, &channel).await?,
        Command::Send {
            channel,
            user,
            text,
        } => run_send(&config, connect_backend(&config)?, &channel, user, &text).await?,
        Command::Config { .. } => {}
    }

    Ok(())
}
