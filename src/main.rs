use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use entitykit::api::{EntityService, HttpTransport, PathIds, RequestOptions, Transport};
use entitykit::cache::EntityCache;
use entitykit::config::Config;
use entitykit::entity::{share, Entity, Shared};
use entitykit::mapping::MappingPlan;
use entitykit::model::{Conversation, Message, MessageKind, User};

#[derive(Parser, Debug)]
#[command(name = "entitykit")]
#[command(about = "Cached, diff-aware command line client for the chat backend")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/entitykit/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// API base URL, overriding the config file
  #[arg(long)]
  url: Option<String>,

  /// Log at debug level (RUST_LOG takes precedence)
  #[arg(short, long)]
  verbose: bool,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List users
  Users,
  /// Show one user
  User { id: i64 },
  /// List messages, or the messages of one room
  Messages {
    #[arg(long)]
    room: Option<i64>,
  },
  /// List rooms with their senders
  Rooms,
  /// Post a message
  Send {
    content: String,
    #[arg(long, default_value_t = 0)]
    color: i64,
    #[arg(long)]
    kind: Option<String>,
    #[arg(long)]
    room: Option<i64>,
    #[arg(long)]
    user: Option<i64>,
  },
  /// Rename a user, sending only the changed field
  Rename { id: i64, name: String },
  /// Delete a message
  DeleteMessage { id: i64 },
}

/// Services wired to one transport, each with its own cache.
struct Services {
  users: Arc<EntityService<User>>,
  messages: EntityService<Message>,
  rooms: EntityService<Conversation>,
}

impl Services {
  fn new(config: &Config) -> Result<Self> {
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config.api.url)?);

    let users = Arc::new(User::service(
      Arc::clone(&transport),
      cache_for(config),
      tuned(User::mapping(), config),
    )
    .with_cache_hit_policy(config.cache.on_cache_hit_return));
    let messages = Message::service(
      Arc::clone(&transport),
      cache_for(config),
      tuned(Message::mapping(), config),
    )
    .with_cache_hit_policy(config.cache.on_cache_hit_return)
    .with_get_behaviour(config.cache.on_get);
    let rooms = Conversation::service(
      transport,
      cache_for(config),
      tuned(Conversation::mapping(Arc::clone(&users)), config),
    )
    .with_cache_hit_policy(config.cache.on_cache_hit_return)
    .with_get_behaviour(config.cache.on_get);

    Ok(Self {
      users,
      messages,
      rooms,
    })
  }
}

fn cache_for<T: Entity>(config: &Config) -> Arc<EntityCache<T>> {
  Arc::new(EntityCache::new().with_ttl(config.cache.ttl()))
}

fn tuned<T: Entity>(mut plan: MappingPlan<T>, config: &Config) -> MappingPlan<T> {
  plan.set_only_emit_changed(config.mapping.only_emit_changed);
  plan
}

fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let default_filter = if verbose {
    "entitykit=debug"
  } else {
    "entitykit=warn"
  };
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

  let Some(path) = log_file else {
    tracing_subscriber::registry()
      .with(filter)
      .with(fmt::layer().with_writer(std::io::stderr))
      .init();
    return Ok(None);
  };

  let file_name = path
    .file_name()
    .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
  let dir = path
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .unwrap_or_else(|| Path::new("."));
  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .init();
  Ok(Some(guard))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  let text = serde_json::to_string_pretty(value)
    .map_err(|e| eyre!("Failed to render output: {}", e))?;
  println!("{}", text);
  Ok(())
}

fn snapshot<T: Clone>(entities: &[Shared<T>]) -> Vec<T> {
  entities.iter().map(|e| e.read().clone()).collect()
}

#[derive(Serialize)]
struct RoomView {
  #[serde(flatten)]
  room: Conversation,
  sender: Option<User>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_logging(args.verbose, args.log_file.as_deref())?;

  let config = match (Config::load(args.config.as_deref()), &args.url) {
    (Ok(config), Some(url)) => config.with_url(url),
    (Ok(config), None) => config,
    (Err(_), Some(url)) if args.config.is_none() => Config::for_url(url),
    (Err(e), _) => return Err(e),
  };
  debug!(url = %config.api.url, ttl_millis = config.cache.ttl_millis, "Loaded configuration");

  let services = Services::new(&config)?;

  match args.command {
    Command::Users => {
      let users = services.users.fetch_all(&PathIds::new(), &RequestOptions::new()).await?;
      print_json(&snapshot(&users.data))?;
    }
    Command::User { id } => {
      let user = services.users.fetch_by_id(id, &RequestOptions::new()).await?;
      print_json(&*user.data.read())?;
    }
    Command::Messages { room } => {
      let messages = match room {
        Some(room_id) => Message::in_room(&services.messages, room_id).await?,
        None => services.messages.fetch_all(&PathIds::new(), &RequestOptions::new()).await?,
      };
      print_json(&snapshot(&messages.data))?;
    }
    Command::Rooms => {
      let rooms = services.rooms.fetch_all(&PathIds::new(), &RequestOptions::new()).await?;
      let views: Vec<RoomView> = rooms
        .data
        .iter()
        .map(|room| {
          let room = room.read().clone();
          let sender = room.sender.as_ref().map(|s| s.read().clone());
          RoomView { room, sender }
        })
        .collect();
      print_json(&views)?;
    }
    Command::Send {
      content,
      color,
      kind,
      room,
      user,
    } => {
      let mut message = Message::new(content);
      message.message_color = color;
      message.kind = kind.map(MessageKind::new);
      message.conversation_id = room;
      message.user_id = user;

      let created = services.messages.create(&share(message), &RequestOptions::new()).await?;
      info!(key = ?created.read().key(), "Message sent");
      print_json(&*created.read())?;
    }
    Command::Rename { id, name } => {
      let user = services.users.fetch_by_id(id, &RequestOptions::new()).await?.data;
      user.write().name = name;

      let updated = services.users.update(&user, &RequestOptions::new()).await?;
      print_json(&*updated.read())?;
    }
    Command::DeleteMessage { id } => {
      services.messages.delete_by_id(id, &RequestOptions::new()).await?;
      println!("Deleted message {}", id);
    }
  }

  Ok(())
}
