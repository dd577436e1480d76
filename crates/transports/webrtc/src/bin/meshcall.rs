//! MeshCall command line client
//!
//! Joins a mesh room from a shareable link, or prints a link for a new call.
//!
//! # Usage
//!
//! ```bash
//! # Create a call and print the link to share
//! meshcall new --name Ada --call-type video --receivers 42,43
//!
//! # Join from a link
//! meshcall join --link "https://meet.example.com/call?callType=video&roomId=room-1"
//!
//! # Join by room id against a custom signaling server
//! meshcall --signaling-url wss://signal.example.com join --room room-1 --name Ada
//! ```
//!
//! While in a call: `m` toggles the microphone, `v` the camera, `p` lists the
//! participants and `q` (or Ctrl-C) asks to end the call.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use meshcall_core::presence::store_from_config;
use meshcall_core::{
    CallController, CallHandle, CallKind, CallPhase, CallRecord, ConnectionState, IceServerConfig,
    MeshCallConfig, PresenceConfig, RoomLink, RoomSnapshot, SessionManager,
};
use meshcall_webrtc::{SampleMediaSource, WebRtcConnector, WsSignalingTransport};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Mesh audio/video calls over WebRTC
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file; flags override its values
    #[arg(long, global = true, env = "MESHCALL_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text", env = "MESHCALL_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(flatten)]
    overrides: ConfigArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Join a room
    Join(JoinArgs),
    /// Create a new call and print its shareable link
    New(NewArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Call type CLI argument wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum CallTypeArg {
    Audio,
    Video,
}

impl From<CallTypeArg> for CallKind {
    fn from(arg: CallTypeArg) -> Self {
        match arg {
            CallTypeArg::Audio => CallKind::Audio,
            CallTypeArg::Video => CallKind::Video,
        }
    }
}

#[derive(Args, Debug, Default)]
struct ConfigArgs {
    /// WebSocket signaling URL
    #[arg(long, global = true, env = "MESHCALL_SIGNALING_URL")]
    signaling_url: Option<String>,

    /// STUN/TURN URLs (comma-separated); replaces the configured list
    #[arg(long, global = true, value_delimiter = ',', env = "MESHCALL_ICE_SERVERS")]
    ice_servers: Vec<String>,

    /// Username for turn: entries
    #[arg(long, global = true, env = "MESHCALL_TURN_USERNAME")]
    turn_username: Option<String>,

    /// Credential for turn: entries
    #[arg(long, global = true, env = "MESHCALL_TURN_CREDENTIAL")]
    turn_credential: Option<String>,

    /// Seconds alone before the call ends itself
    #[arg(long, global = true, env = "MESHCALL_SOLO_TIMEOUT_SECS")]
    solo_timeout_secs: Option<u64>,

    /// Maximum simultaneous peer connections
    #[arg(long, global = true, env = "MESHCALL_MAX_PEERS")]
    max_peers: Option<usize>,

    /// Session actor mailbox capacity
    #[arg(long, global = true, env = "MESHCALL_EVENT_BUFFER")]
    event_buffer: Option<usize>,

    #[arg(long, global = true, env = "MESHCALL_VIDEO_WIDTH")]
    video_width: Option<u32>,

    #[arg(long, global = true, env = "MESHCALL_VIDEO_HEIGHT")]
    video_height: Option<u32>,

    #[arg(long, global = true, env = "MESHCALL_VIDEO_FRAME_RATE")]
    video_frame_rate: Option<u32>,

    /// Presence REST endpoint; enables the remote presence store
    #[arg(long, global = true, env = "MESHCALL_PRESENCE_ENDPOINT")]
    presence_endpoint: Option<String>,

    #[arg(long, global = true, env = "MESHCALL_PRESENCE_PROJECT")]
    presence_project: Option<String>,

    #[arg(long, global = true, env = "MESHCALL_PRESENCE_DATABASE")]
    presence_database: Option<String>,

    #[arg(long, global = true, env = "MESHCALL_PRESENCE_COLLECTION")]
    presence_collection: Option<String>,

    #[arg(long, global = true, env = "MESHCALL_PRESENCE_API_KEY", hide_env_values = true)]
    presence_api_key: Option<String>,
}

impl ConfigArgs {
    /// Layer explicit flags over a file or default configuration
    fn apply(&self, config: &mut MeshCallConfig) -> anyhow::Result<()> {
        if let Some(url) = &self.signaling_url {
            config.signaling_url = url.clone();
        }

        if !self.ice_servers.is_empty() {
            config.ice_servers = self
                .ice_servers
                .iter()
                .map(|url| IceServerConfig::stun(url.trim()))
                .collect();
        }
        for server in &mut config.ice_servers {
            if !server.urls.iter().any(|u| u.starts_with("turn")) {
                continue;
            }
            if let Some(username) = &self.turn_username {
                server.username = username.clone();
            }
            if let Some(credential) = &self.turn_credential {
                server.credential = credential.clone();
            }
        }

        if let Some(secs) = self.solo_timeout_secs {
            config.solo_timeout_secs = secs;
        }
        if let Some(max) = self.max_peers {
            config.max_peers = max;
        }
        if let Some(buffer) = self.event_buffer {
            config.event_buffer = buffer;
        }
        if let Some(width) = self.video_width {
            config.video.width = width;
        }
        if let Some(height) = self.video_height {
            config.video.height = height;
        }
        if let Some(rate) = self.video_frame_rate {
            config.video.frame_rate = rate;
        }

        self.apply_presence(config)
    }

    fn apply_presence(&self, config: &mut MeshCallConfig) -> anyhow::Result<()> {
        let any_flag = self.presence_endpoint.is_some()
            || self.presence_project.is_some()
            || self.presence_database.is_some()
            || self.presence_collection.is_some()
            || self.presence_api_key.is_some();
        if !any_flag {
            return Ok(());
        }

        let mut presence = match config.presence.take() {
            Some(presence) => presence,
            None => {
                let Some(endpoint) = &self.presence_endpoint else {
                    bail!("--presence-endpoint is required to enable the presence store");
                };
                PresenceConfig {
                    endpoint: endpoint.clone(),
                    project_id: String::new(),
                    database_id: String::new(),
                    collection_id: String::new(),
                    api_key: None,
                }
            }
        };

        if let Some(endpoint) = &self.presence_endpoint {
            presence.endpoint = endpoint.clone();
        }
        if let Some(project) = &self.presence_project {
            presence.project_id = project.clone();
        }
        if let Some(database) = &self.presence_database {
            presence.database_id = database.clone();
        }
        if let Some(collection) = &self.presence_collection {
            presence.collection_id = collection.clone();
        }
        if let Some(key) = &self.presence_api_key {
            presence.api_key = Some(key.clone());
        }

        if presence.project_id.is_empty()
            || presence.database_id.is_empty()
            || presence.collection_id.is_empty()
        {
            bail!("presence store needs a project, database and collection id");
        }

        config.presence = Some(presence);
        Ok(())
    }
}

#[derive(Args, Debug)]
struct JoinArgs {
    /// Shareable link (absolute URL or `/call?...` path)
    #[arg(long, conflicts_with_all = ["room", "call_type", "user_id", "receivers"])]
    link: Option<String>,

    /// Room to join when no link is given
    #[arg(long)]
    room: Option<String>,

    #[arg(long, value_enum)]
    call_type: Option<CallTypeArg>,

    /// Display name
    #[arg(long, env = "MESHCALL_USER_NAME")]
    name: Option<String>,

    /// Application user id; generated when absent
    #[arg(long, env = "MESHCALL_USER_ID")]
    user_id: Option<String>,

    /// Invited participant ids (comma-separated)
    #[arg(long, value_delimiter = ',')]
    receivers: Vec<String>,

    /// Base URL used to render the meeting link in presence records
    #[arg(long, default_value = "http://localhost:3000", env = "MESHCALL_BASE_URL")]
    base_url: String,

    /// Send Opus silence so remote sides see a live audio track
    #[arg(long, default_value_t = false)]
    silence: bool,
}

impl JoinArgs {
    fn room_link(&self) -> anyhow::Result<RoomLink> {
        if let Some(link) = &self.link {
            let mut parsed = RoomLink::parse(link)?;
            if let Some(name) = &self.name {
                parsed.user_name = name.clone();
            }
            return Ok(parsed);
        }

        let mut pairs = Vec::new();
        if let Some(room) = &self.room {
            pairs.push(("roomId".to_string(), room.clone()));
        }
        if let Some(kind) = self.call_type {
            pairs.push((
                "callType".to_string(),
                CallKind::from(kind).as_str().to_string(),
            ));
        }
        if let Some(user_id) = &self.user_id {
            pairs.push(("userId".to_string(), user_id.clone()));
        }
        if let Some(name) = &self.name {
            pairs.push(("userName".to_string(), name.clone()));
        }
        for receiver in &self.receivers {
            pairs.push(("receiverId".to_string(), receiver.trim().to_string()));
        }

        Ok(RoomLink::from_query_pairs(pairs)?)
    }
}

#[derive(Args, Debug)]
struct NewArgs {
    /// Display name
    #[arg(long, env = "MESHCALL_USER_NAME")]
    name: String,

    #[arg(long, value_enum, default_value = "audio")]
    call_type: CallTypeArg,

    /// Invited participant ids (comma-separated)
    #[arg(long, default_value = "")]
    receivers: String,

    /// Application base URL the link points at
    #[arg(long, default_value = "http://localhost:3000", env = "MESHCALL_BASE_URL")]
    base_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!(version = env!("CARGO_PKG_VERSION"), "meshcall starting");

    match &cli.command {
        Command::New(args) => {
            let link = RoomLink::new_call(&args.name, args.call_type.into(), &args.receivers)?;
            println!("{}", link.title());
            println!("{}", link.to_url(&args.base_url)?);
            Ok(())
        }
        Command::Join(args) => {
            let config = load_config(&cli)?;
            join(config, args).await
        }
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<MeshCallConfig> {
    let mut config = match &cli.config {
        Some(path) => MeshCallConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => MeshCallConfig::default(),
    };
    cli.overrides.apply(&mut config)?;
    config.validate()?;
    Ok(config)
}

async fn join(config: MeshCallConfig, args: &JoinArgs) -> anyhow::Result<()> {
    let link = args.room_link()?;
    let meeting_url = link.to_url(&args.base_url)?;
    info!(room_id = %link.room_id, call_type = %link.call_kind, "{}", link.title());

    let (transport, events) =
        WsSignalingTransport::connect(&config.signaling_url, config.event_buffer).await?;
    let connector = Arc::new(WebRtcConnector::new(&config.ice_servers)?);
    let media = Arc::new(if args.silence {
        SampleMediaSource::with_silence()
    } else {
        SampleMediaSource::new()
    });
    let presence = store_from_config(&config)?;
    let solo_timeout = config.solo_timeout();

    let session = SessionManager::new(config, transport, media, connector)
        .start(&link.room_id, link.identity(), link.call_kind, events)
        .await
        .context("Could not join the room")?;

    println!("Joined {} ({}) as {}", link.room_id, link.title(), link.user_name);
    println!("Commands: m = mic, v = camera, p = participants, q = end call");

    let record = CallRecord {
        meeting_url,
        room_id: link.room_id.clone(),
        caller_id: link.user_id.clone(),
        callee_ids: link.receiver_ids.clone(),
        caller_name: link.user_name.clone(),
    };
    let call = CallController::spawn(session, presence, record, solo_timeout);

    let reason = run_call(&call).await?;
    println!("Call ended ({:?})", reason);
    call.join().await;
    Ok(())
}

/// Drive the call from stdin and Ctrl-C until it ends
async fn run_call(call: &CallHandle) -> anyhow::Result<meshcall_core::EndReason> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut status = call.subscribe();
    let mut room = call.session().subscribe();
    let mut stdin_open = true;

    loop {
        if let CallPhase::Ended(reason) = status.borrow_and_update().phase {
            return Ok(reason);
        }

        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                if let Err(e) = call.back_navigation().await {
                    report(&anyhow::Error::from(e));
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    return Ok(call.ended().await);
                }
                if status.borrow().phase == CallPhase::ConfirmingEnd {
                    println!("End call? [y/N]");
                }
            }
            changed = room.changed() => {
                if changed.is_ok() {
                    let snapshot = room.borrow_and_update().clone();
                    info!(
                        peers = snapshot.peer_count(),
                        connected = snapshot.connected_count(),
                        "Room updated"
                    );
                }
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if let Err(e) = handle_line(call, line.trim()).await {
                        report(&e);
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!("stdin closed: {}", e);
                    stdin_open = false;
                }
            },
        }
    }
}

/// Commands fail on their own; the call keeps running
fn report(error: &anyhow::Error) {
    warn!("Command failed: {:#}", error);
    eprintln!("Error: {:#}", error);
}

async fn handle_line(call: &CallHandle, line: &str) -> anyhow::Result<()> {
    if call.status().phase == CallPhase::ConfirmingEnd {
        if matches!(line, "y" | "Y" | "yes") {
            call.confirm_end().await?;
        } else {
            call.cancel_end().await?;
        }
        return Ok(());
    }

    let session = call.session();
    match line {
        "m" => {
            let enabled = session.toggle_audio().await?;
            println!("Microphone {}", on_off(enabled));
        }
        "v" => {
            let enabled = session.toggle_video().await?;
            println!("Camera {}", on_off(enabled));
        }
        "p" => print!("{}", describe(&session.snapshot())),
        "q" => call.request_end().await?,
        "" => {}
        other => println!("Unknown command: {}", other),
    }
    Ok(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

/// One line per participant tile
fn describe(snapshot: &RoomSnapshot) -> String {
    let mut out = format!(
        "You: mic {}, camera {}\n",
        on_off(snapshot.local_media.audio_enabled),
        on_off(snapshot.local_media.video_enabled)
    );
    if snapshot.peers.is_empty() {
        out.push_str("Waiting for others to join...\n");
    }
    for (index, peer) in snapshot.peers.iter().enumerate() {
        let mut badges = Vec::new();
        if !peer.remote_audio_enabled {
            badges.push("muted");
        }
        if snapshot.call_kind.has_video() && !peer.remote_video_enabled {
            badges.push("camera off");
        }
        if peer.state != ConnectionState::Connected {
            badges.push("connecting");
        }

        let label = match &peer.display_name {
            Some(name) => name.clone(),
            None => format!("Participant {}", index + 1),
        };
        if badges.is_empty() {
            out.push_str(&format!("{}\n", label));
        } else {
            out.push_str(&format!("{} ({})\n", label, badges.join(", ")));
        }
    }
    out
}
