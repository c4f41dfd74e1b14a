//! Murmur - terminal chat over a relayed room
//!
//! `murmur host` starts a relay and joins it; `murmur join <url>` joins an
//! existing one. Lines typed on stdin are chat input; lines starting with `:`
//! are local controls.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use murmur_app::{AppConfig, Chat, ChatInput, InputOutcome, Result};
use murmur_core::agent::{
    encode_character_card, encode_character_prompt, CHARACTER_CARD_TOPIC, CHARACTER_PROMPT_TOPIC,
};
use murmur_core::{AgentPush, ChatMessage, ReceivedChatMessage, Selection};
use murmur_net::{
    generate_token, PeerInfo, RelayServer, RemoteRoom, Room, RoomEvent, Subscription,
    TopicRegistry,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

mod cli;

use cli::{Cli, Commands, HostArgs, IdentityArgs, JoinArgs};

const CONTROLS: &str = "\
:up / :down      move the selection
:clear           clear the selection
:edit <id> <text> replace a message
:history         rebroadcast the current list
:prompt <text>   set the agent's character prompt
:card <file>     send a character card (JSON)
:quit            leave";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "murmur failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load_or_default(cli.config.as_deref())?;
    match cli.command {
        Commands::Host(args) => host(args, config).await,
        Commands::Join(args) => join(args, config).await,
    }
}

async fn host(args: HostArgs, config: AppConfig) -> Result<()> {
    let token = args.token.unwrap_or_else(generate_token);
    let server = RelayServer::start(args.port, args.room.clone(), token.clone()).await?;

    let url = server.room_url(IpAddr::V4(Ipv4Addr::LOCALHOST)).await;
    println!("Hosting room '{}'. Others join with:", args.room);
    println!("  murmur join {}", url);
    println!("(replace 127.0.0.1 with an address they can reach)");

    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), server.addr().port());
    let peer = peer(&args.who, &config);
    let result = match RemoteRoom::connect(addr, peer, args.room, token).await {
        Ok(room) => chat_session(Arc::new(room), &config).await,
        Err(e) => Err(e.into()),
    };

    server.shutdown().await;
    result
}

async fn join(args: JoinArgs, config: AppConfig) -> Result<()> {
    let peer = peer(&args.who, &config);
    let url = args.url;
    let room = RemoteRoom::connect(url.socket_addr(), peer, url.room.clone(), url.token.clone()).await?;
    println!("Joined room '{}' at {}", url.room, url.socket_addr());
    chat_session(Arc::new(room), &config).await
}

/// Flags win over the config file; identity falls back to a random one
fn peer(who: &IdentityArgs, config: &AppConfig) -> PeerInfo {
    let identity = who
        .identity
        .clone()
        .or_else(|| config.identity.identity.clone())
        .unwrap_or_else(|| format!("user-{}", &Uuid::new_v4().simple().to_string()[..8]));
    PeerInfo {
        identity,
        name: who.name.clone().or_else(|| config.identity.name.clone()),
    }
}

async fn chat_session(room: Arc<RemoteRoom>, config: &AppConfig) -> Result<()> {
    let dyn_room: Arc<dyn Room> = room.clone();
    let identity = dyn_room.local_participant().identity;
    let mut events = dyn_room.events();

    let registry = TopicRegistry::new();
    let options = config.chat_options(&identity);
    let pushes = registry.subscribe(&dyn_room, AgentPush::topics(), options.channel_capacity)?;
    let chat = Arc::new(Chat::setup(dyn_room, &registry, options)?);

    let printer = tokio::spawn(print_messages(chat.subscribe_messages(), identity.clone()));
    let agent_printer = tokio::spawn(print_agent_pushes(pushes));

    println!("You are '{}'. Type :help for controls, !help for agent commands.", identity);

    let mut input = ChatInput::new(chat.clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&mut input, &line).await {
                    break;
                }
            }
            event = events.recv() => {
                match event {
                    Ok(RoomEvent::ParticipantJoined(peer)) => println!("* {} joined", peer.display_name()),
                    Ok(RoomEvent::ParticipantLeft { identity }) => println!("* {} left", identity),
                    Ok(RoomEvent::Disconnected) | Err(_) => {
                        println!("* disconnected");
                        break;
                    }
                    Ok(RoomEvent::Data(_)) => {}
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Leaving room");
    drop(input);
    printer.abort();
    agent_printer.abort();
    room.disconnect().await;
    Ok(())
}

/// Returns false when the session should end
async fn handle_line(input: &mut ChatInput, line: &str) -> bool {
    let trimmed = line.trim();
    let Some(control) = trimmed.strip_prefix(':') else {
        match input.submit(trimmed).await {
            Ok(InputOutcome::Help(text)) => println!("{}", text),
            Ok(InputOutcome::NoOp) => println!("(nothing to do)"),
            Ok(_) => {}
            Err(e) => eprintln!("send failed: {}", e),
        }
        return true;
    };

    let (name, rest) = control.split_once(' ').unwrap_or((control, ""));
    let chat = input.chat().clone();
    match name {
        "quit" | "q" => return false,
        "help" => println!("{}", CONTROLS),
        "up" | "down" => {
            let selected = if name == "up" {
                input.select_up()
            } else {
                input.select_down()
            };
            match selected.and_then(|i| input.rows().into_iter().nth(i)) {
                Some(row) => println!("{}", row),
                None => println!("(no selection)"),
            }
        }
        "clear" => input.clear_selection(),
        "edit" => match rest.trim().split_once(' ') {
            Some((id, text)) => {
                if let Err(e) = chat.update(text.trim(), id).await {
                    eprintln!("edit failed: {}", e);
                }
            }
            None => println!("usage: :edit <id> <text>"),
        },
        "history" => {
            let snapshot: Vec<ChatMessage> = chat.messages().into_iter().map(|m| m.message).collect();
            chat.update_history(&snapshot).await;
        }
        "prompt" => {
            let result = match encode_character_prompt(rest.trim()) {
                Ok(payload) => chat.publish_raw(CHARACTER_PROMPT_TOPIC, payload).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = result {
                eprintln!("prompt failed: {}", e);
            }
        }
        "card" => {
            if let Err(e) = send_card(&chat, Path::new(rest.trim())).await {
                eprintln!("card failed: {}", e);
            }
        }
        other => println!("unknown control ':{}' (try :help)", other),
    }
    true
}

async fn send_card(chat: &Chat, path: &Path) -> Result<()> {
    let raw = tokio::fs::read_to_string(path).await?;
    let card: serde_json::Value =
        serde_json::from_str(&raw).map_err(murmur_core::Error::from)?;
    let payload = encode_character_card(&card)?;
    chat.publish_raw(CHARACTER_CARD_TOPIC, payload).await
}

/// Print each message once, and again whenever its text changes
async fn print_messages(mut rx: watch::Receiver<Vec<ReceivedChatMessage>>, identity: String) {
    let mut shown: HashMap<String, String> = HashMap::new();
    let no_selection = Selection::new();

    while rx.changed().await.is_ok() {
        let messages = rx.borrow_and_update().clone();
        for row in murmur_app::viewmodel::rows(&messages, &identity, &no_selection) {
            if shown.get(&row.id) != Some(&row.text) {
                println!("{}", row);
                shown.insert(row.id.clone(), row.text.clone());
            }
        }
    }
}

async fn print_agent_pushes(mut sub: Subscription) {
    while let Some(packet) = sub.recv().await {
        let Some(topic) = packet.topic() else {
            continue;
        };
        match AgentPush::decode(topic, &packet.payload) {
            Ok(Some(AgentPush::Transcription(t))) => {
                let who = packet.from.as_ref().map_or("?", |p| p.display_name());
                let marker = if t.is_final { "" } else { " ..." };
                println!("~ {}: {}{}", who, t.text, marker);
            }
            Ok(Some(AgentPush::Background(html))) => {
                println!("~ background updated ({} bytes)", html.len());
            }
            Ok(Some(AgentPush::SdPrompt(prompt))) => println!("~ image prompt: {}", prompt),
            Ok(None) => {}
            Err(e) => warn!(topic = %topic, error = %e, "Dropping undecodable agent payload"),
        }
    }
}
