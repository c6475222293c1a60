use std::path::Path;
use std::sync::Arc;

use ai_chat_rs::audio::sink_from_config;
use ai_chat_rs::config::Config;
use ai_chat_rs::console_bridge::{
    Command, ConsoleBridge, ConsoleEvent, FeedRenderer, HELP_TEXT, parse_command,
};
use ai_chat_rs::controller::{AiDispatch, AiResponder, ChatController, TurnEvent};
use ai_chat_rs::gemini::GeminiClient;
use ai_chat_rs::identity::{Session, load_or_create_user_id};
use ai_chat_rs::store::{MemoryStore, MessageStore};
use futures_util::StreamExt;
use tokio::signal;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env 可选，不存在时忽略
    let _ = dotenvy::dotenv();
    env_logger::init();

    let config = Config::load(None)?;
    config.validate()?;

    // 用户ID持久化，重启后身份不变
    let user_id = load_or_create_user_id(Path::new(&config.identity.user_id_file));
    let mut session = Session::new(user_id);
    if !config.identity.nickname.trim().is_empty() {
        if let Err(e) = session.set_nickname(&config.identity.nickname) {
            log::warn!("Ignoring configured nickname: {}", e);
        }
    }

    let store: Arc<dyn MessageStore> = Arc::new(MemoryStore::with_capacity(
        config.collection_path(),
        config.store.retain_limit,
    ));
    let model = Arc::new(GeminiClient::new(&config.ai, &config.speech)?);
    let sink = Arc::from(sink_from_config(&config.speech));
    let responder = AiResponder::new(&config, store.clone(), model, sink);

    let (tx_turn, mut rx_turn) = mpsc::channel::<TurnEvent>(16);
    let mut controller = ChatController::new(&config, session, store.clone(), responder, tx_turn);

    // 终端输入
    let (tx_console, mut rx_console) = mpsc::channel::<ConsoleEvent>(100);
    let console = ConsoleBridge::new(tx_console);
    tokio::spawn(async move {
        if let Err(e) = console.run().await {
            log::error!("ConsoleBridge error: {}", e);
        }
    });

    let mut feed = store.subscribe(config.store.feed_limit);
    let mut renderer = FeedRenderer::default();

    log::info!("Chat started in {}", config.collection_path());
    match &controller.session().nickname {
        Some(nick) => println!("Welcome back, {}. Type /help for commands.", nick),
        None => println!("Set a nickname with /nick <name> to start chatting."),
    }

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }

            Some(event) = rx_console.recv() => {
                let line = match event {
                    ConsoleEvent::Line(line) => line,
                    ConsoleEvent::Closed => {
                        log::info!("Console closed, shutting down...");
                        break;
                    }
                };
                let Some(command) = parse_command(&line) else { continue };
                match command {
                    Command::Nick(name) => match controller.set_nickname(&name) {
                        Ok(nick) => println!("* You are now {}", nick),
                        Err(e) => println!("! {}", e),
                    },
                    Command::Speak(enabled) => {
                        controller.set_speech(enabled);
                        println!("* Speech {}", if enabled { "on" } else { "off" });
                    }
                    Command::Help => println!("{}", HELP_TEXT),
                    Command::Quit => break,
                    Command::Invalid(reason) => println!("! {}", reason),
                    Command::Say(text) => match controller.submit(&text).await {
                        Ok(submitted) => {
                            if submitted.ai == AiDispatch::Busy {
                                println!("* AI is still answering the previous message");
                            }
                        }
                        Err(e) => println!("! {:#}", e),
                    },
                }
            }

            batch = feed.next() => {
                let Some(batch) = batch else {
                    log::warn!("Message feed ended");
                    break;
                };
                for line in renderer.render(&batch) {
                    println!("{}", line);
                }
            }

            Some(event) = rx_turn.recv() => {
                match event {
                    TurnEvent::Replied(outcome) => {
                        log::debug!("AI turn done: {} (spoken: {})", outcome.message.id, outcome.spoken);
                    }
                    TurnEvent::Failed(reason) => println!("! AI could not answer: {}", reason),
                }
            }
        }
    }
    Ok(())
}
