use std::{env, sync::Arc};

use anyhow::Context;

use agenda_sync::{
    calendar::{store::local_today, CalendarEvent, EventStore},
    notify::{NotificationChannel, TcpLineTransport},
    storage::{Config, KeyValueStore, SqliteKeyValueStore},
    sync::{CalendarApi, CommandDispatcher, HttpCalendarClient, HttpExtractionClient, Outcome},
};

pub const USAGE: &str = "Usage: agenda-sync [--ask <text> | --listen | --notifications | --mark-read | --clear-notifications | --token <token>]";

const TOKEN_KEY: &str = "token";

#[derive(Debug, Clone, PartialEq)]
pub enum CliMode {
    Agenda,
    Ask(String),
    Listen,
    Notifications,
    MarkRead,
    ClearNotifications,
    StoreToken(String),
}

pub fn parse_cli_mode() -> Result<CliMode, String> {
    parse_args(env::args().skip(1))
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<CliMode, String> {
    let mut mode = CliMode::Agenda;

    while let Some(arg) = args.next() {
        mode = match arg.as_str() {
            "--ask" => {
                let text: Vec<String> = args.by_ref().collect();
                if text.is_empty() {
                    return Err("--ask needs some text".to_string());
                }
                CliMode::Ask(text.join(" "))
            }
            "--token" => match args.next() {
                Some(token) => CliMode::StoreToken(token),
                None => return Err("--token needs a value".to_string()),
            },
            "--listen" => CliMode::Listen,
            "--notifications" => CliMode::Notifications,
            "--mark-read" => CliMode::MarkRead,
            "--clear-notifications" => CliMode::ClearNotifications,
            "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            _ => return Err(format!("Unknown argument: {}", arg)),
        };
    }

    Ok(mode)
}

pub async fn run(mode: CliMode) -> anyhow::Result<()> {
    let config = Config::load_or_create().context("loading configuration")?;
    let storage: Arc<dyn KeyValueStore> = Arc::new(
        SqliteKeyValueStore::open(&config.storage.database).context("opening local state")?,
    );

    match mode {
        CliMode::Agenda => run_agenda(&config, storage.as_ref()).await,
        CliMode::Ask(text) => run_ask(&config, storage.as_ref(), &text).await,
        CliMode::Listen => run_listen(&config, storage).await,
        CliMode::Notifications => {
            let channel = NotificationChannel::new(config.channel_settings(), storage);
            let state = channel.snapshot();
            println!("{} unread", state.unread());
            for n in state.entries() {
                let marker = if n.read { ' ' } else { '*' };
                println!("{} {} {}", marker, n.timestamp.format("%Y-%m-%d %H:%M"), n.message);
            }
            Ok(())
        }
        CliMode::MarkRead => {
            NotificationChannel::new(config.channel_settings(), storage).mark_all_read();
            Ok(())
        }
        CliMode::ClearNotifications => {
            NotificationChannel::new(config.channel_settings(), storage).clear();
            Ok(())
        }
        CliMode::StoreToken(token) => {
            storage.set(TOKEN_KEY, &token)?;
            println!("Token saved.");
            Ok(())
        }
    }
}

fn build_store(config: &Config, storage: &dyn KeyValueStore) -> anyhow::Result<(Arc<EventStore>, Arc<dyn CalendarApi>)> {
    let token = storage.get(TOKEN_KEY)?;
    let api: Arc<dyn CalendarApi> =
        Arc::new(HttpCalendarClient::new(config.server.base_url.clone()).with_token(token));
    let store = Arc::new(EventStore::new(Arc::clone(&api)));
    Ok((store, api))
}

async fn run_agenda(config: &Config, storage: &dyn KeyValueStore) -> anyhow::Result<()> {
    let (store, _) = build_store(config, storage)?;
    store.load().await.context("fetching events")?;

    let snapshot = store.snapshot();
    let today = local_today();

    println!("Agenda – {}", today.format("%A, %B %d, %Y"));
    println!("{} events in total", snapshot.count());
    println!();

    println!("Today:");
    print_events(&snapshot.today(today));
    println!();

    println!("Upcoming:");
    print_events(&snapshot.upcoming(today));

    if let Some(next) = snapshot.next(today) {
        println!();
        println!("Next: {}", format_event(next));
    }

    Ok(())
}

async fn run_ask(config: &Config, storage: &dyn KeyValueStore, text: &str) -> anyhow::Result<()> {
    let (store, api) = build_store(config, storage)?;
    if let Err(e) = store.load().await {
        tracing::warn!("Continuing with an empty collection: {}", e);
    }

    let extractor = Arc::new(
        HttpExtractionClient::new(config.server.base_url.clone()).with_token(storage.get(TOKEN_KEY)?),
    );
    let dispatcher = CommandDispatcher::new(store, api, extractor).with_timeout(config.extraction_timeout());

    match dispatcher.interpret(text).await {
        Ok(Outcome::Created(event)) => println!("Created: {}", format_event(&event)),
        Ok(Outcome::Updated(event)) => println!("Updated: {}", format_event(&event)),
        Ok(Outcome::Deleted(event)) => println!("Deleted: {}", format_event(&event)),
        Err(e) => println!("{}", e.user_message()),
    }

    Ok(())
}

async fn run_listen(config: &Config, storage: Arc<dyn KeyValueStore>) -> anyhow::Result<()> {
    let channel = NotificationChannel::new(config.channel_settings(), storage);
    let mut alerts = channel.alerts();
    channel.connect(Arc::new(TcpLineTransport::new(config.server.push_address.clone())));
    println!("Listening for notifications (Ctrl-C to stop)...");

    loop {
        tokio::select! {
            alert = alerts.recv() => match alert {
                Ok(alert) => println!("[{}] {}", alert.kind.as_str(), alert.message),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Skipped {} alerts", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    channel.disconnect();
    Ok(())
}

fn print_events(events: &[&CalendarEvent]) {
    if events.is_empty() {
        println!("  No events scheduled.");
    }
    for event in events {
        println!("  - {}", format_event(event));
    }
}

fn format_event(event: &CalendarEvent) -> String {
    let mut line = format!("{} {}", event.start, event.title);
    if let Some(time) = &event.end
        && !time.is_empty()
    {
        line.push_str(&format!(" @ {}", time));
    }
    format!("{} [{}/{}]", line, event.category.as_str(), event.priority.as_str())
}
