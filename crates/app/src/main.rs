use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reclaim::chat::{ChatScreen, ScreenEventPayload, Submitted};
use reclaim::settings::{SETTINGS_DIRECTORY_NAME, SettingsStore};
use reclaim_gateway::{ChatTransport, WsChatGateway};
use reclaim_storage::{ConversationStore, MemoryStorage, SqliteStorage, Storage};

const DATABASE_FILE_NAME: &str = "reclaim.db";

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
        .unwrap_or_else(|| PathBuf::from(".reclaim"))
        .join(DATABASE_FILE_NAME)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let settings = SettingsStore::load().settings();

    let database_path = default_database_path();
    let storage: Arc<dyn Storage> =
        match SqliteStorage::open(&database_path.to_string_lossy()).await {
            Ok(sqlite) => Arc::new(sqlite),
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    path = %database_path.display(),
                    "could not open database, messages will not be persisted"
                );
                Arc::new(MemoryStorage::new())
            }
        };

    let transport: Arc<dyn ChatTransport> = match WsChatGateway::new(settings.gateway_url.clone())
    {
        Ok(gateway) => Arc::new(gateway),
        Err(error) => {
            tracing::error!(error = %error, "invalid gateway URL in settings");
            std::process::exit(2);
        }
    };

    let conversation = {
        let storage = Arc::clone(&storage);
        let user_id = settings.user_id.clone();
        let peer_id = settings.peer_id.clone();
        let opened = tokio::task::spawn_blocking(move || {
            storage.create_or_get_conversation(&user_id, &peer_id)
        })
        .await;

        match opened {
            Ok(Ok(conversation)) => conversation,
            Ok(Err(error)) => {
                tracing::error!(error = %error, "failed to open conversation");
                std::process::exit(1);
            }
            Err(error) => {
                tracing::error!(error = %error, "conversation bootstrap task failed");
                std::process::exit(1);
            }
        }
    };

    let mut screen = ChatScreen::new(
        storage,
        transport,
        conversation.id,
        settings.user_id.clone(),
        settings.peer_id.clone(),
        Duration::from_millis(settings.reveal_ms),
    );

    println!(
        "reclaim — talking with {} (ctrl-d to quit)",
        settings.peer_id
    );

    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let line = match tokio::task::spawn_blocking(read_line).await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(error) => {
                tracing::error!(error = %error, "stdin task failed");
                break;
            }
        };

        match screen.submit(&line) {
            Submitted::Ignored => continue,
            Submitted::Rejected(message) => eprintln!("could not send: {message}"),
            Submitted::Started(_) => screen.pump_until_idle_with(render_update).await,
        }
    }

    screen.flush_persistence().await;
}

/// Redraws the streaming reply in place; a newline lands only once the
/// content is final.
fn render_update(payload: &ScreenEventPayload) {
    let mut stdout = std::io::stdout();
    match payload {
        ScreenEventPayload::StreamOpened => {}
        ScreenEventPayload::DisplayUpdated { content, .. } => {
            let _ = write!(stdout, "\r{content}");
            let _ = stdout.flush();
        }
        ScreenEventPayload::Finalized { content } => {
            let _ = writeln!(stdout, "\r{content}");
        }
        ScreenEventPayload::Failed { message } => {
            eprintln!("\n{message}");
        }
    }
}

fn read_line() -> Option<String> {
    let mut buffer = String::new();
    match std::io::stdin().read_line(&mut buffer) {
        Ok(0) => None,
        Ok(_) => Some(buffer),
        Err(error) => {
            tracing::warn!(error = %error, "failed to read stdin");
            None
        }
    }
}
