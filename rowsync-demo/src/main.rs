//! rowsync demo: a terminal list kept in step with a hosted collection.
//!
//! Hosts an in-process `MemoryCollection`, connects a `WireCollection` to it
//! and shows the mirrored rows. Commands are read from stdin:
//!
//! ```text
//! add <text>         append a row
//! edit <row> <text>  replace a row's text
//! rm <row>           remove a row
//! ls                 list rows
//! hide / show        stop / resume syncing
//! quit
//! ```
//!
//! `ROWSYNC_ORDER_BY` picks the server order: unset for key (insertion)
//! order, or the name of a child field such as `text`.

mod screen;

use log::{error, info};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use rowsync_collab::{CollectionHost, WireCollection};
use rowsync_core::{CollectionFacade, MemoryCollection, OrderBy};
use screen::{describe, Command, ListScreen};

const ORDER_BY_VAR: &str = "ROWSYNC_ORDER_BY";

fn order_by(setting: Option<String>) -> OrderBy {
    match setting.as_deref().map(str::trim) {
        None | Some("") => OrderBy::Key,
        Some(field) => OrderBy::Child(field.to_string()),
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let order = order_by(std::env::var(ORDER_BY_VAR).ok());
    info!("Starting rowsync demo ({order:?})...");

    let host = CollectionHost::new(Arc::new(MemoryCollection::ordered_by(order)));
    let client = Arc::new(WireCollection::new());
    client.connect(host.connect());

    let mut screen = ListScreen::new(CollectionFacade::new(client));
    screen.appear();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to read stdin: {e}");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let command = match Command::parse(&line) {
                    Ok(command) => command,
                    Err(e) => {
                        println!("{e}");
                        continue;
                    }
                };
                if command == Command::Quit {
                    break;
                }
                match screen.execute(command) {
                    Ok(Some(output)) => println!("{output}"),
                    Ok(None) => {}
                    Err(e) => println!("{e}"),
                }
            }
            Some(notification) = screen.next_notification(), if screen.is_visible() => {
                println!("{}", describe(&notification));
            }
        }
    }

    screen.disappear();
    let stats = host.stats();
    info!(
        "Shutting down: {} sessions, {} frames",
        stats.total_sessions, stats.total_frames
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_by_setting() {
        assert_eq!(order_by(None), OrderBy::Key);
        assert_eq!(order_by(Some("  ".into())), OrderBy::Key);
        assert_eq!(order_by(Some("text".into())), OrderBy::Child("text".into()));
    }
}
