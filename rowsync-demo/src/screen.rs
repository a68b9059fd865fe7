//! A text-mode list screen driven by collection notifications.
//!
//! `ListScreen` owns the facade and a row model. The row model is only ever
//! touched by the facade's notification callbacks, the same way a list
//! widget would insert, reload, delete and relocate rows.

use std::cell::RefCell;
use std::rc::Rc;

use rowsync_core::{CollectionFacade, Item, MirrorError, Notification, RemoteCollection};
use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ScreenError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
    #[error("Invalid row: {0}")]
    InvalidRow(String),
    #[error(transparent)]
    Mirror(#[from] MirrorError),
}

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add(String),
    Edit(usize, String),
    Remove(usize),
    List,
    Hide,
    Show,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Command, ScreenError> {
        let line = line.trim();
        let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        match verb {
            "add" if !rest.is_empty() => Ok(Command::Add(rest.to_string())),
            "add" => Err(ScreenError::Usage("add <text>")),
            "edit" => {
                let (row, text) = rest
                    .split_once(char::is_whitespace)
                    .ok_or(ScreenError::Usage("edit <row> <text>"))?;
                Ok(Command::Edit(parse_row(row)?, text.trim().to_string()))
            }
            "rm" if !rest.is_empty() => Ok(Command::Remove(parse_row(rest)?)),
            "rm" => Err(ScreenError::Usage("rm <row>")),
            "ls" => Ok(Command::List),
            "hide" => Ok(Command::Hide),
            "show" => Ok(Command::Show),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(ScreenError::UnknownCommand(other.to_string())),
        }
    }
}

fn parse_row(text: &str) -> Result<usize, ScreenError> {
    text.parse()
        .map_err(|_| ScreenError::InvalidRow(text.to_string()))
}

/// Text shown for an item: its `text` child, or the raw value.
pub fn row_text(item: &Item) -> String {
    match item.child("text") {
        Some(Value::String(text)) => text.clone(),
        _ => item.value.to_string(),
    }
}

/// Human-readable line for a notification.
pub fn describe(notification: &Notification) -> String {
    let text = row_text(notification.item());
    match notification {
        Notification::ItemAdded { path, .. } => format!("+ [{}] {text}", path.row),
        Notification::ItemChanged { path, .. } => format!("~ [{}] {text}", path.row),
        Notification::ItemRemoved { path, .. } => format!("- [{}] {text}", path.row),
        Notification::ItemMoved { from, to, .. } => {
            format!("> [{}] -> [{}] {text}", from.row, to.row)
        }
    }
}

pub struct ListScreen<R: RemoteCollection + ?Sized> {
    facade: CollectionFacade<R>,
    rows: Rc<RefCell<Vec<String>>>,
    visible: bool,
}

impl<R: RemoteCollection + ?Sized> ListScreen<R> {
    pub fn new(mut facade: CollectionFacade<R>) -> Self {
        let rows = Rc::new(RefCell::new(Vec::new()));

        let model = rows.clone();
        facade.on_item_added(move |path, item| {
            let mut rows = model.borrow_mut();
            let row = path.row.min(rows.len());
            rows.insert(row, row_text(item));
        });
        let model = rows.clone();
        facade.on_item_changed(move |path, item| {
            if let Some(slot) = model.borrow_mut().get_mut(path.row) {
                *slot = row_text(item);
            }
        });
        let model = rows.clone();
        facade.on_item_removed(move |path, _| {
            let mut rows = model.borrow_mut();
            if path.row < rows.len() {
                rows.remove(path.row);
            }
        });
        let model = rows.clone();
        facade.on_item_moved(move |from, to, item| {
            let mut rows = model.borrow_mut();
            if from.row < rows.len() {
                rows.remove(from.row);
            }
            let row = to.row.min(rows.len());
            rows.insert(row, row_text(item));
        });

        Self {
            facade,
            rows,
            visible: false,
        }
    }

    /// Screen became visible.
    pub fn appear(&mut self) {
        self.facade.start_syncing();
        self.visible = true;
    }

    /// Screen went away: stop listening and blank the list.
    pub fn disappear(&mut self) {
        self.facade.stop_syncing();
        self.rows.borrow_mut().clear();
        self.visible = false;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn rows(&self) -> Vec<String> {
        self.rows.borrow().clone()
    }

    /// Numbered listing of the current rows.
    pub fn render(&self) -> String {
        let rows = self.rows.borrow();
        if rows.is_empty() {
            return if self.visible {
                "(empty)".to_string()
            } else {
                "(hidden)".to_string()
            };
        }
        rows.iter()
            .enumerate()
            .map(|(i, text)| format!("{i:>3}  {text}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Apply everything that has already arrived.
    pub fn pump(&mut self) -> Vec<Notification> {
        self.facade.process_pending()
    }

    /// Wait for the next notification.
    pub async fn next_notification(&mut self) -> Option<Notification> {
        self.facade.process_next().await
    }

    /// Run a command. Returns text to print, if any.
    pub fn execute(&mut self, command: Command) -> Result<Option<String>, ScreenError> {
        match command {
            Command::Add(text) => {
                let key = self.facade.append(json!({ "text": text }));
                log::debug!("Requested {key}");
                Ok(None)
            }
            Command::Edit(row, text) => {
                let mut patch = Map::new();
                patch.insert("text".to_string(), Value::String(text));
                self.facade.update_at(row, patch)?;
                Ok(None)
            }
            Command::Remove(row) => {
                self.facade.remove_at(row)?;
                Ok(None)
            }
            Command::List => Ok(Some(self.render())),
            Command::Hide => {
                self.disappear();
                Ok(Some("hidden".to_string()))
            }
            Command::Show => {
                self.appear();
                Ok(Some("shown".to_string()))
            }
            Command::Quit => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_core::{Key, MemoryCollection, OrderBy};
    use std::sync::Arc;

    fn screen(order: OrderBy) -> (Arc<MemoryCollection>, ListScreen<MemoryCollection>) {
        let remote = Arc::new(MemoryCollection::ordered_by(order));
        let screen = ListScreen::new(CollectionFacade::new(remote.clone()));
        (remote, screen)
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("add buy milk"), Ok(Command::Add("buy milk".into())));
        assert_eq!(Command::parse("edit 2 new text"), Ok(Command::Edit(2, "new text".into())));
        assert_eq!(Command::parse("  rm 0 "), Ok(Command::Remove(0)));
        assert_eq!(Command::parse("ls"), Ok(Command::List));
        assert_eq!(Command::parse("quit"), Ok(Command::Quit));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Command::parse("add"), Err(ScreenError::Usage("add <text>")));
        assert_eq!(Command::parse("edit 1"), Err(ScreenError::Usage("edit <row> <text>")));
        assert_eq!(Command::parse("rm x"), Err(ScreenError::InvalidRow("x".into())));
        assert_eq!(Command::parse("dance"), Err(ScreenError::UnknownCommand("dance".into())));
    }

    #[test]
    fn test_rows_follow_notifications() {
        let (_remote, mut screen) = screen(OrderBy::Key);
        screen.appear();
        screen.execute(Command::Add("one".into())).unwrap();
        screen.execute(Command::Add("two".into())).unwrap();
        screen.pump();
        assert_eq!(screen.rows(), vec!["one", "two"]);

        screen.execute(Command::Edit(1, "TWO".into())).unwrap();
        screen.execute(Command::Remove(0)).unwrap();
        screen.pump();
        assert_eq!(screen.rows(), vec!["TWO"]);
    }

    #[test]
    fn test_rows_relocate_on_move() {
        let (remote, mut screen) = screen(OrderBy::Child("text".into()));
        remote.set("a", json!({"text": "banana"}));
        remote.set("b", json!({"text": "cherry"}));
        screen.appear();
        screen.pump();
        assert_eq!(screen.rows(), vec!["banana", "cherry"]);

        screen.execute(Command::Edit(0, "zucchini".into())).unwrap();
        screen.pump();
        assert_eq!(screen.rows(), vec!["cherry", "zucchini"]);
        assert_eq!(remote.keys(), vec![Key::from("b"), Key::from("a")]);
    }

    #[test]
    fn test_hide_blanks_and_show_resyncs() {
        let (remote, mut screen) = screen(OrderBy::Key);
        remote.set("a", json!({"text": "kept"}));
        screen.appear();
        screen.pump();

        screen.execute(Command::Hide).unwrap();
        assert!(screen.rows().is_empty());
        assert_eq!(screen.render(), "(hidden)");
        assert_eq!(
            screen.execute(Command::Remove(0)),
            Err(ScreenError::Mirror(MirrorError::IndexOutOfRange { index: 0, count: 0 }))
        );

        screen.execute(Command::Show).unwrap();
        screen.pump();
        assert_eq!(screen.rows(), vec!["kept"]);
    }

    #[test]
    fn test_non_text_values_render_raw() {
        let (remote, mut screen) = screen(OrderBy::Key);
        remote.set("n", json!(42));
        screen.appear();
        let notifications = screen.pump();
        assert_eq!(describe(&notifications[0]), "+ [0] 42");
        assert_eq!(screen.render(), "  0  42");
    }
}
