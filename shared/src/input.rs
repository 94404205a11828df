//! Console input management with edge detection.
//!
//! The binaries have no window to poll, so input arrives as text commands on
//! stdin. [`InputManager`] turns those into the held/down key states the
//! avatar controller expects: a key held across ticks reports `key_down` only
//! on its first tick, and one-shot commands (`jump`, `fp`, ...) are taps that
//! last exactly one tick.

use crate::capabilities::{Axis, InputSource, Key};
use log::warn;
use std::collections::HashSet;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// A parsed console line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConsoleCommand {
    Move { horizontal: f32, vertical: f32 },
    Stop,
    Jump,
    ToggleFirstPerson,
    ToggleDrag,
    Faster,
    Slower,
    /// Toggles holding the message key.
    Message,
    /// Queue one extra agent spawn (host only).
    Spawn,
    /// Print the command list.
    Help,
    Quit,
}

impl ConsoleCommand {
    /// Parses one console line; `None` for blank or unknown input.
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let command = match words.next()?.to_ascii_lowercase().as_str() {
            "move" | "m" => {
                let horizontal = words.next()?.parse::<f32>().ok()?;
                let vertical = words.next()?.parse::<f32>().ok()?;
                ConsoleCommand::Move {
                    horizontal: horizontal.clamp(-1.0, 1.0),
                    vertical: vertical.clamp(-1.0, 1.0),
                }
            }
            "stop" => ConsoleCommand::Stop,
            "jump" | "j" => ConsoleCommand::Jump,
            "fp" => ConsoleCommand::ToggleFirstPerson,
            "drag" => ConsoleCommand::ToggleDrag,
            "faster" => ConsoleCommand::Faster,
            "slower" => ConsoleCommand::Slower,
            "msg" => ConsoleCommand::Message,
            "spawn" => ConsoleCommand::Spawn,
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" | "q" => ConsoleCommand::Quit,
            _ => return None,
        };
        Some(command)
    }

    pub fn help() -> &'static str {
        "commands: move <h> <v> | stop | jump | fp | drag | faster | slower | msg | spawn | help | quit"
    }
}

/// Manages console-driven input state for the local avatar
#[derive(Debug, Default)]
pub struct InputManager {
    horizontal: f32,
    vertical: f32,
    held: HashSet<Key>,
    // Held keys as of the previous tick, for edge detection
    previous: HashSet<Key>,
    taps: HashSet<Key>,
}

impl InputManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_axes(&mut self, horizontal: f32, vertical: f32) {
        self.horizontal = horizontal.clamp(-1.0, 1.0);
        self.vertical = vertical.clamp(-1.0, 1.0);
    }

    pub fn set_held(&mut self, key: Key, held: bool) {
        if held {
            self.held.insert(key);
        } else {
            self.held.remove(&key);
        }
    }

    /// Presses a key for exactly one tick.
    pub fn tap(&mut self, key: Key) {
        self.taps.insert(key);
    }

    /// Applies an avatar command. Returns false for commands the session
    /// handles itself (`spawn`, `help`, `quit`).
    pub fn apply(&mut self, command: ConsoleCommand) -> bool {
        match command {
            ConsoleCommand::Move {
                horizontal,
                vertical,
            } => self.set_axes(horizontal, vertical),
            ConsoleCommand::Stop => self.set_axes(0.0, 0.0),
            ConsoleCommand::Jump => self.tap(Key::Jump),
            ConsoleCommand::ToggleFirstPerson => self.tap(Key::ToggleFirstPerson),
            ConsoleCommand::ToggleDrag => self.tap(Key::ToggleDrag),
            ConsoleCommand::Faster => self.tap(Key::SpeedUp),
            ConsoleCommand::Slower => self.tap(Key::SlowDown),
            ConsoleCommand::Message => {
                let held = self.held.contains(&Key::ShowMessage);
                self.set_held(Key::ShowMessage, !held);
            }
            ConsoleCommand::Spawn | ConsoleCommand::Help | ConsoleCommand::Quit => return false,
        }
        true
    }

    /// Rolls held state into the edge detector and clears taps. Call once
    /// per tick, after the controllers have read the input.
    pub fn end_tick(&mut self) {
        self.previous = self.held.clone();
        self.taps.clear();
    }
}

impl InputSource for InputManager {
    fn axis(&self, axis: Axis) -> f32 {
        match axis {
            Axis::Horizontal => self.horizontal,
            Axis::Vertical => self.vertical,
        }
    }

    fn key_down(&self, key: Key) -> bool {
        self.taps.contains(&key) || (self.held.contains(&key) && !self.previous.contains(&key))
    }

    fn key_held(&self, key: Key) -> bool {
        self.taps.contains(&key) || self.held.contains(&key)
    }
}

/// Spawns a task that forwards parsed stdin commands.
///
/// Unknown lines are reported and skipped; the channel closes on EOF.
pub fn spawn_console() -> mpsc::UnboundedReceiver<ConsoleCommand> {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match ConsoleCommand::parse(&line) {
                Some(command) => {
                    if tx.send(command).is_err() {
                        break;
                    }
                }
                None => warn!("Unknown command '{}'; {}", line.trim(), ConsoleCommand::help()),
            }
        }
    });

    rx
}
