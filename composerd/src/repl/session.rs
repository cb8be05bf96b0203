//! REPL session management

use colored::Colorize;
use eyre::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::debug;

use crate::domain::KeyModifiers;
use crate::domain::keys;
use crate::events::{Event, Subscription};
use crate::session::Session;
use crate::state::EngineSnapshot;

/// Interactive REPL over a running session
pub struct ReplSession {
    session: Session,
    events: Subscription,
}

/// Result of handling a slash command
enum SlashResult {
    Continue,
    Quit,
}

impl ReplSession {
    /// Create a REPL; the session should already be started
    pub fn new(session: Session) -> Self {
        let events = session.subscribe();
        Self { session, events }
    }

    /// Run the REPL main loop
    pub async fn run(&mut self) -> Result<()> {
        self.print_welcome();
        self.drain_events();

        // Create readline editor for proper line editing
        let mut rl = DefaultEditor::new().map_err(|e| eyre::eyre!("Failed to initialize readline: {}", e))?;

        loop {
            let readline = rl.readline(&format!("{} ", ">".bright_green()));

            match readline {
                Ok(line) => {
                    let input = line.trim_end();
                    if input.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(input);

                    if input.starts_with('/') {
                        match self.handle_slash_command(input).await {
                            Ok(SlashResult::Continue) => {}
                            Ok(SlashResult::Quit) => break,
                            Err(e) => println!("{} {}", "Error:".red(), e),
                        }
                    } else if let Err(e) = self.feed_keys(input).await {
                        println!("{} {}", "Error:".red(), e);
                    }
                    self.drain_events();
                }
                Err(ReadlineError::Interrupted) => {
                    // Ctrl+C - just show new prompt
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    // Ctrl+D - exit
                    println!();
                    break;
                }
                Err(err) => {
                    return Err(eyre::eyre!("Readline error: {}", err));
                }
            }
        }

        println!("Goodbye!");
        Ok(())
    }

    /// Print welcome message
    fn print_welcome(&self) {
        println!();
        println!("{}", "composerd interactive session".bright_cyan().bold());
        println!("Schema: {}", self.session.status().schema_id);
        println!(
            "Type keys to compose ({} for special keys), {} for help, {} to quit",
            "{space}".yellow(),
            "/help".yellow(),
            "/quit".yellow()
        );
        println!();
    }

    /// Send each key of the line to the engine
    async fn feed_keys(&mut self, input: &str) -> Result<()> {
        debug!(%input, "ReplSession::feed_keys: called");
        let Some(codes) = keys::parse_sequence(input) else {
            println!("{} Unrecognized key in {:?}", "?".yellow(), input);
            return Ok(());
        };
        for code in codes {
            self.session.process_key(code, KeyModifiers::empty()).await?;
        }
        Ok(())
    }

    /// Handle slash commands
    async fn handle_slash_command(&mut self, input: &str) -> Result<SlashResult> {
        let parts: Vec<&str> = input.split_whitespace().collect();
        let cmd = parts.first().copied().unwrap_or("");
        let arg = parts.get(1).copied();

        match (cmd, arg) {
            ("/help" | "/h", _) => self.print_help(),
            ("/quit" | "/q" | "/exit", _) => return Ok(SlashResult::Quit),
            ("/select", Some(n)) => match n.parse::<usize>() {
                Ok(n) if n > 0 => {
                    if !self.session.select_paged_candidate(n - 1).await? {
                        println!("{}", "No such candidate.".dimmed());
                    }
                }
                _ => println!("{} Usage: /select N (1-based)", "?".yellow()),
            },
            ("/page", Some(direction @ ("next" | "prev"))) => {
                if !self.session.change_page(direction == "prev").await? {
                    println!("{}", "No more pages.".dimmed());
                }
            }
            ("/schema", Some(id)) => {
                if !self.session.select_schema(id).await? {
                    println!("{} Schema {} is not enabled", "?".yellow(), id);
                }
            }
            ("/schemas", _) => self.print_schemas().await?,
            ("/option", Some(name)) => match parts.get(2).copied() {
                Some(value @ ("on" | "off")) => {
                    self.session.set_runtime_option(name, value == "on").await?;
                    self.session.refresh().await?;
                }
                _ => println!("{} Usage: /option NAME on|off", "?".yellow()),
            },
            ("/commit", _) => {
                self.session.commit_composition().await?;
            }
            ("/clear", _) => {
                self.session.clear_composition().await?;
            }
            ("/status", _) => self.print_status(),
            _ => {
                println!("{} Unknown command: {}", "?".yellow(), input);
                println!("Type {} for available commands", "/help".yellow());
            }
        }
        Ok(SlashResult::Continue)
    }

    /// Print help message
    fn print_help(&self) {
        println!();
        println!("{}", "Available Commands:".bright_cyan());
        println!("  {:22} Show this help", "/help".yellow());
        println!("  {:22} Exit the REPL", "/quit".yellow());
        println!("  {:22} Select candidate N on the page", "/select N".yellow());
        println!("  {:22} Turn the candidate page", "/page next|prev".yellow());
        println!("  {:22} Switch schema", "/schema ID".yellow());
        println!("  {:22} List schemas", "/schemas".yellow());
        println!("  {:22} Set a runtime option", "/option NAME on|off".yellow());
        println!("  {:22} Commit the composition", "/commit".yellow());
        println!("  {:22} Discard the composition", "/clear".yellow());
        println!("  {:22} Show engine status", "/status".yellow());
        println!();
    }

    async fn print_schemas(&self) -> Result<()> {
        let available = self.session.available_schemas().await?;
        let enabled = self.session.enabled_schemas().await?;
        let current = self.session.current_schema().await?;
        println!();
        for schema in available {
            let marker = if schema.id == current {
                "*".bright_green()
            } else if enabled.contains(&schema) {
                "+".normal()
            } else {
                " ".normal()
            };
            println!("  {} {}", marker, schema);
        }
        println!();
        Ok(())
    }

    fn print_status(&self) {
        let status = self.session.status();
        println!();
        println!("  {:14} {} ({})", "schema".yellow(), status.schema_id, status.schema_name);
        println!("  {:14} {}", "composing".yellow(), status.is_composing);
        println!("  {:14} {}", "ascii_mode".yellow(), status.is_ascii_mode);
        println!("  {:14} {}", "full_shape".yellow(), status.is_full_shape);
        println!("  {:14} {}", "ascii_punct".yellow(), status.is_ascii_punct);
        println!();
    }

    /// Print everything the bus delivered since the last prompt
    fn drain_events(&mut self) {
        let mut last_snapshot = None;
        while let Some(event) = self.events.try_recv() {
            match event {
                Event::Response {
                    commit,
                    composition,
                    menu,
                    raw_input,
                    status,
                } => {
                    if let Some(commit) = commit {
                        println!("{} {}", "commit:".bright_green(), commit.text.bold());
                    }
                    last_snapshot = Some(EngineSnapshot {
                        status,
                        composition,
                        menu,
                        raw_input,
                    });
                }
                Event::KeyUnhandled { key_value, .. } => {
                    println!("{}", format!("[key {:#x} not handled]", key_value).dimmed());
                }
                Event::SchemaChanged { id, name } => {
                    println!("{}", format!("[schema: {} ({})]", id, name).dimmed());
                }
                Event::OptionChanged { name, value } => {
                    println!("{}", format!("[option {} = {}]", name, value).dimmed());
                }
                Event::DeployStateChanged { phase } => {
                    println!("{}", format!("[deploy {:?}]", phase).dimmed());
                }
            }
        }
        if let Some(snapshot) = last_snapshot {
            print!("{}", render_snapshot(&snapshot));
        }
    }
}

/// Preedit with caret plus the numbered candidate page
pub fn render_snapshot(snapshot: &EngineSnapshot) -> String {
    if snapshot.composition.is_empty() {
        return String::new();
    }
    let preedit: String = {
        let chars: Vec<char> = snapshot.composition.preedit.chars().collect();
        let caret = snapshot.composition.cursor_pos.min(chars.len());
        let (before, after) = chars.split_at(caret);
        format!("{}|{}", before.iter().collect::<String>(), after.iter().collect::<String>())
    };

    let mut out = format!("  {}\n", preedit);
    let menu = &snapshot.menu;
    let candidates: Vec<String> = menu
        .candidates
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let label = format!("{}.{}", i + 1, c.text);
            if i == menu.highlighted_index {
                format!("[{}]", label)
            } else {
                label
            }
        })
        .collect();
    if !candidates.is_empty() {
        let more = if menu.is_last_page { "" } else { " >" };
        out.push_str(&format!("  {}{}\n", candidates.join(" "), more));
    }
    out
}
