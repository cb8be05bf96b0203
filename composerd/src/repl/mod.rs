//! Interactive REPL for composerd
//!
//! Lines of text are fed to the engine key by key; slash commands reach the
//! rest of the session API.

mod session;

pub use session::{ReplSession, render_snapshot};

use eyre::Result;

use crate::session::Session;

/// Run the interactive REPL
///
/// This is the main entry point for `composerd repl`.
pub async fn run_interactive(session: Session) -> Result<()> {
    let mut repl = ReplSession::new(session);
    repl.run().await
}
