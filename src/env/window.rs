//! `env/window` - user-facing notices for sandboxes
//!
//! `alert`, `confirm` and `prompt` go to a [`Terminal`]; the CLI uses
//! stdin/stdout, tests use a scripted one.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use serde_json::Value;

use crate::dispatch::DispatchError;
use crate::namespace::{Function, Registry};

pub const WINDOW: &str = "env/window";

/// Where `env/window` messages are shown
pub trait Terminal: Send + Sync + 'static {
    fn alert(&self, message: &str);
    fn confirm(&self, message: &str) -> bool;
    fn prompt(&self, message: &str) -> Option<String>;
}

/// Terminal backed by the process's stdin and stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct StdTerminal;

impl StdTerminal {
    fn ask(&self, question: &str) -> Option<String> {
        let mut stdout = io::stdout().lock();
        write!(stdout, "{question} ").ok()?;
        stdout.flush().ok()?;

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }
}

impl Terminal for StdTerminal {
    fn alert(&self, message: &str) {
        println!("{message}");
    }

    fn confirm(&self, message: &str) -> bool {
        self.ask(&format!("{message} [y/N]"))
            .is_some_and(|answer| matches!(answer.trim(), "y" | "Y" | "yes"))
    }

    fn prompt(&self, message: &str) -> Option<String> {
        self.ask(message)
    }
}

/// Text of the first argument; non-strings are shown as JSON
fn message(args: &[Value]) -> String {
    match args.first() {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Run a terminal interaction off the async workers, since it may block
async fn blocking<T, F>(f: F) -> Result<T, DispatchError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DispatchError::failed(format!("terminal task failed: {e}")))
}

pub(super) fn install(registry: &Registry, terminal: Arc<dyn Terminal>) {
    let window = registry.register(WINDOW, &[]);

    {
        let t = Arc::clone(&terminal);
        window.define(
            "alert",
            Function::pending(move |_, args| {
                let t = Arc::clone(&t);
                async move {
                    let text = message(&args);
                    blocking(move || t.alert(&text)).await?;
                    Ok(Value::Null)
                }
            }),
        );
    }

    {
        let t = Arc::clone(&terminal);
        window.define(
            "confirm",
            Function::pending(move |_, args| {
                let t = Arc::clone(&t);
                async move {
                    let text = message(&args);
                    let confirmed = blocking(move || t.confirm(&text)).await?;
                    Ok(Value::Bool(confirmed))
                }
            }),
        );
    }

    {
        let t = Arc::clone(&terminal);
        window.define(
            "prompt",
            Function::pending(move |_, args| {
                let t = Arc::clone(&t);
                async move {
                    let text = message(&args);
                    let answer = blocking(move || t.prompt(&text)).await?;
                    Ok(answer.map_or(Value::Null, Value::String))
                }
            }),
        );
    }
}
