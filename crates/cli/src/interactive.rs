//! Interactive REPL mode

use std::io::{self, Write};

use dialoguer::Password;

use crate::app::App;
use crate::commands::open::render_navigation;
use crate::commands::status::{render_roles, render_state};

/// Interactive CLI over one long-lived session
pub struct InteractiveCli {
    app: App,
}

impl InteractiveCli {
    pub fn new(app: App) -> Self {
        Self { app }
    }

    pub fn app(&self) -> &App {
        &self.app
    }

    /// Run the interactive REPL
    pub async fn run(&mut self) -> anyhow::Result<()> {
        println!("Campus Virtual");
        println!("Type /help for commands, /quit to exit");
        println!();

        let state = self.app.start(true).await;
        println!("{}", render_state(&state));
        println!();

        loop {
            print!("{} > ", self.prompt());
            io::stdout().flush()?;

            let mut input = String::new();
            if io::stdin().read_line(&mut input)? == 0 {
                break;
            }
            let input = input.trim();

            if input.is_empty() {
                continue;
            }

            match self.handle_command(input).await {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => println!("Error: {}", e),
            }
        }

        self.app.manager.teardown();
        Ok(())
    }

    fn prompt(&self) -> String {
        let state = self.app.manager.state();
        match (state.session.as_ref().and_then(|s| s.email()), state.effective_role()) {
            (Some(email), Some(role)) => format!("[{} | {}]", email, role),
            (Some(email), None) => format!("[{} | ...]", email),
            (None, _) => "[guest]".to_string(),
        }
    }

    async fn handle_command(&mut self, input: &str) -> anyhow::Result<bool> {
        let parts: Vec<&str> = input.split_whitespace().collect();
        let cmd = parts.first().copied().unwrap_or("");

        match cmd {
            "/quit" | "/exit" | "/q" => {
                println!("Goodbye!");
                return Ok(true);
            }
            "/help" | "/h" => {
                println!("Commands:");
                println!("  /login <email> [password]          - Sign in");
                println!("  /signup <email> <password> <name>  - Register a new account");
                println!("  /logout                            - Sign out");
                println!("  /status                            - Show who is signed in");
                println!("  /roles                             - List roles");
                println!("  /open <path>                       - Visit a route");
                println!("  /refresh                           - Refresh the access token");
                println!("  /quit                              - Exit");
            }
            "/login" => {
                let Some(email) = parts.get(1) else {
                    println!("Usage: /login <email> [password]");
                    return Ok(false);
                };
                let password = match parts.get(2) {
                    Some(password) => password.to_string(),
                    None => Password::new().with_prompt("Password").interact()?,
                };
                if self.app.manager.sign_in(email, &password).await.is_ok() {
                    println!("{}", render_state(&self.app.settle().await));
                }
            }
            "/signup" => {
                if parts.len() < 4 {
                    println!("Usage: /signup <email> <password> <name>");
                    return Ok(false);
                }
                let name = parts[3..].join(" ");
                if let Ok(Some(_)) = self.app.manager.sign_up(parts[1], parts[2], &name).await {
                    println!("{}", render_state(&self.app.settle().await));
                }
            }
            "/logout" => {
                // Local state is cleared either way; the toast reports failures
                let _ = self.app.manager.sign_out().await;
            }
            "/status" => {
                println!("{}", render_state(&self.app.manager.state()));
            }
            "/roles" => {
                println!("{}", render_roles(self.app.manager.state().effective_role()));
            }
            "/open" => {
                let Some(path) = parts.get(1) else {
                    println!("Usage: /open <path>");
                    return Ok(false);
                };
                let navigation = self.app.router.navigate(path, &self.app.manager.state());
                println!("{}", render_navigation(&navigation));
            }
            "/refresh" => {
                self.app.backend.refresh_session()?;
                println!("Access token refreshed");
            }
            _ => {
                println!("Unknown command: {}", cmd);
            }
        }

        Ok(false)
    }
}
