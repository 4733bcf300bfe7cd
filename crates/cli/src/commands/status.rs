//! campus status / campus roles

use clap::Args;
use console::style;
use shared::{AuthState, BadgeVariant, Role, RoleSource};

use crate::app::App;

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatusCommand {
    pub async fn run(&self, app: &App) -> anyhow::Result<()> {
        let state = app.manager.state();
        if self.json {
            println!("{}", serde_json::to_string_pretty(&state_summary(&state))?);
        } else {
            println!("{}", render_state(&state));
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct RolesCommand {}

impl RolesCommand {
    pub async fn run(&self, app: &App) -> anyhow::Result<()> {
        println!("{}", render_roles(app.manager.state().effective_role()));
        Ok(())
    }
}

/// Role label styled the way its badge variant is drawn
pub fn role_badge(role: Option<Role>) -> String {
    let label = match role {
        Some(role) => role.display_name().to_string(),
        None => "Loading...".to_string(),
    };
    match BadgeVariant::for_role(role) {
        BadgeVariant::Destructive => style(label).red().bold().to_string(),
        BadgeVariant::Default => style(label).cyan().bold().to_string(),
        BadgeVariant::Secondary => style(label).bold().to_string(),
        BadgeVariant::Outline => style(label).dim().to_string(),
    }
}

pub fn render_state(state: &AuthState) -> String {
    if !state.is_ready() {
        return "Status: initializing".to_string();
    }

    let Some(session) = &state.session else {
        return "Status: signed out".to_string();
    };

    let user = session.user.as_ref();
    let email = user.map(|u| u.email.as_str()).unwrap_or("(unknown)");
    let mut lines = vec!["Status: signed in".to_string(), format!("User:   {}", email)];
    if let Some(name) = user.and_then(|u| u.full_name()) {
        lines.push(format!("Name:   {}", name));
    }
    let mut role = format!("Role:   {}", role_badge(state.effective_role()));
    match &state.role_source {
        Some(RoleSource::MissingRow) => role.push_str(" (default, no role assigned)"),
        Some(RoleSource::LookupFailed(_)) => role.push_str(" (default, role lookup failed)"),
        Some(RoleSource::Table) | None => {}
    }
    lines.push(role);
    lines.join("\n")
}

/// Token-free view of the state for `--json`
pub fn state_summary(state: &AuthState) -> serde_json::Value {
    serde_json::json!({
        "status": state.status,
        "userId": state.subject(),
        "email": state.session.as_ref().and_then(|s| s.email()),
        "role": state.effective_role(),
        "roleSource": state.role_source,
    })
}

pub fn render_roles(current: Option<Role>) -> String {
    Role::all()
        .iter()
        .map(|role| {
            let marker = if Some(*role) == current { "*" } else { " " };
            format!(
                "{} {:<8} {:<14} {}",
                marker,
                role.as_str(),
                role.display_name(),
                role.description()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
