//! campus open <path>

use clap::Args;
use session::{Navigation, Page};

use crate::app::App;

#[derive(Debug, Args)]
pub struct OpenCommand {
    /// Route to visit, e.g. /dashboard
    pub path: String,
}

impl OpenCommand {
    pub async fn run(&self, app: &App) -> anyhow::Result<()> {
        let navigation = app.router.navigate(&self.path, &app.manager.state());
        println!("{}", render_navigation(&navigation));
        Ok(())
    }
}

pub fn page_title(page: &Page) -> &'static str {
    match page {
        Page::Home => "Campus Virtual",
        Page::SignIn => "Sign in",
        Page::Dashboard(dashboard) => dashboard.title(),
        Page::UserManagement => "User Management",
        Page::CourseManagement => "Course Management",
        Page::NotFound => "404 - Page not found",
    }
}

pub fn render_navigation(navigation: &Navigation) -> String {
    match navigation {
        Navigation::Render(page) => page_title(page).to_string(),
        Navigation::Loading => "Loading...".to_string(),
        Navigation::Redirect { to, from: Some(from) } => {
            format!("Redirect to {} (from {})", to, from)
        }
        Navigation::Redirect { to, from: None } => format!("Redirect to {}", to),
    }
}
