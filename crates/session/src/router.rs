//! Router - the application's route table, resolved against the auth state

use glob::Pattern;
use shared::{AuthState, CampusError, Role, SessionConfig};

use crate::guard::{GuardDecision, RouteGuard};

/// Role-specific landing view behind `/dashboard`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dashboard {
    Admin,
    Teacher,
    Student,
}

impl Dashboard {
    /// Admins and teachers get their own dashboard; everyone else the student one
    pub fn for_role(role: Option<Role>) -> Self {
        match role {
            Some(Role::Admin) => Dashboard::Admin,
            Some(Role::Teacher) => Dashboard::Teacher,
            Some(Role::Student) | None => Dashboard::Student,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Dashboard::Admin => "Admin Dashboard",
            Dashboard::Teacher => "Teacher Dashboard",
            Dashboard::Student => "Student Dashboard",
        }
    }
}

/// A view the router can render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Home,
    SignIn,
    Dashboard(Dashboard),
    UserManagement,
    CourseManagement,
    NotFound,
}

/// Who may visit a route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAccess {
    Public,
    /// Signed-in users are sent to the default path
    GuestOnly,
    Protected { required_role: Option<Role> },
}

/// One row of the route table
#[derive(Debug, Clone)]
pub struct RouteDefinition {
    pub pattern: Pattern,
    pub page: Page,
    pub access: RouteAccess,
}

impl RouteDefinition {
    pub fn new(pattern: &str, page: Page, access: RouteAccess) -> shared::Result<Self> {
        let pattern = Pattern::new(pattern).map_err(|e| {
            CampusError::Config(format!("Invalid route pattern '{}': {}", pattern, e))
        })?;
        Ok(Self {
            pattern,
            page,
            access,
        })
    }
}

/// Result of navigating to a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Render(Page),
    Loading,
    Redirect { to: String, from: Option<String> },
}

/// Route table plus guard
#[derive(Debug, Clone)]
pub struct Router {
    routes: Vec<RouteDefinition>,
    guard: RouteGuard,
}

impl Router {
    /// The campus route table
    pub fn new(config: &SessionConfig) -> shared::Result<Self> {
        let admin = RouteAccess::Protected {
            required_role: Some(Role::Admin),
        };
        let teacher = RouteAccess::Protected {
            required_role: Some(Role::Teacher),
        };

        let routes = vec![
            RouteDefinition::new("/", Page::Home, RouteAccess::Public)?,
            RouteDefinition::new(&config.login_path, Page::SignIn, RouteAccess::GuestOnly)?,
            RouteDefinition::new(
                &config.default_path,
                Page::Dashboard(Dashboard::Student),
                RouteAccess::Protected {
                    required_role: None,
                },
            )?,
            RouteDefinition::new("/admin/users", Page::UserManagement, admin)?,
            RouteDefinition::new("/admin/courses*", Page::CourseManagement, admin)?,
            RouteDefinition::new("/teacher/courses*", Page::CourseManagement, teacher)?,
        ];

        Ok(Self::with_routes(routes, RouteGuard::new(config)))
    }

    pub fn with_routes(routes: Vec<RouteDefinition>, guard: RouteGuard) -> Self {
        Self { routes, guard }
    }

    pub fn routes(&self) -> &[RouteDefinition] {
        &self.routes
    }

    /// First route whose pattern matches the path
    pub fn find(&self, path: &str) -> Option<&RouteDefinition> {
        let path = normalize(path);
        self.routes.iter().find(|r| r.pattern.matches(path))
    }

    pub fn navigate(&self, path: &str, state: &AuthState) -> Navigation {
        let Some(route) = self.find(path) else {
            tracing::debug!(path, "no route matched");
            return Navigation::Render(Page::NotFound);
        };

        match route.access {
            RouteAccess::Public => Navigation::Render(route.page),
            RouteAccess::GuestOnly => {
                if !state.is_ready() {
                    Navigation::Loading
                } else if state.is_authenticated() {
                    Navigation::Redirect {
                        to: self.guard.default_path().to_string(),
                        from: None,
                    }
                } else {
                    Navigation::Render(route.page)
                }
            }
            RouteAccess::Protected { required_role } => {
                match self.guard.check(state, path, required_role) {
                    GuardDecision::Loading => Navigation::Loading,
                    GuardDecision::Redirect { to, from } => Navigation::Redirect { to, from },
                    GuardDecision::Allow => self.render_protected(route.page, state),
                }
            }
        }
    }

    fn render_protected(&self, page: Page, state: &AuthState) -> Navigation {
        match page {
            // Branching on an unresolved role would flash the student view
            Page::Dashboard(_) => match state.effective_role() {
                Some(role) => Navigation::Render(Page::Dashboard(Dashboard::for_role(Some(role)))),
                None => Navigation::Loading,
            },
            other => Navigation::Render(other),
        }
    }
}

/// Strip a trailing slash (except for the root) and any query string
fn normalize(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}
