use serde::Serialize;

use crate::schema::User;

const PENDING_NAME: &str = "...";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Destination {
    Multiplayer,
    SinglePlayer,
    Settings,
}

impl Destination {
    pub fn label(&self) -> &'static str {
        match self {
            Destination::Multiplayer => "Multiplayer",
            Destination::SinglePlayer => "Single Player",
            Destination::Settings => "Settings",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MenuItem {
    pub destination: Destination,
    pub label: &'static str,
}

/// Data behind the home screen.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HomeView {
    pub greeting: String,
    pub menu: Vec<MenuItem>,
}

impl HomeView {
    /// The name shows a placeholder until the profile resolves.
    pub fn for_user(user: Option<&User>) -> Self {
        let name = user.map(|u| u.name.as_str()).unwrap_or(PENDING_NAME);
        let menu = [
            Destination::Multiplayer,
            Destination::SinglePlayer,
            Destination::Settings,
        ]
        .into_iter()
        .map(|destination| MenuItem {
            destination,
            label: destination.label(),
        })
        .collect();

        Self {
            greeting: format!("Hey, {}", name),
            menu,
        }
    }
}
