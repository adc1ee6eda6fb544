//! Reference lookup kinds.
//!
//! The six lookup tables share one shape (`id`, `external_id`, `name`,
//! `created_at`) so they are addressed through [`ReferenceKind`] instead of six
//! separate entities.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Platform,
    Genre,
    GameMode,
    Company,
    Engine,
    Perspective,
}

impl ReferenceKind {
    pub const ALL: [ReferenceKind; 6] = [
        ReferenceKind::Platform,
        ReferenceKind::Genre,
        ReferenceKind::GameMode,
        ReferenceKind::Company,
        ReferenceKind::Engine,
        ReferenceKind::Perspective,
    ];

    /// Lookup table name.
    pub fn table(&self) -> &'static str {
        match self {
            ReferenceKind::Platform => "platforms",
            ReferenceKind::Genre => "genres",
            ReferenceKind::GameMode => "game_modes",
            ReferenceKind::Company => "companies",
            ReferenceKind::Engine => "game_engines",
            ReferenceKind::Perspective => "player_perspectives",
        }
    }

    /// Game association table name.
    pub fn join_table(&self) -> &'static str {
        match self {
            ReferenceKind::Platform => "game_platforms",
            ReferenceKind::Genre => "game_genres",
            ReferenceKind::GameMode => "game_game_modes",
            ReferenceKind::Company => "game_companies",
            ReferenceKind::Engine => "game_game_engines",
            ReferenceKind::Perspective => "game_player_perspectives",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReferenceKind::Platform => "Platform",
            ReferenceKind::Genre => "Genre",
            ReferenceKind::GameMode => "Game Mode",
            ReferenceKind::Company => "Company",
            ReferenceKind::Engine => "Engine",
            ReferenceKind::Perspective => "Perspective",
        }
    }

    /// Name stored when the payload carried only an id.
    pub fn placeholder_name(&self, external_id: i64) -> String {
        format!("{} #{}", self.label(), external_id)
    }

    pub fn is_placeholder(&self, external_id: i64, name: &str) -> bool {
        name == self.placeholder_name(external_id)
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Developer/publisher flags carried on company links.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompanyRoles {
    pub developer: bool,
    pub publisher: bool,
}

impl CompanyRoles {
    pub fn merge(self, other: CompanyRoles) -> CompanyRoles {
        CompanyRoles {
            developer: self.developer || other.developer,
            publisher: self.publisher || other.publisher,
        }
    }
}

/// One nested reference as it arrived from the primary source.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceItem {
    pub external_id: i64,
    pub name: Option<String>,
    pub roles: CompanyRoles,
}

impl ReferenceItem {
    pub fn new(external_id: i64, name: Option<String>) -> Self {
        Self {
            external_id,
            name: name.filter(|n| !n.trim().is_empty()),
            roles: CompanyRoles::default(),
        }
    }

    pub fn with_roles(mut self, roles: CompanyRoles) -> Self {
        self.roles = roles;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_names_round_trip() {
        let name = ReferenceKind::GameMode.placeholder_name(7);
        assert_eq!(name, "Game Mode #7");
        assert!(ReferenceKind::GameMode.is_placeholder(7, &name));
        assert!(!ReferenceKind::GameMode.is_placeholder(8, &name));
    }

    #[test]
    fn blank_names_are_dropped() {
        assert_eq!(ReferenceItem::new(1, Some("  ".into())).name, None);
    }
}
