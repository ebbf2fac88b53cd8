//! Config-driven [`Permissions`] implementation.
//!
//! Editors listed under `[permissions] editors` may edit and view every
//! collection. Members of a team listed under `[permissions.teams]` may view
//! the collections that name their team in the description's `teams` field.
//! Actor identities compare case-insensitively.

use std::collections::BTreeMap;

use publish_harness_core::models::CollectionDescription;

use crate::config::PermissionsConfig;
use crate::traits::Permissions;

pub struct ConfigPermissions {
    editors: Vec<String>,
    teams: BTreeMap<String, Vec<String>>,
}

impl ConfigPermissions {
    pub fn new(config: &PermissionsConfig) -> Self {
        Self {
            editors: config.editors.iter().map(|e| e.to_lowercase()).collect(),
            teams: config
                .teams
                .iter()
                .map(|(team, members)| {
                    (
                        team.clone(),
                        members.iter().map(|m| m.to_lowercase()).collect(),
                    )
                })
                .collect(),
        }
    }
}

impl Permissions for ConfigPermissions {
    fn can_edit(&self, actor: &str) -> bool {
        let actor = actor.to_lowercase();
        self.editors.iter().any(|e| *e == actor)
    }

    fn can_view(&self, actor: &str, collection: &CollectionDescription) -> bool {
        if self.can_edit(actor) {
            return true;
        }
        let actor = actor.to_lowercase();
        collection.teams.iter().any(|team| {
            self.teams
                .get(team)
                .map(|members| members.iter().any(|m| *m == actor))
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use publish_harness_core::models::CollectionType;

    fn permissions() -> ConfigPermissions {
        let mut teams = BTreeMap::new();
        teams.insert("economy".to_string(), vec!["Viewer@Example.com".to_string()]);
        ConfigPermissions::new(&PermissionsConfig {
            editors: vec!["editor@example.com".to_string()],
            teams,
        })
    }

    fn collection(teams: &[&str]) -> CollectionDescription {
        let mut d = CollectionDescription::new(
            "c".to_string(),
            "C".to_string(),
            CollectionType::Manual,
            None,
        );
        d.teams = teams.iter().map(|t| t.to_string()).collect();
        d
    }

    #[test]
    fn editors_edit_and_view() {
        let p = permissions();
        assert!(p.can_edit("EDITOR@example.com"));
        assert!(p.can_view("editor@example.com", &collection(&[])));
    }

    #[test]
    fn team_members_view_only_their_collections() {
        let p = permissions();
        assert!(!p.can_edit("viewer@example.com"));
        assert!(p.can_view("viewer@example.com", &collection(&["economy"])));
        assert!(!p.can_view("viewer@example.com", &collection(&["health"])));
        assert!(!p.can_view("stranger@example.com", &collection(&["economy"])));
    }
}
