use std::collections::HashSet;

use herald_common::PersonaConfig;
use serde::{Deserialize, Serialize};

use crate::Actor;

const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Executive,
    Client,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Executive => "executive",
            Self::Client => "client",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaProfile {
    pub tier: Tier,
    pub prompt_text: String,
}

/// Maps an actor to an authorization tier and its prompt profile.
///
/// An actor is executive when its id (trimmed, case-insensitive) is on the allow-list or its
/// role is `admin`. Everyone else, including actors with no id and no role, is a client.
#[derive(Debug, Clone)]
pub struct PersonaResolver {
    executive_ids: HashSet<String>,
    executive_prompt: String,
    client_prompt: String,
}

impl PersonaResolver {
    pub fn new<I, S>(
        executive_ids: I,
        executive_prompt: impl Into<String>,
        client_prompt: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let executive_ids = executive_ids
            .into_iter()
            .map(|id| id.as_ref().trim().to_lowercase())
            .filter(|id| !id.is_empty())
            .collect();
        Self {
            executive_ids,
            executive_prompt: executive_prompt.into(),
            client_prompt: client_prompt.into(),
        }
    }

    pub fn from_config(config: &PersonaConfig) -> Self {
        Self::new(
            &config.executive_ids,
            config.executive_prompt.clone(),
            config.client_prompt.clone(),
        )
    }

    pub fn tier(&self, actor: &Actor) -> Tier {
        let allow_listed = actor
            .id
            .as_deref()
            .map(|id| self.executive_ids.contains(&id.trim().to_lowercase()))
            .unwrap_or(false);
        let admin = actor
            .role
            .as_deref()
            .map(|role| role.trim().eq_ignore_ascii_case(ADMIN_ROLE))
            .unwrap_or(false);
        if allow_listed || admin {
            Tier::Executive
        } else {
            Tier::Client
        }
    }

    pub fn resolve(&self, actor: &Actor) -> PersonaProfile {
        let tier = self.tier(actor);
        let prompt_text = match tier {
            Tier::Executive => self.executive_prompt.clone(),
            Tier::Client => self.client_prompt.clone(),
        };
        PersonaProfile { tier, prompt_text }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> PersonaResolver {
        PersonaResolver::new(["Ryan", " ops-lead "], "EXEC", "CLIENT")
    }

    #[test]
    fn allow_listed_id_is_executive_regardless_of_case() {
        let resolver = resolver();
        for id in ["ryan", "RYAN", " Ryan ", "ops-lead"] {
            let profile = resolver.resolve(&Actor::guest().with_id(id));
            assert_eq!(profile.tier, Tier::Executive, "id {id}");
            assert_eq!(profile.prompt_text, "EXEC");
        }
    }

    #[test]
    fn admin_role_is_executive_without_id() {
        let profile = resolver().resolve(&Actor::guest().with_role("Admin"));
        assert_eq!(profile.tier, Tier::Executive);
    }

    #[test]
    fn everyone_else_is_client() {
        let resolver = resolver();
        let actors = [
            Actor::guest(),
            Actor::guest().with_id("stranger"),
            Actor::guest().with_role("client"),
            Actor::guest().with_id("ryan2").with_role("administrator"),
        ];
        for actor in actors {
            let profile = resolver.resolve(&actor);
            assert_eq!(profile.tier, Tier::Client, "actor {actor:?}");
            assert_eq!(profile.prompt_text, "CLIENT");
        }
    }

    #[test]
    fn resolution_is_stable_across_calls() {
        let resolver = resolver();
        let actor = Actor::guest().with_id("ryan").with_role("guest");
        let first = resolver.resolve(&actor);
        for _ in 0..10 {
            assert_eq!(resolver.resolve(&actor), first);
        }
    }

    #[test]
    fn builds_from_config() {
        let config = PersonaConfig {
            executive_ids: vec!["ceo".to_string()],
            ..PersonaConfig::default()
        };
        let resolver = PersonaResolver::from_config(&config);
        let profile = resolver.resolve(&Actor::guest().with_id("CEO"));
        assert_eq!(profile.tier, Tier::Executive);
        assert_eq!(profile.prompt_text, config.executive_prompt);
    }
}
