//! Aggregate roots: Universe, Character, Adventure.
//!
//! Each aggregate is a typed structure with a fixed set of known fields plus
//! an `extra` map that carries forward-compatible, unvalidated data. Field
//! names on the wire are camelCase (`userId`, `currentStep`, ...).

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{CronosError, Result};
use crate::graph::NodeLabel;
use crate::types::Properties;

/// Behaviour shared by the three aggregate kinds.
pub trait Aggregate: Serialize + for<'de> Deserialize<'de> {
    /// Graph label the aggregate is stored under.
    const LABEL: NodeLabel;

    /// Identity key.
    fn id(&self) -> &str;

    /// Owning user.
    fn user_id(&self) -> &str;

    /// Universe scope, for universe-scoped aggregates.
    fn universe_id(&self) -> Option<&str> {
        None
    }

    /// Check known fields at the boundary.
    ///
    /// # Errors
    ///
    /// Returns [`CronosError::Validation`] naming the first blank field.
    fn validate(&self) -> Result<()>;

    /// Aggregate kind name used in errors.
    fn kind() -> &'static str {
        Self::LABEL.as_str()
    }
}

fn require(value: &str, field: &str, kind: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CronosError::Validation(format!("{kind} `{field}` must not be empty")));
    }
    Ok(())
}

/// Treat `null` the same as a missing field.
fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A fictional universe owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Universe {
    /// Identity key.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Display name.
    pub name: String,
    /// Free-text description.
    #[serde(default, deserialize_with = "nullable")]
    pub description: String,
    /// Genre label.
    #[serde(default, deserialize_with = "nullable")]
    pub genre: String,
    /// Cover image reference.
    #[serde(default, deserialize_with = "nullable")]
    pub image: String,
    /// Client-supplied creation timestamp.
    #[serde(default, deserialize_with = "nullable")]
    pub created_at: String,
    /// Unvalidated additional fields.
    #[serde(flatten)]
    pub extra: Properties,
}

impl Universe {
    /// A universe with only the required fields set.
    #[must_use]
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            name: name.into(),
            description: String::new(),
            genre: String::new(),
            image: String::new(),
            created_at: String::new(),
            extra: Properties::new(),
        }
    }
}

impl Aggregate for Universe {
    const LABEL: NodeLabel = NodeLabel::Universe;

    fn id(&self) -> &str {
        &self.id
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn validate(&self) -> Result<()> {
        require(&self.id, "id", "Universe")?;
        require(&self.user_id, "userId", "Universe")?;
        require(&self.name, "name", "Universe")
    }
}

/// A reusable character template. Not scoped to any universe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    /// Identity key.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Display name.
    pub name: String,
    /// Free-text description.
    #[serde(default, deserialize_with = "nullable")]
    pub description: String,
    /// Archetype (class, role).
    #[serde(default, deserialize_with = "nullable")]
    pub archetype: String,
    /// Portrait reference.
    #[serde(default, deserialize_with = "nullable")]
    pub image: String,
    /// Game statistics.
    #[serde(default, deserialize_with = "nullable")]
    pub stats: Properties,
    /// Client-supplied creation timestamp.
    #[serde(default, deserialize_with = "nullable")]
    pub created_at: String,
    /// Unvalidated additional fields.
    #[serde(flatten)]
    pub extra: Properties,
}

impl Character {
    /// A character with only the required fields set.
    #[must_use]
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            name: name.into(),
            description: String::new(),
            archetype: String::new(),
            image: String::new(),
            stats: Properties::new(),
            created_at: String::new(),
            extra: Properties::new(),
        }
    }
}

impl Aggregate for Character {
    const LABEL: NodeLabel = NodeLabel::Character;

    fn id(&self) -> &str {
        &self.id
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn validate(&self) -> Result<()> {
        require(&self.id, "id", "Character")?;
        require(&self.user_id, "userId", "Character")?;
        require(&self.name, "name", "Character")
    }
}

/// A play-through of one character template in one universe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Adventure {
    /// Identity key.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Universe the adventure happens in.
    pub universe_id: String,
    /// Character template being played.
    pub character_id: String,
    /// Display name.
    pub name: String,
    /// Free-text description.
    #[serde(default, deserialize_with = "nullable")]
    pub description: String,
    /// Current narrative step.
    #[serde(default, deserialize_with = "nullable")]
    pub current_step: String,
    /// Client-supplied creation timestamp.
    #[serde(default, deserialize_with = "nullable")]
    pub created_at: String,
    /// Chat transcript. Accepted on input, never stored in the graph.
    #[serde(default, deserialize_with = "nullable", skip_serializing)]
    pub messages: Vec<Value>,
    /// Unvalidated additional fields.
    #[serde(flatten)]
    pub extra: Properties,
}

impl Adventure {
    /// An adventure with only the required fields set.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        universe_id: impl Into<String>,
        character_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            universe_id: universe_id.into(),
            character_id: character_id.into(),
            name: name.into(),
            description: String::new(),
            current_step: String::new(),
            created_at: String::new(),
            messages: Vec::new(),
            extra: Properties::new(),
        }
    }
}

impl Aggregate for Adventure {
    const LABEL: NodeLabel = NodeLabel::Adventure;

    fn id(&self) -> &str {
        &self.id
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn universe_id(&self) -> Option<&str> {
        Some(&self.universe_id)
    }

    fn validate(&self) -> Result<()> {
        require(&self.id, "id", "Adventure")?;
        require(&self.user_id, "userId", "Adventure")?;
        require(&self.universe_id, "universeId", "Adventure")?;
        require(&self.character_id, "characterId", "Adventure")?;
        require(&self.name, "name", "Adventure")
    }
}
