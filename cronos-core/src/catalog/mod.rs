//! Catalog Manager: lifecycle of Universes, Characters and Adventures.
//!
//! Aggregates are graph nodes keyed by `id` with ownership links from their
//! user:
//!
//! ```text
//! (User)-[CREATED]->(Universe)        (User)-[CREATED]->(Character)
//! (User)-[PLAYS]->(Adventure)-[HAPPENS_IN]->(Universe)
//!                           \-[USES_TEMPLATE]->(Character)
//! ```
//!
//! Every write runs in a single graph transaction. Deleting a Universe takes
//! its Adventures and entities with it but only *unlinks* Character
//! templates; deleting a Character removes its ownership link and nothing
//! else.

pub mod aggregates;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{CronosError, ReadOutcome, Result};
use crate::graph::{Endpoint, GraphSession, GraphStore, LinkKind, NodeLabel, StoredNode};
use crate::ingestion::ContextIngestor;
use crate::types::ContextTriple;
use crate::vector::VectorMemoryStore;

pub use aggregates::{Adventure, Aggregate, Character, Universe};

/// Everything one user owns, each list read independently.
#[derive(Debug)]
pub struct Library {
    /// The user's universes.
    pub universes: ReadOutcome<Vec<Universe>>,
    /// The user's character templates.
    pub characters: ReadOutcome<Vec<Character>>,
    /// The user's adventures.
    pub adventures: ReadOutcome<Vec<Adventure>>,
}

impl Library {
    /// Whether all three lists were read successfully.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.universes.is_ok() && self.characters.is_ok() && self.adventures.is_ok()
    }
}

/// What a universe deletion removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniverseDeletion {
    /// Adventures deleted with the universe.
    pub adventures_removed: usize,
    /// Distinct character templates unlinked from those adventures.
    pub characters_unlinked: usize,
    /// Story entities removed (their relationships go with them).
    pub entities_removed: usize,
    /// Vector memories removed, when the vector store could be reached.
    pub memories_removed: Option<usize>,
}

/// Manages the aggregate roots stored in the knowledge graph.
#[derive(Debug)]
pub struct CatalogManager {
    graph: Arc<GraphStore>,
    ingestor: ContextIngestor,
    vector: Option<Arc<VectorMemoryStore>>,
}

impl CatalogManager {
    /// Create a catalog over `graph`.
    #[must_use]
    pub fn new(graph: Arc<GraphStore>) -> Self {
        Self {
            ingestor: ContextIngestor::new(Arc::clone(&graph)),
            graph,
            vector: None,
        }
    }

    /// Also purge a deleted universe's memories from `vector`.
    #[must_use]
    pub fn with_vector_store(mut self, vector: Arc<VectorMemoryStore>) -> Self {
        self.vector = Some(vector);
        self
    }

    // ------------------------------------------------------------------
    // Upserts
    // ------------------------------------------------------------------

    /// Create or update a universe.
    ///
    /// # Errors
    ///
    /// [`CronosError::Validation`] for blank fields or an id owned by another
    /// user; [`CronosError::NotConnected`] or database errors otherwise.
    pub fn upsert_universe(&self, universe: &Universe) -> Result<String> {
        universe.validate()?;
        self.graph.session(|session| {
            merge_owned(session, universe, LinkKind::Created)?;
            Ok(())
        })?;
        info!(universe = %universe.id, user = %universe.user_id, "Saved universe");
        Ok(universe.id.clone())
    }

    /// Create or update a character template.
    ///
    /// # Errors
    ///
    /// Same as [`upsert_universe`](Self::upsert_universe).
    pub fn upsert_character(&self, character: &Character) -> Result<String> {
        character.validate()?;
        self.graph.session(|session| {
            merge_owned(session, character, LinkKind::Created)?;
            Ok(())
        })?;
        info!(character = %character.id, user = %character.user_id, "Saved character");
        Ok(character.id.clone())
    }

    /// Create or update an adventure, linking it to its universe and
    /// character template.
    ///
    /// Both references are resolved before anything is written; if either
    /// is missing the write is rejected and no adventure node is created.
    ///
    /// # Errors
    ///
    /// [`CronosError::ReferenceNotFound`] for an unresolved universe or
    /// character, plus everything [`upsert_universe`](Self::upsert_universe)
    /// can return.
    pub fn upsert_adventure(&self, adventure: &Adventure) -> Result<String> {
        adventure.validate()?;
        self.graph.session(|session| {
            resolve_reference(session, NodeLabel::Universe, &adventure.universe_id, &adventure.user_id)?;
            resolve_reference(session, NodeLabel::Character, &adventure.character_id, &adventure.user_id)?;

            merge_owned(session, adventure, LinkKind::Plays)?;

            let node = Endpoint::new(NodeLabel::Adventure, &adventure.id);
            session.delete_links_from(node, LinkKind::HappensIn)?;
            session.delete_links_from(node, LinkKind::UsesTemplate)?;
            session.merge_link(
                node,
                LinkKind::HappensIn,
                Endpoint::new(NodeLabel::Universe, &adventure.universe_id),
            )?;
            session.merge_link(
                node,
                LinkKind::UsesTemplate,
                Endpoint::new(NodeLabel::Character, &adventure.character_id),
            )?;
            Ok(())
        })?;
        info!(
            adventure = %adventure.id,
            universe = %adventure.universe_id,
            character = %adventure.character_id,
            user = %adventure.user_id,
            "Saved adventure"
        );
        Ok(adventure.id.clone())
    }

    /// Save an adventure, then ingest the relation triples extracted from
    /// its latest narration into the adventure's universe.
    ///
    /// The adventure write and the context ingestion are separate store
    /// calls: if ingestion fails the adventure stays saved and the ingestion
    /// error is returned.
    ///
    /// # Errors
    ///
    /// Anything [`upsert_adventure`](Self::upsert_adventure) or
    /// [`ContextIngestor::ingest_context`] returns.
    pub fn upsert_adventure_with_context(
        &self,
        adventure: &Adventure,
        triples: &[ContextTriple],
    ) -> Result<usize> {
        self.upsert_adventure(adventure)?;
        self.ingestor
            .ingest_context(triples, &adventure.universe_id, &adventure.user_id)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Look up one universe owned by `user_id`.
    ///
    /// # Errors
    ///
    /// [`CronosError::NotFound`] on a miss.
    pub fn get_universe(&self, id: &str, user_id: &str) -> Result<Universe> {
        self.get(id, user_id)
    }

    /// Look up one character template owned by `user_id`.
    ///
    /// Unlinked templates are still returned; adventures keep using them.
    ///
    /// # Errors
    ///
    /// [`CronosError::NotFound`] on a miss.
    pub fn get_character(&self, id: &str, user_id: &str) -> Result<Character> {
        self.get(id, user_id)
    }

    /// Look up one adventure owned by `user_id`.
    ///
    /// # Errors
    ///
    /// [`CronosError::NotFound`] on a miss.
    pub fn get_adventure(&self, id: &str, user_id: &str) -> Result<Adventure> {
        self.get(id, user_id)
    }

    fn get<A: Aggregate>(&self, id: &str, user_id: &str) -> Result<A> {
        let node = self.graph.session(|session| session.node(A::LABEL, id))?;
        match node {
            Some(node) if node.user_id == user_id => decode(&node),
            _ => Err(CronosError::NotFound {
                kind: A::kind(),
                id: id.to_string(),
            }),
        }
    }

    /// Everything `user_id` owns. A failure in one list does not hide the
    /// others, and is never reported as an empty success.
    #[must_use]
    pub fn list_for_user(&self, user_id: &str) -> Library {
        let library = Library {
            universes: self.list_owned(user_id, LinkKind::Created),
            characters: self.list_owned(user_id, LinkKind::Created),
            adventures: self.list_owned(user_id, LinkKind::Plays),
        };
        if !library.is_complete() {
            warn!(user = %user_id, "Library listing incomplete");
        }
        library
    }

    fn list_owned<A: Aggregate>(&self, user_id: &str, kind: LinkKind) -> ReadOutcome<Vec<A>> {
        let result = self.graph.session(|session| {
            session
                .linked_from_user(user_id, kind, A::LABEL)?
                .iter()
                .map(decode)
                .collect::<Result<Vec<A>>>()
        });
        if let Err(err) = &result {
            warn!(user = %user_id, kind = A::kind(), error = %err, "Library read failed");
        }
        result.into()
    }

    // ------------------------------------------------------------------
    // Deletes
    // ------------------------------------------------------------------

    /// Delete a universe with its adventures and story entities.
    ///
    /// Character templates used by the deleted adventures are unlinked and
    /// kept. The universe's vector memories are purged afterwards as a
    /// separate, best-effort store call.
    ///
    /// # Errors
    ///
    /// [`CronosError::NotFound`] if the universe does not exist for
    /// `user_id`; [`CronosError::NotConnected`] or database errors otherwise.
    pub fn delete_universe(&self, id: &str, user_id: &str) -> Result<UniverseDeletion> {
        let mut deletion = self.graph.session(|session| {
            require_owned(session, NodeLabel::Universe, id, user_id)?;
            let mut deletion = UniverseDeletion::default();

            let mut characters = Vec::new();
            for adventure in session.nodes_in_universe(NodeLabel::Adventure, id, user_id)? {
                let node = Endpoint::new(NodeLabel::Adventure, &adventure.id);
                for character in session.targets_of(node, LinkKind::UsesTemplate, NodeLabel::Character)? {
                    if !characters.contains(&character) {
                        characters.push(character);
                    }
                }
                session.detach_delete(NodeLabel::Adventure, &adventure.id)?;
                deletion.adventures_removed += 1;
            }
            deletion.characters_unlinked = characters.len();
            deletion.entities_removed = session.delete_universe_entities(id, user_id)?;
            session.detach_delete(NodeLabel::Universe, id)?;
            Ok(deletion)
        })?;

        if let Some(vector) = &self.vector {
            match vector.delete_universe(user_id, id) {
                Ok(removed) => deletion.memories_removed = Some(removed),
                Err(err) => warn!(universe = %id, error = %err, "Universe memories not purged"),
            }
        }

        info!(
            universe = %id,
            user = %user_id,
            adventures = deletion.adventures_removed,
            characters_unlinked = deletion.characters_unlinked,
            entities = deletion.entities_removed,
            "Deleted universe"
        );
        Ok(deletion)
    }

    /// Remove a character template from `user_id`'s library.
    ///
    /// Only the ownership link goes; the template node stays so existing
    /// adventures keep resolving it.
    ///
    /// # Errors
    ///
    /// [`CronosError::NotFound`] if the character is not in the library.
    pub fn delete_character(&self, id: &str, user_id: &str) -> Result<()> {
        self.graph.session(|session| {
            require_owned(session, NodeLabel::Character, id, user_id)?;
            let unlinked = session.delete_link(
                Endpoint::new(NodeLabel::User, user_id),
                LinkKind::Created,
                Endpoint::new(NodeLabel::Character, id),
            )?;
            if !unlinked {
                return Err(CronosError::NotFound {
                    kind: "Character",
                    id: id.to_string(),
                });
            }
            Ok(())
        })?;
        info!(character = %id, user = %user_id, "Unlinked character template");
        Ok(())
    }

    /// Delete an adventure and its links.
    ///
    /// # Errors
    ///
    /// [`CronosError::NotFound`] if the adventure does not exist for `user_id`.
    pub fn delete_adventure(&self, id: &str, user_id: &str) -> Result<()> {
        self.graph.session(|session| {
            require_owned(session, NodeLabel::Adventure, id, user_id)?;
            session.detach_delete(NodeLabel::Adventure, id)?;
            Ok(())
        })?;
        info!(adventure = %id, user = %user_id, "Deleted adventure");
        Ok(())
    }

    /// The context ingestion pipeline bound to this catalog's graph.
    #[must_use]
    pub fn ingestor(&self) -> &ContextIngestor {
        &self.ingestor
    }
}

/// Merge an aggregate node and its ownership link from the user.
fn merge_owned<A: Aggregate>(session: &GraphSession<'_>, aggregate: &A, ownership: LinkKind) -> Result<()> {
    if let Some(existing) = session.node(A::LABEL, aggregate.id())? {
        if existing.user_id != aggregate.user_id() {
            return Err(CronosError::Validation(format!(
                "{} `{}` belongs to another user",
                A::kind(),
                aggregate.id()
            )));
        }
    }

    let props = serde_json::to_string(aggregate)?;
    session.merge_user(aggregate.user_id())?;
    session.merge_node(A::LABEL, aggregate.id(), aggregate.user_id(), aggregate.universe_id(), &props)?;
    session.merge_link(
        Endpoint::new(NodeLabel::User, aggregate.user_id()),
        ownership,
        Endpoint::new(A::LABEL, aggregate.id()),
    )?;
    debug!(kind = A::kind(), id = %aggregate.id(), "Merged aggregate node");
    Ok(())
}

fn resolve_reference(session: &GraphSession<'_>, label: NodeLabel, id: &str, user_id: &str) -> Result<()> {
    match session.node(label, id)? {
        Some(node) if node.user_id == user_id => Ok(()),
        _ => Err(CronosError::ReferenceNotFound {
            kind: label.as_str(),
            id: id.to_string(),
        }),
    }
}

fn require_owned(session: &GraphSession<'_>, label: NodeLabel, id: &str, user_id: &str) -> Result<()> {
    match session.node(label, id)? {
        Some(node) if node.user_id == user_id => Ok(()),
        _ => Err(CronosError::NotFound {
            kind: label.as_str(),
            id: id.to_string(),
        }),
    }
}

fn decode<A: Aggregate>(node: &StoredNode) -> Result<A> {
    Ok(serde_json::from_str(&node.props)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GraphConfig, IN_MEMORY};

    fn catalog() -> CatalogManager {
        let config = GraphConfig {
            path: IN_MEMORY.to_string(),
            ..GraphConfig::default()
        };
        CatalogManager::new(Arc::new(GraphStore::open(&config).expect("open")))
    }

    fn seeded() -> CatalogManager {
        let catalog = catalog();
        catalog.upsert_universe(&Universe::new("w1", "u1", "Eldoria")).expect("universe");
        catalog.upsert_character(&Character::new("c1", "u1", "Aria")).expect("character");
        catalog
    }

    fn adventures(catalog: &CatalogManager, user: &str) -> Vec<Adventure> {
        match catalog.list_for_user(user).adventures {
            ReadOutcome::Ok(list) => list,
            other => panic!("listing failed: {other:?}"),
        }
    }

    #[test]
    fn upsert_universe_twice_keeps_one_node_with_latest_fields() {
        let catalog = catalog();
        let mut universe = Universe::new("w1", "u1", "Eldoria");
        catalog.upsert_universe(&universe).expect("first");
        universe.name = "Eldoria Reborn".into();
        universe.genre = "grimdark".into();
        catalog.upsert_universe(&universe).expect("second");

        let ReadOutcome::Ok(universes) = catalog.list_for_user("u1").universes else {
            panic!("listing failed");
        };
        assert_eq!(universes.len(), 1);
        assert_eq!(universes[0].name, "Eldoria Reborn");
        assert_eq!(universes[0].genre, "grimdark");
    }

    #[test]
    fn adventure_with_missing_universe_is_rejected() {
        let catalog = seeded();
        let err = catalog
            .upsert_adventure(&Adventure::new("a1", "u1", "missing", "c1", "Quest"))
            .expect_err("reject");
        assert!(matches!(err, CronosError::ReferenceNotFound { kind: "Universe", .. }));
        assert!(matches!(
            catalog.get_adventure("a1", "u1"),
            Err(CronosError::NotFound { .. })
        ));
    }

    #[test]
    fn adventure_with_missing_character_is_rejected() {
        let catalog = seeded();
        let err = catalog
            .upsert_adventure(&Adventure::new("a1", "u1", "w1", "ghost", "Quest"))
            .expect_err("reject");
        assert!(matches!(err, CronosError::ReferenceNotFound { kind: "Character", .. }));
        assert!(adventures(&catalog, "u1").is_empty());
    }

    #[test]
    fn adventure_links_to_universe_and_character() {
        let catalog = seeded();
        catalog
            .upsert_adventure(&Adventure::new("a1", "u1", "w1", "c1", "Quest"))
            .expect("adventure");
        let linked = catalog
            .graph
            .session(|s| {
                let node = Endpoint::new(NodeLabel::Adventure, "a1");
                Ok((
                    s.targets_of(node, LinkKind::HappensIn, NodeLabel::Universe)?,
                    s.targets_of(node, LinkKind::UsesTemplate, NodeLabel::Character)?,
                ))
            })
            .expect("links");
        assert_eq!(linked, (vec!["w1".to_string()], vec!["c1".to_string()]));
    }

    #[test]
    fn moving_adventure_relinks_universe() {
        let catalog = seeded();
        catalog.upsert_universe(&Universe::new("w2", "u1", "Frostmarch")).expect("w2");
        let mut adventure = Adventure::new("a1", "u1", "w1", "c1", "Quest");
        catalog.upsert_adventure(&adventure).expect("first");
        adventure.universe_id = "w2".into();
        catalog.upsert_adventure(&adventure).expect("second");

        let universes = catalog
            .graph
            .session(|s| {
                s.targets_of(
                    Endpoint::new(NodeLabel::Adventure, "a1"),
                    LinkKind::HappensIn,
                    NodeLabel::Universe,
                )
            })
            .expect("links");
        assert_eq!(universes, vec!["w2".to_string()]);
    }

    #[test]
    fn delete_universe_cascades_but_keeps_characters() {
        let catalog = seeded();
        catalog.upsert_universe(&Universe::new("w2", "u1", "Frostmarch")).expect("w2");
        catalog.upsert_adventure(&Adventure::new("a1", "u1", "w1", "c1", "Quest")).expect("a1");
        catalog.upsert_adventure(&Adventure::new("a2", "u1", "w1", "c1", "Sequel")).expect("a2");
        catalog.upsert_adventure(&Adventure::new("a3", "u1", "w2", "c1", "Elsewhere")).expect("a3");

        let deletion = catalog.delete_universe("w1", "u1").expect("delete");
        assert_eq!(deletion.adventures_removed, 2);
        assert_eq!(deletion.characters_unlinked, 1);

        let library = catalog.list_for_user("u1");
        let ReadOutcome::Ok(characters) = library.characters else { panic!("characters") };
        assert_eq!(characters.len(), 1);
        let ReadOutcome::Ok(remaining) = library.adventures else { panic!("adventures") };
        assert_eq!(remaining.iter().map(|a| a.id.as_str()).collect::<Vec<_>>(), vec!["a3"]);
        assert!(catalog.get_universe("w1", "u1").is_err());
    }

    #[test]
    fn delete_character_only_unlinks() {
        let catalog = seeded();
        catalog.upsert_adventure(&Adventure::new("a1", "u1", "w1", "c1", "Quest")).expect("a1");
        catalog.delete_character("c1", "u1").expect("delete");

        let ReadOutcome::Ok(characters) = catalog.list_for_user("u1").characters else {
            panic!("characters")
        };
        assert!(characters.is_empty());
        // Template persists and the adventure still resolves it.
        assert_eq!(catalog.get_character("c1", "u1").expect("template").name, "Aria");
        assert_eq!(adventures(&catalog, "u1").len(), 1);
        assert!(matches!(
            catalog.delete_character("c1", "u1"),
            Err(CronosError::NotFound { .. })
        ));
    }

    #[test]
    fn delete_adventure_removes_only_that_adventure() {
        let catalog = seeded();
        catalog.upsert_adventure(&Adventure::new("a1", "u1", "w1", "c1", "Quest")).expect("a1");
        catalog.delete_adventure("a1", "u1").expect("delete");
        assert!(adventures(&catalog, "u1").is_empty());
        assert!(catalog.get_universe("w1", "u1").is_ok());
        assert!(catalog.get_character("c1", "u1").is_ok());
    }

    #[test]
    fn other_users_cannot_touch_or_see_aggregates() {
        let catalog = seeded();
        assert!(matches!(
            catalog.upsert_universe(&Universe::new("w1", "u2", "Hijack")),
            Err(CronosError::Validation(_))
        ));
        assert!(matches!(
            catalog.delete_universe("w1", "u2"),
            Err(CronosError::NotFound { .. })
        ));
        assert!(matches!(
            catalog.upsert_adventure(&Adventure::new("a9", "u2", "w1", "c1", "Trespass")),
            Err(CronosError::ReferenceNotFound { .. })
        ));
        let ReadOutcome::Ok(universes) = catalog.list_for_user("u2").universes else {
            panic!("universes")
        };
        assert!(universes.is_empty());
    }

    #[test]
    fn disconnected_graph_reports_each_list_separately() {
        let catalog = CatalogManager::new(Arc::new(GraphStore::disconnected(&GraphConfig::default())));
        let library = catalog.list_for_user("u1");
        assert!(!library.is_complete());
        assert!(matches!(library.universes, ReadOutcome::NotConnected));
        assert!(matches!(library.characters, ReadOutcome::NotConnected));
        assert!(matches!(
            catalog.upsert_universe(&Universe::new("w1", "u1", "Eldoria")),
            Err(CronosError::NotConnected(_))
        ));
    }

    #[test]
    fn context_is_ingested_into_adventure_universe() {
        let catalog = seeded();
        let count = catalog
            .upsert_adventure_with_context(
                &Adventure::new("a1", "u1", "w1", "c1", "Quest"),
                &[ContextTriple::new("Aria", "ALLY_OF", "Borin")],
            )
            .expect("save");
        assert_eq!(count, 1);
        let edges = catalog.graph.query_neighbors("Aria", "w1", "u1", 1, None);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].object, "Borin");
    }

    #[test]
    fn delete_universe_removes_its_entities() {
        let catalog = seeded();
        catalog
            .ingestor()
            .ingest_context(&[ContextTriple::new("Dragon", "GUARDS", "Castle")], "w1", "u1")
            .expect("ingest");
        let deletion = catalog.delete_universe("w1", "u1").expect("delete");
        assert_eq!(deletion.entities_removed, 2);
        assert!(catalog.graph.query_neighbors("Dragon", "w1", "u1", 1, None).is_empty());
    }
}
