//! Entity records and stable handles.
//!
//! Entities live in type-segmented arenas inside [`GraphStore`](crate::GraphStore)
//! and refer to each other only through copyable handles. A handle is the
//! creation order of the entity within its arena, so a lower handle always
//! means an earlier entity; this is what makes survivor selection stable.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates a handle from its raw creation-order value.
            #[must_use]
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// Returns the raw creation-order value.
            #[must_use]
            pub const fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "/{}"), self.0)
            }
        }
    };
}

handle!(
    /// Handle of a [`BibliographicResource`].
    BrId,
    "br"
);
handle!(
    /// Handle of an [`AgentRole`].
    ArId,
    "ar"
);
handle!(
    /// Handle of a [`ResponsibleAgent`].
    RaId,
    "ra"
);
handle!(
    /// Handle of an [`Identifier`](crate::Identifier).
    IdentifierId,
    "id"
);

/// The closed set of entity kinds handled by the matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Bibliographic resource
    Resource,
    /// Agent role
    Role,
    /// Responsible agent
    Agent,
    /// Identifier
    Identifier,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource => write!(f, "br"),
            Self::Role => write!(f, "ar"),
            Self::Agent => write!(f, "ra"),
            Self::Identifier => write!(f, "id"),
        }
    }
}

/// A handle to any entity in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityHandle {
    /// A bibliographic resource.
    Resource(BrId),
    /// An agent role.
    Role(ArId),
    /// A responsible agent.
    Agent(RaId),
    /// An identifier object.
    Identifier(IdentifierId),
}

impl EntityHandle {
    /// Returns the kind of entity this handle points at.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Resource(_) => EntityKind::Resource,
            Self::Role(_) => EntityKind::Role,
            Self::Agent(_) => EntityKind::Agent,
            Self::Identifier(_) => EntityKind::Identifier,
        }
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource(id) => write!(f, "{id}"),
            Self::Role(id) => write!(f, "{id}"),
            Self::Agent(id) => write!(f, "{id}"),
            Self::Identifier(id) => write!(f, "{id}"),
        }
    }
}

impl From<BrId> for EntityHandle {
    fn from(id: BrId) -> Self {
        Self::Resource(id)
    }
}

impl From<ArId> for EntityHandle {
    fn from(id: ArId) -> Self {
        Self::Role(id)
    }
}

impl From<RaId> for EntityHandle {
    fn from(id: RaId) -> Self {
        Self::Agent(id)
    }
}

impl From<IdentifierId> for EntityHandle {
    fn from(id: IdentifierId) -> Self {
        Self::Identifier(id)
    }
}

/// Type tag of a bibliographic resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BrType {
    /// Article in a journal
    JournalArticle,
    /// Journal issue
    Issue,
    /// Journal volume
    Volume,
    /// Journal
    Journal,
    /// Book
    Book,
    /// Chapter in a book
    BookChapter,
    /// Conference proceedings
    Proceedings,
    /// Paper in proceedings
    ProceedingsArticle,
    /// Any other type tag, kept verbatim
    Other(String),
}

impl BrType {
    /// Canonical name of the type tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::JournalArticle => "journal_article",
            Self::Issue => "issue",
            Self::Volume => "volume",
            Self::Journal => "journal",
            Self::Book => "book",
            Self::BookChapter => "book_chapter",
            Self::Proceedings => "proceedings",
            Self::ProceedingsArticle => "proceedings_article",
            Self::Other(name) => name,
        }
    }

    /// Returns true for the periodical container levels below a journal.
    #[must_use]
    pub const fn is_periodical_part(&self) -> bool {
        matches!(self, Self::Issue | Self::Volume)
    }
}

impl From<String> for BrType {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "journal_article" | "article" => Self::JournalArticle,
            "issue" => Self::Issue,
            "volume" => Self::Volume,
            "journal" => Self::Journal,
            "book" => Self::Book,
            "book_chapter" => Self::BookChapter,
            "proceedings" => Self::Proceedings,
            "proceedings_article" => Self::ProceedingsArticle,
            _ => Self::Other(value.trim().to_string()),
        }
    }
}

impl From<BrType> for String {
    fn from(kind: BrType) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for BrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role an agent plays on a resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleType {
    /// Author of the resource
    Author,
    /// Editor of the resource
    Editor,
    /// Publisher of the resource
    Publisher,
    /// Any other role, kept verbatim
    Other(String),
}

impl fmt::Display for RoleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Author => write!(f, "author"),
            Self::Editor => write!(f, "editor"),
            Self::Publisher => write!(f, "publisher"),
            Self::Other(name) => write!(f, "{name}"),
        }
    }
}

/// A bibliographic resource (article, issue, volume, journal, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BibliographicResource {
    /// Handle of this resource.
    pub id: BrId,

    /// Type tag (article, issue, journal, ...).
    pub kind: BrType,

    /// Title, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Agent roles owned by this resource, in insertion order.
    #[serde(default)]
    pub contributors: Vec<ArId>,

    /// Identifiers owned by this resource.
    #[serde(default)]
    pub identifiers: Vec<IdentifierId>,

    /// Container in the issue -> volume -> journal hierarchy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_of: Option<BrId>,
}

/// The link between a resource and the agent performing a role on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRole {
    /// Handle of this role.
    pub id: ArId,
    /// What the agent does on the resource.
    pub role: RoleType,
    /// The agent holding this role.
    pub held_by: RaId,
    /// The resource owning this role.
    pub resource: BrId,
    /// Identifiers owned by this role.
    #[serde(default)]
    pub identifiers: Vec<IdentifierId>,
}

/// A person or organization.
///
/// The roles referencing an agent are derived through
/// [`GraphStore::roles_held_by`](crate::GraphStore::roles_held_by) and never
/// stored on the agent itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsibleAgent {
    /// Handle of this agent.
    pub id: RaId,
    /// Display name, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Identifiers owned by this agent.
    #[serde(default)]
    pub identifiers: Vec<IdentifierId>,
}

/// Capability shared by the entity kinds that own identifiers.
///
/// Dispatch on the kind happens on [`EntityHandle`] in the graph and the
/// merge engine. This trait only provides the per-record pieces that every
/// kind needs: its handle, its identifier list and the attribute union.
pub trait Mergeable {
    /// Handle of this record.
    fn handle(&self) -> EntityHandle;

    /// Identifiers owned by this record.
    fn identifiers(&self) -> &[IdentifierId];

    /// Mutable access to the owned identifiers.
    fn identifiers_mut(&mut self) -> &mut Vec<IdentifierId>;

    /// Fills attributes this record lacks from an absorbed record.
    fn absorb_attributes(&mut self, absorbed: &Self);
}

impl Mergeable for BibliographicResource {
    fn handle(&self) -> EntityHandle {
        EntityHandle::Resource(self.id)
    }

    fn identifiers(&self) -> &[IdentifierId] {
        &self.identifiers
    }

    fn identifiers_mut(&mut self) -> &mut Vec<IdentifierId> {
        &mut self.identifiers
    }

    fn absorb_attributes(&mut self, absorbed: &Self) {
        if self.title.is_none() {
            self.title.clone_from(&absorbed.title);
        }
    }
}

impl Mergeable for AgentRole {
    fn handle(&self) -> EntityHandle {
        EntityHandle::Role(self.id)
    }

    fn identifiers(&self) -> &[IdentifierId] {
        &self.identifiers
    }

    fn identifiers_mut(&mut self) -> &mut Vec<IdentifierId> {
        &mut self.identifiers
    }

    fn absorb_attributes(&mut self, _absorbed: &Self) {}
}

impl Mergeable for ResponsibleAgent {
    fn handle(&self) -> EntityHandle {
        EntityHandle::Agent(self.id)
    }

    fn identifiers(&self) -> &[IdentifierId] {
        &self.identifiers
    }

    fn identifiers_mut(&mut self) -> &mut Vec<IdentifierId> {
        &mut self.identifiers
    }

    fn absorb_attributes(&mut self, absorbed: &Self) {
        if self.name.is_none() {
            self.name.clone_from(&absorbed.name);
        }
    }
}
