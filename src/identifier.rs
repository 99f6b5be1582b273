//! Identifiers and identifier schemes.
//!
//! An identifier is a `(scheme, literal)` pair such as `(doi, "10.1/x")`.
//! Matching in this crate is exact on that pair: two identifier objects with
//! the same [`IdentifierKey`] denote the same real-world identifier.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::IdentifierId;

/// Identifier scheme.
///
/// The set of schemes is open: anything that is not recognized is kept
/// verbatim in [`Scheme::Other`] and still takes part in exact matching.
///
/// # Examples
///
/// ```
/// use bibmatch::Scheme;
///
/// assert_eq!(Scheme::from("DOI"), Scheme::Doi);
/// assert_eq!(Scheme::from("ark").to_string(), "ark");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Scheme {
    /// Digital Object Identifier
    Doi,
    /// International Standard Serial Number
    Issn,
    /// International Standard Book Number
    Isbn,
    /// Open Researcher and Contributor ID
    Orcid,
    /// Virtual International Authority File
    Viaf,
    /// Wikidata QID
    Wikidata,
    /// Crossref member (publisher) ID
    Crossref,
    /// OpenAlex work/author/source ID
    OpenAlex,
    /// PubMed ID
    Pmid,
    /// PubMed Central ID
    Pmcid,
    /// Unrecognized scheme, preserved opaquely
    Other(String),
}

impl Scheme {
    /// Canonical lowercase name of the scheme.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Doi => "doi",
            Self::Issn => "issn",
            Self::Isbn => "isbn",
            Self::Orcid => "orcid",
            Self::Viaf => "viaf",
            Self::Wikidata => "wikidata",
            Self::Crossref => "crossref",
            Self::OpenAlex => "openalex",
            Self::Pmid => "pmid",
            Self::Pmcid => "pmcid",
            Self::Other(name) => name,
        }
    }

    /// Returns true if this scheme is one of the recognized catalogs.
    #[must_use]
    pub const fn is_recognized(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl From<&str> for Scheme {
    fn from(value: &str) -> Self {
        let trimmed = value.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "doi" => Self::Doi,
            "issn" => Self::Issn,
            "isbn" => Self::Isbn,
            "orcid" => Self::Orcid,
            "viaf" => Self::Viaf,
            "wikidata" => Self::Wikidata,
            "crossref" => Self::Crossref,
            "openalex" => Self::OpenAlex,
            "pmid" => Self::Pmid,
            "pmcid" => Self::Pmcid,
            _ => Self::Other(trimmed.to_string()),
        }
    }
}

impl From<String> for Scheme {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<Scheme> for String {
    fn from(scheme: Scheme) -> Self {
        scheme.as_str().to_string()
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The matching key of an identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdentifierKey {
    /// Scheme of the identifier.
    pub scheme: Scheme,
    /// Literal value, compared exactly.
    pub literal: String,
}

impl IdentifierKey {
    /// Creates a key from a scheme and literal.
    #[must_use]
    pub fn new(scheme: Scheme, literal: impl Into<String>) -> Self {
        Self {
            scheme,
            literal: literal.into(),
        }
    }
}

impl fmt::Display for IdentifierKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.literal)
    }
}

/// An identifier object stored in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    /// Stable handle of this identifier object.
    pub id: IdentifierId,
    /// Scheme of this identifier.
    pub scheme: Scheme,
    /// Literal value, trimmed.
    pub literal: String,
}

impl Identifier {
    /// Returns the matching key of this identifier.
    #[must_use]
    pub fn key(&self) -> IdentifierKey {
        IdentifierKey::new(self.scheme.clone(), self.literal.clone())
    }

    /// Returns true if this identifier has the given scheme and literal.
    #[must_use]
    pub fn matches(&self, key: &IdentifierKey) -> bool {
        self.scheme == key.scheme && self.literal == key.literal
    }
}
