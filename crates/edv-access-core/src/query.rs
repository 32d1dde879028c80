//! Plaintext find queries.
//!
//! A [`FindQuery`] is expanded into a list of equality clauses before it is
//! blinded. Clauses are alternatives (OR); terms within a clause must all
//! match (AND). `id` and a single `type` are added to every clause; a list of
//! types fans each clause out into one clause per type.

use std::collections::BTreeMap;

use serde_json::Value;

/// Field holding the application-level id of a document's content.
pub const CONTENT_ID: &str = "content.id";
/// Field holding the content type.
pub const CONTENT_TYPE: &str = "content.type";

/// Filter on `content.type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeFilter {
    One(String),
    Any(Vec<String>),
}

/// A plaintext query over dot-addressed document fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    pub id: Option<String>,
    pub content_type: Option<TypeFilter>,
    pub equals: Vec<BTreeMap<String, Value>>,
    pub has: Vec<String>,
}

impl FindQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self::new().id(id)
    }

    pub fn by_type(content_type: impl Into<String>) -> Self {
        Self::new().content_type(content_type)
    }

    /// Match any of the given types. An empty list leaves the type unfiltered.
    pub fn by_types<I, T>(types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let types: Vec<String> = types.into_iter().map(Into::into).collect();
        Self {
            content_type: (!types.is_empty()).then_some(TypeFilter::Any(types)),
            ..Self::default()
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(TypeFilter::One(content_type.into()));
        self
    }

    /// Add an alternative clause of field/value terms.
    pub fn equals<I, K>(mut self, clause: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.equals
            .push(clause.into_iter().map(|(k, v)| (k.into(), v)).collect());
        self
    }

    pub fn has(mut self, field: impl Into<String>) -> Self {
        self.has.push(field.into());
        self
    }

    /// Whether no selector at all was given.
    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.content_type.is_none()
            && self.equals.is_empty()
            && self.has.is_empty()
    }

    /// Expand into OR-ed equality clauses.
    ///
    /// An empty result means the query constrains only `has`.
    pub fn clauses(&self) -> Vec<BTreeMap<String, Value>> {
        let mut clauses = if self.equals.is_empty() {
            vec![BTreeMap::new()]
        } else {
            self.equals.clone()
        };

        if let Some(id) = &self.id {
            for clause in &mut clauses {
                clause.insert(CONTENT_ID.to_string(), Value::String(id.clone()));
            }
        }

        match &self.content_type {
            Some(TypeFilter::One(t)) => {
                for clause in &mut clauses {
                    clause.insert(CONTENT_TYPE.to_string(), Value::String(t.clone()));
                }
            }
            Some(TypeFilter::Any(types)) if !types.is_empty() => {
                clauses = clauses
                    .iter()
                    .flat_map(|clause| {
                        types.iter().map(move |t| {
                            let mut expanded = clause.clone();
                            expanded.insert(CONTENT_TYPE.to_string(), Value::String(t.clone()));
                            expanded
                        })
                    })
                    .collect();
            }
            _ => {}
        }

        clauses.retain(|clause| !clause.is_empty());
        clauses
    }

    /// Every field name the query refers to.
    pub fn fields(&self) -> impl Iterator<Item = String> + '_ {
        let clause_fields = self.clauses().into_iter().flat_map(|c| c.into_keys());
        clause_fields.chain(self.has.iter().cloned())
    }
}
