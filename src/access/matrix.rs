//! Declarative permission matrix: role -> entity -> set of CRUD actions.
//!
//! The matrix is built once at startup (from the built-in reference table or a JSON file)
//! and never mutated afterwards. Every lookup for an unknown role, entity or action is a
//! plain `false`; there is no error path at lookup time.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{Display, Formatter};
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static IDENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"));

/// True when `name` is safe to interpolate as a quoted SQL identifier.
pub fn is_identifier(name: &str) -> bool {
    name.len() <= 63 && IDENT_RE.is_match(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::Create, Action::Read, Action::Update, Action::Delete];

    /// Single-letter code used in matrix configuration and provenance rows.
    pub fn code(self) -> &'static str {
        match self {
            Action::Create => "C",
            Action::Read => "R",
            Action::Update => "U",
            Action::Delete => "D",
        }
    }

    /// Accepts the single-letter codes and the full names, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "c" | "create" => Some(Action::Create),
            "r" | "read" => Some(Action::Read),
            "u" | "update" => Some(Action::Update),
            "d" | "delete" => Some(Action::Delete),
            _ => None,
        }
    }

    fn bit(self) -> u8 {
        match self {
            Action::Create => 0b0001,
            Action::Read => 0b0010,
            Action::Update => 0b0100,
            Action::Delete => 0b1000,
        }
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Compact set of actions granted on one entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionSet(u8);

impl ActionSet {
    pub const EMPTY: ActionSet = ActionSet(0);

    pub fn all() -> Self {
        Action::ALL.into_iter().collect()
    }

    pub fn insert(&mut self, action: Action) {
        self.0 |= action.bit();
    }

    pub fn contains(self, action: Action) -> bool {
        self.0 & action.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Action> {
        Action::ALL.into_iter().filter(move |a| self.contains(*a))
    }

    /// Parse a code string such as `"CRU"`.
    fn from_codes(codes: &str) -> Option<Self> {
        let mut set = ActionSet::EMPTY;
        for c in codes.chars() {
            set.insert(Action::parse(c.encode_utf8(&mut [0u8; 4]))?);
        }
        Some(set)
    }
}

impl FromIterator<Action> for ActionSet {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        let mut set = ActionSet::EMPTY;
        for a in iter {
            set.insert(a);
        }
        set
    }
}

/// An entity name that has been checked against the matrix key set.
///
/// Only [`PermissionMatrix::resolve_entity`] hands these out, so holding one proves the
/// name is both a known entity and a plain SQL identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(String);

impl EntityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Primary key column by convention: `{entity}_id`.
    pub fn primary_key(&self) -> String {
        format!("{}_id", self.0)
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MatrixError {
    #[error("matrix file {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("matrix is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("role '{role}', entity '{entity}': unknown action code '{code}'")]
    UnknownAction { role: String, entity: String, code: String },
    #[error("entity name '{0}' is not a plain identifier")]
    InvalidEntity(String),
}

/// Reference grants of the service-centre deployment, kept literally as configured there
/// (including entities a role may read but nobody but the manager may write).
const REFERENCE: &[(&str, &[(&str, &str)])] = &[
    ("manager", &[
        ("client", "CRUD"), ("storage", "CRUD"), ("employee", "CRUD"), ("supplier", "CRUD"),
        ("equipment", "CRUD"), ("repair_request", "CRUD"), ("repair", "CRUD"), ("diagnosis", "CRUD"),
        ("quality_control", "CRUD"), ("component", "CRUD"), ("component_order", "CRUD"),
        ("order_detail", "CRUD"), ("equipment_report", "CRUD"), ("audit_log", "CRUD"),
    ]),
    ("db_admin", &[
        ("client", "R"), ("storage", "R"), ("employee", "R"), ("supplier", "R"), ("equipment", "R"),
        ("repair_request", "R"), ("repair", "R"), ("diagnosis", "R"), ("quality_control", "R"),
        ("component", "R"), ("component_order", "R"), ("order_detail", "R"), ("equipment_report", "R"),
        ("audit_log", "CRUD"),
    ]),
    ("technician", &[
        ("equipment", "R"), ("repair_request", "R"), ("repair", "CRU"), ("diagnosis", "R"),
        ("quality_control", "R"),
    ]),
    ("quality_control", &[("equipment", "R"), ("repair", "R"), ("quality_control", "CRU")]),
    ("diagnostics", &[("equipment", "R"), ("repair_request", "R"), ("diagnosis", "CRU")]),
    ("storage_operator", &[
        ("storage", "CRU"), ("component", "CRU"), ("component_order", "CRU"), ("order_detail", "CRU"),
    ]),
    ("intake_operator", &[("client", "CRU"), ("equipment", "CRU"), ("repair_request", "CRU")]),
    ("outtake_operator", &[("client", "R"), ("equipment", "R"), ("equipment_report", "CRU")]),
];

#[derive(Debug, Clone, Default)]
pub struct PermissionMatrix {
    grants: HashMap<String, HashMap<String, ActionSet>>,
    entities: BTreeSet<String>,
}

impl PermissionMatrix {
    /// Build from `(role, entity, actions)` triples. Entity names must be plain identifiers.
    pub fn from_grants<I, R, E>(grants: I) -> Result<Self, MatrixError>
    where
        I: IntoIterator<Item = (R, E, ActionSet)>,
        R: Into<String>,
        E: Into<String>,
    {
        let mut m = PermissionMatrix::default();
        for (role, entity, actions) in grants {
            let entity = entity.into();
            if !is_identifier(&entity) {
                return Err(MatrixError::InvalidEntity(entity));
            }
            m.entities.insert(entity.clone());
            let slot = m.grants.entry(role.into()).or_default().entry(entity).or_default();
            for a in actions.iter() {
                slot.insert(a);
            }
        }
        Ok(m)
    }

    /// The built-in reference matrix.
    pub fn reference() -> Self {
        let triples = REFERENCE.iter().flat_map(|(role, entries)| {
            entries.iter().map(move |(entity, codes)| {
                (*role, *entity, ActionSet::from_codes(codes).unwrap_or_default())
            })
        });
        Self::from_grants(triples).unwrap_or_default()
    }

    /// Parse `{"role": {"entity": ["C", "R", ...]}}`.
    pub fn from_json(text: &str) -> Result<Self, MatrixError> {
        let raw: BTreeMap<String, BTreeMap<String, Vec<String>>> = serde_json::from_str(text)?;
        let mut triples = Vec::new();
        for (role, entities) in raw {
            for (entity, codes) in entities {
                let mut set = ActionSet::EMPTY;
                for code in codes {
                    match Action::parse(&code) {
                        Some(a) => set.insert(a),
                        None => return Err(MatrixError::UnknownAction { role, entity, code }),
                    }
                }
                triples.push((role.clone(), entity, set));
            }
        }
        Self::from_grants(triples)
    }

    pub fn load(path: &Path) -> Result<Self, MatrixError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| MatrixError::Io { path: path.display().to_string(), source })?;
        Self::from_json(&text)
    }

    /// Deny-by-default lookup.
    pub fn allowed(&self, role: &str, entity: &str, action: Action) -> bool {
        self.actions(role, entity).contains(action)
    }

    pub fn actions(&self, role: &str, entity: &str) -> ActionSet {
        self.grants
            .get(role)
            .and_then(|m| m.get(entity))
            .copied()
            .unwrap_or(ActionSet::EMPTY)
    }

    /// Entities the role may read, sorted by name.
    pub fn readable_entities(&self, role: &str) -> Vec<&str> {
        let Some(m) = self.grants.get(role) else { return Vec::new() };
        let mut out: Vec<&str> = m
            .iter()
            .filter(|(_, set)| set.contains(Action::Read))
            .map(|(e, _)| e.as_str())
            .collect();
        out.sort_unstable();
        out
    }

    /// Union of entity names across all roles. This is the gateway allow-list.
    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().map(|s| s.as_str())
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.grants.keys().map(|s| s.as_str())
    }

    pub fn resolve_entity(&self, raw: &str) -> Option<EntityId> {
        self.entities.get(raw).map(|e| EntityId(e.clone()))
    }
}
