//! Domain entities: towns, districts, streets and structures.
//!
//! The entities form a strict containment tree:
//!
//! ```text
//! Town ─┬─ District ─┬─ Street ── Structure
//!       │            └─────────── Structure
//! ```
//!
//! Each entity names its parent by stable identifier only; the tree is
//! rebuilt per query from those references.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::{KnkError, Result};
use crate::traits::DomainDataProvider;

/// Stable identifier of a domain entity, unique within its [`DomainType`].
pub type DomainId = u32;

fn default_true() -> bool {
    true
}

// ═══════════════════════════════════════════════════════════════════════════════
// DOMAIN TYPE & REFERENCE
// ═══════════════════════════════════════════════════════════════════════════════

/// Kind of domain entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainType {
    /// Root of the hierarchy
    Town,
    /// Belongs to exactly one town
    District,
    /// Belongs to exactly one district
    Street,
    /// Belongs to a street or directly to a district
    Structure,
}

impl DomainType {
    /// All domain types, root first.
    pub const ALL: [DomainType; 4] = [
        DomainType::Town,
        DomainType::District,
        DomainType::Street,
        DomainType::Structure,
    ];

    /// Distance from the root of the hierarchy (town = 0).
    pub fn rank(self) -> u8 {
        match self {
            DomainType::Town => 0,
            DomainType::District => 1,
            DomainType::Street => 2,
            DomainType::Structure => 3,
        }
    }

    /// Lowercase name used in identifiers and serialization.
    pub fn as_str(self) -> &'static str {
        match self {
            DomainType::Town => "town",
            DomainType::District => "district",
            DomainType::Street => "street",
            DomainType::Structure => "structure",
        }
    }

    /// Returns true if an entity of this type may name `parent` as its parent.
    pub fn accepts_parent(self, parent: DomainType) -> bool {
        matches!(
            (self, parent),
            (DomainType::District, DomainType::Town)
                | (DomainType::Street, DomainType::District)
                | (DomainType::Structure, DomainType::Street)
                | (DomainType::Structure, DomainType::District)
        )
    }
}

impl fmt::Display for DomainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainType {
    type Err = KnkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "town" => Ok(DomainType::Town),
            "district" => Ok(DomainType::District),
            "street" => Ok(DomainType::Street),
            "structure" => Ok(DomainType::Structure),
            other => Err(KnkError::InvalidQuery(format!("unknown domain type '{}'", other))),
        }
    }
}

/// Typed pointer to one domain entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DomainRef {
    /// Kind of entity
    pub domain_type: DomainType,
    /// Identifier within that kind
    pub id: DomainId,
}

impl DomainRef {
    /// Creates a reference.
    pub const fn new(domain_type: DomainType, id: DomainId) -> Self {
        Self { domain_type, id }
    }

    /// Reference to a town.
    pub const fn town(id: DomainId) -> Self {
        Self::new(DomainType::Town, id)
    }

    /// Reference to a district.
    pub const fn district(id: DomainId) -> Self {
        Self::new(DomainType::District, id)
    }

    /// Reference to a street.
    pub const fn street(id: DomainId) -> Self {
        Self::new(DomainType::Street, id)
    }

    /// Reference to a structure.
    pub const fn structure(id: DomainId) -> Self {
        Self::new(DomainType::Structure, id)
    }
}

impl fmt::Display for DomainRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.domain_type, self.id)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENTITIES
// ═══════════════════════════════════════════════════════════════════════════════

/// A town: the root of the containment tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Town {
    /// Town identifier
    pub id: DomainId,
    /// Display name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
    /// External region identifier bound to this town
    #[serde(default)]
    pub region_id: Option<String>,
    /// Whether entering is permitted
    #[serde(default = "default_true")]
    pub allow_entry: bool,
    /// Whether leaving is permitted
    #[serde(default = "default_true")]
    pub allow_exit: bool,
}

/// A district inside a town.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct District {
    /// District identifier
    pub id: DomainId,
    /// Display name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
    /// External region identifier bound to this district
    #[serde(default)]
    pub region_id: Option<String>,
    /// Whether entering is permitted
    #[serde(default = "default_true")]
    pub allow_entry: bool,
    /// Whether leaving is permitted
    #[serde(default = "default_true")]
    pub allow_exit: bool,
    /// Owning town
    pub town_id: DomainId,
}

/// A street inside a district.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Street {
    /// Street identifier
    pub id: DomainId,
    /// Display name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
    /// External region identifier, if the street has one
    #[serde(default)]
    pub region_id: Option<String>,
    /// Whether entering is permitted
    #[serde(default = "default_true")]
    pub allow_entry: bool,
    /// Whether leaving is permitted
    #[serde(default = "default_true")]
    pub allow_exit: bool,
    /// Owning district
    pub district_id: DomainId,
}

/// A structure, placed on a street or directly in a district.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Structure {
    /// Structure identifier
    pub id: DomainId,
    /// Display name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
    /// External region identifier bound to this structure
    #[serde(default)]
    pub region_id: Option<String>,
    /// Whether entering is permitted
    #[serde(default = "default_true")]
    pub allow_entry: bool,
    /// Whether leaving is permitted
    #[serde(default = "default_true")]
    pub allow_exit: bool,
    /// Street the structure fronts, if any
    #[serde(default)]
    pub street_id: Option<DomainId>,
    /// District the structure lies in
    pub district_id: DomainId,
    /// House number on its street
    #[serde(default)]
    pub house_number: Option<u32>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECORD TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Common view over the four entity kinds.
///
/// Domain caches are generic over this trait: it binds an entity type to its
/// [`DomainType`], its parent reference, and the provider call that loads it.
pub trait DomainRecord: Clone + Send + Sync + 'static {
    /// The kind of entity this record is.
    const DOMAIN_TYPE: DomainType;

    /// Entity identifier.
    fn id(&self) -> DomainId;
    /// Display name.
    fn name(&self) -> &str;
    /// Free-form description.
    fn description(&self) -> Option<&str>;
    /// External region identifier bound to the entity.
    fn region_id(&self) -> Option<&str>;
    /// Whether entering is permitted at this level.
    fn allow_entry(&self) -> bool;
    /// Whether leaving is permitted at this level.
    fn allow_exit(&self) -> bool;
    /// The containing entity, or `None` for the root.
    fn parent(&self) -> Option<DomainRef>;

    /// Loads this entity kind from a provider.
    fn fetch<'a>(provider: &'a dyn DomainDataProvider, id: DomainId) -> BoxFuture<'a, Result<Self>>;

    /// Wraps a shared record into the type-erased [`DomainEntity`].
    fn into_entity(record: Arc<Self>) -> DomainEntity;

    /// Typed reference to this entity.
    fn domain_ref(&self) -> DomainRef {
        DomainRef::new(Self::DOMAIN_TYPE, self.id())
    }
}

macro_rules! record_accessors {
    () => {
        fn id(&self) -> DomainId {
            self.id
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn description(&self) -> Option<&str> {
            self.description.as_deref()
        }

        fn region_id(&self) -> Option<&str> {
            self.region_id.as_deref()
        }

        fn allow_entry(&self) -> bool {
            self.allow_entry
        }

        fn allow_exit(&self) -> bool {
            self.allow_exit
        }
    };
}

impl DomainRecord for Town {
    const DOMAIN_TYPE: DomainType = DomainType::Town;

    record_accessors!();

    fn parent(&self) -> Option<DomainRef> {
        None
    }

    fn fetch<'a>(provider: &'a dyn DomainDataProvider, id: DomainId) -> BoxFuture<'a, Result<Self>> {
        provider.fetch_town(id)
    }

    fn into_entity(record: Arc<Self>) -> DomainEntity {
        DomainEntity::Town(record)
    }
}

impl DomainRecord for District {
    const DOMAIN_TYPE: DomainType = DomainType::District;

    record_accessors!();

    fn parent(&self) -> Option<DomainRef> {
        Some(DomainRef::town(self.town_id))
    }

    fn fetch<'a>(provider: &'a dyn DomainDataProvider, id: DomainId) -> BoxFuture<'a, Result<Self>> {
        provider.fetch_district(id)
    }

    fn into_entity(record: Arc<Self>) -> DomainEntity {
        DomainEntity::District(record)
    }
}

impl DomainRecord for Street {
    const DOMAIN_TYPE: DomainType = DomainType::Street;

    record_accessors!();

    fn parent(&self) -> Option<DomainRef> {
        Some(DomainRef::district(self.district_id))
    }

    fn fetch<'a>(provider: &'a dyn DomainDataProvider, id: DomainId) -> BoxFuture<'a, Result<Self>> {
        provider.fetch_street(id)
    }

    fn into_entity(record: Arc<Self>) -> DomainEntity {
        DomainEntity::Street(record)
    }
}

impl DomainRecord for Structure {
    const DOMAIN_TYPE: DomainType = DomainType::Structure;

    record_accessors!();

    /// A structure on a street hangs under the street; otherwise under its district.
    fn parent(&self) -> Option<DomainRef> {
        match self.street_id {
            Some(street_id) => Some(DomainRef::street(street_id)),
            None => Some(DomainRef::district(self.district_id)),
        }
    }

    fn fetch<'a>(provider: &'a dyn DomainDataProvider, id: DomainId) -> BoxFuture<'a, Result<Self>> {
        provider.fetch_structure(id)
    }

    fn into_entity(record: Arc<Self>) -> DomainEntity {
        DomainEntity::Structure(record)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TYPE-ERASED ENTITY
// ═══════════════════════════════════════════════════════════════════════════════

/// Any loaded domain entity, shared with the cache that holds it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DomainEntity {
    /// A town
    Town(Arc<Town>),
    /// A district
    District(Arc<District>),
    /// A street
    Street(Arc<Street>),
    /// A structure
    Structure(Arc<Structure>),
}

macro_rules! delegate {
    ($self:ident, $record:ident => $body:expr) => {
        match $self {
            DomainEntity::Town($record) => $body,
            DomainEntity::District($record) => $body,
            DomainEntity::Street($record) => $body,
            DomainEntity::Structure($record) => $body,
        }
    };
}

impl DomainEntity {
    /// Kind of entity.
    pub fn domain_type(&self) -> DomainType {
        match self {
            DomainEntity::Town(_) => DomainType::Town,
            DomainEntity::District(_) => DomainType::District,
            DomainEntity::Street(_) => DomainType::Street,
            DomainEntity::Structure(_) => DomainType::Structure,
        }
    }

    /// Typed reference to the entity.
    pub fn domain_ref(&self) -> DomainRef {
        delegate!(self, r => r.domain_ref())
    }

    /// Entity identifier.
    pub fn id(&self) -> DomainId {
        delegate!(self, r => r.id)
    }

    /// Display name.
    pub fn name(&self) -> &str {
        delegate!(self, r => r.name.as_str())
    }

    /// Free-form description.
    pub fn description(&self) -> Option<&str> {
        delegate!(self, r => r.description.as_deref())
    }

    /// External region identifier bound to the entity.
    pub fn region_id(&self) -> Option<&str> {
        delegate!(self, r => r.region_id.as_deref())
    }

    /// Whether entering is permitted at this level.
    pub fn allow_entry(&self) -> bool {
        delegate!(self, r => r.allow_entry)
    }

    /// Whether leaving is permitted at this level.
    pub fn allow_exit(&self) -> bool {
        delegate!(self, r => r.allow_exit)
    }

    /// The containing entity, or `None` for a town.
    pub fn parent(&self) -> Option<DomainRef> {
        delegate!(self, r => r.parent())
    }

    /// The district a structure declares, independent of its street.
    ///
    /// Used to check that a structure's street lies in the same district.
    pub fn declared_district(&self) -> Option<DomainId> {
        match self {
            DomainEntity::Structure(s) if s.street_id.is_some() => Some(s.district_id),
            _ => None,
        }
    }
}
