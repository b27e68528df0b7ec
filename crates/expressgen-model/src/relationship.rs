//! Relationship synthesis: turning one-sided `INVERSE` declarations into
//! wiring that runs after an instance's explicit attributes are populated.
//!
//! For a link `A.attrOnA` ↔ `B.attr`, an instance of `B` pushes itself into
//! every referenced `A`:
//!
//! | `attr` on B | `attrOnA` on A | action |
//! |---|---|---|
//! | single | single | `that.attrOnA = this` |
//! | single | collection | append `this` to `that.attrOnA` |
//! | collection | single | for each element: `element.attrOnA = this` |
//! | collection | collection | for each element: append `this` to `element.attrOnA` |
//!
//! Elements that are not instances of `A` are left alone. [`InstanceGraph`]
//! applies these rules to concrete instances.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{GraphError, LookupError};
use crate::model::SemanticModel;
use crate::type_ref::TypeRef;
use crate::types::Name;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    Single,
    Collection,
}

impl Cardinality {
    pub fn of(ty: &TypeRef) -> Self {
        if ty.is_collection() {
            Cardinality::Collection
        } else {
            Cardinality::Single
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WiringAction {
    Assign,
    Append,
    AssignEach,
    AppendEach,
}

impl WiringAction {
    pub fn for_cardinalities(here: Cardinality, there: Cardinality) -> Self {
        match (here, there) {
            (Cardinality::Single, Cardinality::Single) => WiringAction::Assign,
            (Cardinality::Single, Cardinality::Collection) => WiringAction::Append,
            (Cardinality::Collection, Cardinality::Single) => WiringAction::AssignEach,
            (Cardinality::Collection, Cardinality::Collection) => WiringAction::AppendEach,
        }
    }

    pub fn appends(self) -> bool {
        matches!(self, WiringAction::Append | WiringAction::AppendEach)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct WiringRule {
    /// Entity declaring the forward attribute.
    pub entity: Name,
    pub attribute: Name,
    /// Entity holding the inverse attribute.
    pub counterpart_entity: Name,
    pub counterpart_attribute: Name,
    pub action: WiringAction,
}

/// Rules an instance of `entity` runs after construction, root level first.
pub fn wiring_rules(model: &SemanticModel, entity: &str) -> Result<Vec<WiringRule>, LookupError> {
    let mut rules = Vec::new();
    for level in model.ancestors(entity)? {
        rules.extend(own_wiring_rules(model, level.name())?);
    }
    Ok(rules)
}

/// Rules contributed by inverse links that target exactly `entity`.
pub fn own_wiring_rules(
    model: &SemanticModel,
    entity: &str,
) -> Result<Vec<WiringRule>, LookupError> {
    let mut rules = Vec::new();
    for link in model.inverses().links_to(entity) {
        let Some(forward) = model.forward_attribute(entity, &link.target_attribute)? else {
            warn!(
                entity = %entity,
                attribute = %link.target_attribute,
                "inverse names an attribute the entity does not have; no wiring"
            );
            continue;
        };
        let owner = model.entity(&link.owning_entity)?;
        let Some(reverse) = owner
            .attributes()
            .iter()
            .find(|a| a.is_inverse() && a.name() == link.owning_attribute)
        else {
            continue;
        };

        rules.push(WiringRule {
            entity: entity.to_string(),
            attribute: link.target_attribute.clone(),
            counterpart_entity: link.owning_entity.clone(),
            counterpart_attribute: link.owning_attribute.clone(),
            action: WiringAction::for_cardinalities(
                Cardinality::of(forward.ty()),
                Cardinality::of(reverse.ty()),
            ),
        });
    }
    Ok(rules)
}

// ============================================================================
// Instance graph
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(usize);

impl InstanceId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Slot {
    #[default]
    Empty,
    One(InstanceId),
    Many(Vec<InstanceId>),
}

static EMPTY_SLOT: Slot = Slot::Empty;

impl Slot {
    pub fn ids(&self) -> Vec<InstanceId> {
        match self {
            Slot::Empty => Vec::new(),
            Slot::One(id) => vec![*id],
            Slot::Many(ids) => ids.clone(),
        }
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        match self {
            Slot::Empty => false,
            Slot::One(x) => *x == id,
            Slot::Many(ids) => ids.contains(&id),
        }
    }

    fn append(&mut self, id: InstanceId) {
        match self {
            Slot::Empty => *self = Slot::Many(vec![id]),
            Slot::One(existing) => *self = Slot::Many(vec![*existing, id]),
            Slot::Many(ids) => {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Instance {
    entity: Name,
    slots: BTreeMap<Name, Slot>,
}

/// Minimal object graph over a model: instances, their slots, and
/// post-construction wiring.
#[derive(Debug, Clone)]
pub struct InstanceGraph<'m> {
    model: &'m SemanticModel,
    instances: Vec<Instance>,
}

impl<'m> InstanceGraph<'m> {
    pub fn new(model: &'m SemanticModel) -> Self {
        Self {
            model,
            instances: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// A fresh instance with every slot empty; no wiring runs.
    pub fn create(&mut self, entity: &str) -> Result<InstanceId, GraphError> {
        let def = self.model.entity(entity)?;
        if def.is_abstract() {
            return Err(GraphError::AbstractEntity {
                entity: entity.to_string(),
            });
        }
        let id = InstanceId(self.instances.len());
        self.instances.push(Instance {
            entity: def.name().to_string(),
            slots: BTreeMap::new(),
        });
        Ok(id)
    }

    /// Create, populate explicit attributes, then wire, like a constructor.
    pub fn construct(
        &mut self,
        entity: &str,
        values: Vec<(&str, Slot)>,
    ) -> Result<InstanceId, GraphError> {
        let id = self.create(entity)?;
        for (attribute, value) in values {
            self.set(id, attribute, value)?;
        }
        self.wire(id)?;
        Ok(id)
    }

    pub fn entity_of(&self, id: InstanceId) -> Result<&str, GraphError> {
        self.instance(id).map(|i| i.entity.as_str())
    }

    /// Store an explicit attribute value. Inverse slots are written only by wiring.
    pub fn set(&mut self, id: InstanceId, attribute: &str, value: Slot) -> Result<(), GraphError> {
        let entity = self.entity_of(id)?.to_string();
        let attr = self
            .model
            .forward_attribute(&entity, attribute)?
            .ok_or_else(|| GraphError::UnknownAttribute {
                entity: entity.clone(),
                attribute: attribute.to_string(),
            })?;

        let fits = match (&value, Cardinality::of(attr.ty())) {
            (Slot::Empty, _) => true,
            (Slot::One(_), Cardinality::Single) => true,
            (Slot::Many(_), Cardinality::Collection) => true,
            _ => false,
        };
        if !fits {
            return Err(GraphError::CardinalityMismatch {
                entity,
                attribute: attribute.to_string(),
            });
        }
        for target in value.ids() {
            self.instance(target)?;
        }

        self.instance_mut(id)?
            .slots
            .insert(attribute.to_string(), value);
        Ok(())
    }

    pub fn get(&self, id: InstanceId, attribute: &str) -> Result<&Slot, GraphError> {
        Ok(self
            .instance(id)?
            .slots
            .get(attribute)
            .unwrap_or(&EMPTY_SLOT))
    }

    /// Run every wiring rule of the instance's entity chain.
    pub fn wire(&mut self, id: InstanceId) -> Result<(), GraphError> {
        let entity = self.entity_of(id)?.to_string();
        for rule in wiring_rules(self.model, &entity)? {
            let targets = self.get(id, &rule.attribute)?.ids();
            for target in targets {
                let target_entity = self.entity_of(target)?;
                if !self
                    .model
                    .is_subtype_of(target_entity, &rule.counterpart_entity)?
                {
                    continue;
                }
                debug!(
                    from = %entity,
                    attribute = %rule.attribute,
                    to = %rule.counterpart_entity,
                    inverse = %rule.counterpart_attribute,
                    action = ?rule.action,
                    "wire"
                );
                let slot = self
                    .instance_mut(target)?
                    .slots
                    .entry(rule.counterpart_attribute.clone())
                    .or_default();
                if rule.action.appends() {
                    slot.append(id);
                } else {
                    *slot = Slot::One(id);
                }
            }
        }
        Ok(())
    }

    fn instance(&self, id: InstanceId) -> Result<&Instance, GraphError> {
        self.instances
            .get(id.0)
            .ok_or(GraphError::UnknownInstance { id: id.0 })
    }

    fn instance_mut(&mut self, id: InstanceId) -> Result<&mut Instance, GraphError> {
        self.instances
            .get_mut(id.0)
            .ok_or(GraphError::UnknownInstance { id: id.0 })
    }
}
