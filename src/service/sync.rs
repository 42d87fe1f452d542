//! Relationship synchronization: add, remove, truncate and desired-state updates.

use super::{Engine, Instance};
use crate::config::{key_string, Cardinality, RelationDescriptor, RelationKind, ResolvedResource};
use crate::error::AppError;
use crate::query::{apply_sort, related_scope, values_equal};
use crate::store::Row;
use serde_json::{Map, Value};

fn invalid(message: String) -> AppError {
    tracing::info!(detail = %message, "relationship rejected");
    AppError::Validation(message)
}

/// Id of one resource identifier in a relationship payload.
fn ref_id(name: &str, target: &ResolvedResource, item: &Value) -> Result<String, AppError> {
    let type_name = match item.get("type") {
        None | Some(Value::Null) => {
            return Err(invalid(format!(
                "The data attribute of the {} relationship must have a type property.",
                name
            )))
        }
        Some(Value::String(t)) => t,
        Some(_) => {
            return Err(invalid(format!(
                "The type attribute of the {} relationship must be a string.",
                name
            )))
        }
    };
    let id = match item.get("id") {
        None | Some(Value::Null) => {
            return Err(invalid(format!(
                "The id attribute of the {} relationship is required.",
                name
            )))
        }
        Some(Value::String(id)) => id,
        Some(_) => {
            return Err(invalid(format!(
                "The id attribute of the {} relationship must be a string.",
                name
            )))
        }
    };
    if type_name != &target.type_name {
        return Err(invalid(format!(
            "Related resource {} is invalid for this endpoint.",
            type_name
        )));
    }
    if id.is_empty() {
        return Err(invalid("Resource relationship has no id.".into()));
    }
    Ok(id.clone())
}

/// Ids of a relationship payload, in order and without repeats. A bare object is one ref.
fn parse_refs(name: &str, target: &ResolvedResource, data: &Value) -> Result<Vec<String>, AppError> {
    let items: Vec<&Value> = match data {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    let mut ids: Vec<String> = Vec::new();
    for item in items {
        let id = ref_id(name, target, item)?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// Desired ref of a to-one payload; `None` clears the relation.
fn parse_to_one(name: &str, target: &ResolvedResource, data: &Value) -> Result<Option<String>, AppError> {
    if data.is_null() {
        return Ok(None);
    }
    let (Some(type_name), Some(id)) = (
        data.get("type").filter(|v| !v.is_null()),
        data.get("id").filter(|v| !v.is_null()),
    ) else {
        return Err(invalid(format!("{} expects type and id fields.", name)));
    };
    let Some(id) = id.as_str() else {
        return Err(invalid(format!("{} id must be a string.", name)));
    };
    if type_name.as_str() != Some(target.type_name.as_str()) {
        return Err(invalid(format!(
            "Related resource {} is invalid for this endpoint.",
            key_string(type_name)
        )));
    }
    if id.is_empty() {
        return Err(invalid("Resource relationship has no id.".into()));
    }
    Ok(Some(id.to_string()))
}

impl<'a> Engine<'a> {
    /// Relation named in a request body; unknown names are a validation failure.
    pub fn relation_for_write(&self, name: &str) -> Result<&'a RelationDescriptor, AppError> {
        self.resource
            .relation(name)
            .ok_or_else(|| invalid(format!("Related resource {} is invalid for this endpoint.", name)))
    }

    /// Parse a relationship payload without touching the store.
    pub fn check_relationship(&self, name: &str, data: &Value) -> Result<(), AppError> {
        let relation = self.relation_for_write(name)?;
        let target = self.model.target_of(relation)?;
        parse_refs(name, target, data).map(|_| ())
    }

    async fn find_related(&self, target: &ResolvedResource, id: &str) -> Result<Value, AppError> {
        let key = target.parse_id(id)?;
        let row = self
            .store
            .find(target, &key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {} not found", target.type_name, id)))?;
        Ok(row.get(&target.pk_column).cloned().unwrap_or(key))
    }

    /// Ids currently associated through `relation`, in key order.
    async fn current_ids(
        &self,
        instance: &Instance,
        relation: &RelationDescriptor,
        target: &ResolvedResource,
    ) -> Result<Vec<String>, AppError> {
        if let RelationKind::BelongsTo { foreign_key } = &relation.kind {
            let fk = instance.get(foreign_key);
            return Ok(if fk.is_null() { Vec::new() } else { vec![key_string(fk)] });
        }
        if instance.id.is_null() {
            return Ok(Vec::new());
        }
        let mut query = related_scope(relation, target, &instance.id);
        query.key_only = true;
        apply_sort(target, None, &mut query)?;
        let rows = self.store.fetch(target, &query).await?;
        Ok(rows
            .iter()
            .map(|r| key_string(r.get(&target.pk_column).unwrap_or(&Value::Null)))
            .collect())
    }

    async fn add_single(
        &self,
        instance: &mut Instance,
        relation: &RelationDescriptor,
        target: &ResolvedResource,
        id: &str,
    ) -> Result<(), AppError> {
        let related = self.find_related(target, id).await?;
        tracing::debug!(resource = %self.resource.type_name, relation = %relation.name, id, "associate");
        match &relation.kind {
            RelationKind::BelongsTo { foreign_key } => instance.set(foreign_key, related),
            RelationKind::HasOne { foreign_key } | RelationKind::HasMany { foreign_key } => {
                let mut values = Row::new();
                values.insert(foreign_key.clone(), instance.id.clone());
                self.store.update(target, &related, &values).await?;
            }
            RelationKind::BelongsToMany { join } => {
                self.store.attach(join, &instance.id, &related).await?;
            }
        }
        Ok(())
    }

    async fn remove_single(
        &self,
        instance: &mut Instance,
        relation: &RelationDescriptor,
        target: &ResolvedResource,
        id: &str,
    ) -> Result<(), AppError> {
        tracing::debug!(resource = %self.resource.type_name, relation = %relation.name, id, "dissociate");
        match &relation.kind {
            RelationKind::BelongsTo { foreign_key } => {
                if key_string(instance.get(foreign_key)) == id {
                    instance.set(foreign_key, Value::Null);
                }
            }
            RelationKind::HasOne { foreign_key } | RelationKind::HasMany { foreign_key } => {
                if !target.column(foreign_key).map(|c| c.nullable).unwrap_or(true) {
                    return Err(invalid(format!(
                        "The {} relationship can not be removed, {} is required.",
                        relation.name, foreign_key
                    )));
                }
                let key = target.parse_id(id)?;
                let child = self
                    .store
                    .find(target, &key)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("{} {} not found", target.type_name, id)))?;
                if values_equal(child.get(foreign_key).unwrap_or(&Value::Null), &instance.id) {
                    let mut values = Row::new();
                    values.insert(foreign_key.clone(), Value::Null);
                    self.store.update(target, &key, &values).await?;
                }
            }
            RelationKind::BelongsToMany { join } => {
                let key = target.parse_id(id)?;
                self.store.detach(join, &instance.id, Some(&key)).await?;
            }
        }
        Ok(())
    }

    async fn truncate(
        &self,
        instance: &mut Instance,
        relation: &RelationDescriptor,
        target: &ResolvedResource,
    ) -> Result<(), AppError> {
        tracing::debug!(resource = %self.resource.type_name, relation = %relation.name, "truncate");
        match &relation.kind {
            RelationKind::BelongsTo { foreign_key } => instance.set(foreign_key, Value::Null),
            RelationKind::HasOne { foreign_key } | RelationKind::HasMany { foreign_key } => {
                if !target.column(foreign_key).map(|c| c.nullable).unwrap_or(true) {
                    tracing::debug!(relation = %relation.name, foreign_key = %foreign_key, "foreign key not nullable, children kept");
                    return Ok(());
                }
                let mut values = Row::new();
                values.insert(foreign_key.clone(), Value::Null);
                for id in self.current_ids(instance, relation, target).await? {
                    let key = target.parse_id(&id)?;
                    self.store.update(target, &key, &values).await?;
                }
            }
            RelationKind::BelongsToMany { join } => {
                self.store.detach(join, &instance.id, None).await?;
            }
        }
        Ok(())
    }

    /// Associate every ref in `data`. `null` is a no-op.
    pub async fn add_relationship(&self, instance: &mut Instance, name: &str, data: &Value) -> Result<(), AppError> {
        let relation = self.relation_for_write(name)?;
        if data.is_null() {
            return Ok(());
        }
        let target = self.model.target_of(relation)?;
        for id in parse_refs(name, target, data)? {
            self.add_single(instance, relation, target, &id).await?;
        }
        Ok(())
    }

    /// Dissociate every ref in `data`.
    pub async fn remove_relationship(&self, instance: &mut Instance, name: &str, data: &Value) -> Result<(), AppError> {
        let relation = self.relation_for_write(name)?;
        let target = self.model.target_of(relation)?;
        for id in parse_refs(name, target, data)? {
            self.remove_single(instance, relation, target, &id).await?;
        }
        Ok(())
    }

    pub async fn truncate_relationship(&self, instance: &mut Instance, name: &str) -> Result<(), AppError> {
        let relation = self.relation_for_write(name)?;
        let target = self.model.target_of(relation)?;
        self.truncate(instance, relation, target).await
    }

    pub async fn update_to_one(&self, instance: &mut Instance, name: &str, data: &Value) -> Result<(), AppError> {
        let relation = self.relation_for_write(name)?;
        let target = self.model.target_of(relation)?;
        let desired = parse_to_one(name, target, data)?;
        let current = self.current_ids(instance, relation, target).await?.into_iter().next();
        tracing::debug!(relation = name, current = ?current, desired = ?desired, "update to-one");
        match (current, desired) {
            (None, None) => Ok(()),
            (None, Some(id)) => self.add_single(instance, relation, target, &id).await,
            (Some(current), None) => self.remove_single(instance, relation, target, &current).await,
            (Some(current), Some(id)) if current == id => Ok(()),
            (Some(current), Some(id)) => {
                self.remove_single(instance, relation, target, &current).await?;
                self.add_single(instance, relation, target, &id).await
            }
        }
    }

    /// Make the relation's id set equal to `data`. Removals run before additions.
    pub async fn update_to_many(&self, instance: &mut Instance, name: &str, data: &Value) -> Result<(), AppError> {
        let relation = self.relation_for_write(name)?;
        let target = self.model.target_of(relation)?;
        let desired = parse_refs(name, target, data)?;
        let current = self.current_ids(instance, relation, target).await?;
        tracing::debug!(relation = name, current = ?current, desired = ?desired, "update to-many");

        match (current.len(), desired.len()) {
            (0, 0) => return Ok(()),
            (_, 0) => return self.truncate(instance, relation, target).await,
            (0, _) => {
                for id in &desired {
                    self.add_single(instance, relation, target, id).await?;
                }
                return Ok(());
            }
            _ => {}
        }

        let mut sorted_current = current.clone();
        let mut sorted_desired = desired.clone();
        sorted_current.sort();
        sorted_desired.sort();
        if sorted_current == sorted_desired {
            return Ok(());
        }
        for id in current.iter().filter(|id| !desired.contains(id)) {
            self.remove_single(instance, relation, target, id).await?;
        }
        for id in desired.iter().filter(|id| !current.contains(id)) {
            self.add_single(instance, relation, target, id).await?;
        }
        Ok(())
    }

    /// Apply a `relationships` member as desired state, relation by relation.
    pub async fn update_relationships(
        &self,
        instance: &mut Instance,
        relationships: &Map<String, Value>,
    ) -> Result<(), AppError> {
        for (name, payload) in relationships {
            let relation = self.relation_for_write(name)?;
            let data = payload.get("data").ok_or_else(|| {
                invalid(format!("The data attribute of the {} relationship is required.", name))
            })?;
            match (relation.cardinality(), data) {
                (Cardinality::ToOne, Value::Array(_)) => {
                    return Err(invalid(format!("{} is a to-one relationship", name)))
                }
                (Cardinality::ToMany, Value::Object(_)) => {
                    return Err(invalid(format!("{} is a to-many relationship", name)))
                }
                (Cardinality::ToOne, _) => self.update_to_one(instance, name, data).await?,
                (Cardinality::ToMany, _) => self.update_to_many(instance, name, data).await?,
            }
        }
        Ok(())
    }

    /// Add the relationships of a create request: owner-side ones before the insert,
    /// the rest once the instance has a key.
    pub async fn add_relationships(
        &self,
        instance: &mut Instance,
        relationships: &Map<String, Value>,
        owner_side: bool,
    ) -> Result<(), AppError> {
        for (name, payload) in relationships {
            let relation = self.relation_for_write(name)?;
            if relation.kind.is_owner_side() != owner_side {
                continue;
            }
            let data = payload.get("data").unwrap_or(&Value::Null);
            self.add_relationship(instance, name, data).await?;
        }
        Ok(())
    }
}
