//! Engine: per-resource operations over a store, resolved from the registry.

mod batch;
mod relationships;
mod resources;
mod sync;
mod validation;

pub use batch::OperationResult;
pub use validation::{forbid_id, pre_validate, require_id, require_type, validate_or_fail, RequestValidator};

use crate::config::{ResolvedModel, ResolvedResource, Settings};
use crate::error::AppError;
use crate::query::values_equal;
use crate::serializer::Serializer;
use crate::store::{Row, Store};
use serde_json::Value;

/// A stored row being worked on, plus column changes not yet saved.
#[derive(Clone, Debug, Default)]
pub struct Instance {
    pub id: Value,
    pub row: Row,
    dirty: Row,
}

impl Instance {
    pub fn new(resource: &ResolvedResource, row: Row) -> Self {
        let id = row.get(&resource.pk_column).cloned().unwrap_or(Value::Null);
        Instance {
            id,
            row,
            dirty: Row::new(),
        }
    }

    /// Current value, pending changes first.
    pub fn get(&self, column: &str) -> &Value {
        self.dirty
            .get(column)
            .or_else(|| self.row.get(column))
            .unwrap_or(&Value::Null)
    }

    /// Stage a change. Setting a column back to its stored value clears it.
    pub fn set(&mut self, column: &str, value: Value) {
        let stored = self.row.get(column).unwrap_or(&Value::Null);
        let unchanged = (stored.is_null() && value.is_null()) || values_equal(stored, &value);
        if unchanged {
            self.dirty.remove(column);
        } else {
            self.dirty.insert(column.to_string(), value);
        }
    }

    pub fn fill(&mut self, values: Row) {
        for (column, value) in values {
            self.set(&column, value);
        }
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    fn take_dirty(&mut self) -> Row {
        std::mem::take(&mut self.dirty)
    }
}

/// Operations for one resource type. Cheap to build; holds borrowed registry and store.
#[derive(Clone, Copy)]
pub struct Engine<'a> {
    pub model: &'a ResolvedModel,
    pub resource: &'a ResolvedResource,
    pub store: &'a dyn Store,
    pub settings: &'a Settings,
    identifiers_only: bool,
}

impl<'a> Engine<'a> {
    pub fn new(
        model: &'a ResolvedModel,
        resource: &'a ResolvedResource,
        store: &'a dyn Store,
        settings: &'a Settings,
    ) -> Self {
        Engine {
            model,
            resource,
            store,
            settings,
            identifiers_only: false,
        }
    }

    /// Engine for the resource exposed at `path`.
    pub fn for_path(
        model: &'a ResolvedModel,
        store: &'a dyn Store,
        settings: &'a Settings,
        path: &str,
    ) -> Result<Self, AppError> {
        let resource = model
            .resource_by_path(path)
            .ok_or_else(|| AppError::NotFound(format!("Resource {} not found", path)))?;
        Ok(Engine::new(model, resource, store, settings))
    }

    pub fn for_type(
        model: &'a ResolvedModel,
        store: &'a dyn Store,
        settings: &'a Settings,
        type_name: &str,
    ) -> Result<Self, AppError> {
        let resource = model
            .resource_by_type(type_name)
            .ok_or_else(|| AppError::NotFound(format!("Resource type {} not found", type_name)))?;
        Ok(Engine::new(model, resource, store, settings))
    }

    /// Engine registered for another type, sharing this one's registry and store.
    pub fn engine_for(&self, type_name: &str) -> Result<Engine<'a>, AppError> {
        Engine::for_type(self.model, self.store, self.settings, type_name)
    }

    /// Serialize identifiers only and select only key columns.
    pub fn identifiers(mut self) -> Self {
        self.identifiers_only = true;
        self
    }

    fn serializer(&self) -> Serializer<'a> {
        let serializer = Serializer::new(self.model, self.settings.base_url.as_deref());
        if self.identifiers_only {
            serializer.identifiers_only()
        } else {
            serializer
        }
    }

    fn require_operation(&self, operation: &str) -> Result<(), AppError> {
        if self.resource.allows(operation) {
            return Ok(());
        }
        Err(AppError::NotImplemented(format!(
            "The {} operation is not available for {}.",
            operation, self.resource.type_name
        )))
    }

    fn not_found(&self, id: &str) -> AppError {
        AppError::NotFound(format!("{} {} not found", self.resource.type_name, id))
    }

    /// Load one instance by its string id.
    pub async fn find_instance(&self, id: &str) -> Result<Instance, AppError> {
        let key = self.resource.parse_id(id)?;
        let row = self
            .store
            .find(self.resource, &key)
            .await?
            .ok_or_else(|| self.not_found(id))?;
        Ok(Instance::new(self.resource, row))
    }

    /// Write pending column changes. Nothing is written when nothing changed.
    pub async fn save(&self, instance: &mut Instance) -> Result<(), AppError> {
        if !instance.is_dirty() {
            return Ok(());
        }
        let changes = instance.take_dirty();
        tracing::debug!(resource = %self.resource.type_name, id = %instance.id, columns = ?changes.keys().collect::<Vec<_>>(), "save");
        let row = self
            .store
            .update(self.resource, &instance.id, &changes)
            .await?
            .ok_or_else(|| self.not_found(&crate::config::key_string(&instance.id)))?;
        instance.row = row;
        Ok(())
    }
}
