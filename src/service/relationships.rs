//! Relationship routes: related resources, linkage reads and linkage mutations.

use super::Engine;
use crate::config::{key_string, RelationDescriptor, RelationKind};
use crate::error::AppError;
use crate::query::{apply_sort, related_scope, Window};
use crate::request::RequestContext;
use crate::response::JsonApiResponse;
use crate::serializer::Document;

const RELATIONSHIP_CONSTRAINT: &str = "Can't update relationship, is it required/valid?";

impl<'a> Engine<'a> {
    /// Relation named in a URL; unknown names are a bad request.
    fn relation_for_read(&self, name: &str) -> Result<&'a RelationDescriptor, AppError> {
        self.resource.relation(name).ok_or_else(|| {
            AppError::InvalidRequest(format!("Related resource {} is invalid for this endpoint.", name))
        })
    }

    /// Delegate to the engine of the relation's target, scoped to `id`'s related rows.
    async fn delegate(
        &self,
        ctx: &RequestContext,
        id: &str,
        name: &str,
        identifiers: bool,
    ) -> Result<JsonApiResponse, AppError> {
        self.require_operation("read")?;
        let relation = self.relation_for_read(name)?;
        let owner = self.find_instance(id).await?;
        let mut target = self.engine_for(&relation.target)?;
        if identifiers {
            target = target.identifiers();
        }
        tracing::debug!(resource = %self.resource.type_name, id, relation = name, target = %relation.target, "related");

        match &relation.kind {
            RelationKind::HasMany { .. } | RelationKind::BelongsToMany { .. } => {
                let scope = related_scope(relation, target.resource, &owner.id);
                let path = format!("{}/{}/{}", self.resource.path_segment, id, name);
                target.index_scoped(ctx, scope, &path).await
            }
            RelationKind::BelongsTo { foreign_key } => {
                let fk = owner.get(foreign_key);
                if fk.is_null() {
                    return Ok(JsonApiResponse::ok(Document::empty()));
                }
                target.show(ctx, &key_string(fk)).await
            }
            RelationKind::HasOne { .. } => {
                let mut scope = related_scope(relation, target.resource, &owner.id);
                scope.key_only = true;
                scope.window = Window::Range { offset: 0, limit: 1 };
                apply_sort(target.resource, None, &mut scope)?;
                let rows = self.store.fetch(target.resource, &scope).await?;
                match rows.first().and_then(|r| r.get(&target.resource.pk_column)) {
                    Some(key) => target.show(ctx, &key_string(key)).await,
                    None => Ok(JsonApiResponse::ok(Document::empty())),
                }
            }
        }
    }

    /// `GET /{type}/{id}/{relation}`: the related resources in full.
    pub async fn related(&self, ctx: &RequestContext, id: &str, name: &str) -> Result<JsonApiResponse, AppError> {
        self.delegate(ctx, id, name, false).await
    }

    /// `GET /{type}/{id}/relationships/{relation}`: identifiers only.
    pub async fn list_relationship(
        &self,
        ctx: &RequestContext,
        id: &str,
        name: &str,
    ) -> Result<JsonApiResponse, AppError> {
        self.delegate(ctx, id, name, true).await
    }

    async fn mutate_relationship(
        &self,
        ctx: &RequestContext,
        id: &str,
        name: &str,
        replace: bool,
    ) -> Result<(), AppError> {
        self.require_operation("update")?;
        self.relation_for_read(name)?;
        let mut instance = self.find_instance(id).await?;
        let data = ctx.data().cloned().unwrap_or_default();
        self.check_relationship(name, &data)?;
        let result = async {
            if replace {
                self.truncate_relationship(&mut instance, name).await?;
            }
            self.add_relationship(&mut instance, name, &data).await?;
            self.save(&mut instance).await
        }
        .await;
        result.map_err(constraint_as_validation)
    }

    /// `POST /{type}/{id}/relationships/{relation}`: add to the relation.
    pub async fn store_relationship(
        &self,
        ctx: &RequestContext,
        id: &str,
        name: &str,
    ) -> Result<JsonApiResponse, AppError> {
        self.mutate_relationship(ctx, id, name, false).await?;
        self.list_relationship(ctx, id, name).await
    }

    /// `PATCH /{type}/{id}/relationships/{relation}`: replace the relation.
    pub async fn update_relationship(
        &self,
        ctx: &RequestContext,
        id: &str,
        name: &str,
    ) -> Result<JsonApiResponse, AppError> {
        self.mutate_relationship(ctx, id, name, true).await?;
        self.list_relationship(ctx, id, name).await
    }

    /// `DELETE /{type}/{id}/relationships/{relation}`: remove from the relation.
    pub async fn destroy_relationship(
        &self,
        ctx: &RequestContext,
        id: &str,
        name: &str,
    ) -> Result<JsonApiResponse, AppError> {
        self.require_operation("update")?;
        self.relation_for_read(name)?;
        let mut instance = self.find_instance(id).await?;
        let data = ctx.data().cloned().unwrap_or_default();
        let result = async {
            self.remove_relationship(&mut instance, name, &data).await?;
            self.save(&mut instance).await
        }
        .await;
        result.map_err(constraint_as_validation)?;
        Ok(JsonApiResponse::no_content())
    }
}

fn constraint_as_validation(e: AppError) -> AppError {
    match e {
        AppError::Constraint(detail) => {
            tracing::info!(detail = %detail, "relationship update violated a constraint");
            AppError::Validation(RELATIONSHIP_CONSTRAINT.into())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, resolve, ResolvedModel, Settings};
    use crate::query::ListQuery;
    use crate::store::{MemoryStore, Row, Store};
    use serde_json::{json, Value};

    fn model() -> ResolvedModel {
        resolve(&parse_config(include_str!("../../tests/fixtures/billing.json")).unwrap()).unwrap()
    }

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    fn body(response: JsonApiResponse) -> Value {
        serde_json::to_value(response.body.unwrap()).unwrap()
    }

    async fn seeded(model: &ResolvedModel) -> MemoryStore {
        let store = MemoryStore::new(model);
        let user = model.resource_by_type("user").unwrap();
        let account = model.resource_by_type("account").unwrap();
        let invoice = model.resource_by_type("invoice").unwrap();
        store.insert(user, &row(json!({"id": 9, "name": "ann"}))).await.unwrap();
        store.insert(account, &row(json!({"id": 5, "name": "acme"}))).await.unwrap();
        store.insert(invoice, &row(json!({"number": "A-1", "account_id": 5}))).await.unwrap();
        store.insert(invoice, &row(json!({"number": "A-2", "account_id": 5}))).await.unwrap();
        store
    }

    #[tokio::test]
    async fn patch_owner_then_read_linkage() {
        let model = model();
        let store = seeded(&model).await;
        let settings = Settings::default();
        let accounts = Engine::for_path(&model, &store, &settings, "accounts").unwrap();

        let empty = body(
            accounts
                .list_relationship(&RequestContext::default(), "5", "owner")
                .await
                .unwrap(),
        );
        assert_eq!(empty, json!({"data": null}));

        let ctx = RequestContext::with_body(json!({"data": {"type": "user", "id": "9"}}));
        let patched = body(accounts.update_relationship(&ctx, "5", "owner").await.unwrap());
        assert_eq!(patched, json!({"data": {"type": "user", "id": "9"}}));

        let read = body(
            accounts
                .list_relationship(&RequestContext::default(), "5", "owner")
                .await
                .unwrap(),
        );
        assert_eq!(read, json!({"data": {"type": "user", "id": "9"}}));

        let related = body(accounts.related(&RequestContext::default(), "5", "owner").await.unwrap());
        assert_eq!(related["data"]["attributes"], json!({"name": "ann", "email": null}));
    }

    #[tokio::test]
    async fn to_many_related_is_a_scoped_listing() {
        let model = model();
        let store = seeded(&model).await;
        let settings = Settings::default();
        let accounts = Engine::for_path(&model, &store, &settings, "accounts").unwrap();
        let doc = body(accounts.related(&RequestContext::default(), "5", "invoices").await.unwrap());
        let ids: Vec<&str> = doc["data"].as_array().unwrap().iter().filter_map(|d| d["id"].as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(doc["meta"]["pagination"]["total"], json!(2));

        let linkage = body(
            accounts
                .list_relationship(&RequestContext::default(), "5", "invoices")
                .await
                .unwrap(),
        );
        assert_eq!(linkage["data"][0], json!({"type": "invoice", "id": "1"}));
        assert!(linkage.get("included").is_none());
    }

    #[tokio::test]
    async fn unknown_relation_and_missing_owner() {
        let model = model();
        let store = seeded(&model).await;
        let settings = Settings::default();
        let accounts = Engine::for_path(&model, &store, &settings, "accounts").unwrap();
        let err = accounts
            .related(&RequestContext::default(), "5", "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(m) if m == "Related resource nope is invalid for this endpoint."));
        let err = accounts
            .related(&RequestContext::default(), "6", "owner")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn clearing_a_required_owner_is_a_validation_error() {
        let model = model();
        let store = seeded(&model).await;
        let settings = Settings::default();
        let invoices = Engine::for_path(&model, &store, &settings, "invoices").unwrap();
        let ctx = RequestContext::with_body(json!({"data": null}));
        let err = invoices.update_relationship(&ctx, "1", "account").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(m) if m == RELATIONSHIP_CONSTRAINT));
    }

    async fn with_lines(model: &ResolvedModel) -> MemoryStore {
        let store = seeded(model).await;
        let line = model.resource_by_type("line").unwrap();
        for description in ["a", "b", "c"] {
            store
                .insert(line, &row(json!({"description": description, "invoice_id": 1})))
                .await
                .unwrap();
        }
        store
    }

    fn malformed_lines() -> RequestContext {
        RequestContext::with_body(json!({"data": [{"type": "line", "id": "2"}, {"type": "line", "id": 5}]}))
    }

    async fn assert_lines_untouched(model: &ResolvedModel, store: &MemoryStore, writes: u64, err: AppError) {
        assert!(
            matches!(&err, AppError::Validation(m) if m == "The id attribute of the lines relationship must be a string."),
            "{:?}",
            err
        );
        assert_eq!(store.writes(), writes);
        let line = model.resource_by_type("line").unwrap();
        let rows = store.fetch(line, &ListQuery::all()).await.unwrap();
        let owners: Vec<&Value> = rows.iter().map(|r| &r["invoice_id"]).collect();
        assert_eq!(owners, vec![&json!(1); 3]);
    }

    #[tokio::test]
    async fn malformed_replace_keeps_the_relation() {
        let model = model();
        let store = with_lines(&model).await;
        let settings = Settings::default();
        let invoices = Engine::for_path(&model, &store, &settings, "invoices").unwrap();
        let writes = store.writes();
        let err = invoices
            .update_relationship(&malformed_lines(), "1", "lines")
            .await
            .unwrap_err();
        assert_lines_untouched(&model, &store, writes, err).await;
    }

    #[tokio::test]
    async fn malformed_add_keeps_the_relation() {
        let model = model();
        let store = with_lines(&model).await;
        let settings = Settings::default();
        let invoices = Engine::for_path(&model, &store, &settings, "invoices").unwrap();
        let writes = store.writes();
        let err = invoices
            .store_relationship(&malformed_lines(), "1", "lines")
            .await
            .unwrap_err();
        assert_lines_untouched(&model, &store, writes, err).await;
    }

    #[tokio::test]
    async fn malformed_remove_keeps_the_relation() {
        let model = model();
        let store = with_lines(&model).await;
        let settings = Settings::default();
        let invoices = Engine::for_path(&model, &store, &settings, "invoices").unwrap();
        let writes = store.writes();
        let err = invoices
            .destroy_relationship(&malformed_lines(), "1", "lines")
            .await
            .unwrap_err();
        assert_lines_untouched(&model, &store, writes, err).await;
    }

    #[tokio::test]
    async fn delete_linkage_answers_no_content() {
        let model = model();
        let store = seeded(&model).await;
        let settings = Settings::default();
        let accounts = Engine::for_path(&model, &store, &settings, "accounts").unwrap();
        let ctx = RequestContext::with_body(json!({"data": {"type": "user", "id": "9"}}));
        accounts.store_relationship(&ctx, "5", "owner").await.unwrap();
        let response = accounts.destroy_relationship(&ctx, "5", "owner").await.unwrap();
        assert_eq!(response.status, axum::http::StatusCode::NO_CONTENT);
        let account = model.resource_by_type("account").unwrap();
        let stored = store.find(account, &json!(5)).await.unwrap().unwrap();
        assert!(stored["owner_id"].is_null());
    }
}
