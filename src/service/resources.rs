//! Resource operations: list, read, create, update, delete.

use super::validation::{forbid_id, pre_validate, require_id, require_type, validate_or_fail};
use super::{Engine, Instance};
use crate::config::key_string;
use crate::error::AppError;
use crate::include::{self, Node};
use crate::query::{apply_filters, apply_sort, ListQuery, Pagination};
use crate::request::RequestContext;
use crate::response::JsonApiResponse;
use crate::serializer::{transformer, Document};

const TOO_MANY_VARIABLES: &str = "Too many SQL variables in query. Are you using pagination? \
Try using page[limit]=-1, as this is designed to work better with large result sets.";

impl<'a> Engine<'a> {
    /// `GET /{type}`.
    pub async fn index(&self, ctx: &RequestContext) -> Result<JsonApiResponse, AppError> {
        self.index_scoped(ctx, ListQuery::all(), &self.resource.path_segment).await
    }

    /// Listing over a pre-scoped query. `path` is used for pagination links.
    pub async fn index_scoped(
        &self,
        ctx: &RequestContext,
        scope: ListQuery,
        path: &str,
    ) -> Result<JsonApiResponse, AppError> {
        self.require_operation("read")?;
        self.list(ctx, scope, path).await.map_err(|e| match e {
            AppError::TooManyVariables(n) => {
                tracing::info!(params = n, "bind parameter limit exceeded");
                AppError::InvalidRequest(TOO_MANY_VARIABLES.into())
            }
            other => other,
        })
    }

    async fn list(&self, ctx: &RequestContext, mut query: ListQuery, path: &str) -> Result<JsonApiResponse, AppError> {
        let pagination = Pagination::from_params(&ctx.params, self.settings.page_size_default)?;
        apply_sort(self.resource, ctx.params.sort.as_deref(), &mut query)?;
        apply_filters(self.model, self.resource, &ctx.params.filter, &mut query)?;
        query.key_only = self.identifiers_only;

        let total = match pagination {
            Pagination::Paged { .. } => self.store.count(self.resource, &query).await?,
            Pagination::Unbounded => 0,
        };
        query.window = pagination.window();
        let rows = self.store.fetch(self.resource, &query).await?;
        let page = pagination.describe(total, rows.len() as u64);
        tracing::debug!(resource = %self.resource.type_name, total = page.total, count = page.count, "index");

        let mut nodes: Vec<Node> = rows.into_iter().map(|r| Node::new(self.resource, r)).collect();
        if !self.identifiers_only {
            let plan = include::plan(self.model, self.resource, &ctx.params.include, pagination.is_unbounded())?;
            include::load(self.store, self.model, &ctx.params, self.resource, &mut nodes, &plan).await?;
        }
        Ok(JsonApiResponse::ok(self.serializer().collection(&nodes, &page, path)))
    }

    /// Serialize one stored row with the request's includes.
    async fn document_for(&self, ctx: &RequestContext, instance: Instance) -> Result<Document, AppError> {
        let mut nodes = vec![Node::new(self.resource, instance.row)];
        if !self.identifiers_only {
            let plan = include::plan(self.model, self.resource, &ctx.params.include, false)?;
            include::load(self.store, self.model, &ctx.params, self.resource, &mut nodes, &plan).await?;
        }
        Ok(self.serializer().item(nodes.first()))
    }

    /// `GET /{type}/{id}`.
    pub async fn show(&self, ctx: &RequestContext, id: &str) -> Result<JsonApiResponse, AppError> {
        self.require_operation("read")?;
        let instance = self.find_instance(id).await?;
        Ok(JsonApiResponse::ok(self.document_for(ctx, instance).await?))
    }

    fn location(&self, id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.settings.base_url.as_deref().unwrap_or(""),
            self.resource.path_segment,
            id
        )
    }

    /// `POST /{type}`. Owner-side relationships are set before the insert, the rest after.
    pub async fn store(&self, ctx: &RequestContext) -> Result<JsonApiResponse, AppError> {
        self.require_operation("create")?;
        require_type(&ctx.body, &self.resource.type_name)?;
        if self.settings.forbid_client_ids {
            forbid_id(&ctx.body)?;
        }
        let attributes = ctx.attributes();
        let relationships = ctx.relationships();
        pre_validate(self.resource, &attributes)?;
        validate_or_fail(self.resource, &attributes, &relationships, false)?;

        let mut instance = Instance::default();
        instance.fill(transformer::parse(self.resource, &attributes)?);
        self.add_relationships(&mut instance, &relationships, true).await?;

        let row = self.store.insert(self.resource, &instance.take_dirty()).await?;
        let mut instance = Instance::new(self.resource, row);
        let id = key_string(&instance.id);
        tracing::debug!(resource = %self.resource.type_name, id = %id, "created");

        self.add_relationships(&mut instance, &relationships, false).await?;
        let instance = self.find_instance(&id).await?;
        let document = self.document_for(ctx, instance).await?;
        Ok(JsonApiResponse::created(document, self.location(&id)))
    }

    /// `PATCH /{type}/{id}`. Only attributes present in the request are written.
    pub async fn update(&self, ctx: &RequestContext, id: &str) -> Result<JsonApiResponse, AppError> {
        self.require_operation("update")?;
        require_type(&ctx.body, &self.resource.type_name)?;
        require_id(&ctx.body, id)?;
        let attributes = ctx.attributes();
        let relationships = ctx.relationships();
        pre_validate(self.resource, &attributes)?;

        let mut instance = self.find_instance(id).await?;
        validate_or_fail(self.resource, &attributes, &relationships, true)?;
        instance.fill(transformer::parse(self.resource, &attributes)?);
        self.update_relationships(&mut instance, &relationships).await?;
        self.save(&mut instance).await?;
        tracing::debug!(resource = %self.resource.type_name, id, "updated");

        let instance = self.find_instance(id).await?;
        Ok(JsonApiResponse::ok(self.document_for(ctx, instance).await?))
    }

    /// `DELETE /{type}/{id}`.
    pub async fn destroy(&self, id: &str) -> Result<JsonApiResponse, AppError> {
        self.require_operation("delete")?;
        let instance = self.find_instance(id).await?;
        self.store.delete(self.resource, &instance.id).await?;
        tracing::debug!(resource = %self.resource.type_name, id, "deleted");
        Ok(JsonApiResponse::no_content())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, resolve, ResolvedModel, Settings};
    use crate::request::QueryParams;
    use crate::store::{MemoryStore, Store};
    use serde_json::{json, Value};

    fn model() -> ResolvedModel {
        resolve(&parse_config(include_str!("../../tests/fixtures/billing.json")).unwrap()).unwrap()
    }

    fn ctx(query: &[(&str, &str)], body: Value) -> RequestContext {
        let pairs: Vec<(String, String)> = query.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        RequestContext::new(QueryParams::from_pairs(&pairs), body)
    }

    fn body(response: JsonApiResponse) -> Value {
        serde_json::to_value(response.body.unwrap()).unwrap()
    }

    async fn tags(store: &MemoryStore, model: &ResolvedModel, n: usize) {
        let tag = model.resource_by_type("tag").unwrap();
        for i in 0..n {
            let row = json!({"label": format!("t-{}", i)}).as_object().cloned().unwrap();
            store.insert(tag, &row).await.unwrap();
        }
    }

    #[tokio::test]
    async fn unbounded_page_returns_every_row() {
        let model = model();
        let store = MemoryStore::new(&model);
        tags(&store, &model, 25).await;
        let settings = Settings::default();
        let engine = Engine::for_path(&model, &store, &settings, "tags").unwrap();

        let doc = body(engine.index(&ctx(&[("page.limit", "-1")], Value::Null)).await.unwrap());
        assert_eq!(doc["data"].as_array().unwrap().len(), 25);
        assert_eq!(doc["meta"]["pagination"]["total"], json!(25));
        assert_eq!(doc["meta"]["pagination"]["has_more_pages"], json!(false));

        let doc = body(engine.index(&ctx(&[("page[offset]", "3")], Value::Null)).await.unwrap());
        assert_eq!(doc["data"].as_array().unwrap().len(), 5);
        assert_eq!(doc["meta"]["pagination"]["total"], json!(25));
        assert_eq!(doc["data"][0]["id"], json!("21"));
    }

    #[tokio::test]
    async fn filter_on_hidden_attribute_is_rejected() {
        let model = model();
        let store = MemoryStore::new(&model);
        let settings = Settings::default();
        let engine = Engine::for_path(&model, &store, &settings, "users").unwrap();
        let err = engine
            .index(&ctx(&[("filter[password_hash]", "x")], Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn create_applies_owner_side_relationship_before_insert() {
        let model = model();
        let store = MemoryStore::new(&model);
        let settings = Settings::default().with_base_url("http://api");
        let accounts = Engine::for_path(&model, &store, &settings, "accounts").unwrap();
        accounts
            .store(&ctx(&[], json!({"data": {"type": "account", "attributes": {"name": "acme"}}})))
            .await
            .unwrap();

        let invoices = Engine::for_path(&model, &store, &settings, "invoices").unwrap();
        let response = invoices
            .store(&ctx(
                &[],
                json!({"data": {
                    "type": "invoice",
                    "attributes": {"reference": "A-1"},
                    "relationships": {"account": {"data": {"type": "account", "id": "1"}}}
                }}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status, axum::http::StatusCode::CREATED);
        assert_eq!(response.location.as_deref(), Some("http://api/invoices/1"));
        let doc = body(response);
        assert_eq!(doc["data"]["attributes"], json!({"reference": "A-1"}));
        assert_eq!(doc["data"]["relationships"]["account"]["data"], json!({"type": "account", "id": "1"}));
        assert_eq!(doc["included"][0]["attributes"]["name"], json!("acme"));
    }

    #[tokio::test]
    async fn create_checks_document_and_rules() {
        let model = model();
        let store = MemoryStore::new(&model);
        let settings = Settings::default();
        let engine = Engine::for_path(&model, &store, &settings, "tags").unwrap();

        let err = engine
            .store(&ctx(&[], json!({"data": {"type": "user", "attributes": {"label": "x"}}})))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(m) if m == "The type property doesn't match the endpoint."));

        let err = engine
            .store(&ctx(&[], json!({"data": {"type": "tag", "attributes": {"label": "Not Valid"}}})))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let created = engine
            .store(&ctx(&[], json!({"data": {"type": "tag", "id": "77", "attributes": {"label": "ok"}}})))
            .await
            .unwrap();
        assert_eq!(body(created)["data"]["id"], json!("1"));
    }

    #[tokio::test]
    async fn client_ids_rejected_when_forbidden() {
        let model = model();
        let store = MemoryStore::new(&model);
        let settings = Settings {
            forbid_client_ids: true,
            ..Settings::default()
        };
        let engine = Engine::for_path(&model, &store, &settings, "tags").unwrap();
        let err = engine
            .store(&ctx(&[], json!({"data": {"type": "tag", "id": "1", "attributes": {"label": "x"}}})))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ClientGeneratedId(_)));
    }

    #[tokio::test]
    async fn update_writes_only_present_attributes_and_disabled_operations_fail() {
        let model = model();
        let store = MemoryStore::new(&model);
        let settings = Settings::default();
        let users = Engine::for_path(&model, &store, &settings, "users").unwrap();
        users
            .store(&ctx(&[], json!({"data": {"type": "user", "attributes": {"name": "ann", "email": "a@x.io"}}})))
            .await
            .unwrap();
        let doc = body(
            users
                .update(&ctx(&[], json!({"data": {"type": "user", "id": "1", "attributes": {"name": "anne"}}})), "1")
                .await
                .unwrap(),
        );
        assert_eq!(doc["data"]["attributes"], json!({"name": "anne", "email": "a@x.io"}));

        let err = users
            .update(&ctx(&[], json!({"data": {"type": "user", "id": "2", "attributes": {}}})), "1")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(m) if m == "The id property doesn't match the endpoint."));

        let tags = Engine::for_path(&model, &store, &settings, "tags").unwrap();
        assert!(matches!(tags.destroy("1").await.unwrap_err(), AppError::NotImplemented(_)));
        assert!(matches!(users.destroy("1").await.unwrap().status, axum::http::StatusCode::NO_CONTENT));
        assert!(matches!(users.show(&RequestContext::default(), "1").await.unwrap_err(), AppError::NotFound(_)));
    }
}
