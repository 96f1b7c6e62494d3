//! Read-only products, product versions and tags, so related URIs in other
//! resources dereference.

use crate::{
    api::{
        error::ApiResult,
        query::Filtering,
        reference::resource_uri,
        resource::{object, Resource, ResourceMeta, Verb},
    },
    model::{
        catalog::{Product, ProductVersionView, Tag},
        Id,
    },
    store::{views, Transaction},
};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

const READ_ONLY: &[Verb] = &[Verb::Get];

pub(crate) fn productversion_uri(id: Id) -> String {
    resource_uri(ProductVersions::META.name, id)
}

pub(crate) fn productversion_object(view: &ProductVersionView) -> Value {
    json!({
        "id": view.productversion.id,
        "product": resource_uri(Products::META.name, view.product.id),
        "version": view.productversion.version,
        "name": view.productversion.name,
        "resource_uri": productversion_uri(view.productversion.id),
    })
}

pub(crate) fn tag_object(tag: &Tag) -> Value {
    json!({
        "id": tag.id,
        "name": tag.name,
        "product": tag.product_id.map(|id| resource_uri(Products::META.name, id)),
        "resource_uri": resource_uri(Tags::META.name, tag.id),
    })
}

pub struct Products;

#[async_trait]
impl Resource for Products {
    type View = Product;

    const META: ResourceMeta = ResourceMeta {
        name: "products",
        description: "Products under test",
        fields: &["id", "name", "description"],
        filtering: &[("name", Filtering::All)],
        ordering: &["id", "name"],
        list_methods: READ_ONLY,
        detail_methods: READ_ONLY,
        ..ResourceMeta::DEFAULT
    };

    async fn fetch_list(tx: &mut dyn Transaction) -> ApiResult<Vec<Product>> {
        Ok(tx.products().await?)
    }

    async fn fetch_one(tx: &mut dyn Transaction, id: Id) -> ApiResult<Option<Product>> {
        Ok(tx.product(id).await?)
    }

    fn dehydrate(view: &Product) -> Map<String, Value> {
        object(json!({
            "id": view.id,
            "name": view.name,
            "description": view.description,
        }))
    }
}

pub struct ProductVersions;

#[async_trait]
impl Resource for ProductVersions {
    type View = ProductVersionView;

    const META: ResourceMeta = ResourceMeta {
        name: "productversions",
        description: "Released versions of a product",
        fields: &["id", "product", "version", "name"],
        filtering: &[
            ("product", Filtering::AllWithRelations),
            ("version", Filtering::All),
        ],
        ordering: &["id", "version"],
        list_methods: READ_ONLY,
        detail_methods: READ_ONLY,
        ..ResourceMeta::DEFAULT
    };

    async fn fetch_list(tx: &mut dyn Transaction) -> ApiResult<Vec<ProductVersionView>> {
        Ok(views::productversions(tx).await?)
    }

    async fn fetch_one(tx: &mut dyn Transaction, id: Id) -> ApiResult<Option<ProductVersionView>> {
        Ok(views::productversion(tx, id).await?)
    }

    fn dehydrate(view: &ProductVersionView) -> Map<String, Value> {
        object(productversion_object(view))
    }
}

pub struct Tags;

#[async_trait]
impl Resource for Tags {
    type View = Tag;

    const META: ResourceMeta = ResourceMeta {
        name: "tags",
        description: "Labels attached to case versions",
        fields: &["id", "name", "product"],
        filtering: &[("name", Filtering::All), ("product", Filtering::All)],
        ordering: &["id", "name"],
        list_methods: READ_ONLY,
        detail_methods: READ_ONLY,
        ..ResourceMeta::DEFAULT
    };

    async fn fetch_list(tx: &mut dyn Transaction) -> ApiResult<Vec<Tag>> {
        Ok(tx.tags().await?)
    }

    async fn fetch_one(tx: &mut dyn Transaction, id: Id) -> ApiResult<Option<Tag>> {
        Ok(tx.tag(id).await?)
    }

    fn dehydrate(view: &Tag) -> Map<String, Value> {
        object(tag_object(view))
    }
}
