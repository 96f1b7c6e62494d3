//! `OpenAPI` document built from the resource metadata.
//!
//! Resource routes are generic over [`Resource`](super::resource::Resource), so
//! the paths are assembled here from each [`ResourceMeta`] instead of per-handler
//! annotations.

use super::{
    handlers::{health::Health, RESOURCES},
    resource::{ResourceMeta, Verb},
};
use utoipa::openapi::{
    content::ContentBuilder,
    path::{
        Operation, OperationBuilder, Parameter, ParameterBuilder, ParameterIn, PathItem,
        PathsBuilder,
    },
    request_body::RequestBodyBuilder,
    response::{Response, ResponseBuilder},
    schema::{ComponentsBuilder, ObjectBuilder, Ref, Schema, Type},
    security::{ApiKey, ApiKeyValue, SecurityRequirement, SecurityScheme},
    Contact, InfoBuilder, License, OpenApiBuilder, Required, Tag,
};

const JSON: &str = "application/json";
const SECURITY_SCHEME: &str = "api_key";

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut paths = PathsBuilder::new().path("/health", health_item());
    let mut tags = Vec::with_capacity(RESOURCES.len() + 1);

    for meta in RESOURCES {
        paths = paths
            .path(meta.list_path(), list_item(meta))
            .path(format!("{}{{id}}/", meta.list_path()), detail_item(meta));

        let mut tag = Tag::new(meta.name);
        tag.description = Some(meta.description.to_string());
        tags.push(tag);
    }

    let mut health_tag = Tag::new("health");
    health_tag.description = Some("Service and store status".to_string());
    tags.push(health_tag);

    let components = ComponentsBuilder::new()
        .schema_from::<Health>()
        .security_scheme(
            SECURITY_SCHEME,
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                "Authorization",
                "ApiKey <username>:<api_key>",
            ))),
        )
        .build();

    let mut spec = cargo_openapi();
    spec.paths = paths.build();
    spec.components = Some(components);
    spec.tags = Some(tags);
    spec
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata for the info block.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn health_item() -> PathItem {
    let schema = ContentBuilder::new()
        .schema(Some(Ref::from_schema_name("Health")))
        .build();
    let operation = OperationBuilder::new()
        .operation_id(Some("health"))
        .summary(Some("Report build information and store status"))
        .tag("health")
        .response(
            "200",
            ResponseBuilder::new()
                .description("Store answers")
                .content(JSON, schema.clone())
                .build(),
        )
        .response(
            "503",
            ResponseBuilder::new()
                .description("Store does not answer")
                .content(JSON, schema)
                .build(),
        )
        .build();

    let mut item = PathItem::default();
    item.get = Some(operation);
    item
}

fn list_item(meta: &ResourceMeta) -> PathItem {
    let mut item = PathItem::default();

    let mut list = operation(meta, "list", &format!("List {}", meta.name))
        .response("200", response("Paginated list"))
        .response("400", response("Invalid filter, ordering or paging"));
    for parameter in list_parameters(meta) {
        list = list.parameter(parameter);
    }
    item.get = Some(list.build());

    if meta.allows_list(Verb::Post) {
        item.post = Some(write_operation(
            meta,
            "create",
            &format!("Create one of {}", meta.name),
            "201",
            "Created; Location names the new record",
        ));
    }
    if meta.allows_list(Verb::Patch) {
        item.patch = Some(write_operation(
            meta,
            "create_combinations",
            &format!("Create {} for every combination of the given categories", meta.name),
            "202",
            "All combinations created",
        ));
    }
    item
}

fn detail_item(meta: &ResourceMeta) -> PathItem {
    let mut item = PathItem::default();

    item.get = Some(
        operation(meta, "read", &format!("Read one of {}", meta.name))
            .parameter(id_parameter())
            .response("200", response("The record"))
            .response("404", response("No such record"))
            .build(),
    );

    if meta.allows_detail(Verb::Put) {
        let status = if meta.always_return_data { "202" } else { "204" };
        item.put = Some(write_operation(
            meta,
            "update",
            &format!("Update one of {}", meta.name),
            status,
            "Updated",
        ));
    }
    if meta.allows_detail(Verb::Delete) {
        let mut delete = secured(operation(meta, "delete", &format!("Delete one of {}", meta.name)))
            .parameter(id_parameter())
            .response("204", response("Deleted"))
            .response("404", response("No such record"));
        delete = with_auth_responses(delete);
        item.delete = Some(delete.build());
    }
    item
}

fn operation(meta: &ResourceMeta, verb: &str, summary: &str) -> OperationBuilder {
    OperationBuilder::new()
        .operation_id(Some(format!("{}_{verb}", meta.name)))
        .summary(Some(summary))
        .tag(meta.name)
}

fn secured(builder: OperationBuilder) -> OperationBuilder {
    builder.security(SecurityRequirement::new(
        SECURITY_SCHEME,
        Vec::<String>::new(),
    ))
}

fn with_auth_responses(builder: OperationBuilder) -> OperationBuilder {
    builder
        .response("401", response("Missing or invalid API key"))
        .response("403", response("Permission required"))
}

fn write_operation(
    meta: &ResourceMeta,
    verb: &str,
    summary: &str,
    status: &str,
    description: &str,
) -> Operation {
    let mut builder = secured(operation(meta, verb, summary))
        .request_body(Some(
            RequestBodyBuilder::new()
                .content(JSON, ContentBuilder::new().build())
                .required(Some(Required::True))
                .build(),
        ))
        .response(status, response(description))
        .response("400", response("Invalid payload"));
    if verb == "update" {
        builder = builder
            .parameter(id_parameter())
            .response("404", response("No such record"));
    }
    with_auth_responses(builder).build()
}

fn response(description: &str) -> Response {
    ResponseBuilder::new().description(description).build()
}

fn query_parameter(name: &str, description: &str, schema_type: Type) -> Parameter {
    ParameterBuilder::new()
        .name(name)
        .parameter_in(ParameterIn::Query)
        .required(Required::False)
        .description(Some(description))
        .schema(Some(Schema::Object(
            ObjectBuilder::new().schema_type(schema_type).build(),
        )))
        .build()
}

fn id_parameter() -> Parameter {
    ParameterBuilder::new()
        .name("id")
        .parameter_in(ParameterIn::Path)
        .required(Required::True)
        .schema(Some(Schema::Object(
            ObjectBuilder::new().schema_type(Type::Integer).build(),
        )))
        .build()
}

fn list_parameters(meta: &ResourceMeta) -> Vec<Parameter> {
    let mut parameters = vec![
        query_parameter("limit", "Page size; 0 returns up to 1000 records", Type::Integer),
        query_parameter("offset", "Records to skip", Type::Integer),
    ];
    if !meta.ordering.is_empty() {
        parameters.push(query_parameter(
            "order_by",
            &format!(
                "One of {}; prefix with '-' for descending",
                meta.ordering.join(", ")
            ),
            Type::String,
        ));
    }
    for (field, _) in meta.filtering {
        parameters.push(query_parameter(
            field,
            &format!("Filter on {field}; lookups use the {field}__<lookup> form"),
            Type::String,
        ));
        if meta.negation {
            parameters.push(query_parameter(
                &format!("{field}__ne"),
                &format!("Exclude records matching {field}"),
                Type::String,
            ));
        }
    }
    parameters
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    if let Some(start) = author.find('<') {
        let name = author[..start].trim();
        let email = author[start + 1..].trim_end_matches('>').trim();
        let name = if name.is_empty() { None } else { Some(name) };
        let email = if email.is_empty() { None } else { Some(email) };
        (name, email)
    } else {
        let name = author.trim();
        (if name.is_empty() { None } else { Some(name) }, None)
    }
}
