pub mod catalog;
pub mod environments;
pub mod health;
pub mod library;
pub mod selection;

use super::resource::{routes, Resource, ResourceMeta};
use axum::Router;

/// Every resource served under the API prefix, in documentation order.
pub const RESOURCES: &[ResourceMeta] = &[
    environments::Profiles::META,
    environments::Categories::META,
    environments::Elements::META,
    environments::Environments::META,
    library::Suites::META,
    library::Cases::META,
    library::CaseSteps::META,
    library::CaseVersions::META,
    selection::CaseSelection::META,
    selection::CaseVersionSelection::META,
    catalog::Products::META,
    catalog::ProductVersions::META,
    catalog::Tags::META,
];

/// Routes of all resources, relative to the API prefix.
pub fn resources() -> Router {
    Router::new()
        .merge(routes::<environments::Profiles>())
        .merge(routes::<environments::Categories>())
        .merge(routes::<environments::Elements>())
        .merge(routes::<environments::Environments>())
        .merge(routes::<library::Suites>())
        .merge(routes::<library::Cases>())
        .merge(routes::<library::CaseSteps>())
        .merge(routes::<library::CaseVersions>())
        .merge(routes::<selection::CaseSelection>())
        .merge(routes::<selection::CaseVersionSelection>())
        .merge(routes::<catalog::Products>())
        .merge(routes::<catalog::ProductVersions>())
        .merge(routes::<catalog::Tags>())
}
