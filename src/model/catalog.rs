//! Users, products, product versions and tags referenced by the library.

use super::{Field, Id, Lookup, Scalar};
use secrecy::SecretString;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Id,
    pub username: String,
}

/// A user together with its API key and granted permission codenames.
#[derive(Debug, Clone)]
pub struct Account {
    pub user: User,
    pub api_key: SecretString,
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub id: Id,
    pub name: String,
    pub description: String,
}

impl Lookup for Product {
    fn pk(&self) -> Id {
        self.id
    }

    fn field(&self, name: &str) -> Option<Field<'_>> {
        let value = match name {
            "id" => Scalar::Int(self.id),
            "name" => Scalar::from(self.name.as_str()),
            "description" => Scalar::from(self.description.as_str()),
            _ => return None,
        };
        Some(Field::Value(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductVersion {
    pub id: Id,
    pub product_id: Id,
    pub version: String,
    /// Display name, `"<product> <version>"`.
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ProductVersionView {
    pub productversion: ProductVersion,
    pub product: Product,
}

impl Lookup for ProductVersionView {
    fn pk(&self) -> Id {
        self.productversion.id
    }

    fn field(&self, name: &str) -> Option<Field<'_>> {
        let value = match name {
            "id" => Scalar::Int(self.productversion.id),
            "version" => Scalar::from(self.productversion.version.as_str()),
            "name" => Scalar::from(self.productversion.name.as_str()),
            "product" => return Some(Field::Related(vec![&self.product])),
            _ => return None,
        };
        Some(Field::Value(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub id: Id,
    pub name: String,
    pub product_id: Option<Id>,
}

impl Lookup for Tag {
    fn pk(&self) -> Id {
        self.id
    }

    fn field(&self, name: &str) -> Option<Field<'_>> {
        let value = match name {
            "id" => Scalar::Int(self.id),
            "name" => Scalar::from(self.name.as_str()),
            "product" => Scalar::from(self.product_id),
            _ => return None,
        };
        Some(Field::Value(value))
    }
}

/// Builds the display name stored with a product version.
#[must_use]
pub fn productversion_name(product: &Product, version: &str) -> String {
    format!("{} {}", product.name, version)
}
