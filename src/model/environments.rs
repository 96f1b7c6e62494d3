//! Profiles, categories, elements and environments.

use super::{Field, Id, Lookup, Scalar};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub id: Id,
    pub name: String,
}

impl Lookup for Profile {
    fn pk(&self) -> Id {
        self.id
    }

    fn field(&self, name: &str) -> Option<Field<'_>> {
        let value = match name {
            "id" => Scalar::Int(self.id),
            "name" => Scalar::from(self.name.as_str()),
            _ => return None,
        };
        Some(Field::Value(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: Id,
    pub name: String,
}

impl Lookup for Category {
    fn pk(&self) -> Id {
        self.id
    }

    fn field(&self, name: &str) -> Option<Field<'_>> {
        let value = match name {
            "id" => Scalar::Int(self.id),
            "name" => Scalar::from(self.name.as_str()),
            _ => return None,
        };
        Some(Field::Value(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub id: Id,
    pub name: String,
    pub category_id: Id,
}

impl Lookup for Element {
    fn pk(&self) -> Id {
        self.id
    }

    fn field(&self, name: &str) -> Option<Field<'_>> {
        let value = match name {
            "id" => Scalar::Int(self.id),
            "name" => Scalar::from(self.name.as_str()),
            "category" => Scalar::Int(self.category_id),
            _ => return None,
        };
        Some(Field::Value(value))
    }
}

/// An environment: one profile and a set of elements from distinct categories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub id: Id,
    pub profile_id: Id,
    pub element_ids: Vec<Id>,
}

#[derive(Debug, Clone)]
pub struct CategoryView {
    pub category: Category,
    pub elements: Vec<Element>,
}

impl Lookup for CategoryView {
    fn pk(&self) -> Id {
        self.category.id
    }

    fn field(&self, name: &str) -> Option<Field<'_>> {
        if name == "elements" {
            return Some(Field::Related(
                self.elements.iter().map(|e| e as &dyn Lookup).collect(),
            ));
        }
        self.category.field(name)
    }
}

#[derive(Debug, Clone)]
pub struct ElementView {
    pub element: Element,
    pub category: Category,
}

impl Lookup for ElementView {
    fn pk(&self) -> Id {
        self.element.id
    }

    fn field(&self, name: &str) -> Option<Field<'_>> {
        if name == "category" {
            return Some(Field::Related(vec![&self.category]));
        }
        self.element.field(name)
    }
}

#[derive(Debug, Clone)]
pub struct EnvironmentView {
    pub environment: Environment,
    pub profile: Profile,
    pub elements: Vec<Element>,
}

impl Lookup for EnvironmentView {
    fn pk(&self) -> Id {
        self.environment.id
    }

    fn field(&self, name: &str) -> Option<Field<'_>> {
        match name {
            "id" => Some(Field::Value(Scalar::Int(self.environment.id))),
            "profile" => Some(Field::Related(vec![&self.profile])),
            "elements" => Some(Field::Related(
                self.elements.iter().map(|e| e as &dyn Lookup).collect(),
            )),
            _ => None,
        }
    }
}
