//! The fixed CRUD route table.

use http::Method;
use std::fmt;

/// Conventional CRUD endpoints and their `{ method, path }` pairs, relative to a controller
/// prefix.
///
/// | Route        | Method | Path           |
/// |--------------|--------|----------------|
/// | `GetMany`    | GET    | `""`           |
/// | `GetOne`     | GET    | `":id"`        |
/// | `CreateOne`  | POST   | `""`           |
/// | `CreateMany` | POST   | `"/bulk-create"` |
/// | `UpdateMany` | PUT    | `""`           |
/// | `UpdateOne`  | PUT    | `":id"`        |
/// | `DeleteMany` | DELETE | `""`           |
/// | `DeleteOne`  | DELETE | `":id"`        |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrudRoute {
    GetMany,
    GetOne,
    CreateOne,
    CreateMany,
    UpdateMany,
    UpdateOne,
    DeleteMany,
    DeleteOne,
}

impl CrudRoute {
    pub const ALL: [CrudRoute; 8] = [
        CrudRoute::GetMany,
        CrudRoute::GetOne,
        CrudRoute::CreateOne,
        CrudRoute::CreateMany,
        CrudRoute::UpdateMany,
        CrudRoute::UpdateOne,
        CrudRoute::DeleteMany,
        CrudRoute::DeleteOne,
    ];

    #[must_use]
    pub fn method(self) -> Method {
        match self {
            CrudRoute::GetMany | CrudRoute::GetOne => Method::GET,
            CrudRoute::CreateOne | CrudRoute::CreateMany => Method::POST,
            CrudRoute::UpdateMany | CrudRoute::UpdateOne => Method::PUT,
            CrudRoute::DeleteMany | CrudRoute::DeleteOne => Method::DELETE,
        }
    }

    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            CrudRoute::GetMany
            | CrudRoute::CreateOne
            | CrudRoute::UpdateMany
            | CrudRoute::DeleteMany => "",
            CrudRoute::GetOne | CrudRoute::UpdateOne | CrudRoute::DeleteOne => ":id",
            CrudRoute::CreateMany => "/bulk-create",
        }
    }
}

impl fmt::Display for CrudRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.method(), self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_path_pairs_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for route in CrudRoute::ALL {
            assert!(seen.insert((route.method(), route.path())), "{route}");
        }
    }

    #[test]
    fn test_bulk_create() {
        assert_eq!(CrudRoute::CreateMany.method(), Method::POST);
        assert_eq!(CrudRoute::CreateMany.path(), "/bulk-create");
    }
}
