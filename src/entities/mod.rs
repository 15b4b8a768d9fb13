//! SeaORM entities

pub mod documents;

pub mod prelude {
    pub use super::documents::Entity as Documents;
}
