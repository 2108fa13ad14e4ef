pub mod decorator;
pub mod placeholders;

pub use decorator::{DecoratorApi, DecoratorPlugin, DECORATOR_PLUGIN};
pub use placeholders::{Placeholders, PlaceholdersApi, PlaceholdersPlugin, PLACEHOLDERS_PLUGIN};
