//! Application-scoped service container.
//!
//! A small name-keyed registry the application uses to obtain middleware
//! factory instances and share services with handlers. Values are stored
//! type-erased behind `Arc` and recovered by downcast; `resolve_or` gives the
//! direct-construction fallback callers use when a name was never registered
//! (e.g. during bootstrap). The container's lifetime is tied to the
//! application instance — dropping the app drops the services, keeping tests
//! hermetic.
//!
//! # Examples
//!
//! ```rust
//! use nextrush::container::ServiceContainer;
//!
//! #[derive(Debug, PartialEq)]
//! struct Greeting(String);
//!
//! let container = ServiceContainer::new();
//! container.register("greeting", || Greeting("hello".into()));
//!
//! let greeting = container.resolve::<Greeting>("greeting").unwrap();
//! assert_eq!(*greeting, Greeting("hello".into()));
//! ```

use std::{
    any::Any,
    sync::Arc,
};

use dashmap::DashMap;

/// Name-keyed service registry with typed resolution.
#[derive(Default)]
pub struct ServiceContainer {
    entries: DashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl ServiceContainer {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service under a name, constructing it from the factory.
    ///
    /// Registering the same name again replaces the previous instance.
    /// Returns the constructed instance.
    pub fn register<T, F>(&self, name: &str, factory: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let instance = Arc::new(factory());
        self.entries
            .insert(name.to_owned(), instance.clone() as Arc<dyn Any + Send + Sync>);
        instance
    }

    /// Resolves a service by name, when present and of the requested type.
    pub fn resolve<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.entries
            .get(name)
            .map(|entry| entry.clone())
            .and_then(|any| any.downcast::<T>().ok())
    }

    /// Resolves a service, falling back to direct construction when the
    /// name is missing or holds a different type.
    ///
    /// The fallback instance is registered so later resolutions agree.
    pub fn resolve_or<T, F>(&self, name: &str, fallback: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        match self.resolve::<T>(name) {
            Some(instance) => instance,
            None => self.register(name, fallback),
        }
    }

    /// Removes a service by name.
    pub fn remove(&self, name: &str) {
        self.entries.remove(name);
    }

    /// Drops every registered service.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_resolve_round_trips() {
        let container = ServiceContainer::new();
        container.register("count", || 41u32);
        assert_eq!(*container.resolve::<u32>("count").unwrap(), 41);
    }

    #[test]
    fn resolve_with_wrong_type_is_none() {
        let container = ServiceContainer::new();
        container.register("count", || 41u32);
        assert!(container.resolve::<String>("count").is_none());
    }

    #[test]
    fn resolve_or_falls_back_and_registers() {
        let container = ServiceContainer::new();
        let first = container.resolve_or("missing", || "built".to_string());
        assert_eq!(*first, "built");
        // The fallback stuck: the next resolution sees the same instance.
        assert_eq!(*container.resolve::<String>("missing").unwrap(), "built");
    }

    #[test]
    fn re_registration_replaces() {
        let container = ServiceContainer::new();
        container.register("v", || 1u32);
        container.register("v", || 2u32);
        assert_eq!(*container.resolve::<u32>("v").unwrap(), 2);
    }

    #[test]
    fn clear_empties_the_container() {
        let container = ServiceContainer::new();
        container.register("v", || 1u32);
        container.clear();
        assert!(container.resolve::<u32>("v").is_none());
    }
}
