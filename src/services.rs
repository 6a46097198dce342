//! The service-lookup collaborator.
//!
//! The dispatcher only consumes [`ServiceProvider`] and [`ServiceScope`]; the
//! [`ServiceCollection`] here is a small container implementing both, good
//! enough for applications that have no container of their own.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    hash::{Hash, Hasher},
    sync::{Arc, Mutex, OnceLock, PoisonError},
};

/// A live, type-erased service instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Identifies a service type.
#[derive(Clone)]
pub struct ServiceKey {
    type_id: TypeId,
    name: &'static str,
}

impl ServiceKey {
    pub fn of<T: Any>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The fully qualified type name, used in method descriptors.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl PartialEq for ServiceKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ServiceKey {}

impl Hash for ServiceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    Singleton,
    Scoped,
    Transient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub service: ServiceKey,
    pub lifetime: Lifetime,
    pub key: Option<String>,
}

pub trait ServiceProvider: Send + Sync + 'static {
    /// Every registration, keyed ones included.
    fn descriptors(&self) -> Vec<ServiceDescriptor>;

    /// The unkeyed registration for `service`, if any.
    fn descriptor(&self, service: &ServiceKey) -> Option<ServiceDescriptor> {
        self.descriptors()
            .into_iter()
            .find(|d| &d.service == service && d.key.is_none())
    }

    /// Open a resolution scope. Scoped instances live until the scope is dropped.
    fn create_scope(&self) -> Box<dyn ServiceScope + '_>;
}

pub trait ServiceScope: Send {
    fn resolve(&self, service: &ServiceKey) -> Option<Instance>;
    fn resolve_keyed(&self, service: &ServiceKey, key: &str) -> Option<Instance>;
}

/// A provider with nothing registered.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoServices;

impl ServiceProvider for NoServices {
    fn descriptors(&self) -> Vec<ServiceDescriptor> {
        Vec::new()
    }

    fn create_scope(&self) -> Box<dyn ServiceScope + '_> {
        Box::new(NoServices)
    }
}

impl ServiceScope for NoServices {
    fn resolve(&self, _service: &ServiceKey) -> Option<Instance> {
        None
    }

    fn resolve_keyed(&self, _service: &ServiceKey, _key: &str) -> Option<Instance> {
        None
    }
}

type Factory = Arc<dyn Fn() -> Instance + Send + Sync>;
type RegistrationKey = (ServiceKey, Option<String>);

struct Registration {
    descriptor: ServiceDescriptor,
    factory: Factory,
    singleton: OnceLock<Instance>,
}

/// Registrations by type (and optional key) with singleton, scoped and transient lifetimes.
#[derive(Default)]
pub struct ServiceCollection {
    registrations: HashMap<RegistrationKey, Registration>,
}

impl ServiceCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_singleton<T: Any + Send + Sync>(&mut self, value: T) -> &mut Self {
        let instance: Instance = Arc::new(value);
        self.insert::<T>(None, Lifetime::Singleton, Arc::new(move || instance.clone()))
    }

    pub fn add_keyed_singleton<T: Any + Send + Sync>(
        &mut self,
        key: impl Into<String>,
        value: T,
    ) -> &mut Self {
        let instance: Instance = Arc::new(value);
        self.insert::<T>(
            Some(key.into()),
            Lifetime::Singleton,
            Arc::new(move || instance.clone()),
        )
    }

    pub fn add_scoped<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.insert::<T>(None, Lifetime::Scoped, Arc::new(move || Arc::new(factory())))
    }

    pub fn add_transient<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.insert::<T>(None, Lifetime::Transient, Arc::new(move || Arc::new(factory())))
    }

    fn insert<T: Any>(
        &mut self,
        key: Option<String>,
        lifetime: Lifetime,
        factory: Factory,
    ) -> &mut Self {
        let service = ServiceKey::of::<T>();
        let registration = Registration {
            descriptor: ServiceDescriptor {
                service: service.clone(),
                lifetime,
                key: key.clone(),
            },
            factory,
            singleton: OnceLock::new(),
        };
        self.registrations.insert((service, key), registration);
        self
    }

    pub fn build(self) -> Arc<dyn ServiceProvider> {
        Arc::new(self)
    }
}

impl ServiceProvider for ServiceCollection {
    fn descriptors(&self) -> Vec<ServiceDescriptor> {
        self.registrations
            .values()
            .map(|r| r.descriptor.clone())
            .collect()
    }

    fn descriptor(&self, service: &ServiceKey) -> Option<ServiceDescriptor> {
        self.registrations
            .get(&(service.clone(), None))
            .map(|r| r.descriptor.clone())
    }

    fn create_scope(&self) -> Box<dyn ServiceScope + '_> {
        Box::new(CollectionScope {
            collection: self,
            scoped: Mutex::new(HashMap::new()),
        })
    }
}

struct CollectionScope<'a> {
    collection: &'a ServiceCollection,
    scoped: Mutex<HashMap<RegistrationKey, Instance>>,
}

impl CollectionScope<'_> {
    fn lookup(&self, key: RegistrationKey) -> Option<Instance> {
        let registration = self.collection.registrations.get(&key)?;
        let instance = match registration.descriptor.lifetime {
            Lifetime::Singleton => registration
                .singleton
                .get_or_init(|| (registration.factory)())
                .clone(),
            Lifetime::Scoped => self
                .scoped
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(key)
                .or_insert_with(|| (registration.factory)())
                .clone(),
            Lifetime::Transient => (registration.factory)(),
        };
        Some(instance)
    }
}

impl ServiceScope for CollectionScope<'_> {
    fn resolve(&self, service: &ServiceKey) -> Option<Instance> {
        self.lookup((service.clone(), None))
    }

    fn resolve_keyed(&self, service: &ServiceKey, key: &str) -> Option<Instance> {
        self.lookup((service.clone(), Some(key.to_owned())))
    }
}
