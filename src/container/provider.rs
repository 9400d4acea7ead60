//! Typed constructors and the instance registry they read from and write to.
//!
//! A [`Provider`] names the types it consumes and the types it contributes.
//! Inputs and outputs are expressed as tuples so the declared type sets come
//! straight from the closure signature:
//!
//! ```ignore
//! Provider::new("new_metrics", |lc, (log,): (Logger,)| {
//!     let metrics = Arc::new(Metrics::new());
//!     lc.append(Hook::new("counters").on_stop(/* ... */));
//!     Ok(metrics)
//! })
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use super::error::ContainerError;
use super::lifecycle::Lifecycle;

/// Identity of a capability type inside the container.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Type name with module paths stripped, e.g. `Arc<dyn Database>`.
    pub fn short_name(&self) -> String {
        short_type_name(self.name)
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl std::hash::Hash for TypeKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_name())
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_name())
    }
}

fn short_type_name(full: &str) -> String {
    fn last_segment(path: &str) -> &str {
        path.rsplit("::").next().unwrap_or(path)
    }

    let mut out = String::with_capacity(full.len());
    let mut path = String::new();
    for ch in full.chars() {
        if ch.is_alphanumeric() || ch == '_' || ch == ':' {
            path.push(ch);
        } else {
            out.push_str(last_segment(&path));
            path.clear();
            out.push(ch);
        }
    }
    out.push_str(last_segment(&path));
    out
}

/// One instance per type. Values are cloned out, so capabilities are
/// normally `Arc`s and configs are plain values.
#[derive(Default)]
pub struct Registry {
    instances: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Clone + Send + Sync + 'static>(&mut self, value: T) {
        self.instances.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Result<T, ContainerError> {
        self.instances
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
            .ok_or_else(|| ContainerError::MissingInstance(TypeKey::of::<T>().short_name()))
    }

    pub fn contains(&self, key: &TypeKey) -> bool {
        self.instances.contains_key(&key.id())
    }
}

/// A tuple of capability types a constructor consumes.
pub trait Inputs: Sized {
    fn keys() -> Vec<TypeKey>;
    fn fetch(registry: &Registry) -> Result<Self, ContainerError>;
}

/// A tuple of capability types a constructor contributes.
pub trait Outputs: Sized {
    fn keys() -> Vec<TypeKey>;
    fn store(self, registry: &mut Registry);
}

impl Inputs for () {
    fn keys() -> Vec<TypeKey> {
        Vec::new()
    }

    fn fetch(_registry: &Registry) -> Result<Self, ContainerError> {
        Ok(())
    }
}

macro_rules! impl_tuples {
    ($($ty:ident),+) => {
        impl<$($ty),+> Inputs for ($($ty,)+)
        where
            $($ty: Clone + Send + Sync + 'static),+
        {
            fn keys() -> Vec<TypeKey> {
                vec![$(TypeKey::of::<$ty>()),+]
            }

            fn fetch(registry: &Registry) -> Result<Self, ContainerError> {
                Ok(($(registry.get::<$ty>()?,)+))
            }
        }

        impl<$($ty),+> Outputs for ($($ty,)+)
        where
            $($ty: Clone + Send + Sync + 'static),+
        {
            fn keys() -> Vec<TypeKey> {
                vec![$(TypeKey::of::<$ty>()),+]
            }

            #[allow(non_snake_case)]
            fn store(self, registry: &mut Registry) {
                let ($($ty,)+) = self;
                $(registry.insert($ty);)+
            }
        }
    };
}

impl_tuples!(A);
impl_tuples!(A, B);
impl_tuples!(A, B, C);
impl_tuples!(A, B, C, D);
impl_tuples!(A, B, C, D, E);
impl_tuples!(A, B, C, D, E, F);

pub(crate) type ConstructFn =
    Box<dyn FnOnce(&mut Lifecycle, &mut Registry) -> anyhow::Result<()> + Send>;

/// A typed constructor, erased once it is declared.
pub struct Provider {
    pub(crate) name: String,
    pub(crate) inputs: Vec<TypeKey>,
    pub(crate) outputs: Vec<TypeKey>,
    pub(crate) construct: ConstructFn,
}

impl Provider {
    /// Declare a constructor contributing exactly one type.
    pub fn new<I, O, F>(name: impl Into<String>, constructor: F) -> Self
    where
        I: Inputs + 'static,
        O: Clone + Send + Sync + 'static,
        F: FnOnce(&mut Lifecycle, I) -> anyhow::Result<O> + Send + 'static,
    {
        Self::multi(name, move |lifecycle, inputs: I| {
            constructor(lifecycle, inputs).map(|output| (output,))
        })
    }

    /// Declare a constructor contributing several types at once.
    pub fn multi<I, O, F>(name: impl Into<String>, constructor: F) -> Self
    where
        I: Inputs + 'static,
        O: Outputs + 'static,
        F: FnOnce(&mut Lifecycle, I) -> anyhow::Result<O> + Send + 'static,
    {
        Self {
            name: name.into(),
            inputs: I::keys(),
            outputs: O::keys(),
            construct: Box::new(move |lifecycle, registry| {
                let inputs = I::fetch(registry)?;
                constructor(lifecycle, inputs)?.store(registry);
                Ok(())
            }),
        }
    }
}

/// A function run purely for its side effects once its inputs exist.
pub struct Invoker {
    pub(crate) name: String,
    pub(crate) inputs: Vec<TypeKey>,
    pub(crate) construct: ConstructFn,
}

impl Invoker {
    pub fn new<I, F>(name: impl Into<String>, invoke: F) -> Self
    where
        I: Inputs + 'static,
        F: FnOnce(I) -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            name: name.into(),
            inputs: I::keys(),
            construct: Box::new(move |_lifecycle, registry| invoke(I::fetch(registry)?)),
        }
    }
}
