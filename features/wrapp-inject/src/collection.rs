use std::{fmt, sync::Arc};

use crate::{
    binder::{Binder, Invoker},
    errors::{BindError, RunError},
    flows::{FlowSet, ReturnSet},
    provider::{ClusterId, Provider},
    types::Injectable,
};

/// Entry of a [Collection]
#[derive(Clone, Debug)]
pub enum Item {
    Provider(Provider),
    Collection(Collection),
}
impl From<Provider> for Item {
    fn from(provider: Provider) -> Self {
        Item::Provider(provider)
    }
}
impl From<Collection> for Item {
    fn from(collection: Collection) -> Self {
        Item::Collection(collection)
    }
}

/// An ordered, named group of providers and nested collections.
///
/// Order matters: it decides which producer is the closest one for a consumer and which
/// provider is the final one. Collections are immutable, every method returns a new one.
#[derive(Clone)]
pub struct Collection {
    name: Arc<str>,
    contents: Arc<[Item]>,
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_struct("Collection");
        list.field("name", &self.name);
        for provider in self.flatten() {
            list.field("provider", &provider.name());
        }
        list.finish()
    }
}

impl Collection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            contents: Arc::from(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn with_item(&self, item: Item) -> Self {
        let mut contents = self.contents.to_vec();
        contents.push(item);
        Self {
            name: self.name.clone(),
            contents: Arc::from(contents),
        }
    }

    /// Appends a provider (or anything convertible into an [Item])
    pub fn add(&self, item: impl Into<Item>) -> Self {
        self.with_item(item.into())
    }

    /// Appends a literal value
    pub fn add_constant<T: Injectable>(&self, value: T) -> Self {
        self.with_item(Item::Provider(Provider::constant(value)))
    }

    /// Appends every item of another collection, which stays grouped under its own name
    pub fn add_collection(&self, collection: &Collection) -> Self {
        self.with_item(Item::Collection(collection.clone()))
    }

    /// All providers in order, nested collections flattened
    pub fn flatten(&self) -> Vec<Provider> {
        let mut providers = Vec::new();
        self.flatten_into(&mut providers);
        providers
    }

    fn flatten_into(&self, providers: &mut Vec<Provider>) {
        for item in self.contents.iter() {
            match item {
                Item::Provider(provider) => providers.push(provider.clone()),
                Item::Collection(collection) => collection.flatten_into(providers),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.flatten().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies an annotation to every provider, nested ones included
    fn map_providers(&self, annotate: &dyn Fn(Provider) -> Provider) -> Self {
        let contents: Vec<Item> = self
            .contents
            .iter()
            .map(|item| match item {
                Item::Provider(provider) => Item::Provider(annotate(provider.clone())),
                Item::Collection(collection) => {
                    Item::Collection(collection.map_providers(annotate))
                }
            })
            .collect();
        Self {
            name: self.name.clone(),
            contents: Arc::from(contents),
        }
    }

    pub fn required(&self) -> Self {
        self.map_providers(&Provider::required)
    }

    pub fn desired(&self) -> Self {
        self.map_providers(&Provider::desired)
    }

    pub fn shun(&self) -> Self {
        self.map_providers(&Provider::shun)
    }

    pub fn cacheable(&self) -> Self {
        self.map_providers(&Provider::cacheable)
    }

    pub fn must_consume(&self) -> Self {
        self.map_providers(&Provider::must_consume)
    }

    /// Puts every provider of the collection into one new cluster
    pub fn clustered(&self) -> Self {
        let cluster = ClusterId::new();
        self.map_providers(&move |provider: Provider| provider.in_cluster(cluster))
    }
}

// Binding
impl Collection {
    /// Starts binding the collection, see [Binder]
    pub fn binder(&self) -> Binder<(), ()> {
        Binder::new(self.clone())
    }

    /// Binds an invoke signature without an init function
    pub fn bind<In: FlowSet, Out: ReturnSet>(&self) -> Result<Invoker<In, Out>, BindError> {
        self.binder().invoke::<In, Out>().bind()
    }

    /// Like [Collection::bind]
    ///
    /// # Panics
    /// If binding fails
    pub fn must_bind<In: FlowSet, Out: ReturnSet>(&self) -> Invoker<In, Out> {
        match self.bind::<In, Out>() {
            Ok(invoker) => invoker,
            Err(error) => panic!("binding '{}' failed: {error}", self.name),
        }
    }

    /// Binds the collection without inputs and runs it once
    pub fn run(&self) -> Result<(), RunError> {
        crate::binder::run(self)
    }

    /// Like [Collection::run]
    ///
    /// # Panics
    /// If binding or the run fails
    pub fn must_run(&self) {
        if let Err(error) = self.run() {
            panic!("running '{}' failed: {error}", self.name);
        }
    }
}
