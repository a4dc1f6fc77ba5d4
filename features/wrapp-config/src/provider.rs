use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

use wrapp_inject::{Collection, InjectConfig, Provider, TypeInfo};

use crate::{config::Config, errors::ConfigError};

struct Entry {
    value: Arc<dyn Any + Send + Sync + 'static>,
    /// Literal provider of the `Config<T>` wrapping `value`
    literal: Provider,
}

/// A provider to register all configs.
///
/// Configs can be registered and retrieved based on type.
#[derive(Default)]
pub struct ConfigProvider {
    configs: HashMap<TypeId, Entry>,
    /// Registration order, which is the order of [ConfigProvider::collection]
    order: Vec<TypeId>,
}

impl ConfigProvider {
    /// Initializes an empty Config Provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieve a config with specified type, `None` if it was never added
    pub fn get_config<T: Send + Sync + 'static>(&self) -> Option<Config<T>> {
        self.configs
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value.clone().downcast::<T>().ok())
            .map(Config::new)
    }

    /// Like [ConfigProvider::get_config], but a missing config is an error
    pub fn require_config<T: Send + Sync + 'static>(&self) -> Result<Config<T>, ConfigError> {
        self.get_config()
            .ok_or_else(|| ConfigError::Missing(TypeInfo::of::<T>()))
    }

    /// Add a config to the registry.
    ///
    /// If the config type is already registered, it will return a
    /// [`ConfigError`] runtime error
    pub fn add_config<T: Send + Sync + 'static>(
        &mut self,
        config: T,
    ) -> Result<&mut Self, ConfigError> {
        let type_id = TypeId::of::<T>();
        if self.configs.contains_key(&type_id) {
            return Err(ConfigError::AlreadyRegistered(TypeInfo::of::<T>()));
        }

        let value = Arc::new(config);
        let literal = Provider::constant(Config::new(value.clone()));
        tracing::debug!("Registered config {}", std::any::type_name::<T>());
        self.configs.insert(type_id, Entry { value, literal });
        self.order.push(type_id);
        Ok(self)
    }

    /// Can optionally add a config to the registry.
    ///
    /// If the config provided is `Some(T)`, it will be the same as calling [`ConfigProvider::add_config`]
    /// If the config provided is `None`, then the function just returns `Ok(self)` for chaining
    pub fn maybe_add_config<T: Send + Sync + 'static>(
        &mut self,
        config: Option<T>,
    ) -> Result<&mut Self, ConfigError> {
        match config {
            Some(c) => self.add_config(c),
            None => Ok(self),
        }
    }

    /// Options for binding chains: the registered [InjectConfig], or the default one
    pub fn inject_config(&self) -> InjectConfig {
        self.get_config::<InjectConfig>()
            .map(|config| (*config).clone())
            .unwrap_or_default()
    }

    /// A collection with one `Config<T>` literal per registered config, in registration order
    pub fn collection(&self) -> Collection {
        self.order
            .iter()
            .filter_map(|type_id| self.configs.get(type_id))
            .fold(Collection::new("configs"), |collection, entry| {
                collection.add(entry.literal.clone())
            })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct AppConfig {
        host: String,
        port: u16,
    }

    #[derive(Clone, Debug, PartialEq)]
    struct FeatureFlags {
        beta: bool,
    }

    fn app_config() -> AppConfig {
        AppConfig {
            host: "localhost".to_string(),
            port: 8080,
        }
    }

    #[test]
    fn configs_are_retrieved_by_type() {
        let mut provider = ConfigProvider::new();
        provider
            .add_config(app_config())
            .unwrap()
            .maybe_add_config(None::<FeatureFlags>)
            .unwrap();

        assert_eq!(*provider.get_config::<AppConfig>().unwrap(), app_config());
        assert!(provider.get_config::<FeatureFlags>().is_none());
        assert_eq!(
            provider.require_config::<FeatureFlags>().unwrap_err(),
            ConfigError::Missing(TypeInfo::of::<FeatureFlags>())
        );
    }

    #[test]
    fn registering_twice_fails() {
        let mut provider = ConfigProvider::new();
        provider.add_config(app_config()).unwrap();
        let error = provider.add_config(app_config()).err().unwrap();
        assert_eq!(error, ConfigError::AlreadyRegistered(TypeInfo::of::<AppConfig>()));
        assert!(error.to_string().contains("AppConfig"));
    }

    #[test]
    fn inject_config_falls_back_to_the_default() {
        let mut provider = ConfigProvider::new();
        assert_eq!(provider.inject_config(), InjectConfig::default());

        let custom = InjectConfig::default().with_max_memoize_arity(2);
        provider.add_config(custom.clone()).unwrap();
        assert_eq!(provider.inject_config(), custom);
    }

    #[test]
    fn configs_are_injected_as_literals() {
        let mut provider = ConfigProvider::new();
        provider
            .add_config(app_config())
            .unwrap()
            .add_config(FeatureFlags { beta: true })
            .unwrap();

        let checked = provider
            .collection()
            .add(Provider::fallible("check", |flags: Config<FeatureFlags>| {
                if !flags.beta {
                    return Err("beta is disabled");
                }
                Ok(())
            }))
            .add(Provider::func("end", || ()));
        assert_eq!(checked.len(), 4);
        assert!(checked.run().is_ok());

        let invoker = provider
            .collection()
            .add(Provider::func(
                "address",
                |app: Config<AppConfig>, flags: Config<FeatureFlags>| {
                    (format!("{}:{} beta={}", app.host, app.port, flags.beta),)
                },
            ))
            .binder()
            .config(provider.inject_config())
            .invoke::<(), (String,)>()
            .bind()
            .unwrap();
        assert_eq!(invoker.invoke(()), ("localhost:8080 beta=true".to_string(),));
    }
}
