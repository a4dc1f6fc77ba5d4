use std::{fmt, ops::Deref, sync::Arc};

/// A registered config, injected into providers by its type.
///
/// # Example
/// ```rust
/// use wrapp_config::{config::Config, provider::ConfigProvider};
/// use wrapp_inject::{Collection, Provider};
///
/// #[derive(Clone)]
/// struct ServerConfig {
///     port: u16,
/// }
///
/// let mut configs = ConfigProvider::new();
/// configs.add_config(ServerConfig { port: 8080 }).unwrap();
///
/// let chain = configs
///     .collection()
///     .add(Provider::func("port", |config: Config<ServerConfig>| (config.port,)));
/// let invoker = chain.bind::<(), (u16,)>().unwrap();
/// assert_eq!(invoker.invoke(()), (8080,));
/// ```
pub struct Config<T> {
    inner: Arc<T>,
}

impl<T> Config<T> {
    pub(crate) fn new(inner: Arc<T>) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> Arc<T> {
        self.inner.clone()
    }

    pub fn into_inner(self) -> Arc<T> {
        self.inner
    }
}

impl<T> Deref for Config<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

// Configs are shared, cloning never requires T: Clone
impl<T> Clone for Config<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Config<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Config").field(&self.inner).finish()
    }
}
