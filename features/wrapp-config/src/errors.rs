use wrapp_inject::TypeInfo;

/// Errors of the [ConfigProvider](crate::provider::ConfigProvider)
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The required config is not registered
    #[error("Config '{}' is not registered", .0.type_name)]
    Missing(TypeInfo),
    /// A config of the same type is already registered
    #[error("Config '{}' is already registered", .0.type_name)]
    AlreadyRegistered(TypeInfo),
}
