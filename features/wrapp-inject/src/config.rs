/// Options applied while binding a [Collection](crate::collection::Collection)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectConfig {
    /// Highest number of inputs a memoized provider may have.
    /// Memoization is disabled (with a warning) for providers above it.
    pub max_memoize_arity: usize,
    /// Append a no-op final provider when the chain does not end in one
    pub implicit_final: bool,
    /// Attach the reason of every excluded provider to resolution errors
    pub report_exclusions: bool,
}

impl Default for InjectConfig {
    fn default() -> Self {
        Self {
            max_memoize_arity: 6,
            implicit_final: true,
            report_exclusions: true,
        }
    }
}

impl InjectConfig {
    pub fn with_max_memoize_arity(mut self, arity: usize) -> Self {
        self.max_memoize_arity = arity;
        self
    }

    pub fn with_implicit_final(mut self, enabled: bool) -> Self {
        self.implicit_final = enabled;
        self
    }

    pub fn with_report_exclusions(mut self, enabled: bool) -> Self {
        self.report_exclusions = enabled;
        self
    }
}
