use std::fmt;

use thiserror::Error;

use crate::types::SharedError;

/// Errors returned while binding a collection
#[derive(Error, Debug, Clone)]
pub enum BindError {
    /// A provider could not be classified
    #[error(transparent)]
    Characterize(#[from] CharacterizeError),
    /// No valid provider set exists
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// The resolved chain could not be turned into a pipeline
    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// One classification rule a provider was checked against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleAttempt {
    pub rule: &'static str,
    /// Whether the provider's inputs were treated as available before the first invocation
    pub inputs_static: bool,
    /// The first predicate of the rule that did not hold
    pub failed: &'static str,
}
impl fmt::Display for RuleAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (inputs static: {}): {}",
            self.rule, self.inputs_static, self.failed
        )
    }
}

#[derive(Error, Debug, Clone)]
pub enum CharacterizeError {
    #[error("No rule matches provider '{provider}':{}", bullet_list(.attempts))]
    NoMatchingRule {
        provider: String,
        attempts: Vec<RuleAttempt>,
    },
    #[error("Provider '{provider}' has conflicting annotations: {reason}")]
    InvalidAnnotation {
        provider: String,
        reason: &'static str,
    },
}

#[derive(Error, Debug, Clone)]
pub enum ResolveError {
    /// A provider that must be part of the chain was excluded
    #[error(
        "Required provider '{provider}' cannot be included: {}{}",
        because(.chain),
        report_section(.report)
    )]
    RequiredExcluded {
        provider: String,
        /// Why the provider was excluded, each entry explaining the one before
        chain: Vec<String>,
        /// Every other excluded provider and why
        report: Vec<String>,
    },
    #[error("Reordering providers forms a cycle between {providers:?}")]
    ReorderCycle { providers: Vec<String> },
    /// The final consistency check disagreed with the resolved set
    #[error("Inconsistent resolution, this is a bug: {0}")]
    Internal(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("The chain has no final provider")]
    MissingFinal,
    #[error("The chain has more than one final provider: {finals:?}")]
    MultipleFinals { finals: Vec<String> },
}

/// Errors when calling a bound chain
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    #[error("The chain has an init function which was not called before invoking it")]
    NotInitialized,
}

/// Errors of [Collection::run](crate::collection::Collection::run)
#[derive(Error, Debug, Clone)]
pub enum RunError {
    #[error(transparent)]
    Bind(#[from] BindError),
    /// A fallible provider failed
    #[error("Chain failed: {0}")]
    Failed(SharedError),
}

fn because(chain: &[String]) -> String {
    chain.join(", because ")
}

fn bullet_list(entries: &[impl fmt::Display]) -> String {
    entries
        .iter()
        .map(|entry| format!("\n- {entry}"))
        .collect()
}

fn report_section(report: &[String]) -> String {
    if report.is_empty() {
        return String::new();
    }
    format!("\nExcluded providers:{}", bullet_list(report))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn required_excluded_lists_chain_and_report() {
        let error = ResolveError::RequiredExcluded {
            provider: "final".into(),
            chain: vec!["'final' lost its provider of u8".into(), "'parse' failed".into()],
            report: vec!["'parse': failed".into()],
        };
        assert_eq!(
            error.to_string(),
            "Required provider 'final' cannot be included: 'final' lost its provider of u8, \
             because 'parse' failed\nExcluded providers:\n- 'parse': failed"
        );
    }

    #[test]
    fn no_matching_rule_lists_attempts() {
        let error = CharacterizeError::NoMatchingRule {
            provider: "wrap".into(),
            attempts: vec![RuleAttempt {
                rule: "wrapper",
                inputs_static: false,
                failed: "must run before the first invocation",
            }],
        };
        assert_eq!(
            error.to_string(),
            "No rule matches provider 'wrap':\n- wrapper (inputs static: false): must run before the first invocation"
        );
    }
}
