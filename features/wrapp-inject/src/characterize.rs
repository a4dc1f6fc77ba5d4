//! Assigns every provider its class and flows.
//!
//! Classification is an ordered table of rules, each a conjunction of predicates over the
//! provider's shape, annotations and position. The first rule whose predicates all hold wins.

use std::{fmt, sync::Arc};

use rustc_hash::FxHashSet;

use crate::{
    config::InjectConfig,
    errors::{CharacterizeError, RuleAttempt},
    provider::{Annotations, Provider, ProviderId, Shape},
    registry::TypeCode,
    types::Outcome,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Class {
    Literal,
    StaticInjector,
    FallibleStaticInjector,
    Injector,
    FallibleInjector,
    Wrapper,
    Final,
    Init,
    Invoke,
}

/// Phase a class runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Group {
    Literal,
    Static,
    Run,
    Final,
    /// The bound init and invoke functions
    Invoke,
}

impl Class {
    pub(crate) fn group(self) -> Group {
        match self {
            Class::Literal => Group::Literal,
            Class::StaticInjector | Class::FallibleStaticInjector => Group::Static,
            Class::Injector | Class::FallibleInjector | Class::Wrapper => Group::Run,
            Class::Final => Group::Final,
            Class::Init | Class::Invoke => Group::Invoke,
        }
    }

    pub(crate) fn is_fallible(self) -> bool {
        matches!(self, Class::FallibleStaticInjector | Class::FallibleInjector)
    }
}

/// Identity of a node in a bound chain
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeKey {
    Init,
    Invoke,
    Provider(ProviderId),
    /// The no-op final appended to chains without one
    ImplicitFinal,
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Init => f.write_str("init"),
            NodeKey::Invoke => f.write_str("invoke"),
            NodeKey::Provider(id) => write!(f, "provider {id}"),
            NodeKey::ImplicitFinal => f.write_str("implicit final"),
        }
    }
}

/// Types a node consumes and produces, per direction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Flows {
    /// Consumed going down
    pub input: Vec<TypeCode>,
    /// Produced going down
    pub output: Vec<TypeCode>,
    /// Produced going up
    pub returns: Vec<TypeCode>,
    /// Consumed going up
    pub received: Vec<TypeCode>,
    /// Read from the static phase by the init function
    pub bypass: Vec<TypeCode>,
}

/// A characterized provider or endpoint
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub key: NodeKey,
    pub name: Arc<str>,
    /// `None` for the init and invoke endpoints
    pub provider: Option<Provider>,
    pub class: Class,
    pub flows: Flows,
    pub annotations: Annotations,
    /// Memoization after the arity cap was applied
    pub memoize: bool,
    /// Position in the flattened collection
    pub position: usize,
}

impl Node {
    pub(crate) fn group(&self) -> Group {
        self.class.group()
    }

    /// No outputs and no returns: the node exists for its side effects
    pub(crate) fn is_wanted(&self) -> bool {
        self.provider.is_some()
            && self.annotations.cluster.is_none()
            && self.flows.output.is_empty()
            && self.flows.returns.is_empty()
    }
}

/// Signature of the bound init or invoke function
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Endpoint {
    pub inputs: Vec<TypeCode>,
    pub outputs: Vec<TypeCode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Signature {
    pub init: Option<Endpoint>,
    pub invoke: Endpoint,
}

/// Where a provider is looked at from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Context {
    /// The provider is the last one of its collection
    pub is_last: bool,
    /// Every input is available before the first invocation
    pub inputs_static: bool,
}

/// What the predicates of a rule are evaluated against
struct Facts {
    constant: bool,
    function: bool,
    wrapper: bool,
    fallible: bool,
    last: bool,
    non_final: bool,
    must_static: bool,
    inputs_static: bool,
    cacheable: bool,
    not_cacheable: bool,
}

#[derive(Clone, Copy)]
enum Check {
    Constant,
    Function,
    Wrapper,
    Fallible,
    Infallible,
    Last,
    NotNonFinal,
    NotMustStatic,
    InputsStatic,
    CacheableIsh,
    NotNotCacheable,
}

impl Check {
    fn holds(self, facts: &Facts) -> bool {
        match self {
            Check::Constant => facts.constant,
            Check::Function => facts.function,
            Check::Wrapper => facts.wrapper,
            Check::Fallible => facts.fallible,
            Check::Infallible => !facts.fallible,
            Check::Last => facts.last,
            Check::NotNonFinal => !facts.non_final,
            Check::NotMustStatic => !facts.must_static,
            Check::InputsStatic => facts.inputs_static,
            Check::CacheableIsh => facts.cacheable || facts.must_static,
            Check::NotNotCacheable => !facts.not_cacheable,
        }
    }

    /// Why the check failed
    fn failure(self) -> &'static str {
        match self {
            Check::Constant => "is not a constant",
            Check::Function => "is not a function",
            Check::Wrapper => "is not a wrapper",
            Check::Fallible => "cannot fail",
            Check::Infallible => "can fail",
            Check::Last => "is not the last provider",
            Check::NotNonFinal => "is marked non_final",
            Check::NotMustStatic => "must run before the first invocation",
            Check::InputsStatic => "has inputs only available per invocation",
            Check::CacheableIsh => "is not cacheable",
            Check::NotNotCacheable => "is marked not_cacheable",
        }
    }
}

struct Rule {
    name: &'static str,
    class: Class,
    checks: &'static [Check],
}

const RULES: &[Rule] = &[
    Rule {
        name: "literal",
        class: Class::Literal,
        checks: &[Check::Constant],
    },
    Rule {
        name: "final",
        class: Class::Final,
        checks: &[
            Check::Function,
            Check::Infallible,
            Check::Last,
            Check::NotNonFinal,
            Check::NotMustStatic,
        ],
    },
    Rule {
        name: "static-injector",
        class: Class::StaticInjector,
        checks: &[
            Check::Function,
            Check::Infallible,
            Check::InputsStatic,
            Check::CacheableIsh,
            Check::NotNotCacheable,
        ],
    },
    Rule {
        name: "fallible-static-injector",
        class: Class::FallibleStaticInjector,
        checks: &[
            Check::Function,
            Check::Fallible,
            Check::InputsStatic,
            Check::CacheableIsh,
            Check::NotNotCacheable,
        ],
    },
    Rule {
        name: "injector",
        class: Class::Injector,
        checks: &[Check::Function, Check::Infallible, Check::NotMustStatic],
    },
    Rule {
        name: "fallible-injector",
        class: Class::FallibleInjector,
        checks: &[Check::Function, Check::Fallible, Check::NotMustStatic],
    },
    Rule {
        name: "wrapper",
        class: Class::Wrapper,
        checks: &[Check::Wrapper, Check::NotMustStatic],
    },
];

fn try_rules(facts: &Facts, attempts: &mut Vec<RuleAttempt>) -> Option<Class> {
    for rule in RULES {
        match rule.checks.iter().find(|check| !check.holds(facts)) {
            None => return Some(rule.class),
            Some(check) => attempts.push(RuleAttempt {
                rule: rule.name,
                inputs_static: facts.inputs_static,
                failed: check.failure(),
            }),
        }
    }
    None
}

/// Classifies one provider.
///
/// A provider that must run statically but matches no rule is tried once more with
/// `inputs_static` flipped. [prepare] rejects the result if the inputs are not actually
/// available before the first invocation.
pub(crate) fn classify(
    provider: &Provider,
    context: Context,
    memoize: bool,
) -> Result<Class, CharacterizeError> {
    let annotations = &provider.annotations;
    let (constant, function, wrapper, fallible) = match &*provider.shape {
        Shape::Constant { .. } => (true, false, false, false),
        Shape::Func { fallible, .. } => (false, true, false, *fallible),
        Shape::Wrapper { .. } => (false, false, true, false),
    };
    let mut facts = Facts {
        constant,
        function,
        wrapper,
        fallible,
        last: context.is_last,
        non_final: annotations.non_final,
        must_static: annotations.must_cache || annotations.singleton || memoize,
        inputs_static: context.inputs_static,
        cacheable: annotations.cacheable || annotations.memoize,
        not_cacheable: annotations.not_cacheable,
    };

    let mut attempts = Vec::new();
    if let Some(class) = try_rules(&facts, &mut attempts) {
        return Ok(class);
    }
    if facts.must_static {
        facts.inputs_static = !facts.inputs_static;
        if let Some(class) = try_rules(&facts, &mut attempts) {
            return Ok(class);
        }
    }

    Err(CharacterizeError::NoMatchingRule {
        provider: provider.name().to_string(),
        attempts,
    })
}

fn validate_annotations(provider: &Provider) -> Result<(), CharacterizeError> {
    let annotations = &provider.annotations;
    let has_keys = matches!(&*provider.shape, Shape::Func { keys: Some(_), .. });
    let reason = if annotations.must_cache && annotations.not_cacheable {
        Some("must_cache and not_cacheable exclude each other")
    } else if annotations.memoize && annotations.singleton {
        Some("memoize and singleton exclude each other")
    } else if annotations.memoize && !has_keys {
        Some("memoize needs hashable inputs, build the provider with keyed_func or keyed_fallible")
    } else if annotations.reorder && !matches!(&*provider.shape, Shape::Func { .. }) {
        Some("only functions can be reordered")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(CharacterizeError::InvalidAnnotation {
            provider: provider.name().to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

fn flows_of(provider: &Provider, class: Class) -> Flows {
    let mut flows = Flows::default();
    match &*provider.shape {
        Shape::Constant { code, .. } => flows.output.push(*code),
        Shape::Func {
            inputs, results, ..
        } => {
            flows.input = inputs.clone();
            if class == Class::Final {
                flows.returns = results.clone();
            } else {
                flows.output = results.clone();
            }
            if class.is_fallible() {
                flows.returns.push(TypeCode::of::<Outcome>());
            }
        }
        Shape::Wrapper {
            inputs,
            down,
            up,
            returns,
            ..
        } => {
            flows.input = inputs.clone();
            flows.output = down.clone();
            flows.received = up.clone();
            flows.returns = returns.clone();
        }
    }
    flows
}

fn endpoint_node(key: NodeKey, class: Class, flows: Flows) -> Node {
    Node {
        key,
        name: Arc::from(key.to_string()),
        provider: None,
        class,
        flows,
        annotations: Annotations {
            required: true,
            ..Annotations::default()
        },
        memoize: false,
        position: 0,
    }
}

/// Characterized nodes in chain order: `[init] literals statics invoke run.. final`
#[derive(Debug)]
pub(crate) struct Prepared {
    pub nodes: Vec<Node>,
    pub warnings: Vec<String>,
}

/// Classifies every provider and lays the nodes out in chain order
pub(crate) fn prepare(
    providers: &[Provider],
    signature: &Signature,
    config: &InjectConfig,
) -> Result<Prepared, CharacterizeError> {
    let outcome = TypeCode::of::<Outcome>();
    let mut warnings = Vec::new();

    // Literals are hoisted, so every literal output is available to every static provider
    let mut static_types: FxHashSet<TypeCode> = FxHashSet::default();
    if let Some(init) = &signature.init {
        static_types.extend(init.inputs.iter().copied());
    }
    for provider in providers {
        if let Shape::Constant { code, .. } = &*provider.shape {
            static_types.insert(*code);
        }
    }

    let mut literals = Vec::new();
    let mut statics = Vec::new();
    let mut run = Vec::new();
    for (position, provider) in providers.iter().enumerate() {
        validate_annotations(provider)?;

        let arity = provider.shape.inputs().len();
        let mut memoize = provider.annotations.memoize;
        if memoize && arity > config.max_memoize_arity {
            let warning = format!(
                "memoization of '{}' disabled: {arity} inputs exceed the limit of {}",
                provider.name(),
                config.max_memoize_arity
            );
            tracing::warn!("{warning}");
            warnings.push(warning);
            memoize = false;
        }

        let context = Context {
            is_last: position + 1 == providers.len(),
            inputs_static: provider
                .shape
                .inputs()
                .iter()
                .all(|code| static_types.contains(code)),
        };
        let class = classify(provider, context, memoize)?;
        let must_static =
            memoize || provider.annotations.must_cache || provider.annotations.singleton;
        if must_static && class.group() == Group::Static && !context.inputs_static {
            return Err(CharacterizeError::InvalidAnnotation {
                provider: provider.name().to_string(),
                reason: "must run before the first invocation, but some inputs are only known per invocation",
            });
        }
        let flows = flows_of(provider, class);
        tracing::trace!("Classified '{}' as {class:?}", provider.name());

        if class.group() == Group::Static {
            static_types.extend(flows.output.iter().copied());
        }
        let node = Node {
            key: NodeKey::Provider(provider.id()),
            name: provider.name.clone(),
            provider: Some(provider.clone()),
            class,
            flows,
            annotations: provider.annotations,
            memoize,
            position,
        };
        match class.group() {
            Group::Literal => literals.push(node),
            Group::Static => statics.push(node),
            _ => run.push(node),
        }
    }

    if config.implicit_final && !run.iter().any(|node| node.class == Class::Final) {
        let provider = Provider::func("implicit final", || ());
        let mut node = endpoint_node(NodeKey::ImplicitFinal, Class::Final, Flows::default());
        node.name = provider.name.clone();
        node.provider = Some(provider);
        node.position = providers.len();
        run.push(node);
    }

    let mut nodes = Vec::with_capacity(providers.len() + 3);
    if let Some(init) = &signature.init {
        let flows = Flows {
            output: init.inputs.clone(),
            received: init.outputs.iter().copied().filter(|code| *code == outcome).collect(),
            bypass: init.outputs.iter().copied().filter(|code| *code != outcome).collect(),
            ..Flows::default()
        };
        nodes.push(endpoint_node(NodeKey::Init, Class::Init, flows));
    }
    nodes.extend(literals);
    nodes.extend(statics);
    nodes.push(endpoint_node(
        NodeKey::Invoke,
        Class::Invoke,
        Flows {
            output: signature.invoke.inputs.clone(),
            received: signature.invoke.outputs.clone(),
            ..Flows::default()
        },
    ));
    nodes.extend(run);

    tracing::debug!(
        "Characterized {} providers into {} nodes",
        providers.len(),
        nodes.len()
    );
    Ok(Prepared { nodes, warnings })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Clone)]
    struct Raw(u8);
    #[derive(Clone)]
    struct Parsed(u8);

    fn context(is_last: bool, inputs_static: bool) -> Context {
        Context {
            is_last,
            inputs_static,
        }
    }

    fn no_init() -> Signature {
        Signature {
            init: None,
            invoke: Endpoint {
                inputs: vec![],
                outputs: vec![],
            },
        }
    }

    #[test]
    fn last_function_becomes_final() {
        let provider = Provider::func("end", |_: Raw| ());
        assert_eq!(classify(&provider, context(true, false), false).unwrap(), Class::Final);
        assert_eq!(classify(&provider, context(false, false), false).unwrap(), Class::Injector);
    }

    #[test]
    fn cacheable_with_static_inputs_runs_statically() {
        let provider = Provider::func("parse", |raw: Raw| (Parsed(raw.0),)).cacheable();
        assert_eq!(
            classify(&provider, context(false, true), false).unwrap(),
            Class::StaticInjector
        );
        assert_eq!(
            classify(&provider, context(false, false), false).unwrap(),
            Class::Injector
        );
        let not_cacheable = provider.not_cacheable();
        assert_eq!(
            classify(&not_cacheable, context(false, true), false).unwrap(),
            Class::Injector
        );
    }

    #[test]
    fn must_cache_is_retried_with_static_inputs() {
        let provider = Provider::func("parse", |raw: Raw| (Parsed(raw.0),)).must_cache();
        assert_eq!(
            classify(&provider, context(true, false), false).unwrap(),
            Class::StaticInjector
        );
    }

    #[test]
    fn must_static_wrapper_lists_both_attempts() {
        let provider =
            Provider::wrapper("wrap", |next: crate::flows::Next<(), ()>| next.call(())).singleton();
        let Err(CharacterizeError::NoMatchingRule { attempts, .. }) =
            classify(&provider, context(false, false), false)
        else {
            panic!("expected a characterization error");
        };
        assert_eq!(attempts.len(), RULES.len() * 2);
        let wrapper_attempts: Vec<_> = attempts.iter().filter(|a| a.rule == "wrapper").collect();
        assert_eq!(wrapper_attempts.len(), 2);
        assert_eq!(wrapper_attempts[0].failed, "must run before the first invocation");
        assert_ne!(wrapper_attempts[0].inputs_static, wrapper_attempts[1].inputs_static);
    }

    #[test]
    fn conflicting_annotations_are_fatal() {
        let provider = Provider::func("f", |_: Raw| ()).must_cache().not_cacheable();
        assert!(matches!(
            prepare(&[provider], &no_init(), &InjectConfig::default()),
            Err(CharacterizeError::InvalidAnnotation { .. })
        ));

        let unkeyed = Provider::func("f", |raw: Raw| (Parsed(raw.0),)).memoize();
        assert!(matches!(
            prepare(&[unkeyed], &no_init(), &InjectConfig::default()),
            Err(CharacterizeError::InvalidAnnotation { .. })
        ));
    }

    #[test]
    fn must_cache_with_per_invocation_inputs_is_fatal() {
        let providers = vec![
            Provider::func("parse", |raw: Raw| (Parsed(raw.0),)).must_cache(),
            Provider::func("use", |_: Parsed| ()),
        ];
        let Err(CharacterizeError::InvalidAnnotation { provider, .. }) =
            prepare(&providers, &no_init(), &InjectConfig::default())
        else {
            panic!("expected an annotation error");
        };
        assert_eq!(provider, "parse");

        let with_literal = vec![
            Provider::constant(Raw(1)),
            providers[0].clone(),
            providers[1].clone(),
        ];
        assert!(prepare(&with_literal, &no_init(), &InjectConfig::default()).is_ok());
    }

    #[test]
    fn memoize_above_arity_cap_is_disabled_with_a_warning() {
        let provider = Provider::keyed_func("sum", |a: u8, b: u8| (a as u16 + b as u16,)).memoize();
        let config = InjectConfig::default().with_max_memoize_arity(1);
        let prepared = prepare(&[provider], &no_init(), &config).unwrap();
        assert_eq!(prepared.warnings.len(), 1);
        assert!(prepared.nodes.iter().all(|node| !node.memoize));
    }

    #[test]
    fn nodes_are_laid_out_in_chain_order() {
        let providers = vec![
            Provider::func("parse", |raw: Raw| (Parsed(raw.0),)).cacheable(),
            Provider::constant(Raw(1)),
            Provider::func("use", |_: Parsed| ()),
        ];
        let signature = Signature {
            init: Some(Endpoint {
                inputs: vec![],
                outputs: vec![],
            }),
            invoke: Endpoint {
                inputs: vec![],
                outputs: vec![],
            },
        };
        let prepared = prepare(&providers, &signature, &InjectConfig::default()).unwrap();
        let classes: Vec<Class> = prepared.nodes.iter().map(|node| node.class).collect();
        assert_eq!(
            classes,
            vec![
                Class::Init,
                Class::Literal,
                Class::StaticInjector,
                Class::Invoke,
                Class::Final
            ]
        );
    }

    #[test]
    fn implicit_final_is_appended() {
        let providers = vec![Provider::func("side effect", |_: Raw| ()).non_final()];
        let prepared = prepare(&providers, &no_init(), &InjectConfig::default()).unwrap();
        let last = prepared.nodes.last().unwrap();
        assert_eq!(last.key, NodeKey::ImplicitFinal);
        assert_eq!(last.class, Class::Final);

        let disabled = InjectConfig::default().with_implicit_final(false);
        let prepared = prepare(&providers, &no_init(), &disabled).unwrap();
        assert!(prepared.nodes.iter().all(|node| node.class != Class::Final));
    }
}
